//! The handful of conditions that are fatal to a run — everything else is
//! handled locally at its source and never reaches this type.

use thiserror;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("failed to read consensus file {path}")]
    ConsensusIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("measured only {measured_pct:.1}% of the network, below the required {min_report:.1}%")]
    CoverageGate { measured_pct: f64, min_report: f64 },
    #[error("no scanner measurements were collected this round")]
    NoMeasurements,
}
