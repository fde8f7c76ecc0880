//! Command-line configuration surface.
//!
//! Every tunable constant in the component design is exposed as a flag
//! with the spec's default, so the binary needs zero flags for normal
//! operation but nothing requires a rebuild to change.

use clap::Parser;

const GUARD_PERIOD_DEFAULT: f64 = 2.0 * 7.0 * 24.0 * 3600.0;
const MAX_AGE_DEFAULT: f64 = 15.0 * 24.0 * 3600.0;
const MAX_SCAN_AGE_DEFAULT: f64 = 1.5 * 24.0 * 3600.0;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the current network consensus.
    #[clap(long)]
    pub consensus: String,

    /// Scanner root directories to walk for measurement files.
    #[clap(required = true)]
    pub scanner_dirs: Vec<String>,

    /// Vote file: read as this round's prior vote, then overwritten with
    /// this round's output.
    pub vote_file: String,

    /// Skip voting for Guard-flagged, non-Exit relays.
    #[clap(long)]
    pub ignore_guards: bool,

    /// Guard measurement period, in seconds.
    #[clap(long, default_value_t = GUARD_PERIOD_DEFAULT)]
    pub guard_period: f64,

    /// Fraction of total measured network bandwidth a single relay may
    /// claim.
    #[clap(long, default_value_t = 0.05)]
    pub node_cap: f64,

    /// Minimum percentage of the network that must be measured to vote.
    #[clap(long, default_value_t = 60.0)]
    pub min_report: f64,

    /// Maximum age, in seconds, of a scanner result file still considered.
    #[clap(long, default_value_t = MAX_AGE_DEFAULT)]
    pub max_age: f64,

    /// Maximum age, in seconds, of a scanner's newest result before it is
    /// considered stale.
    #[clap(long, default_value_t = MAX_SCAN_AGE_DEFAULT)]
    pub max_scan_age: f64,

    /// PID proportional gain.
    #[clap(long, default_value_t = 1.0)]
    pub kp: f64,

    /// Samples to correct steady-state error.
    #[clap(long, default_value_t = 4.0)]
    pub ti: f64,

    /// Predictive horizon, in samples.
    #[clap(long, default_value_t = 0.5)]
    pub td: f64,
}

impl Cli {
    pub fn pid_params(&self) -> crate::pid::PidParams {
        crate::pid::PidParams {
            kp: self.kp,
            ti: self.ti,
            td: self.td,
            guard_period: self.guard_period,
        }
    }
}
