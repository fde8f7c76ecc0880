//! Per-relay aggregate state, built up from measurement records across
//! scanners and slices.

use std::collections::{BTreeMap, HashMap};

use crate::parser::MeasurementRecord;

/// One retained sample for one slice of one relay.
#[derive(Debug, Clone)]
struct SliceSample {
    timestamp: f64,
    strm_bw: i64,
    filt_bw: i64,
    ns_bw: i64,
    desc_bw: i64,
}

/// Aggregate per-relay state: flattened, deduplicated sample sequences
/// plus the selection indices and PID/output fields filled in by later
/// stages.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub idhex: String,
    pub nick: String,

    /// One retained sample per slice id, keyed so rebuilding the flat
    /// sequences below is deterministic.
    slices: BTreeMap<String, SliceSample>,

    pub strm_bw: Vec<i64>,
    pub filt_bw: Vec<i64>,
    pub ns_bw: Vec<i64>,
    pub desc_bw: Vec<i64>,
    pub timestamps: Vec<f64>,

    pub chosen_sbw: Option<usize>,
    pub chosen_fbw: Option<usize>,
    pub bw_idx: Option<usize>,

    pub sbw_ratio: Option<f64>,
    pub fbw_ratio: Option<f64>,
    pub ratio: Option<f64>,

    pub pid_error: f64,
    pub prev_error: f64,
    pub error_sum: f64,
    pub derror_dt: f64,
    pub prev_voted_at: f64,
    pub chosen_time: f64,

    pub new_bw: f64,
    pub change: f64,
    pub ignore: bool,
    pub vote_time: i64,
}

impl RelayState {
    fn new(idhex: String, nick: String) -> RelayState {
        RelayState {
            idhex,
            nick,
            slices: BTreeMap::new(),
            strm_bw: Vec::new(),
            filt_bw: Vec::new(),
            ns_bw: Vec::new(),
            desc_bw: Vec::new(),
            timestamps: Vec::new(),
            chosen_sbw: None,
            chosen_fbw: None,
            bw_idx: None,
            sbw_ratio: None,
            fbw_ratio: None,
            ratio: None,
            pid_error: 0.0,
            prev_error: 0.0,
            error_sum: 0.0,
            derror_dt: 0.0,
            prev_voted_at: 0.0,
            chosen_time: 0.0,
            new_bw: 0.0,
            change: 0.0,
            ignore: false,
            vote_time: 0,
        }
    }

    /// Record one measurement line for this relay, keeping only the
    /// newest sample per slice id, then rebuild the flat sequences.
    ///
    /// Mixing `idhex` values inside one relay is a bug in the caller, not
    /// a recoverable input error; it aborts.
    fn add_record(&mut self, record: MeasurementRecord) {
        assert_eq!(
            self.idhex, record.idhex,
            "relay {} received a record for idhex {}",
            self.idhex, record.idhex
        );
        self.nick = record.nick;

        let replace = match self.slices.get(&record.slice_id) {
            Some(existing) => existing.timestamp < record.timestamp,
            None => true,
        };
        if replace {
            self.slices.insert(
                record.slice_id.clone(),
                SliceSample {
                    timestamp: record.timestamp,
                    strm_bw: record.strm_bw,
                    filt_bw: record.filt_bw,
                    ns_bw: record.ns_bw,
                    desc_bw: record.desc_bw,
                },
            );
        }

        self.rebuild_flat_sequences();
    }

    fn rebuild_flat_sequences(&mut self) {
        self.strm_bw.clear();
        self.filt_bw.clear();
        self.ns_bw.clear();
        self.desc_bw.clear();
        self.timestamps.clear();
        for sample in self.slices.values() {
            self.strm_bw.push(sample.strm_bw);
            self.filt_bw.push(sample.filt_bw);
            self.ns_bw.push(sample.ns_bw);
            self.desc_bw.push(sample.desc_bw);
            self.timestamps.push(sample.timestamp);
        }
    }

    pub fn avg_strm_bw(&self) -> f64 {
        mean(&self.strm_bw)
    }

    pub fn avg_filt_bw(&self) -> f64 {
        mean(&self.filt_bw)
    }
}

fn mean(values: &[i64]) -> f64 {
    values.iter().sum::<i64>() as f64 / values.len() as f64
}

/// Groups measurement records by relay identity, keeping the most recent
/// per-slice record for each.
#[derive(Debug, Default)]
pub struct Aggregator {
    relays: HashMap<String, RelayState>,
}

impl Aggregator {
    pub fn new() -> Aggregator {
        Aggregator::default()
    }

    pub fn ingest(&mut self, record: MeasurementRecord) {
        let state = self
            .relays
            .entry(record.idhex.clone())
            .or_insert_with(|| RelayState::new(record.idhex.clone(), record.nick.clone()));
        state.add_record(record);
    }

    pub fn into_relays(self) -> HashMap<String, RelayState> {
        self.relays
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }
}

/// Test-only helpers for building a [`RelayState`] without going through
/// the measurement pipeline, used by other modules' unit tests.
#[cfg(test)]
pub mod test_support {
    use super::RelayState;

    pub fn blank_relay(idhex: &str, nick: &str) -> RelayState {
        RelayState::new(idhex.to_string(), nick.to_string())
    }
}
