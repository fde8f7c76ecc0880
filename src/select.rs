//! Per-relay measurement selection and network-wide bandwidth averages.

use std::collections::HashMap;

use crate::aggregate::RelayState;

/// Diagnostic and driving network averages for one round. `pre_*` are
/// computed over each relay's mean sample and only ever logged;
/// `true_*` are computed over each relay's chosen sample and drive ratio
/// computation.
#[derive(Debug, Clone, Copy)]
pub struct NetworkAverages {
    pub pre_strm_avg: f64,
    pub pre_filt_avg: f64,
    pub true_strm_avg: f64,
    pub true_filt_avg: f64,
}

/// Choose, for every relay, the most-recent-timestamp sample index for
/// both stream and filtered bandwidth, then compute the round's network
/// averages.
pub fn select(relays: &mut HashMap<String, RelayState>) -> NetworkAverages {
    for relay in relays.values_mut() {
        let idx = most_recent_index(&relay.timestamps);
        relay.chosen_sbw = idx;
        relay.chosen_fbw = idx;
        tracing::debug!(
            idhex = %relay.idhex,
            nick = %relay.nick,
            chosen_sbw = ?relay.chosen_sbw,
            chosen_fbw = ?relay.chosen_fbw,
            "chose representative sample"
        );
    }

    let pre_strm_avg = mean(relays.values().map(RelayState::avg_strm_bw));
    let pre_filt_avg = mean(relays.values().map(RelayState::avg_filt_bw));
    tracing::debug!(pre_strm_avg, pre_filt_avg, "diagnostic pre-selection network averages");

    let true_strm_avg = mean(relays.values().filter_map(|r| {
        r.chosen_sbw.map(|i| r.strm_bw[i] as f64)
    }));
    let true_filt_avg = mean(relays.values().filter_map(|r| {
        r.chosen_fbw.map(|i| r.filt_bw[i] as f64)
    }));
    tracing::debug!(true_strm_avg, true_filt_avg, "network averages driving ratio computation");

    NetworkAverages {
        pre_strm_avg,
        pre_filt_avg,
        true_strm_avg,
        true_filt_avg,
    }
}

/// Index of the largest value in `timestamps`; ties resolve to the
/// lowest index. `None` for an empty slice.
fn most_recent_index(timestamps: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &t) in timestamps.iter().enumerate() {
        match best {
            Some(b) if timestamps[b] >= t => {}
            _ => best = Some(i),
        }
    }
    best
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_most_recent_timestamp() {
        assert_eq!(most_recent_index(&[1.0, 5.0, 3.0]), Some(1));
    }

    #[test]
    fn ties_resolve_to_the_lowest_index() {
        assert_eq!(most_recent_index(&[2.0, 5.0, 5.0, 1.0]), Some(1));
    }

    #[test]
    fn empty_sequence_has_no_chosen_index() {
        assert_eq!(most_recent_index(&[]), None);
    }
}
