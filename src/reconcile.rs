//! Measured-coverage accounting, outlier capping, and the coverage gate.

use std::collections::HashMap;

use crate::aggregate::RelayState;
use crate::parser::{ConsensusDocument, Flag};

/// 2^32 relays' worth of thousand-unit bandwidth: the hard ceiling no
/// relay's vote may exceed.
const MAX_BW: f64 = 4_294_967_296.0 * 1000.0;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOutcome {
    pub tot_net_bw: f64,
    pub measured_pct: f64,
}

/// Mark measured consensus entries, flag relays to skip, clamp outliers,
/// and compute this round's measured percentage. Does not itself enforce
/// the coverage gate — the caller compares `measured_pct` against
/// `min_report` and decides whether to abort.
pub fn reconcile(
    relays: &mut HashMap<String, RelayState>,
    consensus: &mut ConsensusDocument,
    ignore_guards: bool,
    node_cap: f64,
) -> ReconcileOutcome {
    let mut tot_net_bw = 0.0;
    for (idhex, relay) in relays.iter() {
        if relay.bw_idx.is_none() {
            continue;
        }
        if let Some(entry) = consensus.relays.get_mut(idhex) {
            if entry.bandwidth.is_some() {
                entry.measured = true;
                tot_net_bw += relay.new_bw;
            }
        }
    }

    for (idhex, relay) in relays.iter_mut() {
        if relay.bw_idx.is_none() {
            continue;
        }
        let entry = match consensus.relays.get(idhex) {
            Some(e) => e,
            None => continue,
        };
        if entry.has_flag(Flag::Authority) {
            tracing::info!(idhex = %relay.idhex, nick = %relay.nick, "skipping voting for authority");
            relay.ignore = true;
        } else if ignore_guards && entry.has_flag(Flag::Guard) && !entry.has_flag(Flag::Exit) {
            tracing::info!(idhex = %relay.idhex, nick = %relay.nick, "skipping voting for guard");
            relay.ignore = true;
        }
    }

    for relay in relays.values_mut() {
        if relay.bw_idx.is_none() {
            continue;
        }
        if relay.new_bw >= MAX_BW {
            tracing::warn!(idhex = %relay.idhex, nick = %relay.nick, new_bw = relay.new_bw, "bandwidth exceeded maxint32, clamping");
            relay.new_bw = MAX_BW;
        }
        let cap = tot_net_bw * node_cap;
        if relay.new_bw > cap {
            tracing::info!(
                idhex = %relay.idhex,
                nick = %relay.nick,
                from = relay.new_bw,
                to = cap,
                "clipping extremely fast node"
            );
            relay.new_bw = cap;
            relay.error_sum = 0.0;
        }
    }

    let measured_relay_count = relays.values().filter(|r| r.bw_idx.is_some()).count() as f64;
    let missed_nodes = consensus
        .relays
        .values()
        .filter(|e| !e.measured && e.has_flag(Flag::Fast) && e.has_flag(Flag::Running))
        .filter(|e| e.bandwidth.map(|bw| bw > 0).unwrap_or(false))
        .count() as f64;

    let measured_pct = if measured_relay_count + missed_nodes > 0.0 {
        100.0 * measured_relay_count / (measured_relay_count + missed_nodes)
    } else {
        0.0
    };

    tracing::info!(measured_pct, missed_nodes, "measured percentage of the network");

    ReconcileOutcome {
        tot_net_bw,
        measured_pct,
    }
}

/// Relays with a selected sample, sorted by descending `change` —
/// informational ordering used both for the vote file and the run
/// summary log.
pub fn sorted_by_change(relays: &HashMap<String, RelayState>) -> Vec<&RelayState> {
    let mut sorted: Vec<&RelayState> = relays.values().filter(|r| r.bw_idx.is_some()).collect();
    sorted.sort_by(|a, b| b.change.partial_cmp(&a.change).unwrap_or(std::cmp::Ordering::Equal));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_support::blank_relay;
    use crate::parser::{ConsensusEntry, ConsensusMeta};

    fn consensus_with(entries: Vec<ConsensusEntry>) -> ConsensusDocument {
        ConsensusDocument {
            relays: entries.into_iter().map(|e| (e.idhex.clone(), e)).collect(),
            meta: ConsensusMeta {
                pid_enabled: false,
                weights: Default::default(),
            },
        }
    }

    fn entry(idhex: &str, flags: Vec<Flag>, bandwidth: Option<i64>) -> ConsensusEntry {
        ConsensusEntry {
            idhex: idhex.to_string(),
            flags,
            bandwidth,
            list_rank: 0,
            measured: false,
        }
    }

    #[test]
    fn cap_activation_clamps_and_resets_error_sum() {
        let mut relays = HashMap::new();
        let mut r1 = blank_relay("A", "fast");
        r1.bw_idx = Some(0);
        r1.desc_bw = vec![0];
        r1.new_bw = 1_000_000.0;
        r1.error_sum = 5.0;
        relays.insert("A".to_string(), r1);

        let mut r2 = blank_relay("B", "slow");
        r2.bw_idx = Some(0);
        r2.desc_bw = vec![0];
        r2.new_bw = 100.0;
        relays.insert("B".to_string(), r2);

        let mut consensus = consensus_with(vec![
            entry("A", vec![Flag::Fast, Flag::Running], Some(1)),
            entry("B", vec![Flag::Fast, Flag::Running], Some(1)),
        ]);

        let outcome = reconcile(&mut relays, &mut consensus, false, 0.05);
        assert_eq!(outcome.tot_net_bw, 1_000_100.0);
        assert_eq!(relays["A"].new_bw, 50_005.0);
        assert_eq!(relays["A"].error_sum, 0.0);
        assert_eq!(relays["B"].new_bw, 100.0);
    }

    #[test]
    fn coverage_gate_reports_measured_percentage() {
        let mut relays = HashMap::new();
        for i in 0..5 {
            let idhex = format!("M{i}");
            let mut r = blank_relay(&idhex, "relay");
            r.bw_idx = Some(0);
            r.desc_bw = vec![0];
            r.new_bw = 10.0;
            relays.insert(idhex, r);
        }

        let mut entries: Vec<ConsensusEntry> = (0..5)
            .map(|i| entry(&format!("M{i}"), vec![Flag::Fast, Flag::Running], Some(1)))
            .collect();
        entries.extend((0..5).map(|i| entry(&format!("U{i}"), vec![Flag::Fast, Flag::Running], Some(1))));
        let mut consensus = consensus_with(entries);

        let outcome = reconcile(&mut relays, &mut consensus, false, 0.05);
        assert_eq!(outcome.measured_pct, 50.0);
    }

    #[test]
    fn authority_relays_are_ignored() {
        let mut relays = HashMap::new();
        let mut r = blank_relay("A", "dizum");
        r.bw_idx = Some(0);
        r.desc_bw = vec![0];
        r.new_bw = 10.0;
        relays.insert("A".to_string(), r);

        let mut consensus = consensus_with(vec![entry("A", vec![Flag::Authority], Some(1))]);
        reconcile(&mut relays, &mut consensus, false, 0.05);
        assert!(relays["A"].ignore);
    }
}
