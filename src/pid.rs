//! The PID feedback controller: per-relay ratio/error computation, the
//! node sample rate, and the cadence/blending logic that turns a
//! measurement into a new advertised bandwidth.

use std::collections::HashMap;

use crate::aggregate::RelayState;
use crate::parser::{ConsensusDocument, ConsensusEntry, ConsensusMeta, Flag};
use crate::select::NetworkAverages;
use crate::vote::PriorVote;

/// The constants and time scales the controller needs, gathered from the
/// CLI configuration.
#[derive(Debug, Clone, Copy)]
pub struct PidParams {
    pub kp: f64,
    pub ti: f64,
    pub td: f64,
    pub guard_period: f64,
}

impl PidParams {
    fn ki(&self) -> f64 {
        self.kp / self.ti
    }

    fn kd(&self) -> f64 {
        self.kp * self.td
    }
}

/// Pick the smaller of the stream/filtered ratios for every relay, record
/// the chosen bandwidth index and its error relative to the network
/// average, and set `chosen_time`. Relays with no selected sample at all
/// are left untouched.
pub fn compute_ratio_and_error(relays: &mut HashMap<String, RelayState>, averages: &NetworkAverages) {
    for relay in relays.values_mut() {
        let (chosen_sbw, chosen_fbw) = match (relay.chosen_sbw, relay.chosen_fbw) {
            (Some(s), Some(f)) => (s, f),
            _ => continue,
        };

        let sbw_ratio = relay.strm_bw[chosen_sbw] as f64 / averages.true_strm_avg;
        let fbw_ratio = relay.filt_bw[chosen_fbw] as f64 / averages.true_filt_avg;
        relay.sbw_ratio = Some(sbw_ratio);
        relay.fbw_ratio = Some(fbw_ratio);

        if sbw_ratio > fbw_ratio {
            tracing::debug!(idhex = %relay.idhex, nick = %relay.nick, "sbw ratio exceeded fbw ratio, using stream branch");
            relay.ratio = Some(sbw_ratio);
            relay.bw_idx = Some(chosen_sbw);
            relay.pid_error = (relay.strm_bw[chosen_sbw] as f64 - averages.true_strm_avg) / averages.true_strm_avg;
        } else {
            relay.ratio = Some(fbw_ratio);
            relay.bw_idx = Some(chosen_fbw);
            relay.pid_error = (relay.filt_bw[chosen_fbw] as f64 - averages.true_filt_avg) / averages.true_filt_avg;
        }

        relay.chosen_time = relay.timestamps[relay.bw_idx.unwrap()];
    }
}

/// Average time delta between a relay's chosen sample and its prior
/// vote's `measured_at`, over non-guard relays with both a prior vote and
/// a prior-consensus entry. Falls back to `guard_period / 4` when no such
/// relay exists (e.g. the first PID-enabled round ever).
pub fn node_sample_rate(
    relays: &HashMap<String, RelayState>,
    consensus: &ConsensusDocument,
    prior_votes: &HashMap<String, PriorVote>,
    guard_period: f64,
) -> f64 {
    let mut guard_samples = 0usize;
    let mut non_guard_sum = 0.0;
    let mut non_guard_samples = 0usize;

    for (idhex, relay) in relays {
        let prior = match prior_votes.get(idhex) {
            Some(p) => p,
            None => continue,
        };
        let consensus_entry = match consensus.relays.get(idhex) {
            Some(e) => e,
            None => continue,
        };
        let bw_idx = match relay.bw_idx {
            Some(i) => i,
            None => continue,
        };

        let delta = relay.timestamps[bw_idx] - prior.measured_at;
        if consensus_entry.has_flag(Flag::Guard) {
            guard_samples += 1;
        } else {
            non_guard_sum += delta;
            non_guard_samples += 1;
        }
    }

    tracing::info!(
        guard_samples,
        non_guard_samples,
        "average node measurement interval sample counts"
    );

    if non_guard_samples == 0 {
        tracing::warn!("no non-guard relays with prior votes, falling back to guard_period / 4");
        return guard_period / 4.0;
    }
    non_guard_sum / non_guard_samples as f64
}

/// The PID-controlled bandwidth at cadence `dt`, storing the derivative
/// term on the relay for later serialization. Preserves the upstream's
/// non-standard derivative scaling (`dt * (e - prev_error)` in the
/// numerator) verbatim.
fn pid_bw(relay: &mut RelayState, dt: f64, params: &PidParams) -> f64 {
    let bw_idx = relay
        .bw_idx
        .expect("pid_bw called on a relay with no selected sample");

    let e = relay.pid_error;
    let integral = relay.error_sum * params.guard_period / dt;
    let derivative = if relay.prev_voted_at == 0.0 || relay.prev_error == 0.0 {
        0.0
    } else {
        dt * (e - relay.prev_error) / (relay.chosen_time - relay.prev_voted_at)
    };
    relay.derror_dt = derivative;

    relay.ns_bw[bw_idx] as f64 * (1.0 + params.kp * e + params.ki() * integral + params.kd() * derivative)
}

/// Apply the cadence/blending rule for one relay, given its prior vote
/// (if any) and its flags in the prior consensus. Mutates `relay`'s
/// output fields (`new_bw`, `change`, `vote_time`, PID state) in place.
pub fn apply_control(
    relay: &mut RelayState,
    consensus_entry: Option<&ConsensusEntry>,
    prior: Option<&PriorVote>,
    meta: &ConsensusMeta,
    params: &PidParams,
    node_sample_rate: f64,
    now: f64,
) {
    let bw_idx = match relay.bw_idx {
        Some(i) => i,
        None => return,
    };

    if !meta.pid_enabled {
        relay.new_bw = relay.desc_bw[bw_idx] as f64 * relay.ratio.unwrap_or(1.0);
        relay.vote_time = now as i64;
        relay.change = relay.new_bw - relay.desc_bw[bw_idx] as f64;
        return;
    }

    match prior {
        Some(p) => {
            relay.prev_error = p.pid_error;
            relay.prev_voted_at = p.vote_time;
            relay.error_sum =
                p.error_sum + relay.pid_error * (relay.chosen_time - p.measured_at) / params.guard_period;
        }
        None => {
            // No prior control data: integrate fresh from zero rather than
            // leaving error_sum untouched.
            relay.prev_error = 0.0;
            relay.prev_voted_at = 0.0;
            relay.error_sum = relay.pid_error * relay.chosen_time / params.guard_period;
        }
    }

    let is_guard = consensus_entry.map(|e| e.has_flag(Flag::Guard)).unwrap_or(false);
    let is_exit = consensus_entry.map(|e| e.has_flag(Flag::Exit)).unwrap_or(false);

    let since_last_vote = match prior {
        Some(p) => relay.chosen_time - p.vote_time,
        None => f64::INFINITY,
    };

    if since_last_vote <= node_sample_rate {
        match prior {
            Some(p) => {
                relay.new_bw = p.bw;
                relay.vote_time = p.vote_time as i64;
            }
            None => {
                tracing::warn!(idhex = %relay.idhex, nick = %relay.nick, "no previous vote for recent node");
                relay.ignore = true;
                relay.new_bw = 0.0;
                relay.vote_time = now as i64;
            }
        }
    } else if is_guard {
        if prior.is_none() || since_last_vote > params.guard_period {
            relay.new_bw = pid_bw(relay, params.guard_period, params);
        } else if is_exit {
            let wgd = meta.wgd();
            let feedback = pid_bw(relay, node_sample_rate, params);
            relay.new_bw = (1.0 - wgd) * feedback + wgd * prior.unwrap().bw;
        } else {
            let wgg = meta.wgg();
            let feedback = pid_bw(relay, node_sample_rate, params);
            relay.new_bw = (1.0 - wgg) * feedback + wgg * prior.unwrap().bw;
        }
        relay.vote_time = now as i64;
    } else {
        relay.new_bw = pid_bw(relay, node_sample_rate, params);
        relay.vote_time = now as i64;
    }

    relay.change = relay.new_bw - relay.desc_bw[bw_idx] as f64;
}
