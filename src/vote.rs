//! Prior-vote loading, base-10 rounding, and vote-file serialization.

use std::collections::HashMap;
use std::fs;
use std::io::Write;

use thiserror;

use crate::aggregate::RelayState;

/// One relay's PID state as carried over from the previous round's vote
/// file. Missing optional fields default to zero, which is treated as
/// "no prior control data."
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorVote {
    pub bw: f64,
    pub measured_at: f64,
    pub pid_error: f64,
    pub error_sum: f64,
    pub vote_time: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum VoteParseError {
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("key '{key}' has invalid numeric value '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

/// Parse one line of a vote file into `(idhex, PriorVote)`. `pid_error`,
/// `pid_error_sum`, and `vote_time` are optional and default to zero.
pub fn parse_vote_line(line: &str) -> Result<(String, PriorVote), VoteParseError> {
    let mut idhex = None;
    let mut bw = None;
    let mut measured_at = None;
    let mut pid_error = 0.0;
    let mut error_sum = 0.0;
    let mut vote_time = 0.0;

    for token in line.split_whitespace() {
        let (key, value) = match token.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        match key {
            "node_id" => idhex = Some(value.trim_start_matches('$').to_lowercase()),
            "bw" => bw = Some(parse_f64("bw", value)?),
            "measured_at" => measured_at = Some(parse_f64("measured_at", value)?),
            "pid_error" => pid_error = parse_f64("pid_error", value)?,
            "pid_error_sum" => error_sum = parse_f64("pid_error_sum", value)?,
            "vote_time" => vote_time = parse_f64("vote_time", value)?,
            _ => {}
        }
    }

    Ok((
        idhex.ok_or(VoteParseError::MissingKey("node_id"))?,
        PriorVote {
            bw: bw.ok_or(VoteParseError::MissingKey("bw"))?,
            measured_at: measured_at.ok_or(VoteParseError::MissingKey("measured_at"))?,
            pid_error,
            error_sum,
            vote_time,
        },
    ))
}

fn parse_f64(key: &'static str, value: &str) -> Result<f64, VoteParseError> {
    value.parse::<f64>().map_err(|_| VoteParseError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

/// Read the previous round's vote file, keyed by idhex. A missing file is
/// "no previous vote data," not an error; a malformed line is logged and
/// dropped, leaving that relay with no prior control data.
pub fn load_prior_votes(path: &str) -> HashMap<String, PriorVote> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            tracing::info!(path, "no previous vote data");
            return HashMap::new();
        }
    };

    let mut votes = HashMap::new();
    for line in content.lines().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_vote_line(line) {
            Ok((idhex, vote)) => {
                votes.insert(idhex, vote);
            }
            Err(e) => {
                tracing::debug!(error = %e, "no previous PID data for this node");
            }
        }
    }
    votes
}

/// Collapse `v` to its top 3 significant decimal digits and scale down by
/// 1000, to minimize diff churn between consecutive votes.
pub fn base10_round(v: f64) -> i64 {
    if v == 0.0 {
        tracing::info!("zero input bandwidth, upping to 1");
        return 1;
    }

    let sig_digit_exponent = v.abs().log10().floor() as i32 - 2;
    let kept = round_to_power_of_ten(v, sig_digit_exponent);
    let kept = round_to_power_of_ten(kept, 3);

    let result = 1000i64.max(kept.round() as i64) / 1000;
    if result == 0 {
        tracing::info!("zero output bandwidth, upping to 1");
        return 1;
    }
    result
}

fn round_to_power_of_ten(v: f64, exponent: i32) -> f64 {
    let factor = 10f64.powi(exponent);
    (v / factor).round() * factor
}

/// Write one round's vote file: the header timestamp, then one line per
/// non-ignored relay, in the order given.
pub fn write_vote_file(path: &str, header_timestamp: f64, relays: &[&RelayState]) -> std::io::Result<()> {
    let mut out = fs::File::create(path)?;
    writeln!(out, "{}", header_timestamp.round() as i64)?;

    for relay in relays {
        if relay.ignore {
            continue;
        }
        let bw = base10_round(relay.new_bw);
        let kdiff = (relay.change / 1000.0).round() as i64;
        writeln!(
            out,
            "node_id={} bw={} diff={} nick={} measured_at={} pid_error={} pid_error_sum={} derror_dt={} vote_time={}",
            relay.idhex,
            bw,
            kdiff,
            relay.nick,
            relay.chosen_time as i64,
            relay.pid_error,
            relay.error_sum,
            relay.derror_dt,
            relay.vote_time,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_input_rounds_up_to_one() {
        assert_eq!(base10_round(0.0), 1);
    }

    #[test]
    fn scenario_one_simple_ratio() {
        assert_eq!(base10_round(1000.0), 1);
    }

    #[test]
    fn keeps_top_three_significant_digits() {
        assert_eq!(base10_round(123_456.0), 123);
    }

    #[test]
    fn idempotence_law_holds_above_1000() {
        for x in [1000.0, 1500.0, 99_999.0, 1_000_000.0, 4_294_967_295.0] {
            let once = base10_round(x);
            let twice = base10_round(once as f64 * 1000.0);
            assert_eq!(once, twice, "failed for x={x}");
        }
    }

    #[test]
    fn parses_optional_keys_with_zero_default() {
        let (idhex, vote) = parse_vote_line("node_id=ABCDEF bw=1000 measured_at=500").unwrap();
        assert_eq!(idhex, "ABCDEF");
        assert_eq!(vote.bw, 1000.0);
        assert_eq!(vote.pid_error, 0.0);
        assert_eq!(vote.error_sum, 0.0);
        assert_eq!(vote.vote_time, 0.0);
    }

    #[test]
    fn missing_required_key_fails() {
        let err = parse_vote_line("node_id=ABCDEF bw=1000").unwrap_err();
        assert!(matches!(err, VoteParseError::MissingKey("measured_at")));
    }

    #[test]
    fn strips_dollar_prefix_from_node_id() {
        let (idhex, _) = parse_vote_line("node_id=$ABCDEF bw=1 measured_at=0").unwrap();
        assert_eq!(idhex, "abcdef");
    }

    #[test]
    fn vote_line_round_trips() {
        let mut relay = crate::aggregate::test_support::blank_relay("abcdef", "relay1");
        relay.new_bw = 231_000.0;
        relay.change = 209_281.0;
        relay.chosen_time = 1_319_822_504.0;
        relay.pid_error = 0.25;
        relay.error_sum = 0.1;
        relay.derror_dt = 0.0;
        relay.vote_time = 1_319_822_504;

        let line = format!(
            "node_id={} bw={} diff={} nick={} measured_at={} pid_error={} pid_error_sum={} derror_dt={} vote_time={}",
            relay.idhex,
            base10_round(relay.new_bw),
            (relay.change / 1000.0).round() as i64,
            relay.nick,
            relay.chosen_time as i64,
            relay.pid_error,
            relay.error_sum,
            relay.derror_dt,
            relay.vote_time,
        );

        let (idhex, prior) = parse_vote_line(&line).unwrap();
        let line_again = format!(
            "node_id={} bw={} diff={} nick={} measured_at={} pid_error={} pid_error_sum={} derror_dt={} vote_time={}",
            idhex,
            prior.bw as i64,
            (relay.change / 1000.0).round() as i64,
            relay.nick,
            prior.measured_at as i64,
            prior.pid_error,
            prior.error_sum,
            relay.derror_dt,
            prior.vote_time as i64,
        );
        assert_eq!(line, line_again);
    }
}
