//! Scanner measurement line parsing.
//!
//! Replaces the original's per-key regular expressions with a strict
//! key=value tokenizer over whitespace-split tokens: unknown keys are
//! ignored, known keys are typed, and a missing or malformed required key
//! fails only that line.

use thiserror;

/// One scanner observation for one relay, in one slice, at one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub idhex: String,
    pub nick: String,
    pub strm_bw: i64,
    pub filt_bw: i64,
    pub ns_bw: i64,
    pub desc_bw: i64,
    pub slice_id: String,
    pub timestamp: f64,
}

#[derive(thiserror::Error, Debug)]
pub enum RecordParseError {
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
    #[error("key '{key}' has invalid integer value '{value}'")]
    InvalidInt { key: &'static str, value: String },
}

/// Parse one measurement line (everything after the two-line file header)
/// into a [`MeasurementRecord`], given the slice id and timestamp already
/// read from that header.
pub fn parse_record_line(
    line: &str,
    slice_id: &str,
    timestamp: f64,
) -> Result<MeasurementRecord, RecordParseError> {
    let mut node_id = None;
    let mut nick = None;
    let mut strm_bw = None;
    let mut filt_bw = None;
    let mut ns_bw = None;
    let mut desc_bw = None;

    for token in line.split_whitespace() {
        let (key, value) = match token.split_once('=') {
            Some(kv) => kv,
            None => continue,
        };
        match key {
            "node_id" => node_id = Some(value.trim_start_matches('$').to_lowercase()),
            "nick" => nick = Some(value.to_string()),
            "strm_bw" => strm_bw = Some(parse_int("strm_bw", value)?),
            "filt_bw" => filt_bw = Some(parse_int("filt_bw", value)?),
            "ns_bw" => ns_bw = Some(parse_int("ns_bw", value)?),
            "desc_bw" => desc_bw = Some(parse_int("desc_bw", value)?),
            _ => {}
        }
    }

    Ok(MeasurementRecord {
        idhex: node_id.ok_or(RecordParseError::MissingKey("node_id"))?,
        nick: nick.ok_or(RecordParseError::MissingKey("nick"))?,
        strm_bw: strm_bw.ok_or(RecordParseError::MissingKey("strm_bw"))?,
        filt_bw: filt_bw.ok_or(RecordParseError::MissingKey("filt_bw"))?,
        ns_bw: ns_bw.ok_or(RecordParseError::MissingKey("ns_bw"))?,
        desc_bw: desc_bw.ok_or(RecordParseError::MissingKey("desc_bw"))?,
        slice_id: slice_id.to_string(),
        timestamp,
    })
}

fn parse_int(key: &'static str, value: &str) -> Result<i64, RecordParseError> {
    value.parse::<i64>().map_err(|_| RecordParseError::InvalidInt {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_line() {
        let line = "node_id=$ABCDEF nick=relay1 strm_bw=500 filt_bw=600 ns_bw=700 desc_bw=800";
        let r = parse_record_line(line, "2", 1_000_000.0).unwrap();
        assert_eq!(r.idhex, "abcdef");
        assert_eq!(r.nick, "relay1");
        assert_eq!(r.strm_bw, 500);
        assert_eq!(r.slice_id, "2");
    }

    #[test]
    fn node_id_is_lowercased_to_match_the_consensus_fingerprint_format() {
        let line = "node_id=$DB8C6D8E0D51A42BDDA81A9B8A735B41B2CF95D1 nick=relay1 strm_bw=1 filt_bw=1 ns_bw=1 desc_bw=1";
        let r = parse_record_line(line, "2", 0.0).unwrap();
        assert_eq!(r.idhex, "db8c6d8e0d51a42bdda81a9b8a735b41b2cf95d1");
    }

    #[test]
    fn missing_key_fails_only_this_line() {
        let line = "node_id=$ABCDEF nick=relay1 strm_bw=500 filt_bw=600 ns_bw=700";
        let err = parse_record_line(line, "2", 0.0).unwrap_err();
        assert!(matches!(err, RecordParseError::MissingKey("desc_bw")));
    }

    #[test]
    fn invalid_integer_fails_only_this_line() {
        let line = "node_id=$ABCDEF nick=relay1 strm_bw=notanumber filt_bw=600 ns_bw=700 desc_bw=800";
        let err = parse_record_line(line, "2", 0.0).unwrap_err();
        assert!(matches!(err, RecordParseError::InvalidInt { key: "strm_bw", .. }));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let line = "node_id=$ABCDEF nick=relay1 strm_bw=500 filt_bw=600 ns_bw=700 desc_bw=800 extra=999";
        let r = parse_record_line(line, "2", 0.0).unwrap();
        assert_eq!(r.desc_bw, 800);
    }
}
