//! Parsing of the network consensus into the sparse view this engine needs:
//! per-relay flags and advertised bandwidth, plus the two scalar knobs that
//! gate and shape the PID controller.

use std::collections::{BTreeMap, HashMap};

use super::DocumentParseError;

use super::meta;
use meta::{Document, Fingerprint};

use derive_builder::Builder;
use regex::Regex;
use strum::EnumString;

/// A relay flag in the consensus.
#[derive(Debug, Clone, Copy, EnumString, PartialEq, Eq, Hash)]
pub enum Flag {
    Authority,
    BadExit,
    Exit,
    Fast,
    Guard,
    HSDir,
    NoEdConsensus,
    Running,
    Stable,
    StaleDesc,
    Sybil,
    V2Dir,
    Valid,
}

/// One relay as known from the consensus: flags and advertised bandwidth,
/// nothing from its full server descriptor.
#[derive(Debug, Clone, Builder)]
pub struct ConsensusEntry {
    pub idhex: String,
    #[builder(default)]
    pub flags: Vec<Flag>,
    #[builder(default)]
    pub bandwidth: Option<i64>,
    /// Position when all relays are sorted by descending bandwidth.
    /// Assigned after parsing, once every relay is known.
    #[builder(default)]
    pub list_rank: usize,
    /// Set to true during reconciliation once a live measurement is found.
    #[builder(default)]
    pub measured: bool,
}

impl ConsensusEntry {
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

/// The two scalar knobs the PID controller needs from the consensus, plus
/// the feature flag that turns PID control on at all.
#[derive(Debug, Clone)]
pub struct ConsensusMeta {
    pub pid_enabled: bool,
    pub weights: BTreeMap<String, f64>,
}

impl ConsensusMeta {
    pub fn wgd(&self) -> f64 {
        self.weights.get("Wgd").copied().unwrap_or(0.0)
    }

    pub fn wgg(&self) -> f64 {
        self.weights.get("Wgg").copied().unwrap_or(1.0)
    }
}

/// The parsed consensus: per-relay entries plus the scalar PID knobs.
#[derive(Debug)]
pub struct ConsensusDocument {
    pub relays: HashMap<String, ConsensusEntry>,
    pub meta: ConsensusMeta,
}

impl ConsensusDocument {
    pub fn from_str(text: &str) -> Result<ConsensusDocument, DocumentParseError> {
        let doc = Document::parse_single(text)?;
        let relays = parse_relays(&doc)?;
        let meta = parse_meta(text);
        Ok(ConsensusDocument { relays, meta })
    }

    /// Whether any relay in the consensus carries a network-status
    /// bandwidth. If not, the consensus is unusable for this round (see
    /// the "No ns bandwidths in consensus" exit case).
    pub fn has_any_bandwidth(&self) -> bool {
        self.relays.values().any(|r| r.bandwidth.is_some())
    }
}

/// Parse the `r`/`s`/`w` item groups into per-relay consensus entries, and
/// assign `list_rank` by descending bandwidth (missing bandwidth sorts
/// last), mirroring how the upstream authority ranks the network status
/// list before scanning it for coverage.
fn parse_relays(doc: &Document) -> Result<HashMap<String, ConsensusEntry>, DocumentParseError> {
    let mut entry: Option<ConsensusEntryBuilder> = None;
    let mut entries: Vec<ConsensusEntry> = Vec::new();

    for item in doc.items.iter() {
        match item.keyword {
            "r" => {
                if let Some(old) = entry.take() {
                    entries.push(old.build()?);
                }
                let mut builder = ConsensusEntryBuilder::default();

                let splits = item.split_arguments()?;
                // nickname identity digest published-date published-time address or-port dir-port
                match splits[..] {
                    [_nickname, identity, ..] => {
                        let fp = Fingerprint::from_str_b64(identity)?;
                        builder.idhex(fp.to_string_hex());
                    }
                    _ => {
                        return Err(DocumentParseError::ItemArgumentsMissing {
                            keyword: item.keyword.to_string(),
                        })
                    }
                }
                entry = Some(builder);
            }
            "s" => {
                let builder = entry
                    .as_mut()
                    .ok_or_else(|| DocumentParseError::UnexpectedKeyword {
                        keyword: item.keyword.to_string(),
                    })?;
                let splits = item.split_arguments().unwrap_or_default();
                let flags: Vec<Flag> = splits
                    .iter()
                    .filter_map(|x| x.parse::<Flag>().ok())
                    .collect();
                builder.flags(flags);
            }
            "w" => {
                let builder = entry
                    .as_mut()
                    .ok_or_else(|| DocumentParseError::UnexpectedKeyword {
                        keyword: item.keyword.to_string(),
                    })?;
                let args = item.split_arguments()?;
                for arg in args.iter() {
                    let (k, v) = arg
                        .split_once('=')
                        .ok_or(DocumentParseError::InvalidBandwidthWeight)?;
                    if k == "Bandwidth" {
                        let bw = v
                            .parse::<i64>()
                            .map_err(|_| DocumentParseError::InvalidBandwidthWeight)?;
                        builder.bandwidth(Some(bw));
                    }
                }
            }
            _ => {}
        }
    }
    if let Some(last) = entry.take() {
        entries.push(last.build()?);
    }

    // rank by descending bandwidth, missing bandwidth last
    entries.sort_by(|a, b| b.bandwidth.unwrap_or(-1).cmp(&a.bandwidth.unwrap_or(-1)));
    for (i, e) in entries.iter_mut().enumerate() {
        e.list_rank = i;
    }

    Ok(entries.into_iter().map(|e| (e.idhex.clone(), e)).collect())
}

/// Extract `pid_enabled` and `weights` with the two regular expressions
/// called for in the consensus text format: both are single, flat,
/// single-occurrence lines, unlike the nested `r`/`s`/`w` relay groups.
fn parse_meta(text: &str) -> ConsensusMeta {
    let params_re = Regex::new(r"(?m)^params ((?:\S+=\S+ ?)+)").unwrap();
    let pid_enabled = params_re
        .captures(text)
        .map(|caps| {
            caps[1]
                .split_whitespace()
                .any(|token| token == "bwauthpid=1")
        })
        .unwrap_or(false);

    let weights_re = Regex::new(r"(?m)^bandwidth-weights ((?:\S+=\S+ ?)+)").unwrap();
    let mut weights = BTreeMap::new();
    match weights_re.captures(text) {
        Some(caps) => {
            for token in caps[1].split_whitespace() {
                if let Some((k, v)) = token.split_once('=') {
                    if let Ok(v) = v.parse::<i64>() {
                        weights.insert(k.to_string(), v as f64 / 10000.0);
                    }
                }
            }
        }
        None => {
            tracing::warn!("consensus has no bandwidth-weights line, defaulting Wgd=0 Wgg=1.0");
            weights.insert("Wgd".to_string(), 0.0);
            weights.insert("Wgg".to_string(), 1.0);
        }
    }

    ConsensusMeta {
        pid_enabled,
        weights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = concat!(
        "network-status-version 3\n",
        "params bwauthpid=1 other=5\n",
        "r nick1 AAAA BBBB 2023-01-01 00:00:00 1.2.3.4 9001 9030\n",
        "s Fast Guard Running Valid\n",
        "w Bandwidth=1000\n",
        "r nick2 //// CCCC 2023-01-01 00:00:00 1.2.3.5 9001 9030\n",
        "s Authority Fast Running Valid\n",
        "w Bandwidth=2000\n",
        "bandwidth-weights Wgd=3000 Wgg=7000\n",
        "directory-signature 0000 1111\n",
        "-----BEGIN SIGNATURE-----\n",
        "AAAA\n",
        "-----END SIGNATURE-----\n",
    );

    #[test]
    fn parses_relays_and_ranks_them() {
        let doc = ConsensusDocument::from_str(SAMPLE).unwrap();
        assert_eq!(doc.relays.len(), 2);
        let fastest = doc.relays.values().find(|r| r.list_rank == 0).unwrap();
        assert_eq!(fastest.bandwidth, Some(2000));
        assert!(fastest.has_flag(Flag::Authority));
    }

    #[test]
    fn parses_pid_and_weights() {
        let doc = ConsensusDocument::from_str(SAMPLE).unwrap();
        assert!(doc.meta.pid_enabled);
        assert!((doc.meta.wgd() - 0.3).abs() < 1e-9);
        assert!((doc.meta.wgg() - 0.7).abs() < 1e-9);
    }

    /// A real SHA1 relay identity, base64-encoded in `r` as the consensus
    /// always carries it, must key the consensus map identically to the
    /// same identity arriving as an uppercase-hex `node_id=` on a scanner
    /// line, or every cross-reference between the two maps silently
    /// misses.
    #[test]
    fn consensus_fingerprint_and_uppercase_scanner_node_id_key_the_same() {
        let text = concat!(
            "network-status-version 3\n",
            "params bwauthpid=1\n",
            "r nick1 24xtjg1RpCvdqBqbinNbQbLPldE= BBBB 2023-01-01 00:00:00 1.2.3.4 9001 9030\n",
            "s Fast Guard Running Valid\n",
            "w Bandwidth=1000\n",
        );
        let doc = ConsensusDocument::from_str(text).unwrap();

        let line = "node_id=$DB8C6D8E0D51A42BDDA81A9B8A735B41B2CF95D1 nick=nick1 strm_bw=1 filt_bw=1 ns_bw=1 desc_bw=1";
        let record = crate::parser::record::parse_record_line(line, "1", 0.0).unwrap();

        assert!(doc.relays.contains_key(&record.idhex));
    }

    #[test]
    fn missing_bandwidth_weights_defaults() {
        let text = "params other=1\nr a AAAA BBBB 2023-01-01 00:00:00 1.2.3.4 1 1\ns Fast\nw Bandwidth=1\n";
        let doc = ConsensusDocument::from_str(text).unwrap();
        assert!(!doc.meta.pid_enabled);
        assert_eq!(doc.meta.wgd(), 0.0);
        assert_eq!(doc.meta.wgg(), 1.0);
    }
}
