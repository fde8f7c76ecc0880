//! Scanner directory walking and measurement-line loading.
//!
//! Directory/file matching is expressed as glob patterns rather than
//! hand-rolled directory walking plus regexes.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;

use crate::parser::record::{parse_record_line, MeasurementRecord};

/// One collected scanner result file, with its header already parsed.
#[derive(Debug, Clone)]
pub struct ScanFile {
    pub slice_id: String,
    pub timestamp: f64,
    pub path: PathBuf,
    pub scanner: String,
}

/// Output of walking every scanner root directory for one round.
#[derive(Debug, Default)]
pub struct IngestResult {
    pub files: Vec<ScanFile>,
    /// Newest measurement timestamp seen per `scanner.<N>` directory.
    pub newest_per_scanner: HashMap<String, f64>,
    pub newest_per_slice: HashMap<String, f64>,
}

impl IngestResult {
    /// The most recent of all per-scanner health timestamps, used as the
    /// vote file's header line.
    pub fn header_timestamp(&self) -> f64 {
        self.newest_per_scanner
            .values()
            .copied()
            .fold(0.0, f64::max)
    }

    /// Warn for every scanner whose newest file is older than
    /// `max_scan_age`, relative to `now`.
    pub fn warn_stale_scanners(&self, now: f64, max_scan_age: f64) {
        for (scanner, newest) in &self.newest_per_scanner {
            if now - newest > max_scan_age {
                tracing::warn!(
                    scanner = %scanner,
                    newest = %newest,
                    "bandwidth scanner stale, possible dead bwauthority process"
                );
            }
        }
    }
}

/// Walk every scanner root for `scanner.<digits>/scan-data/bws-*-done-*`
/// files, discarding anything older than `max_age`.
pub fn scan_directories(roots: &[String], now: f64, max_age: f64) -> IngestResult {
    let mut result = IngestResult::default();

    for root in roots {
        let pattern = format!(
            "{}/scanner.[0-9]*/scan-data/bws-*-done-*",
            root.trim_end_matches('/')
        );
        let paths = match glob(&pattern) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "invalid scanner glob pattern");
                continue;
            }
        };

        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "could not read a scanner directory entry");
                    continue;
                }
            };

            let scanner = match scanner_dir_name(&path) {
                Some(s) => s,
                None => continue,
            };

            match read_header(&path) {
                Ok((slice_id, timestamp)) => {
                    if now - timestamp > max_age {
                        tracing::debug!(path = %path.display(), "skipping old file");
                        continue;
                    }

                    let newest = result.newest_per_scanner.entry(scanner.clone()).or_insert(0.0);
                    if timestamp > *newest {
                        *newest = timestamp;
                    }
                    let newest_slice = result
                        .newest_per_slice
                        .entry(slice_id.clone())
                        .or_insert(0.0);
                    if timestamp > *newest_slice {
                        *newest_slice = timestamp;
                    }

                    result.files.push(ScanFile {
                        slice_id,
                        timestamp,
                        path,
                        scanner,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "could not read scan file header, skipping");
                }
            }
        }
    }

    result
}

/// `<root>/scanner.<N>/scan-data/bws-*-done-*` — the scanner directory is
/// two levels up from the file.
fn scanner_dir_name(path: &Path) -> Option<String> {
    path.ancestors()
        .nth(2)
        .and_then(Path::file_name)
        .map(|s| s.to_string_lossy().into_owned())
}

fn read_header(path: &Path) -> std::io::Result<(String, f64)> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines();
    let slice_id = lines
        .next()
        .ok_or_else(|| invalid_data("missing slice id line"))?
        .trim()
        .to_string();
    let timestamp = lines
        .next()
        .ok_or_else(|| invalid_data("missing timestamp line"))?
        .trim()
        .parse::<f64>()
        .map_err(|_| invalid_data("malformed timestamp"))?;
    Ok((slice_id, timestamp))
}

fn invalid_data(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

/// Parse every measurement line in a scan file, past its two-line header.
/// Malformed lines are logged and skipped; they never fail the round.
pub fn load_records(file: &ScanFile) -> Vec<MeasurementRecord> {
    let content = match fs::read_to_string(&file.path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %file.path.display(), error = %e, "could not re-read scan file, skipping");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for line in content.lines().skip(2) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_record_line(line, &file.slice_id, file.timestamp) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %file.path.display(), error = %e, "skipping malformed measurement line");
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_dir_name_extracts_the_scanner_component() {
        let path = Path::new("/data/scanner.3/scan-data/bws-1-done-0");
        assert_eq!(scanner_dir_name(path), Some("scanner.3".to_string()));
    }

    #[test]
    fn header_timestamp_is_the_max_across_scanners() {
        let mut result = IngestResult::default();
        result.newest_per_scanner.insert("scanner.1".to_string(), 100.0);
        result.newest_per_scanner.insert("scanner.2".to_string(), 250.0);
        assert_eq!(result.header_timestamp(), 250.0);
    }

    #[test]
    fn header_timestamp_of_empty_result_is_zero() {
        let result = IngestResult::default();
        assert_eq!(result.header_timestamp(), 0.0);
    }
}
