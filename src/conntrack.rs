//! Connection tracking telemetry
//!
//! Reads the kernel connection tracking table and hands it out as an opaque, timestamped
//! snapshot. Entries are passed through line by line; nothing here parses them.

use crate::core::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the kernel connection tracking table
pub const DEFAULT_CONNTRACK_PATH: &str = "/proc/net/nf_conntrack";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub taken_at: DateTime<Utc>,
    pub entries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConntrackReader {
    path: PathBuf,
    exclude_port: Option<u16>,
}

impl Default for ConntrackReader {
    fn default() -> Self {
        Self::new(DEFAULT_CONNTRACK_PATH)
    }
}

impl ConntrackReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            exclude_port: None,
        }
    }

    /// Drops entries whose source or destination port is `port`, typically the
    /// management port of the process serving the snapshot.
    #[must_use]
    pub fn excluding_port(mut self, port: Option<u16>) -> Self {
        self.exclude_port = port;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the table cannot be read (missing module,
    /// insufficient privileges).
    pub fn snapshot(&self) -> Result<ConnectionSnapshot> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::Transport(format!(
                "cannot read connection table {}: {e}",
                self.path.display()
            ))
        })?;

        let entries: Vec<String> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter(|line| !self.is_excluded(line))
            .map(str::to_string)
            .collect();

        tracing::debug!(
            "Read {} connection entries from {}",
            entries.len(),
            self.path.display()
        );
        Ok(ConnectionSnapshot {
            taken_at: Utc::now(),
            entries,
        })
    }

    fn is_excluded(&self, line: &str) -> bool {
        let Some(port) = self.exclude_port else {
            return false;
        };
        line.split_whitespace().any(|field| {
            field
                .strip_prefix("sport=")
                .or_else(|| field.strip_prefix("dport="))
                .and_then(|value| value.parse::<u16>().ok())
                == Some(port)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
ipv4     2 tcp      6 431999 ESTABLISHED src=10.0.0.2 dst=10.0.0.1 sport=51234 dport=8080 src=10.0.0.1 dst=10.0.0.2 sport=8080 dport=51234 [ASSURED] mark=0 zone=0 use=2
ipv4     2 udp      17 29 src=10.0.0.2 dst=1.1.1.1 sport=40000 dport=53 src=1.1.1.1 dst=10.0.0.2 sport=53 dport=40000 mark=0 zone=0 use=2

ipv4     2 tcp      6 117 TIME_WAIT src=10.0.0.2 dst=93.184.216.34 sport=50000 dport=443 src=93.184.216.34 dst=10.0.0.2 sport=443 dport=50000 [ASSURED] mark=0 zone=0 use=2
";

    fn sample_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_snapshot_passes_lines_through() {
        let file = sample_file();
        let snapshot = ConntrackReader::new(file.path()).snapshot().unwrap();
        assert_eq!(snapshot.entries.len(), 3);
        assert!(snapshot.entries[1].contains("dport=53"));
    }

    #[test]
    fn test_excluded_port_filters_both_directions() {
        let file = sample_file();
        let snapshot = ConntrackReader::new(file.path())
            .excluding_port(Some(8080))
            .snapshot()
            .unwrap();
        assert_eq!(snapshot.entries.len(), 2);
        assert!(snapshot.entries.iter().all(|e| !e.contains("8080")));
    }

    #[test]
    fn test_port_prefix_is_not_a_match() {
        let file = sample_file();
        // 80 must not match 8080
        let snapshot = ConntrackReader::new(file.path())
            .excluding_port(Some(80))
            .snapshot()
            .unwrap();
        assert_eq!(snapshot.entries.len(), 3);
    }

    #[test]
    fn test_missing_table_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConntrackReader::new(dir.path().join("nf_conntrack"))
            .snapshot()
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(err.status_code(), 502);
    }
}
