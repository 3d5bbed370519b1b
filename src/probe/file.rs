//! File probes: content integrity and log pattern counts.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sha2::{Digest, Sha256};

use super::{metric, Measurement, Probe, ProbeError, Target};

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fails when the file's digest differs from the baseline fixed at load.
pub struct FileIntegrityProbe {
    baseline: String,
}

impl FileIntegrityProbe {
    pub fn new(baseline: String) -> Self {
        Self { baseline }
    }
}

#[async_trait]
impl Probe for FileIntegrityProbe {
    async fn measure(&self, target: &Target, _timeout: Duration) -> Result<Measurement, ProbeError> {
        let path = target.as_str().to_string();
        let digest = tokio::task::spawn_blocking(move || sha256_file(path))
            .await
            .map_err(|e| ProbeError::Command(format!("spawn_blocking failed: {}", e)))??;

        if digest == self.baseline {
            Ok(Measurement::ok().with(metric::CHANGED, 0.0))
        } else {
            Ok(Measurement::failed(format!("content changed (sha256 {})", &digest[..12]))
                .with(metric::CHANGED, 1.0))
        }
    }
}

/// Counts lines of a log file matching a pattern. Thresholds on
/// `matches` decide whether that is a problem.
pub struct LogPatternProbe {
    pattern: Regex,
}

impl LogPatternProbe {
    pub fn new(pattern: &str) -> Result<Self, ProbeError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ProbeError::Config(format!("invalid pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    fn count(&self, contents: &str) -> usize {
        contents.lines().filter(|line| self.pattern.is_match(line)).count()
    }
}

#[async_trait]
impl Probe for LogPatternProbe {
    async fn measure(&self, target: &Target, _timeout: Duration) -> Result<Measurement, ProbeError> {
        let bytes = tokio::fs::read(target.as_str()).await?;
        let matches = self.count(&String::from_utf8_lossy(&bytes));
        Ok(Measurement::ok().with(metric::MATCHES, matches as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_integrity_detects_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"original").unwrap();
        let target = Target::new(file.path().to_string_lossy());

        let probe = FileIntegrityProbe::new(sha256_file(file.path()).unwrap());
        let m = probe.measure(&target, Duration::from_secs(1)).await.unwrap();
        assert!(m.failure.is_none());
        assert_eq!(m.metrics[metric::CHANGED], 0.0);

        file.write_all(b" tampered").unwrap();
        file.flush().unwrap();
        let m = probe.measure(&target, Duration::from_secs(1)).await.unwrap();
        assert!(m.failure.unwrap().starts_with("content changed"));
        assert_eq!(m.metrics[metric::CHANGED], 1.0);
    }

    #[test]
    fn test_sha256_known_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();
        assert_eq!(
            sha256_file(file.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_log_pattern_counts_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "INFO started").unwrap();
        writeln!(file, "ERROR 500 upstream failed").unwrap();
        writeln!(file, "ERROR 502 bad gateway").unwrap();
        let target = Target::new(file.path().to_string_lossy());

        let probe = LogPatternProbe::new(r"ERROR (\d+)").unwrap();
        let m = probe.measure(&target, Duration::from_secs(1)).await.unwrap();
        assert_eq!(m.metrics[metric::MATCHES], 2.0);
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(LogPatternProbe::new("(unclosed").is_err());
    }
}
