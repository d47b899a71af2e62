//! Log snippet retrieval attached to fired alerts.
//!
//! The concrete log source (cluster log aggregator, `kubectl logs`, etc.) is an
//! external collaborator; this module defines the contract the threshold
//! processor depends on and a gzip compression helper.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

#[async_trait]
pub trait LogProvider: Send + Sync {
    /// Fetches up to `lines` most recent log lines for `name@namespace`, each
    /// truncated to `max_line_chars`.
    async fn get_service_logs(
        &self,
        namespace: &str,
        name: &str,
        lines: usize,
        max_line_chars: usize,
    ) -> anyhow::Result<Vec<String>>;
}

/// A [`LogProvider`] with no backing log source, used where logs are genuinely
/// unavailable (e.g. local development, or a service with no known log sink).
pub struct NullLogProvider;

#[async_trait]
impl LogProvider for NullLogProvider {
    async fn get_service_logs(
        &self,
        _namespace: &str,
        _name: &str,
        _lines: usize,
        _max_line_chars: usize,
    ) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Truncates each line to `max_line_chars` (by `char`, not byte, so multi-byte
/// UTF-8 is never split) and gzip-compresses the joined result.
pub fn compress_snippet(lines: &[String], max_line_chars: usize) -> std::io::Result<Vec<u8>> {
    let truncated: Vec<String> = lines
        .iter()
        .map(|line| line.chars().take(max_line_chars).collect())
        .collect();
    let joined = truncated.join("\n");

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(joined.as_bytes())?;
    encoder.finish()
}
