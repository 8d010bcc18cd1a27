// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Memory estimates for remote model files.
//!
//! Combines the remote size with the decoded architecture parameters:
//!
//! ```text
//! model_mb = size / 1_000_000
//! kv_mb    = 4 * hidden_size * hidden_layers * context / 1_000_000
//! total_mb = model_mb + kv_mb
//! ```
//!
//! The factor of 4 is a rough heuristic, not a derived memory model.

use crate::error::Result;
use crate::gguf::{self, HttpRangeSource, Params, RangeReader};
use crate::quant;
use crate::transport;

const BYTES_PER_MB: u64 = 1_000_000;

/// Bytes per hidden unit per layer per token in the KV-cache estimate.
const KV_BYTES_FACTOR: u64 = 4;

const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Format a byte count with decimal units and one decimal place.
///
/// ```
/// use ggufetch::usage::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(4_370_000_000), "4.4 GB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1000 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Estimated KV-cache size in decimal megabytes.
pub fn kv_cache_mb(params: &Params, context_size: u32) -> u64 {
    let bytes = KV_BYTES_FACTOR
        .saturating_mul(params.hidden_size)
        .saturating_mul(u64::from(params.hidden_layers))
        .saturating_mul(u64::from(context_size));
    bytes / BYTES_PER_MB
}

/// Result of estimating one file.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEstimate {
    pub size_bytes: u64,
    pub model_mb: u64,
    pub kv_mb: u64,
    pub total_mb: u64,
    pub params: Params,
    /// Empty when neither the file name nor the metadata gave a label.
    pub quant: String,
}

impl MemoryEstimate {
    pub fn new(size_bytes: u64, params: Params, context_size: u32, quant: String) -> Self {
        let model_mb = size_bytes / BYTES_PER_MB;
        let kv_mb = kv_cache_mb(&params, context_size);
        Self {
            size_bytes,
            model_mb,
            kv_mb,
            total_mb: model_mb.saturating_add(kv_mb),
            params,
            quant,
        }
    }

    /// `"<total> (Model: <model> + KV: <kv>)"`.
    pub fn display(&self) -> String {
        format!(
            "{} (Model: {} + KV: {})",
            format_bytes(self.total_mb.saturating_mul(BYTES_PER_MB)),
            format_bytes(self.model_mb.saturating_mul(BYTES_PER_MB)),
            format_bytes(self.kv_mb.saturating_mul(BYTES_PER_MB)),
        )
    }
}

/// Estimates memory for remote GGUF files.
///
/// Owns its blocking client; every call opens fresh readers, so one estimator
/// can serve many files sequentially. Run it off the async runtime
/// (`tokio::task::spawn_blocking`).
pub struct UsageEstimator {
    client: reqwest::blocking::Client,
    token: Option<String>,
    context_size: u32,
    window_size: usize,
}

impl UsageEstimator {
    pub fn new(
        client: reqwest::blocking::Client,
        token: Option<String>,
        context_size: u32,
    ) -> Self {
        Self {
            client,
            token,
            context_size,
            window_size: crate::config::DEFAULT_WINDOW_SIZE,
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    fn reader(&self, url: &str) -> RangeReader<HttpRangeSource> {
        let source = HttpRangeSource::new(self.client.clone(), url, self.token.clone());
        RangeReader::with_window_size(source, self.window_size)
    }

    /// Decode architecture parameters from the remote file.
    pub fn params(&self, url: &str) -> Result<Params> {
        gguf::parse_params(&mut self.reader(url))
    }

    /// Resolve the quantization label: file name first, then the metadata's
    /// `general.file_type`. Metadata failures yield an empty label.
    pub fn quant_label(&self, url: &str, filename: &str) -> String {
        if let Some(label) = quant::detect_from_filename(filename) {
            return label;
        }
        match gguf::extract_file_type(&mut self.reader(url)) {
            Ok(label) => label,
            Err(e) => {
                tracing::debug!("file type lookup failed for {}: {}", filename, e);
                String::new()
            }
        }
    }

    /// Probe size, decode parameters and resolve the label for one file.
    pub fn estimate(&self, url: &str, filename: &str) -> Result<MemoryEstimate> {
        let size = transport::probe_size_blocking(&self.client, url, self.token.as_deref())?;
        let params = self.params(url)?;
        let quant = self.quant_label(url, filename);
        let estimate = MemoryEstimate::new(size, params, self.context_size, quant);
        tracing::debug!(
            "{}: {} bytes, {:?}, estimate {}",
            filename,
            size,
            estimate.params,
            estimate.display()
        );
        Ok(estimate)
    }
}
