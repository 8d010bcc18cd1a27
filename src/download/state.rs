// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-file download bookkeeping.
//!
//! One [`DownloadState`] exists per (model, file) pair for the lifetime of a
//! single download in this process. It is never persisted; a restarted process
//! starts over.

use std::path::PathBuf;

/// Progress of one chunked download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadState {
    pub url: String,
    pub dest: PathBuf,
    /// Remote size in bytes, from the size probe
    pub total: u64,
    /// Bytes written so far, always a prefix of the file
    pub received: u64,
    /// False after completion, the first error or cancellation
    pub active: bool,
}

impl DownloadState {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>, total: u64) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            total,
            received: 0,
            active: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.received >= self.total
    }

    /// Next half-open range to request, or `None` when complete or inactive.
    pub fn next_range(&self, chunk_size: u64) -> Option<(u64, u64)> {
        if !self.active || self.is_complete() {
            return None;
        }
        let end = self.received.saturating_add(chunk_size).min(self.total);
        Some((self.received, end))
    }

    /// Account for a written chunk. Deactivates once the file is complete.
    pub fn record_chunk(&mut self, written: u64) {
        self.received = self.received.saturating_add(written);
        if self.is_complete() {
            self.active = false;
        }
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }
}
