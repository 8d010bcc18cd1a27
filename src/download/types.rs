// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download status and progress events.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::usage::format_bytes;

/// Where a download is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStatus {
    /// Nothing requested yet
    NotStarted,
    /// Determining the remote size
    Probing,
    /// Fetching chunks
    Active { received: u64, total: u64 },
    /// File is complete on disk (or was already present)
    Done { completed_at: DateTime<Utc> },
    /// Stopped by the caller before completion
    Cancelled { received: u64 },
    /// Stopped by the first error
    Failed { error: String },
}

impl DownloadStatus {
    /// Returns true once no further chunks will be requested.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Done { .. }
                | DownloadStatus::Cancelled { .. }
                | DownloadStatus::Failed { .. }
        )
    }
}

/// Final result of a driven download.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Completed(PathBuf),
    Cancelled,
}

/// Progress snapshot published after every transition.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    /// `<model id>/<filename>`
    pub label: String,
    pub status: DownloadStatus,
    /// Human-readable status message
    pub message: String,
    /// Average speed since the first chunk, bytes per second
    pub speed_bps: Option<u64>,
    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,
}

impl DownloadProgress {
    pub fn new(
        label: impl Into<String>,
        status: DownloadStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            status,
            message: message.into(),
            eta_seconds: None,
            speed_bps: None,
        }
    }

    /// Fill speed and ETA from bytes fetched over `elapsed_secs`.
    pub fn with_rate(mut self, fetched: u64, elapsed_secs: f64) -> Self {
        if elapsed_secs <= 0.0 || fetched == 0 {
            return self;
        }
        let speed = (fetched as f64 / elapsed_secs) as u64;
        self.speed_bps = Some(speed);
        if let DownloadStatus::Active { received, total } = self.status {
            if speed > 0 {
                self.eta_seconds = Some(total.saturating_sub(received) / speed);
            }
        }
        self
    }

    /// Formatted speed, e.g. `"12.3 MB/s"`.
    pub fn speed_string(&self) -> Option<String> {
        self.speed_bps.map(|bps| format!("{}/s", format_bytes(bps)))
    }

    /// Formatted ETA, e.g. `"3m 12s"`.
    pub fn eta_string(&self) -> Option<String> {
        self.eta_seconds.map(|secs| {
            if secs >= 3600 {
                format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
            } else if secs >= 60 {
                format!("{}m {}s", secs / 60, secs % 60)
            } else {
                format!("{}s", secs)
            }
        })
    }
}
