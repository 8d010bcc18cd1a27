// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! ggufetch - remote GGUF inspection and chunked downloads
//!
//! Reads just enough of a remote GGUF file, through HTTP range requests, to
//! estimate how much memory the model needs, and downloads model files in
//! resumable-size chunks.
//!
//! # Core Modules
//!
//! - [`gguf`] - Range-buffered reader and metadata decoder
//! - [`usage`] - Memory estimates and quantization labels
//! - [`download`] - Chunked download controller and manager
//! - [`catalog`] - Model search and repository file listing
//! - [`transport`] - Shared HTTP plumbing
//! - [`config`] - Persisted settings
//! - [`error`] - Error taxonomy and formatting

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod gguf;
pub mod paths;
pub mod quant;
pub mod transport;
pub mod usage;
pub mod utils;

pub use catalog::{HubClient, ModelPage, ModelSummary};
pub use config::Config;
pub use download::{
    DownloadController, DownloadHandle, DownloadJob, DownloadManager, DownloadOutcome,
    DownloadProgress, DownloadStatus, Phase,
};
pub use error::{describe, format_error, Error, FormatError, Result, TransportError};
pub use gguf::{HttpRangeSource, Params, RangeReader, RangeSource};
pub use paths::local_model_path;
pub use usage::{format_bytes, MemoryEstimate, UsageEstimator};
pub use utils::mask_sensitive;
