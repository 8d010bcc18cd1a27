// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Chunked model downloads.
//!
//! A [`DownloadController`] fetches one remote file in fixed-size ranged
//! chunks, writing each at its offset in the destination. It never retries
//! and never loops on its own: the caller runs the [`ChunkRequest`] it hands
//! out and feeds the result back. [`DownloadManager`] is such a caller, one
//! tokio task per file, reporting progress through a watch channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ spawn ┌─────────────────┐
//! │ DownloadManager │──────▶│ drive (tokio)   │──▶ watch<DownloadProgress>
//! └─────────────────┘       └────────┬────────┘
//!                                    │ start / on_chunk
//!                                    ▼
//!                           ┌─────────────────┐
//!                           │ Controller      │
//!                           │ + DownloadState │
//!                           └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use ggufetch::download::{DownloadJob, DownloadManager};
//!
//! # async fn example() -> ggufetch::Result<()> {
//! let manager = DownloadManager::new(reqwest::Client::new(), None, 4 << 20);
//! let handle = manager.spawn(DownloadJob {
//!     model_id: "TheBloke/Llama-2-7B-GGUF".into(),
//!     filename: "llama-2-7b.Q4_K_M.gguf".into(),
//!     url: "https://huggingface.co/TheBloke/Llama-2-7B-GGUF/resolve/main/llama-2-7b.Q4_K_M.gguf"
//!         .into(),
//!     dest: "models/llama-2-7b.Q4_K_M.gguf".into(),
//! });
//! println!("Status: {:?}", handle.progress().status);
//! let outcome = handle.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod state;
pub mod types;

pub use manager::{
    ChunkRequest, DownloadController, DownloadHandle, DownloadJob, DownloadManager, Phase,
};
pub use state::DownloadState;
pub use types::{DownloadOutcome, DownloadProgress, DownloadStatus};
