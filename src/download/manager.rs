// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Chunked download controller and the manager that drives it.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::header::RANGE;
use reqwest::StatusCode;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::state::DownloadState;
use super::types::{DownloadOutcome, DownloadProgress, DownloadStatus};
use crate::config::DEFAULT_PROBE_TIMEOUT_SECS;
use crate::error::{Error, Result, TransportError};
use crate::transport::{self, OptionalBearerAuth};

/// What the caller should do next.
#[derive(Debug)]
pub enum Phase {
    /// Run this request and hand its result to [`DownloadController::on_chunk`].
    Active(ChunkRequest),
    /// The file is complete at this path.
    Done(PathBuf),
    /// The controller no longer accepts chunks (failed or cancelled).
    Inactive,
}

/// One ranged GET written into the destination at its start offset.
///
/// Owns everything it needs so it can run as an independent task while the
/// controller waits.
#[derive(Debug)]
pub struct ChunkRequest {
    client: reqwest::Client,
    token: Option<String>,
    url: String,
    dest: PathBuf,
    start: u64,
    end: u64,
}

impl ChunkRequest {
    /// Half-open byte range this request covers.
    pub fn range(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    /// Fetch the range and write it at `start`. Returns bytes written.
    ///
    /// A server that ignores the range answers 200 with the whole file. That
    /// body is streamed instead: bytes before `start` are dropped and
    /// everything after is written, so one such response finishes the file.
    pub async fn run(self) -> Result<u64> {
        let resp = self
            .client
            .get(&self.url)
            .optional_bearer_auth(self.token.as_deref())
            .header(RANGE, transport::range_header(self.start, self.end))
            .send()
            .await?;

        let status = resp.status();
        if !transport::is_range_status(status) {
            return Err(transport::status_error(&self.url, resp).await.into());
        }
        if status == StatusCode::OK {
            return self.write_full_body(resp).await;
        }

        let body = resp.bytes().await?;
        if body.is_empty() {
            return Ok(0);
        }
        let mut file = open_at(&self.dest, self.start).await?;
        write_piece(&mut file, &self.dest, &body).await?;
        finish(file, &self.dest).await?;
        Ok(body.len() as u64)
    }

    async fn write_full_body(&self, resp: reqwest::Response) -> Result<u64> {
        tracing::debug!("{} ignored the range, writing the rest of the full body", self.url);
        let mut file = open_at(&self.dest, self.start).await?;
        let mut stream = resp.bytes_stream();
        let mut to_skip = self.start;
        let mut written = 0u64;

        while let Some(piece) = stream.next().await {
            let mut piece = piece?;
            if to_skip > 0 {
                let n = to_skip.min(piece.len() as u64);
                to_skip -= n;
                piece = piece.slice(n as usize..);
            }
            if piece.is_empty() {
                continue;
            }
            write_piece(&mut file, &self.dest, &piece).await?;
            written += piece.len() as u64;
        }

        finish(file, &self.dest).await?;
        Ok(written)
    }
}

/// Open an existing destination for writing at `offset`. The file is never
/// created here, so a destination removed mid-download is an error.
async fn open_at(path: &Path, offset: u64) -> Result<File> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| Error::io("Failed to open", path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| Error::io("Failed to seek in", path, e))?;
    Ok(file)
}

async fn write_piece(file: &mut File, path: &Path, data: &[u8]) -> Result<()> {
    file.write_all(data)
        .await
        .map_err(|e| Error::io("Failed to write to", path, e))
}

async fn finish(mut file: File, path: &Path) -> Result<()> {
    file.flush()
        .await
        .map_err(|e| Error::io("Failed to write to", path, e))
}

/// State machine for one (model, file) download.
///
/// `NotStarted -> Probing -> Active -> Done`, with `Failed` reachable from
/// any state. The controller never loops by itself: [`start`](Self::start)
/// and [`on_chunk`](Self::on_chunk) return the next [`Phase`] and the caller
/// decides whether to run it.
pub struct DownloadController {
    client: reqwest::Client,
    token: Option<String>,
    chunk_size: u64,
    probe_timeout: Duration,
    status: DownloadStatus,
    state: Option<DownloadState>,
}

impl DownloadController {
    pub fn new(client: reqwest::Client, token: Option<String>, chunk_size: u64) -> Self {
        Self {
            client,
            token,
            chunk_size: chunk_size.max(1),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            status: DownloadStatus::NotStarted,
            state: None,
        }
    }

    /// Bound each size request by `timeout` instead of the client's
    /// per-chunk timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn status(&self) -> &DownloadStatus {
        &self.status
    }

    pub fn state(&self) -> Option<&DownloadState> {
        self.state.as_ref()
    }

    /// Begin a download of `url` into `dest`.
    ///
    /// An existing `dest` is taken as complete without any request. Otherwise
    /// the remote size is probed, `dest` is created (truncated) and the first
    /// chunk is returned.
    pub async fn start(&mut self, url: &str, dest: &Path) -> Result<Phase> {
        if tokio::fs::metadata(dest).await.is_ok() {
            tracing::info!("{} already present, skipping download", dest.display());
            self.status = DownloadStatus::Done { completed_at: Utc::now() };
            return Ok(Phase::Done(dest.to_path_buf()));
        }
        if let Some(parent) = dest.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Err(self.fail(Error::io("Failed to create directory", parent, e)));
            }
        }

        self.status = DownloadStatus::Probing;
        let token = self.token.as_deref();
        let size = transport::probe_size(&self.client, url, token, self.probe_timeout);
        let total = match size.await {
            Ok(0) => {
                return Err(self.fail(Error::SizeUnknown { url: url.to_string() }));
            }
            Ok(total) => total,
            Err(e) => return Err(self.fail(e)),
        };

        if let Err(e) = tokio::fs::File::create(dest).await {
            return Err(self.fail(Error::io("Failed to create", dest, e)));
        }

        tracing::info!("downloading {} ({} bytes) to {}", url, total, dest.display());
        self.state = Some(DownloadState::new(url, dest, total));
        self.status = DownloadStatus::Active { received: 0, total };
        Ok(self.next_phase())
    }

    /// Apply the result of the last chunk and return the next phase.
    ///
    /// Results arriving after the controller went inactive are discarded.
    pub fn on_chunk(&mut self, result: Result<u64>) -> Result<Phase> {
        let received = match self.state.as_ref() {
            Some(state) if state.active => state.received,
            _ => return Ok(Phase::Inactive),
        };

        let written = match result {
            Ok(0) => return Err(self.fail(TransportError::EmptyChunk { start: received }.into())),
            Ok(written) => written,
            Err(e) => return Err(self.fail(e)),
        };

        if let Some(state) = self.state.as_mut() {
            state.record_chunk(written);
            self.status = DownloadStatus::Active {
                received: state.received,
                total: state.total,
            };
        }
        Ok(self.next_phase())
    }

    /// Stop issuing chunks. Any in-flight result will be discarded.
    pub fn cancel(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let received = self.state.as_ref().map(|s| s.received).unwrap_or(0);
        if let Some(state) = self.state.as_mut() {
            state.deactivate();
        }
        self.status = DownloadStatus::Cancelled { received };
    }

    fn next_phase(&mut self) -> Phase {
        let Some(state) = self.state.as_ref() else {
            return Phase::Inactive;
        };
        if state.is_complete() {
            let dest = state.dest.clone();
            tracing::info!("download complete: {}", dest.display());
            self.status = DownloadStatus::Done { completed_at: Utc::now() };
            return Phase::Done(dest);
        }
        match state.next_range(self.chunk_size) {
            Some((start, end)) => Phase::Active(ChunkRequest {
                client: self.client.clone(),
                token: self.token.clone(),
                url: state.url.clone(),
                dest: state.dest.clone(),
                start,
                end,
            }),
            None => Phase::Inactive,
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        if let Some(state) = self.state.as_mut() {
            state.deactivate();
        }
        tracing::warn!("download failed: {}", err);
        self.status = DownloadStatus::Failed { error: err.to_string() };
        err
    }
}

/// A file to fetch.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub model_id: String,
    pub filename: String,
    pub url: String,
    pub dest: PathBuf,
}

impl DownloadJob {
    pub fn label(&self) -> String {
        format!("{}/{}", self.model_id, self.filename)
    }
}

/// Handle to a spawned download.
#[derive(Debug)]
pub struct DownloadHandle {
    pub label: String,
    progress_rx: watch::Receiver<DownloadProgress>,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<Result<DownloadOutcome>>,
}

impl DownloadHandle {
    /// Get the current progress.
    pub fn progress(&self) -> DownloadProgress {
        self.progress_rx.borrow().clone()
    }

    /// A receiver that observes every published progress update.
    pub fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.progress_rx.clone()
    }

    /// Ask the download to stop. A chunk already in flight finishes but its
    /// result is discarded.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Wait for the download task to finish.
    pub async fn wait(self) -> Result<DownloadOutcome> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Spawns one task per download. Downloads share nothing but the HTTP
/// connection pool.
#[derive(Debug, Clone)]
pub struct DownloadManager {
    client: reqwest::Client,
    token: Option<String>,
    chunk_size: u64,
    probe_timeout: Duration,
}

impl DownloadManager {
    pub fn new(client: reqwest::Client, token: Option<String>, chunk_size: u64) -> Self {
        Self {
            client,
            token,
            chunk_size,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Start a download in the background. Must be called within a tokio runtime.
    pub fn spawn(&self, job: DownloadJob) -> DownloadHandle {
        let label = job.label();
        let (progress_tx, progress_rx) = watch::channel(DownloadProgress::new(
            &label,
            DownloadStatus::NotStarted,
            "Waiting to start",
        ));
        let cancelled = Arc::new(AtomicBool::new(false));
        let controller =
            DownloadController::new(self.client.clone(), self.token.clone(), self.chunk_size)
                .with_probe_timeout(self.probe_timeout);

        let task = tokio::spawn(drive(controller, job, progress_tx, cancelled.clone()));

        DownloadHandle {
            label,
            progress_rx,
            cancelled,
            task,
        }
    }
}

fn publish(tx: &watch::Sender<DownloadProgress>, progress: DownloadProgress) {
    // Nobody watching is fine.
    let _ = tx.send(progress);
}

/// Drive a controller to completion, publishing progress after every step.
async fn drive(
    mut controller: DownloadController,
    job: DownloadJob,
    progress_tx: watch::Sender<DownloadProgress>,
    cancelled: Arc<AtomicBool>,
) -> Result<DownloadOutcome> {
    let label = job.label();
    publish(
        &progress_tx,
        DownloadProgress::new(&label, DownloadStatus::Probing, "Probing remote size"),
    );

    let mut phase = match controller.start(&job.url, &job.dest).await {
        Ok(phase) => phase,
        Err(e) => {
            let status = controller.status().clone();
            let message = format!("Download failed: {}", e);
            publish(&progress_tx, DownloadProgress::new(&label, status, message));
            return Err(e);
        }
    };
    if let DownloadStatus::Active { .. } = controller.status() {
        publish(
            &progress_tx,
            DownloadProgress::new(&label, controller.status().clone(), "Downloading"),
        );
    }

    let started = Instant::now();
    let mut fetched = 0u64;

    loop {
        let request = match phase {
            Phase::Active(request) => request,
            Phase::Done(dest) => {
                publish(
                    &progress_tx,
                    DownloadProgress::new(&label, controller.status().clone(), "Download complete"),
                );
                return Ok(DownloadOutcome::Completed(dest));
            }
            Phase::Inactive => break,
        };

        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let result = request.run().await;
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        if let Ok(written) = result {
            fetched += written;
        }

        phase = match controller.on_chunk(result) {
            Ok(next) => next,
            Err(e) => {
                let status = controller.status().clone();
                let message = format!("Download failed: {}", e);
                publish(&progress_tx, DownloadProgress::new(&label, status, message));
                return Err(e);
            }
        };

        if let DownloadStatus::Active { .. } = controller.status() {
            publish(
                &progress_tx,
                DownloadProgress::new(&label, controller.status().clone(), "Downloading")
                    .with_rate(fetched, started.elapsed().as_secs_f64()),
            );
        }
    }

    controller.cancel();
    tracing::info!("download of {} cancelled", label);
    publish(
        &progress_tx,
        DownloadProgress::new(&label, controller.status().clone(), "Download cancelled"),
    );
    Ok(DownloadOutcome::Cancelled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn controller() -> DownloadController {
        DownloadController::new(reqwest::Client::new(), None, 4)
    }

    #[tokio::test]
    async fn test_existing_destination_is_done_without_requests() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("model.gguf");
        std::fs::write(&dest, b"already here").unwrap();

        let mut ctl = controller();
        // Unroutable URL: any request would fail the test.
        let phase = ctl.start("http://127.0.0.1:9/model.gguf", &dest).await.unwrap();
        assert!(matches!(phase, Phase::Done(ref p) if p == &dest));
        assert!(matches!(ctl.status(), DownloadStatus::Done { .. }));
        assert!(ctl.state().is_none());
        assert_eq!(std::fs::read(&dest).unwrap(), b"already here");
    }

    #[test]
    fn test_chunk_before_start_is_discarded() {
        let mut ctl = controller();
        assert!(matches!(ctl.on_chunk(Ok(10)), Ok(Phase::Inactive)));
        assert_eq!(ctl.status(), &DownloadStatus::NotStarted);
    }

    #[test]
    fn test_chunk_sequence_and_empty_chunk() {
        let mut ctl = controller();
        ctl.state = Some(DownloadState::new("http://h/f", "/tmp/f", 10));
        ctl.status = DownloadStatus::Active { received: 0, total: 10 };

        match ctl.on_chunk(Ok(4)).unwrap() {
            Phase::Active(req) => assert_eq!(req.range(), (4, 8)),
            other => panic!("unexpected phase {:?}", other),
        }
        assert_eq!(ctl.status(), &DownloadStatus::Active { received: 4, total: 10 });

        let err = ctl.on_chunk(Ok(0)).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::EmptyChunk { start: 4 })
        ));
        assert!(matches!(ctl.status(), DownloadStatus::Failed { .. }));
        assert!(!ctl.state().unwrap().active);

        // Late results after failure change nothing.
        assert!(matches!(ctl.on_chunk(Ok(4)), Ok(Phase::Inactive)));
        assert_eq!(ctl.state().unwrap().received, 4);
    }

    #[test]
    fn test_last_chunk_completes() {
        let mut ctl = controller();
        ctl.state = Some(DownloadState::new("http://h/f", "/tmp/f", 6));
        ctl.status = DownloadStatus::Active { received: 0, total: 6 };

        assert!(matches!(ctl.on_chunk(Ok(4)), Ok(Phase::Active(_))));
        match ctl.on_chunk(Ok(2)).unwrap() {
            Phase::Done(dest) => assert_eq!(dest, PathBuf::from("/tmp/f")),
            other => panic!("unexpected phase {:?}", other),
        }
        assert!(matches!(ctl.status(), DownloadStatus::Done { .. }));
    }

    #[test]
    fn test_failed_chunk_fails_download() {
        let mut ctl = controller();
        ctl.state = Some(DownloadState::new("http://h/f", "/tmp/f", 10));
        ctl.status = DownloadStatus::Active { received: 0, total: 10 };
        assert!(matches!(ctl.on_chunk(Ok(4)), Ok(Phase::Active(_))));

        let chunk_error = TransportError::Status {
            url: "http://h/f".to_string(),
            status: 503,
            snippet: "overloaded".to_string(),
        };
        let err = ctl.on_chunk(Err(chunk_error.into())).unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(TransportError::Status { status: 503, ref snippet, .. })
                if snippet == "overloaded"
        ));
        match ctl.status() {
            DownloadStatus::Failed { error } => assert!(error.contains("503")),
            other => panic!("unexpected status {:?}", other),
        }
        let state = ctl.state().unwrap();
        assert!(!state.active);
        assert_eq!(state.received, 4);
        assert!(matches!(ctl.on_chunk(Ok(4)), Ok(Phase::Inactive)));
    }

    #[tokio::test]
    async fn test_missing_destination_is_not_recreated() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("gone.gguf");
        let err = open_at(&dest, 4).await.unwrap_err();
        assert!(matches!(err, Error::Io { action: "Failed to open", .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_cancel_discards_late_chunk() {
        let mut ctl = controller();
        ctl.state = Some(DownloadState::new("http://h/f", "/tmp/f", 10));
        ctl.status = DownloadStatus::Active { received: 0, total: 10 };

        ctl.cancel();
        assert_eq!(ctl.status(), &DownloadStatus::Cancelled { received: 0 });
        assert!(matches!(ctl.on_chunk(Ok(4)), Ok(Phase::Inactive)));
        assert_eq!(ctl.state().unwrap().received, 0);
    }
}
