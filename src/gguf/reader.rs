// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Random-access reads over a remote resource.
//!
//! [`RangeReader`] presents a sequential stream backed by fixed-size windows
//! fetched on demand from a [`RangeSource`]. Only the unread tail of the current
//! window is kept; consumed bytes are discarded before the window grows.

use reqwest::header::RANGE;
use reqwest::StatusCode;

use crate::config::DEFAULT_WINDOW_SIZE;
use crate::error::{FormatError, Result};
use crate::transport::{self, OptionalBearerAuth};

/// Anything that can serve the bytes `[start, end_exclusive)` of a resource.
///
/// An empty result means the resource ends at or before `start`.
pub trait RangeSource {
    fn fetch_range(&mut self, start: u64, end_exclusive: u64) -> Result<Vec<u8>>;
}

/// [`RangeSource`] over HTTP(S) using range requests.
pub struct HttpRangeSource {
    client: reqwest::blocking::Client,
    url: String,
    token: Option<String>,
}

impl HttpRangeSource {
    pub fn new(
        client: reqwest::blocking::Client,
        url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            token,
        }
    }
}

impl RangeSource for HttpRangeSource {
    fn fetch_range(&mut self, start: u64, end_exclusive: u64) -> Result<Vec<u8>> {
        if end_exclusive <= start {
            return Ok(Vec::new());
        }
        tracing::debug!("fetching bytes {}..{} of {}", start, end_exclusive, self.url);

        let resp = self
            .client
            .get(&self.url)
            .optional_bearer_auth(self.token.as_deref())
            .header(RANGE, transport::range_header(start, end_exclusive))
            .send()?;

        let status = resp.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        if !transport::is_range_status(status) {
            return Err(transport::status_error_blocking(&self.url, resp).into());
        }

        let data = resp.bytes()?.to_vec();
        if status == StatusCode::OK {
            tracing::debug!("{} ignored the Range header, slicing full body", self.url);
            return Ok(transport::slice_to_range(data, start, end_exclusive));
        }
        Ok(data)
    }
}

/// Sequential reader with a sliding window over a [`RangeSource`].
///
/// Invariant: `buf_start <= pos <= buf_start + buf.len()`.
pub struct RangeReader<S> {
    source: S,
    buf: Vec<u8>,
    buf_start: u64,
    pos: u64,
    eof: bool,
    window_size: usize,
}

impl<S: RangeSource> RangeReader<S> {
    /// Reader with the default 256 KiB window.
    pub fn new(source: S) -> Self {
        Self::with_window_size(source, DEFAULT_WINDOW_SIZE)
    }

    pub fn with_window_size(source: S, window_size: usize) -> Self {
        Self {
            source,
            buf: Vec::new(),
            buf_start: 0,
            pos: 0,
            eof: false,
            window_size: window_size.max(1),
        }
    }

    /// Absolute position of the logical cursor.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Set once a fetch returned no bytes; cleared by an out-of-window seek.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn available(&self) -> usize {
        self.buf.len() - (self.pos - self.buf_start) as usize
    }

    /// Grow the window until `n` unread bytes are buffered or the source ends.
    fn ensure(&mut self, n: usize) -> Result<()> {
        while self.available() < n && !self.eof {
            if self.pos > self.buf_start {
                let consumed = (self.pos - self.buf_start) as usize;
                self.buf.drain(..consumed);
                self.buf_start = self.pos;
            }

            let start = self.buf_start + self.buf.len() as u64;
            let end = start + self.window_size as u64;
            let data = self.source.fetch_range(start, end)?;
            if data.is_empty() {
                self.eof = true;
                break;
            }
            self.buf.extend_from_slice(&data);
        }

        let available = self.available();
        if available < n {
            return Err(FormatError::UnexpectedEof {
                wanted: n,
                available,
            }
            .into());
        }
        Ok(())
    }

    /// Read exactly `n` bytes, advancing the cursor by `n`.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.ensure(n)?;
        let offset = (self.pos - self.buf_start) as usize;
        let out = self.buf[offset..offset + n].to_vec();
        self.pos += n as u64;
        Ok(out)
    }

    /// Read a fixed-size array, advancing the cursor.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        if N == 0 {
            return Ok(out);
        }
        self.ensure(N)?;
        let offset = (self.pos - self.buf_start) as usize;
        out.copy_from_slice(&self.buf[offset..offset + N]);
        self.pos += N as u64;
        Ok(out)
    }

    /// Advance past `n` bytes, failing like [`read_exact`](Self::read_exact)
    /// if they are not all available.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.ensure(n)?;
        self.pos += n as u64;
        Ok(())
    }

    /// Move the cursor to absolute offset `p`.
    ///
    /// Inside the current window only the cursor moves. Anywhere else the
    /// window is dropped and the next read fetches from `p`.
    pub fn seek_abs(&mut self, p: u64) {
        if p >= self.buf_start && p <= self.buf_start + self.buf.len() as u64 {
            self.pos = p;
            return;
        }
        self.buf.clear();
        self.buf_start = p;
        self.pos = p;
        self.eof = false;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;

    /// In-memory source that records every requested range.
    pub(crate) struct MemorySource {
        data: Vec<u8>,
        pub(crate) fetches: Vec<(u64, u64)>,
    }

    impl MemorySource {
        pub(crate) fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                fetches: Vec::new(),
            }
        }
    }

    impl RangeSource for MemorySource {
        fn fetch_range(&mut self, start: u64, end_exclusive: u64) -> Result<Vec<u8>> {
            self.fetches.push((start, end_exclusive));
            Ok(transport::slice_to_range(self.data.clone(), start, end_exclusive))
        }
    }

    fn bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_first_read_fetches_one_window() {
        let mut reader = RangeReader::with_window_size(MemorySource::new(bytes(1000)), 256 * 1024);
        let out = reader.read_exact(10).expect("read");
        assert_eq!(out, bytes(10));
        assert_eq!(reader.source().fetches, vec![(0, 256 * 1024)]);
        assert_eq!(reader.position(), 10);
        assert!(!reader.is_eof());
    }

    #[test]
    fn test_reading_past_end_sets_eof_and_fails() {
        let mut reader = RangeReader::with_window_size(MemorySource::new(bytes(1000)), 256 * 1024);
        reader.read_exact(10).expect("read");

        let err = reader.read_exact(5000).unwrap_err();
        assert!(matches!(
            err,
            Error::Format(FormatError::UnexpectedEof { wanted: 5000, available: 990 })
        ));
        assert!(reader.is_eof());
        // The second fetch starts where the first window ended and comes back empty.
        assert_eq!(reader.source().fetches, vec![(0, 262144), (1000, 263144)]);

        // Further under-length reads fail without touching the source.
        assert!(reader.read_exact(1000).is_err());
        assert_eq!(reader.source().fetches.len(), 2);
        // Buffered bytes stay readable.
        assert_eq!(reader.read_exact(990).expect("tail"), bytes(1000)[10..].to_vec());
    }

    #[test]
    fn test_boundary_read_uses_minimum_fetches() {
        let mut reader = RangeReader::with_window_size(MemorySource::new(bytes(100)), 16);
        reader.read_exact(10).expect("read");
        assert_eq!(reader.source().fetches.len(), 1);

        // 6 bytes buffered, 20 needed: one more window of 16 is enough.
        let out = reader.read_exact(20).expect("read");
        assert_eq!(out, bytes(100)[10..30].to_vec());
        assert_eq!(reader.source().fetches, vec![(0, 16), (16, 32)]);

        // 2 buffered, 30 needed: exactly two more windows.
        let out = reader.read_exact(30).expect("read");
        assert_eq!(out, bytes(100)[30..60].to_vec());
        assert_eq!(reader.source().fetches, vec![(0, 16), (16, 32), (32, 48), (48, 64)]);
    }

    #[test]
    fn test_window_is_compacted_before_growing() {
        let mut reader = RangeReader::with_window_size(MemorySource::new(bytes(100)), 16);
        reader.read_exact(12).expect("read");
        reader.read_exact(8).expect("read");
        // Consumed prefix dropped: window now starts at the cursor before the refill.
        assert_eq!(reader.buf_start, 12);
        assert_eq!(reader.buf.len(), 4 + 16);
        assert_eq!(reader.position(), 20);
    }

    #[test]
    fn test_seek_inside_window_does_not_fetch() {
        let mut reader = RangeReader::with_window_size(MemorySource::new(bytes(100)), 32);
        reader.read_exact(20).expect("read");
        reader.seek_abs(4);
        assert_eq!(reader.read_exact(4).expect("read"), vec![4, 5, 6, 7]);
        reader.seek_abs(32);
        assert_eq!(reader.position(), 32);
        assert_eq!(reader.source().fetches.len(), 1);
    }

    #[test]
    fn test_seek_outside_window_refetches_from_target() {
        let mut reader = RangeReader::with_window_size(MemorySource::new(bytes(100)), 32);
        reader.read_exact(4).expect("read");
        reader.seek_abs(70);
        assert_eq!(reader.read_exact(2).expect("read"), vec![70, 71]);
        assert_eq!(reader.source().fetches, vec![(0, 32), (70, 102)]);
    }

    #[test]
    fn test_seek_clears_eof() {
        let mut reader = RangeReader::with_window_size(MemorySource::new(bytes(10)), 8);
        assert!(reader.read_exact(20).is_err());
        assert!(reader.is_eof());
        reader.seek_abs(500);
        assert!(!reader.is_eof());
        reader.seek_abs(2);
        assert_eq!(reader.read_exact(3).expect("read"), vec![2, 3, 4]);
    }

    #[test]
    fn test_read_array_and_skip() {
        let mut reader = RangeReader::with_window_size(MemorySource::new(bytes(64)), 8);
        let head: [u8; 4] = reader.read_array().expect("array");
        assert_eq!(head, [0, 1, 2, 3]);
        reader.skip(10).expect("skip");
        assert_eq!(reader.position(), 14);
        let next: [u8; 2] = reader.read_array().expect("array");
        assert_eq!(next, [14, 15]);
        assert!(reader.skip(100).is_err());
    }

    #[test]
    fn test_zero_length_read_never_fetches() {
        let mut reader = RangeReader::new(MemorySource::new(Vec::new()));
        assert!(reader.read_exact(0).expect("read").is_empty());
        assert!(reader.source().fetches.is_empty());
    }
}
