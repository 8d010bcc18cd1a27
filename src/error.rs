// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for ggufetch.
//!
//! Every failure surfaced by the library falls into one of five categories:
//! transport (connection, timeout, bad status), format (malformed container),
//! incomplete metadata, unknown remote size and local I/O. The CLI renders
//! them with [`format_error`], which adds possible causes and fixes.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level library error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid GGUF data: {0}")]
    Format(#[from] FormatError),

    /// The metadata section ended before head count, block count and
    /// embedding length were all seen.
    #[error("required metadata not found")]
    IncompleteMetadata,

    #[error("cannot determine size of {url}")]
    SizeUnknown { url: String },

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap an I/O error with the action and path it failed on.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Network-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}{}", snippet_suffix(.snippet))]
    Status {
        url: String,
        status: u16,
        snippet: String,
    },

    #[error("server returned no data for bytes starting at {start}")]
    EmptyChunk { start: u64 },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

fn snippet_suffix(snippet: &str) -> String {
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {}", snippet)
    }
}

/// Malformed or unsupported container data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic 0x{0:08x}, not a GGUF file")]
    BadMagic(u32),

    #[error("unsupported GGUF version {0}")]
    UnsupportedVersion(u32),

    #[error("key too long ({0} bytes)")]
    KeyTooLong(u64),

    #[error("string too long ({0} bytes)")]
    StringTooLong(u64),

    #[error("unknown value type {0}")]
    UnknownType(u32),

    #[error("unexpected end of data: wanted {wanted} bytes, {available} available")]
    UnexpectedEof { wanted: usize, available: usize },
}

impl From<reqwest::Error> for TransportError {
    fn from(source: reqwest::Error) -> Self {
        let url = source
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        TransportError::Request { url, source }
    }
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Self {
        Error::Transport(source.into())
    }
}

/// Formats an error message with title, causes and fixes.
///
/// ```
/// use ggufetch::error::format_error;
///
/// let msg = format_error(
///     "Download failed",
///     &["Network unreachable"],
///     &["Check your connection"],
/// );
/// assert!(msg.contains("Possible causes:"));
/// ```
pub fn format_error(title: &str, causes: &[&str], fixes: &[&str]) -> String {
    let mut output = format!("[✗] {}\n", title);

    if !causes.is_empty() {
        output.push_str("\nPossible causes:\n");
        for cause in causes {
            output.push_str(&format!("  - {}\n", cause));
        }
    }

    if !fixes.is_empty() {
        output.push_str("\nTry these fixes:\n");
        for (i, fix) in fixes.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, fix));
        }
    }

    output
}

/// Render a library error with causes and fixes suited to its category.
pub fn describe(err: &Error) -> String {
    let title = err.to_string();
    match err {
        Error::Transport(TransportError::Status { status: 401 | 403, .. }) => format_error(
            &title,
            &["The repository is gated or private", "The access token is missing or expired"],
            &["Set HF_TOKEN or pass --token", "Accept the model license on the Hub"],
        ),
        Error::Transport(_) => format_error(
            &title,
            &["Network unreachable or too slow", "Wrong endpoint in config"],
            &["Retry the command", "Check `ggufetch config`"],
        ),
        Error::Format(_) => format_error(
            &title,
            &["The file is not a GGUF model", "The file uses a newer GGUF version"],
            &[],
        ),
        Error::IncompleteMetadata => format_error(
            &title,
            &["The model architecture does not publish head/block/embedding keys"],
            &[],
        ),
        Error::SizeUnknown { .. } => format_error(
            &title,
            &["The server sent neither Content-Length nor Content-Range"],
            &["Check that the file name is spelled exactly as on the Hub"],
        ),
        Error::Io { .. } => format_error(
            &title,
            &["Missing permissions", "Disk full"],
            &["Choose another models_dir in config"],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error() {
        let error = format_error("Test Error", &["Cause 1", "Cause 2"], &["Fix 1", "Fix 2"]);

        assert!(error.contains("[✗] Test Error"));
        assert!(error.contains("  - Cause 1"));
        assert!(error.contains("  - Cause 2"));
        assert!(error.contains("  1. Fix 1"));
        assert!(error.contains("  2. Fix 2"));
    }

    #[test]
    fn test_empty_causes_and_fixes() {
        let error = format_error("Empty test", &[], &[]);
        assert!(!error.contains("Possible causes:"));
        assert!(!error.contains("Try these fixes:"));
    }

    #[test]
    fn test_status_display_includes_snippet() {
        let err = TransportError::Status {
            url: "https://example.test/a".to_string(),
            status: 404,
            snippet: "Entry not found".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 404 from https://example.test/a: Entry not found");

        let bare = TransportError::Status {
            url: "u".to_string(),
            status: 500,
            snippet: String::new(),
        };
        assert_eq!(bare.to_string(), "HTTP 500 from u");
    }

    #[test]
    fn test_describe_auth_failure_suggests_token() {
        let err = Error::Transport(TransportError::Status {
            url: "u".to_string(),
            status: 401,
            snippet: String::new(),
        });
        assert!(describe(&err).contains("HF_TOKEN"));
    }
}
