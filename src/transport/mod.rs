// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared HTTP plumbing.
//!
//! Both the blocking client (used by the metadata reader, which decodes
//! synchronously) and the async client (used by chunked downloads) go through
//! the helpers here so that headers, range syntax, size probing and handling of
//! servers that ignore `Range` behave identically.

use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{StatusCode, Url};
use std::time::Duration;

use crate::error::{Error, Result, TransportError};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("ggufetch/", env!("CARGO_PKG_VERSION"));

/// Maximum number of characters of an error body kept in a status error.
const SNIPPET_LEN: usize = 300;

/// Attach `Authorization: Bearer <token>` only when a token is configured.
pub trait OptionalBearerAuth: Sized {
    fn optional_bearer_auth(self, token: Option<&str>) -> Self;
}

impl OptionalBearerAuth for reqwest::RequestBuilder {
    fn optional_bearer_auth(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.bearer_auth(token),
            None => self,
        }
    }
}

impl OptionalBearerAuth for reqwest::blocking::RequestBuilder {
    fn optional_bearer_auth(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.bearer_auth(token),
            None => self,
        }
    }
}

/// Build a blocking client with the standard user agent and a request timeout.
pub fn blocking_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    Ok(reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Build an async client with the standard user agent and a request timeout.
pub fn async_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// `Range` header value for the half-open interval `[start, end_exclusive)`.
///
/// Callers must pass a non-empty interval.
pub fn range_header(start: u64, end_exclusive: u64) -> String {
    debug_assert!(end_exclusive > start);
    format!("bytes={}-{}", start, end_exclusive - 1)
}

/// Positive `Content-Length`, if present and parseable.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|v| *v > 0)
}

/// Total size from the trailing `/<total>` of a `Content-Range` header.
pub fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse::<u64>().ok().filter(|v| *v > 0)
}

/// Status codes acceptable for a ranged GET.
pub fn is_range_status(status: StatusCode) -> bool {
    status == StatusCode::PARTIAL_CONTENT || status == StatusCode::OK
}

/// Cut a full `200` body down to `[start, end_exclusive)`.
///
/// Returns an empty buffer when `start` lies beyond the body.
pub fn slice_to_range(data: Vec<u8>, start: u64, end_exclusive: u64) -> Vec<u8> {
    let len = data.len() as u64;
    if start >= len {
        return Vec::new();
    }
    let end = end_exclusive.min(len);
    if start == 0 && end == len {
        return data;
    }
    data[start as usize..end as usize].to_vec()
}

fn snippet(body: &str) -> String {
    body.trim().chars().take(SNIPPET_LEN).collect()
}

/// Status error for a blocking response, keeping a short body snippet.
pub fn status_error_blocking(url: &str, response: reqwest::blocking::Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().unwrap_or_default();
    TransportError::Status {
        url: url.to_string(),
        status,
        snippet: snippet(&body),
    }
}

/// Status error for an async response, keeping a short body snippet.
pub async fn status_error(url: &str, response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::Status {
        url: url.to_string(),
        status,
        snippet: snippet(&body),
    }
}

/// Size from the 1-byte range probe: the `Content-Range` total, or the
/// `Content-Length` of a full `200` body.
fn size_from_range_probe(status: StatusCode, headers: &HeaderMap) -> Option<u64> {
    content_range_total(headers).or_else(|| {
        if status == StatusCode::OK {
            content_length(headers)
        } else {
            None
        }
    })
}

/// Determine the remote size with the blocking client.
///
/// Tries `HEAD` first, then a `bytes=0-0` GET. Fails with
/// [`Error::SizeUnknown`] only after both strategies came up empty.
pub fn probe_size_blocking(
    client: &reqwest::blocking::Client,
    url: &str,
    token: Option<&str>,
) -> Result<u64> {
    match client.head(url).optional_bearer_auth(token).send() {
        Ok(resp) if resp.status().is_success() => {
            if let Some(size) = content_length(resp.headers()) {
                return Ok(size);
            }
            tracing::debug!("HEAD {} carried no usable Content-Length", url);
        }
        Ok(resp) => tracing::debug!("HEAD {} returned {}", url, resp.status()),
        Err(e) => tracing::debug!("HEAD {} failed: {}", url, e),
    }

    let resp = client
        .get(url)
        .optional_bearer_auth(token)
        .header(RANGE, range_header(0, 1))
        .send()?;
    if !is_range_status(resp.status()) {
        return Err(status_error_blocking(url, resp).into());
    }
    size_from_range_probe(resp.status(), resp.headers()).ok_or_else(|| Error::SizeUnknown {
        url: url.to_string(),
    })
}

/// Determine the remote size with the async client. Same strategy as
/// [`probe_size_blocking`].
///
/// `timeout` bounds each of the two requests and overrides the client's own
/// timeout, which for download clients is sized for whole chunks.
pub async fn probe_size(
    client: &reqwest::Client,
    url: &str,
    token: Option<&str>,
    timeout: Duration,
) -> Result<u64> {
    let head = client.head(url).optional_bearer_auth(token).timeout(timeout);
    match head.send().await {
        Ok(resp) if resp.status().is_success() => {
            if let Some(size) = content_length(resp.headers()) {
                return Ok(size);
            }
            tracing::debug!("HEAD {} carried no usable Content-Length", url);
        }
        Ok(resp) => tracing::debug!("HEAD {} returned {}", url, resp.status()),
        Err(e) => tracing::debug!("HEAD {} failed: {}", url, e),
    }

    let resp = client
        .get(url)
        .optional_bearer_auth(token)
        .header(RANGE, range_header(0, 1))
        .timeout(timeout)
        .send()
        .await?;
    if !is_range_status(resp.status()) {
        return Err(status_error(url, resp).await.into());
    }
    size_from_range_probe(resp.status(), resp.headers()).ok_or_else(|| Error::SizeUnknown {
        url: url.to_string(),
    })
}

/// Build `<endpoint>/<model id>/resolve/main/<filename>` with every path
/// segment percent-encoded.
pub fn resolve_url(endpoint: &str, model_id: &str, filename: &str) -> Result<Url> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: endpoint.to_string(),
        reason,
    };
    let mut url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| invalid("cannot be a base URL".to_string()))?;
        segments.pop_if_empty();
        segments.extend(model_id.split('/').map(str::trim).filter(|s| !s.is_empty()));
        segments.push("resolve").push("main");
        segments.extend(filename.split('/').filter(|s| !s.is_empty()));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_range_header_is_inclusive() {
        assert_eq!(range_header(0, 1), "bytes=0-0");
        assert_eq!(range_header(262144, 524288), "bytes=262144-524287");
    }

    #[test]
    fn test_content_length_requires_positive() {
        assert_eq!(content_length(&headers(&[("content-length", "1234")])), Some(1234));
        assert_eq!(content_length(&headers(&[("content-length", "0")])), None);
        assert_eq!(content_length(&headers(&[("content-length", "abc")])), None);
        assert_eq!(content_length(&HeaderMap::new()), None);
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(
            content_range_total(&headers(&[("content-range", "bytes 0-0/4683073888")])),
            Some(4_683_073_888)
        );
        assert_eq!(content_range_total(&headers(&[("content-range", "bytes 0-0/*")])), None);
        assert_eq!(content_range_total(&headers(&[("content-range", "garbage")])), None);
    }

    #[test]
    fn test_range_probe_ignores_length_of_partial_body() {
        let partial = headers(&[("content-length", "1")]);
        assert_eq!(size_from_range_probe(StatusCode::PARTIAL_CONTENT, &partial), None);

        let full = headers(&[("content-length", "1000")]);
        assert_eq!(size_from_range_probe(StatusCode::OK, &full), Some(1000));
    }

    #[test]
    fn test_slice_to_range() {
        let data: Vec<u8> = (0..10).collect();
        assert_eq!(slice_to_range(data.clone(), 2, 5), vec![2, 3, 4]);
        assert_eq!(slice_to_range(data.clone(), 8, 100), vec![8, 9]);
        assert!(slice_to_range(data.clone(), 10, 20).is_empty());
        assert_eq!(slice_to_range(data.clone(), 0, 10), data);
    }

    #[test]
    fn test_snippet_is_capped() {
        let long = "x".repeat(1000);
        assert_eq!(snippet(&long).len(), SNIPPET_LEN);
        assert_eq!(snippet("  not found \n"), "not found");
    }

    #[test]
    fn test_resolve_url_escapes_segments() {
        let url = resolve_url(
            "https://huggingface.co",
            "TheBloke/Llama-2-7B-GGUF",
            "sub dir/llama-2-7b.Q4_K_M.gguf",
        )
        .expect("url");
        assert_eq!(url.host_str(), Some("huggingface.co"));
        assert_eq!(
            url.path(),
            "/TheBloke/Llama-2-7B-GGUF/resolve/main/sub%20dir/llama-2-7b.Q4_K_M.gguf"
        );
    }

    #[test]
    fn test_resolve_url_trailing_slash_endpoint() {
        let url = resolve_url("http://127.0.0.1:8080/", "org/model", "a.gguf").expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/org/model/resolve/main/a.gguf");
    }

    #[test]
    fn test_resolve_url_rejects_garbage() {
        assert!(resolve_url("not a url", "m", "f").is_err());
    }
}
