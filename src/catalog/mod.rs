// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hub catalog client.
//!
//! Searches GGUF text-generation models, lists the GGUF files of a model
//! repository and resolves their download URLs. Nothing here decodes model
//! data.
//!
//! Search results are paged. The next page's URL comes from the `Link`
//! response header and is followed with [`HubClient::next_page`].

use reqwest::header::{ACCEPT, LINK};
use reqwest::Url;
use serde::Deserialize;

use crate::error::{Result, TransportError};
use crate::transport::{self, OptionalBearerAuth};

#[derive(Debug, Deserialize)]
struct ModelDetail {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelSummary {
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default)]
    pub likes: u64,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPage {
    pub models: Vec<ModelSummary>,
    /// Absolute URL of the following page, if the server announced one.
    pub next: Option<String>,
}

/// Default page size for [`HubClient::search_models`].
pub const DEFAULT_SEARCH_LIMIT: u32 = 50;

/// Extract the `rel="next"` target from a `Link` header value.
pub fn parse_link_next(header: &str) -> Option<String> {
    header
        .split(',')
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| {
            let start = part.find('<')? + 1;
            let end = part[start..].find('>')? + start;
            Some(part[start..end].trim().to_string())
        })
        .filter(|target| !target.is_empty())
}

/// Client for the model Hub API.
#[derive(Debug, Clone)]
pub struct HubClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HubClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token,
        }
    }

    /// `<endpoint>/api/models` followed by `segments`.
    fn api_url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| TransportError::InvalidUrl {
            url: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl {
                url: self.endpoint.clone(),
                reason: "cannot be a base URL".to_string(),
            })?
            .pop_if_empty()
            .push("api")
            .push("models")
            .extend(segments);
        Ok(url)
    }

    fn model_api_url(&self, model_id: &str) -> Result<Url> {
        let mut url =
            self.api_url(model_id.split('/').map(str::trim).filter(|s| !s.is_empty()))?;
        url.query_pairs_mut()
            .append_pair("expand[]", "siblings")
            .append_pair("full", "false")
            .append_pair("config", "false");
        Ok(url)
    }

    /// First-page URL of a search for GGUF text-generation models, most
    /// trending first. A blank `query` lists without a search term.
    pub fn search_url(&self, query: &str, limit: u32) -> Result<Url> {
        let mut url = self.api_url([])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("filter", "text-generation")
                .append_pair("filter", "gguf")
                .append_pair("sort", "trendingScore")
                .append_pair("full", "false")
                .append_pair("config", "false")
                .append_pair("limit", &limit.max(1).to_string());
            if !query.trim().is_empty() {
                pairs.append_pair("search", query.trim());
            }
        }
        Ok(url)
    }

    /// First page of search results.
    pub async fn search_models(&self, query: &str, limit: u32) -> Result<ModelPage> {
        let url = self.search_url(query, limit)?;
        self.fetch_page(url.as_str()).await
    }

    /// The page after `page`, or `None` on the last page.
    pub async fn next_page(&self, page: &ModelPage) -> Result<Option<ModelPage>> {
        match page.next.as_deref() {
            Some(url) => Ok(Some(self.fetch_page(url).await?)),
            None => Ok(None),
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<ModelPage> {
        tracing::debug!("fetching model page {}", url);
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .optional_bearer_auth(self.token.as_deref())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(transport::status_error(url, resp).await.into());
        }
        let next = resp
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_link_next);
        let models: Vec<ModelSummary> = resp.json().await?;
        Ok(ModelPage { models, next })
    }

    /// Names of the `.gguf` files in a model repository, in Hub order.
    pub async fn list_files(&self, model_id: &str) -> Result<Vec<String>> {
        let url = self.model_api_url(model_id)?;
        let url_str = url.to_string();
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .optional_bearer_auth(self.token.as_deref())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(transport::status_error(&url_str, resp).await.into());
        }
        let detail: ModelDetail = resp.json().await?;
        Ok(gguf_files(detail))
    }

    /// Download URL of one file in a model repository.
    pub fn file_url(&self, model_id: &str, filename: &str) -> Result<Url> {
        transport::resolve_url(&self.endpoint, model_id, filename)
    }
}

fn gguf_files(detail: ModelDetail) -> Vec<String> {
    detail
        .siblings
        .into_iter()
        .map(|s| s.rfilename)
        .filter(|name| name.to_lowercase().ends_with(".gguf"))
        .collect()
}
