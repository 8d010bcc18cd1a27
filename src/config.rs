// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistent configuration.
//!
//! Stored as JSON at `~/.ggufetch/config.json`. Every field has a default so a
//! missing file, or a file written by an older version, still loads.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Hub endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Context length used for KV-cache estimates.
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;

/// Timeout for size probes, metadata windows and catalog calls.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 15;

/// Timeout for a single download chunk.
pub const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 120;

/// Bytes requested per download chunk (4 MiB).
pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: u64 = 4 << 20;

/// Bytes requested per metadata window (256 KiB).
pub const DEFAULT_WINDOW_SIZE: usize = 1 << 18;

/// Environment variable holding the access token.
pub const TOKEN_ENV: &str = "HF_TOKEN";

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    /// Bearer token attached to every request when present.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    /// Root directory for downloaded files (defaults to `~/.ggufetch/models`).
    #[serde(default)]
    pub models_dir: Option<PathBuf>,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
    #[serde(default = "default_download_chunk_size")]
    pub download_chunk_size: u64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_context_size() -> u32 {
    DEFAULT_CONTEXT_SIZE
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

fn default_chunk_timeout_secs() -> u64 {
    DEFAULT_CHUNK_TIMEOUT_SECS
}

fn default_download_chunk_size() -> u64 {
    DEFAULT_DOWNLOAD_CHUNK_SIZE
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            endpoint: default_endpoint(),
            context_size: DEFAULT_CONTEXT_SIZE,
            models_dir: None,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            chunk_timeout_secs: DEFAULT_CHUNK_TIMEOUT_SECS,
            download_chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// Directory holding the config file and, by default, downloaded models.
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".ggufetch"))
}

/// Path of the config file.
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

impl Config {
    /// Load from the default location and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_env(std::env::var(TOKEN_ENV).ok());
        Ok(config)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// A non-empty environment token replaces the file token.
    pub fn apply_env(&mut self, env_token: Option<String>) {
        if let Some(token) = env_token.filter(|t| !t.trim().is_empty()) {
            self.token = Some(token.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.context_size == 0 {
            bail!("context_size must be greater than zero");
        }
        if self.download_chunk_size == 0 || self.window_size == 0 {
            bail!("download_chunk_size and window_size must be greater than zero");
        }
        if self.probe_timeout_secs == 0 || self.chunk_timeout_secs == 0 {
            bail!("timeouts must be greater than zero");
        }
        if self.endpoint.trim().is_empty() {
            bail!("endpoint must not be empty");
        }
        Ok(())
    }

    /// Token as an `Option<&str>`, ignoring blank values.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_secs)
    }

    /// Resolved root for downloads.
    pub fn models_root(&self) -> Result<PathBuf> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_dir()?.join("models")),
        }
    }
}
