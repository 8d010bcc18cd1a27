// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures_util::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

use ggufetch::config::{self, Config};
use ggufetch::catalog::DEFAULT_SEARCH_LIMIT;
use ggufetch::download::{DownloadJob, DownloadManager, DownloadOutcome, DownloadStatus};
use ggufetch::{
    describe, format_bytes, local_model_path, mask_sensitive, transport, Error, HubClient,
    MemoryEstimate, UsageEstimator,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable overriding the log level.
const LOG_ENV: &str = "GGUFETCH_LOG";

/// Exit codes following sysexits.h conventions
mod exit_codes {
    /// General error - unspecified error
    pub const ERROR: i32 = 1;
    /// Data error - remote file is not usable GGUF
    pub const DATA_ERR: i32 = 65;
    /// I/O error - network or file operation failed
    pub const IO_ERR: i32 = 74;
    /// Configuration error - invalid config file or overrides
    pub const CONFIG: i32 = 78;
}

use exit_codes::*;

/// Spinner helpers for consistent progress indicators
mod spinner {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::time::Duration;

    pub fn create(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner()
            .tick_chars(concat!(
                "\u{28FB}\u{28F9}\u{28FC}\u{28F8}\u{28FE}",
                "\u{28F6}\u{28F7}\u{28E7}\u{28CF}\u{28DF} "
            ))
            .template("{spinner:.cyan} {msg}")
        {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    }

    pub fn clear(spinner: &ProgressBar) {
        spinner.finish_and_clear();
    }
}

/// ggufetch - inspect and download remote GGUF models.
#[derive(Parser)]
#[command(name = "ggufetch")]
#[command(version = VERSION)]
#[command(about = "Inspect and download remote GGUF model files.")]
#[command(long_about = "ggufetch - remote GGUF inspection\n\n\
    Search models:              ggufetch search llama\n\
    List files with estimates:  ggufetch files TheBloke/Llama-2-7B-GGUF\n\
    Inspect one file:           ggufetch inspect TheBloke/Llama-2-7B-GGUF llama-2-7b.Q4_K_M.gguf\n\
    Download:                   ggufetch download TheBloke/Llama-2-7B-GGUF llama-2-7b.Q4_K_M.gguf\n\
    Show config:                ggufetch config\n\n\
    Estimates read only the metadata header through HTTP range requests.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Access token for gated or private repositories (overrides HF_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Context length in tokens used for the KV cache estimate
    #[arg(short = 'c', long, global = true)]
    context: Option<u32>,

    /// Quiet mode: warnings and errors only
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search GGUF text-generation models, most trending first
    ///
    /// Examples:
    ///   ggufetch search llama
    ///   ggufetch search qwen --limit 10 --pages 3
    #[command(alias = "s")]
    Search {
        /// Search term; omit to list trending models
        #[arg(default_value = "")]
        query: String,
        /// Models per page
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: u32,
        /// Number of pages to fetch by following the server's next links
        #[arg(short, long, default_value_t = 1)]
        pages: u32,
    },

    /// List the GGUF files of a model with quantization and memory estimate
    ///
    /// Examples:
    ///   ggufetch files TheBloke/Llama-2-7B-GGUF
    ///   ggufetch files bartowski/Qwen2.5-7B-Instruct-GGUF --context 8192
    #[command(alias = "ls")]
    Files {
        /// Model id, e.g. `TheBloke/Llama-2-7B-GGUF`
        model: String,
    },

    /// Show decoded parameters and the memory estimate for one file
    Inspect {
        model: String,
        file: String,
    },

    /// Download one or more files of a model concurrently
    ///
    /// Files already present at the destination are skipped.
    #[command(alias = "dl")]
    Download {
        model: String,
        #[arg(required = true)]
        files: Vec<String>,
        /// Destination root (defaults to models_dir from config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else if quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };
    let filter = std::env::var(LOG_ENV)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(token) = cli.token.as_ref().filter(|t| !t.trim().is_empty()) {
        config.token = Some(token.trim().to_string());
    }
    if let Some(context) = cli.context {
        config.context_size = context;
    }
    config.validate()?;
    Ok(config)
}

/// Exit code for a failed command.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<Error>() {
        Some(Error::Format(_)) | Some(Error::IncompleteMetadata) => DATA_ERR,
        Some(Error::Transport(_)) | Some(Error::SizeUnknown { .. }) | Some(Error::Io { .. }) => {
            IO_ERR
        }
        None => ERROR,
    }
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<Error>() {
        Some(lib_err) => eprint!("{}", describe(lib_err).red()),
        None => eprintln!("{} {:#}", "[✗]".red(), err),
    }
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "[✗] Invalid configuration:".red(), e);
            std::process::exit(CONFIG);
        }
    };

    let result = match cli.command {
        Commands::Config => show_config(&config),
        command => tokio::runtime::Runtime::new()
            .context("Failed to start async runtime")
            .and_then(|rt| rt.block_on(run_async(command, config))),
    };

    if let Err(e) = result {
        report(&e);
        std::process::exit(exit_code(&e));
    }
}

async fn run_async(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Search { query, limit, pages } => search(&config, &query, limit, pages).await,
        Commands::Files { model } => list_files(&config, &model).await,
        Commands::Inspect { model, file } => inspect(&config, &model, &file).await,
        Commands::Download { model, files, dir } => download(&config, &model, files, dir).await,
        Commands::Config => show_config(&config),
    }
}

/// Estimate one remote file on the blocking pool.
async fn estimate_file(config: &Config, url: String, filename: String) -> Result<MemoryEstimate> {
    let token = config.token().map(str::to_string);
    let timeout = config.probe_timeout();
    let context_size = config.context_size;
    let window_size = config.window_size;

    let estimate = tokio::task::spawn_blocking(move || -> ggufetch::Result<MemoryEstimate> {
        let client = transport::blocking_client(timeout)?;
        UsageEstimator::new(client, token, context_size)
            .with_window_size(window_size)
            .estimate(&url, &filename)
    })
    .await
    .context("Estimate task panicked")??;
    Ok(estimate)
}

fn hub_client(config: &Config) -> Result<HubClient> {
    let client = transport::async_client(config.probe_timeout())?;
    Ok(HubClient::new(client, config.endpoint.clone(), config.token().map(str::to_string)))
}

async fn search(config: &Config, query: &str, limit: u32, pages: u32) -> Result<()> {
    let hub = hub_client(config)?;

    let spinner = spinner::create("Searching models...");
    let first = hub.search_models(query, limit).await;
    spinner::clear(&spinner);
    let mut page = first?;

    if page.models.is_empty() {
        println!("{} No GGUF models found", "[!]".yellow());
        return Ok(());
    }

    println!("{}", format!("{:<60}  {:>10}  {:>6}", "MODEL", "DOWNLOADS", "LIKES").bold());
    for fetched in 1..=pages.max(1) {
        if fetched > 1 {
            match hub.next_page(&page).await? {
                Some(next) => page = next,
                None => break,
            }
        }
        for model in &page.models {
            println!("{:<60}  {:>10}  {:>6}", model.model_id, model.downloads, model.likes);
        }
    }

    if page.next.is_some() {
        println!("{}", "More results available, raise --pages to see them.".dimmed());
    }
    Ok(())
}

async fn list_files(config: &Config, model: &str) -> Result<()> {
    let hub = hub_client(config)?;

    let spinner = spinner::create(&format!("Listing {}...", model));
    let files = hub.list_files(model).await;
    spinner::clear(&spinner);
    let files = files?;

    if files.is_empty() {
        println!("{} No GGUF files in {}", "[!]".yellow(), model);
        return Ok(());
    }

    let spinner = spinner::create(&format!("Reading metadata of {} files...", files.len()));
    let mut tasks = Vec::with_capacity(files.len());
    for file in &files {
        let url = hub.file_url(model, file)?.to_string();
        tasks.push(estimate_file(config, url, file.clone()));
    }
    let estimates = join_all(tasks).await;
    spinner::clear(&spinner);

    let name_width = files.iter().map(|f| f.len()).max().unwrap_or(0).max(4);
    let memory_header = format!("MEMORY ({} ctx)", config.context_size);
    println!(
        "{}",
        format!("{:<name_width$}  {:<10}  {}", "FILE", "QUANT", memory_header).bold()
    );
    for (file, estimate) in files.iter().zip(estimates) {
        match estimate {
            Ok(estimate) => println!(
                "{:<name_width$}  {:<10}  {}",
                file,
                if estimate.quant.is_empty() { "-" } else { estimate.quant.as_str() },
                estimate.display()
            ),
            Err(e) => {
                tracing::debug!("estimate for {} failed: {:#}", file, e);
                let reason = format!("unavailable ({})", e).dimmed();
                println!("{:<name_width$}  {:<10}  {}", file, "-", reason);
            }
        }
    }
    Ok(())
}

async fn inspect(config: &Config, model: &str, file: &str) -> Result<()> {
    let url = transport::resolve_url(&config.endpoint, model, file)?.to_string();

    let spinner = spinner::create(&format!("Reading metadata of {}...", file));
    let estimate = estimate_file(config, url.clone(), file.to_string()).await;
    spinner::clear(&spinner);
    let estimate = estimate?;

    let p = &estimate.params;
    println!("{} {}/{}", "[✓]".green(), model, file);
    println!("  {:<18} {}", "URL:", url.dimmed());
    println!("  {:<18} {}", "Size:", format_bytes(estimate.size_bytes));
    println!(
        "  {:<18} {}",
        "Quantization:",
        if estimate.quant.is_empty() { "unknown" } else { estimate.quant.as_str() }
    );
    println!("  {:<18} {}", "Attention heads:", p.attention_heads);
    println!("  {:<18} {}", "KV heads:", p.kv_heads);
    println!("  {:<18} {}", "Layers:", p.hidden_layers);
    println!("  {:<18} {}", "Embedding length:", p.hidden_size);
    println!("  {:<18} {} tokens", "Context:", config.context_size);
    println!("  {:<18} {}", "Memory:", estimate.display().bold());
    Ok(())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

async fn download(
    config: &Config,
    model: &str,
    files: Vec<String>,
    dir: Option<PathBuf>,
) -> Result<()> {
    let root = match dir {
        Some(dir) => dir,
        None => config.models_root()?,
    };
    let client = transport::async_client(config.chunk_timeout())?;
    let token = config.token().map(str::to_string);
    let manager = DownloadManager::new(client, token, config.download_chunk_size)
        .with_probe_timeout(config.probe_timeout());

    let multi = MultiProgress::new();
    let mut handles = Vec::new();
    let mut watchers = Vec::new();

    for file in files {
        let url = transport::resolve_url(&config.endpoint, model, &file)?.to_string();
        let dest = local_model_path(&root, model, &file);
        let handle = manager.spawn(DownloadJob {
            model_id: model.to_string(),
            filename: file.clone(),
            url,
            dest,
        });

        let bar = multi.add(ProgressBar::new(0));
        bar.set_style(bar_style());
        bar.set_prefix(file);
        bar.enable_steady_tick(Duration::from_millis(100));

        let mut rx = handle.subscribe();
        watchers.push(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let progress = rx.borrow_and_update().clone();
                match progress.status {
                    DownloadStatus::Active { received, total } => {
                        bar.set_length(total);
                        bar.set_position(received);
                        let rate = [progress.speed_string(), progress.eta_string()]
                            .into_iter()
                            .flatten()
                            .collect::<Vec<_>>()
                            .join(" | ");
                        bar.set_message(rate);
                    }
                    _ => bar.set_message(progress.message.clone()),
                }
            }
            // Sender dropped: the download task has finished.
            let last = rx.borrow().clone();
            bar.finish_with_message(last.message);
        }));
        handles.push(handle);
    }

    let mut failures = Vec::new();
    for handle in handles {
        let label = handle.label.clone();
        match handle.wait().await {
            Ok(DownloadOutcome::Completed(path)) => {
                tracing::debug!("{} saved to {}", label, path.display());
            }
            Ok(DownloadOutcome::Cancelled) => failures.push((label, "cancelled".to_string())),
            Err(e) => failures.push((label, e.to_string())),
        }
    }
    join_all(watchers).await;

    if failures.is_empty() {
        println!("{} Saved under {}", "[✓]".green(), root.display());
        return Ok(());
    }
    for (label, reason) in &failures {
        eprintln!("{} {}: {}", "[✗]".red(), label, reason);
    }
    anyhow::bail!("{} of the downloads did not complete", failures.len())
}

fn show_config(config: &Config) -> Result<()> {
    let path = config::config_path()?;
    println!("{}", "Configuration".bold());
    println!("  {:<22} {}", "File:", path.display().to_string().dimmed());
    println!(
        "  {:<22} {}",
        "Token:",
        config
            .token()
            .map(|t| mask_sensitive(t, 5))
            .unwrap_or_else(|| "not set".to_string())
    );
    println!("  {:<22} {}", "Endpoint:", config.endpoint);
    println!("  {:<22} {}", "Context size:", config.context_size);
    println!("  {:<22} {}", "Models dir:", config.models_root()?.display());
    println!("  {:<22} {}s", "Probe timeout:", config.probe_timeout_secs);
    println!("  {:<22} {}s", "Chunk timeout:", config.chunk_timeout_secs);
    println!("  {:<22} {}", "Download chunk size:", format_bytes(config.download_chunk_size));
    println!("  {:<22} {}", "Metadata window:", format_bytes(config.window_size as u64));
    Ok(())
}
