// ===============================
// src/main.rs
// ===============================
/*
 # harga untuk satu paste inventory (JSON report ke stdout)
 API_KEY=... cargo run --release -- price inventory.txt

 # cek resolusi nama saja (tanpa API key, tanpa fetch)
 cargo run -- resolve < inventory.txt

 # mode service
 cargo run --release -- serve --listen 0.0.0.0:9898
 curl -s -H 'X-Api-Key: ...' --data-binary @inventory.txt localhost:9898/price
 curl -s localhost:9898/metrics | grep '^items_priced_total'
*/
/*
=============================================================================
Project : item_market_pricer — async item-market pricing engine in Rust
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
License : MIT (see LICENSE)

Summary : Resolves pasted inventory text to item ids (fuzzy match), pulls
          sell listings through a token-bucket rate limiter, strips anchor
          price levels with robust statistics, classifies the book and
          recommends fast-sell / fair / greedy prices with fee-adjusted
          proceeds. CLI + HTTP service, Prometheus metrics, JSONL events.
=============================================================================
*/
mod domain;
mod config;
mod metrics;
mod recorder;
mod ratelimit;
mod parse;
mod dictionary;
mod matching;
mod stats;
mod cleaner;
mod pricing;
mod kpi;
mod fetcher;   // upstream item market (reqwest) + paging/retry
mod pipeline;
mod server;    // hyper: /price, /resolve, /metrics, /health

use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, process::ExitCode, sync::Arc};
use thiserror::Error;
use tokio::{io::AsyncReadExt, sync::mpsc, task::JoinHandle};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, Settings, Thresholds};
use crate::dictionary::Dictionary;
use crate::domain::{Credential, Event};
use crate::fetcher::{FetchError, FetchOptions, HttpQuoteSource, ListingFetcher};
use crate::matching::MatchResolver;
use crate::pipeline::Pipeline;
use crate::ratelimit::TokenBucket;

#[derive(Debug, Parser)]
#[command(name = "item_market_pricer", version, about = "Price pasted inventory against the item market")]
struct Cli {
    /// Item dictionary (JSON); overrides DICT_PATH
    #[arg(long, global = true)]
    dictionary: Option<String>,
    /// Minimum fuzzy score 0..=100; overrides FUZZY_THRESHOLD
    #[arg(long, global = true)]
    threshold: Option<u8>,
    /// Upstream API key; overrides API_KEY
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// JSONL event log; overrides RECORD_FILE
    #[arg(long, global = true)]
    record_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve, fetch and price; prints the batch report as JSON
    Price {
        /// Inventory text file (stdin when omitted)
        input: Option<PathBuf>,
    },
    /// Only resolve names to item ids
    Resolve { input: Option<PathBuf> },
    /// Run the HTTP service
    Serve {
        #[arg(long)]
        listen: Option<String>,
    },
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("read input: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("encode report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http server: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid listen address {0:?}")]
    ListenAddr(String),
}

fn apply_overrides(cli: &Cli, settings: &mut Settings) {
    if let Some(p) = &cli.dictionary {
        settings.dictionary_path = p.clone();
    }
    if let Some(t) = cli.threshold {
        settings.match_threshold = t;
    }
    if let Some(k) = cli.api_key.as_deref().and_then(Credential::new) {
        settings.api_key = Some(k);
    }
    if let Some(r) = &cli.record_file {
        settings.record_file = Some(r.clone());
    }
}

async fn read_input(input: Option<PathBuf>) -> std::io::Result<String> {
    match input {
        Some(path) => tokio::fs::read_to_string(path).await,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            Ok(text)
        }
    }
}

fn build_pipeline(
    settings: &Settings,
    thresholds: &Thresholds,
    resolver: MatchResolver,
) -> Result<(Pipeline, Option<JoinHandle<()>>), AppError> {
    let source = Arc::new(HttpQuoteSource::new(&settings.base_url, settings.request_timeout)?);
    let limiter = Arc::new(TokenBucket::per_minute(settings.rate_per_min, settings.burst));
    let fetcher = ListingFetcher::new(source, limiter, FetchOptions::from(settings));
    let pipeline = Pipeline::new(resolver, fetcher, thresholds, settings.fee_rate);

    // ---- Recorder (optional) ----
    Ok(match settings.record_file.clone() {
        Some(path) => {
            let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
            let handle = tokio::spawn(recorder::run(rec_rx, path));
            (pipeline.with_recorder(rec_tx), Some(handle))
        }
        None => (pipeline, None),
    })
}

async fn run(cli: Cli) -> Result<(), AppError> {
    // ---- Load config, CLI overrides ENV ----
    let (mut settings, thresholds) = config::load()?;
    apply_overrides(&cli, &mut settings);
    settings.validate()?;
    thresholds.validate()?;

    metrics::init();

    let dict = Dictionary::load(&settings.dictionary_path).map_err(ConfigError::from)?;
    let resolver = MatchResolver::new(Arc::new(dict), settings.match_threshold);

    match cli.command {
        Command::Resolve { input } => {
            let text = read_input(input).await?;
            let res = resolver.resolve_text(&text);
            let out = serde_json::json!({ "resolutions": res.items, "skipped_lines": res.skipped });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Price { input } => {
            let credential = settings.credential()?;
            info!(
                base_url = %settings.base_url,
                rate_per_min = settings.rate_per_min,
                burst = settings.burst,
                workers = settings.workers,
                threshold = settings.match_threshold,
                "startup config"
            );
            let text = read_input(input).await?;
            let (pipeline, recorder) = build_pipeline(&settings, &thresholds, resolver)?;
            let report = pipeline.run(&text, &credential).await;
            println!("{}", serde_json::to_string_pretty(&report)?);

            // tutup channel recorder lalu tunggu flush terakhir
            drop(pipeline);
            if let Some(h) = recorder {
                let _ = h.await;
            }
        }
        Command::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| settings.listen_addr.clone());
            let addr: SocketAddr = listen.parse().map_err(|_| AppError::ListenAddr(listen.clone()))?;
            info!(
                %addr,
                base_url = %settings.base_url,
                rate_per_min = settings.rate_per_min,
                burst = settings.burst,
                workers = settings.workers,
                "startup config"
            );
            let (pipeline, _recorder) = build_pipeline(&settings, &thresholds, resolver)?;
            server::serve(addr, Arc::new(pipeline)).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging (stderr; stdout dipakai untuk JSON report) ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "aborted");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_settings() {
        let cli = Cli::parse_from([
            "item_market_pricer", "--threshold", "70", "--api-key", "k2", "resolve", "inv.txt",
        ]);
        let mut s = config::test_settings();
        apply_overrides(&cli, &mut s);
        assert_eq!(s.match_threshold, 70);
        assert_eq!(s.credential().unwrap().expose(), "k2");
        assert!(matches!(cli.command, Command::Resolve { input: Some(_) }));
    }

    #[test]
    fn blank_api_key_flag_keeps_the_configured_one() {
        let cli = Cli::parse_from(["item_market_pricer", "--api-key", "  ", "serve"]);
        let mut s = config::test_settings();
        apply_overrides(&cli, &mut s);
        assert_eq!(s.credential().unwrap().expose(), "test-key");
    }
}
