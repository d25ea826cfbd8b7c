//! CLI entry point for twdl.

use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::Parser;
use tracing::{debug, info, warn};
use twdl_core::config::COOKIE_ENV;
use twdl_core::{
    CacheSettings, CacheStore, FetchClient, MediaBundle, MediaDownloader, MirrorEndpoint,
    MirrorRegistry, Orchestrator, PostReference, RetrievalConfig, RetrievalResult,
    RetrievalStatus, RetryPolicy, ServiceEndpoints,
};

mod cli;

use cli::Args;

/// Prints each media URL to stdout as soon as it is known.
struct StdoutLister;

#[async_trait]
impl MediaDownloader for StdoutLister {
    async fn download(
        &self,
        media_url: &str,
        post: &PostReference,
        _bundle: &MediaBundle,
    ) -> RetrievalResult {
        println!("{media_url}");
        RetrievalResult::new(RetrievalStatus::Listed, media_url, post)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let inputs = collect_inputs(&args)?;
    if inputs.is_empty() {
        bail!("No URL is provided\n  Pass post URLs as arguments, with --list FILE, or via stdin.");
    }

    let config = RetrievalConfig {
        redirect: !args.no_redirect,
        cache: !args.no_cache,
        ignore_errors: args.ignore_errors,
        cookie: args
            .cookie
            .clone()
            .or_else(|| std::env::var(COOKIE_ENV).ok()),
        sources: args.scrapers.iter().copied().collect(),
        avatar: args.avatar,
        quote: args.quote,
        mirror_override: args.mirror.clone(),
    };

    let pinned = args
        .mirror
        .as_deref()
        .map(MirrorEndpoint::parse)
        .transpose()
        .context("Invalid --mirror value")?;
    let registry = Arc::new(MirrorRegistry::with_defaults()?.with_pinned(pinned));

    let cache_settings = CacheSettings::from_env();
    let cache = config.cache.then(|| {
        let store = Arc::new(CacheStore::new(
            cache_settings.max_entries,
            cache_settings.ttl,
        ));
        let loaded = store.load_from(&cache_settings.path);
        debug!(entries = loaded, path = %cache_settings.path.display(), "Cache loaded");
        store
    });

    let client = FetchClient::new(registry)?
        .with_cache(cache.clone())
        .with_retry_policy(RetryPolicy::with_max_attempts(u32::from(args.max_retries)));
    let orchestrator = Orchestrator::new(Arc::new(client), &ServiceEndpoints::default())
        .with_downloader(Arc::new(StdoutLister));

    let outcome = orchestrator.run_batch(&inputs, &config).await;

    if let Some(cache) = &cache {
        match cache.save_to(&cache_settings.path) {
            Ok(()) => debug!(entries = cache.len(), "Cache saved"),
            Err(error) => warn!(error = %error, "Could not save cache"),
        }
    }

    match outcome {
        Ok(results) => {
            let media: usize = results.iter().map(Vec::len).sum();
            let failed_posts = results.iter().filter(|post| post.is_empty()).count();
            info!(posts = results.len(), media, failed_posts, "Finished");
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            debug!(error = %error, "Batch aborted");
            Ok(ExitCode::from(2))
        }
    }
}

/// Gathers post URLs from arguments, the list file and piped stdin.
fn collect_inputs(args: &Args) -> Result<Vec<String>> {
    let mut inputs: Vec<String> = args.urls.clone();
    if let Some(path) = &args.list {
        inputs.extend(read_list(path)?);
    }
    if inputs.is_empty() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        inputs.extend(parse_lines(&buffer));
    }
    Ok(inputs)
}

fn read_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read URL list '{}'", path.display()))?;
    Ok(parse_lines(&text))
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}
