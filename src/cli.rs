//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use twdl_core::SourceKind;
use twdl_core::fetch::DEFAULT_MAX_ATTEMPTS;

/// Resolve social-media posts into downloadable media URLs.
///
/// Each post is scraped from alternate-frontend mirrors (and optionally the
/// canonical site or a headless browser); the media URLs found are printed
/// one per line.
#[derive(Parser, Debug)]
#[command(name = "twdl")]
#[command(author, version, about)]
pub struct Args {
    /// Post URLs (shortlinks are expanded)
    pub urls: Vec<String>,

    /// Read post URLs from a file, one per line
    #[arg(short = 'l', long = "list", value_name = "FILE")]
    pub list: Option<PathBuf>,

    /// Include the author's avatar
    #[arg(short = 'a', long)]
    pub avatar: bool,

    /// Include media of quoted posts
    #[arg(short = 'u', long)]
    pub quote: bool,

    /// Use URLs as given instead of resolving redirects
    #[arg(long)]
    pub no_redirect: bool,

    /// Disable the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Log failed posts and continue with the next one
    #[arg(short = 'i', long)]
    pub ignore_errors: bool,

    /// Cookie header for authenticated scraping (falls back to TWDL_COOKIE)
    #[arg(short = 'k', long)]
    pub cookie: Option<String>,

    /// Scrapers to run, comma separated (mirror, browser, direct)
    #[arg(short = 's', long = "scraper", value_delimiter = ',', default_value = "mirror")]
    pub scrapers: Vec<SourceKind>,

    /// Use this mirror instead of a random one
    #[arg(short = 'm', long, value_name = "URL")]
    pub mirror: Option<String>,

    /// Maximum attempts per request (0 and 1 both mean a single attempt)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_ATTEMPTS as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
