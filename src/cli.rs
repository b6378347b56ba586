//! CLI argument parsing using clap.

use clap::Parser;

use crate::config::Config;

/// Bookmark enricher - proxy that answers link previews and enriches saved bookmarks
#[derive(Parser, Debug, Clone)]
#[command(name = "bookmark-enricher")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose/debug logging
    #[arg(short, long, env = "BOOKMARK_ENRICHER_VERBOSE")]
    pub verbose: bool,

    /// Base URL of the host API to forward to
    #[arg(long, env = "BOOKMARK_ENRICHER_UPSTREAM")]
    pub upstream: Option<String>,

    /// Port for the proxy (default: 3000)
    #[arg(long, default_value = "3000", env = "BOOKMARK_ENRICHER_PORT")]
    pub port: u16,

    /// Host address to bind the proxy to (default: 127.0.0.1)
    #[arg(long, default_value = "127.0.0.1", env = "BOOKMARK_ENRICHER_HOST")]
    pub host: String,

    /// Pause between enrichment steps, in milliseconds
    #[arg(long, env = "BOOKMARK_ENRICHER_SETTLE_MS")]
    pub settle_ms: Option<u64>,

    /// Timeout for fetching target pages, in seconds
    #[arg(long, env = "BOOKMARK_ENRICHER_FETCH_TIMEOUT")]
    pub fetch_timeout_secs: Option<u64>,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Defaults overridden by whatever was given on the command line
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        if let Some(upstream) = &self.upstream {
            config.upstream = upstream.clone();
        }
        if let Some(settle_ms) = self.settle_ms {
            config.settle_ms = settle_ms;
        }
        if let Some(secs) = self.fetch_timeout_secs {
            config.fetch_timeout_secs = secs;
        }
        config
    }
}
