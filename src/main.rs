//! Bookmark enricher - proxy placed in front of a bookmarking app's API.
//!
//! Link-preview lookups are answered locally from the target page's markup;
//! successful bookmark saves are followed by a thumbnail, title and
//! description update issued through the app's own endpoints.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bookmark_enricher::cli::Args;
use bookmark_enricher::host::HttpComponentLocator;
use bookmark_enricher::server::{self, AppState};
use bookmark_enricher::{HttpTransport, MetadataExtractor, RequestInterceptor, UpdateOrchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    // Initialize logging
    init_logging(args.verbose);

    let config = Arc::new(args.config());
    info!("Forwarding to {}", config.api_base());

    let extractor = Arc::new(
        MetadataExtractor::new(&config).context("Failed to create page fetch client")?,
    );
    let transport = Arc::new(HttpTransport::new().context("Failed to create upstream client")?);
    let locator = Arc::new(HttpComponentLocator::new(config.clone())?);

    let orchestrator = Arc::new(UpdateOrchestrator::new(
        extractor.clone(),
        locator,
        config.settle_delay(),
    ));
    let (queue, worker) = orchestrator.spawn();

    let interceptor =
        Arc::new(RequestInterceptor::new(config.clone(), transport, extractor).with_enrich_queue(queue));
    let state = AppState::new(interceptor, config);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutting down...");
    };

    server::start_server(state, &args.host, args.port, shutdown).await?;

    // In-flight enrichments are abandoned on shutdown
    worker.abort();
    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}
