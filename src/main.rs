//! gigwatch - job-board capture under hostile conditions.
//!
//! Watches a job board for new postings: logs in with a real browser,
//! captures details through redundant strategies, and stores records with a
//! TTL so two alternating instances can cover the clock between them.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gigwatch::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "gigwatch=debug"
    } else {
        "gigwatch=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
