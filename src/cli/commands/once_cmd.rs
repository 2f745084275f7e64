//! Single-cycle command, mainly for smoke-testing a deployment.

use std::sync::Arc;

use console::style;

use crate::browser::{Pacing, Session};
use crate::config::Config;
use crate::scrape::Pipeline;
use crate::store::{JobStore, RedisStore};

pub async fn cmd_once(config: Config) -> anyhow::Result<()> {
    config.require_credentials()?;

    let store: Arc<dyn JobStore> = Arc::new(RedisStore::connect(&config.store).await?);
    let session = Session::new(
        config.browser.clone(),
        config.retry,
        config.site.clone(),
        Pacing::new(&config.pacing),
    );
    let pipeline = Pipeline::new(config, session, store.clone());

    println!("{} running one capture cycle", style("→").cyan());
    let stats = pipeline.run_once().await?;
    store.disconnect().await;

    println!(
        "{} cycle finished: {} found, {} captured, {} skipped, {} failed",
        style("✓").green(),
        stats.found,
        stats.captured,
        stats.skipped,
        stats.failed
    );
    Ok(())
}
