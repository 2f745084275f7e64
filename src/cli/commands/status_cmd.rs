//! Status command: effective configuration plus the store record count.

use console::style;

use crate::config::Config;
use crate::store::{JobStore, RedisStore};

pub async fn cmd_status(config: Config) -> anyhow::Result<()> {
    println!("{}", style("gigwatch configuration").bold());
    println!("  site:     {}", config.site.base_url);
    println!("  listing:  {}", config.site.jobs_url);
    println!("  instance: {}", config.parity);
    println!("  health:   {}", config.health_addr);
    println!(
        "  store:    {} (prefix: {})",
        config.store.url, config.store.key_prefix
    );
    println!(
        "  batching: {} records, ttl {}s",
        config.store.batch_size, config.store.record_ttl_secs
    );
    println!("  headless: {}", config.browser.headless);
    match &config.site.credentials {
        Some(credentials) => println!("  login:    {}", credentials.user),
        None => println!("  login:    {}", style("not configured").yellow()),
    }

    match RedisStore::connect(&config.store).await {
        Ok(store) => {
            let keys = store.list_keys().await?;
            println!(
                "\n{} store reachable, {} records held",
                style("✓").green(),
                keys.len()
            );
            store.disconnect().await;
        }
        Err(err) => {
            println!("\n{} store unreachable: {}", style("✗").red(), err);
        }
    }
    Ok(())
}
