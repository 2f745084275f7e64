//! Main daemon command: scheduler, health endpoint, signal handling.

use std::sync::Arc;

use console::style;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::browser::{Pacing, Session};
use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::scrape::{Pipeline, PipelineError};
use crate::server::{self, AppStatus};
use crate::store::{JobStore, RedisStore};

/// Runs until a shutdown signal arrives or the pipeline dies fatally. A
/// fatal error still winds everything down before the non-zero exit.
pub async fn cmd_run(config: Config) -> anyhow::Result<()> {
    config.require_credentials()?;

    let store: Arc<dyn JobStore> = Arc::new(RedisStore::connect(&config.store).await?);
    let status = Arc::new(AppStatus::new(config.parity));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_task = tokio::spawn(server::serve(
        config.health_addr,
        status.clone(),
        shutdown_rx.clone(),
    ));

    let session = Session::new(
        config.browser.clone(),
        config.retry,
        config.site.clone(),
        Pacing::new(&config.pacing),
    );
    let pipeline = Arc::new(Pipeline::new(config.clone(), session, store.clone()));
    let scheduler = Scheduler::new(config.parity, pipeline, status);

    println!(
        "{} gigwatch daemon starting (instance: {}, health: {})",
        style("→").cyan(),
        config.parity,
        config.health_addr
    );

    let mut scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let result = tokio::select! {
        finished = &mut scheduler_task => flatten(finished),
        _ = shutdown_signal() => {
            info!("shutdown signal received, winding down");
            let _ = shutdown_tx.send(true);
            flatten(scheduler_task.await)
        }
    };

    // Covers the fatal-error path, where nothing has flipped the flag yet.
    let _ = shutdown_tx.send(true);
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "health server ended with an error"),
        Err(join_err) => warn!(error = %join_err, "health server task panicked"),
    }
    store.disconnect().await;

    match result {
        Ok(()) => {
            println!("{} gigwatch stopped", style("✓").green());
            Ok(())
        }
        Err(err) => {
            println!("{} gigwatch stopped after a fatal error", style("✗").red());
            Err(err)
        }
    }
}

fn flatten(joined: Result<Result<(), PipelineError>, JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok(result) => result.map_err(Into::into),
        Err(join_err) => Err(anyhow::anyhow!("scheduler task panicked: {join_err}")),
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
