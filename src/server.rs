//! Health endpoint.
//!
//! One JSON route so an orchestrator can tell a live instance from a wedged
//! one, and an idle-parity instance from an active one. Everything else
//! about the process is observable through logs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

use crate::scheduler::Parity;

/// Process-level status shared by the scheduler and the health route.
pub struct AppStatus {
    parity: Parity,
    active: AtomicBool,
    started: Instant,
}

impl AppStatus {
    pub fn new(parity: Parity) -> Self {
        Self {
            parity,
            active: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn parity(&self) -> Parity {
        self.parity
    }

    /// Flipped by the scheduler on window transitions.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

pub fn create_router(status: Arc<AppStatus>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(status)
}

/// Serves the router until the shutdown flag flips (or its sender drops).
pub async fn serve(
    addr: SocketAddr,
    status: Arc<AppStatus>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(status);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("health endpoint listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;
    Ok(())
}

async fn health(State(status): State<Arc<AppStatus>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "instance": status.parity().as_str(),
        "active": status.is_active(),
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": status.uptime_secs(),
        "memory": memory_rss_bytes(),
    }))
}

/// Resident set size from `/proc/self/statm` (second field, in pages).
#[cfg(target_os = "linux")]
fn memory_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // Page size is 4 KiB on every target this runs on.
    Some(resident_pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn memory_rss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    async fn get_health(app: Router) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_instance_and_idle_state() {
        let status = Arc::new(AppStatus::new(Parity::Odd));
        let (code, json) = get_health(create_router(status)).await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["instance"], "odd");
        assert_eq!(json["active"], false);
        assert!(json["uptime_secs"].is_u64());
        assert!(json.get("memory").is_some());
    }

    #[tokio::test]
    async fn health_tracks_the_active_flag() {
        let status = Arc::new(AppStatus::new(Parity::Even));
        status.set_active(true);
        let (_, json) = get_health(create_router(status.clone())).await;
        assert_eq!(json["active"], true);

        status.set_active(false);
        let (_, json) = get_health(create_router(status)).await;
        assert_eq!(json["active"], false);
    }

    #[tokio::test]
    async fn unknown_routes_are_not_found() {
        let status = Arc::new(AppStatus::new(Parity::Even));
        let response = create_router(status)
            .oneshot(Request::builder().uri("/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
