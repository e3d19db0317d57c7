//! # Health Check Server
//!
//! Standardized health checking for platform services, exposed over HTTP:
//! - `/health` - basic liveness check
//! - `/ready` - readiness for traffic
//! - `/metrics` - platform metrics snapshot
//! - `/status` - detailed service status
//!
//! Grounded on `services/observability/health_check/src/lib.rs`'s
//! `ServiceHealth`/`HealthCheckServer` shape, trimmed from the teacher's
//! TLV-throughput counters (messages/sec, zero-allocation violations) to
//! the counters this platform actually emits: connector connectivity,
//! event bus consumer lag, and open executions.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use arb_health::{HealthCheckServer, ServiceHealth};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let health = ServiceHealth::new("arbitrage-engine");
//! let server = HealthCheckServer::new(health, 8001);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use chrono::{DateTime, Utc};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Service health status levels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Starting,
    Degraded,
    Unhealthy,
}

/// Per-venue connector connectivity, reported by connector-registry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectorHealth {
    pub venue: String,
    pub connected: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Platform-level metrics a service reports on its `/metrics` endpoint.
///
/// What counts as relevant varies by service: the aggregator and
/// connector-registry report `connectors`, the execution-engine reports
/// `open_executions`, every event-bus consumer reports `bus_lag`. A
/// service only populates the fields it owns; the rest stay at defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformMetrics {
    /// Per-venue connector connectivity (empty for services with no
    /// connectors of their own).
    pub connectors: Vec<ConnectorHealth>,
    /// Pending (unacked) message count per consumer group this service
    /// runs, keyed by `"{stream}:{group}"`.
    pub bus_lag: HashMap<String, u64>,
    /// Count of executions not yet in a terminal state.
    pub open_executions: u64,
    /// Opportunities scanned since startup.
    pub opportunities_scanned: u64,
}

impl Default for PlatformMetrics {
    fn default() -> Self {
        Self {
            connectors: Vec::new(),
            bus_lag: HashMap::new(),
            open_executions: 0,
            opportunities_scanned: 0,
        }
    }
}

/// Comprehensive service health information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service_name: String,
    pub status: HealthStatus,
    pub startup_time: DateTime<Utc>,
    pub last_check: DateTime<Utc>,
    pub metrics: PlatformMetrics,
    pub details: HashMap<String, String>,
    pub errors: Vec<String>,
}

impl ServiceHealth {
    pub fn new(service_name: &str) -> Self {
        let now = Utc::now();
        Self {
            service_name: service_name.to_string(),
            status: HealthStatus::Starting,
            startup_time: now,
            last_check: now,
            metrics: PlatformMetrics::default(),
            details: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn update_metrics(&mut self, metrics: PlatformMetrics) {
        self.metrics = metrics;
        self.last_check = Utc::now();
    }

    pub fn add_detail(&mut self, key: &str, value: &str) {
        self.details.insert(key.to_string(), value.to_string());
    }

    pub fn add_error(&mut self, error: &str) {
        self.errors.push(error.to_string());
        if self.errors.len() > 10 {
            self.errors.remove(0);
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_alive(&self) -> bool {
        !matches!(self.status, HealthStatus::Unhealthy)
    }

    /// Recompute `status` from the current metrics. Any connector down,
    /// or bus lag above the configured threshold, degrades the service;
    /// all connectors down makes it unhealthy.
    pub fn check_health(&mut self, max_acceptable_lag: u64) {
        self.last_check = Utc::now();
        self.errors.clear();

        let total_connectors = self.metrics.connectors.len();
        let connected = self
            .metrics
            .connectors
            .iter()
            .filter(|c| c.connected)
            .count();

        let max_lag = self.metrics.bus_lag.values().copied().max().unwrap_or(0);
        if max_lag > max_acceptable_lag {
            self.add_error(&format!(
                "event bus lag {} exceeds threshold {}",
                max_lag, max_acceptable_lag
            ));
        }

        self.status = if total_connectors > 0 && connected == 0 {
            self.add_error("no connectors are connected");
            HealthStatus::Unhealthy
        } else if connected < total_connectors || max_lag > max_acceptable_lag {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.startup_time).num_seconds().max(0)
    }
}

/// HTTP health check server.
pub struct HealthCheckServer {
    health: Arc<tokio::sync::Mutex<ServiceHealth>>,
    port: u16,
    max_acceptable_lag: u64,
}

impl HealthCheckServer {
    pub fn new(health: ServiceHealth, port: u16) -> Self {
        Self {
            health: Arc::new(tokio::sync::Mutex::new(health)),
            port,
            max_acceptable_lag: 1_000,
        }
    }

    pub fn with_lag_threshold(mut self, max_acceptable_lag: u64) -> Self {
        self.max_acceptable_lag = max_acceptable_lag;
        self
    }

    pub async fn start(&self) -> Result<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let health = Arc::clone(&self.health);
        let max_lag = self.max_acceptable_lag;

        let make_svc = make_service_fn(move |_conn| {
            let health = Arc::clone(&health);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let health = Arc::clone(&health);
                    handle_request(req, health, max_lag)
                }))
            }
        });

        let server = Server::bind(&addr).serve(make_svc);

        info!("health check server listening on http://{}", addr);
        info!("endpoints: /health, /ready, /metrics, /status");

        if let Err(e) = server.await {
            error!("health check server error: {}", e);
        }

        Ok(())
    }

    pub async fn get_health(&self) -> ServiceHealth {
        self.health.lock().await.clone()
    }

    pub async fn update_health<F>(&self, updater: F)
    where
        F: FnOnce(&mut ServiceHealth),
    {
        let mut health = self.health.lock().await;
        updater(&mut health);
    }
}

async fn handle_request(
    req: Request<Body>,
    health: Arc<tokio::sync::Mutex<ServiceHealth>>,
    max_acceptable_lag: u64,
) -> Result<Response<Body>, Infallible> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    debug!("health check request: {} {}", method, path);

    if method != Method::GET {
        return Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::from("method not allowed"))
            .unwrap());
    }

    let mut guard = health.lock().await;
    guard.check_health(max_acceptable_lag);
    let snapshot = guard.clone();
    drop(guard);

    match path.as_str() {
        "/health" => handle_health_endpoint(snapshot),
        "/ready" => handle_ready_endpoint(snapshot),
        "/metrics" => handle_metrics_endpoint(snapshot),
        "/status" => handle_status_endpoint(snapshot),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("not found"))
            .unwrap()),
    }
}

fn handle_health_endpoint(health: ServiceHealth) -> Result<Response<Body>, Infallible> {
    if health.is_alive() {
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "status": "healthy",
                    "service": health.service_name,
                    "uptime_seconds": health.uptime_seconds(),
                })
                .to_string(),
            ))
            .unwrap())
    } else {
        Ok(Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "status": "unhealthy",
                    "service": health.service_name,
                    "errors": health.errors,
                })
                .to_string(),
            ))
            .unwrap())
    }
}

fn handle_ready_endpoint(health: ServiceHealth) -> Result<Response<Body>, Infallible> {
    if health.is_ready() {
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"status": "ready", "service": health.service_name}).to_string(),
            ))
            .unwrap())
    } else {
        Ok(Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({
                    "status": "not ready",
                    "service": health.service_name,
                    "current_status": health.status,
                })
                .to_string(),
            ))
            .unwrap())
    }
}

fn handle_metrics_endpoint(health: ServiceHealth) -> Result<Response<Body>, Infallible> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_string_pretty(&health.metrics).unwrap(),
        ))
        .unwrap())
}

fn handle_status_endpoint(health: ServiceHealth) -> Result<Response<Body>, Infallible> {
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string_pretty(&health).unwrap()))
        .unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_service_health_starts_in_starting_state() {
        let health = ServiceHealth::new("test-service");
        assert_eq!(health.status, HealthStatus::Starting);
        assert!(health.is_alive());
        assert!(!health.is_ready());
    }

    #[test]
    fn all_connectors_down_is_unhealthy() {
        let mut health = ServiceHealth::new("connector-registry");
        health.metrics.connectors = vec![ConnectorHealth {
            venue: "binance".into(),
            connected: false,
            last_success: None,
            consecutive_failures: 5,
        }];
        health.check_health(1_000);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(!health.errors.is_empty());
    }

    #[test]
    fn partial_connector_outage_is_degraded_not_unhealthy() {
        let mut health = ServiceHealth::new("connector-registry");
        health.metrics.connectors = vec![
            ConnectorHealth {
                venue: "binance".into(),
                connected: true,
                last_success: Some(Utc::now()),
                consecutive_failures: 0,
            },
            ConnectorHealth {
                venue: "kraken".into(),
                connected: false,
                last_success: None,
                consecutive_failures: 3,
            },
        ];
        health.check_health(1_000);
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn excessive_bus_lag_degrades_health() {
        let mut health = ServiceHealth::new("position-manager");
        health
            .metrics
            .bus_lag
            .insert("orders.executed:position-manager".into(), 5_000);
        health.check_health(1_000);
        assert_eq!(health.status, HealthStatus::Degraded);
    }

    #[test]
    fn healthy_with_no_connectors_and_low_lag() {
        let mut health = ServiceHealth::new("arbitrage-engine");
        health.metrics.open_executions = 2;
        health.check_health(1_000);
        assert_eq!(health.status, HealthStatus::Healthy);
    }

    #[test]
    fn error_list_is_capped_at_ten() {
        let mut health = ServiceHealth::new("test-service");
        for i in 0..20 {
            health.add_error(&format!("error {}", i));
        }
        assert_eq!(health.errors.len(), 10);
        assert_eq!(health.errors[0], "error 10");
    }
}
