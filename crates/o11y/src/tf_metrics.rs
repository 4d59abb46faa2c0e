use std::net::SocketAddr;
use std::time::Duration;

use axum::{Router, routing::get};
use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tokio::net::TcpListener;

use crate::O11yError;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone, Debug)]
pub struct Config {
    pub enable: bool,
    /// Standalone `/metrics` listener. `None` when the control API serves
    /// [`router_with_metrics`] itself.
    pub http_listener: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: true,
            http_listener: None,
        }
    }
}

pub fn init(cfg: &Config) -> Result<(), O11yError> {
    if !cfg.enable {
        return Ok(());
    }

    HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| O11yError::Recorder(e.to_string()))
    })?;
    describe_metrics();

    if let Some(addr) = cfg.http_listener {
        tokio::spawn(serve(addr));
    }
    Ok(())
}

async fn serve(addr: SocketAddr) {
    let mut tries = 0;
    loop {
        match TcpListener::bind(addr).await {
            Ok(l) => {
                tracing::info!(%addr, "metrics listener started");
                if let Err(e) = axum::serve(l, router_with_metrics()).await {
                    tracing::error!(error = %e, "metrics listener stopped");
                }
                break;
            }
            Err(e) if tries < 5 => {
                tries += 1;
                tracing::warn!(error = %e, tries, "metrics listener bind failed; retrying");
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "metrics listener failed; giving up");
                break;
            }
        }
    }
}

/// Renders the current snapshot in Prometheus text format.
pub async fn metrics_handler() -> String {
    HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_else(|| "# recorder not installed\n".into())
}

pub fn router_with_metrics() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub fn describe_metrics() {
    describe_gauge!(
        "tierforge_engine_running",
        Unit::Count,
        "Engines currently running"
    );
    describe_counter!(
        "tierforge_triggers_total",
        Unit::Count,
        "Trigger cycles executed, by outcome"
    );
    describe_counter!(
        "tierforge_source_rows_total",
        Unit::Count,
        "Rows read from the source table"
    );
    describe_counter!(
        "tierforge_sink_rows_total",
        Unit::Count,
        "Rows committed to a sink's target table"
    );
    describe_counter!(
        "tierforge_sink_errors_total",
        Unit::Count,
        "Sink failures, by error kind"
    );
    describe_counter!(
        "tierforge_offset_commits_total",
        Unit::Count,
        "Offsets durably recorded per sink"
    );
    describe_gauge!(
        "tierforge_sink_offset",
        Unit::Count,
        "Last committed source offset per sink"
    );
    describe_histogram!(
        "tierforge_stage_latency_seconds",
        Unit::Seconds,
        "Latency of read, project, commit and checkpoint stages"
    );
    describe_counter!(
        "tierforge_panics_total",
        Unit::Count,
        "Panics captured by the process hook"
    );
}
