use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rest_api::{AppState, router};
use runner::{EngineManager, spawn_engine};
use tables::{build_table_store, provision_tables};
use tierforge_config::{EngineSpec, StoreCfg, load_cfg};
use tierforge_core::ArcDynTableStore;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

mod version;

#[derive(Parser, Debug)]
#[command(name = "tierforge", version = version::VERSION, about = "Incremental bronze to silver table normalization")]
struct Args {
    /// Engine spec file, or a directory of `.yaml` specs.
    #[arg(short, long)]
    config: PathBuf,

    #[arg(long, default_value = "0.0.0.0:8080")]
    api_addr: SocketAddr,

    /// Extra standalone `/metrics` listener. The API serves `/metrics` too.
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    #[arg(long)]
    log_json: bool,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = o11y::O11yConfig {
        logging: o11y::logging::Config {
            level: Some(args.log_level.clone()),
            json: args.log_json,
            with_targets: false,
        },
        metrics: o11y::tf_metrics::Config {
            enable: true,
            http_listener: args.metrics_addr,
        },
        install_panic_hook: true,
    };
    o11y::init_all(&cfg).context("initialising observability")?;
    println!("{}", version::startup_banner());

    let specs = load_specs(&args.config)?;
    let manager = EngineManager::new();
    let mut stores: HashMap<StoreCfg, ArcDynTableStore> = HashMap::new();

    for spec in &specs {
        let store = match stores.get(&spec.spec.store) {
            Some(store) => store.clone(),
            None => {
                let store = build_table_store(&spec.spec.store)
                    .with_context(|| format!("opening table store for {}", spec.name()))?;
                stores.insert(spec.spec.store.clone(), store.clone());
                store
            }
        };
        provision_tables(&store, &spec.spec.tables)
            .await
            .with_context(|| format!("provisioning tables for {}", spec.name()))?;

        let handle = spawn_engine(spec, store)
            .await
            .with_context(|| format!("starting engine {}", spec.name()))?;
        manager.insert(handle)?;
    }

    let app = router(AppState {
        controller: Arc::new(manager.clone()),
    })
    .merge(o11y::tf_metrics::router_with_metrics());

    let listener = TcpListener::bind(args.api_addr)
        .await
        .with_context(|| format!("binding api listener on {}", args.api_addr))?;
    info!(addr = %args.api_addr, "api listening");

    let api_stop = CancellationToken::new();
    let api = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(api_stop.clone().cancelled_owned())
            .into_future(),
    );

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            info!("shutdown requested");
        }
        _ = manager.wait_all() => {
            info!("all engines stopped");
        }
    }

    let res = manager.shutdown().await;
    if let Err(e) = &res {
        error!(error = ?e, "engine failure");
    }

    api_stop.cancel();
    api.await.context("api task")?.context("api server")?;
    res
}

fn load_specs(path: &Path) -> Result<Vec<EngineSpec>> {
    let specs = load_cfg(path)
        .with_context(|| format!("loading engine specs from {}", path.display()))?;
    anyhow::ensure!(!specs.is_empty(), "no engine specs found in {}", path.display());
    info!(specs_found = specs.len(), "engine specs loaded");
    debug!(engine_specs = ?specs, "engine specs");
    Ok(specs)
}
