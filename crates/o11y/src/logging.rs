use once_cell::sync::OnceCell;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt,
};

use crate::O11yError;

static INIT: OnceCell<()> = OnceCell::new();

#[derive(Clone, Debug)]
pub struct Config {
    /// A bare level such as "info" or a full filter directive like
    /// "info,tierforge=debug,tables=warn". `RUST_LOG` takes precedence.
    pub level: Option<String>,
    /// JSON lines instead of human-readable text.
    pub json: bool,
    pub with_targets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: Some("info".to_owned()),
            json: false,
            with_targets: false,
        }
    }
}

/// Build the filter: `RUST_LOG` first, then the configured level.
pub fn filter(cfg: &Config) -> Result<EnvFilter, O11yError> {
    if let Ok(f) = EnvFilter::try_from_default_env() {
        return Ok(f);
    }
    let level = cfg.level.as_deref().unwrap_or("info");
    EnvFilter::try_new(level).map_err(|e| O11yError::Filter(e.to_string()))
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(cfg: &Config) -> Result<(), O11yError> {
    INIT.get_or_try_init(|| {
        let _ = LogTracer::init();

        let fmt_layer = if cfg.json {
            fmt::layer()
                .with_target(cfg.with_targets)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .boxed()
        } else {
            fmt::layer().with_target(cfg.with_targets).boxed()
        };

        let subscriber = Registry::default().with(filter(cfg)?).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| O11yError::Subscriber(e.to_string()))
    })?;
    Ok(())
}
