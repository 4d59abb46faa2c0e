//! Logging, metrics and panic reporting for tierforge processes.

use thiserror::Error;

pub mod logging;
pub mod panic;
pub mod tf_metrics;

#[derive(Debug, Error)]
pub enum O11yError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error("failed to install metrics recorder: {0}")]
    Recorder(String),
}

/// Top-level config for observability.
#[derive(Clone, Debug)]
pub struct O11yConfig {
    pub logging: logging::Config,
    pub metrics: tf_metrics::Config,
    pub install_panic_hook: bool,
}

impl Default for O11yConfig {
    fn default() -> Self {
        Self {
            logging: logging::Config::default(),
            metrics: tf_metrics::Config::default(),
            install_panic_hook: true,
        }
    }
}

pub fn init_all(cfg: &O11yConfig) -> Result<(), O11yError> {
    logging::init(&cfg.logging)?;
    tf_metrics::init(&cfg.metrics)?;
    if cfg.install_panic_hook {
        panic::install_hook();
    }
    Ok(())
}
