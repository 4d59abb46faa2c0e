//! Engine state published for the control API.

use std::fmt;

use rest_api::{EngineInfo, SinkInfo};
use tierforge_core::Offset;

/// Scheduler states. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Triggered,
    Reading,
    Projecting,
    Committing,
    AwaitingInterval,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Triggered => "triggered",
            EngineState::Reading => "reading",
            EngineState::Projecting => "projecting",
            EngineState::Committing => "committing",
            EngineState::AwaitingInterval => "awaiting_interval",
            EngineState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkHealth {
    Active,
    /// Waiting out a transient failure.
    Backoff,
    /// Excluded from future triggers.
    Failed,
}

impl SinkHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkHealth::Active => "active",
            SinkHealth::Backoff => "backoff",
            SinkHealth::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStatus {
    pub id: String,
    pub target: String,
    pub offset: Offset,
    pub health: SinkHealth,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub rows_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub name: String,
    pub source: String,
    pub state: EngineState,
    pub triggers: u64,
    pub sinks: Vec<SinkStatus>,
    pub error: Option<String>,
}

impl EngineStatus {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            state: EngineState::Idle,
            triggers: 0,
            sinks: Vec::new(),
            error: None,
        }
    }

    pub fn sink(&self, id: &str) -> Option<&SinkStatus> {
        self.sinks.iter().find(|s| s.id == id)
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            name: self.name.clone(),
            state: self.state.to_string(),
            source: self.source.clone(),
            triggers: self.triggers,
            sinks: self
                .sinks
                .iter()
                .map(|s| SinkInfo {
                    id: s.id.clone(),
                    target: s.target.clone(),
                    offset: s.offset.0,
                    health: s.health.as_str().to_string(),
                    consecutive_failures: s.consecutive_failures,
                    last_error: s.last_error.clone(),
                    rows_written: s.rows_written,
                })
                .collect(),
            error: self.error.clone(),
        }
    }
}
