//! Flush pipeline
//!
//! - [`policy`]: per-record retry and drop decisions
//! - [`coordinator`]: one drain pass over the event store
//! - [`trigger`]: background worker deciding when a pass runs

pub mod coordinator;
pub mod policy;
pub mod trigger;

pub use coordinator::{FlushCoordinator, FlushListener, FlushState};
pub use policy::{Disposition, FlushOutcome, RetryPolicy};
pub use trigger::FlushScheduler;

use serde::{Deserialize, Serialize};

/// When pending events are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Only on explicit request
    Manual,
    /// On a fixed timer
    Periodic,
    /// When the host application moves to the background
    AppClose,
    /// After every tracked event
    #[default]
    Immediate,
}

impl FlushMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushMode::Manual => "manual",
            FlushMode::Periodic => "periodic",
            FlushMode::AppClose => "app_close",
            FlushMode::Immediate => "immediate",
        }
    }
}

impl std::fmt::Display for FlushMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlushMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(FlushMode::Manual),
            "periodic" => Ok(FlushMode::Periodic),
            "app_close" => Ok(FlushMode::AppClose),
            "immediate" => Ok(FlushMode::Immediate),
            _ => Err(format!("unknown flush mode: {}", s)),
        }
    }
}

/// Host application lifecycle transitions relevant to flushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Background,
    Foreground,
}
