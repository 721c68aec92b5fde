//! # trackline-core
//!
//! Durable event tracking with at-least-once delivery.
//!
//! This library provides:
//! - A SQLite-backed queue of pending events that survives restarts
//! - Endpoint resolution for the collection API
//! - A flush pipeline with bounded per-event retries
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  add   ┌──────────┐  all/update/remove  ┌──────────────────┐  POST  ┌────────┐
//! │ Tracker  │ ─────► │ Database │ ◄────────────────── │ FlushCoordinator │ ─────► │ Sender │
//! └──────────┘        └──────────┘                     └──────────────────┘        └────────┘
//!      │ triggers                                               ▲
//!      ▼                                                        │
//! ┌────────────────┐                                            │
//! │ FlushScheduler │ ───────────────────────────────────────────┘
//! └────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use trackline_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Inspect the pending queue
//! let db = Database::open(&config.resolved_database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! println!("{} events pending", db.count().expect("failed to count events"));
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use connectivity::{ConnectionMonitor, HeadConnectivity, StaticConnectivity};
pub use db::Database;
pub use endpoint::Operation;
pub use error::{Error, Result};
pub use flush::{
    AppLifecycle, FlushCoordinator, FlushMode, FlushOutcome, FlushScheduler, FlushState,
};
pub use sender::{HttpSender, SendOutcome, Sender};
pub use tracker::Tracker;
pub use types::*;

// Public modules
pub mod config;
pub mod connectivity;
pub mod db;
pub mod endpoint;
pub mod error;
pub mod flush;
pub mod logging;
pub mod sender;
pub mod tracker;
pub mod types;
