//! Flush coordinator
//!
//! Drains the event store to the collection endpoint, one record at a time.
//!
//! ```text
//!   flush_data()
//!        │
//!        ▼
//!  ┌──────────┐  reachable?  ┌──────────────────────┐
//!  │   Idle   │ ───────────► │ CheckingConnectivity │
//!  └──────────┘              └──────────────────────┘
//!     ▲    ▲                   no │           │ yes
//!     │    └──────────────────────┘           ▼
//!     │                                 ┌──────────┐
//!     │                                 │ Draining │
//!     │                                 └──────────┘
//!     │                                       │
//!     │          ┌────────────┐               │
//!     └───────── │ Completing │ ◄─────────────┘
//!                └────────────┘
//! ```
//!
//! At most one pass runs at a time. A trigger arriving while a pass is in
//! progress returns `None` without touching the store. An offline pass
//! notifies listeners from `CheckingConnectivity` and returns to `Idle`.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use super::policy::{Disposition, FlushOutcome, RetryPolicy};
use crate::config::DeliveryTarget;
use crate::connectivity::ConnectionMonitor;
use crate::db::Database;
use crate::endpoint::Operation;
use crate::error::Error;
use crate::sender::Sender;
use crate::types::{EventId, EventRecord};

/// Completion listener. Invoked once per pass.
pub type FlushListener = Arc<dyn Fn(&FlushOutcome) + Send + Sync>;

/// Phase of the current flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlushState {
    Idle = 0,
    CheckingConnectivity = 1,
    Draining = 2,
    Completing = 3,
}

impl FlushState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => FlushState::CheckingConnectivity,
            2 => FlushState::Draining,
            3 => FlushState::Completing,
            _ => FlushState::Idle,
        }
    }
}

/// Resets the coordinator to `Idle` when a pass ends, including when the
/// pass future is dropped mid-flight.
struct PassGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.state.store(FlushState::Idle as u8, Ordering::SeqCst);
    }
}

/// Drains pending events from the store.
pub struct FlushCoordinator {
    db: Arc<Database>,
    sender: Arc<dyn Sender>,
    monitor: Arc<dyn ConnectionMonitor>,
    target: DeliveryTarget,
    policy: RetryPolicy,
    state: AtomicU8,
    listener: Mutex<Option<FlushListener>>,
    outcomes: watch::Sender<Option<FlushOutcome>>,
}

impl FlushCoordinator {
    pub fn new(
        db: Arc<Database>,
        sender: Arc<dyn Sender>,
        monitor: Arc<dyn ConnectionMonitor>,
        target: DeliveryTarget,
        max_tries: u32,
    ) -> Self {
        let (outcomes, _) = watch::channel(None);
        Self {
            db,
            sender,
            monitor,
            target,
            policy: RetryPolicy::new(max_tries),
            state: AtomicU8::new(FlushState::Idle as u8),
            listener: Mutex::new(None),
            outcomes,
        }
    }

    /// Current phase
    pub fn state(&self) -> FlushState {
        FlushState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Register the completion listener, replacing any previous one.
    pub fn set_on_flush_finish(&self, listener: FlushListener) {
        if let Ok(mut slot) = self.listener.lock() {
            *slot = Some(listener);
        }
    }

    /// Remove the completion listener.
    pub fn clear_on_flush_finish(&self) {
        if let Ok(mut slot) = self.listener.lock() {
            *slot = None;
        }
    }

    /// Receiver that observes the outcome of every completed pass.
    ///
    /// Holds `None` until the first pass completes.
    pub fn subscribe(&self) -> watch::Receiver<Option<FlushOutcome>> {
        self.outcomes.subscribe()
    }

    /// Run one flush pass.
    ///
    /// Returns `None` if a pass was already in progress.
    pub async fn flush_data(&self) -> Option<FlushOutcome> {
        if self
            .state
            .compare_exchange(
                FlushState::Idle as u8,
                FlushState::CheckingConnectivity as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            tracing::debug!("Flush already in progress, trigger coalesced");
            return None;
        }
        let _guard = PassGuard { state: &self.state };

        if !self.monitor.is_reachable().await {
            tracing::info!("Network unreachable, skipping flush");
            let outcome = FlushOutcome::offline();
            self.complete(&outcome);
            return Some(outcome);
        }

        self.set_state(FlushState::Draining);
        let outcome = self.drain().await;

        self.set_state(FlushState::Completing);
        self.complete(&outcome);
        Some(outcome)
    }

    fn set_state(&self, state: FlushState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    async fn drain(&self) -> FlushOutcome {
        let mut outcome = FlushOutcome::default();

        let snapshot = match self.db.all() {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read pending events");
                outcome.store_errors += 1;
                return outcome;
            }
        };
        outcome.snapshot = snapshot.len();
        tracing::debug!(pending = snapshot.len(), "Starting flush pass");

        for record in &snapshot {
            let disposition = self.deliver(record).await;
            self.apply(record.id, disposition, &mut outcome);
        }

        tracing::info!(
            delivered = outcome.delivered,
            pending = outcome.pending,
            dropped = outcome.dropped(),
            "Flush pass complete"
        );
        outcome
    }

    /// Attempt one record and decide what happens to it.
    async fn deliver(&self, record: &EventRecord) -> Disposition {
        let body = match record.payload.to_body() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    event_id = %record.id,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Dropping unencodable event"
                );
                return Disposition::Malformed;
            }
        };

        let url = Operation::for_event(record.event_type)
            .url(&self.target.base_url, &self.target.project_token);
        let result = self
            .sender
            .send(&url, body, &self.target.authorization)
            .await;

        if let Some(e) = result.failure() {
            tracing::debug!(
                event_id = %record.id,
                attempt = record.attempt_count + 1,
                status = ?result.status_code,
                retryable = e.is_retryable(),
                error = %e,
                "Delivery failed"
            );
        }

        let disposition = self.policy.decide(record.attempt_count, result.success);
        if let Disposition::Exhausted { attempts } = disposition {
            let e = Error::Exhausted {
                id: record.id.0,
                attempts,
            };
            tracing::warn!(event_id = %record.id, error = %e, "Dropping event");
        }
        disposition
    }

    fn apply(&self, id: EventId, disposition: Disposition, outcome: &mut FlushOutcome) {
        let stored = match disposition {
            Disposition::Retry { attempt_count } => self.db.update(id, attempt_count),
            Disposition::Delivered | Disposition::Exhausted { .. } | Disposition::Malformed => {
                self.db.remove(id).map(|_| ())
            }
        };
        if let Err(e) = stored {
            tracing::error!(event_id = %id, error = %e, "Failed to update event store");
            outcome.store_errors += 1;
        }
        outcome.record(disposition);
    }

    fn complete(&self, outcome: &FlushOutcome) {
        let listener = self.listener.lock().ok().and_then(|slot| slot.clone());
        if let Some(listener) = listener {
            listener(outcome);
        }
        self.outcomes.send_replace(Some(*outcome));
    }
}
