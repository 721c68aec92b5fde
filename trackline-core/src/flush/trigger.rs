//! Flush trigger policy
//!
//! [`FlushScheduler`] owns the single background worker that runs flush
//! passes. Producers and lifecycle hooks send it triggers; the current
//! [`FlushMode`] decides which triggers start a pass.
//!
//! | Trigger            | Manual | Periodic | AppClose | Immediate |
//! |--------------------|--------|----------|----------|-----------|
//! | `request_flush`    | yes    | yes      | yes      | yes       |
//! | `event_added`      |        |          |          | yes       |
//! | background         |        |          | yes      |           |
//! | timer              |        | yes      |          |           |

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::coordinator::FlushCoordinator;
use super::{AppLifecycle, FlushMode};
use crate::error::{Error, Result};

#[derive(Debug)]
enum Command {
    Flush,
    Shutdown,
}

/// Handle to the background flush worker.
pub struct FlushScheduler {
    commands: mpsc::UnboundedSender<Command>,
    mode: watch::Sender<FlushMode>,
    period: watch::Sender<Duration>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(coordinator: Arc<FlushCoordinator>, mode: FlushMode, period: Duration) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (mode_tx, mode_rx) = watch::channel(mode);
        let (period_tx, period_rx) = watch::channel(period);

        let worker = tokio::spawn(run_worker(coordinator, command_rx, mode_rx, period_rx));

        Self {
            commands,
            mode: mode_tx,
            period: period_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Current flush mode
    pub fn mode(&self) -> FlushMode {
        *self.mode.borrow()
    }

    pub fn set_mode(&self, mode: FlushMode) {
        let previous = self.mode.send_replace(mode);
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "Flush mode changed");
        }
    }

    /// Change the periodic interval. Zero is treated as one second.
    pub fn set_period(&self, period: Duration) {
        self.period.send_replace(period.max(Duration::from_secs(1)));
    }

    pub fn period(&self) -> Duration {
        *self.period.borrow()
    }

    /// Schedule a pass regardless of mode.
    pub fn request_flush(&self) -> Result<()> {
        self.commands
            .send(Command::Flush)
            .map_err(|_| Error::Shutdown)
    }

    /// Notify that an event was stored. Returns whether a pass was scheduled.
    pub fn event_added(&self) -> Result<bool> {
        if self.mode() != FlushMode::Immediate {
            return Ok(false);
        }
        self.request_flush().map(|_| true)
    }

    /// Notify a lifecycle transition. Returns whether a pass was scheduled.
    pub fn lifecycle(&self, transition: AppLifecycle) -> Result<bool> {
        tracing::debug!(?transition, mode = %self.mode(), "Lifecycle transition");
        match transition {
            AppLifecycle::Background if self.mode() == FlushMode::AppClose => {
                self.request_flush().map(|_| true)
            }
            _ => Ok(false),
        }
    }

    /// Stop the worker, letting an in-flight pass finish first.
    pub async fn shutdown(&self) {
        let worker = match self.worker.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(worker) = worker else {
            return;
        };

        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Flush worker terminated abnormally");
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn run_worker(
    coordinator: Arc<FlushCoordinator>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut mode_rx: watch::Receiver<FlushMode>,
    mut period_rx: watch::Receiver<Duration>,
) {
    let mut mode = *mode_rx.borrow_and_update();
    let mut period = *period_rx.borrow_and_update();
    let mut timer = ticker(period);

    tracing::info!(%mode, period_secs = period.as_secs(), "Flush worker started");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Flush) => {
                    // Triggers queued behind this one are served by the same pass.
                    let mut stop = false;
                    while let Ok(queued) = commands.try_recv() {
                        if matches!(queued, Command::Shutdown) {
                            stop = true;
                        }
                    }
                    run_pass(&coordinator).await;
                    if stop {
                        break;
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            _ = timer.tick(), if mode == FlushMode::Periodic => {
                run_pass(&coordinator).await;
            }
            changed = mode_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                mode = *mode_rx.borrow_and_update();
                timer = ticker(period);
            }
            changed = period_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                period = *period_rx.borrow_and_update();
                timer = ticker(period);
            }
        }
    }

    tracing::info!("Flush worker stopped");
}

async fn run_pass(coordinator: &FlushCoordinator) {
    if coordinator.flush_data().await.is_none() {
        tracing::debug!("Scheduled flush skipped, pass already running");
    }
}
