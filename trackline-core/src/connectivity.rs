//! Network reachability
//!
//! The flush coordinator asks a [`ConnectionMonitor`] before touching the
//! store; an unreachable network turns the pass into a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

/// Reports whether the collection endpoint can currently be reached.
#[async_trait]
pub trait ConnectionMonitor: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachability reported by the host application.
///
/// Useful when the platform already tracks connectivity and pushes changes.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Update the reported state
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            tracing::info!(online, "Connectivity changed");
        }
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConnectionMonitor for StaticConnectivity {
    async fn is_reachable(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Checks the server with a lightweight HEAD request.
///
/// Any HTTP response counts as reachable, whatever its status; only a
/// transport failure (DNS, refused connection, timeout) counts as offline.
pub struct HeadConnectivity {
    http_client: reqwest::Client,
    check_url: String,
}

impl HeadConnectivity {
    pub fn new(base_url: &str, timeout: Duration) -> crate::error::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                crate::error::Error::Config(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            check_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ConnectionMonitor for HeadConnectivity {
    async fn is_reachable(&self) -> bool {
        match self.http_client.head(&self.check_url).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %self.check_url, error = %e, "Connectivity check failed");
                false
            }
        }
    }
}
