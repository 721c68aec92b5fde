//! Tracker context
//!
//! The [`Tracker`] is the entry point for host applications. It turns
//! tracking calls into request bodies, persists them in the event store and
//! forwards triggers to the flush scheduler.
//!
//! ## Usage
//!
//! ```rust,no_run
//! # async fn run() -> trackline_core::Result<()> {
//! use trackline_core::{Config, Properties, Tracker};
//!
//! let config = Config::load()?;
//! let tracker = Tracker::from_config(&config)?;
//!
//! let mut props = Properties::new();
//! props.insert("screen".to_string(), "settings".into());
//! tracker.track_event("screen_view", props);
//!
//! let outcome = tracker.flush_data().await;
//! tracker.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Tracking calls never fail the caller. When the store cannot persist an
//! event, or the tracker has been shut down, the event is logged and dropped
//! and the call returns `None`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::config::{Config, DeliveryTarget, FlushConfig};
use crate::connectivity::{ConnectionMonitor, HeadConnectivity};
use crate::db::Database;
use crate::endpoint::Operation;
use crate::error::{Error, Result};
use crate::flush::{AppLifecycle, FlushCoordinator, FlushMode, FlushOutcome, FlushScheduler};
use crate::sender::{HttpSender, Sender};
use crate::types::{
    AttributeResult, AttributesResponse, CampaignData, CustomerAttribute, CustomerIds, EventId,
    EventType, NewEvent, NotificationData, Properties, PurchasedItem,
};

/// Settings key of the anonymous customer cookie
const COOKIE_KEY: &str = "customer_cookie";
/// Settings key of the registered customer id
const REGISTERED_KEY: &str = "customer_registered";

/// Property carrying the push notification token
const PUSH_TOKEN_PROPERTY: &str = "google_push_notification_id";

/// Event name used for push notification interactions
const PUSH_EVENT_NAME: &str = "campaign";

/// Tracking context owning the store, coordinator and scheduler.
pub struct Tracker {
    db: Arc<Database>,
    coordinator: Arc<FlushCoordinator>,
    scheduler: FlushScheduler,
    sender: Arc<dyn Sender>,
    target: DeliveryTarget,
    customer_ids: RwLock<CustomerIds>,
    running: AtomicBool,
}

impl Tracker {
    /// Build a tracker over an already migrated store.
    ///
    /// Must be called from within a tokio runtime; the flush worker is
    /// spawned on it.
    pub fn start(
        config: &FlushConfig,
        db: Arc<Database>,
        sender: Arc<dyn Sender>,
        monitor: Arc<dyn ConnectionMonitor>,
    ) -> Result<Self> {
        let target = config.target()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Config(
                "tracker must be started inside a tokio runtime".to_string(),
            ));
        }

        let customer_ids = load_customer_ids(&db)?;

        let coordinator = Arc::new(FlushCoordinator::new(
            Arc::clone(&db),
            Arc::clone(&sender),
            monitor,
            target.clone(),
            config.max_tries,
        ));
        let scheduler = FlushScheduler::spawn(
            Arc::clone(&coordinator),
            config.flush_mode,
            config.flush_period(),
        );

        tracing::info!(
            mode = %config.flush_mode,
            max_tries = config.max_tries,
            "Tracker started"
        );

        Ok(Self {
            db,
            coordinator,
            scheduler,
            sender,
            target,
            customer_ids: RwLock::new(customer_ids),
            running: AtomicBool::new(true),
        })
    }

    /// Build a tracker from configuration: SQLite store at the configured
    /// path, HTTP sender and probing connectivity monitor.
    pub fn from_config(config: &Config) -> Result<Self> {
        let target = config.flush.target()?;

        let db_path = config.resolved_database_path();
        let db = Database::open(&db_path)?;
        db.migrate()?;
        tracing::debug!(path = %db_path.display(), "Opened event store");

        let sender = HttpSender::new(config.flush.timeout())?;
        let monitor = HeadConnectivity::new(&target.base_url, config.flush.timeout())?;

        Self::start(
            &config.flush,
            Arc::new(db),
            Arc::new(sender),
            Arc::new(monitor),
        )
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the flush worker. Idempotent.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown().await;
        tracing::info!("Tracker shut down");
    }

    // ============================================
    // Tracking
    // ============================================

    /// Track an event of any type.
    ///
    /// The body shape follows the endpoint the type is routed to. For
    /// [`EventType::CampaignClick`] the name is the clicked URL.
    pub fn track(
        &self,
        event_type: EventType,
        name: &str,
        properties: Properties,
    ) -> Option<EventId> {
        let body = match Operation::for_event(event_type) {
            Operation::TrackCustomer => self.customer_body(properties),
            Operation::TrackCampaign => self.campaign_body(name, properties),
            _ => self.event_body(name, properties),
        };
        self.enqueue(event_type, body)
    }

    /// Track a custom event.
    pub fn track_event(&self, name: &str, properties: Properties) -> Option<EventId> {
        self.track(EventType::TrackEvent, name, properties)
    }

    /// Attach a registered id to the current customer and update attributes.
    pub fn identify_customer(&self, registered: &str, attributes: Properties) -> Option<EventId> {
        if let Ok(mut ids) = self.customer_ids.write() {
            ids.registered = Some(registered.to_string());
        }
        if let Err(e) = self.db.put_setting(REGISTERED_KEY, registered) {
            tracing::warn!(error = %e, "Failed to persist registered customer id");
        }
        self.track(EventType::TrackCustomer, "identify", attributes)
    }

    pub fn track_session_start(&self) -> Option<EventId> {
        self.track(EventType::SessionStart, "session_start", device_properties())
    }

    pub fn track_session_end(&self, duration: Duration) -> Option<EventId> {
        let mut props = device_properties();
        props.insert("duration".to_string(), duration.as_secs_f64().into());
        self.track(EventType::SessionEnd, "session_end", props)
    }

    /// Track the first launch, with optional install attribution.
    pub fn track_install(
        &self,
        campaign: Option<&str>,
        campaign_id: Option<&str>,
        link: Option<&str>,
    ) -> Option<EventId> {
        let mut props = device_properties();
        for (key, value) in [
            ("campaign", campaign),
            ("campaign_id", campaign_id),
            ("link", link),
        ] {
            if let Some(value) = value {
                props.insert(key.to_string(), value.into());
            }
        }
        self.track(EventType::Install, "installation", props)
    }

    pub fn track_payment(&self, item: &PurchasedItem) -> Option<EventId> {
        self.track(EventType::Payment, "payment", item.to_properties())
    }

    /// Register a push notification token for the current customer.
    pub fn track_push_token(&self, token: &str) -> Option<EventId> {
        let mut props = Properties::new();
        props.insert(PUSH_TOKEN_PROPERTY.to_string(), token.into());
        self.track(EventType::PushToken, "push_token", props)
    }

    pub fn track_delivered_push(&self, data: &NotificationData) -> Option<EventId> {
        let mut props = data.to_properties();
        props.insert("status".to_string(), "delivered".into());
        self.track(EventType::PushDelivered, PUSH_EVENT_NAME, props)
    }

    pub fn track_clicked_push(
        &self,
        data: &NotificationData,
        action_url: Option<&str>,
    ) -> Option<EventId> {
        let mut props = data.to_properties();
        props.insert("status".to_string(), "clicked".into());
        if let Some(url) = action_url {
            props.insert("url".to_string(), url.into());
        }
        self.track(EventType::PushOpened, PUSH_EVENT_NAME, props)
    }

    /// Track a click on a campaign link, keeping its UTM parameters.
    pub fn track_campaign_click(&self, url: &str) -> Option<EventId> {
        let campaign = CampaignData::from_url(url);
        if campaign.params.is_empty() {
            tracing::debug!(url, "Campaign link carries no campaign parameters");
        }
        self.track(EventType::CampaignClick, url, campaign.to_properties())
    }

    // ============================================
    // Flushing
    // ============================================

    /// Run a flush pass now and wait for it.
    ///
    /// Returns `None` if a pass was already running or the tracker is shut
    /// down.
    pub async fn flush_data(&self) -> Option<FlushOutcome> {
        if !self.is_running() {
            tracing::warn!("Tracker is shut down, flush ignored");
            return None;
        }
        self.coordinator.flush_data().await
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.scheduler.mode()
    }

    pub fn set_flush_mode(&self, mode: FlushMode) {
        self.scheduler.set_mode(mode);
    }

    pub fn set_flush_period(&self, period: Duration) {
        self.scheduler.set_period(period);
    }

    pub fn on_app_background(&self) {
        self.lifecycle(AppLifecycle::Background);
    }

    pub fn on_app_foreground(&self) {
        self.lifecycle(AppLifecycle::Foreground);
    }

    fn lifecycle(&self, transition: AppLifecycle) {
        if let Err(e) = self.scheduler.lifecycle(transition) {
            tracing::warn!(error = %e, ?transition, "Lifecycle transition ignored");
        }
    }

    /// Register the completion listener. The last registered one wins.
    pub fn set_on_flush_finish<F>(&self, listener: F)
    where
        F: Fn(&FlushOutcome) + Send + Sync + 'static,
    {
        self.coordinator.set_on_flush_finish(Arc::new(listener));
    }

    pub fn clear_on_flush_finish(&self) {
        self.coordinator.clear_on_flush_finish();
    }

    /// Observe the outcome of every completed pass.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Option<FlushOutcome>> {
        self.coordinator.subscribe()
    }

    // ============================================
    // Fetching
    // ============================================

    /// Fetch attributes of the current customer from the server.
    ///
    /// Not queued: the request is sent once, now. Results come back in
    /// request order.
    pub async fn fetch_customer_attributes(
        &self,
        attributes: &[CustomerAttribute],
    ) -> Result<Vec<AttributeResult>> {
        if !self.is_running() {
            return Err(Error::Shutdown);
        }

        let mut request = Properties::new();
        request.insert("customer_ids".to_string(), self.customer_ids_json());
        request.insert(
            "attributes".to_string(),
            attributes.iter().map(CustomerAttribute::to_json).collect(),
        );
        let body = serde_json::to_vec(&request)?;

        let url = Operation::CustomerAttributes
            .url(&self.target.base_url, &self.target.project_token);
        let result = self
            .sender
            .send(&url, body, &self.target.authorization)
            .await;
        if let Some(e) = result.failure() {
            tracing::warn!(status = ?result.status_code, error = %e, "Attribute fetch failed");
            return Err(e);
        }

        let response: AttributesResponse = serde_json::from_str(&result.response_body)?;
        if !response.success {
            return Err(Error::ServerRejection {
                status: result.status_code.unwrap_or_default(),
                body: result.response_body,
            });
        }
        tracing::debug!(count = response.results.len(), "Fetched customer attributes");
        Ok(response.results)
    }

    // ============================================
    // Queries
    // ============================================

    /// Number of events waiting for delivery
    pub fn pending_count(&self) -> Result<usize> {
        self.db.count()
    }

    pub fn customer_ids(&self) -> CustomerIds {
        self.customer_ids
            .read()
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    // ============================================
    // Request bodies
    // ============================================

    fn customer_ids_json(&self) -> Value {
        self.customer_ids().to_json()
    }

    fn customer_body(&self, properties: Properties) -> Properties {
        let mut body = Properties::new();
        body.insert("customer_ids".to_string(), self.customer_ids_json());
        body.insert("properties".to_string(), Value::Object(properties));
        body
    }

    fn event_body(&self, name: &str, properties: Properties) -> Properties {
        let mut body = self.customer_body(properties);
        body.insert("event_type".to_string(), name.into());
        body.insert("timestamp".to_string(), unix_timestamp().into());
        body
    }

    fn campaign_body(&self, url: &str, properties: Properties) -> Properties {
        let mut body = Properties::new();
        body.insert("customer_ids".to_string(), self.customer_ids_json());
        body.insert("url".to_string(), url.into());
        body.insert("properties".to_string(), Value::Object(properties));
        body.insert("timestamp".to_string(), unix_timestamp().into());
        body
    }

    fn enqueue(&self, event_type: EventType, body: Properties) -> Option<EventId> {
        if !self.is_running() {
            tracing::warn!(%event_type, "Tracker is shut down, dropping event");
            return None;
        }

        let id = match self.db.add(&NewEvent::new(event_type, body)) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(%event_type, error = %e, "Failed to store event, dropping");
                return None;
            }
        };
        tracing::debug!(event_id = %id, %event_type, "Event stored");

        if let Err(e) = self.scheduler.event_added() {
            tracing::debug!(event_id = %id, error = %e, "Flush not scheduled");
        }
        Some(id)
    }
}

/// Load the persisted customer ids, creating the cookie on first use.
fn load_customer_ids(db: &Database) -> Result<CustomerIds> {
    let cookie = match db.get_setting(COOKIE_KEY)? {
        Some(cookie) => cookie,
        None => {
            let cookie = uuid::Uuid::new_v4().to_string();
            db.put_setting(COOKIE_KEY, &cookie)?;
            tracing::info!(cookie = %cookie, "Created anonymous customer");
            cookie
        }
    };

    Ok(CustomerIds {
        registered: db.get_setting(REGISTERED_KEY)?,
        ..CustomerIds::with_cookie(cookie)
    })
}

fn device_properties() -> Properties {
    let mut props = Properties::new();
    props.insert("os_name".to_string(), std::env::consts::OS.into());
    props.insert("sdk".to_string(), "trackline".into());
    props.insert("sdk_version".to_string(), env!("CARGO_PKG_VERSION").into());
    props
}

/// Seconds since the Unix epoch with millisecond precision
fn unix_timestamp() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}
