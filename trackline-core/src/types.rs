//! Core domain types for trackline
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event record** | One pending delivery persisted in the local store |
//! | **Event type** | The logical kind of a record; decides which endpoint receives it |
//! | **Payload** | Insertion-ordered JSON properties sent as the request body |
//! | **Customer ids** | Identifiers the server uses to attribute an event to a customer |
//! | **Flush pass** | One drain attempt over a snapshot of pending records |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Property bag attached to an event, in insertion order.
pub type Properties = serde_json::Map<String, serde_json::Value>;

// ============================================
// Event identity
// ============================================

/// Locally unique identifier of a stored event.
///
/// Backed by the SQLite rowid with `AUTOINCREMENT`, so ids are never reused
/// and sort in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================
// Event type
// ============================================

/// Logical kind of a tracked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// First launch of the host application
    Install,
    SessionStart,
    SessionEnd,
    /// Custom event emitted by the host application
    TrackEvent,
    /// Customer identification / attribute update
    TrackCustomer,
    /// Completed purchase
    Payment,
    /// Push notification token registration
    PushToken,
    PushDelivered,
    PushOpened,
    /// Click on a campaign link
    CampaignClick,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Install => "install",
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
            EventType::TrackEvent => "track_event",
            EventType::TrackCustomer => "track_customer",
            EventType::Payment => "payment",
            EventType::PushToken => "push_token",
            EventType::PushDelivered => "push_delivered",
            EventType::PushOpened => "push_opened",
            EventType::CampaignClick => "campaign_click",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(EventType::Install),
            "session_start" => Ok(EventType::SessionStart),
            "session_end" => Ok(EventType::SessionEnd),
            "track_event" => Ok(EventType::TrackEvent),
            "track_customer" => Ok(EventType::TrackCustomer),
            "payment" => Ok(EventType::Payment),
            "push_token" => Ok(EventType::PushToken),
            "push_delivered" => Ok(EventType::PushDelivered),
            "push_opened" => Ok(EventType::PushOpened),
            "campaign_click" => Ok(EventType::CampaignClick),
            _ => Err(format!("unknown event type: {}", s)),
        }
    }
}

// ============================================
// Payload
// ============================================

/// Request body of a stored event.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Decoded properties ready for delivery
    Properties(Properties),
    /// Stored text that no longer decodes to a JSON object
    Malformed(String),
}

impl Payload {
    /// Decode the stored representation.
    ///
    /// Anything that is not a JSON object becomes [`Payload::Malformed`].
    pub fn from_stored(text: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(serde_json::Value::Object(map)) => Payload::Properties(map),
            _ => Payload::Malformed(text.to_string()),
        }
    }

    /// Encode the payload into an HTTP request body.
    pub fn to_body(&self) -> Result<Vec<u8>> {
        match self {
            Payload::Properties(map) => {
                serde_json::to_vec(map).map_err(|e| Error::Serialization(e.to_string()))
            }
            Payload::Malformed(raw) => Err(Error::Serialization(format!(
                "stored payload is not a JSON object: {:.64}",
                raw
            ))),
        }
    }

    /// Properties, if the payload is well-formed
    pub fn properties(&self) -> Option<&Properties> {
        match self {
            Payload::Properties(map) => Some(map),
            Payload::Malformed(_) => None,
        }
    }
}

// ============================================
// Event records
// ============================================

/// An event handed to the store, before it has an id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub payload: Properties,
    pub created_at: DateTime<Utc>,
}

impl NewEvent {
    /// Event captured now
    pub fn new(event_type: EventType, payload: Properties) -> Self {
        Self {
            event_type,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// A pending event as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub id: EventId,
    pub event_type: EventType,
    pub payload: Payload,
    /// Delivery attempts made so far
    pub attempt_count: u32,
    /// Capture timestamp
    pub created_at: DateTime<Utc>,
}

// ============================================
// Producer-side models
// ============================================

/// Identifiers attributing an event to a customer.
///
/// Serialized as a flat JSON object, e.g. `{"cookie": "...", "registered": "..."}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerIds {
    /// Anonymous device identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    /// Identifier assigned by the host application
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered: Option<String>,
}

impl CustomerIds {
    /// Anonymous identity
    pub fn with_cookie(cookie: impl Into<String>) -> Self {
        Self {
            cookie: Some(cookie.into()),
            registered: None,
        }
    }

    /// JSON object form
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = Properties::new();
        if let Some(cookie) = &self.cookie {
            map.insert("cookie".to_string(), cookie.clone().into());
        }
        if let Some(registered) = &self.registered {
            map.insert("registered".to_string(), registered.clone().into());
        }
        serde_json::Value::Object(map)
    }
}

/// A completed purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchasedItem {
    /// Total price
    pub value: f64,
    /// ISO 4217 currency code
    pub currency: String,
    /// Store or provider that processed the payment
    pub payment_system: String,
    pub product_id: String,
    pub product_title: String,
    /// Store receipt, when available
    pub receipt: Option<String>,
}

impl PurchasedItem {
    /// Event properties for this purchase.
    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("total_price".to_string(), self.value.into());
        props.insert("currency".to_string(), self.currency.clone().into());
        props.insert(
            "payment_system".to_string(),
            self.payment_system.clone().into(),
        );
        props.insert("product_id".to_string(), self.product_id.clone().into());
        props.insert(
            "product_title".to_string(),
            self.product_title.clone().into(),
        );
        if let Some(receipt) = &self.receipt {
            props.insert("receipt".to_string(), receipt.clone().into());
        }
        props
    }
}

/// Campaign attribution carried by a push notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub campaign_id: Option<String>,
    pub campaign_name: Option<String>,
    pub action_id: Option<i64>,
}

impl NotificationData {
    /// Event properties for a push interaction.
    pub fn to_properties(&self) -> Properties {
        let mut props = Properties::new();
        if let Some(id) = &self.campaign_id {
            props.insert("campaign_id".to_string(), id.clone().into());
        }
        if let Some(name) = &self.campaign_name {
            props.insert("campaign_name".to_string(), name.clone().into());
        }
        if let Some(action_id) = self.action_id {
            props.insert("action_id".to_string(), action_id.into());
        }
        props
    }
}

// ============================================
// Customer attributes
// ============================================

/// One value requested from the customer attributes endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerAttribute {
    /// A stored customer property, by name
    Property(String),
    /// An external customer id, by id name
    Id(String),
    Segmentation(String),
    Expression(String),
    Prediction(String),
    Aggregation(String),
}

impl CustomerAttribute {
    /// Request form, e.g. `{"type": "aggregate", "id": "..."}`.
    pub fn to_json(&self) -> serde_json::Value {
        let (kind, key, value) = match self {
            CustomerAttribute::Property(name) => ("property", "property", name),
            CustomerAttribute::Id(name) => ("id", "id", name),
            CustomerAttribute::Segmentation(id) => ("segmentation", "id", id),
            CustomerAttribute::Expression(id) => ("expression", "id", id),
            CustomerAttribute::Prediction(id) => ("prediction", "id", id),
            CustomerAttribute::Aggregation(id) => ("aggregate", "id", id),
        };
        let mut map = Properties::new();
        map.insert("type".to_string(), kind.into());
        map.insert(key.to_string(), value.clone().into());
        serde_json::Value::Object(map)
    }
}

/// Result for one requested attribute, in request order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeResult {
    pub success: bool,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Response body of the customer attributes endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttributesResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub results: Vec<AttributeResult>,
}

/// Query parameters recognized as campaign attribution.
pub const CAMPAIGN_PARAMS: &[&str] = &[
    "utm_source",
    "utm_campaign",
    "utm_content",
    "utm_medium",
    "utm_term",
    "xnpe_cmp",
];

/// Campaign attribution parsed from a link.
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignData {
    pub url: String,
    /// Recognized parameters in the order they appear in the URL
    pub params: Vec<(String, String)>,
}

impl CampaignData {
    /// Parse the query string of `url`, keeping only campaign parameters.
    ///
    /// Values are percent-decoded; parameters that fail to decode are skipped.
    pub fn from_url(url: &str) -> Self {
        let query = url
            .split_once('?')
            .map(|(_, q)| q.split('#').next().unwrap_or_default())
            .unwrap_or_default();

        let params = query
            .split('&')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                if !CAMPAIGN_PARAMS.contains(&key) {
                    return None;
                }
                let spaced = value.replace('+', " ");
                let value = urlencoding::decode(&spaced).ok()?.into_owned();
                Some((key.to_string(), value))
            })
            .collect();

        Self {
            url: url.to_string(),
            params,
        }
    }

    /// Event properties for the click.
    pub fn to_properties(&self) -> Properties {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect()
    }
}
