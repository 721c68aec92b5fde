//! Endpoint resolution
//!
//! Every logical operation maps to a fixed path template with a single
//! `{token}` placeholder for the project token.

use crate::types::EventType;

/// Placeholder substituted with the project token
const TOKEN_PLACEHOLDER: &str = "{token}";

/// Logical API operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    TrackCustomer,
    TrackEvent,
    TrackCampaign,
    CustomerAttributes,
    ConfigureBanner,
    ShowBanner,
    Consents,
    InAppMessages,
}

impl Operation {
    /// All operations, in declaration order
    pub const ALL: [Operation; 8] = [
        Operation::TrackCustomer,
        Operation::TrackEvent,
        Operation::TrackCampaign,
        Operation::CustomerAttributes,
        Operation::ConfigureBanner,
        Operation::ShowBanner,
        Operation::Consents,
        Operation::InAppMessages,
    ];

    /// Path template for this operation
    pub fn path_template(&self) -> &'static str {
        match self {
            Operation::TrackCustomer => "/track/v2/projects/{token}/customers",
            Operation::TrackEvent => "/track/v2/projects/{token}/customers/events",
            Operation::TrackCampaign => "/track/v2/projects/{token}/campaigns/clicks",
            Operation::CustomerAttributes => "/data/v2/projects/{token}/customers/attributes",
            Operation::ConfigureBanner => "/track/v2/projects/{token}/configuration/banners",
            Operation::ShowBanner => {
                "/data/v2/projects/{token}/customers/personalisation/show-banners"
            }
            Operation::Consents => "/data/v2/projects/{token}/consent/categories",
            Operation::InAppMessages => "/webxp/s/{token}/inappmessages",
        }
    }

    /// Resolve the path, substituting the project token verbatim.
    pub fn resolve(&self, project_token: &str) -> String {
        self.path_template()
            .replace(TOKEN_PLACEHOLDER, project_token)
    }

    /// Absolute URL below `base_url`.
    pub fn url(&self, base_url: &str, project_token: &str) -> String {
        format!(
            "{}{}",
            base_url.trim_end_matches('/'),
            self.resolve(project_token)
        )
    }

    /// Endpoint that receives events of the given type.
    pub fn for_event(event_type: EventType) -> Self {
        match event_type {
            EventType::TrackCustomer | EventType::PushToken => Operation::TrackCustomer,
            EventType::CampaignClick => Operation::TrackCampaign,
            _ => Operation::TrackEvent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_paths() {
        let token = "projectToken";
        let expected = [
            "/track/v2/projects/projectToken/customers",
            "/track/v2/projects/projectToken/customers/events",
            "/track/v2/projects/projectToken/campaigns/clicks",
            "/data/v2/projects/projectToken/customers/attributes",
            "/track/v2/projects/projectToken/configuration/banners",
            "/data/v2/projects/projectToken/customers/personalisation/show-banners",
            "/data/v2/projects/projectToken/consent/categories",
            "/webxp/s/projectToken/inappmessages",
        ];
        for (op, path) in Operation::ALL.iter().zip(expected) {
            assert_eq!(op.resolve(token), path, "{:?}", op);
        }
    }

    #[test]
    fn test_every_template_has_one_placeholder() {
        for op in Operation::ALL {
            assert_eq!(
                op.path_template().matches(TOKEN_PLACEHOLDER).count(),
                1,
                "{:?}",
                op
            );
        }
    }

    #[test]
    fn test_token_is_substituted_verbatim() {
        assert_eq!(
            Operation::TrackEvent.resolve("a b/c"),
            "/track/v2/projects/a b/c/customers/events"
        );
    }

    #[test]
    fn test_url_joins_base() {
        assert_eq!(
            Operation::TrackEvent.url("https://api.example.com/", "t"),
            "https://api.example.com/track/v2/projects/t/customers/events"
        );
        assert_eq!(
            Operation::InAppMessages.url("http://localhost:8080", "t"),
            "http://localhost:8080/webxp/s/t/inappmessages"
        );
    }

    #[test]
    fn test_event_routing() {
        assert_eq!(
            Operation::for_event(EventType::TrackCustomer),
            Operation::TrackCustomer
        );
        assert_eq!(
            Operation::for_event(EventType::PushToken),
            Operation::TrackCustomer
        );
        assert_eq!(
            Operation::for_event(EventType::CampaignClick),
            Operation::TrackCampaign
        );
        for event_type in [
            EventType::Install,
            EventType::SessionStart,
            EventType::SessionEnd,
            EventType::TrackEvent,
            EventType::Payment,
            EventType::PushDelivered,
            EventType::PushOpened,
        ] {
            assert_eq!(Operation::for_event(event_type), Operation::TrackEvent);
        }
    }
}
