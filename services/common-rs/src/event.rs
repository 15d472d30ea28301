use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue message payload for one accepted click.
///
/// Published by the edge service after the counter accepted the click and
/// consumed by the click-log writer. All optional fields may be absent on
/// the wire; the consumer fills in what it can and defaults the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    pub click_id: String,
    pub ts: DateTime<Utc>,
    pub workspace_id: String,
    pub link_id: String,
    pub domain: String,
    pub slug: String,
    pub destination_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_all_optionals_missing() {
        let raw = r#"{
            "click_id": "abc",
            "ts": "2026-03-01T12:00:00Z",
            "workspace_id": "ws_1",
            "link_id": "lnk_1",
            "domain": "example.test",
            "slug": "x",
            "destination_url": "https://dest.example/path"
        }"#;
        let event: ClickEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.click_id, "abc");
        assert!(event.referrer.is_none());
        assert!(event.user_agent.is_none());
        assert!(event.country.is_none());
    }

    #[test]
    fn absent_optionals_are_omitted_on_the_wire() {
        let event = ClickEvent {
            click_id: "abc".into(),
            ts: "2026-03-01T12:00:00Z".parse().unwrap(),
            workspace_id: "ws_1".into(),
            link_id: "lnk_1".into(),
            domain: "example.test".into(),
            slug: "x".into(),
            destination_url: "https://dest.example/path".into(),
            referrer: None,
            user_agent: Some("Mozilla/5.0".into()),
            ip_hash: None,
            country: None,
            region: None,
            city: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("referrer"));
        assert!(json.contains("user_agent"));
    }
}
