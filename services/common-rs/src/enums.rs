/// Shared enums for the data-plane services.
///
/// These enums provide type safety for status fields across the codebase.
/// They serialize to lowercase strings for JSON and TEXT-column compatibility.
use serde::{Deserialize, Serialize};

/// Workspace plan. The single authority read on the redirect path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    /// Safely parse from string, falling back to Free for unknown values.
    pub fn from_str(s: &str) -> Self {
        match s {
            "pro" => Self::Pro,
            _ => Self::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
        }
    }
}

/// Domain verification status. Only verified domains participate in resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Verified,
    Failed,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }
}

/// Link status. Paused links behave as if absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Paused,
}

impl LinkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
        }
    }
}

/// Device class derived from the user-agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
    Unknown,
}

impl DeviceClass {
    pub fn from_str(s: &str) -> Self {
        match s {
            "mobile" => Self::Mobile,
            "tablet" => Self::Tablet,
            "desktop" => Self::Desktop,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_falls_back_to_free() {
        assert_eq!(Plan::from_str("pro"), Plan::Pro);
        assert_eq!(Plan::from_str("free"), Plan::Free);
        assert_eq!(Plan::from_str("enterprise"), Plan::Free);
    }

    #[test]
    fn status_columns_store_lowercase_words() {
        assert_eq!(DomainStatus::Verified.as_str(), "verified");
        assert_eq!(DomainStatus::Pending.as_str(), "pending");
        assert_eq!(LinkStatus::Active.as_str(), "active");
        assert_eq!(LinkStatus::Paused.as_str(), "paused");
    }

    #[test]
    fn device_class_round_trips() {
        for d in [
            DeviceClass::Mobile,
            DeviceClass::Tablet,
            DeviceClass::Desktop,
            DeviceClass::Unknown,
        ] {
            assert_eq!(DeviceClass::from_str(d.as_str()), d);
        }
    }
}
