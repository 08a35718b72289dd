//! Core domain types shared between the agent scheduler, the coordinator's
//! ingest surface, the analytics engine and the persistence facade.
//!
//! These mirror the JSON schemas in the wire protocol between agent and
//! coordinator, so field names and casing follow the protocol rather than
//! Rust convention where the two disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four probe kinds a `Service` can be checked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Ping,
    Http,
    Tcp,
    Tls,
}

/// Debounced up/down state of a service, also used on the wire for
/// individual probe results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[serde(rename = "SERVICE_UP")]
    Up,
    #[serde(rename = "SERVICE_DOWN")]
    Down,
    #[serde(rename = "SERVICE_UNKNOWN")]
    Unknown,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Up => "SERVICE_UP",
            ServiceStatus::Down => "SERVICE_DOWN",
            ServiceStatus::Unknown => "SERVICE_UNKNOWN",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fixed set of probe intervals a service may declare, in seconds.
pub const ALLOWED_INTERVALS: [i64; 6] = [5, 15, 30, 60, 90, 120];

/// A probe definition owned by a user.
///
/// Serialized to/from JSON for the `/agents/config` response, matching the
/// wire schema named in the protocol (field names below are load-bearing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "serviceid")]
    pub service_id: i64,
    pub name: String,
    #[serde(rename = "ownerid")]
    pub owner_id: i64,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    #[serde(rename = "tocheck")]
    pub to_check: String,
    #[serde(default)]
    pub expected: String,
    pub interval: i64,
    /// 0 means "no contact group attached".
    #[serde(rename = "contactgroup", default)]
    pub contact_group: i64,
    /// Seconds until the next scheduled probe. Only meaningful on the
    /// agent side; the coordinator always returns the interval here.
    #[serde(rename = "nextinterval", default)]
    pub next_interval: i64,
    #[serde(rename = "groupname", default)]
    pub group_name: String,
    #[serde(rename = "servicestate")]
    pub service_state: ServiceStatus,
    #[serde(default)]
    pub exists: bool,
    #[serde(rename = "lastevent", default)]
    pub last_event: String,
    #[serde(rename = "lastseen")]
    pub last_seen: DateTime<Utc>,
    /// Space-separated location tags, or the literal token `any`.
    pub locations: String,
}

impl Service {
    /// Whether this service is scoped (via `locations`) to the given
    /// location, honoring the `any` wildcard token.
    pub fn matches_location(&self, location: &str) -> bool {
        self.locations == "any" || self.locations.split_whitespace().any(|tok| tok == location)
    }
}

/// One probe outcome, transported once from agent to coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResult {
    #[serde(rename = "serviceID")]
    pub service_id: i64,
    pub status: ServiceStatus,
    pub message: String,
    pub time: DateTime<Utc>,
    #[serde(rename = "node")]
    pub test_node: String,
    #[serde(rename = "rapidchange", default)]
    pub rapid_change: bool,
}

/// A persisted state-transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceLog {
    pub service_id: i64,
    pub time: DateTime<Utc>,
    pub status_from: ServiceStatus,
    pub status_to: ServiceStatus,
    pub why: String,
}

/// A named comma-separated email list owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertGroup {
    #[serde(rename = "contactid")]
    pub contact_id: i64,
    #[serde(rename = "ownerid")]
    pub owner_id: i64,
    #[serde(rename = "groupname")]
    pub group_name: String,
    pub emails: String,
    #[serde(default)]
    pub exists: bool,
}

impl AlertGroup {
    pub fn recipients(&self) -> impl Iterator<Item = &str> {
        self.emails.split(',').map(str::trim).filter(|s| !s.is_empty())
    }
}

/// A remote prober record, keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub location: String,
    pub access_key: String,
    pub last_seen: DateTime<Utc>,
    pub only_location: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_status_round_trips_wire_strings() {
        assert_eq!(
            serde_json::to_string(&ServiceStatus::Up).unwrap(),
            "\"SERVICE_UP\""
        );
        assert_eq!(
            serde_json::from_str::<ServiceStatus>("\"SERVICE_DOWN\"").unwrap(),
            ServiceStatus::Down
        );
    }

    #[test]
    fn location_matching_honors_any_wildcard() {
        let mut svc = sample_service();
        svc.locations = "eu us".into();
        assert!(svc.matches_location("us"));
        assert!(!svc.matches_location("asia"));

        svc.locations = "any".into();
        assert!(svc.matches_location("asia"));
    }

    fn sample_service() -> Service {
        Service {
            service_id: 1,
            name: "example".into(),
            owner_id: 1,
            service_type: ServiceType::Http,
            to_check: "http://example.com".into(),
            expected: String::new(),
            interval: 60,
            contact_group: 0,
            next_interval: 60,
            group_name: String::new(),
            service_state: ServiceStatus::Unknown,
            exists: true,
            last_event: String::new(),
            last_seen: Utc::now(),
            locations: "any".into(),
        }
    }
}
