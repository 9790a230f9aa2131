//! Listener rules: a predicate, an action, and a priority.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tandem_core::TargetGroupId;

use crate::ipset::IpSet;

/// Status of the fixed response returned to callers outside the allow-list.
pub const DENY_STATUS: u16 = 403;

/// Body of the fixed deny response.
pub const DENY_BODY: &str = "Access denied";

/// What a rule matches on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    /// Source address is inside the set. A request without a recognizable
    /// source never matches.
    SourceIp(IpSet),
    /// Request path starts with the prefix.
    PathPrefix(String),
}

impl Predicate {
    pub fn matches(&self, req: &RequestInfo) -> bool {
        match self {
            Predicate::SourceIp(set) => req.source.is_some_and(|ip| set.contains(ip)),
            Predicate::PathPrefix(prefix) => req.path.starts_with(prefix.as_str()),
        }
    }
}

/// What the load balancer does with a matched request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Forward {
        target: TargetGroupId,
    },
    FixedResponse {
        status: u16,
        content_type: String,
        body: String,
    },
}

impl Action {
    pub fn forward(target: TargetGroupId) -> Self {
        Action::Forward { target }
    }

    /// The terminal deny: HTTP 403 with a fixed plain-text body.
    pub fn deny() -> Self {
        Action::FixedResponse {
            status: DENY_STATUS,
            content_type: "text/plain".to_string(),
            body: DENY_BODY.to_string(),
        }
    }

    pub fn target(&self) -> Option<&TargetGroupId> {
        match self {
            Action::Forward { target } => Some(target),
            Action::FixedResponse { .. } => None,
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Action::FixedResponse { status, .. } if *status == DENY_STATUS)
    }
}

/// A conditional rule. Lower priority values are evaluated first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerRule {
    pub priority: u32,
    pub predicate: Predicate,
    pub action: Action,
}

/// The parts of an inbound request routing looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub source: Option<IpAddr>,
    pub path: String,
}

impl RequestInfo {
    pub fn new(source: Option<IpAddr>, path: &str) -> Self {
        Self {
            source,
            path: path.to_string(),
        }
    }

    /// Build from raw strings; an unparseable source counts as absent.
    pub fn from_raw(source: Option<&str>, path: Option<&str>) -> Self {
        Self {
            source: source.and_then(|s| s.trim().parse().ok()),
            path: path.unwrap_or("/").to_string(),
        }
    }
}

/// Outcome of evaluating a listener for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    /// Priority of the matching rule; `None` when the default applied.
    pub matched_priority: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_predicate_requires_a_source() {
        let pred = Predicate::SourceIp(IpSet::parse(&["0.0.0.0/0"]).unwrap());
        assert!(pred.matches(&RequestInfo::from_raw(Some("8.8.8.8"), None)));
        assert!(!pred.matches(&RequestInfo::from_raw(None, None)));
        assert!(!pred.matches(&RequestInfo::from_raw(Some("not-an-ip"), None)));
    }

    #[test]
    fn path_prefix_predicate() {
        let pred = Predicate::PathPrefix("/api".to_string());
        assert!(pred.matches(&RequestInfo::new(None, "/api/orders")));
        assert!(!pred.matches(&RequestInfo::new(None, "/static/app.js")));
    }

    #[test]
    fn deny_action_shape() {
        let deny = Action::deny();
        assert!(deny.is_deny());
        assert!(deny.target().is_none());
        match deny {
            Action::FixedResponse { status, content_type, body } => {
                assert_eq!(status, 403);
                assert_eq!(content_type, "text/plain");
                assert_eq!(body, "Access denied");
            }
            Action::Forward { .. } => panic!("deny must be a fixed response"),
        }
    }

    #[test]
    fn action_serializes_tagged() {
        let json = serde_json::to_value(Action::forward(TargetGroupId::new("green-tg"))).unwrap();
        assert_eq!(json["type"], "forward");
        assert_eq!(json["target"], "green-tg");
    }
}
