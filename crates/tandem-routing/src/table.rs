//! Named listeners, evaluated against consistent snapshots.
//!
//! A repoint replaces the listener behind its name in one step, so an
//! in-flight evaluation sees either the old default or the new one and
//! never a mix.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tandem_core::TargetGroupId;
use tracing::{debug, info};

use crate::error::{RoutingError, RoutingResult};
use crate::listener::Listener;
use crate::rule::{Decision, RequestInfo};

#[derive(Clone, Default)]
pub struct RoutingTable {
    listeners: Arc<RwLock<HashMap<String, Arc<Listener>>>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Listener>>> {
        self.listeners.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Listener>>> {
        self.listeners.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Register or replace a listener.
    pub fn install(&self, listener: Listener) {
        debug!(
            listener = listener.name(),
            rules = listener.rules().len(),
            "listener installed"
        );
        self.write()
            .insert(listener.name().to_string(), Arc::new(listener));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Listener>> {
        self.read().get(name).cloned()
    }

    /// All listeners, sorted by name.
    pub fn list(&self) -> Vec<Arc<Listener>> {
        let mut listeners: Vec<_> = self.read().values().cloned().collect();
        listeners.sort_by(|a, b| a.name().cmp(b.name()));
        listeners
    }

    pub fn evaluate(&self, name: &str, req: &RequestInfo) -> RoutingResult<Decision> {
        let snapshot = self
            .get(name)
            .ok_or_else(|| RoutingError::UnknownListener(name.to_string()))?;
        Ok(snapshot.evaluate(req))
    }

    /// Repoint the listener's default forward to `target`, returning the
    /// previous target.
    pub fn repoint_default(&self, name: &str, target: &TargetGroupId) -> RoutingResult<TargetGroupId> {
        let mut listeners = self.write();
        let current = listeners
            .get(name)
            .ok_or_else(|| RoutingError::UnknownListener(name.to_string()))?;
        let previous = current
            .default_target()
            .cloned()
            .ok_or_else(|| RoutingError::DefaultNotForwarding(name.to_string()))?;
        let next = current.with_default_target(target.clone())?;
        listeners.insert(name.to_string(), Arc::new(next));
        info!(listener = name, from = %previous, to = %target, "listener default repointed");
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipset::IpSet;

    fn table() -> RoutingTable {
        let table = RoutingTable::new();
        table.install(
            Listener::restricted(
                "staging",
                IpSet::parse(&["1.2.3.4/32"]).unwrap(),
                TargetGroupId::new("green-tg"),
            )
            .unwrap(),
        );
        table.install(Listener::open("production", TargetGroupId::new("blue-a")).unwrap());
        table
    }

    #[test]
    fn evaluates_named_listener() {
        let table = table();
        let allowed = table
            .evaluate("staging", &RequestInfo::from_raw(Some("1.2.3.4"), None))
            .unwrap();
        assert_eq!(allowed.action.target().unwrap().as_str(), "green-tg");

        let denied = table
            .evaluate("staging", &RequestInfo::from_raw(Some("9.9.9.9"), None))
            .unwrap();
        assert!(denied.action.is_deny());
    }

    #[test]
    fn unknown_listener_is_an_error() {
        let err = table()
            .evaluate("nope", &RequestInfo::from_raw(None, None))
            .unwrap_err();
        assert_eq!(err, RoutingError::UnknownListener("nope".to_string()));
    }

    #[test]
    fn repoint_swaps_default_and_returns_previous() {
        let table = table();
        let snapshot = table.get("production").unwrap();

        let previous = table
            .repoint_default("production", &TargetGroupId::new("blue-b"))
            .unwrap();
        assert_eq!(previous.as_str(), "blue-a");

        let decision = table
            .evaluate("production", &RequestInfo::from_raw(Some("8.8.8.8"), None))
            .unwrap();
        assert_eq!(decision.action.target().unwrap().as_str(), "blue-b");
        // Snapshots taken before the repoint are unchanged.
        assert_eq!(snapshot.default_target().unwrap().as_str(), "blue-a");
    }

    #[test]
    fn restricted_listener_refuses_repoint() {
        let table = table();
        let err = table
            .repoint_default("staging", &TargetGroupId::new("blue-b"))
            .unwrap_err();
        assert_eq!(err, RoutingError::DefaultNotForwarding("staging".to_string()));
        assert!(
            table
                .evaluate("staging", &RequestInfo::from_raw(Some("9.9.9.9"), None))
                .unwrap()
                .action
                .is_deny()
        );
    }

    #[test]
    fn list_is_sorted() {
        let names: Vec<String> = table().list().iter().map(|l| l.name().to_string()).collect();
        assert_eq!(names, vec!["production", "staging"]);
    }
}
