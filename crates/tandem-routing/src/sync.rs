//! Routing state synchronization: bridges the state store to the routing table.
//!
//! The persisted deployment group is the source of truth for which target
//! group is live. `RoutingSync` re-derives each controlled listener's
//! default from it, which is how the table is rebuilt after a restart.
//!
//! While an environment's shift lock is held the shift controller owns its
//! listener: the listener moves to the shadow target before the pointer
//! swaps, and reconciling in that window would undo the cut-over.

use tracing::{debug, info, warn};

use tandem_state::{DeploymentGroupRecord, StateStore};

use crate::error::RoutingResult;
use crate::listener::Listener;
use crate::table::RoutingTable;

pub struct RoutingSync {
    table: RoutingTable,
}

impl RoutingSync {
    pub fn new(table: RoutingTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Full pass over every deployment group in the store. Existing
    /// listeners of groups with a shift in flight are left alone.
    pub fn sync(&self, store: &StateStore) -> Result<SyncStats, tandem_state::StateError> {
        let groups = store.list_deployment_groups()?;
        let mut stats = SyncStats::default();
        for group in &groups {
            if let Some(shift) = store.shift_lock(group.environment)? {
                if self.table.get(&group.listener).is_some() {
                    debug!(group = %group.name, shift = %shift.holder, "shift in flight, listener not synced");
                    stats.skipped += 1;
                    continue;
                }
            }
            match self.apply(group) {
                Ok(true) => stats.repointed += 1,
                Ok(false) => stats.unchanged += 1,
                Err(e) => {
                    warn!(group = %group.name, error = %e, "listener sync failed");
                    stats.failed += 1;
                }
            }
        }
        info!(
            repointed = stats.repointed,
            unchanged = stats.unchanged,
            skipped = stats.skipped,
            failed = stats.failed,
            "routing sync complete"
        );
        Ok(stats)
    }

    /// Make the group's listener forward to its live target. Installs an
    /// open listener when none exists. Returns whether anything changed.
    pub fn apply(&self, group: &DeploymentGroupRecord) -> RoutingResult<bool> {
        let live = group.live_target();
        match self.table.get(&group.listener) {
            None => {
                self.table.install(Listener::open(&group.listener, live.clone())?);
                Ok(true)
            }
            Some(listener) if listener.default_target() == Some(live) => {
                debug!(listener = %group.listener, live = %live, "listener already in sync");
                Ok(false)
            }
            Some(_) => {
                self.table.repoint_default(&group.listener, live)?;
                Ok(true)
            }
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub repointed: u32,
    pub unchanged: u32,
    /// Groups whose environment had a shift in flight.
    pub skipped: u32,
    pub failed: u32,
}
