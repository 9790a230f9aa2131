//! redb table definitions for the Tandem state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every table in the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Promotion hand-off records keyed by channel name.
pub const PROMOTIONS: JsonTable = TableDefinition::new("promotions");

/// Pipeline runs keyed by run ID.
pub const RUNS: JsonTable = TableDefinition::new("runs");

/// In-flight run locks keyed by pipeline (`staging`, `production`).
pub const RUN_LOCKS: JsonTable = TableDefinition::new("run_locks");

/// In-flight traffic shift locks keyed by environment (`blue`, `green`).
pub const SHIFT_LOCKS: JsonTable = TableDefinition::new("shift_locks");

/// Traffic shifts that may have launched a task set, keyed by environment.
pub const SHIFTS: JsonTable = TableDefinition::new("shifts");

/// Deployment groups keyed by name.
pub const DEPLOYMENT_GROUPS: JsonTable = TableDefinition::new("deployment_groups");

/// Artifact index keyed by image tag.
pub const ARTIFACTS: JsonTable = TableDefinition::new("artifacts");

/// What each environment is running, keyed by environment name.
pub const ENVIRONMENTS: JsonTable = TableDefinition::new("environments");

/// Every table, for creation at open time.
pub const ALL_TABLES: [JsonTable; 8] = [
    PROMOTIONS,
    RUNS,
    RUN_LOCKS,
    SHIFT_LOCKS,
    SHIFTS,
    DEPLOYMENT_GROUPS,
    ARTIFACTS,
    ENVIRONMENTS,
];
