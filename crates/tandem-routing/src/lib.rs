//! Tandem routing policy engine.
//!
//! Decides, per inbound request, which target group serves it or whether
//! the load balancer answers with a fixed response instead. This crate is
//! the model of the load balancer's routing-rule configuration surface; it
//! never touches packets.
//!
//! # Components
//!
//! - **`ipset`**: CIDR blocks and allow-sets (fail-closed parsing)
//! - **`rule`**: predicates, actions, and priority-ordered rules
//! - **`listener`**: validated rule sets with a sentinel default action
//! - **`table`**: named listeners with snapshot evaluation and atomic repointing
//! - **`sync`**: re-derives listener defaults from persisted deployment groups

pub mod error;
pub mod ipset;
pub mod listener;
pub mod rule;
pub mod sync;
pub mod table;

pub use error::{RoutingError, RoutingResult};
pub use ipset::{Cidr, IpSet};
pub use listener::{Listener, ListenerBuilder};
pub use rule::{Action, Decision, ListenerRule, Predicate, RequestInfo, DENY_BODY, DENY_STATUS};
pub use sync::RoutingSync;
pub use table::RoutingTable;
