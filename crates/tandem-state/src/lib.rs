//! tandem-state: durable shared state for Tandem.
//!
//! Backed by [redb](https://docs.rs/redb). This is the only channel through
//! which the independently triggered pipelines and the traffic shift
//! controller coordinate: the promotion record, pipeline run records, the
//! per-pipeline and per-environment locks, and each deployment group's
//! "which target group is live" pointer all live here rather than in
//! process memory.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Lock acquisition and the live-pointer swap are single write transactions,
//! so they are atomic with respect to other processes sharing the file.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
