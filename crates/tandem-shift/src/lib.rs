//! tandem-shift: zero-downtime production cutover.
//!
//! A traffic shift launches the new task set into the shadow target
//! group, waits for it to become healthy, repoints the listener's default
//! rule at it, and only then flips the persisted live pointer. Any failure
//! before the flip rolls the shift back and leaves the previously live
//! target group serving.
//!
//! # Components
//!
//! - **`machine`**: the pure shift state machine (legal transitions, history)
//! - **`platform`**: compute platform and load balancer contracts
//! - **`controller`**: the async driver with locking, abort, and rollback
//! - **`testing`**: a scripted in-memory compute platform

pub mod controller;
pub mod machine;
pub mod platform;
pub mod testing;

pub use controller::{ShiftController, ShiftFailure, ShiftParams};
pub use machine::{ShiftPhase, TrafficShift};
pub use platform::{ComputePlatform, LoadBalancer};
