//! Worker module - Event plumbing around the policy engine
//!
//! Provides:
//! - lifecycle: handler slots and the install/activate state machine
//! - clients: open pages and their controller
//! - message: control message wire format and reply channel
//! - tasks: fire-and-forget background work

pub mod clients;
pub mod lifecycle;
pub mod message;
pub mod tasks;
