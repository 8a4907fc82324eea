//! Event system for universe task orchestration
//!
//! This crate provides the event bus and event types that status surfaces
//! subscribe to while lifecycle tasks run.

mod bus;
mod types;

pub use bus::{drain_task_events, EventBus};
pub use types::*;
