//! # Lifecycle Events
//!
//! In-process broadcast of task lifecycle transitions. Audit forwarding subscribes
//! here so event posting stays off the pipeline's critical path.

pub mod publisher;

pub use publisher::{EventPublisher, LifecycleEvent};
