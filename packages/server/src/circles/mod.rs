//! Service discovery and grouping.
//!
//! A [`Service`] is a logical remote endpoint; a [`Circle`] is a named,
//! mutable collection of services with change notification; the
//! [`CircleDirectory`] holds all circles and guarantees the `"global"`
//! circle every inbound request is routed into.

mod circle;
mod directory;
mod service;

pub use circle::Circle;
pub use directory::{CircleDirectory, GLOBAL_CIRCLE};
pub use service::{Service, ServiceOptions};
