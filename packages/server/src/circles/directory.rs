//! Named registry of circles.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::circle::Circle;
use crate::registry::{Component, ComponentContext};

/// Label of the circle all inbound requests are routed into.
pub const GLOBAL_CIRCLE: &str = "global";

/// Holds every circle in the process, keyed by label.
///
/// The `"global"` circle exists from construction so inbound routing never
/// has to handle its absence. Other components receive an explicit handle
/// to the directory at construction time.
#[derive(Debug)]
pub struct CircleDirectory {
    circles: DashMap<String, Arc<Circle>>,
}

impl CircleDirectory {
    #[must_use]
    pub fn new() -> Self {
        let directory = Self {
            circles: DashMap::new(),
        };
        directory.circle(GLOBAL_CIRCLE);
        directory
    }

    /// Looks up a circle by label.
    #[must_use]
    pub fn find(&self, label: &str) -> Option<Arc<Circle>> {
        self.circles.get(label).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the circle with the given label, creating it if absent.
    pub fn circle(&self, label: &str) -> Arc<Circle> {
        Arc::clone(
            &self
                .circles
                .entry(label.to_string())
                .or_insert_with(|| Arc::new(Circle::new(label))),
        )
    }

    /// The `"global"` circle.
    #[must_use]
    pub fn global(&self) -> Arc<Circle> {
        self.circle(GLOBAL_CIRCLE)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.circles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.circles.is_empty()
    }
}

impl Default for CircleDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Component for CircleDirectory {
    fn name(&self) -> &str {
        "circles"
    }

    async fn init(&self, _ctx: &ComponentContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
