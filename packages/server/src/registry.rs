//! Component registry: the dependency-injection container hosting the
//! process's long-lived parts.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, error};

use crate::config::ServerConfig;
use crate::signal::Signal;

// ---------------------------------------------------------------------------
// ComponentContext
// ---------------------------------------------------------------------------

/// Context provided to components during initialization.
///
/// Carries the cross-component lookup accessor and the shared shutdown
/// publisher every component gets a reference to.
#[derive(Clone)]
pub struct ComponentContext {
    pub config: Arc<ServerConfig>,
    /// Cross-component lookup accessor.
    pub registry: Arc<ComponentRegistry>,
    /// Shared shutdown publisher. Subscribing is each component's chance
    /// to flush and clean up before the process exits.
    pub shutdown: Arc<Signal<()>>,
}

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// Lifecycle-managed component trait.
///
/// Components are registered with a [`ComponentRegistry`], initialized in
/// registration order, and stopped concurrently at termination. The `Any`
/// bound enables type-based lookup via [`ComponentRegistry::get`].
#[async_trait]
pub trait Component: Send + Sync + Any {
    /// Unique, non-empty name of this component (e.g. `"connection"`).
    fn name(&self) -> &str;

    /// Queued initializer, run once against the fully populated registry.
    async fn init(&self, ctx: &ComponentContext) -> anyhow::Result<()>;

    /// Releases this component's resources.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Errors raised while registering components.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The component declared no name; registration is rejected.
    #[error("component registration is missing a name")]
    MissingComponentName,
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Registry of live components.
///
/// Provides two lookup mechanisms:
/// - **By name** (`get_by_name`): uses the component's `name()` string
/// - **By type** (`get::<T>`): uses `TypeId` for typed dispatch
///
/// Lookups return the live shared instance, never a copy: every holder of
/// the accessor sees the same state.
pub struct ComponentRegistry {
    by_name: DashMap<String, Arc<dyn Component>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    /// Registration order for deterministic initializer sequencing.
    init_order: RwLock<Vec<String>>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            init_order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a component under its declared name.
    ///
    /// Re-registering an existing name is an idempotent no-op success
    /// (`Ok(false)`); the original instance is retained. A fresh
    /// registration returns `Ok(true)` and appends the component to the
    /// initializer queue.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::MissingComponentName`] (after logging)
    /// when the component declares an empty name.
    pub fn register<T: Component>(&self, component: Arc<T>) -> Result<bool, RegistryError> {
        let name = component.name().to_string();
        if name.is_empty() {
            error!("component registration rejected: missing name");
            return Err(RegistryError::MissingComponentName);
        }
        if self.by_name.contains_key(&name) {
            debug!(%name, "component already registered");
            return Ok(false);
        }

        self.by_name
            .insert(name.clone(), Arc::clone(&component) as Arc<dyn Component>);
        self.by_type
            .insert(TypeId::of::<T>(), component as Arc<dyn Any + Send + Sync>);
        self.init_order.write().push(name);
        Ok(true)
    }

    /// Retrieve a component by its concrete type.
    pub fn get<T: Component>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| Arc::clone(entry.value()).downcast::<T>().ok())
    }

    /// Retrieve a component by its name.
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.by_name.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// All registered components, in no particular order.
    #[must_use]
    pub fn components(&self) -> Vec<Arc<dyn Component>> {
        self.by_name
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Runs every queued initializer in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first initializer failure, named after its component.
    pub async fn init_all(&self, ctx: &ComponentContext) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        for name in &order {
            if let Some(component) = self.get_by_name(name) {
                component
                    .init(ctx)
                    .await
                    .with_context(|| format!("initializing component `{name}`"))?;
            }
        }
        Ok(())
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .by_name
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        f.debug_struct("ComponentRegistry")
            .field("components", &names)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
