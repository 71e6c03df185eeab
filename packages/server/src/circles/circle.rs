//! A named, mutable collection of services.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::service::{Service, ServiceOptions};
use crate::signal::Signal;

/// A named registry of services, used for discovery and grouping.
///
/// Membership changes are published on a single `changes` signal: additions
/// always, removals only when the removed entry was actually present. A
/// circle never holds two services with the same label; adding under an
/// existing label silently replaces the entry (latest wins).
#[derive(Debug)]
pub struct Circle {
    label: String,
    list: RwLock<HashMap<String, Arc<Service>>>,
    changes: Signal<Arc<Service>>,
}

impl Circle {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            list: RwLock::new(HashMap::new()),
            changes: Signal::new(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Membership-change stream. Additions and removals share this channel.
    #[must_use]
    pub fn changes(&self) -> &Signal<Arc<Service>> {
        &self.changes
    }

    /// Selects a service, creating it on first reference.
    ///
    /// - An existing service is returned as-is; when `update` is set and
    ///   options carry fresh origin data, its hostname/port are refreshed
    ///   first. Repeated calls return the identical `Arc` and fire no
    ///   further change events.
    /// - An absent service without options returns `None` -- nothing is
    ///   created without configuration.
    /// - An absent service with options is created, inserted (publishing a
    ///   change event), and returned through a second lookup that
    ///   re-validates presence.
    pub fn service(
        &self,
        name: &str,
        options: Option<&ServiceOptions>,
        update: bool,
    ) -> Option<Arc<Service>> {
        if let Some(existing) = self.get(name) {
            if update {
                if let Some(options) = options {
                    existing.refresh_origin(&options.hostname, options.port);
                }
            }
            return Some(existing);
        }

        let options = options?;
        self.add(Arc::new(Service::new(name, options)));
        self.service(name, None, false)
    }

    /// Looks up a service by label without creating it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.list.read().get(name).cloned()
    }

    /// Inserts a service keyed by its label and publishes a change event.
    /// Chainable; an existing entry with the same label is replaced.
    pub fn add(&self, service: Arc<Service>) -> &Self {
        self.list
            .write()
            .insert(service.label().to_string(), Arc::clone(&service));
        self.changes.publish(&service);
        self
    }

    /// Removes a service by label. Publishes on the change channel only if
    /// the entry was present; otherwise a no-op. Chainable.
    pub fn remove(&self, service: &Service) -> &Self {
        let removed = self.list.write().remove(service.label());
        if let Some(removed) = removed {
            self.changes.publish(&removed);
        }
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.read().is_empty()
    }
}
