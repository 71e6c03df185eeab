//! A logical remote endpoint and its inbound request stream.

use parking_lot::RwLock;
use plexus_core::RequestEnvelope;

use crate::signal::Signal;

/// Creation options for a service: where it lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub hostname: String,
    pub port: u16,
    /// Transport kind used to reach the service (e.g. `"tcp"`).
    pub transport: String,
    pub keep_alive: bool,
}

/// Reachable location of a service, refreshed from inbound origin data.
#[derive(Debug, Clone)]
struct Endpoint {
    hostname: String,
    port: u16,
}

/// A named remote endpoint.
///
/// Services are constructed only through a [`Circle`](super::Circle) and
/// shared as `Arc<Service>`; the label and transport kind are fixed at
/// creation, while hostname/port are refreshed in place whenever an update
/// reference carries fresh origin data. Each service owns one request
/// stream that the connection manager publishes inbound envelopes on.
#[derive(Debug)]
pub struct Service {
    label: String,
    transport: String,
    keep_alive: bool,
    endpoint: RwLock<Endpoint>,
    on_request: Signal<RequestEnvelope>,
}

impl Service {
    pub(super) fn new(label: impl Into<String>, options: &ServiceOptions) -> Self {
        Self {
            label: label.into(),
            transport: options.transport.clone(),
            keep_alive: options.keep_alive,
            endpoint: RwLock::new(Endpoint {
                hostname: options.hostname.clone(),
                port: options.port,
            }),
            on_request: Signal::new(),
        }
    }

    /// Unique name of this service within its circle.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Transport kind used to reach this service.
    #[must_use]
    pub fn transport(&self) -> &str {
        &self.transport
    }

    /// Whether outbound connections to this service should be reused.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[must_use]
    pub fn hostname(&self) -> String {
        self.endpoint.read().hostname.clone()
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.endpoint.read().port
    }

    /// Stream of inbound envelopes addressed to this service.
    #[must_use]
    pub fn on_request(&self) -> &Signal<RequestEnvelope> {
        &self.on_request
    }

    /// Refreshes the reachable location. Only hostname and port move;
    /// label, transport and keep-alive stay as created.
    pub(super) fn refresh_origin(&self, hostname: &str, port: u16) {
        let mut endpoint = self.endpoint.write();
        endpoint.hostname = hostname.to_string();
        endpoint.port = port;
    }
}
