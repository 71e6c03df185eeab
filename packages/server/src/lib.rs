//! Plexus server -- a transport-agnostic service-communication layer.
//!
//! A process registers named remote *services*, reaches them over one of
//! several interchangeable transports (ipc, tcp, udp), and receives inbound
//! requests routed to the right service's subscribers:
//!
//! 1. **Circles** (`circle`): named collections of services, lazily created
//!    from inbound traffic and change-notified.
//! 2. **Adapters** (`adapters`): pluggable transports exposing
//!    listen/stop/send/client capabilities behind one trait.
//! 3. **Connection manager** (`connection`): owns the adapter set, builds
//!    outbound envelopes, and routes inbound envelopes into the global
//!    circle.
//! 4. **Component registry** (`registry`): dependency-injection container
//!    with an ordered initializer queue.
//! 5. **Runtime** (`runtime`): signal-driven, watchdog-bounded shutdown
//!    coordination.

pub mod adapters;
pub mod circles;
pub mod config;
pub mod connection;
pub mod registry;
pub mod runtime;
pub mod signal;

// Re-export key types for convenient access.
pub use adapters::{Adapter, AdapterError, ClientHandle, InboundRequest};
pub use circles::{Circle, CircleDirectory, Service, ServiceOptions, GLOBAL_CIRCLE};
pub use config::{
    ConnectionsConfig, Identity, IpcConfig, ServerConfig, SystemConfig, TcpConfig, UdpConfig,
};
pub use connection::{AdapterStartup, ConnectionError, ConnectionManager, InitReport};
pub use registry::{Component, ComponentContext, ComponentRegistry, RegistryError};
pub use runtime::{LifecycleState, Runtime, TerminateOutcome, SHUTDOWN_GRACE};
pub use signal::{Signal, SubscriptionId};

pub use plexus_core::{EnvelopeError, Metadata, Origin, RequestEnvelope};
