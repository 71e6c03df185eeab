//! Connection manager: the regroupment of all i/o adapters.
//!
//! Owns the adapter mapping, fans out adapter startup with join semantics,
//! builds a fresh outbound envelope per send, and is the sole inbound entry
//! point: every adapter's deframed envelopes are routed into the `"global"`
//! circle, fetch-or-creating the originating service with freshened origin
//! data and publishing on its request stream.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use plexus_core::{Metadata, Origin, RequestEnvelope};
use rmpv::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{
    Adapter, AdapterError, ClientHandle, InboundRequest, IpcAdapter, TcpAdapter, UdpAdapter,
};
use crate::circles::{CircleDirectory, Service, ServiceOptions};
use crate::config::{Identity, ServerConfig};
use crate::registry::{Component, ComponentContext};

/// Capacity of the shared inbound request channel.
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Errors surfaced to callers of the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No adapter is registered under the service's transport kind.
    #[error("unknown adapter kind `{kind}`")]
    UnknownAdapterKind { kind: String },
    /// The adapter accepted the call but failed to carry it out.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Outcome of one adapter's startup.
#[derive(Debug)]
pub struct AdapterStartup {
    pub kind: String,
    pub result: Result<(), AdapterError>,
}

/// Collected results of the adapter startup fan-out.
///
/// Individual bind failures are recorded, never short-circuited: one
/// transport failing to start leaves the others fully functional.
#[derive(Debug, Default)]
pub struct InitReport {
    results: Vec<AdapterStartup>,
}

impl InitReport {
    #[must_use]
    pub fn results(&self) -> &[AdapterStartup] {
        &self.results
    }

    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|startup| startup.result.is_ok())
    }

    #[must_use]
    pub fn failures(&self) -> Vec<&AdapterStartup> {
        self.results
            .iter()
            .filter(|startup| startup.result.is_err())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Routes outbound sends and inbound requests to the right adapter and
/// service.
///
/// Collaborators arrive by explicit handle at construction; the process
/// identity stamped into outbound envelopes is fixed here and never changes
/// afterward.
pub struct ConnectionManager {
    config: Arc<ServerConfig>,
    circles: Arc<CircleDirectory>,
    identity: Identity,
    adapters: DashMap<String, Arc<dyn Adapter>>,
    inbound_tx: mpsc::Sender<InboundRequest>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundRequest>>>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(config: Arc<ServerConfig>, circles: Arc<CircleDirectory>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        Self {
            identity: config.identity.clone(),
            config,
            circles,
            adapters: DashMap::new(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            router: Mutex::new(None),
        }
    }

    /// Sender adapters use to dispatch deframed inbound envelopes.
    #[must_use]
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundRequest> {
        self.inbound_tx.clone()
    }

    /// Starts the configured transport set.
    ///
    /// Builds the ipc/tcp/udp adapters from config and loads them with the
    /// per-kind autoload policy. Resolves once every adapter has completed
    /// startup, success or failure.
    pub async fn initialize(&self) -> InitReport {
        let adapters = self.build_adapters();
        self.initialize_with(adapters).await
    }

    /// Starts an explicit adapter set (used by `initialize` and by tests
    /// or embedders wiring custom transports).
    pub async fn initialize_with(
        &self,
        adapters: Vec<(Arc<dyn Adapter>, bool)>,
    ) -> InitReport {
        self.start_router();

        let loads = adapters.into_iter().map(|(adapter, autoload)| async move {
            let kind = adapter.kind().to_string();
            let result = self.load_with_policy(adapter, autoload).await;
            AdapterStartup { kind, result }
        });
        let results = join_all(loads).await;
        InitReport { results }
    }

    /// Registers one adapter and starts it listening. Late transports
    /// register through the same path boot ones do.
    ///
    /// # Errors
    ///
    /// Returns the adapter's bind failure. The adapter stays registered
    /// either way so outbound sends over it can still be attempted.
    pub async fn load(&self, adapter: Arc<dyn Adapter>) -> Result<(), AdapterError> {
        self.load_with_policy(adapter, true).await
    }

    async fn load_with_policy(
        &self,
        adapter: Arc<dyn Adapter>,
        autoload: bool,
    ) -> Result<(), AdapterError> {
        let kind = adapter.kind();
        self.adapters.insert(kind.to_string(), Arc::clone(&adapter));

        if !autoload {
            debug!(kind, "adapter registered without listening");
            return Ok(());
        }
        if let Err(error) = adapter.listen().await {
            warn!(kind, %error, "adapter failed to start");
            return Err(error);
        }
        info!(kind, "adapter listening");
        Ok(())
    }

    fn build_adapters(&self) -> Vec<(Arc<dyn Adapter>, bool)> {
        let connections = &self.config.connections;
        vec![
            (
                Arc::new(IpcAdapter::new(connections.ipc.clone(), self.inbound_sender()))
                    as Arc<dyn Adapter>,
                connections.ipc.autoload,
            ),
            (
                Arc::new(TcpAdapter::new(connections.tcp.clone(), self.inbound_sender()))
                    as Arc<dyn Adapter>,
                connections.tcp.autoload,
            ),
            (
                Arc::new(UdpAdapter::new(connections.udp.clone(), self.inbound_sender()))
                    as Arc<dyn Adapter>,
                connections.udp.autoload,
            ),
        ]
    }

    fn start_router(&self) {
        let receiver = self.inbound_rx.lock().take();
        let Some(mut receiver) = receiver else {
            return;
        };
        let circles = Arc::clone(&self.circles);
        let handle = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                route_inbound(&circles, request.kind, request.envelope);
            }
        });
        *self.router.lock() = Some(handle);
    }

    fn adapter(&self, kind: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(kind).map(|entry| Arc::clone(entry.value()))
    }

    /// Establishes a reusable client for the service over its transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnknownAdapterKind`] when no adapter is
    /// registered for the service's transport.
    pub async fn create_client(
        &self,
        service: &Service,
    ) -> Result<Option<ClientHandle>, ConnectionError> {
        let adapter = self.adapter(service.transport()).ok_or_else(|| {
            ConnectionError::UnknownAdapterKind {
                kind: service.transport().to_string(),
            }
        })?;
        Ok(adapter.create_client(service).await)
    }

    /// Liveness check for a previously created client handle.
    ///
    /// An unknown transport kind degrades to `false` with a warning;
    /// liveness checks never error.
    #[must_use]
    pub fn is_connected(&self, service: &Service, client: &ClientHandle) -> bool {
        match self.adapter(service.transport()) {
            Some(adapter) => adapter.is_connected(client),
            None => {
                warn!(
                    kind = service.transport(),
                    "unknown adapter kind for liveness check"
                );
                false
            }
        }
    }

    /// Sends `payload` to the service, wrapped in a freshly built envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::UnknownAdapterKind`] when no adapter is
    /// registered for the service's transport, or the adapter's transmit
    /// failure.
    pub async fn send(
        &self,
        service: &Service,
        payload: Value,
        client: Option<&ClientHandle>,
    ) -> Result<(), ConnectionError> {
        let adapter = self.adapter(service.transport()).ok_or_else(|| {
            ConnectionError::UnknownAdapterKind {
                kind: service.transport().to_string(),
            }
        })?;

        let envelope = self.build_envelope(service, payload);
        adapter.send(service, &envelope, client).await?;
        Ok(())
    }

    /// Sole inbound entry point from every adapter.
    ///
    /// Fetch-or-creates the originating service in the `"global"` circle
    /// (refreshing its origin from the envelope) and publishes the envelope
    /// on the service's request stream.
    pub fn handle_request(&self, kind: &str, envelope: RequestEnvelope) {
        route_inbound(&self.circles, kind, envelope);
    }

    /// Stops every registered adapter concurrently, then the inbound
    /// router.
    pub async fn stop_all(&self) {
        let adapters: Vec<Arc<dyn Adapter>> = self
            .adapters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        join_all(adapters.iter().map(|adapter| adapter.stop())).await;

        let router = self.router.lock().take();
        if let Some(router) = router {
            router.abort();
        }
    }

    fn build_envelope(&self, service: &Service, payload: Value) -> RequestEnvelope {
        RequestEnvelope {
            origin: Origin {
                hostname: self.config.system.location.clone(),
                port: self.config.connections.port_for(service.transport()),
                keep_alive: service.keep_alive(),
            },
            metadata: Metadata {
                service_id: service.label().to_string(),
                name: self.identity.name.clone(),
                id: self.identity.id.clone(),
            },
            payload,
        }
    }
}

fn route_inbound(circles: &CircleDirectory, kind: &str, envelope: RequestEnvelope) {
    let circle = circles.global();
    let options = ServiceOptions {
        hostname: envelope.origin.hostname.clone(),
        port: envelope.origin.port,
        transport: kind.to_string(),
        keep_alive: envelope.origin.keep_alive,
    };
    if let Some(service) = circle.service(&envelope.metadata.service_id, Some(&options), true) {
        debug!(service = %service.label(), kind, "routing inbound request");
        service.on_request().publish(&envelope);
    }
}

#[async_trait]
impl Component for ConnectionManager {
    fn name(&self) -> &str {
        "connection"
    }

    async fn init(&self, _ctx: &ComponentContext) -> anyhow::Result<()> {
        let report = self.initialize().await;
        // Bind failures were already logged per adapter and leave the
        // process serving on the transports that did start.
        info!(
            adapters = report.len(),
            failed = report.failures().len(),
            "connection manager initialized"
        );
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop_all().await;
        Ok(())
    }
}
