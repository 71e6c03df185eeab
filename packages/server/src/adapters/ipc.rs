//! IPC transport: length-delimited envelope frames over Unix domain sockets.
//!
//! Socket paths follow the `<prefix><port>` convention (default
//! `/tmp/socket-<port>`), so a peer's ipc "port" selects which socket file
//! to connect to.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use plexus_core::RequestEnvelope;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::{
    read_stream_frames, spawn_stream_writer, write_one_frame, Adapter, AdapterError, ClientHandle,
    InboundRequest, ListenerTask, OUTBOUND_CHANNEL_CAPACITY,
};
use crate::circles::Service;
use crate::config::IpcConfig;

const KIND: &str = "ipc";

/// Unix-domain-socket transport adapter.
pub struct IpcAdapter {
    config: IpcConfig,
    inbound: mpsc::Sender<InboundRequest>,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<ListenerTask>>,
    bound_path: Mutex<Option<PathBuf>>,
}

impl IpcAdapter {
    #[must_use]
    pub fn new(config: IpcConfig, inbound: mpsc::Sender<InboundRequest>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            inbound,
            shutdown,
            listener: Mutex::new(None),
            bound_path: Mutex::new(None),
        }
    }

    /// Path this adapter binds its own listener to.
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.config.socket_path(self.config.port)
    }

    fn path_for(&self, service: &Service) -> PathBuf {
        self.config.socket_path(service.port())
    }
}

#[async_trait]
impl Adapter for IpcAdapter {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn listen(&self) -> Result<(), AdapterError> {
        if self.listener.lock().is_some() {
            return Ok(());
        }

        let path = self.socket_path();
        // A stale socket file from an unclean exit would fail the bind.
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
        let listener =
            UnixListener::bind(&path).map_err(|source| AdapterError::Bind { kind: KIND, source })?;
        *self.bound_path.lock() = Some(path.clone());
        info!(path = %path.display(), "ipc listener bound");

        let inbound = self.inbound.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, _peer)) => {
                                tokio::spawn(read_stream_frames(
                                    KIND,
                                    stream,
                                    inbound.clone(),
                                    shutdown.clone(),
                                ));
                            }
                            Err(error) => warn!(%error, "ipc accept failed"),
                        }
                    }
                }
            }
        });
        *self.listener.lock() = Some(ListenerTask::new(handle));
        Ok(())
    }

    async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.listener.lock().take();
        if let Some(task) = task {
            task.join().await;
        }
        let path = self.bound_path.lock().take();
        if let Some(path) = path {
            let _ = std::fs::remove_file(&path);
            info!(path = %path.display(), "ipc listener stopped");
        }
    }

    async fn send(
        &self,
        service: &Service,
        envelope: &RequestEnvelope,
        client: Option<&ClientHandle>,
    ) -> Result<(), AdapterError> {
        let frame = envelope.encode()?;
        if let Some(client) = client {
            return client.send(frame).await;
        }

        let path = self.path_for(service);
        let stream = UnixStream::connect(&path)
            .await
            .map_err(|source| AdapterError::Io { kind: KIND, source })?;
        write_one_frame(KIND, stream, frame).await
    }

    async fn create_client(&self, service: &Service) -> Option<ClientHandle> {
        let path = self.path_for(service);
        let stream = match UnixStream::connect(&path).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, path = %path.display(), "ipc client connect failed");
                return None;
            }
        };
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        spawn_stream_writer(KIND, stream, rx);
        Some(ClientHandle::new(KIND, path.display().to_string(), tx))
    }
}
