//! TCP transport: length-delimited envelope frames over `TcpStream`s.

use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;
use plexus_core::RequestEnvelope;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::{
    read_stream_frames, spawn_stream_writer, write_one_frame, Adapter, AdapterError, ClientHandle,
    InboundRequest, ListenerTask, OUTBOUND_CHANNEL_CAPACITY,
};
use crate::circles::Service;
use crate::config::TcpConfig;

const KIND: &str = "tcp";

/// TCP transport adapter.
///
/// Inbound: one accept loop, one read task per connection. Outbound:
/// one-shot connections for bare sends, a write-loop-backed
/// [`ClientHandle`] for reusable clients.
pub struct TcpAdapter {
    config: TcpConfig,
    inbound: mpsc::Sender<InboundRequest>,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<ListenerTask>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl TcpAdapter {
    #[must_use]
    pub fn new(config: TcpConfig, inbound: mpsc::Sender<InboundRequest>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            inbound,
            shutdown,
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Actual bound address once listening. Differs from the configured
    /// address when port 0 (OS-assigned) is used.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait]
impl Adapter for TcpAdapter {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn listen(&self) -> Result<(), AdapterError> {
        if self.listener.lock().is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| AdapterError::Bind { kind: KIND, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| AdapterError::Io { kind: KIND, source })?;
        *self.local_addr.lock() = Some(local_addr);
        info!(%local_addr, "tcp listener bound");

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
                            Err(error) => warn!(%error, "tcp accept failed"),
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
            info!("tcp listener stopped");
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

        let peer = format!("{}:{}", service.hostname(), service.port());
        let stream = TcpStream::connect(&peer)
            .await
            .map_err(|source| AdapterError::Io { kind: KIND, source })?;
        write_one_frame(KIND, stream, frame).await
    }

    async fn create_client(&self, service: &Service) -> Option<ClientHandle> {
        let peer = format!("{}:{}", service.hostname(), service.port());
        let stream = match TcpStream::connect(&peer).await {
            Ok(stream) => stream,
            Err(error) => {
                warn!(%error, %peer, "tcp client connect failed");
                return None;
            }
        };
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        spawn_stream_writer(KIND, stream, rx);
        Some(ClientHandle::new(KIND, peer, tx))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::SinkExt;
    use plexus_core::{Metadata, Origin};
    use rmpv::Value;
    use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};

    use super::*;
    use crate::circles::{Circle, ServiceOptions};

    fn envelope(service_id: &str) -> RequestEnvelope {
        RequestEnvelope {
            origin: Origin {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                keep_alive: false,
            },
            metadata: Metadata {
                service_id: service_id.to_string(),
                name: "plexus".to_string(),
                id: "proc".to_string(),
            },
            payload: Value::from("hello"),
        }
    }

    fn service(port: u16) -> Arc<Service> {
        let circle = Circle::new("test");
        circle
            .service(
                "svc",
                Some(&ServiceOptions {
                    hostname: "127.0.0.1".to_string(),
                    port,
                    transport: "tcp".to_string(),
                    keep_alive: true,
                }),
                false,
            )
            .unwrap()
    }

    fn adapter(port: u16) -> (TcpAdapter, mpsc::Receiver<InboundRequest>) {
        let (tx, rx) = mpsc::channel(16);
        let config = TcpConfig {
            host: "127.0.0.1".to_string(),
            port,
            autoload: true,
        };
        (TcpAdapter::new(config, tx), rx)
    }

    async fn recv(rx: &mut mpsc::Receiver<InboundRequest>) -> InboundRequest {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for inbound request")
            .expect("inbound channel closed")
    }

    #[tokio::test]
    async fn one_shot_send_is_delivered_inbound() {
        let (adapter, mut rx) = adapter(0);
        adapter.listen().await.unwrap();
        let port = adapter.local_addr().unwrap().port();

        adapter
            .send(&service(port), &envelope("svc-a"), None)
            .await
            .unwrap();

        let request = recv(&mut rx).await;
        assert_eq!(request.kind, "tcp");
        assert_eq!(request.envelope.metadata.service_id, "svc-a");
        assert_eq!(request.envelope.payload, Value::from("hello"));

        adapter.stop().await;
    }

    #[tokio::test]
    async fn client_handle_is_reusable() {
        let (adapter, mut rx) = adapter(0);
        adapter.listen().await.unwrap();
        let port = adapter.local_addr().unwrap().port();
        let target = service(port);

        let client = adapter.create_client(&target).await.unwrap();
        assert!(adapter.is_connected(&client));

        adapter
            .send(&target, &envelope("first"), Some(&client))
            .await
            .unwrap();
        adapter
            .send(&target, &envelope("second"), Some(&client))
            .await
            .unwrap();

        assert_eq!(recv(&mut rx).await.envelope.metadata.service_id, "first");
        assert_eq!(recv(&mut rx).await.envelope.metadata.service_id, "second");

        adapter.stop().await;
    }

    #[tokio::test]
    async fn create_client_returns_none_when_peer_is_unreachable() {
        let (adapter, _rx) = adapter(0);
        // Nothing is listening on the target port.
        let unreachable = service(1);
        assert!(adapter.create_client(&unreachable).await.is_none());
    }

    #[tokio::test]
    async fn listen_reports_bind_failure() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = occupied.local_addr().unwrap().port();

        let (adapter, _rx) = adapter(port);
        assert!(matches!(
            adapter.listen().await,
            Err(AdapterError::Bind { kind: "tcp", .. })
        ));
    }

    #[tokio::test]
    async fn stop_without_listen_is_safe() {
        let (adapter, _rx) = adapter(0);
        adapter.stop().await;
        adapter.stop().await;
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_but_connection_survives_valid_ones() {
        let (adapter, mut rx) = adapter(0);
        adapter.listen().await.unwrap();
        let port = adapter.local_addr().unwrap().port();

        // A well-framed but undecodable payload is dropped at the edge.
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut sink = FramedWrite::new(stream, LengthDelimitedCodec::new());
        sink.send(Bytes::from_static(&[0xc1, 0xc1, 0xc1])).await.unwrap();
        sink.send(Bytes::from(envelope("after-garbage").encode().unwrap()))
            .await
            .unwrap();

        let request = recv(&mut rx).await;
        assert_eq!(request.envelope.metadata.service_id, "after-garbage");

        adapter.stop().await;
    }
}
