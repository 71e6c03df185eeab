//! UDP transport: one envelope per datagram.

use std::net::SocketAddr;

use async_trait::async_trait;
use parking_lot::Mutex;
use plexus_core::RequestEnvelope;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::{
    decode_frame, Adapter, AdapterError, ClientHandle, InboundRequest, ListenerTask,
    OUTBOUND_CHANNEL_CAPACITY,
};
use crate::circles::Service;
use crate::config::UdpConfig;

const KIND: &str = "udp";

/// Largest payload a single UDP datagram can carry (IPv4, minus headers).
const MAX_DATAGRAM: usize = 65_507;

/// UDP transport adapter.
///
/// Datagrams map one-to-one onto envelopes, so there is no framing codec;
/// an envelope that does not fit one datagram is a send error.
pub struct UdpAdapter {
    config: UdpConfig,
    inbound: mpsc::Sender<InboundRequest>,
    shutdown: watch::Sender<bool>,
    listener: Mutex<Option<ListenerTask>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UdpAdapter {
    #[must_use]
    pub fn new(config: UdpConfig, inbound: mpsc::Sender<InboundRequest>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            inbound,
            shutdown,
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Actual bound address once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait]
impl Adapter for UdpAdapter {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn listen(&self) -> Result<(), AdapterError> {
        if self.listener.lock().is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| AdapterError::Bind { kind: KIND, source })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| AdapterError::Io { kind: KIND, source })?;
        *self.local_addr.lock() = Some(local_addr);
        info!(%local_addr, "udp listener bound");

        let inbound = self.inbound.clone();
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    received = socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, _peer)) => match decode_frame(&buf[..len]) {
                                Ok(envelope) => {
                                    if inbound
                                        .send(InboundRequest { kind: KIND, envelope })
                                        .await
                                        .is_err()
                                    {
                                        break;
                                    }
                                }
                                Err(error) => warn!(%error, "dropping malformed datagram"),
                            },
                            // Receive errors on UDP are transient; keep serving.
                            Err(error) => warn!(%error, "udp recv failed"),
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
            info!("udp listener stopped");
        }
    }

    async fn send(
        &self,
        service: &Service,
        envelope: &RequestEnvelope,
        client: Option<&ClientHandle>,
    ) -> Result<(), AdapterError> {
        let frame = envelope.encode()?;
        if frame.len() > MAX_DATAGRAM {
            return Err(AdapterError::FrameTooLarge {
                size: frame.len(),
                max: MAX_DATAGRAM,
            });
        }
        if let Some(client) = client {
            return client.send(frame).await;
        }

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|source| AdapterError::Io { kind: KIND, source })?;
        let hostname = service.hostname();
        socket
            .send_to(&frame, (hostname.as_str(), service.port()))
            .await
            .map_err(|source| AdapterError::Io { kind: KIND, source })?;
        Ok(())
    }

    async fn create_client(&self, service: &Service) -> Option<ClientHandle> {
        let hostname = service.hostname();
        let peer = format!("{}:{}", hostname, service.port());

        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(error) => {
                warn!(%error, "udp client socket bind failed");
                return None;
            }
        };
        if let Err(error) = socket.connect((hostname.as_str(), service.port())).await {
            warn!(%error, %peer, "udp client connect failed");
            return None;
        }

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(error) = socket.send(&frame).await {
                    warn!(%error, "udp write loop ended");
                    break;
                }
            }
        });
        Some(ClientHandle::new(KIND, peer, tx))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use plexus_core::{Metadata, Origin};
    use rmpv::Value;

    use super::*;
    use crate::circles::{Circle, ServiceOptions};

    fn envelope(payload: Value) -> RequestEnvelope {
        RequestEnvelope {
            origin: Origin {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                keep_alive: false,
            },
            metadata: Metadata {
                service_id: "svc-udp".to_string(),
                name: "plexus".to_string(),
                id: "proc".to_string(),
            },
            payload,
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
                    transport: "udp".to_string(),
                    keep_alive: false,
                }),
                false,
            )
            .unwrap()
    }

    fn adapter(port: u16) -> (UdpAdapter, mpsc::Receiver<InboundRequest>) {
        let (tx, rx) = mpsc::channel(16);
        let config = UdpConfig {
            host: "127.0.0.1".to_string(),
            port,
            autoload: true,
        };
        (UdpAdapter::new(config, tx), rx)
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
            .send(&service(port), &envelope(Value::from("dgram")), None)
            .await
            .unwrap();

        let request = recv(&mut rx).await;
        assert_eq!(request.kind, "udp");
        assert_eq!(request.envelope.payload, Value::from("dgram"));

        adapter.stop().await;
    }

    #[tokio::test]
    async fn client_handle_is_reusable() {
        let (adapter, mut rx) = adapter(0);
        adapter.listen().await.unwrap();
        let port = adapter.local_addr().unwrap().port();
        let target = service(port);

        let client = adapter.create_client(&target).await.unwrap();
        adapter
            .send(&target, &envelope(Value::from(1)), Some(&client))
            .await
            .unwrap();
        adapter
            .send(&target, &envelope(Value::from(2)), Some(&client))
            .await
            .unwrap();

        assert_eq!(recv(&mut rx).await.envelope.payload, Value::from(1));
        assert_eq!(recv(&mut rx).await.envelope.payload, Value::from(2));

        adapter.stop().await;
    }

    #[tokio::test]
    async fn oversized_envelope_is_rejected_before_sending() {
        let (adapter, _rx) = adapter(0);
        let huge = envelope(Value::Binary(vec![0u8; MAX_DATAGRAM + 1]));

        assert!(matches!(
            adapter.send(&service(1), &huge, None).await,
            Err(AdapterError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn stop_without_listen_is_safe() {
        let (adapter, _rx) = adapter(0);
        adapter.stop().await;
    }
}
