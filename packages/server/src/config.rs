//! Server configuration types with defaults.
//!
//! Everything is deserializable so the binary can overlay a JSON config
//! file on top of the defaults; individual fields fall back to their
//! defaults when absent.

use std::path::PathBuf;

use serde::Deserialize;
use uuid::Uuid;

/// Process identity stamped into every outbound envelope's metadata.
///
/// Fixed once at startup: peers use it to attribute inbound requests to a
/// sending process across transports.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Identity {
    /// Manifest id of this process instance.
    pub id: String,
    /// Package name of this process.
    pub name: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: "plexus".to_string(),
        }
    }
}

/// Host-level settings read when building outbound envelopes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Address this process is reachable at, advertised as `origin.hostname`.
    pub location: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            location: "127.0.0.1".to_string(),
        }
    }
}

/// Per-transport connection tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    pub ipc: IpcConfig,
    pub tcp: TcpConfig,
    pub udp: UdpConfig,
}

impl ConnectionsConfig {
    /// Advertised local port for a transport kind.
    ///
    /// Unknown kinds advertise port 0; an envelope still routes, the peer
    /// just has no reply port for that transport.
    #[must_use]
    pub fn port_for(&self, kind: &str) -> u16 {
        match kind {
            "ipc" => self.ipc.port,
            "tcp" => self.tcp.port,
            "udp" => self.udp.port,
            _ => 0,
        }
    }
}

/// Unix-domain-socket transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket path prefix; the port is appended to form the full path.
    pub path: PathBuf,
    pub port: u16,
    /// Whether the transport starts listening at boot.
    pub autoload: bool,
}

impl IpcConfig {
    /// Full socket path for a given port (`<path><port>`).
    #[must_use]
    pub fn socket_path(&self, port: u16) -> PathBuf {
        PathBuf::from(format!("{}{port}", self.path.display()))
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/socket-"),
            port: 4001,
            autoload: true,
        }
    }
}

/// TCP transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Bind address. Port 0 means OS-assigned.
    pub host: String,
    pub port: u16,
    pub autoload: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4002,
            autoload: true,
        }
    }
}

/// UDP transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub host: String,
    pub port: u16,
    pub autoload: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4003,
            autoload: true,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub identity: Identity,
    pub system: SystemConfig,
    pub connections: ConnectionsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_transport_table() {
        let config = ServerConfig::default();
        assert_eq!(config.connections.ipc.port, 4001);
        assert_eq!(config.connections.tcp.port, 4002);
        assert_eq!(config.connections.udp.port, 4003);
        assert!(config.connections.ipc.autoload);
        assert_eq!(config.system.location, "127.0.0.1");
        assert_eq!(config.identity.name, "plexus");
        assert!(!config.identity.id.is_empty());
    }

    #[test]
    fn port_for_unknown_kind_is_zero() {
        let connections = ConnectionsConfig::default();
        assert_eq!(connections.port_for("tcp"), 4002);
        assert_eq!(connections.port_for("carrier-pigeon"), 0);
    }

    #[test]
    fn ipc_socket_path_appends_port() {
        let ipc = IpcConfig::default();
        assert_eq!(ipc.socket_path(4001), PathBuf::from("/tmp/socket-4001"));
    }

    #[test]
    fn partial_config_file_overlays_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"connections": {"tcp": {"port": 9000}}, "identity": {"name": "edge"}}"#,
        )
        .unwrap();
        assert_eq!(config.connections.tcp.port, 9000);
        // Untouched fields keep their defaults.
        assert_eq!(config.connections.tcp.host, "0.0.0.0");
        assert_eq!(config.connections.udp.port, 4003);
        assert_eq!(config.identity.name, "edge");
    }

    #[test]
    fn identity_defaults_are_unique_per_process() {
        let a = Identity::default();
        let b = Identity::default();
        assert_ne!(a.id, b.id);
    }
}
