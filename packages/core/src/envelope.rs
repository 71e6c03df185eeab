//! Request envelope: the unit exchanged between processes.
//!
//! Envelopes are encoded as MsgPack maps via `rmp_serde::to_vec_named` so
//! field names travel on the wire in camelCase (`keepAlive`, `serviceId`),
//! matching what every peer expects regardless of implementation language.
//! Stream transports length-prefix encoded envelopes; datagram transports
//! carry one envelope per datagram.

use rmpv::Value;
use serde::{Deserialize, Serialize};

/// Errors produced while encoding, decoding, or validating an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// A required identity field was empty.
    #[error("envelope field `{field}` must not be empty")]
    EmptyField { field: &'static str },
    /// MsgPack encoding failed.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// MsgPack decoding failed (truncated or malformed frame).
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Network origin of a request: where the caller can be reached for replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    /// Hostname or address the sending process is reachable at.
    pub hostname: String,
    /// Port the sending process listens on for the transport used.
    pub port: u16,
    /// Whether the caller intends to reuse the connection.
    pub keep_alive: bool,
}

/// Process and service identity carried with every request.
///
/// `name` and `id` identify the *sending process* and are fixed once at
/// startup; `service_id` names the target service and is set per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Label of the service this request addresses.
    pub service_id: String,
    /// Package name of the sending process.
    pub name: String,
    /// Manifest id of the sending process.
    pub id: String,
}

/// The wire-level wrapper combining origin, metadata, and opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub origin: Origin,
    pub metadata: Metadata,
    /// Opaque application payload. Never interpreted by the transport layer.
    pub payload: Value,
}

impl RequestEnvelope {
    /// Encodes the envelope as a named-field MsgPack map.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Decodes an envelope from a single MsgPack frame.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if the bytes are not a well-formed
    /// envelope map.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Checks that the identity fields a router depends on are present.
    ///
    /// Adapters call this on every inbound envelope before dispatching it;
    /// a request without a service id or sender identity cannot be routed.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::EmptyField`] naming the first empty field.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.metadata.service_id.is_empty() {
            return Err(EnvelopeError::EmptyField { field: "metadata.serviceId" });
        }
        if self.metadata.name.is_empty() {
            return Err(EnvelopeError::EmptyField { field: "metadata.name" });
        }
        if self.metadata.id.is_empty() {
            return Err(EnvelopeError::EmptyField { field: "metadata.id" });
        }
        if self.origin.hostname.is_empty() {
            return Err(EnvelopeError::EmptyField { field: "origin.hostname" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RequestEnvelope {
        RequestEnvelope {
            origin: Origin {
                hostname: "10.0.0.7".to_string(),
                port: 4002,
                keep_alive: true,
            },
            metadata: Metadata {
                service_id: "billing".to_string(),
                name: "plexus".to_string(),
                id: "proc-1".to_string(),
            },
            payload: Value::from("ping"),
        }
    }

    #[test]
    fn encode_decode_preserves_envelope() {
        let envelope = sample();
        let bytes = envelope.encode().unwrap();
        let decoded = RequestEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        // The JSON view exposes the same serde names the MsgPack map carries.
        let json = serde_json::to_value(sample()).unwrap();
        assert!(json["origin"].get("keepAlive").is_some());
        assert!(json["metadata"].get("serviceId").is_some());
        assert!(json["origin"].get("keep_alive").is_none());
        assert!(json["metadata"].get("service_id").is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            RequestEnvelope::decode(&[0xc1, 0x00, 0xff]),
            Err(EnvelopeError::Decode(_))
        ));
    }

    #[test]
    fn validate_accepts_complete_envelope() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_service_id() {
        let mut envelope = sample();
        envelope.metadata.service_id.clear();
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::EmptyField { field: "metadata.serviceId" })
        ));
    }

    #[test]
    fn validate_rejects_empty_sender_identity() {
        let mut envelope = sample();
        envelope.metadata.id.clear();
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::EmptyField { field: "metadata.id" })
        ));

        let mut envelope = sample();
        envelope.metadata.name.clear();
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::EmptyField { field: "metadata.name" })
        ));
    }

    #[test]
    fn validate_rejects_empty_hostname() {
        let mut envelope = sample();
        envelope.origin.hostname.clear();
        assert!(matches!(
            envelope.validate(),
            Err(EnvelopeError::EmptyField { field: "origin.hostname" })
        ));
    }

    #[test]
    fn payload_survives_as_opaque_value() {
        let mut envelope = sample();
        envelope.payload = Value::Map(vec![(
            Value::from("op"),
            Value::Array(vec![Value::from(1), Value::from(2)]),
        )]);
        let bytes = envelope.encode().unwrap();
        let decoded = RequestEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, envelope.payload);
    }
}
