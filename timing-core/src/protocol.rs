//! The JSON wire protocol exchanged between a timing client and the timing server.
//!
//! Every frame is a UTF-8 JSON object tagged by `type`. `id` is the timing-object's URL path.
//! Timestamps on `info`/`change` vectors are seconds (float, matching [`StateVector`]); `sync`
//! timestamps are milliseconds (integer), matching wall-clock deltas in [`crate::sync`]-style
//! skew arithmetic.

use serde::{Deserialize, Serialize};

use crate::vector::StateVector;

/// The `vector` payload nested in `info`/`change`/`update` frames.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VectorPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl From<StateVector> for VectorPayload {
    fn from(v: StateVector) -> Self {
        VectorPayload {
            position: Some(v.position),
            velocity: Some(v.velocity),
            acceleration: Some(v.acceleration),
            timestamp: Some(v.timestamp),
        }
    }
}

impl VectorPayload {
    /// Interpret this payload as a full `StateVector` (used for `info`/`change`, where every
    /// field is always present). Missing fields default to `0.0` / "now", matching
    /// [`StateVector::new`].
    pub fn into_full_vector(self) -> StateVector {
        StateVector::new(
            self.position.unwrap_or(0.0),
            self.velocity.unwrap_or(0.0),
            self.acceleration.unwrap_or(0.0),
            self.timestamp,
        )
    }
}

/// The `client` side of a `sync` request/response.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncClientTiming {
    /// Local ms-since-epoch at which the client sent the request.
    pub sent: i64,
}

/// The `server` side of a `sync` response.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncServerTiming {
    /// Reference ms-since-epoch at which the server received the request.
    pub received: i64,
    /// Reference ms-since-epoch at which the server sent the response.
    pub sent: i64,
}

/// A message sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Info { id: String },
    Update { id: String, vector: VectorPayload },
    Sync { id: String, client: SyncClientTiming },
}

/// A message sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Info { id: String, vector: VectorPayload },
    Change { id: String, vector: VectorPayload },
    Sync {
        id: String,
        client: SyncClientTiming,
        server: SyncServerTiming,
        delta: i64,
    },
}

impl ClientMessage {
    pub fn id(&self) -> &str {
        match self {
            ClientMessage::Info { id } => id,
            ClientMessage::Update { id, .. } => id,
            ClientMessage::Sync { id, .. } => id,
        }
    }

    /// Whether this frame is a `sync` frame, used by the channel demultiplexer to route
    /// it to the sync clock rather than the provider.
    pub fn is_sync(&self) -> bool {
        matches!(self, ClientMessage::Sync { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ClientMessage always serializes")
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    pub fn id(&self) -> &str {
        match self {
            ServerMessage::Info { id, .. } => id,
            ServerMessage::Change { id, .. } => id,
            ServerMessage::Sync { id, .. } => id,
        }
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, ServerMessage::Sync { .. })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ServerMessage always serializes")
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_round_trips_with_null_fields_meaning_keep_current() {
        let msg = ClientMessage::Update {
            id: "/clock".into(),
            vector: VectorPayload {
                position: Some(5.0),
                velocity: None,
                acceleration: None,
                timestamp: None,
            },
        };
        let json = msg.to_json();
        assert!(!json.contains("velocity"));
        let parsed = ClientMessage::from_json(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn client_message_tags_id_and_sync_kind() {
        let sync = ClientMessage::Sync {
            id: "/clock".into(),
            client: SyncClientTiming { sent: 123 },
        };
        assert_eq!(sync.id(), "/clock");
        assert!(sync.is_sync());

        let info = ClientMessage::Info { id: "/clock".into() };
        assert!(!info.is_sync());
    }

    #[test]
    fn vector_payload_defaults_missing_fields_to_zero() {
        let payload = VectorPayload {
            position: Some(5.0),
            velocity: None,
            acceleration: None,
            timestamp: Some(10.0),
        };
        let vector = payload.into_full_vector();
        assert_eq!(vector.position, 5.0);
        assert_eq!(vector.velocity, 0.0);
        assert_eq!(vector.acceleration, 0.0);
        assert_eq!(vector.timestamp, 10.0);
    }

    #[test]
    fn server_message_from_wire_example() {
        let json = r#"{"type":"change","id":"/x","vector":{"position":5,"velocity":1,"acceleration":0,"timestamp":12.5}}"#;
        let msg = ServerMessage::from_json(json).unwrap();
        match msg {
            ServerMessage::Change { id, vector } => {
                assert_eq!(id, "/x");
                assert_eq!(vector.position, Some(5.0));
            }
            _ => panic!("expected Change"),
        }
    }

    #[test]
    fn malformed_json_is_an_error_not_a_panic() {
        assert!(ClientMessage::from_json("not json").is_err());
        assert!(ServerMessage::from_json("{\"type\":\"bogus\"}").is_err());
    }
}
