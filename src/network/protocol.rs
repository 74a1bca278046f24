//! Protocol Messages
//!
//! Wire format for both WebSocket endpoints. Every frame is a JSON envelope
//! `{ "type": <discriminator>, "payload": <object> }`.
//!
//! Inbound frames are decoded in two steps: the discriminator first, then
//! the payload into the concrete shape for that discriminator. A frame with
//! an unknown discriminator or a mismatched payload is rejected as a whole.

use std::fmt;
use serde::{Serialize, Deserialize, Deserializer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::core::player::{Player, PlayerId, MapId};
use crate::presence::proximity::{ProximityPolicy, VisibleSet};
use crate::presence::snapshot::MapGroup;

/// Envelope discriminators.
pub mod message_type {
    /// Client binds its identity.
    pub const CONNECT: &str = "connect";
    /// Peer negotiation, both directions.
    pub const SIGNALING: &str = "signaling";
    /// Full world snapshot from the upstream feed.
    pub const ALL_MAPS: &str = "all-maps";
    /// Personalized presence update to a client.
    pub const POSITION: &str = "position";
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON envelope with a string `type`.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Discriminator is not accepted on this endpoint.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Payload does not match the shape for its discriminator.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// Discriminator the payload was decoded for.
        kind: &'static str,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// Outbound message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// First decoding stage: discriminator plus an undecoded payload.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl RawEnvelope {
    fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(ProtocolError::Malformed)
    }

    fn payload<T: DeserializeOwned>(self, kind: &'static str) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload)
            .map_err(|source| ProtocolError::InvalidPayload { kind, source })
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

/// Identity handshake sent by a client.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectPayload {
    /// Identity the client claims.
    pub guid: PlayerId,
    /// Handshake secret. Accepted, not verified.
    #[serde(default)]
    pub secret: String,
}

impl fmt::Debug for ConnectPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectPayload")
            .field("guid", &self.guid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Peer negotiation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Session description offer.
    Offer,
    /// Session description answer.
    Answer,
    /// ICE candidate.
    Candidate,
}

/// Peer negotiation message relayed between clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingPayload {
    /// Sender identity, as claimed by the sender.
    pub from: PlayerId,
    /// Target identity. `None` fans out to everyone but the sender.
    #[serde(default, deserialize_with = "deserialize_target", skip_serializing_if = "Option::is_none")]
    pub to: Option<PlayerId>,
    /// Negotiation step.
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Opaque negotiation data (SDP or candidate).
    pub data: String,
}

/// Missing, `null` and `0` all mean "no specific target".
fn deserialize_target<'de, D>(deserializer: D) -> Result<Option<PlayerId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<u64>::deserialize(deserializer)?;
    Ok(raw.and_then(PlayerId::new))
}

/// Full world snapshot from the upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllMapsPayload {
    /// Every map group at one instant.
    pub data: Vec<MapGroup>,
}

/// Position update under the distance policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyPlayersPayload {
    /// Recipient's own record.
    pub player: Player,
    /// Players within range.
    pub nearby_players: Vec<Player>,
}

/// Position update under the same-map policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPlayersPayload {
    /// Recipient's map.
    pub map_id: MapId,
    /// Every other player on that map.
    pub players: Vec<Player>,
}

/// Personalized presence update. Shape depends on the proximity policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PositionPayload {
    /// `{ player, nearbyPlayers }`
    Nearby(NearbyPlayersPayload),
    /// `{ mapId, players }`
    Map(MapPlayersPayload),
}

impl PositionPayload {
    /// Package a visible set in the shape the policy calls for.
    pub fn from_visible(set: VisibleSet, policy: &ProximityPolicy) -> Self {
        match policy {
            ProximityPolicy::SameMap => PositionPayload::Map(MapPlayersPayload {
                map_id: set.map_id,
                players: set.visible,
            }),
            ProximityPolicy::Distance { .. } => PositionPayload::Nearby(NearbyPlayersPayload {
                player: set.player,
                nearby_players: set.visible,
            }),
        }
    }

    /// Players included in the update, excluding the recipient's own record.
    pub fn visible(&self) -> &[Player] {
        match self {
            PositionPayload::Nearby(p) => &p.nearby_players,
            PositionPayload::Map(p) => &p.players,
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

/// Messages accepted on the client endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Bind identity.
    Connect(ConnectPayload),
    /// Relay a negotiation step.
    Signaling(SignalingPayload),
}

/// Messages accepted on the ingest endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum UpstreamMessage {
    /// Full world snapshot.
    AllMaps(AllMapsPayload),
}

/// Messages sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Personalized presence update.
    Position(PositionPayload),
    /// Relayed negotiation step.
    Signaling(SignalingPayload),
}

impl ClientMessage {
    /// Decode from a JSON text frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Self::from_slice(s.as_bytes())
    }

    /// Decode from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw = RawEnvelope::parse(bytes)?;
        match raw.kind.as_str() {
            message_type::CONNECT => raw.payload(message_type::CONNECT).map(ClientMessage::Connect),
            message_type::SIGNALING => raw.payload(message_type::SIGNALING).map(ClientMessage::Signaling),
            _ => Err(ProtocolError::UnknownType(raw.kind)),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

impl UpstreamMessage {
    /// Decode from a JSON text frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Self::from_slice(s.as_bytes())
    }

    /// Decode from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw = RawEnvelope::parse(bytes)?;
        match raw.kind.as_str() {
            message_type::ALL_MAPS => raw.payload(message_type::ALL_MAPS).map(UpstreamMessage::AllMaps),
            _ => Err(ProtocolError::UnknownType(raw.kind)),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(s).map_err(ProtocolError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::player::test_id;
    use crate::core::position::Position;
    use crate::presence::proximity::VisibilityRange;

    #[test]
    fn test_decode_connect() {
        let msg = ClientMessage::from_json(
            r#"{ "type": "connect", "payload": { "guid": 17, "secret": "hunter2" } }"#,
        ).unwrap();

        match msg {
            ClientMessage::Connect(payload) => {
                assert_eq!(payload.guid, test_id(17));
                assert_eq!(payload.secret, "hunter2");
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_connect_debug_redacts_secret() {
        let payload = ConnectPayload { guid: test_id(1), secret: "hunter2".into() };
        assert!(!format!("{:?}", payload).contains("hunter2"));
    }

    #[test]
    fn test_decode_signaling_targets() {
        let targeted = ClientMessage::from_json(
            r#"{ "type": "signaling", "payload": { "from": 1, "to": 2, "type": "offer", "data": "v=0" } }"#,
        ).unwrap();
        let ClientMessage::Signaling(targeted) = targeted else {
            panic!("Wrong message type");
        };
        assert_eq!(targeted.to, Some(test_id(2)));
        assert_eq!(targeted.kind, SignalKind::Offer);

        for to in [r#""to": 0,"#, r#""to": null,"#, ""] {
            let json = format!(
                r#"{{ "type": "signaling", "payload": {{ "from": 1, {} "type": "candidate", "data": "c" }} }}"#,
                to
            );
            let ClientMessage::Signaling(payload) = ClientMessage::from_json(&json).unwrap() else {
                panic!("Wrong message type");
            };
            assert_eq!(payload.to, None);
        }
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(matches!(
            ClientMessage::from_json("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"{ "payload": {} }"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"{ "type": "dance", "payload": {} }"#),
            Err(ProtocolError::UnknownType(t)) if t == "dance"
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"{ "type": "connect", "payload": { "guid": "abc" } }"#),
            Err(ProtocolError::InvalidPayload { kind: "connect", .. })
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"{ "type": "connect", "payload": { "guid": 0 } }"#),
            Err(ProtocolError::InvalidPayload { kind: "connect", .. })
        ));
        assert!(matches!(
            ClientMessage::from_json(
                r#"{ "type": "signaling", "payload": { "from": 1, "type": "bye", "data": "" } }"#
            ),
            Err(ProtocolError::InvalidPayload { kind: "signaling", .. })
        ));
    }

    #[test]
    fn test_client_endpoint_rejects_upstream_types() {
        let frame = r#"{ "type": "all-maps", "payload": { "data": [] } }"#;

        assert!(matches!(ClientMessage::from_json(frame), Err(ProtocolError::UnknownType(_))));
        assert!(matches!(UpstreamMessage::from_json(frame), Ok(UpstreamMessage::AllMaps(_))));
    }

    #[test]
    fn test_decode_all_maps() {
        let frame = r#"{
            "type": "all-maps",
            "payload": { "data": [
                { "mapId": 0, "players": [
                    { "guid": 3, "name": "Anduin",
                      "position": { "x": 1.0, "y": 2.0, "z": 3.0, "o": 0.5 },
                      "alive": true, "zone": 12, "area": 87, "mapId": 0 }
                ] },
                { "mapId": 1, "players": [] }
            ] }
        }"#;

        let UpstreamMessage::AllMaps(payload) = UpstreamMessage::from_json(frame).unwrap();
        assert_eq!(payload.data.len(), 2);
        assert_eq!(payload.data[0].players[0].guid, test_id(3));
        assert_eq!(payload.data[0].players[0].position.o, 0.5);
    }

    #[test]
    fn test_all_maps_tolerates_partial_players() {
        let frame = r#"{
            "type": "all-maps",
            "payload": { "data": [
                { "mapId": 0, "players": [
                    { "guid": 3, "name": "Anduin", "position": { "x": 1.0, "y": 2.0 }, "mapId": 0 },
                    { "guid": 4, "name": "Varian", "alive": true, "zone": 12, "area": 87, "mapId": 0 }
                ] }
            ] }
        }"#;

        let UpstreamMessage::AllMaps(payload) = UpstreamMessage::from_json(frame).unwrap();
        let players = &payload.data[0].players;
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].position, Position::planar(1.0, 2.0));
        assert!(!players[0].alive);
        assert_eq!(players[1].zone, 12);
    }

    #[test]
    fn test_position_payload_shapes() {
        let me = Player::new(test_id(1), "me", 7, Position::planar(0.0, 0.0));
        let other = Player::new(test_id(2), "other", 7, Position::planar(1.0, 0.0));
        let set = VisibleSet { player: me, map_id: 7, visible: vec![other] };

        let nearby = PositionPayload::from_visible(set.clone(), &ProximityPolicy::Distance {
            range: VisibilityRange::Small,
            include_self: false,
        });
        let json = ServerMessage::Position(nearby).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "position");
        assert_eq!(value["payload"]["player"]["guid"], 1);
        assert_eq!(value["payload"]["nearbyPlayers"][0]["guid"], 2);

        let map = PositionPayload::from_visible(set, &ProximityPolicy::SameMap);
        let json = ServerMessage::Position(map).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["payload"]["mapId"], 7);
        assert_eq!(value["payload"]["players"][0]["guid"], 2);
    }

    #[test]
    fn test_signaling_passes_through_unchanged() {
        let payload = SignalingPayload {
            from: test_id(5),
            to: None,
            kind: SignalKind::Answer,
            data: "{\"sdp\":\"v=0\\r\\n\"}".to_string(),
        };

        let json = ServerMessage::Signaling(payload.clone()).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "signaling");
        assert_eq!(value["payload"]["type"], "answer");
        assert!(value["payload"].get("to").is_none());

        assert_eq!(ServerMessage::from_json(&json).unwrap(), ServerMessage::Signaling(payload));
    }

    #[test]
    fn test_client_message_encodes_envelope() {
        let msg = ClientMessage::Connect(ConnectPayload { guid: test_id(9), secret: String::new() });
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["type"], "connect");
        assert_eq!(value["payload"]["guid"], 9);
    }
}
