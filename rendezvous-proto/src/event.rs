//! Named events exchanged between clients and the relay.
//!
//! Every frame is a JSON object of the form `{"event": <name>, "data": <payload>}`.
//! The two keys may come in either order. Negotiation payloads (`sdp`,
//! `candidate`) are held as [`Payload`], the exact JSON text the client sent,
//! so the relay forwards them byte-for-byte without knowing their shape.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

use crate::id::{ConnectionId, RoomId};

/// An opaque JSON value kept as the exact text it arrived in.
///
/// Numbers keep their precision and spelling, and object keys keep their
/// order. Two payloads are equal when their JSON text is identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// The JSON `null` payload, used when a signal omits its payload field.
    #[must_use]
    pub fn null() -> Self {
        Self(RawValue::NULL.to_owned())
    }

    /// Wraps JSON text without re-encoding it.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not a single valid JSON value.
    pub fn from_json(json: impl Into<String>) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json.into()).map(Self)
    }

    /// Encodes a structured value as a payload.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::value::to_raw_value(value).map(Self)
    }

    /// The payload's JSON text, exactly as received.
    #[must_use]
    pub fn as_json(&self) -> &str {
        self.0.get()
    }

    /// Parses the payload into a structured value.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be represented as a [`Value`].
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(self.as_json())
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_json() == other.as_json()
    }
}

impl Eq for Payload {}

impl std::fmt::Display for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_json())
    }
}

/// `{"event", "data"}` envelope with `data` left undecoded until the event
/// name is known.
#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Option<Box<RawValue>>,
}

impl Frame {
    fn data<T: DeserializeOwned, E: de::Error>(&self) -> Result<T, E> {
        let raw = self.data.as_deref().map_or("null", RawValue::get);
        serde_json::from_str(raw).map_err(E::custom)
    }
}

/// Events a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Join a room. Peers already in the room receive `peer-joined`.
    Join(RoomId),
    /// Leave a room. Remaining peers receive `peer-left`.
    Leave(RoomId),
    /// Session description offer for the other members of a room.
    Offer(SdpSignal),
    /// Session description answer for the other members of a room.
    Answer(SdpSignal),
    /// Network-path candidate for the other members of a room.
    Candidate(CandidateSignal),
}

const CLIENT_EVENTS: &[&str] = &["join", "leave", "offer", "answer", "candidate"];

impl ClientEvent {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
            Self::Offer(_) => SignalKind::Offer.name(),
            Self::Answer(_) => SignalKind::Answer.name(),
            Self::Candidate(_) => SignalKind::Candidate.name(),
        }
    }
}

impl<'de> Deserialize<'de> for ClientEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let frame = Frame::deserialize(deserializer)?;
        match frame.event.as_str() {
            "join" => frame.data().map(Self::Join),
            "leave" => frame.data().map(Self::Leave),
            "offer" => frame.data().map(Self::Offer),
            "answer" => frame.data().map(Self::Answer),
            "candidate" => frame.data().map(Self::Candidate),
            other => Err(de::Error::unknown_variant(other, CLIENT_EVENTS)),
        }
    }
}

/// Payload of inbound `offer` and `answer` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdpSignal {
    /// Room whose other members should receive the description.
    pub room_id: RoomId,
    /// Opaque session description.
    #[serde(default)]
    pub sdp: Payload,
}

/// Payload of inbound `candidate` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSignal {
    /// Room whose other members should receive the candidate.
    pub room_id: RoomId,
    /// Opaque network-path candidate.
    #[serde(default)]
    pub candidate: Payload,
}

/// Events the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// First event on every connection, telling the client its own id.
    Connected {
        /// Identifier the relay assigned to this connection.
        id: ConnectionId,
    },
    /// Another connection joined a room this client is in.
    PeerJoined(ConnectionId),
    /// Another connection left a room this client is in, or disconnected.
    PeerLeft(ConnectionId),
    /// Forwarded session description offer.
    Offer {
        /// Opaque session description, as sent by `from`.
        sdp: Payload,
        /// Connection that sent the offer.
        from: ConnectionId,
    },
    /// Forwarded session description answer.
    Answer {
        /// Opaque session description, as sent by `from`.
        sdp: Payload,
        /// Connection that sent the answer.
        from: ConnectionId,
    },
    /// Forwarded network-path candidate.
    Candidate {
        /// Opaque candidate, as sent by `from`.
        candidate: Payload,
        /// Connection that sent the candidate.
        from: ConnectionId,
    },
}

const SERVER_EVENTS: &[&str] = &[
    "connected",
    "peer-joined",
    "peer-left",
    "offer",
    "answer",
    "candidate",
];

#[derive(Deserialize)]
struct Greeting {
    id: ConnectionId,
}

#[derive(Deserialize)]
struct ForwardedSdp {
    #[serde(default)]
    sdp: Payload,
    from: ConnectionId,
}

#[derive(Deserialize)]
struct ForwardedCandidate {
    #[serde(default)]
    candidate: Payload,
    from: ConnectionId,
}

impl<'de> Deserialize<'de> for ServerEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let frame = Frame::deserialize(deserializer)?;
        match frame.event.as_str() {
            "connected" => frame.data().map(|g: Greeting| Self::Connected { id: g.id }),
            "peer-joined" => frame.data().map(Self::PeerJoined),
            "peer-left" => frame.data().map(Self::PeerLeft),
            "offer" => frame
                .data()
                .map(|f: ForwardedSdp| Self::Offer { sdp: f.sdp, from: f.from }),
            "answer" => frame
                .data()
                .map(|f: ForwardedSdp| Self::Answer { sdp: f.sdp, from: f.from }),
            "candidate" => frame.data().map(|f: ForwardedCandidate| Self::Candidate {
                candidate: f.candidate,
                from: f.from,
            }),
            other => Err(de::Error::unknown_variant(other, SERVER_EVENTS)),
        }
    }
}

/// The three negotiation messages the relay forwards verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Session description offer.
    Offer,
    /// Session description answer.
    Answer,
    /// Network-path candidate.
    Candidate,
}

impl SignalKind {
    /// Returns the wire name shared by the inbound and outbound event.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Candidate => "candidate",
        }
    }

    /// Builds the outbound event of this kind carrying `payload` from `from`.
    #[must_use]
    pub fn into_event(self, payload: Payload, from: ConnectionId) -> ServerEvent {
        match self {
            Self::Offer => ServerEvent::Offer { sdp: payload, from },
            Self::Answer => ServerEvent::Answer { sdp: payload, from },
            Self::Candidate => ServerEvent::Candidate {
                candidate: payload,
                from,
            },
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
