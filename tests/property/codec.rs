#![allow(clippy::unwrap_used)]

//! Property-based codec tests.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text and bytes never cause a panic in `decode` (returns `Err`
//!    gracefully or a valid event).
//! 2. Negotiation payloads of any JSON shape pass through an inbound decode
//!    and an outbound encode unchanged, down to the exact JSON text.

use proptest::prelude::*;
use rendezvous_proto::codec;
use rendezvous_proto::event::{ClientEvent, Payload, ServerEvent, SignalKind};
use rendezvous_proto::id::ConnectionId;
use serde_json::{Value, json};
use uuid::Uuid;

/// Strategy for generating arbitrary JSON values a browser might send as an
/// SDP or candidate payload.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        ".{0,32}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::hash_map("[a-zA-Z]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn decode_arbitrary_text_never_panics(text in ".{0,256}") {
        let _ = codec::decode::<ClientEvent>(&text);
    }

    #[test]
    fn decode_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = codec::decode_bytes::<ClientEvent>(&bytes);
    }

    #[test]
    fn signal_payload_passes_through_unchanged(
        payload in arb_json(),
        room in ".{0,16}",
        sender in any::<u128>(),
    ) {
        let payload_text = payload.to_string();
        let frame = json!({"event": "offer", "data": {"roomId": room, "sdp": payload}}).to_string();
        let ClientEvent::Offer(signal) = codec::decode::<ClientEvent>(&frame).unwrap() else {
            panic!("expected Offer");
        };
        prop_assert_eq!(signal.room_id.as_str(), room.as_str());
        prop_assert_eq!(signal.sdp.as_json(), payload_text.as_str());

        let from = ConnectionId::from_uuid(Uuid::from_u128(sender));
        let outbound = codec::encode(&SignalKind::Offer.into_event(signal.sdp, from)).unwrap();
        let forwarded: Value = serde_json::from_str(&outbound).unwrap();
        prop_assert_eq!(&forwarded["data"]["sdp"], &payload);
        let from_text = from.to_string();
        prop_assert_eq!(forwarded["data"]["from"].as_str(), Some(from_text.as_str()));

        let decoded: ServerEvent = codec::decode(&outbound).unwrap();
        let expected = Payload::from_json(payload_text).unwrap();
        prop_assert_eq!(decoded, ServerEvent::Offer { sdp: expected, from });
    }

    #[test]
    fn numbers_keep_their_spelling(
        big in "[1-9][0-9]{20,30}",
        frac in "[0-9]{1,6}0",
        keys in prop::collection::vec("[a-z]{1,6}", 1..5),
    ) {
        let fields: Vec<String> = keys
            .iter()
            .rev()
            .enumerate()
            .map(|(i, k)| format!(r#""{k}{i}":{big}.{frac}"#))
            .collect();
        let raw = format!("{{{}}}", fields.join(","));
        let frame = format!(r#"{{"event":"candidate","data":{{"roomId":"r","candidate":{raw}}}}}"#);
        let ClientEvent::Candidate(signal) = codec::decode::<ClientEvent>(&frame).unwrap() else {
            panic!("expected Candidate");
        };

        let from = ConnectionId::from_uuid(Uuid::from_u128(1));
        let outbound = codec::encode(&SignalKind::Candidate.into_event(signal.candidate, from)).unwrap();
        prop_assert!(outbound.contains(&raw), "payload rewritten: {}", outbound);
    }
}
