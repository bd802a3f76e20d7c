//! Rendezvous relay library.
//!
//! Exposes the relay server for use in tests and embedding. Clients attach
//! over a WebSocket, join named rooms, and exchange opaque WebRTC negotiation
//! messages (offers, answers, candidates) with the other members of a room.
//! The relay forwards those messages without reading or storing them.

pub mod config;
pub mod registry;
pub mod router;
pub mod server;
