//! Shared protocol definitions for the rendezvous relay wire format.

pub mod codec;
pub mod event;
pub mod id;
