//! Session state and the protocol rules that mutate it.
//!
//! Nothing in this crate performs I/O. Callers serialize access to a
//! [`ProtocolHandler`] and fan its [`Outcome`]s out over whatever transport
//! they run.

pub mod handler;
pub mod store;

pub use handler::{
    decode_request, decode_request_bytes, decode_request_value, BroadcastStyle, Outcome,
    ProtocolHandler,
};
pub use store::SessionStore;
