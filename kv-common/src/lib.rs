//! kv-common - shared wire protocol and error types for the store
//!
//! This crate defines the length-prefixed request/response framing used
//! between `kv-server` and any client, plus the small error vocabulary
//! shared between `kv-core` and `kv-server`.

pub mod error;
pub mod protocol;

pub use error::{StoreError, StoreResult};
pub use protocol::{decode_request, encode_response, ReplyError, Value, K_MAX_ARGS, K_MAX_MSG};
