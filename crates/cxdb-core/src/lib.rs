//! # cxdb-core
//!
//! Foundation layer for the CXDB event hook: the binary wire codec, payload
//! serialization and hashing, and structured logging setup.
//!
//! Nothing in this crate performs network I/O. The protocol client in
//! `cxdb-client` and the event router in `cxdb-hooks` build on it:
//!
//! - **Frames**: [`frame::encode_frame`] / [`frame::decode_frame`] for the
//!   16-byte little-endian header plus payload
//! - **Append body**: [`append::encode_append_payload`] and the
//!   deterministic [`append::idempotency_key`]
//! - **Payloads**: [`payload::Payload`] (integer tag → msgpack value) and
//!   [`payload::serialize_and_hash`] (msgpack + BLAKE3-256)
//! - **Errors**: [`WireError`] for local validation failures
//! - **Logging**: [`logging::init_subscriber`] and test log capture

#![deny(unsafe_code)]

pub mod append;
pub mod constants;
pub mod errors;
pub mod frame;
pub mod logging;
pub mod payload;

pub use errors::{Result, WireError};
pub use payload::{ContentHash, Payload};
