//! # cxdb-client
//!
//! Async client for the subset of the CXDB binary protocol the event hook
//! needs: handshake, context create/fork, head lookup, and turn append.
//!
//! - [`CxdbClient`]: one TCP connection, one request in flight at a time
//! - [`ContextStore`]: the async seam the event router depends on
//! - [`MemoryStore`]: in-process store for tests and dry runs
//! - [`ClientError`]: connection / protocol / malformed / not-connected

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod memory;
pub mod store;

pub use client::{ClientConfig, CxdbClient};
pub use errors::{ClientError, Result};
pub use memory::{MemoryStore, StoredTurn};
pub use store::{AppendAck, ContextHead, ContextStore, TurnHead};
