//! # cxdb-hooks
//!
//! Event-capture hook that records a host agent's lifecycle events into
//! CXDB. Each session gets two contexts:
//!
//! - **Turns**: reconstructed conversation (user input, assistant turn with
//!   tool calls and metrics), written when an orchestrator cycle completes
//! - **Events**: every subscribed event as it happens
//!
//! ## Flow
//!
//! ```text
//! host event → EventRouter::handle_event
//!              ├─ lazy initialize (connect, registry bundle, contexts)
//!              ├─ piggyback retry of buffered records
//!              ├─ VariantDeduplicator / straggler check
//!              ├─ TurnAccumulator (turn events)
//!              ├─ everything-context record (envelope or system item)
//!              └─ on orchestrator:complete → turns-context records
//! ```
//!
//! Store outages never reach the host: failed writes are kept in a bounded
//! [`buffer::RetryBuffer`] and replayed before the next write.

#![deny(unsafe_code)]

pub mod buffer;
pub mod catalog;
pub mod dedup;
pub mod errors;
pub mod host;
pub mod mount;
pub mod provenance;
pub mod records;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod session;
pub mod turns;
pub mod types;

pub use errors::{HostError, MountError, RegistryError, RouterError};
pub use host::{EventHandler, HostCoordinator, Unregister};
pub use mount::{MountHandle, mount, mount_with_store};
pub use router::{EventRouter, RouterConfig};
pub use session::SessionLineage;
pub use types::{HookAction, HookResult};
