//! Structured logging with `tracing`.
//!
//! The hook runs inside a host process that usually owns the global
//! subscriber, so nothing here is installed implicitly. Standalone tools and
//! integration tests call [`init_subscriber`] (human-readable) or
//! [`init_json_subscriber`] (one JSON object per line) once at startup.
//!
//! All hook diagnostics are emitted under the `cxdb_*` targets, so
//! `RUST_LOG=cxdb_hooks=debug` narrows output to the router.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

use tracing_subscriber::EnvFilter;

/// Default filter when neither `RUST_LOG` nor an explicit level is given.
pub const DEFAULT_LEVEL: &str = "warn";

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global tracing subscriber with compact stderr output.
///
/// `RUST_LOG` takes precedence over `level`. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}

/// Initialize the global tracing subscriber with JSON lines on stderr.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .json();

    let _ = subscriber.try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
