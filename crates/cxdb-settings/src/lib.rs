//! # cxdb-settings
//!
//! Configuration for the CXDB event hook, resolved from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`CxdbHookSettings::default()`]
//! 2. **Host module config**: the JSON object the host passes at mount
//!    time, deep-merged over the defaults (camelCase or snake_case keys)
//! 3. **Environment variables**: `CXDB_*` overrides
//!
//! The merged result is validated before use; an empty `cxdbHost` is valid
//! and means the hook is disabled.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_with_env};
pub use types::{CxdbHookSettings, DedupMode, EventRecordShape};
