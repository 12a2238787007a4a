//! # mcpsync-settings
//!
//! Configuration for the context-sync server and the memory store.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SyncSettings::default()`]
//! 2. **Settings file**: `~/.mcpsync/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `MCPSYNC_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to whoever needs it; there is no
//! process-wide settings singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, data_dir, deep_merge, load_file_layer,
    load_settings, load_settings_from_path, resolve_memory_db_path, settings_path,
};
pub use types::*;
