//! # herald-settings
//!
//! Configuration for the Herald relay, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HeraldSettings::default()`]
//! 2. **Settings file**: `~/.herald/settings.json` or an explicit path (deep-merged over defaults)
//! 3. **Environment variables**: `PORT`, `REDIS_*`, `JWT_SECRET`, `APP_*_ORIGIN`, `HERALD_*`,
//!    read from the process environment or, for unset names, a `.env` file
//!
//! The merged result is validated before it is handed out.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    DOTENV_FILE, apply_env_overrides, apply_overrides_from, deep_merge, load_settings_from_path,
    parse_dotenv, read_dotenv, settings_path,
};
pub use types::*;
