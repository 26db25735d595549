//! TOML-based settings for the DM client.
//!
//! Settings are loaded from `~/.omadm/settings.toml` with environment variable
//! interpolation support. Optional paths can fall back to environment
//! variables through the `get_with_env_fallback` helper.
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::settings::{SettingsManager, get_with_env_fallback};
//!
//! let manager = SettingsManager::new().await?;
//! let settings = manager.get();
//!
//! let data_dir = get_with_env_fallback(
//!     &settings.tree.data_dir,
//!     &["OMADM_DATA_DIR"],
//!     None,
//! );
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_with_env_fallback, settings_path, SettingsManager};
pub use schema::{
    AdvancedSettings, NetworkSettings, OmadmSettings, PrefsSettings, SessionSettings,
    TreeSettings,
};
