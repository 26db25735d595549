//! Settings schema definitions for the DM client.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with the timings the engine integration expects.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings structure.
///
/// Loaded from `~/.omadm/settings.toml` with environment variable interpolation support.
/// Version field enables future migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OmadmSettings {
    /// Schema version for migrations
    pub version: u32,

    /// Session manager timings
    pub session: SessionSettings,

    /// Tree access façade settings
    pub tree: TreeSettings,

    /// Network readiness gates
    pub network: NetworkSettings,

    /// Persisted preferences location
    pub prefs: PrefsSettings,

    /// Advanced/debug settings
    pub advanced: AdvancedSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Hard limit on one engine session before it is cancelled
    pub timeout_secs: u64,

    /// How long a session waits for the DMT lock
    pub lock_wait_secs: u64,

    /// How long a request waits for the configuration store
    pub store_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeSettings {
    /// How long a façade call waits for the DMT lock
    pub lock_wait_secs: u64,

    /// Engine tree directory; when set, a missing `root.wbxml` marks a first run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Bring up the management APN before network sessions
    pub use_management_apn: bool,

    /// Wait per activation attempt
    pub apn_check_timeout_secs: u64,

    /// Activation retries after the first attempt
    pub max_apn_retries: u32,

    /// Defer network sessions until no call is active
    pub wait_for_idle_call: bool,

    /// Upper bound for the idle-call wait
    pub call_state_wait_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefsSettings {
    /// Override for `~/.omadm/prefs.toml`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Log level: "error" | "warn" | "info" | "debug" | "trace"
    pub log_level: String,
}

impl Default for OmadmSettings {
    fn default() -> Self {
        Self {
            version: 1,
            session: SessionSettings::default(),
            tree: TreeSettings::default(),
            network: NetworkSettings::default(),
            prefs: PrefsSettings::default(),
            advanced: AdvancedSettings::default(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            lock_wait_secs: 60,
            store_wait_secs: 70,
        }
    }
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            lock_wait_secs: 300,
            data_dir: None,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            use_management_apn: true,
            apn_check_timeout_secs: 120,
            max_apn_retries: 1,
            wait_for_idle_call: false,
            call_state_wait_secs: 300,
        }
    }
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl SessionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn store_wait(&self) -> Duration {
        Duration::from_secs(self.store_wait_secs)
    }
}

impl TreeSettings {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }
}

impl NetworkSettings {
    pub fn apn_check_timeout(&self) -> Duration {
        Duration::from_secs(self.apn_check_timeout_secs)
    }

    pub fn call_state_wait(&self) -> Duration {
        Duration::from_secs(self.call_state_wait_secs)
    }
}
