//! Small persisted key-value state shared by the network gate and the
//! session follow-up handling.
//!
//! Stored as `prefs.toml` next to the settings file, written with the same
//! temp file + rename scheme. A store without a path lives in memory only.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{OmadmError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefs {
    /// Interface the management APN came up on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apn_interface_name: Option<String>,

    /// Activation retries used by the current readiness cycle
    pub apn_retry_count: u32,

    /// Tear down the secondary APN once the next session reports a result
    pub disable_apn2_after_session: bool,

    /// Reset the baseband once the next session reports a result
    pub reset_baseband_after_session: bool,
}

/// Deferred work triggered by a session result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpAction {
    DisableApn2,
    ResetBaseband,
}

pub struct PrefsStore {
    prefs: RwLock<Prefs>,
    path: Option<PathBuf>,
}

/// Default location: `~/.omadm/prefs.toml`.
pub fn default_prefs_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".omadm")
        .join("prefs.toml")
}

impl PrefsStore {
    pub fn in_memory() -> Self {
        Self {
            prefs: RwLock::new(Prefs::default()),
            path: None,
        }
    }

    /// Load from `path`; a missing file starts from defaults.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let prefs = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            toml::from_str(&contents)
                .map_err(|e| OmadmError::Internal(format!("invalid prefs file {:?}: {}", path, e)))?
        } else {
            Prefs::default()
        };
        tracing::debug!("[prefs] loaded {:?}", path);
        Ok(Self {
            prefs: RwLock::new(prefs),
            path: Some(path),
        })
    }

    pub fn snapshot(&self) -> Prefs {
        self.prefs.read().clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn apn_interface_name(&self) -> Option<String> {
        self.prefs.read().apn_interface_name.clone()
    }

    pub fn set_apn_interface_name(&self, name: &str) -> Result<()> {
        self.update(|prefs| {
            if prefs.apn_interface_name.as_deref() == Some(name) {
                return false;
            }
            prefs.apn_interface_name = Some(name.to_string());
            true
        })
    }

    pub fn set_apn_retry_count(&self, count: u32) -> Result<()> {
        self.update(|prefs| {
            let changed = prefs.apn_retry_count != count;
            prefs.apn_retry_count = count;
            changed
        })
    }

    pub fn schedule_apn2_disable(&self) -> Result<()> {
        self.update(|prefs| !std::mem::replace(&mut prefs.disable_apn2_after_session, true))
    }

    pub fn schedule_baseband_reset(&self) -> Result<()> {
        self.update(|prefs| !std::mem::replace(&mut prefs.reset_baseband_after_session, true))
    }

    /// Consume the sticky follow-up flags.
    ///
    /// Disabling the secondary APN wins over a pending baseband reset, which
    /// is then dropped.
    pub fn take_follow_up_actions(&self) -> Result<Vec<FollowUpAction>> {
        let mut actions = Vec::new();
        self.update(|prefs| {
            if prefs.disable_apn2_after_session {
                prefs.disable_apn2_after_session = false;
                prefs.reset_baseband_after_session = false;
                actions.push(FollowUpAction::DisableApn2);
            } else if prefs.reset_baseband_after_session {
                prefs.reset_baseband_after_session = false;
                actions.push(FollowUpAction::ResetBaseband);
            }
            !actions.is_empty()
        })?;
        Ok(actions)
    }

    /// Apply `f` and persist when it reports a change.
    fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Prefs) -> bool,
    {
        let mut prefs = self.prefs.write();
        if !f(&mut prefs) {
            return Ok(());
        }
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = toml::to_string_pretty(&*prefs)
            .map_err(|e| OmadmError::Internal(format!("failed to serialize prefs: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, contents)?;
        std::fs::rename(&temp_path, path)?;
        tracing::debug!("[prefs] saved {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_up_disable_apn2_clears_reset() {
        let store = PrefsStore::in_memory();
        store.schedule_baseband_reset().unwrap();
        store.schedule_apn2_disable().unwrap();

        assert_eq!(
            store.take_follow_up_actions().unwrap(),
            vec![FollowUpAction::DisableApn2]
        );
        assert!(store.take_follow_up_actions().unwrap().is_empty());
        assert_eq!(store.snapshot(), Prefs::default());
    }

    #[test]
    fn test_follow_up_reset_baseband() {
        let store = PrefsStore::in_memory();
        store.schedule_baseband_reset().unwrap();
        assert_eq!(
            store.take_follow_up_actions().unwrap(),
            vec![FollowUpAction::ResetBaseband]
        );
        assert!(!store.snapshot().reset_baseband_after_session);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.toml");

        let store = PrefsStore::open(&path).unwrap();
        store.set_apn_interface_name("rmnet1").unwrap();
        store.set_apn_retry_count(1).unwrap();
        store.schedule_apn2_disable().unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("toml.tmp").exists());

        let reopened = PrefsStore::open(&path).unwrap();
        assert_eq!(reopened.apn_interface_name().as_deref(), Some("rmnet1"));
        assert_eq!(reopened.snapshot().apn_retry_count, 1);
        assert!(reopened.snapshot().disable_apn2_after_session);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PrefsStore::open(dir.path().join("prefs.toml")).unwrap();
        assert_eq!(store.snapshot(), Prefs::default());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        std::fs::write(&path, "apn_retry_count = \"many\"").unwrap();
        assert!(matches!(PrefsStore::open(&path), Err(OmadmError::Internal(_))));
    }
}
