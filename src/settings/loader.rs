//! Reads `~/.omadm/settings.toml` once at startup.
//!
//! `$VAR` and `${VAR}` in path values are replaced from the environment. A
//! missing file yields the defaults; the CLI writes the commented template
//! on first run so there is something to edit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::schema::OmadmSettings;

/// Commented defaults written on first run.
const TEMPLATE: &str = include_str!("template.toml");

pub fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".omadm")
        .join("settings.toml")
}

/// Settings resolved from one file.
#[derive(Debug)]
pub struct SettingsManager {
    settings: OmadmSettings,
    path: PathBuf,
}

impl SettingsManager {
    /// Load from [`settings_path`].
    pub async fn new() -> Result<Self> {
        Self::with_path(settings_path()).await
    }

    pub async fn with_path(path: PathBuf) -> Result<Self> {
        let settings = load(&path).await?;
        Ok(Self { settings, path })
    }

    pub fn get(&self) -> &OmadmSettings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up one value by dotted key, e.g. `network.max_apn_retries`.
    /// A table key returns the whole table.
    pub fn get_value(&self, key: &str) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(&self.settings)?;
        for part in key.split('.') {
            value = match value {
                serde_json::Value::Object(mut table) => table.remove(part),
                _ => None,
            }
            .ok_or_else(|| anyhow::anyhow!("Unknown setting '{}'", key))?;
        }
        Ok(value)
    }

    /// Write the template if no file exists yet. Returns `true` when it did.
    pub async fn ensure_settings_file(&self) -> Result<bool> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, TEMPLATE)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        tracing::info!("Generated settings template at {:?}", self.path);
        Ok(true)
    }
}

async fn load(path: &Path) -> Result<OmadmSettings> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No settings at {:?}, using defaults", path);
            return Ok(OmadmSettings::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let mut settings: OmadmSettings = toml::from_str(&contents)
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    for value in [&mut settings.tree.data_dir, &mut settings.prefs.path]
        .into_iter()
        .flatten()
    {
        if let Some(resolved) = resolve_env_ref(value) {
            *value = resolved;
        }
    }

    tracing::info!("Loaded settings from {:?}", path);
    Ok(settings)
}

/// Value of the variable named by `$NAME` or `${NAME}`; `None` for plain
/// values and unset variables.
fn resolve_env_ref(value: &str) -> Option<String> {
    let name = value.trim().strip_prefix('$')?;
    let name = name
        .strip_prefix('{')
        .and_then(|inner| inner.strip_suffix('}'))
        .unwrap_or(name);
    std::env::var(name).ok()
}

/// First non-empty of: the setting, the listed environment variables, `default`.
pub fn get_with_env_fallback(
    setting: &Option<String>,
    env_vars: &[&str],
    default: Option<String>,
) -> Option<String> {
    setting
        .as_ref()
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| {
            env_vars
                .iter()
                .filter_map(|name| std::env::var(name).ok())
                .find(|v| !v.is_empty())
        })
        .or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_env_ref_forms() {
        std::env::set_var("OMADM_TEST_VAR_1", "/var/dm");

        assert_eq!(resolve_env_ref("$OMADM_TEST_VAR_1"), Some("/var/dm".to_string()));
        assert_eq!(resolve_env_ref(" ${OMADM_TEST_VAR_1} "), Some("/var/dm".to_string()));
        assert_eq!(resolve_env_ref("/data/dm"), None);
        assert_eq!(resolve_env_ref("$NONEXISTENT_VAR_XYZ_12345"), None);

        std::env::remove_var("OMADM_TEST_VAR_1");
    }

    #[test]
    fn test_get_with_env_fallback_order() {
        let setting = Some("/data/dm".to_string());
        assert_eq!(
            get_with_env_fallback(&setting, &["OMADM_SOME_VAR"], None),
            Some("/data/dm".to_string())
        );

        std::env::set_var("OMADM_FALLBACK_TEST_VAR", "from_env");
        assert_eq!(
            get_with_env_fallback(&Some(String::new()), &["OMADM_FALLBACK_TEST_VAR"], None),
            Some("from_env".to_string())
        );
        std::env::remove_var("OMADM_FALLBACK_TEST_VAR");

        assert_eq!(
            get_with_env_fallback(
                &None,
                &["OMADM_NONEXISTENT_VAR_ABC"],
                Some("default_value".to_string())
            ),
            Some("default_value".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let manager = SettingsManager::with_path(PathBuf::from("/nonexistent/settings.toml"))
            .await
            .unwrap();

        assert_eq!(manager.get().version, 1);
        assert_eq!(manager.get().session.timeout_secs, 600);
        assert_eq!(manager.path(), Path::new("/nonexistent/settings.toml"));
    }

    #[tokio::test]
    async fn test_get_value_by_dotted_key() {
        let manager = SettingsManager::with_path(PathBuf::from("/nonexistent/settings.toml"))
            .await
            .unwrap();

        assert_eq!(
            manager.get_value("session.timeout_secs").unwrap(),
            serde_json::json!(600)
        );
        assert_eq!(
            manager.get_value("network.use_management_apn").unwrap(),
            serde_json::json!(true)
        );
        assert!(manager.get_value("tree").unwrap().is_object());
        assert!(manager.get_value("session.nope").is_err());
        assert!(manager.get_value("session.timeout_secs.x").is_err());
    }

    #[tokio::test]
    async fn test_template_written_once_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omadm").join("settings.toml");
        let manager = SettingsManager::with_path(path.clone()).await.unwrap();

        assert!(manager.ensure_settings_file().await.unwrap());
        assert!(!manager.ensure_settings_file().await.unwrap());

        let from_template = SettingsManager::with_path(path).await.unwrap();
        assert_eq!(from_template.get().session.lock_wait_secs, 60);
        assert_eq!(from_template.get().tree.data_dir, None);
    }

    #[tokio::test]
    async fn test_file_values_and_env_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        tokio::fs::write(
            &path,
            "[session]\ntimeout_secs = 5\n[tree]\ndata_dir = \"${OMADM_LOADER_TEST_DIR}\"\n",
        )
        .await
        .unwrap();

        std::env::set_var("OMADM_LOADER_TEST_DIR", "/var/dm");
        let manager = SettingsManager::with_path(path).await.unwrap();
        std::env::remove_var("OMADM_LOADER_TEST_DIR");

        assert_eq!(manager.get().session.timeout_secs, 5);
        assert_eq!(manager.get().session.lock_wait_secs, 60);
        assert_eq!(manager.get().tree.data_dir.as_deref(), Some("/var/dm"));
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        tokio::fs::write(&path, "[session\n").await.unwrap();

        assert!(SettingsManager::with_path(path).await.is_err());
    }
}
