//! Tree access façade.
//!
//! External callers (settings consumers, provisioning) query and edit
//! server profiles through this type. Every operation takes the DMT lock
//! with a bounded wait and releases it on all paths.
//!
//! Operations block the calling thread while they wait for the lock. Async
//! callers use the `*_async` variants, which run on the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::data::DmtData;
use super::lock::{DmtGuard, DmtLock, LockOwner};
use super::node_info::NodeInfo;
use super::schema::{
    creation_order, parse_selection, profile_node_paths, TreeVersion, BLOB_TAG, UNIQUE_TAG,
    VERSION_NODE_PATH,
};
use crate::engine::{codes, DmEngine};
use crate::error::{OmadmError, Result};

/// Prefix of the locator returned for bootstrap-blob inserts.
pub const BOOTSTRAP_URI: &str = "bootstrap://dmt";

/// One server profile as reported by [`TreeFacade::query`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileRow {
    pub root_node: String,
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeStatus {
    Available,
    Locked,
}

#[derive(Clone)]
pub struct TreeFacade {
    engine: Arc<dyn DmEngine>,
    lock: Arc<DmtLock>,
    lock_wait: Duration,
}

impl TreeFacade {
    pub fn new(engine: Arc<dyn DmEngine>, lock: Arc<DmtLock>, lock_wait: Duration) -> Self {
        Self {
            engine,
            lock,
            lock_wait,
        }
    }

    /// List profiles. `None` returns every profile under the account root,
    /// `Some("rootnode='<name>'")` exactly one.
    pub fn query(&self, selection: Option<&str>) -> Result<Vec<ProfileRow>> {
        let wanted = selection.map(parse_selection).transpose()?;

        let _guard = self.acquire()?;
        let version = self.tree_version()?;
        let root = version.account_root();

        match wanted {
            Some(name) => {
                let server_id = self.read(&server_id_path(version, &name))?.value;
                Ok(vec![ProfileRow {
                    root_node: name,
                    server_id,
                }])
            }
            None => {
                let children = self.read(root)?.children.unwrap_or_default();
                Ok(children
                    .into_iter()
                    .map(|name| {
                        let server_id = self
                            .read(&server_id_path(version, &name))
                            .ok()
                            .and_then(|info| info.value);
                        ProfileRow {
                            root_node: name,
                            server_id,
                        }
                    })
                    .collect())
            }
        }
    }

    /// Read a single node by absolute path.
    pub fn read_node(&self, path: &str) -> Result<DmtData> {
        let _guard = self.acquire()?;
        self.read(path).map(NodeInfo::into_data)
    }

    /// Create a server profile from a tag map and return its locator.
    ///
    /// An existing profile with the same unique id is replaced. If any node
    /// fails to create, the profile root is deleted again and the error is
    /// returned.
    pub fn insert(&self, values: &BTreeMap<String, String>) -> Result<String> {
        if let Some(blob) = values.get(BLOB_TAG) {
            return self.insert_bootstrap_blob(blob);
        }

        let server_id = values
            .get(UNIQUE_TAG)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| OmadmError::InvalidRequest(format!("missing {}", UNIQUE_TAG)))?;
        let nodes = profile_node_paths(values)?;

        let _guard = self.acquire()?;
        let version = self.tree_version()?;
        if version != TreeVersion::V1_2 {
            return Err(OmadmError::UnsupportedTreeVersion(format!(
                "tag insert on DM {} tree",
                version.as_str()
            )));
        }

        self.remove_duplicate(version, server_id)?;

        let order = creation_order(&nodes);
        let Some(&(profile_root, _)) = order.first() else {
            return Err(OmadmError::Internal("no nodes to create".to_string()));
        };
        for &(path, value) in &order {
            let code = match value {
                None => self.engine.create_interior(path),
                Some(value) => self.engine.create_leaf(path, value),
            };
            if code != codes::SUCCESS {
                tracing::warn!(
                    "[tree] creating {} failed with {}, rolling back {}",
                    path,
                    code,
                    profile_root
                );
                let rollback = self.engine.delete_node(profile_root);
                if rollback != codes::SUCCESS {
                    tracing::error!("[tree] rollback of {} failed with {}", profile_root, rollback);
                }
                return Err(OmadmError::Engine {
                    path: path.to_string(),
                    code,
                });
            }
        }

        tracing::info!("[tree] inserted profile {} for {}", profile_root, server_id);
        Ok(format!("{}?serverId={}", profile_root, server_id))
    }

    /// Delete the profile named by `rootnode='<name>'`.
    pub fn delete(&self, selection: &str) -> Result<()> {
        let name = parse_selection(selection)?;

        let _guard = self.acquire()?;
        let version = self.tree_version()?;
        let path = format!("{}/{}", version.account_root(), name);
        let code = self.engine.delete_node(&path);
        if code != codes::SUCCESS {
            return Err(OmadmError::Engine { path, code });
        }
        tracing::info!("[tree] deleted {}", path);
        Ok(())
    }

    pub fn status(&self) -> TreeStatus {
        if self.lock.is_locked() {
            TreeStatus::Locked
        } else {
            TreeStatus::Available
        }
    }

    pub async fn query_async(&self, selection: Option<String>) -> Result<Vec<ProfileRow>> {
        self.off_runtime(move |tree| tree.query(selection.as_deref()))
            .await
    }

    pub async fn read_node_async(&self, path: String) -> Result<DmtData> {
        self.off_runtime(move |tree| tree.read_node(&path)).await
    }

    pub async fn insert_async(&self, values: BTreeMap<String, String>) -> Result<String> {
        self.off_runtime(move |tree| tree.insert(&values)).await
    }

    pub async fn delete_async(&self, selection: String) -> Result<()> {
        self.off_runtime(move |tree| tree.delete(&selection)).await
    }

    async fn off_runtime<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&TreeFacade) -> Result<T> + Send + 'static,
    {
        let tree = self.clone();
        tokio::task::spawn_blocking(move || f(&tree))
            .await
            .map_err(|e| OmadmError::Internal(format!("tree access task failed: {}", e)))?
    }

    fn insert_bootstrap_blob(&self, blob: &str) -> Result<String> {
        let data = hex::decode(blob.trim())
            .map_err(|e| OmadmError::InvalidRequest(format!("bootstrap blob: {}", e)))?;

        let _guard = self.acquire()?;
        let version = self.tree_version()?;
        let server_id = self
            .engine
            .parse_bootstrap_server_id(&data, true)
            .ok_or_else(|| {
                OmadmError::InvalidRequest("bootstrap blob carries no server id".to_string())
            })?;

        self.remove_duplicate(version, &server_id)?;

        let code = self.engine.process_bootstrap_script(&data, true, &server_id);
        if code != codes::SUCCESS {
            return Err(OmadmError::Engine {
                path: BOOTSTRAP_URI.to_string(),
                code,
            });
        }
        tracing::info!("[tree] bootstrapped profile for {}", server_id);
        Ok(format!("{}?serverId={}", BOOTSTRAP_URI, server_id))
    }

    /// Delete the first profile whose server id equals `server_id`.
    fn remove_duplicate(&self, version: TreeVersion, server_id: &str) -> Result<()> {
        let root = version.account_root();
        let Some(children) = self.read(root)?.children else {
            return Ok(());
        };

        for child in children {
            let existing = self.read(&server_id_path(version, &child))?.value;
            match existing {
                None => {
                    tracing::warn!("[tree] profile {} has no server id, tree looks corrupted", child);
                    return Ok(());
                }
                Some(existing) if existing == server_id => {
                    let path = format!("{}/{}", root, child);
                    let code = self.engine.delete_node(&path);
                    if code != codes::SUCCESS {
                        return Err(OmadmError::Engine { path, code });
                    }
                    tracing::info!("[tree] replaced existing profile {} for {}", path, server_id);
                    return Ok(());
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn acquire(&self) -> Result<DmtGuard> {
        self.lock
            .acquire_guard(LockOwner::TreeAccess, self.lock_wait)
            .ok_or(OmadmError::LockTimeout(self.lock_wait))
    }

    fn tree_version(&self) -> Result<TreeVersion> {
        let raw = NodeInfo::parse(&self.engine.node_info(VERSION_NODE_PATH))
            .map_err(OmadmError::UnsupportedTreeVersion)?
            .value
            .unwrap_or_default();
        TreeVersion::from_node_value(&raw).ok_or(OmadmError::UnsupportedTreeVersion(raw))
    }

    fn read(&self, path: &str) -> Result<NodeInfo> {
        NodeInfo::parse(&self.engine.node_info(path)).map_err(|msg| {
            tracing::debug!("[tree] {}", msg);
            OmadmError::NodeNotFound(path.to_string())
        })
    }
}

fn server_id_path(version: TreeVersion, profile: &str) -> String {
    format!("{}/{}/{}", version.account_root(), profile, version.server_id_node())
}
