//! In-memory engine.
//!
//! Keeps the management tree in a sorted map and answers session calls
//! from configurable outcomes. Backs the CLI harness and the test suites;
//! it can hold session calls open to exercise queueing, cancellation and
//! timeouts.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{codes, DmEngine, NotifyContext, ResultCode};
use crate::tree::schema::{TreeVersion, VERSION_NODE_PATH};

#[derive(Debug, Clone, PartialEq, Eq)]
enum MemNode {
    Interior,
    Leaf(String),
}

/// Call log entry, in the order calls reached the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    StartAlerted(usize),
    StartClient(String),
    StartFotaClient { server_id: String, alert: String },
    NotifyFota(NotifyContext),
    NotifyLawmo(NotifyContext),
    Cancel,
    CreateInterior(String),
    CreateLeaf { path: String, value: String },
    Delete(String),
    ProcessBootstrap(String),
}

#[derive(Debug, Default)]
struct SessionControl {
    hold: bool,
    in_flight: usize,
    cancel_requested: bool,
}

pub struct MemoryEngine {
    nodes: Mutex<BTreeMap<String, MemNode>>,
    calls: Mutex<Vec<EngineCall>>,
    fail_create: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    session_result: Mutex<ResultCode>,
    latency: Mutex<Duration>,
    control: Mutex<SessionControl>,
    control_changed: Condvar,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl MemoryEngine {
    /// Result reported by a held session that was cancelled.
    pub const CANCELLED_RESULT: ResultCode = 17;

    /// Empty tree with only the root node.
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_create: Mutex::new(HashSet::new()),
            fail_delete: Mutex::new(HashSet::new()),
            session_result: Mutex::new(codes::SUCCESS),
            latency: Mutex::new(Duration::ZERO),
            control: Mutex::new(SessionControl::default()),
            control_changed: Condvar::new(),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    /// Tree seeded with `./DevInfo/DmV` and the matching account root.
    pub fn with_tree_version(version: &str) -> Self {
        let engine = Self::new();
        engine.seed_interior("./DevInfo");
        engine.seed_leaf(VERSION_NODE_PATH, version);
        if let Some(layout) = TreeVersion::from_node_value(version) {
            let mut path = String::from(".");
            for segment in layout.account_root().trim_start_matches("./").split('/') {
                path.push('/');
                path.push_str(segment);
                engine.seed_interior(&path);
            }
        }
        engine
    }

    pub fn seed_interior(&self, path: &str) {
        self.nodes.lock().insert(path.to_string(), MemNode::Interior);
    }

    pub fn seed_leaf(&self, path: &str, value: &str) {
        self.nodes
            .lock()
            .insert(path.to_string(), MemNode::Leaf(value.to_string()));
    }

    /// Seed a complete profile node with its server-id leaf.
    pub fn seed_profile(&self, profile_root: &str, server_id_leaf: &str, server_id: &str) {
        self.seed_interior(profile_root);
        self.seed_leaf(&format!("{}/{}", profile_root, server_id_leaf), server_id);
    }

    pub fn contains(&self, path: &str) -> bool {
        path == "." || self.nodes.lock().contains_key(path)
    }

    pub fn leaf_value(&self, path: &str) -> Option<String> {
        match self.nodes.lock().get(path) {
            Some(MemNode::Leaf(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Make every future creation of `path` fail.
    pub fn fail_create_on(&self, path: &str) {
        self.fail_create.lock().insert(path.to_string());
    }

    pub fn fail_delete_on(&self, path: &str) {
        self.fail_delete.lock().insert(path.to_string());
    }

    pub fn set_session_result(&self, code: ResultCode) {
        *self.session_result.lock() = code;
    }

    /// Make every session call take at least `latency`.
    pub fn set_session_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Keep session calls blocked until released or cancelled.
    pub fn hold_sessions(&self) {
        self.control.lock().hold = true;
    }

    pub fn release_sessions(&self) {
        self.control.lock().hold = false;
        self.control_changed.notify_all();
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Number of session calls currently inside the engine.
    pub fn sessions_in_flight(&self) -> usize {
        self.concurrent.load(Ordering::SeqCst)
    }

    /// Highest number of session calls that were ever inside the engine at once.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    fn run_session(&self, call: EngineCall) -> ResultCode {
        self.record(call);
        self.control.lock().in_flight += 1;
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        let mut control = self.control.lock();
        let cancelled = loop {
            if control.cancel_requested {
                control.cancel_requested = false;
                break true;
            }
            if !control.hold {
                break false;
            }
            self.control_changed.wait(&mut control);
        };
        control.in_flight -= 1;
        drop(control);

        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        if cancelled {
            Self::CANCELLED_RESULT
        } else {
            *self.session_result.lock()
        }
    }

    fn parent_exists(nodes: &BTreeMap<String, MemNode>, path: &str) -> bool {
        match path.rsplit_once('/') {
            Some((".", _)) => true,
            Some((parent, _)) => matches!(nodes.get(parent), Some(MemNode::Interior)),
            None => false,
        }
    }

    fn create(&self, path: &str, node: MemNode) -> ResultCode {
        if self.fail_create.lock().contains(path) {
            return codes::FAIL;
        }
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(path) || !Self::parent_exists(&nodes, path) {
            return codes::FAIL;
        }
        nodes.insert(path.to_string(), node);
        codes::SUCCESS
    }

    fn account_layout(&self) -> Option<TreeVersion> {
        self.leaf_value(VERSION_NODE_PATH)
            .and_then(|v| TreeVersion::from_node_value(&v))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DmEngine for MemoryEngine {
    fn start_alerted_session(&self, pkg0: &[u8]) -> ResultCode {
        self.run_session(EngineCall::StartAlerted(pkg0.len()))
    }

    fn start_client_session(&self, server_id: &str) -> ResultCode {
        self.run_session(EngineCall::StartClient(server_id.to_string()))
    }

    fn start_fota_client_session(&self, server_id: &str, alert: &str) -> ResultCode {
        self.run_session(EngineCall::StartFotaClient {
            server_id: server_id.to_string(),
            alert: alert.to_string(),
        })
    }

    fn notify_fota(&self, ctx: &NotifyContext) -> ResultCode {
        self.run_session(EngineCall::NotifyFota(ctx.clone()))
    }

    fn notify_lawmo(&self, ctx: &NotifyContext) -> ResultCode {
        self.run_session(EngineCall::NotifyLawmo(ctx.clone()))
    }

    fn cancel_active_session(&self) {
        self.record(EngineCall::Cancel);
        let mut control = self.control.lock();
        if control.in_flight > 0 {
            control.cancel_requested = true;
            self.control_changed.notify_all();
        }
    }

    fn node_info(&self, path: &str) -> String {
        let nodes = self.nodes.lock();
        let node = if path == "." {
            Some(&MemNode::Interior)
        } else {
            nodes.get(path)
        };
        match node {
            None => format!("can't get node info for {}", path),
            Some(MemNode::Leaf(value)) => format!("value={}\n", value),
            Some(MemNode::Interior) => {
                let prefix = format!("{}/", path);
                let children: Vec<&str> = nodes
                    .keys()
                    .filter_map(|key| key.strip_prefix(&prefix))
                    .filter(|rest| !rest.contains('/'))
                    .collect();
                if children.is_empty() {
                    "children:null\n".to_string()
                } else {
                    format!("children:{}\n", children.join("/"))
                }
            }
        }
    }

    fn create_interior(&self, path: &str) -> ResultCode {
        self.record(EngineCall::CreateInterior(path.to_string()));
        self.create(path, MemNode::Interior)
    }

    fn create_leaf(&self, path: &str, value: &str) -> ResultCode {
        self.record(EngineCall::CreateLeaf {
            path: path.to_string(),
            value: value.to_string(),
        });
        self.create(path, MemNode::Leaf(value.to_string()))
    }

    fn delete_node(&self, path: &str) -> ResultCode {
        self.record(EngineCall::Delete(path.to_string()));
        if self.fail_delete.lock().contains(path) {
            return codes::FAIL;
        }
        let mut nodes = self.nodes.lock();
        if nodes.remove(path).is_none() {
            return codes::FAIL;
        }
        let prefix = format!("{}/", path);
        nodes.retain(|key, _| !key.starts_with(&prefix));
        codes::SUCCESS
    }

    /// Bootstrap documents are `KEY=VALUE` lines; the server id is the `ServerID` line.
    fn parse_bootstrap_server_id(&self, data: &[u8], _binary: bool) -> Option<String> {
        let text = std::str::from_utf8(data).ok()?;
        text.lines()
            .filter_map(|line| line.trim().split_once('='))
            .find(|(key, _)| key.trim() == "ServerID")
            .map(|(_, value)| value.trim().to_string())
            .filter(|id| !id.is_empty())
    }

    fn process_bootstrap_script(&self, _data: &[u8], _binary: bool, server_id: &str) -> ResultCode {
        self.record(EngineCall::ProcessBootstrap(server_id.to_string()));
        let Some(layout) = self.account_layout() else {
            return codes::FAIL;
        };
        let profile = format!("{}/{}", layout.account_root(), server_id);
        let code = self.create(&profile, MemNode::Interior);
        if code != codes::SUCCESS {
            return code;
        }
        self.create(
            &format!("{}/{}", profile, layout.server_id_node()),
            MemNode::Leaf(server_id.to_string()),
        )
    }
}
