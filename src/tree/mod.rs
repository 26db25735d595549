//! Device management tree: values, locking, layout and the access façade.

pub mod data;
pub mod facade;
pub mod lock;
pub mod node_info;
pub mod schema;

pub use data::{DataType, DmtData};
pub use facade::{ProfileRow, TreeFacade, TreeStatus};
pub use lock::{DmtGuard, DmtLock, LockHolder, LockOwner};
pub use node_info::NodeInfo;
pub use schema::TreeVersion;
