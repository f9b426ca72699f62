//! Hot-plug interface configuration management.
//!
//! The enclosing configuration daemon commits configuration at
//! transaction time, but some interfaces are not physically present when
//! the transaction lands. This crate defers their configuration and
//! (re)applies it as the interfaces plug, unplug, or receive new
//! candidates:
//!
//! - one state machine per managed interface, consuming events strictly
//!   in order on its own task;
//! - an interface manager mapping names to machines and fanning a new
//!   full configuration tree out to them;
//! - a fixed worker pool serializing commit work through a bounded queue;
//! - a session registry answering read queries over snapshots;
//! - a notifier announcing `configuration-updated` / `interface-state`.

pub mod commit;
mod core;
pub mod diff;
pub mod error;
pub mod machine;
pub mod manager;
pub mod notify;
pub mod pool;
pub mod schema;
pub mod session;
pub mod tree;

pub use crate::core::{Core, DeviceProbe};
pub use commit::{CommitDriver, CommitOutcome, Committer, DiffCommitDriver};
pub use error::{MgmtError, MgmtErrorKind};
pub use machine::{IntfMachine, MachineState};
pub use manager::IntfManager;
pub use notify::{Notification, Notifier, NOTIFY_NAMESPACE};
pub use schema::{Kind, Schema, SchemaStore};
pub use session::{session_id, Session, SessionGuard, Sessions};
