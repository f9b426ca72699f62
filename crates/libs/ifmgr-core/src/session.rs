use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::MgmtError;
use crate::schema::Schema;
use crate::tree::Node;

/// A short-lived `(candidate, running, schema)` bundle answering a single
/// read query or backing a single commit.
#[derive(Clone)]
pub struct Session {
    pub candidate: Option<Arc<Node>>,
    pub running: Option<Arc<Node>>,
    pub schema: Arc<Schema>,
}

/// Registry of live sessions, keyed by opaque session id.
#[derive(Clone, Default)]
pub struct Sessions {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Sessions::default()
    }

    pub fn create(
        &self,
        sid: &str,
        candidate: Option<Arc<Node>>,
        running: Option<Arc<Node>>,
        schema: Arc<Schema>,
    ) -> Result<(), MgmtError> {
        let mut sessions = self.inner.write().expect("session map poisoned");
        if sessions.contains_key(sid) {
            return Err(MgmtError::operation_failed("session exists"));
        }
        sessions.insert(
            sid.to_string(),
            Session {
                candidate,
                running,
                schema,
            },
        );
        Ok(())
    }

    pub fn get(&self, sid: &str) -> Option<Session> {
        self.inner
            .read()
            .expect("session map poisoned")
            .get(sid)
            .cloned()
    }

    pub fn delete(&self, sid: &str) {
        self.inner.write().expect("session map poisoned").remove(sid);
    }
}

/// Removes the session when the read or commit holding it finishes.
pub struct SessionGuard {
    sessions: Sessions,
    sid: String,
}

impl SessionGuard {
    pub fn new(sessions: &Sessions, sid: impl Into<String>) -> Self {
        SessionGuard {
            sessions: sessions.clone(),
            sid: sid.into(),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.delete(&self.sid);
    }
}

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Build a session id from the interface name and a monotonic stamp.
pub fn session_id(ifname: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("INTF_{}_{}.{}", ifname, nanos, seq)
}
