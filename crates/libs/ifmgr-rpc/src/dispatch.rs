use serde_json::{Map, Value};
use std::sync::Arc;

use ifmgr_core::diff::Diff;
use ifmgr_core::session::Session;
use ifmgr_core::tree::{self, EncodeOpts};
use ifmgr_core::{Core, Kind, MgmtError, SessionGuard};

use crate::client::{Client, ClientError};

/// Which view of a session a read addresses. Wire values 0..=3; anything
/// else reads the running view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Db {
    Auto,
    Running,
    Candidate,
    Effective,
}

impl From<i64> for Db {
    fn from(value: i64) -> Db {
        match value {
            0 => Db::Auto,
            2 => Db::Candidate,
            3 => Db::Effective,
            _ => Db::Running,
        }
    }
}

/// Node status values reported by `NodeGetStatus`, preserved for old API
/// clients.
pub const NODE_UNCHANGED: i64 = 0;
pub const NODE_CHANGED: i64 = 1;
pub const NODE_ADDED: i64 = 2;
pub const NODE_DELETED: i64 = 3;

/// Errors produced when dispatching one RPC call. `Display` is what ends
/// up in the response's `error` field.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("unknown method {name}")]
    UnknownMethod { name: String },

    #[error("too few arguments in call to {method} expected {expected} got {got}")]
    TooFewArgs {
        method: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("too many arguments in call to {method} expected {expected} got {got}")]
    TooManyArgs {
        method: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("cannot use {value} (type {typ}) as type {expected} in call to {method}")]
    BadArgType {
        method: &'static str,
        value: String,
        typ: &'static str,
        expected: &'static str,
    },

    #[error("{0}")]
    Mgmt(#[from] MgmtError),

    /// Error forwarded verbatim from the upstream daemon.
    #[error("{0}")]
    Remote(String),
}

impl From<ClientError> for CallError {
    fn from(err: ClientError) -> CallError {
        match err {
            ClientError::Remote(message) => CallError::Remote(message),
            other => CallError::Mgmt(MgmtError::operation_failed(other.to_string())),
        }
    }
}

/// Per-connection dispatcher: the core services, the outbound client to
/// the upstream daemon, and the connection's secrets visibility.
pub struct Disp {
    core: Arc<Core>,
    client: Option<Client>,
    secrets: bool,
}

impl Disp {
    pub fn new(core: Arc<Core>, client: Option<Client>, secrets: bool) -> Disp {
        Disp {
            core,
            client,
            secrets,
        }
    }

    fn session(&self, sid: &str) -> Result<Session, MgmtError> {
        self.core
            .sessions
            .get(sid)
            .ok_or_else(|| MgmtError::data_missing("Session does not exist"))
    }

    fn db_tree(session: &Session, db: Db) -> Option<Arc<tree::Node>> {
        match db {
            Db::Candidate | Db::Effective | Db::Auto => session.candidate.clone(),
            Db::Running => session.running.clone(),
        }
    }

    pub fn apply(&self, config: &str) -> Result<bool, MgmtError> {
        let schema = self.core.schema.load();
        let parsed = tree::from_json(&schema, config)?;
        self.core.intfmgr.apply(parsed);
        Ok(true)
    }

    pub fn register(&self, intf: &str) -> bool {
        self.core.intfmgr.register(intf);
        true
    }

    pub fn unregister(&self, intf: &str) -> bool {
        self.core.intfmgr.unregister(intf);
        true
    }

    pub fn plug(&self, intf: &str) -> bool {
        self.core.intfmgr.plug(intf);
        true
    }

    pub fn unplug(&self, intf: &str) -> bool {
        self.core.intfmgr.unplug(intf);
        true
    }

    /// Serialize an interface's running configuration. Pending
    /// configuration changes may make an unmanaged interface managed
    /// later, but right now there is nothing to show.
    pub fn running(&self, intf: &str) -> Result<String, MgmtError> {
        let sid = self
            .core
            .intfmgr
            .new_session(intf)
            .ok_or_else(|| MgmtError::data_missing("Interface not managed by ifmgrd"))?;
        let _guard = SessionGuard::new(&self.core.sessions, &sid);

        let mut opts = Map::new();
        if self.secrets {
            opts.insert("Secrets".to_string(), Value::Bool(true));
        }
        self.tree_get(Db::Running, &sid, "/", "json", &opts)
    }

    pub fn get(&self, db: Db, sid: &str, path: &str) -> Result<Vec<String>, MgmtError> {
        let session = self.session(sid)?;
        let ps = tree::makepath(path);
        Ok(Self::db_tree(&session, db)
            .and_then(|t| tree::node_at(&t, &ps).map(|n| n.child_names()))
            .unwrap_or_default())
    }

    pub fn exists(&self, db: Db, sid: &str, path: &str) -> Result<bool, MgmtError> {
        let session = self.session(sid)?;
        let ps = tree::makepath(path);
        session.schema.validate_path(&ps)?;
        Ok(Self::db_tree(&session, db)
            .map(|t| tree::node_at(&t, &ps).is_some())
            .unwrap_or(false))
    }

    /// The tie-break ladder here looks gross but old API clients expect
    /// exactly this behavior.
    pub fn node_get_status(&self, _db: Db, sid: &str, path: &str) -> Result<i64, MgmtError> {
        let session = self.session(sid)?;
        let diff = Diff::new(
            session.candidate.as_ref(),
            session.running.as_ref(),
            &session.schema,
        );

        let ps = tree::makepath(path);
        let Some((node, parent)) = diff.descendant_with_parent(&ps) else {
            return Err(MgmtError::data_missing("Node does not exist"));
        };

        let is_leaf_val = node.kind() == Some(Kind::LeafValue);
        let parent_is_leaf = parent.map(|p| p.kind() == Some(Kind::Leaf)).unwrap_or(false);
        let parent_is_leaf_list = parent
            .map(|p| p.kind() == Some(Kind::LeafList))
            .unwrap_or(false);
        let parent_changed = parent.map(|p| p.changed()).unwrap_or(false);

        let status = if node.deleted() {
            NODE_DELETED
        } else if is_leaf_val && parent_is_leaf {
            NODE_CHANGED
        } else if node.added() {
            NODE_ADDED
        } else if node.changed() {
            NODE_CHANGED
        } else if is_leaf_val && parent_is_leaf_list && parent_changed {
            NODE_CHANGED
        } else {
            NODE_UNCHANGED
        };
        Ok(status)
    }

    pub fn node_is_default(&self, db: Db, sid: &str, path: &str) -> Result<bool, MgmtError> {
        let session = self.session(sid)?;
        let ps = tree::makepath(path);
        session.schema.validate_path(&ps)?;
        let Some(schema_node) = session.schema.descend(&ps) else {
            return Ok(false);
        };
        if schema_node.kind() != Kind::Leaf || schema_node.default_value().is_none() {
            return Ok(false);
        }
        let set = Self::db_tree(&session, db)
            .and_then(|t| tree::node_at(&t, &ps).map(|n| !n.children().is_empty()))
            .unwrap_or(false);
        Ok(!set)
    }

    pub fn tree_get(
        &self,
        db: Db,
        sid: &str,
        path: &str,
        encoding: &str,
        flags: &Map<String, Value>,
    ) -> Result<String, MgmtError> {
        if encoding != "json" {
            return Err(MgmtError::operation_failed(format!(
                "unsupported encoding {:?}",
                encoding
            )));
        }
        let session = self.session(sid)?;
        let ps = tree::makepath(path);

        let tree_root = Self::db_tree(&session, db);
        let node = match &tree_root {
            Some(root) => tree::node_at(root, &ps).cloned(),
            None => None,
        };
        if node.is_none() && !ps.is_empty() {
            let last = ps.last().cloned().unwrap_or_default();
            return Err(
                MgmtError::unknown_element(last).with_path(ps[..ps.len() - 1].join("/"))
            );
        }

        let include_defaults = flags
            .get("Defaults")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let secrets = flags
            .get("Secrets")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let opts = EncodeOpts {
            include_defaults,
            hide_secrets: !secrets,
        };
        let schema_node = session.schema.descend(&ps);
        Ok(tree::encode_json(node.as_ref(), schema_node.as_ref(), &opts))
    }

    pub fn session_exists(&self, sid: &str) -> bool {
        self.core.sessions.get(sid).is_some()
    }

    /// Authorization is delegated elsewhere.
    pub fn auth_authorize(&self, _path: &str, _perm: i64) -> bool {
        true
    }

    async fn proxy(&mut self, method: &'static str, args: &[Value]) -> Result<Value, CallError> {
        match self.client.as_mut() {
            Some(client) => Ok(client.call(method, args.to_vec()).await?),
            None => Err(CallError::Mgmt(MgmtError::operation_failed(
                "no connection to configuration daemon",
            ))),
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn exact(method: &'static str, args: &[Value], expected: usize) -> Result<(), CallError> {
    if args.len() < expected {
        return Err(CallError::TooFewArgs {
            method,
            expected,
            got: args.len(),
        });
    }
    if args.len() > expected {
        return Err(CallError::TooManyArgs {
            method,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn str_arg<'a>(method: &'static str, args: &'a [Value], idx: usize) -> Result<&'a str, CallError> {
    match &args[idx] {
        Value::String(value) => Ok(value),
        other => Err(CallError::BadArgType {
            method,
            value: display_value(other),
            typ: json_type(other),
            expected: "string",
        }),
    }
}

fn int_arg(method: &'static str, args: &[Value], idx: usize) -> Result<i64, CallError> {
    match &args[idx] {
        Value::Number(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .ok_or(CallError::BadArgType {
                method,
                value: value.to_string(),
                typ: "number",
                expected: "int",
            }),
        other => Err(CallError::BadArgType {
            method,
            value: display_value(other),
            typ: json_type(other),
            expected: "int",
        }),
    }
}

fn opts_arg(
    method: &'static str,
    args: &[Value],
    idx: usize,
) -> Result<Map<String, Value>, CallError> {
    match &args[idx] {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        other => Err(CallError::BadArgType {
            method,
            value: display_value(other),
            typ: json_type(other),
            expected: "object",
        }),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// The RPC method table. Every entry validates arity and argument types
/// before touching the operation, so the "second return value is an
/// error" convention of the old reflective dispatcher is gone.
pub async fn call(disp: &mut Disp, method: &str, args: &[Value]) -> Result<Value, CallError> {
    match method {
        "Apply" => {
            exact("Apply", args, 1)?;
            let config = str_arg("Apply", args, 0)?;
            Ok(Value::Bool(disp.apply(config)?))
        }
        "Register" => {
            exact("Register", args, 1)?;
            let intf = str_arg("Register", args, 0)?;
            Ok(Value::Bool(disp.register(intf)))
        }
        "Unregister" => {
            exact("Unregister", args, 1)?;
            let intf = str_arg("Unregister", args, 0)?;
            Ok(Value::Bool(disp.unregister(intf)))
        }
        "Plug" => {
            exact("Plug", args, 1)?;
            let intf = str_arg("Plug", args, 0)?;
            Ok(Value::Bool(disp.plug(intf)))
        }
        "Unplug" => {
            exact("Unplug", args, 1)?;
            let intf = str_arg("Unplug", args, 0)?;
            Ok(Value::Bool(disp.unplug(intf)))
        }
        "Running" => {
            exact("Running", args, 1)?;
            let intf = str_arg("Running", args, 0)?;
            Ok(Value::String(disp.running(intf)?))
        }
        "Get" => {
            exact("Get", args, 3)?;
            let db = Db::from(int_arg("Get", args, 0)?);
            let sid = str_arg("Get", args, 1)?;
            let path = str_arg("Get", args, 2)?;
            Ok(to_value(disp.get(db, sid, path)?))
        }
        "Exists" => {
            exact("Exists", args, 3)?;
            let db = Db::from(int_arg("Exists", args, 0)?);
            let sid = str_arg("Exists", args, 1)?;
            let path = str_arg("Exists", args, 2)?;
            Ok(Value::Bool(disp.exists(db, sid, path)?))
        }
        "NodeGetStatus" => {
            exact("NodeGetStatus", args, 3)?;
            let db = Db::from(int_arg("NodeGetStatus", args, 0)?);
            let sid = str_arg("NodeGetStatus", args, 1)?;
            let path = str_arg("NodeGetStatus", args, 2)?;
            Ok(to_value(disp.node_get_status(db, sid, path)?))
        }
        "NodeIsDefault" => {
            exact("NodeIsDefault", args, 3)?;
            let db = Db::from(int_arg("NodeIsDefault", args, 0)?);
            let sid = str_arg("NodeIsDefault", args, 1)?;
            let path = str_arg("NodeIsDefault", args, 2)?;
            Ok(Value::Bool(disp.node_is_default(db, sid, path)?))
        }
        "TreeGet" => {
            exact("TreeGet", args, 5)?;
            let db = Db::from(int_arg("TreeGet", args, 0)?);
            let sid = str_arg("TreeGet", args, 1)?;
            let path = str_arg("TreeGet", args, 2)?;
            let encoding = str_arg("TreeGet", args, 3)?;
            let flags = opts_arg("TreeGet", args, 4)?;
            Ok(Value::String(disp.tree_get(db, sid, path, encoding, &flags)?))
        }
        "SessionExists" => {
            exact("SessionExists", args, 1)?;
            let sid = str_arg("SessionExists", args, 0)?;
            Ok(Value::Bool(disp.session_exists(sid)))
        }
        "AuthAuthorize" => {
            exact("AuthAuthorize", args, 2)?;
            let path = str_arg("AuthAuthorize", args, 0)?;
            let perm = int_arg("AuthAuthorize", args, 1)?;
            Ok(Value::Bool(disp.auth_authorize(path, perm)))
        }

        // proxied through to the upstream configuration daemon
        "NodeGetType" => {
            exact("NodeGetType", args, 2)?;
            str_arg("NodeGetType", args, 0)?;
            str_arg("NodeGetType", args, 1)?;
            disp.proxy("NodeGetType", args).await
        }
        "TmplGet" => {
            exact("TmplGet", args, 1)?;
            str_arg("TmplGet", args, 0)?;
            disp.proxy("TmplGet", args).await
        }
        "TmplGetChildren" => {
            exact("TmplGetChildren", args, 1)?;
            str_arg("TmplGetChildren", args, 0)?;
            disp.proxy("TmplGetChildren", args).await
        }
        "TmplValidatePath" => {
            exact("TmplValidatePath", args, 1)?;
            str_arg("TmplValidatePath", args, 0)?;
            disp.proxy("TmplValidatePath", args).await
        }
        "TmplValidateValues" => {
            exact("TmplValidateValues", args, 1)?;
            str_arg("TmplValidateValues", args, 0)?;
            disp.proxy("TmplValidateValues", args).await
        }
        "SchemaGet" => {
            exact("SchemaGet", args, 2)?;
            str_arg("SchemaGet", args, 0)?;
            str_arg("SchemaGet", args, 1)?;
            disp.proxy("SchemaGet", args).await
        }
        "GetSchemas" => {
            exact("GetSchemas", args, 0)?;
            disp.proxy("GetSchemas", args).await
        }
        "ReadConfigFile" => {
            exact("ReadConfigFile", args, 1)?;
            str_arg("ReadConfigFile", args, 0)?;
            disp.proxy("ReadConfigFile", args).await
        }
        "CallRpc" => {
            exact("CallRpc", args, 4)?;
            for idx in 0..4 {
                str_arg("CallRpc", args, idx)?;
            }
            disp.proxy("CallRpc", args).await
        }
        "CallRpcXml" => {
            exact("CallRpcXml", args, 3)?;
            for idx in 0..3 {
                str_arg("CallRpcXml", args, idx)?;
            }
            disp.proxy("CallRpcXml", args).await
        }
        "MigrateConfigFile" => {
            exact("MigrateConfigFile", args, 1)?;
            str_arg("MigrateConfigFile", args, 0)?;
            disp.proxy("MigrateConfigFile", args).await
        }
        "Expand" => {
            exact("Expand", args, 1)?;
            str_arg("Expand", args, 0)?;
            disp.proxy("Expand", args).await
        }

        other => Err(CallError::UnknownMethod {
            name: other.to_string(),
        }),
    }
}
