use serde_json::{json, Value};
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::types::{read_json, Request, Response};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("{0}")]
    Io(#[from] io::Error),

    /// Error string returned by the far end, verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("rpc protocol error: {0}")]
    Protocol(String),
}

/// Outbound JSON-RPC client over a Unix stream socket.
///
/// Used both by the control utilities to reach ifmgrd and by each server
/// connection to proxy requests through to the upstream configuration
/// daemon. One call is in flight at a time.
pub struct Client {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    buf: Vec<u8>,
    next_id: i64,
}

impl Client {
    pub async fn dial(path: impl AsRef<Path>) -> Result<Client, ClientError> {
        let stream = UnixStream::connect(path).await?;
        let (reader, writer) = stream.into_split();
        Ok(Client {
            reader,
            writer,
            buf: Vec::new(),
            next_id: 0,
        })
    }

    pub async fn call(&mut self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.next_id += 1;
        let request = Request {
            method: method.to_string(),
            params,
            id: self.next_id,
        };
        let encoded = serde_json::to_vec(&request)
            .map_err(|err| ClientError::Protocol(err.to_string()))?;
        self.writer.write_all(&encoded).await?;

        let response: Response = read_json(&mut self.reader, &mut self.buf)
            .await?
            .ok_or_else(|| ClientError::Protocol("connection closed awaiting response".into()))?;
        if response.id != self.next_id {
            return Err(ClientError::Protocol(format!(
                "response id {} does not match request id {}",
                response.id, self.next_id
            )));
        }
        if let Some(message) = response.error {
            return Err(ClientError::Remote(message));
        }
        Ok(response.result)
    }

    /// Call a method whose only interesting outcome is the error; the
    /// JSON-RPC convention still obliges the far end to return a value.
    async fn call_bool_ignore(
        &mut self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<(), ClientError> {
        let result = self.call(method, params).await?;
        match result {
            Value::Bool(_) => Ok(()),
            other => Err(ClientError::Protocol(format!(
                "wrong return type for {} got {} expecting bool",
                method, other
            ))),
        }
    }

    async fn call_string(
        &mut self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<String, ClientError> {
        let result = self.call(method, params).await?;
        match result {
            Value::String(value) => Ok(value),
            other => Err(ClientError::Protocol(format!(
                "wrong return type for {} got {} expecting string",
                method, other
            ))),
        }
    }

    pub async fn running(&mut self, intf: &str) -> Result<String, ClientError> {
        self.call_string("Running", vec![json!(intf)]).await
    }

    pub async fn apply(&mut self, config: &str) -> Result<(), ClientError> {
        self.call_bool_ignore("Apply", vec![json!(config)]).await
    }

    pub async fn register(&mut self, intf: &str) -> Result<(), ClientError> {
        self.call_bool_ignore("Register", vec![json!(intf)]).await
    }

    pub async fn unregister(&mut self, intf: &str) -> Result<(), ClientError> {
        self.call_bool_ignore("Unregister", vec![json!(intf)]).await
    }

    pub async fn plug(&mut self, intf: &str) -> Result<(), ClientError> {
        self.call_bool_ignore("Plug", vec![json!(intf)]).await
    }

    pub async fn unplug(&mut self, intf: &str) -> Result<(), ClientError> {
        self.call_bool_ignore("Unplug", vec![json!(intf)]).await
    }

    /// Fetch a tree from the far end; `db` uses the shared wire numbering.
    pub async fn tree_get(
        &mut self,
        db: i64,
        sid: &str,
        path: &str,
        encoding: &str,
    ) -> Result<String, ClientError> {
        self.call_string(
            "TreeGet",
            vec![json!(db), json!(sid), json!(path), json!(encoding), json!({})],
        )
        .await
    }
}
