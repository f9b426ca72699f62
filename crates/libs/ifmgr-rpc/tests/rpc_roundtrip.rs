//! Full-stack exercises over real Unix sockets: server, connection
//! handling, framing, and the outbound client.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use ifmgr_core::{Core, DiffCommitDriver, Schema, SchemaStore};
use ifmgr_rpc::{Client, ClientError, Config, Srv};

const DESCRIPTOR: &str = r#"[
    {
        "name": "interfaces",
        "kind": "container",
        "children": [
            {
                "name": "dataplane",
                "kind": "list",
                "children": [
                    { "name": "description", "kind": "leaf" }
                ]
            }
        ]
    }
]"#;

fn test_core() -> Arc<Core> {
    let schema = Schema::from_json(DESCRIPTOR).expect("descriptor");
    Core::with_probe(
        SchemaStore::new(schema),
        Arc::new(DiffCommitDriver),
        Arc::new(|_: &str| false),
    )
}

struct TestServer {
    _dir: tempfile::TempDir,
    socket: std::path::PathBuf,
}

/// Start a server in a scratch directory; `configd_socket` may point at
/// another test server to exercise proxying.
fn start_server(configd_socket: Option<std::path::PathBuf>) -> TestServer {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("main.sock");
    let config = Config {
        socket: socket.clone(),
        configd_socket: configd_socket
            .unwrap_or_else(|| dir.path().join("missing-configd.sock")),
    };
    let srv = Srv::bind(test_core(), config).expect("bind");
    tokio::spawn(async move {
        let _ = srv.serve().await;
    });
    TestServer { _dir: dir, socket }
}

#[tokio::test]
async fn register_apply_running_over_the_wire() {
    let server = start_server(None);
    let mut client = Client::dial(&server.socket).await.expect("dial");

    client.register("dp0s3").await.expect("register");
    client
        .apply(r#"{"interfaces":{"dataplane":{"dp0s3":{"description":"uplink"}}}}"#)
        .await
        .expect("apply");
    client.plug("dp0s3").await.expect("plug");

    let mut running = String::new();
    for _ in 0..1000 {
        running = client.running("dp0s3").await.expect("running");
        if running.contains("uplink") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let parsed: Value = serde_json::from_str(&running).expect("json");
    assert_eq!(
        parsed["interfaces"]["dataplane"]["dp0s3"]["description"],
        json!("uplink")
    );

    client.unplug("dp0s3").await.expect("unplug");
    for _ in 0..1000 {
        running = client.running("dp0s3").await.expect("running");
        if running == "{}" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(running, "{}");
}

#[tokio::test]
async fn errors_keep_the_connection_open() {
    let server = start_server(None);
    let mut client = Client::dial(&server.socket).await.expect("dial");

    let err = client.running("dp99").await.expect_err("unmanaged");
    match err {
        ClientError::Remote(message) => {
            assert_eq!(message, "data-missing: Interface not managed by ifmgrd");
        }
        other => panic!("unexpected error {:?}", other),
    }

    // same connection still works
    client.register("dp99").await.expect("register");
    let running = client.running("dp99").await.expect("running");
    assert_eq!(running, "{}");
}

#[tokio::test]
async fn unknown_method_and_arity_errors_over_the_wire() {
    let server = start_server(None);
    let mut client = Client::dial(&server.socket).await.expect("dial");

    let err = client.call("Nope", vec![]).await.expect_err("unknown");
    match err {
        ClientError::Remote(message) => assert_eq!(message, "unknown method Nope"),
        other => panic!("unexpected error {:?}", other),
    }

    let err = client
        .call("Plug", vec![json!("a"), json!("b")])
        .await
        .expect_err("arity");
    match err {
        ClientError::Remote(message) => {
            assert_eq!(message, "too many arguments in call to Plug expected 1 got 2");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn proxied_methods_forward_upstream_errors_verbatim() {
    let upstream = start_server(None);
    let server = start_server(Some(upstream.socket.clone()));
    let mut client = Client::dial(&server.socket).await.expect("dial");

    // the upstream test daemon has no upstream of its own, so its
    // dispatcher's error comes back through the proxy untouched
    let err = client
        .call("TmplGet", vec![json!("/interfaces")])
        .await
        .expect_err("proxy error");
    match err {
        ClientError::Remote(message) => {
            assert_eq!(message, "operation-failed: no connection to configuration daemon");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn back_to_back_requests_share_one_buffer() {
    let server = start_server(None);
    let mut stream = UnixStream::connect(&server.socket).await.expect("connect");

    // two requests in a single write, no framing between them
    let wire = concat!(
        r#"{"method":"Register","params":["dp0s3"],"id":1}"#,
        r#"{"method":"SessionExists","params":["nope"],"id":2}"#
    );
    stream.write_all(wire.as_bytes()).await.expect("write");

    let mut collected = Vec::new();
    let mut chunk = [0_u8; 4096];
    while count_objects(&collected) < 2 {
        let read = stream.read(&mut chunk).await.expect("read");
        assert!(read > 0, "server closed early");
        collected.extend_from_slice(&chunk[..read]);
    }

    let mut stream_iter =
        serde_json::Deserializer::from_slice(&collected).into_iter::<Value>();
    let first = stream_iter.next().expect("first").expect("valid json");
    assert_eq!(first["id"], json!(1));
    assert_eq!(first["result"], json!(true));
    assert_eq!(first["error"], Value::Null);
    let second = stream_iter.next().expect("second").expect("valid json");
    assert_eq!(second["id"], json!(2));
    assert_eq!(second["result"], json!(false));
}

fn count_objects(bytes: &[u8]) -> usize {
    serde_json::Deserializer::from_slice(bytes)
        .into_iter::<Value>()
        .filter(|item| item.is_ok())
        .count()
}

#[tokio::test]
async fn malformed_json_terminates_the_connection() {
    let server = start_server(None);
    let mut stream = UnixStream::connect(&server.socket).await.expect("connect");
    stream.write_all(b"this is not json").await.expect("write");

    let mut buf = Vec::new();
    let read = stream.read_to_end(&mut buf).await.expect("read");
    assert_eq!(read, 0, "connection should close with no response");
}
