use std::fs;
use std::io;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use ifmgr_core::Core;

use crate::client::Client;
use crate::dispatch::{self, Disp};
use crate::group;
use crate::server::Config;
use crate::types::{read_json, Request, Response};

/// The special value ~0 means the login id was never set, which is the
/// case for daemons and boot processes.
fn login_uid(pid: i32) -> Option<u32> {
    let raw = fs::read_to_string(format!("/proc/{}/loginuid", pid)).ok()?;
    let uid: u32 = raw.trim().parse().ok()?;
    if uid == u32::MAX {
        return None;
    }
    Some(uid)
}

fn peer_secrets(stream: &UnixStream) -> bool {
    let cred = match stream.peer_cred() {
        Ok(cred) => cred,
        Err(err) => {
            log::warn!("conn: peer credentials unavailable: {}", err);
            return false;
        }
    };
    let uid = cred
        .pid()
        .and_then(login_uid)
        .unwrap_or_else(|| cred.uid());
    match group::user_in_group(uid, "secrets") {
        Ok(member) => member,
        Err(err) => {
            log::warn!("conn: group lookup for uid {} failed: {}", uid, err);
            false
        }
    }
}

/// Main loop for one accepted connection: read requests, dispatch, write
/// responses. Transport errors end the loop; dispatch errors only fill
/// the response's `error` field.
pub async fn handle(stream: UnixStream, core: Arc<Core>, config: Arc<Config>) {
    let secrets = peer_secrets(&stream);

    let client = match Client::dial(&config.configd_socket).await {
        Ok(client) => Some(client),
        Err(err) => {
            log::warn!(
                "conn: cannot reach configuration daemon at {}: {}",
                config.configd_socket.display(),
                err
            );
            None
        }
    };
    let mut disp = Disp::new(core, client, secrets);

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = Vec::new();

    loop {
        let request: Request = match read_json(&mut reader, &mut buf).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(err) => {
                if err.kind() != io::ErrorKind::UnexpectedEof {
                    log::warn!("conn: {}", err);
                }
                break;
            }
        };

        let id = request.id;
        let response = match dispatch::call(&mut disp, &request.method, &request.params).await {
            Ok(result) => Response::result(result, id),
            Err(err) => Response::error(err.to_string(), id),
        };

        let encoded = match serde_json::to_vec(&response) {
            Ok(encoded) => encoded,
            Err(err) => {
                log::error!("conn: response encode failed: {}", err);
                break;
            }
        };
        if let Err(err) = writer.write_all(&encoded).await {
            log::warn!("conn: {}", err);
            break;
        }
    }
}
