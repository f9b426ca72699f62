//! ifmgrd is a daemon that manages interface configuration.
//!
//! The surrounding configuration daemon commits configuration at
//! transaction time; ifmgrd holds the per-interface pieces that cannot
//! be applied yet and replays them as devices come and go. It listens on
//! a Unix socket for the RPC surface and proxies schema-level requests
//! to the configuration daemon.

use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use ifmgr_core::{Core, DiffCommitDriver, Schema, SchemaStore};
use ifmgr_rpc::{Config, Srv};

#[derive(Parser, Debug)]
#[command(name = "ifmgrd", about = "Interface configuration manager daemon", version)]
struct Args {
    /// Path to the socket used to communicate with the daemon.
    #[arg(long, default_value = "/run/ifmgrd/main.sock")]
    socket: PathBuf,

    /// Compiled schema descriptor loaded at startup.
    #[arg(long, default_value = "/usr/share/ifmgrd/schema.json")]
    schema: PathBuf,

    /// Location of the configuration daemon socket requests proxy to.
    #[arg(long, default_value = "/run/configd/main.sock")]
    configd_socket: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let descriptor = fs::read_to_string(&args.schema)
        .with_context(|| format!("reading schema descriptor {}", args.schema.display()))?;
    let schema = Schema::from_json(&descriptor)
        .with_context(|| format!("compiling schema descriptor {}", args.schema.display()))?;

    let core = Core::new(SchemaStore::new(schema), Arc::new(DiffCommitDriver));

    // hand notifications to the enclosing bus; here that is the log
    let mut events = core.notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    log::info!("notify: {}:{} {}", event.namespace, event.name, event.data);
                }
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("notify: dropped {} notifications", missed);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Some(parent) = args.socket.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let srv = Srv::bind(
        core,
        Config {
            socket: args.socket,
            configd_socket: args.configd_socket,
        },
    )
    .context("binding daemon socket")?;

    srv.serve().await.context("serving rpc connections")?;
    Ok(())
}
