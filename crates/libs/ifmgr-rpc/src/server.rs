use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixListener;

use ifmgr_core::Core;

use crate::conn;

/// Daemon-level configuration shared with every connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket the daemon listens on.
    pub socket: PathBuf,
    /// Socket of the upstream configuration daemon requests proxy to.
    pub configd_socket: PathBuf,
}

/// The Unix-socket RPC server.
pub struct Srv {
    listener: UnixListener,
    core: Arc<Core>,
    config: Arc<Config>,
}

impl Srv {
    /// Bind the listening socket, replacing any stale one, and restrict
    /// it to the owning group.
    pub fn bind(core: Arc<Core>, config: Config) -> io::Result<Srv> {
        let _ = fs::remove_file(&config.socket);
        let listener = UnixListener::bind(&config.socket)?;
        fs::set_permissions(&config.socket, fs::Permissions::from_mode(0o770))?;
        Ok(Srv {
            listener,
            core,
            config: Arc::new(config),
        })
    }

    /// Accept connections forever, one handler task per connection.
    pub async fn serve(self) -> io::Result<()> {
        log::info!(
            "srv: listening on {}",
            self.config.socket.display()
        );
        loop {
            let (stream, _addr) = self.listener.accept().await?;
            tokio::spawn(conn::handle(
                stream,
                self.core.clone(),
                self.config.clone(),
            ));
        }
    }
}
