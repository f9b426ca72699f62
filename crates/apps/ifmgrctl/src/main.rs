use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use ifmgr_rpc::{Client, Db};

#[derive(Parser, Debug)]
#[command(name = "ifmgrctl", about = "Control utility for the interface manager daemon", version)]
struct Cli {
    /// Daemon socket.
    #[arg(long, default_value = "/run/ifmgrd/main.sock")]
    socket: PathBuf,

    /// Configuration daemon socket, used by `apply` to fetch the
    /// candidate tree.
    #[arg(long, default_value = "/run/configd/main.sock")]
    configd_socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the latest configuration to managed interfaces.
    Apply,
    /// Register a new device to be managed.
    Register { interface: String },
    /// Stop managing a device.
    Unregister { interface: String },
    /// Send a plug event for a device.
    Plug {
        #[arg(env = "INTERFACE")]
        interface: Option<String>,
    },
    /// Send an unplug event for a device.
    Unplug {
        #[arg(env = "INTERFACE")]
        interface: Option<String>,
    },
}

fn intf_name(arg: Option<String>) -> anyhow::Result<String> {
    let name = arg.unwrap_or_default();
    if name.is_empty() {
        anyhow::bail!("must supply interface name");
    }
    Ok(name)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut client = Client::dial(&cli.socket)
        .await
        .with_context(|| format!("connecting to {}", cli.socket.display()))?;

    match cli.command {
        Command::Apply => {
            let mut configd = Client::dial(&cli.configd_socket)
                .await
                .with_context(|| format!("connecting to {}", cli.configd_socket.display()))?;
            let config = configd
                .tree_get(Db::Candidate as i64, "", "/", "json")
                .await
                .context("fetching candidate configuration")?;
            client.apply(&config).await?;
        }
        Command::Register { interface } => client.register(&interface).await?,
        Command::Unregister { interface } => client.unregister(&interface).await?,
        Command::Plug { interface } => client.plug(&intf_name(interface)?).await?,
        Command::Unplug { interface } => client.unplug(&intf_name(interface)?).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{:#}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_name_is_required() {
        assert!(intf_name(None).is_err());
        assert!(intf_name(Some(String::new())).is_err());
        assert_eq!(intf_name(Some("dp0s3".to_string())).expect("name"), "dp0s3");
    }
}
