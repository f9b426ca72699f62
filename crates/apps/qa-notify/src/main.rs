//! qa-notify blocks until the interface manager's running configuration
//! reaches a specified state: `--set` paths present, `--delete` paths
//! absent, and any named interfaces agreeing between the configuration
//! daemon's candidate view and the manager's running view.
//!
//! This is a diagnostic observer for test harnesses; it only ever reads.

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use ifmgr_rpc::{Client, ClientError, Db};

#[derive(Parser, Debug)]
#[command(
    name = "qa-notify",
    about = "Wait for the interface manager's running configuration to reach a state",
    version
)]
struct Cli {
    /// Report every predicate that does not hold yet.
    #[arg(long)]
    verbose: bool,

    /// Seconds to wait before giving up.
    #[arg(long, default_value_t = 15)]
    timeout: u64,

    /// Configuration path ("interfaces <type> <name> ...") that must be
    /// present in the running configuration. May repeat.
    #[arg(long = "set")]
    set: Vec<String>,

    /// Configuration path that must be absent from the running
    /// configuration. May repeat.
    #[arg(long = "delete")]
    delete: Vec<String>,

    /// Interfaces whose manager view must equal the configuration
    /// daemon's candidate view.
    interfaces: Vec<String>,

    /// Daemon socket.
    #[arg(long, default_value = "/run/ifmgrd/main.sock")]
    socket: PathBuf,

    /// Configuration daemon socket.
    #[arg(long, default_value = "/run/configd/main.sock")]
    configd_socket: PathBuf,
}

/// Split a path into fields, honoring quotes and backslash escapes:
/// `interfaces dataplane dp0s3 desc "test desc"` has five fields, the
/// last containing the space.
fn split_path(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            c if Some(c) == quote => quote = None,
            '"' | '\'' if quote.is_none() && current.is_empty() => quote = Some(c),
            c if c.is_whitespace() && quote.is_none() => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Does `path` lead to a present node in a JSON configuration document?
/// The final element may name a leaf value or a leaf-list member.
fn path_present(value: &Value, path: &[String]) -> bool {
    let Some((head, rest)) = path.split_first() else {
        return true;
    };
    match value {
        Value::Object(map) => map
            .get(head.as_str())
            .map(|next| path_present(next, rest))
            .unwrap_or(false),
        Value::Array(items) => {
            rest.is_empty() && items.iter().any(|item| item.as_str() == Some(head.as_str()))
        }
        Value::String(leaf) => rest.is_empty() && leaf == head,
        Value::Number(leaf) => rest.is_empty() && leaf.to_string() == *head,
        Value::Bool(leaf) => rest.is_empty() && leaf.to_string() == *head,
        _ => false,
    }
}

/// Locate `interfaces/<any type>/<name>` in a configuration document.
fn find_interface<'a>(doc: &'a Value, name: &str) -> Option<&'a Value> {
    let types = doc.get("interfaces")?.as_object()?;
    for entries in types.values() {
        if let Some(map) = entries.as_object() {
            if let Some(found) = map.get(name) {
                return Some(found);
            }
        }
    }
    None
}

/// Is the given "interfaces <type> <name> ..." path present in that
/// interface's running configuration?
async fn configured(client: &mut Client, path: &str) -> anyhow::Result<bool> {
    let ps = split_path(path);
    if ps.len() < 3 {
        return Ok(false);
    }
    let doc = match client.running(&ps[2]).await {
        Ok(doc) => doc,
        // an unmanaged interface has no running configuration yet
        Err(ClientError::Remote(_)) => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    let value: Value = serde_json::from_str(&doc).context("parsing running configuration")?;
    Ok(path_present(&value, &ps))
}

async fn satisfied(cli: &Cli) -> anyhow::Result<bool> {
    let mut client = Client::dial(&cli.socket).await?;

    for path in &cli.set {
        if !configured(&mut client, path).await? {
            if cli.verbose {
                eprintln!("set path not present: [{}]", path);
            }
            return Ok(false);
        }
    }
    for path in &cli.delete {
        if configured(&mut client, path).await? {
            if cli.verbose {
                eprintln!("delete path present: [{}]", path);
            }
            return Ok(false);
        }
    }

    if !cli.interfaces.is_empty() {
        let mut configd = Client::dial(&cli.configd_socket).await?;
        let candidate = configd
            .tree_get(Db::Candidate as i64, "", "/", "json")
            .await?;
        let candidate: Value =
            serde_json::from_str(&candidate).context("parsing candidate configuration")?;

        for intf in &cli.interfaces {
            let theirs = find_interface(&candidate, intf).cloned();
            let ours = match client.running(intf).await {
                Ok(doc) => {
                    let value: Value =
                        serde_json::from_str(&doc).context("parsing running configuration")?;
                    find_interface(&value, intf).cloned()
                }
                Err(ClientError::Remote(_)) => None,
                Err(err) => return Err(err.into()),
            };
            if theirs != ours {
                if cli.verbose {
                    eprintln!("interface views disagree: [{}]", intf);
                }
                return Ok(false);
            }
        }
    }
    Ok(true)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let deadline = Instant::now() + Duration::from_secs(cli.timeout);
    loop {
        match satisfied(&cli).await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            // the daemons may still be coming up; keep waiting
            Err(err) if cli.verbose => eprintln!("check failed: {:#}", err),
            Err(_) => {}
        }
        if Instant::now() >= deadline {
            anyhow::bail!("timeout expired waiting for configuration to settle");
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
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
    use serde_json::json;

    #[test]
    fn splits_plain_fields() {
        assert_eq!(
            split_path("interfaces dataplane dp0s3"),
            vec!["interfaces", "dataplane", "dp0s3"]
        );
    }

    #[test]
    fn splits_quoted_fields() {
        assert_eq!(
            split_path(r#"interfaces dataplane dp0s3 desc "test desc""#),
            vec!["interfaces", "dataplane", "dp0s3", "desc", "test desc"]
        );
    }

    #[test]
    fn splits_escaped_characters() {
        assert_eq!(
            split_path(r"interfaces dataplane dp0s3 desc a\ b"),
            vec!["interfaces", "dataplane", "dp0s3", "desc", "a b"]
        );
    }

    fn doc() -> Value {
        json!({
            "interfaces": {
                "dataplane": {
                    "dp0s3": {
                        "description": "uplink",
                        "address": ["dhcp", "10.0.0.1/24"],
                        "mtu": 1500
                    }
                }
            }
        })
    }

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn finds_container_paths() {
        assert!(path_present(&doc(), &path(&["interfaces", "dataplane", "dp0s3"])));
        assert!(!path_present(&doc(), &path(&["interfaces", "dataplane", "dp0s9"])));
    }

    #[test]
    fn finds_leaf_values() {
        assert!(path_present(
            &doc(),
            &path(&["interfaces", "dataplane", "dp0s3", "description", "uplink"])
        ));
        assert!(!path_present(
            &doc(),
            &path(&["interfaces", "dataplane", "dp0s3", "description", "downlink"])
        ));
        assert!(path_present(
            &doc(),
            &path(&["interfaces", "dataplane", "dp0s3", "mtu", "1500"])
        ));
    }

    #[test]
    fn finds_leaf_list_members() {
        assert!(path_present(
            &doc(),
            &path(&["interfaces", "dataplane", "dp0s3", "address", "dhcp"])
        ));
        assert!(!path_present(
            &doc(),
            &path(&["interfaces", "dataplane", "dp0s3", "address", "static"])
        ));
    }

    #[test]
    fn locates_interfaces_across_types() {
        let doc_val = doc();
        let found = find_interface(&doc_val, "dp0s3").expect("dp0s3");
        assert_eq!(found["description"], json!("uplink"));
        assert!(find_interface(&doc(), "tun0").is_none());
    }
}
