use serde_json::{json, Value};
use tokio::sync::broadcast;

/// YANG namespace the manager's notifications are published under.
pub const NOTIFY_NAMESPACE: &str = "vyatta-ifmgr-v1";

/// One outbound notification for the enclosing bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub namespace: &'static str,
    pub name: &'static str,
    pub data: Value,
}

/// Fan-out channel announcing observable state changes to subscribers.
///
/// Emission never blocks and never fails; with no subscribers the
/// notification is dropped, like any bus publish.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new() -> Notifier {
        let (tx, _rx) = broadcast::channel(64);
        Notifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    fn emit(&self, name: &'static str, data: Value) {
        log::debug!("notify: {} {}", name, data);
        let _ = self.tx.send(Notification {
            namespace: NOTIFY_NAMESPACE,
            name,
            data,
        });
    }

    pub fn configuration_updated(&self, ifname: &str) {
        self.emit(
            "configuration-updated",
            json!({ "vyatta-ifmgr-v1:interface": { "name": ifname } }),
        );
    }

    pub fn interface_state(&self, ifname: &str, state: &str) {
        self.emit(
            "interface-state",
            json!({ "vyatta-ifmgr-v1:interface": { "name": ifname, "state": state } }),
        );
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn payload_shapes_match_the_model() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.interface_state("dp0s3", "plugged");
        let event = rx.recv().await.expect("event");
        assert_eq!(event.name, "interface-state");
        assert_eq!(
            event.data,
            json!({ "vyatta-ifmgr-v1:interface": { "name": "dp0s3", "state": "plugged" } })
        );

        notifier.configuration_updated("dp0s3");
        let event = rx.recv().await.expect("event");
        assert_eq!(event.name, "configuration-updated");
        assert_eq!(
            event.data,
            json!({ "vyatta-ifmgr-v1:interface": { "name": "dp0s3" } })
        );
    }
}
