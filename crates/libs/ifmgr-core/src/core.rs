use std::sync::Arc;

use crate::commit::CommitDriver;
use crate::manager::{sysfs_interface_present, IntfManager};
use crate::notify::Notifier;
use crate::pool::CommitPool;
use crate::schema::SchemaStore;
use crate::session::Sessions;

/// Answers "does the kernel currently report this device".
pub type DeviceProbe = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// The shared services a machine task needs; every field is a cheap
/// handle.
#[derive(Clone)]
pub(crate) struct Services {
    pub schema: SchemaStore,
    pub sessions: Sessions,
    pub notifier: Notifier,
    pub pool: CommitPool,
    pub driver: Arc<dyn CommitDriver>,
}

/// One self-contained instance of the manager core.
///
/// There are no process-wide singletons; tests build an isolated `Core`
/// per case, the daemon builds exactly one.
pub struct Core {
    pub schema: SchemaStore,
    pub sessions: Sessions,
    pub notifier: Notifier,
    pub intfmgr: IntfManager,
}

impl Core {
    /// Production wiring: pool sized to the host's logical CPU count,
    /// device presence probed through sysfs.
    pub fn new(schema: SchemaStore, driver: Arc<dyn CommitDriver>) -> Arc<Core> {
        Core::with_probe(schema, driver, Arc::new(sysfs_interface_present))
    }

    /// Like [`Core::new`] with an injected device-presence probe.
    pub fn with_probe(
        schema: SchemaStore,
        driver: Arc<dyn CommitDriver>,
        probe: DeviceProbe,
    ) -> Arc<Core> {
        let sessions = Sessions::new();
        let notifier = Notifier::new();
        let pool = CommitPool::new(num_cpus::get(), driver.clone());
        let services = Services {
            schema: schema.clone(),
            sessions: sessions.clone(),
            notifier: notifier.clone(),
            pool,
            driver,
        };
        let intfmgr = IntfManager::new(services, probe);
        Arc::new(Core {
            schema,
            sessions,
            notifier,
            intfmgr,
        })
    }
}
