use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::core::{DeviceProbe, Services};
use crate::machine::IntfMachine;
use crate::tree::Node;

/// Only the top level interface names can be registered for, given the
/// shape of the data model. Good enough for the current use case.
pub(crate) fn list_config_interfaces(config: &Arc<Node>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(intf_tree) = config.child("interfaces") {
        for if_type in intf_tree.children() {
            for name in if_type.child_names() {
                out.push(name);
            }
        }
    }
    out
}

/// Production device-presence probe: the kernel exposes present network
/// devices under /sys/class/net.
pub fn sysfs_interface_present(name: &str) -> bool {
    if name.is_empty() || name.contains('/') {
        return false;
    }
    Path::new("/sys/class/net").join(name).exists()
}

struct ManagerInner {
    config: Option<Arc<Node>>,
    interfaces: HashMap<String, IntfMachine>,
}

/// Owner of the interface-name → machine map and of the last seen full
/// configuration tree.
///
/// Administrative mutations serialize on the inner mutex; event delivery
/// holds it only for the map lookup.
pub struct IntfManager {
    inner: Mutex<ManagerInner>,
    services: Services,
    probe: DeviceProbe,
}

impl IntfManager {
    pub(crate) fn new(services: Services, probe: DeviceProbe) -> IntfManager {
        IntfManager {
            inner: Mutex::new(ManagerInner {
                config: None,
                interfaces: HashMap::new(),
            }),
            services,
            probe,
        }
    }

    /// Start managing `name`. A no-op when already managed. A newly
    /// created machine is handed the most recent configuration, and a
    /// Plug when the kernel already reports the device.
    pub fn register(&self, name: &str) {
        let mut inner = self.inner.lock().expect("interface map poisoned");
        if inner.interfaces.contains_key(name) {
            return;
        }
        log::info!("mgr: registering interface {}", name);
        let machine = IntfMachine::spawn(name, self.services.clone());
        inner.interfaces.insert(name.to_string(), machine.clone());

        if let Some(config) = inner.config.clone() {
            machine.apply(Some(config));
        }
        if (self.probe)(name) {
            machine.plug();
        }
    }

    /// Stop managing `name`. The machine is killed; configuration already
    /// applied to the device stays where it is.
    pub fn unregister(&self, name: &str) {
        let mut inner = self.inner.lock().expect("interface map poisoned");
        if let Some(machine) = inner.interfaces.remove(name) {
            log::info!("mgr: unregistering interface {}", name);
            machine.kill();
        }
    }

    /// Take a new full configuration tree: Apply to every managed
    /// interface present in it, Reset to every managed interface that is
    /// not.
    pub fn apply(&self, config: Arc<Node>) {
        let mut inner = self.inner.lock().expect("interface map poisoned");
        inner.config = Some(config.clone());

        let mut in_config = HashSet::new();
        for name in list_config_interfaces(&config) {
            if let Some(machine) = inner.interfaces.get(&name) {
                machine.apply(Some(config.clone()));
                in_config.insert(name);
            }
        }

        for (name, machine) in &inner.interfaces {
            if !in_config.contains(name) {
                machine.reset(Some(config.clone()));
            }
        }
    }

    pub fn plug(&self, name: &str) {
        let inner = self.inner.lock().expect("interface map poisoned");
        if let Some(machine) = inner.interfaces.get(name) {
            machine.plug();
        }
    }

    pub fn unplug(&self, name: &str) {
        let inner = self.inner.lock().expect("interface map poisoned");
        if let Some(machine) = inner.interfaces.get(name) {
            machine.unplug();
        }
    }

    pub fn is_managed(&self, name: &str) -> bool {
        self.inner
            .lock()
            .expect("interface map poisoned")
            .interfaces
            .contains_key(name)
    }

    /// Handle to a managed machine, mainly for read paths and tests.
    pub fn machine(&self, name: &str) -> Option<IntfMachine> {
        self.inner
            .lock()
            .expect("interface map poisoned")
            .interfaces
            .get(name)
            .cloned()
    }

    /// Open a read session over `name`'s current subtrees. `None` when
    /// the interface is not managed.
    pub fn new_session(&self, name: &str) -> Option<String> {
        let inner = self.inner.lock().expect("interface map poisoned");
        let machine = inner.interfaces.get(name)?;
        Some(machine.new_read_session(&self.services))
    }
}
