//! End-to-end exercises of the per-interface state machine through the
//! interface manager, with a recording commit driver whose completion
//! the test controls.

use ifmgr_core::tree::{self, Node};
use ifmgr_core::{
    CommitDriver, CommitOutcome, Committer, Core, MachineState, Notification, Schema, SchemaStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

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

#[derive(Debug, Clone, PartialEq, Eq)]
struct CommitRecord {
    ifname: String,
    // description leaf of the candidate commit root; None for an unapply
    desc: Option<String>,
}

#[derive(Default)]
struct Gate {
    open: bool,
    permits: usize,
}

/// Commit driver that records every job, enforces the one-in-flight
/// invariant per interface, and optionally blocks jobs on a gate the
/// test releases.
struct TestDriver {
    gate: Mutex<Gate>,
    released: Condvar,
    log: Mutex<Vec<CommitRecord>>,
    inflight: Mutex<HashMap<String, usize>>,
    violations: AtomicUsize,
}

impl TestDriver {
    fn gated() -> Arc<TestDriver> {
        Arc::new(TestDriver {
            gate: Mutex::new(Gate {
                open: false,
                permits: 0,
            }),
            released: Condvar::new(),
            log: Mutex::new(Vec::new()),
            inflight: Mutex::new(HashMap::new()),
            violations: AtomicUsize::new(0),
        })
    }

    fn open() -> Arc<TestDriver> {
        let driver = TestDriver::gated();
        driver.gate.lock().expect("gate").open = true;
        driver
    }

    fn release(&self, permits: usize) {
        let mut gate = self.gate.lock().expect("gate");
        gate.permits += permits;
        self.released.notify_all();
    }

    fn commits(&self) -> Vec<CommitRecord> {
        self.log.lock().expect("log").clone()
    }

    fn commit_count(&self) -> usize {
        self.log.lock().expect("log").len()
    }
}

fn ifname_from_sid(sid: &str) -> String {
    let trimmed = sid.strip_prefix("INTF_").unwrap_or(sid);
    match trimmed.rsplit_once('_') {
        Some((name, _stamp)) => name.to_string(),
        None => trimmed.to_string(),
    }
}

fn desc_of(tree: &Option<Arc<Node>>, ifname: &str) -> Option<String> {
    let tree = tree.as_ref()?;
    let path = tree::makepath(&format!("interfaces/dataplane/{}/description", ifname));
    let leaf = tree::node_at(tree, &path)?;
    leaf.children().first().map(|v| v.name().to_string())
}

impl CommitDriver for TestDriver {
    fn changed(&self, committer: &Committer) -> bool {
        committer.candidate != committer.running
    }

    fn commit(&self, committer: &Committer) -> CommitOutcome {
        let ifname = ifname_from_sid(&committer.sid);

        {
            let mut inflight = self.inflight.lock().expect("inflight");
            let count = inflight.entry(ifname.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.violations.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.log.lock().expect("log").push(CommitRecord {
            ifname: ifname.clone(),
            desc: desc_of(&committer.candidate, &ifname),
        });

        let mut gate = self.gate.lock().expect("gate");
        while !gate.open && gate.permits == 0 {
            gate = self.released.wait(gate).expect("gate");
        }
        if !gate.open {
            gate.permits -= 1;
        }
        drop(gate);

        *self
            .inflight
            .lock()
            .expect("inflight")
            .get_mut(&ifname)
            .expect("inflight entry") -= 1;

        CommitOutcome {
            outputs: vec![format!("applied {}", ifname)],
            errors: Vec::new(),
        }
    }
}

struct Harness {
    core: Arc<Core>,
    driver: Arc<TestDriver>,
    present: Arc<AtomicBool>,
    events: broadcast::Receiver<Notification>,
}

fn harness(driver: Arc<TestDriver>) -> Harness {
    let schema = Schema::from_json(DESCRIPTOR).expect("descriptor");
    let present = Arc::new(AtomicBool::new(false));
    let probe = {
        let present = present.clone();
        Arc::new(move |_: &str| present.load(Ordering::SeqCst))
    };
    let core = Core::with_probe(SchemaStore::new(schema), driver.clone(), probe);
    let events = core.notifier.subscribe();
    Harness {
        core,
        driver,
        present,
        events,
    }
}

impl Harness {
    fn full_tree(&self, ifname: &str, desc: &str) -> Arc<Node> {
        let config = format!(
            r#"{{"interfaces":{{"dataplane":{{"{}":{{"description":"{}"}}}}}}}}"#,
            ifname, desc
        );
        tree::from_json(&self.core.schema.load(), &config).expect("config")
    }

    fn empty_tree(&self) -> Arc<Node> {
        tree::from_json(&self.core.schema.load(), r#"{"interfaces":{}}"#).expect("config")
    }

    fn drain_events(&mut self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            let iface = &event.data["vyatta-ifmgr-v1:interface"];
            let detail = iface["state"].as_str().unwrap_or_default().to_string();
            out.push((event.name.to_string(), detail));
        }
        out
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn coalesces_applies_arriving_during_a_commit() {
    let mut h = harness(TestDriver::gated());
    let a = h.full_tree("dp0s3", "a");
    let b = h.full_tree("dp0s3", "b");
    let c = h.full_tree("dp0s3", "c");

    h.core.intfmgr.register("dp0s3");
    h.core.intfmgr.apply(a);
    h.core.intfmgr.plug("dp0s3");

    let driver = h.driver.clone();
    wait_until("first commit to start", || driver.commit_count() == 1).await;

    // burst while the first commit is still running
    h.core.intfmgr.apply(b);
    h.core.intfmgr.apply(c.clone());

    h.driver.release(1);
    wait_until("coalesced follow-up commit", || driver.commit_count() == 2).await;
    h.driver.release(1);

    let mach = h.core.intfmgr.machine("dp0s3").expect("machine");
    let mach_check = mach.clone();
    wait_until("machine to settle", || mach_check.state() == MachineState::Plugged).await;

    let commits: Vec<Option<String>> = h.driver.commits().into_iter().map(|r| r.desc).collect();
    assert_eq!(commits, vec![Some("a".to_string()), Some("c".to_string())]);
    assert!(tree::same_tree(&mach.running(), &Some(c)));
    assert_eq!(h.driver.violations.load(Ordering::SeqCst), 0);

    let events = h.drain_events();
    let plugs: Vec<_> = events.iter().filter(|(n, _)| n == "interface-state").collect();
    assert_eq!(plugs.len(), 1);
    assert_eq!(plugs[0].1, "plugged");
    let updates = events
        .iter()
        .filter(|(n, _)| n == "configuration-updated")
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn unplug_during_apply_cleans_up_after_completion() {
    let mut h = harness(TestDriver::gated());
    let a = h.full_tree("dp0s3", "a");

    h.core.intfmgr.register("dp0s3");
    h.core.intfmgr.plug("dp0s3");

    let mach = h.core.intfmgr.machine("dp0s3").expect("machine");
    // empty candidate on plug commits nothing
    let mach_check = mach.clone();
    wait_until("initial settle", || mach_check.state() == MachineState::Plugged).await;

    h.core.intfmgr.apply(a.clone());
    let driver = h.driver.clone();
    wait_until("apply commit to start", || driver.commit_count() == 1).await;

    h.core.intfmgr.unplug("dp0s3");
    h.driver.release(1);
    wait_until("cleanup commit", || driver.commit_count() == 2).await;
    h.driver.release(1);

    let mach_check = mach.clone();
    wait_until("machine to unplug", || {
        mach_check.state() == MachineState::Unplugged
    })
    .await;

    let commits: Vec<Option<String>> = h.driver.commits().into_iter().map(|r| r.desc).collect();
    assert_eq!(commits, vec![Some("a".to_string()), None]);
    assert!(mach.running().is_none());
    // the staged candidate survives the unplug
    assert!(tree::same_tree(&mach.candidate(), &Some(a)));

    let events = h.drain_events();
    let states: Vec<_> = events
        .iter()
        .filter(|(n, _)| n == "interface-state")
        .map(|(_, s)| s.clone())
        .collect();
    assert_eq!(states, vec!["plugged".to_string(), "unplugged".to_string()]);
    let updates = events
        .iter()
        .filter(|(n, _)| n == "configuration-updated")
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn reset_for_interface_dropped_from_config_empties_running() {
    let mut h = harness(TestDriver::open());
    let a = h.full_tree("dp0s3", "a");

    h.core.intfmgr.register("dp0s3");
    h.core.intfmgr.apply(a.clone());
    h.core.intfmgr.plug("dp0s3");

    let mach = h.core.intfmgr.machine("dp0s3").expect("machine");
    let mach_check = mach.clone();
    let a_check = a.clone();
    wait_until("apply to land", || {
        mach_check.state() == MachineState::Plugged
            && tree::same_tree(&mach_check.running(), &Some(a_check.clone()))
    })
    .await;
    h.drain_events();

    // new full config no longer mentions dp0s3
    let empty = h.empty_tree();
    h.core.intfmgr.apply(empty.clone());

    let mach_check = mach.clone();
    let empty_check = empty.clone();
    wait_until("reset to land", || {
        mach_check.state() == MachineState::Plugged
            && tree::same_tree(&mach_check.running(), &Some(empty_check.clone()))
    })
    .await;

    // still plugged, but nothing for this interface is running
    assert!(tree::commit_root("dp0s3", &mach.running()).is_none());
    let last = h.driver.commits().pop().expect("a commit ran");
    assert_eq!(last.desc, None);
}

#[tokio::test]
async fn kill_during_apply_finishes_then_unapplies() {
    let mut h = harness(TestDriver::gated());
    let a = h.full_tree("dp0s3", "a");

    h.core.intfmgr.register("dp0s3");
    h.core.intfmgr.plug("dp0s3");
    let mach = h.core.intfmgr.machine("dp0s3").expect("machine");
    let mach_check = mach.clone();
    wait_until("initial settle", || mach_check.state() == MachineState::Plugged).await;
    h.drain_events();

    h.core.intfmgr.apply(a.clone());
    let driver = h.driver.clone();
    wait_until("apply commit to start", || driver.commit_count() == 1).await;

    h.core.intfmgr.unregister("dp0s3");
    assert!(!h.core.intfmgr.is_managed("dp0s3"));

    h.driver.release(1);
    wait_until("terminal unapply", || driver.commit_count() == 2).await;
    h.driver.release(1);

    mach.wait_shutdown().await;
    assert_eq!(mach.state(), MachineState::Shutdown);

    let commits: Vec<Option<String>> = h.driver.commits().into_iter().map(|r| r.desc).collect();
    assert_eq!(commits, vec![Some("a".to_string()), None]);

    let updates = h
        .drain_events()
        .iter()
        .filter(|(n, _)| n == "configuration-updated")
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn register_when_kernel_already_reports_device() {
    let mut h = harness(TestDriver::open());
    h.present.store(true, Ordering::SeqCst);

    h.core.intfmgr.register("dp1");
    let mach = h.core.intfmgr.machine("dp1").expect("machine");
    let mach_check = mach.clone();
    wait_until("plug settle", || mach_check.state() == MachineState::Plugged).await;

    let x = h.full_tree("dp1", "x");
    h.core.intfmgr.apply(x.clone());

    let mach_check = mach.clone();
    let x_check = x.clone();
    wait_until("apply to land", || {
        tree::same_tree(&mach_check.running(), &Some(x_check.clone()))
    })
    .await;
    assert_eq!(mach.state(), MachineState::Plugged);

    let commits = h.driver.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].desc, Some("x".to_string()));

    let plugs: Vec<_> = h
        .drain_events()
        .into_iter()
        .filter(|(n, _)| n == "interface-state")
        .collect();
    assert_eq!(plugs.len(), 1);
}

#[tokio::test]
async fn unregister_of_unplugged_machine_commits_nothing() {
    let mut h = harness(TestDriver::open());
    let a = h.full_tree("dp0s3", "a");

    h.core.intfmgr.register("dp0s3");
    h.core.intfmgr.apply(a.clone());

    let mach = h.core.intfmgr.machine("dp0s3").expect("machine");
    h.core.intfmgr.unregister("dp0s3");
    mach.wait_shutdown().await;

    assert!(h.driver.commits().is_empty());
    assert!(mach.running().is_none());

    // the device shows up later; managing it again applies once
    h.present.store(true, Ordering::SeqCst);
    h.drain_events();
    h.core.intfmgr.register("dp0s3");

    let mach = h.core.intfmgr.machine("dp0s3").expect("machine");
    let mach_check = mach.clone();
    let a_check = a.clone();
    wait_until("re-apply to land", || {
        mach_check.state() == MachineState::Plugged
            && tree::same_tree(&mach_check.running(), &Some(a_check.clone()))
    })
    .await;

    assert_eq!(h.driver.commit_count(), 1);
    let plugs = h
        .drain_events()
        .into_iter()
        .filter(|(n, s)| n == "interface-state" && s == "plugged")
        .count();
    assert_eq!(plugs, 1);
}

#[tokio::test]
async fn reapplying_identical_config_commits_and_notifies_nothing() {
    let mut h = harness(TestDriver::open());
    let a = h.full_tree("dp0s3", "a");

    h.core.intfmgr.register("dp0s3");
    h.core.intfmgr.apply(a.clone());
    h.core.intfmgr.plug("dp0s3");

    let mach = h.core.intfmgr.machine("dp0s3").expect("machine");
    let mach_check = mach.clone();
    let a_check = a.clone();
    wait_until("apply to land", || {
        mach_check.state() == MachineState::Plugged
            && tree::same_tree(&mach_check.running(), &Some(a_check.clone()))
    })
    .await;
    h.drain_events();
    let commits_before = h.driver.commit_count();

    // same content, fresh parse: different pointers, equal trees
    let a_again = h.full_tree("dp0s3", "a");
    h.core.intfmgr.apply(a_again.clone());

    let mach_check = mach.clone();
    let again_check = a_again.clone();
    wait_until("re-apply to settle", || {
        mach_check.state() == MachineState::Plugged
            && tree::same_tree(&mach_check.running(), &Some(again_check.clone()))
    })
    .await;

    assert_eq!(h.driver.commit_count(), commits_before);
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn plug_unplug_plug_returns_to_the_same_running_config() {
    let mut h = harness(TestDriver::open());
    let a = h.full_tree("dp0s3", "a");

    h.core.intfmgr.register("dp0s3");
    h.core.intfmgr.apply(a.clone());
    h.core.intfmgr.plug("dp0s3");

    let mach = h.core.intfmgr.machine("dp0s3").expect("machine");
    let mach_check = mach.clone();
    let a_check = a.clone();
    wait_until("first apply", || {
        mach_check.state() == MachineState::Plugged
            && tree::same_tree(&mach_check.running(), &Some(a_check.clone()))
    })
    .await;

    h.core.intfmgr.unplug("dp0s3");
    let mach_check = mach.clone();
    wait_until("unplug settle", || {
        mach_check.state() == MachineState::Unplugged && mach_check.running().is_none()
    })
    .await;

    h.core.intfmgr.plug("dp0s3");
    let mach_check = mach.clone();
    let a_check = a.clone();
    wait_until("re-plug settle", || {
        mach_check.state() == MachineState::Plugged
            && tree::same_tree(&mach_check.running(), &Some(a_check.clone()))
    })
    .await;

    assert_eq!(h.driver.violations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn events_for_unmanaged_interfaces_are_ignored() {
    let h = harness(TestDriver::open());
    h.core.intfmgr.plug("dp99");
    h.core.intfmgr.unplug("dp99");
    h.core.intfmgr.unregister("dp99");
    assert!(h.core.intfmgr.new_session("dp99").is_none());
    assert_eq!(h.driver.commit_count(), 0);
}
