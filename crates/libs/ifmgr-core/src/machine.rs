use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::commit::Committer;
use crate::core::Services;
use crate::diff::Diff;
use crate::session::{session_id, SessionGuard};
use crate::tree::{commit_root, same_tree, Node};

/// Lifecycle states of one managed interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Unplugged,
    Plugged,
    Applying,
    Unapplying,
    Shuttingdown,
    Shutdown,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MachineState::Unplugged => "Unplugged",
            MachineState::Plugged => "Plugged",
            MachineState::Applying => "Applying",
            MachineState::Unapplying => "Unapplying",
            MachineState::Shuttingdown => "Shuttingdown",
            MachineState::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

fn state_from_u8(value: u8) -> MachineState {
    match value {
        0 => MachineState::Unplugged,
        1 => MachineState::Plugged,
        2 => MachineState::Applying,
        3 => MachineState::Unapplying,
        4 => MachineState::Shuttingdown,
        _ => MachineState::Shutdown,
    }
}

fn state_to_u8(state: MachineState) -> u8 {
    match state {
        MachineState::Unplugged => 0,
        MachineState::Plugged => 1,
        MachineState::Applying => 2,
        MachineState::Unapplying => 3,
        MachineState::Shuttingdown => 4,
        MachineState::Shutdown => 5,
    }
}

/// Events a machine consumes, in arrival order. `Done` is internal: the
/// commit driver re-enters the machine with it through the same queue
/// external events use.
#[derive(Debug, Clone)]
pub(crate) enum Event {
    Apply(Option<Arc<Node>>),
    Reset(Option<Arc<Node>>),
    Plug,
    Unplug,
    Kill,
    Done,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Apply(_) => "Apply",
            Event::Reset(_) => "Reset",
            Event::Plug => "Plug",
            Event::Unplug => "Unplug",
            Event::Kill => "Kill",
            Event::Done => "Done",
        };
        f.write_str(name)
    }
}

struct MachineShared {
    ifname: String,
    candidate: ArcSwapOption<Node>,
    running: ArcSwapOption<Node>,
    events: mpsc::UnboundedSender<Event>,
    state: AtomicU8,
    done: CancellationToken,
}

/// Handle to one interface's state machine.
///
/// The machine itself runs on a dedicated task; the handle only enqueues
/// events and reads the atomically published `candidate`/`running`
/// snapshots.
#[derive(Clone)]
pub struct IntfMachine {
    shared: Arc<MachineShared>,
}

impl IntfMachine {
    pub(crate) fn spawn(ifname: &str, services: Services) -> IntfMachine {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MachineShared {
            ifname: ifname.to_string(),
            candidate: ArcSwapOption::empty(),
            running: ArcSwapOption::empty(),
            events: tx,
            state: AtomicU8::new(state_to_u8(MachineState::Unplugged)),
            done: CancellationToken::new(),
        });
        tokio::spawn(run(shared.clone(), services, rx));
        IntfMachine { shared }
    }

    fn send(&self, event: Event) -> bool {
        if self.shared.done.is_cancelled() {
            return false;
        }
        self.shared.events.send(event).is_ok()
    }

    pub fn apply(&self, config: Option<Arc<Node>>) {
        self.send(Event::Apply(config));
    }

    pub fn reset(&self, config: Option<Arc<Node>>) {
        self.send(Event::Reset(config));
    }

    pub fn plug(&self) {
        self.send(Event::Plug);
    }

    pub fn unplug(&self) {
        self.send(Event::Unplug);
    }

    pub fn kill(&self) {
        self.send(Event::Kill);
    }

    pub fn ifname(&self) -> &str {
        &self.shared.ifname
    }

    pub fn state(&self) -> MachineState {
        state_from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.done.is_cancelled()
    }

    /// Resolves once the machine has fully shut down.
    pub async fn wait_shutdown(&self) {
        self.shared.done.cancelled().await;
    }

    pub fn candidate(&self) -> Option<Arc<Node>> {
        self.shared.candidate.load_full()
    }

    pub fn running(&self) -> Option<Arc<Node>> {
        self.shared.running.load_full()
    }

    /// Register a read session over this machine's current commit-root
    /// subtrees. The caller owns deletion of the returned session.
    pub(crate) fn new_read_session(&self, services: &Services) -> String {
        let schema = services.schema.load();
        let sid = session_id(&self.shared.ifname);
        let candidate = commit_root(&self.shared.ifname, &self.shared.candidate.load_full());
        let running = commit_root(&self.shared.ifname, &self.shared.running.load_full());
        if let Err(err) = services.sessions.create(&sid, candidate, running, schema) {
            log::error!("mach({}): {}", self.shared.ifname, err);
        }
        sid
    }
}

async fn run(
    shared: Arc<MachineShared>,
    services: Services,
    mut rx: mpsc::UnboundedReceiver<Event>,
) {
    let mut mach = Machine {
        shared: shared.clone(),
        services,
        plugged: false,
        kill_req: false,
    };

    let mut state = MachineState::Unplugged;
    while let Some(event) = rx.recv().await {
        state = mach.transition(state, event);
        shared.state.store(state_to_u8(state), Ordering::Release);
        if state == MachineState::Shutdown {
            break;
        }
    }
    shared.state.store(state_to_u8(MachineState::Shutdown), Ordering::Release);
    shared.done.cancel();
}

/// The machine's task-private side: the transition function and the
/// flags only it may touch.
struct Machine {
    shared: Arc<MachineShared>,
    services: Services,
    plugged: bool,
    kill_req: bool,
}

impl Machine {
    fn ifname(&self) -> &str {
        &self.shared.ifname
    }

    fn transition(&mut self, state: MachineState, event: Event) -> MachineState {
        use MachineState::{Applying, Plugged, Shuttingdown, Unapplying, Unplugged};

        match (state, event) {
            (Unplugged, Event::Apply(config)) => {
                log::info!("mach({}): staging new configuration", self.ifname());
                self.shared.candidate.store(config);
                Unplugged
            }
            (Unplugged, Event::Reset(config)) => {
                log::info!("mach({}): removing configuration", self.ifname());
                self.shared.candidate.store(config);
                Unplugged
            }
            (Unplugged, Event::Plug) => self.plug(),
            (Unplugged, Event::Kill) => self.shutdown(),

            (Plugged, Event::Apply(config)) => {
                log::info!("mach({}): applying new configuration", self.ifname());
                self.apply_config(config)
            }
            (Plugged, Event::Reset(config)) => {
                log::info!("mach({}): removing configuration", self.ifname());
                self.apply_config(config)
            }
            (Plugged, Event::Unplug) => self.unplug(),
            (Plugged, Event::Kill) => {
                log::info!("mach({}): stopping interface manager", self.ifname());
                self.unapply_config(Shuttingdown)
            }

            (Applying, Event::Apply(config)) => {
                // coalesce changes arriving while scripts run
                log::info!(
                    "mach({}): staging new configuration during previous application",
                    self.ifname()
                );
                self.shared.candidate.store(config);
                Applying
            }
            (Applying, Event::Reset(config)) => {
                log::info!(
                    "mach({}): removing configuration during previous application",
                    self.ifname()
                );
                self.shared.candidate.store(config);
                Applying
            }
            (Applying, Event::Unplug) => {
                // remember the unplug so cleanup runs once apply completes
                log::info!("mach({}): interface became inactive during apply", self.ifname());
                self.services.notifier.interface_state(self.ifname(), "unplugged");
                self.plugged = false;
                Applying
            }
            (Applying, Event::Done) => self.done_applying(),
            (Applying, Event::Kill) => {
                log::info!("mach({}): stopping interface manager", self.ifname());
                self.kill_req = true;
                Applying
            }

            (Unapplying, Event::Apply(config)) => {
                log::info!("mach({}): staging new configuration during unapply", self.ifname());
                self.shared.candidate.store(config);
                Unapplying
            }
            (Unapplying, Event::Reset(config)) => {
                log::info!("mach({}): removing configuration during unapply", self.ifname());
                self.shared.candidate.store(config);
                Unapplying
            }
            (Unapplying, Event::Plug) => {
                log::info!("mach({}): interface became active", self.ifname());
                self.services.notifier.interface_state(self.ifname(), "plugged");
                self.plugged = true;
                Unapplying
            }
            (Unapplying, Event::Unplug) => {
                // flip-flopping interface; unapply already underway
                log::info!("mach({}): interface became inactive during unapply", self.ifname());
                self.services.notifier.interface_state(self.ifname(), "unplugged");
                self.plugged = false;
                Unapplying
            }
            (Unapplying, Event::Done) => self.done_unapplying(),
            (Unapplying, Event::Kill) => {
                log::info!("mach({}): stopping interface manager", self.ifname());
                self.kill_req = true;
                Unapplying
            }

            (Shuttingdown, Event::Done) => self.shutdown(),

            (state, event) => {
                log::warn!(
                    "mach({}): no transition for {} in state {}",
                    self.ifname(),
                    event,
                    state
                );
                state
            }
        }
    }

    fn plug(&mut self) -> MachineState {
        log::info!("mach({}): interface became active", self.ifname());
        self.services.notifier.interface_state(self.ifname(), "plugged");
        self.plugged = true;
        self.apply_config(self.shared.candidate.load_full())
    }

    fn unplug(&mut self) -> MachineState {
        log::info!("mach({}): interface became inactive", self.ifname());
        self.services.notifier.interface_state(self.ifname(), "unplugged");
        self.plugged = false;
        self.unapply_config(MachineState::Unapplying)
    }

    fn apply_config(&self, config: Option<Arc<Node>>) -> MachineState {
        self.shared.candidate.store(config);
        let candidate = self.shared.candidate.load_full();
        let running = self.shared.running.load_full();
        self.start_commit(candidate, running);
        MachineState::Applying
    }

    fn unapply_config(&self, next: MachineState) -> MachineState {
        let running = self.shared.running.load_full();
        self.start_commit(None, running);
        next
    }

    /// Hand `(candidate_snapshot, running_snapshot)` to the pool on a
    /// driver task. Completion re-enters the machine with `Done` through
    /// the normal event queue, which is what keeps commit completion
    /// serialized against external events.
    fn start_commit(&self, candidate: Option<Arc<Node>>, running: Option<Arc<Node>>) {
        let shared = self.shared.clone();
        let services = self.services.clone();
        tokio::spawn(async move {
            let changes = apply_intf(&services, &shared.ifname, candidate.clone(), running).await;
            // running must equal what the commit saw, not the live candidate
            shared.running.store(candidate);
            if changes {
                services.notifier.configuration_updated(&shared.ifname);
            }
            let _ = shared.events.send(Event::Done);
        });
    }

    fn done_applying(&self) -> MachineState {
        if self.kill_req {
            return self.unapply_config(MachineState::Shuttingdown);
        }
        if !self.plugged {
            // interface went away while scripts ran
            return self.unapply_config(MachineState::Unapplying);
        }
        let candidate = self.shared.candidate.load_full();
        let running = self.shared.running.load_full();
        if !same_tree(&running, &candidate) {
            // pick up updates coalesced while the previous commit ran
            log::info!(
                "mach({}): configuration changed while previous application \
                 was working; applying new changeset",
                self.ifname()
            );
            return self.apply_config(candidate);
        }
        log::info!("mach({}): configuration application completed", self.ifname());
        MachineState::Plugged
    }

    fn done_unapplying(&self) -> MachineState {
        log::info!("mach({}): unapply completed", self.ifname());
        if self.kill_req {
            return self.unapply_config(MachineState::Shuttingdown);
        }
        if !self.plugged {
            return MachineState::Unplugged;
        }
        self.apply_config(self.shared.candidate.load_full())
    }

    fn shutdown(&self) -> MachineState {
        log::info!("mach({}): stopping interface manager", self.ifname());
        MachineState::Shutdown
    }
}

/// Run one commit for `name`: register the backing session, extract the
/// commit roots, and submit to the pool when the trees genuinely differ.
///
/// Returns whether anything real changed. Commit script errors are
/// logged and deliberately do not influence the result or the machine.
async fn apply_intf(
    services: &Services,
    name: &str,
    candidate: Option<Arc<Node>>,
    running: Option<Arc<Node>>,
) -> bool {
    let schema = services.schema.load();
    let sid = session_id(name);
    if let Err(err) = services
        .sessions
        .create(&sid, candidate.clone(), running.clone(), schema.clone())
    {
        log::error!("mach({}): {}", name, err);
        return false;
    }
    let _guard = SessionGuard::new(&services.sessions, &sid);

    let intf_candidate = commit_root(name, &candidate);
    let intf_running = commit_root(name, &running);

    let diff = Diff::new(intf_candidate.as_ref(), intf_running.as_ref(), &schema);
    log::info!("mach({}): config differences: {}", name, diff.to_log_string());

    if same_tree(&intf_candidate, &intf_running) {
        return false;
    }

    let committer = Committer::new(intf_candidate, intf_running, schema, sid.as_str());
    if !services.driver.changed(&committer) {
        return false;
    }

    let outcome = services.pool.commit(committer).await;
    for line in &outcome.outputs {
        log::info!("mach({}): {}", name, line);
    }
    for err in &outcome.errors {
        log::error!("mach({}): {}", name, err);
    }
    true
}
