use std::sync::Arc;

use crate::diff::Diff;
use crate::schema::Schema;
use crate::tree::Node;

/// Everything a single commit needs: the two trees being reconciled, the
/// schema snapshot they were read under, and the session backing the
/// scripts.
#[derive(Clone)]
pub struct Committer {
    pub candidate: Option<Arc<Node>>,
    pub running: Option<Arc<Node>>,
    pub schema: Arc<Schema>,
    pub sid: String,
}

impl Committer {
    pub fn new(
        candidate: Option<Arc<Node>>,
        running: Option<Arc<Node>>,
        schema: Arc<Schema>,
        sid: impl Into<String>,
    ) -> Self {
        Committer {
            candidate,
            running,
            schema,
            sid: sid.into(),
        }
    }

    pub fn diff(&self) -> Diff {
        Diff::new(self.candidate.as_ref(), self.running.as_ref(), &self.schema)
    }
}

/// What a commit produced: script outputs and script errors. Errors do
/// not abort the owning state machine.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    pub outputs: Vec<String>,
    pub errors: Vec<String>,
}

impl CommitOutcome {
    pub fn observable(&self) -> bool {
        !self.outputs.is_empty()
    }
}

/// The seam where the external commit library plugs in.
///
/// `changed` is the cheap pre-check ("would this commit do anything");
/// `commit` runs the configuration scripts and may block.
pub trait CommitDriver: Send + Sync + 'static {
    fn changed(&self, committer: &Committer) -> bool;
    fn commit(&self, committer: &Committer) -> CommitOutcome;
}

/// Default driver: reconciles by diff and reports each change as an
/// output line. Real script execution is delegated to the platform's
/// commit hooks, which consume the same `Committer` view.
#[derive(Debug, Default)]
pub struct DiffCommitDriver;

impl CommitDriver for DiffCommitDriver {
    fn changed(&self, committer: &Committer) -> bool {
        committer.diff().has_changes()
    }

    fn commit(&self, committer: &Committer) -> CommitOutcome {
        let diff = committer.diff();
        if !diff.has_changes() {
            return CommitOutcome::default();
        }
        let outputs = diff
            .to_log_string()
            .lines()
            .map(|line| line.to_string())
            .collect();
        CommitOutcome {
            outputs,
            errors: Vec::new(),
        }
    }
}
