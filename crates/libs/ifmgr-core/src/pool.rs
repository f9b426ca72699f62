use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::commit::{CommitDriver, CommitOutcome, Committer};

/// Bound on queued commit jobs. Submission blocks once reached, which is
/// the back-pressure on event storms.
pub const COMMIT_QUEUE_CAPACITY: usize = 100;

struct CommitRequest {
    committer: Committer,
    reply: oneshot::Sender<CommitOutcome>,
}

/// Fixed pool of workers sharing one bounded job queue.
///
/// The pool is shared across every interface machine; per-interface
/// ordering is the machines' business, never the pool's.
#[derive(Clone)]
pub struct CommitPool {
    tx: mpsc::Sender<CommitRequest>,
}

impl CommitPool {
    pub fn new(workers: usize, driver: Arc<dyn CommitDriver>) -> CommitPool {
        let (tx, rx) = mpsc::channel(COMMIT_QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        for idx in 0..workers.max(1) {
            tokio::spawn(worker(idx, rx.clone(), driver.clone()));
        }
        CommitPool { tx }
    }

    /// Submit one job and wait for its outcome. Blocks while the queue is
    /// full.
    pub async fn commit(&self, committer: Committer) -> CommitOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = CommitRequest {
            committer,
            reply: reply_tx,
        };
        if self.tx.send(request).await.is_err() {
            return CommitOutcome {
                outputs: Vec::new(),
                errors: vec!["commit pool is gone".to_string()],
            };
        }
        match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => CommitOutcome {
                outputs: Vec::new(),
                errors: vec!["commit worker dropped the job".to_string()],
            },
        }
    }
}

async fn worker(
    idx: usize,
    rx: Arc<Mutex<mpsc::Receiver<CommitRequest>>>,
    driver: Arc<dyn CommitDriver>,
) {
    loop {
        let request = {
            let mut rx = rx.lock().await;
            match rx.recv().await {
                Some(request) => request,
                None => break,
            }
        };

        let driver = driver.clone();
        let committer = request.committer;
        // commits run scripts; keep them off the async workers
        let result = tokio::task::spawn_blocking(move || driver.commit(&committer)).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                log::error!("pool: commit worker {} job failed: {}", idx, err);
                CommitOutcome {
                    outputs: Vec::new(),
                    errors: vec![format!("commit job failed: {}", err)],
                }
            }
        };
        let _ = request.reply.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use std::sync::Barrier;

    struct BarrierDriver {
        barrier: Barrier,
    }

    impl CommitDriver for BarrierDriver {
        fn changed(&self, _committer: &Committer) -> bool {
            true
        }

        fn commit(&self, _committer: &Committer) -> CommitOutcome {
            // completes only when two jobs run at once
            self.barrier.wait();
            CommitOutcome {
                outputs: vec!["ran".to_string()],
                errors: Vec::new(),
            }
        }
    }

    struct PanicDriver;

    impl CommitDriver for PanicDriver {
        fn changed(&self, _committer: &Committer) -> bool {
            true
        }

        fn commit(&self, _committer: &Committer) -> CommitOutcome {
            panic!("scripted failure");
        }
    }

    fn committer() -> Committer {
        Committer::new(None, None, Arc::new(Schema::empty()), "sid")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn jobs_run_in_parallel_across_workers() {
        let driver = Arc::new(BarrierDriver {
            barrier: Barrier::new(2),
        });
        let pool = CommitPool::new(2, driver);

        let a = tokio::spawn({
            let pool = pool.clone();
            async move { pool.commit(committer()).await }
        });
        let b = tokio::spawn({
            let pool = pool.clone();
            async move { pool.commit(committer()).await }
        });

        let (a, b) = (a.await.expect("join a"), b.await.expect("join b"));
        assert_eq!(a.outputs, vec!["ran".to_string()]);
        assert_eq!(b.outputs, vec!["ran".to_string()]);
    }

    #[tokio::test]
    async fn worker_contains_commit_panics() {
        let pool = CommitPool::new(1, Arc::new(PanicDriver));
        let outcome = pool.commit(committer()).await;
        assert!(!outcome.errors.is_empty());

        // the worker survives for the next job
        let outcome = pool.commit(committer()).await;
        assert!(!outcome.errors.is_empty());
    }
}
