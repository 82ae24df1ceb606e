use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{client::CryptoClient, ledger::FailureLedger};

/// Runs a job on request, with at most one run in flight.
///
/// Requests that arrive while the job is running collapse into a single
/// follow-up run once it finishes.
pub struct CoalescingTask {
    requests: Arc<Notify>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct CoalescingTrigger {
    requests: Arc<Notify>,
}

impl CoalescingTrigger {
    pub fn request(&self) {
        self.requests.notify_one();
    }
}

impl CoalescingTask {
    pub fn spawn<F>(mut job: F) -> Self
    where
        F: FnMut() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let requests = Arc::new(Notify::new());
        let waiter = Arc::clone(&requests);
        let task = tokio::spawn(async move {
            loop {
                waiter.notified().await;
                job().await;
            }
        });
        Self { requests, task }
    }

    pub fn trigger(&self) -> CoalescingTrigger {
        CoalescingTrigger {
            requests: Arc::clone(&self.requests),
        }
    }

    pub fn request(&self) {
        self.requests.notify_one();
    }

    /// Stops the task and waits until any in-flight run has been dropped.
    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

/// Keeps the ledger's snapshot of the local user's cross-signing status current.
pub fn spawn_verification_recheck(
    client: Arc<dyn CryptoClient>,
    ledger: Arc<Mutex<FailureLedger>>,
) -> CoalescingTask {
    CoalescingTask::spawn(move || {
        let client = Arc::clone(&client);
        let ledger = Arc::clone(&ledger);
        Box::pin(async move {
            match client.user_trusts_own_identity().await {
                Ok(trusted) => {
                    debug!(trusted, "utd: refreshed own identity verification status");
                    ledger
                        .lock()
                        .await
                        .set_user_trusts_own_identity(Some(trusted));
                }
                Err(err) => {
                    warn!("utd: failed to look up own identity verification status: {err:#}");
                }
            }
        })
    })
}

#[cfg(test)]
#[path = "tests/verification_tests.rs"]
mod tests;
