use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ServiceError;

/// One running subsystem and its terminal failure signal.
///
/// The error channel closes empty when the subsystem stops cleanly, or
/// carries exactly one error and then closes when it fails.
#[derive(Debug)]
pub struct ServiceHandle {
    name: &'static str,
    errors: mpsc::Receiver<ServiceError>,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn spawn<F>(name: &'static str, service: F) -> Self
    where
        F: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        let (tx, errors) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            match service.await {
                Ok(()) => debug!(service = name, "Service stopped"),
                Err(e) => {
                    // Nobody listening means the daemon is already tearing down.
                    let _ = tx.send(e).await;
                }
            }
        });
        Self { name, errors, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn into_parts(self) -> (mpsc::Receiver<ServiceError>, JoinHandle<()>) {
        (self.errors, self.task)
    }
}

/// Every subsystem the orchestrator started, in start order.
#[derive(Debug, Default)]
pub struct ServiceSet {
    errors: Vec<mpsc::Receiver<ServiceError>>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ServiceSet {
    pub fn add(&mut self, handle: Option<ServiceHandle>) {
        if let Some(handle) = handle {
            let name = handle.name();
            let (errors, task) = handle.into_parts();
            self.errors.push(errors);
            self.tasks.push((name, task));
        }
    }

    /// Error channels, handed to the merger. Tasks stay owned by the set.
    pub fn take_errors(&mut self) -> Vec<mpsc::Receiver<ServiceError>> {
        std::mem::take(&mut self.errors)
    }

    /// Wait for every task to finish. Callers cancel first.
    pub async fn join(self) {
        for (name, task) in self.tasks {
            if let Err(e) = task.await {
                debug!(service = name, "Service task ended abnormally: {}", e);
            }
        }
    }
}
