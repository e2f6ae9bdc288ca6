use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// What to do on an interrupt: the first one shuts down gracefully, any
/// later one kills the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Graceful,
    Force,
}

#[derive(Debug, Default)]
pub struct InterruptPolicy {
    received: u32,
}

impl InterruptPolicy {
    pub fn on_signal(&mut self) -> SignalAction {
        self.received = self.received.saturating_add(1);
        if self.received == 1 {
            SignalAction::Graceful
        } else {
            SignalAction::Force
        }
    }
}

/// Watch SIGINT/SIGTERM for the life of the process.
pub fn spawn_signal_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut policy = InterruptPolicy::default();
        loop {
            if let Err(e) = wait_for_signal().await {
                error!("Failed to listen for shutdown signals: {}", e);
                return;
            }
            match policy.on_signal() {
                SignalAction::Graceful => {
                    println!("Received interrupt signal, shutting down...");
                    println!("(Hit ctrl-c again to force-shutdown the daemon.)");
                    cancel.cancel();
                }
                SignalAction::Force => {
                    warn!("Received another interrupt before graceful shutdown, terminating...");
                    std::process::exit(1);
                }
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graceful_once_forceful_twice() {
        let mut policy = InterruptPolicy::default();
        assert_eq!(policy.on_signal(), SignalAction::Graceful);
        assert_eq!(policy.on_signal(), SignalAction::Force);
        assert_eq!(policy.on_signal(), SignalAction::Force);
    }
}
