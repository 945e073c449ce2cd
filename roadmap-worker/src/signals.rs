use tokio::signal::unix::{signal, Signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Interrupt,
    Terminate,
}

/// SIGINT and SIGTERM listeners, installed once for the lifetime of the consume loop.
///
/// Signals that arrive while nobody is waiting on `recv` are kept until the next call.
pub struct ShutdownSignals {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown signal. Safe to use as a `select!` branch.
    pub async fn recv(&mut self) -> Shutdown {
        tokio::select! {
            _ = self.interrupt.recv() => Shutdown::Interrupt,
            _ = self.terminate.recv() => Shutdown::Terminate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn interrupt_received_while_busy_is_kept() {
        let mut signals = ShutdownSignals::install().expect("failed to install signal handlers");

        // Another branch wins, as when the consume loop handles a delivery.
        tokio::select! {
            biased;

            _ = signals.recv() => panic!("no signal was sent yet"),
            _ = std::future::ready(()) => {}
        }

        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .expect("failed to run kill");
        assert!(status.success());

        let received = tokio::time::timeout(Duration::from_secs(5), signals.recv())
            .await
            .expect("interrupt was not delivered");
        assert_eq!(received, Shutdown::Interrupt);
    }
}
