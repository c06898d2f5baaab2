use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exit code used when a second interrupt forces the process down.
pub const EXIT_FORCED: i32 = 130;

pub const FORCED_EXIT_REMINDER: &str = "forced exit: teardown was skipped. \
Containers and networks from this run may still exist; remove them with `dockyard cleanup`.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First interrupt: cancel in-flight work and tear down.
    Cancel,
    /// Second interrupt: exit now without waiting for teardown.
    ForceExit,
}

/// Owns the process-wide cancellation token and counts interrupts.
#[derive(Debug, Default)]
pub struct Shutdown {
    token: CancellationToken,
    signals: AtomicUsize,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn on_signal(&self) -> SignalAction {
        if self.signals.fetch_add(1, Ordering::SeqCst) == 0 {
            self.token.cancel();
            SignalAction::Cancel
        } else {
            SignalAction::ForceExit
        }
    }
}

pub fn install_signal_handler(shutdown: Arc<Shutdown>) {
    let res = ctrlc::set_handler(move || match shutdown.on_signal() {
        SignalAction::Cancel => {
            eprintln!("\ninterrupt received, cancelling and tearing down (press Ctrl-C again to force exit)...");
        }
        SignalAction::ForceExit => {
            eprintln!("\n{FORCED_EXIT_REMINDER}");
            std::process::exit(EXIT_FORCED);
        }
    });
    if let Err(e) = res {
        warn!("failed to install interrupt handler: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_cancels_second_forces() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();
        assert!(!token.is_cancelled());

        assert_eq!(shutdown.on_signal(), SignalAction::Cancel);
        assert!(token.is_cancelled());
        assert!(shutdown.is_cancelled());

        assert_eq!(shutdown.on_signal(), SignalAction::ForceExit);
        assert_eq!(shutdown.on_signal(), SignalAction::ForceExit);
    }

    #[test]
    fn reminder_points_at_cleanup_command() {
        assert!(FORCED_EXIT_REMINDER.contains("dockyard cleanup"));
    }
}
