use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::warn;

/// Shared flag telling the harness to stop: no new jobs are started and running
/// simulators get terminated.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancel the token on SIGINT/ SIGTERM. Can only be installed once per process.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();

        ctrlc::set_handler(move || {
            if !token.is_cancelled() {
                warn!("Interrupted, terminating running jobs and skipping the remaining ones");
            }
            token.cancel();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
