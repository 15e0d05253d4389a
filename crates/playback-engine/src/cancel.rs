//! Cooperative cancellation for track workers.
//!
//! A worker checks its token at every blocking point (frame buffer `put`, sink pushes). The side
//! raising a flag must then wake the buffer so a blocked `put` observes it.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Interruption, PlaybackError};

#[derive(Debug, Default)]
pub struct CancelToken {
    stopped: AtomicBool,
    seek_pending: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the worker to exit. Irreversible.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn raise_seek(&self) {
        self.seek_pending.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_seek(&self) {
        self.seek_pending.store(false, Ordering::SeqCst);
    }

    /// Pending interruption, stop taking precedence over seek.
    pub fn check(&self) -> Option<Interruption> {
        if self.is_stopped() {
            Some(Interruption::Stopped)
        } else if self.seek_pending.load(Ordering::SeqCst) {
            Some(Interruption::Seek)
        } else {
            None
        }
    }

    /// `Err(Interrupted)` if the worker should unwind now.
    pub fn ensure_running(&self) -> Result<(), PlaybackError> {
        match self.check() {
            Some(reason) => Err(PlaybackError::Interrupted(reason)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_wins_over_seek() {
        let token = CancelToken::new();
        assert!(token.ensure_running().is_ok());
        token.raise_seek();
        assert_eq!(token.check(), Some(Interruption::Seek));
        token.stop();
        assert_eq!(token.check(), Some(Interruption::Stopped));
        token.clear_seek();
        assert_eq!(token.check(), Some(Interruption::Stopped));
    }
}
