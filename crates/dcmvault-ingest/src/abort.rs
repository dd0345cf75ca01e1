//! Cooperative cancellation for a running ingest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked by the pipeline at every state boundary.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// A guard that trips this signal when dropped, unless disarmed.
    ///
    /// Held by the request future so a dropped connection stops the
    /// pipeline running on the blocking pool.
    pub fn guard(&self) -> AbortGuard {
        AbortGuard {
            signal: self.clone(),
            armed: true,
        }
    }
}

#[derive(Debug)]
pub struct AbortGuard {
    signal: AbortSignal,
    armed: bool,
}

impl AbortGuard {
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            self.signal.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_shared() {
        let signal = AbortSignal::new();
        let clone = signal.clone();
        assert!(!signal.is_aborted());
        clone.abort();
        assert!(signal.is_aborted());
    }

    #[test]
    fn test_guard_trips_on_drop() {
        let signal = AbortSignal::new();
        drop(signal.guard());
        assert!(signal.is_aborted());
    }

    #[test]
    fn test_disarmed_guard_does_not_trip() {
        let signal = AbortSignal::new();
        signal.guard().disarm();
        assert!(!signal.is_aborted());
    }
}
