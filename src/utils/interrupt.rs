//! # Interrupt Flag
//!
//! A shared stop request. The training loop polls it between chunks; a
//! signal handler (or anything else holding a clone) raises it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Safe to call from a signal handler thread.
    pub fn trigger(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Clears the request so the next run starts clean.
    pub fn reset(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_the_same_flag() {
        let flag = InterruptFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_set());

        std::thread::spawn(move || handle.trigger()).join().unwrap();
        assert!(flag.is_set());

        flag.reset();
        assert!(!flag.is_set());
    }
}
