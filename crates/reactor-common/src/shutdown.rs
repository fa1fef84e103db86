//! The shutdown-requested flag the loop polls (spec §1). Owned by whatever
//! out-of-core signal-handling layer the embedding application provides;
//! the core only ever reads it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};

#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_set(&self) -> bool {
        self.0.load(SeqCst)
    }

    pub fn set(&self) {
        self.0.store(true, SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear_and_can_be_set() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }

    #[test]
    fn clones_share_state() {
        let flag = ShutdownFlag::new();
        let clone = flag.clone();
        clone.set();
        assert!(flag.is_set());
    }
}
