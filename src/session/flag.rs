//! Shared run flag for the session loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owner side of the run flag. Only the controller and its supervisor hold one.
#[derive(Debug, Clone)]
pub struct RunFlag {
    running: Arc<AtomicBool>,
}

impl RunFlag {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Read-only view handed to the loops
    pub fn signal(&self) -> RunSignal {
        RunSignal {
            running: self.running.clone(),
        }
    }

    /// Ask every loop to exit at its next iteration boundary
    pub fn cancel(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a [`RunFlag`]
#[derive(Debug, Clone)]
pub struct RunSignal {
    running: Arc<AtomicBool>,
}

impl RunSignal {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
