//! Stop signalling for blocking audio threads
//!
//! Device streams run on blocking threads that cannot be dropped from async
//! code. They poll a [`StopSignal`] armed at start; raising the switch stops
//! every signal armed before it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Owner side: raising stops all currently armed signals
#[derive(Debug, Clone, Default)]
pub struct StopSwitch {
    epoch: Arc<AtomicU64>,
}

/// Thread side: checks whether the switch was raised since arming
#[derive(Debug, Clone)]
pub struct StopSignal {
    epoch: Arc<AtomicU64>,
    armed_at: u64,
}

impl StopSwitch {
    /// Create a switch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a signal for one device run
    #[must_use]
    pub fn arm(&self) -> StopSignal {
        StopSignal {
            epoch: Arc::clone(&self.epoch),
            armed_at: self.epoch.load(Ordering::SeqCst),
        }
    }

    /// Stop every run armed so far
    pub fn raise(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}

impl StopSignal {
    /// Whether the run should stop
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.armed_at
    }
}
