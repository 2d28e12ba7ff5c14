//! Process-hold counter
//!
//! The daemon stays alive while at least one hold is outstanding: one per
//! live sound, plus one owned by the idle-release countdown. When the count
//! reaches zero the main task is woken up to shut down.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

#[derive(Debug, Default)]
struct Inner {
    count: AtomicUsize,
    released: Notify,
}

/// Cloneable handle on the daemon's liveness count
#[derive(Debug, Clone, Default)]
pub struct ProcessHold {
    inner: Arc<Inner>,
}

impl ProcessHold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one hold
    pub fn acquire(&self) {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one hold, waking the shutdown waiter on the last one
    pub fn release(&self) {
        let previous = self.inner.count.fetch_sub(1, Ordering::SeqCst);
        match previous {
            0 => {
                warn!("Process hold released below zero");
                self.inner.count.store(0, Ordering::SeqCst);
            }
            1 => self.inner.released.notify_waiters(),
            _ => {}
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Wait until every hold has been released
    pub async fn released(&self) {
        loop {
            let notified = self.inner.released.notified();
            if self.inner.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
