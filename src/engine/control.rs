//! Backpressure flag shared between the engine and its consumer

use crate::metrics;
use futures::task::AtomicWaker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Waker;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct ControlInner {
    paused: AtomicBool,
    /// Consumer to re-poll whenever the flag is raised
    waker: AtomicWaker,
}

/// Pause/resume switch checked before every scheduled tick
#[derive(Debug, Clone, Default)]
pub struct PollControl {
    inner: Arc<ControlInner>,
}

impl PollControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop polling until [`resume`](Self::resume) is called.
    ///
    /// Wakes the registered consumer, which may already have drained its
    /// queue and has to decide again whether to resume.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::SeqCst) {
            info!("Downstream declined records, polling paused");
            metrics::set_paused(true);
        }
        self.inner.waker.wake();
    }

    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::SeqCst) {
            debug!("Polling resumed");
            metrics::set_paused(false);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Register the task to wake on the next [`pause`](Self::pause)
    pub fn register(&self, waker: &Waker) {
        self.inner.waker.register(waker);
    }
}
