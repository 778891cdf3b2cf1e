use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{ArchiveError, Result};

#[derive(Debug, Default)]
struct Counters {
    cancelled: AtomicBool,
    total: AtomicU64,
    completed: AtomicU64,
}

/// Shared progress and cancellation handle.
///
/// Clones observe the same counters, so one clone can be handed to an
/// extract/add/remove call while another thread renders progress or cancels.
/// Units are bytes.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    inner: Arc<Counters>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The running operation stops at its next chunk.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Completed fraction in `0.0..=1.0`. An operation with no work reports 1.
    pub fn fraction(&self) -> f64 {
        match self.total() {
            0 => 1.0,
            total => (self.completed() as f64 / total as f64).min(1.0),
        }
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.inner.total.store(total, Ordering::Relaxed);
        self.inner.completed.store(0, Ordering::Relaxed);
    }

    pub(crate) fn advance(&self, units: u64) {
        self.inner.completed.fetch_add(units, Ordering::Relaxed);
    }

    /// Fail with [`ArchiveError::Cancelled`] once cancellation was requested.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ArchiveError::Cancelled);
        }
        Ok(())
    }
}

/// Poll an optional progress handle.
pub(crate) fn check(progress: Option<&Progress>) -> Result<()> {
    progress.map_or(Ok(()), Progress::check)
}

pub(crate) fn advance(progress: Option<&Progress>, units: usize) {
    if let Some(progress) = progress {
        progress.advance(units as u64);
    }
}
