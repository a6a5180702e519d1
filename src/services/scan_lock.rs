//! Process-wide single-flight guard for folder scans.
//!
//! Backed by `tokio::sync::Mutex`, whose waiters are served in FIFO order:
//! on release the lock passes straight to the oldest blocking waiter, so it
//! never reads as idle while someone is queued.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanMode {
    /// Wait for the running scan to finish (manual requests).
    Blocking,
    /// Give up at once if a scan is running (periodic ticks).
    NonBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone, Default)]
pub struct ScanLock {
    inner: Arc<Mutex<()>>,
}

/// Held for the duration of one folder scan; dropping it releases the lock.
#[derive(Debug)]
pub struct ScanGuard {
    _guard: OwnedMutexGuard<()>,
    acquired_at: Instant,
}

impl ScanGuard {
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl ScanLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire according to `mode`. `None` means the scan should be skipped.
    pub async fn acquire(&self, mode: ScanMode) -> Option<ScanGuard> {
        match mode {
            ScanMode::Blocking => Some(self.lock().await),
            ScanMode::NonBlocking => self.try_lock(),
        }
    }

    pub async fn lock(&self) -> ScanGuard {
        let guard = self.inner.clone().lock_owned().await;
        ScanGuard {
            _guard: guard,
            acquired_at: Instant::now(),
        }
    }

    pub fn try_lock(&self) -> Option<ScanGuard> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| ScanGuard {
                _guard: guard,
                acquired_at: Instant::now(),
            })
    }

    pub fn state(&self) -> ScanState {
        match self.inner.try_lock() {
            Ok(_) => ScanState::Idle,
            Err(_) => ScanState::Scanning,
        }
    }
}
