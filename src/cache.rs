//! Process-local memoization of the synthesized project list.
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::project::Project;

/// Time source for the cache, injected so tests can advance it by hand.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Memoized project list with a fixed freshness window. A stale entry and
/// a never-set one are indistinguishable by contract; both mean "refetch".
/// Writes are last-writer-wins; the intended usage has a single synthesis
/// pass writing at a time.
pub struct ProjectsCache {
    ttl_millis: u64,
    clock: Box<dyn Clock>,
    slot: Mutex<Option<(u64, Vec<Project>)>>,
}

impl ProjectsCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Box::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            ttl_millis: ttl.as_millis() as u64,
            clock,
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Option<Vec<Project>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match &*slot {
            Some((stored_at, projects))
                if self.clock.now_millis().saturating_sub(*stored_at) < self.ttl_millis =>
            {
                Some(projects.clone())
            }
            _ => None,
        }
    }

    pub fn set(&self, projects: Vec<Project>) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((self.clock.now_millis(), projects));
    }

    /// Called after any write that could change project membership,
    /// ordering or metadata, so the next read is guaranteed fresh.
    pub fn invalidate(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}
