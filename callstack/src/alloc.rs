//! Allocation lifetimes for decoded strings
//!
//! Decoded strings live under one of two disciplines:
//!
//! - **Retained**: lives until the process exits. Module display names, object
//!   paths, kernel symbol names and interned source paths go here. Symbol
//!   cardinality per run is bounded, so leaking them is an accepted tradeoff
//!   for handing out `&'static str` without any per-call synchronization.
//! - **Fast**: owned `Box<str>` handed to the capture pipeline inside
//!   [`CallstackEntry`](crate::domain::CallstackEntry). The engine itself only
//!   frees these on its error-recovery path; everything else is released by
//!   whoever consumes the frames.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Process-lifetime string storage
pub struct RetainedPool {
    interned: Mutex<HashSet<&'static str>>,
    bytes: AtomicU64,
}

impl RetainedPool {
    #[must_use]
    pub fn new() -> Self {
        Self { interned: Mutex::new(HashSet::new()), bytes: AtomicU64::new(0) }
    }

    /// Copy `s` into storage that is never freed
    #[must_use]
    pub fn retain(&self, s: &str) -> &'static str {
        self.bytes.fetch_add(s.len() as u64, Ordering::Relaxed);
        Box::leak(Box::from(s))
    }

    /// Like [`retain`](Self::retain), but equal strings share one allocation
    #[must_use]
    pub fn intern(&self, s: &str) -> &'static str {
        let mut set = self.interned.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(&existing) = set.get(s) {
            return existing;
        }
        let leaked = self.retain(s);
        set.insert(leaked);
        leaked
    }

    /// Total bytes ever retained
    #[must_use]
    pub fn retained_bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl Default for RetainedPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of fast-pool activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastPoolStats {
    pub allocated: u64,
    pub freed: u64,
}

impl FastPoolStats {
    /// Allocations not yet returned through [`FastPool::free`]
    #[must_use]
    pub fn live(&self) -> u64 {
        self.allocated.saturating_sub(self.freed)
    }
}

/// Pool for strings whose lifetime belongs to the capture pipeline
pub struct FastPool {
    allocated: AtomicU64,
    freed: AtomicU64,
}

impl FastPool {
    #[must_use]
    pub const fn new() -> Self {
        Self { allocated: AtomicU64::new(0), freed: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn alloc(&self, s: &str) -> Box<str> {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Box::from(s)
    }

    /// Take ownership of a string the engine itself handed out
    pub fn free(&self, s: Box<str>) {
        self.freed.fetch_add(1, Ordering::Relaxed);
        drop(s);
    }

    #[must_use]
    pub fn stats(&self) -> FastPoolStats {
        FastPoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
        }
    }
}

impl Default for FastPool {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide retained pool
#[must_use]
pub fn retained() -> &'static RetainedPool {
    static POOL: OnceLock<RetainedPool> = OnceLock::new();
    POOL.get_or_init(RetainedPool::new)
}

/// The process-wide fast pool
#[must_use]
pub fn fast() -> &'static FastPool {
    static POOL: FastPool = FastPool::new();
    &POOL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_deduplicates() {
        let pool = RetainedPool::new();
        let a = pool.intern("/usr/lib/libc.so.6");
        let b = pool.intern("/usr/lib/libc.so.6");

        assert!(std::ptr::eq(a, b));
        assert_eq!(pool.retained_bytes(), "/usr/lib/libc.so.6".len() as u64);
    }

    #[test]
    fn test_retain_always_copies() {
        let pool = RetainedPool::new();
        let a = pool.retain("[app]");
        let b = pool.retain("[app]");

        assert_eq!(a, b);
        assert!(!std::ptr::eq(a, b));
    }

    #[test]
    fn test_fast_pool_counts_releases() {
        let pool = FastPool::new();
        let name = pool.alloc("main");
        let file = pool.alloc("src/main.rs");
        assert_eq!(pool.stats().live(), 2);

        pool.free(name);
        pool.free(file);
        let stats = pool.stats();
        assert_eq!(stats, FastPoolStats { allocated: 2, freed: 2 });
        assert_eq!(stats.live(), 0);
    }
}
