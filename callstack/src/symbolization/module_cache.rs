//! Address-range cache of loaded modules
//!
//! Maps `[start, end)` ranges of loaded executables and shared libraries to a
//! bracketed display name (`[libc.so.6]`). Populated once at init and then
//! lazily: an address that hits no entry triggers a re-enumeration, which
//! picks up modules loaded after startup.
//!
//! Entries are published whole under a write lock, so concurrent readers
//! never observe a half-written entry. Unloads are not tracked; a stale range
//! is only dropped when a newly enumerated module overlaps it.

use log::{debug, warn};
use std::sync::{PoisonError, RwLock};

use crate::alloc::retained;
use crate::domain::{is_kernel_address, CallstackError, KERNEL_IMAGE, UNKNOWN};

/// A module as reported by the platform enumerator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub start: u64,
    pub end: u64,
    pub path: String,
    /// Difference between runtime addresses and addresses in the file
    pub bias: u64,
}

/// Source of the current module list
pub trait ModuleEnumerator: Send + Sync {
    /// List every module currently loaded in the process
    ///
    /// # Errors
    /// Returns an error if the platform refuses to enumerate modules
    fn enumerate(&self) -> Result<Vec<LoadedModule>, CallstackError>;
}

/// Cached module range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleCacheEntry {
    pub start: u64,
    pub end: u64,
    /// Bracketed file name, e.g. `[app.exe]`
    pub name: &'static str,
    pub path: &'static str,
    pub bias: u64,
}

impl ModuleCacheEntry {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Address as seen by the module's own debug info
    #[must_use]
    pub fn file_address(&self, addr: u64) -> u64 {
        addr.wrapping_sub(self.bias)
    }

    fn overlaps(&self, module: &LoadedModule) -> bool {
        self.start < module.end && module.start < self.end
    }
}

/// Bracketed display name of a module path
#[must_use]
pub fn display_name(path: &str) -> String {
    let base = path.rsplit(['/', '\\']).next().unwrap_or(path);
    format!("[{base}]")
}

pub struct ModuleCache<E> {
    enumerator: E,
    entries: RwLock<Vec<ModuleCacheEntry>>,
}

impl<E: ModuleEnumerator> ModuleCache<E> {
    /// Empty cache; call [`refresh`](Self::refresh) to populate it
    #[must_use]
    pub fn new(enumerator: E, capacity: usize) -> Self {
        Self { enumerator, entries: RwLock::new(Vec::with_capacity(capacity)) }
    }

    /// Entry containing `addr`, without touching the enumerator
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<ModuleCacheEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.iter().find(|e| e.contains(addr)).copied()
    }

    /// Entry containing `addr`, re-enumerating modules once on a miss
    #[must_use]
    pub fn resolve(&self, addr: u64) -> Option<ModuleCacheEntry> {
        if let Some(entry) = self.lookup(addr) {
            return Some(entry);
        }
        if self.refresh() == 0 {
            return None;
        }
        self.lookup(addr)
    }

    /// Display name of the module containing `addr`
    ///
    /// Kernel addresses are tagged without any lookup.
    #[must_use]
    pub fn image_name(&self, addr: u64) -> &'static str {
        if is_kernel_address(addr) {
            return KERNEL_IMAGE;
        }
        self.resolve(addr).map_or(UNKNOWN, |e| e.name)
    }

    /// Enumerate modules and add any not yet cached; returns how many were added
    ///
    /// A failed enumeration adds nothing and is not an error for callers.
    pub fn refresh(&self) -> usize {
        let modules = match self.enumerator.enumerate() {
            Ok(modules) => modules,
            Err(e) => {
                warn!("{e}");
                return 0;
            }
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        // Ranges already settled by this enumeration; the first module listed wins
        let mut claimed: Vec<(u64, u64)> = Vec::with_capacity(modules.len());

        for module in modules {
            if module.start >= module.end {
                continue;
            }
            if claimed.iter().any(|&(start, end)| start < module.end && module.start < end) {
                debug!(
                    "Skipping {} at 0x{:x}..0x{:x}: overlaps another module",
                    module.path, module.start, module.end
                );
                continue;
            }
            claimed.push((module.start, module.end));

            let known = entries
                .iter()
                .any(|e| e.start == module.start && e.end == module.end && e.path == module.path);
            if known {
                continue;
            }

            // Whatever used to live here has been unloaded
            entries.retain(|e| !e.overlaps(&module));

            let pool = retained();
            entries.push(ModuleCacheEntry {
                start: module.start,
                end: module.end,
                name: pool.intern(&display_name(&module.path)),
                path: pool.intern(&module.path),
                bias: module.bias,
            });
            added += 1;
        }

        if added > 0 {
            debug!("Module cache: {added} new modules ({} total)", entries.len());
        }
        added
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current entries
    #[must_use]
    pub fn entries(&self) -> Vec<ModuleCacheEntry> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeEnumerator {
        modules: Mutex<Vec<LoadedModule>>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeEnumerator {
        fn load(&self, start: u64, end: u64, path: &str) {
            self.modules.lock().unwrap().push(LoadedModule {
                start,
                end,
                path: path.to_string(),
                bias: start,
            });
        }

        fn unload(&self, path: &str) {
            self.modules.lock().unwrap().retain(|m| m.path != path);
        }
    }

    impl ModuleEnumerator for &FakeEnumerator {
        fn enumerate(&self) -> Result<Vec<LoadedModule>, CallstackError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CallstackError::ModuleEnumerationFailed("denied".to_string()));
            }
            Ok(self.modules.lock().unwrap().clone())
        }
    }

    fn assert_no_overlap(entries: &[ModuleCacheEntry]) {
        for (i, a) in entries.iter().enumerate() {
            assert!(a.start < a.end);
            for b in &entries[i + 1..] {
                assert!(a.end <= b.start || b.end <= a.start, "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("/usr/lib/libc.so.6"), "[libc.so.6]");
        assert_eq!(display_name(r"C:\Windows\System32\ntdll.dll"), "[ntdll.dll]");
        assert_eq!(display_name("app"), "[app]");
    }

    #[test]
    fn test_lookup_half_open_range() {
        let fake = FakeEnumerator::default();
        fake.load(0x1000, 0x2000, "/bin/app");
        let cache = ModuleCache::new(&fake, 4);
        assert_eq!(cache.refresh(), 1);

        assert_eq!(cache.lookup(0x1000).unwrap().name, "[app]");
        assert_eq!(cache.lookup(0x1FFF).unwrap().path, "/bin/app");
        assert!(cache.lookup(0x2000).is_none());
        assert!(cache.lookup(0x0FFF).is_none());
        assert_eq!(cache.lookup(0x1800).unwrap().file_address(0x1800), 0x800);
    }

    #[test]
    fn test_miss_picks_up_late_loaded_module() {
        let fake = FakeEnumerator::default();
        fake.load(0x1000, 0x2000, "/bin/app");
        let cache = ModuleCache::new(&fake, 4);
        cache.refresh();

        fake.load(0x8000, 0x9000, "/lib/libplugin.so");
        assert_eq!(cache.image_name(0x8100), "[libplugin.so]");
        assert_eq!(cache.len(), 2);

        // Hits do not re-enumerate
        let calls = fake.calls.load(Ordering::SeqCst);
        assert_eq!(cache.image_name(0x1100), "[app]");
        assert_eq!(fake.calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_unknown_and_kernel_addresses() {
        let fake = FakeEnumerator::default();
        fake.load(0x1000, 0x2000, "/bin/app");
        let cache = ModuleCache::new(&fake, 4);
        cache.refresh();

        assert_eq!(cache.image_name(0x5000), UNKNOWN);
        assert_eq!(cache.image_name(0xffff_ffff_8100_0000), KERNEL_IMAGE);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let fake = FakeEnumerator::default();
        fake.load(0x1000, 0x2000, "/bin/app");
        fake.load(0x3000, 0x4000, "/lib/liba.so");
        let cache = ModuleCache::new(&fake, 4);

        assert_eq!(cache.refresh(), 2);
        assert_eq!(cache.refresh(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_remapped_range_replaces_stale_entry() {
        let fake = FakeEnumerator::default();
        fake.load(0x1000, 0x2000, "/bin/app");
        fake.load(0x3000, 0x5000, "/lib/libold.so");
        let cache = ModuleCache::new(&fake, 4);
        cache.refresh();

        fake.unload("/lib/libold.so");
        fake.load(0x4000, 0x6000, "/lib/libnew.so");
        assert_eq!(cache.image_name(0x5800), "[libnew.so]");

        let entries = cache.entries();
        assert_no_overlap(&entries);
        assert_eq!(cache.lookup(0x4100).unwrap().name, "[libnew.so]");
        assert!(cache.lookup(0x3100).is_none());
    }

    #[test]
    fn test_overlapping_modules_in_one_listing_settle() {
        let fake = FakeEnumerator::default();
        fake.load(0x1000, 0x3000, "/lib/first.so");
        fake.load(0x2000, 0x4000, "/lib/second.so");
        let cache = ModuleCache::new(&fake, 4);

        assert_eq!(cache.refresh(), 1);
        assert_eq!(cache.refresh(), 0);
        assert_eq!(cache.refresh(), 0);
        assert_eq!(cache.lookup(0x2800).unwrap().name, "[first.so]");
        assert_no_overlap(&cache.entries());

        // A miss re-enumerates once and finds nothing new
        let calls = fake.calls.load(Ordering::SeqCst);
        assert!(cache.resolve(0x9000).is_none());
        assert_eq!(fake.calls.load(Ordering::SeqCst), calls + 1);
        assert_eq!(cache.lookup(0x2800).unwrap().name, "[first.so]");
    }

    #[test]
    fn test_enumeration_failure_adds_nothing() {
        let fake = FakeEnumerator { fail: true, ..FakeEnumerator::default() };
        let cache = ModuleCache::new(&fake, 4);

        assert_eq!(cache.refresh(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.image_name(0x1234), UNKNOWN);
    }

    #[test]
    fn test_empty_ranges_are_ignored() {
        let fake = FakeEnumerator::default();
        fake.load(0x1000, 0x1000, "/bin/empty");
        let cache = ModuleCache::new(&fake, 4);
        assert_eq!(cache.refresh(), 0);
    }
}
