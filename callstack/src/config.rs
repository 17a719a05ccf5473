//! Engine configuration
//!
//! Every knob has a default matching a normal profiling run. The profiler
//! usually calls [`CallstackConfig::from_env`] once at startup; embedders can
//! build one directly with the `with_*` methods.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Default location of the kernel symbol listing
pub const DEFAULT_KALLSYMS_PATH: &str = "/proc/kallsyms";

/// Initial module cache capacity
pub const DEFAULT_MODULE_CACHE_CAPACITY: usize = 512;

/// Configuration consumed by [`init_callstack_with`](crate::init_callstack_with)
#[derive(Debug, Clone)]
pub struct CallstackConfig {
    /// Kernel symbol listing parsed at init (Linux/Android DWARF backends)
    pub kallsyms_path: PathBuf,

    /// Load the kernel symbol table at all
    pub load_kernel_symbols: bool,

    /// Expand inlined frames in full decodes
    pub inline_frames: bool,

    /// Extra suffixes identifying profiler-internal frames
    pub internal_suffixes: Vec<String>,

    pub module_cache_capacity: usize,

    /// Lock shared with other users of the platform symbol engine (`DbgHelp`)
    ///
    /// The engine is not thread-safe process-wide, so anything else in the
    /// process calling into it must hold the same lock.
    pub symbol_engine_lock: Option<Arc<Mutex<()>>>,
}

impl Default for CallstackConfig {
    fn default() -> Self {
        Self {
            kallsyms_path: PathBuf::from(DEFAULT_KALLSYMS_PATH),
            load_kernel_symbols: true,
            inline_frames: true,
            internal_suffixes: Vec::new(),
            module_cache_capacity: DEFAULT_MODULE_CACHE_CAPACITY,
            symbol_engine_lock: None,
        }
    }
}

impl CallstackConfig {
    /// Defaults overridden by environment variables
    ///
    /// - `CALLSTACK_KALLSYMS`: path of the kernel symbol listing
    /// - `CALLSTACK_NO_KERNEL_SYMBOLS`: skip the kernel symbol table
    /// - `CALLSTACK_NO_INLINES`: decode physical frames only
    /// - `CALLSTACK_SKIP_SUFFIXES`: comma-separated internal frame suffixes
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("CALLSTACK_KALLSYMS") {
            config.kallsyms_path = PathBuf::from(path);
        }
        if lookup("CALLSTACK_NO_KERNEL_SYMBOLS").is_some_and(|v| is_truthy(&v)) {
            config.load_kernel_symbols = false;
        }
        if lookup("CALLSTACK_NO_INLINES").is_some_and(|v| is_truthy(&v)) {
            config.inline_frames = false;
        }
        if let Some(list) = lookup("CALLSTACK_SKIP_SUFFIXES") {
            config.internal_suffixes = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        config
    }

    #[must_use]
    pub fn with_kallsyms_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kallsyms_path = path.into();
        self
    }

    #[must_use]
    pub fn with_kernel_symbols(mut self, enabled: bool) -> Self {
        self.load_kernel_symbols = enabled;
        self
    }

    #[must_use]
    pub fn with_inline_frames(mut self, enabled: bool) -> Self {
        self.inline_frames = enabled;
        self
    }

    #[must_use]
    pub fn with_internal_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.internal_suffixes.push(suffix.into());
        self
    }

    #[must_use]
    pub fn with_symbol_engine_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.symbol_engine_lock = Some(lock);
        self
    }
}

fn is_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0" | "false" | "no" | "off")
}
