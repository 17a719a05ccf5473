//! Symbolication backends
//!
//! Exactly one backend is compiled in, picked by target platform:
//!
//! | Platform                  | Backend            | Frames                      |
//! |---------------------------|--------------------|-----------------------------|
//! | Windows                   | [`DbgHelpBackend`] | `DbgHelp`, inline contexts  |
//! | Linux / Android / FreeBSD | [`DwarfBackend`]   | DWARF via addr2line, inline |
//! | other unix, `dladdr-only` | [`DladdrBackend`]  | nearest exported symbol     |
//!
//! All of them implement [`CallstackBackend`]. Only the Windows backend can
//! capture a callstack itself (`call_trace`); everywhere else the raw
//! addresses come from a generic unwinder outside this crate.

use cfg_if::cfg_if;

use crate::alloc::{fast, FastPool};
use crate::config::CallstackConfig;
use crate::domain::{CallstackEntry, CallstackEntryData, CallstackSymbolData, ERROR_FRAME};

#[cfg(unix)]
pub mod dladdr;

#[cfg(all(
    not(feature = "dladdr-only"),
    any(target_os = "linux", target_os = "android", target_os = "freebsd")
))]
pub mod dwarf;

#[cfg(windows)]
pub mod dbghelp;

cfg_if! {
    if #[cfg(windows)] {
        pub use dbghelp::DbgHelpBackend;
        /// Backend selected for this target
        pub type Backend = DbgHelpBackend;
    } else if #[cfg(all(
        not(feature = "dladdr-only"),
        any(target_os = "linux", target_os = "android", target_os = "freebsd")
    ))] {
        pub use dladdr::DladdrBackend;
        pub use dwarf::{DwarfBackend, DwarfFlavor};
        /// Backend selected for this target
        pub type Backend = DwarfBackend;
    } else {
        pub use dladdr::DladdrBackend;
        /// Backend selected for this target
        pub type Backend = DladdrBackend;
    }
}

/// Operations every backend provides
///
/// Decode operations never fail: degraded information is reported through
/// the sentinel strings in [`crate::domain`].
pub trait CallstackBackend: Send + Sync + Sized {
    /// One-time setup: symbol engine bootstrap, module enumeration, kernel table
    fn init(config: &CallstackConfig) -> Self;

    /// Name-only lookup written into `out`; empty if nothing is known
    fn decode_callstack_ptr_fast(&self, ptr: u64, out: &mut String);

    /// File/line of `ptr`, without inline expansion
    fn decode_symbol_address(&self, ptr: u64) -> CallstackSymbolData;

    /// File/line of `ptr`, skipping the profiler's own frames
    fn decode_code_address(&self, ptr: u64) -> CallstackSymbolData;

    /// Every logical frame at `ptr`, innermost first
    fn decode_callstack_ptr(&self, ptr: u64) -> CallstackEntryData;
}

/// Frame whose strings come from the fast pool
pub(crate) fn fast_entry(pool: &FastPool, name: &str, file: &str, line: u32) -> CallstackEntry {
    CallstackEntry { line, ..CallstackEntry::new(pool.alloc(name), pool.alloc(file)) }
}

/// Return both strings of a frame to the fast pool
pub(crate) fn release_entry(pool: &FastPool, entry: CallstackEntry) {
    pool.free(entry.name);
    pool.free(entry.file);
}

/// Append a frame, releasing it if the result is already full
pub(crate) fn push_frame(data: &mut CallstackEntryData, entry: CallstackEntry) {
    if let Err(rejected) = data.push(entry) {
        release_entry(fast(), rejected);
    }
}

/// Discard every decoded frame and leave a single `[error]` frame
#[cfg_attr(any(windows, feature = "dladdr-only"), allow(dead_code))]
pub(crate) fn replace_with_error_frame(data: &mut CallstackEntryData) {
    let pool = fast();
    for entry in data.take_entries() {
        release_entry(pool, entry);
    }
    push_frame(data, fast_entry(pool, ERROR_FRAME, ERROR_FRAME, 0));
}

/// `symbol + offset`, or just `symbol` when the address is the symbol start
#[cfg_attr(windows, allow(dead_code))]
pub(crate) fn with_offset(symbol: &str, offset: u64) -> String {
    if offset == 0 {
        symbol.to_string()
    } else {
        format!("{symbol} + {offset}")
    }
}
