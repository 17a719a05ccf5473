//! # Callstack - Process-Wide Callstack Symbolication
//!
//! Turns raw instruction pointers captured on profiled threads into function
//! names, source files and lines, including inlined frames. Decoding happens
//! in-process: the engine symbolizes addresses of the process it lives in.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                 Profiler (capture / transport)                │
//! └───────────────────────┬───────────────────────────────────────┘
//!                         │ raw addresses
//!                         ▼
//! ┌───────────────────────────────────────────────────────────────┐
//! │                   Callstack (This Crate)                      │
//! │                                                               │
//! │  decode_* free functions ──▶ Backend (picked at compile time) │
//! │                                │                              │
//! │         ┌──────────────────────┼─────────────────────┐        │
//! │         ▼                      ▼                     ▼        │
//! │  ┌────────────┐        ┌──────────────┐      ┌────────────┐   │
//! │  │  DbgHelp   │        │    DWARF     │      │   dladdr   │   │
//! │  │ (Windows)  │        │ (Linux, BSD) │      │ (fallback) │   │
//! │  └────────────┘        └──────────────┘      └────────────┘   │
//! │         │                      │                              │
//! │         ▼                      ▼                              │
//! │  ┌──────────────┐   ┌────────────────┐   ┌───────────────┐    │
//! │  │ Module cache │   │  Symbolizers   │   │ Kernel table  │    │
//! │  └──────────────┘   └────────────────┘   └───────────────┘    │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`backend`]: the platform backends and the [`CallstackBackend`] contract
//! - [`symbolization`]: module cache, DWARF symbolizer, kernel symbols, filter
//! - [`alloc`]: retained and fast string pools
//! - [`config`]: engine configuration and environment overrides
//! - [`domain`]: result types and errors
//! - [`cli`]: arguments of the `callstack-dump` diagnostic binary
//!
//! ## Typical Usage
//!
//! ```rust,no_run
//! callstack::init_callstack();
//!
//! let addr = callstack::init_callstack as fn() as usize as u64;
//! let decoded = callstack::decode_callstack_ptr(addr);
//! for frame in &decoded {
//!     println!("{} at {}:{}", frame.name, frame.file, frame.line);
//! }
//! ```
//!
//! Decode calls never fail. Anything that cannot be resolved comes back as
//! `[unknown]`, and an unwind error yields a single `[error]` frame.

pub mod alloc;
pub mod backend;
pub mod cli;
pub mod config;
pub mod domain;
pub mod symbolization;

use log::warn;
use std::sync::OnceLock;

pub use backend::{Backend, CallstackBackend};
pub use config::CallstackConfig;
pub use domain::{
    CallstackEntry, CallstackEntryData, CallstackError, CallstackSymbolData, SymbolFile,
    MAX_CALLSTACK_FRAMES,
};

#[cfg(windows)]
pub use backend::dbghelp::call_trace;

static BACKEND: OnceLock<Backend> = OnceLock::new();

/// Initialize the engine from [`CallstackConfig::from_env`]
pub fn init_callstack() {
    init_callstack_with(CallstackConfig::from_env());
}

/// Initialize the engine with an explicit configuration
///
/// Only the first call has any effect; later calls are ignored.
pub fn init_callstack_with(config: CallstackConfig) {
    let mut initialized = false;
    BACKEND.get_or_init(|| {
        initialized = true;
        Backend::init(&config)
    });
    if !initialized {
        warn!("Callstack engine already initialized; ignoring new configuration");
    }
}

/// The process-wide backend, initialized with defaults if nobody did it yet
fn backend() -> &'static Backend {
    BACKEND.get_or_init(|| Backend::init(&CallstackConfig::default()))
}

/// Whether the engine has been initialized
#[must_use]
pub fn is_initialized() -> bool {
    BACKEND.get().is_some()
}

/// Name of the symbol containing `ptr`, written into `buf`
///
/// The name is raw (not demangled). Returns an empty string if nothing is known.
pub fn decode_callstack_ptr_fast(ptr: u64, buf: &mut String) -> &str {
    backend().decode_callstack_ptr_fast(ptr, buf);
    buf.as_str()
}

/// Source file and line of `ptr`, without inline expansion
#[must_use]
pub fn decode_symbol_address(ptr: u64) -> CallstackSymbolData {
    backend().decode_symbol_address(ptr)
}

/// Source file and line of `ptr`, skipping the profiler's own frames
#[must_use]
pub fn decode_code_address(ptr: u64) -> CallstackSymbolData {
    backend().decode_code_address(ptr)
}

/// Every logical frame at `ptr`, innermost inlined frame first
#[must_use]
pub fn decode_callstack_ptr(ptr: u64) -> CallstackEntryData {
    backend().decode_callstack_ptr(ptr)
}
