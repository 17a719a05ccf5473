//! Domain model for the symbolication engine
//!
//! Result types live in `callstack-common` so the transport layer can use
//! them without pulling in any backend; this module re-exports them next to
//! the engine's own error type.

pub mod errors;

pub use callstack_common::{
    is_kernel_address, CallstackEntry, CallstackEntryData, CallstackSymbolData, SymbolFile,
    ERROR_FRAME, KERNEL_FILE, KERNEL_IMAGE, MAX_CALLSTACK_FRAMES, UNKNOWN,
};
pub use errors::CallstackError;
