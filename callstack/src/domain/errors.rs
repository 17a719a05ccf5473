//! Structured error types for the symbolication engine
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! None of these reach the callers of the decode entry points: they are logged
//! and turned into lower-fidelity results (sentinel names, empty tables).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallstackError {
    #[error("Failed to read kernel symbol listing {}: {source}", path.display())]
    KernelSymbolsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to enumerate loaded modules: {0}")]
    ModuleEnumerationFailed(String),

    #[error("No debug information for {path}: {reason}")]
    DebugInfoUnavailable { path: String, reason: String },

    #[error("Unwind failed at 0x{addr:x}: {source}")]
    Unwind {
        addr: u64,
        #[source]
        source: gimli::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_symbols_error_display() {
        let err = CallstackError::KernelSymbolsUnreadable {
            path: PathBuf::from("/proc/kallsyms"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("/proc/kallsyms"));
    }

    #[test]
    fn test_unwind_error_display() {
        let err = CallstackError::Unwind { addr: 0x1234, source: gimli::Error::Io };
        assert!(err.to_string().starts_with("Unwind failed at 0x1234"));
    }
}
