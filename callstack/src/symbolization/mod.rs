//! # Address Symbolization Building Blocks
//!
//! The backends in [`crate::backend`] are assembled from the pieces in this
//! module. Each one handles a single step of turning a raw instruction
//! pointer into names, files and lines.
//!
//! ## Address Translation
//!
//! Captured addresses are **runtime addresses**. Debug info speaks in **file
//! addresses**, so every lookup first finds the loaded module containing the
//! address and subtracts that module's load bias:
//!
//! ```text
//! runtime 0x55f3a2b4c780
//!   -> module [app] 0x55f3a2b4c000..0x55f3a2b5f000, bias 0x55f3a2b4c000
//!   -> file address 0x780
//!   -> DWARF: spawn_blocking() at pool.rs:42 (+ inlined callers)
//! ```
//!
//! Kernel addresses (top bit set) skip all of this and go to the kernel
//! symbol table instead.
//!
//! ## Module Structure
//!
//! - **`module_cache`**: address range to module name/path, refreshed on miss
//! - **`loaded_objects`**: `dl_iterate_phdr` enumeration feeding the cache
//! - **`symbolizer`**: per-object DWARF context plus ELF symbol table
//! - **`kernel_symbols`**: descending-sorted kernel symbol table
//! - **`frame_filter`**: suffix matcher for the profiler's own frames
//! - **`demangle`**: Rust and Itanium C++ name demangling
//!
//! ## Limitations
//!
//! - **Requires debug symbols** for file/line: objects without DWARF still
//!   get names from their symbol table or from `dladdr`
//! - **Separate debug files** (`.gnu_debuglink`, build-id directories) are not
//!   searched
//! - **Unloaded modules** keep their cache entry until a new module is mapped
//!   over the same range

pub mod demangle;
pub mod frame_filter;
pub mod kernel_symbols;
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub mod loaded_objects;
pub mod module_cache;
pub mod symbolizer;

pub use demangle::demangle;
pub use frame_filter::{InternalFrameFilter, DEFAULT_INTERNAL_SUFFIXES};
pub use kernel_symbols::{KernelSymbol, KernelSymbolTable};
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub use loaded_objects::PhdrEnumerator;
pub use module_cache::{LoadedModule, ModuleCache, ModuleCacheEntry, ModuleEnumerator};
pub use symbolizer::{ElfSymbol, SourceFrame, Symbolizer};
