//! # Shared Callstack Result Types
//!
//! Defines the decode results handed from the symbolication engine to the rest
//! of the profiler (the transport/serialization layer consumes these types
//! without depending on any symbolization backend).
//!
//! ## Key Types
//!
//! - [`CallstackEntry`] - One logical (possibly inlined) call frame
//! - [`CallstackEntryData`] - All logical frames decoded from one physical address
//! - [`CallstackSymbolData`] - Lightweight file/line result with explicit ownership
//! - [`SymbolFile`] - Owned-vs-static tag for the `file` string of a symbol result

use std::fmt;

// ============================================================================
// Limits and Sentinels
// ============================================================================

/// Maximum number of logical frames decoded from a single physical address
///
/// Inline depth is bounded by the toolchain in practice; capping it keeps the
/// worst-case cost of a decode call bounded on the profiled thread.
pub const MAX_CALLSTACK_FRAMES: usize = 16;

/// Name/file/image placeholder when nothing could be resolved
pub const UNKNOWN: &str = "[unknown]";

/// Name/file of the synthetic frame that replaces a failed unwind
pub const ERROR_FRAME: &str = "[error]";

/// Image tag for kernel addresses on the debug-symbol-engine backend
pub const KERNEL_IMAGE: &str = "[kernel]";

/// File and image tag for kernel addresses on the DWARF backends
pub const KERNEL_FILE: &str = "<kernel>";

/// Returns true if the address lies in the kernel half of the address space
#[must_use]
pub const fn is_kernel_address(addr: u64) -> bool {
    addr >> 63 != 0
}

// ============================================================================
// Full Decode Results
// ============================================================================

/// One logical call frame
///
/// Strings are fast-pool allocations owned by the capture pipeline. Whoever
/// consumes the frame (normally the transport layer) decides when they go away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackEntry {
    /// Symbol name, or a synthetic label such as `[unknown]` / `[error]`
    pub name: Box<str>,

    /// Source path, or `[unknown]`
    pub file: Box<str>,

    /// Source line, 0 if unknown
    pub line: u32,

    /// Size of the enclosing symbol in bytes, 0 if unknown
    pub sym_len: u32,

    /// Start address of the enclosing symbol, 0 if unknown
    pub sym_addr: u64,
}

impl CallstackEntry {
    /// Frame carrying only a name and a file, with no line or symbol range
    #[must_use]
    pub fn new(name: Box<str>, file: Box<str>) -> Self {
        Self { name, file, line: 0, sym_len: 0, sym_addr: 0 }
    }
}

/// Result of decoding one physical address
///
/// Holds between one and [`MAX_CALLSTACK_FRAMES`] logical frames, innermost
/// inlined frame first and the physical function last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackEntryData {
    entries: Vec<CallstackEntry>,
    image_name: &'static str,
}

impl CallstackEntryData {
    /// Empty result attributed to `image_name`
    #[must_use]
    pub fn new(image_name: &'static str) -> Self {
        Self { entries: Vec::with_capacity(MAX_CALLSTACK_FRAMES), image_name }
    }

    /// Result holding exactly one frame
    #[must_use]
    pub fn single(entry: CallstackEntry, image_name: &'static str) -> Self {
        let mut data = Self::new(image_name);
        data.entries.push(entry);
        data
    }

    /// Append a frame
    ///
    /// # Errors
    /// Hands the entry back when the result already holds
    /// [`MAX_CALLSTACK_FRAMES`] frames.
    pub fn push(&mut self, entry: CallstackEntry) -> Result<(), CallstackEntry> {
        if self.is_full() {
            return Err(entry);
        }
        self.entries.push(entry);
        Ok(())
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_CALLSTACK_FRAMES
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of logical frames
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_CALLSTACK_FRAMES
    pub fn count(&self) -> u8 {
        self.entries.len() as u8
    }

    #[must_use]
    pub fn entries(&self) -> &[CallstackEntry] {
        &self.entries
    }

    /// Last (physical, non-inlined) frame
    pub fn last_mut(&mut self) -> Option<&mut CallstackEntry> {
        self.entries.last_mut()
    }

    /// Remove every frame, handing ownership of their strings to the caller
    pub fn take_entries(&mut self) -> Vec<CallstackEntry> {
        std::mem::replace(&mut self.entries, Vec::with_capacity(MAX_CALLSTACK_FRAMES))
    }

    /// Display name of the module containing the address
    #[must_use]
    pub fn image_name(&self) -> &'static str {
        self.image_name
    }

    pub fn set_image_name(&mut self, image_name: &'static str) {
        self.image_name = image_name;
    }

    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, CallstackEntry> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a CallstackEntryData {
    type Item = &'a CallstackEntry;
    type IntoIter = std::slice::Iter<'a, CallstackEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ============================================================================
// Symbol (file/line) Results
// ============================================================================

/// Source path of a [`CallstackSymbolData`], tagged with who owns it
///
/// - `Owned`: freshly allocated for this call; the receiver releases it once
/// - `Static`: a sentinel or a process-lifetime interned string; never released
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolFile {
    Owned(String),
    Static(&'static str),
}

impl SymbolFile {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            SymbolFile::Owned(s) => s,
            SymbolFile::Static(s) => s,
        }
    }

    /// Whether the receiver is responsible for releasing the string
    #[must_use]
    pub fn need_free(&self) -> bool {
        matches!(self, SymbolFile::Owned(_))
    }
}

impl fmt::Display for SymbolFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File/line attribution of a single address (no inline expansion)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallstackSymbolData {
    pub file: SymbolFile,
    pub line: u32,
}

impl CallstackSymbolData {
    /// The `[unknown]` sentinel; never needs freeing
    #[must_use]
    pub const fn unknown() -> Self {
        Self { file: SymbolFile::Static(UNKNOWN), line: 0 }
    }

    #[must_use]
    pub fn owned(file: String, line: u32) -> Self {
        Self { file: SymbolFile::Owned(file), line }
    }

    #[must_use]
    pub const fn borrowed(file: &'static str, line: u32) -> Self {
        Self { file: SymbolFile::Static(file), line }
    }

    #[must_use]
    pub fn need_free(&self) -> bool {
        self.file.need_free()
    }

    /// Release the result, returning the owned string if there was one
    ///
    /// Static strings are never handed out for release.
    #[must_use]
    pub fn release(self) -> Option<String> {
        match self.file {
            SymbolFile::Owned(s) => Some(s),
            SymbolFile::Static(_) => None,
        }
    }
}
