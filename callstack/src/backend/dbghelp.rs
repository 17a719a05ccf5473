//! `DbgHelp` backend for Windows
//!
//! `DbgHelp` is not thread-safe, so every call into it happens under the
//! symbol-engine lock. Anything else in the process that uses `DbgHelp` must
//! share that lock through [`CallstackConfig::symbol_engine_lock`].
//!
//! Inlined frames are expanded through the inline-context API. The physical
//! frame is always written last, after at most 15 inlined frames.

#![allow(unsafe_code)] // DbgHelp and psapi are C APIs

use log::{info, warn};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use winapi::shared::minwindef::{DWORD, FALSE, HMODULE, TRUE};
use winapi::um::dbghelp::{
    SymAddrIncludeInlineTrace, SymFromAddrW, SymFromInlineContextW, SymGetLineFromAddrW64,
    SymGetLineFromInlineContextW, SymInitializeW, SymQueryInlineTrace, SymSetOptions,
    IMAGEHLP_LINEW64, SYMBOL_INFOW,
};
use winapi::um::libloaderapi::GetModuleFileNameW;
use winapi::um::processthreadsapi::GetCurrentProcess;
use winapi::um::psapi::{EnumProcessModules, GetModuleInformation, MODULEINFO};
use winapi::um::winnt::{HANDLE, PVOID, RtlCaptureStackBackTrace};

use super::{fast_entry, push_frame, CallstackBackend};
use crate::alloc::{fast, retained};
use crate::config::CallstackConfig;
use crate::domain::{
    CallstackEntry, CallstackEntryData, CallstackError, CallstackSymbolData, MAX_CALLSTACK_FRAMES,
    UNKNOWN,
};
use crate::symbolization::{InternalFrameFilter, LoadedModule, ModuleCache, ModuleEnumerator};

const SYMOPT_LOAD_LINES: DWORD = 0x0000_0010;

/// Longest symbol name `DbgHelp` is allowed to write, in UTF-16 units
const MAX_NAME_LEN: usize = 1024;

/// Upper bound on modules listed per enumeration
const MAX_MODULES: usize = 1024;

/// Inlined frames decoded per address; the physical frame takes the last slot
#[allow(clippy::cast_possible_truncation)]
const MAX_INLINE_FRAMES: DWORD = (MAX_CALLSTACK_FRAMES - 1) as DWORD;

/// `SYMBOL_INFOW` followed by room for its variable-length name
#[repr(C)]
struct SymbolBuffer {
    info: SYMBOL_INFOW,
    _name: [u16; MAX_NAME_LEN],
}

impl SymbolBuffer {
    #[allow(clippy::cast_possible_truncation)] // struct sizes fit a u32
    fn new() -> Box<Self> {
        // SAFETY: SYMBOL_INFOW is plain old data
        let mut buf: Box<Self> = Box::new(unsafe { std::mem::zeroed() });
        buf.info.SizeOfStruct = std::mem::size_of::<SYMBOL_INFOW>() as u32;
        buf.info.MaxNameLen = MAX_NAME_LEN as u32;
        buf
    }

    fn as_mut_ptr(&mut self) -> *mut SYMBOL_INFOW {
        ptr::addr_of_mut!(self.info)
    }

    fn name(&self) -> String {
        let this: *const Self = self;
        let len = (self.info.NameLen as usize).min(MAX_NAME_LEN);
        // SAFETY: DbgHelp wrote NameLen units starting at Name, inside this buffer
        let units = unsafe {
            std::slice::from_raw_parts(ptr::addr_of!((*this).info.Name).cast::<u16>(), len)
        };
        String::from_utf16_lossy(units)
    }

    fn address(&self) -> u64 {
        self.info.Address
    }

    fn size(&self) -> u32 {
        self.info.Size
    }
}

#[allow(clippy::cast_possible_truncation)] // struct sizes fit a DWORD
fn new_line_info() -> IMAGEHLP_LINEW64 {
    // SAFETY: IMAGEHLP_LINEW64 is plain old data
    let mut line: IMAGEHLP_LINEW64 = unsafe { std::mem::zeroed() };
    line.SizeOfStruct = std::mem::size_of::<IMAGEHLP_LINEW64>() as DWORD;
    line
}

/// NUL-terminated UTF-16 string owned by `DbgHelp`
fn wide_to_string(wide: *const u16) -> Option<String> {
    if wide.is_null() {
        return None;
    }
    // SAFETY: DbgHelp file names are NUL-terminated and valid until the next call
    unsafe {
        let mut len = 0;
        while *wide.add(len) != 0 {
            len += 1;
        }
        Some(String::from_utf16_lossy(std::slice::from_raw_parts(wide, len)))
    }
}

fn current_process() -> HANDLE {
    // SAFETY: returns a pseudo-handle, no resources involved
    unsafe { GetCurrentProcess() }
}

fn symbol_from_addr(process: HANDLE, ptr: u64, buf: &mut SymbolBuffer) -> bool {
    unsafe { SymFromAddrW(process, ptr, ptr::null_mut(), buf.as_mut_ptr()) != FALSE }
}

fn symbol_from_inline_context(
    process: HANDLE,
    ptr: u64,
    ctx: DWORD,
    buf: &mut SymbolBuffer,
) -> bool {
    unsafe { SymFromInlineContextW(process, ptr, ctx, ptr::null_mut(), buf.as_mut_ptr()) != FALSE }
}

fn line_from_addr(process: HANDLE, ptr: u64) -> Option<(String, u32)> {
    let mut line = new_line_info();
    let mut displacement: DWORD = 0;
    if unsafe { SymGetLineFromAddrW64(process, ptr, &mut displacement, &mut line) } == FALSE {
        return None;
    }
    Some((wide_to_string(line.FileName)?, line.LineNumber))
}

fn line_from_inline_context(process: HANDLE, ptr: u64, ctx: DWORD) -> Option<(String, u32)> {
    let mut line = new_line_info();
    let mut displacement: DWORD = 0;
    let found = unsafe {
        SymGetLineFromInlineContextW(process, ptr, ctx, 0, &mut displacement, &mut line)
    };
    if found == FALSE {
        return None;
    }
    Some((wide_to_string(line.FileName)?, line.LineNumber))
}

/// Number of inlined frames at `ptr` and the context of the innermost one
fn inline_trace(process: HANDLE, ptr: u64) -> Option<(DWORD, DWORD)> {
    let count = unsafe { SymAddrIncludeInlineTrace(process, ptr) }.min(MAX_INLINE_FRAMES);
    if count == 0 {
        return None;
    }
    let (mut ctx, mut idx): (DWORD, DWORD) = (0, 0);
    let found = unsafe { SymQueryInlineTrace(process, ptr, 0, ptr, ptr, &mut ctx, &mut idx) };
    (found != FALSE).then_some((count, ctx))
}

/// Module enumerator backed by `EnumProcessModules`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessModuleEnumerator;

impl ModuleEnumerator for ProcessModuleEnumerator {
    #[allow(clippy::cast_possible_truncation)] // buffer sizes fit a DWORD
    fn enumerate(&self) -> Result<Vec<LoadedModule>, CallstackError> {
        let process = current_process();
        let mut handles: Vec<HMODULE> = vec![ptr::null_mut(); MAX_MODULES];
        let mut needed: DWORD = 0;

        let listed = unsafe {
            EnumProcessModules(
                process,
                handles.as_mut_ptr(),
                (handles.len() * std::mem::size_of::<HMODULE>()) as DWORD,
                &mut needed,
            )
        };
        if listed == FALSE {
            return Err(CallstackError::Io(std::io::Error::last_os_error()));
        }
        let count = (needed as usize / std::mem::size_of::<HMODULE>()).min(handles.len());

        let mut modules = Vec::with_capacity(count);
        for &handle in &handles[..count] {
            // SAFETY: MODULEINFO is plain old data
            let mut info: MODULEINFO = unsafe { std::mem::zeroed() };
            let found = unsafe {
                GetModuleInformation(
                    process,
                    handle,
                    &mut info,
                    std::mem::size_of::<MODULEINFO>() as DWORD,
                )
            };
            if found == FALSE {
                continue;
            }

            let mut name = [0_u16; MAX_NAME_LEN];
            let len =
                unsafe { GetModuleFileNameW(handle, name.as_mut_ptr(), MAX_NAME_LEN as DWORD) };
            if len == 0 {
                continue;
            }

            let start = info.lpBaseOfDll as usize as u64;
            modules.push(LoadedModule {
                start,
                end: start + u64::from(info.SizeOfImage),
                path: String::from_utf16_lossy(&name[..len as usize]),
                bias: 0,
            });
        }

        Ok(modules)
    }
}

/// Return addresses of the calling thread, innermost first
///
/// The frame of `call_trace` itself is not included.
#[inline(never)]
#[allow(clippy::cast_possible_truncation)] // depth is clamped to a DWORD
#[must_use]
pub fn call_trace(depth: usize) -> Vec<u64> {
    let mut frames: Vec<PVOID> = vec![ptr::null_mut(); depth];
    let captured = unsafe {
        RtlCaptureStackBackTrace(
            1,
            depth.min(u32::MAX as usize) as DWORD,
            frames.as_mut_ptr(),
            ptr::null_mut(),
        )
    };
    frames.truncate(usize::from(captured));
    frames.into_iter().map(|f| f as usize as u64).collect()
}

/// Backend resolving addresses through `DbgHelp`
pub struct DbgHelpBackend {
    lock: Arc<Mutex<()>>,
    modules: ModuleCache<ProcessModuleEnumerator>,
    filter: InternalFrameFilter,
    inline_frames: bool,
}

impl DbgHelpBackend {
    fn engine(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Frame built from the current contents of `sym`, named after the module if invalid
    fn entry(
        valid: bool,
        sym: &SymbolBuffer,
        module_name: &str,
        location: Option<(String, u32)>,
    ) -> CallstackEntry {
        let (file, line) = location.unwrap_or_else(|| (UNKNOWN.to_string(), 0));
        if valid {
            let mut entry = fast_entry(fast(), &sym.name(), &file, line);
            entry.sym_len = sym.size();
            entry.sym_addr = sym.address();
            entry
        } else {
            fast_entry(fast(), module_name, &file, line)
        }
    }
}

impl CallstackBackend for DbgHelpBackend {
    fn init(config: &CallstackConfig) -> Self {
        let lock = config.symbol_engine_lock.clone().unwrap_or_default();
        {
            let _engine = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let initialized = unsafe { SymInitializeW(current_process(), ptr::null(), TRUE) };
            if initialized == FALSE {
                warn!("SymInitializeW failed: {}", std::io::Error::last_os_error());
            }
            unsafe { SymSetOptions(SYMOPT_LOAD_LINES) };
        }

        let modules = ModuleCache::new(ProcessModuleEnumerator, config.module_cache_capacity);
        modules.refresh();
        info!("Callstack backend: dbghelp, {} modules", modules.len());

        Self {
            lock,
            modules,
            filter: InternalFrameFilter::with_defaults(&config.internal_suffixes),
            inline_frames: config.inline_frames,
        }
    }

    fn decode_callstack_ptr_fast(&self, ptr: u64, out: &mut String) {
        out.clear();
        let mut sym = SymbolBuffer::new();
        let _engine = self.engine();
        if symbol_from_addr(current_process(), ptr, &mut sym) {
            out.push_str(&sym.name());
        }
    }

    fn decode_symbol_address(&self, ptr: u64) -> CallstackSymbolData {
        let _engine = self.engine();
        match line_from_addr(current_process(), ptr) {
            Some((file, line)) => CallstackSymbolData::borrowed(retained().intern(&file), line),
            None => CallstackSymbolData::unknown(),
        }
    }

    fn decode_code_address(&self, ptr: u64) -> CallstackSymbolData {
        let process = current_process();
        let mut sym = SymbolBuffer::new();
        let _engine = self.engine();

        let accept = |name: Option<String>, location: Option<(String, u32)>| {
            let (file, line) = location?;
            if self.filter.is_internal_frame(name.as_deref(), Some(&file)) {
                return None;
            }
            Some(CallstackSymbolData::borrowed(retained().intern(&file), line))
        };

        if self.inline_frames {
            if let Some((count, first_ctx)) = inline_trace(process, ptr) {
                for ctx in first_ctx..first_ctx + count {
                    let name = symbol_from_inline_context(process, ptr, ctx, &mut sym)
                        .then(|| sym.name());
                    if let Some(found) = accept(name, line_from_inline_context(process, ptr, ctx)) {
                        return found;
                    }
                }
            }
        }

        let name = symbol_from_addr(process, ptr, &mut sym).then(|| sym.name());
        accept(name, line_from_addr(process, ptr)).unwrap_or_else(CallstackSymbolData::unknown)
    }

    fn decode_callstack_ptr(&self, ptr: u64) -> CallstackEntryData {
        let module_name = self.modules.image_name(ptr);
        let process = current_process();
        let mut sym = SymbolBuffer::new();
        let mut data = CallstackEntryData::new(module_name);

        let _engine = self.engine();
        let inline = if self.inline_frames { inline_trace(process, ptr) } else { None };

        let valid = symbol_from_addr(process, ptr, &mut sym);
        let physical = Self::entry(valid, &sym, module_name, line_from_addr(process, ptr));

        if let Some((count, first_ctx)) = inline {
            for ctx in first_ctx..first_ctx + count {
                let valid = symbol_from_inline_context(process, ptr, ctx, &mut sym);
                let location = line_from_inline_context(process, ptr, ctx);
                push_frame(&mut data, Self::entry(valid, &sym, module_name, location));
            }
        }
        push_frame(&mut data, physical);

        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::KERNEL_IMAGE;

    #[inline(never)]
    fn dbghelp_marker() -> u64 {
        std::hint::black_box(dbghelp_marker as fn() -> u64 as usize as u64)
    }

    #[test]
    fn test_call_trace_captures_frames() {
        let trace = call_trace(32);
        assert!(!trace.is_empty());
        assert!(trace.len() <= 32);
        assert!(trace.iter().all(|&addr| addr != 0));
    }

    #[test]
    fn test_module_enumeration_includes_executable() {
        let modules = ProcessModuleEnumerator.enumerate().unwrap();
        let addr = dbghelp_marker();
        assert!(modules.iter().any(|m| addr >= m.start && addr < m.end));
    }

    #[test]
    fn test_kernel_address_image() {
        let backend = DbgHelpBackend::init(&CallstackConfig::default());
        let data = backend.decode_callstack_ptr(0xffff_f800_0000_1000);
        assert_eq!(data.image_name(), KERNEL_IMAGE);
        assert_eq!(data.count(), 1);
    }

    #[test]
    fn test_own_function_is_named() {
        let backend = DbgHelpBackend::init(&CallstackConfig::default());
        let data = backend.decode_callstack_ptr(dbghelp_marker());
        assert!(data.count() >= 1);
        assert!(data.image_name().ends_with(".exe]"));
    }

    #[test]
    fn test_symbol_address_never_needs_free() {
        let backend = DbgHelpBackend::init(&CallstackConfig::default());
        assert!(!backend.decode_symbol_address(dbghelp_marker()).need_free());
        assert!(!backend.decode_symbol_address(0x10).need_free());
    }
}
