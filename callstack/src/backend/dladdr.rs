//! Dynamic-linker-only backend
//!
//! Answers every query from `dladdr` at call time: nearest exported symbol,
//! containing object, and the distance from the symbol start. No debug info
//! is read, so there is never a file/line and never more than one frame.
//! The DWARF backend also uses [`dladdr_lookup`] for frames its debug info
//! cannot name.

#![allow(unsafe_code)] // dladdr requires unsafe

use log::info;
use std::ffi::{c_void, CStr};

use super::{fast_entry, with_offset, CallstackBackend};
use crate::alloc::{fast, retained};
use crate::config::CallstackConfig;
use crate::domain::{CallstackEntryData, CallstackSymbolData, UNKNOWN};
use crate::symbolization::{demangle, InternalFrameFilter};

/// What the dynamic linker knows about an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlSymbol {
    /// Path of the containing object, interned
    pub image: Option<&'static str>,
    /// Raw (mangled) name of the nearest preceding exported symbol
    pub name: Option<String>,
    pub sym_addr: u64,
    /// Distance from `sym_addr`; 0 when no symbol was found
    pub offset: u64,
}

impl DlSymbol {
    /// Demangled name with a `+ offset` suffix, or `[unknown]`
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => with_offset(&demangle(name), self.offset),
            None => UNKNOWN.to_string(),
        }
    }
}

/// Query the dynamic linker about `addr`
#[must_use]
#[allow(clippy::cast_possible_truncation)] // addresses fit the native pointer width
pub fn dladdr_lookup(addr: u64) -> Option<DlSymbol> {
    // SAFETY: Dl_info is plain old data; dladdr fills it in or leaves it untouched
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    if unsafe { libc::dladdr(addr as usize as *const c_void, &mut info) } == 0 {
        return None;
    }

    // SAFETY: non-null strings returned by dladdr are NUL-terminated and live
    // as long as the object stays loaded; both are copied out immediately
    let image = (!info.dli_fname.is_null()).then(|| {
        let path = unsafe { CStr::from_ptr(info.dli_fname) }.to_string_lossy();
        retained().intern(&path)
    });
    let name = (!info.dli_sname.is_null())
        .then(|| unsafe { CStr::from_ptr(info.dli_sname) }.to_string_lossy().into_owned());

    let sym_addr = info.dli_saddr as usize as u64;
    let offset = if name.is_some() && sym_addr != 0 { addr.wrapping_sub(sym_addr) } else { 0 };

    Some(DlSymbol { image, name, sym_addr, offset })
}

/// Backend answering everything from `dladdr`
pub struct DladdrBackend {
    filter: InternalFrameFilter,
}

impl CallstackBackend for DladdrBackend {
    fn init(config: &CallstackConfig) -> Self {
        info!("Callstack backend: dladdr (exported symbols only)");
        Self { filter: InternalFrameFilter::with_defaults(&config.internal_suffixes) }
    }

    fn decode_callstack_ptr_fast(&self, ptr: u64, out: &mut String) {
        out.clear();
        if let Some(name) = dladdr_lookup(ptr).and_then(|sym| sym.name) {
            out.push_str(&name);
        }
    }

    fn decode_symbol_address(&self, ptr: u64) -> CallstackSymbolData {
        dladdr_lookup(ptr)
            .and_then(|sym| sym.image)
            .map_or_else(CallstackSymbolData::unknown, |image| CallstackSymbolData::borrowed(image, 0))
    }

    fn decode_code_address(&self, ptr: u64) -> CallstackSymbolData {
        let Some(sym) = dladdr_lookup(ptr) else {
            return CallstackSymbolData::unknown();
        };
        if sym.name.as_deref().is_some_and(|name| self.filter.is_internal(&demangle(name))) {
            return CallstackSymbolData::unknown();
        }
        sym.image
            .map_or_else(CallstackSymbolData::unknown, |image| CallstackSymbolData::borrowed(image, 0))
    }

    fn decode_callstack_ptr(&self, ptr: u64) -> CallstackEntryData {
        let sym = dladdr_lookup(ptr);
        let name = sym.as_ref().map_or_else(|| UNKNOWN.to_string(), DlSymbol::display_name);

        let mut entry = fast_entry(fast(), &name, UNKNOWN, 0);
        entry.sym_addr = sym.as_ref().map_or(0, |s| s.sym_addr);

        CallstackEntryData::single(entry, sym.and_then(|s| s.image).unwrap_or(UNKNOWN))
    }
}
