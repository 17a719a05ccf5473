//! Enumeration of loaded ELF objects through `dl_iterate_phdr`
//!
//! Each object's range spans its `PT_LOAD` segments, shifted by the load bias
//! the dynamic linker reports. The main executable is reported with an empty
//! name, so its path comes from `current_exe`.

#![allow(unsafe_code)] // dl_iterate_phdr requires unsafe

use std::ffi::CStr;

use crate::domain::CallstackError;
use crate::symbolization::module_cache::{LoadedModule, ModuleEnumerator};

/// Module enumerator backed by the dynamic linker's object list
#[derive(Debug, Clone, Copy, Default)]
pub struct PhdrEnumerator {
    /// Drop objects mapped straight out of an archive (`base.apk!/lib/...`);
    /// their debug info cannot be opened by path
    pub skip_archive_members: bool,
}

impl ModuleEnumerator for PhdrEnumerator {
    fn enumerate(&self) -> Result<Vec<LoadedModule>, CallstackError> {
        let mut modules: Vec<LoadedModule> = Vec::new();
        unsafe {
            libc::dl_iterate_phdr(Some(callback), std::ptr::addr_of_mut!(modules).cast());
        }

        if self.skip_archive_members {
            modules.retain(|m| !m.path.contains("!/"));
        }
        if modules.is_empty() {
            return Err(CallstackError::ModuleEnumerationFailed(
                "dl_iterate_phdr reported no objects".to_string(),
            ));
        }
        Ok(modules)
    }
}

#[allow(clippy::useless_conversion)] // 32-bit targets report 32-bit addresses
unsafe extern "C" fn callback(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut libc::c_void,
) -> libc::c_int {
    let modules = &mut *data.cast::<Vec<LoadedModule>>();
    let info = &*info;

    let path = if info.dlpi_name.is_null() || *info.dlpi_name == 0 {
        // Only the first nameless object is the executable
        if !modules.is_empty() {
            return 0;
        }
        match std::env::current_exe() {
            Ok(exe) => exe.to_string_lossy().into_owned(),
            Err(_) => return 0,
        }
    } else {
        CStr::from_ptr(info.dlpi_name).to_string_lossy().into_owned()
    };

    if info.dlpi_phdr.is_null() {
        return 0;
    }
    let headers = std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum));
    let bias = u64::from(info.dlpi_addr);

    let (mut lo, mut hi) = (u64::MAX, 0_u64);
    for header in headers.iter().filter(|h| h.p_type == libc::PT_LOAD) {
        let vaddr = u64::from(header.p_vaddr);
        lo = lo.min(vaddr);
        hi = hi.max(vaddr + u64::from(header.p_memsz));
    }

    if lo < hi {
        modules.push(LoadedModule {
            start: bias.wrapping_add(lo),
            end: bias.wrapping_add(hi),
            path,
            bias,
        });
    }
    0
}
