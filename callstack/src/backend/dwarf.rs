//! DWARF backend for Linux, Android and FreeBSD
//!
//! Loaded objects come from `dl_iterate_phdr`. The first lookup inside an
//! object opens it from disk and builds a [`Symbolizer`] for it (or records
//! that it has no usable debug info). Addresses are translated to file
//! addresses with the object's load bias before any DWARF lookup.
//!
//! Frames the debug info cannot name fall back to the object's symbol table,
//! then to `dladdr`. Kernel addresses are answered from the kernel symbol
//! listing parsed at init.

use log::{debug, info};
use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, PoisonError};

use super::dladdr::{dladdr_lookup, DlSymbol};
use super::{
    fast_entry, push_frame, release_entry, replace_with_error_frame, with_offset, CallstackBackend,
};
use crate::alloc::fast;
use crate::config::CallstackConfig;
use crate::domain::{
    is_kernel_address, CallstackEntry, CallstackEntryData, CallstackError, CallstackSymbolData,
    KERNEL_FILE, UNKNOWN,
};
use crate::symbolization::{
    demangle, InternalFrameFilter, KernelSymbolTable, ModuleCache, ModuleCacheEntry,
    PhdrEnumerator, SourceFrame, Symbolizer,
};

/// Platform variant of the DWARF backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwarfFlavor {
    Linux,
    Android,
    FreeBsd,
}

impl DwarfFlavor {
    /// Flavor of the compilation target
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "android") {
            DwarfFlavor::Android
        } else if cfg!(target_os = "freebsd") {
            DwarfFlavor::FreeBsd
        } else {
            DwarfFlavor::Linux
        }
    }

    /// Whether the kernel exposes a symbol listing worth loading
    #[must_use]
    pub const fn has_kernel_symbols(self) -> bool {
        matches!(self, DwarfFlavor::Linux | DwarfFlavor::Android)
    }

    /// Libraries loaded straight out of an APK cannot be opened by path
    #[must_use]
    pub const fn skips_archive_members(self) -> bool {
        matches!(self, DwarfFlavor::Android)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DwarfFlavor::Linux => "linux",
            DwarfFlavor::Android => "android",
            DwarfFlavor::FreeBsd => "freebsd",
        }
    }
}

/// Backend resolving user-space addresses through DWARF
pub struct DwarfBackend {
    flavor: DwarfFlavor,
    modules: ModuleCache<PhdrEnumerator>,
    /// Per-object symbolizers keyed by object path; `None` once loading failed
    objects: Mutex<HashMap<&'static str, Option<Arc<Symbolizer>>>>,
    kernel: KernelSymbolTable,
    filter: InternalFrameFilter,
    inline_frames: bool,
}

impl DwarfBackend {
    /// Set up the backend for an explicit flavor
    #[must_use]
    pub fn with_flavor(flavor: DwarfFlavor, config: &CallstackConfig) -> Self {
        let enumerator = PhdrEnumerator { skip_archive_members: flavor.skips_archive_members() };
        let modules = ModuleCache::new(enumerator, config.module_cache_capacity);
        modules.refresh();

        let kernel = if flavor.has_kernel_symbols() && config.load_kernel_symbols {
            KernelSymbolTable::load_or_empty(&config.kallsyms_path)
        } else {
            KernelSymbolTable::empty()
        };

        info!(
            "Callstack backend: dwarf ({}), {} modules, {} kernel symbols",
            flavor.as_str(),
            modules.len(),
            kernel.len()
        );

        Self {
            flavor,
            modules,
            objects: Mutex::new(HashMap::new()),
            kernel,
            filter: InternalFrameFilter::with_defaults(&config.internal_suffixes),
            inline_frames: config.inline_frames,
        }
    }

    #[must_use]
    pub fn flavor(&self) -> DwarfFlavor {
        self.flavor
    }

    #[must_use]
    pub fn kernel_symbols(&self) -> &KernelSymbolTable {
        &self.kernel
    }

    /// Symbolizer for a module, opening the object on first use
    fn symbolizer(&self, module: &ModuleCacheEntry) -> Option<Arc<Symbolizer>> {
        if let Some(cached) =
            self.objects.lock().unwrap_or_else(PoisonError::into_inner).get(module.path)
        {
            return cached.clone();
        }

        // Parse outside the lock; a racing thread may parse the same object once more
        let loaded = match Symbolizer::new(module.path) {
            Ok(symbolizer) => {
                debug!(
                    "Loaded debug info for {} ({} code symbols)",
                    module.path,
                    symbolizer.symbol_count()
                );
                Some(Arc::new(symbolizer))
            }
            Err(e) => {
                let err = CallstackError::DebugInfoUnavailable {
                    path: module.path.to_string(),
                    reason: format!("{e:#}"),
                };
                debug!("{err}");
                None
            }
        };

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(module.path)
            .or_insert(loaded)
            .clone()
    }

    /// Module and symbolizer covering `addr`
    fn locate(&self, addr: u64) -> Option<(ModuleCacheEntry, Option<Arc<Symbolizer>>)> {
        if is_kernel_address(addr) {
            return None;
        }
        let module = self.modules.resolve(addr)?;
        Some((module, self.symbolizer(&module)))
    }

    fn decode_kernel(&self, ptr: u64) -> CallstackEntryData {
        let pool = fast();
        match self.kernel.lookup(ptr) {
            Some(sym) => {
                let mut entry = fast_entry(pool, sym.name, KERNEL_FILE, 0);
                entry.sym_addr = sym.addr;
                CallstackEntryData::single(entry, sym.module.unwrap_or(KERNEL_FILE))
            }
            None => {
                CallstackEntryData::single(fast_entry(pool, UNKNOWN, KERNEL_FILE, 0), KERNEL_FILE)
            }
        }
    }

    /// Name of a frame without debug info: symbol table first, then `dladdr`
    fn fallback_name(
        ptr: u64,
        module: Option<&ModuleCacheEntry>,
        symbolizer: Option<&Symbolizer>,
    ) -> String {
        if let (Some(module), Some(symbolizer)) = (module, symbolizer) {
            let file_addr = module.file_address(ptr);
            if let Some(sym) = symbolizer.symbol(file_addr) {
                return with_offset(&demangle(&sym.name), file_addr - sym.addr);
            }
        }
        dladdr_lookup(ptr).map_or_else(|| UNKNOWN.to_string(), |sym| sym.display_name())
    }

    fn frame_entry(
        ptr: u64,
        module: &ModuleCacheEntry,
        symbolizer: &Symbolizer,
        frame: &SourceFrame<'_>,
    ) -> CallstackEntry {
        let pool = fast();
        if frame.function.is_none() && frame.file.is_none() {
            let name = Self::fallback_name(ptr, Some(module), Some(symbolizer));
            return fast_entry(pool, &name, UNKNOWN, 0);
        }

        let name = frame.function.as_deref().map_or(Cow::Borrowed(UNKNOWN), demangle);
        fast_entry(pool, &name, frame.file.unwrap_or(UNKNOWN), frame.line)
    }

    /// Walk the logical frames at `ptr` into `data`
    ///
    /// With inline expansion disabled only the outermost (physical) frame is kept.
    fn collect_frames(
        &self,
        ptr: u64,
        module: &ModuleCacheEntry,
        symbolizer: &Symbolizer,
        data: &mut CallstackEntryData,
    ) -> Result<(), CallstackError> {
        let pool = fast();
        let inline_frames = self.inline_frames;

        symbolizer
            .for_each_frame(module.file_address(ptr), |frame| {
                let entry = Self::frame_entry(ptr, module, symbolizer, &frame);
                if !inline_frames {
                    for stale in data.take_entries() {
                        release_entry(pool, stale);
                    }
                }
                push_frame(data, entry);

                if inline_frames && data.is_full() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .map_err(|source| CallstackError::Unwind { addr: ptr, source })
    }

    /// Start and size of the enclosing symbol, recorded on the physical frame
    fn attach_symbol_range(
        data: &mut CallstackEntryData,
        ptr: u64,
        module: &ModuleCacheEntry,
        symbolizer: &Symbolizer,
    ) {
        let Some(last) = data.last_mut() else { return };
        match symbolizer.symbol(module.file_address(ptr)) {
            Some(sym) => {
                last.sym_addr = sym.addr.wrapping_add(module.bias);
                last.sym_len = u32::try_from(sym.size).unwrap_or(u32::MAX);
            }
            None => {
                last.sym_addr = 0;
                last.sym_len = 0;
            }
        }
    }

    /// Single frame named by `dladdr`
    fn dladdr_frame(sym: Option<&DlSymbol>, name: &str, image: &'static str) -> CallstackEntryData {
        let mut entry = fast_entry(fast(), name, UNKNOWN, 0);
        entry.sym_addr = sym.map_or(0, |s| s.sym_addr);
        CallstackEntryData::single(entry, image)
    }

    /// First logical frame at `ptr`, visited through `accept`
    ///
    /// Frames `accept` rejects are skipped in favor of the next outer frame.
    fn first_frame_location<F>(&self, ptr: u64, mut accept: F) -> CallstackSymbolData
    where
        F: FnMut(&SourceFrame<'_>) -> bool,
    {
        let Some((module, Some(symbolizer))) = self.locate(ptr) else {
            return CallstackSymbolData::unknown();
        };

        let mut result = CallstackSymbolData::unknown();
        let walk = symbolizer.for_each_frame(module.file_address(ptr), |frame| {
            let Some(file) = frame.file else {
                return ControlFlow::Break(());
            };
            if !accept(&frame) {
                return ControlFlow::Continue(());
            }
            result = CallstackSymbolData::owned(file.to_string(), frame.line);
            ControlFlow::Break(())
        });

        if let Err(source) = walk {
            debug!("{}", CallstackError::Unwind { addr: ptr, source });
            return CallstackSymbolData::unknown();
        }
        result
    }
}

impl CallstackBackend for DwarfBackend {
    fn init(config: &CallstackConfig) -> Self {
        Self::with_flavor(DwarfFlavor::current(), config)
    }

    fn decode_callstack_ptr_fast(&self, ptr: u64, out: &mut String) {
        out.clear();

        if is_kernel_address(ptr) {
            if let Some(sym) = self.kernel.lookup(ptr) {
                out.push_str(sym.name);
            }
            return;
        }

        if let Some((module, Some(symbolizer))) = self.locate(ptr) {
            let file_addr = module.file_address(ptr);
            let walk = symbolizer.for_each_frame(file_addr, |frame| {
                if let Some(function) = &frame.function {
                    out.push_str(function);
                }
                ControlFlow::Break(())
            });
            if walk.is_ok() && !out.is_empty() {
                return;
            }
            out.clear();
            if let Some(sym) = symbolizer.symbol(file_addr) {
                out.push_str(&sym.name);
                return;
            }
        }

        if let Some(name) = dladdr_lookup(ptr).and_then(|sym| sym.name) {
            out.push_str(&name);
        }
    }

    fn decode_symbol_address(&self, ptr: u64) -> CallstackSymbolData {
        self.first_frame_location(ptr, |_| true)
    }

    fn decode_code_address(&self, ptr: u64) -> CallstackSymbolData {
        self.first_frame_location(ptr, |frame| {
            let function = frame.function.as_deref().map(demangle);
            !self.filter.is_internal_frame(function.as_deref(), frame.file)
        })
    }

    fn decode_callstack_ptr(&self, ptr: u64) -> CallstackEntryData {
        if is_kernel_address(ptr) {
            return self.decode_kernel(ptr);
        }

        let (module, symbolizer) = match self.locate(ptr) {
            Some((module, Some(symbolizer))) => (module, symbolizer),
            other => {
                let dl = dladdr_lookup(ptr);
                let image = other
                    .as_ref()
                    .map(|(module, _)| module.path)
                    .or_else(|| dl.as_ref().and_then(|s| s.image))
                    .unwrap_or(UNKNOWN);
                let name = dl.as_ref().map_or_else(|| UNKNOWN.to_string(), DlSymbol::display_name);
                return Self::dladdr_frame(dl.as_ref(), &name, image);
            }
        };

        let mut data = CallstackEntryData::new(module.path);
        if let Err(e) = self.collect_frames(ptr, &module, &symbolizer, &mut data) {
            debug!("{e}");
            replace_with_error_frame(&mut data);
            return data;
        }

        if data.is_empty() {
            let name = Self::fallback_name(ptr, Some(&module), Some(&symbolizer));
            push_frame(&mut data, fast_entry(fast(), &name, UNKNOWN, 0));
        }
        Self::attach_symbol_range(&mut data, ptr, &module, &symbolizer);
        data
    }
}
