use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianArcSlice, RunTimeEndian};
use object::{Object, ObjectSection, ObjectSymbol, SymbolKind};
use std::borrow::Cow;
use std::fs;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Symbolizer for resolving file addresses of one loaded object
///
/// Holds the object's DWARF context (for names, files, lines and inline
/// chains) and its ELF symbol table (for symbol start and size). The DWARF
/// context parses lazily and is not `Sync`, so lookups are serialized per
/// object.
pub struct Symbolizer {
    ctx: Mutex<Context<EndianArcSlice<RunTimeEndian>>>,
    /// Code symbols sorted by address
    symbols: Vec<ElfSymbol>,
}

/// An entry of the object's symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfSymbol {
    pub addr: u64,
    pub size: u64,
    pub name: Box<str>,
}

/// One logical frame reported by the DWARF context
///
/// `function` is the raw (possibly mangled) linkage name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFrame<'a> {
    pub function: Option<Cow<'a, str>>,
    pub file: Option<&'a str>,
    pub line: u32,
}

impl Symbolizer {
    /// Create a new symbolizer for the given binary
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be read or parsed, or if its DWARF sections are corrupt
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self> {
        let binary_data = fs::read(binary_path.as_ref()).context("Failed to read binary file")?;
        Self::from_data(&binary_data)
    }

    /// Create a symbolizer from an in-memory object file
    ///
    /// # Errors
    /// Returns an error if the data is not a supported object file
    pub fn from_data(binary_data: &[u8]) -> Result<Self> {
        let obj_file = object::File::parse(binary_data).context("Failed to parse object file")?;

        // Load DWARF debug info
        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianArcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(Cow::Borrowed(&[][..]));
                Ok(EndianArcSlice::new(Arc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")?;

        Ok(Self { ctx: Mutex::new(ctx), symbols: collect_code_symbols(&obj_file) })
    }

    /// Visit the logical frames at `addr`, innermost inlined frame first
    ///
    /// The visitor can stop the walk early by returning `Break`.
    ///
    /// # Errors
    /// Returns the DWARF error that interrupted the walk; frames already
    /// visited are not retracted.
    pub fn for_each_frame<F>(&self, addr: u64, mut visit: F) -> Result<(), gimli::Error>
    where
        F: FnMut(SourceFrame<'_>) -> ControlFlow<()>,
    {
        let ctx = self.ctx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut frames = ctx.find_frames(addr).skip_all_loads()?;

        while let Some(frame) = frames.next()? {
            let function = frame.function.as_ref().and_then(|f| f.raw_name().ok());
            let (file, line) =
                frame.location.as_ref().map_or((None, 0), |loc| (loc.file, loc.line.unwrap_or(0)));

            if visit(SourceFrame { function, file, line }).is_break() {
                break;
            }
        }

        Ok(())
    }

    /// Symbol-table entry whose range contains `addr`
    #[must_use]
    pub fn symbol(&self, addr: u64) -> Option<&ElfSymbol> {
        find_symbol(&self.symbols, addr)
    }

    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Code symbols in ascending address order
    #[must_use]
    pub fn symbols(&self) -> &[ElfSymbol] {
        &self.symbols
    }
}

fn collect_code_symbols(obj_file: &object::File<'_>) -> Vec<ElfSymbol> {
    let mut symbols: Vec<ElfSymbol> = obj_file
        .symbols()
        .chain(obj_file.dynamic_symbols())
        .filter(|sym| sym.kind() == SymbolKind::Text && sym.address() != 0)
        .filter_map(|sym| {
            let name = sym.name().ok().filter(|n| !n.is_empty())?;
            Some(ElfSymbol { addr: sym.address(), size: sym.size(), name: name.into() })
        })
        .collect();

    // Static and dynamic tables repeat exported symbols; prefer the sized one
    symbols.sort_by(|a, b| a.addr.cmp(&b.addr).then(b.size.cmp(&a.size)));
    symbols.dedup_by_key(|s| s.addr);
    symbols
}

fn find_symbol(symbols: &[ElfSymbol], addr: u64) -> Option<&ElfSymbol> {
    let idx = symbols.partition_point(|s| s.addr <= addr);
    let sym = symbols.get(idx.checked_sub(1)?)?;
    (addr - sym.addr < sym.size.max(1)).then_some(sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(addr: u64, size: u64, name: &str) -> ElfSymbol {
        ElfSymbol { addr, size, name: name.into() }
    }

    #[test]
    fn test_find_symbol_inside_range() {
        let symbols = vec![sym(0x1000, 0x40, "alpha"), sym(0x1040, 0x20, "beta")];

        assert_eq!(&*find_symbol(&symbols, 0x1000).unwrap().name, "alpha");
        assert_eq!(&*find_symbol(&symbols, 0x103f).unwrap().name, "alpha");
        assert_eq!(&*find_symbol(&symbols, 0x1050).unwrap().name, "beta");
    }

    #[test]
    fn test_find_symbol_outside_ranges() {
        let symbols = vec![sym(0x1000, 0x40, "alpha"), sym(0x2000, 0, "unsized")];

        assert!(find_symbol(&symbols, 0x0fff).is_none());
        assert!(find_symbol(&symbols, 0x1040).is_none());
        // Unsized symbols only match their first byte
        assert!(find_symbol(&symbols, 0x2000).is_some());
        assert!(find_symbol(&symbols, 0x2001).is_none());
    }

    #[test]
    fn test_symbolizer_on_missing_file() {
        assert!(Symbolizer::new("/nonexistent/binary").is_err());
    }

    #[test]
    fn test_symbolizer_rejects_garbage() {
        assert!(Symbolizer::from_data(b"definitely not an object file").is_err());
    }
}
