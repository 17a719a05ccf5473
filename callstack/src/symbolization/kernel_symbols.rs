//! Kernel symbol table built from the system symbol listing
//!
//! The listing (`/proc/kallsyms` on Linux) has one record per symbol:
//!
//! ```text
//! ffffffff81000000 T _text
//! ffffffffc0a01000 t nf_conntrack_init  [nf_conntrack]
//! ```
//!
//! Only code symbols (`T`/`t`) with a non-zero address are kept; unprivileged
//! readers typically see every address as zero, which yields an empty table.
//! The table is sorted in strictly descending address order so a lookup is a
//! single binary search for the first entry at or below the query address.

use log::{debug, trace, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::alloc::{retained, RetainedPool};
use crate::domain::CallstackError;

/// One kernel code symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSymbol {
    pub addr: u64,
    pub name: &'static str,
    /// Containing kernel module, `None` for the core image
    pub module: Option<&'static str>,
}

/// Immutable, descending-sorted kernel symbol table
#[derive(Debug, Default)]
pub struct KernelSymbolTable {
    symbols: Box<[KernelSymbol]>,
}

impl KernelSymbolTable {
    /// Table with no symbols; every kernel lookup misses
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the listing at `path`
    ///
    /// # Errors
    /// Returns an error if the listing cannot be opened
    pub fn load(path: &Path) -> Result<Self, CallstackError> {
        let file = File::open(path).map_err(|source| CallstackError::KernelSymbolsUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_reader(BufReader::new(file), retained()))
    }

    /// Parse the listing at `path`, degrading to an empty table if it is unreadable
    #[must_use]
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(table) => {
                debug!("Loaded {} kernel symbols from {}", table.len(), path.display());
                table
            }
            Err(e) => {
                debug!("{e}; kernel symbolication disabled");
                Self::empty()
            }
        }
    }

    /// Parse a listing, keeping every record read before any I/O error
    #[must_use]
    pub fn from_reader<R: BufRead>(reader: R, pool: &RetainedPool) -> Self {
        let mut symbols = Vec::with_capacity(1024);

        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Kernel symbol listing truncated: {e}");
                    break;
                }
            };

            if let Some(record) = parse_line(&line) {
                symbols.push(KernelSymbol {
                    addr: record.addr,
                    name: pool.retain(record.name),
                    module: record.module.map(|m| pool.intern(m)),
                });
            }
        }

        Self::from_symbols(symbols)
    }

    /// Freeze `symbols` into lookup order
    ///
    /// Aliases sharing an address collapse to the first one listed.
    #[must_use]
    pub fn from_symbols(mut symbols: Vec<KernelSymbol>) -> Self {
        // Stable sort keeps listing order among aliases, so dedup keeps the first
        symbols.sort_by_key(|s| std::cmp::Reverse(s.addr));
        symbols.dedup_by_key(|s| s.addr);
        Self { symbols: symbols.into_boxed_slice() }
    }

    /// Nearest symbol at or below `addr`
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<&KernelSymbol> {
        let idx = self.symbols.partition_point(|s| s.addr > addr);
        self.symbols.get(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    #[must_use]
    pub fn symbols(&self) -> &[KernelSymbol] {
        &self.symbols
    }
}

/// A code record borrowed from one listing line
#[derive(Debug, PartialEq, Eq)]
struct ListingRecord<'a> {
    addr: u64,
    name: &'a str,
    module: Option<&'a str>,
}

fn parse_line(line: &str) -> Option<ListingRecord<'_>> {
    let mut fields = line.split_ascii_whitespace();
    let addr_field = fields.next()?;
    let kind = fields.next()?;
    let name = fields.next()?;

    let Ok(addr) = u64::from_str_radix(addr_field, 16) else {
        trace!("Skipping malformed kernel symbol record: {line:?}");
        return None;
    };
    if addr == 0 || !matches!(kind, "T" | "t") {
        return None;
    }

    let module = fields
        .next()
        .and_then(|m| m.strip_prefix('['))
        .and_then(|m| m.strip_suffix(']'))
        .filter(|m| !m.is_empty());

    Some(ListingRecord { addr, name, module })
}
