//! Best-effort symbol demangling
//!
//! Only names starting with `_` are considered mangled (`_ZN...`/`_R...` for
//! Rust, `_Z...` for Itanium C++). Rust is tried first since Rust legacy names
//! are also valid Itanium names but demangle to something less readable.

use std::borrow::Cow;

/// Demangle `name`, returning it unchanged if it is not mangled or fails to parse
#[must_use]
pub fn demangle(name: &str) -> Cow<'_, str> {
    if !name.starts_with('_') {
        return Cow::Borrowed(name);
    }

    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return Cow::Owned(format!("{demangled:#}"));
    }

    cpp_demangle::Symbol::new(name)
        .ok()
        .and_then(|sym| sym.demangle(&cpp_demangle::DemangleOptions::default()).ok())
        .map_or(Cow::Borrowed(name), Cow::Owned)
}
