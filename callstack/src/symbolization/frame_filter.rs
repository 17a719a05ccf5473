//! Filtering of the profiler's own frames
//!
//! Code-address attribution must never point into the profiler's plumbing.
//! A frame is internal when its function name or its source path ends with
//! one of the registered suffixes. Matching is best-effort: function names
//! change across toolchains, so the list carries both names and paths.
//!
//! A suffix only matches on a component boundary: at the start of the
//! candidate, after a path separator, or after `::` or `<` in a symbol path.
//! `callstack/src/lib.rs` therefore does not match `my-callstack/src/lib.rs`.

/// Suffixes identifying this crate's entry points
pub const DEFAULT_INTERNAL_SUFFIXES: &[&str] = &[
    "callstack/src/lib.rs",
    "callstack/src/backend/mod.rs",
    "callstack/src/backend/dwarf.rs",
    "callstack/src/backend/dladdr.rs",
    "callstack/src/backend/dbghelp.rs",
    "callstack::decode_callstack_ptr",
    "callstack::decode_callstack_ptr_fast",
    "callstack::decode_symbol_address",
    "callstack::decode_code_address",
    "callstack::call_trace",
];

/// Suffix matcher with a minimum-length short circuit
#[derive(Debug, Clone)]
pub struct InternalFrameFilter {
    suffixes: Vec<String>,
    min_len: usize,
}

impl InternalFrameFilter {
    #[must_use]
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let suffixes: Vec<String> =
            suffixes.into_iter().map(Into::into).filter(|s| !s.is_empty()).collect();
        let min_len = suffixes.iter().map(String::len).min().unwrap_or(usize::MAX);
        Self { suffixes, min_len }
    }

    /// The built-in suffixes plus `extra`
    #[must_use]
    pub fn with_defaults(extra: &[String]) -> Self {
        Self::new(
            DEFAULT_INTERNAL_SUFFIXES
                .iter()
                .map(|s| (*s).to_string())
                .chain(extra.iter().cloned()),
        )
    }

    /// Shortest registered suffix; shorter candidates are never compared
    #[must_use]
    pub fn min_len(&self) -> usize {
        self.min_len
    }

    #[must_use]
    pub fn is_internal(&self, candidate: &str) -> bool {
        if candidate.len() < self.min_len {
            return false;
        }
        self.suffixes.iter().any(|suffix| ends_with_component(candidate, suffix))
    }

    /// Whether either the function name or the source path marks the frame internal
    #[must_use]
    pub fn is_internal_frame(&self, function: Option<&str>, file: Option<&str>) -> bool {
        function.is_some_and(|f| self.is_internal(f)) || file.is_some_and(|f| self.is_internal(f))
    }
}

/// `ends_with` that treats `\` and `/` as the same separator
fn ends_with_path(candidate: &str, suffix: &str) -> bool {
    let (c, s) = (candidate.as_bytes(), suffix.as_bytes());
    if s.len() > c.len() {
        return false;
    }
    c[c.len() - s.len()..].iter().zip(s).all(|(&a, &b)| a == b || (is_sep(a) && is_sep(b)))
}

fn is_sep(b: u8) -> bool {
    b == b'/' || b == b'\\'
}

/// [`ends_with_path`] where the match must also start a component
fn ends_with_component(candidate: &str, suffix: &str) -> bool {
    if !ends_with_path(candidate, suffix) {
        return false;
    }
    let starts_bounded = suffix.bytes().next().is_some_and(|b| is_sep(b) || b == b':');
    let before = candidate.len() - suffix.len();
    starts_bounded
        || before == 0
        || matches!(candidate.as_bytes()[before - 1], b'/' | b'\\' | b':' | b'<')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_function_suffix() {
        let filter = InternalFrameFilter::new(["::zone_begin", "profiler/src/zone.rs"]);
        assert!(filter.is_internal("my_profiler::zone_begin"));
        assert!(!filter.is_internal("my_profiler::zone_begin_hook"));
        assert!(!filter.is_internal("app::main"));
    }

    #[test]
    fn test_min_len_guard() {
        let filter = InternalFrameFilter::new(["::zone_begin", "profiler/src/zone.rs"]);
        assert_eq!(filter.min_len(), "::zone_begin".len());
        // Shorter than every suffix, so never compared
        assert!(!filter.is_internal("begin"));
    }

    #[test]
    fn test_path_separators_are_interchangeable() {
        let filter = InternalFrameFilter::new(["profiler/src/zone.rs"]);
        assert!(filter.is_internal(r"C:\work\profiler\src\zone.rs"));
        assert!(filter.is_internal("/home/dev/profiler/src/zone.rs"));
    }

    #[test]
    fn test_frame_checks_name_and_file() {
        let filter = InternalFrameFilter::with_defaults(&[]);
        assert!(filter.is_internal_frame(Some("callstack::decode_code_address"), None));
        assert!(filter.is_internal_frame(Some("app::run"), Some("/x/callstack/src/lib.rs")));
        assert!(!filter.is_internal_frame(Some("app::run"), Some("/x/app/src/main.rs")));
        assert!(!filter.is_internal_frame(None, None));
    }

    #[test]
    fn test_suffix_must_start_a_component() {
        let filter = InternalFrameFilter::with_defaults(&[]);
        assert!(!filter.is_internal_frame(Some("app::run"), Some("/src/tracy-callstack/src/lib.rs")));
        assert!(!filter.is_internal_frame(Some("mycallstack::decode_code_address"), None));

        assert!(filter.is_internal("callstack/src/backend/dwarf.rs"));
        assert!(filter.is_internal(r"D:\ws\callstack\src\lib.rs"));
        assert!(filter.is_internal("<callstack::decode_code_address"));
        assert!(filter.is_internal("outer::callstack::decode_callstack_ptr"));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = InternalFrameFilter::new(Vec::<String>::new());
        assert!(!filter.is_internal("anything::at::all"));
        assert!(!InternalFrameFilter::new([""]).is_internal("x"));
    }
}
