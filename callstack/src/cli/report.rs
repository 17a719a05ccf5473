//! Text rendering of decode results for `callstack-dump`

// String formatting intentionally uses format! for clarity
#![allow(clippy::format_push_string)]

use crate::domain::{CallstackEntryData, CallstackSymbolData, UNKNOWN};

/// Render every logical frame of one address
///
/// ```text
/// #3  0x000055f3a2b4c780 inlined_helper
///                       at src/lib.rs:42
///     0x000055f3a2b4c780 caller [app]
///                       at src/main.rs:10
/// ```
#[must_use]
pub fn format_entry_data(frame_num: usize, addr: u64, data: &CallstackEntryData) -> String {
    let mut output = String::new();
    let count = data.entries().len();

    for (idx, entry) in data.iter().enumerate() {
        let prefix = if idx == 0 { format!("#{frame_num:<2}") } else { "   ".to_string() };
        output.push_str(&format!("{prefix} 0x{addr:016x} {}", entry.name));

        // The physical frame carries the image
        if idx + 1 == count {
            output.push_str(&format!(" {}", data.image_name()));
        }

        if &*entry.file != UNKNOWN {
            output.push_str(&format!("\n                      at {}", entry.file));
            if entry.line != 0 {
                output.push_str(&format!(":{}", entry.line));
            }
        }

        if idx + 1 < count {
            output.push('\n');
        }
    }

    output
}

/// Render a name-only lookup
#[must_use]
pub fn format_fast(frame_num: usize, addr: u64, name: &str) -> String {
    let name = if name.is_empty() { UNKNOWN } else { name };
    format!("#{frame_num:<2} 0x{addr:016x} {name}")
}

/// Render a file/line lookup
#[must_use]
pub fn format_symbol(frame_num: usize, addr: u64, sym: &CallstackSymbolData) -> String {
    if sym.line == 0 {
        format!("#{frame_num:<2} 0x{addr:016x} {}", sym.file)
    } else {
        format!("#{frame_num:<2} 0x{addr:016x} {}:{}", sym.file, sym.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CallstackEntry;

    fn entry(name: &str, file: &str, line: u32) -> CallstackEntry {
        CallstackEntry { line, ..CallstackEntry::new(name.into(), file.into()) }
    }

    #[test]
    fn test_format_inlined_frames() {
        let mut data = CallstackEntryData::new("[app]");
        data.push(entry("inner", "src/lib.rs", 42)).unwrap();
        data.push(entry("outer", "src/main.rs", 10)).unwrap();

        let text = format_entry_data(3, 0x1234, &data);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "#3  0x0000000000001234 inner");
        assert!(lines[1].ends_with("at src/lib.rs:42"));
        assert_eq!(lines[2], "    0x0000000000001234 outer [app]");
        assert!(lines[3].ends_with("at src/main.rs:10"));
    }

    #[test]
    fn test_format_unknown_frame_has_no_location() {
        let data = CallstackEntryData::single(entry(UNKNOWN, UNKNOWN, 0), UNKNOWN);
        assert_eq!(format_entry_data(0, 0x10, &data), "#0  0x0000000000000010 [unknown] [unknown]");
    }

    #[test]
    fn test_format_fast_and_symbol() {
        assert_eq!(format_fast(1, 0x10, ""), "#1  0x0000000000000010 [unknown]");
        assert_eq!(format_fast(1, 0x10, "main"), "#1  0x0000000000000010 main");

        let sym = CallstackSymbolData::owned("src/main.rs".to_string(), 7);
        assert_eq!(format_symbol(2, 0x10, &sym), "#2  0x0000000000000010 src/main.rs:7");
        assert_eq!(
            format_symbol(2, 0x10, &CallstackSymbolData::unknown()),
            "#2  0x0000000000000010 [unknown]"
        );
    }
}
