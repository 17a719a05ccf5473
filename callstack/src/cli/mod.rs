//! Command-line surface of the `callstack-dump` diagnostic binary

pub mod args;
pub mod report;

pub use args::{parse_hex_addr, Args, Mode};
pub use report::{format_entry_data, format_fast, format_symbol};
