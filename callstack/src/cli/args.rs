//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::CallstackConfig;

#[derive(Parser, Debug)]
#[command(
    name = "callstack-dump",
    about = "Decode return addresses the way the profiler does",
    after_help = "\
EXAMPLES:
    callstack-dump                              Decode this process's own stack
    callstack-dump --addr 0x55f3a2b4c780        Decode one address
    callstack-dump --symbol-only --depth 8      File/line only, 8 frames
    callstack-dump --addr ffffffff81000050 --kallsyms ./kallsyms.txt"
)]
pub struct Args {
    /// Address to decode, in hex (repeatable); the own stack is captured if omitted
    #[arg(long = "addr", value_name = "ADDR", value_parser = parse_hex_addr)]
    pub addrs: Vec<u64>,

    /// Maximum number of frames captured from the own stack
    #[arg(short, long, default_value = "32")]
    pub depth: usize,

    /// Print only the raw symbol name of each address
    #[arg(long, conflicts_with = "symbol_only")]
    pub fast: bool,

    /// Print only file:line of each address, without inline expansion
    #[arg(long)]
    pub symbol_only: bool,

    /// Decode physical frames only
    #[arg(long)]
    pub no_inlines: bool,

    /// Kernel symbol listing to load instead of /proc/kallsyms
    #[arg(long, value_name = "FILE")]
    pub kallsyms: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

/// What to print for each address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Full,
    Fast,
    SymbolOnly,
}

impl Args {
    #[must_use]
    pub fn mode(&self) -> Mode {
        if self.fast {
            Mode::Fast
        } else if self.symbol_only {
            Mode::SymbolOnly
        } else {
            Mode::Full
        }
    }

    /// Environment configuration overridden by the command line
    #[must_use]
    pub fn to_config(&self) -> CallstackConfig {
        let mut config = CallstackConfig::from_env();
        if self.no_inlines {
            config = config.with_inline_frames(false);
        }
        if let Some(path) = &self.kallsyms {
            config = config.with_kallsyms_path(path);
        }
        config
    }
}

/// Parse a hex address, with or without a `0x` prefix
///
/// # Errors
/// Returns a message suitable for clap if the value is not a 64-bit hex number
pub fn parse_hex_addr(value: &str) -> Result<u64, String> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid address {value:?}: {e}"))
}
