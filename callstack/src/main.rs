//! # callstack-dump - Main Entry Point
//!
//! Diagnostic front end for the symbolication engine:
//! - **Own stack** (no `--addr`): capture this process's stack and decode it
//! - **Addresses** (`--addr <hex>`, repeatable): decode the given addresses
//!
//! `--fast` and `--symbol-only` switch to the name-only and file/line-only
//! decoders; the default is a full decode with inlined frames.

use anyhow::{bail, Context, Result};
use cfg_if::cfg_if;
use clap::Parser;
use log::info;

use callstack::cli::{format_entry_data, format_fast, format_symbol, Args, Mode};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

/// Return addresses of the current thread, innermost first
#[inline(never)]
fn capture_own_stack(depth: usize) -> Vec<u64> {
    cfg_if! {
        if #[cfg(windows)] {
            callstack::call_trace(depth)
        } else {
            let mut addrs = Vec::with_capacity(depth);
            backtrace::trace(|frame| {
                addrs.push(frame.ip() as usize as u64);
                addrs.len() < depth
            });
            addrs
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.kallsyms {
        std::fs::File::open(path)
            .with_context(|| format!("Failed to open kernel symbol listing {}", path.display()))?;
    }

    callstack::init_callstack_with(args.to_config());

    let addrs = if args.addrs.is_empty() { capture_own_stack(args.depth) } else { args.addrs.clone() };
    if addrs.is_empty() {
        bail!("No frames captured");
    }

    if !args.quiet {
        println!("callstack-dump v{}", env!("CARGO_PKG_VERSION"));
        println!("frames: {}", addrs.len());
    }
    info!("Decoding {} addresses ({:?})", addrs.len(), args.mode());

    let mut scratch = String::new();
    for (frame_num, &addr) in addrs.iter().enumerate() {
        let line = match args.mode() {
            Mode::Fast => {
                let name = callstack::decode_callstack_ptr_fast(addr, &mut scratch);
                format_fast(frame_num, addr, name)
            }
            Mode::SymbolOnly => {
                format_symbol(frame_num, addr, &callstack::decode_symbol_address(addr))
            }
            Mode::Full => {
                format_entry_data(frame_num, addr, &callstack::decode_callstack_ptr(addr))
            }
        };
        println!("{line}");
    }

    Ok(())
}
