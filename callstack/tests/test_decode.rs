//! Decodes addresses of this test process through the process-wide engine

use callstack::domain::{MAX_CALLSTACK_FRAMES, UNKNOWN};
use callstack::{CallstackConfig, CallstackEntryData};
use std::io::Write;
use std::sync::OnceLock;

const KALLSYMS: &str = "\
ffffffff81000000 T sys_call_table
ffffffff81000100 t do_syscall_64
";

/// Every test goes through here so the first init uses the fixture listing
fn setup() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(KALLSYMS.as_bytes()).unwrap();
        callstack::init_callstack_with(CallstackConfig::default().with_kallsyms_path(file.path()));
    });
}

#[inline(never)]
fn marker_function() -> u64 {
    std::hint::black_box(marker_function as fn() -> u64 as usize as u64)
}

fn summary(data: &CallstackEntryData) -> Vec<(String, String, u32, u64)> {
    data.iter().map(|e| (e.name.to_string(), e.file.to_string(), e.line, e.sym_addr)).collect()
}

#[test]
fn test_frame_count_is_bounded() {
    setup();
    for addr in [marker_function(), 0x10, 0xffff_ffff_8100_0050, u64::MAX] {
        let data = callstack::decode_callstack_ptr(addr);
        let count = usize::from(data.count());
        assert!((1..=MAX_CALLSTACK_FRAMES).contains(&count), "0x{addr:x}: {count} frames");
    }
}

#[test]
fn test_decode_is_idempotent() {
    setup();
    let addr = marker_function();
    let first = callstack::decode_callstack_ptr(addr);
    let second = callstack::decode_callstack_ptr(addr);
    assert_eq!(summary(&first), summary(&second));
    assert_eq!(first.image_name(), second.image_name());

    let mut buf = String::new();
    let fast_first = callstack::decode_callstack_ptr_fast(addr, &mut buf).to_string();
    assert_eq!(callstack::decode_callstack_ptr_fast(addr, &mut buf), fast_first);
}

#[test]
fn test_unknown_address() {
    setup();
    let data = callstack::decode_callstack_ptr(0x10);
    assert_eq!(data.count(), 1);
    let frame = &data.entries()[0];
    assert_eq!(&*frame.name, UNKNOWN);
    assert_eq!(frame.line, 0);

    for sym in [callstack::decode_symbol_address(0x10), callstack::decode_code_address(0x10)] {
        assert_eq!(sym.file.as_str(), UNKNOWN);
        assert_eq!(sym.line, 0);
        assert!(!sym.need_free());
    }

    let mut buf = String::from("stale");
    assert_eq!(callstack::decode_callstack_ptr_fast(0x10, &mut buf), "");
}

#[test]
fn test_double_init_is_ignored() {
    setup();
    callstack::init_callstack_with(CallstackConfig::default().with_kernel_symbols(false));
    assert!(callstack::is_initialized());

    // The fixture listing from the first init is still in effect
    #[cfg(all(not(feature = "dladdr-only"), any(target_os = "linux", target_os = "android")))]
    assert_eq!(
        &*callstack::decode_callstack_ptr(0xffff_ffff_8100_0050).entries()[0].name,
        "sys_call_table"
    );
}

#[test]
fn test_concurrent_decodes_agree() {
    setup();
    let addr = marker_function();
    let expected = summary(&callstack::decode_callstack_ptr(addr));

    let handles: Vec<_> = (0..4)
        .map(|_| std::thread::spawn(move || summary(&callstack::decode_callstack_ptr(addr))))
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[cfg(all(not(feature = "dladdr-only"), any(target_os = "linux", target_os = "android")))]
mod dwarf {
    use super::*;
    use callstack::domain::KERNEL_FILE;

    #[test]
    fn test_marker_function_is_named() {
        setup();
        let data = callstack::decode_callstack_ptr(marker_function());
        let names: Vec<&str> = data.iter().map(|e| &*e.name).collect();
        assert!(names.iter().any(|n| n.contains("marker_function")), "{names:?}");

        let physical = data.entries().last().unwrap();
        assert!(physical.file.ends_with("test_decode.rs"), "{}", physical.file);
        assert!(physical.line > 0);
        assert_eq!(physical.sym_addr, marker_function());
        assert!(physical.sym_len > 0);
    }

    #[test]
    fn test_fast_decode_returns_raw_name() {
        setup();
        let mut buf = String::new();
        let name = callstack::decode_callstack_ptr_fast(marker_function(), &mut buf);
        assert!(name.contains("marker_function"), "{name}");
    }

    #[test]
    fn test_symbol_address_is_owned() {
        setup();
        let sym = callstack::decode_symbol_address(marker_function());
        assert!(sym.need_free());
        assert!(sym.file.as_str().ends_with("test_decode.rs"));
        assert!(sym.line > 0);
        assert!(sym.release().is_some());
    }

    #[test]
    fn test_code_address_outside_engine_is_kept() {
        setup();
        let sym = callstack::decode_code_address(marker_function());
        assert!(sym.file.as_str().ends_with("test_decode.rs"));
    }

    #[test]
    fn test_kernel_address() {
        setup();
        let data = callstack::decode_callstack_ptr(0xffff_ffff_8100_0050);
        assert_eq!(data.count(), 1);
        let frame = &data.entries()[0];
        assert_eq!(&*frame.name, "sys_call_table");
        assert_eq!(&*frame.file, KERNEL_FILE);
        assert_eq!(frame.sym_addr, 0xffff_ffff_8100_0000);
        assert_eq!(data.image_name(), KERNEL_FILE);

        let below = callstack::decode_callstack_ptr(0xffff_ffff_8000_0000);
        assert_eq!(&*below.entries()[0].name, UNKNOWN);
        assert_eq!(below.image_name(), KERNEL_FILE);
    }
}
