//! Runs the `callstack-dump` binary end to end

use std::process::Command;

fn dump() -> Command {
    Command::new(env!("CARGO_BIN_EXE_callstack-dump"))
}

#[test]
fn test_dump_unknown_address() {
    let output = dump().args(["--quiet", "--addr", "0x10"]).output().expect("failed to run");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("#0  0x0000000000000010 [unknown]"), "{stdout}");
}

#[test]
fn test_dump_own_stack() {
    let output = dump().args(["--depth", "8"]).output().expect("failed to run");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("callstack-dump v"));
    let frames = stdout.lines().filter(|l| l.starts_with('#')).count();
    assert!((1..=8).contains(&frames), "{stdout}");
}

#[test]
fn test_dump_fast_and_symbol_modes() {
    for mode in ["--fast", "--symbol-only"] {
        let output =
            dump().args(["--quiet", mode, "--addr", "10", "--addr", "20"]).output().unwrap();
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout.lines().count(), 2, "{mode}: {stdout}");
    }
}

#[test]
fn test_dump_missing_kallsyms_fails() {
    let output =
        dump().args(["--kallsyms", "/nonexistent/kallsyms", "--addr", "0x10"]).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("kernel symbol listing"));
}

#[test]
fn test_dump_invalid_address_is_usage_error() {
    let output = dump().args(["--addr", "not-hex"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[cfg(all(not(feature = "dladdr-only"), any(target_os = "linux", target_os = "android")))]
#[test]
fn test_dump_kernel_address_with_fixture() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"ffffffff81000000 T sys_call_table\n").unwrap();

    let output = dump()
        .arg("--quiet")
        .arg("--kallsyms")
        .arg(file.path())
        .args(["--addr", "ffffffff81000050"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("sys_call_table <kernel>"), "{stdout}");
    assert!(stdout.contains("at <kernel>"), "{stdout}");
}
