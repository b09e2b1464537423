use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn kestrel() -> Command {
    Command::new(env!("CARGO_BIN_EXE_kestrel"))
}

fn script(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).expect("failed to write script");
    path
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

/// Last non-empty stderr line parsed as JSON.
fn json_error(out: &Output) -> serde_json::Value {
    let text = stderr(out);
    let line = text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    serde_json::from_str(line).unwrap_or_else(|e| panic!("stderr is not JSON ({e}): {text}"))
}

#[test]
fn prints_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "hello.ks", "function main() { println \"hello\"; print 1 + 2; }");
    let out = kestrel().arg(&file).output().expect("failed to run kestrel");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "hello\n3");
}

#[test]
fn script_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "args.ks", "function main(name, n) { println name . \":\" . (n + 1); }");
    let out = kestrel().arg(&file).args(["bob", "41"]).output().expect("failed to run kestrel");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "bob:42");
}

#[test]
fn hyphenated_arguments_reach_the_script() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "neg.ks", "function main(n) { println n * 2; }");
    let out = kestrel().arg(&file).arg("-4").output().expect("failed to run kestrel");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "-8");
}

#[test]
fn entry_option() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "entry.ks", "function main() { println \"main\"; }\nfunction other() { println \"other\"; }");
    let out = kestrel().arg("--entry").arg("other").arg(&file).output().expect("failed to run kestrel");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "other");
}

#[test]
fn dump_lists_instructions_without_running() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "dump.ks", "function main() { return 1 / 0; }");
    let out = kestrel().arg("--dump").arg(&file).output().expect("failed to run kestrel");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let listing = stdout(&out);
    assert!(listing.contains("DIV"), "{listing}");
    assert!(listing.contains("RET"), "{listing}");
    assert!(listing.lines().all(|l| l.len() >= 4 && l[..4].chars().all(|c| c.is_ascii_hexdigit())), "{listing}");
}

#[test]
fn compile_error_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "bad.ks", "function main() {\n  return 1\n}");
    let out = kestrel().arg(&file).output().expect("failed to run kestrel");
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error:"), "{err}");
    assert!(err.contains("-->"), "{err}");
    assert!(stdout(&out).is_empty());
}

#[test]
fn compile_error_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "bad.ks", "function main() {\n  return nope();\n}");
    let out = kestrel().arg("--json").arg(&file).output().expect("failed to run kestrel");
    assert_eq!(out.status.code(), Some(1));
    let v = json_error(&out);
    assert_eq!(v["phase"], "compile");
    assert_eq!(v["line"], 2);
    assert!(v["message"].as_str().unwrap_or("").contains("nope"), "{v}");
}

#[test]
fn runtime_error_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "div.ks", "function main() {\n  x = 0;\n  return 10 / x;\n}");
    let out = kestrel().arg("--json").arg(&file).output().expect("failed to run kestrel");
    assert_eq!(out.status.code(), Some(1));
    let v = json_error(&out);
    assert_eq!(v["phase"], "runtime");
    assert_eq!(v["code"], 9);
    assert_eq!(v["line"], 3);
}

#[test]
fn runtime_error_as_text() {
    let dir = tempfile::tempdir().unwrap();
    let file = script(dir.path(), "abort.ks", "function main() { abort 77; }");
    let out = kestrel().arg(&file).output().expect("failed to run kestrel");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("runtime error 77"), "{}", stderr(&out));
}

#[test]
fn modules_from_script_directory() {
    let dir = tempfile::tempdir().unwrap();
    script(dir.path(), "util.ks", "function twice(x) { return x * 2; }");
    let file = script(dir.path(), "main.ks", "use util;\nfunction main() { println util::twice(21); }");
    let out = kestrel().arg(&file).output().expect("failed to run kestrel");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "42");
}

#[test]
fn modules_from_module_path() {
    let scripts = tempfile::tempdir().unwrap();
    let lib = tempfile::tempdir().unwrap();
    script(lib.path(), "greet.ks", "function hello(who) { return \"hello \" . who; }");
    let file = script(scripts.path(), "main.ks", "use greet;\nfunction main() { println hello(\"there\"); }");

    let out = kestrel().arg(&file).output().expect("failed to run kestrel");
    assert_eq!(out.status.code(), Some(1), "module must not be found without -M");

    let out = kestrel().arg("-M").arg(lib.path()).arg(&file).output().expect("failed to run kestrel");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out).trim(), "hello there");
}

#[test]
fn config_file_limits_recursion() {
    let dir = tempfile::tempdir().unwrap();
    let config = script(dir.path(), "vm.json", r#"{"control_stack_limit": 10}"#);
    let file = script(
        dir.path(),
        "deep.ks",
        "function f(n) { if (n == 0) return 0; return f(n - 1); }\nfunction main() { println f(20); }",
    );

    let out = kestrel().arg(&file).output().expect("failed to run kestrel");
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let out = kestrel().arg("--json").arg("--config").arg(&config).arg(&file).output().expect("failed to run kestrel");
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(json_error(&out)["code"], 8);
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let out = kestrel().arg(dir.path().join("absent.ks")).output().expect("failed to run kestrel");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("cannot read"), "{}", stderr(&out));
}

#[test]
fn no_optimize_gives_same_output() {
    let dir = tempfile::tempdir().unwrap();
    let source = "function main() { s = 0; for (i = 0; i < 10; i++) { if (i % 2) continue; s += i; } println s; }";
    let file = script(dir.path(), "loop.ks", source);
    let fast = kestrel().arg(&file).output().expect("failed to run kestrel");
    let plain = kestrel().arg("--no-optimize").arg(&file).output().expect("failed to run kestrel");
    assert!(fast.status.success(), "stderr: {}", stderr(&fast));
    assert_eq!(stdout(&fast), stdout(&plain));
    assert_eq!(stdout(&fast).trim(), "20");
}
