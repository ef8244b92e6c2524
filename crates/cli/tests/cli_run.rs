use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

const OUT_DIR: &str = "out/target/product/gen";

fn write(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(path, bytes).expect("write file");
}

fn elf(seed: u64) -> Vec<u8> {
    let mut bytes = vec![0u8; 1024];
    bytes[..4].copy_from_slice(b"\x7fELF");
    bytes[4] = 2;
    bytes[5] = 1;
    bytes[6] = 1;
    bytes[16] = 3;
    bytes[18] = 0xB7;
    let mut state = seed;
    for byte in bytes.iter_mut().skip(64) {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *byte = (state & 0xff) as u8;
    }
    bytes
}

fn source_tree(workdir: &Path) {
    let out = workdir.join(OUT_DIR);
    let module_info = serde_json::json!({
        "libfoo": {
            "path": ["external/foo"],
            "installed": [format!("{OUT_DIR}/system/lib64/libfoo.so")]
        }
    });
    write(&out, "module-info.json", module_info.to_string().as_bytes());
    write(&out, "system/lib64/libfoo.so", &elf(7));
    write(&out, "vendor/lib64/libfoo.so", &elf(7));
    write(
        &out,
        "obj/NOTICE.html",
        br#"<div class="file-list">/system/lib64/libfoo.so<br/></div>"#,
    );
    write(workdir, "external/foo/MODULE_LICENSE_MIT", b"");
    write(
        workdir,
        "android.log",
        format!(
            "PLATFORM_VERSION=12\nCombining NOTICE files into HTML: {OUT_DIR}/obj/NOTICE.html\n"
        )
        .as_bytes(),
    );
}

fn files_starting_with(dir: &Path, prefix: &str) -> Vec<String> {
    fs::read_dir(dir)
        .expect("read output dir")
        .flatten()
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(prefix))
        .collect()
}

#[test]
fn version_flag_prints_version() {
    cargo_bin_cmd!("binaudit")
        .arg("-v")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("binaudit v"));
}

#[test]
fn analyze_without_build_log_fails() {
    let dir = tempdir().expect("tempdir");
    let out = dir.path().join("reports");

    cargo_bin_cmd!("binaudit")
        .arg("-s")
        .arg(dir.path())
        .arg("-o")
        .arg(&out)
        .env_remove("BINAUDIT_DB_URL")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Fail to read"));

    assert_eq!(files_starting_with(&out, "binaudit_log_").len(), 1);
    assert!(files_starting_with(&out, "binaudit_report_").is_empty());
}

#[test]
fn analyze_writes_reports_for_a_build_tree() {
    let dir = tempdir().expect("tempdir");
    let workdir = dir.path().join("android");
    source_tree(&workdir);
    let out = dir.path().join("reports");

    cargo_bin_cmd!("binaudit")
        .arg("-s")
        .arg(&workdir)
        .arg("-a")
        .arg("android.log")
        .arg("-i")
        .arg("-o")
        .arg(&out)
        .env_remove("BINAUDIT_DB_URL")
        .assert()
        .success();

    let reports = files_starting_with(&out, "binaudit_report_");
    let text = reports.iter().find(|n| n.ends_with(".txt")).expect("text report");
    assert!(reports.iter().any(|n| n.ends_with(".csv")), "missing sheet: {reports:?}");

    let body = fs::read_to_string(out.join(text)).expect("read report");
    let rows: Vec<&str> = body.lines().collect();
    assert_eq!(rows.len(), 2, "header plus one deduplicated binary: {body}");
    assert!(rows[1].starts_with("system/lib64/libfoo.so\texternal/foo\tok(NA)\t\t\tMIT"));

    let removed = files_starting_with(&out, "REMOVED_BIN_BY_DUPLICATION_");
    assert_eq!(removed.len(), 1);
    let removed_body = fs::read_to_string(out.join(&removed[0])).expect("read removed log");
    assert!(removed_body.starts_with("vendor/lib64/libfoo.so"));
    assert!(removed_body.trim_end().ends_with("duplicated"));
}

#[test]
fn packaging_check_runs_and_exits() {
    let dir = tempdir().expect("tempdir");
    let target = dir.path().join("delivery");
    write(&target, "certs/release.pem", b"key");
    let rules = dir.path().join("rules.json");
    fs::write(&rules, r#"{"Prohibited_File_Extensions": ["pem"]}"#).expect("write rules");

    cargo_bin_cmd!("binaudit")
        .arg("-p")
        .arg(&rules)
        .arg("--target")
        .arg(&target)
        .arg("-o")
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("release.pem"));

    cargo_bin_cmd!("binaudit")
        .arg("-p")
        .arg(dir.path().join("missing.json"))
        .arg("-o")
        .arg(dir.path())
        .assert()
        .failure();
}

#[test]
fn checklist_reports_missing_binaries() {
    let dir = tempdir().expect("tempdir");
    let notice = dir.path().join("NOTICE.html");
    fs::write(&notice, r#"<div class="file-list">/system/lib/libfoo.so<br/></div>"#)
        .expect("write notice");
    let list = dir.path().join("binaries.txt");
    fs::write(&list, "system/lib/libfoo.so\nsystem/lib/libmissing.so\n").expect("write list");

    cargo_bin_cmd!("binaudit")
        .arg("-c")
        .arg("nok")
        .arg("-b")
        .arg(&list)
        .arg("-n")
        .arg(&notice)
        .arg("-o")
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("system/lib/libmissing.so nok"))
        .stderr(predicate::str::contains("libfoo.so nok").not());
}

#[test]
fn divide_splits_notice_into_files() {
    let dir = tempdir().expect("tempdir");
    let notice = dir.path().join("NOTICE.html");
    fs::write(
        &notice,
        r#"<table><tr><td><div class="file-list">/system/lib/libfoo.so<br/></div>
<pre class="license-text">foo license</pre></td></tr></table>"#,
    )
    .expect("write notice");
    let out = dir.path().join("reports");

    cargo_bin_cmd!("binaudit")
        .arg("-d")
        .arg(&notice)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    let divided = files_starting_with(&out, "NOTICE_FILES_");
    assert_eq!(divided.len(), 1);
    let text = fs::read_to_string(out.join(&divided[0]).join("system/lib/libfoo.so.txt"))
        .expect("read divided notice");
    assert_eq!(text, "foo license");
}

#[test]
fn removal_list_is_read_from_the_invocation_directory() {
    let dir = tempdir().expect("tempdir");
    let workdir = dir.path().join("android");
    source_tree(&workdir);
    let first = dir.path().join("first");

    cargo_bin_cmd!("binaudit")
        .arg("-s")
        .arg(&workdir)
        .arg("-a")
        .arg("android.log")
        .arg("-i")
        .arg("-o")
        .arg(&first)
        .env_remove("BINAUDIT_DB_URL")
        .assert()
        .success();

    let reports = files_starting_with(&first, "binaudit_report_");
    let text = reports.iter().find(|n| n.ends_with(".txt")).expect("text report");
    fs::copy(first.join(text), dir.path().join("previous.txt")).expect("copy earlier report");
    assert!(!workdir.join("previous.txt").exists());

    let second = dir.path().join("second");
    cargo_bin_cmd!("binaudit")
        .current_dir(dir.path())
        .arg("-s")
        .arg(&workdir)
        .arg("-a")
        .arg("android.log")
        .arg("-i")
        .arg("-r")
        .arg("previous.txt")
        .arg("-o")
        .arg(&second)
        .env_remove("BINAUDIT_DB_URL")
        .assert()
        .success();

    let reports = files_starting_with(&second, "binaudit_report_");
    let text = reports.iter().find(|n| n.ends_with(".txt")).expect("text report");
    let body = fs::read_to_string(second.join(text)).expect("read report");
    assert_eq!(body.lines().count(), 1, "listed binaries must be dropped: {body}");

    let removed = files_starting_with(&second, "REMOVED_BIN_BY_DUPLICATION_");
    let removed_body = fs::read_to_string(second.join(&removed[0])).expect("read removed log");
    assert!(removed_body.contains("removed by request"));
}
