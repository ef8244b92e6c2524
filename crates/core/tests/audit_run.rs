// crates/core/tests/audit_run.rs

use std::path::Path;
use std::sync::Mutex;

use binaudit_core::config::AuditConfig;
use binaudit_core::db::{IdentityRow, SqliteConnector, SqliteIdentityDb};
use binaudit_core::model::{BinaryRecord, NoticeStatus};
use binaudit_core::services::audit::{
    run_audit, write_outputs, AuditContext, AuditOptions, AuditServices,
};
use binaudit_core::services::buildlog::BuildEnvironment;
use binaudit_core::services::discovery::MagicSniffer;
use binaudit_core::services::fingerprint::sha1_bytes;
use binaudit_core::services::repository::{RepositoryProvider, RepositoryTable};
use binaudit_core::services::source_scan::{backfill_licenses, licenses_from_report, SourceScanner};
use binaudit_core::{AuditError, AuditResult};
use serde_json::json;
use tempfile::tempdir;

const OUT_DIR: &str = "out/target/product/gen";

struct FixedRepositories(RepositoryTable);

impl RepositoryProvider for FixedRepositories {
    fn load(&self, _workdir: &Path) -> RepositoryTable {
        self.0.clone()
    }
}

/// Records every scanned directory and answers with a fixed license.
struct RecordingScanner {
    scanned: Mutex<Vec<String>>,
}

impl SourceScanner for RecordingScanner {
    fn scan(&self, dir: &Path) -> AuditResult<Vec<String>> {
        let mut scanned = self.scanned.lock().map_err(|e| AuditError::Config(e.to_string()))?;
        scanned.push(dir.display().to_string());
        Ok(vec!["BSD-2-Clause".to_string(), "MIT".to_string()])
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn elf(seed: u8) -> Vec<u8> {
    let mut bytes = vec![0u8; 512];
    bytes[..4].copy_from_slice(b"\x7fELF");
    bytes[18] = 0xB7;
    let mut state = u64::from(seed) + 1;
    for byte in bytes.iter_mut().skip(64) {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *byte = (state & 0xff) as u8;
    }
    bytes
}

fn write(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, bytes).expect("write file");
}

fn build_tree(workdir: &Path) {
    let out = workdir.join(OUT_DIR);
    write(
        &out,
        "module-info.json",
        json!({
            "libfoo": {"path": ["external/foo"], "installed": [format!("{OUT_DIR}/system/lib64/libfoo.so")]},
            "libbar": {"path": ["vendor/bar"], "installed": [format!("{OUT_DIR}/vendor/lib64/libbar.so")]}
        })
        .to_string()
        .as_bytes(),
    );
    write(&out, "system/lib64/libfoo.so", &elf(1));
    write(&out, "vendor/lib64/libfoo.so", &elf(1));
    write(&out, "vendor/lib64/libbar.so", &elf(2));
    write(&out, "system/framework/arm64/boot.oat", &elf(3));
    write(
        &out,
        "obj/NOTICE.html",
        br#"<div class="file-list">/vendor/lib64/libfoo.so<br/></div>"#,
    );

    write(workdir, "external/foo/MODULE_LICENSE_APACHE2", b"");
    write(workdir, "external/foo/NOTICE", b"foo notice");
    write(workdir, "vendor/bar/bar.c", b"int bar;");
}

fn build_env() -> BuildEnvironment {
    BuildEnvironment {
        platform_version: "12".to_string(),
        out_dir: OUT_DIR.to_string(),
        notice_path: format!("{OUT_DIR}/obj/NOTICE.html"),
    }
}

#[test]
fn full_run_maps_licenses_dedups_and_writes_reports() {
    let tmp = tempdir().expect("temp dir");
    let workdir = tmp.path().join("src");
    build_tree(&workdir);

    let db_path = tmp.path().join("identity.db");
    {
        let db = SqliteIdentityDb::create(&db_path).expect("create identity db");
        let row = IdentityRow {
            file_name: "libfoo.so".to_string(),
            checksum: sha1_bytes(&elf(1)),
            tlsh: "0".to_string(),
            oss_name: "foo".to_string(),
            oss_version: "3.1".to_string(),
            license: "BSD-3-Clause".to_string(),
            platform_name: "android".to_string(),
            platform_version: "12".to_string(),
            ..IdentityRow::default()
        };
        db.insert_row(&row, "external/foo", "2024-02-02").expect("insert row");
    }

    let config = AuditConfig { workers: Some(2), ..AuditConfig::default() };
    let connector = SqliteConnector::new(&db_path);
    let repositories = FixedRepositories(RepositoryTable::default());
    let scanner = RecordingScanner { scanned: Mutex::new(Vec::new()) };
    let services = AuditServices {
        sniffer: &MagicSniffer,
        identity: Some(&connector),
        repositories: &repositories,
        scanner: &scanner,
    };
    let options = AuditOptions {
        deep_scan: true,
        infer_repository: true,
        find_unresolved: true,
        ..AuditOptions::default()
    };

    let ctx = AuditContext::new(&workdir, build_env());
    let outcome = run_audit(&ctx, &config, &options, &services).expect("audit run");

    assert_eq!(outcome.discovered, 4);
    let paths: Vec<&str> = outcome.records.iter().map(|r| r.installed_path.as_str()).collect();
    assert_eq!(paths, vec!["system/lib64/libfoo.so", "vendor/lib64/libbar.so"]);
    assert_eq!(outcome.removed.len(), 1);
    assert_eq!(outcome.removed[0].record.installed_path, "vendor/lib64/libfoo.so");

    let foo = &outcome.records[0];
    assert_eq!(foo.license.as_deref(), Some("Apache-2.0"));
    assert_eq!(foo.oss_name.as_deref(), Some("foo"));
    assert_eq!(foo.oss_version.as_deref(), Some("3.1"));
    assert_eq!(foo.notice, Some(NoticeStatus::Ok));
    assert!(!foo.is_new_binary);

    let bar = &outcome.records[1];
    assert!(bar.is_new_binary);
    assert!(bar.comment.starts_with("New Binary/"));
    assert_eq!(bar.license.as_deref(), Some("BSD-2-Clause,MIT"));
    let scanned = scanner.scanned.lock().expect("scanner lock");
    assert_eq!(scanned.len(), 1);
    assert!(scanned[0].ends_with("vendor/bar"));
    drop(scanned);

    assert!(outcome.unresolved.is_empty());
    assert!(outcome.find_report.is_none());

    let out_dir = tmp.path().join("reports");
    std::fs::create_dir_all(&out_dir).expect("mkdir reports");
    let summary = write_outputs(&outcome, &config, &out_dir, "240101_1200").expect("write outputs");
    assert_eq!(summary.binaries, 2);
    assert_eq!(summary.removed, 1);
    assert!(out_dir.join("binaudit_report_240101_1200.txt").is_file());
    assert!(out_dir.join("binaudit_report_240101_1200.csv").is_file());
    assert!(out_dir.join("REMOVED_BIN_BY_DUPLICATION_240101_1200.txt").is_file());
    assert!(summary.find_result.is_none());
}

#[test]
fn missing_module_info_aborts_the_run() {
    let tmp = tempdir().expect("temp dir");
    std::fs::create_dir_all(tmp.path().join(OUT_DIR)).expect("mkdir out");

    let config = AuditConfig::default();
    let repositories = FixedRepositories(RepositoryTable::default());
    let scanner = RecordingScanner { scanned: Mutex::new(Vec::new()) };
    let services = AuditServices {
        sniffer: &MagicSniffer,
        identity: None,
        repositories: &repositories,
        scanner: &scanner,
    };
    let ctx = AuditContext::new(tmp.path(), build_env());
    let result = run_audit(&ctx, &config, &AuditOptions::default(), &services);
    assert!(matches!(result, Err(AuditError::Manifest { .. })));
}

#[test]
fn deep_scan_skips_excluded_and_licensed_paths() {
    let tmp = tempdir().expect("temp dir");
    std::fs::create_dir_all(tmp.path().join("external/a")).expect("mkdir a");
    std::fs::create_dir_all(tmp.path().join("vendor/skip/b")).expect("mkdir b");

    let mut a = BinaryRecord::new("system/lib/liba.so", "x");
    a.source_path = Some("external/a".to_string());
    let mut a2 = a.clone();
    a2.installed_path = "vendor/lib/liba.so".to_string();
    let mut b = BinaryRecord::new("system/lib/libb.so", "x");
    b.source_path = Some("vendor/skip/b".to_string());
    let mut licensed = BinaryRecord::new("system/lib/libc.so", "x");
    licensed.source_path = Some("external/c".to_string());
    licensed.license = Some("MIT".to_string());

    let scanner = RecordingScanner { scanned: Mutex::new(Vec::new()) };
    let mut records = vec![a, a2, b, licensed];
    backfill_licenses(&mut records, tmp.path(), &scanner, &["vendor/skip".to_string()]);

    assert_eq!(scanner.scanned.lock().expect("lock").len(), 1);
    assert_eq!(records[0].license.as_deref(), Some("BSD-2-Clause,MIT"));
    assert_eq!(records[1].license.as_deref(), Some("BSD-2-Clause,MIT"));
    assert_eq!(records[2].license, None);
    assert_eq!(records[3].license.as_deref(), Some("MIT"));
}

#[test]
fn scanner_reports_are_flattened_to_unique_licenses() {
    let report = json!({
        "files": [
            {"path": "a.c", "license_detections": [
                {"license_expression_spdx": "Apache-2.0"},
                {"license_expression_spdx": "MIT"}
            ]},
            {"path": "b.c", "licenses": [{"spdx_license_key": "MIT"}, {"spdx_license_key": "Zlib"}]},
            {"path": "c.c", "detected_license_expression_spdx": "ISC"},
            {"path": "d.c"}
        ]
    });
    assert_eq!(licenses_from_report(&report), vec!["Apache-2.0", "MIT", "Zlib", "ISC"]);
}

#[test]
fn config_files_fill_defaults() {
    let tmp = tempdir().expect("temp dir");
    let path = tmp.path().join("binaudit.json");
    std::fs::write(&path, r#"{"fuzzy_tolerance": 90, "workers": 0, "platform_name": "Android"}"#)
        .expect("write config");
    let config = AuditConfig::load(&path).expect("load config");
    assert_eq!(config.fuzzy_tolerance, 90);
    assert_eq!(config.worker_count(), 1);
    assert_eq!(config.platform_name, "Android");
    assert!(config.is_skip_license("LGE License"));
    assert_eq!(config.license_tag_table.get("APACHE2").map(String::as_str), Some("Apache-2.0"));

    std::fs::write(&path, "{ not json").expect("write broken config");
    assert!(matches!(AuditConfig::load(&path), Err(AuditError::Config(_))));
}
