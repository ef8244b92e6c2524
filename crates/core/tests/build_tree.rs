// crates/core/tests/build_tree.rs

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use binaudit_core::services::buildlog::{read_log_lines, BuildEnvironment};
use binaudit_core::services::modules::{
    filter_unresolved, find_candidate_paths, map_binaries, normalize_source_paths,
    ModuleManifest,
};
use binaudit_core::services::pipeline::{parallel_map, split_chunks};
use binaudit_core::AuditError;
use tempfile::tempdir;

const OUT_DIR: &str = "out/target/product/gen";

const MODULE_INFO: &str = r#"{
  "libfoo": {
    "class": ["SHARED_LIBRARIES"],
    "path": ["external/foo"],
    "installed": ["out/target/product/gen/system/lib/libfoo.so"]
  },
  "toolbox_bin": {
    "path": ["system/core/toolbox/../toolbox"],
    "installed": ["out/target/product/gen/system/bin/toolbox"]
  }
}"#;

fn touch(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dirs");
    }
    std::fs::write(path, b"\x7fELF\x00\x00").expect("write file");
}

#[test]
fn build_log_yields_version_out_dir_and_notice() {
    let lines = [
        "============================================",
        "PLATFORM_VERSION_CODENAME=REL",
        "PLATFORM_VERSION=7.1.2",
        "Target system fs image: out/target/product/gen/obj/PACKAGING/system.img",
        "Combining NOTICE files into text: out/target/product/gen/obj/NOTICE.txt",
        "Combining NOTICE files into HTML: out/target/product/gen/obj/NOTICE.html",
    ];
    let build = BuildEnvironment::from_log_lines(&lines).expect("parse log");
    assert_eq!(build.platform_version, "7.1");
    assert_eq!(build.out_dir, OUT_DIR);
    assert_eq!(build.notice_path, "out/target/product/gen/obj/NOTICE.html");
    assert_eq!(build.out_root(Path::new("/src")), PathBuf::from("/src/out/target/product/gen"));
}

#[test]
fn build_log_falls_back_to_installed_file_list() {
    let lines = [
        "PLATFORM_VERSION=12",
        "Installed file list: out/target/product/gen/installed-files.txt",
    ];
    let build = BuildEnvironment::from_log_lines(&lines).expect("parse log");
    assert_eq!(build.platform_version, "12");
    assert_eq!(build.out_dir, OUT_DIR);
    assert_eq!(build.notice_path, "out/target/product/gen/obj");
}

#[test]
fn build_log_without_output_path_is_an_error() {
    let lines = ["PLATFORM_VERSION=12", "ninja: no work to do."];
    match BuildEnvironment::from_log_lines(&lines) {
        Err(AuditError::BuildLog(msg)) => assert!(msg.contains("build output path")),
        other => panic!("expected BuildLog error, got {other:?}"),
    }
}

#[test]
fn empty_log_file_is_an_error() {
    let tmp = tempdir().expect("temp dir");
    let log = tmp.path().join("android.log");
    std::fs::write(&log, "\n\n").expect("write log");
    assert!(read_log_lines(&log).is_err());

    std::fs::write(&log, b"PLATFORM_VERSION=9\n\xff\xfe latin-1 noise\n").expect("write log");
    let lines = read_log_lines(&log).expect("non UTF-8 log still reads");
    assert_eq!(lines.len(), 2);
}

#[test]
fn manifest_resolves_by_name_basename_and_installed_path() {
    let manifest = ModuleManifest::from_json(MODULE_INFO).expect("parse manifest");
    assert_eq!(manifest.len(), 2);

    let by_name = manifest
        .resolve("libfoo", "system/lib/libfoo.so", "libfoo.so", OUT_DIR)
        .expect("resolve by module name");
    assert_eq!(by_name.name, "libfoo");

    let by_installed = manifest
        .resolve("toolbox", "system/bin/toolbox", "toolbox", OUT_DIR)
        .expect("resolve by installed path");
    assert_eq!(by_installed.name, "toolbox_bin");

    assert!(manifest.resolve("", "system/bin/toolbox", "toolbox", OUT_DIR).is_none());
    assert!(manifest.resolve("libnone", "system/lib/libnone.so", "libnone.so", OUT_DIR).is_none());
}

#[test]
fn manifest_load_requires_module_info() {
    let tmp = tempdir().expect("temp dir");
    assert!(matches!(ModuleManifest::load(tmp.path()), Err(AuditError::Manifest { .. })));

    std::fs::write(tmp.path().join("module-info.json"), MODULE_INFO).expect("write manifest");
    assert_eq!(ModuleManifest::load(tmp.path()).expect("load").len(), 2);
}

#[test]
fn mapping_normalizing_and_filtering_records() {
    let tmp = tempdir().expect("temp dir");
    let workdir = tmp.path();
    let out_root = workdir.join(OUT_DIR);
    std::fs::create_dir_all(workdir.join("system/core/toolbox")).expect("mkdir toolbox");
    touch(&workdir.join("vendor/prebuilt/libmystery.so"));

    let manifest = ModuleManifest::from_json(MODULE_INFO).expect("parse manifest");
    let discovered: Vec<String> = [
        "system/lib/libfoo.so",
        "system/bin/toolbox",
        "system/framework/arm/boot.oat",
        "system/lib/libmystery.so",
        "obj/STATIC_LIBRARIES/libs_intermediates/libs.a",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let mut records = map_binaries(&discovered, &out_root, OUT_DIR, &manifest);
    assert_eq!(records[0].source_path.as_deref(), Some("external/foo"));
    assert_eq!(records[1].module_name, "toolbox_bin");
    assert_eq!(records[4].installed_path, "libs.a");
    assert_eq!(records[4].module_name, "libs");

    normalize_source_paths(&mut records, workdir);
    assert_eq!(records[0].mk_file_path.as_deref(), Some("external/foo"));
    assert_eq!(records[1].source_path.as_deref(), Some("system/core/toolbox"));
    assert_eq!(records[1].mk_file_path.as_deref(), Some("system/core/toolbox"));

    let (kept, unresolved) = filter_unresolved(records, &out_root);
    let kept_paths: Vec<&str> = kept.iter().map(|r| r.installed_path.as_str()).collect();
    assert!(!kept_paths.contains(&"system/framework/arm/boot.oat"));
    assert_eq!(kept.len(), 4);
    let expected: BTreeSet<String> =
        ["libmystery.so", "libs.a"].iter().map(|s| s.to_string()).collect();
    assert_eq!(unresolved, expected);

    let report = find_candidate_paths(&unresolved, workdir, OUT_DIR).expect("find report");
    assert_eq!(
        report.found.get("libmystery.so"),
        Some(&vec![PathBuf::from("vendor/prebuilt/libmystery.so")])
    );
    assert_eq!(report.found.get("libs.a"), Some(&Vec::new()));
    let text = report.render();
    assert!(text.starts_with("* SEARCHING TIME: "));
    assert!(text.contains("BINARY\tFOUND_PATH\n"));
    assert!(find_candidate_paths(&BTreeSet::new(), workdir, OUT_DIR).is_none());
}

#[cfg(unix)]
#[test]
fn symlink_to_listed_binary_is_dropped() {
    let tmp = tempdir().expect("temp dir");
    let out_root = tmp.path().join(OUT_DIR);
    touch(&out_root.join("system/lib/libfoo.so"));
    std::os::unix::fs::symlink(
        out_root.join("system/lib/libfoo.so"),
        out_root.join("system/lib/liblink.so"),
    )
    .expect("create symlink");

    let manifest = ModuleManifest::default();
    let discovered = vec!["system/lib/libfoo.so".to_string(), "system/lib/liblink.so".to_string()];
    let records = map_binaries(&discovered, &out_root, OUT_DIR, &manifest);
    let (kept, unresolved) = filter_unresolved(records, &out_root);

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].installed_path, "system/lib/libfoo.so");
    assert!(unresolved.contains("libfoo.so"));
    assert!(!unresolved.contains("liblink.so"));
}

#[test]
fn split_chunks_is_contiguous_and_balanced() {
    let chunks = split_chunks((0..10).collect::<Vec<_>>(), 3);
    assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]]);

    let chunks = split_chunks(vec!['a', 'b'], 5);
    assert_eq!(chunks, vec![vec!['a'], vec!['b']]);
    assert!(split_chunks(Vec::<u8>::new(), 4).is_empty());
}

#[test]
fn parallel_map_preserves_order() {
    let doubled: Vec<u32> = parallel_map((0..100).collect::<Vec<u32>>(), 4, |chunk| {
        chunk.into_iter().map(|x| x * 2).collect()
    });
    assert_eq!(doubled, (0..100).map(|x| x * 2).collect::<Vec<u32>>());

    let single: Vec<i32> = parallel_map(vec![1, 2, 3], 0, |chunk| chunk);
    assert_eq!(single, vec![1, 2, 3]);
}
