use binaudit_core::model::{BinaryRecord, Fingerprint, FuzzyHash, NoticeStatus};
use binaudit_core::services::dedup::{
    choose_survivor, deduplicate, RemovalList, RemovalReason,
};
use binaudit_core::services::tlsh::hash_bytes;
use tempfile::tempdir;

fn record(installed: &str, exact: &str) -> BinaryRecord {
    let mut record = BinaryRecord::new(installed, installed);
    record.fingerprint =
        Some(Fingerprint { exact: exact.to_string(), fuzzy: FuzzyHash::Unavailable });
    record
}

fn installed_paths(records: &[BinaryRecord]) -> Vec<&str> {
    records.iter().map(|r| r.installed_path.as_str()).collect()
}

#[test]
fn system_copy_survives_and_inherits_notice_coverage() {
    let mut vendor = record("vendor/lib/libx.so", "h1");
    vendor.notice = Some(NoticeStatus::Ok);
    let mut system = record("system/lib/libx.so", "h1");
    system.notice = Some(NoticeStatus::Nok);
    let other = record("vendor/lib/liby.so", "h2");

    let outcome = deduplicate(vec![vendor, system, other], &RemovalList::default(), 120)
        .expect("dedup");

    assert_eq!(installed_paths(&outcome.survivors), vec!["system/lib/libx.so", "vendor/lib/liby.so"]);
    assert_eq!(outcome.survivors[0].notice, Some(NoticeStatus::Ok));
    assert_eq!(outcome.removed.len(), 1);
    assert_eq!(outcome.removed[0].reason, RemovalReason::Duplicate);
    assert_eq!(outcome.removed[0].record.installed_path, "vendor/lib/libx.so");
    assert_eq!(outcome.removed_by_request(), 0);
}

#[test]
fn tiers_fall_back_to_source_path_then_shortest() {
    let long = record("vendor/app/foo/lib/arm/libz.so", "h");
    let mut with_source = record("vendor/app/bar/lib/arm64/libz.so", "h");
    with_source.source_path = Some("external/z".to_string());
    let short = record("odm/lib/libz.so", "h");
    assert_eq!(choose_survivor(&[long.clone(), with_source, short.clone()]), Some(1));
    assert_eq!(choose_survivor(&[long, short]), Some(1));
    assert_eq!(choose_survivor(&[]), None);
}

#[test]
fn notice_coverage_ranks_below_source_path() {
    let short = record("odm/lib/libw.so", "h");
    let mut covered = record("vendor/lib64/hw/libw.so", "h");
    covered.notice = Some(NoticeStatus::OkNa);
    let mut uncovered = record("product/lib/libw.so", "h");
    uncovered.notice = Some(NoticeStatus::Nok);
    assert_eq!(choose_survivor(&[short.clone(), covered.clone(), uncovered]), Some(1));

    let mut with_source = record("vendor/app/w/lib/arm64/libw.so", "h");
    with_source.source_path = Some("external/w".to_string());
    assert_eq!(choose_survivor(&[short, covered, with_source]), Some(2));
}

#[test]
fn equal_lengths_keep_the_earlier_member() {
    let a = record("vendor/lib/liba.so", "h");
    let b = record("odm/lib/xy/liba.so", "h");
    assert_eq!(a.installed_path.len(), b.installed_path.len());
    assert_eq!(choose_survivor(&[a, b]), Some(0));
}

#[test]
fn removal_list_drops_whole_group_by_exact_key() {
    let lines = vec![
        "BINARY\tSOURCE\tNOTICE".to_string(),
        "system/lib/libx.so\tsrc\tok\tlic\toss\t1\t\t\t0\th1\t".to_string(),
    ];
    let removal = RemovalList::parse(&lines);
    assert!(removal.contains_key("h1libx.so"));

    let records = vec![record("system/lib/libx.so", "h1"), record("vendor/lib/libx.so", "h1")];
    let outcome = deduplicate(records, &removal, 120).expect("dedup");
    assert!(outcome.survivors.is_empty());
    assert_eq!(outcome.removed.len(), 2);
    assert!(outcome.removed.iter().all(|r| r.reason == RemovalReason::RequestedExact));
    assert_eq!(outcome.removed_by_request(), 2);
}

#[test]
fn removal_list_drops_similar_binaries() {
    let mut data = vec![0u8; 4096];
    let mut state = 0x1234_5678_u64;
    for byte in data.iter_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *byte = (state & 0xff) as u8;
    }
    let listed = hash_bytes(&data).expect("hashable");
    data[10] ^= 0x55;
    let current = hash_bytes(&data).expect("hashable");

    let lines = vec![format!("libfuzz.so\t\t\t\t\t\t\t\t{listed}\tother")];
    let removal = RemovalList::parse(&lines);

    let mut candidate = record("system/lib/libfuzz.so", "changed");
    candidate.fingerprint.as_mut().expect("fingerprint").fuzzy = FuzzyHash::Digest(current);
    let outcome = deduplicate(vec![candidate], &removal, 120).expect("dedup");
    assert!(outcome.survivors.is_empty());
    assert_eq!(outcome.removed[0].reason, RemovalReason::RequestedFuzzy);
}

#[test]
fn missing_removal_file_is_empty() {
    let tmp = tempdir().expect("temp dir");
    let removal = RemovalList::load(&tmp.path().join("absent.txt")).expect("load");
    assert!(removal.is_empty());

    let empty = tmp.path().join("empty.txt");
    std::fs::write(&empty, "").expect("write empty");
    assert!(RemovalList::load(&empty).expect("load empty").is_empty());
}

#[test]
fn dedup_is_idempotent() {
    let records = vec![
        record("system/lib/libx.so", "h1"),
        record("vendor/lib/libx.so", "h1"),
        record("system/bin/tool", "h3"),
    ];
    let first = deduplicate(records, &RemovalList::default(), 120).expect("first pass");
    let second =
        deduplicate(first.survivors.clone(), &RemovalList::default(), 120).expect("second pass");
    assert_eq!(first.survivors, second.survivors);
    assert!(second.removed.is_empty());
}

#[test]
fn unfingerprinted_record_is_an_error() {
    let bare = BinaryRecord::new("system/lib/libx.so", "system/lib/libx.so");
    assert!(deduplicate(vec![bare], &RemovalList::default(), 120).is_err());
}
