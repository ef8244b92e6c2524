//! Duplicate binary elimination.
//!
//! Copies of one file installed at several paths share the duplicate key
//! (exact hash + basename). Each group keeps exactly one representative.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{AuditError, AuditResult};
use crate::model::{basename_of, BinaryRecord, FuzzyHash, NoticeStatus};
use crate::services::buildlog::decode_text;
use crate::services::fingerprint::fuzzy_match;

/// Installed-path prefix of the canonical system image.
pub const SYSTEM_IMAGE_PREFIX: &str = "system/";

const REMOVAL_TLSH_COLUMN: usize = 8;
const REMOVAL_SHA1_COLUMN: usize = 9;

/// Binaries an earlier run (or a user) asked to drop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalList {
    keys: BTreeSet<String>,
    fuzzy_by_name: HashMap<String, Vec<FuzzyHash>>,
}

impl RemovalList {
    /// Parse tab-separated rows: basename in column 0, fuzzy hash in column 8,
    /// exact hash in column 9. Short rows are logged and skipped.
    pub fn parse<S: AsRef<str>>(lines: &[S]) -> Self {
        let mut list = Self::default();
        for (idx, line) in lines.iter().enumerate() {
            let cells: Vec<&str> = line.as_ref().split('\t').collect();
            if cells.len() <= REMOVAL_SHA1_COLUMN {
                if !line.as_ref().trim().is_empty() {
                    error!(line = idx + 1, columns = cells.len(), "parsing removal list line");
                }
                continue;
            }
            let name = basename_of(cells[0]).to_string();
            let checksum = cells[REMOVAL_SHA1_COLUMN].trim();
            list.keys.insert(format!("{checksum}{name}"));
            list.fuzzy_by_name
                .entry(name)
                .or_default()
                .push(FuzzyHash::from_stored(cells[REMOVAL_TLSH_COLUMN]));
        }
        list
    }

    /// Load from a file; a missing file yields an empty list.
    pub fn load(path: &Path) -> AuditResult<Self> {
        if !path.is_file() {
            debug!(path = %path.display(), "can't find a file to remove");
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path).map_err(|e| AuditError::io(path, e))?;
        let text = decode_text(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        Ok(Self::parse(&lines))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, duplicate_key: &str) -> bool {
        self.keys.contains(duplicate_key)
    }

    /// Whether `fuzzy` is within `tolerance` of any listed hash for `basename`.
    pub fn matches_fuzzy(&self, basename: &str, fuzzy: &FuzzyHash, tolerance: u32) -> bool {
        self.fuzzy_by_name
            .get(basename)
            .is_some_and(|listed| listed.iter().any(|l| fuzzy_match(fuzzy, l, tolerance)))
    }
}

/// Why a binary left the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemovalReason {
    /// Duplicate key listed in the removal list.
    RequestedExact,
    /// Fuzzy hash within tolerance of a removal-list entry.
    RequestedFuzzy,
    /// A sibling copy was kept instead.
    Duplicate,
}

impl RemovalReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RemovalReason::RequestedExact => "removed by request",
            RemovalReason::RequestedFuzzy => "removed by request (similar)",
            RemovalReason::Duplicate => "duplicated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedBinary {
    pub reason: RemovalReason,
    pub record: BinaryRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupOutcome {
    pub survivors: Vec<BinaryRecord>,
    pub removed: Vec<RemovedBinary>,
}

impl DedupOutcome {
    /// Number of binaries dropped because of the removal list.
    pub fn removed_by_request(&self) -> usize {
        self.removed.iter().filter(|r| r.reason != RemovalReason::Duplicate).count()
    }
}

/// Shortest installed path wins; the earlier candidate keeps a tie.
fn shorter(current: Option<usize>, candidate: usize, members: &[BinaryRecord]) -> Option<usize> {
    match current {
        Some(cur) if members[cur].installed_path.len() <= members[candidate].installed_path.len() => {
            Some(cur)
        }
        _ => Some(candidate),
    }
}

/// Pick the representative of a duplicate group.
///
/// Tiers, first non-empty wins: under the system image, has a source path,
/// covered by the notice document, anything. Each tier keeps its shortest
/// installed path.
pub fn choose_survivor(members: &[BinaryRecord]) -> Option<usize> {
    let mut tiers: [Option<usize>; 4] = [None; 4];
    for (idx, member) in members.iter().enumerate() {
        if member.installed_path.starts_with(SYSTEM_IMAGE_PREFIX) {
            tiers[0] = shorter(tiers[0], idx, members);
        }
        if member.has_source_path() {
            tiers[1] = shorter(tiers[1], idx, members);
        }
        if member.notice.is_some_and(NoticeStatus::is_covered) {
            tiers[2] = shorter(tiers[2], idx, members);
        }
        tiers[3] = shorter(tiers[3], idx, members);
    }
    tiers.into_iter().flatten().next()
}

/// Deduplication stage.
pub fn deduplicate(
    records: Vec<BinaryRecord>,
    removal: &RemovalList,
    tolerance: u32,
) -> AuditResult<DedupOutcome> {
    if let Some(missing) = records.iter().find(|r| r.fingerprint.is_none()) {
        return Err(AuditError::Unfingerprinted(missing.installed_path.clone()));
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<BinaryRecord>> = HashMap::new();
    for record in records {
        let key = record.duplicate_key();
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        group.push(record);
    }

    let mut outcome = DedupOutcome::default();
    for key in order {
        let Some(members) = groups.remove(&key) else {
            continue;
        };

        if removal.contains_key(&key) {
            outcome.removed.extend(
                members
                    .into_iter()
                    .map(|record| RemovedBinary { reason: RemovalReason::RequestedExact, record }),
            );
            continue;
        }

        let (dropped, members): (Vec<_>, Vec<_>) = members.into_iter().partition(|m| {
            let fuzzy =
                m.fingerprint.as_ref().map(|f| f.fuzzy.clone()).unwrap_or(FuzzyHash::Unavailable);
            removal.matches_fuzzy(&m.basename, &fuzzy, tolerance)
        });
        outcome.removed.extend(
            dropped
                .into_iter()
                .map(|record| RemovedBinary { reason: RemovalReason::RequestedFuzzy, record }),
        );

        let Some(keep) = choose_survivor(&members) else {
            continue;
        };
        let covered_notice =
            members.iter().filter_map(|m| m.notice).filter(|n| n.is_covered()).last();

        for (idx, mut member) in members.into_iter().enumerate() {
            if idx != keep {
                outcome.removed.push(RemovedBinary { reason: RemovalReason::Duplicate, record: member });
                continue;
            }
            let uncovered = member.notice.is_some_and(|n| !n.is_covered());
            if let (true, Some(status)) = (uncovered, covered_notice) {
                member.notice = Some(status);
            }
            outcome.survivors.push(member);
        }
    }

    if !removal.is_empty() {
        warn!(
            removed = outcome.removed_by_request(),
            "number of files removed due to the removal list"
        );
    }
    debug!(
        survivors = outcome.survivors.len(),
        removed = outcome.removed.len(),
        "deduplication finished"
    );
    Ok(outcome)
}
