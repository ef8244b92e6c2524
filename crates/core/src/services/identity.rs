//! Identity database resolution of OSS name, version and license.

use tracing::{debug, warn};

use crate::db::{IdentityConnector, IdentityDatabase, IdentityDbResult, IdentityRow, RankContext};
use crate::error::{AuditError, AuditResult};
use crate::model::{BinaryRecord, FuzzyHash};
use crate::services::fingerprint::fuzzy_match;
use crate::services::pipeline::parallel_map;

/// Comment appended when the database has never seen a file of this name.
pub const NEW_BINARY_COMMENT: &str = "New Binary/";

/// Query settings shared by every lookup in a run.
#[derive(Debug, Clone)]
pub struct IdentityQuery {
    pub platform_name: String,
    pub platform_version: String,
    pub fuzzy_tolerance: u32,
}

/// Result of looking up one binary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMatch {
    pub rows: Vec<IdentityRow>,
    pub comment: String,
    pub is_new: bool,
}

/// Look one binary up: exact checksum first, then ranked fuzzy candidates.
pub fn lookup_binary(
    db: &mut dyn IdentityDatabase,
    record: &BinaryRecord,
    query: &IdentityQuery,
) -> IdentityDbResult<IdentityMatch> {
    let file_name = record.basename.as_str();
    let fuzzy = record
        .fingerprint
        .as_ref()
        .map(|f| f.fuzzy.clone())
        .unwrap_or(FuzzyHash::Unavailable);

    let exact = db.find_exact(file_name, record.exact_hash())?;
    if !exact.is_empty() {
        return Ok(IdentityMatch { rows: exact, ..IdentityMatch::default() });
    }

    let rank = RankContext {
        source_path: record.source_path_str(),
        platform_name: &query.platform_name,
        platform_version: &query.platform_version,
    };
    let candidates = db.ranked_fuzzy_hashes(file_name, &rank)?;
    if candidates.is_empty() {
        return Ok(IdentityMatch {
            rows: Vec::new(),
            comment: NEW_BINARY_COMMENT.to_string(),
            is_new: true,
        });
    }
    if fuzzy == FuzzyHash::Unavailable {
        return Ok(IdentityMatch::default());
    }

    let matched = candidates.iter().find(|candidate| {
        let stored = FuzzyHash::from_stored(candidate);
        let hit = fuzzy_match(&stored, &fuzzy, query.fuzzy_tolerance);
        if !hit {
            debug!(binary = %file_name, candidate = %candidate, "fuzzy candidate rejected");
        }
        hit
    });
    let rows = match matched {
        Some(tlsh) => db.find_by_fuzzy(file_name, tlsh)?,
        None => Vec::new(),
    };
    Ok(IdentityMatch { rows, ..IdentityMatch::default() })
}

/// Fold a lookup result into the record.
///
/// The first row sets OSS name and version (and the license only when none
/// is known yet); further rows become additional OSS items.
pub fn apply_match(record: &mut BinaryRecord, found: IdentityMatch) {
    record.comment.push_str(&found.comment);
    record.is_new_binary = found.is_new;

    let mut rows = found.rows.into_iter();
    if let Some(first) = rows.next() {
        record.oss_name = Some(first.oss_name);
        record.oss_version = Some(first.oss_version);
        if !record.has_license() && !first.license.is_empty() {
            record.license = Some(first.license);
        }
    }
    for row in rows {
        record
            .additional_oss_items
            .insert(format!("{}\t{}\t{}", row.oss_name, row.oss_version, row.license));
    }
}

/// Identity stage.
///
/// Each worker opens its own connection. When a connection cannot be opened
/// the chunk is passed through untouched; a failed lookup leaves only that
/// record untouched.
pub fn resolve_identities(
    records: Vec<BinaryRecord>,
    connector: &dyn IdentityConnector,
    query: &IdentityQuery,
    workers: usize,
) -> AuditResult<Vec<BinaryRecord>> {
    if let Some(missing) = records.iter().find(|r| r.fingerprint.is_none()) {
        return Err(AuditError::Unfingerprinted(missing.installed_path.clone()));
    }

    Ok(parallel_map(records, workers, |mut chunk| {
        let mut db = match connector.connect() {
            Ok(db) => db,
            Err(e) => {
                warn!(backend = connector.name(), error = %e, "identity database unavailable");
                return chunk;
            }
        };
        for record in &mut chunk {
            match lookup_binary(db.as_mut(), record, query) {
                Ok(found) => apply_match(record, found),
                Err(e) => warn!(binary = %record.installed_path, error = %e, "identity lookup failed"),
            }
        }
        chunk
    }))
}
