//! Exact and fuzzy content fingerprints.

use std::path::Path;

use sha1::{Digest, Sha1};
use tracing::debug;

use crate::model::{BinaryRecord, Fingerprint, FuzzyHash};
use crate::services::tlsh;

/// SHA-1 of a byte buffer as lowercase hex.
pub fn sha1_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Read a file once and compute both fingerprints.
///
/// Never fails: an unreadable file yields [`Fingerprint::unreadable`] and a
/// file the fuzzy algorithm refuses keeps its exact hash with an unavailable
/// fuzzy hash.
pub fn fingerprint_file(path: &Path) -> Fingerprint {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "cannot read binary for fingerprinting");
            return Fingerprint::unreadable();
        }
    };

    let fuzzy = match tlsh::hash_bytes(&bytes) {
        Some(digest) => FuzzyHash::Digest(digest),
        None => FuzzyHash::Unavailable,
    };
    Fingerprint { exact: sha1_bytes(&bytes), fuzzy }
}

/// Fingerprint stage: fill every record's fingerprint.
pub fn fingerprint_binaries(mut records: Vec<BinaryRecord>) -> Vec<BinaryRecord> {
    for record in &mut records {
        record.fingerprint = Some(fingerprint_file(&record.file_path));
    }
    records
}

/// Whether two fuzzy hashes are within `tolerance` of each other.
///
/// Always false when either side is unavailable, even if both are the
/// sentinel, and when either digest cannot be parsed.
pub fn fuzzy_match(a: &FuzzyHash, b: &FuzzyHash, tolerance: u32) -> bool {
    match (a.digest(), b.digest()) {
        (Some(a), Some(b)) => match tlsh::diff_digests(a, b) {
            Some(distance) => distance <= tolerance,
            None => {
                debug!(left = a, right = b, "fuzzy hash comparison failed");
                false
            }
        },
        _ => false,
    }
}
