//! Core data model for audited binaries.
//!
//! A [`BinaryRecord`] is created by discovery and enriched stage by stage.
//! Optional fields use `None` for "unknown"; an empty string is never used as
//! a stand-in for a missing value.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Printed form of an unavailable fuzzy hash.
pub const FUZZY_SENTINEL: &str = "0";

/// OSS name that is treated as "not yet specific" by repository inference.
pub const GENERIC_OSS_NAME: &str = "Android Open Source Project";

/// Sidecar notice file expected next to a module's sources.
pub const NOTICE_FILE_NAME: &str = "NOTICE";

/// Notice coverage verdict for a binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeStatus {
    /// Referenced in the notice document and a NOTICE file exists at the source path.
    #[serde(rename = "ok")]
    Ok,
    /// Referenced in the notice document; no NOTICE file at the source path.
    #[serde(rename = "ok(NA)")]
    OkNa,
    /// Not referenced, but a NOTICE file exists at the source path.
    #[serde(rename = "nok(NA)")]
    NokNa,
    /// Not referenced and no NOTICE file.
    #[serde(rename = "nok")]
    Nok,
}

impl NoticeStatus {
    /// The fixed two-flag verdict table.
    pub fn from_flags(in_notice_document: bool, notice_file_exists: bool) -> Self {
        match (in_notice_document, notice_file_exists) {
            (true, true) => NoticeStatus::Ok,
            (true, false) => NoticeStatus::OkNa,
            (false, true) => NoticeStatus::NokNa,
            (false, false) => NoticeStatus::Nok,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoticeStatus::Ok => "ok",
            NoticeStatus::OkNa => "ok(NA)",
            NoticeStatus::NokNa => "nok(NA)",
            NoticeStatus::Nok => "nok",
        }
    }

    /// `ok` or `ok(NA)`.
    pub fn is_covered(self) -> bool {
        matches!(self, NoticeStatus::Ok | NoticeStatus::OkNa)
    }
}

impl fmt::Display for NoticeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Approximate-similarity digest of a binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuzzyHash {
    /// The file could not be read or was too small / too uniform to hash.
    Unavailable,
    Digest(String),
}

impl FuzzyHash {
    /// Interpret a stored value, mapping the sentinel and empty strings to `Unavailable`.
    pub fn from_stored(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == FUZZY_SENTINEL || value.eq_ignore_ascii_case("TNULL") {
            FuzzyHash::Unavailable
        } else {
            FuzzyHash::Digest(value.to_string())
        }
    }

    pub fn digest(&self) -> Option<&str> {
        match self {
            FuzzyHash::Unavailable => None,
            FuzzyHash::Digest(d) => Some(d),
        }
    }
}

impl fmt::Display for FuzzyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuzzyHash::Unavailable => f.write_str(FUZZY_SENTINEL),
            FuzzyHash::Digest(d) => f.write_str(d),
        }
    }
}

/// Content fingerprints computed once per binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Lowercase SHA-1 hex; empty when the file could not be read.
    pub exact: String,
    pub fuzzy: FuzzyHash,
}

impl Fingerprint {
    /// Fingerprint of a file that could not be read.
    pub fn unreadable() -> Self {
        Self { exact: String::new(), fuzzy: FuzzyHash::Unavailable }
    }
}

/// One discovered build artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryRecord {
    /// Path relative to the build output root (e.g. `system/lib/libfoo.so`).
    pub installed_path: String,
    /// Location of the file as discovered, used for reading its bytes.
    pub file_path: PathBuf,
    pub basename: String,
    /// Originating source directory, relative to the source tree root.
    pub source_path: Option<String>,
    /// Directory holding the module's build file when it differs from `source_path`.
    pub mk_file_path: Option<String>,
    pub module_name: String,
    /// Set by the fingerprint stage; required by dedup and identity lookup.
    pub fingerprint: Option<Fingerprint>,
    pub license: Option<String>,
    pub oss_name: Option<String>,
    pub oss_version: Option<String>,
    /// `None` until notice coverage has been checked.
    pub notice: Option<NoticeStatus>,
    pub download_location: Option<String>,
    pub homepage: Option<String>,
    /// Accumulated diagnostic annotations.
    pub comment: String,
    /// Extra `name\tversion\tlicense` attributions.
    pub additional_oss_items: BTreeSet<String>,
    pub exclude: bool,
    /// True unless the identity database produced a candidate.
    pub is_new_binary: bool,
}

impl BinaryRecord {
    pub fn new(installed_path: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        let installed_path = installed_path.into();
        let basename = basename_of(&installed_path).to_string();
        let module_name = module_name_guess(&basename).to_string();
        Self {
            installed_path,
            file_path: file_path.into(),
            basename,
            source_path: None,
            mk_file_path: None,
            module_name,
            fingerprint: None,
            license: None,
            oss_name: None,
            oss_version: None,
            notice: None,
            download_location: None,
            homepage: None,
            comment: String::new(),
            additional_oss_items: BTreeSet::new(),
            exclude: false,
            is_new_binary: true,
        }
    }

    /// Source path, or `""` when unknown.
    pub fn source_path_str(&self) -> &str {
        self.source_path.as_deref().unwrap_or_default()
    }

    pub fn has_source_path(&self) -> bool {
        self.source_path.as_deref().is_some_and(|p| !p.is_empty())
    }

    pub fn license_str(&self) -> &str {
        self.license.as_deref().unwrap_or_default()
    }

    pub fn has_license(&self) -> bool {
        self.license.as_deref().is_some_and(|l| !l.is_empty())
    }

    pub fn oss_name_str(&self) -> &str {
        self.oss_name.as_deref().unwrap_or_default()
    }

    /// Exact hash, or `""` before fingerprinting / when unreadable.
    pub fn exact_hash(&self) -> &str {
        self.fingerprint.as_ref().map(|f| f.exact.as_str()).unwrap_or_default()
    }

    /// Printable fuzzy hash (sentinel when unavailable or not yet computed).
    pub fn fuzzy_hash_display(&self) -> String {
        self.fingerprint
            .as_ref()
            .map(|f| f.fuzzy.to_string())
            .unwrap_or_else(|| FUZZY_SENTINEL.to_string())
    }

    /// Key shared by bit-identical copies: exact hash followed by basename.
    pub fn duplicate_key(&self) -> String {
        format!("{}{}", self.exact_hash(), self.basename)
    }

    pub fn notice_str(&self) -> &'static str {
        self.notice.map(NoticeStatus::as_str).unwrap_or_default()
    }
}

/// Final path component of a `/`-separated path.
pub fn basename_of(path: &str) -> &str {
    Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or(path)
}

/// Module name derived from a file name: everything before the last `.`.
pub fn module_name_guess(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) => &file_name[..idx],
        None => file_name,
    }
}
