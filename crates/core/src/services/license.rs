//! License resolution from build-tree evidence: module license tag files and
//! legal metadata (`.meta_lic`) files.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::model::{module_name_guess, BinaryRecord};
use crate::services::buildlog::decode_text;

/// Prefix of license tag marker files placed in a module's source directory.
pub const MODULE_LICENSE_PREFIX: &str = "MODULE_LICENSE_";

const META_LIC_EXTENSION: &str = ".meta_lic";
const LEGACY_PREFIX: &str = "legacy_";
const SPDX_PREFIX: &str = "SPDX-license-identifier-";

/// License recovered from the `MODULE_LICENSE_*` marker files in `source_dir`.
///
/// When several markers exist the last one listed wins. Tags are mapped
/// through `tag_table`; unknown tags are used verbatim.
pub fn license_from_tag_files(
    source_dir: &Path,
    tag_table: &BTreeMap<String, String>,
) -> Option<String> {
    let entries = std::fs::read_dir(source_dir).ok()?;
    let mut license = None;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(tag) = name.strip_prefix(MODULE_LICENSE_PREFIX) {
            license = Some(tag_table.get(tag).cloned().unwrap_or_else(|| tag.to_string()));
        }
    }
    license.filter(|l| !l.is_empty())
}

static LICENSE_KINDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^license_kinds:\s*"(.+)""#).expect("license_kinds regex"));

/// Licenses declared by build metadata files, keyed by module name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaLicenseIndex {
    licenses: HashMap<String, String>,
}

impl MetaLicenseIndex {
    /// Scan every `*.meta_lic` file under `<out_root>/obj`.
    pub fn scan(out_root: &Path) -> Self {
        let mut licenses = HashMap::new();
        let obj = out_root.join("obj");
        if !obj.is_dir() {
            return Self { licenses };
        }

        for entry in WalkDir::new(&obj).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            let Some(key) = file_name.strip_suffix(META_LIC_EXTENSION) else {
                continue;
            };
            let body = match std::fs::read(entry.path()) {
                Ok(bytes) => decode_text(&bytes),
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "cannot read meta_lic");
                    continue;
                }
            };
            if let Some(license) = parse_license_kinds(&body) {
                licenses.insert(key.to_string(), license);
            }
        }

        info!(modules = licenses.len(), "indexed legal metadata files");
        Self { licenses }
    }

    pub fn from_map(licenses: HashMap<String, String>) -> Self {
        Self { licenses }
    }

    pub fn len(&self) -> usize {
        self.licenses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.licenses.is_empty()
    }

    /// License for a module, falling back to the binary's stem when the module
    /// name is not indexed.
    pub fn lookup(&self, module_name: &str, basename: &str) -> Option<&str> {
        let key = if self.licenses.contains_key(module_name) {
            module_name
        } else {
            module_name_guess(basename)
        };
        self.licenses.get(key).map(String::as_str)
    }
}

/// Comma-joined license identifiers from a metadata file body.
///
/// `legacy_*` kinds are dropped and the SPDX identifier prefix is stripped.
pub fn parse_license_kinds(body: &str) -> Option<String> {
    let kinds: Vec<String> = body
        .lines()
        .filter_map(|line| LICENSE_KINDS_RE.captures(line.trim()))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|kind| !kind.starts_with(LEGACY_PREFIX))
        .map(|kind| kind.replace(SPDX_PREFIX, ""))
        .filter(|kind| !kind.is_empty())
        .collect();
    (!kinds.is_empty()).then(|| kinds.join(","))
}

/// License stage: tag files first, then the metadata index.
pub fn resolve_build_licenses(
    mut records: Vec<BinaryRecord>,
    workdir: &Path,
    tag_table: &BTreeMap<String, String>,
    meta: &MetaLicenseIndex,
) -> Vec<BinaryRecord> {
    for record in &mut records {
        let from_tags = record
            .source_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .and_then(|p| license_from_tag_files(&workdir.join(p), tag_table));
        record.license = from_tags.or_else(|| {
            meta.lookup(&record.module_name, &record.basename).map(str::to_string)
        });
    }
    records
}
