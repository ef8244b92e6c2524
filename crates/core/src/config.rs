use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};

/// Environment variable that overrides [`AuditConfig::identity_db_url`].
pub const IDENTITY_DB_ENV: &str = "BINAUDIT_DB_URL";

/// Maximum TLSH distance at which two binaries are considered the same.
pub const DEFAULT_FUZZY_TOLERANCE: u32 = 120;

/// Licenses that must never be auto-attributed to an open-source component.
pub const DEFAULT_SKIP_LICENSES: &[&str] =
    &["Other Proprietary License", "LGE License", "LGE Proprietary License"];

/// Default listing pages used to discover AOSP repository names.
pub const DEFAULT_REPOSITORY_URLS: &[&str] =
    &["https://android.googlesource.com/platform/", "https://android.googlesource.com/"];

/// Built-in `MODULE_LICENSE_<TAG>` → license mapping.
const DEFAULT_LICENSE_TAGS: &[(&str, &str)] = &[
    ("APACHE", "Apache-2.0"),
    ("APACHE2", "Apache-2.0"),
    ("BSD", "BSD-3-Clause"),
    ("BSD_LIKE", "BSD-3-Clause"),
    ("BSD_OR_LGPL", "BSD-3-Clause,LGPL-2.1"),
    ("CPL", "CPL-1.0"),
    ("EPL", "EPL-1.0"),
    ("GPL", "GPL-2.0"),
    ("GPL_AND_LGPL", "GPL-2.0,LGPL-2.1"),
    ("ICU", "ICU"),
    ("LGPL", "LGPL-2.1"),
    ("MIT", "MIT"),
    ("MPL", "MPL-2.0"),
    ("OPENSSL", "OpenSSL"),
    ("PROPRIETARY", "Other Proprietary License"),
    ("PUBLIC_DOMAIN", "Public Domain"),
    ("W3C", "W3C"),
    ("ZLIB", "Zlib"),
];

/// External source-license scanner invocation.
///
/// `{input}` and `{output}` in `args` are replaced with the directory to scan
/// and the JSON file the scanner must write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            program: "scancode".to_string(),
            args: ["-l", "--quiet", "--json-pp", "{output}", "{input}"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Serializable run configuration.
///
/// Every field has a default, so an empty JSON object (or no file at all) is
/// a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Connection string for the binary identity database.
    ///
    /// `postgres://...` / `host=...` selects PostgreSQL; `sqlite:<path>` or a
    /// path ending in `.db` / `.sqlite` selects a local SQLite snapshot.
    pub identity_db_url: Option<String>,
    /// Platform name used when ranking identity database rows.
    pub platform_name: String,
    /// Maximum TLSH distance treated as a match.
    pub fuzzy_tolerance: u32,
    /// Licenses excluded from OSS-name inference and notice reminders.
    pub skip_licenses: Vec<String>,
    /// `MODULE_LICENSE_<TAG>` suffix → canonical license.
    pub license_tag_table: BTreeMap<String, String>,
    /// Offline JSON (`{"repo/path": "url"}`) used when no other repository
    /// source is available.
    pub repository_table_path: Option<PathBuf>,
    /// Web pages listing repository names.
    pub repository_urls: Vec<String>,
    /// Source-license scanner used by the deep scan.
    pub source_scanner: ScannerConfig,
    /// Worker count override; defaults to available parallelism minus one.
    pub workers: Option<usize>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            identity_db_url: None,
            platform_name: "android".to_string(),
            fuzzy_tolerance: DEFAULT_FUZZY_TOLERANCE,
            skip_licenses: DEFAULT_SKIP_LICENSES.iter().map(|s| s.to_string()).collect(),
            license_tag_table: DEFAULT_LICENSE_TAGS
                .iter()
                .map(|(tag, license)| (tag.to_string(), license.to_string()))
                .collect(),
            repository_table_path: None,
            repository_urls: DEFAULT_REPOSITORY_URLS.iter().map(|s| s.to_string()).collect(),
            source_scanner: ScannerConfig::default(),
            workers: None,
        }
    }
}

impl AuditConfig {
    /// Load a configuration file, then apply environment overrides.
    pub fn load(path: &Path) -> AuditResult<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| AuditError::io(path, e))?;
        let config: AuditConfig = serde_json::from_str(&body)
            .map_err(|e| AuditError::Config(format!("{}: {e}", path.display())))?;
        Ok(config.with_env_overrides())
    }

    /// Apply `BINAUDIT_DB_URL` when set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(IDENTITY_DB_ENV) {
            if !url.trim().is_empty() {
                self.identity_db_url = Some(url);
            }
        }
        self
    }

    /// Whether a license string names a license that must not be attributed.
    pub fn is_skip_license(&self, license: &str) -> bool {
        self.skip_licenses.iter().any(|skip| skip == license)
    }

    /// Effective worker count: the override, else CPUs minus one, at least one.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1),
        }
    }
}
