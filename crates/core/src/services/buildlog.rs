//! Build log scraping: platform version, build output root, and notice document path.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::error::{AuditError, AuditResult};

const NOTICE_SUFFIXES: &[&str] = &["obj/NOTICE.xml", "obj/NOTICE.html", "obj/NOTICE.txt"];

static PLATFORM_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*PLATFORM_VERSION\s*=\s*(\d+.?\d?)(.*\d*)\S*\s*").expect("platform version regex")
});
static INSTALLED_FILE_LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*Installed file list\s*(.*):\s*(.*)").expect("installed file list regex")
});

/// Facts recovered from an Android build log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    /// Platform version (`7.0`, `12`, ...); empty when the log does not say.
    pub platform_version: String,
    /// Build output root as written in the log, without a trailing slash
    /// (e.g. `out/target/product/generic`).
    pub out_dir: String,
    /// Notice document (or the directory holding notice documents).
    pub notice_path: String,
}

impl BuildEnvironment {
    /// Parse the relevant facts out of the log lines.
    pub fn from_log_lines<S: AsRef<str>>(lines: &[S]) -> AuditResult<Self> {
        let platform_version = lines
            .iter()
            .find_map(|line| {
                PLATFORM_VERSION_RE
                    .captures(line.as_ref().trim())
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .unwrap_or_default();

        let mut notice_path = String::new();
        let mut out_dir = String::new();
        for line in lines.iter().rev() {
            let line = line.as_ref().trim();
            if NOTICE_SUFFIXES.iter().any(|suffix| line.ends_with(suffix)) {
                if let Some(word) = line.split_whitespace().last() {
                    notice_path = word.to_string();
                    if let Some(idx) = notice_path.find("obj/") {
                        out_dir = notice_path[..idx].to_string();
                    }
                }
                break;
            }
        }

        if out_dir.is_empty() {
            out_dir = lines
                .iter()
                .rev()
                .find_map(|line| {
                    let caps = INSTALLED_FILE_LIST_RE.captures(line.as_ref())?;
                    let listed = caps.get(2)?.as_str().trim();
                    Path::new(listed).parent().map(|p| p.to_string_lossy().to_string())
                })
                .unwrap_or_default();
        }

        let out_dir = out_dir.trim().trim_end_matches('/').to_string();
        if out_dir.is_empty() {
            return Err(AuditError::BuildLog("Can't find a build output path.".to_string()));
        }
        if notice_path.is_empty() {
            notice_path = format!("{out_dir}/obj");
        }

        debug!(platform_version = %platform_version, out_dir = %out_dir, notice = %notice_path, "build log parsed");
        Ok(Self { platform_version, out_dir, notice_path })
    }

    /// Read a log file and parse it.
    pub fn from_log_file(path: &Path) -> AuditResult<Self> {
        let lines = read_log_lines(path)?;
        info!(log = %path.display(), lines = lines.len(), "read build log");
        Self::from_log_lines(&lines)
    }

    /// Absolute location of the build output root under `workdir`.
    pub fn out_root(&self, workdir: &Path) -> PathBuf {
        workdir.join(&self.out_dir)
    }
}

/// Read a text file as lines, tolerating non UTF-8 content.
///
/// An unreadable or empty file is an error.
pub fn read_log_lines(path: &Path) -> AuditResult<Vec<String>> {
    let bytes = std::fs::read(path).map_err(|e| AuditError::io(path, e))?;
    let text = decode_text(&bytes);
    if text.trim().is_empty() {
        return Err(AuditError::BuildLog(format!("{} is empty", path.display())));
    }
    Ok(text.lines().map(|l| l.to_string()).collect())
}

/// Decode bytes as UTF-8, falling back to Latin-1 for anything else.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
