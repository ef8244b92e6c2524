//! Packaging content check: prohibited file names, extensions and paths in a
//! delivery tree, including the contents of tar, tar.gz and zip archives.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use flate2::read::GzDecoder;
use serde::Deserialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{AuditError, AuditResult};

/// Separator between an archive and an entry inside it in reported paths.
pub const ARCHIVE_ENTRY_SEPARATOR: &str = "!/";

/// Prohibited-content rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PackagingRules {
    #[serde(rename = "Prohibited_File_Names", default)]
    pub file_names: Vec<String>,
    #[serde(rename = "Prohibited_File_Extensions", default)]
    pub file_extensions: Vec<String>,
    #[serde(rename = "Prohibited_Path", default)]
    pub paths: Vec<String>,
}

impl PackagingRules {
    /// Load the rules file. A missing, empty or malformed file is fatal.
    pub fn load(path: &Path) -> AuditResult<Self> {
        let body = std::fs::read_to_string(path).map_err(|e| AuditError::io(path, e))?;
        if body.trim().is_empty() {
            return Err(AuditError::Config(format!(
                "packaging config {} is empty",
                path.display()
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| AuditError::Config(format!("{}: {e}", path.display())))
    }

    fn name_hit(&self, file_name: &str) -> bool {
        self.file_names.iter().any(|n| !n.is_empty() && file_name.contains(n.as_str()))
    }

    fn extension_hit(&self, file_name: &str) -> bool {
        self.file_extensions.iter().any(|ext| file_name.ends_with(&format!(".{ext}")))
    }

    fn path_hit(&self, dir: &str) -> bool {
        self.paths.iter().any(|p| !p.is_empty() && dir.contains(p.as_str()))
    }
}

/// Findings, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackagingReport {
    pub prohibited_names: Vec<String>,
    pub prohibited_extensions: Vec<String>,
    pub prohibited_paths: Vec<String>,
    pub unreadable: Vec<String>,
}

impl PackagingReport {
    /// Log the four result sections.
    pub fn log(&self) {
        let sections = [
            ("1. Prohibited file names", &self.prohibited_names),
            ("2. Prohibited file extension", &self.prohibited_extensions),
            ("3. Prohibited Path", &self.prohibited_paths),
            ("4. Fail to read", &self.unreadable),
        ];
        for (title, items) in sections {
            warn!("{title} :{}", items.len());
            if !items.is_empty() {
                warn!("{}", items.join("\n"));
            }
        }
    }

    fn check_file(&mut self, rules: &PackagingRules, display: &str, file_name: &str) {
        if rules.name_hit(file_name) {
            self.prohibited_names.push(display.to_string());
        }
        if rules.extension_hit(file_name) {
            self.prohibited_extensions.push(display.to_string());
        }
    }

    fn check_dir(&mut self, rules: &PackagingRules, display: &str) {
        if rules.path_hit(display) {
            self.prohibited_paths.push(display.to_string());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Tar,
    TarGz,
    Zip,
}

fn archive_kind(name: &str) -> Option<ArchiveKind> {
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else if name.ends_with(".tar") {
        Some(ArchiveKind::Tar)
    } else if name.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else {
        None
    }
}

/// Check a directory tree or a single archive.
pub fn check_packaging(root: &Path, rules: &PackagingRules) -> PackagingReport {
    let mut report = PackagingReport::default();
    if root.is_file() {
        check_archive_file(root, rules, &mut report);
        return report;
    }
    if !root.is_dir() {
        report.unreadable.push(root.display().to_string());
        return report;
    }

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                debug!(path = %path, error = %e, "walk error");
                report.unreadable.push(path);
                continue;
            }
        };
        let display = entry.path().display().to_string();
        if entry.file_type().is_dir() {
            report.check_dir(rules, &display);
            continue;
        }
        let file_name = entry.file_name().to_string_lossy();
        report.check_file(rules, &display, &file_name);
        if archive_kind(&file_name).is_some() {
            check_archive_file(entry.path(), rules, &mut report);
        }
    }
    report
}

fn check_archive_file(path: &Path, rules: &PackagingRules, report: &mut PackagingReport) {
    let label = path.display().to_string();
    let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    let Some(kind) = archive_kind(&name) else {
        report.unreadable.push(label);
        return;
    };
    let result = File::open(path)
        .map_err(|e| e.to_string())
        .and_then(|file| inspect_archive(file, kind, &label, rules, report));
    if let Err(e) = result {
        debug!(archive = %label, error = %e, "cannot read archive");
        report.unreadable.push(label);
    }
}

fn inspect_archive<R: Read + Seek>(
    reader: R,
    kind: ArchiveKind,
    label: &str,
    rules: &PackagingRules,
    report: &mut PackagingReport,
) -> Result<(), String> {
    match kind {
        ArchiveKind::Tar => inspect_tar(reader, label, rules, report),
        ArchiveKind::TarGz => inspect_tar(GzDecoder::new(reader), label, rules, report),
        ArchiveKind::Zip => inspect_zip(reader, label, rules, report),
    }
}

fn inspect_tar<R: Read>(
    reader: R,
    label: &str,
    rules: &PackagingRules,
    report: &mut PackagingReport,
) -> Result<(), String> {
    let mut archive = tar::Archive::new(reader);
    let mut dirs = BTreeSet::new();
    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let entry_path = entry.path().map_err(|e| e.to_string())?.to_string_lossy().to_string();
        let is_dir = entry.header().entry_type().is_dir();
        let nested = visit_entry(&entry_path, is_dir, label, rules, report, &mut dirs);
        if let Some(kind) = nested {
            let mut bytes = Vec::new();
            let nested_label = format!("{label}{ARCHIVE_ENTRY_SEPARATOR}{entry_path}");
            match entry.read_to_end(&mut bytes) {
                Ok(_) => inspect_nested(bytes, kind, &nested_label, rules, report),
                Err(_) => report.unreadable.push(nested_label),
            }
        }
    }
    Ok(())
}

fn inspect_zip<R: Read + Seek>(
    reader: R,
    label: &str,
    rules: &PackagingRules,
    report: &mut PackagingReport,
) -> Result<(), String> {
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| e.to_string())?;
    let mut dirs = BTreeSet::new();
    for idx in 0..archive.len() {
        let mut entry = archive.by_index(idx).map_err(|e| e.to_string())?;
        let entry_path = entry.name().to_string();
        let nested = visit_entry(&entry_path, entry.is_dir(), label, rules, report, &mut dirs);
        if let Some(kind) = nested {
            let mut bytes = Vec::new();
            let nested_label = format!("{label}{ARCHIVE_ENTRY_SEPARATOR}{entry_path}");
            match entry.read_to_end(&mut bytes) {
                Ok(_) => inspect_nested(bytes, kind, &nested_label, rules, report),
                Err(_) => report.unreadable.push(nested_label),
            }
        }
    }
    Ok(())
}

fn inspect_nested(
    bytes: Vec<u8>,
    kind: ArchiveKind,
    label: &str,
    rules: &PackagingRules,
    report: &mut PackagingReport,
) {
    if let Err(e) = inspect_archive(Cursor::new(bytes), kind, label, rules, report) {
        debug!(archive = %label, error = %e, "cannot read nested archive");
        report.unreadable.push(label.to_string());
    }
}

/// Apply the rules to one archive entry and its parent directories.
///
/// Returns the archive kind when the entry is itself an archive.
fn visit_entry(
    entry_path: &str,
    is_dir: bool,
    label: &str,
    rules: &PackagingRules,
    report: &mut PackagingReport,
    seen_dirs: &mut BTreeSet<String>,
) -> Option<ArchiveKind> {
    let trimmed = entry_path.trim_end_matches('/');
    let mut segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    let file_name = if is_dir { None } else { segments.pop() };

    for depth in 1..=segments.len() {
        let dir = segments[..depth].join("/");
        if seen_dirs.insert(dir.clone()) {
            report.check_dir(rules, &format!("{label}{ARCHIVE_ENTRY_SEPARATOR}{dir}"));
        }
    }

    let file_name = file_name?;
    let display = format!("{label}{ARCHIVE_ENTRY_SEPARATOR}{trimmed}");
    report.check_file(rules, &display, file_name);
    archive_kind(file_name)
}
