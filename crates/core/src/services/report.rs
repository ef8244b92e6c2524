//! Report rows and output files.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{AuditError, AuditResult};
use crate::model::{BinaryRecord, NoticeStatus};
use crate::services::dedup::RemovedBinary;

/// Header of the tab-separated text report.
pub const TEXT_HEADER: &[&str] = &[
    "Binary Name",
    "Source Code Path",
    "NOTICE.html",
    "OSS Name",
    "OSS Version",
    "License",
    "Need Check",
    "Comment",
    "tlsh",
    "checksum",
];

/// Header of the spreadsheet report.
pub const SHEET_HEADER: &[&str] = &[
    "ID",
    "Binary Name",
    "Source Code Path",
    "NOTICE.html",
    "OSS Name",
    "OSS Version",
    "License",
    "Download Location",
    "Homepage",
    "Copyright Text",
    "License Text",
    "Exclude",
    "Comment",
    "Need Check",
    "TLSH",
    "SHA1",
];

/// One printed line of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub binary: String,
    pub source_path: String,
    pub notice: String,
    pub oss_name: String,
    pub oss_version: String,
    pub license: String,
    pub download_location: String,
    pub homepage: String,
    pub exclude: bool,
    pub need_check: bool,
    pub comment: String,
    pub tlsh: String,
    pub sha1: String,
}

impl ReportRow {
    pub fn text_cells(&self) -> Vec<&str> {
        vec![
            self.binary.as_str(),
            self.source_path.as_str(),
            self.notice.as_str(),
            self.oss_name.as_str(),
            self.oss_version.as_str(),
            self.license.as_str(),
            if self.need_check { "O" } else { "" },
            self.comment.as_str(),
            self.tlsh.as_str(),
            self.sha1.as_str(),
        ]
    }

    pub fn to_text_line(&self) -> String {
        self.text_cells().join("\t")
    }

    fn sheet_cells(&self, id: usize) -> Vec<String> {
        vec![
            id.to_string(),
            self.binary.clone(),
            self.source_path.clone(),
            self.notice.clone(),
            self.oss_name.clone(),
            self.oss_version.clone(),
            self.license.clone(),
            self.download_location.clone(),
            self.homepage.clone(),
            String::new(),
            String::new(),
            if self.exclude { "Exclude".to_string() } else { String::new() },
            self.comment.clone(),
            if self.need_check { "O".to_string() } else { String::new() },
            self.tlsh.clone(),
            self.sha1.clone(),
        ]
    }
}

/// Whether any comma-separated component of `license` is a skip license.
fn licensed_for_notice(license: &str, skip_licenses: &[String]) -> bool {
    !license.split(',').any(|item| skip_licenses.iter().any(|skip| skip == item))
}

/// Diagnostic comment for a record: the accumulated comment followed by
/// `Fill in ...` and notice reminders.
pub fn synthesize_comment(record: &BinaryRecord, skip_licenses: &[String]) -> String {
    let license = record.license_str();
    let to_notice = license.is_empty() || licensed_for_notice(license, skip_licenses);

    let mut empty = Vec::new();
    if license.is_empty() {
        empty.push("License");
    }
    if record.oss_name_str().is_empty() && to_notice {
        empty.push("OSS Name");
    }
    if !record.has_source_path() {
        empty.push("Source Code Path");
    }

    let mut parts = Vec::new();
    if !empty.is_empty() {
        parts.push(format!("Fill in {}.", empty.join(",")));
    }
    if to_notice {
        match record.notice {
            Some(NoticeStatus::Nok) => parts.push("Add NOTICE to path.".to_string()),
            Some(NoticeStatus::NokNa) => parts.push("Add NOTICE to proper path.".to_string()),
            _ => {}
        }
    }
    format!("{}{}", record.comment, parts.join("/"))
}

/// Rows for one record: the main row plus one per additional OSS item.
pub fn rows_for(record: &BinaryRecord, skip_licenses: &[String]) -> Vec<ReportRow> {
    let comment = synthesize_comment(record, skip_licenses);
    let main = ReportRow {
        binary: record.installed_path.clone(),
        source_path: record.source_path_str().to_string(),
        notice: record.notice_str().to_string(),
        oss_name: record.oss_name_str().to_string(),
        oss_version: record.oss_version.clone().unwrap_or_default(),
        license: record.license_str().to_string(),
        download_location: record.download_location.clone().unwrap_or_default(),
        homepage: record.homepage.clone().unwrap_or_default(),
        exclude: record.exclude,
        need_check: !comment.is_empty(),
        comment,
        tlsh: record.fuzzy_hash_display(),
        sha1: record.exact_hash().to_string(),
    };

    let mut rows = Vec::with_capacity(1 + record.additional_oss_items.len());
    for item in &record.additional_oss_items {
        let mut cells = item.split('\t');
        rows.push(ReportRow {
            oss_name: cells.next().unwrap_or_default().to_string(),
            oss_version: cells.next().unwrap_or_default().to_string(),
            license: cells.next().unwrap_or_default().to_string(),
            download_location: String::new(),
            homepage: String::new(),
            exclude: false,
            ..main.clone()
        });
    }
    rows.insert(0, main);
    rows
}

/// Records in report order: by source path, then installed path.
pub fn sorted_records(records: &[BinaryRecord]) -> Vec<&BinaryRecord> {
    let mut sorted: Vec<&BinaryRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        (a.source_path_str(), a.installed_path.as_str())
            .cmp(&(b.source_path_str(), b.installed_path.as_str()))
    });
    sorted
}

/// Paths of the written report files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFiles {
    pub text: Option<PathBuf>,
    pub sheet: Option<PathBuf>,
}

/// Write `<stem>.txt` and `<stem>.csv`. Nothing is written for an empty
/// result.
pub fn write_reports(
    records: &[BinaryRecord],
    skip_licenses: &[String],
    output_dir: &Path,
    stem: &str,
) -> AuditResult<ReportFiles> {
    if records.is_empty() {
        warn!("Nothing is detected from the scanner so output file is not generated.");
        return Ok(ReportFiles::default());
    }

    let rows: Vec<ReportRow> =
        sorted_records(records).into_iter().flat_map(|r| rows_for(r, skip_licenses)).collect();

    let text_path = output_dir.join(format!("{stem}.txt"));
    let mut body = TEXT_HEADER.join("\t");
    for row in &rows {
        body.push('\n');
        body.push_str(&row.to_text_line());
    }
    write_text(&text_path, &body)?;

    let sheet_path = output_dir.join(format!("{stem}.csv"));
    let mut writer = csv::Writer::from_path(&sheet_path)?;
    writer.write_record(SHEET_HEADER)?;
    for (idx, row) in rows.iter().enumerate() {
        writer.write_record(row.sheet_cells(idx + 1))?;
    }
    writer.flush().map_err(|e| AuditError::io(&sheet_path, e))?;

    Ok(ReportFiles { text: Some(text_path), sheet: Some(sheet_path) })
}

/// Write the removed-binaries log: text rows with the removal reason
/// appended. Returns `None` when nothing was removed.
pub fn write_removed_log(
    removed: &[RemovedBinary],
    skip_licenses: &[String],
    path: &Path,
) -> AuditResult<Option<PathBuf>> {
    if removed.is_empty() {
        return Ok(None);
    }
    let mut body = String::new();
    for entry in removed {
        for row in rows_for(&entry.record, skip_licenses) {
            body.push_str(&row.to_text_line());
            body.push('\t');
            body.push_str(entry.reason.as_str());
            body.push('\n');
        }
    }
    write_text(path, &body)?;
    Ok(Some(path.to_path_buf()))
}

pub fn write_text(path: &Path, body: &str) -> AuditResult<()> {
    let mut file = File::create(path).map_err(|e| AuditError::io(path, e))?;
    file.write_all(body.as_bytes()).map_err(|e| AuditError::io(path, e))
}
