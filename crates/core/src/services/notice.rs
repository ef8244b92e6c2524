//! Notice document reading and coverage checks.
//!
//! A notice document (NOTICE.html / NOTICE.xml, possibly gzipped) lists the
//! installed files whose licenses it reproduces. Every binary is checked
//! against that list and against a sidecar `NOTICE` file in its source path.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use flate2::read::GzDecoder;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{AuditError, AuditResult};
use crate::model::{basename_of, BinaryRecord, NoticeStatus, NOTICE_FILE_NAME};
use crate::services::buildlog::decode_text;
use crate::services::pipeline::parallel_map;
use crate::services::report::write_text;

/// Output of `--toadd`: notice fragments for binaries that need them.
pub const ADDITIONAL_NOTICE_FILE_NAME: &str = "needtoadd-notice.html";

const NOTICE_DOCUMENT_EXTENSIONS: &[&str] = &[".html", ".xml"];
const PLAIN_NOTICE_NAME: &str = "NOTICE.txt";

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid notice pattern")
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| regex(r"<[^>]*>"));
static APEX_RE: LazyLock<Regex> = LazyLock::new(|| regex(r"apex/([^/]+)/"));
static XML_FILE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?s)<file-name[^>]*>(.*?)</file-name>"));
static HTML_BLOCK_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        regex(r#"(?is)<div[^>]*class\s*=\s*"?file-list"?[^>]*>(.*?)</div>"#),
        regex(r"(?is)<strong[^>]*>(.*?)</strong>"),
        regex(r#"(?is)<ul[^>]*class\s*=\s*"?file-list"?[^>]*>(.*?)</ul>"#),
    ]
});
static EN_US_SPAN_RE: LazyLock<Regex> =
    LazyLock::new(|| regex(r#"(?is)<span[^>]*lang\s*=\s*"?EN-US"?[^>]*>(.*?)</span>"#));
static ROW_RE: LazyLock<Regex> = LazyLock::new(|| regex(r"(?is)<tr[^>]*>(.*?)</tr>"));
static LICENSE_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| regex(r#"(?is)<pre[^>]*class\s*=\s*"?license-text"?[^>]*>(.*?)</pre>"#));

/// File references collected from one or more notice documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoticeIndex {
    files: BTreeSet<String>,
    basenames: BTreeSet<String>,
    /// Documents that contributed entries, excluding plain-text notices.
    pub documents: Vec<PathBuf>,
}

impl NoticeIndex {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut index = Self::default();
        for entry in entries {
            index.insert(entry.into());
        }
        index
    }

    fn insert(&mut self, entry: String) {
        if entry.is_empty() {
            return;
        }
        self.basenames.insert(basename_of(&entry).to_string());
        self.files.insert(entry);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Read `notice_path`: a document, a directory of documents, or both
    /// (a document plus every sibling document).
    pub fn load(notice_path: &Path) -> Self {
        let mut index = Self::default();
        for document in collect_documents(notice_path) {
            let bytes = match std::fs::read(&document) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(path = %document.display(), error = %e, "cannot read notice document");
                    continue;
                }
            };
            let body = decode_text(&bytes);
            if body.is_empty() {
                info!(path = %document.display(), "notice file is empty");
                continue;
            }
            let entries = if document.to_string_lossy().ends_with("xml") {
                parse_notice_xml(&body)
            } else {
                parse_notice_html(&body)
            };
            for entry in entries {
                index.insert(entry);
            }
            if !document.to_string_lossy().contains(PLAIN_NOTICE_NAME) {
                index.documents.push(document);
            }
        }
        index
    }

    /// Whether the notice document references `installed_path`.
    ///
    /// Exact path first, then basename; binaries inside an APEX also match
    /// the APEX package aliases.
    pub fn contains_binary(&self, installed_path: &str) -> bool {
        if installed_path.is_empty() {
            return false;
        }
        if self.files.contains(installed_path) {
            return true;
        }
        if self.basenames.contains(basename_of(installed_path)) {
            return true;
        }
        apex_aliases(installed_path).iter().any(|alias| self.basenames.contains(alias))
    }
}

fn apex_aliases(installed_path: &str) -> Vec<String> {
    let Some(name) = APEX_RE.captures(installed_path).and_then(|c| c.get(1)) else {
        return Vec::new();
    };
    let name = name.as_str();
    vec![
        format!("{name}.apex"),
        format!("{name}.capex"),
        format!("{name}_compressed.apex"),
        format!("{name}-uncompressed.apex"),
    ]
}

fn collect_documents(notice_path: &Path) -> Vec<PathBuf> {
    let mut documents = BTreeSet::new();
    let mut dir = notice_path.to_path_buf();
    if notice_path.is_file() {
        documents.insert(notice_path.to_path_buf());
        let name = notice_path.to_string_lossy();
        if [".xml", ".html", ".txt", "xml.gz"].iter().any(|ext| name.ends_with(ext)) {
            dir = notice_path.parent().map(Path::to_path_buf).unwrap_or_default();
        }
    }
    if dir.is_dir() {
        documents.extend(documents_in_dir(&dir));
    }
    documents.into_iter().collect()
}

/// Notice documents in `dir`: `*.html`, else `*.xml`. Gzipped documents are
/// decompressed next to themselves first.
fn documents_in_dir(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let names: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();

    for gz in names.iter().filter(|p| p.to_string_lossy().ends_with(".gz")) {
        if let Err(e) = gunzip_beside(gz) {
            info!(path = %gz.display(), error = %e, "fail to unzip gz file");
        }
    }

    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let names: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    for ext in NOTICE_DOCUMENT_EXTENSIONS {
        let found: Vec<PathBuf> =
            names.iter().filter(|p| p.to_string_lossy().ends_with(ext)).cloned().collect();
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

fn gunzip_beside(gz: &Path) -> io::Result<()> {
    let name = gz.to_string_lossy();
    let Some(target) = name.strip_suffix(".gz") else {
        return Ok(());
    };
    let target = PathBuf::from(target);
    if target.is_file() {
        return Ok(());
    }
    let mut decoder = GzDecoder::new(File::open(gz)?);
    let mut out = File::create(&target)?;
    io::copy(&mut decoder, &mut out)?;
    Ok(())
}

fn clean_entry(line: &str) -> String {
    let line = line.trim().replace("//", "/");
    line.strip_prefix('/').unwrap_or(&line).to_string()
}

fn unescape_html(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn strip_tags(fragment: &str) -> String {
    unescape_html(&TAG_RE.replace_all(fragment, "\n"))
}

/// `<file-name>` entries of a NOTICE.xml.
pub fn parse_notice_xml(body: &str) -> Vec<String> {
    XML_FILE_NAME_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| {
            let text = unescape_html(m.as_str());
            let text = text.trim();
            text.strip_prefix('/').unwrap_or(text).to_string()
        })
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// File references of a NOTICE.html: `div.file-list` and `ul.file-list`
/// contents, `<strong>` texts and `<span lang=EN-US>` lines.
pub fn parse_notice_html(body: &str) -> Vec<String> {
    let mut entries = Vec::new();
    for block_re in HTML_BLOCK_RES.iter() {
        for caps in block_re.captures_iter(body) {
            let Some(inner) = caps.get(1) else {
                continue;
            };
            let text = strip_tags(inner.as_str());
            entries.extend(text.split_whitespace().map(clean_entry));
        }
    }

    for caps in EN_US_SPAN_RE.captures_iter(body) {
        let Some(inner) = caps.get(1) else {
            continue;
        };
        for line in strip_tags(inner.as_str()).lines() {
            let line = clean_entry(line);
            if !line.is_empty() && !line.contains(' ') {
                entries.push(line);
            }
        }
    }

    entries.retain(|e| !e.is_empty());
    entries
}

/// Whether a sidecar `NOTICE` file exists in the record's source directory.
pub fn has_sidecar_notice(record: &BinaryRecord, workdir: &Path) -> bool {
    record.has_source_path()
        && workdir.join(record.source_path_str()).join(NOTICE_FILE_NAME).is_file()
}

/// Notice coverage stage.
pub fn check_notice_coverage(
    records: Vec<BinaryRecord>,
    index: &NoticeIndex,
    workdir: &Path,
    workers: usize,
) -> Vec<BinaryRecord> {
    parallel_map(records, workers, |mut chunk| {
        for record in &mut chunk {
            let in_document = index.contains_binary(&record.installed_path);
            let sidecar = has_sidecar_notice(record, workdir);
            record.notice = Some(NoticeStatus::from_flags(in_document, sidecar));
        }
        chunk
    })
}

/// Outcome of checking a binary list against a notice document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChecklistReport {
    pub found: Vec<String>,
    pub missing: Vec<String>,
}

/// Check every non-empty line of `binaries` against the notice index.
pub fn run_checklist<S: AsRef<str>>(binaries: &[S], index: &NoticeIndex) -> ChecklistReport {
    let mut report = ChecklistReport::default();
    for line in binaries {
        let name = line.as_ref().trim();
        if name.is_empty() {
            continue;
        }
        if index.contains_binary(name) {
            report.found.push(name.to_string());
        } else {
            report.missing.push(name.to_string());
        }
    }
    report
}

/// Files written by [`create_additional_notice`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdditionalNotice {
    pub notice: Option<PathBuf>,
    pub failed: Option<PathBuf>,
}

/// Write `needtoadd-notice.html` for `ok` binaries, grouped by the NOTICE
/// file of their source path.
///
/// `ok` binaries whose NOTICE cannot be found or read go to
/// `needtoadd-notice.html_failed`.
pub fn create_additional_notice(
    records: &[BinaryRecord],
    workdir: &Path,
    output_dir: &Path,
) -> AuditResult<AdditionalNotice> {
    let mut groups: BTreeMap<PathBuf, BTreeSet<&str>> = BTreeMap::new();
    let mut failed = String::new();

    for record in records.iter().filter(|r| r.notice == Some(NoticeStatus::Ok)) {
        let sidecar = workdir.join(record.source_path_str()).join(NOTICE_FILE_NAME);
        if record.has_source_path() && sidecar.is_file() {
            groups.entry(sidecar).or_default().insert(&record.installed_path);
        } else {
            failed.push_str(&record.installed_path);
            failed.push('\n');
        }
    }

    let mut body = String::new();
    for (sidecar, binaries) in &groups {
        match std::fs::read(sidecar) {
            Ok(bytes) => body.push_str(&notice_fragment(binaries, &decode_text(&bytes))),
            Err(e) => {
                debug!(path = %sidecar.display(), error = %e, "cannot read NOTICE");
                let names: Vec<&str> = binaries.iter().copied().collect();
                failed.push_str(&format!("{names:?}\n"));
            }
        }
    }

    info!("---------CREATE ADDITIONAL NOTICE-----------");
    let mut written = AdditionalNotice::default();
    if !body.is_empty() {
        let path = output_dir.join(ADDITIONAL_NOTICE_FILE_NAME);
        let html =
            format!("<table cellpadding=\"0\" cellspacing=\"0\" border=\"0\">{body}</table>");
        write_text(&path, &html)?;
        written.notice = Some(path);
    }
    if !failed.is_empty() {
        let path = output_dir.join(format!("{ADDITIONAL_NOTICE_FILE_NAME}_failed"));
        write_text(&path, &failed)?;
        written.failed = Some(path);
    }
    Ok(written)
}

fn notice_fragment(binaries: &BTreeSet<&str>, license_text: &str) -> String {
    let mut fragment = String::from(
        "<tr id=\"id0\"><td class=\"same-license\">\
         <div class=\"label\">Notices for file(s):</div>\
         <div class=\"file-list\">",
    );
    for binary in binaries {
        fragment.push_str(binary);
        fragment.push_str("<br/>");
    }
    fragment.push_str("</div><!-- file-list --><pre class=\"license-text\">");
    fragment.push_str(license_text);
    fragment.push_str("</pre><!-- license-text --></td></tr><!-- same-license -->");
    fragment
}

/// One file's license text extracted from a notice HTML.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeTextEntry {
    pub file: String,
    pub license_text: String,
}

/// Split a notice HTML into per-file license texts.
pub fn parse_license_texts(body: &str) -> Vec<NoticeTextEntry> {
    let mut entries = Vec::new();
    for row in ROW_RE.captures_iter(body).filter_map(|c| c.get(1)) {
        let row = row.as_str();
        let Some(text) = LICENSE_TEXT_RE.captures(row).and_then(|c| c.get(1)) else {
            info!("can't find license text of a notice row");
            continue;
        };
        let license_text = unescape_html(&TAG_RE.replace_all(text.as_str(), ""));
        let Some(files) = HTML_BLOCK_RES[0].captures(row).and_then(|c| c.get(1)) else {
            continue;
        };
        for file in strip_tags(files.as_str()).lines() {
            let file = file.trim();
            if file.is_empty() {
                continue;
            }
            entries.push(NoticeTextEntry {
                file: file.strip_prefix('/').unwrap_or(file).to_string(),
                license_text: license_text.clone(),
            });
        }
    }
    entries
}

/// Write one `<file>.txt` per notice entry under `target_dir`.
///
/// Returns the number of files written.
pub fn divide_notice(notice_html: &Path, target_dir: &Path) -> AuditResult<usize> {
    let bytes = std::fs::read(notice_html).map_err(|e| AuditError::io(notice_html, e))?;
    let body = decode_text(&bytes);

    if target_dir.exists() {
        warn!(dir = %target_dir.display(), "folder already exists");
    }
    std::fs::create_dir_all(target_dir).map_err(|e| AuditError::io(target_dir, e))?;

    let mut written = 0;
    for entry in parse_license_texts(&body) {
        let relative = Path::new(&entry.file);
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            warn!(file = %entry.file, "skipped notice entry with unsafe path");
            continue;
        }
        let path = target_dir.join(format!("{}.txt", entry.file));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuditError::io(parent, e))?;
        }
        write_text(&path, &entry.license_text)?;
        written += 1;
    }
    warn!(dir = %target_dir.display(), files = written, "notice files have been created");
    Ok(written)
}
