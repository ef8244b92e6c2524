use std::path::Path;

use anyhow::{Context, Result};
use binaudit_core::services::buildlog::read_log_lines;
use binaudit_core::services::notice::{divide_notice, run_checklist, NoticeIndex};
use tracing::{info, warn};

/// Which half of a checklist to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistMode {
    /// Report binaries the notice covers.
    Found,
    /// Report binaries the notice misses.
    Missing,
}

impl ChecklistMode {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("ok") {
            ChecklistMode::Found
        } else {
            ChecklistMode::Missing
        }
    }
}

/// Check a binary list against a notice document and log the requested half.
pub fn checklist_command(binary_list: &Path, notice: &Path, mode: ChecklistMode) -> Result<()> {
    let binaries = match read_log_lines(binary_list) {
        Ok(lines) => lines,
        Err(e) => {
            info!("Fail to read a binary file: {} ({e})", binary_list.display());
            return Ok(());
        }
    };

    let index = NoticeIndex::load(notice);
    if index.is_empty() {
        info!("CANNOT_FIND_NOTICE_HTML");
        return Ok(());
    }

    let report = run_checklist(&binaries, &index);
    match mode {
        ChecklistMode::Found => report.found.iter().for_each(|b| warn!("{b} ok")),
        ChecklistMode::Missing => report.missing.iter().for_each(|b| warn!("{b} nok")),
    }
    Ok(())
}

/// Split a notice HTML into per-file license texts under `NOTICE_FILES_<ts>`.
pub fn divide_command(notice_html: &Path, output_dir: &Path, timestamp: &str) -> Result<()> {
    let target = output_dir.join(format!("NOTICE_FILES_{timestamp}"));
    divide_notice(notice_html, &target)
        .with_context(|| format!("Failed to divide notice: {}", notice_html.display()))?;
    Ok(())
}
