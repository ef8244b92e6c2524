//! End-to-end audit pipeline.
//!
//! Stages run one after another; the per-binary stages fan out over
//! [`parallel_map`] and join before the next stage starts.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::AuditConfig;
use crate::db::IdentityConnector;
use crate::error::AuditResult;
use crate::model::BinaryRecord;
use crate::services::buildlog::BuildEnvironment;
use crate::services::dedup::{deduplicate, RemovalList, RemovedBinary};
use crate::services::discovery::{discover_binaries, FileTypeSniffer};
use crate::services::fingerprint::fingerprint_binaries;
use crate::services::identity::{resolve_identities, IdentityQuery};
use crate::services::license::{resolve_build_licenses, MetaLicenseIndex};
use crate::services::modules::{
    filter_unresolved, find_candidate_paths, map_binaries, normalize_source_paths, FindReport,
    ModuleManifest,
};
use crate::services::notice::{check_notice_coverage, NoticeIndex};
use crate::services::pipeline::parallel_map;
use crate::services::report::{write_removed_log, write_reports, write_text};
use crate::services::repository::{infer_oss_names, RepositoryProvider};
use crate::services::source_scan::{backfill_licenses, SourceScanner};

/// Where the audit runs.
#[derive(Debug, Clone)]
pub struct AuditContext {
    /// Source tree root; every relative path is resolved against it.
    pub workdir: PathBuf,
    pub build: BuildEnvironment,
}

impl AuditContext {
    pub fn new(workdir: impl Into<PathBuf>, build: BuildEnvironment) -> Self {
        Self { workdir: workdir.into(), build }
    }

    pub fn out_root(&self) -> PathBuf {
        self.build.out_root(&self.workdir)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

/// Per-run switches.
#[derive(Debug, Clone, Default)]
pub struct AuditOptions {
    /// Search the source tree for binaries without a source path.
    pub find_unresolved: bool,
    /// Scan sources of still unlicensed binaries.
    pub deep_scan: bool,
    /// Infer OSS names from the repository table.
    pub infer_repository: bool,
    /// Source path prefixes the deep scan skips.
    pub exclude: Vec<String>,
    /// Tab-separated list of binaries to drop. Relative paths are taken from
    /// the process working directory, not the source tree.
    pub removal_list: Option<PathBuf>,
    /// Notice document to use instead of the one named by the build log.
    pub notice_override: Option<PathBuf>,
}

/// Pluggable collaborators.
pub struct AuditServices<'a> {
    pub sniffer: &'a dyn FileTypeSniffer,
    /// `None` skips the identity database stage.
    pub identity: Option<&'a dyn IdentityConnector>,
    pub repositories: &'a dyn RepositoryProvider,
    pub scanner: &'a dyn SourceScanner,
}

/// Everything a run produced, before anything is written.
#[derive(Debug, Clone, Default)]
pub struct AuditOutcome {
    pub discovered: usize,
    pub records: Vec<BinaryRecord>,
    pub removed: Vec<RemovedBinary>,
    pub removed_by_request: usize,
    pub notice_documents: Vec<PathBuf>,
    pub unresolved: BTreeSet<String>,
    pub find_report: Option<FindReport>,
}

/// Run every stage against the build tree.
pub fn run_audit(
    ctx: &AuditContext,
    config: &AuditConfig,
    options: &AuditOptions,
    services: &AuditServices<'_>,
) -> AuditResult<AuditOutcome> {
    let workers = config.worker_count();
    let out_root = ctx.out_root();
    let workdir = ctx.workdir.as_path();
    info!(out_root = %out_root.display(), workers, "audit started");

    let manifest = ModuleManifest::load(&out_root)?;
    let discovered = discover_binaries(&out_root, services.sniffer, workers);
    let mut records = map_binaries(&discovered, &out_root, &ctx.build.out_dir, &manifest);

    let notice_path = match &options.notice_override {
        Some(path) => ctx.resolve(path),
        None => ctx.resolve(Path::new(&ctx.build.notice_path)),
    };
    let notice = NoticeIndex::load(&notice_path);
    if notice.is_empty() {
        info!(path = %notice_path.display(), "notice file is empty; coverage not checked");
    } else {
        let names: Vec<String> =
            notice.documents.iter().map(|p| p.display().to_string()).collect();
        info!(files = %names.join(","), "notice files");
        records = check_notice_coverage(records, &notice, workdir, workers);
    }

    let meta = MetaLicenseIndex::scan(&out_root);
    let tag_table = &config.license_tag_table;
    records = parallel_map(records, workers, |chunk| {
        resolve_build_licenses(chunk, workdir, tag_table, &meta)
    });

    normalize_source_paths(&mut records, workdir);
    let (kept, unresolved) = filter_unresolved(records, &out_root);
    let find_report = if options.find_unresolved {
        find_candidate_paths(&unresolved, workdir, &ctx.build.out_dir)
    } else {
        None
    };

    let fingerprinted = parallel_map(kept, workers, fingerprint_binaries);

    let removal = match &options.removal_list {
        Some(path) => RemovalList::load(path)?,
        None => RemovalList::default(),
    };
    let dedup = deduplicate(fingerprinted, &removal, config.fuzzy_tolerance)?;
    let removed_by_request = dedup.removed_by_request();
    let mut records = dedup.survivors;

    if let Some(connector) = services.identity {
        let query = IdentityQuery {
            platform_name: config.platform_name.clone(),
            platform_version: ctx.build.platform_version.clone(),
            fuzzy_tolerance: config.fuzzy_tolerance,
        };
        records = resolve_identities(records, connector, &query, workers)?;
    } else {
        warn!("no identity database configured; OSS lookup skipped");
    }

    if options.infer_repository {
        let table = services.repositories.load(workdir);
        infer_oss_names(&mut records, &table, &ctx.build.platform_version, &config.skip_licenses);
    }

    if options.deep_scan {
        backfill_licenses(&mut records, workdir, services.scanner, &options.exclude);
    }

    info!(binaries = records.len(), removed = dedup.removed.len(), "audit finished");
    Ok(AuditOutcome {
        discovered: discovered.len(),
        records,
        removed: dedup.removed,
        removed_by_request,
        notice_documents: notice.documents,
        unresolved,
        find_report,
    })
}

/// Files written for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    #[serde(rename = "Total number of binaries")]
    pub binaries: usize,
    #[serde(rename = "Discovered binaries")]
    pub discovered: usize,
    #[serde(rename = "Removed binaries")]
    pub removed: usize,
    #[serde(rename = "Removed by request")]
    pub removed_by_request: usize,
    #[serde(rename = "Notice")]
    pub notice_documents: Vec<String>,
    #[serde(rename = "Output report", skip_serializing_if = "Option::is_none")]
    pub report_text: Option<String>,
    #[serde(rename = "Output sheet", skip_serializing_if = "Option::is_none")]
    pub report_sheet: Option<String>,
    #[serde(rename = "Removed list", skip_serializing_if = "Option::is_none")]
    pub removed_log: Option<String>,
    #[serde(rename = "Find result", skip_serializing_if = "Option::is_none")]
    pub find_result: Option<String>,
    #[serde(rename = "Output Directory")]
    pub output_dir: String,
}

/// Write the report, removed log and find result for an outcome.
pub fn write_outputs(
    outcome: &AuditOutcome,
    config: &AuditConfig,
    output_dir: &Path,
    timestamp: &str,
) -> AuditResult<RunSummary> {
    let display = |p: &Path| p.display().to_string();
    let files = write_reports(
        &outcome.records,
        &config.skip_licenses,
        output_dir,
        &format!("binaudit_report_{timestamp}"),
    )?;
    let removed_log = write_removed_log(
        &outcome.removed,
        &config.skip_licenses,
        &output_dir.join(format!("REMOVED_BIN_BY_DUPLICATION_{timestamp}.txt")),
    )?;
    let find_result = match &outcome.find_report {
        Some(report) => {
            let path = output_dir.join(format!("FIND_RESULT_OF_BINARIES_{timestamp}.txt"));
            write_text(&path, &report.render())?;
            Some(path)
        }
        None => None,
    };

    Ok(RunSummary {
        binaries: outcome.records.len(),
        discovered: outcome.discovered,
        removed: outcome.removed.len(),
        removed_by_request: outcome.removed_by_request,
        notice_documents: outcome.notice_documents.iter().map(|p| display(p)).collect(),
        report_text: files.text.as_deref().map(display),
        report_sheet: files.sheet.as_deref().map(display),
        removed_log: removed_log.as_deref().map(display),
        find_result: find_result.as_deref().map(display),
        output_dir: display(output_dir),
    })
}
