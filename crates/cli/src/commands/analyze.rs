use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use binaudit_core::config::AuditConfig;
use binaudit_core::db::{connector_for_url, IdentityConnector};
use binaudit_core::services::audit::{
    run_audit, write_outputs, AuditContext, AuditOptions, AuditServices,
};
use binaudit_core::services::buildlog::BuildEnvironment;
use binaudit_core::services::discovery::default_sniffer;
use binaudit_core::services::notice::create_additional_notice;
use binaudit_core::services::repository::DefaultRepositoryProvider;
use binaudit_core::services::source_scan::CommandScanner;
use tracing::{error, info, warn};

/// Inputs of the main audit run.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeRequest {
    pub android_log: Option<PathBuf>,
    pub options: AuditOptions,
    /// Write `needtoadd-notice.html` after the report.
    pub create_additional_notice: bool,
}

/// Run the full audit in the current directory and write every output.
pub fn analyze_command(
    request: &AnalyzeRequest,
    config: &AuditConfig,
    output_dir: &Path,
    timestamp: &str,
) -> Result<()> {
    let workdir = std::env::current_dir().context("Failed to get current directory")?;

    let log_path = request.android_log.clone().unwrap_or_default();
    if !log_path.is_file() {
        error!("(-a option) Fail to read a file:{}", log_path.display());
        return Err(anyhow!("Fail to read a build log: {}", log_path.display()));
    }
    let build = BuildEnvironment::from_log_file(&log_path)
        .with_context(|| format!("Failed to parse build log: {}", log_path.display()))?;
    info!(
        platform_version = %build.platform_version,
        out_dir = %build.out_dir,
        notice = %build.notice_path,
        "build environment"
    );

    let connector: Option<Box<dyn IdentityConnector>> = match &config.identity_db_url {
        Some(url) => match connector_for_url(url) {
            Ok(connector) => Some(connector),
            Err(e) => {
                warn!(error = %e, "identity database disabled");
                None
            }
        },
        None => None,
    };
    let sniffer = default_sniffer();
    let repositories = DefaultRepositoryProvider::new(
        config.repository_urls.clone(),
        config.repository_table_path.clone(),
    );
    let scanner = CommandScanner::new(config.source_scanner.clone());
    let services = AuditServices {
        sniffer: sniffer.as_ref(),
        identity: connector.as_deref(),
        repositories: &repositories,
        scanner: &scanner,
    };

    let ctx = AuditContext::new(&workdir, build);
    let outcome = run_audit(&ctx, config, &request.options, &services)?;
    let summary = write_outputs(&outcome, config, output_dir, timestamp)?;

    if request.create_additional_notice {
        let written = create_additional_notice(&outcome.records, &workdir, output_dir)?;
        if let Some(path) = written.notice {
            info!(path = %path.display(), "additional notice written");
        }
    }

    match serde_yaml::to_string(&summary) {
        Ok(text) => info!("\n{text}"),
        Err(e) => warn!("Failed to print result log. : {e}"),
    }
    Ok(())
}
