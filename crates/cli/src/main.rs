use std::path::PathBuf;

use anyhow::{Context, Result};
use binaudit::commands::{
    analyze_command, checklist_command, divide_command, packaging_command, AnalyzeRequest,
    ChecklistMode,
};
use binaudit::{canonicalize_or_current, init_logging, log_file_path, run_timestamp};
use binaudit_core::config::AuditConfig;
use binaudit_core::services::audit::AuditOptions;
use clap::{ArgAction, Parser};
use tracing::info;

/// Android build output auditor.
///
/// Lists every binary shipped by an Android platform build, resolves its
/// source path, license and OSS identity, checks notice coverage and removes
/// duplicate copies. All substantive logic lives in `binaudit-core`.
#[derive(Parser, Debug)]
#[command(
    name = "binaudit",
    about = "Android build output license auditor",
    long_about = None,
    disable_version_flag = true
)]
struct Cli {
    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    show_version: bool,

    /// Android source tree to analyze (the working directory by default).
    #[arg(short = 's', long)]
    source: Option<String>,

    /// Build log of the Android build, relative to the source tree.
    #[arg(short = 'a', long = "android-log", visible_alias = "android")]
    android_log: Option<PathBuf>,

    /// Scan sources of binaries that still have no license.
    #[arg(short = 'm', long, default_value_t = false)]
    more: bool,

    /// Do not infer OSS names from the AOSP repository list.
    #[arg(short = 'i', long, default_value_t = false)]
    ignore: bool,

    /// Search the source tree for binaries without a source path.
    #[arg(short = 'f', long, default_value_t = false)]
    find: bool,

    /// Source paths the source scan skips.
    #[arg(short = 'e', long, num_args = 0.., value_name = "PATH")]
    exclude: Vec<String>,

    /// Removal list (tab separated result file of an earlier run).
    #[arg(short = 'r', long, value_name = "FILE")]
    remove: Option<PathBuf>,

    /// Check a delivery tree for prohibited files using this JSON config, then exit.
    #[arg(short = 'p', long, value_name = "CONFIG")]
    packaging: Option<PathBuf>,

    /// Tree or archive checked by --packaging (the working directory by default).
    #[arg(long, value_name = "PATH", requires = "packaging")]
    target: Option<PathBuf>,

    /// Notice document to use instead of the one named by the build log.
    #[arg(short = 'n', long, value_name = "FILE")]
    notice: Option<PathBuf>,

    /// Write needtoadd-notice.html for binaries missing from the notice.
    #[arg(short = 't', long, default_value_t = false)]
    toadd: bool,

    /// Check --binary against the notice and print `ok` or `nok` entries, then exit.
    #[arg(short = 'c', long, value_name = "ok|nok", requires = "binary")]
    check: Option<String>,

    /// Binary list used by --check.
    #[arg(short = 'b', long, value_name = "FILE")]
    binary: Option<PathBuf>,

    /// Split a notice HTML into per-file license texts, then exit.
    #[arg(short = 'd', long, value_name = "NOTICE_HTML")]
    divide: Option<PathBuf>,

    /// Run configuration (JSON).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Identity database URL (overrides the config file and BINAUDIT_DB_URL).
    #[arg(long, value_name = "URL")]
    db: Option<String>,

    /// Directory for reports and the run log (the invocation directory by default).
    #[arg(short = 'o', long, value_name = "DIR")]
    output: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.show_version {
        println!("binaudit v{}", binaudit_core::version());
        return Ok(());
    }

    let output_dir = canonicalize_or_current(cli.output.as_deref().unwrap_or("."))?;
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create output dir: {}", output_dir.display()))?;
    let timestamp = run_timestamp();
    init_logging(&log_file_path(&output_dir, &timestamp))?;
    info!("binaudit v{}", binaudit_core::version());

    // Config and removal-list paths given on the command line are relative to
    // the invocation directory.
    let removal_list = match &cli.remove {
        Some(path) => Some(canonicalize_or_current(&path.to_string_lossy())?),
        None => None,
    };
    let mut config = match &cli.config {
        Some(path) => AuditConfig::load(&canonicalize_or_current(&path.to_string_lossy())?)?,
        None => AuditConfig::default().with_env_overrides(),
    };
    if let Some(url) = cli.db {
        config.identity_db_url = Some(url);
    }

    if let Some(source) = &cli.source {
        std::env::set_current_dir(source)
            .with_context(|| format!("Failed to enter source directory: {source}"))?;
    }

    if let Some(rules) = &cli.packaging {
        let target = cli.target.unwrap_or_else(|| PathBuf::from("."));
        return packaging_command(rules, &target);
    }
    if let Some(notice_html) = &cli.divide {
        return divide_command(notice_html, &output_dir, &timestamp);
    }
    if let Some(check) = &cli.check {
        let binary_list = cli.binary.unwrap_or_default();
        let notice = cli.notice.unwrap_or_default();
        return checklist_command(&binary_list, &notice, ChecklistMode::parse(check));
    }

    let request = AnalyzeRequest {
        android_log: cli.android_log,
        options: AuditOptions {
            find_unresolved: cli.find,
            deep_scan: cli.more,
            infer_repository: !cli.ignore,
            exclude: cli.exclude,
            removal_list,
            notice_override: cli.notice,
        },
        create_additional_notice: cli.toadd,
    };
    analyze_command(&request, &config, &output_dir, &timestamp)
}
