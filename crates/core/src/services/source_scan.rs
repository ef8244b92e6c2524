//! Deep source-license scan for binaries that still have no license.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ScannerConfig;
use crate::error::{AuditError, AuditResult};
use crate::model::BinaryRecord;

/// Detects licenses in a source directory.
pub trait SourceScanner: Send + Sync {
    /// Unique license identifiers found under `dir`, in discovery order.
    fn scan(&self, dir: &Path) -> AuditResult<Vec<String>>;
    fn name(&self) -> &str;
}

/// Runs an external scanner that writes a JSON report.
#[derive(Debug, Clone)]
pub struct CommandScanner {
    config: ScannerConfig,
}

impl CommandScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }
}

impl SourceScanner for CommandScanner {
    fn scan(&self, dir: &Path) -> AuditResult<Vec<String>> {
        let report = tempfile::Builder::new()
            .prefix("binaudit-scan-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| AuditError::io(std::env::temp_dir(), e))?;
        let input = dir.to_string_lossy();
        let output = report.path().to_string_lossy();
        let args: Vec<String> = self
            .config
            .args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect();

        let status = Command::new(&self.config.program)
            .args(&args)
            .status()
            .map_err(|e| AuditError::io(&self.config.program, e))?;
        if !status.success() {
            return Err(AuditError::Config(format!(
                "source scanner `{}` exited with {status}",
                self.config.program
            )));
        }

        let body = std::fs::read_to_string(report.path())
            .map_err(|e| AuditError::io(report.path(), e))?;
        let json: Value = serde_json::from_str(&body)?;
        Ok(licenses_from_report(&json))
    }

    fn name(&self) -> &str {
        &self.config.program
    }
}

/// Unique license identifiers from a scancode-style JSON report.
///
/// Both per-file `license_detections`, legacy `licenses` arrays and the
/// `detected_license_expression_spdx` summary are understood.
pub fn licenses_from_report(report: &Value) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |value: Option<&str>| {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            if !found.iter().any(|f| f == v) {
                found.push(v.to_string());
            }
        }
    };

    let files = report.get("files").and_then(Value::as_array).into_iter().flatten();
    for file in files {
        let detections = file.get("license_detections").and_then(Value::as_array);
        for detection in detections.into_iter().flatten() {
            push(detection.get("license_expression_spdx").and_then(Value::as_str));
        }
        let legacy = file.get("licenses").and_then(Value::as_array);
        for license in legacy.into_iter().flatten() {
            push(license.get("spdx_license_key").and_then(Value::as_str));
        }
        if detections.is_none() {
            push(file.get("detected_license_expression_spdx").and_then(Value::as_str));
        }
    }
    found
}

/// Deep-scan stage: scan each distinct unlicensed source path once and fill
/// the result into every record with that path.
///
/// Paths matching an `exclude` prefix or missing on disk are not scanned.
pub fn backfill_licenses(
    records: &mut [BinaryRecord],
    workdir: &Path,
    scanner: &dyn SourceScanner,
    exclude: &[String],
) {
    let mut pending: BTreeMap<String, Option<String>> = BTreeMap::new();
    for record in records.iter() {
        if !record.has_license() && record.has_source_path() {
            pending.insert(record.source_path_str().to_string(), None);
        }
    }
    info!(paths = pending.len(), scanner = scanner.name(), "source analysis begins");

    let total = pending.len();
    for (idx, (source_path, license)) in pending.iter_mut().enumerate() {
        if exclude.iter().any(|prefix| source_path.starts_with(prefix.as_str())) {
            debug!(path = %source_path, "excluded from source analysis");
            continue;
        }
        let dir = workdir.join(source_path.as_str());
        if !dir.exists() {
            debug!(path = %source_path, "source path missing; not scanned");
            continue;
        }
        info!("|---{} {}", idx + 1, source_path);
        match scanner.scan(&dir) {
            Ok(found) if !found.is_empty() => *license = Some(found.join(",")),
            Ok(_) => {}
            Err(e) => warn!(path = %source_path, error = %e, "source analysis failed"),
        }
    }
    debug!(total, "source analysis finished");

    for record in records.iter_mut() {
        if record.has_license() {
            continue;
        }
        if let Some(Some(license)) = pending.get(record.source_path_str()) {
            record.license = Some(license.clone());
        }
    }
}
