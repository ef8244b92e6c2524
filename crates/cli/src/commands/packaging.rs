use std::path::Path;

use anyhow::{Context, Result};
use binaudit_core::services::packaging::{check_packaging, PackagingRules};

/// Check a delivery tree (or archive) against the prohibited-content rules.
pub fn packaging_command(config: &Path, target: &Path) -> Result<()> {
    let rules = PackagingRules::load(config).with_context(|| {
        format!("Fail to read config file for checking packaging files: {}", config.display())
    })?;
    let report = check_packaging(target, &rules);
    report.log();
    Ok(())
}
