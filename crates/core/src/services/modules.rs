//! Module manifest lookup and source-path bookkeeping.
//!
//! The build system writes `module-info.json` into the output root; each entry
//! names the source directories and installed outputs of one module. This
//! module maps discovered binaries onto those entries.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{AuditError, AuditResult};
use crate::model::{basename_of, module_name_guess, BinaryRecord};

/// File name of the module manifest inside the build output root.
pub const MODULE_INFO_FILE_NAME: &str = "module-info.json";

/// Extensions of build by-products that are dropped when no source path is known.
pub const UNRESOLVED_DROP_EXTENSIONS: &[&str] =
    &[".oat", ".art", ".hyb", ".dat", ".xml", ".odex", ".sh"];

const STATIC_LIBRARIES_DIR: &str = "obj/STATIC_LIBRARIES/";

/// One module-info.json entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModuleEntry {
    /// Source directories, relative to the source tree root.
    #[serde(default)]
    pub path: Vec<String>,
    /// Installed outputs, including the build output prefix.
    #[serde(default)]
    pub installed: Vec<String>,
}

/// A manifest hit: canonical module name plus its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule<'a> {
    pub name: &'a str,
    pub entry: &'a ModuleEntry,
}

/// Read-only module manifest.
#[derive(Debug, Clone, Default)]
pub struct ModuleManifest {
    entries: BTreeMap<String, ModuleEntry>,
}

impl ModuleManifest {
    pub fn from_entries(entries: BTreeMap<String, ModuleEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        Ok(Self { entries: serde_json::from_str(body)? })
    }

    /// Load `<out_root>/module-info.json`. Missing or unparseable is fatal.
    pub fn load(out_root: &Path) -> AuditResult<Self> {
        let path = out_root.join(MODULE_INFO_FILE_NAME);
        if !path.is_file() {
            return Err(AuditError::Manifest {
                path,
                reason: "Can't find a module-info.json file at build output path. \
                         Copy module-info.mk to build/core/tasks and build again."
                    .to_string(),
            });
        }
        let body = std::fs::read_to_string(&path).map_err(|e| AuditError::Manifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let manifest = Self::from_json(&body)
            .map_err(|e| AuditError::Manifest { path: path.clone(), reason: e.to_string() })?;
        info!(modules = manifest.len(), path = %path.display(), "loaded module manifest");
        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a binary's module.
    ///
    /// Order: module name key, basename key, then a scan of every entry's
    /// installed outputs for `relative_path` or `out_dir/relative_path`.
    pub fn resolve(
        &self,
        module_guess: &str,
        relative_path: &str,
        basename: &str,
        out_dir: &str,
    ) -> Option<ResolvedModule<'_>> {
        if module_guess.is_empty() || relative_path.is_empty() {
            return None;
        }
        if let Some((name, entry)) = self.entries.get_key_value(module_guess) {
            return Some(ResolvedModule { name, entry });
        }
        if let Some((name, entry)) = self.entries.get_key_value(basename) {
            return Some(ResolvedModule { name, entry });
        }

        let with_out_dir = format!("{out_dir}/{relative_path}");
        self.entries.iter().find_map(|(name, entry)| {
            entry
                .installed
                .iter()
                .any(|output| output == relative_path || *output == with_out_dir)
                .then_some(ResolvedModule { name, entry })
        })
    }
}

/// Build records for discovered paths and resolve their modules.
///
/// `discovered` holds paths relative to the output root. Static library
/// archives are reduced to their basename.
pub fn map_binaries(
    discovered: &[String],
    out_root: &Path,
    out_dir: &str,
    manifest: &ModuleManifest,
) -> Vec<BinaryRecord> {
    let mut records = Vec::with_capacity(discovered.len());
    for rel in discovered {
        let installed_path = if rel.contains(STATIC_LIBRARIES_DIR) {
            basename_of(rel).to_string()
        } else {
            rel.clone()
        };
        let mut record = BinaryRecord::new(installed_path, out_root.join(rel));
        let guess = module_name_guess(&record.basename).to_string();

        match manifest.resolve(&guess, &record.installed_path, &record.basename, out_dir) {
            Some(found) => {
                record.source_path = found.entry.path.first().cloned();
                record.module_name = found.name.to_string();
            }
            None => record.module_name = guess,
        }
        records.push(record);
    }
    records
}

/// Normalise source paths that climb out of their directory with `/..`.
///
/// The canonical path relative to `workdir` replaces the source path and the
/// text before `/..` is kept as the make-file path.
pub fn normalize_source_paths(records: &mut [BinaryRecord], workdir: &Path) {
    let canonical_workdir = workdir.canonicalize().unwrap_or_else(|_| workdir.to_path_buf());
    for record in records.iter_mut() {
        let Some(local) = record.source_path.clone() else {
            continue;
        };
        let mut mk_path = local.clone();
        if let Some(idx) = local.find("/..") {
            match workdir.join(&local).canonicalize() {
                Ok(abs) => {
                    let rel = abs.strip_prefix(&canonical_workdir).unwrap_or(&abs);
                    record.source_path = Some(rel.to_string_lossy().to_string());
                }
                Err(e) => debug!(path = %local, error = %e, "cannot resolve source path"),
            }
            mk_path = local[..idx].to_string();
        }
        record.mk_file_path = Some(mk_path);
    }
}

/// Drop records without a source path that are build by-products or
/// symlinks to an already listed binary.
///
/// Returns the kept records plus the basenames that still lack a source path.
pub fn filter_unresolved(
    records: Vec<BinaryRecord>,
    out_root: &Path,
) -> (Vec<BinaryRecord>, BTreeSet<String>) {
    let installed: BTreeSet<String> = records.iter().map(|r| r.installed_path.clone()).collect();
    let canonical_root = out_root.canonicalize().unwrap_or_else(|_| out_root.to_path_buf());
    let mut need_to_find = BTreeSet::new();
    let mut kept = Vec::with_capacity(records.len());

    for record in records {
        if record.has_source_path() {
            kept.push(record);
            continue;
        }

        let by_product =
            UNRESOLVED_DROP_EXTENSIONS.iter().any(|ext| record.installed_path.ends_with(ext));
        if by_product {
            debug!(binary = %record.installed_path, "dropped build by-product without source path");
            continue;
        }

        let output = out_root.join(&record.installed_path);
        if output.is_symlink() {
            let target = output
                .canonicalize()
                .ok()
                .and_then(|real| real.strip_prefix(&canonical_root).ok().map(Path::to_path_buf));
            if let Some(target) = target {
                let target = target.to_string_lossy().to_string();
                if target != record.installed_path && installed.contains(&target) {
                    debug!(binary = %record.installed_path, target = %target, "dropped symlink to listed binary");
                    continue;
                }
            }
            kept.push(record);
            continue;
        }

        need_to_find.insert(record.basename.clone());
        kept.push(record);
    }

    (kept, need_to_find)
}

/// Candidate locations for binaries whose source path is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindReport {
    pub found: BTreeMap<String, Vec<PathBuf>>,
    pub elapsed_ms: u128,
}

impl FindReport {
    /// Text form: search-time line, then a `BINARY\tFOUND_PATH` table.
    pub fn render(&self) -> String {
        let secs = self.elapsed_ms / 1000;
        let mut out = format!(
            "* SEARCHING TIME: {:02}:{:02}:{:02}.{:03}, Number of binaries:{}\r\n",
            secs / 3600,
            secs % 3600 / 60,
            secs % 60,
            self.elapsed_ms % 1000,
            self.found.len()
        );
        out.push_str("BINARY\tFOUND_PATH\n");
        for (name, paths) in &self.found {
            let joined: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
            out.push_str(&format!("{name}\t\n\t{}\n", joined.join("\n\t")));
        }
        out
    }
}

/// Search the source tree for files named like unresolved binaries.
///
/// Every top-level directory of `workdir` is walked except hidden ones and the
/// first component of the build output directory.
pub fn find_candidate_paths(
    names: &BTreeSet<String>,
    workdir: &Path,
    out_dir: &str,
) -> Option<FindReport> {
    if names.is_empty() {
        return None;
    }
    let started = Instant::now();
    let out_top = out_dir.split('/').next().unwrap_or_default();
    let mut found: BTreeMap<String, Vec<PathBuf>> =
        names.iter().map(|n| (n.clone(), Vec::new())).collect();

    let top_dirs = match std::fs::read_dir(workdir) {
        Ok(read) => read,
        Err(e) => {
            warn!(dir = %workdir.display(), error = %e, "cannot list source tree for find");
            return None;
        }
    };
    for dir in top_dirs.flatten() {
        let name = dir.file_name().to_string_lossy().to_string();
        if name == out_top || name.starts_with('.') || !dir.path().is_dir() {
            continue;
        }
        for entry in WalkDir::new(dir.path()).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy();
            if let Some(paths) = found.get_mut(file_name.as_ref()) {
                let rel = entry.path().strip_prefix(workdir).unwrap_or(entry.path());
                paths.push(rel.to_path_buf());
            }
        }
    }

    Some(FindReport { found, elapsed_ms: started.elapsed().as_millis() })
}
