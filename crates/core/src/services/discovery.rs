//! Binary discovery over a build output tree.
//!
//! The tree is searched in independent scopes, each with its own type filter.
//! Results are unioned, stripped of known noise paths, and finally passed
//! through a content sniff that rejects plain-text files.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::services::pipeline::parallel_map;

/// Generated license intermediates that look like binaries but are not shipped.
pub const EXCLUDED_PATH_PATTERNS: &[&str] = &[r"(/)+gen/META/lic_intermediates/"];

static EXCLUDED_PATHS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    EXCLUDED_PATH_PATTERNS.iter().map(|p| Regex::new(p).expect("excluded path regex")).collect()
});

const SNIFF_LEN: usize = 8192;
const ALWAYS_BINARY_EXTENSIONS: &[&str] = &["jar", "apk", "ttf", "otf", "ttc"];
const PRUNED_TOP_LEVEL: &[&str] = &["system", "root", "symbols", "dex_bootjars"];

/// Produces a `file(1)`-style description of a file's type.
pub trait FileTypeSniffer: Send + Sync {
    fn describe(&self, path: &Path) -> Option<String>;
    fn name(&self) -> &'static str;
}

/// Shells out to `file -b`.
pub struct FileCommandSniffer {
    program: PathBuf,
}

impl FileCommandSniffer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// The system `file` tool, when it can be executed.
    pub fn detect() -> Option<Self> {
        let sniffer = Self::new("file");
        let output = Command::new(&sniffer.program).arg("--version").output().ok()?;
        output.status.success().then_some(sniffer)
    }
}

impl FileTypeSniffer for FileCommandSniffer {
    fn describe(&self, path: &Path) -> Option<String> {
        let output = Command::new(&self.program).arg("-b").arg(path).output().ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Magic-number sniffing used when `file` is unavailable.
///
/// Descriptions mimic the vocabulary of `file(1)` closely enough for the
/// scope filters.
pub struct MagicSniffer;

impl FileTypeSniffer for MagicSniffer {
    fn describe(&self, path: &Path) -> Option<String> {
        let head = read_head(path, SNIFF_LEN)?;
        Some(describe_magic(&head).to_string())
    }

    fn name(&self) -> &'static str {
        "magic"
    }
}

/// Pick `file` when present, else the built-in magic sniffer.
pub fn default_sniffer() -> Box<dyn FileTypeSniffer> {
    match FileCommandSniffer::detect() {
        Some(sniffer) => Box::new(sniffer),
        None => {
            warn!("`file` command unavailable; falling back to magic-number sniffing");
            Box::new(MagicSniffer)
        }
    }
}

fn describe_magic(head: &[u8]) -> &'static str {
    if head.starts_with(b"\x7fELF") {
        let machine = head.get(18..20).map(|m| u16::from_le_bytes([m[0], m[1]]));
        return match machine {
            Some(0x28) => "ELF 32-bit LSB shared object, ARM, EABI5",
            Some(0xB7) => "ELF 64-bit LSB shared object, ARM aarch64",
            _ => "ELF executable",
        };
    }
    if head.starts_with(b"!<arch>\n") {
        return "current ar archive";
    }
    if head.starts_with(b"PK\x03\x04") {
        return "Zip archive data";
    }
    if head.starts_with(b"\x00\x01\x00\x00") || head.starts_with(b"true") {
        return "TrueType Font data";
    }
    if head.starts_with(b"OTTO") {
        return "OpenType font data";
    }
    if head.starts_with(b"ttcf") {
        return "TrueType font collection data";
    }
    if head.starts_with(b"wOFF") || head.starts_with(b"wOF2") {
        return "Web Open Font Format";
    }
    if looks_like_text(head) {
        return "ASCII text";
    }
    "data"
}

/// A search area and the filter applied to entries found there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// `system/`: executables, shared objects, jars and apks.
    System,
    /// `root/`: as system, but `.odex` files are kept.
    Root,
    /// Loose files directly under the output root typed as raw data.
    TopLevelData,
    /// Static library archives.
    StaticLibraries,
    /// Everything outside the dedicated scopes.
    Remainder,
    /// Font files.
    Fonts,
}

#[derive(Debug, Clone)]
struct Scope {
    kind: ScopeKind,
    base: PathBuf,
}

/// Discover candidate artifact paths under `out_root`.
///
/// Returned paths are relative to `out_root`, sorted and unique.
pub fn discover_binaries(
    out_root: &Path,
    sniffer: &dyn FileTypeSniffer,
    workers: usize,
) -> Vec<String> {
    let scopes = vec![
        Scope { kind: ScopeKind::System, base: out_root.join("system") },
        Scope { kind: ScopeKind::Root, base: out_root.join("root") },
        Scope { kind: ScopeKind::TopLevelData, base: out_root.to_path_buf() },
        Scope { kind: ScopeKind::StaticLibraries, base: out_root.join("obj/STATIC_LIBRARIES") },
        Scope { kind: ScopeKind::Remainder, base: out_root.to_path_buf() },
        Scope { kind: ScopeKind::Fonts, base: out_root.join("system/fonts") },
    ];

    let found = parallel_map(scopes, workers, |chunk| {
        let mut hits = Vec::new();
        for scope in chunk {
            hits.extend(search_scope(&scope, out_root, sniffer));
        }
        hits
    });

    let mut unique = BTreeSet::new();
    for path in found {
        let text = path.to_string_lossy();
        if EXCLUDED_PATHS.iter().any(|re| re.is_match(&text)) {
            debug!(path = %text, "excluded path");
            continue;
        }
        if !is_binary_content(&path) {
            debug!(path = %text, "text content; not a binary");
            continue;
        }
        if let Ok(rel) = path.strip_prefix(out_root) {
            unique.insert(rel.to_string_lossy().to_string());
        }
    }

    info!(count = unique.len(), sniffer = sniffer.name(), "discovered binaries");
    unique.into_iter().collect()
}

fn search_scope(scope: &Scope, out_root: &Path, sniffer: &dyn FileTypeSniffer) -> Vec<PathBuf> {
    if !scope.base.is_dir() {
        debug!(scope = ?scope.kind, base = %scope.base.display(), "scope missing; skipped");
        return Vec::new();
    }

    let mut walker = WalkDir::new(&scope.base).follow_links(false);
    if scope.kind == ScopeKind::TopLevelData {
        walker = walker.max_depth(1);
    }

    let mut hits = Vec::new();
    let mut entries = walker.into_iter();
    while let Some(entry) = entries.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!(scope = ?scope.kind, error = %e, "walk error");
                continue;
            }
        };
        if scope.kind == ScopeKind::Remainder
            && entry.file_type().is_dir()
            && is_pruned(entry.path(), out_root)
        {
            entries.skip_current_dir();
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(description) = sniffer.describe(path) else {
            continue;
        };
        if scope_accepts(scope.kind, path, &description) {
            hits.push(path.to_path_buf());
        }
    }
    hits
}

fn is_pruned(dir: &Path, out_root: &Path) -> bool {
    let Ok(rel) = dir.strip_prefix(out_root) else {
        return false;
    };
    let mut components = rel.components();
    let Some(first) = components.next() else {
        return false;
    };
    if components.next().is_some() {
        return false;
    }
    let name = first.as_os_str().to_string_lossy();
    PRUNED_TOP_LEVEL.contains(&name.as_ref())
        || name.starts_with("obj")
        || name.starts_with("factory_")
}

/// Whether an entry found in a scope passes that scope's type filter.
pub fn scope_accepts(kind: ScopeKind, path: &Path, description: &str) -> bool {
    let name = path.to_string_lossy();
    let executable_like = description.contains("ELF ")
        || description.contains("ARM,")
        || name.contains(".jar")
        || name.contains(".apk")
        || description.contains(".jar")
        || description.contains(".apk");
    let object = name.ends_with(".o");
    let odex = name.ends_with(".odex");

    match kind {
        ScopeKind::System | ScopeKind::Remainder => executable_like && !object && !odex,
        ScopeKind::Root => executable_like && !object,
        ScopeKind::TopLevelData => description.ends_with("data") && !name.contains(".img"),
        ScopeKind::StaticLibraries => description.contains("ar archive"),
        ScopeKind::Fonts => description.contains("font") || description.contains("Font"),
    }
}

/// Content sniff that rejects text files.
pub fn is_binary_content(path: &Path) -> bool {
    let always_binary = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| ALWAYS_BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if always_binary {
        return true;
    }
    match read_head(path, SNIFF_LEN) {
        Some(head) => !looks_like_text(&head),
        None => false,
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte sequence cut off by the sniff window is still text.
        Err(e) => e.error_len().is_none(),
    }
}

fn read_head(path: &Path, len: usize) -> Option<Vec<u8>> {
    let file = File::open(path).ok()?;
    let mut head = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut head).ok()?;
    Some(head)
}
