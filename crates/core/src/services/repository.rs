//! Repository-name table and path-prefix OSS inference.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::model::{BinaryRecord, GENERIC_OSS_NAME};

/// Repo manifest checked out by `repo init`, relative to the source tree root.
pub const REPO_MANIFEST_PATH: &str = ".repo/manifest.xml";

const AOSP_REVIEW_HOST: &str = "android-review.googlesource.com";

static REMOTE_REVIEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<remote\b[^>]*\breview\s*=\s*"([^"]*)""#).expect("remote review regex")
});
static PROJECT_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<project\b[^>]*?\bpath\s*=\s*"([^"]+)""#).expect("project path regex")
});
static REPO_LIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<span[^>]*class="[^"]*\bRepoList-itemName\b[^"]*"[^>]*>([^<]+)</span>"#)
        .expect("repo list item regex")
});

/// Repository relative path → download URL (possibly empty).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryTable {
    repos: BTreeMap<String, String>,
}

/// A repository prefix matched against a source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHit<'a> {
    pub prefix: String,
    pub url: &'a str,
}

impl RepositoryTable {
    pub fn from_map(repos: BTreeMap<String, String>) -> Self {
        Self { repos }
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Longest `/`-segment prefix of `source_path` present in the table.
    pub fn infer(&self, source_path: &str) -> Option<RepositoryHit<'_>> {
        let segments: Vec<&str> = source_path.split('/').collect();
        (1..=segments.len()).rev().find_map(|len| {
            let prefix = segments[..len].join("/");
            self.repos.get(&prefix).map(|url| RepositoryHit { url, prefix })
        })
    }
}

/// Parse a repo manifest. Only manifests whose remote reviews on AOSP yield
/// entries; every `<project path=...>` maps to an empty URL.
pub fn parse_manifest_xml(body: &str) -> Option<RepositoryTable> {
    let is_aosp = REMOTE_REVIEW_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .any(|review| review.as_str().contains(AOSP_REVIEW_HOST));
    if !is_aosp {
        return None;
    }

    let repos = PROJECT_PATH_RE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|path| (path.as_str().to_string(), String::new()))
        .collect();
    Some(RepositoryTable { repos })
}

/// Parse a repository listing page: each `RepoList-itemName` span names a
/// repository hosted under `base_url`.
pub fn parse_repo_listing(html: &str, base_url: &str) -> BTreeMap<String, String> {
    REPO_LIST_ITEM_RE
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|name| {
            let name = name.as_str().trim();
            (name.to_string(), format!("{base_url}{name}"))
        })
        .collect()
}

/// Source of the repository table.
pub trait RepositoryProvider: Send + Sync {
    fn load(&self, workdir: &Path) -> RepositoryTable;
}

/// Manifest, then web listing pages, then an offline JSON table.
#[derive(Debug, Clone, Default)]
pub struct DefaultRepositoryProvider {
    pub listing_urls: Vec<String>,
    pub json_path: Option<std::path::PathBuf>,
}

impl DefaultRepositoryProvider {
    pub fn new(listing_urls: Vec<String>, json_path: Option<std::path::PathBuf>) -> Self {
        Self { listing_urls, json_path }
    }

    fn from_manifest(&self, workdir: &Path) -> Option<RepositoryTable> {
        let body = std::fs::read_to_string(workdir.join(REPO_MANIFEST_PATH)).ok()?;
        parse_manifest_xml(&body).filter(|table| !table.is_empty())
    }

    fn from_web(&self) -> RepositoryTable {
        let mut repos = BTreeMap::new();
        for url in &self.listing_urls {
            match fetch_page(url) {
                Ok(html) => repos.extend(parse_repo_listing(&html, url)),
                Err(e) => debug!(url = %url, error = %e, "repository listing fetch failed"),
            }
        }
        RepositoryTable { repos }
    }

    fn from_json(&self) -> RepositoryTable {
        let Some(path) = &self.json_path else {
            return RepositoryTable::default();
        };
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|body| {
                serde_json::from_str::<BTreeMap<String, String>>(&body).map_err(|e| e.to_string())
            });
        match parsed {
            Ok(repos) => RepositoryTable { repos },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "repository table file unusable");
                RepositoryTable::default()
            }
        }
    }
}

impl RepositoryProvider for DefaultRepositoryProvider {
    fn load(&self, workdir: &Path) -> RepositoryTable {
        if let Some(table) = self.from_manifest(workdir) {
            info!(repositories = table.len(), source = "manifest", "loaded repository table");
            return table;
        }
        let web = self.from_web();
        if !web.is_empty() {
            info!(repositories = web.len(), source = "web", "loaded repository table");
            return web;
        }
        let json = self.from_json();
        info!(repositories = json.len(), source = "json", "loaded repository table");
        json
    }
}

fn fetch_page(url: &str) -> Result<String, ureq::Error> {
    let mut response = ureq::get(url).call()?;
    response.body_mut().read_to_string()
}

/// Repository inference stage.
///
/// Applies to records whose OSS name is empty or generic, that have a source
/// path, and whose license is not in `skip_licenses`.
pub fn infer_oss_names(
    records: &mut [BinaryRecord],
    table: &RepositoryTable,
    platform_version: &str,
    skip_licenses: &[String],
) {
    if table.is_empty() {
        warn!("repository table is empty; OSS name inference skipped");
        return;
    }
    for record in records.iter_mut() {
        let name = record.oss_name_str();
        let eligible_name = name.is_empty() || name == GENERIC_OSS_NAME;
        if !eligible_name || !record.has_source_path() {
            continue;
        }
        if skip_licenses.iter().any(|skip| skip == record.license_str()) {
            continue;
        }
        let Some(hit) = table.infer(record.source_path_str()) else {
            continue;
        };
        record.oss_name = Some(format!("android-{}", hit.prefix.replace('/', "-")));
        record.oss_version = Some(platform_version.to_string());
        record.download_location = Some(hit.url.to_string());
        record.homepage = Some(hit.url.to_string());
    }
}
