//! Binary identity database integration.
//!
//! The identity database records, for binaries seen in earlier audits, the
//! file name, hashes, and the open-source component they were attributed to.
//! It is consumed read-only through the [`IdentityDatabase`] trait:
//! - `SqliteIdentityDb`: a local snapshot (`sqlite:<path>`).
//! - `PostgresIdentityDb`: the shared server (`postgres://...`), behind the
//!   `postgres-backend` feature.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "postgres-backend")]
pub mod pg;
pub mod sqlite;

#[cfg(feature = "postgres-backend")]
pub use pg::{PostgresConnector, PostgresIdentityDb};
pub use sqlite::{SqliteConnector, SqliteIdentityDb};

/// Error type for identity database operations.
#[derive(Debug, Error)]
pub enum IdentityDbError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[cfg(feature = "postgres-backend")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] postgres::Error),

    /// The snapshot was created with a newer schema than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },

    #[error("Unsupported identity database URL: {0}")]
    UnsupportedUrl(String),

    #[error("Identity database not found: {}", .0.display())]
    NotFound(std::path::PathBuf),

    #[error("Identity database has no `{0}` table")]
    MissingTable(&'static str),
}

/// Convenience result type for identity database operations.
pub type IdentityDbResult<T> = Result<T, IdentityDbError>;

/// One identity database row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRow {
    pub file_name: String,
    pub path_name: String,
    pub checksum: String,
    pub tlsh: String,
    pub oss_name: String,
    pub oss_version: String,
    pub license: String,
    pub platform_name: String,
    pub platform_version: String,
}

/// Parameters for ranking fuzzy-hash candidates by relevance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankContext<'a> {
    pub source_path: &'a str,
    pub platform_name: &'a str,
    pub platform_version: &'a str,
}

/// Read-only queries against the identity database.
pub trait IdentityDatabase {
    /// Rows whose file name and exact checksum both match.
    fn find_exact(&mut self, file_name: &str, checksum: &str) -> IdentityDbResult<Vec<IdentityRow>>;

    /// Fuzzy hashes of rows with this file name, most relevant first.
    ///
    /// Rows with the sentinel hash are excluded. Relevance: same source path
    /// and same platform + version, same source path and platform, same
    /// platform + version, same platform, anything else; newer rows first
    /// within a rank.
    fn ranked_fuzzy_hashes(
        &mut self,
        file_name: &str,
        rank: &RankContext<'_>,
    ) -> IdentityDbResult<Vec<String>>;

    /// Rows with this file name and fuzzy hash.
    fn find_by_fuzzy(&mut self, file_name: &str, tlsh: &str) -> IdentityDbResult<Vec<IdentityRow>>;
}

/// Opens a connection per worker.
pub trait IdentityConnector: Send + Sync {
    fn connect(&self) -> IdentityDbResult<Box<dyn IdentityDatabase>>;
    fn name(&self) -> &'static str;
}

/// Choose a connector for a configured URL.
pub fn connector_for_url(url: &str) -> IdentityDbResult<Box<dyn IdentityConnector>> {
    let url = url.trim();
    if let Some(path) = url.strip_prefix("sqlite:") {
        return Ok(Box::new(SqliteConnector::new(path)));
    }
    if url.ends_with(".db") || url.ends_with(".sqlite") {
        return Ok(Box::new(SqliteConnector::new(url)));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") || url.contains("host=")
    {
        return postgres_connector(url);
    }
    Err(IdentityDbError::UnsupportedUrl(url.to_string()))
}

#[cfg(feature = "postgres-backend")]
fn postgres_connector(url: &str) -> IdentityDbResult<Box<dyn IdentityConnector>> {
    Ok(Box::new(PostgresConnector::new(url)))
}

#[cfg(not(feature = "postgres-backend"))]
fn postgres_connector(url: &str) -> IdentityDbResult<Box<dyn IdentityConnector>> {
    Err(IdentityDbError::UnsupportedUrl(format!("{url} (built without postgres-backend)")))
}
