use std::path::{Path, PathBuf};

use rusqlite::{named_params, params, Connection, OpenFlags, Row};

use crate::db::{
    IdentityConnector, IdentityDatabase, IdentityDbError, IdentityDbResult, IdentityRow,
    RankContext,
};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh snapshot).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

const SELECT_ROWS: &str = r#"
    SELECT filename, pathname, checksum, tlshchecksum, ossname, ossversion, license,
           platformname, platformversion
    FROM lgematching
"#;

const SELECT_RANKED_TLSH: &str = r#"
    SELECT tlshchecksum
    FROM lgematching
    WHERE filename = :fname AND tlshchecksum <> '0'
    ORDER BY (
        CASE
            WHEN sourcepath = :src_path AND lower(platformname) = :plat_name
                 AND platformversion = :plat_version THEN 1
            WHEN sourcepath = :src_path AND lower(platformname) = :plat_name THEN 2
            WHEN lower(platformname) = :plat_name AND platformversion = :plat_version THEN 3
            WHEN lower(platformname) = :plat_name THEN 4
            ELSE 5
        END
    ), updatedate DESC
"#;

/// SQLite snapshot of the identity database.
#[derive(Debug)]
pub struct SqliteIdentityDb {
    conn: Connection,
}

impl SqliteIdentityDb {
    /// Open an existing snapshot read-only.
    ///
    /// The file must exist and carry the `lgematching` table; nothing is
    /// created or migrated.
    pub fn open(path: &Path) -> IdentityDbResult<Self> {
        if !path.is_file() {
            return Err(IdentityDbError::NotFound(path.to_path_buf()));
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        check_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Create (or upgrade) a writable snapshot at the given path.
    ///
    /// Used to seed local snapshots and test fixtures; audits only ever go
    /// through [`SqliteIdentityDb::open`].
    pub fn create(path: &Path) -> IdentityDbResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Writable in-memory snapshot, mostly for tests.
    pub fn open_in_memory() -> IdentityDbResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert a row with an explicit source path and update date.
    pub fn insert_row(
        &self,
        row: &IdentityRow,
        source_path: &str,
        update_date: &str,
    ) -> IdentityDbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO lgematching (filename, pathname, checksum, tlshchecksum, ossname,
                                     ossversion, license, platformname, platformversion,
                                     sourcepath, updatedate)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                row.file_name,
                row.path_name,
                row.checksum,
                row.tlsh,
                row.oss_name,
                row.oss_version,
                row.license,
                row.platform_name,
                row.platform_version,
                source_path,
                update_date,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn query_rows(
        &self,
        filter: &str,
        params: &[(&str, &dyn rusqlite::ToSql)],
    ) -> IdentityDbResult<Vec<IdentityRow>> {
        let sql = format!("{SELECT_ROWS} {filter}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params, row_to_identity)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl IdentityDatabase for SqliteIdentityDb {
    fn find_exact(&mut self, file_name: &str, checksum: &str) -> IdentityDbResult<Vec<IdentityRow>> {
        self.query_rows(
            "WHERE filename = :fname AND checksum = :checksum ORDER BY id",
            named_params! { ":fname": file_name, ":checksum": checksum },
        )
    }

    fn ranked_fuzzy_hashes(
        &mut self,
        file_name: &str,
        rank: &RankContext<'_>,
    ) -> IdentityDbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(SELECT_RANKED_TLSH)?;
        let rows = stmt.query_map(
            named_params! {
                ":fname": file_name,
                ":src_path": rank.source_path,
                ":plat_name": rank.platform_name.to_lowercase(),
                ":plat_version": rank.platform_version,
            },
            |row| row.get::<_, Option<String>>(0),
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?.unwrap_or_default());
        }
        Ok(out)
    }

    fn find_by_fuzzy(&mut self, file_name: &str, tlsh: &str) -> IdentityDbResult<Vec<IdentityRow>> {
        self.query_rows(
            "WHERE filename = :fname AND tlshchecksum = :tlsh ORDER BY id",
            named_params! { ":fname": file_name, ":tlsh": tlsh },
        )
    }
}

fn row_to_identity(row: &Row<'_>) -> rusqlite::Result<IdentityRow> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };
    Ok(IdentityRow {
        file_name: text(0)?,
        path_name: text(1)?,
        checksum: text(2)?,
        tlsh: text(3)?,
        oss_name: text(4)?,
        oss_version: text(5)?,
        license: text(6)?,
        platform_name: text(7)?,
        platform_version: text(8)?,
    })
}

/// Opens one [`SqliteIdentityDb`] per worker.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityConnector for SqliteConnector {
    fn connect(&self) -> IdentityDbResult<Box<dyn IdentityDatabase>> {
        Ok(Box::new(SqliteIdentityDb::open(&self.path)?))
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}

fn current_schema_version(conn: &Connection) -> IdentityDbResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

fn ensure_supported_version(version: i32) -> IdentityDbResult<()> {
    if version > CURRENT_SCHEMA_VERSION {
        return Err(IdentityDbError::UnsupportedSchemaVersion {
            found: version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Read-only validation of an existing snapshot.
fn check_schema(conn: &Connection) -> IdentityDbResult<()> {
    ensure_supported_version(current_schema_version(conn)?)?;
    let tables: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'lgematching'",
        [],
        |row| row.get(0),
    )?;
    if tables == 0 {
        return Err(IdentityDbError::MissingTable("lgematching"));
    }
    Ok(())
}

fn apply_migrations(conn: &Connection) -> IdentityDbResult<()> {
    let mut current_version = current_schema_version(conn)?;
    ensure_supported_version(current_version)?;

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS lgematching (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                filename        TEXT NOT NULL,
                pathname        TEXT,
                checksum        TEXT,
                tlshchecksum    TEXT,
                ossname         TEXT,
                ossversion      TEXT,
                license         TEXT,
                platformname    TEXT,
                platformversion TEXT,
                sourcepath      TEXT,
                updatedate      TEXT
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE INDEX IF NOT EXISTS idx_lgematching_filename ON lgematching (filename);
            CREATE INDEX IF NOT EXISTS idx_lgematching_checksum ON lgematching (filename, checksum);

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}
