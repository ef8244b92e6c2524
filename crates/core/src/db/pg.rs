use postgres::{Client, NoTls, Row};

use crate::db::{IdentityConnector, IdentityDatabase, IdentityDbResult, IdentityRow, RankContext};

const SELECT_ROWS: &str = "SELECT filename, pathname, checksum, tlshchecksum, ossname, ossversion, \
                           license, platformname, platformversion FROM lgematching";

const SELECT_RANKED_TLSH: &str = r#"
    SELECT tlshchecksum
    FROM lgematching
    WHERE filename = $1 AND tlshchecksum <> '0'
    ORDER BY (
        CASE
            WHEN sourcepath = $2 AND lower(platformname) = $3 AND platformversion = $4 THEN 1
            WHEN sourcepath = $2 AND lower(platformname) = $3 THEN 2
            WHEN lower(platformname) = $3 AND platformversion = $4 THEN 3
            WHEN lower(platformname) = $3 THEN 4
            ELSE 5
        END
    ), updatedate DESC
"#;

/// Shared identity database server.
pub struct PostgresIdentityDb {
    client: Client,
}

impl PostgresIdentityDb {
    /// Connect with a libpq-style or URL connection string.
    pub fn connect(url: &str) -> IdentityDbResult<Self> {
        let client = Client::connect(url, NoTls)?;
        Ok(Self { client })
    }
}

impl IdentityDatabase for PostgresIdentityDb {
    fn find_exact(&mut self, file_name: &str, checksum: &str) -> IdentityDbResult<Vec<IdentityRow>> {
        let sql = format!("{SELECT_ROWS} WHERE filename = $1 AND checksum = $2");
        let rows = self.client.query(sql.as_str(), &[&file_name, &checksum])?;
        Ok(rows.iter().map(row_to_identity).collect())
    }

    fn ranked_fuzzy_hashes(
        &mut self,
        file_name: &str,
        rank: &RankContext<'_>,
    ) -> IdentityDbResult<Vec<String>> {
        let plat_name = rank.platform_name.to_lowercase();
        let rows = self.client.query(
            SELECT_RANKED_TLSH,
            &[&file_name, &rank.source_path, &plat_name, &rank.platform_version],
        )?;
        Ok(rows.iter().map(|row| text(row, 0)).collect())
    }

    fn find_by_fuzzy(&mut self, file_name: &str, tlsh: &str) -> IdentityDbResult<Vec<IdentityRow>> {
        let sql = format!("{SELECT_ROWS} WHERE filename = $1 AND tlshchecksum = $2");
        let rows = self.client.query(sql.as_str(), &[&file_name, &tlsh])?;
        Ok(rows.iter().map(row_to_identity).collect())
    }
}

fn text(row: &Row, idx: usize) -> String {
    row.try_get::<_, Option<String>>(idx).ok().flatten().unwrap_or_default()
}

fn row_to_identity(row: &Row) -> IdentityRow {
    IdentityRow {
        file_name: text(row, 0),
        path_name: text(row, 1),
        checksum: text(row, 2),
        tlsh: text(row, 3),
        oss_name: text(row, 4),
        oss_version: text(row, 5),
        license: text(row, 6),
        platform_name: text(row, 7),
        platform_version: text(row, 8),
    }
}

/// Opens one [`PostgresIdentityDb`] session per worker.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    url: String,
}

impl PostgresConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl IdentityConnector for PostgresConnector {
    fn connect(&self) -> IdentityDbResult<Box<dyn IdentityDatabase>> {
        Ok(Box::new(PostgresIdentityDb::connect(&self.url)?))
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
