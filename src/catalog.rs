use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{IngestError, IngestResult};
use crate::identifier::Metadata;
use crate::query::{Field, Predicate, Query};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub id: i64,
    pub source_url: String,
}

/// Source of documents awaiting ingestion, and where their outcome is noted.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Rows with a source URL, in id order, `limit` rows starting at `offset`.
    async fn fetch_pending(&self, offset: usize, limit: usize) -> IngestResult<Vec<CatalogRow>>;

    async fn count_pending(&self) -> IngestResult<usize>;

    /// Expected highlight annotation for a source URL, used by the skip check.
    async fn annotation_for(&self, source_url: &str) -> IngestResult<Option<String>>;

    async fn mark_processed(&self, id: i64, metadata: &Metadata) -> IngestResult<()>;

    async fn mark_failed(&self, id: i64, error: &str) -> IngestResult<()>;
}

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TalkRow {
    pub id: i64,
    pub source_url: Option<String>,
    pub english_name: Option<String>,
    pub year: Option<String>,
    pub processed_at: Option<String>,
    pub last_error: Option<String>,
}

pub struct CatalogStats {
    pub total: usize,
    pub with_url: usize,
    pub processed: usize,
    pub failed: usize,
}

impl SqliteCatalog {
    pub fn open(path: &Path, busy_timeout: Duration) -> IngestResult<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| IngestError::CreateDir {
                path: dir.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, busy_timeout)
    }

    pub fn from_connection(conn: Connection, busy_timeout: Duration) -> IngestResult<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(SqliteCatalog {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn init_schema(&self) -> IngestResult<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS talks (
                id                   INTEGER PRIMARY KEY,
                source_url           TEXT UNIQUE,
                highlight_annotation TEXT,
                english_name         TEXT,
                chinese_name         TEXT,
                year                 TEXT,
                topic                TEXT,
                processed_at         TEXT,
                last_error           TEXT,
                created_at           TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_talks_processed ON talks(processed_at);
            ",
        )?;
        Ok(())
    }

    /// Insert `(url, annotation)` pairs, ignoring URLs already present.
    pub fn import(&self, rows: &[(String, Option<String>)]) -> IngestResult<usize> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO talks (source_url, highlight_annotation) VALUES (?1, ?2)",
            )?;
            for (url, annotation) in rows {
                count += stmt.execute(params![url, annotation])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn list(&self, query: &Query) -> IngestResult<Vec<TalkRow>> {
        let (sql, values) =
            query.build("id, source_url, english_name, year, processed_at, last_error");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(TalkRow {
                    id: row.get(0)?,
                    source_url: row.get(1)?,
                    english_name: row.get(2)?,
                    year: row.get(3)?,
                    processed_at: row.get(4)?,
                    last_error: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> IngestResult<CatalogStats> {
        let conn = self.conn();
        let count = |sql: &str| -> rusqlite::Result<usize> { conn.query_row(sql, [], |r| r.get(0)) };
        Ok(CatalogStats {
            total: count("SELECT COUNT(*) FROM talks")?,
            with_url: count("SELECT COUNT(*) FROM talks WHERE source_url IS NOT NULL")?,
            processed: count("SELECT COUNT(*) FROM talks WHERE processed_at IS NOT NULL")?,
            failed: count(
                "SELECT COUNT(*) FROM talks WHERE last_error IS NOT NULL AND processed_at IS NULL",
            )?,
        })
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn fetch_pending(&self, offset: usize, limit: usize) -> IngestResult<Vec<CatalogRow>> {
        let (sql, values) = Query::new()
            .filter(Predicate::is_not_null(Field::SourceUrl))
            .order_by(Field::Id)
            .page(offset, limit)
            .build("id, source_url");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(CatalogRow {
                    id: row.get(0)?,
                    source_url: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn count_pending(&self) -> IngestResult<usize> {
        let (sql, values) = Query::new()
            .filter(Predicate::is_not_null(Field::SourceUrl))
            .build("COUNT(*)");
        let n = self
            .conn()
            .query_row(&sql, params_from_iter(values.iter()), |r| r.get(0))?;
        Ok(n)
    }

    async fn annotation_for(&self, source_url: &str) -> IngestResult<Option<String>> {
        let (sql, values) = Query::new()
            .filter(Predicate::eq(Field::SourceUrl, source_url.to_string()))
            .limit(1)
            .build("highlight_annotation");
        let annotation = self
            .conn()
            .query_row(&sql, params_from_iter(values.iter()), |r| {
                r.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
        Ok(annotation)
    }

    async fn mark_processed(&self, id: i64, metadata: &Metadata) -> IngestResult<()> {
        self.conn().execute(
            "UPDATE talks SET english_name = ?1, chinese_name = ?2, year = ?3, topic = ?4,
                    processed_at = datetime('now'), last_error = NULL
             WHERE id = ?5",
            params![
                metadata.english_name,
                metadata.chinese_name,
                metadata.year,
                metadata.topic,
                id
            ],
        )?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> IngestResult<()> {
        self.conn().execute(
            "UPDATE talks SET last_error = ?1 WHERE id = ?2",
            params![error, id],
        )?;
        Ok(())
    }
}
