//! SQLite decision store with migrations.
//!
//! The corpus is written once at build time and served read-only. Full text
//! is zstd-compressed per row; docket lookups go through a normalized column
//! so `6B_1234/2025`, `6b 1234/2025` and `6B.1234/2025` all resolve to the
//! same row.

use chrono::NaiveDate;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OpenFlags};
use std::path::Path;

use crate::decision::{Decision, DecisionId};
use crate::error::{IudexError, Result};
use crate::query::normalize_docket;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const ZSTD_LEVEL: i32 = 3;

const DECISION_COLUMNS: &str = "id, docket_number, court, canton, chamber, language, \
     decision_type, decision_date, title, regeste, full_text";

/// Decision store with migration support.
pub struct DecisionStore {
    pool: DbPool,
}

impl DecisionStore {
    /// Open read-write, creating the database and applying migrations.
    /// Corpus-build side only.
    pub fn create(db_path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IudexError::Io {
                source: e,
                context: format!("Failed to create store directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| IudexError::corpus("decision-store", format!("connection pool: {e}")))?;

        {
            let conn = pool
                .get()
                .map_err(|e| IudexError::corpus("decision-store", format!("connection: {e}")))?;

            // WAL keeps readers unblocked during the build
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    /// Open for serving. The connection flags reject writes outright, so a
    /// misbehaving caller cannot corrupt a live corpus.
    pub fn open_read_only(db_path: &Path, pool_size: u32) -> Result<Self> {
        if !db_path.exists() {
            return Err(IudexError::corpus(
                "decision-store",
                format!("database not found: {}", db_path.display()),
            ));
        }

        let manager = SqliteConnectionManager::file(db_path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| IudexError::corpus("decision-store", format!("connection pool: {e}")))?;

        {
            let conn = pool
                .get()
                .map_err(|e| IudexError::corpus("decision-store", format!("connection: {e}")))?;
            conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        }

        Ok(Self { pool })
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| IudexError::corpus("decision-store", format!("connection: {e}")))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;
            if version > current_version {
                tracing::info!("Applying decision store migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert one decision. Full text is compressed, the docket number is
    /// additionally stored in canonical form for lookup.
    pub fn insert_decision(&self, decision: &Decision) -> Result<()> {
        let conn = self.get_conn()?;
        let compressed = zstd::encode_all(decision.full_text.as_bytes(), ZSTD_LEVEL).map_err(
            |e| IudexError::Io {
                source: e,
                context: format!("Failed to compress full text of decision {}", decision.id),
            },
        )?;

        conn.execute(
            "INSERT INTO decisions (id, docket_number, docket_norm, court, canton, chamber, \
             language, decision_type, decision_date, title, regeste, full_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                decision.id,
                decision.docket_number,
                normalize_docket(&decision.docket_number),
                decision.court,
                decision.canton,
                decision.chamber,
                decision.language,
                decision.decision_type,
                decision.decision_date.format("%Y-%m-%d").to_string(),
                decision.title,
                decision.regeste,
                compressed,
            ],
        )?;
        Ok(())
    }

    pub fn get_by_id(&self, id: DecisionId) -> Result<Option<Decision>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DECISION_COLUMNS} FROM decisions WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![id], row_to_decision)?;
        rows.next().transpose().map_err(IudexError::from)
    }

    /// Lookup by docket number, tolerant of separator and case variants.
    pub fn get_by_docket(&self, docket: &str) -> Result<Option<Decision>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DECISION_COLUMNS} FROM decisions WHERE docket_norm = ?1"
        ))?;
        let mut rows = stmt.query_map(params![normalize_docket(docket)], row_to_decision)?;
        rows.next().transpose().map_err(IudexError::from)
    }

    /// Fetch a batch of decisions by id. Missing ids are skipped; the
    /// returned order is arbitrary and callers re-associate by id.
    pub fn get_batch(&self, ids: &[DecisionId]) -> Result<Vec<Decision>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT {DECISION_COLUMNS} FROM decisions WHERE id IN ({placeholders})"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), row_to_decision)?;

        let mut decisions = Vec::with_capacity(ids.len());
        for row in rows {
            decisions.push(row?);
        }
        Ok(decisions)
    }

    /// Persist the embedding vector of a decision.
    pub fn put_embedding(&self, id: DecisionId, vector: &[f32], model: &str) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO embeddings (decision_id, vector, model) VALUES (?1, ?2, ?3)",
            params![id, vector_to_blob(vector), model],
        )?;
        Ok(())
    }

    /// All embeddings produced by `model`, for rebuilding the vector index
    /// at startup.
    pub fn embeddings(&self, model: &str) -> Result<Vec<(DecisionId, Vec<f32>)>> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT decision_id, vector FROM embeddings WHERE model = ?1")?;
        let rows = stmt.query_map(params![model], |row| {
            let id: DecisionId = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((id, blob_to_vector(&blob)))
        })?;

        let mut embeddings = Vec::new();
        for row in rows {
            embeddings.push(row?);
        }
        Ok(embeddings)
    }

    /// Number of stored decisions.
    pub fn count(&self) -> Result<u64> {
        let conn = self.get_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM decisions", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

fn row_to_decision(row: &rusqlite::Row<'_>) -> rusqlite::Result<Decision> {
    let date_text: String = row.get(7)?;
    let decision_date = NaiveDate::parse_from_str(&date_text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let compressed: Vec<u8> = row.get(10)?;
    let raw = zstd::decode_all(&compressed[..]).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Blob, Box::new(e))
    })?;
    let full_text = String::from_utf8(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Blob, Box::new(e))
    })?;

    Ok(Decision {
        id: row.get(0)?,
        docket_number: row.get(1)?,
        court: row.get(2)?,
        canton: row.get(3)?,
        chamber: row.get(4)?,
        language: row.get(5)?,
        decision_type: row.get(6)?,
        decision_date,
        title: row.get(8)?,
        regeste: row.get(9)?,
        full_text,
    })
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: decisions and embeddings
    r#"
    CREATE TABLE decisions (
        id INTEGER PRIMARY KEY,
        docket_number TEXT NOT NULL,
        docket_norm TEXT NOT NULL,
        court TEXT NOT NULL,
        canton TEXT NOT NULL,
        chamber TEXT NOT NULL,
        language TEXT NOT NULL,
        decision_type TEXT NOT NULL,
        decision_date TEXT NOT NULL,
        title TEXT NOT NULL,
        regeste TEXT NOT NULL,
        full_text BLOB NOT NULL
    );

    CREATE INDEX idx_decisions_docket_norm ON decisions(docket_norm);
    CREATE INDEX idx_decisions_date ON decisions(decision_date);
    CREATE INDEX idx_decisions_court ON decisions(court);

    CREATE TABLE embeddings (
        decision_id INTEGER PRIMARY KEY,
        vector BLOB NOT NULL,
        model TEXT NOT NULL,
        FOREIGN KEY (decision_id) REFERENCES decisions(id) ON DELETE CASCADE
    );

    CREATE INDEX idx_embeddings_model ON embeddings(model);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(id: DecisionId, docket: &str) -> Decision {
        Decision {
            id,
            docket_number: docket.to_string(),
            court: "BGer".to_string(),
            canton: "CH".to_string(),
            chamber: "Strafrechtliche Abteilung".to_string(),
            language: "de".to_string(),
            decision_type: "urteil".to_string(),
            decision_date: NaiveDate::from_ymd_opt(2024, 3, 12).unwrap(),
            title: "Willkürliche Beweiswürdigung".to_string(),
            regeste: "Anforderungen an die Beweiswürdigung im Strafverfahren.".to_string(),
            full_text: "Das Bundesgericht zieht in Erwägung...".repeat(50),
        }
    }

    #[test]
    fn test_store_creation() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("decisions.db");
        let _store = DecisionStore::create(&db_path, 4).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations_recorded() {
        let temp = TempDir::new().unwrap();
        let store = DecisionStore::create(&temp.path().join("d.db"), 4).unwrap();

        let conn = store.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_roundtrip_preserves_text_and_date() {
        let temp = TempDir::new().unwrap();
        let store = DecisionStore::create(&temp.path().join("d.db"), 4).unwrap();

        let decision = sample(1, "6B_1234/2024");
        store.insert_decision(&decision).unwrap();

        let loaded = store.get_by_id(1).unwrap().unwrap();
        assert_eq!(loaded.full_text, decision.full_text);
        assert_eq!(loaded.decision_date, decision.decision_date);
        assert_eq!(loaded.docket_number, "6B_1234/2024");
    }

    #[test]
    fn test_docket_lookup_tolerates_variants() {
        let temp = TempDir::new().unwrap();
        let store = DecisionStore::create(&temp.path().join("d.db"), 4).unwrap();
        store.insert_decision(&sample(1, "6B_1234/2024")).unwrap();

        for variant in ["6B_1234/2024", "6b 1234/2024", "6B.1234/2024"] {
            let found = store.get_by_docket(variant).unwrap();
            assert!(found.is_some(), "variant: {variant}");
            assert_eq!(found.unwrap().id, 1);
        }
        assert!(store.get_by_docket("1C_99/2020").unwrap().is_none());
    }

    #[test]
    fn test_get_batch_skips_missing() {
        let temp = TempDir::new().unwrap();
        let store = DecisionStore::create(&temp.path().join("d.db"), 4).unwrap();
        store.insert_decision(&sample(1, "6B_1/2024")).unwrap();
        store.insert_decision(&sample(2, "6B_2/2024")).unwrap();

        let batch = store.get_batch(&[2, 99, 1]).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(store.get_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_embedding_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = DecisionStore::create(&temp.path().join("d.db"), 4).unwrap();
        store.insert_decision(&sample(1, "6B_1/2024")).unwrap();

        let vector: Vec<f32> = (0..384).map(|i| i as f32 * 0.25).collect();
        store.put_embedding(1, &vector, "multilingual-e5-small").unwrap();

        let loaded = store.embeddings("multilingual-e5-small").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, 1);
        assert_eq!(loaded[0].1, vector);

        assert!(store.embeddings("other-model").unwrap().is_empty());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("d.db");
        {
            let store = DecisionStore::create(&db_path, 4).unwrap();
            store.insert_decision(&sample(1, "6B_1/2024")).unwrap();
        }

        let store = DecisionStore::open_read_only(&db_path, 4).unwrap();
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.insert_decision(&sample(2, "6B_2/2024")).is_err());
    }

    #[test]
    fn test_read_only_missing_file_is_corpus_error() {
        let result = DecisionStore::open_read_only(Path::new("/nonexistent/d.db"), 4);
        assert!(matches!(
            result,
            Err(IudexError::CorpusUnavailable { subsystem: "decision-store", .. })
        ));
    }
}
