//! Citation graph: which decisions cite which statutes, and how often each
//! decision is cited by later ones.
//!
//! The graph is an optional collaborator. The engine opens it fail-soft at
//! startup; when it is missing or broken, searching continues with the
//! statute-boost signal at zero and an unchanged response schema.

use ahash::AHashMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OpenFlags};
use std::path::Path;

use super::DbPool;
use crate::decision::DecisionId;
use crate::error::{IudexError, Result};

pub struct CitationGraph {
    pool: DbPool,
}

impl CitationGraph {
    /// Open read-write, creating the database and applying migrations.
    pub fn create(db_path: &Path, pool_size: u32) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IudexError::Io {
                source: e,
                context: format!("Failed to create citation graph directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| IudexError::corpus("citation-graph", format!("connection pool: {e}")))?;

        {
            let conn = pool
                .get()
                .map_err(|e| IudexError::corpus("citation-graph", format!("connection: {e}")))?;
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let graph = Self { pool };
        graph.migrate()?;
        Ok(graph)
    }

    /// Open for serving, read-only.
    pub fn open_read_only(db_path: &Path, pool_size: u32) -> Result<Self> {
        if !db_path.exists() {
            return Err(IudexError::corpus(
                "citation-graph",
                format!("database not found: {}", db_path.display()),
            ));
        }

        let manager = SqliteConnectionManager::file(db_path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| IudexError::corpus("citation-graph", format!("connection pool: {e}")))?;

        Ok(Self { pool })
    }

    fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| IudexError::corpus("citation-graph", format!("connection: {e}")))
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
                tracing::info!("Applying citation graph migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Record that a decision cites a statute `mentions` times.
    pub fn record_statute(
        &self,
        decision_id: DecisionId,
        statute_key: &str,
        mentions: u32,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO statute_citations (decision_id, statute, mentions)
             VALUES (?1, ?2, ?3)",
            params![decision_id, statute_key, mentions],
        )?;
        Ok(())
    }

    /// Record how often a decision is cited by others and how many
    /// decisions it cites itself.
    pub fn set_citation_counts(
        &self,
        decision_id: DecisionId,
        incoming: u32,
        outgoing: u32,
    ) -> Result<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO citation_counts (decision_id, incoming, outgoing)
             VALUES (?1, ?2, ?3)",
            params![decision_id, incoming, outgoing],
        )?;
        Ok(())
    }

    /// All decisions citing a statute, with their mention counts.
    pub fn statute_citers(&self, statute_key: &str) -> Result<AHashMap<DecisionId, u32>> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare("SELECT decision_id, mentions FROM statute_citations WHERE statute = ?1")?;
        let rows = stmt.query_map(params![statute_key], |row| {
            Ok((row.get::<_, DecisionId>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut citers = AHashMap::new();
        for row in rows {
            let (id, mentions) = row?;
            citers.insert(id, mentions);
        }
        Ok(citers)
    }

    /// Incoming citation counts for a batch of decisions. Decisions never
    /// cited are simply absent from the map.
    pub fn incoming_counts(&self, ids: &[DecisionId]) -> Result<AHashMap<DecisionId, u32>> {
        if ids.is_empty() {
            return Ok(AHashMap::new());
        }

        let conn = self.get_conn()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let mut stmt = conn.prepare(&format!(
            "SELECT decision_id, incoming FROM citation_counts WHERE decision_id IN ({placeholders})"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, DecisionId>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut counts = AHashMap::new();
        for row in rows {
            let (id, incoming) = row?;
            counts.insert(id, incoming);
        }
        Ok(counts)
    }
}

const MIGRATIONS: &[&str] = &[
    // Migration 1: statute citations and citation counts
    r#"
    CREATE TABLE statute_citations (
        decision_id INTEGER NOT NULL,
        statute TEXT NOT NULL,
        mentions INTEGER NOT NULL DEFAULT 1,
        PRIMARY KEY (decision_id, statute)
    );

    CREATE INDEX idx_statute_citations_statute ON statute_citations(statute);

    CREATE TABLE citation_counts (
        decision_id INTEGER PRIMARY KEY,
        incoming INTEGER NOT NULL DEFAULT 0,
        outgoing INTEGER NOT NULL DEFAULT 0
    );
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_statute_citers() {
        let temp = TempDir::new().unwrap();
        let graph = CitationGraph::create(&temp.path().join("c.db"), 2).unwrap();

        graph.record_statute(1, "art 8 bv", 4).unwrap();
        graph.record_statute(2, "art 8 bv", 1).unwrap();
        graph.record_statute(2, "art 271 or", 2).unwrap();

        let citers = graph.statute_citers("art 8 bv").unwrap();
        assert_eq!(citers.len(), 2);
        assert_eq!(citers[&1], 4);
        assert_eq!(citers[&2], 1);

        assert!(graph.statute_citers("art 5 stgb").unwrap().is_empty());
    }

    #[test]
    fn test_incoming_counts_are_sparse() {
        let temp = TempDir::new().unwrap();
        let graph = CitationGraph::create(&temp.path().join("c.db"), 2).unwrap();

        graph.set_citation_counts(1, 12, 3).unwrap();
        graph.set_citation_counts(2, 0, 7).unwrap();

        let counts = graph.incoming_counts(&[1, 2, 3]).unwrap();
        assert_eq!(counts[&1], 12);
        assert_eq!(counts[&2], 0);
        assert!(!counts.contains_key(&3));

        assert!(graph.incoming_counts(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_missing_db_is_corpus_error() {
        let result = CitationGraph::open_read_only(Path::new("/nonexistent/c.db"), 2);
        assert!(matches!(
            result,
            Err(IudexError::CorpusUnavailable { subsystem: "citation-graph", .. })
        ));
    }

    #[test]
    fn test_read_only_sees_written_graph() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("c.db");
        {
            let graph = CitationGraph::create(&db_path, 2).unwrap();
            graph.record_statute(5, "art 336 or", 2).unwrap();
        }

        let graph = CitationGraph::open_read_only(&db_path, 2).unwrap();
        let citers = graph.statute_citers("art 336 or").unwrap();
        assert_eq!(citers[&5], 2);
        assert!(graph.record_statute(6, "art 1 or", 1).is_err());
    }
}
