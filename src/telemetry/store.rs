//! SQLite-backed telemetry store: source weights, answer events, feedback.
//!
//! Writes are upsert-by-key or append-only. Event logging is atomic per
//! call; integrity violations (duplicate or unknown correlation id) are the
//! only hard errors the rest of the system surfaces to callers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags};
use thiserror::Error;

/// Weight bounds enforced on every write.
pub const WEIGHT_MIN: f64 = 0.5;
pub const WEIGHT_MAX: f64 = 3.0;

// ============================================================================
// Types
// ============================================================================

/// Integrity and storage failures from telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("correlation id already logged: {0}")]
    DuplicateCorrelationId(String),

    #[error("unknown correlation id: {0}")]
    UnknownCorrelationId(String),

    #[error("telemetry storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("telemetry store lock poisoned")]
    Poisoned,
}

/// One ranked source row belonging to an answer event.
#[derive(Debug, Clone)]
pub struct RankedSource {
    pub source_name: String,
    pub raw_score: f64,
    pub adjusted_score: f64,
    pub rank: i64,
}

/// One (event source, feedback) pair, the training join.
#[derive(Debug, Clone)]
pub struct FeedbackSample {
    pub correlation_id: String,
    pub source_name: String,
    pub is_helpful: bool,
}

// ============================================================================
// TelemetryStore
// ============================================================================

/// Process-wide telemetry store. When disabled, all writes are silent
/// no-ops and weights read as empty (every source defaults to 1.0).
pub struct TelemetryStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    enabled: bool,
}

impl TelemetryStore {
    pub fn open(path: &Path, enabled: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create telemetry directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open telemetry database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
            enabled,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open under the data directory (telemetry.db).
    pub fn open_default(data_dir: &Path, enabled: bool) -> Result<Self> {
        Self::open(&data_dir.join("telemetry.db"), enabled)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock().map_err(|e| anyhow::anyhow!("{}", e))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS source_weight (
                source_name TEXT PRIMARY KEY,
                weight REAL NOT NULL DEFAULT 1.0,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS rag_event (
                correlation_id TEXT PRIMARY KEY,
                question TEXT,
                answer TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS rag_event_source (
                correlation_id TEXT NOT NULL,
                source_name TEXT NOT NULL,
                raw_score REAL,
                adjusted_score REAL,
                rank INTEGER,
                FOREIGN KEY(correlation_id) REFERENCES rag_event(correlation_id)
            );

            CREATE TABLE IF NOT EXISTS rag_feedback (
                correlation_id TEXT NOT NULL,
                is_helpful INTEGER NOT NULL,
                comment TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY(correlation_id) REFERENCES rag_event(correlation_id)
            );

            CREATE TABLE IF NOT EXISTS source_usage (
                source_name TEXT NOT NULL,
                adjusted_score REAL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .context("Failed to create telemetry schema")?;

        tracing::debug!("Telemetry store initialized at {:?}", self.db_path);
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, TelemetryError> {
        self.conn.lock().map_err(|_| TelemetryError::Poisoned)
    }

    // ------------------------------------------------------------------
    // FeedbackRecorder
    // ------------------------------------------------------------------

    /// Persist an answer event and its ranked sources atomically.
    ///
    /// A reused correlation id fails with `DuplicateCorrelationId` and
    /// leaves the original event untouched.
    pub fn log_event(
        &self,
        correlation_id: &str,
        question: &str,
        answer: &str,
        sources: &[RankedSource],
    ) -> Result<(), TelemetryError> {
        if !self.enabled {
            return Ok(());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM rag_event WHERE correlation_id = ?1)",
            params![correlation_id],
            |row| row.get(0),
        )?;
        if exists {
            return Err(TelemetryError::DuplicateCorrelationId(
                correlation_id.to_string(),
            ));
        }

        tx.execute(
            "INSERT INTO rag_event (correlation_id, question, answer) VALUES (?1, ?2, ?3)",
            params![correlation_id, question, answer],
        )?;

        for src in sources {
            tx.execute(
                "INSERT INTO rag_event_source
                 (correlation_id, source_name, raw_score, adjusted_score, rank)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    correlation_id,
                    src.source_name,
                    src.raw_score,
                    src.adjusted_score,
                    src.rank
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(
            "Logged answer event {} ({} sources)",
            correlation_id,
            sources.len()
        );
        Ok(())
    }

    /// Append a feedback row for a previously logged event.
    ///
    /// Fails with `UnknownCorrelationId` when no event matches; multiple
    /// feedback rows per event are legal and all retained.
    pub fn log_feedback(
        &self,
        correlation_id: &str,
        is_helpful: bool,
        comment: Option<&str>,
    ) -> Result<(), TelemetryError> {
        if !self.enabled {
            return Ok(());
        }

        let conn = self.lock()?;

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM rag_event WHERE correlation_id = ?1)",
            params![correlation_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(TelemetryError::UnknownCorrelationId(
                correlation_id.to_string(),
            ));
        }

        conn.execute(
            "INSERT INTO rag_feedback (correlation_id, is_helpful, comment) VALUES (?1, ?2, ?3)",
            params![correlation_id, is_helpful as i64, comment],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // WeightStore
    // ------------------------------------------------------------------

    /// Current source weights. Sources with no row default to 1.0 at the
    /// caller; only materialized weights are returned. The `area` filter is
    /// accepted for forward compatibility and currently ignored (weights
    /// are global).
    pub fn get_source_weights(
        &self,
        _area: Option<&str>,
    ) -> Result<HashMap<String, f64>, TelemetryError> {
        if !self.enabled {
            return Ok(HashMap::new());
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT source_name, weight FROM source_weight")?;
        let weights = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(weights)
    }

    /// Store a weight, clamped to [0.5, 3.0]. Last writer wins.
    pub fn upsert_weight(&self, source_name: &str, weight: f64) -> Result<(), TelemetryError> {
        let clamped = weight.clamp(WEIGHT_MIN, WEIGHT_MAX);
        let now = Utc::now().to_rfc3339();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO source_weight (source_name, weight, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(source_name) DO UPDATE SET
               weight = excluded.weight,
               updated_at = excluded.updated_at",
            params![source_name, clamped, now],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Source usage (background worker)
    // ------------------------------------------------------------------

    /// Append one source-usage observation. Fire-and-forget data; callers
    /// go through the bounded telemetry worker, never this directly.
    pub fn record_source_usage(
        &self,
        source_name: &str,
        adjusted_score: f64,
    ) -> Result<(), TelemetryError> {
        if !self.enabled {
            return Ok(());
        }

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO source_usage (source_name, adjusted_score) VALUES (?1, ?2)",
            params![source_name, adjusted_score],
        )?;
        Ok(())
    }

    /// Usage observations per source, for status reporting.
    pub fn source_usage_counts(&self) -> Result<HashMap<String, usize>, TelemetryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT source_name, COUNT(*) FROM source_usage GROUP BY source_name")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Training reads
    // ------------------------------------------------------------------

    /// Every (event source, feedback) pair, joined by correlation id.
    pub fn feedback_samples(&self) -> Result<Vec<FeedbackSample>, TelemetryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.correlation_id, s.source_name, f.is_helpful
             FROM rag_event_source s
             JOIN rag_feedback f ON s.correlation_id = f.correlation_id",
        )?;

        let samples = stmt
            .query_map([], |row| {
                Ok(FeedbackSample {
                    correlation_id: row.get(0)?,
                    source_name: row.get(1)?,
                    is_helpful: row.get::<_, i64>(2)? != 0,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(samples)
    }

    /// Event and feedback row counts, for status reporting.
    pub fn counts(&self) -> Result<(usize, usize), TelemetryError> {
        let conn = self.lock()?;
        let events: i64 =
            conn.query_row("SELECT COUNT(*) FROM rag_event", [], |row| row.get(0))?;
        let feedback: i64 =
            conn.query_row("SELECT COUNT(*) FROM rag_feedback", [], |row| row.get(0))?;
        Ok((events as usize, feedback as usize))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, TelemetryStore) {
        let dir = TempDir::new().unwrap();
        let store = TelemetryStore::open(&dir.path().join("telemetry.db"), true).unwrap();
        (dir, store)
    }

    fn ranked(source: &str, rank: i64) -> RankedSource {
        RankedSource {
            source_name: source.to_string(),
            raw_score: 0.8,
            adjusted_score: 0.8,
            rank,
        }
    }

    #[test]
    fn test_log_event_and_feedback() {
        let (_dir, store) = test_store();

        store
            .log_event("c1", "pregunta", "respuesta", &[ranked("pjud", 1)])
            .unwrap();
        store.log_feedback("c1", true, Some("claro")).unwrap();
        store.log_feedback("c1", false, None).unwrap();

        let (events, feedback) = store.counts().unwrap();
        assert_eq!(events, 1);
        assert_eq!(feedback, 2);
    }

    #[test]
    fn test_duplicate_correlation_id_rejected() {
        let (_dir, store) = test_store();

        store
            .log_event("c1", "pregunta original", "respuesta", &[ranked("pjud", 1)])
            .unwrap();

        let err = store
            .log_event("c1", "otra pregunta", "otra", &[ranked("bcn", 1)])
            .unwrap_err();
        assert!(matches!(err, TelemetryError::DuplicateCorrelationId(_)));

        // Original event data untouched.
        let samples = {
            store.log_feedback("c1", true, None).unwrap();
            store.feedback_samples().unwrap()
        };
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].source_name, "pjud");
    }

    #[test]
    fn test_feedback_unknown_id_rejected() {
        let (_dir, store) = test_store();

        let err = store.log_feedback("nunca", true, None).unwrap_err();
        assert!(matches!(err, TelemetryError::UnknownCorrelationId(_)));

        let (_, feedback) = store.counts().unwrap();
        assert_eq!(feedback, 0);
    }

    #[test]
    fn test_upsert_weight_clamps() {
        let (_dir, store) = test_store();

        for (input, expected) in [(5.0, 3.0), (0.0, 0.5), (-2.0, 0.5), (1.3, 1.3)] {
            store.upsert_weight("pjud", input).unwrap();
            let weights = store.get_source_weights(None).unwrap();
            assert!((weights["pjud"] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_unseen_source_not_materialized() {
        let (_dir, store) = test_store();
        let weights = store.get_source_weights(None).unwrap();
        assert!(weights.is_empty());
    }

    #[test]
    fn test_disabled_store_is_silent() {
        let dir = TempDir::new().unwrap();
        let store = TelemetryStore::open(&dir.path().join("t.db"), false).unwrap();

        store.log_event("c1", "q", "a", &[]).unwrap();
        store.log_feedback("c1", true, None).unwrap();
        assert!(store.get_source_weights(None).unwrap().is_empty());
    }
}
