//! SQLite storage with the sqlite-vec extension
//!
//! One on-disk database holds the document/chunk index and the
//! recommendation-learning tables. The connection is wrapped in a single
//! async mutex: the vector extension is not safe for concurrent statements
//! on one handle, and WAL already gives readers a consistent snapshot.

mod recommendation;
mod vector;

pub use recommendation::RecommendationRepository;
pub use vector::VectorRepository;

use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Once;
use tokio::sync::Mutex;
use tracing::info;

static VEC_EXTENSION: Once = Once::new();

/// Register sqlite-vec as an auto-loaded extension for every new connection
fn register_vector_extension() {
    VEC_EXTENSION.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Shared database handle with the schema applied
pub struct Database {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl Database {
    /// Open (or create) the database file and apply the schema
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        register_vector_extension();
        let conn = Connection::open(path).map_err(StorageError::Sql)?;
        Self::initialize(conn, dimension)
    }

    /// Open an in-memory database, used by tests
    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        register_vector_extension();
        let conn = Connection::open_in_memory().map_err(StorageError::Sql)?;
        Self::initialize(conn, dimension)
    }

    fn initialize(conn: Connection, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(StorageError::Constraint(
                "embedding dimension must be greater than 0".to_string(),
            )
            .into());
        }

        let vec_version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .map_err(|e| StorageError::VectorExtension(e.to_string()))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StorageError::Sql)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StorageError::Sql)?;
        // Negative cache_size is KiB, so this is a ~64 MB page cache
        conn.pragma_update(None, "cache_size", -64000)
            .map_err(StorageError::Sql)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(StorageError::Sql)?;

        conn.execute_batch(&schema_sql(dimension))
            .map_err(StorageError::Sql)?;

        info!(vec_version, dimension, "Vector store initialized");

        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }

    /// Fixed embedding width enforced by the schema
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

fn schema_sql(dimension: usize) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            file_path TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            total_chunks INTEGER NOT NULL,
            total_tokens INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_file_name ON documents(file_name);

        CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
            embedding float[{dimension}] distance_metric=cosine,
            chunk_id TEXT PRIMARY KEY,
            file_path TEXT,
            chunk_index INTEGER,
            +content TEXT,
            +chunk_offset INTEGER,
            +token_count INTEGER,
            +created_at TEXT
        );

        CREATE TABLE IF NOT EXISTS search_recommendations (
            id TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            suggested_terms TEXT NOT NULL,
            strategy TEXT NOT NULL,
            tfidf_threshold REAL NOT NULL,
            confidence REAL NOT NULL,
            generated_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            total_documents INTEGER NOT NULL,
            analyzed_documents INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_recommendations_query
            ON search_recommendations(query, expires_at);

        CREATE TABLE IF NOT EXISTS recommendation_effectiveness (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recommendation_id TEXT NOT NULL
                REFERENCES search_recommendations(id) ON DELETE CASCADE,
            was_used INTEGER NOT NULL,
            improved_results INTEGER,
            usage_time TEXT,
            effectiveness_score REAL NOT NULL,
            original_result_count INTEGER NOT NULL,
            improved_result_count INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_effectiveness_recommendation
            ON recommendation_effectiveness(recommendation_id);

        CREATE TABLE IF NOT EXISTS learning_parameters (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            tfidf_threshold REAL NOT NULL,
            effectiveness_history TEXT NOT NULL,
            strategy_weights TEXT NOT NULL,
            learning_rate REAL NOT NULL,
            last_updated TEXT NOT NULL
        );
        "#
    )
}

/// Serialize an embedding as a little-endian packed float32 buffer
pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        buffer.extend_from_slice(&value.to_le_bytes());
    }
    buffer
}

/// Deserialize an embedding from its packed float32 form
pub fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::MalformedRow(format!("bad timestamp {value:?}: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_serialization_round_trip() {
        let embedding = vec![1.5, -2.3, 0.0, 42.1];
        let serialized = serialize_embedding(&embedding);
        assert_eq!(serialized.len(), embedding.len() * 4);

        let deserialized = deserialize_embedding(&serialized);
        assert_eq!(embedding.len(), deserialized.len());
        for (orig, deser) in embedding.iter().zip(deserialized.iter()) {
            assert!((orig - deser).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn test_serialization_is_little_endian() {
        let serialized = serialize_embedding(&[1.0]);
        assert_eq!(serialized, 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_open_in_memory_has_vector_extension() {
        let db = Database::open_in_memory(8).unwrap();
        assert_eq!(db.dimension(), 8);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(Database::open_in_memory(0).is_err());
    }

    #[tokio::test]
    async fn test_schema_tables_exist() {
        let db = Database::open_in_memory(4).unwrap();
        let conn = db.lock().await;
        for table in [
            "documents",
            "vec_chunks",
            "search_recommendations",
            "recommendation_effectiveness",
            "learning_parameters",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }
}
