//! Document and chunk persistence with KNN search

use super::{parse_timestamp, serialize_embedding, Database};
use crate::error::{Result, StorageError};
use crate::types::{DocumentChunk, DocumentRecord, IndexStatistics, ScoredChunk, StoredChunk};
use chrono::Utc;
use rusqlite::{params, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Repository owning the `documents` and `vec_chunks` tables
pub struct VectorRepository {
    db: Arc<Database>,
}

impl VectorRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Embedding width enforced on every write and query
    pub fn dimension(&self) -> usize {
        self.db.dimension()
    }

    /// Atomically replace the chunk sets for every file in the batch
    ///
    /// Each distinct `file_path` gets its document row upserted and its
    /// previous vec rows replaced by the new set. The transaction commits
    /// all rows or none.
    pub async fn store_chunks(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Err(StorageError::NothingStored("empty chunk batch".to_string()).into());
        }

        let dimension = self.db.dimension();
        for chunk in chunks {
            if chunk.embedding.len() != dimension {
                return Err(StorageError::Constraint(format!(
                    "chunk {} has embedding of length {}, expected {}",
                    chunk.chunk_id,
                    chunk.embedding.len(),
                    dimension
                ))
                .into());
            }
        }

        let mut by_file: BTreeMap<&str, Vec<&DocumentChunk>> = BTreeMap::new();
        for chunk in chunks {
            by_file.entry(&chunk.file_path).or_default().push(chunk);
        }

        let now = Utc::now().to_rfc3339();
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(StorageError::Sql)?;

        let mut stored = 0usize;
        for (file_path, file_chunks) in &by_file {
            let total_chunks = file_chunks.len();
            let total_tokens: usize = file_chunks.iter().map(|c| c.token_count).sum();
            let file_name = std::path::Path::new(file_path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(file_path)
                .to_string();
            let last_modified = file_chunks
                .iter()
                .map(|c| c.last_modified)
                .max()
                .unwrap_or_else(Utc::now);

            tx.execute(
                r#"
                INSERT OR REPLACE INTO documents
                    (file_path, file_name, last_modified, total_chunks, total_tokens,
                     created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    file_path,
                    file_name,
                    last_modified.to_rfc3339(),
                    total_chunks as i64,
                    total_tokens as i64,
                    now,
                    now
                ],
            )
            .map_err(StorageError::Sql)?;

            // Replace the whole chunk set so a shrinking re-index leaves no
            // stale rows behind
            tx.execute("DELETE FROM vec_chunks WHERE file_path = ?1", [file_path])
                .map_err(StorageError::Sql)?;

            for chunk in file_chunks {
                tx.execute(
                    r#"
                    INSERT INTO vec_chunks
                        (embedding, chunk_id, file_path, chunk_index, content,
                         chunk_offset, token_count, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        serialize_embedding(&chunk.embedding),
                        chunk.chunk_id,
                        chunk.file_path,
                        chunk.chunk_index as i64,
                        chunk.content,
                        chunk.chunk_offset as i64,
                        chunk.token_count as i64,
                        chunk.created_at.to_rfc3339()
                    ],
                )
                .map_err(StorageError::Sql)?;
                stored += 1;
            }
        }

        tx.commit().map_err(StorageError::Sql)?;

        debug!(files = by_file.len(), chunks = stored, "Stored chunk batch");
        Ok(stored)
    }

    /// K-nearest-neighbor search over all chunks
    ///
    /// Results come back in ascending cosine-distance order with
    /// `score = 1 - distance`, post-filtered by `min_score`, ties broken by
    /// `(file_path, chunk_index)`. Embeddings are not returned.
    pub async fn search_similar(
        &self,
        query_embedding: &[f32],
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let dimension = self.db.dimension();
        if query_embedding.len() != dimension {
            return Err(StorageError::Constraint(format!(
                "query embedding has length {}, expected {}",
                query_embedding.len(),
                dimension
            ))
            .into());
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.db.lock().await;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT chunk_id, file_path, chunk_index, content, chunk_offset,
                       token_count, created_at, distance
                FROM vec_chunks
                WHERE embedding MATCH ?1 AND k = ?2
                ORDER BY distance
                "#,
            )
            .map_err(StorageError::Sql)?;

        let rows = stmt
            .query_map(
                params![serialize_embedding(query_embedding), limit as i64],
                scored_chunk_from_row,
            )
            .map_err(StorageError::Sql)?;

        let mut results = Vec::new();
        for row in rows {
            let (chunk, distance) = row.map_err(StorageError::Sql)?;
            let score = 1.0 - distance;
            if score >= min_score {
                results.push(ScoredChunk {
                    chunk,
                    distance,
                    score,
                });
            }
        }

        // The extension orders by raw distance; make equal distances
        // deterministic as well
        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.file_path.cmp(&b.chunk.file_path))
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        results.truncate(limit);
        Ok(results)
    }

    /// All chunks for one file in chunk-index order
    pub async fn get_file_chunks(&self, file_path: &str) -> Result<Vec<StoredChunk>> {
        let conn = self.db.lock().await;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT chunk_id, file_path, chunk_index, content, chunk_offset,
                       token_count, created_at
                FROM vec_chunks
                WHERE file_path = ?1
                ORDER BY chunk_index
                "#,
            )
            .map_err(StorageError::Sql)?;

        let rows = stmt
            .query_map([file_path], stored_chunk_from_row)
            .map_err(StorageError::Sql)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(StorageError::Sql)?);
        }
        Ok(chunks)
    }

    /// Chunks for one file within an inclusive index range
    pub async fn get_chunk_range(
        &self,
        file_path: &str,
        from_index: usize,
        to_index: usize,
    ) -> Result<Vec<StoredChunk>> {
        let conn = self.db.lock().await;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT chunk_id, file_path, chunk_index, content, chunk_offset,
                       token_count, created_at
                FROM vec_chunks
                WHERE file_path = ?1 AND chunk_index BETWEEN ?2 AND ?3
                ORDER BY chunk_index
                "#,
            )
            .map_err(StorageError::Sql)?;

        let rows = stmt
            .query_map(
                params![file_path, from_index as i64, to_index as i64],
                stored_chunk_from_row,
            )
            .map_err(StorageError::Sql)?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(StorageError::Sql)?);
        }
        Ok(chunks)
    }

    /// Document row for one file
    pub async fn get_document(&self, file_path: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.db.lock().await;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT file_path, file_name, last_modified, total_chunks, total_tokens,
                       created_at, updated_at
                FROM documents
                WHERE file_path = ?1
                "#,
            )
            .map_err(StorageError::Sql)?;

        let mut rows = stmt
            .query_map([file_path], document_from_row)
            .map_err(StorageError::Sql)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(StorageError::Sql)?)),
            None => Ok(None),
        }
    }

    /// Remove a file's chunks and its document row in one transaction
    ///
    /// Returns the number of vec rows removed.
    pub async fn delete_file(&self, file_path: &str) -> Result<usize> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(StorageError::Sql)?;

        let removed = tx
            .execute("DELETE FROM vec_chunks WHERE file_path = ?1", [file_path])
            .map_err(StorageError::Sql)?;
        tx.execute("DELETE FROM documents WHERE file_path = ?1", [file_path])
            .map_err(StorageError::Sql)?;

        tx.commit().map_err(StorageError::Sql)?;
        info!(file_path, removed, "Deleted file from index");
        Ok(removed)
    }

    /// Drop every indexed document and chunk
    pub async fn clear(&self) -> Result<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction().map_err(StorageError::Sql)?;
        tx.execute("DELETE FROM vec_chunks", [])
            .map_err(StorageError::Sql)?;
        tx.execute("DELETE FROM documents", [])
            .map_err(StorageError::Sql)?;
        tx.commit().map_err(StorageError::Sql)?;
        info!("Cleared vector index");
        Ok(())
    }

    /// Aggregate statistics over the index
    pub async fn statistics(&self) -> Result<IndexStatistics> {
        let conn = self.db.lock().await;
        conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(total_chunks), 0),
                   COALESCE(SUM(total_tokens), 0)
            FROM documents
            "#,
            [],
            |row| {
                Ok(IndexStatistics {
                    total_files: row.get::<_, i64>(0)? as usize,
                    total_chunks: row.get::<_, i64>(1)? as usize,
                    total_tokens: row.get::<_, i64>(2)? as usize,
                })
            },
        )
        .map_err(|e| StorageError::Sql(e).into())
    }
}

fn stored_chunk_from_row(row: &Row<'_>) -> rusqlite::Result<StoredChunk> {
    let created_at: String = row.get(6)?;
    Ok(StoredChunk {
        chunk_id: row.get(0)?,
        file_path: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as usize,
        content: row.get(3)?,
        chunk_offset: row.get::<_, i64>(4)? as usize,
        token_count: row.get::<_, i64>(5)? as usize,
        created_at: parse_timestamp(&created_at).unwrap_or_else(|_| Utc::now()),
    })
}

fn scored_chunk_from_row(row: &Row<'_>) -> rusqlite::Result<(StoredChunk, f32)> {
    let chunk = stored_chunk_from_row(row)?;
    let distance: f64 = row.get(7)?;
    Ok((chunk, distance as f32))
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let last_modified: String = row.get(2)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    Ok(DocumentRecord {
        file_path: row.get(0)?,
        file_name: row.get(1)?,
        last_modified: parse_timestamp(&last_modified).unwrap_or_else(|_| Utc::now()),
        total_chunks: row.get::<_, i64>(3)? as usize,
        total_tokens: row.get::<_, i64>(4)? as usize,
        created_at: parse_timestamp(&created_at).unwrap_or_else(|_| Utc::now()),
        updated_at: parse_timestamp(&updated_at).unwrap_or_else(|_| Utc::now()),
    })
}
