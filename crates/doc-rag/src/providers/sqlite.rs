//! SQLite-backed vector store
//!
//! Records are durable, but there is no server-side vector index: `search`
//! always reports `VectorSearchUnavailable` and reads are served by the exact
//! in-process scan over `records`.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkType, DocumentType, EmbeddingRecord, PageFilter, RetrievalResult};

use super::vector_store::{build_records, check_write, VectorStoreProvider};

const META_DIMENSIONS: &str = "dimensions";

/// SQLite vector store
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVectorStore {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Internal(format!("Failed to open in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::Internal(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                document_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                chunk_text TEXT NOT NULL,
                page_number INTEGER,
                chunk_type TEXT NOT NULL DEFAULT 'text',
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                PRIMARY KEY (document_id, chunk_index)
            );

            CREATE INDEX IF NOT EXISTS idx_embeddings_user_id ON embeddings(user_id);

            -- Store-wide settings (established dimensionality)
            CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )?;

        Ok(())
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&mut conn.lock()))
            .await
            .map_err(|e| Error::Internal(format!("Task join error: {}", e)))?
    }
}

fn read_dimensions(conn: &Connection) -> Result<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![META_DIMENSIONS],
            |row| row.get(0),
        )
        .optional()?;

    value
        .map(|v| {
            v.parse::<usize>()
                .map_err(|_| Error::Internal(format!("Corrupt stored dimensionality: {}", v)))
        })
        .transpose()
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Internal(format!(
            "Embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Invalid UUID {}: {}", value, e)))
}

#[async_trait]
impl VectorStoreProvider for SqliteVectorStore {
    async fn write(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        document_type: DocumentType,
    ) -> Result<usize> {
        let records = build_records(document_id, user_id, chunks, embeddings, document_type);
        let chunks = chunks.to_vec();
        let embeddings = embeddings.to_vec();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let established = read_dimensions(&tx)?;
            let dims = check_write(&chunks, &embeddings, established)?;

            let created_at = chrono::Utc::now().to_rfc3339();
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO embeddings
                     (document_id, user_id, chunk_index, chunk_text, page_number,
                      chunk_type, embedding, metadata, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for record in &records {
                    stmt.execute(params![
                        record.document_id.to_string(),
                        record.user_id.to_string(),
                        record.chunk_index,
                        record.chunk_text,
                        record.page_number,
                        record.chunk_type.as_str(),
                        encode_embedding(&record.embedding),
                        serde_json::to_string(&record.metadata)?,
                        created_at,
                    ])?;
                }
            }

            if established.is_none() {
                if let Some(dims) = dims {
                    tx.execute(
                        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)",
                        params![META_DIMENSIONS, dims.to_string()],
                    )?;
                }
            }
            tx.commit()?;

            tracing::debug!("Stored {} embeddings for document {}", records.len(), document_id);
            Ok(records.len())
        })
        .await
    }

    async fn search(
        &self,
        _query_embedding: &[f32],
        _document_id: Uuid,
        _top_k: usize,
        _pages: Option<&PageFilter>,
    ) -> Result<Vec<RetrievalResult>> {
        Err(Error::search_unavailable("SQLite store has no vector index"))
    }

    async fn records(&self, document_id: Uuid) -> Result<Vec<EmbeddingRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, chunk_index, chunk_text, page_number, chunk_type, embedding, metadata
                 FROM embeddings WHERE document_id = ?1 ORDER BY chunk_index",
            )?;

            let rows = stmt.query_map(params![document_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<u32>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (user_id, chunk_index, chunk_text, page_number, chunk_type, blob, metadata) = row?;
                let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(&metadata)?;
                records.push(EmbeddingRecord {
                    document_id,
                    user_id: parse_uuid(&user_id)?,
                    chunk_index,
                    chunk_text,
                    page_number,
                    chunk_type: ChunkType::parse(&chunk_type),
                    embedding: decode_embedding(&blob)?,
                    metadata,
                });
            }
            Ok(records)
        })
        .await
    }

    async fn delete_all(&self, document_id: Uuid) -> Result<usize> {
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM embeddings WHERE document_id = ?1",
                params![document_id.to_string()],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn dimensions(&self) -> Result<Option<usize>> {
        self.with_conn(|conn| read_dimensions(conn)).await
    }

    async fn len(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    fn supports_approximate_search(&self) -> bool {
        false
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self
            .with_conn(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?))
            .await
            .is_ok())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
