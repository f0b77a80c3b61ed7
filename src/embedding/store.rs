//! Fetch-or-compute access to material vectors.
//!
//! [`CachedVectorStore`] keeps one vector per `(material id, model)` in SQLite.
//! A cached row is reused only while the material's content is unchanged;
//! everything else goes through the [`EmbeddingProvider`] in one batch.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use super::{bytes_to_embedding, embedding_to_bytes, EmbeddingProvider};
use crate::territory::Material;

/// Source of embedding vectors for the territory builder.
pub trait VectorStore: Send + Sync {
    /// Return a vector for every material that could be embedded.
    ///
    /// Materials whose vector cannot be produced are omitted from the map; a
    /// store never hands back an empty or all-zero vector.
    fn get_embeddings(&self, materials: &[Material]) -> Result<HashMap<String, Vec<f32>>>;
}

/// SQLite-backed cache in front of an embedding provider.
pub struct CachedVectorStore {
    provider: Arc<dyn EmbeddingProvider>,
    conn: Mutex<Connection>,
}

impl CachedVectorStore {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, conn: Connection) -> Self {
        Self {
            provider,
            conn: Mutex::new(conn),
        }
    }

    /// Cache that lives only as long as the process.
    pub fn in_memory(provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        Ok(Self::new(provider, crate::db::open_memory_database()?))
    }

    /// Number of cached vectors for the current model.
    pub fn cached_count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embedding_cache WHERE model = ?1",
            params![self.provider.model_id()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Drop every cached vector. Returns the number of rows removed.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM embedding_cache", [])?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("embedding cache lock poisoned: {e}"))
    }

    /// Embed cache misses, batched first and one by one if the batch fails.
    fn compute<'a>(&self, misses: &[&'a Material]) -> Vec<(&'a Material, Vec<f32>)> {
        let dims = self.provider.dimensions();
        let texts: Vec<&str> = misses.iter().map(|m| m.content.as_str()).collect();

        let vectors: Vec<Option<Vec<f32>>> = match self.provider.embed_batch(&texts) {
            Ok(vectors) if vectors.len() == misses.len() => vectors.into_iter().map(Some).collect(),
            Ok(vectors) => {
                tracing::warn!(
                    expected = misses.len(),
                    got = vectors.len(),
                    "embedding batch size mismatch, embedding individually"
                );
                self.embed_each(misses)
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch embedding failed, embedding individually");
                self.embed_each(misses)
            }
        };

        misses
            .iter()
            .zip(vectors)
            .filter_map(|(material, vector)| match vector {
                Some(v) if is_usable(&v, dims) => Some((*material, v)),
                Some(_) => {
                    tracing::warn!(id = %material.id, "discarding unusable embedding");
                    None
                }
                None => None,
            })
            .collect()
    }

    fn embed_each(&self, misses: &[&Material]) -> Vec<Option<Vec<f32>>> {
        misses
            .iter()
            .map(|material| match self.provider.embed(&material.content) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(id = %material.id, error = %e, "embedding failed, excluding material");
                    None
                }
            })
            .collect()
    }
}

impl VectorStore for CachedVectorStore {
    fn get_embeddings(&self, materials: &[Material]) -> Result<HashMap<String, Vec<f32>>> {
        let model = self.provider.model_id().to_string();
        let dims = self.provider.dimensions();
        let mut found: HashMap<String, Vec<f32>> = HashMap::with_capacity(materials.len());
        let mut seen: HashSet<&str> = HashSet::with_capacity(materials.len());
        let mut misses: Vec<&Material> = Vec::new();

        {
            let conn = self.lock()?;
            for material in materials {
                if !seen.insert(material.id.as_str()) {
                    continue;
                }
                match lookup(&conn, &model, material)? {
                    Some(v) if is_usable(&v, dims) => {
                        found.insert(material.id.clone(), v);
                    }
                    _ => misses.push(material),
                }
            }
        }

        let hits = found.len();
        if !misses.is_empty() {
            let computed = self.compute(&misses);
            let conn = self.lock()?;
            for (material, vector) in computed {
                if let Err(e) = store(&conn, &model, material, &vector) {
                    tracing::warn!(id = %material.id, error = %e, "failed to cache embedding");
                }
                found.insert(material.id.clone(), vector);
            }
        }

        tracing::debug!(
            requested = materials.len(),
            cached = hits,
            computed = found.len() - hits,
            omitted = seen.len() - found.len(),
            "embeddings resolved"
        );
        Ok(found)
    }
}

/// Cached vector for this material, if present and computed from the same content.
fn lookup(conn: &Connection, model: &str, material: &Material) -> Result<Option<Vec<f32>>> {
    let row: Option<(String, i64, Vec<u8>)> = conn
        .query_row(
            "SELECT content, dims, vector FROM embedding_cache \
             WHERE material_id = ?1 AND model = ?2",
            params![material.id, model],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    Ok(row.and_then(|(content, dims, bytes)| {
        let vector = bytes_to_embedding(&bytes);
        (content == material.content && vector.len() == dims as usize).then_some(vector)
    }))
}

fn store(conn: &Connection, model: &str, material: &Material, vector: &[f32]) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO embedding_cache \
         (material_id, model, content, dims, vector, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            material.id,
            model,
            material.content,
            vector.len() as i64,
            embedding_to_bytes(vector),
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Right length, finite, and not the zero vector.
fn is_usable(vector: &[f32], dims: usize) -> bool {
    vector.len() == dims
        && vector.iter().all(|x| x.is_finite())
        && vector.iter().any(|x| *x != 0.0)
}
