//! Vector index over node embeddings.
//!
//! Vectors are stored as little-endian `f32` blobs in the `vectors` table of the cache database.
//! Search is an exact scan: rows are streamed out of SQLite and fed through a bounded [`TopK`], so
//! memory stays proportional to the requested limit rather than to the index size.

use crate::{
    error::RouxError,
    heap::TopK,
    properties::VectorSearchResult,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{sqlite::Sqlite, Pool, Row};
use std::{
    cmp::Ordering,
    sync::atomic::{AtomicBool, Ordering as AtomicOrdering},
};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Produces embeddings for text. Implementations live outside this crate; the sync engine only
/// calls them when one has been supplied.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RouxError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RouxError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize;

    fn model_id(&self) -> &str;
}

pub fn validate_vector(vector: &[f32]) -> Result<(), RouxError> {
    if vector.is_empty() {
        return Err(RouxError::InvalidVector("vector is empty".to_string()));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(RouxError::InvalidVector(format!(
            "non-finite component at index {pos}"
        )));
    }
    Ok(())
}

pub fn pack_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn unpack_vector(blob: &[u8]) -> Result<Vec<f32>, RouxError> {
    if blob.len() % F32_BYTES != 0 {
        return Err(RouxError::Serialization(format!(
            "vector blob length {} is not a multiple of {F32_BYTES}",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(F32_BYTES)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity clamped to [-1, 1]. Zero-magnitude inputs have similarity 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, RouxError> {
    if a.len() != b.len() {
        return Err(RouxError::InvalidVector(format!(
            "dimension mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// `1 - cosine_similarity`, in [0, 2]. Exactly 1 when either vector has zero magnitude.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, RouxError> {
    Ok((1.0 - cosine_similarity(a, b)?) as f32)
}

/// Search candidate. Closer ranks greater so [`TopK`] keeps the nearest; equal distances prefer
/// the smaller id.
#[derive(Debug, Clone, PartialEq)]
struct Nearest {
    distance: f32,
    id: String,
}

impl Eq for Nearest {}

impl PartialOrd for Nearest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Nearest {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug)]
pub struct VectorIndex {
    pool: Pool<Sqlite>,
    model_check_done: AtomicBool,
}

impl VectorIndex {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        VectorIndex {
            pool,
            model_check_done: AtomicBool::new(false),
        }
    }

    /// Insert or replace the vector for `id`. Every stored vector must share one dimension; the
    /// row being replaced does not count towards that check.
    #[tracing::instrument(skip(self, vector), fields(dims = vector.len()))]
    pub async fn store(&self, id: &str, vector: &[f32], model: &str) -> Result<(), RouxError> {
        validate_vector(vector)?;
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT length(vector) FROM vectors WHERE id != ? LIMIT 1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        if let Some(bytes) = existing {
            let dims = bytes as usize / F32_BYTES;
            if dims != vector.len() {
                return Err(RouxError::InvalidVector(format!(
                    "dimension mismatch: index holds {dims}-dimensional vectors, got {}",
                    vector.len()
                )));
            }
        }
        sqlx::query(
            "INSERT INTO vectors (id, model, vector) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET model = excluded.model, vector = excluded.vector",
        )
        .bind(id)
        .bind(model)
        .bind(pack_vector(vector))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The `limit` nearest vectors by cosine distance, closest first.
    pub async fn search(
        &self,
        query: &[f32],
        limit: i64,
    ) -> Result<Vec<VectorSearchResult>, RouxError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        validate_vector(query)?;
        let Some(dims) = self.dimensions().await? else {
            return Ok(Vec::new());
        };
        if dims != query.len() {
            return Err(RouxError::InvalidVector(format!(
                "dimension mismatch: index holds {dims}-dimensional vectors, query has {}",
                query.len()
            )));
        }
        self.warn_on_mixed_models().await?;

        let mut top = TopK::new(limit as usize);
        let mut rows = sqlx::query("SELECT id, vector FROM vectors").fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            let id: String = row.try_get("id")?;
            let blob: Vec<u8> = row.try_get("vector")?;
            let stored = unpack_vector(&blob)?;
            top.offer(Nearest {
                distance: cosine_distance(query, &stored)?,
                id,
            });
        }
        Ok(top
            .into_sorted_vec()
            .into_iter()
            .map(|n| VectorSearchResult {
                id: n.id,
                distance: n.distance,
            })
            .collect())
    }

    async fn warn_on_mixed_models(&self) -> Result<(), RouxError> {
        if self.model_check_done.swap(true, AtomicOrdering::AcqRel) {
            return Ok(());
        }
        let models: Vec<String> = sqlx::query_scalar("SELECT DISTINCT model FROM vectors")
            .fetch_all(&self.pool)
            .await?;
        if models.len() > 1 {
            tracing::warn!(
                "[VectorIndex] Index mixes embeddings from {} models ({:?}); distances across \
                 models are not comparable",
                models.len(),
                models
            );
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool, RouxError> {
        let res = sqlx::query("DELETE FROM vectors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn get_model(&self, id: &str) -> Result<Option<String>, RouxError> {
        Ok(sqlx::query_scalar("SELECT model FROM vectors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn has_embedding(&self, id: &str) -> Result<bool, RouxError> {
        let hit: Option<i64> = sqlx::query_scalar("SELECT 1 FROM vectors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hit.is_some())
    }

    /// Dimension shared by every stored vector, or `None` when the index is empty.
    pub async fn dimensions(&self) -> Result<Option<usize>, RouxError> {
        let bytes: Option<i64> = sqlx::query_scalar("SELECT length(vector) FROM vectors LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(bytes.map(|b| b as usize / F32_BYTES))
    }

    pub async fn count(&self) -> Result<usize, RouxError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::db_init;
    use test_log::test;

    async fn open_index(dir: &tempfile::TempDir) -> VectorIndex {
        VectorIndex::new(db_init(dir.path().join("cache.db")).await.unwrap())
    }

    #[test]
    fn test_cosine_distance_bounds() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).unwrap().abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]).unwrap() - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 1.0);
        assert!(cosine_distance(&[1.0], &[1.0, 0.0]).is_err());
    }

    #[test]
    fn test_blob_packing() {
        let v = vec![0.5f32, -1.25, 3.0e-7];
        let blob = pack_vector(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(&blob[0..4], &0.5f32.to_le_bytes());
        assert_eq!(unpack_vector(&blob).unwrap(), v);
        assert!(unpack_vector(&blob[..5]).is_err());
    }

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[]).is_err());
        assert!(validate_vector(&[1.0, f32::NAN]).is_err());
        assert!(validate_vector(&[f32::INFINITY]).is_err());
        assert!(validate_vector(&[0.0, 1.0]).is_ok());
    }

    #[test(tokio::test)]
    async fn test_search_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        index.store("east", &[1.0, 0.0], "m").await.unwrap();
        index.store("north", &[0.0, 1.0], "m").await.unwrap();
        index.store("northeast", &[1.0, 1.0], "m").await.unwrap();
        index.store("west", &[-1.0, 0.0], "m").await.unwrap();

        let hits = index.search(&[1.0, 0.1], 3).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["east", "northeast", "north"]);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test(tokio::test)]
    async fn test_search_edge_cases() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        assert!(index.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
        index.store("a", &[1.0, 0.0], "m").await.unwrap();
        assert!(index.search(&[1.0, 0.0], 0).await.unwrap().is_empty());
        assert!(index.search(&[1.0, 0.0], -3).await.unwrap().is_empty());
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 5).await,
            Err(RouxError::InvalidVector(_))
        ));
        assert!(matches!(
            index.search(&[], 5).await,
            Err(RouxError::InvalidVector(_))
        ));
    }

    #[test(tokio::test)]
    async fn test_store_rejects_mismatched_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        index.store("a", &[1.0, 0.0], "m").await.unwrap();
        assert!(matches!(
            index.store("b", &[1.0, 0.0, 0.0], "m").await,
            Err(RouxError::InvalidVector(_))
        ));
        assert!(index.store("b", &[f32::NAN, 0.0], "m").await.is_err());
        assert!(!index.has_embedding("b").await.unwrap());
    }

    #[test(tokio::test)]
    async fn test_sole_vector_can_change_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        index.store("a", &[1.0, 0.0], "m1").await.unwrap();
        index.store("a", &[1.0, 0.0, 0.0], "m2").await.unwrap();
        assert_eq!(index.dimensions().await.unwrap(), Some(3));
        assert_eq!(index.get_model("a").await.unwrap().as_deref(), Some("m2"));
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[test(tokio::test)]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        index.store("a", &[1.0, 0.0], "m").await.unwrap();
        assert!(index.has_embedding("a").await.unwrap());
        assert!(index.delete("a").await.unwrap());
        assert!(!index.delete("a").await.unwrap());
        assert_eq!(index.dimensions().await.unwrap(), None);
    }

    #[test(tokio::test)]
    async fn test_search_with_unbounded_limit() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        index.store("a", &[1.0, 0.0], "m").await.unwrap();
        index.store("b", &[0.0, 1.0], "m").await.unwrap();
        let hits = index.search(&[1.0, 0.0], i64::MAX).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test(tokio::test)]
    async fn test_near_duplicate_ranks_ahead_of_orthogonal() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        index.store("x", &[1.0, 0.0, 0.0], "m").await.unwrap();
        index.store("y", &[0.0, 1.0, 0.0], "m").await.unwrap();
        index.store("x2", &[1.0, 0.0, 0.01], "m").await.unwrap();
        let hits = index.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "x2"]);
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test(tokio::test)]
    async fn test_search_matches_brute_force() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        let mut seed: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % 2001) as f32 / 1000.0 - 1.0
        };
        let mut stored = Vec::new();
        for i in 0..60 {
            let mut v: Vec<f32> = (0..4).map(|_| next()).collect();
            if v.iter().all(|c| *c == 0.0) {
                v[0] = 1.0;
            }
            let id = format!("v{i:02}");
            index.store(&id, &v, "m").await.unwrap();
            stored.push((id, v));
        }
        let query: Vec<f32> = vec![0.3, -0.7, 0.2, 0.9];
        let mut expected: Vec<(f32, String)> = stored
            .iter()
            .map(|(id, v)| (cosine_distance(&query, v).unwrap(), id.clone()))
            .collect();
        expected.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        for k in [1usize, 3, 10, 60, 100] {
            let hits = index.search(&query, k as i64).await.unwrap();
            let got: Vec<_> = hits.into_iter().map(|h| h.id).collect();
            let want: Vec<_> = expected.iter().take(k).map(|(_, id)| id.clone()).collect();
            assert_eq!(got, want, "k = {k}");
        }
    }

    #[test(tokio::test)]
    async fn test_mixed_models_still_search() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_index(&dir).await;
        index.store("a", &[1.0, 0.0], "model-a").await.unwrap();
        index.store("b", &[0.0, 1.0], "model-b").await.unwrap();
        let hits = index.search(&[0.0, 1.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
    }
}
