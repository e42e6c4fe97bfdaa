//! Índice vectorial en memoria por entidad (similitud coseno).
//!
//! API pública:
//!   - `VectorIndex::build(chunks, vectors)`
//!   - `VectorIndex::query(&query_vec, k)`
//!   - `embed_query(&embedder, text)`.

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::llm::Embedder;
use crate::models::{Chunk, SourceSnippet};

/// Chunk indexado junto a su embedding.
#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk: Chunk,
    embedding: Vec<f64>,
}

/// Resultado de una consulta, ordenado por `score` descendente.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub score: f64,
    pub chunk: Chunk,
    #[serde(skip)]
    pub embedding: Vec<f64>,
}

impl ScoredChunk {
    pub fn snippet(&self, max_chars: usize) -> SourceSnippet {
        SourceSnippet {
            tier: self.chunk.source,
            score: self.score,
            text: self.chunk.text.chars().take(max_chars).collect(),
        }
    }
}

/// Estructura de vecinos más cercanos de sólo lectura tras su construcción.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    pub fn build(chunks: Vec<Chunk>, vectors: Vec<Vec<f64>>) -> EngineResult<Self> {
        if chunks.len() != vectors.len() {
            return Err(EngineError::external(
                "embeddings",
                format!(
                    "Número de embeddings ({}) distinto al número de chunks ({})",
                    vectors.len(),
                    chunks.len()
                ),
            ));
        }
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
            .collect();
        Ok(Self { entries })
    }

    /// Índice efímero a partir de resultados ya puntuados (se reutilizan sus vectores).
    pub fn from_scored(hits: Vec<ScoredChunk>) -> Self {
        let entries = hits
            .into_iter()
            .map(|hit| IndexedChunk {
                chunk: hit.chunk,
                embedding: hit.embedding,
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Los `k` chunks más similares. Empates en orden de inserción.
    pub fn query(&self, query_vec: &[f64], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                score: cosine_similarity(query_vec, &entry.embedding),
                chunk: entry.chunk.clone(),
                embedding: entry.embedding.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Embedding de una consulta de usuario.
pub async fn embed_query<E: Embedder>(embedder: &E, text: &str) -> EngineResult<Vec<f64>> {
    let mut vectors = embedder.embed(&[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| EngineError::external("embeddings", "No se pudo generar embedding de la query"))
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
