//! Construcción de los índices vectoriales por entidad (tier CSV y tier PDF).
//!
//! Los lotes se procesan en secuencia; dentro de un lote hasta `workers`
//! entidades se trocean y se embeben a la vez. El fallo de una entidad se
//! registra y se cuenta, pero no afecta al resto.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info};

use crate::{
    app_state::Status,
    chunker::Chunker,
    config::IndexingConfig,
    error::EngineResult,
    llm::Embedder,
    models::{Entity, SourceTier},
    vector_store::VectorIndex,
};

/// Resumen de los resultados de la indexación de un tier.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub entities_scanned: usize,
    pub entities_indexed: usize,
    pub entities_skipped: usize,
    pub entities_failed: usize,
    pub chunks_created: usize,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} entidades escaneadas, {} indexadas, {} sin datos, {} con error. {} chunks creados.",
            self.entities_scanned,
            self.entities_indexed,
            self.entities_skipped,
            self.entities_failed,
            self.chunks_created
        )
    }
}

/// Resumen de los dos tiers.
#[derive(Debug, Default, Clone)]
pub struct TieredSummary {
    pub structured: IngestionSummary,
    pub document: IngestionSummary,
}

impl std::fmt::Display for TieredSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CSV: {} PDF: {}", self.structured, self.document)
    }
}

/// Índices por entidad de ambos tiers. Estar en un mapa implica tener al
/// menos un chunk en ese tier; no estar significa "sin datos en ese tier".
#[derive(Debug, Clone, Default)]
pub struct TieredIndexMap {
    pub structured: HashMap<String, VectorIndex>,
    pub document: HashMap<String, VectorIndex>,
}

impl TieredIndexMap {
    fn tier(&self, tier: SourceTier) -> &HashMap<String, VectorIndex> {
        match tier {
            SourceTier::Structured => &self.structured,
            SourceTier::Document => &self.document,
        }
    }

    pub fn get(&self, tier: SourceTier, entity_id: &str) -> Option<&VectorIndex> {
        self.tier(tier).get(entity_id)
    }

    pub fn contains(&self, tier: SourceTier, entity_id: &str) -> bool {
        self.tier(tier).contains_key(entity_id)
    }

    /// La entidad existe en al menos uno de los dos tiers.
    pub fn knows(&self, entity_id: &str) -> bool {
        self.contains(SourceTier::Structured, entity_id) || self.contains(SourceTier::Document, entity_id)
    }

    #[cfg(test)]
    pub fn entity_ids(&self, tier: SourceTier) -> std::collections::BTreeSet<String> {
        self.tier(tier).keys().cloned().collect()
    }
}

/// Trocea y embebe una entidad. `Ok(None)` si no produce ningún chunk.
async fn index_entity<E: Embedder>(
    entity: &Entity,
    tier: SourceTier,
    chunker: &Chunker,
    embedder: &E,
) -> EngineResult<Option<VectorIndex>> {
    let chunks = chunker.chunk_fields(entity.tier_fields(tier), &entity.code, tier);
    if chunks.is_empty() {
        return Ok(None);
    }
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    VectorIndex::build(chunks, vectors).map(Some)
}

async fn index_named<E: Embedder>(
    entity: &Entity,
    tier: SourceTier,
    chunker: &Chunker,
    embedder: &E,
) -> (String, EngineResult<Option<VectorIndex>>) {
    (entity.code.clone(), index_entity(entity, tier, chunker, embedder).await)
}

/// Construye el mapa `código → índice` de un tier.
pub async fn build_tier_index<E: Embedder>(
    entities: &[Entity],
    tier: SourceTier,
    chunker: &Chunker,
    embedder: &E,
    cfg: &IndexingConfig,
    status: Option<&Arc<Mutex<Status>>>,
) -> (HashMap<String, VectorIndex>, IngestionSummary) {
    let batch_size = cfg.batch_size.max(1);
    let workers = cfg.workers.max(1);
    let total_batches = entities.len().div_ceil(batch_size);
    info!(
        "Indexando {} entidades (tier {}) en {} lotes de {} con {} workers",
        entities.len(),
        tier.label(),
        total_batches,
        batch_size,
        workers
    );

    let mut index = HashMap::new();
    let mut summary = IngestionSummary::default();
    let start = Instant::now();

    for (batch_no, batch) in entities.chunks(batch_size).enumerate() {
        let batch_start = Instant::now();
        let pending: Vec<_> = batch
            .iter()
            .map(|entity| index_named(entity, tier, chunker, embedder))
            .collect();
        let results: Vec<(String, EngineResult<Option<VectorIndex>>)> = stream::iter(pending)
            .buffer_unordered(workers)
            .collect()
            .await;

        // Unión de los resultados del lote: único punto de inserción.
        for (code, result) in results {
            summary.entities_scanned += 1;
            match result {
                Ok(Some(entity_index)) => {
                    debug!("✓ Índice {} para {} con {} chunks", tier.label(), code, entity_index.len());
                    summary.entities_indexed += 1;
                    summary.chunks_created += entity_index.len();
                    index.insert(code, entity_index);
                }
                Ok(None) => summary.entities_skipped += 1,
                Err(err) => {
                    error!("Error indexando {} (tier {}): {err}", code, tier.label());
                    summary.entities_failed += 1;
                }
            }
        }

        debug!(
            "Lote {}/{} ({}) completado en {:.1}s",
            batch_no + 1,
            total_batches,
            tier.label(),
            batch_start.elapsed().as_secs_f32()
        );
        if let Some(status) = status {
            if let Ok(mut status) = status.lock() {
                status.message = format!(
                    "[{}] Lote {}/{}: {} entidades indexadas",
                    tier.label(),
                    batch_no + 1,
                    total_batches,
                    summary.entities_indexed
                );
                status.progress = (batch_no + 1) as f32 / total_batches as f32;
            }
        }
    }

    info!(
        "Tier {} listo en {:.1}s. {}",
        tier.label(),
        start.elapsed().as_secs_f32(),
        summary
    );
    (index, summary)
}

/// Construye los dos tiers a partir de las mismas entidades.
pub async fn build_tiered_index<E: Embedder>(
    entities: &[Entity],
    chunker: &Chunker,
    embedder: &E,
    cfg: &IndexingConfig,
    status: Option<&Arc<Mutex<Status>>>,
) -> (TieredIndexMap, TieredSummary) {
    let (structured, structured_summary) =
        build_tier_index(entities, SourceTier::Structured, chunker, embedder, cfg, status).await;
    let (document, document_summary) =
        build_tier_index(entities, SourceTier::Document, chunker, embedder, cfg, status).await;
    (
        TieredIndexMap { structured, document },
        TieredSummary {
            structured: structured_summary,
            document: document_summary,
        },
    )
}
