//! Catálogos de productos por marca: carga del CSV, búsqueda por palabras
//! clave y ciclo de vida de sus índices (construcción y recarga atómica).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    app_state::Status,
    chunker::Chunker,
    config::{CatalogSource, IndexingConfig},
    error::{EngineError, EngineResult},
    ingest::{build_tiered_index, TieredIndexMap, TieredSummary},
    llm::Embedder,
    models::Entity,
};

/// Qué columnas del CSV alimentan cada tier.
#[derive(Debug, PartialEq, Eq)]
pub struct CatalogProfile {
    pub code_column: &'static str,
    pub name_column: &'static str,
    /// Campos que se indexan enteros.
    pub whole_fields: &'static [&'static str],
    /// Campos con segmentos separados por `|`, uno por elemento.
    pub split_fields: &'static [&'static str],
    pub document_column: &'static str,
}

pub const HIKVISION_PROFILE: CatalogProfile = CatalogProfile {
    code_column: "product_code",
    name_column: "product_name",
    whole_fields: &["product_name", "description_features"],
    split_fields: &["technical_specifications"],
    document_column: "pdf_content",
};

pub const SATEL_PROFILE: CatalogProfile = CatalogProfile {
    code_column: "product_code",
    name_column: "product_name",
    whole_fields: &["product_name", "description"],
    split_fields: &[
        "features_description",
        "technical_specifications",
        "documents",
        "softwares",
        "certificates",
    ],
    document_column: "pdf_content",
};

pub const GENERIC_PROFILE: CatalogProfile = CatalogProfile {
    code_column: "product_code",
    name_column: "product_name",
    whole_fields: &["product_name", "description"],
    split_fields: &["technical_specifications"],
    document_column: "pdf_content",
};

impl CatalogProfile {
    pub fn for_catalog(name: &str) -> &'static CatalogProfile {
        match name.to_lowercase().as_str() {
            "hikvision" => &HIKVISION_PROFILE,
            "satel" => &SATEL_PROFILE,
            _ => &GENERIC_PROFILE,
        }
    }
}

/// Interpreta el CSV de un catálogo. Las filas sin código se descartan.
pub fn parse_entities(content: &str, profile: &CatalogProfile) -> Result<Vec<Entity>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());
    let headers: Vec<String> = reader
        .headers()
        .context("cabecera ausente")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let position = |column: &str| headers.iter().position(|h| h == column);

    let code_idx = position(profile.code_column)
        .ok_or_else(|| anyhow!("Falta la columna '{}'", profile.code_column))?;
    let name_idx = position(profile.name_column);
    let whole: Vec<usize> = profile.whole_fields.iter().filter_map(|c| position(*c)).collect();
    let split: Vec<usize> = profile.split_fields.iter().filter_map(|c| position(*c)).collect();
    let document_idx = position(profile.document_column);

    let mut entities = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("fila {} inválida", line + 2))?;
        let cell = |idx: usize| clean_cell(record.get(idx).unwrap_or_default());

        let code = cell(code_idx);
        if code.is_empty() {
            warn!("Fila {} sin código de producto. Se omite.", line + 2);
            continue;
        }

        let mut structured: Vec<String> = whole.iter().map(|&idx| cell(idx)).collect();
        for &idx in &split {
            structured.extend(cell(idx).split('|').map(str::to_string));
        }
        let document = document_idx.map(cell).filter(|d| !d.is_empty());

        entities.push(Entity {
            name: name_idx.map(cell).unwrap_or_default(),
            code,
            structured,
            document,
        });
    }
    Ok(entities)
}

/// Celdas vacías en origen llegan a menudo como "nan".
fn clean_cell(raw: &str) -> String {
    let value = raw.trim();
    if value.eq_ignore_ascii_case("nan") {
        String::new()
    } else {
        value.to_string()
    }
}

pub async fn load_entities(path: &Path, profile: &CatalogProfile) -> Result<Vec<Entity>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("No se pudo leer el catálogo {}", path.display()))?;
    parse_entities(&content, profile)
        .with_context(|| format!("Catálogo inválido: {}", path.display()))
}

/// Resultado de búsqueda: código y nombre.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductMatch {
    pub code: String,
    pub name: String,
}

/// Productos cuyo nombre contiene todas las palabras de la consulta
/// (sin distinguir mayúsculas ni orden).
pub fn search_products(entities: &[Entity], query: &str) -> Vec<ProductMatch> {
    let keywords: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    entities
        .iter()
        .filter(|entity| {
            let name = entity.name.to_lowercase();
            keywords.iter().all(|k| name.contains(k.as_str()))
        })
        .map(|entity| ProductMatch {
            code: entity.code.clone(),
            name: entity.name.clone(),
        })
        .collect()
}

/// Estado inmutable de un catálogo cargado.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    pub entities: Vec<Entity>,
    pub index: TieredIndexMap,
    pub summary: Option<TieredSummary>,
}

pub struct BrandCatalog {
    pub name: String,
    pub path: PathBuf,
    profile: &'static CatalogProfile,
    snapshot: RwLock<Arc<CatalogSnapshot>>,
}

impl BrandCatalog {
    pub fn new(source: &CatalogSource) -> Self {
        Self {
            name: source.name.clone(),
            path: source.path.clone(),
            profile: CatalogProfile::for_catalog(&source.name),
            snapshot: RwLock::new(Arc::new(CatalogSnapshot::default())),
        }
    }

    /// Copia barata del estado actual; una recarga posterior no la altera.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, fresh: CatalogSnapshot) {
        let fresh = Arc::new(fresh);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }

    /// Relee el CSV y reconstruye ambos tiers. El estado anterior sigue
    /// sirviendo consultas hasta el intercambio final; si la lectura falla,
    /// se conserva.
    pub async fn rebuild<E: Embedder>(
        &self,
        chunker: &Chunker,
        embedder: &E,
        cfg: &IndexingConfig,
        status: Option<&Arc<Mutex<Status>>>,
    ) -> Result<TieredSummary> {
        let entities = load_entities(&self.path, self.profile).await?;
        info!("Catálogo '{}': {} productos leídos de {}", self.name, entities.len(), self.path.display());

        let (index, summary) = build_tiered_index(&entities, chunker, embedder, cfg, status).await;
        self.swap(CatalogSnapshot {
            entities,
            index,
            summary: Some(summary.clone()),
        });
        info!("Catálogo '{}' listo. {}", self.name, summary);
        Ok(summary)
    }
}

/// Servicio que posee los catálogos y sus índices; se inyecta en los handlers.
pub struct CatalogRegistry {
    catalogs: Vec<BrandCatalog>,
}

impl CatalogRegistry {
    pub fn new(sources: &[CatalogSource]) -> Self {
        Self {
            catalogs: sources.iter().map(BrandCatalog::new).collect(),
        }
    }

    pub fn get(&self, name: &str) -> EngineResult<&BrandCatalog> {
        let name = name.trim().to_lowercase();
        self.catalogs
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| EngineError::NotFound(format!("catálogo {name}")))
    }

    /// Reconstruye todos los catálogos. Un catálogo que falla no impide
    /// recargar los demás.
    pub async fn rebuild_all<E: Embedder>(
        &self,
        chunker: &Chunker,
        embedder: &E,
        cfg: &IndexingConfig,
        status: Option<&Arc<Mutex<Status>>>,
    ) -> Vec<(String, Result<TieredSummary>)> {
        let mut results = Vec::with_capacity(self.catalogs.len());
        for catalog in &self.catalogs {
            if let Some(status) = status {
                if let Ok(mut status) = status.lock() {
                    status.message = format!("Indexando catálogo '{}'...", catalog.name);
                    status.progress = 0.0;
                }
            }
            let result = catalog.rebuild(chunker, embedder, cfg, status).await;
            if let Err(e) = &result {
                warn!("No se pudo recargar el catálogo '{}': {e:#}", catalog.name);
            }
            results.push((catalog.name.clone(), result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceTier;
    use crate::testing::HashEmbedder;
    use std::fs;
    use tempfile::TempDir;

    const HIKVISION_CSV: &str = "product_code,product_name,description_features,technical_specifications,pdf_content\n\
DS-2CD2143G2-I,Caméra dôme 4MP AcuSense,Détection humain/véhicule,\"IP67|IR 30 m|PoE\",Fiche: boîtier IK10 et IP67.\n\
DS-2CD1043G2-I,Caméra bullet 4MP,Vision nocturne,\"IP67|IR 30 m\",nan\n\
,Sans code,Rien,,\n";

    fn cfg() -> IndexingConfig {
        IndexingConfig {
            chunk_size: 64,
            chunk_overlap: 16,
            batch_size: 4,
            workers: 2,
        }
    }

    #[test]
    fn hikvision_rows_are_flattened() {
        let entities = parse_entities(HIKVISION_CSV, &HIKVISION_PROFILE).unwrap();
        assert_eq!(entities.len(), 2);
        let dome = &entities[0];
        assert_eq!(dome.code, "DS-2CD2143G2-I");
        assert_eq!(
            dome.structured,
            vec!["Caméra dôme 4MP AcuSense", "Détection humain/véhicule", "IP67", "IR 30 m", "PoE"]
        );
        assert_eq!(dome.document.as_deref(), Some("Fiche: boîtier IK10 et IP67."));
        assert_eq!(entities[1].document, None);
    }

    #[test]
    fn satel_profile_splits_every_list_column() {
        let csv = "product_code,product_name,description,features_description,technical_specifications,documents,softwares,certificates,pdf_content\n\
INT-KLCD,Clavier LCD,Clavier pour centrale INTEGRA,\"Rétroéclairage|Buzzer\",12V DC,Manuel.pdf,DLOADX,EN 50131,\n";
        let entities = parse_entities(csv, CatalogProfile::for_catalog("Satel")).unwrap();
        assert_eq!(entities[0].structured.len(), 8);
        assert!(entities[0].structured.contains(&"EN 50131".to_string()));
    }

    #[test]
    fn missing_code_column_is_rejected() {
        assert!(parse_entities("name,price\nA,1\n", &GENERIC_PROFILE).is_err());
    }

    #[test]
    fn search_requires_every_keyword() {
        let entities = parse_entities(HIKVISION_CSV, &HIKVISION_PROFILE).unwrap();
        let codes = |q: &str| -> Vec<String> {
            search_products(&entities, q).into_iter().map(|m| m.code).collect()
        };
        assert_eq!(codes("caméra 4mp"), vec!["DS-2CD2143G2-I", "DS-2CD1043G2-I"]);
        assert_eq!(codes("DÔME acusense"), vec!["DS-2CD2143G2-I"]);
        assert!(codes("dôme bullet").is_empty());
    }

    #[tokio::test]
    async fn rebuild_swaps_snapshot_and_keeps_old_one_on_failure() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hikvision.csv");
        fs::write(&path, HIKVISION_CSV).unwrap();

        let registry = CatalogRegistry::new(&[CatalogSource {
            name: "hikvision".to_string(),
            path: path.clone(),
        }]);
        let chunker = Chunker::new(64, 16).unwrap();
        let embedder = HashEmbedder::default();

        let catalog = registry.get("Hikvision").unwrap();
        let before = catalog.snapshot();
        assert!(before.entities.is_empty());

        let results = registry.rebuild_all(&chunker, &embedder, &cfg(), None).await;
        assert!(results[0].1.is_ok());
        let loaded = catalog.snapshot();
        assert_eq!(loaded.entities.len(), 2);
        assert!(loaded.index.contains(SourceTier::Document, "DS-2CD2143G2-I"));
        assert!(!loaded.index.contains(SourceTier::Document, "DS-2CD1043G2-I"));
        // La copia anterior no cambia.
        assert!(before.entities.is_empty());

        fs::remove_file(&path).unwrap();
        assert!(catalog.rebuild(&chunker, &embedder, &cfg(), None).await.is_err());
        assert_eq!(catalog.snapshot().entities.len(), 2);
    }

    #[tokio::test]
    async fn rebuild_runs_on_a_spawned_task() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("hikvision.csv");
        fs::write(&path, HIKVISION_CSV).unwrap();
        let registry = Arc::new(CatalogRegistry::new(&[CatalogSource {
            name: "hikvision".to_string(),
            path,
        }]));

        let shared = Arc::clone(&registry);
        let results = tokio::spawn(async move {
            let chunker = Chunker::new(64, 16).unwrap();
            let embedder = HashEmbedder::default();
            shared.rebuild_all(&chunker, &embedder, &cfg(), None).await
        })
        .await
        .unwrap();

        assert!(results[0].1.is_ok());
        assert_eq!(registry.get("hikvision").unwrap().snapshot().entities.len(), 2);
    }

    #[test]
    fn unknown_catalog_is_not_found() {
        let registry = CatalogRegistry::new(&[]);
        assert!(matches!(registry.get("axis"), Err(EngineError::NotFound(_))));
    }
}
