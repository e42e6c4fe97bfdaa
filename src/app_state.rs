use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::{
    catalog::CatalogRegistry,
    chunker::Chunker,
    config::AppConfig,
    filters::CompletionExtractor,
    llm::LlmManager,
    rag::CompletionClassifier,
    sheets::DirSheetStore,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub llm_manager: LlmManager,
    pub classifier: CompletionClassifier<LlmManager>,
    pub extractor: CompletionExtractor<LlmManager>,
    pub chunker: Chunker,
    pub catalogs: Arc<CatalogRegistry>,
    pub sheets: DirSheetStore,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}

impl AppState {
    pub fn new(config: AppConfig, shutdown_tx: oneshot::Sender<()>) -> Result<Self> {
        let llm_manager = LlmManager::from_config(&config)?;
        let chunker = Chunker::new(config.indexing.chunk_size, config.indexing.chunk_overlap)?;
        Ok(Self {
            classifier: CompletionClassifier::with_sentinel(
                llm_manager.clone(),
                &config.classifier_sentinel,
            ),
            extractor: CompletionExtractor::new(llm_manager.clone()),
            chunker,
            catalogs: Arc::new(CatalogRegistry::new(&config.catalogs)),
            sheets: DirSheetStore::new(config.sheets.root.clone()),
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message: "Servidor listo.".to_string(),
                progress: 0.0,
            })),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
            llm_manager,
            config,
        })
    }

    /// Marca el estado como ocupado. Devuelve `false` si ya había un trabajo en curso.
    pub fn try_begin(&self, message: &str) -> bool {
        let Ok(mut status) = self.status.lock() else {
            return false;
        };
        if status.is_busy {
            return false;
        }
        status.is_busy = true;
        status.message = message.to_string();
        status.progress = 0.0;
        true
    }

    fn finish(&self, message: String) {
        if let Ok(mut status) = self.status.lock() {
            status.is_busy = false;
            status.progress = 0.0;
            status.message = message;
        }
    }

    /// Reconstruye los índices de todos los catálogos y deja el resultado en `Status`.
    /// Llamar sólo tras un `try_begin` con éxito.
    pub async fn reload_catalogs(&self) {
        let results = self
            .catalogs
            .rebuild_all(
                &self.chunker,
                &self.llm_manager,
                &self.config.indexing,
                Some(&self.status),
            )
            .await;

        let mut lines = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(summary) => lines.push(format!("{name}: {summary}")),
                Err(err) => {
                    error!("Error indexando el catálogo '{}': {err:#}", name);
                    lines.push(format!("{name}: error ({err})"));
                }
            }
        }
        let message = format!("¡Indexación completada! {}", lines.join(" | "));
        info!("{}", message);
        self.finish(message);
    }
}
