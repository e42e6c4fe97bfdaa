//! Carga y gestión de configuración de la aplicación (LLM, indexación,
//! recuperación, catálogos y hojas de cálculo).

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::error::EngineError;
use crate::llm::DEFAULT_EMBED_BATCH;
use crate::rag::DEFAULT_SENTINEL;
use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Parámetros del troceado y del constructor de índices por entidad.
#[derive(Clone, Debug)]
pub struct IndexingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub workers: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 256,
            batch_size: 4,
            workers: default_workers(),
        }
    }
}

/// `top_k` de cada paso de recuperación.
#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub k_decision: usize,
    pub k_csv: usize,
    pub k_pdf: usize,
    pub k_combined: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_decision: 5,
            k_csv: 10,
            k_pdf: 10,
            k_combined: 15,
        }
    }
}

/// Un catálogo de productos (una marca) y el CSV del que se carga.
#[derive(Clone, Debug)]
pub struct CatalogSource {
    pub name: String,
    pub path: PathBuf,
}

/// Ubicación de las hojas de técnicos, planificación e informes diarios.
#[derive(Clone, Debug)]
pub struct SheetsConfig {
    pub root: PathBuf,
    pub technicians_sheet: String,
    pub planning_folder: String,
    pub reports_folder: String,
    pub daily_report_sheet: String,
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub llm_temperature: f64,
    /// Máximo de textos por petición de embeddings.
    pub llm_embed_batch_size: usize,
    pub retry: RetryPolicy,
    /// Texto con el que el clasificador marca una respuesta no concluyente.
    pub classifier_sentinel: String,

    pub indexing: IndexingConfig,
    pub retrieval: RetrievalConfig,
    pub catalogs: Vec<CatalogSource>,
    pub sheets: SheetsConfig,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let llm_temperature = env_or("LLM_TEMPERATURE", 0.2)?;
        let llm_embed_batch_size = env_or("EMBED_BATCH_SIZE", DEFAULT_EMBED_BATCH)?;

        let retry = RetryPolicy {
            max_retries: env_or("LLM_MAX_RETRIES", 2)?,
            base_delay: Duration::from_millis(env_or("LLM_BACKOFF_MS", 500)?),
            timeout: Duration::from_secs(env_or("LLM_TIMEOUT_SECS", 60)?),
        };

        let classifier_sentinel =
            env::var("CLASSIFIER_SENTINEL").unwrap_or_else(|_| DEFAULT_SENTINEL.to_string());

        let indexing = IndexingConfig {
            chunk_size: env_or("CHUNK_SIZE", 512)?,
            chunk_overlap: env_or("CHUNK_OVERLAP", 256)?,
            batch_size: env_or("BATCH_SIZE", 4)?,
            workers: env_or("INDEX_WORKERS", default_workers())?,
        };
        if indexing.chunk_overlap >= indexing.chunk_size {
            return Err(EngineError::Config(format!(
                "CHUNK_OVERLAP ({}) debe ser menor que CHUNK_SIZE ({})",
                indexing.chunk_overlap, indexing.chunk_size
            ))
            .into());
        }

        let retrieval = RetrievalConfig {
            k_decision: env_or("RETRIEVER_K_DECISION", 5)?,
            k_csv: env_or("RETRIEVER_K_CSV", 10)?,
            k_pdf: env_or("RETRIEVER_K_PDF", 10)?,
            k_combined: env_or("RETRIEVER_K_COMBINED", 15)?,
        };

        let catalogs = parse_catalogs(&env::var("CATALOGS").unwrap_or_else(|_| {
            "hikvision=data/my_hikvision_data.csv,satel=data/my_satel_data.csv".to_string()
        }))?;

        let sheets = SheetsConfig {
            root: PathBuf::from(env::var("SHEETS_DIR").unwrap_or_else(|_| "data/sheets".to_string())),
            technicians_sheet: env::var("TECHNICIANS_SHEET")
                .unwrap_or_else(|_| "technicians".to_string()),
            planning_folder: env::var("PLANNING_FOLDER").unwrap_or_else(|_| "planning".to_string()),
            reports_folder: env::var("REPORTS_FOLDER").unwrap_or_else(|_| "reports".to_string()),
            daily_report_sheet: env::var("DAILY_REPORT_SHEET")
                .unwrap_or_else(|_| "reports/daily".to_string()),
        };

        Ok(Self {
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            llm_temperature,
            llm_embed_batch_size,
            retry,
            classifier_sentinel,
            indexing,
            retrieval,
            catalogs,
            sheets,
        })
    }
}

/// Menor entre un techo fijo (4) y el paralelismo disponible.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| EngineError::Config(format!("Valor inválido para {key} ('{raw}'): {e}")).into()),
        _ => Ok(default),
    }
}

/// Formato `nombre=ruta.csv,otro=ruta2.csv`.
fn parse_catalogs(raw: &str) -> Result<Vec<CatalogSource>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, path) = entry
                .split_once('=')
                .ok_or_else(|| EngineError::Config(format!("Entrada de CATALOGS sin '=': {entry}")))?;
            Ok(CatalogSource {
                name: name.trim().to_lowercase(),
                path: PathBuf::from(path.trim()),
            })
        })
        .collect()
}
