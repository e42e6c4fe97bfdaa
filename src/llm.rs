//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI (o cualquier endpoint compatible vía
//! `OPENAI_BASE_URL`); Gemini/Ollama quedan preparados para el futuro.
//!
//! El resto del motor sólo conoce los traits `Embedder` y `Completer`, así
//! que en los tests se sustituyen por dobles deterministas.

use std::future::Future;

use anyhow::{anyhow, Result};
use rig::completion::Prompt;
use rig::embeddings::EmbeddingModel; // <- para .embed_texts

use crate::config::{AppConfig, LlmProvider};
use crate::error::{EngineError, EngineResult};
use crate::retry::{with_retry, RetryPolicy};

/// Servicio de embeddings: texto → vector de tamaño fijo, por lotes.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> impl Future<Output = EngineResult<Vec<Vec<f64>>>> + Send;
}

/// Servicio de completion: prompt → texto, baja temperatura.
pub trait Completer: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = EngineResult<String>> + Send;
}

impl<T: Embedder + ?Sized> Embedder for &T {
    fn embed(&self, texts: &[String]) -> impl Future<Output = EngineResult<Vec<Vec<f64>>>> + Send {
        (**self).embed(texts)
    }
}

impl<T: Completer + ?Sized> Completer for &T {
    fn complete(&self, prompt: &str) -> impl Future<Output = EngineResult<String>> + Send {
        (**self).complete(prompt)
    }
}

/// Textos por petición de embeddings si no se configura otro valor.
pub const DEFAULT_EMBED_BATCH: usize = 96;

/// Embebe `texts` en peticiones de como mucho `max_batch` textos, en orden.
/// Cada sub-lote debe devolver tantos vectores como textos recibió.
pub async fn embed_in_batches<F, Fut>(
    texts: &[String],
    max_batch: usize,
    mut embed: F,
) -> EngineResult<Vec<Vec<f64>>>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = EngineResult<Vec<Vec<f64>>>>,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(max_batch.max(1)) {
        let part = embed(batch.to_vec()).await?;
        if part.len() != batch.len() {
            return Err(EngineError::external(
                "embeddings",
                format!(
                    "Número de embeddings ({}) distinto al número de textos ({})",
                    part.len(),
                    batch.len()
                ),
            ));
        }
        vectors.extend(part);
    }
    Ok(vectors)
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    pub temperature: f64,
    pub embed_batch_size: usize,
    pub retry: RetryPolicy,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            temperature: cfg.llm_temperature,
            embed_batch_size: cfg.llm_embed_batch_size,
            retry: cfg.retry.clone(),
        })
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para embeddings",
                other
            )),
        }
    }

    async fn embed_with_openai(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};
        // Trait para client.embedding_model(...)
        use rig::client::EmbeddingsClient as _;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        // Embeddings en bloque (.embed_texts viene de EmbeddingModel)
        let embeddings = embedding_model.embed_texts(texts.to_vec()).await?;

        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                texts.len()
            ));
        }

        Ok(embeddings.into_iter().map(|emb| emb.vec).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn complete_prompt(&self, prompt: &str) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_with_openai(prompt).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }

    async fn complete_with_openai(&self, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        const SYSTEM_PROMPT: &str = r#"
You are a precise assistant for a security-equipment installer.
Follow the instructions contained in each request exactly, answer only from the
information provided and never invent product characteristics or report data.
"#;

        let client = openai::Client::from_env();

        // Modelo de chat por defecto si no se ha configurado otro
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(SYSTEM_PROMPT)
            .temperature(self.temperature)
            .build();

        let answer = agent.prompt(prompt).await?;
        Ok(answer.trim().to_string())
    }
}

impl Embedder for LlmManager {
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f64>>> {
        // Un sub-lote fallido se reintenta solo, sin repetir los anteriores.
        embed_in_batches(texts, self.embed_batch_size, |batch| async move {
            with_retry(&self.retry, "embeddings", || self.embed_texts(&batch)).await
        })
        .await
    }
}

impl Completer for LlmManager {
    async fn complete(&self, prompt: &str) -> EngineResult<String> {
        with_retry(&self.retry, "completion", || self.complete_prompt(prompt)).await
    }
}
