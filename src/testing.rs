//! Dobles de prueba deterministas para los servicios externos.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::filters::FilterExtractor;
use crate::llm::{Completer, Embedder};
use crate::models::FilterCriteria;

const DIMS: usize = 64;

/// Bolsa de palabras con hashing: textos que comparten palabras quedan cerca.
/// Falla para cualquier lote que contenga `fail_marker`.
#[derive(Default)]
pub struct HashEmbedder {
    pub fail_marker: Option<String>,
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn vector(text: &str) -> Vec<f64> {
        let mut v = vec![0.0; DIMS];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            v[(hasher.finish() as usize) % DIMS] += 1.0;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f64>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(EngineError::external("embeddings", "fallo simulado"));
            }
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Responde según reglas "si el prompt contiene X, devuelve Y" y registra los prompts.
pub struct ScriptedCompleter {
    rules: Vec<(String, String)>,
    default: String,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedCompleter {
    pub fn new(default: &str) -> Self {
        Self {
            rules: Vec::new(),
            default: default.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn rule(mut self, needle: &str, response: &str) -> Self {
        self.rules.push((needle.to_string(), response.to_string()));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls_containing(&self, needle: &str) -> usize {
        self.prompts().iter().filter(|p| p.contains(needle)).count()
    }
}

impl Completer for ScriptedCompleter {
    async fn complete(&self, prompt: &str) -> EngineResult<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let response = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| self.default.clone());
        Ok(response)
    }
}

/// Completion que siempre falla (servicio caído).
pub struct FailingCompleter;

impl Completer for FailingCompleter {
    async fn complete(&self, _prompt: &str) -> EngineResult<String> {
        Err(EngineError::external("completion", "servicio no disponible"))
    }
}

/// Extractor que devuelve siempre los mismos criterios.
pub struct FixedExtractor(pub FilterCriteria);

impl FilterExtractor for FixedExtractor {
    async fn extract(&self, _query: &str) -> FilterCriteria {
        self.0.clone()
    }
}
