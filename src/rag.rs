//! Recuperación por niveles sobre los índices de un catálogo.
//!
//! Flujo de conformidad (pregunta sí/no por producto):
//!   1. Top-k del tier CSV.
//!   2. Sin chunks ⇒ no concluyente; si no, el `Classifier` juzga el contexto.
//!   3. No concluyente y hay tier PDF ⇒ top-k del PDF y segundo juicio, que es el definitivo.
//!
//! Flujo de preguntas abiertas: top-k de ambos tiers, índice efímero con la
//! unión y nueva consulta con un k mayor antes de generar la respuesta.

use std::future::Future;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::RetrievalConfig,
    error::{EngineError, EngineResult},
    ingest::TieredIndexMap,
    llm::{Completer, Embedder},
    models::{ConformanceRow, QaAnswer, SourceTier, Verdict},
    vector_store::{embed_query, ScoredChunk, VectorIndex},
};

/// Centinela por defecto para "información insuficiente".
pub const DEFAULT_SENTINEL: &str = "Pas clair";

const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Yes,
    No,
    Inconclusive,
}

impl From<Decision> for Verdict {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Yes => Verdict::Yes,
            Decision::No => Verdict::No,
            Decision::Inconclusive => Verdict::Unclear,
        }
    }
}

/// Decisión tipada junto al texto que la justifica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub decision: Decision,
    pub text: String,
}

#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub entity_id: &'a str,
    pub question: &'a str,
    pub context: &'a str,
    pub tier: SourceTier,
}

pub trait Classifier: Send + Sync {
    fn judge(&self, request: JudgeRequest<'_>) -> impl Future<Output = EngineResult<Judgement>> + Send;
}

/// Clasificador respaldado por una llamada de completion.
#[derive(Debug, Clone)]
pub struct CompletionClassifier<C> {
    completer: C,
    sentinel: String,
}

impl<C: Completer> CompletionClassifier<C> {
    pub fn new(completer: C) -> Self {
        Self::with_sentinel(completer, DEFAULT_SENTINEL)
    }

    pub fn with_sentinel(completer: C, sentinel: &str) -> Self {
        Self {
            completer,
            sentinel: sentinel.to_string(),
        }
    }

    fn prompt(&self, request: &JudgeRequest<'_>) -> String {
        match request.tier {
            SourceTier::Structured => format!(
                r#"
Vous êtes un ASSISTANT IA SPÉCIALISÉ en caméras de surveillance et systèmes de sécurité.
Produit à analyser : {code}

Spécifications techniques (CSV) :
{context}

Question : {question}

INSTRUCTIONS :
- Répondez OUI ou NON de manière FACTUELLE et PRÉCISE.
- Justifiez votre réponse même si c'est NON.
- Si vous n'êtes pas sûr ou si les informations sont insuffisantes, répondez "{sentinel}".
RÉPONSE :
"#,
                code = request.entity_id,
                context = request.context,
                question = request.question,
                sentinel = self.sentinel,
            ),
            SourceTier::Document => format!(
                r#"
Vous êtes un ASSISTANT IA SPÉCIALISÉ en caméras de surveillance et systèmes de sécurité.
Produit à analyser : {code}

Spécifications techniques (PDF) :
{context}

Question : {question}

INSTRUCTIONS :
- Répondez de manière FACTUELLE et PRÉCISE.
- Justifiez votre réponse même si c'est NON.
- Utilisez toutes les informations disponibles dans le PDF.
RÉPONSE :
"#,
                code = request.entity_id,
                context = request.context,
                question = request.question,
            ),
        }
    }
}

impl<C: Completer> Classifier for CompletionClassifier<C> {
    async fn judge(&self, request: JudgeRequest<'_>) -> EngineResult<Judgement> {
        let text = self.completer.complete(&self.prompt(&request)).await?;
        Ok(Judgement {
            decision: parse_decision(&text, &self.sentinel),
            text,
        })
    }
}

/// El centinela se busca sin distinguir mayúsculas; "oui"/"yes" como
/// palabra suelta marcan una respuesta afirmativa.
pub fn parse_decision(text: &str, sentinel: &str) -> Decision {
    let lower = text.to_lowercase();
    if !sentinel.is_empty() && lower.contains(&sentinel.to_lowercase()) {
        return Decision::Inconclusive;
    }
    let affirmative = lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == "oui" || word == "yes");
    if affirmative {
        Decision::Yes
    } else {
        Decision::No
    }
}

fn join_context(hits: &[ScoredChunk], separator: &str) -> String {
    hits.iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Fila "sin información" para una entidad sin datos recuperables.
fn no_information(code: &str) -> ConformanceRow {
    ConformanceRow {
        code: code.to_string(),
        verdict: Verdict::Unclear,
        justification: EngineError::NotFound(code.to_string()).to_string(),
        sources: String::new(),
        tier: None,
    }
}

/// Orquestador de recuperación por niveles sobre un `TieredIndexMap`.
pub struct TieredRetriever<'a, E, C, K> {
    pub index: &'a TieredIndexMap,
    pub embedder: &'a E,
    pub completer: &'a C,
    pub classifier: &'a K,
    pub retrieval: &'a RetrievalConfig,
}

impl<'a, E: Embedder, C: Completer, K: Classifier> TieredRetriever<'a, E, C, K> {
    fn top_k(&self, tier: SourceTier, code: &str, query_vec: &[f64], k: usize) -> Vec<ScoredChunk> {
        self.index
            .get(tier, code)
            .map(|index| index.query(query_vec, k))
            .unwrap_or_default()
    }

    /// Conformidad de un producto respecto a una pregunta sí/no.
    pub async fn check(&self, code: &str, question: &str) -> EngineResult<ConformanceRow> {
        if !self.index.knows(code) {
            debug!("{} no está en ningún tier", code);
            return Ok(no_information(code));
        }
        let query_vec = embed_query(self.embedder, question).await?;

        let csv_hits = self.top_k(SourceTier::Structured, code, &query_vec, self.retrieval.k_decision);
        let has_document = self.index.contains(SourceTier::Document, code);
        if csv_hits.is_empty() && !has_document {
            return Ok(no_information(code));
        }

        let mut sources = join_context(&csv_hits, "\n");
        let mut tier = Some(SourceTier::Structured);
        let mut judgement = if csv_hits.is_empty() {
            Judgement {
                decision: Decision::Inconclusive,
                text: String::new(),
            }
        } else {
            self.classifier
                .judge(JudgeRequest {
                    entity_id: code,
                    question,
                    context: &sources,
                    tier: SourceTier::Structured,
                })
                .await?
        };

        if judgement.decision == Decision::Inconclusive && has_document {
            let pdf_hits = self.top_k(SourceTier::Document, code, &query_vec, self.retrieval.k_pdf);
            if !pdf_hits.is_empty() {
                info!("{}: respuesta CSV no concluyente, consultando el PDF", code);
                let context = join_context(&pdf_hits, "\n");
                judgement = self
                    .classifier
                    .judge(JudgeRequest {
                        entity_id: code,
                        question,
                        context: &context,
                        tier: SourceTier::Document,
                    })
                    .await?;
                sources = context;
                tier = Some(SourceTier::Document);
            }
        }

        if judgement.text.is_empty() {
            return Ok(no_information(code));
        }
        Ok(ConformanceRow {
            code: code.to_string(),
            verdict: judgement.decision.into(),
            justification: judgement.text,
            sources,
            tier,
        })
    }

    /// Análisis por lotes: una fila por código; un fallo se convierte en una
    /// fila `error` y no detiene el resto.
    pub async fn analyze(&self, codes: &[String], question: &str) -> Vec<ConformanceRow> {
        let mut rows = Vec::with_capacity(codes.len());
        for code in codes {
            let row = match self.check(code, question).await {
                Ok(row) => row,
                Err(e) => {
                    warn!("Error analizando {}: {}", code, e);
                    ConformanceRow {
                        code: code.clone(),
                        verdict: Verdict::Error,
                        justification: e.to_string(),
                        sources: String::new(),
                        tier: None,
                    }
                }
            };
            rows.push(row);
        }
        rows
    }

    /// Pregunta abierta sobre un producto usando siempre ambos tiers.
    pub async fn ask(&self, code: &str, question: &str) -> EngineResult<QaAnswer> {
        if !self.index.knows(code) {
            return Err(EngineError::NotFound(code.to_string()));
        }
        let query_vec = embed_query(self.embedder, question).await?;

        let mut hits = self.top_k(SourceTier::Structured, code, &query_vec, self.retrieval.k_csv);
        hits.extend(self.top_k(SourceTier::Document, code, &query_vec, self.retrieval.k_pdf));
        if hits.is_empty() {
            return Err(EngineError::NotFound(code.to_string()));
        }

        let merged = VectorIndex::from_scored(hits);
        let top = merged.query(&query_vec, self.retrieval.k_combined);
        debug!("{}: {} pasajes tras la fusión de tiers", code, top.len());

        let prompt = format!(
            "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
Product: {code}\n\n{context}\n\nQuestion: {question}\nHelpful Answer:",
            context = join_context(&top, "\n\n"),
        );
        let answer = self.completer.complete(&prompt).await?;

        Ok(QaAnswer {
            product_code: code.to_string(),
            answer,
            sources: top.iter().map(|hit| hit.snippet(SNIPPET_CHARS)).collect(),
        })
    }
}
