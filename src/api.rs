use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    catalog::{search_products, ProductMatch},
    error::EngineError,
    filters::FilterExtractor,
    models::{AnalysisKind, AnalysisRecord, FilterCriteria, QaAnswer},
    rag::TieredRetriever,
    router::{self, RoutedAnswer},
    tools::ToolContext,
};

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

impl From<EngineError> for (StatusCode, Json<serde_json::Value>) {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            EngineError::Parse(_) | EngineError::Config(_) => StatusCode::BAD_REQUEST,
            EngineError::EmptyResult(_) => StatusCode::OK,
        };
        api_error(status, err.to_string())
    }
}

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct SearchPayload {
    catalog: String,
    query: String,
}

#[derive(Serialize)]
pub struct SearchResponse {
    results: Vec<ProductMatch>,
}

#[derive(Deserialize)]
pub struct AskPayload {
    catalog: String,
    product_code: String,
    question: String,
}

#[derive(Deserialize)]
pub struct AnalyzePayload {
    catalog: String,
    codes: Vec<String>,
    question: String,
    #[serde(default)]
    kind: AnalysisKind,
}

#[derive(Deserialize)]
pub struct QuestionPayload {
    question: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/products/search", post(search_handler))
        .route("/api/products/ask", post(ask_handler))
        .route("/api/products/analyze", post(analyze_handler))
        .route("/api/technician/ask", post(technician_handler))
        .route("/api/filters/extract", post(filters_handler))
        .route("/api/reload", post(reload_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn search_handler(
    State(state): State<AppState>,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<SearchResponse>, ApiError> {
    let catalog = state.catalogs.get(&payload.catalog)?;
    let snapshot = catalog.snapshot();
    Ok(Json(SearchResponse {
        results: search_products(&snapshot.entities, &payload.query),
    }))
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<QaAnswer>, ApiError> {
    let snapshot = state.catalogs.get(&payload.catalog)?.snapshot();
    let retriever = TieredRetriever {
        index: &snapshot.index,
        embedder: &state.llm_manager,
        completer: &state.llm_manager,
        classifier: &state.classifier,
        retrieval: &state.config.retrieval,
    };

    let result = retriever.ask(&payload.product_code, &payload.question).await;
    match result {
        Ok(answer) => Ok(Json(answer)),
        // Sin datos para el producto: respuesta normal, sin fuentes.
        Err(err @ EngineError::NotFound(_)) => Ok(Json(QaAnswer {
            product_code: payload.product_code,
            answer: err.to_string(),
            sources: Vec::new(),
        })),
        Err(err) => {
            error!("Error al responder sobre {}: {}", payload.product_code, err);
            Err(err.into())
        }
    }
}

#[axum::debug_handler]
async fn analyze_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzePayload>,
) -> Result<Json<AnalysisRecord>, ApiError> {
    if payload.codes.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Seleccione al menos un producto."));
    }
    let snapshot = state.catalogs.get(&payload.catalog)?.snapshot();
    let retriever = TieredRetriever {
        index: &snapshot.index,
        embedder: &state.llm_manager,
        completer: &state.llm_manager,
        classifier: &state.classifier,
        retrieval: &state.config.retrieval,
    };

    let rows = retriever.analyze(&payload.codes, &payload.question).await;
    Ok(Json(AnalysisRecord::new(&payload.question, payload.kind, rows)))
}

#[axum::debug_handler]
async fn technician_handler(
    State(state): State<AppState>,
    Json(payload): Json<QuestionPayload>,
) -> Json<RoutedAnswer> {
    let ctx = ToolContext {
        embedder: &state.llm_manager,
        completer: &state.llm_manager,
        store: &state.sheets,
        extractor: &state.extractor,
        sheets: &state.config.sheets,
        retry: &state.config.retry,
    };
    Json(router::dispatch(&ctx, &payload.question).await)
}

#[axum::debug_handler]
async fn filters_handler(
    State(state): State<AppState>,
    Json(payload): Json<QuestionPayload>,
) -> Json<FilterCriteria> {
    Json(state.extractor.extract(&payload.question).await)
}

#[axum::debug_handler]
async fn reload_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    if !state.try_begin("Iniciando indexación...") {
        return Err(api_error(StatusCode::CONFLICT, "Ya hay una indexación en curso."));
    }
    spawn(async move {
        state.reload_catalogs().await;
    });
    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().map(|s| s.clone()).unwrap_or_default())
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Ok(mut sender) = state.shutdown_sender.lock() {
        if let Some(sender) = sender.take() {
            let _ = sender.send(());
        }
    }
    StatusCode::OK
}
