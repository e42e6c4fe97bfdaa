// Módulos de la aplicación
mod api;
mod app_state;
mod catalog;
mod chunker;
mod config;
mod error;
mod filters;
mod ingest;
mod llm;
mod models;
mod rag;
mod reports;
mod retry;
mod router;
mod sheets;
mod tools;
mod vector_store;

#[cfg(test)]
mod testing;

use crate::app_state::AppState;
use anyhow::Context;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;
    info!(
        "Catálogos configurados: {}",
        cfg.catalogs
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 3. Crear estado compartido (LLMs, catálogos, hojas de informes)
    let app_state = AppState::new(cfg, shutdown_tx).context("Error inicializando el estado")?;

    // 4. Primera indexación de los catálogos en segundo plano
    if app_state.try_begin("Iniciando indexación...") {
        let state = app_state.clone();
        tokio::spawn(async move {
            state.reload_catalogs().await;
        });
    } else {
        warn!("No se pudo lanzar la indexación inicial.");
    }

    // 5. Configurar el router de la API
    let app = api::create_router(app_state.clone()).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
