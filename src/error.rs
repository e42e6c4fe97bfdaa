//! Taxonomía de errores del motor de recuperación y análisis.
//!
//! Sólo `ExternalService` debería llegar al usuario como fallo; el resto
//! se recupera localmente (tier de respaldo, filtro vacío, token ignorado...).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// La entidad no existe en ninguno de los dos tiers.
    #[error("No hay información disponible para '{0}'")]
    NotFound(String),

    #[error("Error de parseo: {0}")]
    Parse(String),

    /// Embeddings, completion o almacén de hojas: ya se reintentó según la política.
    #[error("Fallo del servicio externo '{service}': {message}")]
    ExternalService { service: String, message: String },

    #[error("Ningún dato coincide con los criterios: {0}")]
    EmptyResult(String),

    #[error("Configuración inválida: {0}")]
    Config(String),
}

impl EngineError {
    pub fn external(service: &str, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.to_string(),
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
