//! Timeout y reintentos con backoff exponencial para llamadas externas.
//!
//! Cancelar el futuro que llama (p. ej. al cerrar la petición HTTP) cancela
//! también la llamada en curso, porque todo se ejecuta dentro del mismo futuro.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Espera antes del reintento número `attempt` (1, 2, ...).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Ejecuta `op` con el timeout de la política, reintentando los fallos.
/// Agotados los reintentos se devuelve `EngineError::ExternalService`.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, service: &str, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0u32;
    loop {
        let failure = match timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("tiempo de espera agotado ({:?})", policy.timeout),
        };

        if attempt >= policy.max_retries {
            return Err(EngineError::external(service, failure));
        }
        attempt += 1;
        let wait = policy.delay_for(attempt);
        warn!(
            "Llamada a '{}' fallida ({}). Reintento {}/{} en {:?}",
            service, failure, attempt, policy.max_retries, wait
        );
        sleep(wait).await;
    }
}
