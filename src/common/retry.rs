// src/common/retry.rs

use std::future::Future;

use crate::common::error::AppError;

/// Repete `op` enquanto ela falhar com `Conflict`, no máximo `max_retries` vezes
/// além da primeira tentativa. Qualquer outro erro sai na hora.
pub async fn with_conflict_retries<T, F, Fut>(
    max_retries: u32,
    what: &str,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(AppError::Conflict(message)) if attempt < max_retries => {
                attempt += 1;
                tracing::debug!("Conflito em {} (tentativa {}): {}", what, attempt, message);
                tokio::task::yield_now().await;
            }
            Err(AppError::Conflict(message)) => {
                tracing::warn!("Conflito em {} persistiu após {} tentativas", what, attempt + 1);
                return Err(AppError::Conflict(message));
            }
            other => return other,
        }
    }
}
