// src/middleware/owner.rs

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, Request},
    middleware::Next,
    response::Response,
};

use crate::{common::error::AppError, config::AppState};

// O nome do nosso cabeçalho HTTP customizado
pub const OWNER_KEY_HEADER: &str = "x-owner-key";

// Escopo de toda operação do núcleo: o owner em nome de quem se age.
// Passado explicitamente aos serviços, nunca guardado em estado global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerContext {
    pub owner_key: String,
}

impl OwnerContext {
    pub fn new(owner_key: impl Into<String>) -> Self {
        Self { owner_key: owner_key.into() }
    }

    /// Entidades de outro owner são tratadas como inexistentes.
    pub fn owns(&self, owner_key: &str) -> bool {
        self.owner_key == owner_key
    }
}

impl<S> FromRequestParts<S> for OwnerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Já validado pelo owner_guard?
        if let Some(ctx) = parts.extensions.get::<OwnerContext>() {
            return Ok(ctx.clone());
        }

        // Tenta ler o cabeçalho X-Owner-Key
        let value = parts.headers.get(OWNER_KEY_HEADER).ok_or_else(|| {
            AppError::Validation("O cabeçalho X-Owner-Key é obrigatório.".to_string())
        })?;

        let key = value.to_str().map_err(|_| {
            AppError::Validation("Cabeçalho X-Owner-Key contém caracteres inválidos.".to_string())
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::Validation("Cabeçalho X-Owner-Key vazio.".to_string()));
        }

        Ok(OwnerContext::new(key))
    }
}

// O middleware: só deixa passar pedidos de um owner que existe
pub async fn owner_guard(
    State(app_state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let (mut parts, body) = request.into_parts();
    let ctx = OwnerContext::from_request_parts(&mut parts, &()).await?;

    app_state.owner_service.get(&ctx.owner_key).await?;

    // Insere o contexto nos "extensions" da requisição
    parts.extensions.insert(ctx);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn reads_the_owner_from_the_header() {
        let (mut parts, _) = Request::builder()
            .header(OWNER_KEY_HEADER, " acme ")
            .body(())
            .unwrap()
            .into_parts();
        let ctx = OwnerContext::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ctx, OwnerContext::new("acme"));
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();
        let err = OwnerContext::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
