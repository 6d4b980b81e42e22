// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

// ---
// Tipo de erro da aplicação
// ---
// Cada variante corresponde a uma "família" de falha. O `kind()` é a parte
// legível por máquina, a mensagem do `#[error]` é a parte legível por humanos.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Dados inválidos: {0}")]
    Validation(String),

    #[error("{0}")]
    Capacity(BindFailure),

    #[error("Conflito de concorrência: {0}")]
    Conflict(String),

    #[error("Não encontrado: {0}")]
    NotFound(String),

    #[error("Serviço externo indisponível: {0}")]
    UpstreamUnavailable(String),

    // Nunca deve acontecer. Não é repetido.
    #[error("Invariante violada: {0}")]
    InvariantViolation(String),

    #[error("Erro de banco de dados")]
    Database(#[from] sqlx::Error),

    #[error("Erro interno do servidor")]
    Internal(#[from] anyhow::Error),
}

// ---
// Motivos de recusa de um bind (todos da família CAPACITY)
// ---
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindFailure {
    #[error("O pool não está vigente (válido de {start} até {end}).")]
    PoolNotCurrent { start: String, end: String },

    #[error("O pool foi marcado para exclusão e não aceita novos consumos.")]
    PendingDelete,

    #[error("O tipo de consumidor '{actual}' não é aceito; o pool exige '{required}'.")]
    ConsumerTypeMismatch { required: String, actual: String },

    #[error("Quantidade insuficiente: pedido {requested}, disponível {available}.")]
    InsufficientQuantity { requested: i64, available: i64 },

    #[error("O consumidor já possui uma assinatura do produto '{product_id}'.")]
    AlreadyHasProduct { product_id: String },

    #[error("O convidado não pertence ao host que restringe este pool.")]
    HostMismatch,

    #[error("O pool é exclusivo para máquinas virtuais.")]
    VirtOnly,

    #[error("O pool é restrito ao usuário '{username}'.")]
    RestrictedToUser { username: String },

    #[error("Recusado pela política: {0}")]
    PolicyDenied(String),

    #[error("Nenhum pool disponível fornece o produto '{product_id}'.")]
    NoPoolAvailable { product_id: String },
}

impl BindFailure {
    pub fn code(&self) -> &'static str {
        match self {
            BindFailure::PoolNotCurrent { .. } => "POOL_NOT_CURRENT",
            BindFailure::PendingDelete => "POOL_PENDING_DELETE",
            BindFailure::ConsumerTypeMismatch { .. } => "CONSUMER_TYPE_MISMATCH",
            BindFailure::InsufficientQuantity { .. } => "INSUFFICIENT_QUANTITY",
            BindFailure::AlreadyHasProduct { .. } => "ALREADY_HAS_PRODUCT",
            BindFailure::HostMismatch => "HOST_MISMATCH",
            BindFailure::VirtOnly => "VIRT_ONLY",
            BindFailure::RestrictedToUser { .. } => "RESTRICTED_TO_USER",
            BindFailure::PolicyDenied(_) => "POLICY_DENIED",
            BindFailure::NoPoolAvailable { .. } => "NO_POOL_AVAILABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Capacity,
    Conflict,
    NotFound,
    UpstreamUnavailable,
    InvariantViolation,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Capacity(_) => ErrorKind::Capacity,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            AppError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            AppError::Database(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// O chamador pode tentar de novo (conflito otimista esgotado ou upstream fora do ar).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_) | AppError::UpstreamUnavailable(_))
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("{} '{}'", what, id))
    }
}

impl From<BindFailure> for AppError {
    fn from(failure: BindFailure) -> Self {
        AppError::Capacity(failure)
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Capacity => StatusCode::FORBIDDEN,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::InvariantViolation | ErrorKind::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Erros internos são logados com detalhe e mascarados para o cliente.
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Erro de banco de dados: {:?}", e);
                "Ocorreu um erro inesperado.".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Erro Interno do Servidor: {:?}", e);
                "Ocorreu um erro inesperado.".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({ "error": kind, "message": message });
        if let AppError::Capacity(failure) = &self {
            body["reason"] = json!(failure.code());
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_failures_keep_their_reason_code() {
        let err: AppError = BindFailure::InsufficientQuantity { requested: 11, available: 9 }.into();
        assert_eq!(err.kind(), ErrorKind::Capacity);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("11"));
        match err {
            AppError::Capacity(f) => assert_eq!(f.code(), "INSUFFICIENT_QUANTITY"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn conflict_and_upstream_are_retryable() {
        assert!(AppError::Conflict("pool".into()).is_retryable());
        assert!(AppError::UpstreamUnavailable("catalog".into()).is_retryable());
        assert!(!AppError::not_found("Pool", "x").is_retryable());
    }

    #[test]
    fn internal_errors_map_to_500() {
        let response = AppError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = AppError::Capacity(BindFailure::VirtOnly).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
