use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use pointsledger_core::{DomainError, UserId};
use pointsledger_infra::LedgerError;
use pointsledger_points::{ReferenceId, Tier, TransactionType};

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        LedgerError::InvalidAmount(_) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_amount", message)
        }
        LedgerError::InsufficientBalance { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "insufficient_balance", message)
        }
        LedgerError::TransientStoreFailure(_) => {
            tracing::warn!(error = %message, "ledger store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", message)
        }
        LedgerError::InvariantViolation(_) => {
            tracing::error!(error = %message, "ledger invariant violated");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "invariant_violation", message)
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", msg)
        }
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_user_id(s: &str) -> Result<UserId, axum::response::Response> {
    s.parse::<UserId>()
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_user_id", e.to_string()))
}

pub fn parse_tier(s: &str) -> Result<Tier, axum::response::Response> {
    s.parse::<Tier>().map_err(|_| {
        json_error(
            StatusCode::NOT_FOUND,
            "unknown_tier",
            "tier must be one of: bronze, silver, gold, platinum",
        )
    })
}

pub fn parse_transaction_type(s: &str) -> Result<TransactionType, axum::response::Response> {
    TransactionType::new(s).map_err(domain_error_to_response)
}

pub fn parse_reference(s: Option<String>) -> Result<Option<ReferenceId>, axum::response::Response> {
    s.map(ReferenceId::new)
        .transpose()
        .map_err(domain_error_to_response)
}
