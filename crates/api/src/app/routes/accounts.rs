use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use pointsledger_infra::PostingOutcome;

use crate::app::services::{self, AppServices};
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:user_id", get(get_account))
        .route("/:user_id/awards", post(award_points))
        .route("/:user_id/actions/:action", post(award_action))
        .route("/:user_id/redemptions", post(redeem_points))
        .route("/:user_id/transactions", get(list_transactions))
        .route("/:user_id/standing", get(get_standing))
        .route("/:user_id/reconciliation", get(get_reconciliation))
        .route("/:user_id/events", get(account_events))
}

/// 201 for a fresh posting, 200 for an idempotent replay.
fn posting_response(outcome: PostingOutcome) -> axum::response::Response {
    let status = if outcome.is_replay() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    (status, Json(dto::outcome_to_json(&outcome))).into_response()
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine().get_account(user_id).await {
        Ok(account) => (StatusCode::OK, Json(dto::account_to_json(&account))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn award_points(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
    Json(body): Json<dto::AwardRequest>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let transaction_type = match errors::parse_transaction_type(&body.transaction_type) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let reference_id = match errors::parse_reference(body.reference_id) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .award(
            user_id,
            body.points,
            transaction_type,
            body.description,
            reference_id,
        )
        .await
    {
        Ok(outcome) => posting_response(outcome),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn award_action(
    Extension(services): Extension<Arc<AppServices>>,
    Path((user_id, action)): Path<(String, String)>,
    body: Option<Json<dto::ActionRequest>>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let spec = match services.catalog().award_for(&action, body.units) {
        Ok(spec) => spec,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let reference_id = match errors::parse_reference(body.reference_id) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services.engine().award_spec(user_id, spec, reference_id).await {
        Ok(outcome) => posting_response(outcome),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn redeem_points(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
    Json(body): Json<dto::RedeemRequest>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let reference_id = match errors::parse_reference(body.reference_id) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match services
        .engine()
        .redeem(user_id, body.points, body.description, reference_id)
        .await
    {
        Ok(outcome) => posting_response(outcome),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
    Query(query): Query<dto::HistoryQuery>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine().transaction_history(user_id, query.limit).await {
        Ok(rows) => {
            let items = rows.iter().map(dto::transaction_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_standing(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine().tier_standing(user_id).await {
        Ok(standing) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "account": dto::account_to_json(&standing.account),
                "tier": standing.tier,
                "next_tier": standing.next_tier,
                "points_to_next_tier": standing.points_to_next_tier,
                "progress_percent": standing.progress_percent,
                "benefits": standing.benefits,
            })),
        )
            .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_reconciliation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine().reconcile(user_id).await {
        Ok(report) => {
            let consistent = report.is_consistent();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "consistent": consistent, "report": report })),
            )
                .into_response()
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn account_events(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id = match errors::parse_user_id(&user_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    services::account_sse_stream(services, user_id).into_response()
}
