use axum::{
    Json, Router,
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use pointsledger_infra::tier_benefits;
use pointsledger_points::Tier;

use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_tiers))
        .route("/:tier/benefits", get(get_tier_benefits))
}

pub async fn list_tiers() -> axum::response::Response {
    let items = Tier::ALL.into_iter().map(dto::tier_to_json).collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_tier_benefits(Path(tier): Path<String>) -> axum::response::Response {
    let tier = match errors::parse_tier(&tier) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    (
        StatusCode::OK,
        Json(serde_json::json!({ "tier": tier, "benefits": tier_benefits(tier) })),
    )
        .into_response()
}
