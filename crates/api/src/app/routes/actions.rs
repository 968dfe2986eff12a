use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::services::AppServices;

pub async fn list_actions(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let items = services
        .catalog()
        .actions()
        .map(|(action, entry)| {
            serde_json::json!({
                "action": action,
                "transaction_type": entry.transaction_type.as_str(),
                "points": entry.points,
                "per_unit": entry.per_unit,
                "description": entry.description,
            })
        })
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}
