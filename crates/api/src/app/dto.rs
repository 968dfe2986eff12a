use serde::Deserialize;
use serde_json::{Value, json};

use pointsledger_infra::{PostingOutcome, points_to_next_tier};
use pointsledger_points::{PointsAccount, PointsTransaction, Tier};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct AwardRequest {
    pub points: i64,
    pub transaction_type: String,
    pub description: String,
    #[serde(default)]
    pub reference_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionRequest {
    /// Required for per-unit actions (e.g. purchase amount).
    #[serde(default)]
    pub units: Option<i64>,
    #[serde(default)]
    pub reference_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub points: i64,
    pub description: String,
    #[serde(default)]
    pub reference_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn account_to_json(account: &PointsAccount) -> Value {
    json!({
        "user_id": account.user_id().to_string(),
        "points_balance": account.points_balance(),
        "lifetime_points": account.lifetime_points(),
        "tier": account.tier(),
        "points_to_next_tier": points_to_next_tier(account),
        "created_at": account.created_at(),
        "updated_at": account.updated_at(),
    })
}

pub fn transaction_to_json(tx: &PointsTransaction) -> Value {
    json!({
        "id": tx.id.to_string(),
        "user_id": tx.user_id.to_string(),
        "points_amount": tx.points_amount,
        "transaction_type": tx.transaction_type.as_str(),
        "description": tx.description,
        "reference_id": tx.reference_id.as_ref().map(|r| r.as_str()),
        "sequence_number": tx.sequence_number,
        "created_at": tx.created_at,
    })
}

pub fn outcome_to_json(outcome: &PostingOutcome) -> Value {
    json!({
        "account": account_to_json(outcome.account()),
        "transaction": transaction_to_json(outcome.transaction()),
        "tier_change": outcome.tier_change(),
        "replayed": outcome.is_replay(),
    })
}

pub fn tier_to_json(tier: Tier) -> Value {
    json!({
        "tier": tier,
        "threshold": tier.threshold(),
        "next_tier": tier.next(),
        "benefits": tier.benefits(),
    })
}
