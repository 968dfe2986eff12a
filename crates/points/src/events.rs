use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pointsledger_core::{TransactionId, UserId};
use pointsledger_events::Event;

use crate::tier::Tier;
use crate::transaction::TransactionType;

/// Event: PointsAwarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsAwarded {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub amount: i64,
    pub transaction_type: TransactionType,
    pub balance_after: i64,
    pub lifetime_after: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PointsRedeemed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsRedeemed {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    /// Positive number of points taken from the balance.
    pub amount: i64,
    pub balance_after: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TierAdvanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAdvanced {
    pub user_id: UserId,
    pub from: Tier,
    pub to: Tier,
    pub lifetime_points: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoyaltyEvent {
    PointsAwarded(PointsAwarded),
    PointsRedeemed(PointsRedeemed),
    TierAdvanced(TierAdvanced),
}

impl LoyaltyEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            LoyaltyEvent::PointsAwarded(e) => e.user_id,
            LoyaltyEvent::PointsRedeemed(e) => e.user_id,
            LoyaltyEvent::TierAdvanced(e) => e.user_id,
        }
    }
}

impl Event for LoyaltyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LoyaltyEvent::PointsAwarded(_) => "loyalty.points.awarded",
            LoyaltyEvent::PointsRedeemed(_) => "loyalty.points.redeemed",
            LoyaltyEvent::TierAdvanced(_) => "loyalty.tier.advanced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LoyaltyEvent::PointsAwarded(e) => e.occurred_at,
            LoyaltyEvent::PointsRedeemed(e) => e.occurred_at,
            LoyaltyEvent::TierAdvanced(e) => e.occurred_at,
        }
    }
}
