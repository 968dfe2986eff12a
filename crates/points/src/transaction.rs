//! Ledger transactions: the append-only record that explains every balance change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pointsledger_core::{DomainError, DomainResult, Entity, TransactionId, UserId};

const MAX_TRANSACTION_TYPE_LEN: usize = 64;
const MAX_REFERENCE_LEN: usize = 255;

/// Category tag of a transaction (`SIGNUP`, `REVIEW`, `REDEMPTION`, ...).
///
/// Free-form so new catalog actions need no code change, but normalized to
/// upper-case `A-Z`, `0-9` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionType(String);

impl TransactionType {
    pub const SIGNUP: &'static str = "SIGNUP";
    pub const SURVEY: &'static str = "SURVEY";
    pub const REVIEW: &'static str = "REVIEW";
    pub const COMMUNITY_POST: &'static str = "COMMUNITY_POST";
    pub const ROUTINE_CREATED: &'static str = "ROUTINE_CREATED";
    pub const ROUTINE_LOGGED: &'static str = "ROUTINE_LOGGED";
    pub const PURCHASE: &'static str = "PURCHASE";
    pub const REFERRAL: &'static str = "REFERRAL";
    pub const INGREDIENT_SEARCH: &'static str = "INGREDIENT_SEARCH";
    pub const PROFILE_COMPLETE: &'static str = "PROFILE_COMPLETE";
    pub const MONTHLY_ACTIVE: &'static str = "MONTHLY_ACTIVE";
    pub const REDEMPTION: &'static str = "REDEMPTION";

    pub fn new(value: impl AsRef<str>) -> DomainResult<Self> {
        let normalized = value.as_ref().trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(DomainError::validation("transaction type must not be empty"));
        }
        if normalized.len() > MAX_TRANSACTION_TYPE_LEN {
            return Err(DomainError::validation(format!(
                "transaction type exceeds {MAX_TRANSACTION_TYPE_LEN} characters"
            )));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(DomainError::validation(format!(
                "transaction type '{normalized}' may only contain A-Z, 0-9 and '_'"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn redemption() -> Self {
        Self::from_constant(Self::REDEMPTION)
    }

    /// For the associated constants above, which are already normalized.
    pub(crate) fn from_constant(value: &'static str) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TransactionType {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TransactionType> for String {
    fn from(value: TransactionType) -> Self {
        value.0
    }
}

/// External idempotency key (e.g. the id of the upstream event being rewarded).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReferenceId(String);

impl ReferenceId {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("reference id must not be blank"));
        }
        if value.len() > MAX_REFERENCE_LEN {
            return Err(DomainError::validation(format!(
                "reference id exceeds {MAX_REFERENCE_LEN} characters"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ReferenceId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ReferenceId> for String {
    fn from(value: ReferenceId) -> Self {
        value.0
    }
}

/// A transaction ready to be appended (no id, sequence or timestamp yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: UserId,
    /// Signed: positive for awards, negative for redemptions.
    pub points_amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub reference_id: Option<ReferenceId>,
}

impl NewTransaction {
    /// An award of `points` (> 0).
    pub fn award(
        user_id: UserId,
        points: i64,
        transaction_type: TransactionType,
        description: impl Into<String>,
        reference_id: Option<ReferenceId>,
    ) -> DomainResult<Self> {
        if points <= 0 {
            return Err(DomainError::validation(format!(
                "award amount must be positive (got {points})"
            )));
        }
        Ok(Self {
            user_id,
            points_amount: points,
            transaction_type,
            description: description.into(),
            reference_id,
        })
    }

    /// A redemption of `points` (> 0), recorded with a negated amount.
    pub fn redemption(
        user_id: UserId,
        points: i64,
        description: impl Into<String>,
        reference_id: Option<ReferenceId>,
    ) -> DomainResult<Self> {
        if points <= 0 {
            return Err(DomainError::validation(format!(
                "redemption amount must be positive (got {points})"
            )));
        }
        Ok(Self {
            user_id,
            points_amount: -points,
            transaction_type: TransactionType::redemption(),
            description: description.into(),
            reference_id,
        })
    }

    /// Stamp the transaction with the identity and position assigned at write time.
    pub fn into_recorded(
        self,
        id: TransactionId,
        sequence_number: u64,
        created_at: DateTime<Utc>,
    ) -> PointsTransaction {
        PointsTransaction {
            id,
            user_id: self.user_id,
            points_amount: self.points_amount,
            transaction_type: self.transaction_type,
            description: self.description,
            reference_id: self.reference_id,
            sequence_number,
            created_at,
        }
    }
}

/// A recorded (immutable) ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub points_amount: i64,
    pub transaction_type: TransactionType,
    pub description: String,
    pub reference_id: Option<ReferenceId>,
    /// Account version produced by the commit that wrote this row.
    pub sequence_number: u64,
    pub created_at: DateTime<Utc>,
}

impl PointsTransaction {
    pub fn is_award(&self) -> bool {
        self.points_amount > 0
    }

    pub fn is_redemption(&self) -> bool {
        self.points_amount < 0
    }
}

impl Entity for PointsTransaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_type_is_normalized() {
        let t = TransactionType::new(" review ").unwrap();
        assert_eq!(t.as_str(), TransactionType::REVIEW);
        assert!(TransactionType::new("").is_err());
        assert!(TransactionType::new("bad-type").is_err());
    }

    #[test]
    fn blank_reference_is_rejected() {
        assert!(ReferenceId::new("   ").is_err());
        assert_eq!(ReferenceId::new("signup-42").unwrap().as_str(), "signup-42");
    }

    #[test]
    fn redemption_negates_the_amount() {
        let tx = NewTransaction::redemption(UserId::new(), 60, "reward", None).unwrap();
        assert_eq!(tx.points_amount, -60);
        assert_eq!(tx.transaction_type.as_str(), TransactionType::REDEMPTION);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let user = UserId::new();
        let signup = TransactionType::new(TransactionType::SIGNUP).unwrap();
        assert!(NewTransaction::award(user, 0, signup.clone(), "x", None).is_err());
        assert!(NewTransaction::award(user, -5, signup, "x", None).is_err());
        assert!(NewTransaction::redemption(user, 0, "x", None).is_err());
    }
}
