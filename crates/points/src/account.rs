use chrono::{DateTime, Utc};
use serde::Serialize;

use pointsledger_core::{AggregateRoot, DomainError, DomainResult, UserId};

use crate::tier::{Tier, points_to_next_tier};

/// Aggregate root: one loyalty account per member.
///
/// Fields are private so every instance upholds the ledger invariants:
/// - `points_balance >= 0`
/// - `lifetime_points >= 0` and never decreases
/// - `tier` always equals `Tier::for_lifetime_points(lifetime_points)`
///
/// Mutation is expressed as a pure transition (`apply_delta`) that returns the
/// next state; stores persist that state under an optimistic version check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointsAccount {
    user_id: UserId,
    points_balance: i64,
    lifetime_points: i64,
    tier: Tier,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A tier transition caused by a single delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierChange {
    pub from: Tier,
    pub to: Tier,
}

impl PointsAccount {
    /// A freshly opened account: zero balance, zero lifetime, `Bronze`, version 0.
    pub fn open(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            points_balance: 0,
            lifetime_points: 0,
            tier: Tier::Bronze,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild an account from persisted columns.
    ///
    /// The tier is recomputed from `lifetime_points`; a stored tier column is
    /// never trusted.
    pub fn restore(
        user_id: UserId,
        points_balance: i64,
        lifetime_points: i64,
        version: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if points_balance < 0 {
            return Err(DomainError::invariant(format!(
                "account {user_id} has negative balance {points_balance}"
            )));
        }
        if lifetime_points < 0 {
            return Err(DomainError::invariant(format!(
                "account {user_id} has negative lifetime points {lifetime_points}"
            )));
        }

        Ok(Self {
            user_id,
            points_balance,
            lifetime_points,
            tier: Tier::for_lifetime_points(lifetime_points),
            version,
            created_at,
            updated_at,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn points_balance(&self) -> i64 {
        self.points_balance
    }

    pub fn lifetime_points(&self) -> i64 {
        self.lifetime_points
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn points_to_next_tier(&self) -> i64 {
        points_to_next_tier(self.lifetime_points)
    }

    /// Compute the state after adjusting balance and lifetime points together.
    ///
    /// Returns the next account (version + 1, tier recomputed, `updated_at =
    /// now`) without touching `self`. Rejects any delta that would make the
    /// balance negative or the lifetime total decrease.
    pub fn apply_delta(
        &self,
        points_delta: i64,
        lifetime_delta: i64,
        now: DateTime<Utc>,
    ) -> DomainResult<PointsAccount> {
        if lifetime_delta < 0 {
            return Err(DomainError::invariant("lifetime points can never decrease"));
        }

        let points_balance = self
            .points_balance
            .checked_add(points_delta)
            .ok_or_else(|| DomainError::invariant("points balance overflow"))?;
        if points_balance < 0 {
            return Err(DomainError::invariant(format!(
                "balance would become negative ({} + {points_delta})",
                self.points_balance
            )));
        }

        let lifetime_points = self
            .lifetime_points
            .checked_add(lifetime_delta)
            .ok_or_else(|| DomainError::invariant("lifetime points overflow"))?;

        Ok(PointsAccount {
            user_id: self.user_id,
            points_balance,
            lifetime_points,
            tier: Tier::for_lifetime_points(lifetime_points),
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: now.max(self.updated_at),
        })
    }

    /// The tier transition between `self` and a later state, if any.
    pub fn tier_change_to(&self, next: &PointsAccount) -> Option<TierChange> {
        (self.tier != next.tier).then_some(TierChange {
            from: self.tier,
            to: next.tier,
        })
    }
}

impl AggregateRoot for PointsAccount {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open() -> PointsAccount {
        PointsAccount::open(UserId::new(), Utc::now())
    }

    #[test]
    fn opened_account_is_zeroed_bronze() {
        let account = open();
        assert_eq!(account.points_balance(), 0);
        assert_eq!(account.lifetime_points(), 0);
        assert_eq!(account.tier(), Tier::Bronze);
        assert_eq!(account.version(), 0);
        assert_eq!(account.points_to_next_tier(), 500);
    }

    #[test]
    fn award_delta_moves_balance_lifetime_and_tier() {
        let account = open();
        let next = account.apply_delta(600, 600, Utc::now()).unwrap();

        assert_eq!(next.points_balance(), 600);
        assert_eq!(next.lifetime_points(), 600);
        assert_eq!(next.tier(), Tier::Silver);
        assert_eq!(next.version(), 1);
        assert_eq!(
            account.tier_change_to(&next),
            Some(TierChange { from: Tier::Bronze, to: Tier::Silver })
        );
    }

    #[test]
    fn redemption_delta_leaves_lifetime_and_tier_alone() {
        let account = open().apply_delta(600, 600, Utc::now()).unwrap();
        let next = account.apply_delta(-550, 0, Utc::now()).unwrap();

        assert_eq!(next.points_balance(), 50);
        assert_eq!(next.lifetime_points(), 600);
        assert_eq!(next.tier(), Tier::Silver);
        assert_eq!(account.tier_change_to(&next), None);
    }

    #[test]
    fn overdraw_is_rejected() {
        let account = open().apply_delta(40, 40, Utc::now()).unwrap();
        let err = account.apply_delta(-50, 0, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn negative_lifetime_delta_is_rejected() {
        let err = open().apply_delta(0, -1, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn restore_recomputes_tier_and_rejects_negative_balance() {
        let now = Utc::now();
        let account = PointsAccount::restore(UserId::new(), 10, 2_000, 7, now, now).unwrap();
        assert_eq!(account.tier(), Tier::Gold);
        assert_eq!(account.version(), 7);

        assert!(PointsAccount::restore(UserId::new(), -1, 0, 0, now, now).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Award(i64),
        Redeem(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..2_000).prop_map(Op::Award),
            (1i64..2_000).prop_map(Op::Redeem),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: across any sequence of awards and (possibly rejected)
        /// redemptions, the balance equals the sum of applied deltas, never goes
        /// negative, and lifetime points and tier never regress.
        #[test]
        fn balance_is_conserved_and_progress_is_monotonic(ops in prop::collection::vec(op(), 1..40)) {
            let mut account = open();
            let mut applied: i64 = 0;

            for op in ops {
                let before = account.clone();
                let result = match &op {
                    Op::Award(n) => account.apply_delta(*n, *n, Utc::now()).map(|a| (a, *n)),
                    Op::Redeem(n) => account.apply_delta(-*n, 0, Utc::now()).map(|a| (a, -*n)),
                };

                match result {
                    Ok((next, delta)) => {
                        applied += delta;
                        account = next;
                    }
                    Err(_) => {
                        prop_assert!(matches!(&op, Op::Redeem(n) if *n > before.points_balance()));
                    }
                }

                prop_assert!(account.points_balance() >= 0);
                prop_assert!(account.lifetime_points() >= before.lifetime_points());
                prop_assert!(account.tier() >= before.tier());
                prop_assert_eq!(account.tier(), Tier::for_lifetime_points(account.lifetime_points()));
            }

            prop_assert_eq!(account.points_balance(), applied);
        }
    }
}
