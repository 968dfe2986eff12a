//! Ledger completeness checks: does the transaction log explain the account?

use std::collections::HashSet;

use serde::Serialize;

use pointsledger_core::UserId;

use crate::account::PointsAccount;
use crate::transaction::PointsTransaction;

/// Outcome of reconciling one account against its full transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub user_id: UserId,
    pub transaction_count: usize,
    pub points_balance: i64,
    pub ledger_sum: i64,
    pub lifetime_points: i64,
    pub awarded_sum: i64,
    pub violations: Vec<Violation>,
}

impl ReconciliationReport {
    /// `true` when every check passed.
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

/// A specific inconsistency found while reconciling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    BalanceMismatch,
    LifetimeMismatch,
    SequenceOutOfOrder,
    DuplicateReference,
    ForeignTransaction,
}

/// Reconcile `account` against its complete log (any order).
///
/// Checks that the balance equals the sum of all amounts, that lifetime points
/// equal the sum of awards, that sequence numbers strictly increase, that each
/// reference id appears at most once and that every row belongs to the account.
pub fn reconcile(account: &PointsAccount, ledger: &[PointsTransaction]) -> ReconciliationReport {
    let mut violations = Vec::new();

    let mut ordered: Vec<&PointsTransaction> = ledger.iter().collect();
    ordered.sort_by_key(|tx| (tx.sequence_number, tx.created_at));

    let mut ledger_sum: i64 = 0;
    let mut awarded_sum: i64 = 0;
    let mut last_sequence: Option<u64> = None;
    let mut references = HashSet::new();

    for tx in ordered {
        if tx.user_id != account.user_id() {
            violations.push(Violation {
                kind: ViolationKind::ForeignTransaction,
                description: format!("transaction {} belongs to user {}", tx.id, tx.user_id),
            });
            continue;
        }

        ledger_sum = ledger_sum.saturating_add(tx.points_amount);
        if tx.is_award() {
            awarded_sum = awarded_sum.saturating_add(tx.points_amount);
        }

        if let Some(last) = last_sequence {
            if tx.sequence_number <= last {
                violations.push(Violation {
                    kind: ViolationKind::SequenceOutOfOrder,
                    description: format!(
                        "transaction {} has sequence {} after {last}",
                        tx.id, tx.sequence_number
                    ),
                });
            }
        }
        last_sequence = Some(tx.sequence_number);

        if let Some(reference) = &tx.reference_id {
            if !references.insert(reference.clone()) {
                violations.push(Violation {
                    kind: ViolationKind::DuplicateReference,
                    description: format!("reference '{reference}' recorded more than once"),
                });
            }
        }
    }

    if ledger_sum != account.points_balance() {
        violations.push(Violation {
            kind: ViolationKind::BalanceMismatch,
            description: format!(
                "balance {} but transactions sum to {ledger_sum}",
                account.points_balance()
            ),
        });
    }

    if awarded_sum != account.lifetime_points() {
        violations.push(Violation {
            kind: ViolationKind::LifetimeMismatch,
            description: format!(
                "lifetime points {} but awards sum to {awarded_sum}",
                account.lifetime_points()
            ),
        });
    }

    ReconciliationReport {
        user_id: account.user_id(),
        transaction_count: ledger.len(),
        points_balance: account.points_balance(),
        ledger_sum,
        lifetime_points: account.lifetime_points(),
        awarded_sum,
        violations,
    }
}
