use std::sync::Arc;

use thiserror::Error;

use pointsledger_core::{DomainError, ExpectedVersion, UserId};
use pointsledger_points::{NewTransaction, PointsAccount, PointsTransaction, ReferenceId};

/// One logical ledger write: a balance/lifetime adjustment plus the transaction
/// that explains it.
///
/// The balance delta is always the transaction's own `points_amount`, so the
/// two halves cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    transaction: NewTransaction,
    lifetime_delta: i64,
    expected_version: ExpectedVersion,
}

impl LedgerEntry {
    pub fn new(
        transaction: NewTransaction,
        lifetime_delta: i64,
        expected_version: ExpectedVersion,
    ) -> Self {
        Self {
            transaction,
            lifetime_delta,
            expected_version,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.transaction.user_id
    }

    pub fn points_delta(&self) -> i64 {
        self.transaction.points_amount
    }

    pub fn lifetime_delta(&self) -> i64 {
        self.lifetime_delta
    }

    pub fn expected_version(&self) -> ExpectedVersion {
        self.expected_version
    }

    pub fn transaction(&self) -> &NewTransaction {
        &self.transaction
    }

    pub fn into_transaction(self) -> NewTransaction {
        self.transaction
    }
}

/// Result of a committed [`LedgerEntry`]: the new account state and the row
/// that was appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEntry {
    pub account: PointsAccount,
    pub transaction: PointsTransaction,
}

/// Account store operation error.
///
/// These are **store-level** outcomes. The ledger engine retries
/// `VersionConflict`, turns `DuplicateReference` into an idempotent replay and
/// reports everything else to its caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("optimistic concurrency check failed (expected {expected:?}, found {actual})")]
    VersionConflict {
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("reference '{reference_id}' already recorded for this account")]
    DuplicateReference { reference_id: ReferenceId },

    #[error("no points account for user {0}")]
    AccountNotFound(UserId),

    #[error("ledger invariant violated: {0}")]
    Invariant(String),

    #[error("store backend failure: {0}")]
    Backend(String),
}

impl From<DomainError> for StoreError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvariantViolation(msg) => StoreError::Invariant(msg),
            other => StoreError::Invariant(other.to_string()),
        }
    }
}

/// Durable storage for points accounts and their append-only transaction logs.
///
/// ## Atomicity
///
/// `commit_entry` is the unit of atomicity: the account adjustment and the
/// transaction append either both become visible or neither does. The engine
/// only ever writes through `commit_entry`. `apply_delta` and
/// `append_transaction` expose the two halves individually for maintenance
/// tooling and tests; using one without the other breaks ledger completeness.
///
/// ## Concurrency
///
/// No caller-side locking. Writers read an account, remember its version and
/// pass it back as `ExpectedVersion::Exact`; a concurrent writer that got
/// there first turns the later write into `StoreError::VersionConflict`.
///
/// ## Ordering
///
/// `list_transactions` returns most recent first, by `created_at` then
/// `sequence_number`. `load_ledger` returns the full log in write order.
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    /// Return the account, creating a zeroed one if none exists.
    ///
    /// Concurrent calls for a new user create exactly one account.
    async fn get_or_create_account(&self, user_id: UserId) -> Result<PointsAccount, StoreError>;

    /// Adjust balance and lifetime points together under a version check.
    async fn apply_delta(
        &self,
        user_id: UserId,
        points_delta: i64,
        lifetime_delta: i64,
        expected_version: ExpectedVersion,
    ) -> Result<PointsAccount, StoreError>;

    /// Append a transaction row; rejects a reused `(user_id, reference_id)`.
    ///
    /// The row's `sequence_number` is the account's current version, which
    /// this call does not bump. Pair it with a preceding `apply_delta`: a
    /// second append at the same version fails with `StoreError::Invariant`.
    async fn append_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<PointsTransaction, StoreError>;

    /// Apply the entry's delta and append its transaction as one atomic unit.
    async fn commit_entry(&self, entry: LedgerEntry) -> Result<CommittedEntry, StoreError>;

    /// Look up the transaction recorded for an idempotency key.
    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference_id: &ReferenceId,
    ) -> Result<Option<PointsTransaction>, StoreError>;

    /// Most recent transactions first, at most `limit` rows.
    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PointsTransaction>, StoreError>;

    /// Every transaction for the user, oldest first.
    async fn load_ledger(&self, user_id: UserId) -> Result<Vec<PointsTransaction>, StoreError>;
}

#[async_trait::async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn get_or_create_account(&self, user_id: UserId) -> Result<PointsAccount, StoreError> {
        (**self).get_or_create_account(user_id).await
    }

    async fn apply_delta(
        &self,
        user_id: UserId,
        points_delta: i64,
        lifetime_delta: i64,
        expected_version: ExpectedVersion,
    ) -> Result<PointsAccount, StoreError> {
        (**self)
            .apply_delta(user_id, points_delta, lifetime_delta, expected_version)
            .await
    }

    async fn append_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<PointsTransaction, StoreError> {
        (**self).append_transaction(transaction).await
    }

    async fn commit_entry(&self, entry: LedgerEntry) -> Result<CommittedEntry, StoreError> {
        (**self).commit_entry(entry).await
    }

    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference_id: &ReferenceId,
    ) -> Result<Option<PointsTransaction>, StoreError> {
        (**self).find_by_reference(user_id, reference_id).await
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PointsTransaction>, StoreError> {
        (**self).list_transactions(user_id, limit).await
    }

    async fn load_ledger(&self, user_id: UserId) -> Result<Vec<PointsTransaction>, StoreError> {
        (**self).load_ledger(user_id).await
    }
}
