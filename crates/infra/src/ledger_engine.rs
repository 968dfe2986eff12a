//! Ledger engine: award/redeem orchestration over an [`AccountStore`].
//!
//! ## Posting Flow
//!
//! ```text
//! award / redeem
//!   ↓
//! 1. Validate amount (before any IO)
//!   ↓
//! 2. Idempotency check (reference already recorded → Replayed)
//!   ↓
//! 3. Read account, remember its version (redeem: balance check,
//!    award: overflow check)
//!   ↓
//! 4. commit_entry(delta + transaction, ExpectedVersion::Exact)
//!   ↓ VersionConflict → back to 2, bounded by LedgerConfig::max_attempts
//! 5. Publish events to the bus (after commit, failures only logged)
//! ```
//!
//! The engine holds no locks and no caches. Every coordination decision is
//! made by the store's version check, so any number of engines (threads,
//! processes) may share one store.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use pointsledger_core::{AggregateRoot, DomainError, ExpectedVersion, UserId};
use pointsledger_events::{EventBus, EventEnvelope};
use pointsledger_points::{
    AwardSpec, LoyaltyEvent, NewTransaction, PointsAccount, PointsAwarded, PointsRedeemed,
    PointsTransaction, ReconciliationReport, ReferenceId, Tier, TierAdvanced, TierChange,
    TransactionType, reconcile, tier_progress_percent,
};

use crate::account_store::{AccountStore, CommittedEntry, LedgerEntry, StoreError};
use crate::config::LedgerConfig;

/// Stream type stamped on every published envelope.
pub const STREAM_TYPE: &str = "loyalty.account";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Award/redeem amount was zero or negative, or would overflow the
    /// account's balance or lifetime total.
    #[error("points amount must be positive and representable (got {0})")]
    InvalidAmount(i64),

    #[error("insufficient points balance: {available} available, {requested} requested")]
    InsufficientBalance { available: i64, requested: i64 },

    /// Store unavailable, or concurrent writers kept winning until the retry
    /// budget ran out. Nothing was written; the call may be retried.
    #[error("points store temporarily unavailable: {0}")]
    TransientStoreFailure(String),

    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransientStoreFailure(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::VersionConflict { .. } | StoreError::Backend(_) => {
                LedgerError::TransientStoreFailure(value.to_string())
            }
            StoreError::Invariant(msg) => LedgerError::InvariantViolation(msg),
            StoreError::DuplicateReference { .. } | StoreError::AccountNotFound(_) => {
                LedgerError::InvariantViolation(value.to_string())
            }
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        LedgerError::InvariantViolation(value.to_string())
    }
}

/// Result of a successful award or redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingOutcome {
    /// The delta was committed by this call.
    Applied {
        account: PointsAccount,
        transaction: PointsTransaction,
        tier_change: Option<TierChange>,
    },
    /// The reference was already recorded; nothing changed. `transaction` is
    /// the row written by the original call.
    Replayed {
        account: PointsAccount,
        transaction: PointsTransaction,
    },
}

impl PostingOutcome {
    pub fn account(&self) -> &PointsAccount {
        match self {
            PostingOutcome::Applied { account, .. } | PostingOutcome::Replayed { account, .. } => {
                account
            }
        }
    }

    pub fn transaction(&self) -> &PointsTransaction {
        match self {
            PostingOutcome::Applied { transaction, .. }
            | PostingOutcome::Replayed { transaction, .. } => transaction,
        }
    }

    pub fn tier_change(&self) -> Option<TierChange> {
        match self {
            PostingOutcome::Applied { tier_change, .. } => *tier_change,
            PostingOutcome::Replayed { .. } => None,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, PostingOutcome::Replayed { .. })
    }
}

/// Membership-card view of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStanding {
    pub account: PointsAccount,
    pub tier: Tier,
    pub next_tier: Option<Tier>,
    pub points_to_next_tier: u64,
    pub progress_percent: u8,
    pub benefits: Vec<&'static str>,
}

impl TierStanding {
    pub fn for_account(account: PointsAccount) -> Self {
        let tier = account.tier();
        Self {
            tier,
            next_tier: tier.next(),
            points_to_next_tier: points_to_next_tier(&account),
            progress_percent: tier_progress_percent(account.lifetime_points()),
            benefits: tier_benefits(tier),
            account,
        }
    }
}

/// Points still needed to reach the next tier; `0` at `Platinum`.
pub fn points_to_next_tier(account: &PointsAccount) -> u64 {
    u64::try_from(account.points_to_next_tier()).unwrap_or(0)
}

/// Benefits unlocked at `tier`, including those of every lower tier.
pub fn tier_benefits(tier: Tier) -> Vec<&'static str> {
    tier.benefits()
}

#[derive(Debug)]
pub struct LedgerEngine<S, B> {
    store: S,
    bus: B,
    config: LedgerConfig,
}

impl<S, B> LedgerEngine<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self::with_config(store, bus, LedgerConfig::default())
    }

    pub fn with_config(store: S, bus: B, config: LedgerConfig) -> Self {
        Self { store, bus, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> LedgerEngine<S, B>
where
    S: AccountStore,
    B: EventBus<EventEnvelope<LoyaltyEvent>>,
{
    /// Current account state, opening a zeroed account on first access.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn get_account(&self, user_id: UserId) -> Result<PointsAccount, LedgerError> {
        Ok(self.store.get_or_create_account(user_id).await?)
    }

    /// Credit `points_amount` to balance and lifetime points.
    ///
    /// With a `reference_id` the call is idempotent: repeating it returns
    /// [`PostingOutcome::Replayed`] and changes nothing.
    #[instrument(
        skip(self, description),
        fields(user_id = %user_id, points = points_amount, transaction_type = %transaction_type),
        err
    )]
    pub async fn award(
        &self,
        user_id: UserId,
        points_amount: i64,
        transaction_type: TransactionType,
        description: impl Into<String> + Send,
        reference_id: Option<ReferenceId>,
    ) -> Result<PostingOutcome, LedgerError> {
        if points_amount <= 0 {
            return Err(LedgerError::InvalidAmount(points_amount));
        }
        let transaction = NewTransaction::award(
            user_id,
            points_amount,
            transaction_type,
            description,
            reference_id,
        )?;
        self.post(transaction).await
    }

    /// Award a catalog-resolved [`AwardSpec`].
    pub async fn award_spec(
        &self,
        user_id: UserId,
        spec: AwardSpec,
        reference_id: Option<ReferenceId>,
    ) -> Result<PostingOutcome, LedgerError> {
        self.award(
            user_id,
            spec.points,
            spec.transaction_type,
            spec.description,
            reference_id,
        )
        .await
    }

    /// Debit `points_amount` from the balance. Lifetime points are untouched.
    ///
    /// The balance is re-checked on every attempt, so a concurrent redemption
    /// that drained the account turns a retry into `InsufficientBalance`.
    #[instrument(skip(self, description), fields(user_id = %user_id, points = points_amount), err)]
    pub async fn redeem(
        &self,
        user_id: UserId,
        points_amount: i64,
        description: impl Into<String> + Send,
        reference_id: Option<ReferenceId>,
    ) -> Result<PostingOutcome, LedgerError> {
        if points_amount <= 0 {
            return Err(LedgerError::InvalidAmount(points_amount));
        }
        let transaction =
            NewTransaction::redemption(user_id, points_amount, description, reference_id)?;
        self.post(transaction).await
    }

    /// Most recent transactions first. `limit` defaults to
    /// `default_history_limit` and is clamped to `[1, max_history_limit]`.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn transaction_history(
        &self,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<PointsTransaction>, LedgerError> {
        let limit = self.config.history_limit(limit);
        Ok(self.store.list_transactions(user_id, limit).await?)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn tier_standing(&self, user_id: UserId) -> Result<TierStanding, LedgerError> {
        let account = self.store.get_or_create_account(user_id).await?;
        Ok(TierStanding::for_account(account))
    }

    /// Check the account snapshot against its full transaction log.
    ///
    /// The account is read before and after loading the log; if a write
    /// slipped in between, the read is repeated so the report never flags a
    /// mismatch that only exists because of the race.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn reconcile(&self, user_id: UserId) -> Result<ReconciliationReport, LedgerError> {
        for attempt in 1..=self.config.max_attempts {
            let account = self.store.get_or_create_account(user_id).await?;
            let ledger = self.store.load_ledger(user_id).await?;
            let after = self.store.get_or_create_account(user_id).await?;

            if after.version() == account.version() {
                let report = reconcile(&account, &ledger);
                if !report.is_consistent() {
                    warn!(
                        user_id = %user_id,
                        violations = report.violations.len(),
                        "ledger reconciliation found violations"
                    );
                }
                return Ok(report);
            }

            debug!(attempt, "account changed during reconciliation, reloading");
            self.backoff(attempt).await;
        }

        Err(LedgerError::TransientStoreFailure(format!(
            "account kept changing during reconciliation ({} attempts)",
            self.config.max_attempts
        )))
    }

    async fn post(&self, transaction: NewTransaction) -> Result<PostingOutcome, LedgerError> {
        let user_id = transaction.user_id;
        let lifetime_delta = transaction.points_amount.max(0);
        let requested = transaction.points_amount.saturating_neg();

        let mut attempt = 1;
        loop {
            // Checked on every attempt: the writer that caused a conflict may
            // have been this same request arriving twice.
            if let Some(reference_id) = &transaction.reference_id {
                if let Some(original) = self.store.find_by_reference(user_id, reference_id).await? {
                    return self.replayed(user_id, original).await;
                }
            }

            let account = self.store.get_or_create_account(user_id).await?;

            if transaction.points_amount < 0 && account.points_balance() < requested {
                return Err(LedgerError::InsufficientBalance {
                    available: account.points_balance(),
                    requested,
                });
            }
            if account.points_balance().checked_add(transaction.points_amount).is_none()
                || account.lifetime_points().checked_add(lifetime_delta).is_none()
            {
                return Err(LedgerError::InvalidAmount(transaction.points_amount));
            }

            let entry = LedgerEntry::new(
                transaction.clone(),
                lifetime_delta,
                ExpectedVersion::Exact(account.version()),
            );

            match self.store.commit_entry(entry).await {
                Ok(committed) => {
                    let tier_change = account.tier_change_to(&committed.account);
                    if let Some(change) = tier_change {
                        info!(
                            user_id = %user_id,
                            from = %change.from,
                            to = %change.to,
                            lifetime_points = committed.account.lifetime_points(),
                            "tier advanced"
                        );
                    }
                    self.publish(&committed, tier_change);

                    return Ok(PostingOutcome::Applied {
                        account: committed.account,
                        transaction: committed.transaction,
                        tier_change,
                    });
                }
                // Lost the race against a concurrent call carrying the same reference.
                Err(StoreError::DuplicateReference { reference_id }) => {
                    debug!(reference_id = %reference_id, "reference recorded concurrently");
                    let original = self
                        .store
                        .find_by_reference(user_id, &reference_id)
                        .await?
                        .ok_or_else(|| {
                            LedgerError::InvariantViolation(format!(
                                "reference '{reference_id}' reported duplicate but not found"
                            ))
                        })?;
                    return self.replayed(user_id, original).await;
                }
                Err(StoreError::VersionConflict { expected, actual })
                    if attempt < self.config.max_attempts =>
                {
                    debug!(attempt, ?expected, actual, "version conflict, retrying");
                    self.backoff(attempt).await;
                    attempt += 1;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(user_id = %user_id, attempts = attempt, "retry budget exhausted");
                    return Err(LedgerError::TransientStoreFailure(format!(
                        "concurrent updates to account {user_id} after {attempt} attempts"
                    )));
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn replayed(
        &self,
        user_id: UserId,
        original: PointsTransaction,
    ) -> Result<PostingOutcome, LedgerError> {
        debug!(transaction_id = %original.id, "reference already recorded, replaying");
        let account = self.store.get_or_create_account(user_id).await?;
        Ok(PostingOutcome::Replayed {
            account,
            transaction: original,
        })
    }

    async fn backoff(&self, attempt: u32) {
        let wait = self.config.retry_backoff.saturating_mul(attempt);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    fn publish(&self, committed: &CommittedEntry, tier_change: Option<TierChange>) {
        let account = &committed.account;
        let transaction = &committed.transaction;
        let occurred_at = transaction.created_at;

        let mut events = Vec::with_capacity(2);
        if transaction.is_award() {
            events.push(LoyaltyEvent::PointsAwarded(PointsAwarded {
                user_id: account.user_id(),
                transaction_id: transaction.id,
                amount: transaction.points_amount,
                transaction_type: transaction.transaction_type.clone(),
                balance_after: account.points_balance(),
                lifetime_after: account.lifetime_points(),
                occurred_at,
            }));
        } else {
            events.push(LoyaltyEvent::PointsRedeemed(PointsRedeemed {
                user_id: account.user_id(),
                transaction_id: transaction.id,
                amount: transaction.points_amount.saturating_neg(),
                balance_after: account.points_balance(),
                occurred_at,
            }));
        }
        if let Some(change) = tier_change {
            events.push(LoyaltyEvent::TierAdvanced(TierAdvanced {
                user_id: account.user_id(),
                from: change.from,
                to: change.to,
                lifetime_points: account.lifetime_points(),
                occurred_at: Utc::now().max(occurred_at),
            }));
        }

        for event in events {
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                account.user_id(),
                STREAM_TYPE,
                account.version(),
                event,
            );
            if let Err(err) = self.bus.publish(envelope) {
                warn!(user_id = %account.user_id(), error = ?err, "failed to publish loyalty event");
            }
        }
    }
}
