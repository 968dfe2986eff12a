use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;

use pointsledger_core::{AggregateRoot, ExpectedVersion, TransactionId, UserId};
use pointsledger_points::{NewTransaction, PointsAccount, PointsTransaction, ReferenceId};

use super::r#trait::{AccountStore, CommittedEntry, LedgerEntry, StoreError};

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<UserId, PointsAccount>,
    /// Per-user log in append order.
    transactions: HashMap<UserId, Vec<PointsTransaction>>,
    references: HashSet<(UserId, ReferenceId)>,
}

impl LedgerState {
    fn account(&self, user_id: UserId) -> Result<&PointsAccount, StoreError> {
        self.accounts
            .get(&user_id)
            .ok_or(StoreError::AccountNotFound(user_id))
    }

    /// Validate a delta against the current account without writing.
    fn prepare_delta(
        &self,
        user_id: UserId,
        points_delta: i64,
        lifetime_delta: i64,
        expected_version: ExpectedVersion,
    ) -> Result<PointsAccount, StoreError> {
        let current = self.account(user_id)?;
        if !expected_version.matches(current.version()) {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: current.version(),
            });
        }
        Ok(current.apply_delta(points_delta, lifetime_delta, Utc::now())?)
    }

    /// Validate an append without writing; returns the row to insert.
    fn prepare_append(
        &self,
        transaction: NewTransaction,
        sequence_number: u64,
    ) -> Result<PointsTransaction, StoreError> {
        if let Some(reference) = &transaction.reference_id {
            if self
                .references
                .contains(&(transaction.user_id, reference.clone()))
            {
                return Err(StoreError::DuplicateReference {
                    reference_id: reference.clone(),
                });
            }
        }
        let last_sequence = self
            .transactions
            .get(&transaction.user_id)
            .and_then(|log| log.last())
            .map(|tx| tx.sequence_number);
        if last_sequence.is_some_and(|last| last >= sequence_number) {
            return Err(StoreError::Invariant(format!(
                "sequence {sequence_number} already recorded; apply a delta before appending"
            )));
        }
        Ok(transaction.into_recorded(TransactionId::new(), sequence_number, Utc::now()))
    }

    fn insert_transaction(&mut self, recorded: PointsTransaction) {
        if let Some(reference) = &recorded.reference_id {
            self.references.insert((recorded.user_id, reference.clone()));
        }
        self.transactions
            .entry(recorded.user_id)
            .or_default()
            .push(recorded);
    }
}

/// In-memory account store.
///
/// Intended for tests/dev. A single `RwLock` guards accounts, logs and the
/// reference index together, so every check in `commit_entry` happens before
/// any write and nothing partial is ever visible.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    state: RwLock<LedgerState>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, LedgerState>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, LedgerState>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get_or_create_account(&self, user_id: UserId) -> Result<PointsAccount, StoreError> {
        if let Some(account) = self.read()?.accounts.get(&user_id) {
            return Ok(account.clone());
        }

        // Re-check under the write lock: a concurrent caller may have created it.
        let mut state = self.write()?;
        let account = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| PointsAccount::open(user_id, Utc::now()));
        Ok(account.clone())
    }

    async fn apply_delta(
        &self,
        user_id: UserId,
        points_delta: i64,
        lifetime_delta: i64,
        expected_version: ExpectedVersion,
    ) -> Result<PointsAccount, StoreError> {
        let mut state = self.write()?;
        let next = state.prepare_delta(user_id, points_delta, lifetime_delta, expected_version)?;
        state.accounts.insert(user_id, next.clone());
        Ok(next)
    }

    async fn append_transaction(
        &self,
        transaction: NewTransaction,
    ) -> Result<PointsTransaction, StoreError> {
        let mut state = self.write()?;
        let sequence_number = state.account(transaction.user_id)?.version();
        let recorded = state.prepare_append(transaction, sequence_number)?;
        state.insert_transaction(recorded.clone());
        Ok(recorded)
    }

    async fn commit_entry(&self, entry: LedgerEntry) -> Result<CommittedEntry, StoreError> {
        let mut state = self.write()?;

        let account = state.prepare_delta(
            entry.user_id(),
            entry.points_delta(),
            entry.lifetime_delta(),
            entry.expected_version(),
        )?;
        let transaction = state.prepare_append(entry.into_transaction(), account.version())?;

        state.accounts.insert(account.user_id(), account.clone());
        state.insert_transaction(transaction.clone());

        Ok(CommittedEntry {
            account,
            transaction,
        })
    }

    async fn find_by_reference(
        &self,
        user_id: UserId,
        reference_id: &ReferenceId,
    ) -> Result<Option<PointsTransaction>, StoreError> {
        let state = self.read()?;
        Ok(state.transactions.get(&user_id).and_then(|log| {
            log.iter()
                .find(|tx| tx.reference_id.as_ref() == Some(reference_id))
                .cloned()
        }))
    }

    async fn list_transactions(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<PointsTransaction>, StoreError> {
        let state = self.read()?;
        let mut rows = state.transactions.get(&user_id).cloned().unwrap_or_default();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.sequence_number.cmp(&a.sequence_number))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn load_ledger(&self, user_id: UserId) -> Result<Vec<PointsTransaction>, StoreError> {
        let state = self.read()?;
        Ok(state.transactions.get(&user_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use pointsledger_points::{Tier, TransactionType};

    fn award(user_id: UserId, points: i64, reference: Option<&str>) -> NewTransaction {
        NewTransaction::award(
            user_id,
            points,
            TransactionType::new(TransactionType::SIGNUP).unwrap(),
            "welcome",
            reference.map(|r| ReferenceId::new(r).unwrap()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn get_or_create_opens_a_zeroed_account_once() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();

        let first = store.get_or_create_account(user).await.unwrap();
        let second = store.get_or_create_account(user).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.points_balance(), 0);
        assert_eq!(first.tier(), Tier::Bronze);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_yields_a_single_account() {
        let store = Arc::new(InMemoryAccountStore::new());
        let user = UserId::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_create_account(user).await.unwrap() })
            })
            .collect();

        let mut created = Vec::new();
        for h in handles {
            created.push(h.await.unwrap());
        }
        assert!(created.windows(2).all(|w| w[0].created_at() == w[1].created_at()));
    }

    #[tokio::test]
    async fn commit_entry_updates_account_and_log_together() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        let account = store.get_or_create_account(user).await.unwrap();

        let committed = store
            .commit_entry(LedgerEntry::new(
                award(user, 100, None),
                100,
                ExpectedVersion::Exact(account.version()),
            ))
            .await
            .unwrap();

        assert_eq!(committed.account.points_balance(), 100);
        assert_eq!(committed.account.version(), 1);
        assert_eq!(committed.transaction.sequence_number, 1);
        assert_eq!(store.load_ledger(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict_and_writes_nothing() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        store.get_or_create_account(user).await.unwrap();
        store.apply_delta(user, 10, 10, ExpectedVersion::Exact(0)).await.unwrap();

        let err = store
            .commit_entry(LedgerEntry::new(award(user, 5, None), 5, ExpectedVersion::Exact(0)))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            StoreError::VersionConflict { expected: ExpectedVersion::Exact(0), actual: 1 }
        );
        assert!(store.load_ledger(user).await.unwrap().is_empty());
        assert_eq!(store.get_or_create_account(user).await.unwrap().points_balance(), 10);
    }

    #[tokio::test]
    async fn duplicate_reference_rolls_back_the_delta() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        store.get_or_create_account(user).await.unwrap();
        store
            .commit_entry(LedgerEntry::new(award(user, 100, Some("ref-1")), 100, ExpectedVersion::Exact(0)))
            .await
            .unwrap();

        let err = store
            .commit_entry(LedgerEntry::new(award(user, 100, Some("ref-1")), 100, ExpectedVersion::Exact(1)))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicateReference { .. }));
        let account = store.get_or_create_account(user).await.unwrap();
        assert_eq!(account.points_balance(), 100);
        assert_eq!(account.version(), 1);
    }

    #[tokio::test]
    async fn same_reference_is_allowed_for_different_users() {
        let store = InMemoryAccountStore::new();
        let (alice, bob) = (UserId::new(), UserId::new());
        for user in [alice, bob] {
            store.get_or_create_account(user).await.unwrap();
            store
                .commit_entry(LedgerEntry::new(award(user, 10, Some("campaign-7")), 10, ExpectedVersion::Exact(0)))
                .await
                .unwrap();
        }

        let reference = ReferenceId::new("campaign-7").unwrap();
        assert!(store.find_by_reference(alice, &reference).await.unwrap().is_some());
        assert!(store.find_by_reference(bob, &reference).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn overdraw_through_apply_delta_is_an_invariant_error() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        store.get_or_create_account(user).await.unwrap();

        let err = store
            .apply_delta(user, -1, 0, ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)));
    }

    #[tokio::test]
    async fn writes_to_unknown_accounts_are_rejected() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();

        let err = store.append_transaction(award(user, 1, None)).await.unwrap_err();
        assert_eq!(err, StoreError::AccountNotFound(user));
    }

    #[tokio::test]
    async fn standalone_append_needs_a_preceding_delta() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        store.get_or_create_account(user).await.unwrap();

        let account = store.apply_delta(user, 40, 40, ExpectedVersion::Exact(0)).await.unwrap();
        let recorded = store.append_transaction(award(user, 40, None)).await.unwrap();
        assert_eq!(recorded.sequence_number, account.version());

        let err = store.append_transaction(award(user, 40, None)).await.unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)));

        let ledger = store.load_ledger(user).await.unwrap();
        let account = store.get_or_create_account(user).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(pointsledger_points::reconcile(&account, &ledger).is_consistent());
    }

    #[tokio::test]
    async fn history_is_most_recent_first_and_limited() {
        let store = InMemoryAccountStore::new();
        let user = UserId::new();
        store.get_or_create_account(user).await.unwrap();
        for (version, points) in [10, 20, 30].into_iter().enumerate() {
            store
                .commit_entry(LedgerEntry::new(
                    award(user, points, None),
                    points,
                    ExpectedVersion::Exact(version as u64),
                ))
                .await
                .unwrap();
        }

        let history = store.list_transactions(user, 2).await.unwrap();
        let amounts: Vec<i64> = history.iter().map(|tx| tx.points_amount).collect();
        assert_eq!(amounts, vec![30, 20]);
    }
}
