//! Infrastructure layer: account stores, engine configuration, ledger engine.

pub mod account_store;
pub mod config;
pub mod ledger_engine;


pub use account_store::{
    AccountStore, CommittedEntry, InMemoryAccountStore, LedgerEntry, PostgresAccountStore,
    StoreError,
};
pub use config::LedgerConfig;
pub use ledger_engine::{
    LedgerEngine, LedgerError, PostingOutcome, STREAM_TYPE, TierStanding, points_to_next_tier,
    tier_benefits,
};
