//! Account store: accounts plus their append-only points transaction logs.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryAccountStore;
pub use postgres::PostgresAccountStore;
pub use r#trait::{AccountStore, CommittedEntry, LedgerEntry, StoreError};
