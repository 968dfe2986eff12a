//! Loyalty points domain (accounts, tiers, transactions, catalog).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod account;
pub mod catalog;
pub mod events;
pub mod reconciliation;
pub mod tier;
pub mod transaction;

pub use account::{PointsAccount, TierChange};
pub use catalog::{ActionCatalog, AwardSpec, CatalogEntry};
pub use events::{LoyaltyEvent, PointsAwarded, PointsRedeemed, TierAdvanced};
pub use reconciliation::{ReconciliationReport, Violation, ViolationKind, reconcile};
pub use tier::{Tier, points_to_next_tier, tier_progress_percent};
pub use transaction::{NewTransaction, PointsTransaction, ReferenceId, TransactionType};
