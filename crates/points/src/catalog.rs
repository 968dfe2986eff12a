//! Action catalog: how many points each member action is worth.
//!
//! The catalog is caller-side configuration. The ledger engine never reads it;
//! handlers resolve an action into an [`AwardSpec`] and pass that to `award`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use pointsledger_core::{DomainError, DomainResult, ValueObject};

use crate::transaction::TransactionType;

/// One catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub transaction_type: TransactionType,
    /// Points per occurrence, or per unit when `per_unit` is set.
    pub points: i64,
    pub description: String,
    /// Scale `points` by a caller-supplied unit count (e.g. currency units spent).
    #[serde(default)]
    pub per_unit: bool,
}

/// A resolved award, ready for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwardSpec {
    pub transaction_type: TransactionType,
    pub points: i64,
    pub description: String,
}

impl ValueObject for AwardSpec {}

/// Action key → catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ActionCatalog {
    pub fn new(entries: BTreeMap<String, CatalogEntry>) -> DomainResult<Self> {
        for (action, entry) in &entries {
            if entry.points <= 0 {
                return Err(DomainError::validation(format!(
                    "catalog action '{action}' must be worth a positive number of points"
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a catalog from its JSON object form (`{"signup": {...}, ...}`).
    pub fn from_json(json: &str) -> DomainResult<Self> {
        let entries: BTreeMap<String, CatalogEntry> = serde_json::from_str(json)
            .map_err(|e| DomainError::validation(format!("invalid action catalog: {e}")))?;
        Self::new(entries)
    }

    pub fn get(&self, action: &str) -> Option<&CatalogEntry> {
        self.entries.get(action)
    }

    pub fn actions(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Resolve `action` into an award. `units` is required for per-unit actions
    /// and ignored otherwise.
    pub fn award_for(&self, action: &str, units: Option<i64>) -> DomainResult<AwardSpec> {
        let entry = self.get(action).ok_or_else(DomainError::not_found)?;

        let points = if entry.per_unit {
            let units = units.ok_or_else(|| {
                DomainError::validation(format!("action '{action}' requires a unit count"))
            })?;
            if units <= 0 {
                return Err(DomainError::validation(format!(
                    "unit count for '{action}' must be positive (got {units})"
                )));
            }
            entry
                .points
                .checked_mul(units)
                .ok_or_else(|| DomainError::validation("award amount overflow"))?
        } else {
            entry.points
        };

        Ok(AwardSpec {
            transaction_type: entry.transaction_type.clone(),
            points,
            description: entry.description.clone(),
        })
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        let rows: [(&str, &str, i64, &str, bool); 11] = [
            ("signup", TransactionType::SIGNUP, 100, "Welcome bonus for joining", false),
            ("survey", TransactionType::SURVEY, 50, "Completed the skin survey", false),
            ("review", TransactionType::REVIEW, 25, "Wrote a product review", false),
            ("community_post", TransactionType::COMMUNITY_POST, 15, "Posted in the community", false),
            ("routine_created", TransactionType::ROUTINE_CREATED, 30, "Created a routine", false),
            ("routine_logged", TransactionType::ROUTINE_LOGGED, 5, "Logged a routine", false),
            ("purchase", TransactionType::PURCHASE, 1, "Points earned on purchase", true),
            ("referral", TransactionType::REFERRAL, 200, "Referred a friend", false),
            ("ingredient_search", TransactionType::INGREDIENT_SEARCH, 10, "Searched an ingredient", false),
            ("profile_complete", TransactionType::PROFILE_COMPLETE, 75, "Completed profile", false),
            ("monthly_active", TransactionType::MONTHLY_ACTIVE, 50, "Active this month", false),
        ];

        let entries = rows
            .into_iter()
            .map(|(action, tx_type, points, description, per_unit)| {
                (
                    action.to_string(),
                    CatalogEntry {
                        transaction_type: TransactionType::from_constant(tx_type),
                        points,
                        description: description.to_string(),
                        per_unit,
                    },
                )
            })
            .collect();

        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_matches_the_standard_table() {
        let catalog = ActionCatalog::default();
        let signup = catalog.award_for("signup", None).unwrap();
        assert_eq!(signup.points, 100);
        assert_eq!(signup.transaction_type.as_str(), TransactionType::SIGNUP);
        assert_eq!(catalog.award_for("referral", Some(3)).unwrap().points, 200);
        assert_eq!(catalog.actions().count(), 11);
    }

    #[test]
    fn purchase_scales_with_units() {
        let catalog = ActionCatalog::default();
        assert_eq!(catalog.award_for("purchase", Some(42)).unwrap().points, 42);
        assert!(catalog.award_for("purchase", None).is_err());
        assert!(catalog.award_for("purchase", Some(0)).is_err());
    }

    #[test]
    fn unknown_action_is_not_found() {
        let err = ActionCatalog::default().award_for("teleport", None).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn catalog_loads_from_json() {
        let json = r#"{
            "launch_party": {"transaction_type": "event", "points": 40, "description": "Came to the launch"},
            "purchase": {"transaction_type": "PURCHASE", "points": 2, "description": "Double points", "per_unit": true}
        }"#;
        let catalog = ActionCatalog::from_json(json).unwrap();
        let spec = catalog.award_for("launch_party", None).unwrap();
        assert_eq!(spec.transaction_type.as_str(), "EVENT");
        assert_eq!(catalog.award_for("purchase", Some(10)).unwrap().points, 20);
    }

    #[test]
    fn zero_point_entries_are_rejected() {
        let json = r#"{"free": {"transaction_type": "FREE", "points": 0, "description": "nothing"}}"#;
        assert!(ActionCatalog::from_json(json).is_err());
    }
}
