//! Membership tiers and the lifetime-points threshold policy.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use pointsledger_core::{DomainError, ValueObject};

/// Membership tier, derived purely from lifetime points.
///
/// Ordering follows progression: `Bronze < Silver < Gold < Platinum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl ValueObject for Tier {}

const SILVER_THRESHOLD: i64 = 500;
const GOLD_THRESHOLD: i64 = 2_000;
const PLATINUM_THRESHOLD: i64 = 5_000;

const BRONZE_BENEFITS: &[&str] = &[
    "Earn points on purchases, reviews and community activity",
    "Birthday bonus points",
];
const SILVER_BENEFITS: &[&str] = &[
    "Free standard shipping on every order",
    "Early access to seasonal sales",
];
const GOLD_BENEFITS: &[&str] = &[
    "Exclusive member-only products",
    "Double points events",
];
const PLATINUM_BENEFITS: &[&str] = &[
    "Priority customer support",
    "Complimentary personalized routine consultation",
];

impl Tier {
    /// All tiers, lowest first.
    pub const ALL: [Tier; 4] = [Tier::Bronze, Tier::Silver, Tier::Gold, Tier::Platinum];

    /// Tier for a lifetime-points total.
    ///
    /// Bands are `[0, 500)`, `[500, 2000)`, `[2000, 5000)` and `[5000, ∞)`.
    /// Negative totals never occur on a valid account and map to `Bronze`.
    pub fn for_lifetime_points(lifetime_points: i64) -> Tier {
        if lifetime_points >= PLATINUM_THRESHOLD {
            Tier::Platinum
        } else if lifetime_points >= GOLD_THRESHOLD {
            Tier::Gold
        } else if lifetime_points >= SILVER_THRESHOLD {
            Tier::Silver
        } else {
            Tier::Bronze
        }
    }

    /// Lowest lifetime-points total that qualifies for this tier.
    pub fn threshold(self) -> i64 {
        match self {
            Tier::Bronze => 0,
            Tier::Silver => SILVER_THRESHOLD,
            Tier::Gold => GOLD_THRESHOLD,
            Tier::Platinum => PLATINUM_THRESHOLD,
        }
    }

    /// The tier above this one, or `None` at the top.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Bronze => Some(Tier::Silver),
            Tier::Silver => Some(Tier::Gold),
            Tier::Gold => Some(Tier::Platinum),
            Tier::Platinum => None,
        }
    }

    /// Benefits introduced at this tier (not including lower tiers).
    fn own_benefits(self) -> &'static [&'static str] {
        match self {
            Tier::Bronze => BRONZE_BENEFITS,
            Tier::Silver => SILVER_BENEFITS,
            Tier::Gold => GOLD_BENEFITS,
            Tier::Platinum => PLATINUM_BENEFITS,
        }
    }

    /// Cumulative benefits: everything from lower tiers first, then this tier's own.
    pub fn benefits(self) -> Vec<&'static str> {
        Tier::ALL
            .iter()
            .filter(|t| **t <= self)
            .flat_map(|t| t.own_benefits().iter().copied())
            .collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
            Tier::Platinum => "platinum",
        }
    }
}

/// Points still needed to reach the next tier; `0` at `Platinum`.
pub fn points_to_next_tier(lifetime_points: i64) -> i64 {
    match Tier::for_lifetime_points(lifetime_points).next() {
        Some(next) => next.threshold() - lifetime_points.max(0),
        None => 0,
    }
}

/// Progress through the current tier band as a whole percentage (0..=100).
///
/// `Platinum` has no upper bound and always reports 100.
pub fn tier_progress_percent(lifetime_points: i64) -> u8 {
    let lifetime = lifetime_points.max(0);
    let current = Tier::for_lifetime_points(lifetime);
    let Some(next) = current.next() else {
        return 100;
    };
    let band = next.threshold() - current.threshold();
    let into_band = lifetime - current.threshold();
    ((into_band * 100) / band) as u8
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bronze" => Ok(Tier::Bronze),
            "silver" => Ok(Tier::Silver),
            "gold" => Ok(Tier::Gold),
            "platinum" => Ok(Tier::Platinum),
            _ => Err(DomainError::validation(format!(
                "unknown tier '{s}' (expected bronze, silver, gold or platinum)"
            ))),
        }
    }
}
