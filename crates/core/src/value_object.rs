//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects carry no identity and never change after construction. A
/// membership tier or a resolved award amount are values; an account or a
/// ledger transaction are entities.
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// enum Tier { Bronze, Silver }
///
/// impl ValueObject for Tier {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
