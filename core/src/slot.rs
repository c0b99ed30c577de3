//! The per-entity optimistic override.
//!
//! A slot sits in front of the confirmed store value for one entity key and
//! decides what the user sees:
//!
//! - [`OptimisticSlot::Unset`]: defer to the confirmed store state
//! - [`OptimisticSlot::Speculative`]: a pending mutation's expected result,
//!   shown before the server answers
//! - [`OptimisticSlot::ConfirmedOverride`]: the settled value restored after
//!   a rejected mutation
//!
//! A slot is created when a mutation starts, cleared when it succeeds and
//! replaced with the prior value when it fails. Callers that need to express
//! "no value" instantiate `T` as an `Option`.

/// Three-state optimistic override for one entity key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OptimisticSlot<T> {
    /// Defer to the confirmed store state
    #[default]
    Unset,
    /// Shown to the user, not yet confirmed
    Speculative(T),
    /// Settled value restored after a rollback
    ConfirmedOverride(T),
}

impl<T> OptimisticSlot<T> {
    /// Whether the slot defers to the confirmed state
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Whether the slot holds an unconfirmed value
    #[must_use]
    pub const fn is_speculative(&self) -> bool {
        matches!(self, Self::Speculative(_))
    }

    /// The overriding value, if any
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        match self {
            Self::Unset => None,
            Self::Speculative(value) | Self::ConfirmedOverride(value) => Some(value),
        }
    }

    /// Resolve the visible value, falling back to the confirmed state
    #[must_use]
    pub fn resolve<F>(&self, confirmed: F) -> T
    where
        T: Clone,
        F: FnOnce() -> T,
    {
        self.value().cloned().unwrap_or_else(confirmed)
    }

    /// Turn a speculative value back into a settled one.
    ///
    /// Used when a mutation fails: the caller restores the snapshot it took
    /// before publishing the speculation.
    #[must_use]
    pub const fn rolled_back(snapshot: T) -> Self {
        Self::ConfirmedOverride(snapshot)
    }

    /// Map the held value
    #[must_use]
    pub fn map<U, F>(self, f: F) -> OptimisticSlot<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Unset => OptimisticSlot::Unset,
            Self::Speculative(value) => OptimisticSlot::Speculative(f(value)),
            Self::ConfirmedOverride(value) => OptimisticSlot::ConfirmedOverride(f(value)),
        }
    }
}
