//! Load state of a navigation property.

/// A navigation that is either not loaded yet or loaded with a value.
///
/// Only the loading engine moves a navigation from `Unresolved` to
/// `Resolved`. Freshly created entities start with resolved, empty
/// collections because there is nothing to load for them.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Resolvable<T> {
    #[default]
    Unresolved,
    Resolved(T),
}

impl<T> Resolvable<T> {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Unresolved => None,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Unresolved => None,
        }
    }

    /// Drops the loaded value and returns to `Unresolved`.
    pub fn reset(&mut self) {
        *self = Self::Unresolved;
    }
}
