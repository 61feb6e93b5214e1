//! Multi-valued field reconciliation
//!
//! Applies an `{added, removed}` change set onto the counterpart's current
//! value without discarding state the change did not mention. Additions
//! always win; a removal only clears the exact value it names.

/// Members added to and removed from a multi-valued field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> Default for SetDiff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

impl<T> SetDiff<T> {
    pub fn new(added: Vec<T>, removed: Vec<T>) -> Self {
        Self { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Map both sides, dropping members that have no counterpart
    pub fn filter_map<U>(self, mut f: impl FnMut(T) -> Option<U>) -> SetDiff<U> {
        SetDiff {
            added: self.added.into_iter().filter_map(&mut f).collect(),
            removed: self.removed.into_iter().filter_map(&mut f).collect(),
        }
    }
}

/// What to do with a single-valued target field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Leave the field alone
    Unchanged,
    /// Write a new value
    Set(T),
    /// Empty the field
    Cleared,
}

impl<T> Outcome<T> {
    pub fn is_write(&self) -> bool {
        !matches!(self, Outcome::Unchanged)
    }
}

/// Reconcile a change set onto a single-valued field.
///
/// The last added member wins. Otherwise the field is cleared only when
/// its current value is among the removed members.
pub fn reconcile_single<T: PartialEq + Clone>(current: Option<&T>, diff: &SetDiff<T>) -> Outcome<T> {
    if let Some(winner) = diff.added.last() {
        return if current == Some(winner) {
            Outcome::Unchanged
        } else {
            Outcome::Set(winner.clone())
        };
    }

    match current {
        Some(value) if diff.removed.contains(value) => Outcome::Cleared,
        _ => Outcome::Unchanged,
    }
}

/// Resulting value after applying an outcome to `current`
pub fn resolve<T: Clone>(current: Option<&T>, outcome: &Outcome<T>) -> Option<T> {
    match outcome {
        Outcome::Unchanged => current.cloned(),
        Outcome::Set(value) => Some(value.clone()),
        Outcome::Cleared => None,
    }
}

/// Reconcile a change set onto a multi-valued field.
///
/// Removes exact matches, appends additions not already present and keeps
/// everything else in its original order. A member both added and removed
/// stays.
pub fn reconcile_multi<T: PartialEq + Clone>(current: &[T], diff: &SetDiff<T>) -> Vec<T> {
    let mut result: Vec<T> = current
        .iter()
        .filter(|member| !diff.removed.contains(member) || diff.added.contains(member))
        .cloned()
        .collect();
    for member in &diff.added {
        if !result.contains(member) {
            result.push(member.clone());
        }
    }
    result
}
