//! Stable-order keyed registry used for handler mounting and teardown order.
//!
//! Entries sort by an integer order; callers either pin an explicit order or
//! let the registry append with a monotonically increasing default. Ties keep
//! their relative insertion order.

use thiserror::Error;

/// Orders must fit the 32-bit range; everything else is rejected up front.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid order {order}: must be a 32-bit integer")]
pub struct InvalidOrderError {
    pub order: i64,
}

/// A single keyed entry with its sort order.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    key: String,
    value: T,
    order: i64,
}

impl<T> Entry<T> {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    #[must_use]
    pub fn order(&self) -> i64 {
        self.order
    }
}

/// Keyed collection with deterministic, priority-sorted iteration.
///
/// The high-water mark tracks the largest order seen so far. `set` without an
/// explicit order assigns `mark + 1`, so plain appends sort in insertion
/// order; an explicit order raises the mark to `max(mark, order)` and becomes
/// the baseline for subsequent auto-assignments.
#[derive(Debug, Clone)]
pub struct OrderedRegistry<T> {
    entries: Vec<Entry<T>>,
    high_water: i64,
}

impl<T> Default for OrderedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OrderedRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            high_water: 0,
        }
    }

    /// Inserts or overwrites the entry for `key`, returning the effective
    /// order. Overwriting keeps the original insertion position, so ties
    /// still break deterministically.
    ///
    /// # Errors
    /// Returns [`InvalidOrderError`] for orders outside the 32-bit range; the
    /// registry is left unchanged.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: T,
        order: Option<i64>,
    ) -> Result<i64, InvalidOrderError> {
        let order = match order {
            Some(o) => {
                if i32::try_from(o).is_err() {
                    return Err(InvalidOrderError { order: o });
                }
                self.high_water = self.high_water.max(o);
                o
            }
            None => {
                self.high_water += 1;
                self.high_water
            }
        };

        let key = key.into();
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(existing) => {
                existing.value = value;
                existing.order = order;
            }
            None => self.entries.push(Entry { key, value, order }),
        }
        Ok(order)
    }

    /// The order `set` would assign next when called without an explicit one.
    #[must_use]
    pub fn next_auto_order(&self) -> i64 {
        self.high_water + 1
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|e| e.key == key)
            .map(|e| &mut e.value)
    }

    /// Entries sorted ascending by order; ties preserve insertion order.
    #[must_use]
    pub fn sorted(&self) -> Vec<&Entry<T>> {
        let mut view: Vec<&Entry<T>> = self.entries.iter().collect();
        view.sort_by_key(|e| e.order);
        view
    }

    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries and resets the high-water mark.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.high_water = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_sort_in_insertion_order() {
        let mut reg = OrderedRegistry::new();
        reg.set("a", 1u8, None).unwrap();
        reg.set("b", 2, None).unwrap();
        reg.set("c", 3, None).unwrap();

        let keys: Vec<_> = reg.sorted().iter().map(|e| e.key().to_owned()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn explicit_order_wins_over_insertion() {
        let mut reg = OrderedRegistry::new();
        reg.set("late", (), Some(10)).unwrap();
        reg.set("early", (), Some(5)).unwrap();

        let keys: Vec<_> = reg.sorted().iter().map(|e| e.key().to_owned()).collect();
        assert_eq!(keys, vec!["early", "late"]);
    }

    #[test]
    fn auto_order_continues_after_explicit_high_water() {
        let mut reg = OrderedRegistry::new();
        reg.set("pinned", (), Some(100)).unwrap();
        let assigned = reg.set("appended", (), None).unwrap();
        assert_eq!(assigned, 101);
    }

    #[test]
    fn lower_explicit_order_does_not_shrink_high_water() {
        let mut reg = OrderedRegistry::new();
        reg.set("a", (), Some(50)).unwrap();
        reg.set("b", (), Some(10)).unwrap();
        // mark = max(mark, order) stays at 50
        let assigned = reg.set("c", (), None).unwrap();
        assert_eq!(assigned, 51);
    }

    #[test]
    fn out_of_range_order_fails_and_leaves_registry_unchanged() {
        let mut reg = OrderedRegistry::new();
        reg.set("a", (), None).unwrap();

        let err = reg.set("b", (), Some(i64::from(i32::MAX) + 1)).unwrap_err();
        assert_eq!(err.order, i64::from(i32::MAX) + 1);
        assert_eq!(reg.len(), 1);
        // high-water untouched: next auto assignment is 2
        assert_eq!(reg.set("c", (), None).unwrap(), 2);
    }

    #[test]
    fn overwrite_keeps_insertion_position_on_ties() {
        let mut reg = OrderedRegistry::new();
        reg.set("a", 1u8, Some(7)).unwrap();
        reg.set("b", 2, Some(7)).unwrap();
        reg.set("a", 9, Some(7)).unwrap();

        let view = reg.sorted();
        assert_eq!(view[0].key(), "a");
        assert_eq!(*view[0].value(), 9);
        assert_eq!(view[1].key(), "b");
    }

    #[test]
    fn clear_resets_high_water() {
        let mut reg = OrderedRegistry::new();
        reg.set("a", (), Some(40)).unwrap();
        reg.clear();
        assert!(reg.is_empty());
        assert_eq!(reg.set("b", (), None).unwrap(), 1);
    }
}
