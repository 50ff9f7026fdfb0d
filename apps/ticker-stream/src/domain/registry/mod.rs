//! Active Ticker Set
//!
//! The authoritative, duplicate-free set of tracked tickers.
//!
//! # Design
//!
//! The set is shared by two parties:
//! - The ticker registry, the only writer (add/remove transitions)
//! - The publish gate, which reads membership on every feed publish
//!
//! Cloning a [`TickerSet`] clones the handle, not the contents. Mutation is
//! crate-private so the registry stays the only path that changes it.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::ticker::Ticker;

/// Shared handle to the active ticker set.
///
/// Backed by a `BTreeSet`, so listing order is lexicographic rather than
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct TickerSet {
    inner: Arc<RwLock<BTreeSet<Ticker>>>,
}

impl TickerSet {
    /// Create an empty ticker set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a ticker is tracked.
    #[must_use]
    pub fn contains(&self, ticker: &Ticker) -> bool {
        self.inner.read().contains(ticker)
    }

    /// Run `f` only if `ticker` is tracked, holding a read guard throughout.
    ///
    /// A removal cannot complete while `f` runs, so anything `f` does
    /// happens-before the ticker leaves the set. Returns whether `f` ran.
    pub fn with_tracked<F: FnOnce()>(&self, ticker: &Ticker, f: F) -> bool {
        let guard = self.inner.read();
        if guard.contains(ticker) {
            f();
            true
        } else {
            false
        }
    }

    /// Sorted snapshot of the tracked tickers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Ticker> {
        self.inner.read().iter().cloned().collect()
    }

    /// Number of tracked tickers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no ticker is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Insert a ticker. Returns `false` if it was already present.
    pub(crate) fn insert(&self, ticker: Ticker) -> bool {
        self.inner.write().insert(ticker)
    }

    /// Remove a ticker. Returns `false` if it was absent.
    pub(crate) fn remove(&self, ticker: &Ticker) -> bool {
        self.inner.write().remove(ticker)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    fn ticker(s: &str) -> Ticker {
        Ticker::parse(s).unwrap()
    }

    #[test]
    fn insert_duplicate_is_rejected() {
        let set = TickerSet::new();
        assert!(set.insert(ticker("BTCUSD")));
        assert!(!set.insert(ticker("btcusd")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_absent_is_rejected() {
        let set = TickerSet::new();
        assert!(!set.remove(&ticker("BTCUSD")));
        assert!(set.is_empty());
    }

    #[test]
    fn with_tracked_runs_only_for_members() {
        let set = TickerSet::new();
        set.insert(ticker("BTCUSD"));

        let mut ran = 0;
        assert!(set.with_tracked(&ticker("BTCUSD"), || ran += 1));
        assert!(!set.with_tracked(&ticker("ETHUSD"), || ran += 1));
        assert_eq!(ran, 1);
    }

    #[test]
    fn snapshot_is_sorted() {
        let set = TickerSet::new();
        set.insert(ticker("SOLUSD"));
        set.insert(ticker("BTCUSD"));
        set.insert(ticker("ETHUSD"));

        let names: Vec<_> = set.snapshot().into_iter().map(Ticker::into_inner).collect();
        assert_eq!(names, vec!["BTCUSD", "ETHUSD", "SOLUSD"]);
    }

    #[test]
    fn clones_share_contents() {
        let set = TickerSet::new();
        let view = set.clone();

        set.insert(ticker("ETHUSD"));
        assert!(view.contains(&ticker("ETHUSD")));

        set.remove(&ticker("ETHUSD"));
        assert!(!view.contains(&ticker("ETHUSD")));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(String),
        Remove(String),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let symbol = prop::sample::select(vec!["btcusd", "ETHUSD", "SolUsd", "ADAUSD", "XRPUSD"])
            .prop_map(str::to_string);
        prop_oneof![
            symbol.clone().prop_map(Op::Add),
            symbol.prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn snapshot_is_sorted_and_duplicate_free(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let set = TickerSet::new();
            let mut model: HashSet<String> = HashSet::new();

            for op in ops {
                match op {
                    Op::Add(raw) => {
                        let t = ticker(&raw);
                        prop_assert_eq!(set.insert(t.clone()), model.insert(t.into_inner()));
                    }
                    Op::Remove(raw) => {
                        let t = ticker(&raw);
                        prop_assert_eq!(set.remove(&t), model.remove(t.as_str()));
                    }
                }

                let snapshot = set.snapshot();
                prop_assert!(snapshot.windows(2).all(|w| w[0] < w[1]));
                prop_assert_eq!(snapshot.len(), model.len());
            }
        }
    }
}
