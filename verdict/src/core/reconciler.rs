//! Reconciliation of freshly declared isolates against the previous run.
//!
//! The registry is an ordered list of strategies. For each pair of
//! (current, history) nodes of the same kind, the first strategy whose
//! `matches` accepts the pair decides which node the new tree keeps.

use std::rc::Rc;

use tracing::debug;

use crate::core::isolate::{IsolateKind, IsolateRef};
use crate::core::test_isolate;
use crate::error::VerdictError;

/// Decides how a node from the current run relates to its counterpart in
/// the previous run.
pub trait ReconcileStrategy {
    /// Stable name used to deduplicate registrations.
    fn name(&self) -> &str;

    fn matches(&self, current: &IsolateRef, history: &IsolateRef) -> bool;

    /// Return the node the new tree should keep: `current`, or `history`
    /// to carry the previous run's node over.
    fn reconcile(
        &self,
        current: &IsolateRef,
        history: &IsolateRef,
    ) -> Result<IsolateRef, VerdictError>;
}

#[derive(Clone, Default)]
pub struct ReconcilerRegistry {
    strategies: Vec<Rc<dyn ReconcileStrategy>>,
}

impl ReconcilerRegistry {
    /// An empty registry. Every pair falls through to "keep current".
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in test and debounce strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Rc::new(TestReconciler));
        registry.register(Rc::new(DebounceReconciler));
        registry
    }

    /// Append `strategy`. Registering a name twice keeps the first registration.
    pub fn register(&mut self, strategy: Rc<dyn ReconcileStrategy>) -> bool {
        if self.strategies.iter().any(|s| s.name() == strategy.name()) {
            debug!(strategy = strategy.name(), "reconcile strategy already registered");
            return false;
        }
        self.strategies.push(strategy);
        true
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name().to_string()).collect()
    }

    /// Run the first matching strategy. `Ok(None)` means no strategy applies.
    pub fn reconcile(
        &self,
        current: &IsolateRef,
        history: &IsolateRef,
    ) -> Result<Option<IsolateRef>, VerdictError> {
        match self.strategies.iter().find(|s| s.matches(current, history)) {
            Some(strategy) => strategy.reconcile(current, history).map(Some),
            None => Ok(None),
        }
    }
}

/// Pairs test isolates by position.
///
/// A skipped test carries the previous verdict forward (including a still
/// pending one). A test that will run, or is omitted, supersedes the
/// previous node and cancels it if it is still pending.
pub struct TestReconciler;

impl ReconcileStrategy for TestReconciler {
    fn name(&self) -> &str {
        "test"
    }

    fn matches(&self, current: &IsolateRef, history: &IsolateRef) -> bool {
        test_isolate::is_test(current) && test_isolate::is_test(history)
    }

    fn reconcile(
        &self,
        current: &IsolateRef,
        history: &IsolateRef,
    ) -> Result<IsolateRef, VerdictError> {
        let current_field = test_isolate::field_name(current).unwrap_or_default();
        let history_field = test_isolate::field_name(history).unwrap_or_default();

        if current_field != history_field {
            // A key names the slot, not the field: a keyed test moved to
            // another field starts over instead of inheriting a verdict.
            if current.key().is_some() {
                return Ok(Rc::clone(current));
            }
            let reorder_allowed = current.parent().is_some_and(|p| p.allows_reorder());
            if reorder_allowed {
                return Ok(Rc::clone(current));
            }
            return Err(VerdictError::TestOrderChanged {
                expected: history_field,
                found: current_field,
            });
        }

        if test_isolate::is_skipped(current) {
            test_isolate::skip(history, false);
            return Ok(Rc::clone(history));
        }

        if test_isolate::is_pending(history) && test_isolate::same_profile(current, history) {
            debug!(field = %current_field, "canceling superseded pending test");
            test_isolate::cancel(history);
        }
        Ok(Rc::clone(current))
    }
}

/// Clears the previous run's debounce timer so only the newest declaration fires.
pub struct DebounceReconciler;

impl ReconcileStrategy for DebounceReconciler {
    fn name(&self) -> &str {
        "debounce"
    }

    fn matches(&self, current: &IsolateRef, history: &IsolateRef) -> bool {
        current.kind() == &IsolateKind::Debounce && history.kind() == &IsolateKind::Debounce
    }

    fn reconcile(
        &self,
        current: &IsolateRef,
        history: &IsolateRef,
    ) -> Result<IsolateRef, VerdictError> {
        if let Some(timer) = history.debounce_timer() {
            timer.clear();
        }
        Ok(Rc::clone(current))
    }
}
