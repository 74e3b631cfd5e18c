//! Single-pass classification of a tree into pending work and failures.

use std::collections::BTreeMap;

use crate::core::isolate::IsolateRef;
use crate::core::test_isolate::{self, Severity};
use crate::core::walker;

/// Failing tests grouped by field, split by severity.
#[derive(Debug, Clone, Default)]
pub struct Failures {
    pub errors: BTreeMap<String, Vec<IsolateRef>>,
    pub warnings: BTreeMap<String, Vec<IsolateRef>>,
}

impl Failures {
    pub fn by_severity(&self, severity: Severity) -> &BTreeMap<String, Vec<IsolateRef>> {
        match severity {
            Severity::Error => &self.errors,
            Severity::Warn => &self.warnings,
        }
    }
}

/// Pending isolates and failing tests of one tree, in walk order.
#[derive(Debug, Clone, Default)]
pub struct PreAggregation {
    pub pending: Vec<IsolateRef>,
    pub failures: Failures,
}

impl PreAggregation {
    /// Classify every isolate under `root` in one walk.
    ///
    /// Canceled tests are never pending and never failing. Omitted tests
    /// never count as failures.
    pub fn build(root: Option<&IsolateRef>) -> Self {
        let mut aggregation = Self::default();
        let Some(root) = root else {
            return aggregation;
        };
        walker::for_each(root, |node| {
            let canceled = test_isolate::is_canceled(node);
            if node.is_pending() && !canceled {
                aggregation.pending.push(node.clone());
            }
            if !test_isolate::is_test(node) || canceled || test_isolate::is_omitted(node) {
                return;
            }
            let Some(field) = test_isolate::field_name(node) else {
                return;
            };
            if test_isolate::is_warning(node) {
                aggregation
                    .failures
                    .warnings
                    .entry(field)
                    .or_default()
                    .push(node.clone());
            } else if test_isolate::is_failing(node) {
                aggregation
                    .failures
                    .errors
                    .entry(field)
                    .or_default()
                    .push(node.clone());
            }
        });
        aggregation
    }

    /// Any pending isolate accepted by `predicate` (every pending isolate when `None`).
    pub fn has_pending(&self, predicate: Option<&dyn Fn(&IsolateRef) -> bool>) -> bool {
        match predicate {
            Some(predicate) => self.pending.iter().any(predicate),
            None => !self.pending.is_empty(),
        }
    }

    /// Any failure of `severity`, optionally restricted to one field.
    pub fn has_failures(&self, severity: Severity, field: Option<&str>) -> bool {
        let by_field = self.failures.by_severity(severity);
        match field {
            Some(field) => by_field.get(field).is_some_and(|tests| !tests.is_empty()),
            None => by_field.values().any(|tests| !tests.is_empty()),
        }
    }
}

/// Predicate accepting pending isolates that belong to `field`.
///
/// With no field every pending isolate matches. With a field only tests
/// declared for that field do.
pub fn pending_for_field(field: Option<&str>) -> impl Fn(&IsolateRef) -> bool + '_ {
    move |node| match field {
        None => true,
        Some(field) => test_isolate::matches_field(node, field),
    }
}
