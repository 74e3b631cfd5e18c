//! Shared state behind a [`Suite`](crate::suite::Suite).

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::core::aggregate::{PreAggregation, pending_for_field};
use crate::core::bus::{Bus, SuiteEvent};
use crate::core::cache::{CacheKey, CacheLayer};
use crate::core::ids::SuiteId;
use crate::core::isolate::IsolateRef;
use crate::core::status::IsolateStatus;
use crate::core::summary::SuiteResult;
use crate::core::test_isolate::{self, Severity};
use crate::core::walker;
use crate::suite::runtime::Runtime;

pub(crate) type ResultCallback = Box<dyn FnOnce(&SuiteResult)>;

/// Outcome of a test body: `Ok` passes, `Err` fails.
pub type TestResult = Result<(), TestFailure>;

/// A failed test body, optionally carrying the message to report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestFailure {
    pub message: Option<String>,
}

impl TestFailure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

impl From<&str> for TestFailure {
    fn from(message: &str) -> Self {
        Self::with_message(message)
    }
}

impl From<String> for TestFailure {
    fn from(message: String) -> Self {
        Self::with_message(message)
    }
}

/// Pass when `condition` holds, otherwise fail with the declared message.
pub fn ensure(condition: bool) -> TestResult {
    if condition {
        Ok(())
    } else {
        Err(TestFailure::new())
    }
}

/// Field filters set by `skip` and `only` for the current run.
#[derive(Debug, Clone, Default)]
pub(crate) struct Focus {
    skipped: Vec<String>,
    only: Vec<String>,
}

impl Focus {
    pub(crate) fn skip(&mut self, fields: &[&str]) {
        self.skipped.extend(fields.iter().map(|f| f.to_string()));
    }

    pub(crate) fn only(&mut self, fields: &[&str]) {
        self.only.extend(fields.iter().map(|f| f.to_string()));
    }

    pub(crate) fn excludes(&self, field: &str) -> bool {
        if self.skipped.iter().any(|f| f == field) {
            return true;
        }
        !self.only.is_empty() && !self.only.iter().any(|f| f == field)
    }
}

/// When a field declared optional gives up its unrun tests.
#[derive(Clone)]
pub(crate) enum OptionalRule {
    Always,
    /// Only while the predicate holds for the result at omission time.
    When(Rc<dyn Fn(&SuiteResult) -> bool>),
}

pub(crate) struct SuiteState {
    pub(crate) suite_id: SuiteId,
    pub(crate) name: Option<String>,
    pub(crate) runtime: Runtime,
    pub(crate) bus: Bus,
    pub(crate) caches: Rc<CacheLayer>,
    pub(crate) focus: RefCell<Focus>,
    pub(crate) run_seq: Cell<u64>,
    optional: RefCell<BTreeMap<String, OptionalRule>>,
    done_callbacks: RefCell<Vec<ResultCallback>>,
    field_callbacks: RefCell<BTreeMap<String, Vec<ResultCallback>>>,
    quiescent: Notify,
}

impl SuiteState {
    pub(crate) fn new(
        suite_id: SuiteId,
        name: Option<String>,
        runtime: Runtime,
        bus: Bus,
        caches: Rc<CacheLayer>,
    ) -> Self {
        Self {
            suite_id,
            name,
            runtime,
            bus,
            caches,
            focus: RefCell::new(Focus::default()),
            run_seq: Cell::new(0),
            optional: RefCell::new(BTreeMap::new()),
            done_callbacks: RefCell::new(Vec::new()),
            field_callbacks: RefCell::new(BTreeMap::new()),
            quiescent: Notify::new(),
        }
    }

    fn cache_key(&self) -> CacheKey {
        CacheLayer::suite_key(self.suite_id)
    }

    pub(crate) fn emit(&self, event: SuiteEvent) {
        self.bus.emit(event);
    }

    pub(crate) fn expire_result(&self) {
        self.caches.expire_suite_result(self.suite_id);
    }

    pub(crate) fn result(&self) -> Rc<SuiteResult> {
        self.caches.suite_results.invoke(&self.cache_key(), || {
            let root = self.runtime.available_root();
            Rc::new(SuiteResult::produce(root.as_ref(), self.name.as_deref()))
        })
    }

    fn pre_aggregation(&self) -> Rc<PreAggregation> {
        self.caches.pre_aggregations.invoke(&self.cache_key(), || {
            let root = self.runtime.available_root();
            Rc::new(PreAggregation::build(root.as_ref()))
        })
    }

    /// Whether any isolate (or any test of `field`) is still pending.
    pub(crate) fn has_pending(&self, field: Option<&str>) -> bool {
        if self.runtime.available_root().is_none() {
            return false;
        }
        let aggregation = self.pre_aggregation();
        if aggregation.pending.is_empty() {
            return false;
        }
        let predicate = pending_for_field(field);
        aggregation.has_pending(Some(&predicate as &dyn Fn(&IsolateRef) -> bool))
    }

    pub(crate) fn has_failures(&self, severity: Severity, field: Option<&str>) -> bool {
        if self.runtime.available_root().is_none() {
            return false;
        }
        self.pre_aggregation().has_failures(severity, field)
    }

    pub(crate) fn push_done_callback(&self, callback: ResultCallback) {
        self.done_callbacks.borrow_mut().push(callback);
    }

    pub(crate) fn push_field_callback(&self, field: &str, callback: ResultCallback) {
        self.field_callbacks
            .borrow_mut()
            .entry(field.to_string())
            .or_default()
            .push(callback);
    }

    pub(crate) fn reset_callbacks(&self) {
        self.done_callbacks.borrow_mut().clear();
        self.field_callbacks.borrow_mut().clear();
    }

    pub(crate) fn run_done_callbacks(&self) {
        let callbacks = std::mem::take(&mut *self.done_callbacks.borrow_mut());
        if callbacks.is_empty() {
            return;
        }
        debug!(suite_id = %self.suite_id, count = callbacks.len(), "running done callbacks");
        let result = self.result();
        for callback in callbacks {
            callback(&result);
        }
    }

    pub(crate) fn run_field_callbacks(&self, field: &str) {
        if self.has_pending(Some(field)) {
            return;
        }
        let callbacks = self
            .field_callbacks
            .borrow_mut()
            .remove(field)
            .unwrap_or_default();
        if callbacks.is_empty() {
            return;
        }
        let result = self.result();
        for callback in callbacks {
            callback(&result);
        }
    }

    pub(crate) fn set_optional(&self, field: &str, rule: OptionalRule) {
        self.optional.borrow_mut().insert(field.to_string(), rule);
    }

    pub(crate) fn clear_optional(&self) {
        self.optional.borrow_mut().clear();
    }

    /// Omit the untested and skipped tests of optional fields whose rule
    /// holds, so they stop counting against validity. Pending and decided
    /// tests are left alone.
    pub(crate) fn omit_optional_fields(&self) {
        let rules = self.optional.borrow().clone();
        if rules.is_empty() {
            return;
        }
        let Some(root) = self.runtime.available_root() else {
            return;
        };
        let result = self.result();
        let applies: BTreeMap<String, bool> = rules
            .into_iter()
            .map(|(field, rule)| {
                let holds = match rule {
                    OptionalRule::Always => true,
                    OptionalRule::When(predicate) => predicate(&result),
                };
                (field, holds)
            })
            .collect();

        let mut omitted = 0usize;
        walker::for_each(&root, |node| {
            let Some(field) = test_isolate::field_name(node) else {
                return;
            };
            if !applies.get(&field).copied().unwrap_or(false) {
                return;
            }
            if (test_isolate::is_untested(node) || test_isolate::is_skipped(node))
                && test_isolate::omit(node)
            {
                omitted += 1;
            }
        });
        if omitted > 0 {
            self.expire_result();
            debug!(suite_id = %self.suite_id, omitted, "optional tests omitted");
        }
    }

    pub(crate) fn notify_quiescent(&self) {
        self.quiescent.notify_waiters();
    }

    /// Wait until nothing in the suite is pending.
    pub(crate) async fn wait_quiescent(&self) {
        loop {
            let notified = self.quiescent.notified();
            if !self.has_pending(None) {
                return;
            }
            notified.await;
        }
    }

    /// Apply the verdict of an async test body that has finished.
    ///
    /// Canceled tests drop their verdict and announce nothing.
    pub(crate) fn settle_async(&self, node: &IsolateRef, outcome: TestResult) {
        let signal_tripped = test_isolate::signal(node).is_some_and(|s| s.is_canceled());
        if signal_tripped {
            test_isolate::cancel(node);
        }
        if test_isolate::is_canceled(node) {
            trace!(id = %node.id(), "discarding settlement of canceled test");
            self.expire_result();
            let in_live_tree = self
                .runtime
                .available_root()
                .is_some_and(|root| walker::contains(&root, node));
            if in_live_tree && !self.has_pending(None) {
                self.emit(SuiteEvent::AllRunningTestsFinished);
            }
            return;
        }

        apply_outcome(node, outcome);
        if node.transition(IsolateStatus::Done) {
            self.emit(SuiteEvent::IsolateDone(Rc::clone(node)));
        }
        self.emit(SuiteEvent::AsyncIsolateDone(Rc::clone(node)));
    }
}

/// Record the verdict of a finished test body.
pub(crate) fn apply_outcome(node: &IsolateRef, outcome: TestResult) {
    match outcome {
        Ok(()) => {
            test_isolate::pass(node);
        }
        Err(failure) => {
            test_isolate::fail_with(node, failure.message);
        }
    }
}
