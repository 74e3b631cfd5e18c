//! The declaration surface handed to a suite callback.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde_json::Value;
use tracing::{debug, trace};

use crate::core::bus::SuiteEvent;
use crate::core::isolate::{Isolate, IsolateKind, IsolatePayload, IsolateRef};
use crate::core::signal::{CancelSignal, DebounceTimer};
use crate::core::status::{TestAction, TestStatus};
use crate::core::summary::SuiteResult;
use crate::core::test_isolate::{self, Severity, TestData};
use crate::error::VerdictResult;
use crate::suite::runtime::Settlement;
use crate::suite::state::{OptionalRule, SuiteState, TestFailure, TestResult, apply_outcome};

/// Field, message, severity and optional key of a test declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDecl {
    pub field: String,
    pub message: Option<String>,
    pub severity: Severity,
    pub key: Option<String>,
}

impl TestDecl {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: None,
            severity: Severity::Error,
            key: None,
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Report failures of this test as warnings.
    pub fn warn(mut self) -> Self {
        self.severity = Severity::Warn;
        self
    }

    /// Match this test across runs by key instead of by position.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl From<&str> for TestDecl {
    fn from(field: &str) -> Self {
        TestDecl::new(field)
    }
}

impl From<String> for TestDecl {
    fn from(field: String) -> Self {
        TestDecl::new(field)
    }
}

impl From<(&str, &str)> for TestDecl {
    fn from((field, message): (&str, &str)) -> Self {
        TestDecl::new(field).message(message)
    }
}

/// Handed to every test body.
#[derive(Debug, Clone)]
pub struct TestPayload {
    pub field: String,
    /// Tripped when a newer run supersedes this test.
    pub signal: CancelSignal,
}

/// A test body, either run inline or spawned onto the local task set.
pub enum TestBody<'a> {
    Sync(Box<dyn FnOnce(&TestPayload) -> TestResult + 'a>),
    Async(Box<dyn FnOnce(TestPayload) -> LocalBoxFuture<'static, TestResult> + 'a>),
}

impl<'a> TestBody<'a> {
    pub fn sync<F>(body: F) -> Self
    where
        F: FnOnce(&TestPayload) -> TestResult + 'a,
    {
        TestBody::Sync(Box::new(body))
    }

    pub fn future<F, Fut>(body: F) -> Self
    where
        F: FnOnce(TestPayload) -> Fut + 'a,
        Fut: Future<Output = TestResult> + 'static,
    {
        TestBody::Async(Box::new(move |payload| body(payload).boxed_local()))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, TestBody::Async(_))
    }
}

/// Condition for `omit_when` and `skip_when`: a plain bool, or a closure
/// over the draft result of the run so far.
pub trait DraftCondition {
    fn holds(self, draft: &dyn Fn() -> Rc<SuiteResult>) -> bool;
}

impl DraftCondition for bool {
    fn holds(self, _: &dyn Fn() -> Rc<SuiteResult>) -> bool {
        self
    }
}

impl<F> DraftCondition for F
where
    F: FnOnce(&SuiteResult) -> bool,
{
    fn holds(self, draft: &dyn Fn() -> Rc<SuiteResult>) -> bool {
        self(&draft())
    }
}

#[derive(Debug, Clone, Default)]
struct ScopeContext {
    omitted: bool,
    skipped: bool,
    group: Option<String>,
}

/// Declares isolates into the run that is currently executing.
pub struct SuiteScope<'s> {
    state: &'s Rc<SuiteState>,
    ctx: ScopeContext,
}

impl<'s> SuiteScope<'s> {
    pub(crate) fn new(state: &'s Rc<SuiteState>) -> Self {
        Self {
            state,
            ctx: ScopeContext::default(),
        }
    }

    /// Declare a test whose body runs synchronously.
    pub fn test<D, F>(&mut self, decl: D, body: F) -> IsolateRef
    where
        D: Into<TestDecl>,
        F: FnOnce(&TestPayload) -> TestResult,
    {
        self.declare(decl.into(), TestBody::sync(body))
    }

    /// Declare a test whose body returns a future. The future is spawned
    /// with `tokio::task::spawn_local`, so the run must happen inside a
    /// `LocalSet`.
    pub fn test_async<D, F, Fut>(&mut self, decl: D, body: F) -> IsolateRef
    where
        D: Into<TestDecl>,
        F: FnOnce(TestPayload) -> Fut,
        Fut: Future<Output = TestResult> + 'static,
    {
        self.declare(decl.into(), TestBody::future(body))
    }

    /// Declare a test that reuses its previous verdict while `deps` are unchanged.
    pub fn memo<D>(&mut self, decl: D, deps: Vec<Value>, body: TestBody<'_>) -> IsolateRef
    where
        D: Into<TestDecl>,
    {
        let decl = decl.into();
        let state = Rc::clone(self.state);
        let cursor = state.runtime.current_cursor().unwrap_or_default();
        let mut key = vec![
            Value::from(state.suite_id.get()),
            Value::String(decl.field.clone()),
            Value::from(cursor),
        ];
        key.extend(deps);

        let cache = &state.caches.test_memo;
        if let Some(cached) = cache.get(&key) {
            if !test_isolate::is_canceled(&cached) {
                state.runtime.supersede_history_at_cursor(&cached);
                match state.runtime.attach(Rc::clone(&cached)) {
                    Ok(()) => {
                        trace!(field = %decl.field, "memoized test reused");
                        state.expire_result();
                        return cached;
                    }
                    Err(err) => state.runtime.defer(err),
                }
            }
            cache.invalidate(&key);
        }
        cache.invoke(&key, || self.declare(decl, body))
    }

    /// Declare a test whose body runs only after `delay` passes without a
    /// newer run declaring it again.
    pub fn debounce<D>(&mut self, decl: D, delay: Duration, body: TestBody<'static>) -> IsolateRef
    where
        D: Into<TestDecl>,
    {
        let decl = decl.into();
        let timer = DebounceTimer::new();
        let state = self.state;
        let ctx = self.ctx.clone();
        let created = state.runtime.create(
            IsolateKind::Debounce,
            IsolatePayload::Debounce(timer.clone()),
            None,
            move |_| {
                let delayed = TestBody::future(move |payload: TestPayload| async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = timer.cleared() => {
                            payload.signal.cancel();
                            return Err(TestFailure::new());
                        }
                    }
                    match body {
                        TestBody::Sync(body) => body(&payload),
                        TestBody::Async(body) => body(payload).await,
                    }
                });
                let mut scope = SuiteScope { state, ctx };
                scope.declare(decl, delayed);
                Settlement::Done
            },
        );
        self.settle_declaration(created, IsolateKind::Debounce)
    }

    /// Declare a named group. Tests inside carry the group name.
    pub fn group<F>(&mut self, name: &str, body: F) -> IsolateRef
    where
        F: FnOnce(&mut SuiteScope<'_>),
    {
        let ctx = ScopeContext {
            group: Some(name.to_string()),
            ..self.ctx.clone()
        };
        self.nested(
            IsolateKind::Group,
            IsolatePayload::Group {
                name: name.to_string(),
            },
            None,
            ctx,
            body,
        )
    }

    /// Declare tests per item. Children of an `each` may change order
    /// between runs without being reported as an order change.
    pub fn each<T, I, F>(&mut self, items: I, mut body: F) -> IsolateRef
    where
        I: IntoIterator<Item = T>,
        F: FnMut(&mut SuiteScope<'_>, T, usize),
    {
        let ctx = self.ctx.clone();
        self.nested(IsolateKind::Each, IsolatePayload::None, None, ctx, |scope| {
            for (index, item) in items.into_iter().enumerate() {
                body(scope, item, index);
            }
        })
    }

    /// Tests declared in `body` are omitted when `condition` holds.
    pub fn omit_when<C, F>(&mut self, condition: C, body: F) -> IsolateRef
    where
        C: DraftCondition,
        F: FnOnce(&mut SuiteScope<'_>),
    {
        self.conditional(IsolateKind::OmitWhen, condition, body)
    }

    /// Tests declared in `body` are skipped when `condition` holds.
    pub fn skip_when<C, F>(&mut self, condition: C, body: F) -> IsolateRef
    where
        C: DraftCondition,
        F: FnOnce(&mut SuiteScope<'_>),
    {
        self.conditional(IsolateKind::SkipWhen, condition, body)
    }

    fn conditional<C, F>(&mut self, kind: IsolateKind, condition: C, body: F) -> IsolateRef
    where
        C: DraftCondition,
        F: FnOnce(&mut SuiteScope<'_>),
    {
        let state = self.state;
        let ctx = self.ctx.clone();
        let omit = kind == IsolateKind::OmitWhen;
        let created = state
            .runtime
            .create(kind.clone(), IsolatePayload::None, None, move |_| {
                let draft = || draft_result(state);
                let mut ctx = ctx;
                if omit {
                    ctx.omitted = ctx.omitted || condition.holds(&draft);
                } else {
                    ctx.skipped = ctx.skipped || condition.holds(&draft);
                }
                let mut scope = SuiteScope { state, ctx };
                body(&mut scope);
                Settlement::Done
            });
        self.settle_declaration(created, kind)
    }

    /// Declare an isolate of any kind, typically a [`IsolateKind::Custom`]
    /// one, with `body` declaring its children.
    pub fn isolate<F>(
        &mut self,
        kind: IsolateKind,
        payload: IsolatePayload,
        key: Option<String>,
        body: F,
    ) -> IsolateRef
    where
        F: FnOnce(&mut SuiteScope<'_>),
    {
        let ctx = self.ctx.clone();
        self.nested(kind, payload, key, ctx, body)
    }

    /// Skip the named fields for the rest of this run.
    pub fn skip(&mut self, fields: &[&str]) {
        self.state.focus.borrow_mut().skip(fields);
    }

    /// Run only the named fields for the rest of this run.
    pub fn only(&mut self, fields: &[&str]) {
        self.state.focus.borrow_mut().only(fields);
    }

    /// Mark fields optional: once the run settles, their tests that did
    /// not run are omitted and no longer keep the suite invalid.
    pub fn optional(&mut self, fields: &[&str]) {
        for field in fields {
            self.state.set_optional(field, OptionalRule::Always);
        }
    }

    /// Mark `field` optional while `condition` holds for the settled result.
    pub fn optional_when<F>(&mut self, field: &str, condition: F)
    where
        F: Fn(&SuiteResult) -> bool + 'static,
    {
        self.state
            .set_optional(field, OptionalRule::When(Rc::new(condition)));
    }

    /// The result of the run so far.
    pub fn draft(&self) -> Rc<SuiteResult> {
        draft_result(self.state)
    }

    fn nested<F>(
        &mut self,
        kind: IsolateKind,
        payload: IsolatePayload,
        key: Option<String>,
        ctx: ScopeContext,
        body: F,
    ) -> IsolateRef
    where
        F: FnOnce(&mut SuiteScope<'_>),
    {
        let state = self.state;
        let created = state.runtime.create(kind.clone(), payload, key, move |_| {
            let mut scope = SuiteScope { state, ctx };
            body(&mut scope);
            Settlement::Done
        });
        self.settle_declaration(created, kind)
    }

    fn declare(&mut self, decl: TestDecl, body: TestBody<'_>) -> IsolateRef {
        let mut data = TestData::new(decl.field.clone());
        data.group_name = self.ctx.group.clone();
        data.message = decl.message;
        data.severity = decl.severity;
        data.is_async = body.is_async();
        if self.ctx.omitted {
            data.status = TestStatus::Untested.apply(TestAction::Omit);
        } else if self.ctx.skipped || self.state.focus.borrow().excludes(&decl.field) {
            data.status = TestStatus::Untested.apply(TestAction::Skip { force: false });
        }

        let state = self.state;
        let created = state.runtime.create(
            IsolateKind::Test,
            IsolatePayload::Test(data),
            decl.key,
            move |node| {
                if test_isolate::is_untested(node) {
                    run_test(state, node, body)
                } else {
                    Settlement::Done
                }
            },
        );
        self.settle_declaration(created, IsolateKind::Test)
    }

    fn settle_declaration(&self, created: VerdictResult<IsolateRef>, kind: IsolateKind) -> IsolateRef {
        self.state.expire_result();
        created.unwrap_or_else(|err| {
            self.state.runtime.defer(err);
            Isolate::new(kind, IsolatePayload::None, None)
        })
    }
}

fn draft_result(state: &SuiteState) -> Rc<SuiteResult> {
    state.expire_result();
    state.result()
}

fn run_test(state: &Rc<SuiteState>, node: &IsolateRef, body: TestBody<'_>) -> Settlement {
    state.emit(SuiteEvent::TestRunStarted(Rc::clone(node)));
    let Some((payload, declared_message)) = node.test_data().map(|data| {
        (
            TestPayload {
                field: data.field_name.clone(),
                signal: data.signal.clone(),
            },
            data.message.is_some(),
        )
    }) else {
        return Settlement::Done;
    };

    match body {
        TestBody::Sync(body) => {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&payload)))
                .unwrap_or_else(|panic| Err(panic_failure(&payload.field, declared_message, panic)));
            apply_outcome(node, outcome);
            Settlement::Done
        }
        TestBody::Async(body) => {
            let field = payload.field.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| body(payload))) {
                Ok(future) => {
                    spawn_settlement(state, node, future, declared_message);
                    Settlement::Pending
                }
                Err(panic) => {
                    apply_outcome(node, Err(panic_failure(&field, declared_message, panic)));
                    Settlement::Done
                }
            }
        }
    }
}

fn spawn_settlement(
    state: &Rc<SuiteState>,
    node: &IsolateRef,
    future: LocalBoxFuture<'static, TestResult>,
    declared_message: bool,
) {
    let weak = Rc::downgrade(state);
    let node = Rc::clone(node);
    tokio::task::spawn_local(async move {
        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let field = test_isolate::field_name(&node).unwrap_or_default();
                Err(panic_failure(&field, declared_message, panic))
            }
        };
        match weak.upgrade() {
            Some(state) => state.settle_async(&node, outcome),
            None => trace!(id = %node.id(), "suite dropped before test settled"),
        }
    });
}

/// A panicking body fails its test. The panic text becomes the message
/// only when the declaration did not provide one.
fn panic_failure(field: &str, declared_message: bool, panic: Box<dyn Any + Send>) -> TestFailure {
    let text = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned());
    debug!(field, panic = text.as_deref().unwrap_or("<non-string panic>"), "test body panicked");
    match text {
        Some(text) if !declared_message => TestFailure::with_message(text),
        _ => TestFailure::new(),
    }
}
