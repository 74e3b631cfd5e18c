//! Suites: a callback of test declarations plus the state that persists
//! between its runs.
//!
//! A suite keeps the tree of its last run as history. Every run rebuilds
//! the tree, reconciling each declaration against that history, so skipped
//! fields keep their verdicts and superseded async tests are canceled.
//! Async test bodies are spawned with `tokio::task::spawn_local`; suites
//! that declare them must run inside a `tokio::task::LocalSet`.

pub mod runtime;
pub mod scope;
pub mod serializer;
pub(crate) mod state;

mod events;

use std::fmt;
use std::rc::Rc;

use tracing::{debug, info};

use crate::core::bus::{Bus, EventName, Subscription, SuiteEvent};
use crate::core::cache::CacheLayer;
use crate::core::ids::SuiteId;
use crate::core::isolate::IsolateRef;
use crate::core::reconciler::{ReconcileStrategy, ReconcilerRegistry};
use crate::core::summary::SuiteResult;
use crate::core::test_isolate::Severity;
use crate::error::VerdictError;

pub use runtime::{Runtime, Settlement};
pub use scope::{DraftCondition, SuiteScope, TestBody, TestDecl, TestPayload};
pub use serializer::SuiteSerializer;
pub use state::{TestFailure, TestResult, ensure};

use state::SuiteState;

type SuiteCallback<I> = Box<dyn Fn(&mut SuiteScope<'_>, &I)>;

pub struct Suite<I> {
    state: Rc<SuiteState>,
    callback: SuiteCallback<I>,
}

/// Configures a [`Suite`] before its first run.
pub struct SuiteBuilder<I> {
    callback: SuiteCallback<I>,
    name: Option<String>,
    caches: Option<Rc<CacheLayer>>,
    strategies: Vec<Rc<dyn ReconcileStrategy>>,
}

impl<I> SuiteBuilder<I> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Share caches with other suites. Suite ids keep their entries apart.
    pub fn cache_layer(mut self, caches: Rc<CacheLayer>) -> Self {
        self.caches = Some(caches);
        self
    }

    /// Register a reconcile strategy after the built-in ones.
    pub fn strategy(mut self, strategy: Rc<dyn ReconcileStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn build(self) -> Suite<I> {
        let suite_id = SuiteId::next();
        let mut registry = ReconcilerRegistry::with_defaults();
        for strategy in self.strategies {
            registry.register(strategy);
        }
        let bus = Bus::new();
        let runtime = Runtime::new(suite_id, bus.clone(), registry);
        let caches = self.caches.unwrap_or_default();
        let state = Rc::new(SuiteState::new(suite_id, self.name, runtime, bus, caches));
        events::wire(&state);
        debug!(%suite_id, name = ?state.name, "suite created");
        Suite {
            state,
            callback: self.callback,
        }
    }
}

impl<I> Suite<I> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&mut SuiteScope<'_>, &I) + 'static,
    {
        Self::builder(callback).build()
    }

    pub fn builder<F>(callback: F) -> SuiteBuilder<I>
    where
        F: Fn(&mut SuiteScope<'_>, &I) + 'static,
    {
        SuiteBuilder {
            callback: Box::new(callback),
            name: None,
            caches: None,
            strategies: Vec::new(),
        }
    }

    pub fn suite_id(&self) -> SuiteId {
        self.state.suite_id
    }

    pub fn name(&self) -> Option<&str> {
        self.state.name.as_deref()
    }

    /// Run the suite callback against `input`.
    ///
    /// Returns as soon as the callback finishes. Async tests keep running
    /// on the local task set; register [`RunOutcome::done`] or await
    /// [`Suite::settled`] to observe their verdicts.
    pub fn run(&self, input: &I) -> RunOutcome {
        let state = &self.state;
        let run_seq = state.run_seq.get() + 1;
        state.run_seq.set(run_seq);
        state.runtime.clear_deferred();
        state.focus.replace(state::Focus::default());
        state.clear_optional();
        debug!(suite_id = %state.suite_id, run_seq, "suite run started");

        state.emit(SuiteEvent::SuiteRunStarted);
        state.runtime.begin_run();
        {
            let _guard = RunGuard { state };
            let mut scope = SuiteScope::new(state);
            (self.callback)(&mut scope, input);
        }
        state.expire_result();
        state.emit(SuiteEvent::SuiteCallbackRunFinished);

        let result = state.result();
        info!(
            suite_id = %state.suite_id,
            run_seq,
            tests = result.test_count,
            errors = result.error_count,
            warnings = result.warn_count,
            pending = result.pending_count,
            "suite callback finished"
        );
        for err in state.runtime.deferred_errors() {
            debug!(suite_id = %state.suite_id, error = %err, "run finished with deferred error");
        }
        RunOutcome {
            state: Rc::clone(state),
            result,
            run_seq,
        }
    }

    /// The result of the latest run, or of the run in progress.
    pub fn get(&self) -> Rc<SuiteResult> {
        self.state.result()
    }

    /// Listen for lifecycle events; `None` listens for all of them.
    pub fn subscribe<F>(&self, event: Option<EventName>, handler: F) -> Subscription
    where
        F: Fn(&SuiteEvent) + 'static,
    {
        let weak = Rc::downgrade(&self.state);
        let wrapped = move |event: &SuiteEvent| {
            if let Some(state) = weak.upgrade() {
                state.expire_result();
            }
            handler(event);
        };
        match event {
            Some(name) => self.state.bus.on(name, wrapped),
            None => self.state.bus.on_any(wrapped),
        }
    }

    /// Forget all history and pending callbacks.
    pub fn reset(&self) {
        self.state.emit(SuiteEvent::ResetSuite);
    }

    /// Return every test of `field` to untested.
    pub fn reset_field(&self, field: &str) {
        self.state.emit(SuiteEvent::ResetField(field.to_string()));
    }

    /// Drop every test of `field` from the tree.
    pub fn remove(&self, field: &str) {
        self.state.emit(SuiteEvent::RemoveField(field.to_string()));
    }

    pub fn is_pending(&self, field: Option<&str>) -> bool {
        self.state.has_pending(field)
    }

    pub fn has_errors(&self, field: Option<&str>) -> bool {
        self.state.has_failures(Severity::Error, field)
    }

    pub fn has_warnings(&self, field: Option<&str>) -> bool {
        self.state.has_failures(Severity::Warn, field)
    }

    /// Root of the latest completed run.
    pub fn dump(&self) -> Option<IsolateRef> {
        self.state.runtime.history_root()
    }

    /// Adopt `root` as the history the next run reconciles against.
    pub fn resume(&self, root: IsolateRef) {
        debug!(suite_id = %self.state.suite_id, "suite resumed from dump");
        self.state.runtime.set_history_root(Some(root));
        self.state.expire_result();
    }

    /// Wait until no test is pending and return the result.
    pub async fn settled(&self) -> Rc<SuiteResult> {
        self.state.wait_quiescent().await;
        self.state.result()
    }

    /// Problems found while reconciling the latest run.
    pub fn deferred_errors(&self) -> Vec<VerdictError> {
        self.state.runtime.deferred_errors()
    }

    pub fn runtime(&self) -> &Runtime {
        &self.state.runtime
    }
}

impl<I> fmt::Debug for Suite<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suite")
            .field("suite_id", &self.state.suite_id)
            .field("name", &self.state.name)
            .finish()
    }
}

/// Closes the run even if the suite callback unwinds.
struct RunGuard<'a> {
    state: &'a SuiteState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.runtime.end_run();
    }
}

/// Returned by [`Suite::run`]: the result at the end of the callback, plus
/// hooks for when async tests finish.
pub struct RunOutcome {
    state: Rc<SuiteState>,
    result: Rc<SuiteResult>,
    run_seq: u64,
}

impl RunOutcome {
    pub fn result(&self) -> Rc<SuiteResult> {
        Rc::clone(&self.result)
    }

    fn is_outdated(&self) -> bool {
        self.state.run_seq.get() != self.run_seq
    }

    /// Call `callback` once nothing is pending. Runs immediately when the
    /// suite is already settled; ignored when a newer run has started.
    pub fn done<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&SuiteResult) + 'static,
    {
        if self.is_outdated() {
            debug!(suite_id = %self.state.suite_id, "done callback ignored for outdated run");
            return self;
        }
        if !self.state.has_pending(None) {
            callback(&self.state.result());
            return self;
        }
        self.state.push_done_callback(Box::new(callback));
        self
    }

    /// Call `callback` once no test of `field` is pending.
    pub fn done_field<F>(&self, field: &str, callback: F) -> &Self
    where
        F: FnOnce(&SuiteResult) + 'static,
    {
        if self.is_outdated() {
            debug!(suite_id = %self.state.suite_id, field, "done callback ignored for outdated run");
            return self;
        }
        if !self.state.has_pending(Some(field)) {
            callback(&self.state.result());
            return self;
        }
        self.state.push_field_callback(field, Box::new(callback));
        self
    }
}

impl std::ops::Deref for RunOutcome {
    type Target = SuiteResult;

    fn deref(&self) -> &SuiteResult {
        &self.result
    }
}

impl fmt::Debug for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOutcome")
            .field("run_seq", &self.run_seq)
            .field("result", &self.result)
            .finish()
    }
}
