//! The per-suite runtime that builds each run's isolate tree.
//!
//! A run owns a stack of frames. The top frame is the isolate whose body is
//! executing, together with its counterpart from the previous run and a
//! cursor over that counterpart's children. Every new isolate is paired
//! with the history child at the cursor (or with the same key) and the
//! reconciler decides which of the two joins the new tree.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tracing::{debug, error, trace};

use crate::core::bus::{Bus, SuiteEvent};
use crate::core::ids::SuiteId;
use crate::core::isolate::{Isolate, IsolateKind, IsolatePayload, IsolateRef};
use crate::core::reconciler::ReconcilerRegistry;
use crate::core::status::IsolateStatus;
use crate::core::test_isolate;
use crate::error::{VerdictError, VerdictResult};

/// How an isolate body finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Done,
    /// The body started async work that settles the isolate later.
    Pending,
}

struct Frame {
    node: IsolateRef,
    history: Option<IsolateRef>,
    cursor: usize,
    history_dropped: bool,
    keys: HashSet<String>,
}

impl Frame {
    fn new(node: IsolateRef, history: Option<IsolateRef>) -> Self {
        Self {
            node,
            history,
            cursor: 0,
            history_dropped: false,
            keys: HashSet::new(),
        }
    }

    fn history_child(&self, key: Option<&str>) -> Option<IsolateRef> {
        if self.history_dropped {
            return None;
        }
        let history = self.history.as_ref()?;
        match key {
            Some(key) => history.child_by_key(key),
            None => history.child_at(self.cursor),
        }
    }
}

/// Pops the frame pushed for a body, also when the body unwinds.
struct FrameGuard<'a> {
    frames: &'a RefCell<Vec<Frame>>,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.frames.borrow_mut().pop();
    }
}

pub struct Runtime {
    suite_id: SuiteId,
    bus: Bus,
    reconciler: ReconcilerRegistry,
    history_root: RefCell<Option<IsolateRef>>,
    frames: RefCell<Vec<Frame>>,
    deferred: RefCell<Vec<VerdictError>>,
}

impl Runtime {
    pub fn new(suite_id: SuiteId, bus: Bus, reconciler: ReconcilerRegistry) -> Self {
        Self {
            suite_id,
            bus,
            reconciler,
            history_root: RefCell::new(None),
            frames: RefCell::new(Vec::new()),
            deferred: RefCell::new(Vec::new()),
        }
    }

    pub fn suite_id(&self) -> SuiteId {
        self.suite_id
    }

    pub fn reconciler(&self) -> &ReconcilerRegistry {
        &self.reconciler
    }

    pub fn is_running(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    /// Root of the most recently completed run.
    pub fn history_root(&self) -> Option<IsolateRef> {
        self.history_root.borrow().clone()
    }

    pub fn set_history_root(&self, root: Option<IsolateRef>) {
        *self.history_root.borrow_mut() = root;
    }

    /// The tree queries should read: the in-progress root during a run,
    /// otherwise the last completed one.
    pub fn available_root(&self) -> Option<IsolateRef> {
        if let Some(frame) = self.frames.borrow().first() {
            return Some(Rc::clone(&frame.node));
        }
        self.history_root()
    }

    /// Position the next isolate will take under the current parent.
    pub fn current_cursor(&self) -> Option<usize> {
        self.frames.borrow().last().map(|frame| frame.cursor)
    }

    pub fn current_parent(&self) -> Option<IsolateRef> {
        self.frames
            .borrow()
            .last()
            .map(|frame| Rc::clone(&frame.node))
    }

    /// Forget the previous run.
    pub fn reset(&self) {
        debug!(suite_id = %self.suite_id, "runtime history cleared");
        self.set_history_root(None);
    }

    /// Start a run: a fresh root paired with the previous root.
    pub(crate) fn begin_run(&self) -> IsolateRef {
        let root = Isolate::new(IsolateKind::Suite, IsolatePayload::None, None);
        let history = self.history_root();
        self.frames
            .replace(vec![Frame::new(Rc::clone(&root), history)]);
        root
    }

    /// Finish a run: the new root becomes the history for the next one.
    pub(crate) fn end_run(&self) -> Option<IsolateRef> {
        let frame = self.frames.borrow_mut().drain(..).next()?;
        let root = frame.node;
        self.set_history_root(Some(Rc::clone(&root)));
        if root.transition(IsolateStatus::Done) {
            self.bus.emit(SuiteEvent::IsolateDone(Rc::clone(&root)));
        }
        Some(root)
    }

    /// Declare an isolate under the current parent.
    ///
    /// The new node is reconciled against its history counterpart before
    /// anything else happens. When the fresh node is kept, `body` runs with
    /// it as the current parent, so isolates it declares become its
    /// children. When a history node is kept instead, `body` is skipped and
    /// the history node is returned.
    pub fn create<F>(
        &self,
        kind: IsolateKind,
        payload: IsolatePayload,
        key: Option<String>,
        body: F,
    ) -> VerdictResult<IsolateRef>
    where
        F: FnOnce(&IsolateRef) -> Settlement,
    {
        let (parent, history) = {
            let frames = self.frames.borrow();
            let frame = frames.last().ok_or(VerdictError::NoActiveRuntime)?;
            (Rc::clone(&frame.node), frame.history_child(key.as_deref()))
        };

        let fresh = Isolate::new(kind, payload, key);
        fresh.set_parent(&parent);
        let next = self.pick_next(&fresh, history.as_ref());
        self.attach(Rc::clone(&next))?;

        if Rc::ptr_eq(&next, &fresh) {
            let child_history = history.filter(|h| h.same_kind(&fresh));
            self.run_body(&fresh, child_history, body);
        } else {
            trace!(kind = next.kind().as_str(), id = %next.id(), "kept isolate from previous run");
        }
        Ok(next)
    }

    /// Append an existing node as the next child without reconciling it.
    pub(crate) fn attach(&self, node: IsolateRef) -> VerdictResult<()> {
        let duplicate = {
            let mut frames = self.frames.borrow_mut();
            let frame = frames.last_mut().ok_or(VerdictError::NoActiveRuntime)?;
            let duplicate = node
                .key()
                .is_some_and(|key| !frame.keys.insert(key.to_string()));
            Isolate::append_child(&frame.node, Rc::clone(&node));
            frame.cursor += 1;
            duplicate
        };
        if duplicate {
            let key = node.key().unwrap_or_default().to_string();
            self.defer(VerdictError::DuplicateKey { key });
        }
        Ok(())
    }

    /// Cancel the pending test at the cursor's history slot when `keep`
    /// takes that slot without reconciliation.
    pub(crate) fn supersede_history_at_cursor(&self, keep: &IsolateRef) -> bool {
        let history = self
            .frames
            .borrow()
            .last()
            .and_then(|frame| frame.history_child(None));
        let Some(history) = history else {
            return false;
        };
        if Rc::ptr_eq(&history, keep) || !test_isolate::is_pending(&history) {
            return false;
        }
        debug!(id = %history.id(), "canceling pending test displaced by a reused one");
        test_isolate::cancel(&history)
    }

    fn pick_next(&self, current: &IsolateRef, history: Option<&IsolateRef>) -> IsolateRef {
        let Some(history) = history else {
            return Rc::clone(current);
        };
        if !current.same_kind(history) {
            return Rc::clone(current);
        }
        match self.reconciler.reconcile(current, history) {
            Ok(Some(next)) => next,
            Ok(None) => Rc::clone(current),
            Err(err) => {
                if let Some(frame) = self.frames.borrow_mut().last_mut() {
                    frame.history_dropped = true;
                }
                self.defer(err);
                Rc::clone(current)
            }
        }
    }

    fn run_body<F>(&self, node: &IsolateRef, history: Option<IsolateRef>, body: F)
    where
        F: FnOnce(&IsolateRef) -> Settlement,
    {
        self.frames
            .borrow_mut()
            .push(Frame::new(Rc::clone(node), history));
        let settlement = {
            let _guard = FrameGuard {
                frames: &self.frames,
            };
            body(node)
        };
        let (status, event) = match settlement {
            Settlement::Done => (IsolateStatus::Done, SuiteEvent::IsolateDone(Rc::clone(node))),
            Settlement::Pending => (
                IsolateStatus::Pending,
                SuiteEvent::IsolatePending(Rc::clone(node)),
            ),
        };
        if node.transition(status) {
            self.bus.emit(event);
        }
    }

    /// Record an error to report after the run instead of failing it.
    pub(crate) fn defer(&self, err: VerdictError) {
        error!(suite_id = %self.suite_id, error = %err, "deferred suite error");
        self.deferred.borrow_mut().push(err);
    }

    pub fn deferred_errors(&self) -> Vec<VerdictError> {
        self.deferred.borrow().clone()
    }

    pub(crate) fn clear_deferred(&self) {
        self.deferred.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_isolate::TestData;

    fn runtime() -> Runtime {
        Runtime::new(SuiteId::next(), Bus::new(), ReconcilerRegistry::with_defaults())
    }

    fn declare(runtime: &Runtime, field: &str) -> IsolateRef {
        runtime
            .create(
                IsolateKind::Test,
                IsolatePayload::Test(TestData::new(field)),
                None,
                |node| {
                    test_isolate::pass(node);
                    Settlement::Done
                },
            )
            .expect("create")
    }

    #[test]
    fn create_outside_a_run_fails() {
        let runtime = runtime();
        let err = runtime
            .create(IsolateKind::Group, IsolatePayload::None, None, |_| {
                Settlement::Done
            })
            .expect_err("no run");
        assert_eq!(err, VerdictError::NoActiveRuntime);
    }

    #[test]
    fn nested_bodies_build_children() {
        let runtime = runtime();
        let root = runtime.begin_run();
        let group = runtime
            .create(IsolateKind::Group, IsolatePayload::None, None, |_| {
                declare(&runtime, "a");
                declare(&runtime, "b");
                Settlement::Done
            })
            .expect("group");
        runtime.end_run();

        assert_eq!(root.child_count(), 1);
        assert_eq!(group.child_count(), 2);
        assert_eq!(group.status(), IsolateStatus::Done);
        assert!(!runtime.is_running());
        assert!(Rc::ptr_eq(&runtime.history_root().expect("history"), &root));
    }

    #[test]
    fn history_pairs_by_position() {
        let runtime = runtime();
        runtime.begin_run();
        let first = declare(&runtime, "a");
        runtime.end_run();

        runtime.begin_run();
        let second = runtime
            .create(
                IsolateKind::Test,
                IsolatePayload::Test(TestData::new("a")),
                None,
                |node| {
                    test_isolate::skip(node, false);
                    Settlement::Done
                },
            )
            .expect("create");
        runtime.end_run();

        assert!(!Rc::ptr_eq(&first, &second));
        assert!(runtime.deferred_errors().is_empty());
    }

    #[test]
    fn order_change_is_deferred_and_drops_remaining_history() {
        let runtime = runtime();
        runtime.begin_run();
        declare(&runtime, "a");
        declare(&runtime, "b");
        runtime.end_run();

        runtime.begin_run();
        declare(&runtime, "b");
        declare(&runtime, "a");
        runtime.end_run();

        let errors = runtime.deferred_errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], VerdictError::TestOrderChanged { .. }));
    }

    #[test]
    fn duplicate_keys_are_deferred() {
        let runtime = runtime();
        runtime.begin_run();
        for _ in 0..2 {
            runtime
                .create(
                    IsolateKind::Group,
                    IsolatePayload::None,
                    Some("same".to_string()),
                    |_| Settlement::Done,
                )
                .expect("create");
        }
        runtime.end_run();

        assert_eq!(
            runtime.deferred_errors(),
            vec![VerdictError::DuplicateKey {
                key: "same".to_string()
            }]
        );
    }

    #[test]
    fn superseding_cancels_pending_history_only() {
        let runtime = runtime();
        runtime.begin_run();
        let pending = runtime
            .create(
                IsolateKind::Test,
                IsolatePayload::Test(TestData::new("a")),
                None,
                |node| {
                    test_isolate::set_pending(node);
                    Settlement::Pending
                },
            )
            .expect("create");
        runtime.end_run();
        assert!(test_isolate::is_pending(&pending));

        runtime.begin_run();
        let reused = test_isolate::new_test(TestData::new("a"), None);
        assert!(!runtime.supersede_history_at_cursor(&pending));
        assert!(runtime.supersede_history_at_cursor(&reused));
        runtime.end_run();

        assert!(test_isolate::is_canceled(&pending));
        assert!(test_isolate::signal(&pending).expect("signal").is_canceled());
    }

    #[test]
    fn available_root_prefers_running_tree() {
        let runtime = runtime();
        assert!(runtime.available_root().is_none());
        let root = runtime.begin_run();
        assert!(Rc::ptr_eq(&runtime.available_root().expect("root"), &root));
        runtime.end_run();
        runtime.reset();
        assert!(runtime.available_root().is_none());
    }
}
