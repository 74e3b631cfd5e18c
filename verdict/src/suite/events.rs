//! Lifecycle handlers every suite installs on its bus.

use std::rc::Rc;

use tracing::debug;

use crate::core::bus::{EventName, SuiteEvent};
use crate::core::test_isolate;
use crate::core::walker;
use crate::suite::state::SuiteState;

/// Install the suite's internal handlers. Handlers hold the state weakly,
/// so the bus never keeps a dropped suite alive.
pub(crate) fn wire(state: &Rc<SuiteState>) {
    let weak = Rc::downgrade(state);
    // Registered first: every later listener sees a freshly computed result.
    state.bus.on_any(move |_| {
        if let Some(state) = weak.upgrade() {
            state.expire_result();
        }
    });

    on(state, EventName::IsolatePending, |_, event| {
        if let Some(node) = event.isolate() {
            test_isolate::set_pending(node);
        }
    });

    on(state, EventName::IsolateDone, |state, event| {
        if let Some(node) = event.isolate() {
            if test_isolate::is_test(node) {
                state.emit(SuiteEvent::TestCompleted(Rc::clone(node)));
            }
        }
    });

    on(state, EventName::AsyncIsolateDone, |state, event| {
        if let Some(node) = event.isolate() {
            if !test_isolate::is_canceled(node) {
                if let Some(field) = test_isolate::field_name(node) {
                    state.run_field_callbacks(&field);
                }
            }
        }
        if !state.has_pending(None) {
            state.emit(SuiteEvent::AllRunningTestsFinished);
        }
    });

    on(state, EventName::AllRunningTestsFinished, |state, _| {
        state.omit_optional_fields();
        state.run_done_callbacks();
        state.notify_quiescent();
    });

    on(state, EventName::SuiteRunStarted, |state, _| {
        state.reset_callbacks();
    });

    on(state, EventName::SuiteCallbackRunFinished, |state, _| {
        state.omit_optional_fields();
        if !state.has_pending(None) {
            state.emit(SuiteEvent::AllRunningTestsFinished);
        }
    });

    on(state, EventName::ResetField, |state, event| {
        let (Some(field), Some(root)) = (event.field_name(), state.runtime.available_root())
        else {
            return;
        };
        walker::for_each(&root, |node| {
            if test_isolate::matches_field(node, field) {
                test_isolate::reset(node);
            }
        });
        debug!(suite_id = %state.suite_id, field, "field reset");
    });

    on(state, EventName::RemoveField, |state, event| {
        let (Some(field), Some(root)) = (event.field_name(), state.runtime.available_root())
        else {
            return;
        };
        let removed = walker::remove_where(&root, |node| test_isolate::matches_field(node, field));
        debug!(suite_id = %state.suite_id, field, removed, "field removed");
    });

    on(state, EventName::ResetSuite, |state, _| {
        state.reset_callbacks();
        state.runtime.reset();
    });
}

/// Register a handler that expires the suite result around every call, so
/// no structural change can leave a stale result behind.
fn on<F>(state: &Rc<SuiteState>, event: EventName, handler: F)
where
    F: Fn(&SuiteState, &SuiteEvent) + 'static,
{
    let weak = Rc::downgrade(state);
    state.bus.on(event, move |event| {
        let Some(state) = weak.upgrade() else {
            return;
        };
        state.expire_result();
        handler(&state, event);
        state.expire_result();
    });
}
