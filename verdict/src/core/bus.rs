//! Synchronous lifecycle event bus.
//!
//! Handlers run in registration order, on the emitting stack, before
//! `emit` returns. A handler may emit further events; those are delivered
//! immediately. Each emit iterates a snapshot of the listener list, so
//! handlers added during an emit only see later events.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::core::isolate::IsolateRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    IsolatePending,
    IsolateDone,
    AsyncIsolateDone,
    AllRunningTestsFinished,
    SuiteRunStarted,
    SuiteCallbackRunFinished,
    TestRunStarted,
    TestCompleted,
    ResetField,
    RemoveField,
    ResetSuite,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::IsolatePending => "ISOLATE_PENDING",
            EventName::IsolateDone => "ISOLATE_DONE",
            EventName::AsyncIsolateDone => "ASYNC_ISOLATE_DONE",
            EventName::AllRunningTestsFinished => "ALL_RUNNING_TESTS_FINISHED",
            EventName::SuiteRunStarted => "SUITE_RUN_STARTED",
            EventName::SuiteCallbackRunFinished => "SUITE_CALLBACK_RUN_FINISHED",
            EventName::TestRunStarted => "TEST_RUN_STARTED",
            EventName::TestCompleted => "TEST_COMPLETED",
            EventName::ResetField => "RESET_FIELD",
            EventName::RemoveField => "REMOVE_FIELD",
            EventName::ResetSuite => "RESET_SUITE",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event together with its payload.
#[derive(Debug, Clone)]
pub enum SuiteEvent {
    IsolatePending(IsolateRef),
    IsolateDone(IsolateRef),
    AsyncIsolateDone(IsolateRef),
    AllRunningTestsFinished,
    SuiteRunStarted,
    SuiteCallbackRunFinished,
    TestRunStarted(IsolateRef),
    TestCompleted(IsolateRef),
    ResetField(String),
    RemoveField(String),
    ResetSuite,
}

impl SuiteEvent {
    pub fn name(&self) -> EventName {
        match self {
            SuiteEvent::IsolatePending(_) => EventName::IsolatePending,
            SuiteEvent::IsolateDone(_) => EventName::IsolateDone,
            SuiteEvent::AsyncIsolateDone(_) => EventName::AsyncIsolateDone,
            SuiteEvent::AllRunningTestsFinished => EventName::AllRunningTestsFinished,
            SuiteEvent::SuiteRunStarted => EventName::SuiteRunStarted,
            SuiteEvent::SuiteCallbackRunFinished => EventName::SuiteCallbackRunFinished,
            SuiteEvent::TestRunStarted(_) => EventName::TestRunStarted,
            SuiteEvent::TestCompleted(_) => EventName::TestCompleted,
            SuiteEvent::ResetField(_) => EventName::ResetField,
            SuiteEvent::RemoveField(_) => EventName::RemoveField,
            SuiteEvent::ResetSuite => EventName::ResetSuite,
        }
    }

    pub fn isolate(&self) -> Option<&IsolateRef> {
        match self {
            SuiteEvent::IsolatePending(node)
            | SuiteEvent::IsolateDone(node)
            | SuiteEvent::AsyncIsolateDone(node)
            | SuiteEvent::TestRunStarted(node)
            | SuiteEvent::TestCompleted(node) => Some(node),
            _ => None,
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        match self {
            SuiteEvent::ResetField(field) | SuiteEvent::RemoveField(field) => Some(field),
            _ => None,
        }
    }
}

type Handler = Rc<dyn Fn(&SuiteEvent)>;

struct Listener {
    id: u64,
    filter: Option<EventName>,
    handler: Handler,
}

type Listeners = RefCell<Vec<Listener>>;

#[derive(Clone, Default)]
pub struct Bus {
    listeners: Rc<Listeners>,
    next_id: Rc<Cell<u64>>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for one event name.
    pub fn on<F>(&self, event: EventName, handler: F) -> Subscription
    where
        F: Fn(&SuiteEvent) + 'static,
    {
        self.register(Some(event), Rc::new(handler))
    }

    /// Listen for every event.
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SuiteEvent) + 'static,
    {
        self.register(None, Rc::new(handler))
    }

    fn register(&self, filter: Option<EventName>, handler: Handler) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            filter,
            handler,
        });
        Subscription {
            id,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    pub fn emit(&self, event: SuiteEvent) {
        let name = event.name();
        let handlers: Vec<Handler> = self
            .listeners
            .borrow()
            .iter()
            .filter(|listener| listener.filter.is_none_or(|filter| filter == name))
            .map(|listener| Rc::clone(&listener.handler))
            .collect();
        trace!(event = name.as_str(), handlers = handlers.len(), "emit");
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Handle returned by [`Bus::on`]. Dropping it keeps the listener registered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().retain(|listener| listener.id != self.id);
        }
    }
}
