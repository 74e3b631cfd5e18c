//! Test payloads and the verdict operations applied to test isolates.
//!
//! Every operation is a no-op on non-test isolates, and every status change
//! goes through [`TestStatus::apply`], so a final verdict can only be left
//! through [`reset`].

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::isolate::{Isolate, IsolateKind, IsolatePayload, IsolateRef};
use crate::core::signal::CancelSignal;
use crate::core::status::{TestAction, TestStatus};

/// How a failing test is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warn,
}

#[derive(Debug, Clone)]
pub struct TestData {
    pub field_name: String,
    pub group_name: Option<String>,
    pub message: Option<String>,
    pub severity: Severity,
    pub status: TestStatus,
    pub is_async: bool,
    pub signal: CancelSignal,
}

impl TestData {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            group_name: None,
            message: None,
            severity: Severity::Error,
            status: TestStatus::Untested,
            is_async: false,
            signal: CancelSignal::new(),
        }
    }
}

/// Build a detached test isolate for `data`.
pub fn new_test(data: TestData, key: Option<String>) -> IsolateRef {
    Isolate::new(IsolateKind::Test, IsolatePayload::Test(data), key)
}

pub fn is_test(isolate: &Isolate) -> bool {
    isolate.kind() == &IsolateKind::Test && isolate.test_data().is_some()
}

pub fn field_name(isolate: &Isolate) -> Option<String> {
    isolate.test_data().map(|data| data.field_name.clone())
}

pub fn group_name(isolate: &Isolate) -> Option<String> {
    isolate.test_data().and_then(|data| data.group_name.clone())
}

pub fn message(isolate: &Isolate) -> Option<String> {
    isolate.test_data().and_then(|data| data.message.clone())
}

pub fn status(isolate: &Isolate) -> Option<TestStatus> {
    isolate.test_data().map(|data| data.status)
}

pub fn severity(isolate: &Isolate) -> Option<Severity> {
    isolate.test_data().map(|data| data.severity)
}

pub fn signal(isolate: &Isolate) -> Option<CancelSignal> {
    isolate.test_data().map(|data| data.signal.clone())
}

fn has_status(isolate: &Isolate, expected: TestStatus) -> bool {
    status(isolate) == Some(expected)
}

fn apply(isolate: &Isolate, action: TestAction) -> bool {
    let Some(mut data) = isolate.test_data_mut() else {
        return false;
    };
    let next = data.status.apply(action);
    if next == data.status {
        trace!(field = %data.field_name, status = data.status.as_str(), ?action, "test action ignored");
        return false;
    }
    trace!(field = %data.field_name, from = data.status.as_str(), to = next.as_str(), "test status changed");
    data.status = next;
    true
}

/// Record a failure. Warn-severity tests land in `WARNING` instead of `FAILED`.
pub fn fail(isolate: &Isolate) -> bool {
    let action = match severity(isolate) {
        Some(Severity::Warn) => TestAction::Warn,
        _ => TestAction::Fail,
    };
    apply(isolate, action)
}

/// Record a failure and replace the declared message when `message` is given.
pub fn fail_with(isolate: &Isolate, message: Option<String>) -> bool {
    let accepts_verdict = matches!(
        status(isolate),
        Some(TestStatus::Untested | TestStatus::Pending)
    );
    if let (true, Some(message)) = (accepts_verdict, message) {
        if let Some(mut data) = isolate.test_data_mut() {
            data.message = Some(message);
        }
    }
    fail(isolate)
}

pub fn pass(isolate: &Isolate) -> bool {
    apply(isolate, TestAction::Pass)
}

pub fn skip(isolate: &Isolate, force: bool) -> bool {
    apply(isolate, TestAction::Skip { force })
}

pub fn set_pending(isolate: &Isolate) -> bool {
    apply(isolate, TestAction::SetPending)
}

pub fn omit(isolate: &Isolate) -> bool {
    apply(isolate, TestAction::Omit)
}

/// Cancel the test and abort its in-flight body, if any.
pub fn cancel(isolate: &Isolate) -> bool {
    let changed = apply(isolate, TestAction::Cancel);
    if changed {
        if let Some(signal) = signal(isolate) {
            signal.cancel();
        }
    }
    changed
}

/// Return the test to `UNTESTED` with a fresh cancel signal.
pub fn reset(isolate: &Isolate) -> bool {
    let changed = apply(isolate, TestAction::Reset);
    if let Some(mut data) = isolate.test_data_mut() {
        data.signal = CancelSignal::new();
    }
    changed
}

/// Lower the severity to warn. Final verdicts keep their severity.
pub fn warn(isolate: &Isolate) -> bool {
    let Some(mut data) = isolate.test_data_mut() else {
        return false;
    };
    if data.status.is_final() {
        return false;
    }
    data.severity = Severity::Warn;
    true
}

pub fn is_failing(isolate: &Isolate) -> bool {
    has_status(isolate, TestStatus::Failed)
}

pub fn is_warning(isolate: &Isolate) -> bool {
    has_status(isolate, TestStatus::Warning)
}

pub fn is_passing(isolate: &Isolate) -> bool {
    has_status(isolate, TestStatus::Passing)
}

pub fn is_pending(isolate: &Isolate) -> bool {
    has_status(isolate, TestStatus::Pending)
}

pub fn is_canceled(isolate: &Isolate) -> bool {
    has_status(isolate, TestStatus::Canceled)
}

pub fn is_skipped(isolate: &Isolate) -> bool {
    has_status(isolate, TestStatus::Skipped)
}

pub fn is_omitted(isolate: &Isolate) -> bool {
    has_status(isolate, TestStatus::Omitted)
}

pub fn is_untested(isolate: &Isolate) -> bool {
    has_status(isolate, TestStatus::Untested)
}

pub fn is_async(isolate: &Isolate) -> bool {
    isolate.test_data().is_some_and(|data| data.is_async)
}

pub fn matches_field(isolate: &Isolate, field: &str) -> bool {
    isolate
        .test_data()
        .is_some_and(|data| data.field_name == field)
}

/// Same field and same group.
pub fn same_profile(a: &Isolate, b: &Isolate) -> bool {
    match (a.test_data(), b.test_data()) {
        (Some(a), Some(b)) => a.field_name == b.field_name && a.group_name == b.group_name,
        _ => false,
    }
}
