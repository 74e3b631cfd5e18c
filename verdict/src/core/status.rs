//! Status machines for isolates and tests.
//!
//! Both machines are closed tables: a transition that is not listed is
//! rejected and leaves the status unchanged. Callers never need to check
//! whether an action is allowed before applying it.

use serde::{Deserialize, Serialize};

/// Lifecycle of any isolate node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolateStatus {
    #[default]
    Initial,
    Pending,
    Done,
}

impl IsolateStatus {
    /// Returns the status reached by moving to `to`, or `None` when the move is rejected.
    pub fn transition(self, to: IsolateStatus) -> Option<IsolateStatus> {
        match (self, to) {
            (IsolateStatus::Initial, IsolateStatus::Pending)
            | (IsolateStatus::Initial, IsolateStatus::Done)
            | (IsolateStatus::Pending, IsolateStatus::Done) => Some(to),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IsolateStatus::Initial => "INITIAL",
            IsolateStatus::Pending => "PENDING",
            IsolateStatus::Done => "DONE",
        }
    }
}

/// Verdict state of a single test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    #[default]
    Untested,
    Skipped,
    Failed,
    Warning,
    Passing,
    Pending,
    Canceled,
    Omitted,
}

/// Requests applied to a [`TestStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestAction {
    /// Skip the test. A pending test is only skipped when `force` is set.
    Skip { force: bool },
    /// Record an error-severity failure.
    Fail,
    /// Record a warn-severity failure.
    Warn,
    Pass,
    SetPending,
    Cancel,
    Omit,
    Reset,
}

impl TestStatus {
    /// Apply `action`, returning the resulting status.
    ///
    /// Rejected actions return `self`. `Reset` is accepted from every state;
    /// it is the only way out of a final verdict.
    pub fn apply(self, action: TestAction) -> TestStatus {
        use TestStatus as S;

        match (self, action) {
            (_, TestAction::Reset) => S::Untested,
            (S::Untested, TestAction::Skip { .. }) => S::Skipped,
            (S::Pending, TestAction::Skip { force: true }) => S::Skipped,
            (S::Untested | S::Pending, TestAction::Fail) => S::Failed,
            (S::Untested | S::Pending, TestAction::Warn) => S::Warning,
            (S::Untested | S::Pending, TestAction::Pass) => S::Passing,
            (S::Untested, TestAction::SetPending) => S::Pending,
            (S::Untested | S::Pending, TestAction::Cancel) => S::Canceled,
            (S::Untested | S::Pending | S::Skipped, TestAction::Omit) => S::Omitted,
            (status, _) => status,
        }
    }

    /// Final statuses only leave through `Reset`.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            TestStatus::Failed
                | TestStatus::Warning
                | TestStatus::Passing
                | TestStatus::Canceled
                | TestStatus::Omitted
        )
    }

    /// Statuses that do not count toward test totals.
    pub fn is_non_actionable(self) -> bool {
        matches!(
            self,
            TestStatus::Skipped | TestStatus::Omitted | TestStatus::Canceled
        )
    }

    /// The test body ran and produced a verdict.
    pub fn is_tested(self) -> bool {
        matches!(
            self,
            TestStatus::Failed | TestStatus::Warning | TestStatus::Passing
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Untested => "UNTESTED",
            TestStatus::Skipped => "SKIPPED",
            TestStatus::Failed => "FAILED",
            TestStatus::Warning => "WARNING",
            TestStatus::Passing => "PASSING",
            TestStatus::Pending => "PENDING",
            TestStatus::Canceled => "CANCELED",
            TestStatus::Omitted => "OMITTED",
        }
    }
}
