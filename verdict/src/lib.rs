//! Validation-suite execution engine.
//!
//! A suite is a callback that declares tests. Each run rebuilds a tree of
//! isolates from those declarations and reconciles it against the tree of
//! the previous run, so verdicts survive between runs, superseded async
//! tests are canceled, and results stay consistent while async tests are
//! still in flight. The crate is split the same way throughout:
//!
//! - **[`core`]**: The isolate tree and pure logic over it (status machines,
//!   walker, reconciler, caches, event bus, aggregation, summaries,
//!   serialization). No I/O, fully testable in isolation.
//! - **[`suite`]**: Orchestration. The per-suite runtime, the declaration
//!   scope handed to suite callbacks, event wiring, and async settlement.
//! - **[`io`]**: Side-effecting helpers for the CLI (rule files).
//!
//! [`check`] coordinates rule files with suites to implement the CLI
//! commands.

pub mod check;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod suite;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::core::bus::{EventName, Subscription, SuiteEvent};
pub use crate::core::cache::CacheLayer;
pub use crate::core::isolate::{IsolateKind, IsolatePayload, IsolateRef};
pub use crate::core::summary::SuiteResult;
pub use crate::error::{VerdictError, VerdictResult};
pub use crate::suite::{
    RunOutcome, Suite, SuiteBuilder, SuiteScope, SuiteSerializer, TestBody, TestDecl,
    TestFailure, TestPayload, TestResult, ensure,
};
