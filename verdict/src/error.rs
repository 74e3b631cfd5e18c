//! Error type shared by the suite runtime and the isolate tree.

use thiserror::Error;

/// Failures raised by the suite runtime.
///
/// Structural misuse (`NoActiveRuntime`) is returned synchronously to the
/// caller. Declaration-order problems found during reconciliation are
/// recorded as deferred errors on the suite instead, so the running suite
/// callback is never interrupted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerdictError {
    #[error("no active suite run: isolates can only be created inside a suite callback")]
    NoActiveRuntime,
    #[error(
        "test order changed: expected '{expected}' at this position but found '{found}'; \
         wrap conditionally ordered tests in `each` or give them keys"
    )]
    TestOrderChanged { expected: String, found: String },
    #[error("duplicate isolate key '{key}' under the same parent")]
    DuplicateKey { key: String },
    #[error("serialize isolate tree: {0}")]
    Serialization(String),
    #[error("invalid isolate dump: {0}")]
    InvalidDump(String),
}

pub type VerdictResult<T> = Result<T, VerdictError>;
