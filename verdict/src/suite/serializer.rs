//! Persisting a suite's verdicts and resuming from them.

use serde_json::Value;

use crate::core::isolate::IsolateRef;
use crate::core::serializer::{self, DATA_SEVERITY, DATA_TEST_STATUS, KEY_STATUS};
use crate::core::status::{IsolateStatus, TestStatus};
use crate::error::VerdictError;
use crate::suite::Suite;

/// Serializes only what a later process can use: settled verdicts.
///
/// Severity is dropped (declarations carry it again on the next run), and
/// test statuses other than passing, failing, and warning are dropped so
/// those tests come back untested.
pub struct SuiteSerializer;

impl SuiteSerializer {
    pub fn replacer(key: &str, value: Value) -> Option<Value> {
        match key {
            DATA_SEVERITY => None,
            DATA_TEST_STATUS => {
                let kept = [TestStatus::Failed, TestStatus::Passing, TestStatus::Warning];
                value
                    .as_str()
                    .is_some_and(|status| kept.iter().any(|s| s.as_str() == status))
                    .then_some(value)
            }
            KEY_STATUS => (value.as_str() == Some(IsolateStatus::Done.as_str())).then_some(value),
            _ => Some(value),
        }
    }

    pub fn serialize<I>(suite: &Suite<I>) -> Result<Value, VerdictError> {
        let root = suite
            .dump()
            .ok_or_else(|| VerdictError::Serialization("suite has not run yet".to_string()))?;
        Ok(serializer::serialize(&root, Self::replacer))
    }

    pub fn serialize_to_string<I>(suite: &Suite<I>) -> Result<String, VerdictError> {
        let value = Self::serialize(suite)?;
        serde_json::to_string(&value).map_err(|err| VerdictError::Serialization(err.to_string()))
    }

    pub fn deserialize(value: &Value) -> Result<IsolateRef, VerdictError> {
        serializer::deserialize(value)
    }

    /// Make the dump the history `suite` reconciles its next run against.
    pub fn resume<I>(suite: &Suite<I>, dump: &Value) -> Result<(), VerdictError> {
        let root = Self::deserialize(dump)?;
        suite.resume(root);
        Ok(())
    }

    pub fn resume_str<I>(suite: &Suite<I>, dump: &str) -> Result<(), VerdictError> {
        let root = serializer::deserialize_str(dump)?;
        suite.resume(root);
        Ok(())
    }
}
