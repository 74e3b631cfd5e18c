//! Process-unique identifiers for isolates and suites.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_ISOLATE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUITE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a single isolate node. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IsolateId(u64);

impl IsolateId {
    pub fn next() -> Self {
        Self(NEXT_ISOLATE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for IsolateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "isolate-{}", self.0)
    }
}

/// Identity of a suite instance. Prefixes every cache key the suite owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SuiteId(u64);

impl SuiteId {
    pub fn next() -> Self {
        Self(NEXT_SUITE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "suite-{}", self.0)
    }
}
