//! Run-scoped caches keyed by exact dependency lists.
//!
//! Keys are compared element by element with `==`, so two keys hit the same
//! entry only when every dependency is equal. Suite caches always put the
//! suite id first, which keeps suites sharing a [`CacheLayer`] apart.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};
use tracing::trace;

use crate::core::aggregate::PreAggregation;
use crate::core::ids::SuiteId;
use crate::core::isolate::IsolateRef;
use crate::core::summary::SuiteResult;

pub type CacheKey = Vec<Value>;

#[derive(Debug)]
pub struct Cache<T> {
    entries: RefCell<Vec<(CacheKey, T)>>,
}

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }
}

impl<T: Clone> Cache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[Value]) -> Option<T> {
        self.entries
            .borrow()
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, value)| value.clone())
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// `compute` runs without any borrow held, so it may read this cache.
    pub fn invoke<F>(&self, key: &[Value], compute: F) -> T
    where
        F: FnOnce() -> T,
    {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = compute();
        let mut entries = self.entries.borrow_mut();
        entries.retain(|(k, _)| k.as_slice() != key);
        entries.push((key.to_vec(), value.clone()));
        value
    }

    pub fn set(&self, key: &[Value], value: T) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|(k, _)| k.as_slice() != key);
        entries.push((key.to_vec(), value));
    }

    /// Drop the entry for `key`. Returns `true` if one existed.
    pub fn invalidate(&self, key: &[Value]) -> bool {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|(k, _)| k.as_slice() != key);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// The three caches a suite reads through. Share one layer between suites
/// with `Rc` when they should live in a common cache space.
#[derive(Debug, Default)]
pub struct CacheLayer {
    pub suite_results: Cache<Rc<SuiteResult>>,
    pub pre_aggregations: Cache<Rc<PreAggregation>>,
    pub test_memo: Cache<IsolateRef>,
}

impl CacheLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suite_key(suite_id: SuiteId) -> CacheKey {
        vec![json!(suite_id.get())]
    }

    /// Expire the suite result and the pre-aggregation it is derived from.
    pub fn expire_suite_result(&self, suite_id: SuiteId) {
        let key = Self::suite_key(suite_id);
        let result = self.suite_results.invalidate(&key);
        let aggregation = self.pre_aggregations.invalidate(&key);
        if result || aggregation {
            trace!(%suite_id, "suite result expired");
        }
    }
}
