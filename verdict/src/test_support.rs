//! Test-only helpers for building isolate trees and running suites.

use std::future::Future;
use std::path::PathBuf;

use serde_json::Value;
use tempfile::TempDir;
use tokio::task::LocalSet;

use crate::core::isolate::{Isolate, IsolateKind, IsolatePayload, IsolateRef};
use crate::core::test_isolate::{self, Severity, TestData};

/// A detached test isolate for `field` with default data.
pub fn test_node(field: &str) -> IsolateRef {
    test_isolate::new_test(TestData::new(field), None)
}

/// A detached warn-severity test isolate.
pub fn warn_test_node(field: &str) -> IsolateRef {
    let mut data = TestData::new(field);
    data.severity = Severity::Warn;
    test_isolate::new_test(data, None)
}

/// A suite root holding `children` in order.
pub fn suite_root(children: Vec<IsolateRef>) -> IsolateRef {
    let root = Isolate::new(IsolateKind::Suite, IsolatePayload::None, None);
    for child in children {
        Isolate::append_child(&root, child);
    }
    root
}

/// Append `child` under `parent`.
pub fn attach(parent: &IsolateRef, child: &IsolateRef) {
    Isolate::append_child(parent, child.clone());
}

/// A leaf carrying `label` as its custom payload.
pub fn labeled(label: &str) -> IsolateRef {
    labeled_tree(label, Vec::new())
}

/// A labeled node holding `children` in order.
pub fn labeled_tree(label: &str, children: Vec<IsolateRef>) -> IsolateRef {
    let node = Isolate::new(
        IsolateKind::Custom("Labeled".to_string()),
        IsolatePayload::Custom(Value::String(label.to_string())),
        None,
    );
    for child in children {
        Isolate::append_child(&node, child);
    }
    node
}

/// The label of a node built by [`labeled`] or [`labeled_tree`].
pub fn label_of(node: &IsolateRef) -> String {
    match &*node.payload() {
        IsolatePayload::Custom(Value::String(label)) => label.clone(),
        _ => String::new(),
    }
}

/// Drive `future` inside a fresh `LocalSet`, as async suites require.
pub async fn local<F>(future: F) -> F::Output
where
    F: Future,
{
    LocalSet::new().run_until(future).await
}

/// A temporary directory holding a rule file and an input document.
pub struct TempCheck {
    pub dir: TempDir,
    pub rules_path: PathBuf,
    pub input_path: PathBuf,
}

impl TempCheck {
    pub fn new(rules: &str, input: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let rules_path = dir.path().join("rules.toml");
        let input_path = dir.path().join("input.json");
        std::fs::write(&rules_path, rules).expect("write rules");
        std::fs::write(&input_path, input).expect("write input");
        Self {
            dir,
            rules_path,
            input_path,
        }
    }
}
