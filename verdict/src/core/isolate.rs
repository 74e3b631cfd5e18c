//! Isolate nodes: the unit of structure in a suite run.
//!
//! A run builds a fresh tree of isolates. Each node owns its children and
//! holds a weak link to its parent, so dropping the root frees the whole
//! tree. Nodes reused from a previous run are shared by `Rc`, which is what
//! lets a pending async test keep settling into whichever tree holds it.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::core::ids::IsolateId;
use crate::core::signal::DebounceTimer;
use crate::core::status::IsolateStatus;
use crate::core::test_isolate::TestData;

pub type IsolateRef = Rc<Isolate>;

/// Tag naming what kind of isolate a node is. Reconciliation only pairs
/// nodes of the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IsolateKind {
    Suite,
    Test,
    Group,
    Each,
    OmitWhen,
    SkipWhen,
    Debounce,
    Custom(String),
}

impl IsolateKind {
    pub fn as_str(&self) -> &str {
        match self {
            IsolateKind::Suite => "Suite",
            IsolateKind::Test => "Test",
            IsolateKind::Group => "Group",
            IsolateKind::Each => "Each",
            IsolateKind::OmitWhen => "OmitWhen",
            IsolateKind::SkipWhen => "SkipWhen",
            IsolateKind::Debounce => "Debounce",
            IsolateKind::Custom(name) => name,
        }
    }

    /// Parse a serialized kind tag. Unknown tags become [`IsolateKind::Custom`].
    pub fn parse(tag: &str) -> IsolateKind {
        match tag {
            "Suite" => IsolateKind::Suite,
            "Test" => IsolateKind::Test,
            "Group" => IsolateKind::Group,
            "Each" => IsolateKind::Each,
            "OmitWhen" => IsolateKind::OmitWhen,
            "SkipWhen" => IsolateKind::SkipWhen,
            "Debounce" => IsolateKind::Debounce,
            other => IsolateKind::Custom(other.to_string()),
        }
    }

    /// Children of these kinds may change order between runs.
    pub fn allows_reorder(&self) -> bool {
        matches!(self, IsolateKind::Each)
    }
}

/// Kind-specific data carried by a node.
#[derive(Debug, Clone, Default)]
pub enum IsolatePayload {
    #[default]
    None,
    Test(TestData),
    Group { name: String },
    Debounce(DebounceTimer),
    Custom(Value),
}

#[derive(Debug)]
pub struct Isolate {
    id: IsolateId,
    kind: IsolateKind,
    key: Option<String>,
    allow_reorder: bool,
    status: Cell<IsolateStatus>,
    payload: RefCell<IsolatePayload>,
    children: RefCell<Vec<IsolateRef>>,
    parent: RefCell<Weak<Isolate>>,
}

impl Isolate {
    pub fn new(kind: IsolateKind, payload: IsolatePayload, key: Option<String>) -> IsolateRef {
        let allow_reorder = kind.allows_reorder();
        Rc::new(Isolate {
            id: IsolateId::next(),
            kind,
            key,
            allow_reorder,
            status: Cell::new(IsolateStatus::Initial),
            payload: RefCell::new(payload),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
        })
    }

    /// Build a node with an explicit reorder flag, as read back from a dump.
    pub(crate) fn restored(
        kind: IsolateKind,
        payload: IsolatePayload,
        key: Option<String>,
        allow_reorder: bool,
        status: IsolateStatus,
    ) -> IsolateRef {
        Rc::new(Isolate {
            id: IsolateId::next(),
            kind,
            key,
            allow_reorder,
            status: Cell::new(status),
            payload: RefCell::new(payload),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
        })
    }

    pub fn id(&self) -> IsolateId {
        self.id
    }

    pub fn kind(&self) -> &IsolateKind {
        &self.kind
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn allows_reorder(&self) -> bool {
        self.allow_reorder
    }

    pub fn status(&self) -> IsolateStatus {
        self.status.get()
    }

    /// Move to `to` if the isolate status machine accepts it.
    ///
    /// Returns `true` when the status changed.
    pub fn transition(&self, to: IsolateStatus) -> bool {
        match self.status.get().transition(to) {
            Some(next) => {
                self.status.set(next);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status.get() == IsolateStatus::Pending
    }

    pub fn payload(&self) -> Ref<'_, IsolatePayload> {
        self.payload.borrow()
    }

    pub fn payload_mut(&self) -> RefMut<'_, IsolatePayload> {
        self.payload.borrow_mut()
    }

    pub fn test_data(&self) -> Option<Ref<'_, TestData>> {
        Ref::filter_map(self.payload.borrow(), |payload| match payload {
            IsolatePayload::Test(data) => Some(data),
            _ => None,
        })
        .ok()
    }

    pub fn test_data_mut(&self) -> Option<RefMut<'_, TestData>> {
        RefMut::filter_map(self.payload.borrow_mut(), |payload| match payload {
            IsolatePayload::Test(data) => Some(data),
            _ => None,
        })
        .ok()
    }

    pub fn group_name(&self) -> Option<String> {
        match &*self.payload.borrow() {
            IsolatePayload::Group { name } => Some(name.clone()),
            _ => None,
        }
    }

    pub fn debounce_timer(&self) -> Option<DebounceTimer> {
        match &*self.payload.borrow() {
            IsolatePayload::Debounce(timer) => Some(timer.clone()),
            _ => None,
        }
    }

    /// Snapshot of the children. Callers may mutate the tree while iterating it.
    pub fn children(&self) -> Vec<IsolateRef> {
        self.children.borrow().clone()
    }

    pub fn child_count(&self) -> usize {
        self.children.borrow().len()
    }

    pub fn child_at(&self, index: usize) -> Option<IsolateRef> {
        self.children.borrow().get(index).cloned()
    }

    pub fn child_by_key(&self, key: &str) -> Option<IsolateRef> {
        self.children
            .borrow()
            .iter()
            .find(|child| child.key() == Some(key))
            .cloned()
    }

    pub fn parent(&self) -> Option<IsolateRef> {
        self.parent.borrow().upgrade()
    }

    pub fn set_parent(&self, parent: &IsolateRef) {
        *self.parent.borrow_mut() = Rc::downgrade(parent);
    }

    /// Append `child` as the last child of `parent` and point it back at `parent`.
    pub fn append_child(parent: &IsolateRef, child: IsolateRef) {
        child.set_parent(parent);
        parent.children.borrow_mut().push(child);
    }

    /// Detach the child with `id`. Returns `true` if it was present.
    pub fn remove_child(&self, id: IsolateId) -> bool {
        let mut children = self.children.borrow_mut();
        let before = children.len();
        children.retain(|child| child.id() != id);
        children.len() != before
    }

    pub fn same_kind(&self, other: &Isolate) -> bool {
        self.kind == other.kind
    }
}
