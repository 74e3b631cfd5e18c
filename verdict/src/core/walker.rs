//! Depth-first traversal of isolate trees.
//!
//! Traversal is post-order: every child is visited before its parent, and
//! the root passed in is never visited itself. Visitors return
//! [`ControlFlow::Break`] to stop the whole walk early.

use std::ops::ControlFlow;
use std::rc::Rc;

use crate::core::isolate::IsolateRef;

/// Visit every descendant of `root`.
pub fn walk<F>(root: &IsolateRef, mut visit: F) -> ControlFlow<()>
where
    F: FnMut(&IsolateRef) -> ControlFlow<()>,
{
    walk_inner(root, &|_: &IsolateRef| true, &mut visit)
}

/// Visit only descendants accepted by `visit_only`. Rejected nodes are still
/// descended into.
pub fn walk_only<P, F>(root: &IsolateRef, visit_only: P, mut visit: F) -> ControlFlow<()>
where
    P: Fn(&IsolateRef) -> bool,
    F: FnMut(&IsolateRef) -> ControlFlow<()>,
{
    walk_inner(root, &visit_only, &mut visit)
}

fn walk_inner(
    node: &IsolateRef,
    visit_only: &dyn Fn(&IsolateRef) -> bool,
    visit: &mut dyn FnMut(&IsolateRef) -> ControlFlow<()>,
) -> ControlFlow<()> {
    for child in node.children() {
        walk_inner(&child, visit_only, visit)?;
        if visit_only(&child) {
            visit(&child)?;
        }
    }
    ControlFlow::Continue(())
}

pub fn for_each<F>(root: &IsolateRef, mut f: F)
where
    F: FnMut(&IsolateRef),
{
    let _ = walk(root, |node| {
        f(node);
        ControlFlow::Continue(())
    });
}

pub fn reduce<T, F>(root: &IsolateRef, init: T, mut f: F) -> T
where
    F: FnMut(T, &IsolateRef) -> T,
{
    reduce_inner(root, init, &mut f)
}

fn reduce_inner<T>(node: &IsolateRef, init: T, f: &mut dyn FnMut(T, &IsolateRef) -> T) -> T {
    let mut acc = init;
    for child in node.children() {
        acc = reduce_inner(&child, acc, f);
        acc = f(acc, &child);
    }
    acc
}

pub fn some<P>(root: &IsolateRef, predicate: P) -> bool
where
    P: Fn(&IsolateRef) -> bool,
{
    walk(root, |node| {
        if predicate(node) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })
    .is_break()
}

pub fn every<P>(root: &IsolateRef, predicate: P) -> bool
where
    P: Fn(&IsolateRef) -> bool,
{
    !some(root, |node| !predicate(node))
}

pub fn find<P>(root: &IsolateRef, predicate: P) -> Option<IsolateRef>
where
    P: Fn(&IsolateRef) -> bool,
{
    let mut found = None;
    let _ = walk(root, |node| {
        if predicate(node) {
            found = Some(Rc::clone(node));
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    found
}

pub fn find_all<P>(root: &IsolateRef, predicate: P) -> Vec<IsolateRef>
where
    P: Fn(&IsolateRef) -> bool,
{
    let mut found = Vec::new();
    for_each(root, |node| {
        if predicate(node) {
            found.push(Rc::clone(node));
        }
    });
    found
}

/// Nearest ancestor of `start` (excluding `start`) accepted by `predicate`.
pub fn find_closest<P>(start: &IsolateRef, predicate: P) -> Option<IsolateRef>
where
    P: Fn(&IsolateRef) -> bool,
{
    let mut current = start.parent();
    while let Some(node) = current {
        if predicate(&node) {
            return Some(node);
        }
        current = node.parent();
    }
    None
}

/// True if `target` is a descendant of `root`.
pub fn contains(root: &IsolateRef, target: &IsolateRef) -> bool {
    some(root, |node| Rc::ptr_eq(node, target))
}

/// Detach every descendant accepted by `predicate`. Returns how many were removed.
pub fn remove_where<P>(root: &IsolateRef, predicate: P) -> usize
where
    P: Fn(&IsolateRef) -> bool,
{
    let doomed = find_all(root, &predicate);
    let mut removed = 0;
    for node in doomed {
        if let Some(parent) = node.parent() {
            if parent.remove_child(node.id()) {
                removed += 1;
            }
        }
    }
    removed
}
