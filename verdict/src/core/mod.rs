//! Isolate trees and the pure logic that operates on them.
//!
//! Nothing in `core` spawns tasks or touches the filesystem. Suites in
//! [`crate::suite`] drive these modules; tests exercise them directly.

pub mod aggregate;
pub mod bus;
pub mod cache;
pub mod ids;
pub mod isolate;
pub mod reconciler;
pub mod serializer;
pub mod signal;
pub mod status;
pub mod summary;
pub mod test_isolate;
pub mod walker;
