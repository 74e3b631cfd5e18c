//! Stable exit codes for `verdict` CLI commands.

/// Input satisfied every rule, or the rule file linted clean.
pub const OK: i32 = 0;
/// Invalid usage, unreadable files, or a malformed rule file.
pub const INVALID: i32 = 1;
/// `verdict check` found validation errors (or tests that never settled).
pub const VALIDATION_FAILED: i32 = 2;
