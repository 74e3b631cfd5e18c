//! I/O helpers for `verdict` CLI commands.

pub mod rules;
