//! Orchestration for `verdict check` and `verdict lint`.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::task::LocalSet;
use tracing::debug;

use crate::core::summary::SuiteResult;
use crate::error::VerdictError;
use crate::io::rules::{RulesConfig, load_rules};

/// Result of checking one input document.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub result: Rc<SuiteResult>,
    pub deferred: Vec<VerdictError>,
}

/// Summary of a rule file that linted clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintOutcome {
    pub name: Option<String>,
    pub rule_count: usize,
    pub fields: Vec<String>,
}

/// Load `rules_path`, read the JSON document at `input_path`, and check it.
pub fn check_file(rules_path: &Path, input_path: &Path) -> Result<CheckOutcome> {
    let config = load_rules(rules_path).with_context(|| "load rule file")?;
    let contents = fs::read_to_string(input_path)
        .with_context(|| format!("read {}", input_path.display()))?;
    let input: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse {}", input_path.display()))?;
    check_value(&config, &input)
}

/// Run the rules against `input` and wait until every test has settled.
pub fn check_value(config: &RulesConfig, input: &Value) -> Result<CheckOutcome> {
    let suite = config.build_suite()?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("build tokio runtime")?;
    let local = LocalSet::new();
    let result = local.block_on(&runtime, async {
        suite.run(input);
        suite.settled().await
    });
    debug!(valid = result.valid, errors = result.error_count, "check finished");
    Ok(CheckOutcome {
        result,
        deferred: suite.deferred_errors(),
    })
}

pub fn lint_file(rules_path: &Path) -> Result<LintOutcome> {
    let config = load_rules(rules_path).with_context(|| "load rule file")?;
    let mut fields: Vec<String> = config.rules.iter().map(|r| r.field.clone()).collect();
    fields.sort();
    fields.dedup();
    Ok(LintOutcome {
        name: config.name.clone(),
        rule_count: config.rules.len(),
        fields,
    })
}

/// Human-readable report, one block per field with failures.
pub fn render_text(result: &SuiteResult) -> String {
    let mut out = String::new();
    if let Some(name) = &result.suite_name {
        let _ = writeln!(out, "suite: {name}");
    }
    for (field, summary) in &result.tests {
        let status = if summary.valid { "ok" } else { "invalid" };
        let _ = writeln!(
            out,
            "{field}: {status} ({} errors, {} warnings)",
            summary.error_count, summary.warn_count
        );
        for message in &summary.errors {
            let _ = writeln!(out, "  error: {message}");
        }
        for message in &summary.warnings {
            let _ = writeln!(out, "  warning: {message}");
        }
    }
    let verdict = if result.valid { "valid" } else { "invalid" };
    let _ = writeln!(
        out,
        "{verdict}: {} tests, {} errors, {} warnings",
        result.test_count, result.error_count, result.warn_count
    );
    out
}

pub fn render_json(result: &SuiteResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("serialize suite result")
}
