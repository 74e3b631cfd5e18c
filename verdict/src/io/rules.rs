//! Declarative validation rules stored in a TOML rule file.
//!
//! A rule file lists `[[rule]]` tables. Each rule names a field of the JSON
//! input, a `check` kind with its parameters, and optionally a message
//! template, a group, and a severity:
//!
//! ```toml
//! name = "signup"
//!
//! [[rule]]
//! field = "username"
//! check = "min_length"
//! min = 3
//! message = "{{ field }} must be at least {{ min }} characters"
//! ```

use std::fs;
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use minijinja::Environment;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::test_isolate::Severity;
use crate::suite::{Suite, SuiteScope, TestDecl, ensure};

/// Rule file (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RulesConfig {
    /// Suite name reported in the summary.
    pub name: Option<String>,

    #[serde(rename = "rule")]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    /// Field to check. Dots address nested objects (`address.city`).
    pub field: String,

    #[serde(flatten)]
    pub check: RuleCheck,

    /// `minijinja` template rendered with `field` and the check parameters.
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub severity: Severity,

    /// Skip the rule when the field is missing or empty.
    #[serde(default)]
    pub skip_when_empty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum RuleCheck {
    Required,
    MinLength { min: usize },
    MaxLength { max: usize },
    Pattern { pattern: String },
    Equals { other: String },
    OneOf { values: Vec<Value> },
    Schema { schema: Value },
}

impl RuleCheck {
    fn default_message(&self) -> &'static str {
        match self {
            RuleCheck::Required => "{{ field }} is required",
            RuleCheck::MinLength { .. } => "{{ field }} must be at least {{ min }} long",
            RuleCheck::MaxLength { .. } => "{{ field }} must be at most {{ max }} long",
            RuleCheck::Pattern { .. } => "{{ field }} has an invalid format",
            RuleCheck::Equals { .. } => "{{ field }} must match {{ other }}",
            RuleCheck::OneOf { .. } => "{{ field }} must be one of the allowed values",
            RuleCheck::Schema { .. } => "{{ field }} does not match its schema",
        }
    }
}

impl RulesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(anyhow!("rule file must declare at least one [[rule]]"));
        }
        for (index, rule) in self.rules.iter().enumerate() {
            rule.compile()
                .with_context(|| format!("rule #{} ({})", index + 1, rule.field))?;
        }
        Ok(())
    }

    /// Compile every rule: regexes, schemas, and rendered messages.
    pub fn compile(&self) -> Result<Vec<CompiledRule>> {
        self.rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                rule.compile()
                    .with_context(|| format!("rule #{} ({})", index + 1, rule.field))
            })
            .collect()
    }

    /// Build a suite declaring one test per rule, in file order.
    pub fn build_suite(&self) -> Result<Suite<Value>> {
        let rules = Rc::new(self.compile()?);
        let mut builder = Suite::builder(move |scope: &mut SuiteScope<'_>, input: &Value| {
            for rule in rules.iter() {
                rule.declare(scope, input);
            }
        });
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        Ok(builder.build())
    }
}

impl RuleConfig {
    fn compile(&self) -> Result<CompiledRule> {
        if self.field.trim().is_empty() {
            return Err(anyhow!("field must be non-empty"));
        }
        let check = match &self.check {
            RuleCheck::Required => CompiledCheck::Required,
            RuleCheck::MinLength { min } => CompiledCheck::MinLength(*min),
            RuleCheck::MaxLength { max } => CompiledCheck::MaxLength(*max),
            RuleCheck::Pattern { pattern } => CompiledCheck::Pattern(
                Regex::new(pattern).with_context(|| format!("compile pattern {pattern:?}"))?,
            ),
            RuleCheck::Equals { other } => {
                if other.trim().is_empty() {
                    return Err(anyhow!("equals.other must be non-empty"));
                }
                CompiledCheck::Equals(other.clone())
            }
            RuleCheck::OneOf { values } => {
                if values.is_empty() {
                    return Err(anyhow!("one_of.values must be non-empty"));
                }
                CompiledCheck::OneOf(values.clone())
            }
            RuleCheck::Schema { schema } => CompiledCheck::Schema(Box::new(
                jsonschema::validator_for(schema)
                    .map_err(|err| anyhow!("compile schema: {err}"))?,
            )),
        };
        Ok(CompiledRule {
            field: self.field.clone(),
            group: self.group.clone(),
            message: self.render_message()?,
            severity: self.severity,
            skip_when_empty: self.skip_when_empty,
            check,
        })
    }

    fn render_message(&self) -> Result<String> {
        let template = self
            .message
            .as_deref()
            .unwrap_or_else(|| self.check.default_message());
        let mut context = match serde_json::to_value(&self.check).context("serialize rule")? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        context.insert("field".to_string(), Value::String(self.field.clone()));
        Environment::new()
            .render_str(template, &context)
            .with_context(|| format!("render message template {template:?}"))
    }
}

enum CompiledCheck {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
    Equals(String),
    OneOf(Vec<Value>),
    Schema(Box<jsonschema::Validator>),
}

/// A rule ready to run: patterns and schemas compiled, message rendered.
pub struct CompiledRule {
    pub field: String,
    pub group: Option<String>,
    pub message: String,
    pub severity: Severity,
    pub skip_when_empty: bool,
    check: CompiledCheck,
}

impl CompiledRule {
    /// True when `input` satisfies the rule. Only `required` fails on a
    /// missing value; every other check accepts it.
    pub fn evaluate(&self, input: &Value) -> bool {
        let value = lookup(input, &self.field);
        if let CompiledCheck::Required = self.check {
            return !is_empty(value);
        }
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return true;
        };
        match &self.check {
            CompiledCheck::Required => true,
            CompiledCheck::MinLength(min) => length(value).is_some_and(|len| len >= *min),
            CompiledCheck::MaxLength(max) => length(value).is_some_and(|len| len <= *max),
            CompiledCheck::Pattern(regex) => value.as_str().is_some_and(|s| regex.is_match(s)),
            CompiledCheck::Equals(other) => lookup(input, other) == Some(value),
            CompiledCheck::OneOf(values) => values.contains(value),
            CompiledCheck::Schema(validator) => validator.is_valid(value),
        }
    }

    fn declare(&self, scope: &mut SuiteScope<'_>, input: &Value) {
        let mut decl = TestDecl::new(self.field.as_str()).message(self.message.as_str());
        if self.severity == Severity::Warn {
            decl = decl.warn();
        }
        let declare = |scope: &mut SuiteScope<'_>| {
            if self.skip_when_empty {
                let empty = is_empty(lookup(input, &self.field));
                scope.skip_when(empty, |scope: &mut SuiteScope<'_>| {
                    scope.test(decl, |_| ensure(self.evaluate(input)));
                });
            } else {
                scope.test(decl, |_| ensure(self.evaluate(input)));
            }
        };
        match &self.group {
            Some(group) => {
                scope.group(group, declare);
            }
            None => declare(scope),
        }
    }
}

fn lookup<'a>(input: &'a Value, field: &str) -> Option<&'a Value> {
    input.pointer(&format!("/{}", field.replace('.', "/")))
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Load and validate a rule file.
pub fn load_rules(path: &Path) -> Result<RulesConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RulesConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
