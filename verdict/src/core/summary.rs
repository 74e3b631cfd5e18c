//! The suite result: per-field and per-group verdict summaries.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::isolate::IsolateRef;
use crate::core::status::TestStatus;
use crate::core::test_isolate;
use crate::core::walker;

/// Counters and messages for one field (or one field within a group).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleTestSummary {
    pub error_count: usize,
    pub warn_count: usize,
    pub test_count: usize,
    pub pending_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub valid: bool,
}

impl SingleTestSummary {
    fn append(&mut self, status: TestStatus, message: Option<&str>) {
        if status.is_non_actionable() {
            return;
        }
        self.test_count += 1;
        match status {
            TestStatus::Pending => self.pending_count += 1,
            TestStatus::Failed => {
                self.error_count += 1;
                self.errors.extend(message.map(str::to_string));
            }
            TestStatus::Warning => {
                self.warn_count += 1;
                self.warnings.extend(message.map(str::to_string));
            }
            _ => {}
        }
    }
}

/// A failing test as listed in [`SuiteResult::errors`] and [`SuiteResult::warnings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFailure {
    pub field_name: String,
    pub group_name: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    pub suite_name: Option<String>,
    pub error_count: usize,
    pub warn_count: usize,
    pub test_count: usize,
    pub pending_count: usize,
    pub valid: bool,
    pub tests: BTreeMap<String, SingleTestSummary>,
    pub groups: BTreeMap<String, BTreeMap<String, SingleTestSummary>>,
    pub errors: Vec<SummaryFailure>,
    pub warnings: Vec<SummaryFailure>,
}

struct TestRow {
    field: String,
    group: Option<String>,
    message: Option<String>,
    status: TestStatus,
}

impl TestRow {
    fn counts_as_complete(&self) -> bool {
        self.status.is_tested() || self.status == TestStatus::Omitted
    }
}

fn rows_valid<'a>(mut rows: impl Iterator<Item = &'a TestRow>) -> bool {
    rows.all(|row| {
        row.status != TestStatus::Failed
            && row.status != TestStatus::Pending
            && row.counts_as_complete()
    })
}

impl SuiteResult {
    /// Summarize every test under `root`, in declaration order.
    pub fn produce(root: Option<&IsolateRef>, suite_name: Option<&str>) -> SuiteResult {
        let mut result = SuiteResult {
            suite_name: suite_name.map(str::to_string),
            ..SuiteResult::default()
        };
        let Some(root) = root else {
            return result;
        };

        let rows: Vec<TestRow> = walker::find_all(root, |node| test_isolate::is_test(node))
            .iter()
            .filter_map(|node| {
                node.test_data().map(|data| TestRow {
                    field: data.field_name.clone(),
                    group: data.group_name.clone(),
                    message: data.message.clone(),
                    status: data.status,
                })
            })
            .collect();

        for row in &rows {
            result
                .tests
                .entry(row.field.clone())
                .or_default()
                .append(row.status, row.message.as_deref());
            if let Some(group) = &row.group {
                result
                    .groups
                    .entry(group.clone())
                    .or_default()
                    .entry(row.field.clone())
                    .or_default()
                    .append(row.status, row.message.as_deref());
            }
            let failure = || SummaryFailure {
                field_name: row.field.clone(),
                group_name: row.group.clone(),
                message: row.message.clone(),
            };
            match row.status {
                TestStatus::Failed => result.errors.push(failure()),
                TestStatus::Warning => result.warnings.push(failure()),
                _ => {}
            }
        }

        for (field, summary) in &mut result.tests {
            summary.valid = rows_valid(rows.iter().filter(|row| &row.field == field));
        }
        for (group, fields) in &mut result.groups {
            for (field, summary) in fields.iter_mut() {
                summary.valid = rows_valid(
                    rows.iter()
                        .filter(|row| &row.field == field && row.group.as_ref() == Some(group)),
                );
            }
        }

        for summary in result.tests.values() {
            result.error_count += summary.error_count;
            result.warn_count += summary.warn_count;
            result.test_count += summary.test_count;
            result.pending_count += summary.pending_count;
        }
        result.valid = !result.tests.is_empty() && result.tests.values().all(|s| s.valid);
        result
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether `field` has no errors, nothing pending, and every test ran or was omitted.
    pub fn is_valid_field(&self, field: &str) -> bool {
        self.tests.get(field).is_some_and(|s| s.valid)
    }

    pub fn is_valid_by_group(&self, group: &str, field: Option<&str>) -> bool {
        let Some(fields) = self.groups.get(group) else {
            return false;
        };
        match field {
            Some(field) => fields.get(field).is_some_and(|s| s.valid),
            None => !fields.is_empty() && fields.values().all(|s| s.valid),
        }
    }

    pub fn has_errors(&self, field: Option<&str>) -> bool {
        match field {
            Some(field) => self.tests.get(field).is_some_and(|s| s.error_count > 0),
            None => self.error_count > 0,
        }
    }

    pub fn has_warnings(&self, field: Option<&str>) -> bool {
        match field {
            Some(field) => self.tests.get(field).is_some_and(|s| s.warn_count > 0),
            None => self.warn_count > 0,
        }
    }

    pub fn has_errors_by_group(&self, group: &str, field: Option<&str>) -> bool {
        self.group_any(group, field, |s| s.error_count > 0)
    }

    pub fn has_warnings_by_group(&self, group: &str, field: Option<&str>) -> bool {
        self.group_any(group, field, |s| s.warn_count > 0)
    }

    fn group_any(
        &self,
        group: &str,
        field: Option<&str>,
        predicate: impl Fn(&SingleTestSummary) -> bool,
    ) -> bool {
        let Some(fields) = self.groups.get(group) else {
            return false;
        };
        match field {
            Some(field) => fields.get(field).is_some_and(&predicate),
            None => fields.values().any(predicate),
        }
    }

    pub fn is_pending(&self, field: Option<&str>) -> bool {
        match field {
            Some(field) => self.tests.get(field).is_some_and(|s| s.pending_count > 0),
            None => self.pending_count > 0,
        }
    }

    pub fn is_tested(&self, field: &str) -> bool {
        self.tests.get(field).is_some_and(|s| s.test_count > 0)
    }

    /// Error messages of every field that has errors.
    pub fn get_errors(&self) -> BTreeMap<String, Vec<String>> {
        self.collect_messages(|s| (s.error_count, &s.errors))
    }

    pub fn get_warnings(&self) -> BTreeMap<String, Vec<String>> {
        self.collect_messages(|s| (s.warn_count, &s.warnings))
    }

    fn collect_messages(
        &self,
        select: impl Fn(&SingleTestSummary) -> (usize, &Vec<String>),
    ) -> BTreeMap<String, Vec<String>> {
        self.tests
            .iter()
            .filter_map(|(field, summary)| {
                let (count, messages) = select(summary);
                (count > 0).then(|| (field.clone(), messages.clone()))
            })
            .collect()
    }

    pub fn get_errors_for(&self, field: &str) -> Vec<String> {
        self.tests
            .get(field)
            .map(|s| s.errors.clone())
            .unwrap_or_default()
    }

    pub fn get_warnings_for(&self, field: &str) -> Vec<String> {
        self.tests
            .get(field)
            .map(|s| s.warnings.clone())
            .unwrap_or_default()
    }

    /// First error message recorded for `field`.
    pub fn get_error(&self, field: &str) -> Option<&str> {
        self.tests
            .get(field)
            .and_then(|s| s.errors.first())
            .map(String::as_str)
    }

    pub fn get_warning(&self, field: &str) -> Option<&str> {
        self.tests
            .get(field)
            .and_then(|s| s.warnings.first())
            .map(String::as_str)
    }

    /// First failing test in declaration order.
    pub fn first_error(&self) -> Option<&SummaryFailure> {
        self.errors.first()
    }

    pub fn first_warning(&self) -> Option<&SummaryFailure> {
        self.warnings.first()
    }

    pub fn get_errors_by_group(&self, group: &str) -> BTreeMap<String, Vec<String>> {
        self.groups
            .get(group)
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, s)| s.error_count > 0)
                    .map(|(field, s)| (field.clone(), s.errors.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_warnings_by_group(&self, group: &str) -> BTreeMap<String, Vec<String>> {
        self.groups
            .get(group)
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, s)| s.warn_count > 0)
                    .map(|(field, s)| (field.clone(), s.warnings.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
