//! Synchronous suite runs: verdicts, retention across runs, focus,
//! structural reconciliation, events, and persistence.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::json;
use verdict::core::reconciler::ReconcileStrategy;
use verdict::{
    CacheLayer, EventName, IsolateKind, IsolatePayload, IsolateRef, Suite, SuiteResult,
    SuiteScope, SuiteSerializer, TestBody, TestDecl, TestFailure, VerdictError, ensure,
};

#[derive(Debug, Clone, Default)]
struct Form {
    username: String,
    password: String,
    only: Option<&'static str>,
}

fn form(username: &str, password: &str) -> Form {
    Form {
        username: username.to_string(),
        password: password.to_string(),
        only: None,
    }
}

fn signup_suite() -> Suite<Form> {
    Suite::new(|scope: &mut SuiteScope<'_>, form: &Form| {
        if let Some(field) = form.only {
            scope.only(&[field]);
        }
        scope.test(("username", "Username is required"), |_| {
            ensure(!form.username.is_empty())
        });
        scope.test(("password", "Password is too short"), |_| {
            ensure(form.password.len() >= 8)
        });
    })
}

/// One failing and one passing sync test: one error, two tests, nothing pending.
#[test]
fn sync_failure_and_pass_are_counted() {
    let suite = signup_suite();
    let result = suite.run(&form("", "correct horse"));

    assert_eq!(result.error_count, 1);
    assert_eq!(result.test_count, 2);
    assert!(!suite.is_pending(None));
    assert!(!result.is_valid());
    assert_eq!(result.get_error("username"), Some("Username is required"));
    assert!(result.is_valid_field("password"));
}

#[test]
fn skipped_fields_keep_previous_verdicts() {
    let suite = signup_suite();
    suite.run(&form("", "correct horse"));

    let mut second = form("", "short");
    second.only = Some("password");
    let result = suite.run(&second);

    assert!(result.has_errors(Some("username")));
    assert!(result.has_errors(Some("password")));
    assert_eq!(result.test_count, 2);
}

#[test]
fn skipped_field_without_history_is_untested() {
    let suite = signup_suite();
    let mut input = form("alice", "correct horse");
    input.only = Some("password");
    let result = suite.run(&input);

    assert!(!result.is_tested("username"));
    assert!(!result.is_valid());
    assert!(result.is_valid_field("password"));
}

#[test]
fn omit_when_excludes_tests_from_failures() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, username: &String| {
        scope.test("username", |_| ensure(!username.is_empty()));
        scope.omit_when(username.is_empty(), |scope| {
            scope.test("username_available", |_| Err(TestFailure::from("taken")));
        });
    });

    let result = suite.run(&String::new());
    assert!(!result.has_errors(Some("username_available")));
    assert!(result.is_valid_field("username_available"));

    let result = suite.run(&"bob".to_string());
    assert_eq!(result.get_error("username_available"), Some("taken"));
}

#[test]
fn skip_when_reads_the_draft_result() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, form: &Form| {
        scope.test("password", |_| ensure(form.password.len() >= 8));
        scope.skip_when(
            |draft: &SuiteResult| draft.has_errors(Some("password")),
            |scope| {
                scope.test("confirm", |_| ensure(form.username == form.password));
            },
        );
    });

    let result = suite.run(&form("x", "short"));
    assert!(!result.is_tested("confirm"));

    let result = suite.run(&form("correct horse", "correct horse"));
    assert!(result.is_tested("confirm"));
    assert!(result.is_valid());
}

#[test]
fn draft_sees_tests_declared_so_far() {
    let seen = Rc::new(Cell::new(usize::MAX));
    let sink = Rc::clone(&seen);
    let suite = Suite::new(move |scope: &mut SuiteScope<'_>, _: &()| {
        scope.test("a", |_| Err(TestFailure::new()));
        sink.set(scope.draft().error_count);
        scope.test("b", |_| Err(TestFailure::new()));
    });

    let result = suite.run(&());
    assert_eq!(seen.get(), 1);
    assert_eq!(result.error_count, 2);
}

#[test]
fn groups_are_reported_by_name() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, _: &()| {
        scope.group("billing", |scope| {
            scope.test(("card", "Card declined"), |_| Err(TestFailure::new()));
        });
        scope.test("username", |_| Ok(()));
    });

    let result = suite.run(&());
    assert!(result.has_errors_by_group("billing", Some("card")));
    assert_eq!(
        result.get_errors_by_group("billing").get("card"),
        Some(&vec!["Card declined".to_string()])
    );
    assert_eq!(
        result.first_error().and_then(|f| f.group_name.as_deref()),
        Some("billing")
    );
}

#[test]
fn warn_tests_do_not_invalidate() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, _: &()| {
        scope.test(TestDecl::new("password").message("Weak password").warn(), |_| {
            Err(TestFailure::new())
        });
    });

    let result = suite.run(&());
    assert!(result.is_valid());
    assert!(suite.has_warnings(Some("password")));
    assert!(!suite.has_errors(None));
    assert_eq!(result.get_warning("password"), Some("Weak password"));
}

#[test]
fn each_tolerates_reordering() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, items: &Vec<String>| {
        scope.each(items.iter(), |scope, item, _| {
            scope.test(item.as_str(), |_| Ok(()));
        });
    });

    suite.run(&vec!["a".to_string(), "b".to_string()]);
    let result = suite.run(&vec!["b".to_string(), "a".to_string()]);

    assert!(suite.deferred_errors().is_empty());
    assert!(result.is_valid());
}

#[test]
fn reordering_outside_each_is_deferred_not_fatal() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, swapped: &bool| {
        let (first, second) = if *swapped { ("b", "a") } else { ("a", "b") };
        scope.test(first, |_| Ok(()));
        scope.test(second, |_| Ok(()));
    });

    suite.run(&false);
    let result = suite.run(&true);

    assert_eq!(
        suite.deferred_errors(),
        vec![VerdictError::TestOrderChanged {
            expected: "a".to_string(),
            found: "b".to_string(),
        }]
    );
    assert_eq!(result.test_count, 2);
    assert!(result.is_valid());

    suite.run(&true);
    assert!(suite.deferred_errors().is_empty());
}

#[test]
fn keyed_tests_match_across_positions() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, input: &(bool, Option<&'static str>)| {
        let (swapped, only) = *input;
        if let Some(field) = only {
            scope.only(&[field]);
        }
        let order = if swapped { ["b", "a"] } else { ["a", "b"] };
        for field in order {
            let passes = field == "b";
            scope.test(TestDecl::new(field).key(field), move |_| ensure(passes));
        }
    });

    suite.run(&(false, None));
    let result = suite.run(&(true, Some("b")));

    assert!(suite.deferred_errors().is_empty());
    assert!(result.has_errors(Some("a")));
    assert!(result.is_valid_field("b"));
}

#[test]
fn panicking_body_fails_the_test() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, _: &()| {
        scope.test("boom", |_| panic!("kaboom"));
        scope.test("after", |_| Ok(()));
    });

    let result = suite.run(&());
    assert_eq!(result.get_error("boom"), Some("kaboom"));
    assert!(result.is_valid_field("after"));
}

#[test]
fn done_runs_immediately_when_nothing_is_pending() {
    let suite = signup_suite();
    let errors = Rc::new(Cell::new(usize::MAX));
    let sink = Rc::clone(&errors);
    suite
        .run(&form("", "correct horse"))
        .done(move |result| sink.set(result.error_count));
    assert_eq!(errors.get(), 1);
}

#[test]
fn subscribers_see_lifecycle_events_until_unsubscribed() {
    let suite = signup_suite();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let all = suite.subscribe(None, move |event| sink.borrow_mut().push(event.name()));
    let completed = Rc::new(Cell::new(0));
    let counter = Rc::clone(&completed);
    suite.subscribe(Some(EventName::TestCompleted), move |_| {
        counter.set(counter.get() + 1);
    });

    suite.run(&form("alice", "correct horse"));

    {
        let events = events.borrow();
        assert_eq!(events.first(), Some(&EventName::SuiteRunStarted));
        assert_eq!(events.last(), Some(&EventName::SuiteCallbackRunFinished));
        assert!(events.contains(&EventName::AllRunningTestsFinished));
        assert_eq!(
            events
                .iter()
                .filter(|name| **name == EventName::TestRunStarted)
                .count(),
            2
        );
    }
    assert_eq!(completed.get(), 2);

    all.unsubscribe();
    let before = events.borrow().len();
    suite.run(&form("alice", "correct horse"));
    assert_eq!(events.borrow().len(), before);
    assert_eq!(completed.get(), 4);
}

#[test]
fn reset_field_and_remove_update_the_result() {
    let suite = signup_suite();
    let result = suite.run(&form("", "short"));
    assert!(result.has_errors(Some("username")));

    suite.reset_field("username");
    let after_reset = suite.get();
    assert!(!after_reset.has_errors(Some("username")));
    assert!(!after_reset.is_tested("username"));
    assert!(after_reset.has_errors(Some("password")));

    suite.remove("password");
    let after_remove = suite.get();
    assert!(!after_remove.tests.contains_key("password"));
    assert!(!suite.has_errors(None));
}

#[test]
fn reset_forgets_history() {
    let suite = signup_suite();
    suite.run(&form("", "short"));
    suite.reset();

    assert!(suite.dump().is_none());
    assert_eq!(suite.get().test_count, 0);

    let mut input = form("", "short");
    input.only = Some("password");
    let result = suite.run(&input);
    assert!(!result.is_tested("username"));
}

#[test]
fn shared_cache_layer_keeps_suites_apart() {
    let layer = Rc::new(CacheLayer::new());
    let failing = Suite::builder(|scope: &mut SuiteScope<'_>, _: &()| {
        scope.test("a", |_| Err(TestFailure::new()));
    })
    .name("failing")
    .cache_layer(Rc::clone(&layer))
    .build();
    let passing = Suite::builder(|scope: &mut SuiteScope<'_>, _: &()| {
        scope.test("a", |_| Ok(()));
    })
    .name("passing")
    .cache_layer(Rc::clone(&layer))
    .build();

    failing.run(&());
    passing.run(&());

    assert!(failing.get().has_errors(Some("a")));
    assert!(passing.get().is_valid());
    assert_eq!(passing.get().suite_name.as_deref(), Some("passing"));
    assert_eq!(layer.suite_results.len(), 2);
}

#[test]
fn memo_reuses_verdicts_for_unchanged_dependencies() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let declared: Rc<RefCell<Vec<IsolateRef>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&declared);
    let suite = Suite::new(move |scope: &mut SuiteScope<'_>, value: &u32| {
        let counter = Rc::clone(&counter);
        let value = *value;
        let node = scope.memo(
            "amount",
            vec![json!(value)],
            TestBody::sync(move |_| {
                counter.set(counter.get() + 1);
                ensure(value > 10)
            }),
        );
        sink.borrow_mut().push(node);
    });

    assert!(suite.run(&5).has_errors(Some("amount")));
    assert!(suite.run(&5).has_errors(Some("amount")));
    assert_eq!(calls.get(), 1);

    assert!(suite.run(&20).is_valid());
    assert_eq!(calls.get(), 2);

    assert!(suite.run(&5).has_errors(Some("amount")));
    assert_eq!(calls.get(), 2);

    let declared = declared.borrow();
    assert!(Rc::ptr_eq(&declared[0], &declared[1]));
    assert!(Rc::ptr_eq(&declared[0], &declared[3]));
    assert!(!Rc::ptr_eq(&declared[0], &declared[2]));
}

#[test]
fn optional_fields_do_not_block_validity() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, form: &Form| {
        scope.optional(&["nickname"]);
        if let Some(field) = form.only {
            scope.only(&[field]);
        }
        scope.test("username", |_| ensure(!form.username.is_empty()));
        scope.test("nickname", |_| ensure(form.password.len() < 20));
    });

    let mut input = form("alice", "");
    input.only = Some("username");
    let result = suite.run(&input);

    assert!(result.is_valid());
    assert!(result.is_valid_field("nickname"));
    assert!(!result.is_tested("nickname"));
}

#[test]
fn optional_fields_keep_their_failures() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, _: &()| {
        scope.optional(&["nickname"]);
        scope.test("nickname", |_| Err(TestFailure::from("too long")));
    });

    let result = suite.run(&());
    assert!(!result.is_valid());
    assert_eq!(result.get_error("nickname"), Some("too long"));
}

#[test]
fn conditionally_optional_field_follows_the_result() {
    let suite = Suite::new(|scope: &mut SuiteScope<'_>, form: &Form| {
        scope.optional_when("confirm", |result: &SuiteResult| {
            !result.is_tested("password")
        });
        if let Some(field) = form.only {
            scope.only(&[field]);
        }
        scope.test("username", |_| ensure(!form.username.is_empty()));
        scope.test("password", |_| ensure(form.password.len() >= 8));
        scope.test("confirm", |_| ensure(form.password == form.username));
    });

    let mut input = form("alice", "");
    input.only = Some("username");
    let result = suite.run(&input);
    assert!(result.is_valid_field("confirm"));
    assert!(!result.is_valid_field("password"));

    let fresh = Suite::new(|scope: &mut SuiteScope<'_>, form: &Form| {
        scope.optional_when("confirm", |result: &SuiteResult| {
            !result.is_tested("password")
        });
        scope.skip(&["confirm"]);
        scope.test("password", |_| ensure(form.password.len() >= 8));
        scope.test("confirm", |_| ensure(form.password == form.username));
    });
    let result = fresh.run(&form("x", "correct horse"));
    assert!(!result.is_valid());
    assert!(!result.is_valid_field("confirm"));
}

#[test]
fn serialized_verdicts_resume_into_a_new_suite() {
    let suite = signup_suite();
    suite.run(&form("", "correct horse"));

    let dump = SuiteSerializer::serialize(&suite).expect("serialize");
    let username = &dump["children"][0];
    assert_eq!(username["data"]["fieldName"], json!("username"));
    assert_eq!(username["data"]["testStatus"], json!("FAILED"));
    assert!(username["data"].get("severity").is_none());

    let resumed = signup_suite();
    SuiteSerializer::resume(&resumed, &dump).expect("resume");
    let mut input = form("", "correct horse");
    input.only = Some("password");
    let result = resumed.run(&input);

    assert!(result.has_errors(Some("username")));
    assert!(result.is_valid_field("password"));
}

struct Sticky;

impl ReconcileStrategy for Sticky {
    fn name(&self) -> &str {
        "sticky"
    }

    fn matches(&self, current: &IsolateRef, _: &IsolateRef) -> bool {
        current.kind() == &IsolateKind::Custom("Sticky".to_string())
    }

    fn reconcile(
        &self,
        _: &IsolateRef,
        history: &IsolateRef,
    ) -> Result<IsolateRef, VerdictError> {
        Ok(Rc::clone(history))
    }
}

#[test]
fn custom_strategies_can_keep_history_nodes() {
    let kept: Rc<RefCell<Vec<IsolateRef>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&kept);
    let suite = Suite::builder(move |scope: &mut SuiteScope<'_>, _: &()| {
        let node = scope.isolate(
            IsolateKind::Custom("Sticky".to_string()),
            IsolatePayload::Custom(json!({"version": 1})),
            None,
            |_| {},
        );
        sink.borrow_mut().push(node);
    })
    .strategy(Rc::new(Sticky))
    .build();

    suite.run(&());
    suite.run(&());

    let kept = kept.borrow();
    assert_eq!(kept.len(), 2);
    assert!(Rc::ptr_eq(&kept[0], &kept[1]));
}
