//! Async and debounced tests on a paused clock. Every run happens inside
//! a `LocalSet` so test bodies can be spawned with `spawn_local`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;
use verdict::core::test_isolate;
use verdict::test_support::local;
use verdict::{EventName, IsolateRef, Suite, SuiteScope, TestBody, TestFailure, ensure};

fn delayed_username_suite() -> Suite<String> {
    Suite::new(|scope: &mut SuiteScope<'_>, username: &String| {
        let username = username.clone();
        scope.test_async(("username", "Username is taken"), move |_| async move {
            sleep(Duration::from_millis(100)).await;
            if username == "taken" {
                Err(TestFailure::new())
            } else {
                Ok(())
            }
        });
    })
}

/// An async test that fails after a delay is pending first, then failing.
#[tokio::test(start_paused = true)]
async fn async_failure_settles_after_delay() {
    local(async {
        let suite = delayed_username_suite();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        suite.subscribe(None, move |event| sink.borrow_mut().push(event.name()));

        let outcome = suite.run(&"taken".to_string());
        assert!(suite.is_pending(None));
        assert!(outcome.is_pending(Some("username")));
        assert!(!suite.has_errors(Some("username")));

        sleep(Duration::from_millis(150)).await;

        assert!(!suite.is_pending(None));
        assert!(suite.has_errors(Some("username")));
        assert_eq!(suite.get().get_error("username"), Some("Username is taken"));

        let events = events.borrow();
        let pending = events
            .iter()
            .position(|name| *name == EventName::IsolatePending)
            .expect("pending event");
        let settled = events
            .iter()
            .position(|name| *name == EventName::AsyncIsolateDone)
            .expect("async done event");
        assert!(pending < settled);
    })
    .await;
}

/// A second run before the first async test settles cancels it, and only
/// the newer test reports a settlement.
#[tokio::test(start_paused = true)]
async fn rerun_cancels_stale_async_test() {
    local(async {
        let suite = delayed_username_suite();
        let settlements = Rc::new(Cell::new(0));
        let counter = Rc::clone(&settlements);
        suite.subscribe(Some(EventName::AsyncIsolateDone), move |_| {
            counter.set(counter.get() + 1);
        });
        let stale_done = Rc::new(Cell::new(false));
        let flag = Rc::clone(&stale_done);

        suite
            .run(&"taken".to_string())
            .done(move |_| flag.set(true));
        let first = suite.dump().expect("first run tree");
        let first_test = first.child_at(0).expect("first test");
        sleep(Duration::from_millis(10)).await;

        suite.run(&"free".to_string());
        assert!(test_isolate::is_canceled(&first_test));
        assert!(
            test_isolate::signal(&first_test)
                .expect("signal")
                .is_canceled()
        );

        sleep(Duration::from_millis(300)).await;

        assert_eq!(settlements.get(), 1);
        assert!(!stale_done.get());
        assert!(!suite.is_pending(None));
        assert!(suite.get().is_valid());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn canceled_body_observes_its_signal() {
    local(async {
        let observed = Rc::new(Cell::new(false));
        let sink = Rc::clone(&observed);
        let suite = Suite::new(move |scope: &mut SuiteScope<'_>, _: &()| {
            let sink = Rc::clone(&sink);
            scope.test_async("slow", move |payload| async move {
                tokio::select! {
                    () = sleep(Duration::from_secs(10)) => Ok(()),
                    () = payload.signal.canceled() => {
                        sink.set(true);
                        Err(TestFailure::new())
                    }
                }
            });
        });

        suite.run(&());
        sleep(Duration::from_millis(5)).await;
        suite.run(&());
        sleep(Duration::from_millis(5)).await;

        assert!(observed.get());
        assert!(suite.is_pending(Some("slow")));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn skipped_pending_test_keeps_running() {
    local(async {
        let suite = Suite::new(|scope: &mut SuiteScope<'_>, only_password: &bool| {
            if *only_password {
                scope.only(&["password"]);
            }
            scope.test_async("username", |_| async {
                sleep(Duration::from_millis(100)).await;
                Err(TestFailure::from("taken"))
            });
            scope.test("password", |_| Ok(()));
        });

        suite.run(&false);
        sleep(Duration::from_millis(10)).await;

        let finished = Rc::new(Cell::new(false));
        let flag = Rc::clone(&finished);
        let outcome = suite.run(&true);
        outcome.done(move |result| flag.set(result.has_errors(Some("username"))));
        assert!(outcome.is_pending(Some("username")));
        assert!(!finished.get());

        sleep(Duration::from_millis(200)).await;

        assert!(finished.get());
        assert_eq!(suite.get().get_error("username"), Some("taken"));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn done_field_fires_before_the_suite_is_done() {
    local(async {
        let suite = Suite::new(|scope: &mut SuiteScope<'_>, _: &()| {
            scope.test_async("fast", |_| async {
                sleep(Duration::from_millis(50)).await;
                Ok(())
            });
            scope.test_async("slow", |_| async {
                sleep(Duration::from_millis(200)).await;
                Ok(())
            });
        });

        let fast_done = Rc::new(Cell::new(false));
        let all_done = Rc::new(Cell::new(false));
        let fast_flag = Rc::clone(&fast_done);
        let all_flag = Rc::clone(&all_done);
        suite
            .run(&())
            .done_field("fast", move |result| fast_flag.set(result.is_valid_field("fast")))
            .done(move |result| all_flag.set(result.is_valid()));

        sleep(Duration::from_millis(100)).await;
        assert!(fast_done.get());
        assert!(!all_done.get());

        sleep(Duration::from_millis(150)).await;
        assert!(all_done.get());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn settled_waits_for_every_async_test() {
    local(async {
        let suite = delayed_username_suite();
        suite.run(&"taken".to_string());

        let result = suite.settled().await;

        assert_eq!(result.pending_count, 0);
        assert_eq!(result.error_count, 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn settled_returns_at_once_without_pending_tests() {
    local(async {
        let suite = Suite::new(|scope: &mut SuiteScope<'_>, _: &()| {
            scope.test("sync", |_| Ok(()));
        });
        suite.run(&());
        assert!(suite.settled().await.is_valid());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn panicking_future_fails_the_test() {
    local(async {
        let suite = Suite::new(|scope: &mut SuiteScope<'_>, _: &()| {
            scope.test_async("boom", |_| async { panic!("async kaboom") });
        });

        suite.run(&());
        let result = suite.settled().await;

        assert_eq!(result.get_error("boom"), Some("async kaboom"));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn debounce_runs_only_the_last_body() {
    local(async {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let suite = Suite::new(move |scope: &mut SuiteScope<'_>, amount: &u32| {
            let counter = Rc::clone(&counter);
            let amount = *amount;
            scope.debounce(
                "amount",
                Duration::from_millis(50),
                TestBody::sync(move |_| {
                    counter.set(counter.get() + 1);
                    ensure(amount < 100)
                }),
            );
        });

        for amount in [1, 2, 3, 500] {
            suite.run(&amount);
            sleep(Duration::from_millis(10)).await;
        }
        assert!(suite.is_pending(Some("amount")));
        assert_eq!(calls.get(), 0);

        let result = suite.settled().await;

        assert_eq!(calls.get(), 1);
        assert!(result.has_errors(Some("amount")));
        assert_eq!(result.test_count, 1);
    })
    .await;
}

/// Memoized async test keyed by a version number. Counts body starts and
/// records the isolate each run declared.
fn memo_suite(calls: &Rc<Cell<usize>>, declared: &Rc<RefCell<Vec<IsolateRef>>>) -> Suite<u32> {
    let calls = Rc::clone(calls);
    let declared = Rc::clone(declared);
    Suite::new(move |scope: &mut SuiteScope<'_>, version: &u32| {
        let calls = Rc::clone(&calls);
        let node = scope.memo(
            "username",
            vec![json!(*version)],
            TestBody::future(move |_| {
                calls.set(calls.get() + 1);
                async {
                    sleep(Duration::from_millis(100)).await;
                    Ok(())
                }
            }),
        );
        declared.borrow_mut().push(node);
    })
}

#[tokio::test(start_paused = true)]
async fn memo_rerun_with_same_deps_reuses_pending_test() {
    local(async {
        let calls = Rc::new(Cell::new(0));
        let declared = Rc::new(RefCell::new(Vec::new()));
        let suite = memo_suite(&calls, &declared);

        suite.run(&1);
        sleep(Duration::from_millis(10)).await;
        suite.run(&1);

        {
            let declared = declared.borrow();
            assert!(Rc::ptr_eq(&declared[0], &declared[1]));
            assert!(test_isolate::is_pending(&declared[1]));
        }
        assert_eq!(calls.get(), 1);

        let result = suite.settled().await;
        assert_eq!(calls.get(), 1);
        assert!(result.is_valid());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn memo_recomputes_canceled_entry() {
    local(async {
        let calls = Rc::new(Cell::new(0));
        let declared = Rc::new(RefCell::new(Vec::new()));
        let suite = memo_suite(&calls, &declared);

        suite.run(&1);
        sleep(Duration::from_millis(10)).await;
        suite.run(&2);
        let first = Rc::clone(&declared.borrow()[0]);
        assert!(test_isolate::is_canceled(&first));

        suite.run(&1);
        {
            let declared = declared.borrow();
            assert!(!Rc::ptr_eq(&declared[2], &first));
            assert!(test_isolate::is_pending(&declared[2]));
            assert!(test_isolate::is_canceled(&declared[1]));
        }
        assert_eq!(calls.get(), 3);

        let result = suite.settled().await;
        assert!(result.is_valid());
        assert_eq!(result.test_count, 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn memo_hit_cancels_the_pending_test_it_displaces() {
    local(async {
        let calls = Rc::new(Cell::new(0));
        let declared = Rc::new(RefCell::new(Vec::new()));
        let suite = memo_suite(&calls, &declared);

        suite.run(&1);
        assert!(suite.settled().await.is_valid());
        suite.run(&2);
        let displaced = Rc::clone(&declared.borrow()[1]);
        assert!(test_isolate::is_pending(&displaced));

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        suite.subscribe(None, move |event| sink.borrow_mut().push(event.name()));
        events.borrow_mut().clear();

        suite.run(&1);
        assert!(Rc::ptr_eq(&declared.borrow()[2], &declared.borrow()[0]));
        assert!(test_isolate::is_canceled(&displaced));
        assert!(
            test_isolate::signal(&displaced)
                .expect("signal")
                .is_canceled()
        );
        assert!(!suite.is_pending(None));

        let settled_run = events.borrow().len();
        sleep(Duration::from_millis(200)).await;

        assert_eq!(events.borrow().len(), settled_run);
        assert!(!events.borrow().contains(&EventName::AsyncIsolateDone));
        assert_eq!(calls.get(), 2);
        assert!(suite.get().is_valid());
    })
    .await;
}
