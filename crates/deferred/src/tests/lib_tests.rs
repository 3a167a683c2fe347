use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use tokio::sync::mpsc;

#[tokio::test]
async fn handlers_run_in_registration_order() {
    let deferred: Deferred<u32> = Deferred::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        let order = Arc::clone(&order);
        deferred.on_success(move |value| {
            order.lock().expect("order lock").push((tag, value));
            Ok(())
        });
    }

    deferred.fulfill(7).expect("fulfill");

    let seen = order.lock().expect("order lock").clone();
    assert_eq!(seen, vec![("first", 7), ("second", 7), ("third", 7)]);
}

#[tokio::test]
async fn fulfill_twice_is_an_invalid_transition() {
    let deferred: Deferred<u32> = Deferred::new();
    deferred.fulfill(1).expect("first fulfill");

    let err = deferred.fulfill(2).expect_err("second fulfill must fail");
    assert!(matches!(
        err,
        StateError::InvalidTransition {
            operation: "fulfill",
            state: State::Fulfilled,
        }
    ));

    let err = deferred.fail(anyhow!("late")).expect_err("fail after fulfill");
    assert!(matches!(err, StateError::InvalidTransition { .. }));
}

#[tokio::test]
async fn cancel_after_settlement_and_double_cancel_are_rejected() {
    let settled: Deferred<()> = Deferred::new();
    settled.fulfill(()).expect("fulfill");
    assert!(matches!(
        settled.cancel(),
        Err(StateError::InvalidTransition {
            operation: "cancel",
            ..
        })
    ));

    let canceled: Deferred<()> = Deferred::new();
    canceled.cancel().expect("first cancel");
    assert!(matches!(canceled.cancel(), Err(StateError::AlreadyCanceled)));
}

#[tokio::test]
async fn settling_a_canceled_deferred_is_a_silent_no_op() {
    let deferred: Deferred<u32> = Deferred::new();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        deferred.on_success(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    deferred.cancel().expect("cancel");
    deferred.fulfill(1).expect("fulfill after cancel is a no-op");
    deferred.fail(anyhow!("ignored")).expect("fail after cancel is a no-op");

    assert_eq!(deferred.state(), State::Canceled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn late_registration_receives_the_original_result_asynchronously() {
    let deferred: Deferred<String> = Deferred::new();
    deferred.fulfill("outcome".to_string()).expect("fulfill");

    let (tx, mut rx) = mpsc::unbounded_channel();
    deferred.on_success(move |value| {
        tx.send(value).expect("send");
        Ok(())
    });

    let delivered = rx.recv().await.expect("late delivery");
    assert_eq!(delivered, "outcome");
}

#[tokio::test]
async fn late_registration_on_a_failed_deferred_receives_the_failure() {
    let deferred: Deferred<()> = Deferred::failed(anyhow!("unit is not configured"));

    let (tx, mut rx) = mpsc::unbounded_channel();
    deferred.on_failure(move |failure| {
        tx.send(failure.to_string()).expect("send");
        Ok(())
    });

    let message = rx.recv().await.expect("late failure delivery");
    assert_eq!(message, "unit is not configured");
}

#[tokio::test]
async fn success_handler_error_diverts_into_the_error_chain() {
    let deferred: Deferred<u32> = Deferred::new();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let later = Arc::new(AtomicUsize::new(0));

    {
        let failures = Arc::clone(&failures);
        deferred.on_settled(
            |_| Err(anyhow!("observer blew up")),
            move |failure| {
                failures.lock().expect("failures lock").push(failure.to_string());
                Ok(())
            },
        );
    }
    {
        let later = Arc::clone(&later);
        deferred.on_success(move |_| {
            later.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    deferred.fulfill(3).expect("fulfill");

    let seen = failures.lock().expect("failures lock").clone();
    assert_eq!(seen, vec!["observer blew up".to_string()]);
    // Delivery diverted to the error chain before the second observer ran.
    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert_eq!(deferred.state(), State::Fulfilled);
}

#[tokio::test]
async fn failure_without_error_handlers_reaches_the_global_handler() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    set_global_error_handler(move |failure| {
        let _ = tx.send(failure.to_string());
    });

    let deferred: Deferred<()> = Deferred::new();
    deferred.on_success(|_| Ok(()));
    deferred.fail(anyhow!("nobody listened")).expect("fail");

    let message = rx.recv().await.expect("global delivery");
    assert_eq!(message, "nobody listened");
}

#[tokio::test]
async fn shared_failure_settles_several_deferreds() {
    let failure: Failure = Arc::new(anyhow!("fetch gave up"));
    let first: Deferred<()> = Deferred::new();
    let second: Deferred<()> = Deferred::new();

    let seen = Arc::new(AtomicUsize::new(0));
    for deferred in [&first, &second] {
        let seen = Arc::clone(&seen);
        deferred.on_failure(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    first.fail_shared(Arc::clone(&failure)).expect("fail first");
    second.fail_shared(failure).expect("fail second");
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}
