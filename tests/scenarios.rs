//! End-to-end scenarios: code under test running concurrently with the test
//! that intercepts its calls.

use std::time::Duration;

use testkit_rendezvous::matcher::{any, contains_str, gt, typed};
use testkit_rendezvous::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn coordinator() -> (Coordinator, RecordingReporter) {
    init_tracing();
    let reporter = RecordingReporter::new();
    let coordinator = Coordinator::new(reporter.clone()).unwrap();
    (coordinator, reporter)
}

/// Calls DoA, DoB and DoC concurrently and returns their results in order.
fn fan_out(coordinator: &Coordinator) -> impl Fn(Vec<Value>) -> Vec<Value> + Send + Sync {
    let sites: Vec<CallSite> = ["DoA", "DoB", "DoC"]
        .iter()
        .map(|name| coordinator.call_site(*name))
        .collect();
    move |_args| {
        std::thread::scope(|scope| {
            let handles: Vec<_> = sites
                .iter()
                .map(|site| scope.spawn(move || site.invoke(vec![])))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scenario_eventual_out_of_order() {
    let (coordinator, reporter) = coordinator();
    let execution = coordinator
        .targets()
        .start(fan_out(&coordinator), vec![])
        .unwrap();

    let c = coordinator.method("DoC").expect_exactly_async(vec![]);
    let a = coordinator.method("DoA").expect_exactly_async(vec![]);
    let b = coordinator.method("DoB").expect_exactly_async(vec![]);

    a.inject_return(values!["rA"]).unwrap();
    b.inject_return(values!["rB"]).unwrap();
    c.inject_return(values!["rC"]).unwrap();

    coordinator.wait().await;
    execution
        .expect_return(values!["rA", "rB", "rC"])
        .await
        .unwrap();

    assert!(a.is_matched() && b.is_matched() && c.is_matched());
    assert!(!reporter.has_failed());
    assert_eq!(coordinator.relay().backlog_len(), 0);
}

#[tokio::test]
async fn test_scenario_ordered_mismatch() {
    let (coordinator, reporter) = coordinator();
    let add = coordinator.call_site("Add");
    let caller = tokio::spawn(async move { add.submit(values![5, 5]).unwrap().wait().await });

    let err = coordinator
        .method("Add")
        .within(Duration::from_secs(5))
        .expect_exactly(values![2, 3])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::OrderedMismatch { .. }));
    let failures = reporter.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("Add(2, 3)"), "{}", failures[0]);
    assert!(failures[0].contains("Add(5, 5)"), "{}", failures[0]);

    // The rejected call is never queued for a later expectation.
    assert!(caller.await.unwrap().is_err());
    assert_eq!(coordinator.relay().backlog_len(), 0);
}

#[tokio::test]
async fn test_scenario_late_panic_assertion() {
    let (coordinator, reporter) = coordinator();
    let execution = coordinator
        .targets()
        .start(|_: Vec<Value>| -> Vec<Value> { panic!("boom") }, vec![])
        .unwrap();

    while !execution.is_finished() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    execution
        .expect_panic(Value::new("boom".to_string()))
        .await
        .unwrap();
    let pending = execution.expect_panic_matching_async(typed(contains_str("boo")));
    assert!(pending.is_complete());
    assert_eq!(pending.wait().await, Ok(()));
    assert!(!reporter.has_failed());
}

#[tokio::test]
async fn test_panic_text_matches_str_and_string() {
    let (coordinator, reporter) = coordinator();
    let targets = coordinator.targets();

    let direct = targets
        .start(|_: Vec<Value>| -> Vec<Value> { panic!("boom") }, vec![])
        .unwrap();
    direct.expect_panic(Value::new("boom")).await.unwrap();
    direct
        .expect_panic(Value::new("boom".to_string()))
        .await
        .unwrap();

    let site = coordinator.call_site("Fetch");
    let relayed = targets
        .start(move |args: Vec<Value>| site.invoke(args), values![1])
        .unwrap();
    let call = coordinator
        .method("Fetch")
        .expect_exactly(values![1])
        .await
        .unwrap();
    call.inject_panic(Value::new("boom")).unwrap();

    relayed.expect_panic(Value::new("boom")).await.unwrap();
    relayed
        .expect_panic(Value::new("boom".to_string()))
        .await
        .unwrap();
    assert!(!reporter.has_failed());
}

#[tokio::test]
async fn test_injection_order_independence() {
    let (coordinator, _reporter) = coordinator();

    // Response first, call second.
    let early = coordinator.method("Get").expect_exactly_async(values![1]);
    early.inject_return(values!["one"]).unwrap();
    let site = coordinator.call_site("Get");
    assert_eq!(site.invoke_async(values![1]).await, values!["one"]);

    // Call first, response second.
    let pending_call = site.submit(values![2]).unwrap();
    let late = coordinator.method("Get").expect_exactly_async(values![2]);
    while !late.is_matched() {
        tokio::task::yield_now().await;
    }
    late.inject_return(values!["two"]).unwrap();
    assert_eq!(
        pending_call.wait().await.unwrap(),
        testkit_rendezvous::relay::Response::Return(values!["two"])
    );

    coordinator.wait().await;
    assert!(early.is_done() && late.is_done());
}

#[tokio::test]
async fn test_round_trip_identity() {
    #[derive(Debug, Clone, PartialEq)]
    struct Order {
        id: u32,
        items: Vec<String>,
    }

    let (coordinator, _reporter) = coordinator();
    let order = Order {
        id: 7,
        items: vec!["tea".to_string()],
    };
    let site = coordinator.call_site("Submit");
    let sent = order.clone();
    let caller = tokio::spawn(async move { site.invoke_async(values![sent]).await });

    let call = coordinator
        .method("Submit")
        .expect_matching(matchers![any()])
        .await
        .unwrap();
    assert_eq!(call.arg(0).and_then(Value::cloned::<Order>), Some(order.clone()));
    call.inject_return(values![order.clone(), 3_usize]).unwrap();

    let returned = caller.await.unwrap();
    assert_eq!(returned[0].downcast_ref::<Order>(), Some(&order));
    assert_eq!(returned[1].cloned::<usize>(), Some(3));
}

#[tokio::test]
async fn test_matcher_based_ordered_sequence() {
    let (coordinator, reporter) = coordinator();
    let site = coordinator.call_site("Retry");
    let caller = tokio::spawn(async move {
        let mut seen = Vec::new();
        for attempt in 1..=3_u32 {
            seen.extend(site.invoke_async(values![attempt]).await);
        }
        seen
    });

    let retry = coordinator.method("Retry").within(Duration::from_secs(5));
    for expected in 1..=3_u32 {
        let call = retry
            .expect_matching(matchers![satisfies("is the next attempt", move |n: &u32| {
                *n == expected
            })])
            .await
            .unwrap();
        call.inject_return(values![expected * 10]).unwrap();
    }

    assert_eq!(caller.await.unwrap(), values![10_u32, 20_u32, 30_u32]);

    // A later ordered call must also satisfy the typed matcher.
    let site = coordinator.call_site("Retry");
    let _pending = site.submit(values![1_u32]).unwrap();
    let err = retry
        .expect_matching(matchers![typed(gt(5_u32))])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("argument 0"), "{err}");
    assert_eq!(reporter.failures().len(), 1);
}

#[tokio::test]
async fn test_eventual_blocking_expectations_interleave() {
    let (coordinator, reporter) = coordinator();
    let site = coordinator.call_site("Put");
    let caller = tokio::spawn(async move {
        for key in ["x", "y"] {
            site.invoke_async(values![key]).await;
        }
    });

    let put = coordinator.method("Put").eventually();
    let x = put.expect_exactly(values!["x"]).await.unwrap();
    x.inject_return(vec![]).unwrap();
    let y = put.expect_exactly(values!["y"]).await.unwrap();
    y.inject_return(vec![]).unwrap();

    caller.await.unwrap();
    assert!(!reporter.has_failed());
}
