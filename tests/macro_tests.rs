//! Integration tests for the `#[testkit_rendezvous::test]` macro.

#![cfg(feature = "macros")]

use std::time::Duration;

use testkit_rendezvous::prelude::*;

/// Basic test without injection.
#[testkit_rendezvous::test]
async fn test_basic_async() {
    assert_eq!(2 + 2, 4);
}

/// Test with Coordinator injection.
#[testkit_rendezvous::test]
async fn test_with_coordinator(coordinator: Coordinator) {
    assert_eq!(coordinator.config().mode, MatchMode::Ordered);
    assert_eq!(coordinator.config().timeout, None);

    let add = coordinator.call_site("Add");
    let caller = tokio::spawn(async move { add.invoke_async(values![2, 3]).await });

    let call = coordinator
        .method("Add")
        .expect_exactly(values![2, 3])
        .await
        .unwrap();
    call.inject_return(values![5]).unwrap();

    assert_eq!(caller.await.unwrap(), values![5]);
}

/// Test with both parameters injected.
#[testkit_rendezvous::test]
async fn test_with_targets(coordinator: Coordinator, targets: TargetController) {
    let get = coordinator.call_site("Get");
    let execution = targets
        .start(move |args: Vec<Value>| get.invoke(args), values!["key"])
        .unwrap();

    let pending = coordinator.method("Get").expect_exactly_async(values!["key"]);
    pending.inject_return(values![7_u64]).unwrap();

    execution.expect_return(values![7_u64]).await.unwrap();
    coordinator.wait().await;
}

/// Test with configuration options.
#[testkit_rendezvous::test(timeout_ms = 250, eventually = true)]
async fn test_config_options(coordinator: Coordinator) {
    assert_eq!(coordinator.config().mode, MatchMode::Eventual);
    assert_eq!(coordinator.config().timeout, Some(Duration::from_millis(250)));
}

/// Test with multi_thread flavor.
#[testkit_rendezvous::test(flavor = "multi_thread")]
async fn test_multi_thread(coordinator: Coordinator) {
    let ping = coordinator.call_site("Ping");
    let handle = tokio::task::spawn_blocking(move || ping.invoke(vec![]));

    let call = coordinator.method("Ping").expect_exactly(vec![]).await.unwrap();
    call.inject_return(values![true]).unwrap();

    assert_eq!(handle.await.unwrap(), values![true]);
}

/// An ordered mismatch fails the test through the panic reporter.
#[testkit_rendezvous::test]
#[should_panic(expected = "unexpected call")]
async fn test_mismatch_fails_test(coordinator: Coordinator) {
    let _pending = coordinator.call_site("Add").submit(values![5, 5]).unwrap();
    let _ = coordinator.method("Add").expect_exactly(values![2, 3]).await;
}
