//! Scenario: a request arrives while another task is already driving a
//! context's refresh. The waiting request must not re-enter the refresh
//! path itself — it waits for the in-flight refresh's transition and
//! recovers once that transition lands, well inside its timeout.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{registry_with, ScriptedPolicy};
use fsrpc_core::flavor::policy_numbers;
use fsrpc_core::{Flavor, Part, VfsCred};
use fsrpc_pipeline::{refresh, Request};
use fsrpc_sec::{Import, Lifecycle};

#[tokio::test]
async fn waiter_recovers_once_the_in_flight_refresh_completes() {
    let flavor = Flavor::parse("ska").unwrap();
    let policy: Arc<dyn fsrpc_policy::Policy> =
        Arc::new(ScriptedPolicy::new(policy_numbers::SHARED_KEY, true));
    let import = Arc::new(Import::new());
    let sec = import
        .bind(policy, flavor, Part::Client, Duration::from_secs(60))
        .unwrap();

    let cred = VfsCred::for_flavor(flavor, 1000, 1000);
    let ctx = sec.get_ctx(cred, true, false).unwrap();
    // Simulate another request already driving the refresh upcall.
    assert!(ctx.try_start_refresh());

    let registry = registry_with(Arc::new(ScriptedPolicy::new(policy_numbers::SHARED_KEY, true)));
    let req = Request::new(flavor, 1000, 1000);
    req.bind_ctx(Arc::clone(&ctx));

    let waiter_ctx = Arc::clone(&ctx);
    let driver = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter_ctx.set_lifecycle(Lifecycle::UpToDate);
        waiter_ctx.finish_refresh();
    });

    let result = refresh(
        &req,
        &import,
        &registry,
        Part::Client,
        Duration::from_secs(60),
        Some(Duration::from_secs(5)),
    )
    .await;

    driver.await.unwrap();
    assert!(result.is_ok(), "waiter should recover once the driver finishes: {result:?}");
    assert_eq!(req.ctx().unwrap().lifecycle(), Lifecycle::UpToDate);
    assert!(ctx.waiters().is_empty(), "the waiter must remove itself once woken");
}

#[tokio::test]
async fn waiter_times_out_if_the_driver_never_finishes() {
    let flavor = Flavor::parse("ska").unwrap();
    let policy: Arc<dyn fsrpc_policy::Policy> =
        Arc::new(ScriptedPolicy::new(policy_numbers::SHARED_KEY, true));
    let import = Arc::new(Import::new());
    let sec = import
        .bind(policy, flavor, Part::Client, Duration::from_secs(60))
        .unwrap();

    let cred = VfsCred::for_flavor(flavor, 1000, 1000);
    let ctx = sec.get_ctx(cred, true, false).unwrap();
    assert!(ctx.try_start_refresh());

    let registry = registry_with(Arc::new(ScriptedPolicy::new(policy_numbers::SHARED_KEY, true)));
    let req = Request::new(flavor, 1000, 1000);
    req.bind_ctx(Arc::clone(&ctx));

    let err = refresh(
        &req,
        &import,
        &registry,
        Part::Client,
        Duration::from_secs(60),
        Some(Duration::from_millis(30)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, fsrpc_core::SecError::TimedOut(_)));
    assert!(req.is_timedout());
}
