//! Scenario: a request arrives for a flavor the bound `Sec` no longer
//! carries (a live rename), so the refresh loop must adapt the import
//! before the request can proceed, and the old `Sec` must not
//! resurrect once every reference to it drops.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{registry_with, ScriptedPolicy};
use fsrpc_core::flavor::policy_numbers;
use fsrpc_core::{Flavor, Part};
use fsrpc_pipeline::{refresh, Request};
use fsrpc_sec::Import;

#[tokio::test]
async fn adapting_to_a_renamed_flavor_drops_the_old_sec() {
    let original = Flavor::parse("ska").unwrap();
    let renamed = Flavor::parse("ski").unwrap();

    let bind_policy: Arc<dyn fsrpc_policy::Policy> =
        Arc::new(ScriptedPolicy::new(policy_numbers::SHARED_KEY, true));
    let import = Arc::new(Import::new());
    import
        .bind(bind_policy, original, Part::Client, Duration::from_secs(60))
        .unwrap();

    let old_sec = import.current_sec().unwrap();
    assert!(!old_sec.is_dying());

    let registry = registry_with(Arc::new(ScriptedPolicy::new(policy_numbers::SHARED_KEY, true)));

    let req = Request::new(renamed, 1000, 1000);
    let result = refresh(
        &req,
        &import,
        &registry,
        Part::Client,
        Duration::from_secs(60),
        Some(Duration::from_secs(1)),
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(import.current_sec().unwrap().flavor(), renamed);
    assert!(old_sec.is_dying(), "the replaced sec must be killed, not left live");
    assert!(!Arc::ptr_eq(&old_sec, &import.current_sec().unwrap()));
}
