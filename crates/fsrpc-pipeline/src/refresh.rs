//! The bounded context-refresh retry loop — the heart of the layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fsrpc_core::{Part, SecError, SecResult, VfsCred};
use fsrpc_policy::Registry;
use fsrpc_sec::{Import, Lifecycle};
use tracing::{debug, warn};

use crate::request::Request;

/// Safety bound on retry iterations so a logic error in the state
/// machine can't spin forever; no real sequence of transitions should
/// ever approach this.
const MAX_ITERATIONS: usize = 64;

/// Drive `req` to a usable context, refreshing, replacing, or waiting as
/// needed. Mirrors the bounded retry loop in the data model exactly:
/// re-validate, adapt on flavor mismatch, fast-path eternal contexts,
/// refresh a `New` context once, accept `UpToDate`, fail on `Error`,
/// replace `Dead`, and otherwise wait for another task's in-flight
/// refresh to finish.
///
/// `timeout` of `None` requests non-blocking behavior: if no other
/// outcome is immediately available, this returns
/// [`SecError::WouldBlock`] instead of waiting.
///
/// # Errors
///
/// Returns [`SecError::AccessDenied`] for a dying `Sec` or an errored
/// context, [`SecError::Interrupted`] for a deactivated import or a
/// cancelled wait, [`SecError::TimedOut`] if the bounded wait elapses,
/// or [`SecError::WouldBlock`] for a non-blocking call with an upcall
/// already in flight.
pub async fn refresh(
    req: &Request,
    import: &Arc<Import>,
    registry: &Registry,
    part: Part,
    gc_interval: Duration,
    timeout: Option<Duration>,
) -> SecResult<()> {
    for _ in 0..MAX_ITERATIONS {
        let sec = import.current_sec().ok_or_else(|| {
            SecError::AccessDenied("import has no bound security instance".to_string())
        })?;
        sec.validate_get()?;

        if sec.flavor() != req.flavor() {
            if let Some(old_ctx) = req.ctx() {
                old_ctx.remove_waiter(req.id());
            }
            let policy = registry.resolve(req.flavor().policy_number())?;
            let new_sec = import
                .adapt(policy, req.flavor(), part, gc_interval, None)
                .await?;
            let (uid, gid) = req.identity();
            let cred = VfsCred::for_flavor(req.flavor(), uid, gid);
            let ctx = new_sec.get_ctx(cred, true, false)?;
            req.bind_ctx(ctx);
            continue;
        }

        let ctx = match req.ctx() {
            Some(ctx) => ctx,
            None => {
                let (uid, gid) = req.identity();
                let cred = VfsCred::for_flavor(sec.flavor(), uid, gid);
                let ctx = sec.get_ctx(cred, true, false)?;
                req.bind_ctx(Arc::clone(&ctx));
                ctx
            }
        };

        if ctx.is_eternal() {
            return Ok(());
        }

        if ctx.lifecycle() == Lifecycle::New && ctx.try_start_refresh() {
            let outcome = sec.policy().refresh(ctx.policy_state().as_ref()).await;
            let ready = outcome.is_ok() && sec.policy().validate(ctx.policy_state().as_ref());
            ctx.set_lifecycle(if ready { Lifecycle::UpToDate } else { Lifecycle::Error });
            ctx.finish_refresh();
            debug_assert_ne!(
                ctx.lifecycle(),
                Lifecycle::New,
                "ctx refresh must clear the New state"
            );
        }

        if sec.policy().validate(ctx.policy_state().as_ref()) {
            return Ok(());
        }

        match ctx.lifecycle() {
            Lifecycle::Error => {
                ctx.remove_waiter(req.id());
                req.set_err();
                return Err(SecError::AccessDenied(format!(
                    "context for {:?} is in the error state",
                    ctx.cred()
                )));
            }
            Lifecycle::UpToDate if req.is_resent() => {
                debug!(request = %req.id(), "accepting resend against an up-to-date context");
                return Ok(());
            }
            Lifecycle::Dead => {
                if import.is_deactivated() {
                    req.set_err();
                    return Err(SecError::Interrupted(
                        "import deactivated while waiting for a live context".to_string(),
                    ));
                }
                let fresh = sec.replace_ctx(ctx.cred())?;
                req.bind_ctx(fresh);
                continue;
            }
            _ => {
                ctx.add_waiter(req.id());
                let Some(timeout) = timeout else {
                    ctx.remove_waiter(req.id());
                    return Err(SecError::WouldBlock);
                };

                let deadline = Instant::now() + timeout;
                let woke = ctx.wait_for_transition(timeout).await;
                ctx.remove_waiter(req.id());

                if req.is_interrupted() {
                    return Err(SecError::Interrupted(
                        "refresh wait cancelled".to_string(),
                    ));
                }
                if !woke {
                    warn!(request = %req.id(), "context refresh wait timed out");
                    req.set_timedout();
                    return Err(SecError::TimedOut(timeout));
                }
                if Instant::now() >= deadline {
                    req.set_timedout();
                    return Err(SecError::TimedOut(timeout));
                }
                continue;
            }
        }
    }

    Err(SecError::Protocol(
        "context refresh exceeded its retry budget".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use fsrpc_core::{Flavor, HashAlg, VfsCred};
    use fsrpc_policy::{CtxState, Policy, SecCreateCtx, SecState};

    use super::*;

    #[derive(Debug)]
    struct StubState;
    impl SecState for StubState {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl CtxState for StubState {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// A policy whose `refresh` outcome and `validate` result are
    /// configurable per test, so each scenario can drive the ctx
    /// lifecycle exactly where it needs to go.
    struct ScriptedPolicy {
        refresh_ok: bool,
        validate_ok: StdMutex<bool>,
    }

    #[async_trait]
    impl Policy for ScriptedPolicy {
        fn name(&self) -> &str {
            "scripted"
        }
        fn policy_number(&self) -> u16 {
            fsrpc_core::flavor::policy_numbers::SHARED_KEY
        }
        fn create_sec(&self, _ctx: &SecCreateCtx) -> SecResult<Box<dyn SecState>> {
            Ok(Box::new(StubState))
        }
        fn destroy_sec(&self, _state: &dyn SecState) {}
        fn kill_sec(&self, _state: &dyn SecState) {}
        fn lookup_ctx(
            &self,
            _sec: &dyn SecState,
            _cred: VfsCred,
            _create: bool,
            _remove_dead: bool,
        ) -> SecResult<Arc<dyn CtxState>> {
            Ok(Arc::new(StubState))
        }
        fn flush_ctx_cache(&self, _sec: &dyn SecState, _uid: Option<u32>, _grace: bool, _force: bool) {}
        fn sign(&self, _ctx: &dyn CtxState, _msg: &mut Vec<u8>) -> SecResult<()> {
            Ok(())
        }
        fn seal(&self, _ctx: &dyn CtxState, _msg: &mut Vec<u8>) -> SecResult<()> {
            Ok(())
        }
        fn verify(&self, _ctx: &dyn CtxState, _msg: &mut Vec<u8>) -> SecResult<()> {
            Ok(())
        }
        fn unseal(&self, _ctx: &dyn CtxState, _msg: &mut Vec<u8>) -> SecResult<()> {
            Ok(())
        }
        async fn refresh(&self, _ctx: &dyn CtxState) -> SecResult<()> {
            if self.refresh_ok {
                *self.validate_ok.lock().unwrap() = true;
                Ok(())
            } else {
                Err(SecError::AccessDenied("refresh hook failed".to_string()))
            }
        }
        fn validate(&self, _ctx: &dyn CtxState) -> bool {
            *self.validate_ok.lock().unwrap()
        }
        fn accept(&self, _msg: &[u8]) -> SecResult<Arc<dyn CtxState>> {
            Ok(Arc::new(StubState))
        }
    }

    fn registry_with(policy: Arc<ScriptedPolicy>) -> Registry {
        let registry = Registry::without_loader();
        registry.register(policy).unwrap();
        registry
    }

    #[tokio::test]
    async fn new_context_refreshes_to_ready() {
        let flavor = Flavor::parse("ska").unwrap();
        let policy: Arc<dyn Policy> = Arc::new(ScriptedPolicy {
            refresh_ok: true,
            validate_ok: StdMutex::new(false),
        });
        let import = Arc::new(Import::new());
        import
            .bind(Arc::clone(&policy), flavor, Part::Client, Duration::from_secs(60))
            .unwrap();
        let registry = registry_with(Arc::new(ScriptedPolicy {
            refresh_ok: true,
            validate_ok: StdMutex::new(false),
        }));

        let req = Request::new(flavor, 1000, 1000);
        let result = refresh(&req, &import, &registry, Part::Client, Duration::from_secs(60), Some(Duration::from_secs(1))).await;
        assert!(result.is_ok());
        assert_eq!(req.ctx().unwrap().lifecycle(), Lifecycle::UpToDate);
    }

    #[tokio::test]
    async fn failed_refresh_marks_context_errored() {
        let flavor = Flavor::parse("ska").unwrap();
        let policy: Arc<dyn Policy> = Arc::new(ScriptedPolicy {
            refresh_ok: false,
            validate_ok: StdMutex::new(false),
        });
        let import = Arc::new(Import::new());
        import
            .bind(Arc::clone(&policy), flavor, Part::Client, Duration::from_secs(60))
            .unwrap();
        let registry = registry_with(Arc::new(ScriptedPolicy {
            refresh_ok: false,
            validate_ok: StdMutex::new(false),
        }));

        let req = Request::new(flavor, 1000, 1000);
        let err = refresh(&req, &import, &registry, Part::Client, Duration::from_secs(60), Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SecError::AccessDenied(_)));
        assert!(req.is_err());
    }

    #[tokio::test]
    async fn dead_context_is_replaced_and_refreshed() {
        let flavor = Flavor::parse("ska").unwrap();
        let policy: Arc<dyn Policy> = Arc::new(ScriptedPolicy {
            refresh_ok: true,
            validate_ok: StdMutex::new(false),
        });
        let import = Arc::new(Import::new());
        let sec = import
            .bind(Arc::clone(&policy), flavor, Part::Client, Duration::from_secs(60))
            .unwrap();

        let cred = VfsCred::for_flavor(flavor, 1000, 1000);
        let old_ctx = sec.get_ctx(cred, true, false).unwrap();
        old_ctx.set_lifecycle(Lifecycle::Dead);

        let registry = registry_with(Arc::new(ScriptedPolicy {
            refresh_ok: true,
            validate_ok: StdMutex::new(false),
        }));
        let req = Request::new(flavor, 1000, 1000);
        req.bind_ctx(Arc::clone(&old_ctx));

        let result = refresh(&req, &import, &registry, Part::Client, Duration::from_secs(60), Some(Duration::from_secs(1))).await;
        assert!(result.is_ok());
        let new_ctx = req.ctx().unwrap();
        assert!(!Arc::ptr_eq(&new_ctx, &old_ctx));
        assert_eq!(new_ctx.lifecycle(), Lifecycle::UpToDate);
    }

    #[tokio::test]
    async fn deactivated_import_fails_dead_context_with_interrupted() {
        let flavor = Flavor::parse("ska").unwrap();
        let policy: Arc<dyn Policy> = Arc::new(ScriptedPolicy {
            refresh_ok: true,
            validate_ok: StdMutex::new(false),
        });
        let import = Arc::new(Import::new());
        let sec = import
            .bind(Arc::clone(&policy), flavor, Part::Client, Duration::from_secs(60))
            .unwrap();

        let cred = VfsCred::for_flavor(flavor, 1000, 1000);
        let ctx = sec.get_ctx(cred, true, false).unwrap();
        ctx.set_lifecycle(Lifecycle::Dead);
        import.deactivate();

        let registry = registry_with(Arc::new(ScriptedPolicy {
            refresh_ok: true,
            validate_ok: StdMutex::new(false),
        }));
        let req = Request::new(flavor, 1000, 1000);
        req.bind_ctx(ctx);

        let err = refresh(&req, &import, &registry, Part::Client, Duration::from_secs(60), Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SecError::Interrupted(_)));
        assert!(req.is_err());
    }

    #[tokio::test]
    async fn flavor_mismatch_triggers_adaptation() {
        let original = Flavor::parse("ska").unwrap();
        let requested = Flavor::parse("ski").unwrap();

        let bind_policy: Arc<dyn Policy> = Arc::new(ScriptedPolicy {
            refresh_ok: true,
            validate_ok: StdMutex::new(false),
        });
        let import = Arc::new(Import::new());
        import
            .bind(bind_policy, original, Part::Client, Duration::from_secs(60))
            .unwrap();

        let registry = registry_with(Arc::new(ScriptedPolicy {
            refresh_ok: true,
            validate_ok: StdMutex::new(false),
        }));

        let req = Request::new(requested, 1000, 1000);
        let result = refresh(&req, &import, &registry, Part::Client, Duration::from_secs(60), Some(Duration::from_secs(1))).await;
        assert!(result.is_ok());
        assert_eq!(import.current_sec().unwrap().flavor(), requested);
    }
}
