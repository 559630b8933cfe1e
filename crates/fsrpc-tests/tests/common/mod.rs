//! Shared scenario-test scaffolding: a scriptable [`Policy`] stub and
//! the handful of builders every scenario test needs, mirroring the
//! per-crate `StubPolicy`/`ScriptedPolicy` fixtures each crate already
//! keeps in its own `#[cfg(test)]` modules.

use std::any::Any;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use fsrpc_core::{SecError, SecResult, VfsCred};
use fsrpc_policy::{CtxState, Policy, Registry, SecCreateCtx, SecState};

#[derive(Debug)]
pub struct StubState;

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

/// A policy whose refresh outcome and validity are configurable per
/// test, so a scenario can drive a `CliCtx` through exactly the
/// lifecycle transitions it needs to exercise.
pub struct ScriptedPolicy {
    pub number: u16,
    pub refresh_ok: bool,
    pub validate_ok: StdMutex<bool>,
}

impl ScriptedPolicy {
    #[must_use]
    pub fn new(number: u16, refresh_ok: bool) -> Self {
        Self {
            number,
            refresh_ok,
            validate_ok: StdMutex::new(false),
        }
    }
}

#[async_trait]
impl Policy for ScriptedPolicy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn policy_number(&self) -> u16 {
        self.number
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

/// A registry carrying a single scripted policy, keyed under its own
/// wire-policy number.
#[must_use]
pub fn registry_with(policy: Arc<ScriptedPolicy>) -> Registry {
    let registry = Registry::without_loader();
    registry.register(policy).unwrap();
    registry
}
