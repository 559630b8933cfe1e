//! Request/reply wire transformation: sign/seal on the way out,
//! verify/unseal on the way in, plus buffer growth.

use fsrpc_core::{SecError, SecResult, ServiceClass};
use fsrpc_sec::CliCtx;

use crate::request::Request;

/// Wrap `body` for transmission: signs or seals depending on the
/// request's negotiated service class, then checks the two wire
/// invariants every accepted request must satisfy.
///
/// # Errors
///
/// Returns whatever the policy's `sign`/`seal` hook returns, or
/// [`SecError::Protocol`] if the wrapped length isn't 8-byte aligned or
/// overruns `buf_capacity`.
pub fn wrap_request(
    req: &Request,
    ctx: &CliCtx,
    policy: &dyn fsrpc_policy::Policy,
    body: &mut Vec<u8>,
    buf_capacity: usize,
) -> SecResult<()> {
    match req.flavor().service() {
        ServiceClass::Null | ServiceClass::Auth | ServiceClass::Integrity => {
            policy.sign(ctx.policy_state().as_ref(), body)?;
        }
        ServiceClass::Privacy => {
            policy.seal(ctx.policy_state().as_ref(), body)?;
        }
    }

    if body.len() % 8 != 0 {
        return Err(SecError::Protocol(format!(
            "wrapped request length {} is not 8-byte aligned",
            body.len()
        )));
    }
    if body.len() > buf_capacity {
        return Err(SecError::Protocol(format!(
            "wrapped request length {} exceeds allocated buffer capacity {buf_capacity}",
            body.len()
        )));
    }
    Ok(())
}

/// A decoded reply's framing metadata, as observed before the body is
/// handed to the policy's `verify`/`unseal` hook.
#[derive(Debug, Clone, Copy)]
pub struct ReplyHeader {
    /// Offset into the receive buffer where the reply body starts.
    pub offset: usize,
    /// The wire-policy number the reply claims to be wrapped under.
    pub policy_number: u16,
}

/// Unwrap an incoming reply in place.
///
/// # Errors
///
/// Returns [`SecError::Protocol`] if the offset is zero while the
/// request advertised adaptive-timeout support, if the offset isn't
/// 8-byte aligned, or if the reply's policy number doesn't match the
/// request's; otherwise propagates whatever `verify`/`unseal` returns.
pub fn unwrap_reply(
    req: &Request,
    ctx: &CliCtx,
    policy: &dyn fsrpc_policy::Policy,
    header: ReplyHeader,
    body: &mut Vec<u8>,
) -> SecResult<()> {
    if header.offset == 0 && req.has_at_support() {
        return Err(SecError::Protocol(
            "zero reply offset is illegal when adaptive timeouts are advertised".to_string(),
        ));
    }
    if header.offset % 8 != 0 {
        return Err(SecError::Protocol(format!(
            "reply offset {} is not 8-byte aligned",
            header.offset
        )));
    }
    if header.policy_number != req.flavor().policy_number() {
        return Err(SecError::Protocol(format!(
            "reply policy {} does not match request policy {}",
            header.policy_number,
            req.flavor().policy_number()
        )));
    }

    match req.flavor().service() {
        ServiceClass::Null | ServiceClass::Auth | ServiceClass::Integrity => {
            policy.verify(ctx.policy_state().as_ref(), body)
        }
        ServiceClass::Privacy => policy.unseal(ctx.policy_state().as_ref(), body),
    }
}

/// A scratch request built from an early reply's bytes, decoded
/// independently of the live receive buffer so the transport can keep
/// reusing it.
#[derive(Debug)]
pub struct EarlyReply {
    header: ReplyHeader,
    body: Vec<u8>,
}

/// Build the scratch copy for an early reply.
///
/// Early replies are legal only when the request did *not* advertise
/// adaptive-timeout support (an AT-capable request treats offset zero
/// as a protocol violation, handled by [`unwrap_reply`]); this function
/// is for the non-AT, genuinely-early-reply path. The caller provides a
/// rounded-up copy sized to `expected_len`; any drift is rejected rather
/// than silently truncated or zero-padded.
///
/// # Errors
///
/// Returns [`SecError::Protocol`] if `bytes.len()` doesn't match
/// `expected_len` exactly.
pub fn unwrap_early_reply(
    header: ReplyHeader,
    bytes: &[u8],
    expected_len: usize,
) -> SecResult<EarlyReply> {
    if bytes.len() != expected_len {
        return Err(SecError::Protocol(format!(
            "early reply size {} does not match expected size {expected_len}",
            bytes.len()
        )));
    }
    Ok(EarlyReply {
        header,
        body: bytes.to_vec(),
    })
}

/// Release the scratch state built by [`unwrap_early_reply`], returning
/// its header and body for inspection (e.g. extending a request's
/// deadline) before it is dropped.
#[must_use]
pub fn finish_early_reply(early: EarlyReply) -> (ReplyHeader, Vec<u8>) {
    (early.header, early.body)
}

/// A contiguous buffer carrying several logically independent segments,
/// mirroring a `lustre_msg`'s segment table so growing one segment can
/// move the ones after it rather than reallocating the whole message.
#[derive(Debug, Clone, Default)]
pub struct SegmentedBuffer {
    data: Vec<u8>,
    bounds: Vec<usize>,
}

impl SegmentedBuffer {
    /// Build a segmented buffer from already-concatenated segment
    /// contents.
    #[must_use]
    pub fn new(segments: Vec<Vec<u8>>) -> Self {
        let mut data = Vec::new();
        let mut bounds = Vec::with_capacity(segments.len() + 1);
        bounds.push(0);
        for segment in segments {
            data.extend_from_slice(&segment);
            bounds.push(data.len());
        }
        Self { data, bounds }
    }

    /// The full contiguous buffer.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.bounds.len().saturating_sub(1)
    }

    /// The current length of segment `index`.
    #[must_use]
    pub fn segment_len(&self, index: usize) -> usize {
        self.bounds[index + 1] - self.bounds[index]
    }

    /// Grow segment `index` in place to `newsize`, memmoving every
    /// trailing segment to the right. A no-op if the segment is already
    /// at least `newsize`. The caller is responsible for having already
    /// ensured the enclosing buffer has headroom, per the data model —
    /// this only shifts bytes and extends the backing `Vec`.
    ///
    /// # Errors
    ///
    /// Returns [`SecError::Protocol`] if `index` is out of range.
    pub fn enlarge_segment_inplace(&mut self, index: usize, newsize: usize) -> SecResult<()> {
        if index + 1 >= self.bounds.len() {
            return Err(SecError::Protocol(format!(
                "segment index {index} out of range"
            )));
        }
        let current = self.segment_len(index);
        if current >= newsize {
            return Ok(());
        }
        let grow_by = newsize - current;
        let insert_at = self.bounds[index + 1];
        self.data.splice(insert_at..insert_at, std::iter::repeat(0u8).take(grow_by));
        for bound in &mut self.bounds[index + 1..] {
            *bound += grow_by;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Arc;

    use async_trait::async_trait;
    use fsrpc_core::{Flavor, VfsCred};
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

    struct EchoPolicy;

    #[async_trait]
    impl Policy for EchoPolicy {
        fn name(&self) -> &str {
            "echo"
        }
        fn policy_number(&self) -> u16 {
            0
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
        fn sign(&self, _ctx: &dyn CtxState, msg: &mut Vec<u8>) -> SecResult<()> {
            msg.extend_from_slice(b"SIGNED");
            while msg.len() % 8 != 0 {
                msg.push(0);
            }
            Ok(())
        }
        fn seal(&self, _ctx: &dyn CtxState, msg: &mut Vec<u8>) -> SecResult<()> {
            msg.extend_from_slice(b"SEALED");
            while msg.len() % 8 != 0 {
                msg.push(0);
            }
            Ok(())
        }
        fn verify(&self, _ctx: &dyn CtxState, _msg: &mut Vec<u8>) -> SecResult<()> {
            Ok(())
        }
        fn unseal(&self, _ctx: &dyn CtxState, _msg: &mut Vec<u8>) -> SecResult<()> {
            Ok(())
        }
        async fn refresh(&self, _ctx: &dyn CtxState) -> SecResult<()> {
            Ok(())
        }
        fn validate(&self, _ctx: &dyn CtxState) -> bool {
            true
        }
        fn accept(&self, _msg: &[u8]) -> SecResult<Arc<dyn CtxState>> {
            Ok(Arc::new(StubState))
        }
    }

    fn ctx() -> Arc<CliCtx> {
        CliCtx::new(VfsCred::root(), Arc::new(StubState), false)
    }

    #[test]
    fn wrap_request_signs_and_checks_alignment() {
        let req = Request::new(Flavor::plain(fsrpc_core::HashAlg::Default), 0, 0);
        let ctx = ctx();
        let mut body = b"hello".to_vec();
        wrap_request(&req, &ctx, &EchoPolicy, &mut body, 64).unwrap();
        assert_eq!(body.len() % 8, 0);
    }

    #[test]
    fn wrap_request_rejects_overrun() {
        let req = Request::new(Flavor::plain(fsrpc_core::HashAlg::Default), 0, 0);
        let ctx = ctx();
        let mut body = b"hello".to_vec();
        let err = wrap_request(&req, &ctx, &EchoPolicy, &mut body, 4).unwrap_err();
        assert!(matches!(err, SecError::Protocol(_)));
    }

    #[test]
    fn unwrap_reply_rejects_zero_offset_with_at_support() {
        let req = Request::new(Flavor::plain(fsrpc_core::HashAlg::Default), 0, 0).at_support(true);
        let ctx = ctx();
        let header = ReplyHeader {
            offset: 0,
            policy_number: req.flavor().policy_number(),
        };
        let mut body = Vec::new();
        let err = unwrap_reply(&req, &ctx, &EchoPolicy, header, &mut body).unwrap_err();
        assert!(matches!(err, SecError::Protocol(_)));
    }

    #[test]
    fn unwrap_reply_rejects_misaligned_offset() {
        let req = Request::new(Flavor::plain(fsrpc_core::HashAlg::Default), 0, 0);
        let ctx = ctx();
        let header = ReplyHeader {
            offset: 3,
            policy_number: req.flavor().policy_number(),
        };
        let mut body = Vec::new();
        let err = unwrap_reply(&req, &ctx, &EchoPolicy, header, &mut body).unwrap_err();
        assert!(matches!(err, SecError::Protocol(_)));
    }

    #[test]
    fn unwrap_reply_rejects_policy_mismatch() {
        let req = Request::new(Flavor::plain(fsrpc_core::HashAlg::Default), 0, 0);
        let ctx = ctx();
        let header = ReplyHeader {
            offset: 8,
            policy_number: req.flavor().policy_number() + 1,
        };
        let mut body = Vec::new();
        let err = unwrap_reply(&req, &ctx, &EchoPolicy, header, &mut body).unwrap_err();
        assert!(matches!(err, SecError::Protocol(_)));
    }

    #[test]
    fn early_reply_rejects_size_drift() {
        let header = ReplyHeader {
            offset: 0,
            policy_number: 0,
        };
        let err = unwrap_early_reply(header, b"abc", 4).unwrap_err();
        assert!(matches!(err, SecError::Protocol(_)));
    }

    #[test]
    fn early_reply_round_trips_through_finish() {
        let header = ReplyHeader {
            offset: 0,
            policy_number: 0,
        };
        let early = unwrap_early_reply(header, b"abcd", 4).unwrap();
        let (out_header, out_bytes) = finish_early_reply(early);
        assert_eq!(out_header.policy_number, 0);
        assert_eq!(out_bytes, b"abcd");
    }

    #[test]
    fn enlarge_segment_shifts_trailing_segments_right() {
        let mut buf = SegmentedBuffer::new(vec![vec![1, 2], vec![3, 4], vec![5, 6]]);
        buf.enlarge_segment_inplace(0, 5).unwrap();
        assert_eq!(buf.segment_len(0), 5);
        assert_eq!(buf.segment_len(1), 2);
        assert_eq!(buf.segment_len(2), 2);
        assert_eq!(&buf.as_bytes()[0..2], &[1, 2]);
        assert_eq!(&buf.as_bytes()[5..7], &[3, 4]);
        assert_eq!(&buf.as_bytes()[7..9], &[5, 6]);
    }

    #[test]
    fn enlarge_segment_is_noop_when_already_big_enough() {
        let mut buf = SegmentedBuffer::new(vec![vec![1, 2, 3]]);
        buf.enlarge_segment_inplace(0, 2).unwrap();
        assert_eq!(buf.segment_len(0), 3);
    }
}
