//! Forwarding through bound functions and proxies.

use crate::context::ExecutionContext;
use crate::dispatch::{self, CallKind, CallRequest};
use crate::error::{CallError, CallResult};
use crate::object::{BoundFunctionRecord, ProxyObject};
use crate::Value;

/// Call trap of a proxy. Receives the caller's request untouched.
pub trait ProxyTrap: Send + Sync {
    fn call(
        &self,
        cx: &mut ExecutionContext,
        target: Value,
        request: CallRequest<'_>,
    ) -> CallResult<Value>;
}

/// Trap that calls or constructs the proxy target directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForwardingTrap;

impl ProxyTrap for ForwardingTrap {
    fn call(
        &self,
        cx: &mut ExecutionContext,
        target: Value,
        request: CallRequest<'_>,
    ) -> CallResult<Value> {
        let new_target = if request.new_target == request.target {
            target
        } else {
            request.new_target
        };
        dispatch::call(
            cx,
            CallRequest {
                target,
                new_target,
                ..request
            },
        )
    }
}

/// `bound_args ++ args`.
#[must_use]
pub fn flatten_bound_args(record: &BoundFunctionRecord, args: &[Value]) -> Vec<Value> {
    let mut flat = Vec::with_capacity(record.bound_args.len() + args.len());
    flat.extend_from_slice(&record.bound_args);
    flat.extend_from_slice(args);
    flat
}

pub(crate) fn forward_bound(
    cx: &mut ExecutionContext,
    request: CallRequest<'_>,
    record: &BoundFunctionRecord,
) -> CallResult<Value> {
    let args = flatten_bound_args(record, request.args);
    log::debug!(
        "bound {:?} -> {:?} with {} bound args",
        request.target,
        record.target,
        record.bound_args.len()
    );
    let forwarded = match request.kind {
        CallKind::Call => CallRequest {
            target: record.target,
            this: record.bound_this,
            new_target: Value::UNDEFINED,
            args: &args,
            kind: CallKind::Call,
        },
        CallKind::Construct => CallRequest {
            target: record.target,
            this: request.this,
            new_target: if request.new_target == request.target {
                record.target
            } else {
                request.new_target
            },
            args: &args,
            kind: CallKind::Construct,
        },
    };
    let mut scope = cx.enter_call()?;
    dispatch::call(&mut scope, forwarded)
}

pub(crate) fn forward_proxy(
    cx: &mut ExecutionContext,
    request: CallRequest<'_>,
    proxy: &ProxyObject,
) -> CallResult<Value> {
    let Some(trap) = &proxy.trap else {
        return Err(CallError::NonCallable(request.target));
    };
    log::debug!("proxy {:?} -> trap", request.target);
    let mut scope = cx.enter_call()?;
    trap.call(&mut scope, proxy.target, request)
}
