//! Call dispatch: classifies a target and routes it to the right entry.
//!
//! ```text
//! CheckCallable ─┬─ not callable ............ NonCallable
//!                ├─ bound function .......... forward, restart
//!                ├─ proxy ................... trap
//!                └─ function ─┬─ class ctor without `new` .. ClassConstructorMisuse
//!                             ├─ native ..... native frame
//!                             ├─ compiled ... linkage + compiled frame
//!                             └─ interpreted  linkage + interpreted frame
//! ```

use std::sync::Arc;

use crate::adapter::ArgumentLayout;
use crate::context::ExecutionContext;
use crate::error::{CallError, CallResult};
use crate::forward;
use crate::frames::FrameKind;
use crate::function::{CallableDescriptor, FunctionKind, Representation};
use crate::object::{BoundFunctionRecord, FunctionObject, HeapObject, ProxyObject};
use crate::reentry::{self, FrameState};
use crate::{Value, compiled, native};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Call,
    Construct,
}

/// One call in flight.
#[derive(Debug, Clone, Copy)]
pub struct CallRequest<'a> {
    pub target: Value,
    pub this: Value,
    /// `undefined` for ordinary calls.
    pub new_target: Value,
    pub args: &'a [Value],
    pub kind: CallKind,
}

impl<'a> CallRequest<'a> {
    #[must_use]
    pub fn call(target: Value, this: Value, args: &'a [Value]) -> Self {
        Self {
            target,
            this,
            new_target: Value::UNDEFINED,
            args,
            kind: CallKind::Call,
        }
    }

    #[must_use]
    pub fn construct(target: Value, new_target: Value, args: &'a [Value]) -> Self {
        Self {
            target,
            this: Value::HOLE,
            new_target,
            args,
            kind: CallKind::Construct,
        }
    }
}

enum Target {
    Function(FunctionObject),
    Bound(BoundFunctionRecord),
    Proxy(ProxyObject),
}

fn resolve(cx: &ExecutionContext, value: Value) -> CallResult<Target> {
    match cx.heap.get(value) {
        Some(HeapObject::Function(f)) => Ok(Target::Function(f.clone())),
        Some(HeapObject::Bound(b)) => Ok(Target::Bound(b.clone())),
        Some(HeapObject::Proxy(p)) => Ok(Target::Proxy(p.clone())),
        _ => Err(CallError::NonCallable(value)),
    }
}

pub fn invoke(
    cx: &mut ExecutionContext,
    callee: Value,
    this: Value,
    args: &[Value],
) -> CallResult<Value> {
    call(cx, CallRequest::call(callee, this, args))
}

pub fn construct(
    cx: &mut ExecutionContext,
    callee: Value,
    new_target: Value,
    args: &[Value],
) -> CallResult<Value> {
    call(cx, CallRequest::construct(callee, new_target, args))
}

/// Runs an accessor's getter with `receiver` as `this`. A missing getter
/// reads as `undefined`.
pub fn call_getter(cx: &mut ExecutionContext, getter: Value, receiver: Value) -> CallResult<Value> {
    if getter.is_undefined() {
        return Ok(Value::UNDEFINED);
    }
    call(cx, CallRequest::call(getter, receiver, &[]))
}

/// Runs an accessor's setter with `receiver` as `this` and `value` as its
/// only argument. A missing setter ignores the store.
pub fn call_setter(
    cx: &mut ExecutionContext,
    setter: Value,
    receiver: Value,
    value: Value,
) -> CallResult<()> {
    if setter.is_undefined() {
        return Ok(());
    }
    call(cx, CallRequest::call(setter, receiver, &[value]))?;
    Ok(())
}

pub fn call(cx: &mut ExecutionContext, request: CallRequest<'_>) -> CallResult<Value> {
    match resolve(cx, request.target)? {
        Target::Bound(record) => forward::forward_bound(cx, request, &record),
        Target::Proxy(proxy) => forward::forward_proxy(cx, request, &proxy),
        Target::Function(object) => call_function(cx, request, &object),
    }
}

fn call_function(
    cx: &mut ExecutionContext,
    request: CallRequest<'_>,
    object: &FunctionObject,
) -> CallResult<Value> {
    let desc = Arc::clone(&object.descriptor);
    match request.kind {
        CallKind::Call if desc.kind.is_class_constructor() => {
            return Err(CallError::ClassConstructorMisuse(desc.name.clone()));
        }
        CallKind::Construct if !desc.kind.is_constructor() => {
            return Err(CallError::NotAConstructor(request.target));
        }
        _ => {}
    }
    log::debug!(
        "{:?} `{}` {:?} argc={}",
        request.kind,
        desc.name,
        desc.repr,
        request.args.len()
    );

    let mut scope = cx.enter_call()?;
    let this = match request.kind {
        CallKind::Call => request.this,
        CallKind::Construct => allocate_receiver(&mut scope, &desc, request.new_target),
    };
    let layout = ArgumentLayout::new(desc.arity, desc.shape, request.args.len());

    let result = match &desc.repr {
        Representation::Native { entry, flavour } => native::call_native(
            &mut scope,
            request.target,
            &desc,
            *entry,
            *flavour,
            this,
            request.new_target,
            request.args,
        )?,
        Representation::Interpreted { .. } => {
            push_linkage_frames(&mut scope, Callee::Interpreted, &layout)?;
            let state = FrameState::fresh(request.target, object, this, request.new_target);
            reentry::enter_fresh(&mut scope, &state, layout, desc.num_vregs, request.args)?
        }
        Representation::Compiled { code } => {
            push_linkage_frames(&mut scope, Callee::Compiled, &layout)?;
            compiled::call_compiled(
                &mut scope,
                request.target,
                object,
                *code,
                layout,
                this,
                request.new_target,
                request.args,
            )?
        }
    };
    drop(scope);

    match request.kind {
        CallKind::Call => Ok(result),
        CallKind::Construct => construct_result(&desc, result, this),
    }
}

/// Fresh receiver for a constructor call. Derived constructors start with
/// an uninitialized `this`.
fn allocate_receiver(
    cx: &mut ExecutionContext,
    desc: &CallableDescriptor,
    new_target: Value,
) -> Value {
    if desc.kind == FunctionKind::DerivedClassConstructor {
        return Value::HOLE;
    }
    let prototype = cx
        .heap
        .function(new_target)
        .map(|f| f.prototype)
        .filter(|p| p.is_ref())
        .unwrap_or(Value::NULL);
    cx.heap.allocate(HeapObject::Plain { prototype })
}

fn construct_result(desc: &CallableDescriptor, result: Value, this: Value) -> CallResult<Value> {
    if result.is_ref() {
        return Ok(result);
    }
    match desc.kind {
        FunctionKind::DerivedClassConstructor => {
            Err(CallError::InvalidConstructorResult(desc.name.clone()))
        }
        _ => Ok(this),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Callee {
    Interpreted,
    Compiled,
}

/// Pushes the frames a managed callee needs between it and the current top.
///
/// | caller             | callee      | frames                          |
/// |--------------------|-------------|---------------------------------|
/// | host or native     | any managed | `Entry`                         |
/// | host or native     | compiled    | `Entry`, `ArgvUnfold`           |
/// | compiled           | interpreted | `Bridge`                        |
/// | any                | compiled, A<N | `ArgsConfig` before the frame |
pub(crate) fn push_linkage_frames(
    cx: &mut ExecutionContext,
    callee: Callee,
    layout: &ArgumentLayout,
) -> CallResult<()> {
    let top = cx.top_kind();
    let from_host = top.is_none_or(FrameKind::is_native);
    if from_host {
        cx.push_entry_frame()?;
    } else if top == Some(FrameKind::Compiled) && callee == Callee::Interpreted {
        cx.push_linkage_frame(FrameKind::Bridge, &[])?;
    }
    if callee == Callee::Compiled {
        if from_host {
            cx.push_linkage_frame(
                FrameKind::ArgvUnfold,
                &[Value::from_i64(layout.actual as i64)],
            )?;
        }
        if layout.actual < layout.declared {
            cx.push_linkage_frame(
                FrameKind::ArgsConfig,
                &[
                    Value::from_i64(layout.actual as i64),
                    Value::from_i64(layout.declared as i64),
                ],
            )?;
        }
    }
    Ok(())
}
