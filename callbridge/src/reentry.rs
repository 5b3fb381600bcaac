//! Building interpreted frames and handing them to bytecode dispatch.

use std::sync::Arc;

use crate::Value;
use crate::adapter::{self, ArgumentLayout, RequestedValues};
use crate::context::ExecutionContext;
use crate::error::{CallError, CallResult};
use crate::frames::{FrameKind, interpreted};
use crate::object::FunctionObject;

/// The bytecode dispatch loop.
pub trait BytecodeDispatch: Send + Sync {
    /// Runs the published interpreted frame at `fp` from its saved pc and
    /// accumulator until it returns. The frame itself is popped by the
    /// caller. On failure the frame's pc must be one past the faulting
    /// instruction.
    fn dispatch(&self, cx: &mut ExecutionContext, fp: usize) -> CallResult<Value>;
}

/// Header values of an interpreted frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameState {
    pub function: Value,
    pub this: Value,
    pub new_target: Value,
    pub env: Value,
    pub constants: Value,
    pub profile: Value,
    pub pc: usize,
    pub acc: Value,
}

impl FrameState {
    /// State at bytecode entry of `function`.
    #[must_use]
    pub fn fresh(function: Value, object: &FunctionObject, this: Value, new_target: Value) -> Self {
        Self {
            function,
            this,
            new_target,
            env: object.env,
            constants: object.constants,
            profile: object.profile,
            pc: 0,
            acc: Value::HOLE,
        }
    }
}

/// Initial contents of the local registers.
#[derive(Debug, Clone, Copy)]
pub enum Registers<'a> {
    Fresh,
    /// Saved registers; missing trailing ones become `undefined`.
    Saved(&'a [Value]),
}

/// Initial contents of the argument region.
#[derive(Debug, Clone, Copy)]
pub enum Region<'a> {
    Adapt {
        layout: ArgumentLayout,
        args: &'a [Value],
    },
    Saved {
        slots: &'a [Value],
        argc: usize,
        overflow: Value,
    },
}

impl Region<'_> {
    fn len(&self) -> usize {
        match self {
            Self::Adapt { layout, .. } => layout.len(),
            Self::Saved { slots, .. } => slots.len(),
        }
    }
}

#[must_use]
pub fn interpreted_frame_size(num_vregs: usize, region_len: usize) -> usize {
    interpreted::HEADER + num_vregs + region_len
}

/// Builds and publishes an interpreted frame. The headroom check covers the
/// whole frame before any slot is written.
pub(crate) fn push_interpreted_frame(
    cx: &mut ExecutionContext,
    state: &FrameState,
    num_vregs: usize,
    registers: Registers<'_>,
    region: Region<'_>,
) -> CallResult<usize> {
    let region_len = region.len();
    let total = interpreted_frame_size(num_vregs, region_len);
    let fp = cx.begin_frame(FrameKind::Interpreted, total)?;
    let regs_start = fp + interpreted::HEADER;
    let region_start = regs_start + num_vregs;

    let (argc, overflow) = match region {
        Region::Adapt { layout, args } => {
            let requested = RequestedValues {
                function: state.function,
                new_target: state.new_target,
                this: state.this,
            };
            adapter::write_region(
                cx.stack.slice_mut(region_start, region_len),
                &layout,
                args,
                &requested,
            );
            let surplus = adapter::overflow_args(&layout, args);
            let overflow = if surplus.is_empty() {
                Value::UNDEFINED
            } else {
                cx.heap.allocate_array(surplus.to_vec())
            };
            (layout.actual, overflow)
        }
        Region::Saved {
            slots,
            argc,
            overflow,
        } => {
            cx.stack.slice_mut(region_start, region_len).copy_from_slice(slots);
            (argc, overflow)
        }
    };

    let regs = cx.stack.slice_mut(regs_start, num_vregs);
    match registers {
        Registers::Fresh => regs.fill(Value::UNDEFINED),
        Registers::Saved(saved) => {
            let n = saved.len().min(num_vregs);
            regs[..n].copy_from_slice(&saved[..n]);
            regs[n..].fill(Value::UNDEFINED);
        }
    }

    let stack = &mut cx.stack;
    stack.set_usize(fp + interpreted::PC, state.pc);
    stack.set(fp + interpreted::ACC, state.acc);
    stack.set(fp + interpreted::ENV, state.env);
    stack.set(fp + interpreted::CONSTPOOL, state.constants);
    stack.set(fp + interpreted::PROFILE, state.profile);
    stack.set(fp + interpreted::THIS, state.this);
    stack.set(fp + interpreted::FUNCTION, state.function);
    stack.set(fp + interpreted::NEW_TARGET, state.new_target);
    stack.set(fp + interpreted::OVERFLOW, overflow);
    stack.set_usize(fp + interpreted::ARGC, argc);
    stack.set_usize(fp + interpreted::VREGS, num_vregs);
    stack.set_usize(fp + interpreted::REGION_LEN, region_len);

    cx.publish(fp, total);
    Ok(fp)
}

/// Transfers control to the dispatch loop for the frame at `fp`. Errors
/// covered by the frame's handler table resume dispatch at the handler;
/// the rest return to the caller.
pub(crate) fn run_frame(cx: &mut ExecutionContext, fp: usize) -> CallResult<Value> {
    let dispatcher = cx.runtime.dispatcher();
    loop {
        match dispatcher.dispatch(cx, fp) {
            Err(error) => {
                if unwind_to_handler(cx, fp, &error).is_none() {
                    return Err(error);
                }
            }
            result => return result,
        }
    }
}

/// Drops everything above the interpreted frame at `fp` and points it at
/// the handler covering its faulting instruction, with the error value in
/// the accumulator. Returns the handler pc.
pub(crate) fn unwind_to_handler(
    cx: &mut ExecutionContext,
    fp: usize,
    error: &CallError,
) -> Option<usize> {
    let function = cx.stack.get(fp + interpreted::FUNCTION);
    let desc = Arc::clone(&cx.heap.function(function)?.descriptor);
    if desc.handlers.is_empty() {
        return None;
    }
    let faulting = cx.stack.get_usize(fp + interpreted::PC).checked_sub(1)?;
    let handler = desc.handler_for(faulting)?;
    log::debug!(
        "`{}` catches \"{error}\" at pc {faulting}, resuming at {handler}",
        desc.name
    );
    cx.pop_to(fp);
    cx.stack.set_usize(fp + interpreted::PC, handler);
    cx.stack.set(fp + interpreted::ACC, error.to_value());
    Some(handler)
}

/// Fresh call of an interpreted function.
pub(crate) fn enter_fresh(
    cx: &mut ExecutionContext,
    state: &FrameState,
    layout: ArgumentLayout,
    num_vregs: usize,
    args: &[Value],
) -> CallResult<Value> {
    let fp = push_interpreted_frame(
        cx,
        state,
        num_vregs,
        Registers::Fresh,
        Region::Adapt { layout, args },
    )?;
    run_frame(cx, fp)
}
