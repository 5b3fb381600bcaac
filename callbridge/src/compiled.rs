use crate::adapter::{self, ArgumentLayout, RequestedValues};
use crate::context::ExecutionContext;
use crate::deopt::{self, DeoptBundle};
use crate::dispatch;
use crate::error::{CallResult, frame_corruption};
use crate::frames::{Frame, FrameKind, compiled};
use crate::object::FunctionObject;
use crate::walker::NO_SAFEPOINT;
use crate::{Heap, Value};

/// Index of a code object in the runtime's code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CodeId(u32);

impl CodeId {
    #[inline(always)]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[inline(always)]
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Machine entry of a compiled function.
pub type CompiledEntry = fn(&mut CompiledCall<'_>) -> CallResult<Value>;

/// A compiled code object.
#[derive(Clone)]
pub struct CompiledCode {
    pub name: String,
    pub entry: CompiledEntry,
    pub spill_slots: usize,
    /// Live spill offsets per safepoint id. Id 0 is reserved for "none".
    pub safepoints: Vec<(u32, Vec<usize>)>,
}

impl core::fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompiledCode")
            .field("name", &self.name)
            .field("spill_slots", &self.spill_slots)
            .field("safepoints", &self.safepoints)
            .finish()
    }
}

/// View of the running compiled frame handed to its entry.
pub struct CompiledCall<'a> {
    cx: &'a mut ExecutionContext,
    fp: usize,
    layout: ArgumentLayout,
}

impl CompiledCall<'_> {
    #[inline]
    pub fn context(&mut self) -> &mut ExecutionContext {
        self.cx
    }

    #[inline]
    pub fn heap(&mut self) -> &mut Heap {
        &mut self.cx.heap
    }

    #[must_use]
    pub fn frame(&self) -> Frame<'_> {
        Frame::at(&self.cx.stack, self.fp)
    }

    #[must_use]
    pub fn argc(&self) -> usize {
        self.layout.actual
    }

    #[must_use]
    pub fn arg(&self, i: usize) -> Value {
        let region = self.fp + compiled::HEADER + self.spill_count();
        if let Some(slot) = self.layout.arg_slot(i) {
            return self.cx.stack.get(region + slot);
        }
        let overflow = self.cx.stack.get(self.fp + compiled::OVERFLOW);
        self.cx
            .heap
            .array(overflow)
            .and_then(|rest| rest.get(i - self.layout.declared).copied())
            .unwrap_or(Value::UNDEFINED)
    }

    #[must_use]
    pub fn this(&self) -> Value {
        self.cx.stack.get(self.fp + compiled::THIS)
    }

    #[must_use]
    pub fn new_target(&self) -> Value {
        self.cx.stack.get(self.fp + compiled::NEW_TARGET)
    }

    #[must_use]
    pub fn function(&self) -> Value {
        self.cx.stack.get(self.fp + compiled::FUNCTION)
    }

    fn spill_count(&self) -> usize {
        self.cx.stack.get_usize(self.fp + compiled::SPILLS)
    }

    fn spill_index(&self, i: usize) -> usize {
        let count = self.spill_count();
        if i >= count {
            frame_corruption(format_args!("spill slot {i} out of {count}"));
        }
        self.fp + compiled::HEADER + i
    }

    #[must_use]
    pub fn spill(&self, i: usize) -> Value {
        self.cx.stack.get(self.spill_index(i))
    }

    pub fn set_spill(&mut self, i: usize, value: Value) {
        let index = self.spill_index(i);
        self.cx.stack.set(index, value);
    }

    /// Records the safepoint the code is stopped at. Its stack map decides
    /// which spill slots the collector visits.
    pub fn safepoint(&mut self, id: u32) {
        self.cx.stack.set_usize(self.fp + compiled::SAFEPOINT, id as usize);
    }

    /// Calls out of compiled code. The current safepoint must describe the
    /// live spills for the duration of the call.
    pub fn invoke(&mut self, callee: Value, this: Value, args: &[Value]) -> CallResult<Value> {
        dispatch::invoke(self.cx, callee, this, args)
    }

    pub fn construct(
        &mut self,
        callee: Value,
        new_target: Value,
        args: &[Value],
    ) -> CallResult<Value> {
        dispatch::construct(self.cx, callee, new_target, args)
    }

    /// Abandons compiled execution and continues in the interpreter.
    pub fn deoptimize(&mut self, bundle: &DeoptBundle) -> CallResult<Value> {
        log::debug!(
            "deoptimize at safepoint {}",
            self.cx.stack.get_usize(self.fp + compiled::SAFEPOINT)
        );
        deopt::reenter_interpreter(self.cx, bundle)
    }
}

/// Builds the compiled frame for `function` and jumps to its entry.
#[allow(clippy::too_many_arguments)]
pub(crate) fn call_compiled(
    cx: &mut ExecutionContext,
    function: Value,
    object: &FunctionObject,
    code_id: CodeId,
    layout: ArgumentLayout,
    this: Value,
    new_target: Value,
    args: &[Value],
) -> CallResult<Value> {
    let Some(code) = cx.runtime.code(code_id) else {
        frame_corruption(format_args!("{code_id:?} is not registered"));
    };
    let spills = code.spill_slots;
    let total = compiled::HEADER + spills + layout.len();
    let fp = cx.begin_frame(FrameKind::Compiled, total)?;
    cx.stack
        .slice_mut(fp + compiled::HEADER, spills)
        .fill(Value::UNDEFINED);
    let requested = RequestedValues {
        function,
        new_target,
        this,
    };
    adapter::write_region(
        cx.stack.slice_mut(fp + compiled::HEADER + spills, layout.len()),
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

    let stack = &mut cx.stack;
    stack.set(fp + compiled::FUNCTION, function);
    stack.set(fp + compiled::THIS, this);
    stack.set(fp + compiled::NEW_TARGET, new_target);
    stack.set(fp + compiled::ENV, object.env);
    stack.set(fp + compiled::OVERFLOW, overflow);
    stack.set_usize(fp + compiled::ARGC, layout.actual);
    stack.set_usize(fp + compiled::CODE, code_id.index() as usize);
    stack.set_usize(fp + compiled::SAFEPOINT, NO_SAFEPOINT as usize);
    stack.set_usize(fp + compiled::SPILLS, spills);
    stack.set_usize(fp + compiled::REGION_LEN, layout.len());
    cx.publish(fp, total);

    enter_code(cx, &code, fp, layout)
}

/// The one architecture-dependent step: transfer control to a code entry.
fn enter_code(
    cx: &mut ExecutionContext,
    code: &CompiledCode,
    fp: usize,
    layout: ArgumentLayout,
) -> CallResult<Value> {
    log::trace!("enter compiled `{}` at {fp}", code.name);
    let mut call = CompiledCall { cx, fp, layout };
    (code.entry)(&mut call)
}
