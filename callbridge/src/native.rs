use crate::adapter::{self, ArgumentLayout, RequestedValues};
use crate::context::ExecutionContext;
use crate::dispatch;
use crate::error::CallResult;
use crate::frames::{Frame, FrameKind, native};
use crate::function::{CallableDescriptor, NativeFlavour};
use crate::{Heap, Value};

/// Entry point of a function implemented in Rust.
pub type NativeFn = fn(&mut NativeCall<'_>) -> CallResult<Value>;

/// Arguments and context handed to a [`NativeFn`].
pub struct NativeCall<'a> {
    cx: &'a mut ExecutionContext,
    fp: usize,
    /// `None` for argv frames, whose region holds the raw arguments.
    layout: Option<ArgumentLayout>,
}

impl NativeCall<'_> {
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
        self.cx.stack.get_usize(self.fp + native::ARGC)
    }

    /// Argument `i`, or `undefined` past the actual count.
    #[must_use]
    pub fn arg(&self, i: usize) -> Value {
        let region = self.fp + native::HEADER;
        match self.layout {
            None => {
                if i < self.argc() {
                    self.cx.stack.get(region + i)
                } else {
                    Value::UNDEFINED
                }
            }
            Some(layout) => {
                if let Some(slot) = layout.arg_slot(i) {
                    return self.cx.stack.get(region + slot);
                }
                let overflow = self.cx.stack.get(self.fp + native::OVERFLOW);
                self.cx
                    .heap
                    .array(overflow)
                    .and_then(|rest| rest.get(i - layout.declared).copied())
                    .unwrap_or(Value::UNDEFINED)
            }
        }
    }

    #[must_use]
    pub fn args(&self) -> Vec<Value> {
        (0..self.argc()).map(|i| self.arg(i)).collect()
    }

    #[must_use]
    pub fn this(&self) -> Value {
        self.cx.stack.get(self.fp + native::THIS)
    }

    #[must_use]
    pub fn new_target(&self) -> Value {
        self.cx.stack.get(self.fp + native::NEW_TARGET)
    }

    #[must_use]
    pub fn function(&self) -> Value {
        self.cx.stack.get(self.fp + native::FUNCTION)
    }

    /// Re-enters the engine from native code.
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
}

fn frame_kind(flavour: NativeFlavour, variadic: bool) -> FrameKind {
    match (flavour, variadic) {
        (NativeFlavour::Builtin, false) => FrameKind::Builtin,
        (NativeFlavour::Builtin, true) => FrameKind::BuiltinWithArgv,
        (NativeFlavour::Host, false) => FrameKind::NativeLeave,
        (NativeFlavour::Host, true) => FrameKind::NativeLeaveWithArgv,
    }
}

/// Pushes a native frame and runs `entry`.
///
/// Variadic natives get the raw arguments; fixed-arity ones get an adapted
/// region. Host natives become the context's leave frame for the duration;
/// the caller's call scope restores the previous one.
#[allow(clippy::too_many_arguments)]
pub(crate) fn call_native(
    cx: &mut ExecutionContext,
    function: Value,
    desc: &CallableDescriptor,
    entry: NativeFn,
    flavour: NativeFlavour,
    this: Value,
    new_target: Value,
    args: &[Value],
) -> CallResult<Value> {
    let variadic = desc.is_variadic();
    let kind = frame_kind(flavour, variadic);
    let layout = (!variadic).then(|| ArgumentLayout::new(desc.arity, desc.shape, args.len()));
    let region_len = layout.map_or(args.len(), |l| l.len());

    let total = native::HEADER + region_len;
    let fp = cx.begin_frame(kind, total)?;
    let region = cx.stack.slice_mut(fp + native::HEADER, region_len);
    let overflow = match &layout {
        None => {
            region.copy_from_slice(args);
            Value::UNDEFINED
        }
        Some(layout) => {
            let requested = RequestedValues {
                function,
                new_target,
                this,
            };
            adapter::write_region(region, layout, args, &requested);
            let surplus = adapter::overflow_args(layout, args);
            if surplus.is_empty() {
                Value::UNDEFINED
            } else {
                cx.heap.allocate_array(surplus.to_vec())
            }
        }
    };

    let stack = &mut cx.stack;
    stack.set_usize(fp + native::ARGC, args.len());
    stack.set(fp + native::FUNCTION, function);
    stack.set(fp + native::THIS, this);
    stack.set(fp + native::NEW_TARGET, new_target);
    stack.set(fp + native::OVERFLOW, overflow);
    stack.set_usize(fp + native::REGION_LEN, region_len);
    cx.publish(fp, total);

    if flavour == NativeFlavour::Host {
        cx.set_leave_frame(Some(fp));
    }
    log::trace!("enter native `{}` ({kind:?})", desc.name);
    let mut call = NativeCall { cx, fp, layout };
    entry(&mut call)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextCreateInfo;
    use crate::error::CallError;
    use crate::function::CallShape;
    use crate::runtime::{Runtime, RuntimeCreateInfo};

    fn context() -> ExecutionContext {
        Runtime::new(RuntimeCreateInfo::default()).new_context(&ContextCreateInfo::default())
    }

    fn native(cx: &mut ExecutionContext, arity: usize, shape: CallShape, flavour: NativeFlavour, entry: NativeFn) -> Value {
        let desc = CallableDescriptor::native("native", arity, flavour, entry).with_shape(shape);
        cx.heap.allocate_function(desc.into_shared())
    }

    fn third_arg(call: &mut NativeCall<'_>) -> CallResult<Value> {
        Ok(call.arg(2))
    }

    fn frame_kind_of_self(call: &mut NativeCall<'_>) -> CallResult<Value> {
        Ok(call.frame().kind().to_word())
    }

    fn leave_frame_is_self(call: &mut NativeCall<'_>) -> CallResult<Value> {
        let fp = call.frame().fp();
        Ok(Value::from_bool(call.context().leave_frame() == Some(fp)))
    }

    fn sum_all(call: &mut NativeCall<'_>) -> CallResult<Value> {
        let mut total = 0;
        for v in call.args() {
            total += v.as_fixnum().ok_or(CallError::InvalidOperand("sum"))?;
        }
        Ok(Value::from_i64(total))
    }

    #[test]
    fn fixed_arity_native_pads_and_overflows() {
        let mut cx = context();
        let f = native(&mut cx, 2, CallShape::NONE, NativeFlavour::Builtin, third_arg);
        let args = [1, 2, 3].map(Value::fixnum);
        assert_eq!(cx.invoke(f, Value::UNDEFINED, &args), Ok(Value::fixnum(3)));
        assert_eq!(cx.invoke(f, Value::UNDEFINED, &args[..1]), Ok(Value::UNDEFINED));
    }

    #[test]
    fn frame_kind_follows_flavour_and_shape() {
        let mut cx = context();
        let cases = [
            (NativeFlavour::Builtin, CallShape::NONE, FrameKind::Builtin),
            (NativeFlavour::Builtin, CallShape::VARIADIC, FrameKind::BuiltinWithArgv),
            (NativeFlavour::Host, CallShape::NONE, FrameKind::NativeLeave),
            (NativeFlavour::Host, CallShape::VARIADIC, FrameKind::NativeLeaveWithArgv),
        ];
        for (flavour, shape, expected) in cases {
            let f = native(&mut cx, 0, shape, flavour, frame_kind_of_self);
            assert_eq!(cx.invoke(f, Value::UNDEFINED, &[]), Ok(expected.to_word()));
        }
    }

    #[test]
    fn host_natives_become_the_leave_frame() {
        let mut cx = context();
        let host = native(&mut cx, 0, CallShape::NONE, NativeFlavour::Host, leave_frame_is_self);
        let builtin = native(&mut cx, 0, CallShape::NONE, NativeFlavour::Builtin, leave_frame_is_self);
        assert_eq!(cx.invoke(host, Value::UNDEFINED, &[]), Ok(Value::TRUE));
        assert_eq!(cx.invoke(builtin, Value::UNDEFINED, &[]), Ok(Value::FALSE));
        assert_eq!(cx.leave_frame(), None);
    }

    #[test]
    fn variadic_natives_see_every_argument() {
        let mut cx = context();
        let f = native(&mut cx, 0, CallShape::VARIADIC, NativeFlavour::Builtin, sum_all);
        let args = [1, 2, 3, 4, 5].map(Value::fixnum);
        assert_eq!(cx.invoke(f, Value::UNDEFINED, &args), Ok(Value::fixnum(15)));
    }
}
