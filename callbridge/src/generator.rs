use crate::adapter::ArgumentLayout;
use crate::context::ExecutionContext;
use crate::dispatch::{self, Callee};
use crate::error::{CallError, CallResult};
use crate::object::{GeneratorContext, GeneratorState};
use crate::reentry::{self, FrameState, Registers, Region};
use crate::Value;

/// Marks the generator as executing and returns its saved context.
fn begin(cx: &mut ExecutionContext, generator: Value) -> CallResult<GeneratorContext> {
    let Some(context) = cx.heap.generator_mut(generator) else {
        return Err(CallError::InvalidGeneratorState);
    };
    match context.state {
        GeneratorState::SuspendedStart | GeneratorState::SuspendedYield => {}
        GeneratorState::Executing | GeneratorState::Completed => {
            return Err(CallError::InvalidGeneratorState);
        }
    }
    let saved = context.clone();
    context.state = GeneratorState::Executing;
    if saved.state == GeneratorState::SuspendedStart {
        // The body's first instruction receives the generator in acc.
        return Ok(GeneratorContext {
            acc: generator,
            ..saved
        });
    }
    Ok(saved)
}

/// Runs the generator until it suspends again or finishes.
pub fn resume_generator(cx: &mut ExecutionContext, generator: Value) -> CallResult<Value> {
    let saved = begin(cx, generator)?;
    log::debug!("resume generator {generator:?} at pc {}", saved.pc);

    let result = run(cx, &saved);

    // A suspension stored its own state; anything else finishes the body.
    if let Some(context) = cx.heap.generator_mut(generator) {
        if context.state == GeneratorState::Executing {
            context.state = GeneratorState::Completed;
        }
    }
    result
}

/// Resumes a suspended generator with `value` as the result of its yield.
pub fn send_generator(
    cx: &mut ExecutionContext,
    generator: Value,
    value: Value,
) -> CallResult<Value> {
    if let Some(context) = cx.heap.generator_mut(generator) {
        if context.state == GeneratorState::SuspendedYield {
            context.acc = value;
        }
    }
    resume_generator(cx, generator)
}

fn run(cx: &mut ExecutionContext, saved: &GeneratorContext) -> CallResult<Value> {
    let Some(object) = cx.heap.function(saved.function).cloned() else {
        return Err(CallError::InvalidGeneratorState);
    };
    let num_vregs = object.descriptor.num_vregs;
    let state = FrameState {
        function: saved.function,
        this: saved.this,
        new_target: saved.new_target,
        env: saved.env,
        constants: object.constants,
        profile: object.profile,
        pc: saved.pc,
        acc: saved.acc,
    };

    let mut scope = cx.enter_call()?;
    let layout = ArgumentLayout::new(
        object.descriptor.arity,
        object.descriptor.shape,
        saved.argc,
    );
    dispatch::push_linkage_frames(&mut scope, Callee::Interpreted, &layout)?;
    let fp = reentry::push_interpreted_frame(
        &mut scope,
        &state,
        num_vregs,
        Registers::Saved(&saved.registers),
        Region::Saved {
            slots: &saved.region,
            argc: saved.argc,
            overflow: saved.overflow,
        },
    )?;
    reentry::run_frame(&mut scope, fp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Op;
    use crate::context::ContextCreateInfo;
    use crate::frames::FrameKind;
    use crate::function::{CallableDescriptor, FunctionKind};
    use crate::runtime::{Runtime, RuntimeCreateInfo};

    fn context() -> ExecutionContext {
        Runtime::new(RuntimeCreateInfo::default()).new_context(&ContextCreateInfo::default())
    }

    /// function* counter(n) { yield n; yield n + 1; return 100; }
    fn counter(cx: &mut ExecutionContext) -> Value {
        let desc = CallableDescriptor::interpreted(
            "counter",
            1,
            2,
            vec![
                Op::CreateGenerator,
                Op::Star(0),
                Op::LdaArg(0),
                Op::Star(1),
                Op::Suspend(0),
                Op::LdaSmi(1),
                Op::Add(1),
                Op::Suspend(0),
                Op::LdaSmi(100),
                Op::Return,
            ],
        )
        .with_kind(FunctionKind::Generator);
        cx.heap.allocate_function(desc.into_shared())
    }

    fn state(cx: &ExecutionContext, generator: Value) -> Option<GeneratorState> {
        cx.heap.generator(generator).map(|g| g.state)
    }

    #[test]
    fn yields_then_completes() {
        let mut cx = context();
        let f = counter(&mut cx);
        let generator = cx.invoke(f, Value::UNDEFINED, &[Value::fixnum(5)]).unwrap();
        assert_eq!(state(&cx, generator), Some(GeneratorState::SuspendedStart));

        assert_eq!(cx.resume_generator(generator), Ok(Value::fixnum(5)));
        assert_eq!(state(&cx, generator), Some(GeneratorState::SuspendedYield));
        assert_eq!(cx.resume_generator(generator), Ok(Value::fixnum(6)));
        assert_eq!(cx.resume_generator(generator), Ok(Value::fixnum(100)));
        assert_eq!(state(&cx, generator), Some(GeneratorState::Completed));

        assert_eq!(
            cx.resume_generator(generator),
            Err(CallError::InvalidGeneratorState)
        );
        assert!(cx.top_fp().is_none());
        assert_eq!(cx.stack.sp(), cx.stack.capacity());
    }

    #[test]
    fn sent_value_replaces_the_accumulator() {
        let mut cx = context();
        // function* echo() { const x = yield 1; return x; }
        let desc = CallableDescriptor::interpreted(
            "echo",
            0,
            1,
            vec![
                Op::CreateGenerator,
                Op::Star(0),
                Op::LdaSmi(1),
                Op::Suspend(0),
                Op::Return,
            ],
        )
        .with_kind(FunctionKind::Generator);
        let f = cx.heap.allocate_function(desc.into_shared());
        let generator = cx.invoke(f, Value::UNDEFINED, &[]).unwrap();

        assert_eq!(send_generator(&mut cx, generator, Value::TRUE), Ok(Value::fixnum(1)));
        assert_eq!(
            send_generator(&mut cx, generator, Value::fixnum(9)),
            Ok(Value::fixnum(9))
        );
    }

    #[test]
    fn throwing_body_completes_the_generator() {
        let mut cx = context();
        let desc = CallableDescriptor::interpreted(
            "fails",
            0,
            0,
            vec![Op::CreateGenerator, Op::LdaSmi(2), Op::Throw],
        )
        .with_kind(FunctionKind::Generator);
        let f = cx.heap.allocate_function(desc.into_shared());
        let generator = cx.invoke(f, Value::UNDEFINED, &[]).unwrap();
        assert_eq!(
            cx.resume_generator(generator),
            Err(CallError::Thrown(Value::fixnum(2)))
        );
        assert_eq!(state(&cx, generator), Some(GeneratorState::Completed));
    }

    #[test]
    fn resumed_frame_sits_on_an_entry_frame() {
        use crate::function::NativeFlavour;
        use crate::native::NativeCall;

        fn kinds(call: &mut NativeCall<'_>) -> CallResult<Value> {
            let kinds: Vec<Value> = call.context().frames().map(|f| f.kind().to_word()).collect();
            Ok(call.heap().allocate_array(kinds))
        }

        let mut cx = context();
        let native = CallableDescriptor::native("kinds", 0, NativeFlavour::Builtin, kinds);
        let observer = cx.heap.allocate_function(native.into_shared());
        let desc = CallableDescriptor::interpreted(
            "observe",
            1,
            1,
            vec![
                Op::CreateGenerator,
                Op::LdaArg(0),
                Op::Star(0),
                Op::Call {
                    callee: 0,
                    receiver: None,
                    first_arg: 0,
                    argc: 0,
                },
                Op::Return,
            ],
        )
        .with_kind(FunctionKind::Generator);
        let f = cx.heap.allocate_function(desc.into_shared());
        let generator = cx.invoke(f, Value::UNDEFINED, &[observer]).unwrap();
        let result = cx.resume_generator(generator).unwrap();
        assert_eq!(
            cx.heap.array(result),
            Some(
                &[
                    FrameKind::Builtin.to_word(),
                    FrameKind::Interpreted.to_word(),
                    FrameKind::Entry.to_word(),
                ][..]
            )
        );
    }

    #[test]
    fn non_generators_cannot_be_resumed() {
        let mut cx = context();
        let array = cx.heap.allocate_array(vec![]);
        assert_eq!(cx.resume_generator(array), Err(CallError::InvalidGeneratorState));
        assert_eq!(
            cx.resume_generator(Value::fixnum(1)),
            Err(CallError::InvalidGeneratorState)
        );
    }
}
