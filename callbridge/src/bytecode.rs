use std::sync::Arc;

use crate::adapter::ArgumentLayout;
use crate::context::ExecutionContext;
use crate::dispatch;
use crate::error::{CallError, CallResult, frame_corruption};
use crate::frames::{Frame, interpreted};
use crate::function::Representation;
use crate::object::{GeneratorContext, GeneratorState, HeapObject};
use crate::reentry::BytecodeDispatch;
use crate::{Heap, Value};

/// Accumulator-machine instruction set of the reference dispatcher.
///
/// Register operands index the frame's locals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    LdaUndefined,
    LdaSmi(i64),
    LdaConst(u32),
    Ldar(u32),
    Star(u32),
    /// Argument `i` as seen by `arguments[i]`, padding included.
    LdaArg(u32),
    LdaArgc,
    LdaThis,
    LdaNewTarget,
    LdaFunction,
    Add(u32),
    Sub(u32),
    Mul(u32),
    TestLessThan(u32),
    TestEqual(u32),
    Jump(u32),
    JumpIfFalse(u32),
    Call {
        callee: u32,
        receiver: Option<u32>,
        first_arg: u32,
        argc: u32,
    },
    Construct {
        callee: u32,
        first_arg: u32,
        argc: u32,
    },
    /// Captures the frame into a new generator and returns it.
    CreateGenerator,
    /// Saves the frame into the generator in the register and yields acc.
    Suspend(u32),
    Return,
    Throw,
}

const FIXNUM_MAX: i64 = (1 << 62) - 1;
const FIXNUM_MIN: i64 = -(1 << 62);

/// Reference implementation of the dispatch loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl BytecodeDispatch for Interpreter {
    fn dispatch(&self, cx: &mut ExecutionContext, fp: usize) -> CallResult<Value> {
        run(cx, fp)
    }
}

struct FrameInfo {
    bytecode: Arc<[Op]>,
    layout: ArgumentLayout,
    regs: usize,
    num_vregs: usize,
    region: usize,
}

fn frame_info(cx: &ExecutionContext, fp: usize) -> FrameInfo {
    let frame = Frame::at(&cx.stack, fp);
    let function = frame.field(interpreted::FUNCTION);
    let Some(object) = cx.heap.function(function) else {
        frame_corruption(format_args!("interpreted frame at {fp} has no function"));
    };
    let desc = &object.descriptor;
    let Representation::Interpreted { bytecode } = &desc.repr else {
        frame_corruption(format_args!("`{}` has no bytecode", desc.name));
    };
    let num_vregs = frame.locals_len();
    let regs = fp + interpreted::HEADER;
    FrameInfo {
        bytecode: Arc::clone(bytecode),
        layout: ArgumentLayout::new(
            desc.arity,
            desc.shape,
            frame.argc().unwrap_or_default(),
        ),
        regs,
        num_vregs,
        region: regs + num_vregs,
    }
}

impl FrameInfo {
    #[inline]
    fn reg(&self, r: u32) -> usize {
        let r = r as usize;
        if r >= self.num_vregs {
            frame_corruption(format_args!(
                "register r{r} out of range ({} registers)",
                self.num_vregs
            ));
        }
        self.regs + r
    }

    fn arg(&self, cx: &ExecutionContext, fp: usize, i: usize) -> Value {
        if let Some(slot) = self.layout.arg_slot(i) {
            return cx.stack.get(self.region + slot);
        }
        let overflow = cx.stack.get(fp + interpreted::OVERFLOW);
        cx.heap
            .array(overflow)
            .and_then(|rest| rest.get(i - self.layout.declared).copied())
            .unwrap_or(Value::UNDEFINED)
    }

    fn collect(&self, cx: &ExecutionContext, first: u32, count: u32) -> Vec<Value> {
        (first..first + count)
            .map(|r| cx.stack.get(self.reg(r)))
            .collect()
    }
}

fn constant(heap: &Heap, pool: Value, index: u32) -> Value {
    match heap.array(pool).and_then(|c| c.get(index as usize)) {
        Some(v) => *v,
        None => frame_corruption(format_args!("constant {index} missing from {pool:?}")),
    }
}

fn fixnums(op: &'static str, lhs: Value, rhs: Value) -> CallResult<(i64, i64)> {
    match (lhs.as_fixnum(), rhs.as_fixnum()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(CallError::InvalidOperand(op)),
    }
}

fn arith(
    op: &'static str,
    lhs: Value,
    rhs: Value,
    f: fn(i64, i64) -> Option<i64>,
) -> CallResult<Value> {
    let (a, b) = fixnums(op, lhs, rhs)?;
    match f(a, b) {
        Some(n) if (FIXNUM_MIN..=FIXNUM_MAX).contains(&n) => Ok(Value::from_i64(n)),
        _ => Err(CallError::InvalidOperand(op)),
    }
}

/// Stores pc and acc so walkers and callees see the live state.
#[inline]
fn sync(cx: &mut ExecutionContext, fp: usize, pc: usize, acc: Value) {
    cx.stack.set_usize(fp + interpreted::PC, pc);
    cx.stack.set(fp + interpreted::ACC, acc);
}

fn capture(cx: &ExecutionContext, fp: usize, pc: usize, acc: Value, state: GeneratorState) -> GeneratorContext {
    let frame = Frame::at(&cx.stack, fp);
    GeneratorContext {
        function: frame.field(interpreted::FUNCTION),
        this: frame.field(interpreted::THIS),
        new_target: frame.field(interpreted::NEW_TARGET),
        registers: frame.locals().to_vec(),
        region: frame.region().to_vec(),
        overflow: frame.field(interpreted::OVERFLOW),
        argc: frame.argc().unwrap_or_default(),
        pc,
        acc,
        env: frame.field(interpreted::ENV),
        state,
    }
}

/// Runs the frame; on failure pc (one past the faulting instruction) and
/// acc are left in the frame for handler lookup.
fn run(cx: &mut ExecutionContext, fp: usize) -> CallResult<Value> {
    let info = frame_info(cx, fp);
    let mut pc = cx.stack.get_usize(fp + interpreted::PC);
    let mut acc = cx.stack.get(fp + interpreted::ACC);
    let result = execute(cx, fp, &info, &mut pc, &mut acc);
    if result.is_err() {
        sync(cx, fp, pc, acc);
    }
    result
}

fn execute(
    cx: &mut ExecutionContext,
    fp: usize,
    info: &FrameInfo,
    pc: &mut usize,
    acc: &mut Value,
) -> CallResult<Value> {
    loop {
        let Some(&op) = info.bytecode.get(*pc) else {
            return Ok(Value::UNDEFINED);
        };
        *pc += 1;
        match op {
            Op::LdaUndefined => *acc = Value::UNDEFINED,
            Op::LdaSmi(n) => {
                if !(FIXNUM_MIN..=FIXNUM_MAX).contains(&n) {
                    return Err(CallError::InvalidOperand("LdaSmi"));
                }
                *acc = Value::from_i64(n);
            }
            Op::LdaConst(i) => {
                *acc = constant(&cx.heap, cx.stack.get(fp + interpreted::CONSTPOOL), i);
            }
            Op::Ldar(r) => *acc = cx.stack.get(info.reg(r)),
            Op::Star(r) => cx.stack.set(info.reg(r), *acc),
            Op::LdaArg(i) => *acc = info.arg(cx, fp, i as usize),
            Op::LdaArgc => *acc = Value::from_i64(info.layout.actual as i64),
            Op::LdaThis => *acc = cx.stack.get(fp + interpreted::THIS),
            Op::LdaNewTarget => *acc = cx.stack.get(fp + interpreted::NEW_TARGET),
            Op::LdaFunction => *acc = cx.stack.get(fp + interpreted::FUNCTION),
            Op::Add(r) => *acc = arith("Add", cx.stack.get(info.reg(r)), *acc, i64::checked_add)?,
            Op::Sub(r) => *acc = arith("Sub", cx.stack.get(info.reg(r)), *acc, i64::checked_sub)?,
            Op::Mul(r) => *acc = arith("Mul", cx.stack.get(info.reg(r)), *acc, i64::checked_mul)?,
            Op::TestLessThan(r) => {
                let (a, b) = fixnums("TestLessThan", cx.stack.get(info.reg(r)), *acc)?;
                *acc = Value::from_bool(a < b);
            }
            Op::TestEqual(r) => *acc = Value::from_bool(cx.stack.get(info.reg(r)) == *acc),
            Op::Jump(target) => *pc = target as usize,
            Op::JumpIfFalse(target) => {
                if !acc.is_truthy() {
                    *pc = target as usize;
                }
            }
            Op::Call {
                callee,
                receiver,
                first_arg,
                argc,
            } => {
                let callee = cx.stack.get(info.reg(callee));
                let this = receiver.map_or(Value::UNDEFINED, |r| cx.stack.get(info.reg(r)));
                let args = info.collect(cx, first_arg, argc);
                sync(cx, fp, *pc, *acc);
                *acc = dispatch::invoke(cx, callee, this, &args)?;
            }
            Op::Construct {
                callee,
                first_arg,
                argc,
            } => {
                let callee = cx.stack.get(info.reg(callee));
                let args = info.collect(cx, first_arg, argc);
                sync(cx, fp, *pc, *acc);
                *acc = dispatch::construct(cx, callee, callee, &args)?;
            }
            Op::CreateGenerator => {
                let context = capture(cx, fp, *pc, Value::UNDEFINED, GeneratorState::SuspendedStart);
                log::debug!("create generator, resume at pc {}", *pc);
                return Ok(cx.heap.allocate(HeapObject::Generator(context)));
            }
            Op::Suspend(r) => {
                let generator = cx.stack.get(info.reg(r));
                let context = capture(cx, fp, *pc, *acc, GeneratorState::SuspendedYield);
                let Some(slot) = cx.heap.generator_mut(generator) else {
                    return Err(CallError::InvalidGeneratorState);
                };
                *slot = context;
                return Ok(*acc);
            }
            Op::Return => return Ok(*acc),
            Op::Throw => return Err(CallError::Thrown(*acc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextCreateInfo;
    use crate::function::{CallShape, CallableDescriptor};
    use crate::runtime::{Runtime, RuntimeCreateInfo};

    fn context() -> ExecutionContext {
        Runtime::new(RuntimeCreateInfo::default()).new_context(&ContextCreateInfo::default())
    }

    fn function(cx: &mut ExecutionContext, arity: usize, vregs: usize, code: Vec<Op>) -> Value {
        let desc = CallableDescriptor::interpreted("test", arity, vregs, code);
        cx.heap.allocate_function(desc.into_shared())
    }

    /// fib(n) = n < 2 ? n : fib(n - 1) + fib(n - 2)
    fn fib(cx: &mut ExecutionContext) -> Value {
        function(
            cx,
            1,
            4,
            vec![
                Op::LdaArg(0),
                Op::Star(0),
                Op::LdaSmi(2),
                Op::TestLessThan(0),
                Op::JumpIfFalse(7),
                Op::LdaArg(0),
                Op::Return,
                Op::LdaFunction,
                Op::Star(1),
                Op::LdaArg(0),
                Op::Star(2),
                Op::LdaSmi(1),
                Op::Sub(2),
                Op::Star(2),
                Op::LdaSmi(-1),
                Op::Add(2),
                Op::Star(3),
                Op::Call {
                    callee: 1,
                    receiver: None,
                    first_arg: 2,
                    argc: 1,
                },
                Op::Star(2),
                Op::Ldar(3),
                Op::Star(0),
                Op::Call {
                    callee: 1,
                    receiver: None,
                    first_arg: 0,
                    argc: 1,
                },
                Op::Add(2),
                Op::Return,
            ],
        )
    }

    #[test]
    fn recursive_fib() {
        let mut cx = context();
        let f = fib(&mut cx);
        assert_eq!(cx.invoke(f, Value::UNDEFINED, &[Value::fixnum(10)]), Ok(Value::fixnum(55)));
        assert!(cx.top_fp().is_none());
        assert_eq!(cx.stack.sp(), cx.stack.capacity());
    }

    #[test]
    fn missing_and_surplus_arguments() {
        let mut cx = context();
        let second = function(&mut cx, 1, 0, vec![Op::LdaArg(1), Op::Return]);
        let argc = function(&mut cx, 1, 0, vec![Op::LdaArgc, Op::Return]);
        let first = function(&mut cx, 3, 0, vec![Op::LdaArg(2), Op::Return]);

        let args = [Value::fixnum(1), Value::fixnum(2)];
        assert_eq!(cx.invoke(second, Value::UNDEFINED, &args), Ok(Value::fixnum(2)));
        assert_eq!(cx.invoke(argc, Value::UNDEFINED, &args), Ok(Value::fixnum(2)));
        assert_eq!(cx.invoke(first, Value::UNDEFINED, &args), Ok(Value::UNDEFINED));
    }

    #[test]
    fn variadic_surplus_is_read_from_region() {
        let mut cx = context();
        let desc = CallableDescriptor::interpreted("v", 0, 0, vec![Op::LdaArg(3), Op::Return])
            .with_shape(CallShape::VARIADIC);
        let f = cx.heap.allocate_function(desc.into_shared());
        let args = [1, 2, 3, 4].map(Value::fixnum);
        assert_eq!(cx.invoke(f, Value::UNDEFINED, &args), Ok(Value::fixnum(4)));
    }

    #[test]
    fn constants_come_from_the_pool() {
        let mut cx = context();
        let pool = cx.heap.allocate_array(vec![Value::fixnum(5), Value::TRUE]);
        let desc = CallableDescriptor::interpreted("k", 0, 0, vec![Op::LdaConst(1), Op::Return]);
        let f = cx
            .heap
            .allocate_closure(desc.into_shared(), Value::UNDEFINED, pool);
        assert_eq!(cx.invoke(f, Value::UNDEFINED, &[]), Ok(Value::TRUE));
    }

    #[test]
    fn throw_unwinds_to_host() {
        let mut cx = context();
        let thrower = function(&mut cx, 0, 0, vec![Op::LdaSmi(13), Op::Throw]);
        let caller = function(
            &mut cx,
            1,
            1,
            vec![
                Op::LdaArg(0),
                Op::Star(0),
                Op::Call {
                    callee: 0,
                    receiver: None,
                    first_arg: 0,
                    argc: 0,
                },
                Op::LdaSmi(1),
                Op::Return,
            ],
        );
        assert_eq!(
            cx.invoke(caller, Value::UNDEFINED, &[thrower]),
            Err(CallError::Thrown(Value::fixnum(13)))
        );
        assert!(cx.top_fp().is_none());
        assert_eq!(cx.stack.sp(), cx.stack.capacity());
    }

    #[test]
    fn arithmetic_on_non_numbers_fails() {
        let mut cx = context();
        let f = function(
            &mut cx,
            0,
            1,
            vec![Op::LdaUndefined, Op::Star(0), Op::LdaSmi(1), Op::Add(0), Op::Return],
        );
        assert_eq!(
            cx.invoke(f, Value::UNDEFINED, &[]),
            Err(CallError::InvalidOperand("Add"))
        );
    }

    #[test]
    fn falling_off_the_end_returns_undefined() {
        let mut cx = context();
        let f = function(&mut cx, 0, 0, vec![Op::LdaSmi(3)]);
        assert_eq!(cx.invoke(f, Value::UNDEFINED, &[]), Ok(Value::UNDEFINED));
    }

    #[test]
    fn out_of_range_small_integer_is_rejected() {
        let mut cx = context();
        let f = function(&mut cx, 0, 0, vec![Op::LdaSmi(i64::MAX), Op::Return]);
        assert_eq!(
            cx.invoke(f, Value::UNDEFINED, &[]),
            Err(CallError::InvalidOperand("LdaSmi"))
        );
        let f = function(&mut cx, 0, 0, vec![Op::LdaSmi(FIXNUM_MIN), Op::Return]);
        assert_eq!(cx.invoke(f, Value::UNDEFINED, &[]), Ok(Value::from_i64(FIXNUM_MIN)));
    }

    #[test]
    fn failing_frame_keeps_pc_past_the_fault() {
        use crate::reentry::{self, FrameState, Region, Registers};

        let mut cx = context();
        let f = function(&mut cx, 0, 0, vec![Op::LdaSmi(1), Op::LdaSmi(2), Op::Throw]);
        let object = cx.heap.function(f).cloned().unwrap();
        let mut scope = cx.enter_call().unwrap();
        let state = FrameState::fresh(f, &object, Value::UNDEFINED, Value::UNDEFINED);
        let fp = reentry::push_interpreted_frame(
            &mut scope,
            &state,
            0,
            Registers::Fresh,
            Region::Adapt {
                layout: ArgumentLayout::new(0, CallShape::NONE, 0),
                args: &[],
            },
        )
        .unwrap();
        assert_eq!(run(&mut scope, fp), Err(CallError::Thrown(Value::fixnum(2))));
        let frame = Frame::at(&scope.stack, fp);
        assert_eq!(frame.pc(), Some(3));
        assert_eq!(frame.acc(), Some(Value::fixnum(2)));
    }
}
