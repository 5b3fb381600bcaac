use clap::{Parser, ValueEnum};
use std::process;

use callbridge::{
    CallResult, CallShape, CallableDescriptor, CompiledCall, CompiledCode, ContextCreateInfo,
    DeoptBundle, DeoptFrameRecord, ExecutionContext, NativeCall, NativeFlavour, NativeFn, Op,
    Runtime, RuntimeCreateInfo, Value,
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scenario {
    /// Recursive sum through interpreted frames
    Recursion,
    /// Bound function forwarding into a variadic builtin
    Bound,
    /// Compiled code deoptimizing into two interpreted frames
    Deopt,
    /// Unbounded recursion hitting the stack guard
    Overflow,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(value_enum, default_value_t = Scenario::Recursion)]
    scenario: Scenario,

    /// Input of the scenario
    #[arg(short, long, default_value_t = 10)]
    n: i64,

    #[arg(long, default_value_t = 64 * 1024, help = "Machine stack size in slots")]
    stack_slots: usize,

    #[arg(long, default_value_t = 256, help = "Guard slots at the stack limit")]
    guard_slots: usize,

    #[arg(long, default_value_t = 10_000, help = "Maximum call nesting")]
    max_depth: usize,

    #[arg(long, default_value_t = 1024, help = "Host stack budget in KiB")]
    native_stack_kib: usize,

    /// Print the frame walk at the deepest point of the scenario
    #[arg(long)]
    dump: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let runtime = Runtime::new(RuntimeCreateInfo::default());
    let mut cx = runtime.new_context(&ContextCreateInfo {
        stack_slots: cli.stack_slots,
        guard_slots: cli.guard_slots,
        max_call_depth: cli.max_depth,
        native_stack_bytes: cli.native_stack_kib * 1024,
    });
    let observer: NativeFn = if cli.dump { dump_frames } else { quiet };
    let observer_desc = CallableDescriptor::native("observe", 0, NativeFlavour::Host, observer);
    let observer = cx.heap.allocate_function(observer_desc.into_shared());

    let result = match cli.scenario {
        Scenario::Recursion => recursion(&mut cx, observer, cli.n),
        Scenario::Bound => bound(&mut cx, observer, cli.n),
        Scenario::Deopt => deopt(&mut cx, observer, cli.n),
        Scenario::Overflow => recursion(&mut cx, observer, i64::from(i32::MAX)),
    };

    match result {
        Ok(value) => println!("{:?} => {}", cli.scenario, describe(&cx, value)),
        Err(err) => {
            eprintln!("{:?} failed: {err}", cli.scenario);
            process::exit(1);
        }
    }
}

fn describe(cx: &ExecutionContext, value: Value) -> String {
    match cx.heap.array(value) {
        Some(items) => format!("{items:?}"),
        None => format!("{value:?}"),
    }
}

fn quiet(_: &mut NativeCall<'_>) -> CallResult<Value> {
    Ok(Value::fixnum(0))
}

fn dump_frames(call: &mut NativeCall<'_>) -> CallResult<Value> {
    let cx = call.context();
    println!(
        "== {} frames, {} slots in use ==",
        cx.frames().count(),
        cx.stack.capacity() - cx.stack.sp()
    );
    for frame in cx.frames() {
        println!("  {frame:?}");
    }
    Ok(Value::fixnum(0))
}

/// sum(n, observer) = n < 1 ? observer() : n + sum(n - 1, observer)
fn sum_function(cx: &mut ExecutionContext) -> Value {
    let desc = CallableDescriptor::interpreted(
        "sum",
        2,
        4,
        vec![
            Op::LdaArg(0),
            Op::Star(0),
            Op::LdaSmi(1),
            Op::TestLessThan(0),
            Op::JumpIfFalse(9),
            Op::LdaArg(1),
            Op::Star(1),
            Op::Call {
                callee: 1,
                receiver: None,
                first_arg: 0,
                argc: 0,
            },
            Op::Return,
            Op::LdaFunction,
            Op::Star(1),
            Op::LdaSmi(-1),
            Op::Add(0),
            Op::Star(2),
            Op::LdaArg(1),
            Op::Star(3),
            Op::Call {
                callee: 1,
                receiver: None,
                first_arg: 2,
                argc: 2,
            },
            Op::Add(0),
            Op::Return,
        ],
    );
    cx.heap.allocate_function(desc.into_shared())
}

fn recursion(cx: &mut ExecutionContext, observer: Value, n: i64) -> CallResult<Value> {
    let sum = sum_function(cx);
    cx.invoke(sum, Value::UNDEFINED, &[Value::from_i64(n), observer])
}

/// Calls `observer` and returns `[this, ...args]`.
fn collect(call: &mut NativeCall<'_>) -> CallResult<Value> {
    let observer = call.arg(0);
    call.invoke(observer, Value::UNDEFINED, &[])?;
    let mut values = vec![call.this()];
    values.extend(call.args());
    Ok(call.heap().allocate_array(values))
}

fn bound(cx: &mut ExecutionContext, observer: Value, n: i64) -> CallResult<Value> {
    let desc = CallableDescriptor::native("collect", 0, NativeFlavour::Builtin, collect)
        .with_shape(CallShape::HAVE_THIS | CallShape::VARIADIC);
    let target = cx.heap.allocate_function(desc.into_shared());
    let inner = cx.heap.allocate_bound(target, Value::fixnum(-1), vec![observer]);
    let outer = cx
        .heap
        .allocate_bound(inner, Value::fixnum(-2), vec![Value::from_i64(n)]);
    cx.invoke(outer, Value::UNDEFINED, &[Value::from_i64(n + 1)])
}

/// Deoptimizes into `outer(n)` suspended after its call to `inner`, with
/// `inner` resuming at its first instruction.
fn deoptimize_now(call: &mut CompiledCall<'_>) -> CallResult<Value> {
    let (outer, inner, observer, n) = (call.arg(0), call.arg(1), call.arg(2), call.arg(3));
    let record = |function: Value, pc: usize, registers: Vec<Value>| DeoptFrameRecord {
        function,
        pc,
        acc: Value::UNDEFINED,
        env: Value::UNDEFINED,
        this: Value::UNDEFINED,
        registers,
        arguments: vec![],
    };
    let bundle = DeoptBundle {
        frames: vec![record(outer, 1, vec![n]), record(inner, 0, vec![observer, n])],
        resume_pc: 0,
    };
    call.deoptimize(&bundle)
}

fn deopt(cx: &mut ExecutionContext, observer: Value, n: i64) -> CallResult<Value> {
    // outer: ...; acc = r0 + inner(); return acc
    let outer = CallableDescriptor::interpreted(
        "outer",
        0,
        1,
        vec![Op::LdaUndefined, Op::Add(0), Op::Return],
    );
    // inner: observer(); return r1
    let inner = CallableDescriptor::interpreted(
        "inner",
        0,
        2,
        vec![
            Op::Call {
                callee: 0,
                receiver: None,
                first_arg: 0,
                argc: 0,
            },
            Op::Ldar(1),
            Op::Return,
        ],
    );
    let outer = cx.heap.allocate_function(outer.into_shared());
    let inner = cx.heap.allocate_function(inner.into_shared());

    let code = cx.runtime.register_code(CompiledCode {
        name: "fast_path".into(),
        entry: deoptimize_now,
        spill_slots: 0,
        safepoints: vec![],
    });
    let fast = CallableDescriptor::compiled("fast_path", 4, code);
    let fast = cx.heap.allocate_function(fast.into_shared());
    cx.invoke(fast, Value::UNDEFINED, &[outer, inner, observer, Value::from_i64(n)])
}
