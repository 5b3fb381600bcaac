pub mod adapter;
pub mod bytecode;
pub mod compiled;
pub mod context;
pub mod deopt;
pub mod dispatch;
pub mod error;
pub mod forward;
pub mod frames;
pub mod function;
pub mod generator;
pub mod guard;
pub mod native;
pub mod object;
pub mod reentry;
pub mod runtime;
pub mod stack;
mod tagged;
pub mod walker;

pub use adapter::{ArgumentLayout, RequestedValues};
pub use bytecode::{Interpreter, Op};
pub use compiled::{CodeId, CompiledCall, CompiledCode, CompiledEntry};
pub use context::{
    CallScope, ContextCreateInfo, ExecutionContext, RootProvider, StackLimitScope,
};
pub use deopt::{DeoptBundle, DeoptFrameImage, DeoptFrameRecord};
pub use dispatch::{CallKind, CallRequest};
pub use error::{CallError, CallResult};
pub use forward::{ForwardingTrap, ProxyTrap};
pub use frames::{Frame, FrameKind};
pub use function::{
    CallShape, CallableDescriptor, FunctionKind, HandlerEntry, NativeFlavour, Representation,
};
pub use native::{NativeCall, NativeFn};
pub use object::{
    BoundFunctionRecord, FunctionObject, GeneratorContext, GeneratorState, Heap,
    HeapObject, ObjectId,
};
pub use reentry::{BytecodeDispatch, FrameState};
pub use runtime::{Runtime, RuntimeCreateInfo};
pub use stack::{MachineStack, SLOT_SIZE};
pub use tagged::Value;
pub use walker::{FrameIterator, StackMaps};
