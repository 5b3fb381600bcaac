use std::sync::Arc;

use crate::Value;
use crate::forward::ProxyTrap;
use crate::function::CallableDescriptor;

/// Index of an object in a context's [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectId(u32);

impl ObjectId {
    #[inline(always)]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    #[inline(always)]
    pub const fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct FunctionObject {
    pub descriptor: Arc<CallableDescriptor>,
    pub env: Value,
    pub constants: Value,
    pub profile: Value,
    pub prototype: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundFunctionRecord {
    pub target: Value,
    pub bound_this: Value,
    pub bound_args: Vec<Value>,
}

#[derive(Clone)]
pub struct ProxyObject {
    pub target: Value,
    /// `None` once revoked.
    pub trap: Option<Arc<dyn ProxyTrap>>,
}

impl core::fmt::Debug for ProxyObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProxyObject")
            .field("target", &self.target)
            .field("revoked", &self.trap.is_none())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    SuspendedStart,
    SuspendedYield,
    Executing,
    Completed,
}

/// Saved interpreter state of a suspended generator.
#[derive(Debug, Clone)]
pub struct GeneratorContext {
    pub function: Value,
    pub this: Value,
    pub new_target: Value,
    pub registers: Vec<Value>,
    pub region: Vec<Value>,
    pub overflow: Value,
    pub argc: usize,
    pub pc: usize,
    pub acc: Value,
    pub env: Value,
    pub state: GeneratorState,
}

#[derive(Debug, Clone)]
pub enum HeapObject {
    Function(FunctionObject),
    Bound(BoundFunctionRecord),
    Proxy(ProxyObject),
    Plain { prototype: Value },
    Array(Vec<Value>),
    Environment { parent: Value, slots: Vec<Value> },
    Generator(GeneratorContext),
}

impl HeapObject {
    #[inline]
    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Bound(_) | Self::Proxy(_))
    }
}

/// Per-context object table. Values reference entries by index.
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn allocate(&mut self, object: HeapObject) -> Value {
        let id = ObjectId::from_index(self.objects.len() as u32);
        self.objects.push(object);
        Value::from_object(id)
    }

    #[must_use]
    pub fn get(&self, value: Value) -> Option<&HeapObject> {
        let id = value.as_object()?;
        self.objects.get(id.index() as usize)
    }

    pub fn get_mut(&mut self, value: Value) -> Option<&mut HeapObject> {
        let id = value.as_object()?;
        self.objects.get_mut(id.index() as usize)
    }

    // ── Allocation helpers ─────────────────────────────────────────

    /// Allocates a function with no captured environment. Constructors get
    /// a fresh `prototype` object.
    pub fn allocate_function(&mut self, descriptor: Arc<CallableDescriptor>) -> Value {
        self.allocate_closure(descriptor, Value::UNDEFINED, Value::UNDEFINED)
    }

    pub fn allocate_closure(
        &mut self,
        descriptor: Arc<CallableDescriptor>,
        env: Value,
        constants: Value,
    ) -> Value {
        let prototype = if descriptor.kind.is_constructor() {
            self.allocate(HeapObject::Plain {
                prototype: Value::NULL,
            })
        } else {
            Value::UNDEFINED
        };
        self.allocate(HeapObject::Function(FunctionObject {
            descriptor,
            env,
            constants,
            profile: Value::UNDEFINED,
            prototype,
        }))
    }

    pub fn allocate_bound(
        &mut self,
        target: Value,
        bound_this: Value,
        bound_args: Vec<Value>,
    ) -> Value {
        self.allocate(HeapObject::Bound(BoundFunctionRecord {
            target,
            bound_this,
            bound_args,
        }))
    }

    pub fn allocate_proxy(&mut self, target: Value, trap: Arc<dyn ProxyTrap>) -> Value {
        self.allocate(HeapObject::Proxy(ProxyObject {
            target,
            trap: Some(trap),
        }))
    }

    pub fn allocate_array(&mut self, elements: Vec<Value>) -> Value {
        self.allocate(HeapObject::Array(elements))
    }

    pub fn allocate_environment(&mut self, parent: Value, slots: Vec<Value>) -> Value {
        self.allocate(HeapObject::Environment { parent, slots })
    }

    /// Returns `false` if `value` is not a proxy.
    pub fn revoke_proxy(&mut self, value: Value) -> bool {
        match self.get_mut(value) {
            Some(HeapObject::Proxy(proxy)) => {
                proxy.trap = None;
                true
            }
            _ => false,
        }
    }

    // ── Typed accessors ────────────────────────────────────────────

    #[must_use]
    pub fn function(&self, value: Value) -> Option<&FunctionObject> {
        match self.get(value)? {
            HeapObject::Function(f) => Some(f),
            _ => None,
        }
    }

    #[must_use]
    pub fn array(&self, value: Value) -> Option<&[Value]> {
        match self.get(value)? {
            HeapObject::Array(elements) => Some(elements),
            _ => None,
        }
    }

    #[must_use]
    pub fn generator(&self, value: Value) -> Option<&GeneratorContext> {
        match self.get(value)? {
            HeapObject::Generator(g) => Some(g),
            _ => None,
        }
    }

    pub fn generator_mut(&mut self, value: Value) -> Option<&mut GeneratorContext> {
        match self.get_mut(value)? {
            HeapObject::Generator(g) => Some(g),
            _ => None,
        }
    }

    #[must_use]
    pub fn prototype_of(&self, value: Value) -> Option<Value> {
        match self.get(value)? {
            HeapObject::Plain { prototype } => Some(*prototype),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_callable(&self, value: Value) -> bool {
        self.get(value).is_some_and(HeapObject::is_callable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Op;
    use crate::function::FunctionKind;

    #[test]
    fn constructors_get_a_prototype_object() {
        let mut heap = Heap::new();
        let ctor = CallableDescriptor::interpreted("C", 0, 0, vec![Op::Return]);
        let arrow = CallableDescriptor::interpreted("a", 0, 0, vec![Op::Return])
            .with_kind(FunctionKind::Arrow);

        let c = heap.allocate_function(ctor.into_shared());
        let a = heap.allocate_function(arrow.into_shared());

        let c_proto = heap.function(c).map(|f| f.prototype).unwrap();
        assert_eq!(heap.prototype_of(c_proto), Some(Value::NULL));
        assert_eq!(heap.function(a).map(|f| f.prototype), Some(Value::UNDEFINED));
    }

    #[test]
    fn callability() {
        let mut heap = Heap::new();
        let arr = heap.allocate_array(vec![]);
        let f = heap.allocate_function(
            CallableDescriptor::interpreted("f", 0, 0, vec![Op::Return]).into_shared(),
        );
        let b = heap.allocate_bound(f, Value::UNDEFINED, vec![]);
        assert!(!heap.is_callable(arr));
        assert!(heap.is_callable(f));
        assert!(heap.is_callable(b));
        assert!(!heap.is_callable(Value::fixnum(1)));
    }
}
