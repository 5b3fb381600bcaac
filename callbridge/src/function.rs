use std::sync::Arc;

use crate::bytecode::Op;
use crate::compiled::CodeId;
use crate::native::NativeFn;

/// Calling-shape flags of a callable.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct CallShape(u8);

impl CallShape {
    pub const NONE: Self = Self(0);
    pub const HAVE_THIS: Self = Self(1 << 0);
    pub const HAVE_NEW_TARGET: Self = Self(1 << 1);
    pub const HAVE_FUNC: Self = Self(1 << 2);
    pub const VARIADIC: Self = Self(1 << 3);

    #[inline(always)]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline(always)]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline(always)]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Number of requested-only slots (function, new-target, this).
    #[inline(always)]
    pub const fn requested_slots(self) -> usize {
        (self.contains(Self::HAVE_FUNC) as usize)
            + (self.contains(Self::HAVE_NEW_TARGET) as usize)
            + (self.contains(Self::HAVE_THIS) as usize)
    }
}

impl core::ops::BitOr for CallShape {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::fmt::Debug for CallShape {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut list = f.debug_set();
        if self.contains(Self::HAVE_THIS) {
            list.entry(&"this");
        }
        if self.contains(Self::HAVE_NEW_TARGET) {
            list.entry(&"new_target");
        }
        if self.contains(Self::HAVE_FUNC) {
            list.entry(&"func");
        }
        if self.contains(Self::VARIADIC) {
            list.entry(&"variadic");
        }
        list.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionKind {
    #[default]
    Normal,
    Arrow,
    Method,
    Generator,
    ClassConstructor,
    DerivedClassConstructor,
}

impl FunctionKind {
    #[inline]
    pub const fn is_class_constructor(self) -> bool {
        matches!(self, Self::ClassConstructor | Self::DerivedClassConstructor)
    }

    #[inline]
    pub const fn is_constructor(self) -> bool {
        matches!(
            self,
            Self::Normal | Self::ClassConstructor | Self::DerivedClassConstructor
        )
    }
}

/// Builtins run inside the engine; host natives leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFlavour {
    Builtin,
    Host,
}

#[derive(Clone)]
pub enum Representation {
    Native { entry: NativeFn, flavour: NativeFlavour },
    Interpreted { bytecode: Arc<[Op]> },
    Compiled { code: CodeId },
}

impl core::fmt::Debug for Representation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Native { flavour, .. } => write!(f, "Native({flavour:?})"),
            Self::Interpreted { bytecode } => {
                write!(f, "Interpreted({} ops)", bytecode.len())
            }
            Self::Compiled { code } => write!(f, "Compiled({code:?})"),
        }
    }
}

/// A bytecode range `[start, end)` whose exceptions resume at `handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerEntry {
    pub start: usize,
    pub end: usize,
    pub handler: usize,
}

impl HandlerEntry {
    #[inline]
    pub const fn covers(&self, pc: usize) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// Immutable description of how a callable expects to be entered.
#[derive(Debug, Clone)]
pub struct CallableDescriptor {
    pub name: String,
    pub arity: usize,
    pub num_vregs: usize,
    pub shape: CallShape,
    pub kind: FunctionKind,
    pub repr: Representation,
    /// Innermost first. Only bytecode functions have handlers.
    pub handlers: Vec<HandlerEntry>,
}

impl CallableDescriptor {
    #[must_use]
    pub fn interpreted(
        name: impl Into<String>,
        arity: usize,
        num_vregs: usize,
        bytecode: impl Into<Arc<[Op]>>,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            num_vregs,
            shape: CallShape::NONE,
            kind: FunctionKind::Normal,
            repr: Representation::Interpreted {
                bytecode: bytecode.into(),
            },
            handlers: Vec::new(),
        }
    }

    #[must_use]
    pub fn native(
        name: impl Into<String>,
        arity: usize,
        flavour: NativeFlavour,
        entry: NativeFn,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            num_vregs: 0,
            shape: CallShape::NONE,
            kind: FunctionKind::Normal,
            repr: Representation::Native { entry, flavour },
            handlers: Vec::new(),
        }
    }

    #[must_use]
    pub fn compiled(name: impl Into<String>, arity: usize, code: CodeId) -> Self {
        Self {
            name: name.into(),
            arity,
            num_vregs: 0,
            shape: CallShape::NONE,
            kind: FunctionKind::Normal,
            repr: Representation::Compiled { code },
            handlers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_shape(mut self, shape: CallShape) -> Self {
        self.shape = shape;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: FunctionKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_handlers(mut self, handlers: Vec<HandlerEntry>) -> Self {
        self.handlers = handlers;
        self
    }

    /// The innermost handler whose range covers `pc`.
    #[must_use]
    pub fn handler_for(&self, pc: usize) -> Option<usize> {
        self.handlers.iter().find(|h| h.covers(pc)).map(|h| h.handler)
    }

    #[inline]
    pub fn is_variadic(&self) -> bool {
        self.shape.contains(CallShape::VARIADIC)
    }

    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requested_slots_counts_flags() {
        assert_eq!(CallShape::NONE.requested_slots(), 0);
        let all = CallShape::HAVE_THIS
            | CallShape::HAVE_NEW_TARGET
            | CallShape::HAVE_FUNC
            | CallShape::VARIADIC;
        assert_eq!(all.requested_slots(), 3);
        assert!(all.contains(CallShape::VARIADIC));
    }

    #[test]
    fn innermost_covering_handler_wins() {
        let desc = CallableDescriptor::interpreted("f", 0, 0, vec![Op::Return]).with_handlers(vec![
            HandlerEntry { start: 2, end: 4, handler: 10 },
            HandlerEntry { start: 0, end: 8, handler: 20 },
        ]);
        assert_eq!(desc.handler_for(3), Some(10));
        assert_eq!(desc.handler_for(4), Some(20));
        assert_eq!(desc.handler_for(8), None);
    }

    #[test]
    fn constructor_kinds() {
        assert!(FunctionKind::Normal.is_constructor());
        assert!(FunctionKind::DerivedClassConstructor.is_constructor());
        assert!(!FunctionKind::Arrow.is_constructor());
        assert!(!FunctionKind::Generator.is_constructor());
        assert!(FunctionKind::ClassConstructor.is_class_constructor());
        assert!(!FunctionKind::Method.is_class_constructor());
    }
}
