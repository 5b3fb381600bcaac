//! Argument region adaptation.
//!
//! Region layout, from the lowest slot:
//!
//! ```text
//! named[0..N)             actual args, padded with undefined
//! surplus[N..A)           variadic callees only
//! function                if HAVE_FUNC
//! new_target              if HAVE_NEW_TARGET
//! this                    if HAVE_THIS
//! extra count (A)         variadic callees only
//! ```
//!
//! Surplus arguments of a non-variadic callee do not enter the region; the
//! caller materializes them in an overflow array instead.

use crate::Value;
use crate::function::CallShape;

/// Values for the requested-only slots. Unsupplied ones stay `undefined`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedValues {
    pub function: Value,
    pub new_target: Value,
    pub this: Value,
}

impl Default for RequestedValues {
    fn default() -> Self {
        Self {
            function: Value::UNDEFINED,
            new_target: Value::UNDEFINED,
            this: Value::UNDEFINED,
        }
    }
}

/// Shape of an adapted region, computed before anything is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentLayout {
    pub declared: usize,
    pub actual: usize,
    pub shape: CallShape,
}

impl ArgumentLayout {
    #[must_use]
    pub fn new(declared: usize, shape: CallShape, actual: usize) -> Self {
        Self {
            declared,
            actual,
            shape,
        }
    }

    #[inline]
    fn variadic(&self) -> bool {
        self.shape.contains(CallShape::VARIADIC)
    }

    #[inline]
    #[must_use]
    pub fn copied(&self) -> usize {
        self.actual.min(self.declared)
    }

    #[inline]
    #[must_use]
    pub fn padding(&self) -> usize {
        self.declared.saturating_sub(self.actual)
    }

    #[inline]
    #[must_use]
    pub fn surplus(&self) -> usize {
        self.actual.saturating_sub(self.declared)
    }

    /// Surplus arguments that live in the region itself.
    #[inline]
    #[must_use]
    pub fn surplus_in_region(&self) -> usize {
        if self.variadic() { self.surplus() } else { 0 }
    }

    /// Surplus arguments that must go to an overflow array.
    #[inline]
    #[must_use]
    pub fn overflow_len(&self) -> usize {
        if self.variadic() { 0 } else { self.surplus() }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.declared
            + self.surplus_in_region()
            + self.shape.requested_slots()
            + self.variadic() as usize
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn requested_base(&self) -> usize {
        self.declared + self.surplus_in_region()
    }

    fn requested_offset(&self, flag: CallShape) -> Option<usize> {
        if !self.shape.contains(flag) {
            return None;
        }
        let mut offset = self.requested_base();
        for earlier in [CallShape::HAVE_FUNC, CallShape::HAVE_NEW_TARGET, CallShape::HAVE_THIS] {
            if earlier == flag {
                return Some(offset);
            }
            if self.shape.contains(earlier) {
                offset += 1;
            }
        }
        None
    }

    #[must_use]
    pub fn function_slot(&self) -> Option<usize> {
        self.requested_offset(CallShape::HAVE_FUNC)
    }

    #[must_use]
    pub fn new_target_slot(&self) -> Option<usize> {
        self.requested_offset(CallShape::HAVE_NEW_TARGET)
    }

    #[must_use]
    pub fn this_slot(&self) -> Option<usize> {
        self.requested_offset(CallShape::HAVE_THIS)
    }

    #[must_use]
    pub fn extra_count_slot(&self) -> Option<usize> {
        self.variadic().then(|| self.len() - 1)
    }

    /// Index of argument `i` inside the region, if it lives there.
    #[must_use]
    pub fn arg_slot(&self, i: usize) -> Option<usize> {
        if i < self.declared || (i < self.actual && self.variadic()) {
            Some(i)
        } else {
            None
        }
    }
}

/// Fills `dst` (exactly `layout.len()` slots) from `args`.
pub fn write_region(
    dst: &mut [Value],
    layout: &ArgumentLayout,
    args: &[Value],
    requested: &RequestedValues,
) {
    debug_assert_eq!(dst.len(), layout.len());
    debug_assert_eq!(args.len(), layout.actual);

    let copied = layout.copied();
    dst[..copied].copy_from_slice(&args[..copied]);
    dst[copied..layout.declared].fill(Value::UNDEFINED);

    let surplus = layout.surplus_in_region();
    if surplus > 0 {
        dst[layout.declared..layout.declared + surplus]
            .copy_from_slice(&args[layout.declared..]);
    }

    if let Some(slot) = layout.function_slot() {
        dst[slot] = requested.function;
    }
    if let Some(slot) = layout.new_target_slot() {
        dst[slot] = requested.new_target;
    }
    if let Some(slot) = layout.this_slot() {
        dst[slot] = requested.this;
    }
    if let Some(slot) = layout.extra_count_slot() {
        dst[slot] = Value::from_i64(layout.actual as i64);
    }
}

/// Arguments a non-variadic callee did not declare.
#[must_use]
pub fn overflow_args<'a>(layout: &ArgumentLayout, args: &'a [Value]) -> &'a [Value] {
    if layout.overflow_len() == 0 {
        &[]
    } else {
        &args[layout.declared..]
    }
}
