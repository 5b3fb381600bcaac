use crate::error::{CallResult, frame_corruption};
use crate::{Value, guard};

/// Size in bytes of one stack slot.
pub const SLOT_SIZE: usize = size_of::<Value>();

/// A downward-growing machine stack of tagged words.
///
/// `sp` is the index of the lowest live slot; an empty stack has
/// `sp == capacity`. Slots below `limit` are the guard zone and are never
/// handed out.
#[derive(Debug, Clone)]
pub struct MachineStack {
    slots: Vec<Value>,
    sp: usize,
    limit: usize,
}

impl MachineStack {
    #[must_use]
    pub fn new(capacity: usize, guard_slots: usize) -> Self {
        let limit = guard_slots.min(capacity);
        Self {
            slots: vec![Value::UNDEFINED; capacity],
            sp: capacity,
            limit,
        }
    }

    #[inline(always)]
    #[must_use]
    pub fn sp(&self) -> usize {
        self.sp
    }

    #[inline(always)]
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline(always)]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots that may still be reserved before hitting the limit.
    #[inline(always)]
    #[must_use]
    pub fn remaining_slots(&self) -> usize {
        self.sp.saturating_sub(self.limit)
    }

    /// Claims `n` slots below `sp` and returns the new `sp`.
    ///
    /// The headroom check runs before anything moves, so a failed
    /// reservation leaves both `sp` and the slot contents untouched.
    pub fn reserve(&mut self, n: usize) -> CallResult<usize> {
        guard::check_headroom(self, n)?;
        self.sp -= n;
        log::trace!("reserve {n} slots, sp={}", self.sp);
        Ok(self.sp)
    }

    /// Moves `sp` back up to a previously observed position.
    pub(crate) fn restore_sp(&mut self, sp: usize) {
        if sp < self.sp || sp > self.slots.len() {
            frame_corruption(format_args!(
                "restoring sp to {sp} from {} (capacity {})",
                self.sp,
                self.slots.len()
            ));
        }
        self.sp = sp;
    }

    pub(crate) fn set_limit(&mut self, limit: usize) {
        self.limit = limit.min(self.slots.len());
    }

    // ── Slot access ────────────────────────────────────────────────

    #[inline(always)]
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.slots[index]
    }

    #[inline(always)]
    pub fn set(&mut self, index: usize, value: Value) {
        self.slots[index] = value;
    }

    #[inline(always)]
    pub fn slot_mut(&mut self, index: usize) -> &mut Value {
        &mut self.slots[index]
    }

    #[inline(always)]
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> &[Value] {
        &self.slots[start..start + len]
    }

    #[inline(always)]
    pub fn slice_mut(&mut self, start: usize, len: usize) -> &mut [Value] {
        &mut self.slots[start..start + len]
    }

    /// Reads a word that must hold a non-negative fixnum.
    #[inline]
    #[must_use]
    pub fn get_usize(&self, index: usize) -> usize {
        match self.slots[index].as_fixnum() {
            Some(n) if n >= 0 => n as usize,
            _ => frame_corruption(format_args!(
                "slot {index} holds {:?}, expected a count",
                self.slots[index]
            )),
        }
    }

    #[inline(always)]
    pub fn set_usize(&mut self, index: usize, n: usize) {
        self.slots[index] = Value::from_i64(n as i64);
    }
}
