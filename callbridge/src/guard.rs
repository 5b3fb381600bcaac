use crate::error::{CallError, CallResult};
use crate::stack::{MachineStack, SLOT_SIZE};

/// Checks that `requested_slots` more slots fit above the stack limit.
///
/// `remaining = sp - limit` in bytes; fails when it is smaller than the
/// request. Never writes.
#[inline]
pub fn check_headroom(stack: &MachineStack, requested_slots: usize) -> CallResult<()> {
    let remaining = stack.remaining_slots() * SLOT_SIZE;
    let requested = requested_slots.saturating_mul(SLOT_SIZE);
    if remaining < requested {
        log::warn!(
            "stack overflow: {requested} bytes requested, {remaining} bytes left"
        );
        return Err(CallError::StackOverflow);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn overflow_writes_nothing_and_keeps_sp() {
        // 32 usable slots above an 8-slot guard zone.
        let mut stack = MachineStack::new(40, 8);
        for i in 0..stack.capacity() {
            stack.set(i, Value::fixnum(i as i64));
        }
        let before: Vec<Value> = stack.slice(0, stack.capacity()).to_vec();

        assert_eq!(check_headroom(&stack, 64), Err(CallError::StackOverflow));
        assert_eq!(stack.reserve(64), Err(CallError::StackOverflow));

        assert_eq!(stack.sp(), 40);
        assert_eq!(stack.slice(0, stack.capacity()), before.as_slice());
    }

    #[test]
    fn exact_fit_is_allowed() {
        let stack = MachineStack::new(40, 8);
        assert!(check_headroom(&stack, 32).is_ok());
        assert!(check_headroom(&stack, 33).is_err());
        assert!(check_headroom(&stack, 0).is_ok());
    }
}
