use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::deopt::{self, DeoptBundle};
use crate::error::{CallError, CallResult, frame_corruption};
use crate::frames::{self, Frame, FrameKind, KIND, PREV, RETURN, encode_link, interpreted};
use crate::object::Heap;
use crate::runtime::Runtime;
use crate::stack::MachineStack;
use crate::walker::{self, FrameIterator};
use crate::{Value, dispatch, generator};

/// Anything that owns GC roots.
pub trait RootProvider {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value));
}

#[derive(Debug, Clone)]
pub struct ContextCreateInfo {
    /// Total machine stack size in slots.
    pub stack_slots: usize,
    /// Slots at the bottom of the stack that are never handed out.
    pub guard_slots: usize,
    pub max_call_depth: usize,
    /// Host stack the outermost call may consume before nested calls fail
    /// with a stack overflow.
    pub native_stack_bytes: usize,
}

impl Default for ContextCreateInfo {
    fn default() -> Self {
        Self {
            stack_slots: 64 * 1024,
            guard_slots: 256,
            max_call_depth: 10_000,
            native_stack_bytes: 1024 * 1024,
        }
    }
}

/// Per-thread execution state: one machine stack, one object table.
pub struct ExecutionContext {
    pub runtime: Arc<Runtime>,
    pub stack: MachineStack,
    pub heap: Heap,
    top: Option<usize>,
    leave_frame: Option<usize>,
    depth: usize,
    max_depth: usize,
    native_base: usize,
    native_budget: usize,
}

impl ExecutionContext {
    pub(crate) fn new(runtime: Arc<Runtime>, info: &ContextCreateInfo) -> Self {
        log::debug!(
            "new context: {} stack slots, {} guard slots",
            info.stack_slots,
            info.guard_slots
        );
        Self {
            runtime,
            stack: MachineStack::new(info.stack_slots, info.guard_slots),
            heap: Heap::new(),
            top: None,
            leave_frame: None,
            depth: 0,
            max_depth: info.max_call_depth,
            native_base: 0,
            native_budget: info.native_stack_bytes,
        }
    }

    // ── Call surface ───────────────────────────────────────────────

    pub fn invoke(&mut self, callee: Value, this: Value, args: &[Value]) -> CallResult<Value> {
        dispatch::invoke(self, callee, this, args)
    }

    pub fn construct(
        &mut self,
        callee: Value,
        new_target: Value,
        args: &[Value],
    ) -> CallResult<Value> {
        dispatch::construct(self, callee, new_target, args)
    }

    pub fn call_getter(&mut self, getter: Value, receiver: Value) -> CallResult<Value> {
        dispatch::call_getter(self, getter, receiver)
    }

    pub fn call_setter(&mut self, setter: Value, receiver: Value, value: Value) -> CallResult<()> {
        dispatch::call_setter(self, setter, receiver, value)
    }

    pub fn resume_generator(&mut self, generator: Value) -> CallResult<Value> {
        generator::resume_generator(self, generator)
    }

    pub fn reenter_interpreter(&mut self, bundle: &DeoptBundle) -> CallResult<Value> {
        deopt::reenter_interpreter(self, bundle)
    }

    // ── Frame inspection ───────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn top_fp(&self) -> Option<usize> {
        self.top
    }

    #[must_use]
    pub fn top_frame(&self) -> Option<Frame<'_>> {
        self.top.map(|fp| Frame::at(&self.stack, fp))
    }

    #[must_use]
    pub fn top_kind(&self) -> Option<FrameKind> {
        self.top.map(|fp| frames::kind_at(&self.stack, fp))
    }

    #[must_use]
    pub fn frames(&self) -> FrameIterator<'_> {
        FrameIterator::new(&self.stack, self.top)
    }

    #[inline]
    #[must_use]
    pub fn leave_frame(&self) -> Option<usize> {
        self.leave_frame
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    // ── Frame construction ─────────────────────────────────────────

    /// Resume point recorded in a new frame: the caller's pc if the caller
    /// is interpreted.
    fn return_point(&self) -> Value {
        match self.top {
            Some(fp) if frames::kind_at(&self.stack, fp) == FrameKind::Interpreted => {
                self.stack.get(fp + interpreted::PC)
            }
            _ => Value::fixnum(0),
        }
    }

    /// Reserves `total` slots and writes the common header. The frame is not
    /// visible to walkers until [`publish`](Self::publish).
    pub(crate) fn begin_frame(&mut self, kind: FrameKind, total: usize) -> CallResult<usize> {
        debug_assert!(total >= kind.layout().header);
        let ret = self.return_point();
        let fp = self.stack.reserve(total)?;
        self.stack.set(fp + KIND, kind.to_word());
        self.stack.set(fp + PREV, encode_link(self.top));
        self.stack.set(fp + RETURN, ret);
        Ok(fp)
    }

    /// Makes a fully written frame the top of the walkable chain. The frame
    /// must describe exactly the `reserved` slots it was built in.
    pub(crate) fn publish(&mut self, fp: usize, reserved: usize) {
        let link = frames::decode_link(self.stack.get(fp + PREV));
        if link != self.top {
            frame_corruption(format_args!(
                "publishing frame at {fp} linked to {link:?}, top is {:?}",
                self.top
            ));
        }
        let size = Frame::at(&self.stack, fp).size();
        if size != reserved {
            frame_corruption(format_args!(
                "{:?} frame at {fp} occupies {size} slots, {reserved} were reserved",
                frames::kind_at(&self.stack, fp)
            ));
        }
        log::trace!("push {:?} at {fp}", frames::kind_at(&self.stack, fp));
        self.top = Some(fp);
    }

    /// Pushes a header-only frame whose kind-specific words are `fields`.
    pub(crate) fn push_linkage_frame(
        &mut self,
        kind: FrameKind,
        fields: &[Value],
    ) -> CallResult<usize> {
        let header = kind.layout().header;
        debug_assert_eq!(fields.len(), header - frames::COMMON_HEADER);
        let fp = self.begin_frame(kind, header)?;
        for (i, word) in fields.iter().enumerate() {
            self.stack.set(fp + frames::COMMON_HEADER + i, *word);
        }
        self.publish(fp, header);
        Ok(fp)
    }

    /// Entry frame: saves the current leave frame and clears it while
    /// managed code runs. The enclosing [`CallScope`] restores it.
    pub(crate) fn push_entry_frame(&mut self) -> CallResult<usize> {
        let saved = encode_link(self.leave_frame);
        let fp = self.push_linkage_frame(FrameKind::Entry, &[saved])?;
        self.leave_frame = None;
        Ok(fp)
    }

    pub(crate) fn set_leave_frame(&mut self, fp: Option<usize>) {
        self.leave_frame = fp;
    }

    /// Drops every frame younger than `fp`, making it the top again.
    pub(crate) fn pop_to(&mut self, fp: usize) {
        self.stack.restore_sp(fp);
        self.top = Some(fp);
    }

    // ── Scopes ─────────────────────────────────────────────────────

    /// Starts a call. Everything the call pushes is released when the
    /// returned scope drops, on success and on unwind alike.
    pub fn enter_call(&mut self) -> CallResult<CallScope<'_>> {
        if self.depth >= self.max_depth {
            log::warn!("call depth limit {} reached", self.max_depth);
            return Err(CallError::StackOverflow);
        }
        let here = native_stack_position();
        if self.depth == 0 {
            self.native_base = here;
        } else if self.native_base.abs_diff(here) > self.native_budget {
            log::warn!(
                "host stack budget of {} bytes exhausted at depth {}",
                self.native_budget,
                self.depth
            );
            return Err(CallError::StackOverflow);
        }
        let scope = CallScope {
            sp: self.stack.sp(),
            top: self.top,
            leave_frame: self.leave_frame,
            depth: self.depth,
            cx: self,
        };
        scope.cx.depth += 1;
        Ok(scope)
    }

    /// Narrows the usable stack to `usable_slots` below the current `sp`
    /// for the lifetime of the scope. Never widens it.
    pub fn with_stack_limit(&mut self, usable_slots: usize) -> StackLimitScope<'_> {
        let saved = self.stack.limit();
        let narrowed = self.stack.sp().saturating_sub(usable_slots).max(saved);
        self.stack.set_limit(narrowed);
        StackLimitScope { cx: self, saved }
    }
}

/// Address of a local in a fresh host frame.
#[inline(never)]
fn native_stack_position() -> usize {
    let marker = 0u8;
    core::hint::black_box(&marker) as *const u8 as usize
}

impl RootProvider for ExecutionContext {
    fn visit_roots(&mut self, visitor: &mut dyn FnMut(&mut Value)) {
        let maps = self.runtime.stack_maps();
        walker::visit_roots(&mut self.stack, self.top, &maps, visitor);
    }
}

/// Snapshot of the stack pointer, top frame, leave frame and depth.
pub struct CallScope<'a> {
    cx: &'a mut ExecutionContext,
    sp: usize,
    top: Option<usize>,
    leave_frame: Option<usize>,
    depth: usize,
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.cx.stack.restore_sp(self.sp);
        self.cx.top = self.top;
        self.cx.leave_frame = self.leave_frame;
        self.cx.depth = self.depth;
    }
}

impl Deref for CallScope<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        self.cx
    }
}

impl DerefMut for CallScope<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.cx
    }
}

pub struct StackLimitScope<'a> {
    cx: &'a mut ExecutionContext,
    saved: usize,
}

impl Drop for StackLimitScope<'_> {
    fn drop(&mut self) {
        self.cx.stack.set_limit(self.saved);
    }
}

impl Deref for StackLimitScope<'_> {
    type Target = ExecutionContext;

    fn deref(&self) -> &ExecutionContext {
        self.cx
    }
}

impl DerefMut for StackLimitScope<'_> {
    fn deref_mut(&mut self) -> &mut ExecutionContext {
        self.cx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeCreateInfo;

    fn context(slots: usize) -> ExecutionContext {
        Runtime::new(RuntimeCreateInfo::default()).new_context(&ContextCreateInfo {
            stack_slots: slots,
            guard_slots: 0,
            max_call_depth: 4,
            ..ContextCreateInfo::default()
        })
    }

    #[test]
    fn call_scope_pops_everything_it_pushed() {
        let mut cx = context(128);
        {
            let mut scope = cx.enter_call().unwrap();
            scope.push_entry_frame().unwrap();
            scope.push_linkage_frame(FrameKind::Bridge, &[]).unwrap();
            assert_eq!(scope.frames().count(), 2);
            assert_eq!(scope.depth(), 1);
        }
        assert_eq!(cx.stack.sp(), 128);
        assert!(cx.top_fp().is_none());
        assert_eq!(cx.depth(), 0);
    }

    #[test]
    fn entry_frame_saves_and_clears_leave_frame() {
        let mut cx = context(128);
        cx.set_leave_frame(Some(100));
        {
            let mut scope = cx.enter_call().unwrap();
            scope.push_entry_frame().unwrap();
            assert_eq!(scope.leave_frame(), None);
            let saved = scope.top_frame().and_then(|f| f.saved_leave_frame());
            assert_eq!(saved, Some(Some(100)));
        }
        assert_eq!(cx.leave_frame(), Some(100));
    }

    #[test]
    fn depth_limit_overflows() {
        let mut cx = context(128);
        let mut a = cx.enter_call().unwrap();
        let mut b = a.enter_call().unwrap();
        let mut c = b.enter_call().unwrap();
        let mut d = c.enter_call().unwrap();
        assert!(matches!(d.enter_call(), Err(CallError::StackOverflow)));
    }

    #[test]
    fn host_stack_budget_overflows() {
        fn nest(cx: &mut ExecutionContext, levels: usize) -> CallResult<usize> {
            let mut scope = cx.enter_call()?;
            let padding = core::hint::black_box([0u8; 512]);
            if levels == 0 {
                return Ok(usize::from(padding[0]));
            }
            nest(&mut scope, levels - 1).map(|n| n + 1)
        }

        let mut cx = Runtime::new(RuntimeCreateInfo::default()).new_context(&ContextCreateInfo {
            max_call_depth: usize::MAX,
            native_stack_bytes: 64 * 1024,
            ..ContextCreateInfo::default()
        });
        assert_eq!(nest(&mut cx, 16), Ok(16));
        assert_eq!(nest(&mut cx, 100_000), Err(CallError::StackOverflow));
        assert_eq!(cx.depth(), 0);
        assert_eq!(cx.stack.sp(), cx.stack.capacity());
    }

    #[test]
    fn stack_limit_scope_narrows_and_restores() {
        let mut cx = context(128);
        {
            let mut limited = cx.with_stack_limit(8);
            assert_eq!(limited.stack.remaining_slots(), 8);
            assert!(limited.push_linkage_frame(FrameKind::Bridge, &[]).is_ok());
            assert!(limited.push_entry_frame().is_ok());
            assert_eq!(
                limited.push_linkage_frame(FrameKind::Bridge, &[]),
                Err(CallError::StackOverflow)
            );
        }
        assert_eq!(cx.stack.limit(), 0);
    }

    #[test]
    #[should_panic(expected = "occupies")]
    fn mis_sized_frame_is_fatal() {
        let mut cx = context(128);
        let total = interpreted::HEADER + 2;
        let fp = cx.begin_frame(FrameKind::Interpreted, total).unwrap();
        for offset in interpreted::PC..interpreted::HEADER {
            cx.stack.set(fp + offset, Value::fixnum(0));
        }
        // Claims one register where two slots follow the header.
        cx.stack.set_usize(fp + interpreted::VREGS, 1);
        cx.publish(fp, total);
    }

    #[test]
    fn correctly_sized_frame_publishes() {
        let mut cx = context(128);
        let total = interpreted::HEADER + 2;
        let fp = cx.begin_frame(FrameKind::Interpreted, total).unwrap();
        for offset in interpreted::PC..interpreted::HEADER {
            cx.stack.set(fp + offset, Value::fixnum(0));
        }
        cx.stack.set_usize(fp + interpreted::VREGS, 2);
        cx.publish(fp, total);
        assert_eq!(cx.top_frame().map(|f| f.size()), Some(total));
    }

    #[test]
    fn roots_come_from_published_frames_only() {
        let mut cx = context(128);
        let mut scope = cx.enter_call().unwrap();
        scope.push_entry_frame().unwrap();
        let mut count = 0;
        scope.visit_roots(&mut |_| count += 1);
        assert_eq!(count, 0);
    }
}
