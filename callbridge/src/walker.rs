use std::collections::HashMap;
use std::sync::Arc;

use crate::Value;
use crate::compiled::CodeId;
use crate::error::frame_corruption;
use crate::frames::{self, Frame, FrameKind, compiled};
use crate::stack::MachineStack;

/// Safepoint id meaning "no spill slot is live".
pub const NO_SAFEPOINT: u32 = 0;

/// Spill-slot liveness per compiled code object and safepoint.
#[derive(Debug, Default)]
pub struct StackMaps {
    maps: HashMap<(CodeId, u32), Arc<[usize]>>,
}

impl StackMaps {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the live spill offsets of `code` at `safepoint`.
    pub fn insert(&mut self, code: CodeId, safepoint: u32, live: impl Into<Arc<[usize]>>) {
        if safepoint == NO_SAFEPOINT {
            frame_corruption(format_args!("{code:?} registers reserved safepoint 0"));
        }
        self.maps.insert((code, safepoint), live.into());
    }

    #[must_use]
    pub fn lookup(&self, code: CodeId, safepoint: u32) -> Option<&[usize]> {
        self.maps.get(&(code, safepoint)).map(|m| &m[..])
    }
}

/// Lazy walk from a frame to the sentinel, youngest first.
#[derive(Clone)]
pub struct FrameIterator<'a> {
    stack: &'a MachineStack,
    next: Option<usize>,
}

impl<'a> FrameIterator<'a> {
    #[must_use]
    pub fn new(stack: &'a MachineStack, top: Option<usize>) -> Self {
        Self { stack, next: top }
    }

    #[must_use]
    pub fn current(&self) -> Option<Frame<'a>> {
        self.next.map(|fp| Frame::at(self.stack, fp))
    }

    /// Steps to the caller of the current frame. Returns `false` at the end.
    pub fn advance(&mut self) -> bool {
        let Some(frame) = self.current() else {
            return false;
        };
        let prev = frame.prev();
        if prev.is_some_and(|p| p <= frame.fp()) {
            frame_corruption(format_args!(
                "frame at {} links to younger slot {prev:?}",
                frame.fp()
            ));
        }
        log::trace!("walk {:?} -> {prev:?}", frame.kind());
        self.next = prev;
        self.next.is_some()
    }
}

impl<'a> Iterator for FrameIterator<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Frame<'a>> {
        let frame = self.current()?;
        self.advance();
        Some(frame)
    }
}

/// Hands every tagged slot of the frame at `fp` to `visitor`.
pub fn gc_iterate(
    stack: &mut MachineStack,
    fp: usize,
    maps: &StackMaps,
    visitor: &mut dyn FnMut(&mut Value),
) {
    let frame = Frame::at(stack, fp);
    let kind = frame.kind();
    let layout = kind.layout();
    let locals_start = fp + layout.header;
    let locals_len = frame.locals_len();
    let region_start = locals_start + locals_len;
    let region_len = frame.region_len();

    for &offset in layout.tagged {
        visitor(stack.slot_mut(fp + offset));
    }

    match kind {
        FrameKind::Interpreted => {
            for i in locals_start..locals_start + locals_len {
                visitor(stack.slot_mut(i));
            }
        }
        FrameKind::Compiled => {
            let code = CodeId::from_index(stack.get_usize(fp + compiled::CODE) as u32);
            let safepoint = stack.get_usize(fp + compiled::SAFEPOINT) as u32;
            if safepoint != NO_SAFEPOINT {
                let Some(live) = maps.lookup(code, safepoint) else {
                    frame_corruption(format_args!(
                        "no stack map for {code:?} at safepoint {safepoint}"
                    ));
                };
                for &offset in live {
                    if offset >= locals_len {
                        frame_corruption(format_args!(
                            "stack map for {code:?} names spill {offset} of {locals_len}"
                        ));
                    }
                    visitor(stack.slot_mut(locals_start + offset));
                }
            }
        }
        FrameKind::Entry
        | FrameKind::Bridge
        | FrameKind::ArgsConfig
        | FrameKind::ArgvUnfold
        | FrameKind::NativeLeave
        | FrameKind::NativeLeaveWithArgv
        | FrameKind::Builtin
        | FrameKind::BuiltinWithArgv => {}
    }

    for i in region_start..region_start + region_len {
        visitor(stack.slot_mut(i));
    }
}

/// Visits the roots of every frame from `top` to the sentinel.
pub fn visit_roots(
    stack: &mut MachineStack,
    top: Option<usize>,
    maps: &StackMaps,
    visitor: &mut dyn FnMut(&mut Value),
) {
    let mut cursor = top;
    while let Some(fp) = cursor {
        let prev = frames::decode_link(stack.get(fp + frames::PREV));
        gc_iterate(stack, fp, maps, visitor);
        cursor = prev;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{PREV, RETURN, encode_link, interpreted};

    fn push_bridge(stack: &mut MachineStack, prev: Option<usize>) -> usize {
        let fp = stack.reserve(frames::bridge::HEADER).unwrap();
        stack.set(fp + frames::KIND, FrameKind::Bridge.to_word());
        stack.set(fp + PREV, encode_link(prev));
        stack.set(fp + RETURN, Value::fixnum(0));
        fp
    }

    fn push_interpreted(stack: &mut MachineStack, prev: Option<usize>, regs: &[Value]) -> usize {
        let fp = stack.reserve(interpreted::HEADER + regs.len()).unwrap();
        for i in 0..interpreted::HEADER {
            stack.set(fp + i, Value::UNDEFINED);
        }
        stack.set(fp + frames::KIND, FrameKind::Interpreted.to_word());
        stack.set(fp + PREV, encode_link(prev));
        stack.set(fp + RETURN, Value::fixnum(0));
        stack.set_usize(fp + interpreted::PC, 0);
        stack.set_usize(fp + interpreted::ARGC, 0);
        stack.set_usize(fp + interpreted::VREGS, regs.len());
        stack.set_usize(fp + interpreted::REGION_LEN, 0);
        stack.set(fp + interpreted::ACC, Value::fixnum(99));
        for (i, r) in regs.iter().enumerate() {
            stack.set(fp + interpreted::HEADER + i, *r);
        }
        fp
    }

    #[test]
    fn walk_reaches_sentinel_once_per_frame() {
        let mut stack = MachineStack::new(256, 0);
        let a = push_bridge(&mut stack, None);
        let b = push_interpreted(&mut stack, Some(a), &[]);
        let c = push_bridge(&mut stack, Some(b));

        let kinds: Vec<FrameKind> = FrameIterator::new(&stack, Some(c))
            .map(|f| f.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![FrameKind::Bridge, FrameKind::Interpreted, FrameKind::Bridge]
        );

        let mut it = FrameIterator::new(&stack, Some(c));
        let mut steps = 0;
        while it.advance() {
            steps += 1;
        }
        assert_eq!(steps, 2);
        assert!(it.current().is_none());
    }

    #[test]
    fn empty_walk() {
        let stack = MachineStack::new(8, 0);
        assert_eq!(FrameIterator::new(&stack, None).count(), 0);
    }

    #[test]
    fn roots_cover_header_fields_and_registers() {
        let mut stack = MachineStack::new(256, 0);
        let a = push_interpreted(&mut stack, None, &[Value::fixnum(1), Value::fixnum(2)]);
        let b = push_bridge(&mut stack, Some(a));

        let mut seen = Vec::new();
        visit_roots(&mut stack, Some(b), &StackMaps::new(), &mut |v| seen.push(*v));
        assert_eq!(seen.len(), interpreted::TAGGED.len() + 2);
        assert!(seen.contains(&Value::fixnum(99)));
        assert!(seen.contains(&Value::fixnum(2)));
    }

    #[test]
    fn visitor_can_rewrite_slots() {
        let mut stack = MachineStack::new(64, 0);
        let a = push_interpreted(&mut stack, None, &[Value::fixnum(5)]);
        visit_roots(&mut stack, Some(a), &StackMaps::new(), &mut |v| {
            if *v == Value::fixnum(5) {
                *v = Value::fixnum(6);
            }
        });
        assert_eq!(stack.get(a + interpreted::HEADER), Value::fixnum(6));
    }

    #[test]
    #[should_panic(expected = "internal frame corruption")]
    fn link_to_younger_frame_is_fatal() {
        let mut stack = MachineStack::new(64, 0);
        let a = push_bridge(&mut stack, None);
        let b = push_bridge(&mut stack, Some(a));
        stack.set(a + PREV, encode_link(Some(b)));
        let mut it = FrameIterator::new(&stack, Some(b));
        while it.advance() {}
    }
}
