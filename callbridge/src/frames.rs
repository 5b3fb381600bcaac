//! Frame layouts.
//!
//! A frame is a run of stack slots starting at its frame pointer `fp` (its
//! lowest slot). Every frame starts with the same three words:
//!
//! ```text
//! fp + 0  KIND    frame kind tag
//! fp + 1  PREV    fp of the next older frame, or the sentinel
//! fp + 2  RETURN  resume point in the caller
//! ```
//!
//! followed by kind-specific header fields, then the kind's variable part
//! (locals, spills, argument region). Older frames live at higher indices.

use crate::Value;
use crate::error::frame_corruption;
use crate::stack::MachineStack;

pub const KIND: usize = 0;
pub const PREV: usize = 1;
pub const RETURN: usize = 2;
pub const COMMON_HEADER: usize = 3;

/// Link word of the outermost frame.
pub const SENTINEL: Value = Value::fixnum(-1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Entry = 1,
    Interpreted = 2,
    Compiled = 3,
    Bridge = 4,
    NativeLeave = 5,
    NativeLeaveWithArgv = 6,
    Builtin = 7,
    BuiltinWithArgv = 8,
    ArgsConfig = 9,
    ArgvUnfold = 10,
}

impl FrameKind {
    pub const ALL: [FrameKind; 10] = [
        Self::Entry,
        Self::Interpreted,
        Self::Compiled,
        Self::Bridge,
        Self::NativeLeave,
        Self::NativeLeaveWithArgv,
        Self::Builtin,
        Self::BuiltinWithArgv,
        Self::ArgsConfig,
        Self::ArgvUnfold,
    ];

    #[inline(always)]
    pub const fn to_word(self) -> Value {
        Value::fixnum(self as i64)
    }

    pub fn from_word(word: Value) -> Option<Self> {
        let tag = word.as_fixnum()?;
        Self::ALL.into_iter().find(|k| *k as i64 == tag)
    }

    #[inline]
    pub const fn is_native(self) -> bool {
        matches!(
            self,
            Self::NativeLeave
                | Self::NativeLeaveWithArgv
                | Self::Builtin
                | Self::BuiltinWithArgv
        )
    }

    #[inline]
    pub const fn has_argv(self) -> bool {
        matches!(self, Self::NativeLeaveWithArgv | Self::BuiltinWithArgv)
    }

    pub fn layout(self) -> FrameLayout {
        match self {
            Self::Entry => FrameLayout {
                header: entry::HEADER,
                tagged: &[],
            },
            Self::Interpreted => FrameLayout {
                header: interpreted::HEADER,
                tagged: &interpreted::TAGGED,
            },
            Self::Compiled => FrameLayout {
                header: compiled::HEADER,
                tagged: &compiled::TAGGED,
            },
            Self::Bridge => FrameLayout {
                header: bridge::HEADER,
                tagged: &[],
            },
            Self::NativeLeave
            | Self::NativeLeaveWithArgv
            | Self::Builtin
            | Self::BuiltinWithArgv => FrameLayout {
                header: native::HEADER,
                tagged: &native::TAGGED,
            },
            Self::ArgsConfig => FrameLayout {
                header: args_config::HEADER,
                tagged: &[],
            },
            Self::ArgvUnfold => FrameLayout {
                header: argv_unfold::HEADER,
                tagged: &[],
            },
        }
    }
}

/// Fixed part of a frame kind's layout.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub header: usize,
    /// Header offsets holding tagged values the collector must visit.
    pub tagged: &'static [usize],
}

pub mod entry {
    pub const SAVED_LEAVE: usize = 3;
    pub const HEADER: usize = 4;
}

pub mod interpreted {
    pub const PC: usize = 3;
    pub const ACC: usize = 4;
    pub const ENV: usize = 5;
    pub const CONSTPOOL: usize = 6;
    pub const PROFILE: usize = 7;
    pub const THIS: usize = 8;
    pub const FUNCTION: usize = 9;
    pub const NEW_TARGET: usize = 10;
    pub const OVERFLOW: usize = 11;
    pub const ARGC: usize = 12;
    pub const VREGS: usize = 13;
    pub const REGION_LEN: usize = 14;
    pub const HEADER: usize = 15;

    pub const TAGGED: [usize; 8] =
        [ACC, ENV, CONSTPOOL, PROFILE, THIS, FUNCTION, NEW_TARGET, OVERFLOW];
}

pub mod compiled {
    pub const FUNCTION: usize = 3;
    pub const THIS: usize = 4;
    pub const NEW_TARGET: usize = 5;
    pub const ENV: usize = 6;
    pub const OVERFLOW: usize = 7;
    pub const ARGC: usize = 8;
    pub const CODE: usize = 9;
    pub const SAFEPOINT: usize = 10;
    pub const SPILLS: usize = 11;
    pub const REGION_LEN: usize = 12;
    pub const HEADER: usize = 13;

    pub const TAGGED: [usize; 5] = [FUNCTION, THIS, NEW_TARGET, ENV, OVERFLOW];
}

pub mod bridge {
    pub const HEADER: usize = 3;
}

/// Shared by the four native kinds.
pub mod native {
    pub const ARGC: usize = 3;
    pub const FUNCTION: usize = 4;
    pub const THIS: usize = 5;
    pub const NEW_TARGET: usize = 6;
    pub const OVERFLOW: usize = 7;
    pub const REGION_LEN: usize = 8;
    pub const HEADER: usize = 9;

    pub const TAGGED: [usize; 4] = [FUNCTION, THIS, NEW_TARGET, OVERFLOW];
}

pub mod args_config {
    pub const ACTUAL_ARGC: usize = 3;
    pub const DECLARED: usize = 4;
    pub const HEADER: usize = 5;
}

pub mod argv_unfold {
    pub const ARGC: usize = 3;
    pub const HEADER: usize = 4;
}

/// Tagged offsets are strictly increasing and lie between the common
/// header and the end of the kind's header.
const fn tagged_within_header(tagged: &[usize], header: usize) -> bool {
    let mut last = RETURN;
    let mut i = 0;
    while i < tagged.len() {
        if tagged[i] <= last || tagged[i] >= header {
            return false;
        }
        last = tagged[i];
        i += 1;
    }
    true
}

/// No count word is also visited as a tagged value.
const fn disjoint(counts: &[usize], tagged: &[usize]) -> bool {
    let mut i = 0;
    while i < counts.len() {
        let mut j = 0;
        while j < tagged.len() {
            if counts[i] == tagged[j] {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(tagged_within_header(&interpreted::TAGGED, interpreted::HEADER));
const _: () = assert!(tagged_within_header(&compiled::TAGGED, compiled::HEADER));
const _: () = assert!(tagged_within_header(&native::TAGGED, native::HEADER));
const _: () = assert!(disjoint(
    &[interpreted::PC, interpreted::ARGC, interpreted::VREGS, interpreted::REGION_LEN],
    &interpreted::TAGGED,
));
const _: () = assert!(disjoint(
    &[
        compiled::ARGC,
        compiled::CODE,
        compiled::SAFEPOINT,
        compiled::SPILLS,
        compiled::REGION_LEN,
    ],
    &compiled::TAGGED,
));
const _: () = assert!(disjoint(&[native::ARGC, native::REGION_LEN], &native::TAGGED));
const _: () = assert!(entry::SAVED_LEAVE == COMMON_HEADER && entry::HEADER == COMMON_HEADER + 1);
const _: () = assert!(bridge::HEADER == COMMON_HEADER);
const _: () = assert!(args_config::HEADER == COMMON_HEADER + 2);
const _: () = assert!(argv_unfold::HEADER == COMMON_HEADER + 1);

/// Startup check of every layout. Any mismatch is fatal.
pub fn verify_frame_layouts() {
    for kind in FrameKind::ALL {
        let layout = kind.layout();
        if layout.header < COMMON_HEADER {
            frame_corruption(format_args!(
                "{kind:?} header of {} words is shorter than the common header",
                layout.header
            ));
        }
        let mut last = RETURN;
        for &offset in layout.tagged {
            if offset <= last || offset >= layout.header {
                frame_corruption(format_args!(
                    "{kind:?} tagged field at {offset} is out of order or outside the header"
                ));
            }
            last = offset;
        }
        if FrameKind::from_word(kind.to_word()) != Some(kind) {
            frame_corruption(format_args!("{kind:?} tag does not decode"));
        }
        // A frame with no locals and an empty region is exactly its header.
        let mut scratch = MachineStack::new(layout.header, 0);
        scratch.set(KIND, kind.to_word());
        scratch.set(PREV, SENTINEL);
        for offset in RETURN..layout.header {
            scratch.set(offset, Value::fixnum(0));
        }
        let size = Frame::at(&scratch, 0).size();
        if size != layout.header {
            frame_corruption(format_args!(
                "empty {kind:?} frame occupies {size} slots, header is {}",
                layout.header
            ));
        }
    }
    log::debug!("frame layouts verified for {} kinds", FrameKind::ALL.len());
}

#[inline]
pub(crate) fn encode_link(fp: Option<usize>) -> Value {
    match fp {
        Some(fp) => Value::from_i64(fp as i64),
        None => SENTINEL,
    }
}

#[inline]
pub(crate) fn decode_link(word: Value) -> Option<usize> {
    if word == SENTINEL {
        return None;
    }
    match word.as_fixnum() {
        Some(n) if n >= 0 => Some(n as usize),
        _ => frame_corruption(format_args!("bad frame link {word:?}")),
    }
}

/// Reads the kind tag of the frame at `fp`.
#[inline]
pub fn kind_at(stack: &MachineStack, fp: usize) -> FrameKind {
    let word = stack.get(fp + KIND);
    match FrameKind::from_word(word) {
        Some(kind) => kind,
        None => frame_corruption(format_args!("unknown frame tag {word:?} at {fp}")),
    }
}

// ── Frame view ─────────────────────────────────────────────────────

/// Read-only typed view of one published frame.
#[derive(Clone, Copy)]
pub struct Frame<'a> {
    stack: &'a MachineStack,
    fp: usize,
    kind: FrameKind,
}

impl<'a> Frame<'a> {
    #[must_use]
    pub fn at(stack: &'a MachineStack, fp: usize) -> Self {
        Self {
            stack,
            fp,
            kind: kind_at(stack, fp),
        }
    }

    #[inline]
    #[must_use]
    pub fn fp(&self) -> usize {
        self.fp
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    #[must_use]
    pub fn prev(&self) -> Option<usize> {
        decode_link(self.stack.get(self.fp + PREV))
    }

    #[must_use]
    pub fn return_point(&self) -> Value {
        self.stack.get(self.fp + RETURN)
    }

    #[inline]
    #[must_use]
    pub fn field(&self, offset: usize) -> Value {
        self.stack.get(self.fp + offset)
    }

    fn count(&self, offset: usize) -> usize {
        self.stack.get_usize(self.fp + offset)
    }

    /// Number of slots between the header and the argument region.
    #[must_use]
    pub fn locals_len(&self) -> usize {
        match self.kind {
            FrameKind::Interpreted => self.count(interpreted::VREGS),
            FrameKind::Compiled => self.count(compiled::SPILLS),
            _ => 0,
        }
    }

    #[must_use]
    pub fn region_len(&self) -> usize {
        match self.kind {
            FrameKind::Interpreted => self.count(interpreted::REGION_LEN),
            FrameKind::Compiled => self.count(compiled::REGION_LEN),
            k if k.is_native() => self.count(native::REGION_LEN),
            _ => 0,
        }
    }

    /// Total frame size in slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.kind.layout().header + self.locals_len() + self.region_len()
    }

    /// One past the highest slot of this frame.
    #[must_use]
    pub fn top(&self) -> usize {
        self.fp + self.size()
    }

    #[must_use]
    pub fn locals(&self) -> &'a [Value] {
        self.stack
            .slice(self.fp + self.kind.layout().header, self.locals_len())
    }

    #[must_use]
    pub fn region(&self) -> &'a [Value] {
        let start = self.fp + self.kind.layout().header + self.locals_len();
        self.stack.slice(start, self.region_len())
    }

    fn pick(&self, interp: usize, comp: usize, nat: usize) -> Option<Value> {
        match self.kind {
            FrameKind::Interpreted => Some(self.field(interp)),
            FrameKind::Compiled => Some(self.field(comp)),
            k if k.is_native() => Some(self.field(nat)),
            _ => None,
        }
    }

    #[must_use]
    pub fn function(&self) -> Option<Value> {
        self.pick(interpreted::FUNCTION, compiled::FUNCTION, native::FUNCTION)
    }

    #[must_use]
    pub fn this(&self) -> Option<Value> {
        self.pick(interpreted::THIS, compiled::THIS, native::THIS)
    }

    #[must_use]
    pub fn new_target(&self) -> Option<Value> {
        self.pick(interpreted::NEW_TARGET, compiled::NEW_TARGET, native::NEW_TARGET)
    }

    #[must_use]
    pub fn overflow(&self) -> Option<Value> {
        self.pick(interpreted::OVERFLOW, compiled::OVERFLOW, native::OVERFLOW)
    }

    #[must_use]
    pub fn argc(&self) -> Option<usize> {
        match self.kind {
            FrameKind::Interpreted => Some(self.count(interpreted::ARGC)),
            FrameKind::Compiled => Some(self.count(compiled::ARGC)),
            FrameKind::ArgsConfig => Some(self.count(args_config::ACTUAL_ARGC)),
            FrameKind::ArgvUnfold => Some(self.count(argv_unfold::ARGC)),
            k if k.is_native() => Some(self.count(native::ARGC)),
            _ => None,
        }
    }

    #[must_use]
    pub fn pc(&self) -> Option<usize> {
        (self.kind == FrameKind::Interpreted).then(|| self.count(interpreted::PC))
    }

    #[must_use]
    pub fn acc(&self) -> Option<Value> {
        (self.kind == FrameKind::Interpreted).then(|| self.field(interpreted::ACC))
    }

    #[must_use]
    pub fn env(&self) -> Option<Value> {
        match self.kind {
            FrameKind::Interpreted => Some(self.field(interpreted::ENV)),
            FrameKind::Compiled => Some(self.field(compiled::ENV)),
            _ => None,
        }
    }

    #[must_use]
    pub fn saved_leave_frame(&self) -> Option<Option<usize>> {
        (self.kind == FrameKind::Entry)
            .then(|| decode_link(self.field(entry::SAVED_LEAVE)))
    }

    #[must_use]
    pub fn safepoint(&self) -> Option<u32> {
        (self.kind == FrameKind::Compiled)
            .then(|| self.count(compiled::SAFEPOINT) as u32)
    }
}

impl core::fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct("Frame");
        s.field("kind", &self.kind).field("fp", &self.fp);
        if let Some(function) = self.function() {
            s.field("function", &function);
        }
        if let Some(pc) = self.pc() {
            s.field("pc", &pc);
        }
        if let Some(acc) = self.acc() {
            s.field("acc", &acc);
        }
        if let Some(argc) = self.argc() {
            s.field("argc", &argc);
        }
        s.field("size", &self.size()).finish()
    }
}
