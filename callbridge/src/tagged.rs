use crate::object::ObjectId;

const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b01;
const SPECIAL_TAG: u64 = 0b11;

const fn special(n: u64) -> u64 {
    (n << 2) | SPECIAL_TAG
}

/// A tagged 64-bit value. Every machine stack slot holds one.
///
/// Encoding:
/// - **Fixnum**:    `...XXXXX0` 63-bit signed integer (low bit 0).
/// - **Reference**: `...XXXX01` heap object index shifted left by two.
/// - **Special**:   `...XXXX11` one of the language constants below.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

const _: () = assert!(size_of::<Value>() == 8);

impl Value {
    pub const HOLE: Value = Value(special(0));
    pub const UNDEFINED: Value = Value(special(1));
    pub const NULL: Value = Value(special(2));
    pub const FALSE: Value = Value(special(3));
    pub const TRUE: Value = Value(special(4));
    pub const EXCEPTION: Value = Value(special(5));

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(
            (-(1i64 << 62)..(1i64 << 62)).contains(&n),
            "fixnum overflow: {n}"
        );
        Self((n << 1) as u64)
    }

    /// Unchecked constructor for constant contexts.
    #[inline(always)]
    pub const fn fixnum(n: i64) -> Self {
        Self((n << 1) as u64)
    }

    #[inline(always)]
    pub const fn as_fixnum(self) -> Option<i64> {
        if self.is_fixnum() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    #[inline(always)]
    pub const fn from_object(id: ObjectId) -> Self {
        Self(((id.index() as u64) << 2) | REF_TAG)
    }

    #[inline(always)]
    pub const fn as_object(self) -> Option<ObjectId> {
        if self.is_ref() {
            Some(ObjectId::from_index((self.0 >> 2) as u32))
        } else {
            None
        }
    }

    // ── Specials ───────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_special(self) -> bool {
        self.0 & TAG_MASK == SPECIAL_TAG
    }

    #[inline(always)]
    pub const fn is_hole(self) -> bool {
        self.0 == Self::HOLE.0
    }

    #[inline(always)]
    pub const fn is_undefined(self) -> bool {
        self.0 == Self::UNDEFINED.0
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    /// Falsy values are `false`, `undefined`, `null`, `hole` and zero.
    #[inline(always)]
    pub fn is_truthy(self) -> bool {
        !(self == Self::FALSE
            || self == Self::UNDEFINED
            || self == Self::NULL
            || self == Self::HOLE
            || self == Self::fixnum(0))
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(n) = self.as_fixnum() {
            return write!(f, "Fixnum({n})");
        }
        if let Some(id) = self.as_object() {
            return write!(f, "Ref(#{})", id.index());
        }
        match *self {
            Self::HOLE => write!(f, "Hole"),
            Self::UNDEFINED => write!(f, "Undefined"),
            Self::NULL => write!(f, "Null"),
            Self::FALSE => write!(f, "False"),
            Self::TRUE => write!(f, "True"),
            Self::EXCEPTION => write!(f, "Exception"),
            _ => write!(f, "Special(0x{:016x})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixnums_round_trip_sign() {
        assert_eq!(Value::from_i64(-7).as_fixnum(), Some(-7));
        assert_eq!(Value::fixnum(42).as_fixnum(), Some(42));
        assert!(Value::UNDEFINED.as_fixnum().is_none());
    }

    #[test]
    fn specials_are_distinct_from_refs_and_fixnums() {
        let specials = [
            Value::HOLE,
            Value::UNDEFINED,
            Value::NULL,
            Value::FALSE,
            Value::TRUE,
            Value::EXCEPTION,
        ];
        for (i, a) in specials.iter().enumerate() {
            assert!(a.is_special());
            assert!(!a.is_ref());
            assert!(!a.is_fixnum());
            for b in &specials[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn object_refs_keep_their_index() {
        let v = Value::from_object(ObjectId::from_index(1234));
        assert!(v.is_ref());
        assert_eq!(v.as_object().map(ObjectId::index), Some(1234));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::UNDEFINED.is_truthy());
        assert!(!Value::fixnum(0).is_truthy());
        assert!(Value::fixnum(3).is_truthy());
        assert!(Value::TRUE.is_truthy());
    }
}
