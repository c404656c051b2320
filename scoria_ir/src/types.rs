//! Value kinds of the managed type system.
//!
//! Sub-word kinds (`Bool`, `Byte`, `Char`, `Short`) are widened to `Int`
//! once a value reaches a register; they stay distinct kinds because call
//! signatures and return-value moves are typed by the original width.

/// Kind of a managed value as the backend sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Void,
    Bool,
    /// Signed 8-bit.
    Byte,
    /// Unsigned 16-bit code unit.
    Char,
    /// Signed 16-bit.
    Short,
    Int,
    Long,
    Float,
    Double,
    /// Heap reference. 32-bit in the managed heap.
    Ref,
}

impl ValueKind {
    /// Whether values of this kind live in floating-point registers.
    pub fn is_fp(self) -> bool {
        matches!(self, ValueKind::Float | ValueKind::Double)
    }

    /// Whether this kind occupies a full 64-bit register.
    pub fn is_wide(self) -> bool {
        matches!(self, ValueKind::Long | ValueKind::Double)
    }

    /// Whether this kind is a heap reference.
    pub fn is_ref(self) -> bool {
        self == ValueKind::Ref
    }
}
