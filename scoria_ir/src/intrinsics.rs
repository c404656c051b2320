//! The closed catalog of recognized standard-library methods.
//!
//! Catalog lookup itself (declaring type + signature to id) happens in the
//! graph builder; this module owns the id enumeration and the fixed
//! signature each id was recognized against.

use crate::types::ValueKind;

/// One recognized standard-library method.
///
/// The last four ids are permanently non-intrinsified: the catalog still
/// names them so call sites stay tagged, but no backend rule exists and the
/// generic call path always applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicId {
    // Bit-pattern reinterpretation between register files.
    FloatToRawIntBits,
    IntBitsToFloat,
    DoubleToRawLongBits,
    LongBitsToDouble,

    // Byte-order reversal.
    ShortReverseBytes,
    IntReverseBytes,
    LongReverseBytes,

    // Bit reversal.
    IntReverseBits,
    LongReverseBits,

    // Absolute value.
    IntAbs,
    LongAbs,
    FloatAbs,
    DoubleAbs,

    // Min/max.
    IntMin,
    IntMax,
    LongMin,
    LongMax,
    FloatMin,
    FloatMax,
    DoubleMin,
    DoubleMax,

    // Rounding family.
    DoubleSqrt,
    DoubleCeil,
    DoubleFloor,
    DoubleRint,
    FloatRound,
    DoubleRound,

    // Strings.
    StringCharAt,
    StringCompare,

    // Raw-address peek/poke.
    PeekByte,
    PeekShort,
    PeekInt,
    PeekLong,
    PokeByte,
    PokeShort,
    PokeInt,
    PokeLong,

    // Current-execution-context lookup.
    ThreadCurrent,

    // Raw field access on a (base, byte offset) pair.
    RawGetInt,
    RawGetIntVolatile,
    RawGetLong,
    RawGetLongVolatile,
    RawGetRef,
    RawGetRefVolatile,
    RawPutInt,
    RawPutIntOrdered,
    RawPutIntVolatile,
    RawPutLong,
    RawPutLongOrdered,
    RawPutLongVolatile,
    RawPutRef,
    RawPutRefOrdered,
    RawPutRefVolatile,

    // Compare-and-swap.
    CasInt,
    CasLong,
    CasRef,

    // Recognized but permanently non-intrinsified on this target.
    StringIndexOf,
    StringIndexOfAfter,
    CharArrayCopy,
    SoftRefGet,
}

/// Fixed signature an id was recognized against: argument kinds (receiver
/// included) and return kind.
#[derive(Debug, Clone, Copy)]
pub struct Signature {
    pub params: &'static [ValueKind],
    pub ret: ValueKind,
}

const fn sig(params: &'static [ValueKind], ret: ValueKind) -> Signature {
    Signature { params, ret }
}

impl IntrinsicId {
    /// Every id, in declaration order. Rule tables and tests iterate this.
    pub const ALL: [IntrinsicId; 60] = [
        IntrinsicId::FloatToRawIntBits,
        IntrinsicId::IntBitsToFloat,
        IntrinsicId::DoubleToRawLongBits,
        IntrinsicId::LongBitsToDouble,
        IntrinsicId::ShortReverseBytes,
        IntrinsicId::IntReverseBytes,
        IntrinsicId::LongReverseBytes,
        IntrinsicId::IntReverseBits,
        IntrinsicId::LongReverseBits,
        IntrinsicId::IntAbs,
        IntrinsicId::LongAbs,
        IntrinsicId::FloatAbs,
        IntrinsicId::DoubleAbs,
        IntrinsicId::IntMin,
        IntrinsicId::IntMax,
        IntrinsicId::LongMin,
        IntrinsicId::LongMax,
        IntrinsicId::FloatMin,
        IntrinsicId::FloatMax,
        IntrinsicId::DoubleMin,
        IntrinsicId::DoubleMax,
        IntrinsicId::DoubleSqrt,
        IntrinsicId::DoubleCeil,
        IntrinsicId::DoubleFloor,
        IntrinsicId::DoubleRint,
        IntrinsicId::FloatRound,
        IntrinsicId::DoubleRound,
        IntrinsicId::StringCharAt,
        IntrinsicId::StringCompare,
        IntrinsicId::PeekByte,
        IntrinsicId::PeekShort,
        IntrinsicId::PeekInt,
        IntrinsicId::PeekLong,
        IntrinsicId::PokeByte,
        IntrinsicId::PokeShort,
        IntrinsicId::PokeInt,
        IntrinsicId::PokeLong,
        IntrinsicId::ThreadCurrent,
        IntrinsicId::RawGetInt,
        IntrinsicId::RawGetIntVolatile,
        IntrinsicId::RawGetLong,
        IntrinsicId::RawGetLongVolatile,
        IntrinsicId::RawGetRef,
        IntrinsicId::RawGetRefVolatile,
        IntrinsicId::RawPutInt,
        IntrinsicId::RawPutIntOrdered,
        IntrinsicId::RawPutIntVolatile,
        IntrinsicId::RawPutLong,
        IntrinsicId::RawPutLongOrdered,
        IntrinsicId::RawPutLongVolatile,
        IntrinsicId::RawPutRef,
        IntrinsicId::RawPutRefOrdered,
        IntrinsicId::RawPutRefVolatile,
        IntrinsicId::CasInt,
        IntrinsicId::CasLong,
        IntrinsicId::CasRef,
        IntrinsicId::StringIndexOf,
        IntrinsicId::StringIndexOfAfter,
        IntrinsicId::CharArrayCopy,
        IntrinsicId::SoftRefGet,
    ];

    pub fn signature(self) -> Signature {
        use ValueKind::*;
        match self {
            IntrinsicId::FloatToRawIntBits => sig(&[Float], Int),
            IntrinsicId::IntBitsToFloat => sig(&[Int], Float),
            IntrinsicId::DoubleToRawLongBits => sig(&[Double], Long),
            IntrinsicId::LongBitsToDouble => sig(&[Long], Double),

            IntrinsicId::ShortReverseBytes => sig(&[Short], Short),
            IntrinsicId::IntReverseBytes => sig(&[Int], Int),
            IntrinsicId::LongReverseBytes => sig(&[Long], Long),
            IntrinsicId::IntReverseBits => sig(&[Int], Int),
            IntrinsicId::LongReverseBits => sig(&[Long], Long),

            IntrinsicId::IntAbs => sig(&[Int], Int),
            IntrinsicId::LongAbs => sig(&[Long], Long),
            IntrinsicId::FloatAbs => sig(&[Float], Float),
            IntrinsicId::DoubleAbs => sig(&[Double], Double),

            IntrinsicId::IntMin | IntrinsicId::IntMax => sig(&[Int, Int], Int),
            IntrinsicId::LongMin | IntrinsicId::LongMax => sig(&[Long, Long], Long),
            IntrinsicId::FloatMin | IntrinsicId::FloatMax => sig(&[Float, Float], Float),
            IntrinsicId::DoubleMin | IntrinsicId::DoubleMax => sig(&[Double, Double], Double),

            IntrinsicId::DoubleSqrt
            | IntrinsicId::DoubleCeil
            | IntrinsicId::DoubleFloor
            | IntrinsicId::DoubleRint => sig(&[Double], Double),
            IntrinsicId::FloatRound => sig(&[Float], Int),
            IntrinsicId::DoubleRound => sig(&[Double], Long),

            IntrinsicId::StringCharAt => sig(&[Ref, Int], Char),
            IntrinsicId::StringCompare => sig(&[Ref, Ref], Int),

            IntrinsicId::PeekByte => sig(&[Long], Byte),
            IntrinsicId::PeekShort => sig(&[Long], Short),
            IntrinsicId::PeekInt => sig(&[Long], Int),
            IntrinsicId::PeekLong => sig(&[Long], Long),
            IntrinsicId::PokeByte => sig(&[Long, Byte], Void),
            IntrinsicId::PokeShort => sig(&[Long, Short], Void),
            IntrinsicId::PokeInt => sig(&[Long, Int], Void),
            IntrinsicId::PokeLong => sig(&[Long, Long], Void),

            IntrinsicId::ThreadCurrent => sig(&[], Ref),

            IntrinsicId::RawGetInt | IntrinsicId::RawGetIntVolatile => {
                sig(&[Ref, Ref, Long], Int)
            }
            IntrinsicId::RawGetLong | IntrinsicId::RawGetLongVolatile => {
                sig(&[Ref, Ref, Long], Long)
            }
            IntrinsicId::RawGetRef | IntrinsicId::RawGetRefVolatile => {
                sig(&[Ref, Ref, Long], Ref)
            }
            IntrinsicId::RawPutInt
            | IntrinsicId::RawPutIntOrdered
            | IntrinsicId::RawPutIntVolatile => sig(&[Ref, Ref, Long, Int], Void),
            IntrinsicId::RawPutLong
            | IntrinsicId::RawPutLongOrdered
            | IntrinsicId::RawPutLongVolatile => sig(&[Ref, Ref, Long, Long], Void),
            IntrinsicId::RawPutRef
            | IntrinsicId::RawPutRefOrdered
            | IntrinsicId::RawPutRefVolatile => sig(&[Ref, Ref, Long, Ref], Void),

            IntrinsicId::CasInt => sig(&[Ref, Ref, Long, Int, Int], Bool),
            IntrinsicId::CasLong => sig(&[Ref, Ref, Long, Long, Long], Bool),
            IntrinsicId::CasRef => sig(&[Ref, Ref, Long, Ref, Ref], Bool),

            IntrinsicId::StringIndexOf => sig(&[Ref, Int], Int),
            IntrinsicId::StringIndexOfAfter => sig(&[Ref, Int, Int], Int),
            IntrinsicId::CharArrayCopy => sig(&[Ref, Int, Ref, Int, Int], Void),
            IntrinsicId::SoftRefGet => sig(&[Ref], Ref),
        }
    }

    /// Ids with no backend rule on any target, by policy.
    pub fn is_unimplemented_by_policy(self) -> bool {
        matches!(
            self,
            IntrinsicId::StringIndexOf
                | IntrinsicId::StringIndexOfAfter
                | IntrinsicId::CharArrayCopy
                | IntrinsicId::SoftRefGet
        )
    }
}
