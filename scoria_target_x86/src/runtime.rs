//! Runtime object layout and thread-block offsets.
//!
//! Every constant here mirrors a field the managed runtime lays out; the
//! synthesizer bakes them into addressing modes. The thread block lives
//! behind `gs` on x86-64.

/// gs-relative offset of the card-table base pointer.
pub const THREAD_CARD_TABLE_OFFSET: i32 = 0x08;

/// gs-relative offset of the managed thread-peer reference.
pub const THREAD_SELF_OFFSET: i32 = 0x10;

/// gs-relative offset of the first runtime entry-point slot. Slots are
/// pointer-sized and densely packed in [`Entrypoint`] order.
pub const THREAD_ENTRYPOINT_BASE: i32 = 0x100;

/// Runtime helpers reachable through the thread block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entrypoint {
    StringCompare,
}

impl Entrypoint {
    /// gs-relative offset of this helper's slot.
    pub fn offset(self) -> i32 {
        let index = match self {
            Entrypoint::StringCompare => 0,
        };
        THREAD_ENTRYPOINT_BASE + index * 8
    }
}

/// Offset of the char-array reference inside a string object.
pub const STRING_VALUE_OFFSET: i32 = 8;

/// Offset of the character count inside a string object.
pub const STRING_COUNT_OFFSET: i32 = 12;

/// Offset of the string's starting index into its backing array.
pub const STRING_OFFSET_OFFSET: i32 = 16;

/// Offset of the first element in a char array.
pub const CHAR_ARRAY_DATA_OFFSET: i32 = 12;

/// log2 of the bytes covered by one card-table byte.
pub const CARD_SHIFT: u8 = 10;

/// Offset of the native entry point inside a method object.
pub const METHOD_ENTRY_OFFSET: i32 = 0x20;
