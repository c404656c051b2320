//! Call nodes as the intrinsic layer consumes them.
//!
//! Operand identity and control flow stay in the surrounding graph; this
//! layer needs only operand kinds, the dispatch kind, and the bytecode
//! offset for safepoint records.

use crate::intrinsics::IntrinsicId;
use crate::types::ValueKind;

/// Opaque handle to a resolved method in the loaded-method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodRef(pub u32);

/// Dispatch kind of an invoke, fixed at graph-build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Static,
    Direct,
    Virtual,
    Interface,
}

/// A call node after catalog lookup.
#[derive(Debug, Clone)]
pub struct InvokeNode {
    pub method: MethodRef,
    pub dispatch: InvokeKind,
    /// Catalog verdict for this call site, if any.
    pub intrinsic: Option<IntrinsicId>,
    /// Kinds of all arguments, receiver included for instance methods.
    pub input_kinds: Vec<ValueKind>,
    pub return_kind: ValueKind,
    /// Bytecode offset of the call site, for safepoint and fault records.
    pub bytecode_offset: u32,
}

impl InvokeNode {
    pub fn new(
        method: MethodRef,
        dispatch: InvokeKind,
        input_kinds: Vec<ValueKind>,
        return_kind: ValueKind,
        bytecode_offset: u32,
    ) -> Self {
        Self {
            method,
            dispatch,
            intrinsic: None,
            input_kinds,
            return_kind,
            bytecode_offset,
        }
    }

    /// Node pre-shaped from an intrinsic's catalog signature.
    pub fn for_intrinsic(
        id: IntrinsicId,
        method: MethodRef,
        dispatch: InvokeKind,
        bytecode_offset: u32,
    ) -> Self {
        let sig = id.signature();
        Self {
            method,
            dispatch,
            intrinsic: Some(id),
            input_kinds: sig.params.to_vec(),
            return_kind: sig.ret,
            bytecode_offset,
        }
    }

    pub fn arity(&self) -> usize {
        self.input_kinds.len()
    }

    /// Whether the call can be re-issued as a static/direct call.
    pub fn has_direct_dispatch(&self) -> bool {
        matches!(self.dispatch, InvokeKind::Static | InvokeKind::Direct)
    }
}
