//! Recording assembler for abstract x86-64 emission.
//!
//! Synthesis routines append [`Inst`] values and bind labels; no bytes are
//! produced here. The finished [`CodeStream`] hands the instruction list and
//! the interned literal pools to the downstream encoder.

use crate::inst::{FpSize, Inst, Label};
use crate::reg::Xmm;
use crate::CodegenError;

/// Append-only instruction stream with label management and literal pools.
pub struct Assembler {
    insts: Vec<Inst>,
    // Indexed by label id; `None` until bound.
    labels: Vec<Option<u32>>,
    lit32: Vec<u32>,
    lit64: Vec<u64>,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler {
            insts: Vec::new(),
            labels: Vec::new(),
            lit32: Vec::new(),
            lit64: Vec::new(),
        }
    }

    /// Index of the next instruction to be emitted.
    pub fn position(&self) -> u32 {
        self.insts.len() as u32
    }

    pub fn emit(&mut self, inst: Inst) {
        self.insts.push(inst);
    }

    pub fn new_label(&mut self) -> Label {
        let id = self.labels.len() as u32;
        self.labels.push(None);
        Label(id)
    }

    /// Bind `label` at the current position. A label binds at most once;
    /// the bind marker occupies its own slot in the stream.
    pub fn bind(&mut self, label: Label) {
        let slot = &mut self.labels[label.0 as usize];
        debug_assert!(slot.is_none(), "label {label} bound twice");
        *slot = Some(self.insts.len() as u32);
        self.insts.push(Inst::Bind { label });
    }

    pub fn is_bound(&self, label: Label) -> bool {
        self.labels
            .get(label.0 as usize)
            .is_some_and(|slot| slot.is_some())
    }

    pub fn label_position(&self, label: Label) -> Option<u32> {
        self.labels.get(label.0 as usize).copied().flatten()
    }

    /// Load a 32-bit float constant from the literal area.
    pub fn load_fp_lit32(&mut self, dst: Xmm, bits: u32) {
        if !self.lit32.contains(&bits) {
            self.lit32.push(bits);
        }
        self.insts.push(Inst::LoadFpLit {
            fsize: FpSize::F32,
            dst,
            bits: bits as u64,
        });
    }

    /// Load a 64-bit float constant from the literal area.
    pub fn load_fp_lit64(&mut self, dst: Xmm, bits: u64) {
        if !self.lit64.contains(&bits) {
            self.lit64.push(bits);
        }
        self.insts.push(Inst::LoadFpLit {
            fsize: FpSize::F64,
            dst,
            bits,
        });
    }

    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    fn first_unbound(&self) -> Option<Label> {
        self.labels
            .iter()
            .position(|slot| slot.is_none())
            .map(|id| Label(id as u32))
    }

    /// Seal the stream. Every allocated label must be bound; a dangling
    /// label means a synthesis routine forgot one of its join points.
    pub fn finish(self) -> Result<CodeStream, CodegenError> {
        if let Some(label) = self.first_unbound() {
            return Err(CodegenError::UnboundLabel(label));
        }
        Ok(CodeStream {
            insts: self.insts,
            literals32: self.lit32,
            literals64: self.lit64,
        })
    }
}

impl Default for Assembler {
    fn default() -> Assembler {
        Assembler::new()
    }
}

/// Sealed output of one synthesis run.
pub struct CodeStream {
    pub insts: Vec<Inst>,
    pub literals32: Vec<u32>,
    pub literals64: Vec<u64>,
}
