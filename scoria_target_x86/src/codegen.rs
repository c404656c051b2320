//! Call-site code generator: the shared machinery every synthesis routine
//! threads through.
//!
//! Owns the assembler, the queue of pending slow paths, and the safepoint
//! and fault records the runtime needs to walk synthesized frames.

use log::trace;

use scoria_ir::invoke::InvokeNode;

use crate::asm::{Assembler, CodeStream};
use crate::convention::METHOD_REG;
use crate::features::CpuFeatures;
use crate::inst::{Addr, Inst, OpSize, Scale, StoreKind};
use crate::reg::Gpr;
use crate::runtime::{CARD_SHIFT, METHOD_ENTRY_OFFSET, THREAD_CARD_TABLE_OFFSET};
use crate::slow_path::IntrinsicSlowPath;
use crate::CodegenError;

/// A recorded correspondence between an instruction offset and the bytecode
/// offset the runtime should attribute it to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramPoint {
    pub inst_offset: u32,
    pub bytecode_offset: u32,
}

/// Sealed output of one generator run.
pub struct CompiledCode {
    pub stream: CodeStream,
    /// Call return addresses, for stack walking.
    pub safepoints: Vec<ProgramPoint>,
    /// Faulting-instruction offsets doubling as null checks.
    pub null_checks: Vec<ProgramPoint>,
}

pub struct CodeGenerator<'a> {
    pub asm: Assembler,
    features: &'a CpuFeatures,
    slow_paths: Vec<IntrinsicSlowPath>,
    safepoints: Vec<ProgramPoint>,
    null_checks: Vec<ProgramPoint>,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(features: &'a CpuFeatures) -> CodeGenerator<'a> {
        CodeGenerator {
            asm: Assembler::new(),
            features,
            slow_paths: Vec::new(),
            safepoints: Vec::new(),
            null_checks: Vec::new(),
        }
    }

    pub fn features(&self) -> &CpuFeatures {
        self.features
    }

    /// Queue a slow path for emission after the main stream.
    pub fn add_slow_path(&mut self, path: IntrinsicSlowPath) {
        self.slow_paths.push(path);
    }

    /// Record a safepoint at the current position. Call immediately after
    /// emitting a call so the record carries the return-address offset.
    pub fn record_safepoint(&mut self, bytecode_offset: u32) {
        self.safepoints.push(ProgramPoint {
            inst_offset: self.asm.position(),
            bytecode_offset,
        });
    }

    /// Record that the instruction at `inst_offset` may fault in place of an
    /// explicit null check. Callers capture the position before emitting the
    /// faulting instruction.
    pub fn record_implicit_null_check(&mut self, inst_offset: u32, bytecode_offset: u32) {
        self.null_checks.push(ProgramPoint {
            inst_offset,
            bytecode_offset,
        });
    }

    pub fn safepoints(&self) -> &[ProgramPoint] {
        &self.safepoints
    }

    pub fn null_checks(&self) -> &[ProgramPoint] {
        &self.null_checks
    }

    /// Dirty the card covering `object`. The card-table base doubles as the
    /// dirty value; `temp` and `card` are clobbered.
    pub fn mark_gc_card(&mut self, temp: Gpr, card: Gpr, object: Gpr) {
        self.asm.emit(Inst::LoadGs {
            size: OpSize::S64,
            dst: card,
            offset: THREAD_CARD_TABLE_OFFSET,
        });
        self.asm.emit(Inst::MovRR {
            size: OpSize::S64,
            dst: temp,
            src: object,
        });
        self.asm.emit(Inst::ShrRI {
            size: OpSize::S64,
            dst: temp,
            imm: CARD_SHIFT,
        });
        self.asm.emit(Inst::Store {
            kind: StoreKind::B,
            addr: Addr::indexed(temp, card, Scale::X1, 0),
            src: card,
        });
    }

    /// Re-issue the call the intrinsic replaced, through the method object
    /// in [`METHOD_REG`]. Only static and direct dispatch can be re-issued
    /// without a receiver-class lookup.
    pub fn generate_direct_call(&mut self, node: &InvokeNode) -> Result<(), CodegenError> {
        if !node.has_direct_dispatch() {
            return Err(CodegenError::UnsupportedDispatch(node.dispatch));
        }
        self.asm.emit(Inst::LoadMethod {
            dst: METHOD_REG,
            method: node.method,
        });
        self.asm.emit(Inst::CallM {
            addr: Addr::base_disp(METHOD_REG, METHOD_ENTRY_OFFSET),
        });
        Ok(())
    }

    /// Emit every queued slow path. A slow path may queue further paths;
    /// emission loops until the queue drains.
    pub fn emit_slow_paths(&mut self) -> Result<(), CodegenError> {
        while !self.slow_paths.is_empty() {
            let pending = std::mem::take(&mut self.slow_paths);
            trace!("emitting {} slow path(s)", pending.len());
            for path in &pending {
                path.emit(self)?;
            }
        }
        Ok(())
    }

    /// Emit pending slow paths, seal the stream, and hand back the code
    /// with its runtime records.
    pub fn finish(mut self) -> Result<CompiledCode, CodegenError> {
        self.emit_slow_paths()?;
        let stream = self.asm.finish()?;
        Ok(CompiledCode {
            stream,
            safepoints: self.safepoints,
            null_checks: self.null_checks,
        })
    }
}
