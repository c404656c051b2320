//! Out-of-line slow paths that re-issue the call an intrinsic replaced.

use log::trace;

use scoria_ir::invoke::InvokeNode;
use scoria_ir::types::ValueKind;
use scoria_target::{ConcreteLocations, LiveRegisters, Location};

use crate::asm::Assembler;
use crate::codegen::CodeGenerator;
use crate::convention::ArgumentAssigner;
use crate::inst::{Addr, FpSize, Inst, Label, OpSize};
use crate::moves::MoveResolver;
use crate::reg::{Gpr, Xmm};
use crate::CodegenError;

/// An out-of-line continuation for an intrinsic whose fast path keeps the
/// original call in reserve. The fast path jumps to `entry` when its guard
/// fails and resumes at `exit`.
pub struct IntrinsicSlowPath {
    entry: Label,
    exit: Label,
    node: InvokeNode,
    locations: ConcreteLocations,
}

impl IntrinsicSlowPath {
    pub fn new(
        asm: &mut Assembler,
        node: InvokeNode,
        locations: ConcreteLocations,
    ) -> IntrinsicSlowPath {
        IntrinsicSlowPath {
            entry: asm.new_label(),
            exit: asm.new_label(),
            node,
            locations,
        }
    }

    pub fn entry(&self) -> Label {
        self.entry
    }

    pub fn exit(&self) -> Label {
        self.exit
    }

    /// Emit the continuation: save whatever lives across the call, re-issue
    /// the original call, land the result, restore, and jump back.
    pub fn emit(&self, cg: &mut CodeGenerator) -> Result<(), CodegenError> {
        trace!(
            "slow path for {:?} at bytecode {}",
            self.node.intrinsic,
            self.node.bytecode_offset
        );
        let live = &self.locations.live;
        // The output register must survive the restore that follows the
        // return move.
        debug_assert!(self
            .locations
            .out()
            .as_reg()
            .map_or(true, |r| !live.gpr.contains(&r)));

        cg.asm.bind(self.entry);
        save_live_registers(cg, live);
        emit_call_and_return_move(cg, &self.node, &self.locations)?;
        restore_live_registers(cg, live);
        cg.asm.emit(Inst::Jmp { target: self.exit });
        Ok(())
    }
}

/// Marshal arguments, re-issue the replaced call, record the safepoint, and
/// move the result where the allocator expects it. Shared between slow paths
/// and intrinsics whose locations already carry full-call shape.
pub(crate) fn emit_call_and_return_move(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    marshal_arguments(&mut cg.asm, node, locations)?;
    cg.generate_direct_call(node)?;
    cg.record_safepoint(node.bytecode_offset);
    move_from_return_register(&mut cg.asm, locations.out(), node.return_kind)
}

/// Move every argument from its allocated location to its managed-convention
/// position, as one parallel move.
fn marshal_arguments(
    asm: &mut Assembler,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    let mut assigner = ArgumentAssigner::new();
    let mut resolver = MoveResolver::new();
    for (index, &kind) in node.input_kinds.iter().enumerate() {
        let src = locations.in_at(index);
        if src.is_none() {
            return Err(CodegenError::MissingArgumentLocation { index });
        }
        resolver.add(src, assigner.next(kind), kind);
    }
    resolver.resolve(asm)
}

/// Copy the convention's return register into the allocated output.
fn move_from_return_register(
    asm: &mut Assembler,
    out: Location,
    kind: ValueKind,
) -> Result<(), CodegenError> {
    if kind == ValueKind::Void || out.is_none() {
        return Ok(());
    }
    match out {
        Location::FpuReg(r) => {
            let dst = Xmm::from_fp_reg(r);
            if dst != Xmm::Xmm0 {
                asm.emit(Inst::MovFpRR {
                    fsize: if kind == ValueKind::Double {
                        FpSize::F64
                    } else {
                        FpSize::F32
                    },
                    dst,
                    src: Xmm::Xmm0,
                });
            }
            Ok(())
        }
        Location::Reg(r) => {
            let dst = Gpr::from_preg(r);
            if dst != Gpr::Rax {
                asm.emit(Inst::MovRR {
                    size: if kind.is_wide() {
                        OpSize::S64
                    } else {
                        OpSize::S32
                    },
                    dst,
                    src: Gpr::Rax,
                });
            }
            Ok(())
        }
        other => Err(CodegenError::ExpectedRegister(other)),
    }
}

fn save_live_registers(cg: &mut CodeGenerator, live: &LiveRegisters) {
    for &r in &live.gpr {
        cg.asm.emit(Inst::Push {
            reg: Gpr::from_preg(r),
        });
    }
    if !live.fpu.is_empty() {
        cg.asm.emit(Inst::SubRI {
            size: OpSize::S64,
            dst: Gpr::Rsp,
            imm: 8 * live.fpu.len() as i32,
        });
        for (slot, &r) in live.fpu.iter().enumerate() {
            cg.asm.emit(Inst::StoreFp {
                fsize: FpSize::F64,
                addr: Addr::base_disp(Gpr::Rsp, 8 * slot as i32),
                src: Xmm::from_fp_reg(r),
            });
        }
    }
}

fn restore_live_registers(cg: &mut CodeGenerator, live: &LiveRegisters) {
    if !live.fpu.is_empty() {
        for (slot, &r) in live.fpu.iter().enumerate() {
            cg.asm.emit(Inst::LoadFp {
                fsize: FpSize::F64,
                dst: Xmm::from_fp_reg(r),
                addr: Addr::base_disp(Gpr::Rsp, 8 * slot as i32),
            });
        }
        cg.asm.emit(Inst::AddRI {
            size: OpSize::S64,
            dst: Gpr::Rsp,
            imm: 8 * live.fpu.len() as i32,
        });
    }
    for &r in live.gpr.iter().rev() {
        cg.asm.emit(Inst::Pop {
            reg: Gpr::from_preg(r),
        });
    }
}
