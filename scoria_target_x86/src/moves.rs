//! Parallel-move resolution for argument marshalling.
//!
//! Marshalling a call treats all argument moves as simultaneous: a move must
//! not overwrite a location another pending move still reads. Dependencies
//! serialize through a depth-first walk; cycles break through one scratch
//! register per register class.

use scoria_ir::types::ValueKind;
use scoria_target::Location;

use crate::asm::Assembler;
use crate::convention::{SCRATCH_GPR, SCRATCH_XMM};
use crate::inst::{Addr, FpSize, Inst, LoadKind, OpSize, StoreKind};
use crate::reg::{Gpr, Xmm};
use crate::CodegenError;

/// One queued move of a `kind`-typed value.
#[derive(Debug, Clone, Copy)]
struct PendingMove {
    src: Location,
    dst: Location,
    kind: ValueKind,
}

#[derive(Clone, Copy, PartialEq)]
enum MoveState {
    ToDo,
    InProgress,
    Done,
}

/// Orders a set of simultaneous moves into a safe sequential emission.
pub struct MoveResolver {
    moves: Vec<PendingMove>,
}

impl MoveResolver {
    pub fn new() -> MoveResolver {
        MoveResolver { moves: Vec::new() }
    }

    /// Queue a move. Moves where source and destination already agree are
    /// dropped here so they never constrain the ordering.
    pub fn add(&mut self, src: Location, dst: Location, kind: ValueKind) {
        debug_assert!(!src.is_none() && !dst.is_none());
        if src != dst {
            self.moves.push(PendingMove { src, dst, kind });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Emit every queued move in dependency order.
    pub fn resolve(mut self, asm: &mut Assembler) -> Result<(), CodegenError> {
        let mut state = vec![MoveState::ToDo; self.moves.len()];
        for index in 0..self.moves.len() {
            if state[index] == MoveState::ToDo {
                self.perform_move(index, &mut state, asm)?;
            }
        }
        Ok(())
    }

    fn perform_move(
        &mut self,
        index: usize,
        state: &mut [MoveState],
        asm: &mut Assembler,
    ) -> Result<(), CodegenError> {
        state[index] = MoveState::InProgress;
        let dst = self.moves[index].dst;

        // Every pending move still reading `dst` must land first. Finding an
        // in-progress reader means a cycle through the current DFS chain;
        // parking its source in scratch unblocks the chain.
        for reader in 0..self.moves.len() {
            if reader == index || self.moves[reader].src != dst {
                continue;
            }
            match state[reader] {
                MoveState::ToDo => self.perform_move(reader, state, asm)?,
                MoveState::InProgress => {
                    let kind = self.moves[reader].kind;
                    let scratch = scratch_for(kind);
                    emit_move(asm, self.moves[reader].src, scratch, kind)?;
                    self.moves[reader].src = scratch;
                }
                MoveState::Done => {}
            }
        }

        let mv = self.moves[index];
        emit_move(asm, mv.src, mv.dst, mv.kind)?;
        state[index] = MoveState::Done;
        Ok(())
    }
}

impl Default for MoveResolver {
    fn default() -> MoveResolver {
        MoveResolver::new()
    }
}

fn scratch_for(kind: ValueKind) -> Location {
    if kind.is_fp() {
        Location::FpuReg(SCRATCH_XMM.to_fp_reg())
    } else {
        Location::Reg(SCRATCH_GPR.to_preg())
    }
}

fn gp_size(kind: ValueKind) -> OpSize {
    if kind.is_wide() {
        OpSize::S64
    } else {
        OpSize::S32
    }
}

fn fp_size(kind: ValueKind) -> FpSize {
    match kind {
        ValueKind::Double => FpSize::F64,
        _ => FpSize::F32,
    }
}

// Stack slots address from RSP; narrow values occupy 4-byte slots.
fn slot_addr(offset: i32) -> Addr {
    Addr::base_disp(Gpr::Rsp, offset)
}

/// Emit one move between allocated locations.
pub fn emit_move(
    asm: &mut Assembler,
    src: Location,
    dst: Location,
    kind: ValueKind,
) -> Result<(), CodegenError> {
    if src == dst {
        return Ok(());
    }
    match (src, dst) {
        (Location::Reg(s), Location::Reg(d)) => {
            asm.emit(Inst::MovRR {
                size: gp_size(kind),
                dst: Gpr::from_preg(d),
                src: Gpr::from_preg(s),
            });
        }
        (Location::FpuReg(s), Location::FpuReg(d)) => {
            asm.emit(Inst::MovFpRR {
                fsize: fp_size(kind),
                dst: Xmm::from_fp_reg(d),
                src: Xmm::from_fp_reg(s),
            });
        }
        (Location::Stack(off) | Location::DoubleStack(off), Location::Reg(d)) => {
            let load = if kind.is_wide() {
                LoadKind::Q
            } else {
                LoadKind::L
            };
            asm.emit(Inst::Load {
                kind: load,
                dst: Gpr::from_preg(d),
                addr: slot_addr(off),
            });
        }
        (Location::Reg(s), Location::Stack(off) | Location::DoubleStack(off)) => {
            let store = if kind.is_wide() {
                StoreKind::Q
            } else {
                StoreKind::L
            };
            asm.emit(Inst::Store {
                kind: store,
                addr: slot_addr(off),
                src: Gpr::from_preg(s),
            });
        }
        (Location::Stack(off) | Location::DoubleStack(off), Location::FpuReg(d)) => {
            asm.emit(Inst::LoadFp {
                fsize: fp_size(kind),
                dst: Xmm::from_fp_reg(d),
                addr: slot_addr(off),
            });
        }
        (Location::FpuReg(s), Location::Stack(off) | Location::DoubleStack(off)) => {
            asm.emit(Inst::StoreFp {
                fsize: fp_size(kind),
                addr: slot_addr(off),
                src: Xmm::from_fp_reg(s),
            });
        }
        (
            Location::Stack(from) | Location::DoubleStack(from),
            Location::Stack(to) | Location::DoubleStack(to),
        ) => {
            // Bit-pattern copy through the GP scratch, any kind.
            let (load, store) = if kind.is_wide() {
                (LoadKind::Q, StoreKind::Q)
            } else {
                (LoadKind::L, StoreKind::L)
            };
            asm.emit(Inst::Load {
                kind: load,
                dst: SCRATCH_GPR,
                addr: slot_addr(from),
            });
            asm.emit(Inst::Store {
                kind: store,
                addr: slot_addr(to),
                src: SCRATCH_GPR,
            });
        }
        _ => return Err(CodegenError::UnsupportedMove { src, dst }),
    }
    Ok(())
}
