//! Managed and runtime calling conventions.

use scoria_ir::types::ValueKind;
use scoria_target::Location;

use crate::reg::{Gpr, Xmm};

/// Argument GPRs of the managed convention, in order. The callee method
/// object itself rides in [`METHOD_REG`].
pub const MANAGED_ARG_GPRS: [Gpr; 5] = [Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];

/// Argument XMMs of the managed convention, in order.
pub const MANAGED_ARG_XMMS: [Xmm; 8] = [
    Xmm::Xmm0,
    Xmm::Xmm1,
    Xmm::Xmm2,
    Xmm::Xmm3,
    Xmm::Xmm4,
    Xmm::Xmm5,
    Xmm::Xmm6,
    Xmm::Xmm7,
];

/// Register holding the callee method object at a managed call.
pub const METHOD_REG: Gpr = Gpr::Rdi;

/// Argument GPRs of the runtime-helper convention.
pub const RUNTIME_ARG_GPRS: [Gpr; 3] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx];

/// Argument XMMs of the runtime-helper convention.
pub const RUNTIME_ARG_XMMS: [Xmm; 2] = [Xmm::Xmm0, Xmm::Xmm1];

/// Move-resolver scratch GPR. Not an argument register in either
/// convention, so cycle breaking cannot clobber a marshalled value.
pub const SCRATCH_GPR: Gpr = Gpr::R11;

/// Move-resolver scratch XMM.
pub const SCRATCH_XMM: Xmm = Xmm::Xmm15;

/// Hands out managed-convention argument positions left to right.
///
/// GPR and XMM arguments draw from independent counters. Arguments past
/// the register file land in the outgoing stack area, narrow values in
/// 4-byte slots and wide values in 8-byte slots.
pub struct ArgumentAssigner {
    gpr_index: usize,
    fpr_index: usize,
    stack_offset: i32,
}

impl ArgumentAssigner {
    pub fn new() -> ArgumentAssigner {
        ArgumentAssigner {
            gpr_index: 0,
            fpr_index: 0,
            stack_offset: 0,
        }
    }

    pub fn next(&mut self, kind: ValueKind) -> Location {
        if kind.is_fp() {
            if self.fpr_index < MANAGED_ARG_XMMS.len() {
                let reg = MANAGED_ARG_XMMS[self.fpr_index];
                self.fpr_index += 1;
                return Location::FpuReg(reg.to_fp_reg());
            }
        } else if self.gpr_index < MANAGED_ARG_GPRS.len() {
            let reg = MANAGED_ARG_GPRS[self.gpr_index];
            self.gpr_index += 1;
            return Location::Reg(reg.to_preg());
        }
        let offset = self.stack_offset;
        if kind.is_wide() {
            self.stack_offset += 8;
            Location::DoubleStack(offset)
        } else {
            self.stack_offset += 4;
            Location::Stack(offset)
        }
    }
}

impl Default for ArgumentAssigner {
    fn default() -> ArgumentAssigner {
        ArgumentAssigner::new()
    }
}

/// Where the managed convention returns a value of `kind`.
pub fn return_location(kind: ValueKind) -> Location {
    match kind {
        ValueKind::Void => Location::None,
        k if k.is_fp() => Location::FpuReg(Xmm::Xmm0.to_fp_reg()),
        _ => Location::Reg(Gpr::Rax.to_preg()),
    }
}
