//! Intrinsic recognition, location building, and code synthesis.
//!
//! One table row per catalog id pairs the two halves of an intrinsic: a
//! locations builder consulted before register allocation and an emitter run
//! after it. The two halves of a row agree on operand shape; [`emit_code`]
//! re-validates the allocator's bindings against the declared constraints
//! before the emitter trusts them.

use log::debug;

use scoria_ir::intrinsics::IntrinsicId;
use scoria_ir::invoke::InvokeNode;
use scoria_ir::types::ValueKind;
use scoria_target::{CallMode, ConcreteLocations, Constraint, Location, LocationRequirements};

use crate::codegen::CodeGenerator;
use crate::convention::{METHOD_REG, RUNTIME_ARG_GPRS, RUNTIME_ARG_XMMS};
use crate::features::CpuFeatures;
use crate::inst::{Addr, CondCode, FpSize, Inst, LoadKind, OpSize, RoundMode, Scale, StoreKind};
use crate::reg::{Gpr, Xmm};
use crate::runtime::{
    Entrypoint, CHAR_ARRAY_DATA_OFFSET, STRING_COUNT_OFFSET, STRING_OFFSET_OFFSET,
    STRING_VALUE_OFFSET, THREAD_SELF_OFFSET,
};
use crate::slow_path::{emit_call_and_return_move, IntrinsicSlowPath};
use crate::CodegenError;

/// Locations half of a table row.
type BuildFn = fn(&InvokeNode, &CpuFeatures) -> LocationRequirements;

/// Synthesis half of a table row.
type EmitFn = fn(&mut CodeGenerator, &InvokeNode, &ConcreteLocations) -> Result<(), CodegenError>;

struct Rule {
    build: BuildFn,
    emit: EmitFn,
}

/// Declare operand constraints for an intrinsic call site.
///
/// Returns the requirements the register allocator must satisfy. `None`
/// means the node stays on the generic call path: it is untagged, or its id
/// has no synthesis rule on this target. Not intrinsifying is a valid steady
/// state, never an error.
pub fn try_intrinsify(
    node: &InvokeNode,
    features: &CpuFeatures,
) -> Option<LocationRequirements> {
    let id = node.intrinsic?;
    let rule = rule(id)?;
    let reqs = (rule.build)(node, features);
    debug!(
        "intrinsic {:?} at bytecode {}: {:?}, {} input(s), {} temp(s)",
        id,
        node.bytecode_offset,
        reqs.call_mode(),
        reqs.inputs().len(),
        reqs.temps().len()
    );
    Some(reqs)
}

/// Synthesize code for an allocated intrinsic call site.
///
/// `reqs` must be the value [`try_intrinsify`] produced for this node and
/// `locations` the allocator's answer to it.
pub fn emit_code(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    reqs: &LocationRequirements,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    let id = node.intrinsic.ok_or(CodegenError::NotAnIntrinsic)?;
    let rule = rule(id).ok_or(CodegenError::NoSynthesisRule(id))?;
    if !locations.satisfies(reqs) {
        return Err(CodegenError::LocationMismatch);
    }
    (rule.emit)(cg, node, locations)
}

/// The synthesis table. Ids with no row are re-issued as plain calls.
fn rule(id: IntrinsicId) -> Option<Rule> {
    use IntrinsicId::*;
    let rule = match id {
        // Bit reinterpretation.
        FloatToRawIntBits => Rule {
            build: build_fp_to_gp,
            emit: emit_float_to_raw_int_bits,
        },
        DoubleToRawLongBits => Rule {
            build: build_fp_to_gp,
            emit: emit_double_to_raw_long_bits,
        },
        IntBitsToFloat => Rule {
            build: build_gp_to_fp,
            emit: emit_int_bits_to_float,
        },
        LongBitsToDouble => Rule {
            build: build_gp_to_fp,
            emit: emit_long_bits_to_double,
        },

        // Byte and bit reversal.
        ShortReverseBytes => Rule {
            build: build_in_place,
            emit: emit_short_reverse_bytes,
        },
        IntReverseBytes => Rule {
            build: build_in_place,
            emit: emit_int_reverse_bytes,
        },
        LongReverseBytes => Rule {
            build: build_in_place,
            emit: emit_long_reverse_bytes,
        },
        IntReverseBits => Rule {
            build: build_in_place_one_temp,
            emit: emit_int_reverse_bits,
        },
        LongReverseBits => Rule {
            build: build_in_place_two_temps,
            emit: emit_long_reverse_bits,
        },

        // Absolute value.
        IntAbs => Rule {
            build: build_in_place_one_temp,
            emit: emit_int_abs,
        },
        LongAbs => Rule {
            build: build_in_place_one_temp,
            emit: emit_long_abs,
        },
        FloatAbs => Rule {
            build: build_fp_abs,
            emit: emit_float_abs,
        },
        DoubleAbs => Rule {
            build: build_fp_abs,
            emit: emit_double_abs,
        },

        // Min/max.
        IntMin => Rule {
            build: build_int_pair_in_place,
            emit: emit_int_min,
        },
        IntMax => Rule {
            build: build_int_pair_in_place,
            emit: emit_int_max,
        },
        LongMin => Rule {
            build: build_int_pair_in_place,
            emit: emit_long_min,
        },
        LongMax => Rule {
            build: build_int_pair_in_place,
            emit: emit_long_max,
        },
        FloatMin => Rule {
            build: build_fp_pair_in_place,
            emit: emit_float_min,
        },
        FloatMax => Rule {
            build: build_fp_pair_in_place,
            emit: emit_float_max,
        },
        DoubleMin => Rule {
            build: build_fp_pair_in_place,
            emit: emit_double_min,
        },
        DoubleMax => Rule {
            build: build_fp_pair_in_place,
            emit: emit_double_max,
        },

        // Rounding and square root.
        DoubleSqrt => Rule {
            build: build_fp_to_fp,
            emit: emit_double_sqrt,
        },
        DoubleCeil => Rule {
            build: build_sse41_fp_to_fp,
            emit: emit_double_ceil,
        },
        DoubleFloor => Rule {
            build: build_sse41_fp_to_fp,
            emit: emit_double_floor,
        },
        DoubleRint => Rule {
            build: build_sse41_fp_to_fp,
            emit: emit_double_rint,
        },
        FloatRound => Rule {
            build: build_sse41_fp_to_int,
            emit: emit_float_round,
        },
        DoubleRound => Rule {
            build: build_sse41_fp_to_int,
            emit: emit_double_round,
        },

        // Strings.
        StringCharAt => Rule {
            build: build_string_char_at,
            emit: emit_string_char_at,
        },
        StringCompare => Rule {
            build: build_string_compare,
            emit: emit_string_compare,
        },

        // Raw memory peek/poke.
        PeekByte => Rule {
            build: build_in_place,
            emit: emit_peek_byte,
        },
        PeekShort => Rule {
            build: build_in_place,
            emit: emit_peek_short,
        },
        PeekInt => Rule {
            build: build_in_place,
            emit: emit_peek_int,
        },
        PeekLong => Rule {
            build: build_in_place,
            emit: emit_peek_long,
        },
        PokeByte => Rule {
            build: build_address_value,
            emit: emit_poke_byte,
        },
        PokeShort => Rule {
            build: build_address_value,
            emit: emit_poke_short,
        },
        PokeInt => Rule {
            build: build_address_value,
            emit: emit_poke_int,
        },
        PokeLong => Rule {
            build: build_address_value,
            emit: emit_poke_long,
        },

        // Thread state.
        ThreadCurrent => Rule {
            build: build_thread_current,
            emit: emit_thread_current,
        },

        // Field accessors. Loads are acquire and plain stores release on
        // x86-64, so volatile loads and ordered stores need no extra code.
        RawGetInt | RawGetIntVolatile | RawGetRef | RawGetRefVolatile => Rule {
            build: build_raw_get,
            emit: emit_raw_get_narrow,
        },
        RawGetLong | RawGetLongVolatile => Rule {
            build: build_raw_get,
            emit: emit_raw_get_wide,
        },
        RawPutInt | RawPutIntOrdered => Rule {
            build: build_raw_put,
            emit: emit_raw_put_int,
        },
        RawPutIntVolatile => Rule {
            build: build_raw_put,
            emit: emit_raw_put_int_volatile,
        },
        RawPutLong | RawPutLongOrdered => Rule {
            build: build_raw_put,
            emit: emit_raw_put_long,
        },
        RawPutLongVolatile => Rule {
            build: build_raw_put,
            emit: emit_raw_put_long_volatile,
        },
        RawPutRef | RawPutRefOrdered => Rule {
            build: build_raw_put,
            emit: emit_raw_put_ref,
        },
        RawPutRefVolatile => Rule {
            build: build_raw_put,
            emit: emit_raw_put_ref_volatile,
        },

        // Compare-and-set.
        CasInt => Rule {
            build: build_cas,
            emit: emit_cas_int,
        },
        CasLong => Rule {
            build: build_cas,
            emit: emit_cas_long,
        },
        CasRef => Rule {
            build: build_cas,
            emit: emit_cas_ref,
        },

        // Recognized but re-issued as plain calls: no fast path pays for
        // itself on this target yet.
        StringIndexOf | StringIndexOfAfter | CharArrayCopy | SoftRefGet => return None,
    };
    Some(rule)
}

// ---------------------------------------------------------------------------
// Location builders
// ---------------------------------------------------------------------------

fn build_fp_to_gp(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::FpuReg);
    reqs.set_out(Constraint::Reg);
    reqs
}

fn build_gp_to_fp(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::Reg);
    reqs.set_out(Constraint::FpuReg);
    reqs
}

fn build_in_place(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::Reg);
    reqs.set_out(Constraint::SameAsFirstInput);
    reqs
}

fn build_in_place_one_temp(node: &InvokeNode, features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = build_in_place(node, features);
    reqs.add_temp(Constraint::Reg);
    reqs
}

fn build_in_place_two_temps(node: &InvokeNode, features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = build_in_place_one_temp(node, features);
    reqs.add_temp(Constraint::Reg);
    reqs
}

fn build_fp_abs(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::FpuReg);
    reqs.set_out(Constraint::SameAsFirstInput);
    // FP register to hold the sign mask.
    reqs.add_temp(Constraint::FpuReg);
    reqs
}

fn build_int_pair_in_place(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::Reg);
    reqs.set_in(1, Constraint::Reg);
    reqs.set_out(Constraint::SameAsFirstInput);
    reqs
}

fn build_fp_pair_in_place(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::FpuReg);
    reqs.set_in(1, Constraint::FpuReg);
    reqs.set_out(Constraint::SameAsFirstInput);
    reqs
}

fn build_fp_to_fp(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::FpuReg);
    reqs.set_out(Constraint::FpuReg);
    reqs
}

/// Rounding to a double: register-resident with SSE4.1, otherwise a full
/// call shaped on the runtime convention.
fn build_sse41_fp_to_fp(node: &InvokeNode, features: &CpuFeatures) -> LocationRequirements {
    if features.sse4_1 {
        return build_fp_to_fp(node, features);
    }
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::FullCall);
    reqs.set_in(0, Constraint::FixedFpu(RUNTIME_ARG_XMMS[0].to_fp_reg()));
    reqs.set_out(Constraint::FixedFpu(Xmm::Xmm0.to_fp_reg()));
    // The re-issued call loads the method handle into the call register.
    reqs.add_temp(Constraint::Fixed(METHOD_REG.to_preg()));
    reqs
}

/// Rounding to an integer: needs two FP temps with SSE4.1, otherwise a full
/// call.
fn build_sse41_fp_to_int(node: &InvokeNode, features: &CpuFeatures) -> LocationRequirements {
    if features.sse4_1 {
        let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
        reqs.set_in(0, Constraint::FpuReg);
        reqs.set_out(Constraint::Reg);
        reqs.add_temp(Constraint::FpuReg);
        reqs.add_temp(Constraint::FpuReg);
        return reqs;
    }
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::FullCall);
    reqs.set_in(0, Constraint::FixedFpu(RUNTIME_ARG_XMMS[0].to_fp_reg()));
    reqs.set_out(Constraint::Fixed(Gpr::Rax.to_preg()));
    reqs.add_temp(Constraint::Fixed(METHOD_REG.to_preg()));
    reqs
}

fn build_string_char_at(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::CallOnSlowPath);
    reqs.set_in(0, Constraint::Reg);
    reqs.set_in(1, Constraint::Reg);
    reqs.set_out(Constraint::SameAsFirstInput);
    reqs.add_temp(Constraint::Reg);
    reqs
}

fn build_string_compare(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::CallOnSlowPath);
    reqs.set_in(0, Constraint::Fixed(RUNTIME_ARG_GPRS[0].to_preg()));
    reqs.set_in(1, Constraint::Fixed(RUNTIME_ARG_GPRS[1].to_preg()));
    reqs.set_out(Constraint::Fixed(Gpr::Rax.to_preg()));
    reqs
}

fn build_address_value(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::Reg);
    reqs.set_in(1, Constraint::Reg);
    reqs
}

fn build_thread_current(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_out(Constraint::Reg);
    reqs
}

fn build_raw_get(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    debug_assert_eq!(node.arity(), 3);
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    // Receiver folds away: the address is base + offset.
    reqs.set_in(0, Constraint::Unused);
    reqs.set_in(1, Constraint::Reg);
    reqs.set_in(2, Constraint::Reg);
    reqs.set_out(Constraint::Reg);
    reqs
}

fn build_raw_put(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    debug_assert_eq!(node.arity(), 4);
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::Unused);
    reqs.set_in(1, Constraint::Reg);
    reqs.set_in(2, Constraint::Reg);
    reqs.set_in(3, Constraint::Reg);
    if node.input_kinds[3] == ValueKind::Ref {
        // Card marking.
        reqs.add_temp(Constraint::Reg);
        reqs.add_temp(Constraint::Reg);
    }
    reqs
}

fn build_cas(node: &InvokeNode, _features: &CpuFeatures) -> LocationRequirements {
    debug_assert_eq!(node.arity(), 5);
    let mut reqs = LocationRequirements::new(node.arity(), CallMode::NoCall);
    reqs.set_in(0, Constraint::Unused);
    reqs.set_in(1, Constraint::Reg);
    reqs.set_in(2, Constraint::Reg);
    // cmpxchg reads the expected value in rax.
    reqs.set_in(3, Constraint::Fixed(Gpr::Rax.to_preg()));
    reqs.set_in(4, Constraint::Reg);
    reqs.set_out(Constraint::Reg);
    if node.input_kinds[4] == ValueKind::Ref {
        // Card marking.
        reqs.add_temp(Constraint::Reg);
        reqs.add_temp(Constraint::Reg);
    }
    reqs
}

// ---------------------------------------------------------------------------
// Operand helpers
// ---------------------------------------------------------------------------

fn gpr(loc: Location) -> Result<Gpr, CodegenError> {
    loc.as_reg()
        .map(Gpr::from_preg)
        .ok_or(CodegenError::ExpectedRegister(loc))
}

fn xmm(loc: Location) -> Result<Xmm, CodegenError> {
    loc.as_fpu_reg()
        .map(Xmm::from_fp_reg)
        .ok_or(CodegenError::ExpectedRegister(loc))
}

// ---------------------------------------------------------------------------
// Bit reinterpretation
// ---------------------------------------------------------------------------

fn gen_move_fp_to_gp(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    wide: bool,
) -> Result<(), CodegenError> {
    cg.asm.emit(Inst::MovdGX {
        dst: gpr(locations.out())?,
        src: xmm(locations.in_at(0))?,
        wide,
    });
    Ok(())
}

fn gen_move_gp_to_fp(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    wide: bool,
) -> Result<(), CodegenError> {
    cg.asm.emit(Inst::MovdXG {
        dst: xmm(locations.out())?,
        src: gpr(locations.in_at(0))?,
        wide,
    });
    Ok(())
}

fn emit_float_to_raw_int_bits(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_move_fp_to_gp(cg, locations, false)
}

fn emit_double_to_raw_long_bits(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_move_fp_to_gp(cg, locations, true)
}

fn emit_int_bits_to_float(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_move_gp_to_fp(cg, locations, false)
}

fn emit_long_bits_to_double(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_move_gp_to_fp(cg, locations, true)
}

// ---------------------------------------------------------------------------
// Byte and bit reversal
// ---------------------------------------------------------------------------

fn emit_short_reverse_bytes(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    let out = gpr(locations.out())?;
    cg.asm.emit(Inst::Bswap {
        size: OpSize::S32,
        reg: out,
    });
    // Drop the reversed garbage in the low half, sign-extending the result.
    cg.asm.emit(Inst::SarRI {
        size: OpSize::S32,
        dst: out,
        imm: 16,
    });
    Ok(())
}

fn emit_int_reverse_bytes(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    cg.asm.emit(Inst::Bswap {
        size: OpSize::S32,
        reg: gpr(locations.out())?,
    });
    Ok(())
}

fn emit_long_reverse_bytes(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    cg.asm.emit(Inst::Bswap {
        size: OpSize::S64,
        reg: gpr(locations.out())?,
    });
    Ok(())
}

fn swap_bits32(cg: &mut CodeGenerator, reg: Gpr, temp: Gpr, shift: u8, mask: i32) {
    cg.asm.emit(Inst::MovRR {
        size: OpSize::S32,
        dst: temp,
        src: reg,
    });
    cg.asm.emit(Inst::ShrRI {
        size: OpSize::S32,
        dst: reg,
        imm: shift,
    });
    cg.asm.emit(Inst::AndRI {
        size: OpSize::S32,
        dst: temp,
        imm: mask,
    });
    cg.asm.emit(Inst::AndRI {
        size: OpSize::S32,
        dst: reg,
        imm: mask,
    });
    cg.asm.emit(Inst::ShlRI {
        size: OpSize::S32,
        dst: temp,
        imm: shift,
    });
    cg.asm.emit(Inst::OrRR {
        size: OpSize::S32,
        dst: reg,
        src: temp,
    });
}

// 64-bit masks exceed the immediate width, so each round materializes its
// mask in a second temp.
fn swap_bits64(cg: &mut CodeGenerator, reg: Gpr, temp: Gpr, temp_mask: Gpr, shift: u8, mask: i64) {
    cg.asm.emit(Inst::MovRI64 {
        dst: temp_mask,
        imm: mask,
    });
    cg.asm.emit(Inst::MovRR {
        size: OpSize::S64,
        dst: temp,
        src: reg,
    });
    cg.asm.emit(Inst::ShrRI {
        size: OpSize::S64,
        dst: reg,
        imm: shift,
    });
    cg.asm.emit(Inst::AndRR {
        size: OpSize::S64,
        dst: temp,
        src: temp_mask,
    });
    cg.asm.emit(Inst::AndRR {
        size: OpSize::S64,
        dst: reg,
        src: temp_mask,
    });
    cg.asm.emit(Inst::ShlRI {
        size: OpSize::S64,
        dst: temp,
        imm: shift,
    });
    cg.asm.emit(Inst::OrRR {
        size: OpSize::S64,
        dst: reg,
        src: temp,
    });
}

// Reverse byte order with one bswap, then swap bits inside bytes in three
// rounds of halving stride:
//   x = (x & 0x55555555) << 1 | (x >> 1) & 0x55555555
//   x = (x & 0x33333333) << 2 | (x >> 2) & 0x33333333
//   x = (x & 0x0F0F0F0F) << 4 | (x >> 4) & 0x0F0F0F0F
fn emit_int_reverse_bits(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    let reg = gpr(locations.out())?;
    let temp = gpr(locations.temp(0))?;
    cg.asm.emit(Inst::Bswap {
        size: OpSize::S32,
        reg,
    });
    swap_bits32(cg, reg, temp, 1, 0x5555_5555);
    swap_bits32(cg, reg, temp, 2, 0x3333_3333);
    swap_bits32(cg, reg, temp, 4, 0x0F0F_0F0F);
    Ok(())
}

fn emit_long_reverse_bits(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    let reg = gpr(locations.out())?;
    let temp = gpr(locations.temp(0))?;
    let temp_mask = gpr(locations.temp(1))?;
    cg.asm.emit(Inst::Bswap {
        size: OpSize::S64,
        reg,
    });
    swap_bits64(cg, reg, temp, temp_mask, 1, 0x5555_5555_5555_5555);
    swap_bits64(cg, reg, temp, temp_mask, 2, 0x3333_3333_3333_3333);
    swap_bits64(cg, reg, temp, temp_mask, 4, 0x0F0F_0F0F_0F0F_0F0F);
    Ok(())
}

// ---------------------------------------------------------------------------
// Absolute value
// ---------------------------------------------------------------------------

// abs(x) = (x + (x >> width-1)) ^ (x >> width-1), branch-free.
fn gen_abs_integer(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    size: OpSize,
) -> Result<(), CodegenError> {
    let out = gpr(locations.out())?;
    let mask = gpr(locations.temp(0))?;
    let sign_shift = match size {
        OpSize::S32 => 31,
        OpSize::S64 => 63,
    };
    cg.asm.emit(Inst::MovRR {
        size,
        dst: mask,
        src: out,
    });
    cg.asm.emit(Inst::SarRI {
        size,
        dst: mask,
        imm: sign_shift,
    });
    cg.asm.emit(Inst::AddRR {
        size,
        dst: out,
        src: mask,
    });
    cg.asm.emit(Inst::XorRR {
        size,
        dst: out,
        src: mask,
    });
    Ok(())
}

fn emit_int_abs(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_abs_integer(cg, locations, OpSize::S32)
}

fn emit_long_abs(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_abs_integer(cg, locations, OpSize::S64)
}

fn gen_abs_fp(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    fsize: FpSize,
) -> Result<(), CodegenError> {
    let out = xmm(locations.out())?;
    let mask = xmm(locations.temp(0))?;
    match fsize {
        FpSize::F32 => cg.asm.load_fp_lit32(mask, 0x7FFF_FFFF),
        FpSize::F64 => cg.asm.load_fp_lit64(mask, 0x7FFF_FFFF_FFFF_FFFF),
    }
    cg.asm.emit(Inst::AndFp {
        fsize,
        dst: out,
        src: mask,
    });
    Ok(())
}

fn emit_float_abs(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_abs_fp(cg, locations, FpSize::F32)
}

fn emit_double_abs(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_abs_fp(cg, locations, FpSize::F64)
}

// ---------------------------------------------------------------------------
// Min/max
// ---------------------------------------------------------------------------

fn gen_int_minmax(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    is_min: bool,
    size: OpSize,
) -> Result<(), CodegenError> {
    // Same input locations: the result is already in place.
    if locations.in_at(0) == locations.in_at(1) {
        debug_assert_eq!(locations.out(), locations.in_at(0));
        return Ok(());
    }
    let out = gpr(locations.out())?;
    let op2 = gpr(locations.in_at(1))?;
    cg.asm.emit(Inst::CmpRR {
        size,
        a: out,
        b: op2,
    });
    cg.asm.emit(Inst::CmovRR {
        size,
        cc: if is_min { CondCode::G } else { CondCode::L },
        dst: out,
        src: op2,
    });
    Ok(())
}

fn emit_int_min(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_int_minmax(cg, locations, true, OpSize::S32)
}

fn emit_int_max(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_int_minmax(cg, locations, false, OpSize::S32)
}

fn emit_long_min(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_int_minmax(cg, locations, true, OpSize::S64)
}

fn emit_long_max(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_int_minmax(cg, locations, false, OpSize::S64)
}

fn gen_fp_minmax(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    is_min: bool,
    fsize: FpSize,
) -> Result<(), CodegenError> {
    if locations.in_at(0) == locations.in_at(1) {
        debug_assert_eq!(locations.out(), locations.in_at(0));
        return Ok(());
    }
    let out = xmm(locations.out())?;
    let op2 = xmm(locations.in_at(1))?;

    let nan = cg.asm.new_label();
    let take_op2 = cg.asm.new_label();
    let done = cg.asm.new_label();

    cg.asm.emit(Inst::Ucomis {
        fsize,
        a: out,
        b: op2,
    });
    cg.asm.emit(Inst::Jcc {
        cc: CondCode::P,
        target: nan,
    });
    cg.asm.emit(Inst::Jcc {
        cc: if is_min { CondCode::A } else { CondCode::B },
        target: take_op2,
    });
    cg.asm.emit(Inst::Jcc {
        cc: if is_min { CondCode::B } else { CondCode::A },
        target: done,
    });

    // Operands compare equal: merge sign bits so min(+0,-0) = -0 and
    // max(+0,-0) = +0.
    if is_min {
        cg.asm.emit(Inst::OrFp {
            fsize,
            dst: out,
            src: op2,
        });
    } else {
        cg.asm.emit(Inst::AndFp {
            fsize,
            dst: out,
            src: op2,
        });
    }
    cg.asm.emit(Inst::Jmp { target: done });

    cg.asm.bind(nan);
    match fsize {
        FpSize::F32 => cg.asm.load_fp_lit32(out, 0x7FC0_0000),
        FpSize::F64 => cg.asm.load_fp_lit64(out, 0x7FF8_0000_0000_0000),
    }
    cg.asm.emit(Inst::Jmp { target: done });

    cg.asm.bind(take_op2);
    cg.asm.emit(Inst::MovFpRR {
        fsize,
        dst: out,
        src: op2,
    });

    cg.asm.bind(done);
    Ok(())
}

fn emit_float_min(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_fp_minmax(cg, locations, true, FpSize::F32)
}

fn emit_float_max(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_fp_minmax(cg, locations, false, FpSize::F32)
}

fn emit_double_min(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_fp_minmax(cg, locations, true, FpSize::F64)
}

fn emit_double_max(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_fp_minmax(cg, locations, false, FpSize::F64)
}

// ---------------------------------------------------------------------------
// Rounding and square root
// ---------------------------------------------------------------------------

fn emit_double_sqrt(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    cg.asm.emit(Inst::SqrtFp {
        fsize: FpSize::F64,
        dst: xmm(locations.out())?,
        src: xmm(locations.in_at(0))?,
    });
    Ok(())
}

fn gen_round_fp(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
    mode: RoundMode,
) -> Result<(), CodegenError> {
    if !cg.features().sse4_1 {
        return emit_call_and_return_move(cg, node, locations);
    }
    cg.asm.emit(Inst::RoundFp {
        fsize: FpSize::F64,
        dst: xmm(locations.out())?,
        src: xmm(locations.in_at(0))?,
        mode,
    });
    Ok(())
}

fn emit_double_ceil(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_round_fp(cg, node, locations, RoundMode::Up)
}

fn emit_double_floor(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_round_fp(cg, node, locations, RoundMode::Down)
}

fn emit_double_rint(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_round_fp(cg, node, locations, RoundMode::Nearest)
}

// round(x) = floor(x + 0.5), clamped to the integral range; NaN rounds to
// zero.
fn gen_round_to_int(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
    fsize: FpSize,
) -> Result<(), CodegenError> {
    if !cg.features().sse4_1 {
        return emit_call_and_return_move(cg, node, locations);
    }
    let input = xmm(locations.in_at(0))?;
    let out = gpr(locations.out())?;
    let max_const = xmm(locations.temp(0))?;
    let rounded = xmm(locations.temp(1))?;
    let wide = fsize == FpSize::F64;

    let done = cg.asm.new_label();
    let nan = cg.asm.new_label();

    match fsize {
        FpSize::F32 => cg.asm.emit(Inst::MovRI {
            dst: out,
            imm: 0.5f32.to_bits() as i32,
        }),
        FpSize::F64 => cg.asm.emit(Inst::MovRI64 {
            dst: out,
            imm: 0.5f64.to_bits() as i64,
        }),
    }
    cg.asm.emit(Inst::MovdXG {
        dst: rounded,
        src: out,
        wide,
    });
    cg.asm.emit(Inst::AddFp {
        fsize,
        dst: rounded,
        src: input,
    });
    cg.asm.emit(Inst::RoundFp {
        fsize,
        dst: rounded,
        src: rounded,
        mode: RoundMode::Down,
    });

    match fsize {
        FpSize::F32 => cg.asm.emit(Inst::MovRI {
            dst: out,
            imm: i32::MAX,
        }),
        FpSize::F64 => cg.asm.emit(Inst::MovRI64 {
            dst: out,
            imm: i64::MAX,
        }),
    }
    cg.asm.emit(Inst::CvtSi2Fp {
        fsize,
        dst: max_const,
        src: out,
        wide,
    });
    cg.asm.emit(Inst::Comis {
        fsize,
        a: rounded,
        b: max_const,
    });
    // At or above the max: keep the max already in out. Unordered falls
    // through the first branch with the carry set, so test parity next.
    cg.asm.emit(Inst::Jcc {
        cc: CondCode::Ae,
        target: done,
    });
    cg.asm.emit(Inst::Jcc {
        cc: CondCode::P,
        target: nan,
    });
    cg.asm.emit(Inst::CvtFp2SiTrunc {
        fsize,
        dst: out,
        src: rounded,
        wide,
    });
    cg.asm.emit(Inst::Jmp { target: done });

    cg.asm.bind(nan);
    cg.asm.emit(Inst::XorRR {
        size: if wide { OpSize::S64 } else { OpSize::S32 },
        dst: out,
        src: out,
    });
    cg.asm.bind(done);
    Ok(())
}

fn emit_float_round(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_round_to_int(cg, node, locations, FpSize::F32)
}

fn emit_double_round(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_round_to_int(cg, node, locations, FpSize::F64)
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

fn emit_string_char_at(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    let obj = gpr(locations.in_at(0))?;
    let idx = gpr(locations.in_at(1))?;
    let out = gpr(locations.out())?;
    let temp = gpr(locations.temp(0))?;

    let slow = IntrinsicSlowPath::new(&mut cg.asm, node.clone(), locations.clone());
    let entry = slow.entry();
    let exit = slow.exit();
    cg.add_slow_path(slow);

    // Unsigned compare against the count rejects negative indices too, and
    // the load from the count field doubles as the null check.
    let fault_offset = cg.asm.position();
    cg.asm.emit(Inst::CmpRM {
        size: OpSize::S32,
        reg: idx,
        addr: Addr::base_disp(obj, STRING_COUNT_OFFSET),
    });
    cg.record_implicit_null_check(fault_offset, node.bytecode_offset);
    cg.asm.emit(Inst::Jcc {
        cc: CondCode::Ae,
        target: entry,
    });

    cg.asm.emit(Inst::MovRR {
        size: OpSize::S32,
        dst: temp,
        src: idx,
    });
    cg.asm.emit(Inst::AddRM {
        size: OpSize::S32,
        dst: temp,
        addr: Addr::base_disp(obj, STRING_OFFSET_OFFSET),
    });
    cg.asm.emit(Inst::Load {
        kind: LoadKind::L,
        dst: out,
        addr: Addr::base_disp(obj, STRING_VALUE_OFFSET),
    });
    cg.asm.emit(Inst::Load {
        kind: LoadKind::ZxW,
        dst: out,
        addr: Addr::indexed(out, temp, Scale::X2, CHAR_ARRAY_DATA_OFFSET),
    });

    cg.asm.bind(exit);
    Ok(())
}

fn emit_string_compare(
    cg: &mut CodeGenerator,
    node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    let argument = gpr(locations.in_at(1))?;

    let slow = IntrinsicSlowPath::new(&mut cg.asm, node.clone(), locations.clone());
    let entry = slow.entry();
    let exit = slow.exit();
    cg.add_slow_path(slow);

    // A null argument must throw; the re-issued call raises it.
    cg.asm.emit(Inst::TestRR {
        size: OpSize::S32,
        a: argument,
        b: argument,
    });
    cg.asm.emit(Inst::Jcc {
        cc: CondCode::E,
        target: entry,
    });

    // Receiver and argument already sit in the helper's argument registers.
    cg.asm.emit(Inst::CallGs {
        offset: Entrypoint::StringCompare.offset(),
    });
    cg.record_safepoint(node.bytecode_offset);

    cg.asm.bind(exit);
    Ok(())
}

// ---------------------------------------------------------------------------
// Raw memory peek/poke
// ---------------------------------------------------------------------------

// Unaligned access is fine on x86.
fn gen_peek(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    kind: LoadKind,
) -> Result<(), CodegenError> {
    let address = gpr(locations.in_at(0))?;
    let out = gpr(locations.out())?;
    cg.asm.emit(Inst::Load {
        kind,
        dst: out,
        addr: Addr::base(address),
    });
    Ok(())
}

fn emit_peek_byte(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_peek(cg, locations, LoadKind::SxB)
}

fn emit_peek_short(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_peek(cg, locations, LoadKind::SxW)
}

fn emit_peek_int(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_peek(cg, locations, LoadKind::L)
}

fn emit_peek_long(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_peek(cg, locations, LoadKind::Q)
}

fn gen_poke(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    kind: StoreKind,
) -> Result<(), CodegenError> {
    let address = gpr(locations.in_at(0))?;
    let value = gpr(locations.in_at(1))?;
    cg.asm.emit(Inst::Store {
        kind,
        addr: Addr::base(address),
        src: value,
    });
    Ok(())
}

fn emit_poke_byte(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_poke(cg, locations, StoreKind::B)
}

fn emit_poke_short(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_poke(cg, locations, StoreKind::W)
}

fn emit_poke_int(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_poke(cg, locations, StoreKind::L)
}

fn emit_poke_long(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_poke(cg, locations, StoreKind::Q)
}

// ---------------------------------------------------------------------------
// Thread state
// ---------------------------------------------------------------------------

fn emit_thread_current(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    cg.asm.emit(Inst::LoadGs {
        size: OpSize::S32,
        dst: gpr(locations.out())?,
        offset: THREAD_SELF_OFFSET,
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Field accessors
// ---------------------------------------------------------------------------

fn gen_raw_get(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    wide: bool,
) -> Result<(), CodegenError> {
    let base = gpr(locations.in_at(1))?;
    let offset = gpr(locations.in_at(2))?;
    let out = gpr(locations.out())?;
    cg.asm.emit(Inst::Load {
        kind: if wide { LoadKind::Q } else { LoadKind::L },
        dst: out,
        addr: Addr::indexed(base, offset, Scale::X1, 0),
    });
    Ok(())
}

fn emit_raw_get_narrow(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_raw_get(cg, locations, false)
}

fn emit_raw_get_wide(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_raw_get(cg, locations, true)
}

fn gen_raw_put(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    wide: bool,
    is_volatile: bool,
    is_ref: bool,
) -> Result<(), CodegenError> {
    let base = gpr(locations.in_at(1))?;
    let offset = gpr(locations.in_at(2))?;
    let value = gpr(locations.in_at(3))?;
    cg.asm.emit(Inst::Store {
        kind: if wide { StoreKind::Q } else { StoreKind::L },
        addr: Addr::indexed(base, offset, Scale::X1, 0),
        src: value,
    });
    if is_volatile {
        cg.asm.emit(Inst::Mfence);
    }
    if is_ref {
        let temp = gpr(locations.temp(0))?;
        let card = gpr(locations.temp(1))?;
        cg.mark_gc_card(temp, card, base);
    }
    Ok(())
}

fn emit_raw_put_int(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_raw_put(cg, locations, false, false, false)
}

fn emit_raw_put_int_volatile(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_raw_put(cg, locations, false, true, false)
}

fn emit_raw_put_long(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_raw_put(cg, locations, true, false, false)
}

fn emit_raw_put_long_volatile(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_raw_put(cg, locations, true, true, false)
}

fn emit_raw_put_ref(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_raw_put(cg, locations, false, false, true)
}

fn emit_raw_put_ref_volatile(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_raw_put(cg, locations, false, true, true)
}

// ---------------------------------------------------------------------------
// Compare-and-set
// ---------------------------------------------------------------------------

fn gen_cas(
    cg: &mut CodeGenerator,
    locations: &ConcreteLocations,
    wide: bool,
    is_ref: bool,
) -> Result<(), CodegenError> {
    let base = gpr(locations.in_at(1))?;
    let offset = gpr(locations.in_at(2))?;
    let expected = gpr(locations.in_at(3))?;
    debug_assert_eq!(expected, Gpr::Rax);
    let value = gpr(locations.in_at(4))?;
    let out = gpr(locations.out())?;

    if is_ref {
        // Mark the card assuming the new value lands; a failed exchange
        // dirties one card needlessly, which is harmless.
        let temp = gpr(locations.temp(0))?;
        let card = gpr(locations.temp(1))?;
        cg.mark_gc_card(temp, card, base);
    }
    cg.asm.emit(Inst::LockCmpxchg {
        size: if wide { OpSize::S64 } else { OpSize::S32 },
        addr: Addr::indexed(base, offset, Scale::X1, 0),
        src: value,
    });

    // ZF holds the publish verdict; no extra barriers, the locked exchange
    // is already sequentially consistent.
    cg.asm.emit(Inst::SetCC {
        cc: CondCode::E,
        dst: out,
    });
    cg.asm.emit(Inst::MovzxB { dst: out, src: out });
    Ok(())
}

fn emit_cas_int(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_cas(cg, locations, false, false)
}

fn emit_cas_long(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_cas(cg, locations, true, false)
}

fn emit_cas_ref(
    cg: &mut CodeGenerator,
    _node: &InvokeNode,
    locations: &ConcreteLocations,
) -> Result<(), CodegenError> {
    gen_cas(cg, locations, false, true)
}
