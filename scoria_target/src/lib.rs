//! Target-agnostic location and constraint vocabulary.
//!
//! The intrinsic layer declares where operands must live via
//! [`LocationRequirements`]; the external register allocator answers with
//! [`ConcreteLocations`]. Both sides speak only the types in this crate, so
//! neither owns the other's policy.

use std::fmt;

/// A physical general-purpose register, target-agnostic representation.
/// Holds the hardware encoding (0..15 for x86-64 GPRs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PReg(pub u8);

impl fmt::Display for PReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A physical floating-point register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FpReg(pub u8);

impl fmt::Display for FpReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fp{}", self.0)
    }
}

/// Where a value actually lives after allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// No location: an excluded operand or a void result.
    None,
    Reg(PReg),
    FpuReg(FpReg),
    /// Spill slot holding a 32-bit value, as a frame offset.
    Stack(i32),
    /// Spill slot pair holding a 64-bit value.
    DoubleStack(i32),
}

impl Location {
    pub fn is_none(self) -> bool {
        self == Location::None
    }

    /// Whether this is a register of either file.
    pub fn is_register(self) -> bool {
        matches!(self, Location::Reg(_) | Location::FpuReg(_))
    }

    pub fn is_stack_slot(self) -> bool {
        matches!(self, Location::Stack(_) | Location::DoubleStack(_))
    }

    pub fn as_reg(self) -> Option<PReg> {
        match self {
            Location::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_fpu_reg(self) -> Option<FpReg> {
        match self {
            Location::FpuReg(r) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::None => write!(f, "-"),
            Location::Reg(r) => write!(f, "{r}"),
            Location::FpuReg(r) => write!(f, "{r}"),
            Location::Stack(off) => write!(f, "[sp+{off}]"),
            Location::DoubleStack(off) => write!(f, "[sp+{off}]:2"),
        }
    }
}

/// Declarative requirement on one operand, output, or temp slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// Operand exists in the signature but the fast path never reads it
    /// (e.g. a receiver already folded into base + offset). The allocator
    /// binds no location.
    Unused,
    /// Register or stack slot, allocator's choice.
    Any,
    /// Any general-purpose register.
    Reg,
    /// Any floating-point register.
    FpuReg,
    /// Exactly this general-purpose register.
    Fixed(PReg),
    /// Exactly this floating-point register.
    FixedFpu(FpReg),
    /// Output only: reuse whatever the first input was bound to.
    SameAsFirstInput,
}

/// Whether the intrinsic keeps the ability to perform the original call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Fully inline, never calls.
    NoCall,
    /// Inline fast path with a registered out-of-line call fallback.
    CallOnSlowPath,
    /// The operation is the call.
    FullCall,
}

impl CallMode {
    pub fn can_call(self) -> bool {
        self != CallMode::NoCall
    }
}

/// Operand, output, and temp constraints for one call site, plus the call
/// mode. Produced once by the locations builder and read-only afterwards;
/// the allocator consumes it, the synthesizer re-reads it next to the
/// allocator's bindings.
#[derive(Debug, Clone)]
pub struct LocationRequirements {
    inputs: Vec<Constraint>,
    output: Constraint,
    temps: Vec<Constraint>,
    call_mode: CallMode,
}

impl LocationRequirements {
    /// Requirements with `arity` unconstrained inputs and no output.
    pub fn new(arity: usize, call_mode: CallMode) -> Self {
        Self {
            inputs: vec![Constraint::Any; arity],
            output: Constraint::Unused,
            temps: Vec::new(),
            call_mode,
        }
    }

    pub fn set_in(&mut self, index: usize, constraint: Constraint) {
        self.inputs[index] = constraint;
    }

    pub fn set_out(&mut self, constraint: Constraint) {
        self.output = constraint;
    }

    pub fn add_temp(&mut self, constraint: Constraint) {
        self.temps.push(constraint);
    }

    pub fn input(&self, index: usize) -> Constraint {
        self.inputs[index]
    }

    pub fn inputs(&self) -> &[Constraint] {
        &self.inputs
    }

    pub fn output(&self) -> Constraint {
        self.output
    }

    pub fn temps(&self) -> &[Constraint] {
        &self.temps
    }

    pub fn call_mode(&self) -> CallMode {
        self.call_mode
    }

    pub fn can_call(&self) -> bool {
        self.call_mode.can_call()
    }
}

/// Registers holding live values across a call site. The slow path saves
/// and restores exactly these.
#[derive(Debug, Clone, Default)]
pub struct LiveRegisters {
    pub gpr: Vec<PReg>,
    pub fpu: Vec<FpReg>,
}

/// The allocator's answer to a [`LocationRequirements`]: one location per
/// slot, in the same order. Written by the allocator, read-only here.
#[derive(Debug, Clone)]
pub struct ConcreteLocations {
    pub inputs: Vec<Location>,
    pub output: Location,
    pub temps: Vec<Location>,
    pub live: LiveRegisters,
}

impl ConcreteLocations {
    pub fn in_at(&self, index: usize) -> Location {
        self.inputs[index]
    }

    pub fn out(&self) -> Location {
        self.output
    }

    pub fn temp(&self, index: usize) -> Location {
        self.temps[index]
    }

    /// Validate the allocator handshake: every binding matches its declared
    /// constraint, slot for slot.
    pub fn satisfies(&self, reqs: &LocationRequirements) -> bool {
        if self.inputs.len() != reqs.inputs().len() || self.temps.len() != reqs.temps().len() {
            return false;
        }
        let first_input = self.inputs.first().copied().unwrap_or(Location::None);
        let inputs_ok = self
            .inputs
            .iter()
            .zip(reqs.inputs())
            .all(|(loc, c)| constraint_allows(*c, *loc, None));
        let temps_ok = self
            .temps
            .iter()
            .zip(reqs.temps())
            .all(|(loc, c)| constraint_allows(*c, *loc, None));
        inputs_ok && temps_ok && constraint_allows(reqs.output(), self.output, Some(first_input))
    }
}

fn constraint_allows(c: Constraint, loc: Location, first_input: Option<Location>) -> bool {
    match c {
        Constraint::Unused => loc.is_none(),
        Constraint::Any => !loc.is_none(),
        Constraint::Reg => matches!(loc, Location::Reg(_)),
        Constraint::FpuReg => matches!(loc, Location::FpuReg(_)),
        Constraint::Fixed(p) => loc == Location::Reg(p),
        Constraint::FixedFpu(p) => loc == Location::FpuReg(p),
        // Valid only on the output slot.
        Constraint::SameAsFirstInput => first_input.is_some_and(|first| loc == first),
    }
}
