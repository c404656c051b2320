//! scoria_target_x86: intrinsic recognition and code synthesis for x86-64.
//!
//! The locations builder declares operand constraints before register
//! allocation; the synthesizer turns allocated call sites into abstract
//! instruction streams, registering out-of-line slow paths where the fast
//! path keeps a call fallback.

pub mod asm;
pub mod codegen;
pub mod convention;
pub mod features;
pub mod inst;
pub mod intrinsics;
pub mod moves;
pub mod reg;
pub mod runtime;
pub mod slow_path;


use scoria_ir::intrinsics::IntrinsicId;
use scoria_ir::invoke::InvokeKind;
use scoria_target::Location;
use thiserror::Error;

use crate::inst::Label;

/// Failures surfaced while synthesizing code.
///
/// All of these indicate a broken contract with an upstream phase, not a
/// property of the compiled program. Declining to intrinsify is not one of
/// them; that is [`Option::None`] from the builder entry point.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("call site is not a recognized intrinsic")]
    NotAnIntrinsic,
    #[error("no synthesis rule for {0:?}")]
    NoSynthesisRule(IntrinsicId),
    #[error("allocator bindings do not satisfy the declared constraints")]
    LocationMismatch,
    #[error("expected a register location, found {0}")]
    ExpectedRegister(Location),
    #[error("cannot re-issue a call with {0:?} dispatch")]
    UnsupportedDispatch(InvokeKind),
    #[error("argument {index} has no location to marshal from")]
    MissingArgumentLocation { index: usize },
    #[error("unsupported move {src} -> {dst}")]
    UnsupportedMove { src: Location, dst: Location },
    #[error("label {0} was never bound")]
    UnboundLabel(Label),
}
