//! CPU feature selection relevant to synthesis decisions.

/// Instruction-set extensions the synthesizer may rely on.
///
/// Only SSE4.1 changes synthesized code today: without `roundss`/`roundsd`
/// the rounding family degrades to full calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuFeatures {
    pub sse4_1: bool,
}

impl CpuFeatures {
    /// x86-64 baseline: SSE2 only.
    pub fn baseline() -> CpuFeatures {
        CpuFeatures { sse4_1: false }
    }

    pub fn with_sse4_1() -> CpuFeatures {
        CpuFeatures { sse4_1: true }
    }
}
