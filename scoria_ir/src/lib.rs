//! scoria_ir: managed-IR call-site surface for the scoria compiler backend.

pub mod intrinsics;
pub mod invoke;
pub mod types;
