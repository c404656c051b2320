//! x86-64 abstract emission requests.
//!
//! The synthesizer records [`Inst`] values through the assembler instead of
//! encoding bytes; the downstream encoder owns instruction encoding, and the
//! recorded stream stays inspectable for tests and logs.

use std::fmt;

use scoria_ir::invoke::MethodRef;

use crate::reg::{Gpr, Xmm};

/// Operand size for integer instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSize {
    S32,
    S64,
}

/// Operand size for scalar floating-point instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpSize {
    F32,
    F64,
}

/// x86 condition codes used by `jcc`, `cmovcc`, `setcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
    /// Equal / zero.
    E,
    Ne,
    /// Below (unsigned <).
    B,
    Be,
    /// Above (unsigned >).
    A,
    Ae,
    /// Less (signed <).
    L,
    Le,
    /// Greater (signed >).
    G,
    Ge,
    /// Parity set: unordered result of a floating compare.
    P,
    Np,
}

impl CondCode {
    pub fn name(self) -> &'static str {
        match self {
            CondCode::E => "e",
            CondCode::Ne => "ne",
            CondCode::B => "b",
            CondCode::Be => "be",
            CondCode::A => "a",
            CondCode::Ae => "ae",
            CondCode::L => "l",
            CondCode::Le => "le",
            CondCode::G => "g",
            CondCode::Ge => "ge",
            CondCode::P => "p",
            CondCode::Np => "np",
        }
    }
}

/// Immediate rounding mode for `roundss`/`roundsd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMode {
    /// Round to nearest, ties to even.
    Nearest,
    /// Round toward negative infinity.
    Down,
    /// Round toward positive infinity.
    Up,
}

impl RoundMode {
    pub fn imm(self) -> u8 {
        match self {
            RoundMode::Nearest => 0,
            RoundMode::Down => 1,
            RoundMode::Up => 2,
        }
    }
}

/// Index scale in an addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    X1,
    X2,
    X4,
    X8,
}

impl Scale {
    pub fn factor(self) -> u64 {
        match self {
            Scale::X1 => 1,
            Scale::X2 => 2,
            Scale::X4 => 4,
            Scale::X8 => 8,
        }
    }
}

/// A `base + index*scale + disp` addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub base: Gpr,
    pub index: Option<(Gpr, Scale)>,
    pub disp: i32,
}

impl Addr {
    pub fn base(base: Gpr) -> Addr {
        Addr {
            base,
            index: None,
            disp: 0,
        }
    }

    pub fn base_disp(base: Gpr, disp: i32) -> Addr {
        Addr {
            base,
            index: None,
            disp,
        }
    }

    pub fn indexed(base: Gpr, index: Gpr, scale: Scale, disp: i32) -> Addr {
        Addr {
            base,
            index: Some((index, scale)),
            disp,
        }
    }
}

/// Width and extension of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// movsx from 8-bit.
    SxB,
    /// movsx from 16-bit.
    SxW,
    /// movzx from 16-bit.
    ZxW,
    /// 32-bit mov (zero-extends).
    L,
    /// 64-bit mov.
    Q,
}

/// Width of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    B,
    W,
    L,
    Q,
}

/// A forward-referenceable position in the instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// One abstract x86-64 emission request.
#[derive(Debug, Clone)]
pub enum Inst {
    /// mov reg, reg
    MovRR { size: OpSize, dst: Gpr, src: Gpr },
    /// mov reg32, imm32
    MovRI { dst: Gpr, imm: i32 },
    /// mov reg64, imm64
    MovRI64 { dst: Gpr, imm: i64 },
    /// add dst, src
    AddRR { size: OpSize, dst: Gpr, src: Gpr },
    /// add dst, [mem]
    AddRM { size: OpSize, dst: Gpr, addr: Addr },
    /// add dst, imm
    AddRI { size: OpSize, dst: Gpr, imm: i32 },
    /// sub dst, imm
    SubRI { size: OpSize, dst: Gpr, imm: i32 },
    /// xor dst, src
    XorRR { size: OpSize, dst: Gpr, src: Gpr },
    /// or dst, src
    OrRR { size: OpSize, dst: Gpr, src: Gpr },
    /// and dst, src
    AndRR { size: OpSize, dst: Gpr, src: Gpr },
    /// and dst, imm32 (sign-extended at S64)
    AndRI { size: OpSize, dst: Gpr, imm: i32 },
    /// shl dst, imm
    ShlRI { size: OpSize, dst: Gpr, imm: u8 },
    /// shr dst, imm (logical)
    ShrRI { size: OpSize, dst: Gpr, imm: u8 },
    /// sar dst, imm (arithmetic)
    SarRI { size: OpSize, dst: Gpr, imm: u8 },
    /// bswap reg
    Bswap { size: OpSize, reg: Gpr },
    /// test a, b
    TestRR { size: OpSize, a: Gpr, b: Gpr },
    /// cmp a, b
    CmpRR { size: OpSize, a: Gpr, b: Gpr },
    /// cmp reg, [mem]
    CmpRM { size: OpSize, reg: Gpr, addr: Addr },
    /// cmovcc dst, src
    CmovRR {
        size: OpSize,
        cc: CondCode,
        dst: Gpr,
        src: Gpr,
    },
    /// setcc dst8
    SetCC { cc: CondCode, dst: Gpr },
    /// movzx dst32, src8
    MovzxB { dst: Gpr, src: Gpr },
    /// push reg64
    Push { reg: Gpr },
    /// pop reg64
    Pop { reg: Gpr },

    /// Sign/zero-extending or plain load.
    Load {
        kind: LoadKind,
        dst: Gpr,
        addr: Addr,
    },
    /// Plain store at width.
    Store {
        kind: StoreKind,
        addr: Addr,
        src: Gpr,
    },
    /// mov dst, gs:[offset] (thread-block load)
    LoadGs {
        size: OpSize,
        dst: Gpr,
        offset: i32,
    },

    /// movd/movq dst_gpr, src_xmm
    MovdGX { dst: Gpr, src: Xmm, wide: bool },
    /// movd/movq dst_xmm, src_gpr
    MovdXG { dst: Xmm, src: Gpr, wide: bool },
    /// movss/movsd xmm, xmm
    MovFpRR { fsize: FpSize, dst: Xmm, src: Xmm },
    /// movss/movsd xmm, [literal area]
    LoadFpLit { fsize: FpSize, dst: Xmm, bits: u64 },
    /// movss/movsd xmm, [mem]
    LoadFp { fsize: FpSize, dst: Xmm, addr: Addr },
    /// movss/movsd [mem], xmm
    StoreFp { fsize: FpSize, addr: Addr, src: Xmm },
    /// addss/addsd dst, src
    AddFp { fsize: FpSize, dst: Xmm, src: Xmm },
    /// andps/andpd dst, src
    AndFp { fsize: FpSize, dst: Xmm, src: Xmm },
    /// orps/orpd dst, src
    OrFp { fsize: FpSize, dst: Xmm, src: Xmm },
    /// sqrtss/sqrtsd dst, src
    SqrtFp { fsize: FpSize, dst: Xmm, src: Xmm },
    /// roundss/roundsd dst, src, mode (SSE4.1)
    RoundFp {
        fsize: FpSize,
        dst: Xmm,
        src: Xmm,
        mode: RoundMode,
    },
    /// ucomiss/ucomisd a, b (quiet on NaN)
    Ucomis { fsize: FpSize, a: Xmm, b: Xmm },
    /// comiss/comisd a, b
    Comis { fsize: FpSize, a: Xmm, b: Xmm },
    /// cvtsi2ss/cvtsi2sd dst, src_gpr
    CvtSi2Fp {
        fsize: FpSize,
        dst: Xmm,
        src: Gpr,
        wide: bool,
    },
    /// cvttss2si/cvttsd2si dst_gpr, src (truncating)
    CvtFp2SiTrunc {
        fsize: FpSize,
        dst: Gpr,
        src: Xmm,
        wide: bool,
    },

    /// Label definition.
    Bind { label: Label },
    /// jmp label
    Jmp { target: Label },
    /// jcc label
    Jcc { cc: CondCode, target: Label },
    /// call through a memory-resident entry point
    CallM { addr: Addr },
    /// call through a gs-relative runtime entry-point slot
    CallGs { offset: i32 },
    /// Materialize a loaded-method handle (encoder patches the reference).
    LoadMethod { dst: Gpr, method: MethodRef },
    /// mfence
    Mfence,
    /// lock cmpxchg [mem], src (expected/result implicitly in rax)
    LockCmpxchg {
        size: OpSize,
        addr: Addr,
        src: Gpr,
    },
}

fn gpr_name(size: OpSize, r: Gpr) -> &'static str {
    match size {
        OpSize::S32 => r.name32(),
        OpSize::S64 => r.name64(),
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.base.name64())?;
        if let Some((index, scale)) = self.index {
            write!(f, "+{}*{}", index.name64(), scale.factor())?;
        }
        if self.disp != 0 {
            write!(f, "{:+#x}", self.disp)?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Inst::*;
        match self {
            MovRR { size, dst, src } => {
                write!(f, "mov {}, {}", gpr_name(*size, *dst), gpr_name(*size, *src))
            }
            MovRI { dst, imm } => write!(f, "mov {}, {imm:#x}", dst.name32()),
            MovRI64 { dst, imm } => write!(f, "mov {}, {imm:#x}", dst.name64()),
            AddRR { size, dst, src } => {
                write!(f, "add {}, {}", gpr_name(*size, *dst), gpr_name(*size, *src))
            }
            AddRM { size, dst, addr } => write!(f, "add {}, {addr}", gpr_name(*size, *dst)),
            AddRI { size, dst, imm } => write!(f, "add {}, {imm}", gpr_name(*size, *dst)),
            SubRI { size, dst, imm } => write!(f, "sub {}, {imm}", gpr_name(*size, *dst)),
            XorRR { size, dst, src } => {
                write!(f, "xor {}, {}", gpr_name(*size, *dst), gpr_name(*size, *src))
            }
            OrRR { size, dst, src } => {
                write!(f, "or {}, {}", gpr_name(*size, *dst), gpr_name(*size, *src))
            }
            AndRR { size, dst, src } => {
                write!(f, "and {}, {}", gpr_name(*size, *dst), gpr_name(*size, *src))
            }
            AndRI { size, dst, imm } => {
                write!(f, "and {}, {imm:#x}", gpr_name(*size, *dst))
            }
            ShlRI { size, dst, imm } => write!(f, "shl {}, {imm}", gpr_name(*size, *dst)),
            ShrRI { size, dst, imm } => write!(f, "shr {}, {imm}", gpr_name(*size, *dst)),
            SarRI { size, dst, imm } => write!(f, "sar {}, {imm}", gpr_name(*size, *dst)),
            Bswap { size, reg } => write!(f, "bswap {}", gpr_name(*size, *reg)),
            TestRR { size, a, b } => {
                write!(f, "test {}, {}", gpr_name(*size, *a), gpr_name(*size, *b))
            }
            CmpRR { size, a, b } => {
                write!(f, "cmp {}, {}", gpr_name(*size, *a), gpr_name(*size, *b))
            }
            CmpRM { size, reg, addr } => write!(f, "cmp {}, {addr}", gpr_name(*size, *reg)),
            CmovRR { size, cc, dst, src } => write!(
                f,
                "cmov{} {}, {}",
                cc.name(),
                gpr_name(*size, *dst),
                gpr_name(*size, *src)
            ),
            SetCC { cc, dst } => write!(f, "set{} {}", cc.name(), dst.name32()),
            MovzxB { dst, src } => write!(f, "movzx {}, {}b", dst.name32(), src.name32()),
            Push { reg } => write!(f, "push {}", reg.name64()),
            Pop { reg } => write!(f, "pop {}", reg.name64()),
            Load { kind, dst, addr } => match kind {
                LoadKind::SxB => write!(f, "movsx {}, byte {addr}", dst.name32()),
                LoadKind::SxW => write!(f, "movsx {}, word {addr}", dst.name32()),
                LoadKind::ZxW => write!(f, "movzx {}, word {addr}", dst.name32()),
                LoadKind::L => write!(f, "mov {}, {addr}", dst.name32()),
                LoadKind::Q => write!(f, "mov {}, {addr}", dst.name64()),
            },
            Store { kind, addr, src } => match kind {
                StoreKind::B => write!(f, "mov byte {addr}, {}", src.name32()),
                StoreKind::W => write!(f, "mov word {addr}, {}", src.name32()),
                StoreKind::L => write!(f, "mov {addr}, {}", src.name32()),
                StoreKind::Q => write!(f, "mov {addr}, {}", src.name64()),
            },
            LoadGs { size, dst, offset } => {
                write!(f, "mov {}, gs:[{offset:#x}]", gpr_name(*size, *dst))
            }
            MovdGX { dst, src, wide } => {
                if *wide {
                    write!(f, "movq {}, {}", dst.name64(), src.name())
                } else {
                    write!(f, "movd {}, {}", dst.name32(), src.name())
                }
            }
            MovdXG { dst, src, wide } => {
                if *wide {
                    write!(f, "movq {}, {}", dst.name(), src.name64())
                } else {
                    write!(f, "movd {}, {}", dst.name(), src.name32())
                }
            }
            MovFpRR { fsize, dst, src } => {
                write!(f, "{} {}, {}", fp_mnemonic("mov", *fsize), dst.name(), src.name())
            }
            LoadFpLit { fsize, dst, bits } => write!(
                f,
                "{} {}, [lit:{bits:#x}]",
                fp_mnemonic("mov", *fsize),
                dst.name()
            ),
            LoadFp { fsize, dst, addr } => {
                write!(f, "{} {}, {addr}", fp_mnemonic("mov", *fsize), dst.name())
            }
            StoreFp { fsize, addr, src } => {
                write!(f, "{} {addr}, {}", fp_mnemonic("mov", *fsize), src.name())
            }
            AddFp { fsize, dst, src } => {
                write!(f, "{} {}, {}", fp_mnemonic("add", *fsize), dst.name(), src.name())
            }
            AndFp { fsize, dst, src } => {
                write!(f, "{} {}, {}", packed_mnemonic("and", *fsize), dst.name(), src.name())
            }
            OrFp { fsize, dst, src } => {
                write!(f, "{} {}, {}", packed_mnemonic("or", *fsize), dst.name(), src.name())
            }
            SqrtFp { fsize, dst, src } => {
                write!(f, "{} {}, {}", fp_mnemonic("sqrt", *fsize), dst.name(), src.name())
            }
            RoundFp {
                fsize,
                dst,
                src,
                mode,
            } => write!(
                f,
                "{} {}, {}, {}",
                fp_mnemonic("round", *fsize),
                dst.name(),
                src.name(),
                mode.imm()
            ),
            Ucomis { fsize, a, b } => {
                let m = match fsize {
                    FpSize::F32 => "ucomiss",
                    FpSize::F64 => "ucomisd",
                };
                write!(f, "{m} {}, {}", a.name(), b.name())
            }
            Comis { fsize, a, b } => {
                let m = match fsize {
                    FpSize::F32 => "comiss",
                    FpSize::F64 => "comisd",
                };
                write!(f, "{m} {}, {}", a.name(), b.name())
            }
            CvtSi2Fp {
                fsize,
                dst,
                src,
                wide,
            } => {
                let m = match fsize {
                    FpSize::F32 => "cvtsi2ss",
                    FpSize::F64 => "cvtsi2sd",
                };
                let src = if *wide { src.name64() } else { src.name32() };
                write!(f, "{m} {}, {src}", dst.name())
            }
            CvtFp2SiTrunc {
                fsize,
                dst,
                src,
                wide,
            } => {
                let m = match fsize {
                    FpSize::F32 => "cvttss2si",
                    FpSize::F64 => "cvttsd2si",
                };
                let dst = if *wide { dst.name64() } else { dst.name32() };
                write!(f, "{m} {dst}, {}", src.name())
            }
            Bind { label } => write!(f, "{label}:"),
            Jmp { target } => write!(f, "jmp {target}"),
            Jcc { cc, target } => write!(f, "j{} {target}", cc.name()),
            CallM { addr } => write!(f, "call {addr}"),
            CallGs { offset } => write!(f, "call gs:[{offset:#x}]"),
            LoadMethod { dst, method } => {
                write!(f, "mov {}, method#{}", dst.name64(), method.0)
            }
            Mfence => write!(f, "mfence"),
            LockCmpxchg { size, addr, src } => {
                write!(f, "lock cmpxchg {addr}, {}", gpr_name(*size, *src))
            }
        }
    }
}

fn fp_mnemonic(stem: &str, fsize: FpSize) -> String {
    match fsize {
        FpSize::F32 => format!("{stem}ss"),
        FpSize::F64 => format!("{stem}sd"),
    }
}

fn packed_mnemonic(stem: &str, fsize: FpSize) -> String {
    match fsize {
        FpSize::F32 => format!("{stem}ps"),
        FpSize::F64 => format!("{stem}pd"),
    }
}
