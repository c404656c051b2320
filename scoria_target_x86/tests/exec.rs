//! End-to-end checks that interpret synthesized instruction streams.
//!
//! A small machine model executes the abstract stream directly: registers,
//! flags the synthesizer branches on, a sparse byte memory, the gs thread
//! block, and pluggable handlers for re-issued calls. Each test drives one
//! intrinsic through build, bind, emit, and execution, then asserts on the
//! architectural state.

use std::cmp::Ordering;
use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use scoria_ir::intrinsics::IntrinsicId;
use scoria_ir::invoke::{InvokeKind, InvokeNode, MethodRef};
use scoria_target::{ConcreteLocations, Constraint, LiveRegisters, Location, LocationRequirements};

use scoria_target_x86::codegen::CodeGenerator;
use scoria_target_x86::features::CpuFeatures;
use scoria_target_x86::inst::{Addr, CondCode, FpSize, Inst, LoadKind, OpSize, RoundMode, StoreKind};
use scoria_target_x86::intrinsics;
use scoria_target_x86::reg::{Gpr, Xmm};
use scoria_target_x86::runtime::{
    Entrypoint, CHAR_ARRAY_DATA_OFFSET, STRING_COUNT_OFFSET, STRING_OFFSET_OFFSET,
    STRING_VALUE_OFFSET, THREAD_CARD_TABLE_OFFSET, THREAD_SELF_OFFSET,
};

const METHOD: u32 = 7;

fn intrinsic_node(id: IntrinsicId) -> InvokeNode {
    InvokeNode::for_intrinsic(id, MethodRef(METHOD), InvokeKind::Static, 42)
}

// Stand-in allocator pools, clear of rax, rsp, rdi, and r11.
const GPR_POOL: [Gpr; 8] = [
    Gpr::Rbx,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rsi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R12,
];
const XMM_POOL: [Xmm; 8] = [
    Xmm::Xmm2,
    Xmm::Xmm3,
    Xmm::Xmm4,
    Xmm::Xmm5,
    Xmm::Xmm6,
    Xmm::Xmm7,
    Xmm::Xmm8,
    Xmm::Xmm9,
];

fn bind(reqs: &LocationRequirements) -> ConcreteLocations {
    let mut next_gpr = 0;
    let mut next_xmm = 0;
    let mut place = |constraint: Constraint, first_input: Option<Location>| match constraint {
        Constraint::Unused => Location::None,
        Constraint::Any | Constraint::Reg => {
            let reg = GPR_POOL[next_gpr];
            next_gpr += 1;
            Location::Reg(reg.to_preg())
        }
        Constraint::FpuReg => {
            let reg = XMM_POOL[next_xmm];
            next_xmm += 1;
            Location::FpuReg(reg.to_fp_reg())
        }
        Constraint::Fixed(p) => Location::Reg(p),
        Constraint::FixedFpu(p) => Location::FpuReg(p),
        Constraint::SameAsFirstInput => first_input.unwrap(),
    };
    let inputs: Vec<Location> = reqs.inputs().iter().map(|&c| place(c, None)).collect();
    let first_input = inputs.first().copied();
    let output = place(reqs.output(), first_input);
    let temps = reqs.temps().iter().map(|&c| place(c, None)).collect();
    ConcreteLocations {
        inputs,
        output,
        temps,
        live: LiveRegisters::default(),
    }
}

/// Re-issued-call handlers a test can plug into the machine.
trait Runtime {
    fn call_method(&mut self, _method: u32, _m: &mut Machine) {
        panic!("unexpected re-issued method call");
    }
    fn call_entrypoint(&mut self, _offset: i32, _m: &mut Machine) {
        panic!("unexpected runtime entrypoint call");
    }
}

/// Runtime for streams that must never leave the fast path.
struct NoCalls;

impl Runtime for NoCalls {}

/// Architectural state the synthesized streams touch.
struct Machine {
    gprs: [u64; 16],
    xmms: [u64; 16],
    zf: bool,
    cf: bool,
    sf: bool,
    of: bool,
    pf: bool,
    mem: HashMap<u64, u8>,
    gs: HashMap<i32, u64>,
}

impl Machine {
    fn new() -> Machine {
        let mut m = Machine {
            gprs: [0; 16],
            xmms: [0; 16],
            zf: false,
            cf: false,
            sf: false,
            of: false,
            pf: false,
            mem: HashMap::new(),
            gs: HashMap::new(),
        };
        m.set_gpr(Gpr::Rsp, 0x0070_0000);
        m
    }

    fn gpr(&self, r: Gpr) -> u64 {
        self.gprs[r.encoding() as usize]
    }

    fn set_gpr(&mut self, r: Gpr, v: u64) {
        self.gprs[r.encoding() as usize] = v;
    }

    // 32-bit register writes zero-extend, as on hardware.
    fn set_gpr32(&mut self, r: Gpr, v: u32) {
        self.gprs[r.encoding() as usize] = v as u64;
    }

    fn xmm(&self, x: Xmm) -> u64 {
        self.xmms[x.encoding() as usize]
    }

    fn set_xmm(&mut self, x: Xmm, v: u64) {
        self.xmms[x.encoding() as usize] = v;
    }

    // Scalar float writes merge into the low lane.
    fn set_xmm_low32(&mut self, x: Xmm, v: u32) {
        let slot = &mut self.xmms[x.encoding() as usize];
        *slot = (*slot & !0xFFFF_FFFF) | v as u64;
    }

    fn loc(&self, loc: Location) -> u64 {
        match loc {
            Location::Reg(p) => self.gpr(Gpr::from_preg(p)),
            Location::FpuReg(p) => self.xmm(Xmm::from_fp_reg(p)),
            other => panic!("no machine state for {other}"),
        }
    }

    fn set_loc(&mut self, loc: Location, v: u64) {
        match loc {
            Location::Reg(p) => self.set_gpr(Gpr::from_preg(p), v),
            Location::FpuReg(p) => self.set_xmm(Xmm::from_fp_reg(p), v),
            other => panic!("no machine state for {other}"),
        }
    }

    fn effective(&self, addr: &Addr) -> u64 {
        let mut ea = self.gpr(addr.base);
        if let Some((index, scale)) = addr.index {
            ea = ea.wrapping_add(self.gpr(index).wrapping_mul(scale.factor()));
        }
        ea.wrapping_add(addr.disp as i64 as u64)
    }

    fn read(&self, addr: u64, len: u32) -> u64 {
        let mut v = 0u64;
        for i in (0..len).rev() {
            let a = addr + i as u64;
            let byte = *self
                .mem
                .get(&a)
                .unwrap_or_else(|| panic!("read of unwritten byte at {a:#x}"));
            v = (v << 8) | byte as u64;
        }
        v
    }

    fn write(&mut self, addr: u64, len: u32, v: u64) {
        for i in 0..len {
            self.mem.insert(addr + i as u64, (v >> (8 * i)) as u8);
        }
    }

    fn sub_flags32(&mut self, a: u32, b: u32) {
        let r = a.wrapping_sub(b);
        self.zf = r == 0;
        self.cf = a < b;
        self.sf = (r as i32) < 0;
        self.of = ((a ^ b) & (a ^ r)) >> 31 == 1;
        self.pf = (r as u8).count_ones() % 2 == 0;
    }

    fn sub_flags64(&mut self, a: u64, b: u64) {
        let r = a.wrapping_sub(b);
        self.zf = r == 0;
        self.cf = a < b;
        self.sf = (r as i64) < 0;
        self.of = ((a ^ b) & (a ^ r)) >> 63 == 1;
        self.pf = (r as u8).count_ones() % 2 == 0;
    }

    fn fcmp_flags(&mut self, ord: Option<Ordering>) {
        self.sf = false;
        self.of = false;
        match ord {
            // Unordered.
            None => {
                self.zf = true;
                self.pf = true;
                self.cf = true;
            }
            Some(Ordering::Greater) => {
                self.zf = false;
                self.pf = false;
                self.cf = false;
            }
            Some(Ordering::Less) => {
                self.zf = false;
                self.pf = false;
                self.cf = true;
            }
            Some(Ordering::Equal) => {
                self.zf = true;
                self.pf = false;
                self.cf = false;
            }
        }
    }

    fn cond(&self, cc: CondCode) -> bool {
        match cc {
            CondCode::E => self.zf,
            CondCode::Ne => !self.zf,
            CondCode::B => self.cf,
            CondCode::Be => self.cf || self.zf,
            CondCode::A => !self.cf && !self.zf,
            CondCode::Ae => !self.cf,
            CondCode::L => self.sf != self.of,
            CondCode::Le => self.zf || self.sf != self.of,
            CondCode::G => !self.zf && self.sf == self.of,
            CondCode::Ge => self.sf == self.of,
            CondCode::P => self.pf,
            CondCode::Np => !self.pf,
        }
    }

    /// Execute `insts` from the top until the fall-through reaches `stop`.
    /// Out-of-line blocks past `stop` run only when jumped into.
    fn run(&mut self, insts: &[Inst], stop: usize, rt: &mut dyn Runtime) {
        let mut labels = HashMap::new();
        for (index, inst) in insts.iter().enumerate() {
            if let Inst::Bind { label } = inst {
                labels.insert(*label, index);
            }
        }
        let mut pc = 0usize;
        let mut steps = 0u32;
        while pc != stop {
            steps += 1;
            assert!(steps < 10_000, "interpreter ran away at pc {pc}");
            match &insts[pc] {
                Inst::Jmp { target } => {
                    pc = labels[target];
                    continue;
                }
                Inst::Jcc { cc, target } => {
                    if self.cond(*cc) {
                        pc = labels[target];
                        continue;
                    }
                }
                inst => self.step(inst, rt),
            }
            pc += 1;
        }
    }

    fn step(&mut self, inst: &Inst, rt: &mut dyn Runtime) {
        match *inst {
            Inst::MovRR { size, dst, src } => match size {
                OpSize::S32 => self.set_gpr32(dst, self.gpr(src) as u32),
                OpSize::S64 => self.set_gpr(dst, self.gpr(src)),
            },
            Inst::MovRI { dst, imm } => self.set_gpr32(dst, imm as u32),
            Inst::MovRI64 { dst, imm } => self.set_gpr(dst, imm as u64),
            Inst::AddRR { size, dst, src } => match size {
                OpSize::S32 => {
                    self.set_gpr32(dst, (self.gpr(dst) as u32).wrapping_add(self.gpr(src) as u32))
                }
                OpSize::S64 => self.set_gpr(dst, self.gpr(dst).wrapping_add(self.gpr(src))),
            },
            Inst::AddRM { size, dst, addr } => {
                let ea = self.effective(&addr);
                match size {
                    OpSize::S32 => {
                        let v = (self.gpr(dst) as u32).wrapping_add(self.read(ea, 4) as u32);
                        self.set_gpr32(dst, v);
                    }
                    OpSize::S64 => {
                        let v = self.gpr(dst).wrapping_add(self.read(ea, 8));
                        self.set_gpr(dst, v);
                    }
                }
            }
            Inst::AddRI { size, dst, imm } => match size {
                OpSize::S32 => {
                    self.set_gpr32(dst, (self.gpr(dst) as u32).wrapping_add(imm as u32))
                }
                OpSize::S64 => {
                    self.set_gpr(dst, self.gpr(dst).wrapping_add(imm as i64 as u64))
                }
            },
            Inst::SubRI { size, dst, imm } => match size {
                OpSize::S32 => {
                    self.set_gpr32(dst, (self.gpr(dst) as u32).wrapping_sub(imm as u32))
                }
                OpSize::S64 => {
                    self.set_gpr(dst, self.gpr(dst).wrapping_sub(imm as i64 as u64))
                }
            },
            Inst::XorRR { size, dst, src } => match size {
                OpSize::S32 => {
                    self.set_gpr32(dst, self.gpr(dst) as u32 ^ self.gpr(src) as u32)
                }
                OpSize::S64 => self.set_gpr(dst, self.gpr(dst) ^ self.gpr(src)),
            },
            Inst::OrRR { size, dst, src } => match size {
                OpSize::S32 => {
                    self.set_gpr32(dst, self.gpr(dst) as u32 | self.gpr(src) as u32)
                }
                OpSize::S64 => self.set_gpr(dst, self.gpr(dst) | self.gpr(src)),
            },
            Inst::AndRR { size, dst, src } => match size {
                OpSize::S32 => {
                    self.set_gpr32(dst, self.gpr(dst) as u32 & self.gpr(src) as u32)
                }
                OpSize::S64 => self.set_gpr(dst, self.gpr(dst) & self.gpr(src)),
            },
            Inst::AndRI { size, dst, imm } => match size {
                OpSize::S32 => self.set_gpr32(dst, self.gpr(dst) as u32 & imm as u32),
                OpSize::S64 => self.set_gpr(dst, self.gpr(dst) & imm as i64 as u64),
            },
            Inst::ShlRI { size, dst, imm } => match size {
                OpSize::S32 => self.set_gpr32(dst, (self.gpr(dst) as u32) << imm),
                OpSize::S64 => self.set_gpr(dst, self.gpr(dst) << imm),
            },
            Inst::ShrRI { size, dst, imm } => match size {
                OpSize::S32 => self.set_gpr32(dst, (self.gpr(dst) as u32) >> imm),
                OpSize::S64 => self.set_gpr(dst, self.gpr(dst) >> imm),
            },
            Inst::SarRI { size, dst, imm } => match size {
                OpSize::S32 => {
                    self.set_gpr32(dst, ((self.gpr(dst) as u32 as i32) >> imm) as u32)
                }
                OpSize::S64 => self.set_gpr(dst, ((self.gpr(dst) as i64) >> imm) as u64),
            },
            Inst::Bswap { size, reg } => match size {
                OpSize::S32 => self.set_gpr32(reg, (self.gpr(reg) as u32).swap_bytes()),
                OpSize::S64 => self.set_gpr(reg, self.gpr(reg).swap_bytes()),
            },
            Inst::TestRR { size, a, b } => {
                let v = match size {
                    OpSize::S32 => (self.gpr(a) as u32 & self.gpr(b) as u32) as u64,
                    OpSize::S64 => self.gpr(a) & self.gpr(b),
                };
                self.zf = v == 0;
                self.sf = match size {
                    OpSize::S32 => (v as u32 as i32) < 0,
                    OpSize::S64 => (v as i64) < 0,
                };
                self.cf = false;
                self.of = false;
                self.pf = (v as u8).count_ones() % 2 == 0;
            }
            Inst::CmpRR { size, a, b } => match size {
                OpSize::S32 => self.sub_flags32(self.gpr(a) as u32, self.gpr(b) as u32),
                OpSize::S64 => self.sub_flags64(self.gpr(a), self.gpr(b)),
            },
            Inst::CmpRM { size, reg, addr } => {
                let ea = self.effective(&addr);
                match size {
                    OpSize::S32 => self.sub_flags32(self.gpr(reg) as u32, self.read(ea, 4) as u32),
                    OpSize::S64 => self.sub_flags64(self.gpr(reg), self.read(ea, 8)),
                }
            }
            Inst::CmovRR { size, cc, dst, src } => {
                let taken = self.cond(cc);
                match size {
                    // A 32-bit cmov writes the destination either way.
                    OpSize::S32 => {
                        let v = if taken { self.gpr(src) } else { self.gpr(dst) };
                        self.set_gpr32(dst, v as u32);
                    }
                    OpSize::S64 => {
                        if taken {
                            self.set_gpr(dst, self.gpr(src));
                        }
                    }
                }
            }
            Inst::SetCC { cc, dst } => {
                let v = (self.gpr(dst) & !0xFF) | self.cond(cc) as u64;
                self.set_gpr(dst, v);
            }
            Inst::MovzxB { dst, src } => self.set_gpr32(dst, (self.gpr(src) & 0xFF) as u32),
            Inst::Push { reg } => {
                let rsp = self.gpr(Gpr::Rsp).wrapping_sub(8);
                self.set_gpr(Gpr::Rsp, rsp);
                self.write(rsp, 8, self.gpr(reg));
            }
            Inst::Pop { reg } => {
                let rsp = self.gpr(Gpr::Rsp);
                let v = self.read(rsp, 8);
                self.set_gpr(reg, v);
                self.set_gpr(Gpr::Rsp, rsp.wrapping_add(8));
            }
            Inst::Load { kind, dst, addr } => {
                let ea = self.effective(&addr);
                match kind {
                    LoadKind::SxB => self.set_gpr32(dst, self.read(ea, 1) as u8 as i8 as i32 as u32),
                    LoadKind::SxW => {
                        self.set_gpr32(dst, self.read(ea, 2) as u16 as i16 as i32 as u32)
                    }
                    LoadKind::ZxW => self.set_gpr32(dst, self.read(ea, 2) as u32),
                    LoadKind::L => self.set_gpr32(dst, self.read(ea, 4) as u32),
                    LoadKind::Q => self.set_gpr(dst, self.read(ea, 8)),
                }
            }
            Inst::Store { kind, addr, src } => {
                let ea = self.effective(&addr);
                let len = match kind {
                    StoreKind::B => 1,
                    StoreKind::W => 2,
                    StoreKind::L => 4,
                    StoreKind::Q => 8,
                };
                self.write(ea, len, self.gpr(src));
            }
            Inst::LoadGs { size, dst, offset } => {
                let v = *self
                    .gs
                    .get(&offset)
                    .unwrap_or_else(|| panic!("read of unset gs slot {offset:#x}"));
                match size {
                    OpSize::S32 => self.set_gpr32(dst, v as u32),
                    OpSize::S64 => self.set_gpr(dst, v),
                }
            }
            Inst::MovdGX { dst, src, wide } => {
                if wide {
                    self.set_gpr(dst, self.xmm(src));
                } else {
                    self.set_gpr32(dst, self.xmm(src) as u32);
                }
            }
            Inst::MovdXG { dst, src, wide } => {
                if wide {
                    self.set_xmm(dst, self.gpr(src));
                } else {
                    self.set_xmm(dst, self.gpr(src) as u32 as u64);
                }
            }
            Inst::MovFpRR { fsize, dst, src } => match fsize {
                FpSize::F32 => self.set_xmm_low32(dst, self.xmm(src) as u32),
                FpSize::F64 => self.set_xmm(dst, self.xmm(src)),
            },
            Inst::LoadFpLit { fsize, dst, bits } => match fsize {
                FpSize::F32 => self.set_xmm(dst, bits & 0xFFFF_FFFF),
                FpSize::F64 => self.set_xmm(dst, bits),
            },
            Inst::LoadFp { fsize, dst, addr } => {
                let ea = self.effective(&addr);
                match fsize {
                    FpSize::F32 => self.set_xmm(dst, self.read(ea, 4)),
                    FpSize::F64 => self.set_xmm(dst, self.read(ea, 8)),
                }
            }
            Inst::StoreFp { fsize, addr, src } => {
                let ea = self.effective(&addr);
                let len = match fsize {
                    FpSize::F32 => 4,
                    FpSize::F64 => 8,
                };
                self.write(ea, len, self.xmm(src));
            }
            Inst::AddFp { fsize, dst, src } => match fsize {
                FpSize::F32 => {
                    let v = f32::from_bits(self.xmm(dst) as u32)
                        + f32::from_bits(self.xmm(src) as u32);
                    self.set_xmm_low32(dst, v.to_bits());
                }
                FpSize::F64 => {
                    let v = f64::from_bits(self.xmm(dst)) + f64::from_bits(self.xmm(src));
                    self.set_xmm(dst, v.to_bits());
                }
            },
            Inst::AndFp { dst, src, .. } => self.set_xmm(dst, self.xmm(dst) & self.xmm(src)),
            Inst::OrFp { dst, src, .. } => self.set_xmm(dst, self.xmm(dst) | self.xmm(src)),
            Inst::SqrtFp { fsize, dst, src } => match fsize {
                FpSize::F32 => {
                    let v = f32::from_bits(self.xmm(src) as u32).sqrt();
                    self.set_xmm_low32(dst, v.to_bits());
                }
                FpSize::F64 => {
                    let v = f64::from_bits(self.xmm(src)).sqrt();
                    self.set_xmm(dst, v.to_bits());
                }
            },
            Inst::RoundFp {
                fsize,
                dst,
                src,
                mode,
            } => match fsize {
                FpSize::F32 => {
                    let v = f32::from_bits(self.xmm(src) as u32);
                    let r = match mode {
                        RoundMode::Nearest => v.round_ties_even(),
                        RoundMode::Down => v.floor(),
                        RoundMode::Up => v.ceil(),
                    };
                    self.set_xmm_low32(dst, r.to_bits());
                }
                FpSize::F64 => {
                    let v = f64::from_bits(self.xmm(src));
                    let r = match mode {
                        RoundMode::Nearest => v.round_ties_even(),
                        RoundMode::Down => v.floor(),
                        RoundMode::Up => v.ceil(),
                    };
                    self.set_xmm(dst, r.to_bits());
                }
            },
            Inst::Ucomis { fsize, a, b } | Inst::Comis { fsize, a, b } => {
                let ord = match fsize {
                    FpSize::F32 => f32::from_bits(self.xmm(a) as u32)
                        .partial_cmp(&f32::from_bits(self.xmm(b) as u32)),
                    FpSize::F64 => {
                        f64::from_bits(self.xmm(a)).partial_cmp(&f64::from_bits(self.xmm(b)))
                    }
                };
                self.fcmp_flags(ord);
            }
            Inst::CvtSi2Fp {
                fsize,
                dst,
                src,
                wide,
            } => {
                let s = if wide {
                    self.gpr(src) as i64
                } else {
                    self.gpr(src) as u32 as i32 as i64
                };
                match fsize {
                    FpSize::F32 => self.set_xmm_low32(dst, (s as f32).to_bits()),
                    FpSize::F64 => self.set_xmm(dst, (s as f64).to_bits()),
                }
            }
            Inst::CvtFp2SiTrunc {
                fsize,
                dst,
                src,
                wide,
            } => {
                let v = match fsize {
                    FpSize::F32 => f32::from_bits(self.xmm(src) as u32) as f64,
                    FpSize::F64 => f64::from_bits(self.xmm(src)),
                };
                if wide {
                    // Out-of-range conversions produce the indefinite value.
                    let r = if v.is_nan() || v >= 9_223_372_036_854_775_808.0 || v < -9_223_372_036_854_775_808.0
                    {
                        i64::MIN
                    } else {
                        v as i64
                    };
                    self.set_gpr(dst, r as u64);
                } else {
                    let r = if v.is_nan() || v >= 2_147_483_648.0 || v < -2_147_483_648.0 {
                        i32::MIN
                    } else {
                        v as i32
                    };
                    self.set_gpr32(dst, r as u32);
                }
            }
            Inst::Bind { .. } => {}
            Inst::CallM { addr } => {
                // The preceding LoadMethod leaves the method id in the base
                // register; the entry-field indirection stays abstract here.
                let method = self.gpr(addr.base) as u32;
                rt.call_method(method, self);
            }
            Inst::CallGs { offset } => rt.call_entrypoint(offset, self),
            Inst::LoadMethod { dst, method } => self.set_gpr(dst, method.0 as u64),
            Inst::Mfence => {}
            Inst::LockCmpxchg { size, addr, src } => {
                let ea = self.effective(&addr);
                match size {
                    OpSize::S32 => {
                        let current = self.read(ea, 4) as u32;
                        let expected = self.gpr(Gpr::Rax) as u32;
                        if current == expected {
                            self.write(ea, 4, self.gpr(src));
                            self.zf = true;
                        } else {
                            self.set_gpr32(Gpr::Rax, current);
                            self.zf = false;
                        }
                    }
                    OpSize::S64 => {
                        let current = self.read(ea, 8);
                        if current == self.gpr(Gpr::Rax) {
                            self.write(ea, 8, self.gpr(src));
                            self.zf = true;
                        } else {
                            self.set_gpr(Gpr::Rax, current);
                            self.zf = false;
                        }
                    }
                }
            }
            ref other => panic!("unhandled instruction: {other}"),
        }
    }
}

/// Build, bind, synthesize, and execute one intrinsic call site.
fn execute(
    id: IntrinsicId,
    features: &CpuFeatures,
    rt: &mut dyn Runtime,
    init: impl FnOnce(&mut Machine, &ConcreteLocations),
) -> (Machine, ConcreteLocations) {
    let _ = env_logger::builder().is_test(true).try_init();
    let node = intrinsic_node(id);
    let reqs = intrinsics::try_intrinsify(&node, features).unwrap();
    let locations = bind(&reqs);
    let mut cg = CodeGenerator::new(features);
    intrinsics::emit_code(&mut cg, &node, &reqs, &locations).unwrap();
    // The fall-through boundary of the fast path; out-of-line blocks follow.
    let stop = cg.asm.position() as usize;
    let code = cg.finish().unwrap();

    let mut machine = Machine::new();
    init(&mut machine, &locations);
    machine.run(&code.stream.insts, stop, rt);
    (machine, locations)
}

fn run_fast(
    id: IntrinsicId,
    features: &CpuFeatures,
    init: impl FnOnce(&mut Machine, &ConcreteLocations),
) -> (Machine, ConcreteLocations) {
    execute(id, features, &mut NoCalls, init)
}

/// One-input, one-output helper for the pure value intrinsics.
fn eval(id: IntrinsicId, input: u64) -> u64 {
    let (m, locations) = run_fast(id, &CpuFeatures::with_sse4_1(), |m, locations| {
        m.set_loc(locations.in_at(0), input)
    });
    m.loc(locations.out())
}

fn eval2(id: IntrinsicId, a: u64, b: u64) -> u64 {
    let (m, locations) = run_fast(id, &CpuFeatures::with_sse4_1(), |m, locations| {
        m.set_loc(locations.in_at(0), a);
        m.set_loc(locations.in_at(1), b);
    });
    m.loc(locations.out())
}

#[test]
fn bit_casts_preserve_every_payload() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..64 {
        let bits = rng.gen::<u32>();
        assert_eq!(eval(IntrinsicId::FloatToRawIntBits, bits as u64), bits as u64);
        assert_eq!(eval(IntrinsicId::IntBitsToFloat, bits as u64), bits as u64);
    }
    for _ in 0..64 {
        let bits = rng.gen::<u64>();
        assert_eq!(eval(IntrinsicId::DoubleToRawLongBits, bits), bits);
        assert_eq!(eval(IntrinsicId::LongBitsToDouble, bits), bits);
    }
}

#[test]
fn reverse_bytes_matches_the_scalar_library() {
    assert_eq!(
        eval(IntrinsicId::IntReverseBytes, 0x1234_5678),
        0x7856_3412
    );
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..32 {
        let v = rng.gen::<u32>();
        assert_eq!(eval(IntrinsicId::IntReverseBytes, v as u64), v.swap_bytes() as u64);
        let w = rng.gen::<u64>();
        assert_eq!(eval(IntrinsicId::LongReverseBytes, w), w.swap_bytes());
        let s = rng.gen::<u16>() as i16;
        let expected = s.swap_bytes() as i32 as u32 as u64;
        assert_eq!(eval(IntrinsicId::ShortReverseBytes, s as i32 as u32 as u64), expected);
    }
}

#[test]
fn reverse_bits_matches_the_scalar_library() {
    assert_eq!(eval(IntrinsicId::IntReverseBits, 1), 0x8000_0000);
    assert_eq!(eval(IntrinsicId::LongReverseBits, 1), 0x8000_0000_0000_0000);
    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..32 {
        let v = rng.gen::<u32>();
        assert_eq!(eval(IntrinsicId::IntReverseBits, v as u64), v.reverse_bits() as u64);
        let w = rng.gen::<u64>();
        assert_eq!(eval(IntrinsicId::LongReverseBits, w), w.reverse_bits());
    }
}

#[test]
fn integer_abs_wraps_at_the_minimum() {
    assert_eq!(eval(IntrinsicId::IntAbs, (-5i32) as u32 as u64), 5);
    assert_eq!(eval(IntrinsicId::IntAbs, 7), 7);
    // abs(MIN) overflows back to MIN.
    assert_eq!(
        eval(IntrinsicId::IntAbs, i32::MIN as u32 as u64),
        i32::MIN as u32 as u64
    );
    assert_eq!(eval(IntrinsicId::LongAbs, (-9i64) as u64), 9);
    assert_eq!(eval(IntrinsicId::LongAbs, i64::MIN as u64), i64::MIN as u64);
}

#[test]
fn fp_abs_clears_only_the_sign_bit() {
    assert_eq!(
        eval(IntrinsicId::FloatAbs, (-0.0f32).to_bits() as u64),
        0.0f32.to_bits() as u64
    );
    assert_eq!(
        eval(IntrinsicId::FloatAbs, (-2.5f32).to_bits() as u64),
        2.5f32.to_bits() as u64
    );
    assert_eq!(
        eval(IntrinsicId::DoubleAbs, (-1.5f64).to_bits()),
        1.5f64.to_bits()
    );
    // A negative NaN keeps its payload, minus the sign.
    let nan = 0xFFF8_0000_0000_1234u64;
    assert_eq!(eval(IntrinsicId::DoubleAbs, nan), nan & !(1 << 63));
}

#[test]
fn integer_minmax_picks_the_right_operand() {
    let a = (-3i32) as u32 as u64;
    assert_eq!(eval2(IntrinsicId::IntMin, a, 5), a);
    assert_eq!(eval2(IntrinsicId::IntMax, a, 5), 5);
    assert_eq!(eval2(IntrinsicId::IntMin, 5, 5), 5);

    let big = 0x7FFF_FFFF_FFFFu64;
    let neg = (-1i64) as u64;
    assert_eq!(eval2(IntrinsicId::LongMin, big, neg), neg);
    assert_eq!(eval2(IntrinsicId::LongMax, big, neg), big);
}

#[test]
fn fp_minmax_follows_managed_semantics() {
    let pz = 0.0f64.to_bits();
    let nz = (-0.0f64).to_bits();
    assert_eq!(eval2(IntrinsicId::DoubleMin, pz, nz), nz);
    assert_eq!(eval2(IntrinsicId::DoubleMax, pz, nz), pz);
    assert_eq!(eval2(IntrinsicId::DoubleMin, nz, pz), nz);

    let one = 1.0f64.to_bits();
    let two = 2.0f64.to_bits();
    assert_eq!(eval2(IntrinsicId::DoubleMin, one, two), one);
    assert_eq!(eval2(IntrinsicId::DoubleMin, two, one), one);
    assert_eq!(eval2(IntrinsicId::DoubleMax, two, one), two);

    // Any NaN operand answers the canonical NaN.
    let nan = 0xFFF8_DEAD_BEEF_0000u64;
    assert_eq!(eval2(IntrinsicId::DoubleMax, one, nan), 0x7FF8_0000_0000_0000);
    assert_eq!(eval2(IntrinsicId::DoubleMin, nan, one), 0x7FF8_0000_0000_0000);

    let fone = (1.0f32.to_bits()) as u64;
    let fnan = 0xFFC0_0001u64;
    assert_eq!(eval2(IntrinsicId::FloatMin, fone, fnan), 0x7FC0_0000);
    assert_eq!(
        eval2(IntrinsicId::FloatMax, (-0.0f32).to_bits() as u64, 0.0f32.to_bits() as u64),
        0.0f32.to_bits() as u64
    );
}

#[test]
fn sqrt_and_directed_rounding_with_sse41() {
    assert_eq!(eval(IntrinsicId::DoubleSqrt, 4.0f64.to_bits()), 2.0f64.to_bits());
    assert!(f64::from_bits(eval(IntrinsicId::DoubleSqrt, (-1.0f64).to_bits())).is_nan());

    assert_eq!(eval(IntrinsicId::DoubleCeil, 1.1f64.to_bits()), 2.0f64.to_bits());
    assert_eq!(
        eval(IntrinsicId::DoubleFloor, (-1.1f64).to_bits()),
        (-2.0f64).to_bits()
    );
    // Ties go to even.
    assert_eq!(eval(IntrinsicId::DoubleRint, 2.5f64.to_bits()), 2.0f64.to_bits());
    assert_eq!(eval(IntrinsicId::DoubleRint, 3.5f64.to_bits()), 4.0f64.to_bits());
}

#[test]
fn round_handles_midpoints_nan_and_saturation() {
    let round_f = |v: f32| eval(IntrinsicId::FloatRound, v.to_bits() as u64);
    assert_eq!(round_f(2.5), 3);
    assert_eq!(round_f(-2.5), (-2i32) as u32 as u64);
    assert_eq!(round_f(0.49), 0);
    assert_eq!(round_f(f32::NAN), 0);
    assert_eq!(round_f(f32::INFINITY), i32::MAX as u64);
    assert_eq!(round_f(f32::NEG_INFINITY), i32::MIN as u32 as u64);
    assert_eq!(round_f(f32::MAX), i32::MAX as u64);

    let round_d = |v: f64| eval(IntrinsicId::DoubleRound, v.to_bits());
    assert_eq!(round_d(2.5), 3);
    assert_eq!(round_d(-2.5), (-2i64) as u64);
    assert_eq!(round_d(f64::NAN), 0);
    assert_eq!(round_d(f64::INFINITY), i64::MAX as u64);
    assert_eq!(round_d(f64::NEG_INFINITY), i64::MIN as u64);
}

struct CeilHelper {
    calls: u32,
}

impl Runtime for CeilHelper {
    fn call_method(&mut self, method: u32, m: &mut Machine) {
        assert_eq!(method, METHOD);
        self.calls += 1;
        let v = f64::from_bits(m.xmm(Xmm::Xmm0));
        m.set_xmm(Xmm::Xmm0, v.ceil().to_bits());
    }
}

#[test]
fn rounding_without_sse41_reissues_the_original_call() {
    let mut helper = CeilHelper { calls: 0 };
    let (m, locations) = execute(
        IntrinsicId::DoubleCeil,
        &CpuFeatures::baseline(),
        &mut helper,
        |m, locations| m.set_loc(locations.in_at(0), 1.25f64.to_bits()),
    );
    assert_eq!(helper.calls, 1);
    assert_eq!(m.loc(locations.out()), 2.0f64.to_bits());
}

const STRING_OBJ: u64 = 0x4000;
const CHAR_ARRAY: u64 = 0x5000;

/// Lay out a string of `chars` starting at backing-array index `offset`.
fn seed_string(m: &mut Machine, offset: u32, chars: &[u16]) {
    m.write(STRING_OBJ + STRING_VALUE_OFFSET as u64, 4, CHAR_ARRAY);
    m.write(STRING_OBJ + STRING_COUNT_OFFSET as u64, 4, chars.len() as u64);
    m.write(STRING_OBJ + STRING_OFFSET_OFFSET as u64, 4, offset as u64);
    for (i, &c) in chars.iter().enumerate() {
        let at = CHAR_ARRAY + CHAR_ARRAY_DATA_OFFSET as u64 + 2 * (offset as u64 + i as u64);
        m.write(at, 2, c as u64);
    }
}

#[test]
fn char_at_reads_through_the_backing_array() {
    let (m, locations) = run_fast(IntrinsicId::StringCharAt, &CpuFeatures::baseline(), |m, locations| {
        seed_string(m, 3, &[0x68, 0x65, 0x6C, 0x6C, 0x6F]);
        m.set_loc(locations.in_at(0), STRING_OBJ);
        m.set_loc(locations.in_at(1), 1);
    });
    assert_eq!(m.loc(locations.out()), 0x65);
}

struct CharAtHelper {
    calls: u32,
    expected_index: u32,
}

impl Runtime for CharAtHelper {
    fn call_method(&mut self, method: u32, m: &mut Machine) {
        assert_eq!(method, METHOD);
        self.calls += 1;
        // Receiver and index arrive marshalled into the managed convention.
        assert_eq!(m.gpr(Gpr::Rsi), STRING_OBJ);
        assert_eq!(m.gpr(Gpr::Rdx) as u32, self.expected_index);
        m.set_gpr(Gpr::Rax, 0x77);
    }
}

#[test]
fn char_at_out_of_range_takes_the_original_call() {
    // Index equal to the length is already out of range.
    for bad_index in [3u32, 9, u32::MAX] {
        let mut helper = CharAtHelper {
            calls: 0,
            expected_index: bad_index,
        };
        let (m, locations) = execute(
            IntrinsicId::StringCharAt,
            &CpuFeatures::baseline(),
            &mut helper,
            |m, locations| {
                seed_string(m, 0, &[0x61, 0x62, 0x63]);
                m.set_loc(locations.in_at(0), STRING_OBJ);
                m.set_loc(locations.in_at(1), bad_index as u64);
            },
        );
        assert_eq!(helper.calls, 1);
        assert_eq!(m.loc(locations.out()), 0x77);
    }
}

struct CompareHelper {
    entrypoint_calls: u32,
    method_calls: u32,
}

impl Runtime for CompareHelper {
    fn call_method(&mut self, method: u32, m: &mut Machine) {
        assert_eq!(method, METHOD);
        self.method_calls += 1;
        // Both strings re-marshalled from the fixed helper registers into
        // the managed convention.
        assert_eq!(m.gpr(Gpr::Rsi), 0x4000);
        assert_eq!(m.gpr(Gpr::Rdx), 0);
        m.set_gpr(Gpr::Rax, 0x5105);
    }

    fn call_entrypoint(&mut self, offset: i32, m: &mut Machine) {
        assert_eq!(offset, Entrypoint::StringCompare.offset());
        self.entrypoint_calls += 1;
        assert_eq!(m.gpr(Gpr::Rdi), 0x4000);
        assert_eq!(m.gpr(Gpr::Rsi), 0x4100);
        m.set_gpr(Gpr::Rax, (-2i32) as u32 as u64);
    }
}

#[test]
fn string_compare_fast_path_calls_the_helper() {
    let mut helper = CompareHelper {
        entrypoint_calls: 0,
        method_calls: 0,
    };
    let (m, locations) = execute(
        IntrinsicId::StringCompare,
        &CpuFeatures::baseline(),
        &mut helper,
        |m, locations| {
            m.set_loc(locations.in_at(0), 0x4000);
            m.set_loc(locations.in_at(1), 0x4100);
        },
    );
    assert_eq!(helper.entrypoint_calls, 1);
    assert_eq!(helper.method_calls, 0);
    assert_eq!(m.loc(locations.out()) as u32, (-2i32) as u32);
}

#[test]
fn string_compare_null_argument_takes_the_original_call() {
    let mut helper = CompareHelper {
        entrypoint_calls: 0,
        method_calls: 0,
    };
    let (m, locations) = execute(
        IntrinsicId::StringCompare,
        &CpuFeatures::baseline(),
        &mut helper,
        |m, locations| {
            m.set_loc(locations.in_at(0), 0x4000);
            m.set_loc(locations.in_at(1), 0);
        },
    );
    assert_eq!(helper.entrypoint_calls, 0);
    assert_eq!(helper.method_calls, 1);
    assert_eq!(m.loc(locations.out()), 0x5105);
}

#[test]
fn peek_and_poke_round_trip_with_sign_extension() {
    let addr = 0x6000u64;

    let (m, _) = run_fast(IntrinsicId::PokeShort, &CpuFeatures::baseline(), |m, locations| {
        m.set_loc(locations.in_at(0), addr);
        m.set_loc(locations.in_at(1), 0xBEEF);
    });
    assert_eq!(m.read(addr, 2), 0xBEEF);

    let (m, locations) = run_fast(IntrinsicId::PeekShort, &CpuFeatures::baseline(), |m, locations| {
        m.write(addr, 2, 0xBEEF);
        m.set_loc(locations.in_at(0), addr);
    });
    assert_eq!(m.loc(locations.out()), 0xFFFF_BEEF);

    let (m, locations) = run_fast(IntrinsicId::PeekByte, &CpuFeatures::baseline(), |m, locations| {
        m.write(addr, 1, 0x80);
        m.set_loc(locations.in_at(0), addr);
    });
    assert_eq!(m.loc(locations.out()), 0xFFFF_FF80);

    let (m, _) = run_fast(IntrinsicId::PokeLong, &CpuFeatures::baseline(), |m, locations| {
        m.set_loc(locations.in_at(0), addr);
        m.set_loc(locations.in_at(1), 0xDEAD_BEEF_CAFE_F00D);
    });
    assert_eq!(m.read(addr, 8), 0xDEAD_BEEF_CAFE_F00D);

    let (m, locations) = run_fast(IntrinsicId::PeekInt, &CpuFeatures::baseline(), |m, locations| {
        m.write(addr, 4, 0x8000_0001);
        m.set_loc(locations.in_at(0), addr);
    });
    // 32-bit loads zero-extend.
    assert_eq!(m.loc(locations.out()), 0x8000_0001);
}

#[test]
fn thread_current_reads_the_thread_block() {
    let (m, locations) = run_fast(IntrinsicId::ThreadCurrent, &CpuFeatures::baseline(), |m, _| {
        m.gs.insert(THREAD_SELF_OFFSET, 0xBEEF);
    });
    assert_eq!(m.loc(locations.out()), 0xBEEF);
}

const CARD_TABLE: u64 = 0x9123;

#[test]
fn raw_field_accesses_hit_base_plus_offset() {
    let base = 0x6100u64;
    let offset = 0x18u64;

    let (m, _) = run_fast(IntrinsicId::RawPutLong, &CpuFeatures::baseline(), |m, locations| {
        m.set_loc(locations.in_at(1), base);
        m.set_loc(locations.in_at(2), offset);
        m.set_loc(locations.in_at(3), 0x0123_4567_89AB_CDEF);
    });
    assert_eq!(m.read(base + offset, 8), 0x0123_4567_89AB_CDEF);

    let (m, locations) = run_fast(IntrinsicId::RawGetLong, &CpuFeatures::baseline(), |m, locations| {
        m.write(base + offset, 8, 0x0123_4567_89AB_CDEF);
        m.set_loc(locations.in_at(1), base);
        m.set_loc(locations.in_at(2), offset);
    });
    assert_eq!(m.loc(locations.out()), 0x0123_4567_89AB_CDEF);

    let (m, locations) = run_fast(IntrinsicId::RawGetInt, &CpuFeatures::baseline(), |m, locations| {
        m.write(base + offset, 4, 0xCAFE_BABE);
        m.set_loc(locations.in_at(1), base);
        m.set_loc(locations.in_at(2), offset);
    });
    assert_eq!(m.loc(locations.out()), 0xCAFE_BABE);
}

#[test]
fn ref_put_stores_narrow_and_dirties_the_card() {
    let base = 0x6200u64;
    let (m, _) = run_fast(IntrinsicId::RawPutRef, &CpuFeatures::baseline(), |m, locations| {
        m.gs.insert(THREAD_CARD_TABLE_OFFSET, CARD_TABLE);
        m.set_loc(locations.in_at(1), base);
        m.set_loc(locations.in_at(2), 0x10);
        m.set_loc(locations.in_at(3), 0x55AA_77CC);
    });
    assert_eq!(m.read(base + 0x10, 4), 0x55AA_77CC);
    // The card byte holds the low byte of the table base.
    assert_eq!(m.read(CARD_TABLE + (base >> 10), 1), CARD_TABLE & 0xFF);
}

#[test]
fn cas_publishes_only_when_expected_matches() {
    let base = 0x6300u64;
    let offset = 0x10u64;
    let field = base + offset;

    let (m, locations) = run_fast(IntrinsicId::CasInt, &CpuFeatures::baseline(), |m, locations| {
        m.write(field, 4, 42);
        m.set_loc(locations.in_at(1), base);
        m.set_loc(locations.in_at(2), offset);
        m.set_loc(locations.in_at(3), 42);
        m.set_loc(locations.in_at(4), 99);
    });
    assert_eq!(m.read(field, 4), 99);
    assert_eq!(m.loc(locations.out()), 1);

    let (m, locations) = run_fast(IntrinsicId::CasInt, &CpuFeatures::baseline(), |m, locations| {
        m.write(field, 4, 43);
        m.set_loc(locations.in_at(1), base);
        m.set_loc(locations.in_at(2), offset);
        m.set_loc(locations.in_at(3), 42);
        m.set_loc(locations.in_at(4), 99);
    });
    assert_eq!(m.read(field, 4), 43);
    assert_eq!(m.loc(locations.out()), 0);

    let wide = 0x1111_2222_3333_4444u64;
    let (m, locations) = run_fast(IntrinsicId::CasLong, &CpuFeatures::baseline(), |m, locations| {
        m.write(field, 8, wide);
        m.set_loc(locations.in_at(1), base);
        m.set_loc(locations.in_at(2), offset);
        m.set_loc(locations.in_at(3), wide);
        m.set_loc(locations.in_at(4), u64::MAX);
    });
    assert_eq!(m.read(field, 8), u64::MAX);
    assert_eq!(m.loc(locations.out()), 1);
}

#[test]
fn cas_ref_dirties_the_card_even_when_the_exchange_fails() {
    let base = 0x6400u64;
    let run = |stored: u32| {
        run_fast(IntrinsicId::CasRef, &CpuFeatures::baseline(), |m, locations| {
            m.gs.insert(THREAD_CARD_TABLE_OFFSET, CARD_TABLE);
            m.write(base + 8, 4, stored as u64);
            m.set_loc(locations.in_at(1), base);
            m.set_loc(locations.in_at(2), 8);
            m.set_loc(locations.in_at(3), 0x4000);
            m.set_loc(locations.in_at(4), 0x4100);
        })
    };

    let (m, locations) = run(0x4000);
    assert_eq!(m.read(base + 8, 4), 0x4100);
    assert_eq!(m.loc(locations.out()), 1);
    assert_eq!(m.read(CARD_TABLE + (base >> 10), 1), CARD_TABLE & 0xFF);

    let (m, locations) = run(0x4999);
    assert_eq!(m.read(base + 8, 4), 0x4999);
    assert_eq!(m.loc(locations.out()), 0);
    assert_eq!(m.read(CARD_TABLE + (base >> 10), 1), CARD_TABLE & 0xFF);
}
