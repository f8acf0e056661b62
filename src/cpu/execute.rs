//! Z80 instruction execution.
//!
//! Decoding follows the x-y-z-p-q decomposition of the opcode byte:
//! x = bits 7-6, y = bits 5-3, z = bits 2-0, p = y >> 1, q = y & 1.
//!
//! - `execute`: root dispatch on x
//! - `execute_x0` / `execute_alu` / `execute_x3`: unprefixed tables
//! - `execute_cb` + `execute_rot`: rotate/shift and BIT/RES/SET
//! - `execute_ed` + `execute_bli`: extended and block operations
//! - `execute_index` + `execute_index_cb`: DD/FD (IX/IY) substitution
//!
//! Every function returns the T-states consumed. The only fallible tables
//! are the ED ones; an undefined encoding surfaces as
//! [`Error::InvalidOpcode`] and is latched by `step()`.
//!
//! # References
//! - Zilog Z80 CPU User Manual (UM0080)
//! - Sean Young, "The Undocumented Z80 Documented"

use super::flags;
use super::{Cpu, Error, InterruptMode};
use crate::bus::Bus;

impl Cpu {
    /// Dispatch one fetched opcode byte.
    pub(super) fn execute(&mut self, bus: &mut dyn Bus, opcode: u8) -> Result<u32, Error> {
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;

        match x {
            0 => Ok(self.execute_x0(bus, y, z, p, q)),
            1 => {
                if y == 6 && z == 6 {
                    // HALT
                    log::trace!("halt at {:#06x}", self.pc.wrapping_sub(1));
                    self.halted = true;
                    Ok(4)
                } else {
                    // LD r,r'
                    let val = self.read_r(z, bus);
                    self.write_r(y, val, bus);
                    Ok(if z == 6 || y == 6 { 7 } else { 4 })
                }
            }
            2 => {
                // ALU A,r
                let val = self.read_r(z, bus);
                self.execute_alu(y, val);
                Ok(if z == 6 { 7 } else { 4 })
            }
            _ => self.execute_x3(bus, y, z, p, q),
        }
    }

    /// Execute x=0 opcodes (loads, 16-bit arithmetic, relative jumps,
    /// inc/dec, accumulator rotates and adjusts).
    fn execute_x0(&mut self, bus: &mut dyn Bus, y: u8, z: u8, p: u8, q: u8) -> u32 {
        match z {
            0 => match y {
                0 => 4, // NOP
                1 => {
                    // EX AF,AF'
                    self.ex_af();
                    4
                }
                2 => {
                    // DJNZ d
                    let d = self.fetch_disp(bus);
                    let b = self.b().wrapping_sub(1);
                    self.set_b(b);
                    if b != 0 {
                        let target = self.pc.wrapping_add(d as i16 as u16);
                        self.wz = target;
                        self.pc = target;
                        13
                    } else {
                        8
                    }
                }
                3 => {
                    // JR d
                    let d = self.fetch_disp(bus);
                    let target = self.pc.wrapping_add(d as i16 as u16);
                    self.wz = target;
                    self.pc = target;
                    12
                }
                _ => {
                    // JR cc,d; the displacement is consumed either way
                    let d = self.fetch_disp(bus);
                    if self.check_cc(y - 4) {
                        let target = self.pc.wrapping_add(d as i16 as u16);
                        self.wz = target;
                        self.pc = target;
                        12
                    } else {
                        7
                    }
                }
            },
            1 => {
                if q == 0 {
                    // LD rp,nn
                    let nn = self.fetch_word(bus);
                    self.write_rp(p, nn);
                    10
                } else {
                    // ADD HL,rp
                    let rp = self.read_rp(p);
                    let result = self.alu_add16(self.hl(), rp);
                    self.set_hl(result);
                    11
                }
            }
            2 => match (p, q) {
                (0, 0) => {
                    // LD (BC),A
                    let addr = self.bc();
                    bus.write_byte(addr, self.a());
                    self.wz = ((self.a() as u16) << 8) | (addr.wrapping_add(1) & 0xFF);
                    7
                }
                (1, 0) => {
                    // LD (DE),A
                    let addr = self.de();
                    bus.write_byte(addr, self.a());
                    self.wz = ((self.a() as u16) << 8) | (addr.wrapping_add(1) & 0xFF);
                    7
                }
                (2, 0) => {
                    // LD (nn),HL
                    let nn = self.fetch_word(bus);
                    bus.write_word(nn, self.hl());
                    self.wz = nn.wrapping_add(1);
                    16
                }
                (3, 0) => {
                    // LD (nn),A
                    let nn = self.fetch_word(bus);
                    bus.write_byte(nn, self.a());
                    self.wz = ((self.a() as u16) << 8) | (nn.wrapping_add(1) & 0xFF);
                    13
                }
                (0, 1) => {
                    // LD A,(BC)
                    let addr = self.bc();
                    let val = bus.read_byte(addr);
                    self.set_a(val);
                    self.wz = addr.wrapping_add(1);
                    7
                }
                (1, 1) => {
                    // LD A,(DE)
                    let addr = self.de();
                    let val = bus.read_byte(addr);
                    self.set_a(val);
                    self.wz = addr.wrapping_add(1);
                    7
                }
                (2, 1) => {
                    // LD HL,(nn)
                    let nn = self.fetch_word(bus);
                    let val = bus.read_word(nn);
                    self.set_hl(val);
                    self.wz = nn.wrapping_add(1);
                    16
                }
                _ => {
                    // LD A,(nn)
                    let nn = self.fetch_word(bus);
                    let val = bus.read_byte(nn);
                    self.set_a(val);
                    self.wz = nn.wrapping_add(1);
                    13
                }
            },
            3 => {
                // INC rp / DEC rp: no flags on the real chip
                let rp = self.read_rp(p);
                let rp = if q == 0 {
                    rp.wrapping_add(1)
                } else {
                    rp.wrapping_sub(1)
                };
                self.write_rp(p, rp);
                6
            }
            4 => {
                // INC r
                let val = self.read_r(y, bus);
                let result = self.alu_inc(val);
                self.write_r(y, result, bus);
                if y == 6 {
                    11
                } else {
                    4
                }
            }
            5 => {
                // DEC r
                let val = self.read_r(y, bus);
                let result = self.alu_dec(val);
                self.write_r(y, result, bus);
                if y == 6 {
                    11
                } else {
                    4
                }
            }
            6 => {
                // LD r,n
                let n = self.fetch_byte(bus);
                self.write_r(y, n, bus);
                if y == 6 {
                    10
                } else {
                    7
                }
            }
            _ => match y {
                0 => {
                    // RLCA: S/Z/PV untouched, Y/X from the new A
                    let a = self.a();
                    let result = (a << 1) | (a >> 7);
                    self.set_a(result);
                    self.acc_rotate_flags(result, a & 0x80 != 0);
                    4
                }
                1 => {
                    // RRCA
                    let a = self.a();
                    let result = (a >> 1) | (a << 7);
                    self.set_a(result);
                    self.acc_rotate_flags(result, a & 0x01 != 0);
                    4
                }
                2 => {
                    // RLA
                    let a = self.a();
                    let result = (a << 1) | self.flag_c() as u8;
                    self.set_a(result);
                    self.acc_rotate_flags(result, a & 0x80 != 0);
                    4
                }
                3 => {
                    // RRA
                    let a = self.a();
                    let result = (a >> 1) | ((self.flag_c() as u8) << 7);
                    self.set_a(result);
                    self.acc_rotate_flags(result, a & 0x01 != 0);
                    4
                }
                4 => {
                    // DAA: two-correction form, no lookup ladder
                    let a = self.a();
                    let mut correction = 0u8;
                    let mut carry = self.flag_c();
                    if (a & 0x0F) > 9 || self.flag_h() {
                        correction |= 0x06;
                    }
                    if a > 0x99 || self.flag_c() {
                        correction |= 0x60;
                        carry = true;
                    }

                    let result = if self.flag_n() {
                        a.wrapping_sub(correction)
                    } else {
                        a.wrapping_add(correction)
                    };
                    let half = if self.flag_n() {
                        self.flag_h() && (a & 0x0F) < 0x06
                    } else {
                        (result & 0x0F) > 9
                    };
                    self.set_a(result);

                    let mut f =
                        (self.f() & flags::N) | (result & (flags::S | flags::Y | flags::X));
                    if result == 0 {
                        f |= flags::Z;
                    }
                    if flags::parity(result) {
                        f |= flags::PV;
                    }
                    if half {
                        f |= flags::H;
                    }
                    if carry {
                        f |= flags::C;
                    }
                    self.set_f(f);
                    4
                }
                5 => {
                    // CPL
                    let result = !self.a();
                    self.set_a(result);
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV | flags::C);
                    f |= (result & (flags::Y | flags::X)) | flags::H | flags::N;
                    self.set_f(f);
                    4
                }
                6 => {
                    // SCF
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV);
                    f |= (self.a() & (flags::Y | flags::X)) | flags::C;
                    self.set_f(f);
                    4
                }
                _ => {
                    // CCF: old carry moves into H
                    let old_c = self.flag_c();
                    let mut f = self.f() & (flags::S | flags::Z | flags::PV);
                    f |= self.a() & (flags::Y | flags::X);
                    if old_c {
                        f |= flags::H;
                    } else {
                        f |= flags::C;
                    }
                    self.set_f(f);
                    4
                }
            },
        }
    }

    /// ALU dispatch for x=2 and the immediate forms (y selects the op).
    fn execute_alu(&mut self, y: u8, val: u8) {
        match y {
            0 => {
                let r = self.alu_add(val, false);
                self.set_a(r);
            }
            1 => {
                let r = self.alu_add(val, true);
                self.set_a(r);
            }
            2 => {
                let r = self.alu_sub(val, false);
                self.set_a(r);
            }
            3 => {
                let r = self.alu_sub(val, true);
                self.set_a(r);
            }
            4 => self.alu_and(val),
            5 => self.alu_xor(val),
            6 => self.alu_or(val),
            _ => self.alu_cp(val),
        }
    }

    /// Execute x=3 opcodes (control flow, stack, I/O, prefixes).
    fn execute_x3(
        &mut self,
        bus: &mut dyn Bus,
        y: u8,
        z: u8,
        p: u8,
        q: u8,
    ) -> Result<u32, Error> {
        match z {
            0 => {
                // RET cc
                if self.check_cc(y) {
                    self.pc = self.pop_word(bus);
                    self.wz = self.pc;
                    Ok(11)
                } else {
                    Ok(5)
                }
            }
            1 => {
                if q == 0 {
                    // POP rp2
                    let val = self.pop_word(bus);
                    self.write_rp2(p, val);
                    Ok(10)
                } else {
                    match p {
                        0 => {
                            // RET
                            self.pc = self.pop_word(bus);
                            self.wz = self.pc;
                            Ok(10)
                        }
                        1 => {
                            // EXX
                            self.exx();
                            Ok(4)
                        }
                        2 => {
                            // JP (HL): no operand, no WZ update
                            self.pc = self.hl();
                            Ok(4)
                        }
                        _ => {
                            // LD SP,HL
                            self.sp = self.hl();
                            Ok(6)
                        }
                    }
                }
            }
            2 => {
                // JP cc,nn; the operand is consumed either way
                let nn = self.fetch_word(bus);
                self.wz = nn;
                if self.check_cc(y) {
                    self.pc = nn;
                }
                Ok(10)
            }
            3 => match y {
                0 => {
                    // JP nn
                    let nn = self.fetch_word(bus);
                    self.wz = nn;
                    self.pc = nn;
                    Ok(10)
                }
                1 => Ok(self.execute_cb(bus)),
                2 => {
                    // OUT (n),A: port high byte is A
                    let n = self.fetch_byte(bus);
                    let port = ((self.a() as u16) << 8) | n as u16;
                    bus.port_write(port, self.a());
                    self.wz =
                        ((self.a() as u16) << 8) | ((n as u16).wrapping_add(1) & 0xFF);
                    Ok(11)
                }
                3 => {
                    // IN A,(n): no flags on this form
                    let n = self.fetch_byte(bus);
                    let port = ((self.a() as u16) << 8) | n as u16;
                    self.wz = port.wrapping_add(1);
                    let val = bus.port_read(port);
                    self.set_a(val);
                    Ok(11)
                }
                4 => {
                    // EX (SP),HL
                    let sp_val = bus.read_word(self.sp);
                    bus.write_word(self.sp, self.hl());
                    self.set_hl(sp_val);
                    self.wz = sp_val;
                    Ok(19)
                }
                5 => {
                    // EX DE,HL
                    self.ex_de_hl();
                    Ok(4)
                }
                6 => {
                    // DI
                    self.iff1 = false;
                    self.iff2 = false;
                    Ok(4)
                }
                _ => {
                    // EI
                    self.iff1 = true;
                    self.iff2 = true;
                    Ok(4)
                }
            },
            4 => {
                // CALL cc,nn
                let nn = self.fetch_word(bus);
                self.wz = nn;
                if self.check_cc(y) {
                    let ret = self.pc;
                    self.push_word(bus, ret);
                    self.pc = nn;
                    Ok(17)
                } else {
                    Ok(10)
                }
            }
            5 => {
                if q == 0 {
                    // PUSH rp2
                    let val = self.read_rp2(p);
                    self.push_word(bus, val);
                    Ok(11)
                } else {
                    match p {
                        0 => {
                            // CALL nn
                            let nn = self.fetch_word(bus);
                            self.wz = nn;
                            let ret = self.pc;
                            self.push_word(bus, ret);
                            self.pc = nn;
                            Ok(17)
                        }
                        1 => self.execute_index(bus, true), // DD prefix
                        2 => self.execute_ed(bus),          // ED prefix
                        _ => self.execute_index(bus, false), // FD prefix
                    }
                }
            }
            6 => {
                // ALU A,n
                let n = self.fetch_byte(bus);
                self.execute_alu(y, n);
                Ok(7)
            }
            _ => {
                // RST y*8
                let ret = self.pc;
                self.push_word(bus, ret);
                self.pc = (y as u16) * 8;
                self.wz = self.pc;
                Ok(11)
            }
        }
    }

    // ========== CB Prefix (Rotates and Bit Operations) ==========

    /// Execute a CB-prefixed instruction.
    fn execute_cb(&mut self, bus: &mut dyn Bus) -> u32 {
        let opcode = self.fetch_opcode(bus);
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        let val = self.read_r(z, bus);
        match x {
            0 => {
                // Rotate/shift
                let result = self.execute_rot(y, val);
                self.write_r(z, result, bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            1 => {
                // BIT y,r[z]. For (HL) the Y/X bits leak from the WZ latch
                // rather than the tested byte.
                let yx = if z == 6 { (self.wz >> 8) as u8 } else { val };
                self.bit_flags(y, val, yx);
                if z == 6 {
                    12
                } else {
                    8
                }
            }
            2 => {
                // RES y,r[z]
                self.write_r(z, val & !(1 << y), bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
            _ => {
                // SET y,r[z]
                self.write_r(z, val | (1 << y), bus);
                if z == 6 {
                    15
                } else {
                    8
                }
            }
        }
    }

    /// Rotate/shift one byte (CB x=0 and the DDCB/FDCB forms).
    /// y: 0=RLC 1=RRC 2=RL 3=RR 4=SLA 5=SRA 6=SLL 7=SRL.
    fn execute_rot(&mut self, y: u8, val: u8) -> u8 {
        let (result, carry) = match y {
            0 => ((val << 1) | (val >> 7), val & 0x80 != 0),
            1 => ((val >> 1) | (val << 7), val & 0x01 != 0),
            2 => ((val << 1) | self.flag_c() as u8, val & 0x80 != 0),
            3 => ((val >> 1) | ((self.flag_c() as u8) << 7), val & 0x01 != 0),
            4 => (val << 1, val & 0x80 != 0),
            5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
            6 => ((val << 1) | 1, val & 0x80 != 0), // SLL, undocumented
            _ => (val >> 1, val & 0x01 != 0),
        };

        let mut f = result & (flags::S | flags::Y | flags::X);
        if result == 0 {
            f |= flags::Z;
        }
        if flags::parity(result) {
            f |= flags::PV;
        }
        if carry {
            f |= flags::C;
        }
        self.set_f(f);
        result
    }

    /// Flags for BIT y: Z and PV track the tested bit, S only for bit 7,
    /// H set, N clear, C preserved, Y/X copied from `yx_source`.
    fn bit_flags(&mut self, y: u8, val: u8, yx_source: u8) {
        let bit = val & (1 << y);
        let mut f = (self.f() & flags::C) | flags::H;
        if bit == 0 {
            f |= flags::Z | flags::PV;
        }
        if y == 7 && bit != 0 {
            f |= flags::S;
        }
        f |= yx_source & (flags::Y | flags::X);
        self.set_f(f);
    }

    /// Flags for the accumulator-only rotates: S/Z/PV untouched, H and N
    /// cleared, Y/X from the new accumulator.
    fn acc_rotate_flags(&mut self, result: u8, carry: bool) {
        let mut f = self.f() & (flags::S | flags::Z | flags::PV);
        f |= result & (flags::Y | flags::X);
        if carry {
            f |= flags::C;
        }
        self.set_f(f);
    }

    // ========== ED Prefix (Extended Instructions) ==========

    /// Execute an ED-prefixed instruction.
    ///
    /// Only x=1 and the x=2 block range are defined; everything else in
    /// the ED space is an invalid opcode.
    fn execute_ed(&mut self, bus: &mut dyn Bus) -> Result<u32, Error> {
        let opcode = self.fetch_opcode(bus);
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;

        match x {
            1 => Ok(self.execute_ed_x1(bus, y, z, p, q)),
            2 if y >= 4 && z <= 3 => Ok(self.execute_bli(bus, y, z)),
            _ => Err(Error::InvalidOpcode),
        }
    }

    /// Execute ED x=1 opcodes (I/O on C, 16-bit carry arithmetic, 16-bit
    /// absolute loads, NEG, RETN/RETI, IM, I/R transfers, RRD/RLD).
    fn execute_ed_x1(&mut self, bus: &mut dyn Bus, y: u8, z: u8, p: u8, q: u8) -> u32 {
        match z {
            0 => {
                // IN r,(C); y=6 is the flag-only IN (C) form
                let port = self.bc();
                let val = bus.port_read(port);
                self.wz = port.wrapping_add(1);
                if y != 6 {
                    self.write_r(y, val, bus);
                }
                let mut f = self.f() & flags::C;
                f |= val & (flags::S | flags::Y | flags::X);
                if val == 0 {
                    f |= flags::Z;
                }
                if flags::parity(val) {
                    f |= flags::PV;
                }
                self.set_f(f);
                12
            }
            1 => {
                // OUT (C),r; y=6 is the undocumented OUT (C),0
                let val = if y == 6 { 0 } else { self.read_r(y, bus) };
                let port = self.bc();
                bus.port_write(port, val);
                self.wz = port.wrapping_add(1);
                12
            }
            2 => {
                // SBC HL,rp / ADC HL,rp
                let rp = self.read_rp(p);
                let result = if q == 0 {
                    self.alu_sbc16(self.hl(), rp)
                } else {
                    self.alu_adc16(self.hl(), rp)
                };
                self.set_hl(result);
                15
            }
            3 => {
                // LD (nn),rp / LD rp,(nn)
                let nn = self.fetch_word(bus);
                self.wz = nn.wrapping_add(1);
                if q == 0 {
                    let rp = self.read_rp(p);
                    bus.write_word(nn, rp);
                } else {
                    let val = bus.read_word(nn);
                    self.write_rp(p, val);
                }
                20
            }
            4 => {
                // NEG (all eight y encodings)
                let a = self.a();
                let result = 0u8.wrapping_sub(a);
                self.set_a(result);

                let mut f = (result & (flags::S | flags::Y | flags::X)) | flags::N;
                if result == 0 {
                    f |= flags::Z;
                }
                if flags::borrow_from(4, 0, a as u32, 0) {
                    f |= flags::H;
                }
                if a == 0x80 {
                    f |= flags::PV;
                }
                if a != 0 {
                    f |= flags::C;
                }
                self.set_f(f);
                8
            }
            5 => {
                // RETN (y != 1) / RETI (y == 1); both restore IFF1
                self.iff1 = self.iff2;
                self.pc = self.pop_word(bus);
                self.wz = self.pc;
                14
            }
            6 => {
                // IM 0/1/2 (y repeats the table twice)
                self.im = match y & 0x03 {
                    0 | 1 => InterruptMode::Mode0,
                    2 => InterruptMode::Mode1,
                    _ => InterruptMode::Mode2,
                };
                8
            }
            _ => match y {
                0 => {
                    // LD I,A
                    self.i = self.a();
                    9
                }
                1 => {
                    // LD R,A
                    self.r = self.a();
                    9
                }
                2 => {
                    // LD A,I: PV reflects IFF2
                    let val = self.i;
                    self.set_a(val);
                    self.iff_transfer_flags(val);
                    9
                }
                3 => {
                    // LD A,R
                    let val = self.r;
                    self.set_a(val);
                    self.iff_transfer_flags(val);
                    9
                }
                4 => {
                    // RRD: low nibble of (HL) into A, A's low nibble on top
                    let hl = self.hl();
                    let mem = bus.read_byte(hl);
                    let a = self.a();
                    bus.write_byte(hl, (a << 4) | (mem >> 4));
                    let result = (a & 0xF0) | (mem & 0x0F);
                    self.set_a(result);
                    self.wz = hl.wrapping_add(1);
                    self.rotate_digit_flags(result);
                    18
                }
                5 => {
                    // RLD
                    let hl = self.hl();
                    let mem = bus.read_byte(hl);
                    let a = self.a();
                    bus.write_byte(hl, (mem << 4) | (a & 0x0F));
                    let result = (a & 0xF0) | (mem >> 4);
                    self.set_a(result);
                    self.wz = hl.wrapping_add(1);
                    self.rotate_digit_flags(result);
                    18
                }
                _ => 8, // ED 77 / ED 7F: documented no-ops
            },
        }
    }

    /// Flags for LD A,I and LD A,R: PV is a copy of IFF2.
    fn iff_transfer_flags(&mut self, val: u8) {
        let mut f = self.f() & flags::C;
        f |= val & (flags::S | flags::Y | flags::X);
        if val == 0 {
            f |= flags::Z;
        }
        if self.iff2 {
            f |= flags::PV;
        }
        self.set_f(f);
    }

    /// Flags for RRD/RLD: parity of the new accumulator, C preserved.
    fn rotate_digit_flags(&mut self, result: u8) {
        let mut f = self.f() & flags::C;
        f |= result & (flags::S | flags::Y | flags::X);
        if result == 0 {
            f |= flags::Z;
        }
        if flags::parity(result) {
            f |= flags::PV;
        }
        self.set_f(f);
    }

    // ========== Block Operations (ED x=2) ==========

    /// Execute one iteration of a block instruction. Repeat forms rewind
    /// PC by 2 so the next `step()` re-enters the same encoding; they are
    /// never internal loops.
    fn execute_bli(&mut self, bus: &mut dyn Bus, y: u8, z: u8) -> u32 {
        match (y, z) {
            (4, 0) => {
                // LDI
                self.block_load(bus, 1);
                16
            }
            (5, 0) => {
                // LDD
                self.block_load(bus, -1);
                16
            }
            (6, 0) => {
                // LDIR
                self.block_load(bus, 1);
                self.block_repeat(self.bc() != 0)
            }
            (7, 0) => {
                // LDDR
                self.block_load(bus, -1);
                self.block_repeat(self.bc() != 0)
            }
            (4, 1) => {
                // CPI
                self.block_compare(bus, 1);
                16
            }
            (5, 1) => {
                // CPD
                self.block_compare(bus, -1);
                16
            }
            (6, 1) => {
                // CPIR: stops on match or exhausted counter
                self.block_compare(bus, 1);
                self.block_repeat(self.bc() != 0 && !self.flag_z())
            }
            (7, 1) => {
                // CPDR
                self.block_compare(bus, -1);
                self.block_repeat(self.bc() != 0 && !self.flag_z())
            }
            (4, 2) => {
                // INI
                self.block_in(bus, 1);
                16
            }
            (5, 2) => {
                // IND
                self.block_in(bus, -1);
                16
            }
            (6, 2) => {
                // INIR
                self.block_in(bus, 1);
                self.block_io_repeat(self.b() != 0)
            }
            (7, 2) => {
                // INDR
                self.block_in(bus, -1);
                self.block_io_repeat(self.b() != 0)
            }
            (4, 3) => {
                // OUTI
                self.block_out(bus, 1);
                16
            }
            (5, 3) => {
                // OUTD
                self.block_out(bus, -1);
                16
            }
            (6, 3) => {
                // OTIR
                self.block_out(bus, 1);
                self.block_io_repeat(self.b() != 0)
            }
            _ => {
                // OTDR
                self.block_out(bus, -1);
                self.block_io_repeat(self.b() != 0)
            }
        }
    }

    /// Rewind for LDIR/LDDR/CPIR/CPDR. WZ points at the second prefix
    /// byte when the instruction restarts.
    fn block_repeat(&mut self, repeat: bool) -> u32 {
        if repeat {
            self.pc = self.pc.wrapping_sub(2);
            self.wz = self.pc.wrapping_add(1);
            21
        } else {
            16
        }
    }

    /// Rewind for the I/O repeat forms.
    fn block_io_repeat(&mut self, repeat: bool) -> u32 {
        if repeat {
            self.pc = self.pc.wrapping_sub(2);
            21
        } else {
            16
        }
    }

    /// LDI/LDD body: move one byte (HL)->(DE), step both pointers, count
    /// BC down. Y/X come from bits 1/3 of A + the moved byte.
    fn block_load(&mut self, bus: &mut dyn Bus, delta: i16) {
        let val = bus.read_byte(self.hl());
        bus.write_byte(self.de(), val);
        self.set_hl(self.hl().wrapping_add(delta as u16));
        self.set_de(self.de().wrapping_add(delta as u16));
        self.set_bc(self.bc().wrapping_sub(1));

        let n = self.a().wrapping_add(val);
        let mut f = self.f() & (flags::S | flags::Z | flags::C);
        if self.bc() != 0 {
            f |= flags::PV;
        }
        if n & 0x02 != 0 {
            f |= flags::Y;
        }
        if n & 0x08 != 0 {
            f |= flags::X;
        }
        self.set_f(f);
    }

    /// CPI/CPD body: compare A with (HL), step HL, count BC down. Carry is
    /// untouched; Y/X come from bits 1/3 of the difference minus the
    /// half-borrow.
    fn block_compare(&mut self, bus: &mut dyn Bus, delta: i16) {
        let val = bus.read_byte(self.hl());
        self.set_hl(self.hl().wrapping_add(delta as u16));
        self.set_bc(self.bc().wrapping_sub(1));
        self.wz = self.wz.wrapping_add(delta as u16);

        let a = self.a();
        let result = a.wrapping_sub(val);
        let half = flags::borrow_from(4, a as u32, val as u32, 0);
        let n = result.wrapping_sub(half as u8);

        let mut f = (self.f() & flags::C) | flags::N | (result & flags::S);
        if result == 0 {
            f |= flags::Z;
        }
        if half {
            f |= flags::H;
        }
        if self.bc() != 0 {
            f |= flags::PV;
        }
        if n & 0x02 != 0 {
            f |= flags::Y;
        }
        if n & 0x08 != 0 {
            f |= flags::X;
        }
        self.set_f(f);
    }

    /// INI/IND body: port (BC) into (HL), step HL, count B down.
    fn block_in(&mut self, bus: &mut dyn Bus, delta: i16) {
        let port = self.bc();
        let val = bus.port_read(port);
        self.wz = port.wrapping_add(delta as u16);
        bus.write_byte(self.hl(), val);
        self.set_hl(self.hl().wrapping_add(delta as u16));
        let b = self.b().wrapping_sub(1);
        self.set_b(b);

        let k = val as u16 + (self.c().wrapping_add(delta as u8) as u16);
        self.io_block_flags(b, val, k);
    }

    /// OUTI/OUTD body: (HL) out to port (BC) with B already counted down.
    fn block_out(&mut self, bus: &mut dyn Bus, delta: i16) {
        let val = bus.read_byte(self.hl());
        let b = self.b().wrapping_sub(1);
        self.set_b(b);
        let port = self.bc();
        bus.port_write(port, val);
        self.wz = port.wrapping_add(delta as u16);
        self.set_hl(self.hl().wrapping_add(delta as u16));

        let k = val as u16 + self.l() as u16;
        self.io_block_flags(b, val, k);
    }

    /// Documented flag rules shared by the I/O block ops: S/Z/Y/X from the
    /// new B, N from bit 7 of the transferred byte, H and C from the
    /// carry of `k`, PV = parity((k & 7) XOR B).
    fn io_block_flags(&mut self, b: u8, val: u8, k: u16) {
        let mut f = b & (flags::S | flags::Y | flags::X);
        if b == 0 {
            f |= flags::Z;
        }
        if val & 0x80 != 0 {
            f |= flags::N;
        }
        if k > 0xFF {
            f |= flags::H | flags::C;
        }
        if flags::parity((k as u8 & 0x07) ^ b) {
            f |= flags::PV;
        }
        self.set_f(f);
    }

    // ========== DD/FD Prefix (IX/IY Instructions) ==========

    /// Execute a DD/FD prefixed instruction. `use_ix` is true for DD.
    ///
    /// Prefix chains re-dispatch on the last prefix seen, each extra
    /// prefix costing its 4 fetch T-states; DD/FD in front of ED is
    /// ignored the same way.
    fn execute_index(&mut self, bus: &mut dyn Bus, use_ix: bool) -> Result<u32, Error> {
        let mut use_ix = use_ix;
        let mut extra = 0u32;
        let opcode = loop {
            let op = self.fetch_opcode(bus);
            match op {
                0xDD => {
                    use_ix = true;
                    extra += 4;
                }
                0xFD => {
                    use_ix = false;
                    extra += 4;
                }
                _ => break op,
            }
        };

        if opcode == 0xCB {
            return Ok(extra + self.execute_index_cb(bus, use_ix));
        }
        if opcode == 0xED {
            return self.execute_ed(bus).map(|t| t + extra + 4);
        }

        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;
        let p = (y >> 1) & 0x03;
        let q = y & 0x01;

        let tstates = match x {
            0 => Ok(self.execute_index_x0(bus, y, z, p, q, use_ix)),
            1 => {
                if y == 6 && z == 6 {
                    // HALT is untouched by the prefix
                    self.halted = true;
                    Ok(8)
                } else if y == 6 {
                    // LD (IX+d),r: the source keeps its plain meaning
                    let src = self.read_r(z, bus);
                    let addr = self.index_addr(bus, use_ix);
                    bus.write_byte(addr, src);
                    Ok(19)
                } else if z == 6 {
                    // LD r,(IX+d): the destination keeps its plain meaning
                    let addr = self.index_addr(bus, use_ix);
                    let val = bus.read_byte(addr);
                    self.write_r(y, val, bus);
                    Ok(19)
                } else {
                    // LD r,r' with H/L replaced by IXH/IXL
                    let val = self.read_index_r(z, bus, use_ix);
                    self.write_index_r_no_disp(y, val, use_ix);
                    Ok(8)
                }
            }
            2 => {
                // ALU A,r with the substituted operand
                let val = self.read_index_r(z, bus, use_ix);
                self.execute_alu(y, val);
                Ok(if z == 6 { 19 } else { 8 })
            }
            _ => self.execute_index_x3(bus, y, z, p, q, use_ix),
        };
        tstates.map(|t| t + extra)
    }

    /// Indexed x=0 opcodes. Encodings that never touch HL fall through to
    /// the plain table plus the 4 T-states of the prefix fetch.
    fn execute_index_x0(
        &mut self,
        bus: &mut dyn Bus,
        y: u8,
        z: u8,
        p: u8,
        q: u8,
        use_ix: bool,
    ) -> u32 {
        match z {
            1 => {
                if q == 0 {
                    if p == 2 {
                        // LD IX,nn
                        let nn = self.fetch_word(bus);
                        self.set_index_reg(use_ix, nn);
                        14
                    } else {
                        self.execute_x0(bus, y, z, p, q) + 4
                    }
                } else {
                    // ADD IX,rp (rp's HL slot is the index register)
                    let a = self.index_reg(use_ix);
                    let b = self.read_index_rp(p, use_ix);
                    let result = self.alu_add16(a, b);
                    self.set_index_reg(use_ix, result);
                    15
                }
            }
            2 => match (p, q) {
                (2, 0) => {
                    // LD (nn),IX
                    let nn = self.fetch_word(bus);
                    bus.write_word(nn, self.index_reg(use_ix));
                    self.wz = nn.wrapping_add(1);
                    20
                }
                (2, 1) => {
                    // LD IX,(nn)
                    let nn = self.fetch_word(bus);
                    let val = bus.read_word(nn);
                    self.set_index_reg(use_ix, val);
                    self.wz = nn.wrapping_add(1);
                    20
                }
                _ => self.execute_x0(bus, y, z, p, q) + 4,
            },
            3 => {
                if p == 2 {
                    // INC IX / DEC IX
                    let reg = self.index_reg(use_ix);
                    let reg = if q == 0 {
                        reg.wrapping_add(1)
                    } else {
                        reg.wrapping_sub(1)
                    };
                    self.set_index_reg(use_ix, reg);
                    10
                } else {
                    self.execute_x0(bus, y, z, p, q) + 4
                }
            }
            4 | 5 => {
                // INC/DEC r with substitution
                if y == 6 {
                    // One displacement fetch covers the read and the write
                    let addr = self.index_addr(bus, use_ix);
                    let val = bus.read_byte(addr);
                    let result = if z == 4 {
                        self.alu_inc(val)
                    } else {
                        self.alu_dec(val)
                    };
                    bus.write_byte(addr, result);
                    23
                } else if y == 4 || y == 5 {
                    let val = self.read_index_r(y, bus, use_ix);
                    let result = if z == 4 {
                        self.alu_inc(val)
                    } else {
                        self.alu_dec(val)
                    };
                    self.write_index_r_no_disp(y, result, use_ix);
                    8
                } else {
                    self.execute_x0(bus, y, z, p, q) + 4
                }
            }
            6 => {
                // LD r,n with substitution
                if y == 6 {
                    // LD (IX+d),n: displacement comes before the immediate
                    let addr = self.index_addr(bus, use_ix);
                    let n = self.fetch_byte(bus);
                    bus.write_byte(addr, n);
                    19
                } else if y == 4 || y == 5 {
                    // LD IXH,n / LD IXL,n
                    let n = self.fetch_byte(bus);
                    self.write_index_r_no_disp(y, n, use_ix);
                    11
                } else {
                    self.execute_x0(bus, y, z, p, q) + 4
                }
            }
            _ => self.execute_x0(bus, y, z, p, q) + 4,
        }
    }

    /// Indexed x=3 opcodes.
    fn execute_index_x3(
        &mut self,
        bus: &mut dyn Bus,
        y: u8,
        z: u8,
        p: u8,
        q: u8,
        use_ix: bool,
    ) -> Result<u32, Error> {
        match (z, q, p) {
            (1, 0, 2) => {
                // POP IX
                let val = self.pop_word(bus);
                self.set_index_reg(use_ix, val);
                Ok(14)
            }
            (1, 1, 2) => {
                // JP (IX)
                self.pc = self.index_reg(use_ix);
                Ok(8)
            }
            (1, 1, 3) => {
                // LD SP,IX
                self.sp = self.index_reg(use_ix);
                Ok(10)
            }
            (3, _, _) if y == 4 => {
                // EX (SP),IX
                let sp_val = bus.read_word(self.sp);
                bus.write_word(self.sp, self.index_reg(use_ix));
                self.set_index_reg(use_ix, sp_val);
                self.wz = sp_val;
                Ok(23)
            }
            (5, 0, 2) => {
                // PUSH IX
                let val = self.index_reg(use_ix);
                self.push_word(bus, val);
                Ok(15)
            }
            _ => self.execute_x3(bus, y, z, p, q).map(|t| t + 4),
        }
    }

    /// Execute a DD CB / FD CB instruction. The displacement byte comes
    /// before the final opcode, and register-targeted sub-encodings also
    /// copy the memory result into that register.
    fn execute_index_cb(&mut self, bus: &mut dyn Bus, use_ix: bool) -> u32 {
        let addr = self.index_addr(bus, use_ix);
        let opcode = self.fetch_byte(bus);
        let x = (opcode >> 6) & 0x03;
        let y = (opcode >> 3) & 0x07;
        let z = opcode & 0x07;

        let val = bus.read_byte(addr);
        match x {
            0 => {
                let result = self.execute_rot(y, val);
                bus.write_byte(addr, result);
                if z != 6 {
                    self.write_r(z, result, bus);
                }
                23
            }
            1 => {
                // BIT y,(IX+d): Y/X from the effective-address high byte
                self.bit_flags(y, val, (self.wz >> 8) as u8);
                20
            }
            2 => {
                let result = val & !(1 << y);
                bus.write_byte(addr, result);
                if z != 6 {
                    self.write_r(z, result, bus);
                }
                23
            }
            _ => {
                let result = val | (1 << y);
                bus.write_byte(addr, result);
                if z != 6 {
                    self.write_r(z, result, bus);
                }
                23
            }
        }
    }
}
