//! Zilog Z80 CPU core.
//!
//! A single-stepping, instruction-level interpreter for the Z80, covering
//! the official instruction set and the widely documented undocumented
//! behaviors (Y/X result-bit copies, SLL, IXh/IXl access, the DDCB/FDCB
//! register side effect, WZ-sourced flags for BIT on memory operands).
//!
//! # Module Organization
//!
//! - `flags`: Flag bit constants and the pure carry/borrow/parity kernels
//! - `helpers`: Register access, fetch, stack, ALU kernels, exchanges
//! - `execute`: Root decoder and the CB/ED/DD/FD prefix decoders
//!
//! # Register Set
//!
//! The general-purpose registers live in a two-slot register file. EXX
//! toggles which slot the B/C/D/E/H/L opcodes address; EX AF,AF' swaps the
//! A/F values between the slots. IX, IY, SP, PC, I, R and the internal WZ
//! latch sit outside the file.
//!
//! # References
//! - Zilog Z80 CPU User Manual (UM0080)
//! - Sean Young, "The Undocumented Z80 Documented"

use std::fmt;

use crate::bus::Bus;

// Module declarations
mod execute;
pub mod flags;
mod helpers;

#[cfg(test)]
mod tests;

/// Interrupt modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterruptMode {
    /// Mode 0: execute the instruction placed on the data bus
    #[default]
    Mode0,
    /// Mode 1: call to 0x0038
    Mode1,
    /// Mode 2: vectored interrupts using the I register
    Mode2,
}

/// Errors surfaced at the `step()` boundary.
///
/// An error is latched in the CPU: every later `step()` returns the same
/// code until `reset()` clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Legacy code kept for embedder compatibility. The table-free DAA
    /// implemented here accepts every input and never emits it.
    DaaValue,
    /// The opcode has no entry in the applicable decode table.
    InvalidOpcode,
}

impl Error {
    /// Stable negative wire code, as returned by `step()`.
    pub const fn code(self) -> i8 {
        match self {
            Error::DaaValue => -1,
            Error::InvalidOpcode => -2,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DaaValue => f.write_str("invalid DAA accumulator value"),
            Error::InvalidOpcode => f.write_str("undefined opcode"),
        }
    }
}

impl std::error::Error for Error {}

/// One slot of the register file: the eight byte registers of a bank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegBank {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
}

/// Bank selector for the embedder-facing register API.
///
/// `Current` is the set ordinary opcodes see; `Alternate` is the
/// prime-marked set reachable only through EX AF,AF' and EXX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Bank {
    #[default]
    Current,
    Alternate,
}

/// 8-bit register names for the embedder API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg8 {
    A,
    F,
    B,
    C,
    D,
    E,
    H,
    L,
    I,
    R,
}

impl Reg8 {
    /// Parse an embedder register name: `"a"`, `"h"`, `"f_alt"`, ...
    ///
    /// The `_alt` suffix selects [`Bank::Alternate`]. I and R have no
    /// shadow, so their `_alt` forms are rejected.
    pub fn parse(name: &str) -> Option<(Reg8, Bank)> {
        let (base, bank) = match name.strip_suffix("_alt") {
            Some(base) => (base, Bank::Alternate),
            None => (name, Bank::Current),
        };
        let reg = match base {
            "a" => Reg8::A,
            "f" => Reg8::F,
            "b" => Reg8::B,
            "c" => Reg8::C,
            "d" => Reg8::D,
            "e" => Reg8::E,
            "h" => Reg8::H,
            "l" => Reg8::L,
            "i" => Reg8::I,
            "r" => Reg8::R,
            _ => return None,
        };
        if matches!(reg, Reg8::I | Reg8::R) && bank == Bank::Alternate {
            return None;
        }
        Some((reg, bank))
    }
}

/// 16-bit register names for the embedder API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
    Ix,
    Iy,
    Sp,
    Pc,
}

impl Reg16 {
    /// Parse an embedder register name: `"ix"`, `"iy"`, `"sp"`, `"pc"`.
    pub fn parse(name: &str) -> Option<Reg16> {
        match name {
            "ix" => Some(Reg16::Ix),
            "iy" => Some(Reg16::Iy),
            "sp" => Some(Reg16::Sp),
            "pc" => Some(Reg16::Pc),
            _ => None,
        }
    }
}

/// Z80 CPU state.
///
/// The register file is the only mutable state; memory and I/O stay on the
/// host side of the [`Bus`]. One instance may be driven by exactly one
/// thread at a time, and `step()` must not be re-entered from a bus
/// callback.
pub struct Cpu {
    /// Two-slot register file. A/F always read from slot 0 (EX AF,AF'
    /// swaps the values with slot 1); B..L read from `banks[active]`.
    pub banks: [RegBank; 2],
    /// Slot the general-purpose opcodes address for B..L. Toggled by EXX.
    active: usize,

    /// Interrupt vector base
    pub i: u8,
    /// Memory refresh counter (low 7 bits count M1 fetches, bit 7 sticks)
    pub r: u8,
    /// IX index register
    pub ix: u16,
    /// IY index register
    pub iy: u16,
    /// Stack pointer
    pub sp: u16,
    /// Program counter
    pub pc: u16,
    /// Internal address latch (MEMPTR). Its high byte leaks into Y/X for
    /// BIT n,(HL).
    pub wz: u16,

    /// Interrupt enable flip-flop 1
    pub iff1: bool,
    /// Interrupt enable flip-flop 2
    pub iff2: bool,
    /// Interrupt mode
    pub im: InterruptMode,
    /// CPU is halted; `step()` burns 4 T-states without fetching
    pub halted: bool,

    /// Latched decode error; short-circuits `step()` until reset
    error: Option<Error>,
}

impl Cpu {
    /// Create a CPU in the all-zero reset state.
    pub fn new() -> Self {
        Self {
            banks: [RegBank::default(); 2],
            active: 0,
            i: 0,
            r: 0,
            ix: 0,
            iy: 0,
            sp: 0,
            pc: 0,
            wz: 0,
            iff1: false,
            iff2: false,
            im: InterruptMode::Mode0,
            halted: false,
            error: None,
        }
    }

    /// Reset to the all-zero state, clearing halt and any latched error.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Request HALT externally, as if a HALT instruction had executed.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Whether the CPU is in the HALT state.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// The latched decode error, if any.
    pub fn error(&self) -> Option<Error> {
        self.error
    }

    // ========== Instruction Execution ==========

    /// Execute one instruction.
    ///
    /// Returns the number of T-states consumed (>= 0), or a negative error
    /// code. A decode error is latched: every following call returns the
    /// same code until `reset()`. While halted, each call costs 4 T-states
    /// and performs no bus traffic.
    pub fn step(&mut self, bus: &mut dyn Bus) -> i8 {
        if let Some(err) = self.error {
            return err.code();
        }

        if self.halted {
            return 4;
        }

        let at = self.pc;
        let opcode = self.fetch_opcode(bus);
        match self.execute(bus, opcode) {
            Ok(tstates) => tstates as i8,
            Err(err) => {
                log::warn!("decode failed at {at:#06x} (opcode {opcode:#04x}): {err}");
                self.error = Some(err);
                err.code()
            }
        }
    }

    // ========== Embedder Register Access ==========

    /// Register file slot holding `reg` for the given bank view.
    ///
    /// A/F are pinned to slot 0 (their shadows to slot 1); B..L follow the
    /// EXX-toggled index.
    fn slot(&self, reg: Reg8, bank: Bank) -> usize {
        let af = matches!(reg, Reg8::A | Reg8::F);
        match (af, bank) {
            (true, Bank::Current) => 0,
            (true, Bank::Alternate) => 1,
            (false, Bank::Current) => self.active,
            (false, Bank::Alternate) => self.active ^ 1,
        }
    }

    /// Read an 8-bit register. The bank is ignored for I and R.
    pub fn reg8(&self, reg: Reg8, bank: Bank) -> u8 {
        let slot = &self.banks[self.slot(reg, bank)];
        match reg {
            Reg8::A => slot.a,
            Reg8::F => slot.f,
            Reg8::B => slot.b,
            Reg8::C => slot.c,
            Reg8::D => slot.d,
            Reg8::E => slot.e,
            Reg8::H => slot.h,
            Reg8::L => slot.l,
            Reg8::I => self.i,
            Reg8::R => self.r,
        }
    }

    /// Write an 8-bit register. The bank is ignored for I and R.
    pub fn set_reg8(&mut self, reg: Reg8, bank: Bank, value: u8) {
        let slot = &mut self.banks[self.slot(reg, bank)];
        match reg {
            Reg8::A => slot.a = value,
            Reg8::F => slot.f = value,
            Reg8::B => slot.b = value,
            Reg8::C => slot.c = value,
            Reg8::D => slot.d = value,
            Reg8::E => slot.e = value,
            Reg8::H => slot.h = value,
            Reg8::L => slot.l = value,
            Reg8::I => self.i = value,
            Reg8::R => self.r = value,
        }
    }

    /// Read a 16-bit register.
    pub fn reg16(&self, reg: Reg16) -> u16 {
        match reg {
            Reg16::Ix => self.ix,
            Reg16::Iy => self.iy,
            Reg16::Sp => self.sp,
            Reg16::Pc => self.pc,
        }
    }

    /// Write a 16-bit register.
    pub fn set_reg16(&mut self, reg: Reg16, value: u16) {
        match reg {
            Reg16::Ix => self.ix = value,
            Reg16::Iy => self.iy = value,
            Reg16::Sp => self.sp = value,
            Reg16::Pc => self.pc = value,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cpu {{ ")?;
        write!(f, "A:{:02X} F:{:02X} ", self.a(), self.f())?;
        write!(
            f,
            "[s:{} z:{} h:{} pv:{} n:{} c:{}] ",
            self.flag_s() as u8,
            self.flag_z() as u8,
            self.flag_h() as u8,
            self.flag_pv() as u8,
            self.flag_n() as u8,
            self.flag_c() as u8,
        )?;
        write!(f, "BC:{:04X} DE:{:04X} HL:{:04X} ", self.bc(), self.de(), self.hl())?;
        write!(f, "IX:{:04X} IY:{:04X} ", self.ix, self.iy)?;
        write!(f, "SP:{:04X} PC:{:04X} ", self.sp, self.pc)?;
        write!(f, "I:{:02X} R:{:02X} ", self.i, self.r)?;
        write!(
            f,
            "IM:{:?} IFF1:{} IFF2:{}",
            self.im, self.iff1 as u8, self.iff2 as u8
        )?;
        if self.halted {
            write!(f, " HALT")?;
        }
        write!(f, " }}")
    }
}
