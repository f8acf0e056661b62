//! Zilog Z80 CPU interpreter core.
//!
//! This crate is a cycle-accurate, instruction-level interpreter for the
//! Z80, including the widely documented undocumented behaviors: the Y/X
//! flag copies, SLL, IXh/IXl register halves, the DDCB/FDCB register side
//! effect and the WZ (MEMPTR) leak into BIT's flags.
//!
//! The core owns no memory and no clock. The host supplies memory and I/O
//! through the [`Bus`] trait (or a [`CallbackBus`] built from four
//! closures) and drives execution one instruction at a time:
//!
//! ```
//! use z80_core::{Bus, Cpu};
//!
//! struct Ram([u8; 0x10000]);
//!
//! impl Bus for Ram {
//!     fn read_byte(&mut self, addr: u16) -> u8 { self.0[addr as usize] }
//!     fn write_byte(&mut self, addr: u16, v: u8) { self.0[addr as usize] = v; }
//!     fn port_read(&mut self, _port: u16) -> u8 { 0xFF }
//!     fn port_write(&mut self, _port: u16, _v: u8) {}
//! }
//!
//! let mut ram = Ram([0; 0x10000]);
//! ram.0[..5].copy_from_slice(&[0x3E, 0x05, 0xC6, 0x03, 0x76]); // ld a,5; add a,3; halt
//!
//! let mut cpu = Cpu::new();
//! while !cpu.is_halted() {
//!     assert!(cpu.step(&mut ram) >= 0);
//! }
//! assert_eq!(cpu.reg8(z80_core::Reg8::A, z80_core::Bank::Current), 0x08);
//! ```
//!
//! # Architecture
//!
//! - `bus`: the host-facing memory/I-O seam
//! - `cpu`: register file, flag kernels, decoders, the `step()` driver
//!
//! `step()` returns the T-states consumed, or a negative error code when
//! the decoder meets an undefined encoding; the error is latched until
//! `reset()`. Interrupt *state* (IFF1/IFF2, IM) is tracked, but interrupt
//! delivery scheduling is the embedder's job.

pub mod bus;
pub mod cpu;

pub use bus::{Bus, CallbackBus};
pub use cpu::{Bank, Cpu, Error, InterruptMode, Reg16, Reg8, RegBank};
