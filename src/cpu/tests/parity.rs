//! Systematic flag-formula verification.
//!
//! These tests sweep the pure flag kernels and the ALU instructions over
//! boundary values (0x00, 0x01, 0x0F, 0x10, 0x7F, 0x80, 0x81, 0xFF) and,
//! where cheap, the full 8-bit range, comparing against independently
//! computed models:
//!
//! - Parity against popcount
//! - carry_from/borrow_from against widened arithmetic
//! - Signed overflow against i16 range checks
//! - ADD/SUB/INC/DEC flags against reference flag calculators
//! - Y/X result-bit copies after every ALU and rotate form

use super::*;

const EDGES: [u8; 8] = [0x00, 0x01, 0x0F, 0x10, 0x7F, 0x80, 0x81, 0xFF];

// ========== Reference Flag Calculators ==========

/// Expected flags for ADD A,v (+carry-in).
fn calc_add_flags(a: u8, v: u8, carry_in: u8) -> (u8, u8) {
    let wide = a as u16 + v as u16 + carry_in as u16;
    let result = wide as u8;

    let mut f = result & (flags::S | flags::Y | flags::X);
    if result == 0 {
        f |= flags::Z;
    }
    if (a & 0x0F) + (v & 0x0F) + carry_in > 0x0F {
        f |= flags::H;
    }
    let signed = a as i8 as i16 + v as i8 as i16 + carry_in as i16;
    if !(-128..=127).contains(&signed) {
        f |= flags::PV;
    }
    if wide > 0xFF {
        f |= flags::C;
    }
    (result, f)
}

/// Expected flags for SUB A,v (+borrow-in).
fn calc_sub_flags(a: u8, v: u8, carry_in: u8) -> (u8, u8) {
    let result = a.wrapping_sub(v).wrapping_sub(carry_in);

    let mut f = (result & (flags::S | flags::Y | flags::X)) | flags::N;
    if result == 0 {
        f |= flags::Z;
    }
    if (a & 0x0F) < (v & 0x0F) + carry_in {
        f |= flags::H;
    }
    let signed = a as i8 as i16 - v as i8 as i16 - carry_in as i16;
    if !(-128..=127).contains(&signed) {
        f |= flags::PV;
    }
    if (a as u16) < v as u16 + carry_in as u16 {
        f |= flags::C;
    }
    (result, f)
}

/// Run a single two-byte instruction with preset A and F.
fn exec_imm(opcode: u8, operand: u8, a: u8, f: u8) -> Cpu {
    let (mut cpu, mut bus) = setup(&[opcode, operand]);
    cpu.set_a(a);
    cpu.set_f(f);
    cpu.step(&mut bus);
    cpu
}

// ========== Pure Kernels ==========

#[test]
fn test_parity_matches_popcount() {
    for v in 0..=255u8 {
        assert_eq!(
            flags::parity(v),
            v.count_ones() % 2 == 0,
            "parity({v:#04x})"
        );
    }
}

#[test]
fn test_carry_from_bit8_matches_wide_sum() {
    for &a in &EDGES {
        for &b in &EDGES {
            for c in 0..=1u32 {
                let expected = (a as u32 + b as u32 + c) >> 8 != 0;
                assert_eq!(
                    flags::carry_from(8, a as u32, b as u32, c),
                    expected,
                    "carry_from(8, {a:#04x}, {b:#04x}, {c})"
                );
            }
        }
    }
}

#[test]
fn test_carry_from_bit4_matches_nibble_sum() {
    for a in 0..=255u32 {
        for c in 0..=1u32 {
            for &b in &EDGES {
                let expected = (a & 0x0F) + (b as u32 & 0x0F) + c > 0x0F;
                assert_eq!(flags::carry_from(4, a, b as u32, c), expected);
            }
        }
    }
}

#[test]
fn test_borrow_from_matches_wide_difference() {
    for &a in &EDGES {
        for &b in &EDGES {
            for c in 0..=1u32 {
                let expected = (a as i32) - (b as i32) - (c as i32) < 0;
                assert_eq!(
                    flags::borrow_from(8, a as u32, b as u32, c),
                    expected,
                    "borrow_from(8, {a:#04x}, {b:#04x}, {c})"
                );
            }
        }
    }
}

#[test]
fn test_borrow_from_bit4_half_borrow() {
    // The classic SBC corner: 0x10 - 0x0F - 1 borrows through bit 4
    assert!(flags::borrow_from(4, 0x10, 0x0F, 1));
    assert!(!flags::borrow_from(4, 0x10, 0x0F, 0));
    assert!(flags::borrow_from(4, 0x00, 0x01, 0));
}

#[test]
fn test_overflow_add_matches_signed_range() {
    for &a in &EDGES {
        for &b in &EDGES {
            for c in 0..=1u8 {
                let signed = a as i8 as i16 + b as i8 as i16 + c as i16;
                let expected = !(-128..=127).contains(&signed);
                assert_eq!(
                    flags::overflow_add(a, b, c),
                    expected,
                    "overflow_add({a:#04x}, {b:#04x}, {c})"
                );
            }
        }
    }
}

#[test]
fn test_overflow_sub_matches_signed_range() {
    for &a in &EDGES {
        for &b in &EDGES {
            for c in 0..=1u8 {
                let signed = a as i8 as i16 - b as i8 as i16 - c as i16;
                let expected = !(-128..=127).contains(&signed);
                assert_eq!(
                    flags::overflow_sub(a, b, c),
                    expected,
                    "overflow_sub({a:#04x}, {b:#04x}, {c})"
                );
            }
        }
    }
}

// ========== ADD/ADC/SUB/SBC Sweeps ==========

#[test]
fn test_add_flags_over_boundary_grid() {
    for &a in &EDGES {
        for &v in &EDGES {
            let (expected_a, expected_f) = calc_add_flags(a, v, 0);
            let cpu = exec_imm(0xC6, v, a, 0); // add a,v
            assert_eq!(cpu.a(), expected_a, "add {a:#04x}+{v:#04x} result");
            assert_flags(&cpu, expected_f, &format!("add {a:#04x}+{v:#04x}"));
        }
    }
}

#[test]
fn test_adc_flags_over_boundary_grid() {
    for &a in &EDGES {
        for &v in &EDGES {
            for carry in 0..=1u8 {
                let (expected_a, expected_f) = calc_add_flags(a, v, carry);
                let f_in = if carry != 0 { flags::C } else { 0 };
                let cpu = exec_imm(0xCE, v, a, f_in); // adc a,v
                assert_eq!(cpu.a(), expected_a);
                assert_flags(
                    &cpu,
                    expected_f,
                    &format!("adc {a:#04x}+{v:#04x}+{carry}"),
                );
            }
        }
    }
}

#[test]
fn test_sub_flags_over_boundary_grid() {
    for &a in &EDGES {
        for &v in &EDGES {
            let (expected_a, expected_f) = calc_sub_flags(a, v, 0);
            let cpu = exec_imm(0xD6, v, a, 0); // sub v
            assert_eq!(cpu.a(), expected_a, "sub {a:#04x}-{v:#04x} result");
            assert_flags(&cpu, expected_f, &format!("sub {a:#04x}-{v:#04x}"));
        }
    }
}

#[test]
fn test_sbc_flags_over_boundary_grid() {
    for &a in &EDGES {
        for &v in &EDGES {
            for carry in 0..=1u8 {
                let (expected_a, expected_f) = calc_sub_flags(a, v, carry);
                let f_in = if carry != 0 { flags::C } else { 0 };
                let cpu = exec_imm(0xDE, v, a, f_in); // sbc a,v
                assert_eq!(cpu.a(), expected_a);
                assert_flags(
                    &cpu,
                    expected_f,
                    &format!("sbc {a:#04x}-{v:#04x}-{carry}"),
                );
            }
        }
    }
}

#[test]
fn test_cp_flags_differ_from_sub_only_in_yx() {
    for &a in &EDGES {
        for &v in &EDGES {
            let (_, sub_f) = calc_sub_flags(a, v, 0);
            let expected_f = (sub_f & !(flags::Y | flags::X)) | (v & (flags::Y | flags::X));
            let cpu = exec_imm(0xFE, v, a, 0); // cp v
            assert_eq!(cpu.a(), a, "cp must not modify A");
            assert_flags(&cpu, expected_f, &format!("cp {a:#04x},{v:#04x}"));
        }
    }
}

// ========== INC/DEC Full-Range Sweeps ==========

#[test]
fn test_inc_flags_full_range() {
    for v in 0..=255u8 {
        for carry in 0..=1u8 {
            let result = v.wrapping_add(1);
            let mut expected = result & (flags::S | flags::Y | flags::X);
            if result == 0 {
                expected |= flags::Z;
            }
            if v & 0x0F == 0x0F {
                expected |= flags::H;
            }
            if v == 0x7F {
                expected |= flags::PV;
            }
            if carry != 0 {
                expected |= flags::C; // carry must survive inc
            }

            let (mut cpu, mut bus) = setup(&[0x04]); // inc b
            cpu.set_b(v);
            cpu.set_f(if carry != 0 { flags::C } else { 0 });
            cpu.step(&mut bus);
            assert_eq!(cpu.b(), result);
            assert_flags(&cpu, expected, &format!("inc {v:#04x} (c={carry})"));
        }
    }
}

#[test]
fn test_dec_flags_full_range() {
    for v in 0..=255u8 {
        let result = v.wrapping_sub(1);
        let mut expected = (result & (flags::S | flags::Y | flags::X)) | flags::N;
        if result == 0 {
            expected |= flags::Z;
        }
        if v & 0x0F == 0x00 {
            expected |= flags::H;
        }
        if v == 0x80 {
            expected |= flags::PV;
        }

        let (mut cpu, mut bus) = setup(&[0x05]); // dec b
        cpu.set_b(v);
        cpu.step(&mut bus);
        assert_eq!(cpu.b(), result);
        assert_flags(&cpu, expected, &format!("dec {v:#04x}"));
    }
}

// ========== Logical Op Sweeps ==========

#[test]
fn test_and_or_xor_parity_and_yx() {
    for &a in &EDGES {
        for &v in &EDGES {
            for (opcode, op) in [
                (0xE6u8, (a & v)),
                (0xF6u8, (a | v)),
                (0xEEu8, (a ^ v)),
            ] {
                let mut expected = op & (flags::S | flags::Y | flags::X);
                if op == 0 {
                    expected |= flags::Z;
                }
                if flags::parity(op) {
                    expected |= flags::PV;
                }
                if opcode == 0xE6 {
                    expected |= flags::H; // only AND sets H
                }
                let cpu = exec_imm(opcode, v, a, flags::C); // carry must clear
                assert_eq!(cpu.a(), op);
                assert_flags(
                    &cpu,
                    expected,
                    &format!("logical {opcode:#04x} {a:#04x},{v:#04x}"),
                );
            }
        }
    }
}

// ========== Rotate/Shift Model Sweep ==========

/// Reference model for the CB rotate group (y = 0..7).
fn calc_rot(y: u8, val: u8, carry_in: bool) -> (u8, bool) {
    match y {
        0 => ((val << 1) | (val >> 7), val & 0x80 != 0),
        1 => ((val >> 1) | (val << 7), val & 0x01 != 0),
        2 => ((val << 1) | carry_in as u8, val & 0x80 != 0),
        3 => ((val >> 1) | ((carry_in as u8) << 7), val & 0x01 != 0),
        4 => (val << 1, val & 0x80 != 0),
        5 => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
        6 => ((val << 1) | 1, val & 0x80 != 0),
        _ => (val >> 1, val & 0x01 != 0),
    }
}

#[test]
fn test_cb_rotates_full_range() {
    for y in 0..8u8 {
        for v in 0..=255u8 {
            for carry_in in [false, true] {
                let (expected_v, expected_c) = calc_rot(y, v, carry_in);
                let mut expected = expected_v & (flags::S | flags::Y | flags::X);
                if expected_v == 0 {
                    expected |= flags::Z;
                }
                if flags::parity(expected_v) {
                    expected |= flags::PV;
                }
                if expected_c {
                    expected |= flags::C;
                }

                let opcode = (y << 3) | 0x00; // target B
                let (mut cpu, mut bus) = setup(&[0xCB, opcode]);
                cpu.set_b(v);
                cpu.set_f(if carry_in { flags::C } else { 0 });
                cpu.step(&mut bus);
                assert_eq!(cpu.b(), expected_v, "rot y={y} v={v:#04x}");
                assert_flags(&cpu, expected, &format!("rot y={y} v={v:#04x} c={carry_in}"));
            }
        }
    }
}

// ========== BIT Sweep ==========

#[test]
fn test_bit_full_range() {
    for y in 0..8u8 {
        for v in [0x00u8, 0x01, 0x55, 0xAA, 0xFF, 1u8 << y] {
            let bit = v & (1 << y);
            let mut expected = flags::H | (v & (flags::Y | flags::X));
            if bit == 0 {
                expected |= flags::Z | flags::PV;
            }
            if y == 7 && bit != 0 {
                expected |= flags::S;
            }

            let opcode = 0x40 | (y << 3); // bit y,b
            let (mut cpu, mut bus) = setup(&[0xCB, opcode]);
            cpu.set_b(v);
            cpu.step(&mut bus);
            assert_flags(&cpu, expected, &format!("bit {y},{v:#04x}"));
        }
    }
}

// ========== Y/X Invariant ==========

#[test]
fn test_yx_track_result_bits_after_alu() {
    // For every add-family result the undocumented flags must equal the
    // result's bits 5 and 3.
    for &a in &EDGES {
        for &v in &EDGES {
            let cpu = exec_imm(0xC6, v, a, 0);
            let result = cpu.a();
            assert_eq!(cpu.f() & flags::Y, result & flags::Y);
            assert_eq!(cpu.f() & flags::X, result & flags::X);
        }
    }
}
