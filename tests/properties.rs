// Property checks for the round-trip and normalization invariants: CVD/CVB,
// PACK/UNPK, TR with the identity table, condition-code classification, and
// the hex-float normalization and true-zero rules.

use em390::fields::Cc;
use em390::float::ShortFloat;
use em390::memory::System;
use em390::parser;
use em390::processor::Cpu;
use proptest::prelude::*;

fn cpu() -> Cpu {
    Cpu::new(0, std::sync::Arc::new(System::new(1 << 20, 0, 1)))
}

fn run(cpu: &mut Cpu, inst: &[u8]) {
    parser::execute_instruction(inst, false, cpu).unwrap();
}

proptest! {
    #[test]
    fn cvd_cvb_roundtrip(value in any::<i32>()) {
        let mut cpu = cpu();
        cpu.gpr[5] = value as u32;
        run(&mut cpu, &[0x4E, 0x50, 0x10, 0x00]); // CVD
        cpu.gpr[6] = 0;
        run(&mut cpu, &[0x4F, 0x60, 0x10, 0x00]); // CVB
        prop_assert_eq!(cpu.gpr[6] as i32, value);
    }

    #[test]
    fn pack_unpk_roundtrip(digits in proptest::collection::vec(0u8..10, 1..15)) {
        let mut cpu = cpu();
        let n = digits.len();
        // zoned decimal with a C sign zone on the rightmost byte
        let mut zoned: Vec<u8> = digits.iter().map(|&d| 0xF0 | d).collect();
        zoned[n - 1] = 0xC0 | digits[n - 1];
        cpu.sys.store_abs(0x1000, &zoned);

        let l1 = (n / 2) as u8;
        let l2 = (n - 1) as u8;
        run(&mut cpu, &[0xF2, (l1 << 4) | l2, 0x20, 0x00, 0x10, 0x00]); // PACK
        run(&mut cpu, &[0xF3, (l2 << 4) | l1, 0x30, 0x00, 0x20, 0x00]); // UNPK

        let mut back = vec![0u8; n];
        cpu.sys.fetch_abs(0x3000, &mut back);
        prop_assert_eq!(back, zoned);
    }

    #[test]
    fn tr_identity_is_idempotent(data in proptest::collection::vec(any::<u8>(), 1..=256)) {
        let mut cpu = cpu();
        let table: Vec<u8> = (0..=255u8).collect();
        cpu.sys.store_abs(0x8000, &table);
        cpu.sys.store_abs(0x1000, &data);
        let l = (data.len() - 1) as u8;
        run(&mut cpu, &[0xDC, l, 0x10, 0x00, 0x80, 0x00]);
        let mut back = vec![0u8; data.len()];
        cpu.sys.fetch_abs(0x1000, &mut back);
        prop_assert_eq!(back, data);
    }

    #[test]
    fn signed_add_cc_classifies_the_result(a in any::<u32>(), b in any::<u32>()) {
        let mut cpu = cpu();
        cpu.gpr[1] = a;
        cpu.gpr[2] = b;
        cpu.psw.fomask = false;
        run(&mut cpu, &[0x1A, 0x12]); // AR
        let expected = match (a as i32).checked_add(b as i32) {
            None => Cc::Ovfl,
            Some(0) => Cc::Equal,
            Some(r) if r < 0 => Cc::Low,
            Some(_) => Cc::High,
        };
        prop_assert_eq!(cpu.psw.cc, expected);
    }

    #[test]
    fn logical_add_cc_reports_carry(a in any::<u32>(), b in any::<u32>()) {
        let mut cpu = cpu();
        cpu.gpr[1] = a;
        cpu.gpr[2] = b;
        run(&mut cpu, &[0x1E, 0x12]); // ALR
        let (sum, carry) = a.overflowing_add(b);
        let expected = match (sum != 0, carry) {
            (false, false) => Cc::Equal,
            (true, false) => Cc::Low,
            (false, true) => Cc::High,
            (true, true) => Cc::Ovfl,
        };
        prop_assert_eq!(cpu.psw.cc, expected);
    }

    #[test]
    fn float_add_normalizes_or_produces_true_zero(
        a_sign in any::<bool>(),
        a_expo in 0x30u32..0x50,
        a_fract in 1u32..0x00FF_FFFF,
        b_sign in any::<bool>(),
        b_expo in 0x30u32..0x50,
        b_fract in 1u32..0x00FF_FFFF,
    ) {
        let mut cpu = cpu();
        cpu.psw.sgmask = false;
        cpu.psw.eumask = false;
        cpu.fpr[0] = ((a_sign as u32) << 31) | (a_expo << 24) | a_fract;
        cpu.fpr[2] = ((b_sign as u32) << 31) | (b_expo << 24) | b_fract;
        run(&mut cpu, &[0x3A, 0x02]); // AER

        let result = ShortFloat::from_bits(cpu.fpr[0]);
        if result.fract == 0 {
            // true zero: positive sign, zero characteristic
            prop_assert!(!result.sign);
            prop_assert_eq!(result.expo, 0);
        } else {
            prop_assert_ne!(result.fract & 0x00F0_0000, 0);
        }
    }

    #[test]
    fn float_multiply_true_zero_rule(
        a_bits in any::<u32>(),
        b_expo in 0x20u32..0x60,
        b_fract in 0u32..0x00FF_FFFF,
    ) {
        let mut cpu = cpu();
        cpu.psw.eumask = false;
        // force a zero fraction half the time through b_fract == 0 cases
        cpu.fpr[0] = a_bits & 0x7FFF_FFFF;
        cpu.fpr[2] = (b_expo << 24) | b_fract;
        if parser::execute_instruction(&[0x3C, 0x02], false, &mut cpu).is_ok() {
            // MER leaves a long result; zero fraction must be true zero
            if cpu.fpr[0] & 0x00FF_FFFF == 0 && cpu.fpr[1] == 0 {
                prop_assert_eq!(cpu.fpr[0], 0);
            }
        }
    }
}
