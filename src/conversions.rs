// Low-level arithmetic shared by the general executors: signed and logical
// add/subtract with their condition codes, and the multiply/divide helpers
// working on register pairs.

use crate::fields::Cc;

/// Signed add. Condition code 3 means overflow; the wrapped result is still
/// produced because the instruction completes.
pub fn add_signed(a: u32, b: u32) -> (u32, Cc) {
    let (result, overflow) = (a as i32).overflowing_add(b as i32);
    let cc = if overflow {
        Cc::cc_overflow()
    } else {
        Cc::of_sign(result)
    };
    (result as u32, cc)
}

/// Signed subtract, same condition-code convention as `add_signed`.
pub fn sub_signed(a: u32, b: u32) -> (u32, Cc) {
    let (result, overflow) = (a as i32).overflowing_sub(b as i32);
    let cc = if overflow {
        Cc::cc_overflow()
    } else {
        Cc::of_sign(result)
    };
    (result as u32, cc)
}

/// Logical add. Condition code encodes (nonzero, carry).
pub fn add_logical(a: u32, b: u32) -> (u32, Cc) {
    let (result, carry) = a.overflowing_add(b);
    let cc = match (result != 0, carry) {
        (false, false) => Cc::Equal,
        (true, false) => Cc::Low,
        (false, true) => Cc::High,
        (true, true) => Cc::Ovfl,
    };
    (result, cc)
}

/// Logical subtract. Carry means no borrow was needed; a zero result always
/// carries, and a borrow always leaves a nonzero result, so only three
/// condition codes are reachable.
pub fn sub_logical(a: u32, b: u32) -> (u32, Cc) {
    let result = a.wrapping_sub(b);
    let carry = a >= b;
    let cc = match (result != 0, carry) {
        (false, _) => Cc::Equal,
        (true, true) => Cc::High,
        (_, false) => Cc::Ovfl,
    };
    (result, cc)
}

/// 32x32 -> 64 signed multiply, returned as the (high, low) register pair.
pub fn mul_signed(a: u32, b: u32) -> (u32, u32) {
    let product = (a as i32 as i64).wrapping_mul(b as i32 as i64);
    ((product as u64 >> 32) as u32, product as u32)
}

/// Signed divide of a 64-bit dividend by a 32-bit divisor. Returns
/// (remainder, quotient), or `None` when the divisor is zero or the
/// quotient does not fit a register.
pub fn div_signed(dividend: u64, divisor: u32) -> Option<(u32, u32)> {
    if divisor == 0 {
        return None;
    }
    let dividend = dividend as i64;
    let divisor = divisor as i32 as i64;
    let quotient = dividend.wrapping_div(divisor);
    let remainder = dividend.wrapping_rem(divisor);
    if quotient > i32::MAX as i64 || quotient < i32::MIN as i64 {
        return None;
    }
    Some((remainder as u32, quotient as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_add_overflow_sets_cc3() {
        assert_eq!(add_signed(0x7FFF_FFFF, 1), (0x8000_0000, Cc::Ovfl));
        assert_eq!(add_signed(1, 2), (3, Cc::High));
        assert_eq!(add_signed(1, 0xFFFF_FFFF), (0, Cc::Equal));
        assert_eq!(add_signed(0, 0xFFFF_FFFF), (0xFFFF_FFFF, Cc::Low));
    }

    #[test]
    fn logical_add_reports_carry() {
        assert_eq!(add_logical(0, 0), (0, Cc::Equal));
        assert_eq!(add_logical(1, 2), (3, Cc::Low));
        assert_eq!(add_logical(0xFFFF_FFFF, 1), (0, Cc::High));
        assert_eq!(add_logical(0xFFFF_FFFF, 2), (1, Cc::Ovfl));
    }

    #[test]
    fn logical_subtract_reports_borrow() {
        assert_eq!(sub_logical(5, 5), (0, Cc::Equal));
        assert_eq!(sub_logical(4, 5), (0xFFFF_FFFF, Cc::Ovfl));
        assert_eq!(sub_logical(5, 4), (1, Cc::High));
    }

    #[test]
    fn multiply_and_divide_pairs() {
        assert_eq!(mul_signed(0xFFFF_FFFF, 2), (0xFFFF_FFFF, 0xFFFF_FFFE));
        assert_eq!(mul_signed(0x10000, 0x10000), (1, 0));
        assert_eq!(div_signed(100, 7), Some((2, 14)));
        assert_eq!(div_signed(0xFFFF_FFFF_FFFF_FFFF, 1), Some((0, 0xFFFF_FFFF)));
        assert_eq!(div_signed(0x1_0000_0000, 1), None);
        assert_eq!(div_signed(1, 0), None);
    }
}
