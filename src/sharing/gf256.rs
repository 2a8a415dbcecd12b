//! Arithmetic in GF(2^8) modulo the AES polynomial x^8 + x^4 + x^3 + x + 1.
//!
//! Branch-free so timing does not depend on share or secret bytes.

/// Addition and subtraction are both XOR.
#[inline]
pub(crate) fn add(a: u8, b: u8) -> u8 {
    a ^ b
}

/// Carry-less multiply with reduction by 0x1b.
pub(crate) fn mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    for _ in 0..8 {
        product ^= a & 0u8.wrapping_sub(b & 1);
        let carry = a >> 7;
        a <<= 1;
        a ^= 0x1b & 0u8.wrapping_sub(carry);
        b >>= 1;
    }
    product
}

/// Multiplicative inverse as `a^254`. Maps 0 to 0; callers never pass 0.
pub(crate) fn inv(a: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u8;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul(result, base);
        }
        base = mul(base, base);
        exp >>= 1;
    }
    result
}

/// Evaluate `coefficients[0] + coefficients[1] x + ...` at `x` (Horner).
pub(crate) fn eval(coefficients: impl DoubleEndedIterator<Item = u8>, x: u8) -> u8 {
    coefficients.rev().fold(0u8, |acc, c| add(mul(acc, x), c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_products() {
        // FIPS-197 worked example: {57} * {83} = {c1}
        assert_eq!(mul(0x57, 0x83), 0xc1);
        assert_eq!(mul(0x57, 0x13), 0xfe);
        assert_eq!(mul(0, 0xff), 0);
        assert_eq!(mul(1, 0xab), 0xab);
    }

    #[test]
    fn test_every_nonzero_element_has_inverse() {
        for a in 1..=255u8 {
            assert_eq!(mul(a, inv(a)), 1, "inverse failed for {a:#04x}");
        }
    }

    #[test]
    fn test_eval_constant_term_at_zero() {
        let coeffs = [0x42u8, 0x10, 0x99];
        assert_eq!(eval(coeffs.iter().copied(), 0), 0x42);
        // x = 1: sum of coefficients
        assert_eq!(eval(coeffs.iter().copied(), 1), 0x42 ^ 0x10 ^ 0x99);
    }
}
