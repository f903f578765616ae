//! 256-bit fixed-width integer
//!
//! Values are four unsigned 64-bit limbs, `l0` least significant. Arithmetic
//! wraps at 256 bits. One bit pattern, every limb equal to the signed 64-bit
//! NaN sentinel (`i64::MIN`), is reserved for NULL and propagates through
//! `add`/`subtract`.

use crate::error::{QueryError, Result};
use arrow::array::{Array, FixedSizeBinaryArray};
use arrow::datatypes::DataType;
use std::fmt;
use std::ops::{AddAssign, SubAssign};
use std::str::FromStr;

/// Signed 64-bit NaN sentinel, stored in every limb of a NULL value
pub const LONG_NULL: u64 = i64::MIN as u64;

/// Bytes per value in a fixed-stride column
pub const WIDE_INT_BYTES: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WideInt256 {
    limbs: [u64; 4],
}

impl WideInt256 {
    pub const NULL: WideInt256 = WideInt256 {
        limbs: [LONG_NULL; 4],
    };

    pub const ZERO: WideInt256 = WideInt256 { limbs: [0; 4] };

    /// Text written for NULL values
    pub const NULL_TEXT: &'static str = "";

    pub const fn new(l0: u64, l1: u64, l2: u64, l3: u64) -> Self {
        Self {
            limbs: [l0, l1, l2, l3],
        }
    }

    pub const fn zero() -> Self {
        Self::ZERO
    }

    #[inline]
    pub fn l0(&self) -> u64 {
        self.limbs[0]
    }

    #[inline]
    pub fn l1(&self) -> u64 {
        self.limbs[1]
    }

    #[inline]
    pub fn l2(&self) -> u64 {
        self.limbs[2]
    }

    #[inline]
    pub fn l3(&self) -> u64 {
        self.limbs[3]
    }

    pub fn limbs(&self) -> [u64; 4] {
        self.limbs
    }

    /// True only for the exact sentinel pattern, never for a partial match
    #[inline]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    pub fn set_all(&mut self, l0: u64, l1: u64, l2: u64, l3: u64) {
        self.limbs = [l0, l1, l2, l3];
    }

    pub fn copy_from(&mut self, other: &WideInt256) {
        self.limbs = other.limbs;
    }

    /// Wrapping 256-bit addition, NULL if either side is NULL
    #[inline]
    pub fn add(&self, other: &WideInt256) -> WideInt256 {
        if self.is_null() || other.is_null() {
            return Self::NULL;
        }
        self.wrapping_add(other)
    }

    /// Limb arithmetic only; the sentinel pattern gets no special treatment
    #[inline]
    pub fn wrapping_add(&self, other: &WideInt256) -> WideInt256 {
        let mut out = [0u64; 4];
        let mut carry = 0u64;
        for (i, slot) in out.iter_mut().enumerate() {
            let x = self.limbs[i];
            let y = other.limbs[i];
            let sum = x.wrapping_add(y).wrapping_add(carry);
            // overflow when both top bits are set, or one is and the carry cleared it
            carry = ((x & y) | ((x | y) & !sum)) >> 63;
            *slot = sum;
        }
        // carry out of l3 is dropped
        WideInt256 { limbs: out }
    }

    /// Wrapping 256-bit subtraction, NULL if either side is NULL
    #[inline]
    pub fn subtract(&self, other: &WideInt256) -> WideInt256 {
        if self.is_null() || other.is_null() {
            return Self::NULL;
        }

        let mut out = [0u64; 4];
        let mut borrow = 0u64;
        for (i, slot) in out.iter_mut().enumerate() {
            let x = self.limbs[i];
            let y = other.limbs[i];
            let diff = x.wrapping_sub(y).wrapping_sub(borrow);
            borrow = ((!x & y) | (!(x ^ y) & diff)) >> 63;
            *slot = diff;
        }
        WideInt256 { limbs: out }
    }

    /// Decode one fixed-stride slot: four little-endian limbs, l0 first
    #[inline]
    pub fn from_le_bytes(bytes: &[u8]) -> WideInt256 {
        debug_assert!(bytes.len() >= WIDE_INT_BYTES);
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            *limb = u64::from_le_bytes(word);
        }
        WideInt256 { limbs }
    }

    pub fn to_le_bytes(&self) -> [u8; WIDE_INT_BYTES] {
        let mut out = [0u8; WIDE_INT_BYTES];
        for (i, limb) in self.limbs.iter().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&limb.to_le_bytes());
        }
        out
    }

    /// Arrow type used for wide integer columns
    pub fn data_type() -> DataType {
        DataType::FixedSizeBinary(WIDE_INT_BYTES as i32)
    }
}

impl From<u64> for WideInt256 {
    fn from(v: u64) -> Self {
        WideInt256::new(v, 0, 0, 0)
    }
}

impl From<u128> for WideInt256 {
    fn from(v: u128) -> Self {
        WideInt256::new(v as u64, (v >> 64) as u64, 0, 0)
    }
}

impl AddAssign for WideInt256 {
    #[inline]
    fn add_assign(&mut self, rhs: WideInt256) {
        *self = WideInt256::add(self, &rhs);
    }
}

impl SubAssign for WideInt256 {
    fn sub_assign(&mut self, rhs: WideInt256) {
        *self = self.subtract(&rhs);
    }
}

impl fmt::Display for WideInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str(Self::NULL_TEXT);
        }

        f.write_str("0x")?;
        let top = match self.limbs.iter().rposition(|&l| l != 0) {
            Some(i) => i,
            None => return f.write_str("0"),
        };
        write!(f, "{:x}", self.limbs[top])?;
        for limb in self.limbs[..top].iter().rev() {
            write!(f, "{:016x}", limb)?;
        }
        Ok(())
    }
}

impl fmt::Debug for WideInt256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("WideInt256(NULL)");
        }
        write!(f, "WideInt256({})", self)
    }
}

impl FromStr for WideInt256 {
    type Err = QueryError;

    /// Parses `0x`-prefixed hex; the empty string is NULL
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(WideInt256::NULL);
        }

        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| QueryError::Parse(format!("Invalid long256 literal: {}", s)))?;

        if digits.is_empty() || digits.len() > 64 {
            return Err(QueryError::Parse(format!(
                "Invalid long256 literal length: {}",
                s
            )));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(QueryError::Parse(format!("Invalid long256 literal: {}", s)));
        }

        let mut limbs = [0u64; 4];
        let mut end = digits.len();
        for limb in limbs.iter_mut() {
            if end == 0 {
                break;
            }
            let start = end.saturating_sub(16);
            *limb = u64::from_str_radix(&digits[start..end], 16)
                .map_err(|e| QueryError::Parse(format!("Invalid long256 literal {}: {}", s, e)))?;
            end = start;
        }
        Ok(WideInt256 { limbs })
    }
}

/// Read row `i` of a wide integer column; Arrow null slots read as NULL
#[inline]
pub fn wide_int_value(array: &FixedSizeBinaryArray, i: usize) -> WideInt256 {
    if array.is_null(i) {
        WideInt256::NULL
    } else {
        WideInt256::from_le_bytes(array.value(i))
    }
}

/// Build an Arrow column, writing NULL values as null slots
pub fn wide_int_array<I>(values: I) -> Result<FixedSizeBinaryArray>
where
    I: IntoIterator<Item = WideInt256>,
{
    let iter = values.into_iter().map(|v| {
        if v.is_null() {
            None
        } else {
            Some(v.to_le_bytes())
        }
    });
    Ok(FixedSizeBinaryArray::try_from_sparse_iter_with_size(
        iter,
        WIDE_INT_BYTES as i32,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_carries_into_next_limb() {
        let a = WideInt256::new(1, 0, 0, 0);
        let b = WideInt256::new(u64::MAX, 0, 0, 0);
        assert_eq!(a.add(&b), WideInt256::new(0, 1, 0, 0));
    }

    #[test]
    fn test_add_wraps_at_256_bits() {
        let max = WideInt256::new(u64::MAX, u64::MAX, u64::MAX, u64::MAX);
        assert_eq!(max.add(&WideInt256::from(1u64)), WideInt256::ZERO);
    }

    #[test]
    fn test_sub_borrows_across_limbs() {
        let a = WideInt256::new(0, 0, 1, 0);
        let b = WideInt256::from(1u64);
        assert_eq!(a.subtract(&b), WideInt256::new(u64::MAX, u64::MAX, 0, 0));

        let wrapped = WideInt256::ZERO.subtract(&b);
        assert_eq!(
            wrapped,
            WideInt256::new(u64::MAX, u64::MAX, u64::MAX, u64::MAX)
        );
    }

    #[test]
    fn test_null_propagation() {
        let x = WideInt256::from(42u64);
        assert!(x.add(&WideInt256::NULL).is_null());
        assert!(WideInt256::NULL.add(&x).is_null());
        assert!(x.subtract(&WideInt256::NULL).is_null());
        assert!(WideInt256::NULL.subtract(&WideInt256::NULL).is_null());
    }

    #[test]
    fn test_partial_sentinel_is_not_null() {
        let v = WideInt256::new(LONG_NULL, LONG_NULL, LONG_NULL, 0);
        assert!(!v.is_null());
        assert_eq!(v.add(&WideInt256::ZERO), v);
    }

    #[test]
    fn test_wrapping_add_ignores_sentinel() {
        let almost = WideInt256::new(LONG_NULL, LONG_NULL, LONG_NULL, LONG_NULL - 1);
        let hit = almost.wrapping_add(&WideInt256::new(0, 0, 0, 1));
        assert!(hit.is_null());
        assert_eq!(
            WideInt256::NULL.wrapping_add(&WideInt256::from(1u64)),
            WideInt256::new(LONG_NULL + 1, LONG_NULL, LONG_NULL, LONG_NULL)
        );
    }

    #[test]
    fn test_in_place_updates() {
        let mut v = WideInt256::zero();
        v.set_all(1, 2, 3, 4);
        assert_eq!(v, WideInt256::new(1, 2, 3, 4));
        assert_eq!(v.limbs(), [1, 2, 3, 4]);

        let mut w = WideInt256::NULL;
        w.copy_from(&v);
        assert_eq!(w, v);
        w += WideInt256::from(1u64);
        assert_eq!(w.l0(), 2);
        w -= v;
        assert_eq!(w, WideInt256::from(1u64));
    }

    #[test]
    fn test_display() {
        assert_eq!(WideInt256::ZERO.to_string(), "0x0");
        assert_eq!(WideInt256::from(255u64).to_string(), "0xff");
        assert_eq!(
            WideInt256::new(1, 2, 0, 0).to_string(),
            "0x20000000000000001"
        );
        assert_eq!(WideInt256::NULL.to_string(), "");
    }

    #[test]
    fn test_parse() {
        let v: WideInt256 = "0x20000000000000001".parse().unwrap();
        assert_eq!(v, WideInt256::new(1, 2, 0, 0));

        let v: WideInt256 = "0XFF".parse().unwrap();
        assert_eq!(v, WideInt256::from(255u64));

        assert!("".parse::<WideInt256>().unwrap().is_null());
        assert!("ff".parse::<WideInt256>().is_err());
        assert!("0x".parse::<WideInt256>().is_err());
        assert!("0xzz".parse::<WideInt256>().is_err());
        assert!(format!("0x{}", "1".repeat(65)).parse::<WideInt256>().is_err());
    }

    #[test]
    fn test_le_bytes() {
        let v = WideInt256::new(1, 2, 3, 4);
        let bytes = v.to_le_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[8], 2);
        assert_eq!(bytes[24], 4);
        assert_eq!(WideInt256::from_le_bytes(&bytes), v);
    }

    #[test]
    fn test_arrow_column_nulls() {
        let array = wide_int_array(vec![
            WideInt256::from(7u64),
            WideInt256::NULL,
            WideInt256::new(0, 0, 0, 9),
        ])
        .unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array.value_length(), 32);
        assert!(array.is_null(1));
        assert_eq!(wide_int_value(&array, 0), WideInt256::from(7u64));
        assert!(wide_int_value(&array, 1).is_null());
        assert_eq!(wide_int_value(&array, 2), WideInt256::new(0, 0, 0, 9));
    }
}
