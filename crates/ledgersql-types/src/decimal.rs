//! Bounded-scale arbitrary-precision decimals.
//!
//! All constant arithmetic in the engine runs over [`Decimal`] before being
//! down-cast into a concrete column type's byte width. The value is a signed
//! big integer mantissa plus a base-10 scale: `value = mantissa * 10^-scale`.
//! Both halves are bounded (±200 integer digits, 200 fractional digits) so a
//! hostile expression cannot grow unbounded intermediate state.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use thiserror::Error;

/// Maximum number of integer (pre-point) digits a decimal may carry.
pub const MAX_INTEGER_DIGITS: usize = 200;

/// Maximum number of fractional (post-point) digits a decimal may carry.
pub const MAX_FRACTIONAL_DIGITS: u32 = 200;

/// Errors from decimal construction and arithmetic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecimalError {
    /// The integer part exceeds [`MAX_INTEGER_DIGITS`] digits.
    #[error("decimal exceeds {MAX_INTEGER_DIGITS} integer digits")]
    TooManyIntegerDigits,

    /// The requested scale exceeds [`MAX_FRACTIONAL_DIGITS`].
    #[error("decimal scale {0} exceeds {MAX_FRACTIONAL_DIGITS}")]
    ScaleOverflow(u32),

    /// Division or modulo by zero.
    #[error("decimal division by zero")]
    DividedByZero,

    /// The input string is not a decimal literal.
    #[error("malformed decimal literal: {0:?}")]
    Malformed(String),
}

/// A signed decimal with bounded scale.
///
/// Ordering, equality, and hashing are *semantic*: `1.50` equals `1.5`.
#[derive(Debug, Clone)]
pub struct Decimal {
    mantissa: BigInt,
    scale: u32,
}

/// `10^n` as a `BigInt`.
fn ten_pow(n: u32) -> BigInt {
    BigInt::from(10u32).pow(n)
}

/// Number of base-10 digits in `|v|` (0 counts as one digit).
fn digit_count(v: &BigInt) -> usize {
    if v.is_zero() {
        1
    } else {
        v.magnitude().to_str_radix(10).len()
    }
}

impl Decimal {
    /// Construct from raw mantissa and scale, validating both bounds.
    pub fn new(mantissa: BigInt, scale: u32) -> Result<Self, DecimalError> {
        if scale > MAX_FRACTIONAL_DIGITS {
            return Err(DecimalError::ScaleOverflow(scale));
        }
        let out = Self { mantissa, scale };
        if out.integer_digits() > MAX_INTEGER_DIGITS {
            return Err(DecimalError::TooManyIntegerDigits);
        }
        Ok(out)
    }

    /// The zero value.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            mantissa: BigInt::zero(),
            scale: 0,
        }
    }

    /// The value one.
    #[must_use]
    pub fn one() -> Self {
        Self::from_i64(1)
    }

    /// Construct an integer-valued decimal from an `i64`.
    #[must_use]
    pub fn from_i64(v: i64) -> Self {
        Self {
            mantissa: BigInt::from(v),
            scale: 0,
        }
    }

    /// Construct an integer-valued decimal from a `u64`.
    #[must_use]
    pub fn from_u64(v: u64) -> Self {
        Self {
            mantissa: BigInt::from(v),
            scale: 0,
        }
    }

    /// Construct an integer-valued decimal from a big integer.
    pub fn from_bigint(v: BigInt) -> Result<Self, DecimalError> {
        Self::new(v, 0)
    }

    /// The raw mantissa.
    #[must_use]
    pub fn mantissa(&self) -> &BigInt {
        &self.mantissa
    }

    /// The base-10 scale.
    #[must_use]
    pub const fn scale(&self) -> u32 {
        self.scale
    }

    /// Whether the value is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.mantissa.is_zero()
    }

    /// Whether the value is strictly negative.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.mantissa.is_negative()
    }

    /// Whether the value has no fractional part.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        self.scale == 0 || (&self.mantissa % ten_pow(self.scale)).is_zero()
    }

    /// Number of digits in the integer part.
    #[must_use]
    pub fn integer_digits(&self) -> usize {
        let int_part = &self.mantissa / ten_pow(self.scale);
        if int_part.is_zero() {
            1
        } else {
            digit_count(&int_part)
        }
    }

    /// The mantissa this value would have at `scale`, truncating toward zero
    /// when digits are dropped.
    #[must_use]
    pub fn to_scaled_int(&self, scale: u32) -> BigInt {
        match scale.cmp(&self.scale) {
            Ordering::Equal => self.mantissa.clone(),
            Ordering::Greater => &self.mantissa * ten_pow(scale - self.scale),
            // BigInt division truncates toward zero, matching the contract.
            Ordering::Less => &self.mantissa / ten_pow(self.scale - scale),
        }
    }

    /// Re-express at `scale`, truncating toward zero.
    pub fn rescale_trunc(&self, scale: u32) -> Result<Self, DecimalError> {
        Self::new(self.to_scaled_int(scale), scale)
    }

    /// The value as `u64`, if integral and in range.
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        if !self.is_integral() {
            return None;
        }
        self.to_scaled_int(0).to_u64()
    }

    /// Negation. Never overflows the digit bounds.
    #[must_use]
    pub fn neg(&self) -> Self {
        Self {
            mantissa: -&self.mantissa,
            scale: self.scale,
        }
    }

    fn aligned(&self, other: &Self) -> (BigInt, BigInt, u32) {
        let scale = self.scale.max(other.scale);
        (
            self.to_scaled_int(scale),
            other.to_scaled_int(scale),
            scale,
        )
    }

    /// Checked addition.
    pub fn checked_add(&self, other: &Self) -> Result<Self, DecimalError> {
        let (a, b, scale) = self.aligned(other);
        Self::new(a + b, scale)
    }

    /// Checked subtraction.
    pub fn checked_sub(&self, other: &Self) -> Result<Self, DecimalError> {
        let (a, b, scale) = self.aligned(other);
        Self::new(a - b, scale)
    }

    /// Checked multiplication. The result scale is the sum of the input
    /// scales, truncated back to [`MAX_FRACTIONAL_DIGITS`] when it exceeds
    /// the bound.
    pub fn checked_mul(&self, other: &Self) -> Result<Self, DecimalError> {
        let mantissa = &self.mantissa * &other.mantissa;
        let scale = self.scale + other.scale;
        if scale > MAX_FRACTIONAL_DIGITS {
            let m = mantissa / ten_pow(scale - MAX_FRACTIONAL_DIGITS);
            Self::new(m, MAX_FRACTIONAL_DIGITS)
        } else {
            Self::new(mantissa, scale)
        }
    }

    /// Checked division, truncating toward zero at the wider input scale.
    pub fn checked_div(&self, other: &Self) -> Result<Self, DecimalError> {
        if other.is_zero() {
            return Err(DecimalError::DividedByZero);
        }
        let scale = self.scale.max(other.scale);
        // a/b at target scale t: mantissa = A * 10^(t + bs - as) / B.
        let num = &self.mantissa * ten_pow(scale + other.scale - self.scale);
        Self::new(num / &other.mantissa, scale)
    }

    /// Checked remainder: `a - b * trunc(a / b)`.
    pub fn checked_rem(&self, other: &Self) -> Result<Self, DecimalError> {
        if other.is_zero() {
            return Err(DecimalError::DividedByZero);
        }
        let (a, b, scale) = self.aligned(other);
        let q = &a / &b;
        Self::new(a - b * q, scale)
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

impl std::hash::Hash for Decimal {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash the canonical (trailing-zero-free) form so semantic equals
        // hash identically.
        let mut m = self.mantissa.clone();
        let mut s = self.scale;
        let ten = BigInt::from(10u32);
        while s > 0 && (&m % &ten).is_zero() {
            m /= &ten;
            s -= 1;
        }
        m.hash(state);
        s.hash(state);
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let sign = if self.mantissa.is_negative() { "-" } else { "" };
        let digits = self.mantissa.magnitude().to_str_radix(10);
        let scale = self.scale as usize;
        let (int_part, frac_part) = if digits.len() > scale {
            let (i, fr) = digits.split_at(digits.len() - scale);
            (i.to_owned(), fr.to_owned())
        } else {
            ("0".to_owned(), format!("{digits:0>scale$}"))
        };
        let frac_trimmed = frac_part.trim_end_matches('0');
        if frac_trimmed.is_empty() {
            write!(f, "{sign}{int_part}")
        } else {
            write!(f, "{sign}{int_part}.{frac_trimmed}")
        }
    }
}

impl FromStr for Decimal {
    type Err = DecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || DecimalError::Malformed(s.to_owned());
        let (sign, body) = match s.as_bytes().first() {
            Some(b'-') => (-1, &s[1..]),
            Some(b'+') => (1, &s[1..]),
            _ => (1, s),
        };
        if body.is_empty() {
            return Err(malformed());
        }
        let (int_str, frac_str) = match body.split_once('.') {
            Some((i, fr)) => (i, fr),
            None => (body, ""),
        };
        if int_str.is_empty() && frac_str.is_empty() {
            return Err(malformed());
        }
        if !int_str.bytes().all(|b| b.is_ascii_digit())
            || !frac_str.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }
        let scale = u32::try_from(frac_str.len()).map_err(|_| malformed())?;
        if scale > MAX_FRACTIONAL_DIGITS {
            return Err(DecimalError::ScaleOverflow(scale));
        }
        let mut digits = String::with_capacity(int_str.len() + frac_str.len());
        digits.push_str(int_str);
        digits.push_str(frac_str);
        let mantissa =
            BigInt::parse_bytes(digits.as_bytes(), 10).ok_or_else(malformed)? * BigInt::from(sign);
        Self::new(mantissa, scale)
    }
}

impl serde::Serialize for Decimal {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Decimal {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(dec("0").to_string(), "0");
        assert_eq!(dec("-12.340").to_string(), "-12.34");
        assert_eq!(dec("0.005").to_string(), "0.005");
        assert_eq!(dec("+7").to_string(), "7");
        assert!("".parse::<Decimal>().is_err());
        assert!(".".parse::<Decimal>().is_err());
        assert!("1.2.3".parse::<Decimal>().is_err());
        assert!("1e5".parse::<Decimal>().is_err());
    }

    #[test]
    fn semantic_equality() {
        assert_eq!(dec("1.50"), dec("1.5"));
        assert_eq!(dec("-0.0"), dec("0"));
        assert!(dec("2") > dec("1.999"));
        assert!(dec("-3") < dec("-2.5"));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(dec("1.5").checked_add(&dec("2.25")).unwrap(), dec("3.75"));
        assert_eq!(dec("1").checked_sub(&dec("2.5")).unwrap(), dec("-1.5"));
        assert_eq!(dec("1.5").checked_mul(&dec("-2")).unwrap(), dec("-3"));
        assert_eq!(dec("7").checked_div(&dec("2")).unwrap(), dec("3"));
        assert_eq!(dec("7.0").checked_div(&dec("2")).unwrap(), dec("3.5"));
        assert_eq!(dec("7").checked_rem(&dec("3")).unwrap(), dec("1"));
        assert_eq!(dec("-7").checked_rem(&dec("3")).unwrap(), dec("-1"));
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(
            dec("1").checked_div(&dec("0")),
            Err(DecimalError::DividedByZero)
        );
        assert_eq!(
            dec("1").checked_rem(&dec("0.0")),
            Err(DecimalError::DividedByZero)
        );
    }

    #[test]
    fn division_truncates_toward_zero() {
        assert_eq!(dec("-7").checked_div(&dec("2")).unwrap(), dec("-3"));
        assert_eq!(dec("-7.5").checked_div(&dec("2")).unwrap(), dec("-3.7"));
    }

    #[test]
    fn scaled_int_truncation() {
        assert_eq!(dec("1.29").to_scaled_int(1), BigInt::from(12));
        assert_eq!(dec("-1.29").to_scaled_int(1), BigInt::from(-12));
        assert_eq!(dec("3").to_scaled_int(2), BigInt::from(300));
    }

    #[test]
    fn digit_bounds() {
        let big = "9".repeat(MAX_INTEGER_DIGITS);
        assert!(big.parse::<Decimal>().is_ok());
        let too_big = "9".repeat(MAX_INTEGER_DIGITS + 1);
        assert_eq!(
            too_big.parse::<Decimal>(),
            Err(DecimalError::TooManyIntegerDigits)
        );
        let deep = format!("0.{}", "9".repeat(MAX_FRACTIONAL_DIGITS as usize + 1));
        assert!(matches!(
            deep.parse::<Decimal>(),
            Err(DecimalError::ScaleOverflow(_))
        ));
    }

    #[test]
    fn integral_check() {
        assert!(dec("5.00").is_integral());
        assert!(!dec("5.01").is_integral());
        assert_eq!(dec("5.00").to_u64(), Some(5));
        assert_eq!(dec("5.01").to_u64(), None);
        assert_eq!(dec("-1").to_u64(), None);
    }
}
