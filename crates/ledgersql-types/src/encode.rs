//! Decimal ⇄ byte conversions.
//!
//! Numeric values are stored big-endian at their type's exact byte width:
//! two's-complement for the signed families, plain unsigned otherwise, with
//! fixed-point values pre-scaled by `10^minor`. Encoding a value outside the
//! type's range is defined to wrap at the type width (the caller is expected
//! to range-check first; the checker's warned-crop path and the CAST opcode
//! rely on the wrap being exact). Decoding always succeeds for input of the
//! correct width.

use num_bigint::{BigInt, Sign};
use num_traits::{One, Zero};

use crate::{DataType, Decimal, TypeError, TypeFamily};

/// `value mod 2^(8*width)`, always non-negative.
fn wrap_to_width(value: &BigInt, width: usize) -> BigInt {
    let modulus: BigInt = BigInt::one() << (8 * width);
    ((value % &modulus) + &modulus) % &modulus
}

/// Encode a decimal into the byte representation of `dt`.
///
/// # Errors
///
/// Returns [`TypeError::NotNumeric`] for the byte families; those are stored
/// as raw bytes and never pass through the decimal path.
pub fn decimal_encode(dt: DataType, value: &Decimal) -> Result<Vec<u8>, TypeError> {
    match dt.family() {
        TypeFamily::Bytes | TypeFamily::DynamicBytes => return Err(TypeError::NotNumeric(dt)),
        TypeFamily::Bool => {
            return Ok(vec![u8::from(!value.is_zero())]);
        }
        _ => {}
    }
    let width = dt.size();
    let scaled = value.to_scaled_int(dt.scale());
    let wrapped = wrap_to_width(&scaled, width);
    let bytes = wrapped.to_bytes_be().1;
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Decode the byte representation of `dt` back into a decimal.
///
/// Signed families sign-extend from the top bit; fixed-point families divide
/// by `10^minor` (i.e. the result carries the type's scale).
///
/// # Errors
///
/// Returns [`TypeError::NotNumeric`] for the byte families and
/// [`TypeError::WidthMismatch`] when the input length differs from the
/// type's width.
pub fn decimal_decode(dt: DataType, bytes: &[u8]) -> Result<Decimal, TypeError> {
    if !dt.is_numeric() {
        return Err(TypeError::NotNumeric(dt));
    }
    let width = dt.size();
    if bytes.len() != width {
        return Err(TypeError::WidthMismatch {
            dtype: dt,
            expected: width,
            actual: bytes.len(),
        });
    }
    let mut value = BigInt::from_bytes_be(Sign::Plus, bytes);
    if dt.is_signed() && !bytes.is_empty() && bytes[0] & 0x80 != 0 {
        value -= BigInt::one() << (8 * width);
    }
    if value.is_zero() {
        return Ok(Decimal::zero());
    }
    Ok(Decimal::new(value, dt.scale())?)
}

/// Crop `value` into the representable range of `dt` via encode-then-decode
/// (two's-complement wraparound at the type width, not saturation).
pub fn crop(dt: DataType, value: &Decimal) -> Result<Decimal, TypeError> {
    decimal_decode(dt, &decimal_encode(dt, value)?)
}
