//! Core type tags and descriptors for LedgerSQL.
//!
//! A column or value type is a 16-bit [`DataType`] tag of `(major, minor)`.
//! The major byte selects the family; the minor byte encodes byte-width-1
//! for integers and fixed bytes, or the fractional digit count for the two
//! fixed-point ranges. All byte widths are 1..=32 and fixed-point scales are
//! 0..=80, which keeps both fixed-point major ranges inside one byte.
//!
//! The crate also owns the by-position schema descriptors
//! ([`TableRef`]/[`ColumnRef`]/[`IndexRef`]/[`SequenceRef`]) and the
//! decimal⇄byte conversion routines in [`encode`].

use std::fmt;
use std::sync::OnceLock;

use num_bigint::BigInt;
use num_traits::One;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod decimal;
pub mod encode;

pub use decimal::{Decimal, DecimalError, MAX_FRACTIONAL_DIGITS, MAX_INTEGER_DIGITS};

// ---------------------------------------------------------------------------
// Major family constants
// ---------------------------------------------------------------------------

const MAJOR_BOOL: u8 = 0x00;
const MAJOR_ADDRESS: u8 = 0x01;
const MAJOR_INT: u8 = 0x02;
const MAJOR_UINT: u8 = 0x03;
const MAJOR_BYTES: u8 = 0x04;
const MAJOR_DYNAMIC_BYTES: u8 = 0x05;
const MAJOR_FIXED_BASE: u8 = 0x10;
const MAJOR_UFIXED_BASE: u8 = 0x30;

/// Maximum byte width of any fixed-width family.
pub const MAX_WIDTH: u8 = 32;

/// Maximum fractional digits of the fixed-point families.
pub const MAX_FIXED_SCALE: u8 = 80;

/// Byte width of an address.
pub const ADDRESS_WIDTH: usize = 20;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from type tag composition and the encode/decode machinery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// The major byte does not select a family.
    #[error("invalid type major 0x{0:02x}")]
    InvalidMajor(u8),

    /// The minor byte is out of range for the selected family.
    #[error("invalid type minor 0x{minor:02x} for major 0x{major:02x}")]
    InvalidMinor { major: u8, minor: u8 },

    /// The operation requires a numeric family.
    #[error("type {0} is not numeric")]
    NotNumeric(DataType),

    /// The byte input does not match the type's width.
    #[error("type {dtype} expects {expected} bytes, got {actual}")]
    WidthMismatch {
        dtype: DataType,
        expected: usize,
        actual: usize,
    },

    /// Arithmetic on the decimal side failed.
    #[error(transparent)]
    Decimal(#[from] DecimalError),
}

// ---------------------------------------------------------------------------
// TypeFamily
// ---------------------------------------------------------------------------

/// The family a [`DataType`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    /// Single-byte boolean.
    Bool,
    /// 20-byte account address.
    Address,
    /// Signed two's-complement integer, 1..=32 bytes.
    Int,
    /// Unsigned integer, 1..=32 bytes.
    Uint,
    /// Fixed-length byte string, 1..=32 bytes.
    Bytes,
    /// Dynamic-length byte string.
    DynamicBytes,
    /// Signed fixed-point, 1..=32 bytes, 0..=80 fractional digits.
    Fixed,
    /// Unsigned fixed-point, 1..=32 bytes, 0..=80 fractional digits.
    Ufixed,
}

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// A 16-bit `(major, minor)` type tag.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataType(u16);

impl DataType {
    /// The boolean type.
    pub const BOOL: Self = Self((MAJOR_BOOL as u16) << 8);
    /// The address type.
    pub const ADDRESS: Self = Self((MAJOR_ADDRESS as u16) << 8);
    /// The dynamic bytes type.
    pub const DYNAMIC_BYTES: Self = Self((MAJOR_DYNAMIC_BYTES as u16) << 8);
    /// 256-bit signed integer, the default type of integer literals.
    pub const INT256: Self = Self(((MAJOR_INT as u16) << 8) | 31);
    /// 256-bit unsigned integer.
    pub const UINT256: Self = Self(((MAJOR_UINT as u16) << 8) | 31);
    /// 64-bit unsigned integer, the type of row-id columns in operands.
    pub const UINT64: Self = Self(((MAJOR_UINT as u16) << 8) | 7);
    /// 128-bit signed fixed-point with 18 fractional digits, the default
    /// type of decimal literals.
    pub const FIXED128X18: Self = Self((((MAJOR_FIXED_BASE + 15) as u16) << 8) | 18);

    /// Compose a tag from `(major, minor)`, validating the pair.
    pub fn compose(major: u8, minor: u8) -> Result<Self, TypeError> {
        let bad_minor = || TypeError::InvalidMinor { major, minor };
        match major {
            MAJOR_BOOL | MAJOR_ADDRESS | MAJOR_DYNAMIC_BYTES => {
                if minor == 0 {
                    Ok(Self(u16::from_be_bytes([major, minor])))
                } else {
                    Err(bad_minor())
                }
            }
            MAJOR_INT | MAJOR_UINT | MAJOR_BYTES => {
                if minor < MAX_WIDTH {
                    Ok(Self(u16::from_be_bytes([major, minor])))
                } else {
                    Err(bad_minor())
                }
            }
            m if (MAJOR_FIXED_BASE..MAJOR_FIXED_BASE + MAX_WIDTH).contains(&m)
                || (MAJOR_UFIXED_BASE..MAJOR_UFIXED_BASE + MAX_WIDTH).contains(&m) =>
            {
                if minor <= MAX_FIXED_SCALE {
                    Ok(Self(u16::from_be_bytes([major, minor])))
                } else {
                    Err(bad_minor())
                }
            }
            _ => Err(TypeError::InvalidMajor(major)),
        }
    }

    /// Decompose the tag into `(major, minor)`.
    #[must_use]
    pub const fn decompose(self) -> (u8, u8) {
        let [major, minor] = self.0.to_be_bytes();
        (major, minor)
    }

    /// Signed integer of `width` bytes (1..=32).
    pub fn int(width: u8) -> Result<Self, TypeError> {
        Self::compose(MAJOR_INT, width.wrapping_sub(1))
    }

    /// Unsigned integer of `width` bytes (1..=32).
    pub fn uint(width: u8) -> Result<Self, TypeError> {
        Self::compose(MAJOR_UINT, width.wrapping_sub(1))
    }

    /// Fixed-length bytes of `width` bytes (1..=32).
    pub fn bytes(width: u8) -> Result<Self, TypeError> {
        Self::compose(MAJOR_BYTES, width.wrapping_sub(1))
    }

    /// Signed fixed-point of `width` bytes and `scale` fractional digits.
    pub fn fixed(width: u8, scale: u8) -> Result<Self, TypeError> {
        if width == 0 || width > MAX_WIDTH {
            return Err(TypeError::InvalidMajor(MAJOR_FIXED_BASE));
        }
        Self::compose(MAJOR_FIXED_BASE + width - 1, scale)
    }

    /// Unsigned fixed-point of `width` bytes and `scale` fractional digits.
    pub fn ufixed(width: u8, scale: u8) -> Result<Self, TypeError> {
        if width == 0 || width > MAX_WIDTH {
            return Err(TypeError::InvalidMajor(MAJOR_UFIXED_BASE));
        }
        Self::compose(MAJOR_UFIXED_BASE + width - 1, scale)
    }

    /// Reconstruct from the raw 16-bit tag, validating it.
    pub fn from_raw(raw: u16) -> Result<Self, TypeError> {
        let [major, minor] = raw.to_be_bytes();
        Self::compose(major, minor)
    }

    /// The raw 16-bit tag.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// The family this tag belongs to.
    #[must_use]
    pub fn family(self) -> TypeFamily {
        let (major, _) = self.decompose();
        match major {
            MAJOR_BOOL => TypeFamily::Bool,
            MAJOR_ADDRESS => TypeFamily::Address,
            MAJOR_INT => TypeFamily::Int,
            MAJOR_UINT => TypeFamily::Uint,
            MAJOR_BYTES => TypeFamily::Bytes,
            MAJOR_DYNAMIC_BYTES => TypeFamily::DynamicBytes,
            m if (MAJOR_FIXED_BASE..MAJOR_FIXED_BASE + MAX_WIDTH).contains(&m) => TypeFamily::Fixed,
            _ => TypeFamily::Ufixed,
        }
    }

    /// Storage width in bytes. Dynamic bytes reports its 32-byte slot header.
    #[must_use]
    pub fn size(self) -> usize {
        let (major, minor) = self.decompose();
        match self.family() {
            TypeFamily::Bool => 1,
            TypeFamily::Address => ADDRESS_WIDTH,
            TypeFamily::Int | TypeFamily::Uint | TypeFamily::Bytes => minor as usize + 1,
            TypeFamily::DynamicBytes => 32,
            TypeFamily::Fixed => (major - MAJOR_FIXED_BASE) as usize + 1,
            TypeFamily::Ufixed => (major - MAJOR_UFIXED_BASE) as usize + 1,
        }
    }

    /// Fractional digit count; zero outside the fixed-point families.
    #[must_use]
    pub fn scale(self) -> u32 {
        let (_, minor) = self.decompose();
        match self.family() {
            TypeFamily::Fixed | TypeFamily::Ufixed => u32::from(minor),
            _ => 0,
        }
    }

    /// Whether values of this type are numeric (have a min/max range and
    /// decimal byte encoding).
    #[must_use]
    pub fn is_numeric(self) -> bool {
        !matches!(self.family(), TypeFamily::Bytes | TypeFamily::DynamicBytes)
    }

    /// Whether this is a signed family.
    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(self.family(), TypeFamily::Int | TypeFamily::Fixed)
    }

    /// Whether this is one of the two integer families.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self.family(), TypeFamily::Int | TypeFamily::Uint)
    }

    /// Whether values are stored as raw bytes rather than decimals.
    #[must_use]
    pub fn is_bytes_like(self) -> bool {
        matches!(
            self.family(),
            TypeFamily::Bytes | TypeFamily::DynamicBytes | TypeFamily::Address
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, minor) = self.decompose();
        match self.family() {
            TypeFamily::Bool => f.write_str("bool"),
            TypeFamily::Address => f.write_str("address"),
            TypeFamily::Int => write!(f, "int{}", self.size() * 8),
            TypeFamily::Uint => write!(f, "uint{}", self.size() * 8),
            TypeFamily::Bytes => write!(f, "bytes{}", self.size()),
            TypeFamily::DynamicBytes => f.write_str("bytes"),
            TypeFamily::Fixed => write!(f, "fixed{}x{}", self.size() * 8, minor),
            TypeFamily::Ufixed => write!(f, "ufixed{}x{}", self.size() * 8, minor),
        }
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataType({self})")
    }
}

// ---------------------------------------------------------------------------
// Min/max range table
// ---------------------------------------------------------------------------

/// Per-width integer bounds, indexed by `width - 1`.
struct WidthBounds {
    signed: Vec<(BigInt, BigInt)>,
    unsigned: Vec<(BigInt, BigInt)>,
    address_max: BigInt,
}

fn width_bounds() -> &'static WidthBounds {
    static BOUNDS: OnceLock<WidthBounds> = OnceLock::new();
    BOUNDS.get_or_init(|| {
        let mut signed = Vec::with_capacity(MAX_WIDTH as usize);
        let mut unsigned = Vec::with_capacity(MAX_WIDTH as usize);
        for width in 1..=MAX_WIDTH {
            let bits = 8 * u32::from(width);
            let half: BigInt = BigInt::one() << (bits - 1);
            let full: BigInt = BigInt::one() << bits;
            signed.push((-&half, half - BigInt::one()));
            unsigned.push((BigInt::from(0u8), full - BigInt::one()));
        }
        WidthBounds {
            signed,
            unsigned,
            address_max: (BigInt::one() << 160) - BigInt::one(),
        }
    })
}

/// The inclusive `(min, max)` range of a numeric type.
///
/// # Errors
///
/// Returns [`TypeError::NotNumeric`] for the byte families.
pub fn min_max(dt: DataType) -> Result<(Decimal, Decimal), TypeError> {
    let bounds = width_bounds();
    let width = dt.size();
    let make = |lo: &BigInt, hi: &BigInt, scale: u32| -> Result<(Decimal, Decimal), TypeError> {
        Ok((
            Decimal::new(lo.clone(), scale)?,
            Decimal::new(hi.clone(), scale)?,
        ))
    };
    match dt.family() {
        TypeFamily::Bool => Ok((Decimal::zero(), Decimal::one())),
        TypeFamily::Address => make(&BigInt::from(0u8), &bounds.address_max, 0),
        TypeFamily::Int => {
            let (lo, hi) = &bounds.signed[width - 1];
            make(lo, hi, 0)
        }
        TypeFamily::Uint => {
            let (lo, hi) = &bounds.unsigned[width - 1];
            make(lo, hi, 0)
        }
        TypeFamily::Fixed => {
            let (lo, hi) = &bounds.signed[width - 1];
            make(lo, hi, dt.scale())
        }
        TypeFamily::Ufixed => {
            let (lo, hi) = &bounds.unsigned[width - 1];
            make(lo, hi, dt.scale())
        }
        TypeFamily::Bytes | TypeFamily::DynamicBytes => Err(TypeError::NotNumeric(dt)),
    }
}

/// Whether `value` lies inside the inclusive range of `dt`.
pub fn in_range(dt: DataType, value: &Decimal) -> Result<bool, TypeError> {
    let (lo, hi) = min_max(dt)?;
    Ok(*value >= lo && *value <= hi)
}

// ---------------------------------------------------------------------------
// Schema descriptors
// ---------------------------------------------------------------------------

macro_rules! descriptor {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[repr(transparent)]
        pub struct $name(u8);

        impl $name {
            /// Construct from a by-position index.
            #[must_use]
            pub const fn new(index: u8) -> Self {
                Self(index)
            }

            /// The by-position index into the owning array.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

descriptor!(
    /// By-position reference to a table in the schema.
    TableRef
);
descriptor!(
    /// By-position reference to a column inside its table.
    ColumnRef
);
descriptor!(
    /// By-position reference to an index inside its table.
    IndexRef
);
descriptor!(
    /// By-position reference to a sequence inside its table.
    SequenceRef
);

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compose_decompose_named_types() {
        assert_eq!(DataType::BOOL.decompose(), (0x00, 0x00));
        assert_eq!(DataType::INT256.decompose(), (0x02, 31));
        assert_eq!(DataType::FIXED128X18.decompose(), (0x1f, 18));
        assert_eq!(DataType::int(4).unwrap().to_string(), "int32");
        assert_eq!(DataType::ufixed(32, 80).unwrap().to_string(), "ufixed256x80");
    }

    #[test]
    fn compose_rejects_invalid() {
        assert!(DataType::compose(0x06, 0).is_err());
        assert!(DataType::compose(0x02, 32).is_err());
        assert!(DataType::compose(0x10, 81).is_err());
        assert!(DataType::int(0).is_err());
        assert!(DataType::int(33).is_err());
        assert!(DataType::fixed(33, 0).is_err());
        assert!(DataType::from_raw(0xffff).is_err());
    }

    #[test]
    fn sizes() {
        assert_eq!(DataType::BOOL.size(), 1);
        assert_eq!(DataType::ADDRESS.size(), 20);
        assert_eq!(DataType::INT256.size(), 32);
        assert_eq!(DataType::bytes(7).unwrap().size(), 7);
        assert_eq!(DataType::DYNAMIC_BYTES.size(), 32);
        assert_eq!(DataType::fixed(16, 18).unwrap().size(), 16);
    }

    #[test]
    fn int8_bounds() {
        let (lo, hi) = min_max(DataType::int(1).unwrap()).unwrap();
        assert_eq!(lo, Decimal::from_i64(-128));
        assert_eq!(hi, Decimal::from_i64(127));
        let (lo, hi) = min_max(DataType::uint(1).unwrap()).unwrap();
        assert_eq!(lo, Decimal::zero());
        assert_eq!(hi, Decimal::from_i64(255));
    }

    #[test]
    fn fixed_bounds_are_scaled() {
        let dt = DataType::fixed(1, 2).unwrap();
        let (lo, hi) = min_max(dt).unwrap();
        assert_eq!(lo, "-1.28".parse().unwrap());
        assert_eq!(hi, "1.27".parse().unwrap());
    }

    #[test]
    fn bytes_have_no_range() {
        assert!(matches!(
            min_max(DataType::bytes(4).unwrap()),
            Err(TypeError::NotNumeric(_))
        ));
        assert!(matches!(
            min_max(DataType::DYNAMIC_BYTES),
            Err(TypeError::NotNumeric(_))
        ));
    }

    proptest! {
        #[test]
        fn compose_decompose_round_trip(major in 0u8..=0x4f, minor in 0u8..=0xff) {
            if let Ok(dt) = DataType::compose(major, minor) {
                prop_assert_eq!(dt.decompose(), (major, minor));
                prop_assert_eq!(DataType::from_raw(dt.raw()).unwrap(), dt);
                prop_assert!((1..=32).contains(&dt.size()) || dt.size() == 20);
            }
        }
    }
}
