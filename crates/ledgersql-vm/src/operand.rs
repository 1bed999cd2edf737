//! Columnar operands: typed arrays of row tuples.
//!
//! An [`Operand`] is either an immediate literal (the data travels inside
//! the instruction) or a register reference (the data lives in the register
//! file). Either way it carries per-column [`DataType`] metadata and a
//! row-major array of [`Tuple`]s. A [`Raw`] cell holds a decimal for the
//! numeric families or raw bytes for the byte families.

use std::cmp::Ordering;
use std::fmt;

use ledgersql_types::{DataType, Decimal};

/// Index of a virtual register.
pub type RegIndex = usize;

/// One cell of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Raw {
    /// A decimal value (bool, address-as-number never occurs; integers and
    /// fixed-point).
    Number(Decimal),
    /// A raw byte string (address, fixed and dynamic bytes).
    Bytes(Vec<u8>),
}

impl Raw {
    /// Build a bool cell.
    #[must_use]
    pub fn from_bool(b: bool) -> Self {
        Self::Number(Decimal::from_u64(u64::from(b)))
    }

    /// The decimal payload, if numeric.
    #[must_use]
    pub fn as_number(&self) -> Option<&Decimal> {
        match self {
            Self::Number(d) => Some(d),
            Self::Bytes(_) => None,
        }
    }

    /// The byte payload, if bytes.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Number(_) => None,
        }
    }

    /// Truthiness of a bool-typed cell.
    #[must_use]
    pub fn is_true(&self) -> bool {
        matches!(self, Self::Number(d) if !d.is_zero())
    }

    /// Total order over cells: numbers before bytes, then payload order.
    /// Gives set and sort opcodes a deterministic order regardless of input.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::Number(_), Self::Bytes(_)) => Ordering::Less,
            (Self::Bytes(_), Self::Number(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(d) => write!(f, "{d}"),
            Self::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// One row of cells.
pub type Tuple = Vec<Raw>;

/// Total order over whole tuples (lexicographic by [`Raw::total_cmp`]).
#[must_use]
pub fn cmp_tuples(a: &[Raw], b: &[Raw]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.total_cmp(y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// A typed, columnar array of row tuples.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    /// Whether the data travels inside the instruction.
    pub immediate: bool,
    /// Per-column types.
    pub dtypes: Vec<DataType>,
    /// Row-major data.
    pub tuples: Vec<Tuple>,
    /// Register index; meaningful only when `immediate` is false.
    pub register: RegIndex,
}

impl Operand {
    /// An immediate operand carrying data.
    #[must_use]
    pub fn immediate(dtypes: Vec<DataType>, tuples: Vec<Tuple>) -> Self {
        Self {
            immediate: true,
            dtypes,
            tuples,
            register: 0,
        }
    }

    /// A reference to a register.
    #[must_use]
    pub fn register(index: RegIndex) -> Self {
        Self {
            immediate: false,
            dtypes: Vec::new(),
            tuples: Vec::new(),
            register: index,
        }
    }

    /// An empty zero-column, zero-row operand.
    #[must_use]
    pub fn empty() -> Self {
        Self::immediate(Vec::new(), Vec::new())
    }

    /// A single-row immediate.
    #[must_use]
    pub fn single(dtypes: Vec<DataType>, row: Tuple) -> Self {
        Self::immediate(dtypes, vec![row])
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.dtypes.len()
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.tuples.len()
    }

    /// Whether this operand broadcasts against a multi-row peer.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.tuples.len() == 1
    }

    /// The cell at `(row, col)`, honoring single-row broadcast.
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> &Raw {
        if self.tuples.len() == 1 {
            &self.tuples[0][col]
        } else {
            &self.tuples[row][col]
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.immediate {
            write!(f, "imm[{}x{}]", self.row_count(), self.column_count())
        } else {
            write!(f, "r{}", self.register)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> Raw {
        Raw::Number(s.parse().unwrap())
    }

    #[test]
    fn raw_order_is_total() {
        assert_eq!(num("1").total_cmp(&num("2")), Ordering::Less);
        assert_eq!(
            Raw::Bytes(vec![1]).total_cmp(&Raw::Bytes(vec![1, 0])),
            Ordering::Less
        );
        assert_eq!(num("9").total_cmp(&Raw::Bytes(vec![0])), Ordering::Less);
    }

    #[test]
    fn tuple_order_is_lexicographic() {
        let a = vec![num("1"), num("5")];
        let b = vec![num("1"), num("6")];
        assert_eq!(cmp_tuples(&a, &b), Ordering::Less);
        assert_eq!(cmp_tuples(&a, &a), Ordering::Equal);
    }

    #[test]
    fn broadcast_cell_access() {
        let op = Operand::single(vec![DataType::BOOL], vec![Raw::from_bool(true)]);
        assert!(op.cell(5, 0).is_true());
        assert!(op.is_broadcast());
    }
}
