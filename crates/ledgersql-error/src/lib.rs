//! Diagnostic and error types for LedgerSQL.
//!
//! Two failure channels exist, with very different contracts:
//!
//! - **Diagnostics** are accumulated by the checker across a whole statement
//!   set. Each carries a machine-stable `(position, length, category, code)`
//!   tuple that is visible across the ABI boundary, plus a human-only
//!   `(severity, prefix, message)` half that never leaves the process.
//! - **[`RuntimeError`]** values are fatal: the first one aborts the
//!   instruction stream with no partial result.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Human-facing severity of a [`Diagnostic`].
///
/// Only the presence of an `Error`-severity entry fails an overall check;
/// warnings and notes are advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Informational note attached to another diagnostic.
    Note,
    /// The statement is accepted, but behaves in a way worth flagging
    /// (e.g. a literal was cropped to its column range).
    Warning,
    /// The statement is rejected.
    Error,
}

impl Severity {
    /// Display prefix used when rendering the diagnostic for humans.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Category & code — the stable half of the diagnostic
// ---------------------------------------------------------------------------

/// Coarse diagnostic taxonomy. Part of the stable ABI tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DiagCategory {
    /// A hard resource cap was exceeded (too many tables, columns, ...).
    Limit = 1,
    /// Surfaced from the external parser.
    Grammar = 2,
    /// A statement kind is disallowed or missing for the entry point used.
    Command = 3,
    /// Name resolution, typing, or constraint failures.
    Semantic = 4,
    /// Execution-phase failures reported through the diagnostic surface.
    Runtime = 5,
}

/// Stable numeric diagnostic codes.
///
/// Discriminants are explicit and must never be renumbered: they are part of
/// the ABI-visible `(position, length, category, code)` tuple. Codes are
/// grouped by category in disjoint hundreds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum DiagCode {
    // === Limit (1xx) ===
    /// Schema already holds the maximum number of tables.
    TooManyTables = 100,
    /// Table already holds the maximum number of columns.
    TooManyColumns = 101,
    /// Table already holds the maximum number of indices.
    TooManyIndices = 102,
    /// Column already carries the maximum number of foreign keys.
    TooManyForeignKeys = 103,
    /// Table already consumed the maximum number of sequences.
    TooManySequences = 104,
    /// SELECT list exceeds the column cap.
    TooManySelectColumns = 105,

    // === Grammar (2xx) ===
    /// Syntax error reported by the external parser.
    Syntax = 200,

    // === Command (3xx) ===
    /// The statement kind is not allowed for this entry point.
    DisallowedCommand = 300,
    /// The statement set contains no usable command.
    NoCommand = 301,

    // === Semantic (4xx) ===
    /// Empty table, column, or index name.
    EmptyName = 400,
    /// A table with this name already exists.
    DuplicateTable = 401,
    /// A column with this name already exists in the table.
    DuplicateColumn = 402,
    /// An index with this name already exists on the table.
    DuplicateIndex = 403,
    /// The same column appears twice in an index column list.
    DuplicateIndexColumn = 404,
    /// The referenced table does not exist.
    UndefinedTable = 405,
    /// The referenced column does not exist.
    UndefinedColumn = 406,
    /// The declared type is not usable as a column type.
    InvalidColumnType = 407,
    /// An expression's type does not match the required type.
    TypeMismatch = 408,
    /// A constant exceeds the range of its target type.
    ConstantOverflow = 409,
    /// A constant was cropped to the range of its target type.
    ConstantCropped = 410,
    /// An address literal fails its checksum.
    BadAddressChecksum = 411,
    /// A bytes literal does not match the declared fixed length.
    BadBytesLength = 412,
    /// NULL is not a valid DEFAULT (columns are not nullable).
    NullDefault = 413,
    /// A DEFAULT expression is not constant.
    NonConstantDefault = 414,
    /// Foreign key target column type differs from the local column type.
    ForeignKeyTypeMismatch = 415,
    /// AUTOINCREMENT on a non-integer column.
    BadSequenceType = 416,
    /// Unknown function name in a call expression.
    UnknownFunction = 417,
    /// Wrong number of arguments in a call expression.
    BadArity = 418,
    /// NULL is not storable (columns are not nullable).
    NullNotAllowed = 419,
    /// A division or modulo of constants by zero.
    ConstantDividedByZero = 420,
    /// An UPDATE assignment targets a primary-key column.
    PrimaryKeyAssignment = 421,
    /// A SELECT without a FROM table uses `*` or column references.
    MissingTable = 422,

    // === Runtime (9xx) ===
    /// Execution aborted; see [`RuntimeError::code`] for the exact code.
    RuntimeAbort = 900,
}

impl DiagCode {
    /// Category this code belongs to.
    #[must_use]
    pub const fn category(self) -> DiagCategory {
        match self as u16 {
            100..=199 => DiagCategory::Limit,
            200..=299 => DiagCategory::Grammar,
            300..=399 => DiagCategory::Command,
            900..=999 => DiagCategory::Runtime,
            _ => DiagCategory::Semantic,
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// One checker finding.
///
/// The first four fields are the machine-stable ABI tuple; the remaining
/// fields are debug-only and must never be encoded across the contract
/// boundary ([`Diagnostic::stable_tuple`] is the only sanctioned encoding).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Byte offset of the offending token in the source text.
    pub position: u32,
    /// Byte length of the offending token.
    pub length: u32,
    /// Stable category.
    pub category: DiagCategory,
    /// Stable code.
    pub code: DiagCode,
    /// Human-only severity.
    pub severity: Severity,
    /// Human-only message.
    pub message: String,
}

impl Diagnostic {
    /// Create an `Error`-severity diagnostic.
    pub fn error(position: u32, length: u32, code: DiagCode, message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Error, position, length, code, message)
    }

    /// Create a `Warning`-severity diagnostic.
    pub fn warning(position: u32, length: u32, code: DiagCode, message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Warning, position, length, code, message)
    }

    /// Create a `Note`-severity diagnostic.
    pub fn note(position: u32, length: u32, code: DiagCode, message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Note, position, length, code, message)
    }

    fn with_severity(
        severity: Severity,
        position: u32,
        length: u32,
        code: DiagCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            position,
            length,
            category: code.category(),
            code,
            severity,
            message: message.into(),
        }
    }

    /// Human-only display prefix, derived from the severity.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        self.severity.prefix()
    }

    /// The ABI-visible portion of this diagnostic.
    #[must_use]
    pub const fn stable_tuple(&self) -> (u32, u32, u8, u16) {
        (
            self.position,
            self.length,
            self.category as u8,
            self.code as u16,
        )
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} [{:?}/{}]",
            self.prefix(),
            self.message,
            self.category,
            self.code as u16
        )
    }
}

// ---------------------------------------------------------------------------
// DiagnosticList
// ---------------------------------------------------------------------------

/// An ordered accumulator of diagnostics for one check run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticList {
    entries: Vec<Diagnostic>,
}

impl DiagnosticList {
    /// Create an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a diagnostic.
    pub fn push(&mut self, diag: Diagnostic) {
        self.entries.push(diag);
    }

    /// Whether any `Error`-severity entry is present. This is the sole
    /// criterion for failing a check run.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    /// All accumulated entries, in emission order.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entry was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ABI-visible tuples of every entry, in emission order.
    #[must_use]
    pub fn stable_tuples(&self) -> Vec<(u32, u32, u8, u16)> {
        self.entries.iter().map(Diagnostic::stable_tuple).collect()
    }
}

impl IntoIterator for DiagnosticList {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a DiagnosticList {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// RuntimeError — fatal execution failures
// ---------------------------------------------------------------------------

/// Fatal execution-phase error.
///
/// The interpreter aborts the whole instruction stream on the first
/// `RuntimeError`; there is no partial result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// An instruction received the wrong number of input operands.
    #[error("opcode {opcode} expects {expected} operands, got {actual}")]
    OperandCountMismatch {
        opcode: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An operand's data type is not valid for the opcode.
    #[error("invalid data type for {opcode}: {detail}")]
    InvalidDataType {
        opcode: &'static str,
        detail: String,
    },

    /// An arithmetic result exceeded the maximum of the result type.
    #[error("arithmetic overflow")]
    Overflow,

    /// An arithmetic result fell below the minimum of the result type.
    #[error("arithmetic underflow")]
    Underflow,

    /// Division or modulo by zero.
    #[error("divided by zero")]
    DividedByZero,

    /// A projection index exceeds the operand's column count.
    #[error("column index {index} out of range (operand has {columns} columns)")]
    IndexOutOfRange { index: usize, columns: usize },

    /// The requested cast has no defined conversion.
    #[error("invalid cast from {from} to {to}")]
    InvalidCastType { from: String, to: String },

    /// A LIKE pattern ends in a dangling escape byte.
    #[error("malformed escape sequence in pattern")]
    InvalidEscape,

    /// Two multi-row operands have different row counts.
    #[error("row count mismatch: {left} vs {right}")]
    RowCountMismatch { left: usize, right: usize },

    /// A register was read before being written.
    #[error("register {0} is empty")]
    EmptyRegister(usize),

    /// Stored data does not decode under the schema's column types.
    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    /// The named function is not registered with the execution context.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A write violated a PRIMARY KEY or UNIQUE constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Internal invariant violation. Not a user error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Stable numeric code for the ABI boundary (9xx range).
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::OperandCountMismatch { .. } => 901,
            Self::InvalidDataType { .. } => 902,
            Self::Overflow => 903,
            Self::Underflow => 904,
            Self::DividedByZero => 905,
            Self::IndexOutOfRange { .. } => 906,
            Self::InvalidCastType { .. } => 907,
            Self::InvalidEscape => 908,
            Self::RowCountMismatch { .. } => 909,
            Self::EmptyRegister(_) => 910,
            Self::StorageCorrupt(_) => 911,
            Self::UnknownFunction(_) => 912,
            Self::ConstraintViolation(_) => 913,
            Self::Internal(_) => 999,
        }
    }

    /// Create an internal-invariant error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias for execution-phase operations.
pub type VmResult<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_categories() {
        assert_eq!(DiagCode::TooManyTables.category(), DiagCategory::Limit);
        assert_eq!(DiagCode::Syntax.category(), DiagCategory::Grammar);
        assert_eq!(DiagCode::NoCommand.category(), DiagCategory::Command);
        assert_eq!(DiagCode::TypeMismatch.category(), DiagCategory::Semantic);
        assert_eq!(DiagCode::RuntimeAbort.category(), DiagCategory::Runtime);
    }

    #[test]
    fn stable_tuple_excludes_human_fields() {
        let d = Diagnostic::error(7, 3, DiagCode::UndefinedTable, "no such table: t");
        assert_eq!(d.stable_tuple(), (7, 3, DiagCategory::Semantic as u8, 405));
    }

    #[test]
    fn list_fails_only_on_error_severity() {
        let mut list = DiagnosticList::new();
        list.push(Diagnostic::warning(0, 1, DiagCode::ConstantCropped, "cropped"));
        list.push(Diagnostic::note(0, 1, DiagCode::ConstantCropped, "see above"));
        assert!(!list.has_errors());
        list.push(Diagnostic::error(2, 4, DiagCode::DuplicateTable, "dup"));
        assert!(list.has_errors());
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn runtime_error_display() {
        assert_eq!(RuntimeError::DividedByZero.to_string(), "divided by zero");
        assert_eq!(
            RuntimeError::RowCountMismatch { left: 2, right: 3 }.to_string(),
            "row count mismatch: 2 vs 3"
        );
    }

    #[test]
    fn runtime_error_codes_distinct() {
        let codes = [
            RuntimeError::Overflow.code(),
            RuntimeError::Underflow.code(),
            RuntimeError::DividedByZero.code(),
            RuntimeError::InvalidEscape.code(),
            RuntimeError::internal("x").code(),
        ];
        let mut sorted = codes;
        sorted.sort_unstable();
        sorted.windows(2).for_each(|w| assert_ne!(w[0], w[1]));
    }

    #[test]
    fn diagnostic_serde_round_trip() {
        let d = Diagnostic::warning(1, 2, DiagCode::ConstantCropped, "cropped to range");
        let json = serde_json::to_string(&d).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
