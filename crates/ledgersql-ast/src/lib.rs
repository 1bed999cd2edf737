//! AST node types for the LedgerSQL dialect.
//!
//! The external parser produces one [`Statement`] per command. Nodes are
//! structurally valid by contract (correct arity) but semantically unchecked:
//! the checker resolves names, fills in the `dtype` slot of every expression,
//! and constant-folds literal subtrees in place. Every node representing
//! user-written syntax carries a [`Span`] for position-addressable
//! diagnostics.

use std::fmt;

use ledgersql_types::{ColumnRef, DataType, Decimal, TableRef};
use serde::{Deserialize, Serialize};

mod display;

// ---------------------------------------------------------------------------
// Span
// ---------------------------------------------------------------------------

/// A byte-offset range into the original SQL source text.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first character (inclusive).
    pub start: u32,
    /// Byte offset one past the last character (exclusive).
    pub end: u32,
}

impl Span {
    /// A zero-length placeholder span.
    pub const ZERO: Self = Self { start: 0, end: 0 };

    /// Create a new span from byte offsets.
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Merge two spans into one covering both.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        let start = if self.start < other.start {
            self.start
        } else {
            other.start
        };
        let end = if self.end > other.end {
            self.end
        } else {
            other.end
        };
        Self { start, end }
    }

    /// Length in bytes.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.end - self.start
    }

    /// Whether the span is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.start == self.end
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// A plain identifier with no resolution slot (index names).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    /// Identifier text as written.
    pub name: String,
    /// Source location.
    pub span: Span,
}

impl Ident {
    /// Construct an identifier.
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

/// A table name; the checker fills `table` in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    /// Table name as written.
    pub name: String,
    /// Source location.
    pub span: Span,
    /// Resolved descriptor, set by the checker.
    pub table: Option<TableRef>,
}

impl TableName {
    /// Construct an unresolved table name.
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
            table: None,
        }
    }
}

/// A column name; the checker fills `column` in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnName {
    /// Column name as written.
    pub name: String,
    /// Source location.
    pub span: Span,
    /// Resolved descriptor, set by the checker.
    pub column: Option<ColumnRef>,
}

impl ColumnName {
    /// Construct an unresolved column name.
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
            column: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Literals & operators
// ---------------------------------------------------------------------------

/// An address literal, kept as written so the checker can validate the
/// mixed-case checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressLit {
    /// Literal text including the `0x` prefix.
    pub text: String,
}

impl AddressLit {
    /// Decode the 20 address bytes, if the text is well-formed hex.
    #[must_use]
    pub fn bytes(&self) -> Option<[u8; 20]> {
        let hex = self.text.strip_prefix("0x")?;
        if hex.len() != 40 {
            return None;
        }
        let mut out = [0u8; 20];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            out[i] = (hi * 16 + lo) as u8;
        }
        Some(out)
    }
}

/// A value literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `TRUE` / `FALSE`.
    Bool(bool),
    /// A `0x`-prefixed 40-digit address.
    Address(AddressLit),
    /// An integer (scale 0) or decimal (scale > 0) number.
    Number(Decimal),
    /// A hex or string bytes literal.
    Bytes(Vec<u8>),
    /// `NULL`. Never storable; rejected outside of explicit checks.
    Null,
    /// The wildcard value produced by internal rewrites.
    Any,
    /// `DEFAULT`, standing for the column's default or next sequence value.
    Default,
}

/// Unary operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,
    /// Boolean NOT.
    Not,
}

/// Binary operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `AND`
    And,
    /// `OR`
    Or,
}

impl BinaryOp {
    /// Whether this operator produces a numeric result from numeric inputs.
    #[must_use]
    pub const fn is_arithmetic(self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Mod)
    }

    /// Whether this operator compares its inputs, producing bool.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    /// Whether this operator combines boolean inputs.
    #[must_use]
    pub const fn is_boolean(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// The variant payload of an expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A column reference.
    Column(ColumnName),
    /// A value literal.
    Literal(Literal),
    /// A unary operator application.
    Unary {
        /// Operator kind.
        op: UnaryOp,
        /// Operand subtree.
        operand: Box<Expr>,
    },
    /// A binary operator application.
    Binary {
        /// Operator kind.
        op: BinaryOp,
        /// Left subtree.
        left: Box<Expr>,
        /// Right subtree.
        right: Box<Expr>,
    },
    /// `subject LIKE pattern [ESCAPE escape]`.
    Like {
        /// The matched value.
        subject: Box<Expr>,
        /// The `%`/`_` pattern.
        pattern: Box<Expr>,
        /// Optional single-byte escape.
        escape: Option<Box<Expr>>,
    },
    /// `CAST(operand AS target)`.
    Cast {
        /// Operand subtree.
        operand: Box<Expr>,
        /// Target type.
        target: DataType,
    },
    /// `needle IN (alt, alt, ...)`.
    In {
        /// The probed value.
        needle: Box<Expr>,
        /// The alternatives.
        haystack: Vec<Expr>,
    },
    /// A function call.
    Call {
        /// Lower-cased function name.
        name: String,
        /// Argument subtrees.
        args: Vec<Expr>,
    },
}

/// One expression node: variant payload, source span, and the type slot the
/// checker fills in.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Variant payload.
    pub kind: ExprKind,
    /// Source location.
    pub span: Span,
    /// Resolved type, set by the checker.
    pub dtype: Option<DataType>,
}

impl Expr {
    /// Construct an untyped expression node.
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            dtype: None,
        }
    }

    /// Construct a literal node.
    #[must_use]
    pub fn literal(lit: Literal, span: Span) -> Self {
        Self::new(ExprKind::Literal(lit), span)
    }

    /// The literal payload, if this node is a literal.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Literal> {
        match &self.kind {
            ExprKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// Whether the subtree contains no column references or calls, i.e. the
    /// checker may fold it to a single literal.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        match &self.kind {
            ExprKind::Literal(_) => true,
            ExprKind::Column(_) | ExprKind::Call { .. } => false,
            ExprKind::Unary { operand, .. } => operand.is_constant(),
            ExprKind::Binary { left, right, .. } => left.is_constant() && right.is_constant(),
            ExprKind::Cast { operand, .. } => operand.is_constant(),
            ExprKind::Like {
                subject,
                pattern,
                escape,
            } => {
                subject.is_constant()
                    && pattern.is_constant()
                    && escape.as_ref().map_or(true, |e| e.is_constant())
            }
            ExprKind::In { needle, haystack } => {
                needle.is_constant() && haystack.iter().all(Expr::is_constant)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// A single column constraint inside CREATE TABLE.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnConstraint {
    /// `PRIMARY KEY`
    PrimaryKey {
        /// Source location.
        span: Span,
    },
    /// `NOT NULL`
    NotNull {
        /// Source location.
        span: Span,
    },
    /// `UNIQUE`
    Unique {
        /// Source location.
        span: Span,
    },
    /// `DEFAULT expr`
    Default {
        /// Constant default expression.
        expr: Expr,
        /// Source location.
        span: Span,
    },
    /// `REFERENCES table (column)`
    ForeignKey {
        /// Target table.
        table: TableName,
        /// Target column.
        column: ColumnName,
        /// Source location.
        span: Span,
    },
    /// `AUTOINCREMENT`
    Autoincrement {
        /// Source location.
        span: Span,
    },
}

impl ColumnConstraint {
    /// Source location of the constraint keyword.
    #[must_use]
    pub const fn span(&self) -> Span {
        match self {
            Self::PrimaryKey { span }
            | Self::NotNull { span }
            | Self::Unique { span }
            | Self::Default { span, .. }
            | Self::ForeignKey { span, .. }
            | Self::Autoincrement { span } => *span,
        }
    }
}

/// One column definition inside CREATE TABLE.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column name.
    pub name: ColumnName,
    /// Declared type.
    pub dtype: DataType,
    /// Constraints in source order.
    pub constraints: Vec<ColumnConstraint>,
    /// Source location of the whole definition.
    pub span: Span,
}

/// `CREATE TABLE name (columns...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    /// Table name.
    pub table: TableName,
    /// Column definitions in source order.
    pub columns: Vec<ColumnDef>,
    /// Source location.
    pub span: Span,
}

/// `CREATE [UNIQUE] INDEX name ON table (columns...)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStmt {
    /// Index name.
    pub name: Ident,
    /// Target table.
    pub table: TableName,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
    /// Indexed columns in source order.
    pub columns: Vec<ColumnName>,
    /// Source location.
    pub span: Span,
}

/// One output column of a SELECT.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    /// `*`
    Star {
        /// Source location.
        span: Span,
    },
    /// An output expression.
    Expr(Expr),
}

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderingTerm {
    /// Sort key expression.
    pub expr: Expr,
    /// `DESC` when true.
    pub desc: bool,
    /// Source location.
    pub span: Span,
}

/// `SELECT columns [FROM table] [WHERE ...] [ORDER BY ...] [LIMIT/OFFSET]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    /// Output columns.
    pub columns: Vec<SelectColumn>,
    /// Source table; `None` for table-less SELECT.
    pub table: Option<TableName>,
    /// WHERE condition.
    pub where_clause: Option<Expr>,
    /// ORDER BY keys.
    pub order_by: Vec<OrderingTerm>,
    /// Row offset.
    pub offset: Option<u64>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Source location.
    pub span: Span,
}

/// `INSERT INTO table [(columns)] VALUES (row), ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    /// Target table.
    pub table: TableName,
    /// Explicit column list; empty means all columns in order.
    pub columns: Vec<ColumnName>,
    /// Value rows.
    pub rows: Vec<Vec<Expr>>,
    /// Source location.
    pub span: Span,
}

/// One `column = value` assignment in UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    /// Assigned column.
    pub column: ColumnName,
    /// New value.
    pub value: Expr,
    /// Source location.
    pub span: Span,
}

/// `UPDATE table SET assignments [WHERE ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    /// Target table.
    pub table: TableName,
    /// Assignments in source order.
    pub assignments: Vec<Assignment>,
    /// WHERE condition.
    pub where_clause: Option<Expr>,
    /// Source location.
    pub span: Span,
}

/// `DELETE FROM table [WHERE ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    /// Target table.
    pub table: TableName,
    /// WHERE condition.
    pub where_clause: Option<Expr>,
    /// Source location.
    pub span: Span,
}

/// A single parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// CREATE TABLE.
    CreateTable(CreateTableStmt),
    /// CREATE INDEX.
    CreateIndex(CreateIndexStmt),
    /// SELECT.
    Select(SelectStmt),
    /// INSERT.
    Insert(InsertStmt),
    /// UPDATE.
    Update(UpdateStmt),
    /// DELETE.
    Delete(DeleteStmt),
}

/// Statement kind, used for command gating at the checker entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// CREATE TABLE.
    CreateTable,
    /// CREATE INDEX.
    CreateIndex,
    /// SELECT.
    Select,
    /// INSERT.
    Insert,
    /// UPDATE.
    Update,
    /// DELETE.
    Delete,
}

impl Statement {
    /// The kind of this statement.
    #[must_use]
    pub const fn kind(&self) -> StatementKind {
        match self {
            Self::CreateTable(_) => StatementKind::CreateTable,
            Self::CreateIndex(_) => StatementKind::CreateIndex,
            Self::Select(_) => StatementKind::Select,
            Self::Insert(_) => StatementKind::Insert,
            Self::Update(_) => StatementKind::Update,
            Self::Delete(_) => StatementKind::Delete,
        }
    }

    /// Source location of the whole statement.
    #[must_use]
    pub const fn span(&self) -> Span {
        match self {
            Self::CreateTable(s) => s.span,
            Self::CreateIndex(s) => s.span,
            Self::Select(s) => s.span,
            Self::Insert(s) => s.span,
            Self::Update(s) => s.span,
            Self::Delete(s) => s.span,
        }
    }
}

impl StatementKind {
    /// Whether this kind is allowed in a CREATE statement set.
    #[must_use]
    pub const fn is_ddl(self) -> bool {
        matches!(self, Self::CreateTable | Self::CreateIndex)
    }

    /// Whether this kind is allowed in a query statement set.
    #[must_use]
    pub const fn is_query(self) -> bool {
        matches!(self, Self::Select)
    }

    /// Whether this kind is allowed in an exec statement set.
    #[must_use]
    pub const fn is_exec(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}
