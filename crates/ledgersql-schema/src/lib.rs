//! Schema model for LedgerSQL.
//!
//! A [`Schema`] owns an ordered list of [`Table`]s; tables own their
//! [`Column`]s and [`Index`]es. All cross-references are by-position
//! descriptors ([`TableRef`]/[`ColumnRef`]/[`IndexRef`]/[`SequenceRef`]),
//! never pointers. Entities are created during CREATE processing through the
//! transactional [`SchemaCache`] and are immutable once committed, with one
//! exception: foreign-key processing may retroactively mark a referenced
//! index with [`IndexAttr::REFERENCED`].

use ledgersql_types::{ColumnRef, DataType, Decimal, IndexRef, SequenceRef, TableRef};
use serde::{Deserialize, Serialize};

mod cache;

pub use cache::{IndexView, SchemaCache};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Maximum number of tables in a schema.
pub const MAX_TABLES: usize = 64;
/// Maximum number of columns per table.
pub const MAX_COLUMNS: usize = 64;
/// Maximum number of indices per table.
pub const MAX_INDICES: usize = 64;
/// Maximum number of foreign keys per column.
pub const MAX_FOREIGN_KEYS: usize = 8;
/// Maximum number of sequences per table.
pub const MAX_SEQUENCES: usize = 8;
/// Maximum number of output columns in a SELECT.
pub const MAX_SELECT_COLUMNS: usize = 64;

// ---------------------------------------------------------------------------
// Attribute bitmasks
// ---------------------------------------------------------------------------

/// Column attribute bitmask.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ColumnAttr(u16);

impl ColumnAttr {
    /// Member of the primary key.
    pub const PRIMARY_KEY: Self = Self(1 << 0);
    /// NOT NULL (informational; columns are never nullable).
    pub const NOT_NULL: Self = Self(1 << 1);
    /// Carries a single-column UNIQUE constraint.
    pub const UNIQUE: Self = Self(1 << 2);
    /// Carries a DEFAULT value.
    pub const HAS_DEFAULT: Self = Self(1 << 3);
    /// Carries one or more foreign keys.
    pub const HAS_FOREIGN_KEY: Self = Self(1 << 4);
    /// Carries an AUTOINCREMENT sequence.
    pub const HAS_SEQUENCE: Self = Self(1 << 5);

    /// The empty mask.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every bit of `flag` is set.
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Set every bit of `flag`.
    pub fn insert(&mut self, flag: Self) {
        self.0 |= flag.0;
    }
}

/// Index attribute bitmask.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct IndexAttr(u16);

impl IndexAttr {
    /// The index enforces uniqueness.
    pub const UNIQUE: Self = Self(1 << 0);
    /// The index is the target of at least one foreign key.
    pub const REFERENCED: Self = Self(1 << 1);
    /// The index was synthesized by the checker, not named by the user.
    pub const AUTO: Self = Self(1 << 2);

    /// The empty mask.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every bit of `flag` is set.
    #[must_use]
    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Set every bit of `flag`.
    pub fn insert(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    /// Union of two masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A column's constant value, as stored for DEFAULTs.
///
/// Numeric families (including bool) hold a decimal; byte families hold the
/// raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnValue {
    /// A decimal value.
    Number(Decimal),
    /// A raw byte string.
    Bytes(Vec<u8>),
}

/// One foreign key: the referenced table and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referenced table.
    pub table: TableRef,
    /// Referenced column inside that table.
    pub column: ColumnRef,
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Storage type.
    pub dtype: DataType,
    /// Attribute flags.
    pub attr: ColumnAttr,
    /// DEFAULT value, when [`ColumnAttr::HAS_DEFAULT`] is set.
    pub default: Option<ColumnValue>,
    /// Foreign keys, when [`ColumnAttr::HAS_FOREIGN_KEY`] is set.
    pub foreign_keys: Vec<ForeignKey>,
    /// AUTOINCREMENT sequence, when [`ColumnAttr::HAS_SEQUENCE`] is set.
    pub sequence: Option<SequenceRef>,
}

impl Column {
    /// Construct a plain column with no constraints.
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            attr: ColumnAttr::empty(),
            default: None,
            foreign_keys: Vec::new(),
            sequence: None,
        }
    }
}

/// One index over a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Attribute flags.
    pub attr: IndexAttr,
    /// Indexed columns, ascending-sorted by descriptor.
    pub columns: Vec<ColumnRef>,
}

impl Index {
    /// Construct an index, sorting the column list ascending.
    pub fn new(name: impl Into<String>, attr: IndexAttr, mut columns: Vec<ColumnRef>) -> Self {
        columns.sort_unstable();
        Self {
            name: name.into(),
            attr,
            columns,
        }
    }
}

/// One table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Indices in creation order.
    pub indices: Vec<Index>,
    /// Number of sequences consumed by AUTOINCREMENT columns.
    pub sequences: u8,
}

impl Table {
    /// Construct an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indices: Vec::new(),
            sequences: 0,
        }
    }

    /// The column behind a descriptor.
    #[must_use]
    pub fn column(&self, r: ColumnRef) -> Option<&Column> {
        self.columns.get(r.index())
    }

    /// Look a column up by name.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<(ColumnRef, &Column)> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .map(|i| (ColumnRef::new(i as u8), &self.columns[i]))
    }

    /// The index behind a descriptor.
    #[must_use]
    pub fn index(&self, r: IndexRef) -> Option<&Index> {
        self.indices.get(r.index())
    }

    /// Descriptors of the primary-key columns, in declaration order.
    #[must_use]
    pub fn primary_key_columns(&self) -> Vec<ColumnRef> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.attr.contains(ColumnAttr::PRIMARY_KEY))
            .map(|(i, _)| ColumnRef::new(i as u8))
            .collect()
    }

    /// The primary-key index, by convention the first index when a primary
    /// key was declared.
    #[must_use]
    pub fn primary_index(&self) -> Option<(IndexRef, &Index)> {
        self.indices
            .iter()
            .position(|i| i.attr.contains(IndexAttr::UNIQUE) && i.name == "primary")
            .map(|i| (IndexRef::new(i as u8), &self.indices[i]))
    }
}

/// A committed schema: the ordered list of tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    /// Tables in creation order.
    pub tables: Vec<Table>,
}

impl Schema {
    /// An empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The table behind a descriptor.
    #[must_use]
    pub fn table(&self, r: TableRef) -> Option<&Table> {
        self.tables.get(r.index())
    }

    /// Look a table up by name.
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<(TableRef, &Table)> {
        self.tables
            .iter()
            .position(|t| t.name == name)
            .map(|i| (TableRef::new(i as u8), &self.tables[i]))
    }

    /// Whether the schema holds no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_flags() {
        let mut attr = ColumnAttr::empty();
        assert!(!attr.contains(ColumnAttr::PRIMARY_KEY));
        attr.insert(ColumnAttr::PRIMARY_KEY);
        attr.insert(ColumnAttr::HAS_SEQUENCE);
        assert!(attr.contains(ColumnAttr::PRIMARY_KEY));
        assert!(attr.contains(ColumnAttr::HAS_SEQUENCE));
        assert!(!attr.contains(ColumnAttr::UNIQUE));
    }

    #[test]
    fn index_sorts_columns() {
        let idx = Index::new(
            "i",
            IndexAttr::UNIQUE,
            vec![ColumnRef::new(2), ColumnRef::new(0)],
        );
        assert_eq!(idx.columns, vec![ColumnRef::new(0), ColumnRef::new(2)]);
    }

    #[test]
    fn table_lookups() {
        let mut t = Table::new("accounts");
        let mut id = Column::new("id", DataType::UINT64);
        id.attr.insert(ColumnAttr::PRIMARY_KEY);
        t.columns.push(id);
        t.columns.push(Column::new("owner", DataType::ADDRESS));

        let (r, c) = t.find_column("owner").unwrap();
        assert_eq!(r, ColumnRef::new(1));
        assert_eq!(c.dtype, DataType::ADDRESS);
        assert_eq!(t.primary_key_columns(), vec![ColumnRef::new(0)]);
        assert!(t.find_column("missing").is_none());
    }

    #[test]
    fn schema_serde_round_trip() {
        let mut schema = Schema::new();
        let mut t = Table::new("t");
        let mut c = Column::new("v", DataType::int(4).unwrap());
        c.attr.insert(ColumnAttr::HAS_DEFAULT);
        c.default = Some(ColumnValue::Number("42".parse().unwrap()));
        t.columns.push(c);
        t.indices.push(Index::new(
            "primary",
            IndexAttr::UNIQUE,
            vec![ColumnRef::new(0)],
        ));
        schema.tables.push(t);

        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }
}
