//! Transactional, scope-layered schema symbol table.
//!
//! The checker opens a scope per statement and a nested scope per column so
//! that a failing CREATE can undo its partial schema and symbol mutations
//! without rebuilding the cache. A scope records additions (tables, indices,
//! `(table, name)`-keyed columns, sequences), tombstones, and pending index
//! mutations (the retroactive REFERENCED mark and auto-index renames).
//!
//! `begin` pushes a scope; `commit` merges the top scope into the one
//! beneath, or into the base when it is the only scope; `rollback` discards
//! the top scope. Lookups walk the scope stack top-down, consulting each
//! scope's deletions before falling through to the base. Unbalanced
//! begin/commit/rollback calls are a programming-contract failure enforced
//! by debug assertions, not a user error.

use std::collections::BTreeSet;

use ledgersql_types::{ColumnRef, IndexRef, SequenceRef, TableRef};

use crate::{Column, Index, IndexAttr, Schema, Table};

/// A materialized view of one visible index, with pending renames and
/// attribute marks applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexView {
    /// Descriptor of the index inside its table.
    pub index: IndexRef,
    /// Effective name.
    pub name: String,
    /// Effective attributes.
    pub attr: IndexAttr,
    /// Indexed columns, ascending-sorted.
    pub columns: Vec<ColumnRef>,
}

#[derive(Debug, Default)]
struct Scope {
    added_tables: Vec<(TableRef, Table)>,
    added_columns: Vec<(TableRef, Column)>,
    added_indices: Vec<(TableRef, Index)>,
    added_sequences: Vec<TableRef>,
    deleted_tables: BTreeSet<TableRef>,
    deleted_columns: BTreeSet<(TableRef, ColumnRef)>,
    deleted_indices: BTreeSet<(TableRef, IndexRef)>,
    referenced_marks: Vec<(TableRef, IndexRef)>,
    renames: Vec<(TableRef, IndexRef, String)>,
}

impl Scope {
    fn owned_table_mut(&mut self, t: TableRef) -> Option<&mut Table> {
        self.added_tables
            .iter_mut()
            .find(|(r, _)| *r == t)
            .map(|(_, table)| table)
    }
}

/// The transactional schema cache.
#[derive(Debug)]
pub struct SchemaCache {
    base: Schema,
    scopes: Vec<Scope>,
}

impl SchemaCache {
    /// Wrap an existing schema as the base layer.
    #[must_use]
    pub fn new(base: Schema) -> Self {
        Self {
            base,
            scopes: Vec::new(),
        }
    }

    /// Push a fresh scope.
    pub fn begin(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Merge the top scope into the layer beneath it (the base if it is the
    /// only scope).
    pub fn commit(&mut self) {
        debug_assert!(!self.scopes.is_empty(), "commit without begin");
        let Some(top) = self.scopes.pop() else {
            return;
        };
        if let Some(below) = self.scopes.last_mut() {
            for (t, col) in top.added_columns {
                match below.owned_table_mut(t) {
                    Some(table) => table.columns.push(col),
                    None => below.added_columns.push((t, col)),
                }
            }
            for (t, idx) in top.added_indices {
                match below.owned_table_mut(t) {
                    Some(table) => table.indices.push(idx),
                    None => below.added_indices.push((t, idx)),
                }
            }
            for t in top.added_sequences {
                match below.owned_table_mut(t) {
                    Some(table) => table.sequences += 1,
                    None => below.added_sequences.push(t),
                }
            }
            below.added_tables.extend(top.added_tables);
            below.deleted_tables.extend(top.deleted_tables);
            below.deleted_columns.extend(top.deleted_columns);
            below.deleted_indices.extend(top.deleted_indices);
            below.referenced_marks.extend(top.referenced_marks);
            below.renames.extend(top.renames);
        } else {
            // Tombstones never survive to a base commit: the dialect has no
            // DROP statements, so a committed statement only adds.
            debug_assert!(top.deleted_tables.is_empty());
            debug_assert!(top.deleted_columns.is_empty());
            debug_assert!(top.deleted_indices.is_empty());
            for (r, table) in top.added_tables {
                debug_assert_eq!(r.index(), self.base.tables.len());
                self.base.tables.push(table);
            }
            for (t, col) in top.added_columns {
                self.base.tables[t.index()].columns.push(col);
            }
            for (t, idx) in top.added_indices {
                self.base.tables[t.index()].indices.push(idx);
            }
            for t in top.added_sequences {
                self.base.tables[t.index()].sequences += 1;
            }
            for (t, i) in top.referenced_marks {
                self.base.tables[t.index()].indices[i.index()]
                    .attr
                    .insert(IndexAttr::REFERENCED);
            }
            for (t, i, name) in top.renames {
                self.base.tables[t.index()].indices[i.index()].name = name;
            }
        }
    }

    /// Discard the top scope and everything recorded in it.
    pub fn rollback(&mut self) {
        debug_assert!(!self.scopes.is_empty(), "rollback without begin");
        self.scopes.pop();
    }

    /// Unwrap the base schema. All scopes must be resolved.
    #[must_use]
    pub fn into_schema(self) -> Schema {
        debug_assert!(self.scopes.is_empty(), "unresolved scopes at unwrap");
        self.base
    }

    // -- tables -------------------------------------------------------------

    /// Number of visible tables.
    #[must_use]
    pub fn table_count(&self) -> usize {
        let added: usize = self.scopes.iter().map(|s| s.added_tables.len()).sum();
        let deleted: BTreeSet<_> = self
            .scopes
            .iter()
            .flat_map(|s| s.deleted_tables.iter().copied())
            .collect();
        self.base.tables.len() + added - deleted.len()
    }

    /// Resolve a table name, walking the scope stack top-down.
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<TableRef> {
        let mut dead: BTreeSet<TableRef> = BTreeSet::new();
        for scope in self.scopes.iter().rev() {
            for (r, t) in scope.added_tables.iter().rev() {
                if t.name == name && !dead.contains(r) {
                    return Some(*r);
                }
            }
            dead.extend(scope.deleted_tables.iter().copied());
        }
        self.base
            .tables
            .iter()
            .position(|t| t.name == name)
            .map(|i| TableRef::new(i as u8))
            .filter(|r| !dead.contains(r))
    }

    /// The visible name of a table.
    #[must_use]
    pub fn table_name(&self, t: TableRef) -> Option<&str> {
        for scope in self.scopes.iter().rev() {
            if let Some((_, table)) = scope.added_tables.iter().find(|(r, _)| *r == t) {
                return Some(&table.name);
            }
        }
        self.base.table(t).map(|table| table.name.as_str())
    }

    /// Allocate a table. Must be called inside a scope.
    pub fn add_table(&mut self, table: Table) -> TableRef {
        debug_assert!(!self.scopes.is_empty(), "add_table outside a scope");
        let added: usize = self.scopes.iter().map(|s| s.added_tables.len()).sum();
        let r = TableRef::new((self.base.tables.len() + added) as u8);
        self.scopes
            .last_mut()
            .expect("scope checked above")
            .added_tables
            .push((r, table));
        r
    }

    // -- columns ------------------------------------------------------------

    /// All visible columns of a table, with their descriptors, in
    /// declaration order.
    #[must_use]
    pub fn visible_columns(&self, t: TableRef) -> Vec<(ColumnRef, &Column)> {
        let mut out: Vec<(ColumnRef, &Column)> = Vec::new();
        if let Some(table) = self.base.table(t) {
            out.extend(
                table
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (ColumnRef::new(i as u8), c)),
            );
        }
        for scope in &self.scopes {
            if let Some((_, table)) = scope.added_tables.iter().find(|(r, _)| *r == t) {
                for c in &table.columns {
                    out.push((ColumnRef::new(out.len() as u8), c));
                }
            }
            for (_, c) in scope.added_columns.iter().filter(|(r, _)| *r == t) {
                out.push((ColumnRef::new(out.len() as u8), c));
            }
        }
        out
    }

    /// Number of visible columns of a table.
    #[must_use]
    pub fn column_count(&self, t: TableRef) -> usize {
        self.visible_columns(t).len()
    }

    /// Resolve a column name inside a table, honoring tombstones.
    #[must_use]
    pub fn find_column(&self, t: TableRef, name: &str) -> Option<(ColumnRef, &Column)> {
        let dead: BTreeSet<(TableRef, ColumnRef)> = self
            .scopes
            .iter()
            .flat_map(|s| s.deleted_columns.iter().copied())
            .collect();
        self.visible_columns(t)
            .into_iter()
            .rev()
            .find(|(r, c)| c.name == name && !dead.contains(&(t, *r)))
    }

    /// The column behind a descriptor.
    #[must_use]
    pub fn column(&self, t: TableRef, r: ColumnRef) -> Option<&Column> {
        self.visible_columns(t)
            .into_iter()
            .find(|(cr, _)| *cr == r)
            .map(|(_, c)| c)
    }

    /// Allocate a column. Must be called inside a scope.
    pub fn add_column(&mut self, t: TableRef, column: Column) -> ColumnRef {
        debug_assert!(!self.scopes.is_empty(), "add_column outside a scope");
        let r = ColumnRef::new(self.column_count(t) as u8);
        let top = self.scopes.last_mut().expect("scope checked above");
        match top.owned_table_mut(t) {
            Some(table) => table.columns.push(column),
            None => top.added_columns.push((t, column)),
        }
        r
    }

    // -- indices ------------------------------------------------------------

    /// All visible indices of a table, with pending renames and REFERENCED
    /// marks applied, in creation order.
    #[must_use]
    pub fn visible_indices(&self, t: TableRef) -> Vec<IndexView> {
        let mut out: Vec<IndexView> = Vec::new();
        let mut push = |idx: &Index| {
            out.push(IndexView {
                index: IndexRef::new(out.len() as u8),
                name: idx.name.clone(),
                attr: idx.attr,
                columns: idx.columns.clone(),
            });
        };
        if let Some(table) = self.base.table(t) {
            table.indices.iter().for_each(&mut push);
        }
        for scope in &self.scopes {
            if let Some((_, table)) = scope.added_tables.iter().find(|(r, _)| *r == t) {
                table.indices.iter().for_each(&mut push);
            }
            for (_, idx) in scope.added_indices.iter().filter(|(r, _)| *r == t) {
                push(idx);
            }
        }
        let dead: BTreeSet<(TableRef, IndexRef)> = self
            .scopes
            .iter()
            .flat_map(|s| s.deleted_indices.iter().copied())
            .collect();
        out.retain(|v| !dead.contains(&(t, v.index)));
        for scope in &self.scopes {
            for (mt, mi) in &scope.referenced_marks {
                if *mt == t {
                    if let Some(v) = out.iter_mut().find(|v| v.index == *mi) {
                        v.attr.insert(IndexAttr::REFERENCED);
                    }
                }
            }
            for (rt, ri, name) in &scope.renames {
                if *rt == t {
                    if let Some(v) = out.iter_mut().find(|v| v.index == *ri) {
                        v.name.clone_from(name);
                    }
                }
            }
        }
        out
    }

    /// Number of visible indices of a table.
    #[must_use]
    pub fn index_count(&self, t: TableRef) -> usize {
        self.visible_indices(t).len()
    }

    /// Allocate an index. Must be called inside a scope.
    pub fn add_index(&mut self, t: TableRef, index: Index) -> IndexRef {
        debug_assert!(!self.scopes.is_empty(), "add_index outside a scope");
        let r = IndexRef::new(self.index_count(t) as u8);
        let top = self.scopes.last_mut().expect("scope checked above");
        match top.owned_table_mut(t) {
            Some(table) => table.indices.push(index),
            None => top.added_indices.push((t, index)),
        }
        r
    }

    /// Record the retroactive REFERENCED mark on an index.
    pub fn mark_index_referenced(&mut self, t: TableRef, i: IndexRef) {
        debug_assert!(!self.scopes.is_empty(), "mark outside a scope");
        self.scopes
            .last_mut()
            .expect("scope checked above")
            .referenced_marks
            .push((t, i));
    }

    /// Record an in-place rename of an auto-generated index.
    pub fn rename_index(&mut self, t: TableRef, i: IndexRef, name: impl Into<String>) {
        debug_assert!(!self.scopes.is_empty(), "rename outside a scope");
        self.scopes
            .last_mut()
            .expect("scope checked above")
            .renames
            .push((t, i, name.into()));
    }

    // -- sequences ----------------------------------------------------------

    /// Number of sequences consumed by a table.
    #[must_use]
    pub fn sequence_count(&self, t: TableRef) -> usize {
        let mut count = self.base.table(t).map_or(0, |table| table.sequences as usize);
        for scope in &self.scopes {
            if let Some((_, table)) = scope.added_tables.iter().find(|(r, _)| *r == t) {
                count += table.sequences as usize;
            }
            count += scope.added_sequences.iter().filter(|r| **r == t).count();
        }
        count
    }

    /// Allocate a sequence slot. Must be called inside a scope.
    pub fn add_sequence(&mut self, t: TableRef) -> SequenceRef {
        debug_assert!(!self.scopes.is_empty(), "add_sequence outside a scope");
        let r = SequenceRef::new(self.sequence_count(t) as u8);
        let top = self.scopes.last_mut().expect("scope checked above");
        match top.owned_table_mut(t) {
            Some(table) => table.sequences += 1,
            None => top.added_sequences.push(t),
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ColumnAttr;
    use ledgersql_types::DataType;

    fn cache() -> SchemaCache {
        SchemaCache::new(Schema::new())
    }

    #[test]
    fn rollback_discards_table() {
        let mut c = cache();
        c.begin();
        c.add_table(Table::new("t"));
        assert!(c.find_table("t").is_some());
        c.rollback();
        assert!(c.find_table("t").is_none());
        assert_eq!(c.table_count(), 0);
    }

    #[test]
    fn nested_column_scope_rolls_back_independently() {
        let mut c = cache();
        c.begin();
        let t = c.add_table(Table::new("t"));

        c.begin();
        let a = c.add_column(t, Column::new("a", DataType::BOOL));
        assert_eq!(a, ColumnRef::new(0));
        c.commit();

        c.begin();
        let b = c.add_column(t, Column::new("b", DataType::BOOL));
        assert_eq!(b, ColumnRef::new(1));
        c.rollback();

        assert!(c.find_column(t, "a").is_some());
        assert!(c.find_column(t, "b").is_none());

        // ref stability: the next column reuses the rolled-back position
        let b2 = c.add_column(t, Column::new("b2", DataType::BOOL));
        assert_eq!(b2, ColumnRef::new(1));

        c.commit();
        let schema = c.into_schema();
        assert_eq!(schema.tables[0].columns.len(), 2);
        assert_eq!(schema.tables[0].columns[1].name, "b2");
    }

    #[test]
    fn commit_merges_into_base() {
        let mut c = cache();
        c.begin();
        let t = c.add_table(Table::new("t"));
        c.begin();
        let mut col = Column::new("id", DataType::UINT64);
        col.attr.insert(ColumnAttr::PRIMARY_KEY);
        c.add_column(t, col);
        c.commit();
        c.add_index(t, Index::new("primary", IndexAttr::UNIQUE, vec![ColumnRef::new(0)]));
        c.commit();

        let schema = c.into_schema();
        assert_eq!(schema.tables.len(), 1);
        assert_eq!(schema.tables[0].columns.len(), 1);
        assert_eq!(schema.tables[0].indices.len(), 1);
    }

    #[test]
    fn marks_and_renames_apply_on_commit() {
        let mut c = cache();
        c.begin();
        let t = c.add_table(Table::new("t"));
        c.add_column(t, Column::new("v", DataType::BOOL));
        let i = c.add_index(t, Index::new("v_auto", IndexAttr::AUTO, vec![ColumnRef::new(0)]));
        c.commit();

        // second statement: mark + rename the committed index
        c.begin();
        c.mark_index_referenced(t, i);
        c.rename_index(t, i, "by_v");
        let views = c.visible_indices(t);
        assert_eq!(views[0].name, "by_v");
        assert!(views[0].attr.contains(IndexAttr::REFERENCED));
        c.commit();

        let schema = c.into_schema();
        let idx = &schema.tables[0].indices[0];
        assert_eq!(idx.name, "by_v");
        assert!(idx.attr.contains(IndexAttr::REFERENCED));
        assert!(idx.attr.contains(IndexAttr::AUTO));
    }

    #[test]
    fn lookups_fall_through_to_base() {
        let mut base = Schema::new();
        let mut table = Table::new("base_t");
        table.columns.push(Column::new("c", DataType::BOOL));
        base.tables.push(table);

        let mut c = SchemaCache::new(base);
        c.begin();
        let t = c.find_table("base_t").unwrap();
        assert_eq!(t, TableRef::new(0));
        assert!(c.find_column(t, "c").is_some());
        let t2 = c.add_table(Table::new("new_t"));
        assert_eq!(t2, TableRef::new(1));
        c.rollback();
    }

    #[test]
    fn sequences_accumulate() {
        let mut c = cache();
        c.begin();
        let t = c.add_table(Table::new("t"));
        assert_eq!(c.add_sequence(t), SequenceRef::new(0));
        c.begin();
        assert_eq!(c.add_sequence(t), SequenceRef::new(1));
        c.rollback();
        assert_eq!(c.add_sequence(t), SequenceRef::new(1));
        c.commit();
        assert_eq!(c.into_schema().tables[0].sequences, 2);
    }
}
