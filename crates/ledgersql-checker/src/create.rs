//! CREATE TABLE and CREATE INDEX processing.
//!
//! CREATE TABLE opens a schema-cache scope per statement and a nested scope
//! per column: a failing column rolls back its own schema and symbol-table
//! mutations while the remaining columns still run, so the statement
//! accumulates every diagnostic before failing as a whole. Constraints are
//! processed in a fixed order — PRIMARY KEY, UNIQUE, DEFAULT, FOREIGN KEY,
//! AUTOINCREMENT — regardless of source order. Limit violations abort the
//! whole statement.

use ledgersql_ast::{
    ColumnConstraint, CreateIndexStmt, CreateTableStmt, ExprKind, Literal, Span,
};
use ledgersql_error::DiagCode;
use ledgersql_schema::{
    Column, ColumnAttr, ColumnValue, ForeignKey, Index, IndexAttr, SchemaCache, Table,
    MAX_COLUMNS, MAX_FOREIGN_KEYS, MAX_INDICES, MAX_SEQUENCES, MAX_TABLES,
};
use ledgersql_types::{ColumnRef, DataType, TableRef};

use crate::expr::{check_expr, TypeHint};
use crate::{Checker, ExprEnv, View};

/// A per-column outcome: success, a recoverable failure (the column rolls
/// back, siblings continue), or a limit violation aborting the statement.
enum ColumnOutcome {
    Ok {
        column: ColumnRef,
        primary_key: bool,
        unique: bool,
        foreign_keys: Vec<(TableRef, ColumnRef)>,
    },
    Failed,
    Abort,
}

/// Pick an auto-index name, suffixing `_` until it is unused on the table.
fn auto_index_name(cache: &SchemaCache, table: TableRef, base: String) -> String {
    let mut name = base;
    while cache
        .visible_indices(table)
        .iter()
        .any(|v| v.name == name)
    {
        name.push('_');
    }
    name
}

pub(crate) fn check_create_table(
    ck: &mut Checker,
    cache: &mut SchemaCache,
    stmt: &mut CreateTableStmt,
) -> bool {
    cache.begin();
    let mut ok = true;

    if stmt.table.name.is_empty() {
        ck.error(stmt.table.span, DiagCode::EmptyName, "empty table name");
        ok = false;
    } else if cache.find_table(&stmt.table.name).is_some() {
        ck.error(
            stmt.table.span,
            DiagCode::DuplicateTable,
            format!("table {} already exists", stmt.table.name),
        );
        ok = false;
    }
    if cache.table_count() >= MAX_TABLES {
        ck.error(stmt.table.span, DiagCode::TooManyTables, "too many tables");
        cache.rollback();
        return false;
    }

    let t = cache.add_table(Table::new(stmt.table.name.clone()));
    stmt.table.table = Some(t);

    let mut pk_cols: Vec<ColumnRef> = Vec::new();
    let mut unique_cols: Vec<(ColumnRef, String)> = Vec::new();
    let mut fk_targets: Vec<(TableRef, ColumnRef)> = Vec::new();

    for def in &mut stmt.columns {
        if cache.column_count(t) >= MAX_COLUMNS {
            ck.error(def.span, DiagCode::TooManyColumns, "too many columns");
            cache.rollback();
            return false;
        }
        cache.begin();
        match check_column(ck, cache, t, def) {
            ColumnOutcome::Ok {
                column,
                primary_key,
                unique,
                foreign_keys,
            } => {
                cache.commit();
                if primary_key {
                    pk_cols.push(column);
                }
                if unique {
                    unique_cols.push((column, def.name.name.clone()));
                }
                fk_targets.extend(foreign_keys);
            }
            ColumnOutcome::Failed => {
                cache.rollback();
                ok = false;
            }
            ColumnOutcome::Abort => {
                cache.rollback();
                cache.rollback();
                return false;
            }
        }
    }

    if !ok {
        cache.rollback();
        return false;
    }

    // primary-key index first, then pending uniques, then foreign keys
    if !pk_cols.is_empty() {
        if cache.index_count(t) >= MAX_INDICES {
            ck.error(stmt.span, DiagCode::TooManyIndices, "too many indices");
            cache.rollback();
            return false;
        }
        let name = auto_index_name(cache, t, "primary".to_owned());
        cache.add_index(
            t,
            Index::new(name, IndexAttr::UNIQUE.union(IndexAttr::AUTO), pk_cols),
        );
    }
    for (col, col_name) in unique_cols {
        if cache.index_count(t) >= MAX_INDICES {
            ck.error(stmt.span, DiagCode::TooManyIndices, "too many indices");
            cache.rollback();
            return false;
        }
        let name = auto_index_name(cache, t, format!("{col_name}_unique"));
        cache.add_index(
            t,
            Index::new(name, IndexAttr::UNIQUE.union(IndexAttr::AUTO), vec![col]),
        );
    }
    for (target_t, target_c) in fk_targets {
        let existing = cache.visible_indices(target_t).into_iter().find(|v| {
            v.columns == [target_c]
                && (v.attr.contains(IndexAttr::UNIQUE) || v.attr.contains(IndexAttr::REFERENCED))
        });
        match existing {
            Some(view) => cache.mark_index_referenced(target_t, view.index),
            None => {
                if cache.index_count(target_t) >= MAX_INDICES {
                    ck.error(stmt.span, DiagCode::TooManyIndices, "too many indices");
                    cache.rollback();
                    return false;
                }
                let col_name = cache
                    .column(target_t, target_c)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                let name = auto_index_name(cache, target_t, format!("{col_name}_ref"));
                cache.add_index(
                    target_t,
                    Index::new(
                        name,
                        IndexAttr::REFERENCED.union(IndexAttr::AUTO),
                        vec![target_c],
                    ),
                );
            }
        }
    }

    cache.commit();
    true
}

fn check_column(
    ck: &mut Checker,
    cache: &mut SchemaCache,
    t: TableRef,
    def: &mut ledgersql_ast::ColumnDef,
) -> ColumnOutcome {
    let mut failed = false;

    if def.name.name.is_empty() {
        ck.error(def.name.span, DiagCode::EmptyName, "empty column name");
        failed = true;
    } else if cache.find_column(t, &def.name.name).is_some() {
        ck.error(
            def.name.span,
            DiagCode::DuplicateColumn,
            format!("column {} already exists", def.name.name),
        );
        failed = true;
    }
    if DataType::from_raw(def.dtype.raw()).is_err() {
        ck.error(
            def.span,
            DiagCode::InvalidColumnType,
            "invalid column type",
        );
        return ColumnOutcome::Failed;
    }

    let mut col = Column::new(def.name.name.clone(), def.dtype);
    let mut primary_key = false;
    let mut unique = false;
    let mut foreign_keys: Vec<(TableRef, ColumnRef)> = Vec::new();

    // NOT NULL first (informational), then the fixed constraint order.
    for c in &def.constraints {
        if matches!(c, ColumnConstraint::NotNull { .. }) {
            col.attr.insert(ColumnAttr::NOT_NULL);
        }
    }

    for c in &def.constraints {
        if let ColumnConstraint::PrimaryKey { .. } = c {
            col.attr.insert(ColumnAttr::PRIMARY_KEY);
            col.attr.insert(ColumnAttr::NOT_NULL);
            primary_key = true;
        }
    }

    for c in &def.constraints {
        if let ColumnConstraint::Unique { .. } = c {
            // a second UNIQUE on the same column is a no-op
            if !col.attr.contains(ColumnAttr::UNIQUE) {
                col.attr.insert(ColumnAttr::UNIQUE);
                unique = true;
            }
        }
    }

    for c in &mut def.constraints {
        if let ColumnConstraint::Default { expr, span } = c {
            if matches!(&expr.kind, ExprKind::Literal(Literal::Null)) {
                ck.error(*span, DiagCode::NullDefault, "DEFAULT NULL is not allowed");
                failed = true;
                continue;
            }
            let env = ExprEnv {
                view: View::Cache(cache),
                table: Some(t),
                constant_only: true,
            };
            if !check_expr(ck, &env, expr, TypeHint::Exact(def.dtype)) {
                failed = true;
                continue;
            }
            match literal_to_value(expr.as_literal()) {
                Some(value) => {
                    col.default = Some(value);
                    col.attr.insert(ColumnAttr::HAS_DEFAULT);
                }
                None => {
                    ck.error(
                        *span,
                        DiagCode::NonConstantDefault,
                        "DEFAULT must reduce to a constant",
                    );
                    failed = true;
                }
            }
        }
    }

    for c in &mut def.constraints {
        if let ColumnConstraint::ForeignKey {
            table,
            column,
            span,
        } = c
        {
            if col.foreign_keys.len() >= MAX_FOREIGN_KEYS {
                ck.error(*span, DiagCode::TooManyForeignKeys, "too many foreign keys");
                return ColumnOutcome::Abort;
            }
            let Some(target_t) = cache.find_table(&table.name) else {
                ck.error(
                    table.span,
                    DiagCode::UndefinedTable,
                    format!("no such table: {}", table.name),
                );
                failed = true;
                continue;
            };
            table.table = Some(target_t);
            let Some((target_c, target_col)) = cache
                .find_column(target_t, &column.name)
                .map(|(r, c)| (r, c.clone()))
            else {
                ck.error(
                    column.span,
                    DiagCode::UndefinedColumn,
                    format!("no such column: {}", column.name),
                );
                failed = true;
                continue;
            };
            column.column = Some(target_c);
            if target_col.dtype != def.dtype {
                ck.error(
                    *span,
                    DiagCode::ForeignKeyTypeMismatch,
                    format!(
                        "foreign key type {} does not match {}",
                        def.dtype, target_col.dtype
                    ),
                );
                failed = true;
                continue;
            }
            col.foreign_keys.push(ForeignKey {
                table: target_t,
                column: target_c,
            });
            col.attr.insert(ColumnAttr::HAS_FOREIGN_KEY);
            foreign_keys.push((target_t, target_c));
        }
    }

    for c in &def.constraints {
        if let ColumnConstraint::Autoincrement { span } = c {
            if !def.dtype.is_integer() {
                ck.error(
                    *span,
                    DiagCode::BadSequenceType,
                    format!("AUTOINCREMENT requires an integer column, got {}", def.dtype),
                );
                failed = true;
                continue;
            }
            if cache.sequence_count(t) >= MAX_SEQUENCES {
                ck.error(*span, DiagCode::TooManySequences, "too many sequences");
                return ColumnOutcome::Abort;
            }
            col.sequence = Some(cache.add_sequence(t));
            col.attr.insert(ColumnAttr::HAS_SEQUENCE);
        }
    }

    if failed {
        return ColumnOutcome::Failed;
    }
    let column = cache.add_column(t, col);
    def.name.column = Some(column);
    ColumnOutcome::Ok {
        column,
        primary_key,
        unique,
        foreign_keys,
    }
}

/// Lower a checked DEFAULT literal into its stored form.
fn literal_to_value(lit: Option<&Literal>) -> Option<ColumnValue> {
    match lit? {
        Literal::Number(v) => Some(ColumnValue::Number(v.clone())),
        Literal::Bool(b) => Some(ColumnValue::Number(if *b {
            "1".parse().ok()?
        } else {
            "0".parse().ok()?
        })),
        Literal::Bytes(b) => Some(ColumnValue::Bytes(b.clone())),
        Literal::Address(a) => a.bytes().map(|b| ColumnValue::Bytes(b.to_vec())),
        _ => None,
    }
}

pub(crate) fn check_create_index(
    ck: &mut Checker,
    cache: &mut SchemaCache,
    stmt: &mut CreateIndexStmt,
) -> bool {
    cache.begin();

    if stmt.name.name.is_empty() {
        ck.error(stmt.name.span, DiagCode::EmptyName, "empty index name");
        cache.rollback();
        return false;
    }
    let Some(t) = cache.find_table(&stmt.table.name) else {
        ck.error(
            stmt.table.span,
            DiagCode::UndefinedTable,
            format!("no such table: {}", stmt.table.name),
        );
        cache.rollback();
        return false;
    };
    stmt.table.table = Some(t);

    if stmt.columns.is_empty() {
        ck.error(stmt.span, DiagCode::EmptyName, "empty index column list");
        cache.rollback();
        return false;
    }

    let mut resolved: Vec<(ColumnRef, Span)> = Vec::with_capacity(stmt.columns.len());
    let mut ok = true;
    for col in &mut stmt.columns {
        match cache.find_column(t, &col.name) {
            Some((r, _)) => {
                col.column = Some(r);
                resolved.push((r, col.span));
            }
            None => {
                ck.error(
                    col.span,
                    DiagCode::UndefinedColumn,
                    format!("no such column: {}", col.name),
                );
                ok = false;
            }
        }
    }
    if !ok {
        cache.rollback();
        return false;
    }

    // duplicates are detected after a stable sort by column reference,
    // reporting the first encountered duplicate token
    resolved.sort_by_key(|(r, _)| *r);
    if let Some(dup) = resolved.windows(2).find(|w| w[0].0 == w[1].0) {
        ck.error(
            dup[1].1,
            DiagCode::DuplicateIndexColumn,
            "duplicate column in index",
        );
        cache.rollback();
        return false;
    }
    let columns: Vec<ColumnRef> = resolved.iter().map(|(r, _)| *r).collect();

    if cache
        .visible_indices(t)
        .iter()
        .any(|v| v.name == stmt.name.name)
    {
        ck.error(
            stmt.name.span,
            DiagCode::DuplicateIndex,
            format!("index {} already exists", stmt.name.name),
        );
        cache.rollback();
        return false;
    }

    // an auto-generated index on the exact column set is renamed in place
    let same_set = cache
        .visible_indices(t)
        .into_iter()
        .find(|v| v.columns == columns);
    if let Some(view) = same_set {
        if view.attr.contains(IndexAttr::AUTO) {
            cache.rename_index(t, view.index, stmt.name.name.clone());
            cache.commit();
            return true;
        }
    }

    if cache.index_count(t) >= MAX_INDICES {
        ck.error(stmt.span, DiagCode::TooManyIndices, "too many indices");
        cache.rollback();
        return false;
    }
    let attr = if stmt.unique {
        IndexAttr::UNIQUE
    } else {
        IndexAttr::empty()
    };
    cache.add_index(t, Index::new(stmt.name.name.clone(), attr, columns));
    cache.commit();
    true
}
