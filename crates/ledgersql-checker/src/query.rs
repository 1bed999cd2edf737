//! SELECT / INSERT / UPDATE / DELETE checking against a committed schema.

use ledgersql_ast::{
    DeleteStmt, ExprKind, InsertStmt, Literal, SelectColumn, SelectStmt, UpdateStmt,
};
use ledgersql_error::DiagCode;
use ledgersql_schema::{ColumnAttr, Schema, MAX_SELECT_COLUMNS};
use ledgersql_types::{ColumnRef, DataType, TableRef};

use crate::expr::{check_expr, TypeHint};
use crate::{Checker, ExprEnv, View};

fn resolve_table(
    ck: &mut Checker,
    schema: &Schema,
    name: &mut ledgersql_ast::TableName,
) -> Option<TableRef> {
    match schema.find_table(&name.name) {
        Some((r, _)) => {
            name.table = Some(r);
            Some(r)
        }
        None => {
            ck.error(
                name.span,
                DiagCode::UndefinedTable,
                format!("no such table: {}", name.name),
            );
            None
        }
    }
}

pub(crate) fn check_select(ck: &mut Checker, schema: &Schema, stmt: &mut SelectStmt) {
    let table = match &mut stmt.table {
        Some(name) => match resolve_table(ck, schema, name) {
            Some(r) => Some(r),
            None => return,
        },
        None => None,
    };

    if stmt.columns.len() > MAX_SELECT_COLUMNS {
        ck.error(
            stmt.span,
            DiagCode::TooManySelectColumns,
            "too many select columns",
        );
        return;
    }

    let env = ExprEnv {
        view: View::Schema(schema),
        table,
        constant_only: false,
    };
    for col in &mut stmt.columns {
        match col {
            SelectColumn::Star { span } => {
                if table.is_none() {
                    ck.error(*span, DiagCode::MissingTable, "SELECT * requires a table");
                }
            }
            SelectColumn::Expr(expr) => {
                check_expr(ck, &env, expr, TypeHint::Default);
            }
        }
    }
    if let Some(cond) = &mut stmt.where_clause {
        check_expr(ck, &env, cond, TypeHint::Exact(DataType::BOOL));
    }
    for term in &mut stmt.order_by {
        check_expr(ck, &env, &mut term.expr, TypeHint::Default);
    }
}

pub(crate) fn check_insert(ck: &mut Checker, schema: &Schema, stmt: &mut InsertStmt) {
    let Some(t) = resolve_table(ck, schema, &mut stmt.table) else {
        return;
    };
    let table = schema.table(t).expect("resolved table");

    let targets: Vec<ColumnRef> = if stmt.columns.is_empty() {
        (0..table.columns.len())
            .map(|i| ColumnRef::new(i as u8))
            .collect()
    } else {
        let mut refs = Vec::with_capacity(stmt.columns.len());
        let mut ok = true;
        for col in &mut stmt.columns {
            match table.find_column(&col.name) {
                Some((r, _)) => {
                    if refs.contains(&r) {
                        ck.error(
                            col.span,
                            DiagCode::DuplicateColumn,
                            format!("column {} listed twice", col.name),
                        );
                        ok = false;
                    }
                    col.column = Some(r);
                    refs.push(r);
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
            return;
        }
        refs
    };

    // columns omitted from an explicit list must be defaultable
    for (i, col) in table.columns.iter().enumerate() {
        let r = ColumnRef::new(i as u8);
        if !targets.contains(&r)
            && !col.attr.contains(ColumnAttr::HAS_DEFAULT)
            && !col.attr.contains(ColumnAttr::HAS_SEQUENCE)
        {
            ck.error(
                stmt.span,
                DiagCode::NullNotAllowed,
                format!("column {} requires a value", col.name),
            );
        }
    }

    // values are constants or calls; no row context exists to read columns
    let env = ExprEnv {
        view: View::Schema(schema),
        table: None,
        constant_only: false,
    };
    for row in &mut stmt.rows {
        if row.len() != targets.len() {
            ck.error(
                stmt.span,
                DiagCode::TypeMismatch,
                format!("expected {} values per row, got {}", targets.len(), row.len()),
            );
            continue;
        }
        for (expr, target) in row.iter_mut().zip(&targets) {
            let col = table.column(*target).expect("resolved column");
            match &expr.kind {
                ExprKind::Literal(Literal::Default) => {
                    if col.attr.contains(ColumnAttr::HAS_DEFAULT)
                        || col.attr.contains(ColumnAttr::HAS_SEQUENCE)
                    {
                        expr.dtype = Some(col.dtype);
                    } else {
                        ck.error(
                            expr.span,
                            DiagCode::TypeMismatch,
                            format!("column {} has no default", col.name),
                        );
                    }
                }
                _ => {
                    check_expr(ck, &env, expr, TypeHint::Exact(col.dtype));
                }
            }
        }
    }
}

pub(crate) fn check_update(ck: &mut Checker, schema: &Schema, stmt: &mut UpdateStmt) {
    let Some(t) = resolve_table(ck, schema, &mut stmt.table) else {
        return;
    };
    let table = schema.table(t).expect("resolved table");

    let env = ExprEnv {
        view: View::Schema(schema),
        table: Some(t),
        constant_only: false,
    };
    for assign in &mut stmt.assignments {
        let Some((r, col)) = table.find_column(&assign.column.name) else {
            ck.error(
                assign.column.span,
                DiagCode::UndefinedColumn,
                format!("no such column: {}", assign.column.name),
            );
            continue;
        };
        assign.column.column = Some(r);
        if col.attr.contains(ColumnAttr::PRIMARY_KEY) {
            ck.error(
                assign.column.span,
                DiagCode::PrimaryKeyAssignment,
                format!("cannot assign primary-key column {}", col.name),
            );
            continue;
        }
        if matches!(&assign.value.kind, ExprKind::Literal(Literal::Default)) {
            if col.attr.contains(ColumnAttr::HAS_DEFAULT) {
                assign.value.dtype = Some(col.dtype);
            } else {
                ck.error(
                    assign.value.span,
                    DiagCode::TypeMismatch,
                    format!("column {} has no default", col.name),
                );
            }
            continue;
        }
        check_expr(ck, &env, &mut assign.value, TypeHint::Exact(col.dtype));
    }
    if let Some(cond) = &mut stmt.where_clause {
        check_expr(ck, &env, cond, TypeHint::Exact(DataType::BOOL));
    }
}

pub(crate) fn check_delete(ck: &mut Checker, schema: &Schema, stmt: &mut DeleteStmt) {
    let Some(t) = resolve_table(ck, schema, &mut stmt.table) else {
        return;
    };
    let env = ExprEnv {
        view: View::Schema(schema),
        table: Some(t),
        constant_only: false,
    };
    if let Some(cond) = &mut stmt.where_clause {
        check_expr(ck, &env, cond, TypeHint::Exact(DataType::BOOL));
    }
}
