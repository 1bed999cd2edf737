//! Semantic checking for LedgerSQL.
//!
//! Three entry points, one per statement category:
//!
//! - [`check_create`] — CREATE TABLE / CREATE INDEX only; builds and returns
//!   the schema through the transactional [`SchemaCache`].
//! - [`check_query`] — SELECT only, against a committed schema.
//! - [`check_exec`] — INSERT / UPDATE / DELETE only.
//!
//! Statement processing always continues past individual failures,
//! accumulating a complete [`DiagnosticList`]; only the presence of an
//! `Error`-severity entry fails the overall check. A failing statement or
//! column rolls its schema-cache scope back; siblings still run.

use ledgersql_ast::{Span, Statement};
use ledgersql_error::{DiagCode, Diagnostic, DiagnosticList};
use ledgersql_schema::{Column, Schema, SchemaCache};
use ledgersql_types::{ColumnRef, TableRef};

mod create;
mod expr;
mod query;

pub use expr::TypeHint;

/// Knobs for a check run.
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    /// When set (the default), out-of-range constants are errors; when
    /// clear, they crop to range with a warning.
    pub safe_math: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self { safe_math: true }
    }
}

/// Read access to schema entities during checking, from either the cache
/// under construction (CREATE) or a committed schema (query/exec).
pub(crate) enum View<'a> {
    Cache(&'a SchemaCache),
    Schema(&'a Schema),
}

impl View<'_> {
    pub(crate) fn find_table(&self, name: &str) -> Option<TableRef> {
        match self {
            View::Cache(cache) => cache.find_table(name),
            View::Schema(schema) => schema.find_table(name).map(|(r, _)| r),
        }
    }

    pub(crate) fn find_column(&self, table: TableRef, name: &str) -> Option<(ColumnRef, Column)> {
        match self {
            View::Cache(cache) => cache
                .find_column(table, name)
                .map(|(r, c)| (r, c.clone())),
            View::Schema(schema) => schema
                .table(table)?
                .find_column(name)
                .map(|(r, c)| (r, c.clone())),
        }
    }

    pub(crate) fn column(&self, table: TableRef, r: ColumnRef) -> Option<Column> {
        match self {
            View::Cache(cache) => cache.column(table, r).cloned(),
            View::Schema(schema) => schema.table(table)?.column(r).cloned(),
        }
    }
}

/// Resolution environment for one expression tree.
pub(crate) struct ExprEnv<'a> {
    pub view: View<'a>,
    pub table: Option<TableRef>,
    pub constant_only: bool,
}

/// Shared diagnostic accumulator and options.
pub(crate) struct Checker {
    pub diags: DiagnosticList,
    pub opts: CheckOptions,
}

impl Checker {
    fn new(opts: CheckOptions) -> Self {
        Self {
            diags: DiagnosticList::new(),
            opts,
        }
    }

    pub(crate) fn error(&mut self, span: Span, code: DiagCode, message: impl Into<String>) {
        self.diags
            .push(Diagnostic::error(span.start, span.len(), code, message));
    }

    pub(crate) fn warning(&mut self, span: Span, code: DiagCode, message: impl Into<String>) {
        self.diags
            .push(Diagnostic::warning(span.start, span.len(), code, message));
    }
}

/// Check a CREATE statement set and build the schema it defines.
///
/// Any non-CREATE statement is a fatal "disallowed command"; a result with
/// no tables (even with no other errors) fails with "no command".
pub fn check_create(statements: &mut [Statement]) -> (Schema, DiagnosticList) {
    check_create_with(statements, CheckOptions::default())
}

/// [`check_create`] with explicit options.
pub fn check_create_with(
    statements: &mut [Statement],
    opts: CheckOptions,
) -> (Schema, DiagnosticList) {
    let mut ck = Checker::new(opts);
    let mut cache = SchemaCache::new(Schema::new());
    for stmt in statements.iter_mut() {
        let span = tracing::debug_span!("check_create", kind = ?stmt.kind());
        let _guard = span.enter();
        match stmt {
            Statement::CreateTable(create) => {
                create::check_create_table(&mut ck, &mut cache, create);
            }
            Statement::CreateIndex(create) => {
                create::check_create_index(&mut ck, &mut cache, create);
            }
            other => {
                ck.error(
                    other.span(),
                    DiagCode::DisallowedCommand,
                    "only CREATE TABLE and CREATE INDEX are allowed here",
                );
            }
        }
    }
    let schema = cache.into_schema();
    if schema.is_empty() {
        ck.error(Span::ZERO, DiagCode::NoCommand, "no CREATE TABLE statement");
    }
    (schema, ck.diags)
}

/// Check a query statement set (SELECT only) against a committed schema.
pub fn check_query(statements: &mut [Statement], schema: &Schema) -> DiagnosticList {
    check_query_with(statements, schema, CheckOptions::default())
}

/// [`check_query`] with explicit options.
pub fn check_query_with(
    statements: &mut [Statement],
    schema: &Schema,
    opts: CheckOptions,
) -> DiagnosticList {
    let mut ck = Checker::new(opts);
    if statements.is_empty() {
        ck.error(Span::ZERO, DiagCode::NoCommand, "no statement");
    }
    for stmt in statements.iter_mut() {
        let span = tracing::debug_span!("check_query", kind = ?stmt.kind());
        let _guard = span.enter();
        match stmt {
            Statement::Select(select) => query::check_select(&mut ck, schema, select),
            other => ck.error(
                other.span(),
                DiagCode::DisallowedCommand,
                "only SELECT is allowed here",
            ),
        }
    }
    ck.diags
}

/// Check an exec statement set (INSERT/UPDATE/DELETE only) against a
/// committed schema.
pub fn check_exec(statements: &mut [Statement], schema: &Schema) -> DiagnosticList {
    check_exec_with(statements, schema, CheckOptions::default())
}

/// [`check_exec`] with explicit options.
pub fn check_exec_with(
    statements: &mut [Statement],
    schema: &Schema,
    opts: CheckOptions,
) -> DiagnosticList {
    let mut ck = Checker::new(opts);
    if statements.is_empty() {
        ck.error(Span::ZERO, DiagCode::NoCommand, "no statement");
    }
    for stmt in statements.iter_mut() {
        let span = tracing::debug_span!("check_exec", kind = ?stmt.kind());
        let _guard = span.enter();
        match stmt {
            Statement::Insert(insert) => query::check_insert(&mut ck, schema, insert),
            Statement::Update(update) => query::check_update(&mut ck, schema, update),
            Statement::Delete(delete) => query::check_delete(&mut ck, schema, delete),
            other => ck.error(
                other.span(),
                DiagCode::DisallowedCommand,
                "only INSERT, UPDATE, and DELETE are allowed here",
            ),
        }
    }
    ck.diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersql_ast::{
        BinaryOp, ColumnConstraint, ColumnDef, ColumnName, CreateIndexStmt, CreateTableStmt,
        Expr, ExprKind, Ident, InsertStmt, Literal, SelectColumn, SelectStmt, TableName,
    };
    use ledgersql_error::Severity;
    use ledgersql_schema::{ColumnAttr, IndexAttr};
    use ledgersql_types::DataType;

    fn sp() -> Span {
        Span::ZERO
    }

    fn num(s: &str) -> Expr {
        Expr::literal(Literal::Number(s.parse().unwrap()), sp())
    }

    fn col(name: &str) -> Expr {
        Expr::new(ExprKind::Column(ColumnName::new(name, sp())), sp())
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            sp(),
        )
    }

    fn column_def(name: &str, dtype: DataType, constraints: Vec<ColumnConstraint>) -> ColumnDef {
        ColumnDef {
            name: ColumnName::new(name, sp()),
            dtype,
            constraints,
            span: sp(),
        }
    }

    fn create_table(name: &str, columns: Vec<ColumnDef>) -> Statement {
        Statement::CreateTable(CreateTableStmt {
            table: TableName::new(name, sp()),
            columns,
            span: sp(),
        })
    }

    fn accounts_schema() -> Schema {
        let mut stmts = vec![create_table(
            "accounts",
            vec![
                column_def(
                    "id",
                    DataType::UINT64,
                    vec![ColumnConstraint::PrimaryKey { span: sp() }],
                ),
                column_def("balance", DataType::uint(16).unwrap(), vec![]),
                column_def("owner", DataType::ADDRESS, vec![]),
                column_def("memo", DataType::DYNAMIC_BYTES, vec![]),
            ],
        )];
        let (schema, diags) = check_create(&mut stmts);
        assert!(!diags.has_errors(), "{diags:?}");
        schema
    }

    #[test]
    fn create_synthesizes_primary_index() {
        let schema = accounts_schema();
        let table = &schema.tables[0];
        assert_eq!(table.name, "accounts");
        assert_eq!(table.columns.len(), 4);
        assert_eq!(table.indices.len(), 1);
        let primary = &table.indices[0];
        assert_eq!(primary.name, "primary");
        assert!(primary.attr.contains(IndexAttr::UNIQUE));
        assert!(primary.attr.contains(IndexAttr::AUTO));
        assert!(table.columns[0].attr.contains(ColumnAttr::PRIMARY_KEY));
    }

    #[test]
    fn empty_statement_set_is_no_command() {
        let (schema, diags) = check_create(&mut []);
        assert!(schema.is_empty());
        assert!(diags.has_errors());
        assert_eq!(diags.entries()[0].code, DiagCode::NoCommand);
    }

    #[test]
    fn non_create_statement_is_disallowed() {
        let mut stmts = vec![Statement::Select(SelectStmt {
            columns: vec![SelectColumn::Star { span: sp() }],
            table: None,
            where_clause: None,
            order_by: vec![],
            offset: None,
            limit: None,
            span: sp(),
        })];
        let (_, diags) = check_create(&mut stmts);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::DisallowedCommand));
    }

    #[test]
    fn unique_constraint_is_idempotent() {
        let mut stmts = vec![create_table(
            "t",
            vec![column_def(
                "v",
                DataType::uint(8).unwrap(),
                vec![
                    ColumnConstraint::Unique { span: sp() },
                    ColumnConstraint::Unique { span: sp() },
                ],
            )],
        )];
        let (schema, diags) = check_create(&mut stmts);
        assert!(!diags.has_errors());
        assert_eq!(schema.tables[0].indices.len(), 1);
        assert_eq!(schema.tables[0].indices[0].name, "v_unique");
    }

    #[test]
    fn failing_column_rolls_back_but_siblings_survive() {
        let mut stmts = vec![create_table(
            "t",
            vec![
                column_def("a", DataType::BOOL, vec![]),
                // duplicate name fails this column only
                column_def("a", DataType::BOOL, vec![]),
                column_def("b", DataType::BOOL, vec![]),
            ],
        )];
        let (schema, diags) = check_create(&mut stmts);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::DuplicateColumn));
        // statement failed as a whole; the table did not survive
        assert!(schema.is_empty() || schema.tables.iter().all(|t| t.name != "t"));
    }

    #[test]
    fn foreign_key_requires_identical_type() {
        let mut stmts = vec![
            create_table(
                "parents",
                vec![column_def(
                    "id",
                    DataType::UINT64,
                    vec![ColumnConstraint::PrimaryKey { span: sp() }],
                )],
            ),
            create_table(
                "children",
                vec![column_def(
                    "parent",
                    DataType::uint(4).unwrap(),
                    vec![ColumnConstraint::ForeignKey {
                        table: TableName::new("parents", sp()),
                        column: ColumnName::new("id", sp()),
                        span: sp(),
                    }],
                )],
            ),
        ];
        let (_, diags) = check_create(&mut stmts);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::ForeignKeyTypeMismatch));
    }

    #[test]
    fn foreign_key_marks_target_index_referenced() {
        let mut stmts = vec![
            create_table(
                "parents",
                vec![column_def(
                    "id",
                    DataType::UINT64,
                    vec![ColumnConstraint::PrimaryKey { span: sp() }],
                )],
            ),
            create_table(
                "children",
                vec![column_def(
                    "parent",
                    DataType::UINT64,
                    vec![ColumnConstraint::ForeignKey {
                        table: TableName::new("parents", sp()),
                        column: ColumnName::new("id", sp()),
                        span: sp(),
                    }],
                )],
            ),
        ];
        let (schema, diags) = check_create(&mut stmts);
        assert!(!diags.has_errors(), "{diags:?}");
        let parents = &schema.tables[0];
        assert!(parents.indices[0].attr.contains(IndexAttr::REFERENCED));
        assert!(schema.tables[1].columns[0]
            .attr
            .contains(ColumnAttr::HAS_FOREIGN_KEY));
    }

    #[test]
    fn autoincrement_rejects_non_integer() {
        let mut stmts = vec![create_table(
            "t",
            vec![column_def(
                "v",
                DataType::BOOL,
                vec![ColumnConstraint::Autoincrement { span: sp() }],
            )],
        )];
        let (_, diags) = check_create(&mut stmts);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::BadSequenceType));
    }

    #[test]
    fn default_null_is_rejected() {
        let mut stmts = vec![create_table(
            "t",
            vec![column_def(
                "v",
                DataType::uint(8).unwrap(),
                vec![ColumnConstraint::Default {
                    expr: Expr::literal(Literal::Null, sp()),
                    span: sp(),
                }],
            )],
        )];
        let (_, diags) = check_create(&mut stmts);
        assert!(diags.entries().iter().any(|d| d.code == DiagCode::NullDefault));
    }

    #[test]
    fn default_folds_constant_expression() {
        let mut stmts = vec![create_table(
            "t",
            vec![column_def(
                "v",
                DataType::uint(8).unwrap(),
                vec![ColumnConstraint::Default {
                    expr: binary(BinaryOp::Add, num("2"), num("3")),
                    span: sp(),
                }],
            )],
        )];
        let (schema, diags) = check_create(&mut stmts);
        assert!(!diags.has_errors(), "{diags:?}");
        let col = &schema.tables[0].columns[0];
        assert!(col.attr.contains(ColumnAttr::HAS_DEFAULT));
        assert_eq!(
            col.default,
            Some(ledgersql_schema::ColumnValue::Number("5".parse().unwrap()))
        );
    }

    #[test]
    fn create_index_renames_auto_index() {
        let mut stmts = vec![
            create_table(
                "t",
                vec![column_def(
                    "v",
                    DataType::uint(8).unwrap(),
                    vec![ColumnConstraint::Unique { span: sp() }],
                )],
            ),
            Statement::CreateIndex(CreateIndexStmt {
                name: Ident::new("by_v", sp()),
                table: TableName::new("t", sp()),
                unique: true,
                columns: vec![ColumnName::new("v", sp())],
                span: sp(),
            }),
        ];
        let (schema, diags) = check_create(&mut stmts);
        assert!(!diags.has_errors(), "{diags:?}");
        assert_eq!(schema.tables[0].indices.len(), 1);
        assert_eq!(schema.tables[0].indices[0].name, "by_v");
    }

    #[test]
    fn create_index_rejects_duplicate_column() {
        let mut stmts = vec![
            create_table("t", vec![column_def("v", DataType::BOOL, vec![])]),
            Statement::CreateIndex(CreateIndexStmt {
                name: Ident::new("i", sp()),
                table: TableName::new("t", sp()),
                unique: false,
                columns: vec![ColumnName::new("v", sp()), ColumnName::new("v", sp())],
                span: sp(),
            }),
        ];
        let (_, diags) = check_create(&mut stmts);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::DuplicateIndexColumn));
    }

    #[test]
    fn where_must_be_bool() {
        let schema = accounts_schema();
        let mut stmts = vec![Statement::Select(SelectStmt {
            columns: vec![SelectColumn::Star { span: sp() }],
            table: Some(TableName::new("accounts", sp())),
            where_clause: Some(col("balance")),
            order_by: vec![],
            offset: None,
            limit: None,
            span: sp(),
        })];
        let diags = check_query(&mut stmts, &schema);
        assert!(diags.entries().iter().any(|d| d.code == DiagCode::TypeMismatch));
    }

    #[test]
    fn comparison_binds_literal_to_column_type() {
        let schema = accounts_schema();
        let mut stmts = vec![Statement::Select(SelectStmt {
            columns: vec![SelectColumn::Star { span: sp() }],
            table: Some(TableName::new("accounts", sp())),
            where_clause: Some(binary(BinaryOp::Eq, col("balance"), num("100"))),
            order_by: vec![],
            offset: None,
            limit: None,
            span: sp(),
        })];
        let diags = check_query(&mut stmts, &schema);
        assert!(!diags.has_errors(), "{diags:?}");
        let Statement::Select(select) = &stmts[0] else {
            unreachable!()
        };
        let cond = select.where_clause.as_ref().unwrap();
        assert_eq!(cond.dtype, Some(DataType::BOOL));
        let ExprKind::Binary { right, .. } = &cond.kind else {
            unreachable!()
        };
        assert_eq!(right.dtype, Some(DataType::uint(16).unwrap()));
    }

    #[test]
    fn constant_arithmetic_folds_in_place() {
        let schema = accounts_schema();
        let mut stmts = vec![Statement::Select(SelectStmt {
            columns: vec![SelectColumn::Star { span: sp() }],
            table: Some(TableName::new("accounts", sp())),
            where_clause: Some(binary(
                BinaryOp::Eq,
                col("balance"),
                binary(BinaryOp::Add, num("2"), num("3")),
            )),
            order_by: vec![],
            offset: None,
            limit: None,
            span: sp(),
        })];
        let diags = check_query(&mut stmts, &schema);
        assert!(!diags.has_errors(), "{diags:?}");
        let Statement::Select(select) = &stmts[0] else {
            unreachable!()
        };
        let ExprKind::Binary { right, .. } = &select.where_clause.as_ref().unwrap().kind else {
            unreachable!()
        };
        assert_eq!(
            right.as_literal(),
            Some(&Literal::Number("5".parse().unwrap()))
        );
    }

    fn insert_row(values: Vec<Expr>) -> Statement {
        Statement::Insert(InsertStmt {
            table: TableName::new("accounts", sp()),
            columns: vec![],
            rows: vec![values],
            span: sp(),
        })
    }

    fn sample_address() -> Expr {
        Expr::literal(
            Literal::Address(ledgersql_ast::AddressLit {
                text: "0x52908400098527886e0f7030069857d2e4169ee7".to_owned(),
            }),
            sp(),
        )
    }

    #[test]
    fn insert_type_checks_each_column() {
        let schema = accounts_schema();
        let mut stmts = vec![insert_row(vec![
            num("1"),
            num("100"),
            sample_address(),
            Expr::literal(Literal::Bytes(b"hi".to_vec()), sp()),
        ])];
        let diags = check_exec(&mut stmts, &schema);
        assert!(!diags.has_errors(), "{diags:?}");
    }

    #[test]
    fn insert_overflow_is_error_under_safe_math() {
        let schema = accounts_schema();
        // balance is uint128; id is uint64 -- 2^64 overflows id
        let mut stmts = vec![insert_row(vec![
            num("18446744073709551616"),
            num("1"),
            sample_address(),
            Expr::literal(Literal::Bytes(vec![]), sp()),
        ])];
        let diags = check_exec(&mut stmts, &schema);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::ConstantOverflow));
    }

    #[test]
    fn insert_overflow_crops_with_warning_without_safe_math() {
        let schema = accounts_schema();
        let mut stmts = vec![insert_row(vec![
            num("18446744073709551616"),
            num("1"),
            sample_address(),
            Expr::literal(Literal::Bytes(vec![]), sp()),
        ])];
        let diags = check_exec_with(&mut stmts, &schema, CheckOptions { safe_math: false });
        assert!(!diags.has_errors(), "{diags:?}");
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::ConstantCropped && d.severity == Severity::Warning));
        // cropped value wrapped to zero
        let Statement::Insert(insert) = &stmts[0] else {
            unreachable!()
        };
        assert_eq!(
            insert.rows[0][0].as_literal(),
            Some(&Literal::Number("0".parse().unwrap()))
        );
    }

    #[test]
    fn update_rejects_primary_key_assignment() {
        let schema = accounts_schema();
        let mut stmts = vec![Statement::Update(ledgersql_ast::UpdateStmt {
            table: TableName::new("accounts", sp()),
            assignments: vec![ledgersql_ast::Assignment {
                column: ColumnName::new("id", sp()),
                value: num("9"),
                span: sp(),
            }],
            where_clause: None,
            span: sp(),
        })];
        let diags = check_exec(&mut stmts, &schema);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::PrimaryKeyAssignment));
    }

    #[test]
    fn query_gate_rejects_exec_statements() {
        let schema = accounts_schema();
        let mut stmts = vec![insert_row(vec![num("1")])];
        let diags = check_query(&mut stmts, &schema);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::DisallowedCommand));
    }

    #[test]
    fn size_hint_two_stage_inference() {
        // CAST pushes a one-byte size hint: 100 fits int8, 200 spills to uint8
        let schema = accounts_schema();
        for (value, expected) in [
            ("100", DataType::int(1).unwrap()),
            ("200", DataType::uint(1).unwrap()),
        ] {
            let mut stmts = vec![Statement::Select(SelectStmt {
                columns: vec![SelectColumn::Expr(Expr::new(
                    ExprKind::Cast {
                        operand: Box::new(num(value)),
                        target: DataType::uint(1).unwrap(),
                    },
                    sp(),
                ))],
                table: Some(TableName::new("accounts", sp())),
                where_clause: None,
                order_by: vec![],
                offset: None,
                limit: None,
                span: sp(),
            })];
            let diags = check_query(&mut stmts, &schema);
            assert!(!diags.has_errors(), "{value}: {diags:?}");
            let Statement::Select(select) = &stmts[0] else {
                unreachable!()
            };
            let SelectColumn::Expr(cast) = &select.columns[0] else {
                unreachable!()
            };
            let ExprKind::Cast { operand, .. } = &cast.kind else {
                unreachable!()
            };
            assert_eq!(operand.dtype, Some(expected), "literal {value}");
        }
    }

    #[test]
    fn fixed_bytes_length_must_match() {
        let mut stmts = vec![create_table(
            "t",
            vec![column_def("h", DataType::bytes(4).unwrap(), vec![])],
        )];
        let (schema, diags) = check_create(&mut stmts);
        assert!(!diags.has_errors());
        let mut bad = vec![Statement::Insert(InsertStmt {
            table: TableName::new("t", sp()),
            columns: vec![],
            rows: vec![vec![Expr::literal(Literal::Bytes(b"toolong".to_vec()), sp())]],
            span: sp(),
        })];
        let diags = check_exec(&mut bad, &schema);
        assert!(diags
            .entries()
            .iter()
            .any(|d| d.code == DiagCode::BadBytesLength));
    }
}
