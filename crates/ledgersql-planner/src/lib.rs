//! Cost-based query planning for LedgerSQL.
//!
//! The planner consumes a fully checked statement plus the committed schema.
//! WHERE clauses are first attributed bottom-up into [`Clause`] trees
//! (column sets, enumerability, hash-key sets), then [`plan_where`] searches
//! the strategy space — full scan, hash-index scan, filtered index-range
//! scan, AND pivots, OR unions — and keeps the cheapest [`PlanStep`] tree.
//! Costs are integral units so planning itself is deterministic and
//! meterable; ties keep the first plan found.

use std::fmt;

use ledgersql_ast::{
    Assignment, Expr, OrderingTerm, SelectColumn, SelectStmt, Statement,
};
use ledgersql_schema::{Schema, Table};
use ledgersql_types::{ColumnRef, IndexRef, TableRef};
use thiserror::Error;

mod clause;

pub use clause::{parse_clause, Clause, ClauseAttr, HashKey, MAX_HASH_KEYS};

/// Maximum recursion depth of the AND/OR strategy search.
pub const MAX_PLAN_DEPTH: usize = 5;

/// Estimated row count of a full table scan.
const TABLE_ROW_ESTIMATE: u64 = 256;
/// Estimated distinct-value count of an index.
const INDEX_VALUES_ESTIMATE: u64 = 64;
/// Cost units per hash-key lookup.
const HASH_LOOKUP_COST: u64 = 2;

/// Errors from planning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The statement reached the planner without complete checking.
    #[error("unchecked input: {0}")]
    Unchecked(String),

    /// Internal invariant violation. Not a user error.
    #[error("internal planner error: {0}")]
    Internal(String),
}

/// One node of the cost-scored plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    /// Enumerate every row of the table.
    ScanTable {
        /// Scanned table.
        table: TableRef,
        /// Estimated cost.
        cost: u64,
        /// Estimated output rows.
        rows: u64,
    },
    /// Look rows up under literal hash keys of one index.
    ScanIndices {
        /// Scanned table.
        table: TableRef,
        /// Index to probe.
        index: IndexRef,
        /// Columns of the key rows, ascending-sorted.
        key_columns: Vec<ColumnRef>,
        /// Literal key rows.
        keys: Vec<Vec<HashKey>>,
        /// Estimated cost.
        cost: u64,
        /// Estimated output rows.
        rows: u64,
    },
    /// Enumerate an index's distinct values, filter them by a residual
    /// condition, and expand the survivors to rows.
    ScanIndexValues {
        /// Scanned table.
        table: TableRef,
        /// Index whose values are enumerated.
        index: IndexRef,
        /// Residual condition over the index-key fields.
        condition: Expr,
        /// Estimated cost.
        cost: u64,
        /// Estimated output rows.
        rows: u64,
    },
    /// Filter a row source by a condition.
    Filter {
        /// Row source.
        source: Box<PlanStep>,
        /// Filter condition.
        condition: Expr,
        /// Estimated cost.
        cost: u64,
        /// Estimated output rows.
        rows: u64,
    },
    /// Union of row sources.
    Union {
        /// Operand sub-plans.
        sources: Vec<PlanStep>,
        /// Estimated cost.
        cost: u64,
        /// Estimated output rows.
        rows: u64,
    },
    /// Intersection of row sources.
    Intersect {
        /// Operand sub-plans.
        sources: Vec<PlanStep>,
        /// Estimated cost.
        cost: u64,
        /// Estimated output rows.
        rows: u64,
    },
    /// Insert literal rows.
    InsertStep {
        /// Target table.
        table: TableRef,
        /// Target columns, in value order.
        columns: Vec<ColumnRef>,
        /// Value rows.
        rows_exprs: Vec<Vec<Expr>>,
        /// Estimated cost.
        cost: u64,
    },
    /// Project, order, and window a row source.
    SelectStep {
        /// Source table.
        table: TableRef,
        /// Row source.
        source: Box<PlanStep>,
        /// Output columns.
        columns: Vec<SelectColumn>,
        /// ORDER BY keys.
        order_by: Vec<OrderingTerm>,
        /// Row offset.
        offset: Option<u64>,
        /// Row limit.
        limit: Option<u64>,
        /// Estimated cost.
        cost: u64,
    },
    /// Evaluate a table-less select list.
    SelectWithoutTable {
        /// Output expressions.
        columns: Vec<Expr>,
        /// Estimated cost.
        cost: u64,
    },
    /// Update fields of a row source.
    UpdateStep {
        /// Target table.
        table: TableRef,
        /// Row source.
        source: Box<PlanStep>,
        /// Assignments `(column, value)`.
        assignments: Vec<(ColumnRef, Expr)>,
        /// Estimated cost.
        cost: u64,
    },
    /// Delete a row source.
    DeleteStep {
        /// Target table.
        table: TableRef,
        /// Row source.
        source: Box<PlanStep>,
        /// Estimated cost.
        cost: u64,
    },
}

impl PlanStep {
    /// Estimated cost of this step, operands included.
    #[must_use]
    pub const fn cost(&self) -> u64 {
        match self {
            Self::ScanTable { cost, .. }
            | Self::ScanIndices { cost, .. }
            | Self::ScanIndexValues { cost, .. }
            | Self::Filter { cost, .. }
            | Self::Union { cost, .. }
            | Self::Intersect { cost, .. }
            | Self::InsertStep { cost, .. }
            | Self::SelectStep { cost, .. }
            | Self::SelectWithoutTable { cost, .. }
            | Self::UpdateStep { cost, .. }
            | Self::DeleteStep { cost, .. } => *cost,
        }
    }

    /// Estimated output row count of a row-producing step.
    #[must_use]
    pub const fn rows(&self) -> u64 {
        match self {
            Self::ScanTable { rows, .. }
            | Self::ScanIndices { rows, .. }
            | Self::ScanIndexValues { rows, .. }
            | Self::Filter { rows, .. }
            | Self::Union { rows, .. }
            | Self::Intersect { rows, .. } => *rows,
            _ => 0,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ScanTable { .. } => "ScanTable",
            Self::ScanIndices { .. } => "ScanIndices",
            Self::ScanIndexValues { .. } => "ScanIndexValues",
            Self::Filter { .. } => "FilterStep",
            Self::Union { .. } => "UnionStep",
            Self::Intersect { .. } => "IntersectStep",
            Self::InsertStep { .. } => "InsertStep",
            Self::SelectStep { .. } => "SelectStep",
            Self::SelectWithoutTable { .. } => "SelectWithoutTable",
            Self::UpdateStep { .. } => "UpdateStep",
            Self::DeleteStep { .. } => "DeleteStep",
        }
    }

    fn operands(&self) -> Vec<&PlanStep> {
        match self {
            Self::Filter { source, .. }
            | Self::SelectStep { source, .. }
            | Self::UpdateStep { source, .. }
            | Self::DeleteStep { source, .. } => vec![source],
            Self::Union { sources, .. } | Self::Intersect { sources, .. } => {
                sources.iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}{} (cost {})",
            "",
            self.name(),
            self.cost(),
            indent = depth * 2
        )?;
        for op in self.operands() {
            op.fmt_indented(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

// ---------------------------------------------------------------------------
// WHERE planning
// ---------------------------------------------------------------------------

fn scan_table(table: TableRef) -> PlanStep {
    PlanStep::ScanTable {
        table,
        cost: TABLE_ROW_ESTIMATE,
        rows: TABLE_ROW_ESTIMATE,
    }
}

fn filtered(source: PlanStep, condition: Expr) -> PlanStep {
    let rows = (source.rows() / 2).max(1);
    let cost = source.cost() + source.rows();
    PlanStep::Filter {
        source: Box::new(source),
        condition,
        cost,
        rows,
    }
}

/// Plan one WHERE clause over a table. Always considers the brute-force
/// full scan; index strategies and AND/OR recursion only improve on it.
pub fn plan_where(
    clause: &Clause<'_>,
    table: TableRef,
    tbl: &Table,
    depth: usize,
) -> PlanStep {
    let mut best = filtered(scan_table(table), clause.expr.clone());

    let mut consider = |candidate: PlanStep, best: &mut PlanStep| {
        if candidate.cost() < best.cost() {
            *best = candidate;
        }
    };

    if clause.attr.contains(ClauseAttr::FORCE_SCAN) {
        return best;
    }

    for (i, index) in tbl.indices.iter().enumerate() {
        let index_ref = IndexRef::new(i as u8);
        if clause.is_enumerable() && clause.key_columns == index.columns {
            let rows = clause.keys.len() as u64;
            let candidate = PlanStep::ScanIndices {
                table,
                index: index_ref,
                key_columns: clause.key_columns.clone(),
                keys: clause.keys.clone(),
                cost: rows * HASH_LOOKUP_COST,
                rows,
            };
            consider(candidate, &mut best);
        } else if !clause.columns.is_empty()
            && clause
                .columns
                .iter()
                .all(|c| index.columns.contains(c))
        {
            // the index's columns cover the clause: filter its distinct
            // values, then expand survivors to rows
            let candidate = PlanStep::ScanIndexValues {
                table,
                index: index_ref,
                condition: clause.expr.clone(),
                cost: INDEX_VALUES_ESTIMATE * HASH_LOOKUP_COST,
                rows: INDEX_VALUES_ESTIMATE,
            };
            consider(candidate, &mut best);
        }
    }

    if depth >= MAX_PLAN_DEPTH {
        return best;
    }

    if clause.attr.contains(ClauseAttr::AND) && clause.children.len() == 2 {
        // pivot: resolve one operand via the best available strategy, then
        // filter its rows by the other operand
        for pivot in 0..2 {
            let pivot_plan = plan_where(&clause.children[pivot], table, tbl, depth + 1);
            let residual = clause.children[1 - pivot].expr.clone();
            consider(filtered(pivot_plan, residual), &mut best);
        }
        let l = plan_where(&clause.children[0], table, tbl, depth + 1);
        let r = plan_where(&clause.children[1], table, tbl, depth + 1);
        let rows = l.rows().min(r.rows());
        let cost = l.cost() + r.cost() + rows;
        consider(
            PlanStep::Intersect {
                sources: vec![l, r],
                cost,
                rows,
            },
            &mut best,
        );
    }

    if clause.attr.contains(ClauseAttr::OR) && clause.children.len() == 2 {
        let l = plan_where(&clause.children[0], table, tbl, depth + 1);
        let r = plan_where(&clause.children[1], table, tbl, depth + 1);
        let rows = l.rows() + r.rows();
        let cost = l.cost() + r.cost() + rows;
        consider(
            PlanStep::Union {
                sources: vec![l, r],
                cost,
                rows,
            },
            &mut best,
        );
    }

    best
}

// ---------------------------------------------------------------------------
// Statement planning
// ---------------------------------------------------------------------------

fn resolved_table(name: &ledgersql_ast::TableName) -> Result<TableRef, PlanError> {
    name.table
        .ok_or_else(|| PlanError::Unchecked(format!("unresolved table {}", name.name)))
}

fn plan_row_source(
    where_clause: Option<&Expr>,
    table: TableRef,
    tbl: &Table,
) -> Result<PlanStep, PlanError> {
    match where_clause {
        Some(cond) => {
            let clause = parse_clause(cond)?;
            let plan = plan_where(&clause, table, tbl, 0);
            tracing::debug!(cost = plan.cost(), "where plan chosen");
            Ok(plan)
        }
        None => Ok(scan_table(table)),
    }
}

fn plan_select(stmt: &SelectStmt, schema: &Schema) -> Result<PlanStep, PlanError> {
    let Some(name) = &stmt.table else {
        let columns: Vec<Expr> = stmt
            .columns
            .iter()
            .filter_map(|c| match c {
                SelectColumn::Expr(e) => Some(e.clone()),
                SelectColumn::Star { .. } => None,
            })
            .collect();
        let cost = columns.len() as u64;
        return Ok(PlanStep::SelectWithoutTable { columns, cost });
    };
    let table = resolved_table(name)?;
    let tbl = schema
        .table(table)
        .ok_or_else(|| PlanError::Internal("dangling table ref".to_owned()))?;
    let source = plan_row_source(stmt.where_clause.as_ref(), table, tbl)?;
    let sort_cost = if stmt.order_by.is_empty() {
        0
    } else {
        source.rows()
    };
    let cost = source.cost() + source.rows() + sort_cost;
    Ok(PlanStep::SelectStep {
        table,
        source: Box::new(source),
        columns: stmt.columns.clone(),
        order_by: stmt.order_by.clone(),
        offset: stmt.offset,
        limit: stmt.limit,
        cost,
    })
}

/// Plan one checked statement.
pub fn plan_statement(stmt: &Statement, schema: &Schema) -> Result<PlanStep, PlanError> {
    match stmt {
        Statement::Select(select) => plan_select(select, schema),

        Statement::Insert(insert) => {
            let table = resolved_table(&insert.table)?;
            let tbl = schema
                .table(table)
                .ok_or_else(|| PlanError::Internal("dangling table ref".to_owned()))?;
            let columns: Vec<ColumnRef> = if insert.columns.is_empty() {
                (0..tbl.columns.len())
                    .map(|i| ColumnRef::new(i as u8))
                    .collect()
            } else {
                insert
                    .columns
                    .iter()
                    .map(|c| {
                        c.column.ok_or_else(|| {
                            PlanError::Unchecked(format!("unresolved column {}", c.name))
                        })
                    })
                    .collect::<Result<_, _>>()?
            };
            Ok(PlanStep::InsertStep {
                table,
                columns,
                rows_exprs: insert.rows.clone(),
                cost: insert.rows.len() as u64,
            })
        }

        Statement::Update(update) => {
            let table = resolved_table(&update.table)?;
            let tbl = schema
                .table(table)
                .ok_or_else(|| PlanError::Internal("dangling table ref".to_owned()))?;
            let source = plan_row_source(update.where_clause.as_ref(), table, tbl)?;
            let assignments: Vec<(ColumnRef, Expr)> = update
                .assignments
                .iter()
                .map(|a: &Assignment| {
                    a.column
                        .column
                        .map(|r| (r, a.value.clone()))
                        .ok_or_else(|| {
                            PlanError::Unchecked(format!("unresolved column {}", a.column.name))
                        })
                })
                .collect::<Result<_, _>>()?;
            let cost = source.cost() + source.rows();
            Ok(PlanStep::UpdateStep {
                table,
                source: Box::new(source),
                assignments,
                cost,
            })
        }

        Statement::Delete(delete) => {
            let table = resolved_table(&delete.table)?;
            let tbl = schema
                .table(table)
                .ok_or_else(|| PlanError::Internal("dangling table ref".to_owned()))?;
            let source = plan_row_source(delete.where_clause.as_ref(), table, tbl)?;
            let cost = source.cost() + source.rows();
            Ok(PlanStep::DeleteStep {
                table,
                source: Box::new(source),
                cost,
            })
        }

        Statement::CreateTable(_) | Statement::CreateIndex(_) => Err(PlanError::Unchecked(
            "CREATE statements are not planned".to_owned(),
        )),
    }
}
