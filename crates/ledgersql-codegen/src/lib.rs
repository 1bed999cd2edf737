//! Lowers a [`PlanStep`] tree plus its embedded expression trees into a
//! flat [`Instruction`] sequence over virtual registers.
//!
//! Registers are allocated in arrival order, seeded past the registers
//! reserved for raw per-row column storage. A column→register map tracks
//! which columns are loaded and row-aligned with the current row-id
//! register; every FILTER propagates its mask onto the loaded columns to
//! keep that alignment. `>=`, `<=`, and `<>` have no dedicated opcodes and
//! are synthesized from GT/LT/EQ plus OR/NOT; IN unrolls into an EQ/OR
//! chain.

use std::collections::{BTreeMap, BTreeSet};

use ledgersql_ast::{BinaryOp, Expr, ExprKind, Literal, OrderingTerm, SelectColumn, UnaryOp};
use ledgersql_planner::PlanStep;
use ledgersql_schema::{ColumnValue, Schema, Table};
use ledgersql_types::{ColumnRef, DataType, Decimal, TableRef};
use ledgersql_vm::{Instruction, Opcode, Operand, Raw, RegIndex};
use thiserror::Error;

/// Errors from lowering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodegenError {
    /// The plan reached lowering without complete checking.
    #[error("unchecked input: {0}")]
    Unchecked(String),

    /// The construct has no lowering.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// Internal invariant violation.
    #[error("internal codegen error: {0}")]
    Internal(String),
}

/// Lower a plan to bytecode.
pub fn generate(plan: &PlanStep, schema: &Schema) -> Result<Vec<Instruction>, CodegenError> {
    let mut cg = CodeGen::new(schema);
    cg.lower_plan(plan)?;
    Ok(cg.insts)
}

struct CodeGen<'a> {
    schema: &'a Schema,
    next_reg: RegIndex,
    /// Loaded columns, row-aligned with `rowid_reg`.
    col_regs: BTreeMap<ColumnRef, RegIndex>,
    rowid_reg: Option<RegIndex>,
    insts: Vec<Instruction>,
}

fn uint64_cell(v: u64) -> Raw {
    Raw::Number(Decimal::from_u64(v))
}

fn table_operand(table: TableRef) -> Operand {
    Operand::single(vec![DataType::UINT64], vec![uint64_cell(table.index() as u64)])
}

fn index_list_operand(indices: &[usize]) -> Operand {
    Operand::single(
        vec![DataType::UINT64; indices.len()],
        indices.iter().map(|i| uint64_cell(*i as u64)).collect(),
    )
}

/// Lower a checked literal into an immediate single-row operand.
fn literal_operand(lit: &Literal, dtype: DataType) -> Result<Operand, CodegenError> {
    let cell = match lit {
        Literal::Number(v) => Raw::Number(v.clone()),
        Literal::Bool(b) => Raw::from_bool(*b),
        Literal::Bytes(b) => Raw::Bytes(b.clone()),
        Literal::Address(a) => Raw::Bytes(
            a.bytes()
                .ok_or_else(|| CodegenError::Unchecked("malformed address literal".to_owned()))?
                .to_vec(),
        ),
        // DEFAULT over a sequence column travels as the empty-bytes marker
        Literal::Default => Raw::Bytes(Vec::new()),
        Literal::Null | Literal::Any => {
            return Err(CodegenError::Unchecked("unloadable literal".to_owned()))
        }
    };
    Ok(Operand::single(vec![dtype], vec![cell]))
}

/// Collect the resolved columns referenced by an expression.
fn expr_columns(expr: &Expr, out: &mut BTreeSet<ColumnRef>) {
    match &expr.kind {
        ExprKind::Column(name) => {
            if let Some(r) = name.column {
                out.insert(r);
            }
        }
        ExprKind::Literal(_) => {}
        ExprKind::Unary { operand, .. } => expr_columns(operand, out),
        ExprKind::Binary { left, right, .. } => {
            expr_columns(left, out);
            expr_columns(right, out);
        }
        ExprKind::Like {
            subject,
            pattern,
            escape,
        } => {
            expr_columns(subject, out);
            expr_columns(pattern, out);
            if let Some(esc) = escape {
                expr_columns(esc, out);
            }
        }
        ExprKind::Cast { operand, .. } => expr_columns(operand, out),
        ExprKind::In { needle, haystack } => {
            expr_columns(needle, out);
            for alt in haystack {
                expr_columns(alt, out);
            }
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                expr_columns(arg, out);
            }
        }
    }
}

impl<'a> CodeGen<'a> {
    fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            next_reg: 0,
            col_regs: BTreeMap::new(),
            rowid_reg: None,
            insts: Vec::new(),
        }
    }

    fn table(&self, table: TableRef) -> Result<&'a Table, CodegenError> {
        self.schema
            .table(table)
            .ok_or_else(|| CodegenError::Internal("dangling table ref".to_owned()))
    }

    /// Reserve the low registers for raw per-row column storage.
    fn seed_registers(&mut self, table: TableRef) -> Result<(), CodegenError> {
        let columns = self.table(table)?.columns.len();
        self.next_reg = self.next_reg.max(columns);
        Ok(())
    }

    fn alloc(&mut self) -> RegIndex {
        let r = self.next_reg;
        self.next_reg += 1;
        r
    }

    fn emit(&mut self, opcode: Opcode, inputs: Vec<Operand>) -> RegIndex {
        let out = self.alloc();
        self.insts.push(Instruction::new(opcode, inputs, out));
        out
    }

    // -- expression lowering -------------------------------------------------

    fn expr_dtype(expr: &Expr) -> Result<DataType, CodegenError> {
        expr.dtype
            .ok_or_else(|| CodegenError::Unchecked("untyped expression".to_owned()))
    }

    /// Lower an expression to an operand: literals become immediates, loaded
    /// columns become register references, operators emit instructions.
    fn lower_expr(&mut self, expr: &Expr) -> Result<Operand, CodegenError> {
        match &expr.kind {
            ExprKind::Literal(lit) => literal_operand(lit, Self::expr_dtype(expr)?),

            ExprKind::Column(name) => {
                let cref = name
                    .column
                    .ok_or_else(|| CodegenError::Unchecked("unresolved column".to_owned()))?;
                let reg = self.col_regs.get(&cref).copied().ok_or_else(|| {
                    CodegenError::Internal(format!("column {cref} not loaded"))
                })?;
                Ok(Operand::register(reg))
            }

            ExprKind::Unary { op, operand } => {
                let inner = self.lower_expr(operand)?;
                match op {
                    UnaryOp::Not => Ok(Operand::register(
                        self.emit(Opcode::Not, vec![inner]),
                    )),
                    UnaryOp::Neg => {
                        // no NEG opcode: synthesize 0 - x
                        let dtype = Self::expr_dtype(operand)?;
                        let zero = Operand::single(vec![dtype], vec![uint64_cell(0)]);
                        Ok(Operand::register(
                            self.emit(Opcode::Sub, vec![zero, inner]),
                        ))
                    }
                }
            }

            ExprKind::Binary { op, left, right } => {
                let l = self.lower_expr(left)?;
                let r = self.lower_expr(right)?;
                let reg = match op {
                    BinaryOp::Add => self.emit(Opcode::Add, vec![l, r]),
                    BinaryOp::Sub => self.emit(Opcode::Sub, vec![l, r]),
                    BinaryOp::Mul => self.emit(Opcode::Mul, vec![l, r]),
                    BinaryOp::Div => self.emit(Opcode::Div, vec![l, r]),
                    BinaryOp::Mod => self.emit(Opcode::Mod, vec![l, r]),
                    BinaryOp::Lt => self.emit(Opcode::Lt, vec![l, r]),
                    BinaryOp::Gt => self.emit(Opcode::Gt, vec![l, r]),
                    BinaryOp::Eq => self.emit(Opcode::Eq, vec![l, r]),
                    BinaryOp::And => self.emit(Opcode::And, vec![l, r]),
                    BinaryOp::Or => self.emit(Opcode::Or, vec![l, r]),
                    // synthesized comparisons
                    BinaryOp::Le => {
                        let lt = self.emit(Opcode::Lt, vec![l.clone(), r.clone()]);
                        let eq = self.emit(Opcode::Eq, vec![l, r]);
                        self.emit(
                            Opcode::Or,
                            vec![Operand::register(lt), Operand::register(eq)],
                        )
                    }
                    BinaryOp::Ge => {
                        let gt = self.emit(Opcode::Gt, vec![l.clone(), r.clone()]);
                        let eq = self.emit(Opcode::Eq, vec![l, r]);
                        self.emit(
                            Opcode::Or,
                            vec![Operand::register(gt), Operand::register(eq)],
                        )
                    }
                    BinaryOp::Ne => {
                        let eq = self.emit(Opcode::Eq, vec![l, r]);
                        self.emit(Opcode::Not, vec![Operand::register(eq)])
                    }
                };
                Ok(Operand::register(reg))
            }

            ExprKind::Like {
                subject,
                pattern,
                escape,
            } => {
                let s = self.lower_expr(subject)?;
                let p = self.lower_expr(pattern)?;
                let esc = match escape {
                    Some(esc) => match esc.as_literal() {
                        Some(Literal::Bytes(b)) => Operand::single(
                            vec![DataType::DYNAMIC_BYTES],
                            vec![Raw::Bytes(b.clone())],
                        ),
                        _ => {
                            return Err(CodegenError::Unchecked(
                                "ESCAPE must be a constant byte".to_owned(),
                            ))
                        }
                    },
                    None => Operand::single(
                        vec![DataType::DYNAMIC_BYTES],
                        vec![Raw::Bytes(Vec::new())],
                    ),
                };
                Ok(Operand::register(self.emit(Opcode::Like, vec![s, p, esc])))
            }

            ExprKind::Cast { operand, target } => {
                let inner = self.lower_expr(operand)?;
                let target_op = Operand::single(
                    vec![DataType::UINT64],
                    vec![uint64_cell(u64::from(target.raw()))],
                );
                Ok(Operand::register(
                    self.emit(Opcode::Cast, vec![inner, target_op]),
                ))
            }

            ExprKind::In { needle, haystack } => {
                // left-associative EQ/OR chain
                let n = self.lower_expr(needle)?;
                let mut acc: Option<RegIndex> = None;
                for alt in haystack {
                    let a = self.lower_expr(alt)?;
                    let eq = self.emit(Opcode::Eq, vec![n.clone(), a]);
                    acc = Some(match acc {
                        None => eq,
                        Some(prev) => self.emit(
                            Opcode::Or,
                            vec![Operand::register(prev), Operand::register(eq)],
                        ),
                    });
                }
                let reg = acc.ok_or_else(|| {
                    CodegenError::Unchecked("empty IN list".to_owned())
                })?;
                Ok(Operand::register(reg))
            }

            ExprKind::Call { name, args } => {
                // primary-key register first, or a synthetic key of 1 for
                // rowless contexts, then the function-name bytes
                let keys = match self.rowid_reg {
                    Some(r) => Operand::register(r),
                    None => Operand::single(vec![DataType::UINT64], vec![uint64_cell(1)]),
                };
                let name_op = Operand::single(
                    vec![DataType::DYNAMIC_BYTES],
                    vec![Raw::Bytes(name.clone().into_bytes())],
                );
                let mut inputs = vec![keys, name_op];
                for arg in args {
                    inputs.push(self.lower_expr(arg)?);
                }
                Ok(Operand::register(self.emit(Opcode::SolFunc, inputs)))
            }
        }
    }

    // -- row sources ---------------------------------------------------------

    /// Load any not-yet-loaded required columns, one LOAD per column,
    /// row-aligned with the current row-id register.
    fn ensure_loaded(
        &mut self,
        table: TableRef,
        columns: &BTreeSet<ColumnRef>,
    ) -> Result<(), CodegenError> {
        let rowids = self
            .rowid_reg
            .ok_or_else(|| CodegenError::Internal("no row source".to_owned()))?;
        for cref in columns {
            if self.col_regs.contains_key(cref) {
                continue;
            }
            let reg = self.emit(
                Opcode::Load,
                vec![
                    table_operand(table),
                    Operand::register(rowids),
                    index_list_operand(&[cref.index()]),
                ],
            );
            self.col_regs.insert(*cref, reg);
        }
        Ok(())
    }

    /// Filter the row-id register and every loaded column register by a
    /// boolean mask, keeping row alignment.
    fn apply_mask(&mut self, mask: Operand) -> Result<RegIndex, CodegenError> {
        let rowids = self
            .rowid_reg
            .ok_or_else(|| CodegenError::Internal("no row source".to_owned()))?;
        let filtered = self.emit(
            Opcode::Filter,
            vec![Operand::register(rowids), mask.clone()],
        );
        self.rowid_reg = Some(filtered);
        let loaded: Vec<(ColumnRef, RegIndex)> =
            self.col_regs.iter().map(|(c, r)| (*c, *r)).collect();
        for (cref, reg) in loaded {
            let kept = self.emit(
                Opcode::Filter,
                vec![Operand::register(reg), mask.clone()],
            );
            self.col_regs.insert(cref, kept);
        }
        Ok(filtered)
    }

    /// Lower a row source to a register of row ids, leaving `rowid_reg` and
    /// `col_regs` aligned with it.
    fn lower_source(&mut self, plan: &PlanStep) -> Result<RegIndex, CodegenError> {
        match plan {
            PlanStep::ScanTable { table, .. } => {
                let reg = self.emit(Opcode::RepeatPk, vec![table_operand(*table)]);
                self.rowid_reg = Some(reg);
                Ok(reg)
            }

            PlanStep::ScanIndices {
                table,
                index,
                key_columns,
                keys,
                ..
            } => {
                let tbl = self.table(*table)?;
                let dtypes: Vec<DataType> = key_columns
                    .iter()
                    .map(|c| tbl.columns[c.index()].dtype)
                    .collect();
                let tuples = keys
                    .iter()
                    .map(|row| row.iter().map(|k| Raw::Bytes(k.clone())).collect())
                    .collect();
                let keys_op = Operand::immediate(dtypes, tuples);
                let index_op = Operand::single(
                    vec![DataType::UINT64],
                    vec![uint64_cell(index.index() as u64)],
                );
                let reg = self.emit(
                    Opcode::RepeatIdx,
                    vec![table_operand(*table), index_op, keys_op],
                );
                self.rowid_reg = Some(reg);
                Ok(reg)
            }

            PlanStep::ScanIndexValues {
                table,
                index,
                condition,
                ..
            } => {
                let tbl = self.table(*table)?;
                let index_cols = tbl
                    .index(*index)
                    .ok_or_else(|| CodegenError::Internal("dangling index ref".to_owned()))?
                    .columns
                    .clone();
                let index_op = || {
                    Operand::single(
                        vec![DataType::UINT64],
                        vec![uint64_cell(index.index() as u64)],
                    )
                };
                let values = self.emit(
                    Opcode::RepeatIdxV,
                    vec![table_operand(*table), index_op()],
                );
                // bind index-key fields so the residual condition can read them
                let saved = std::mem::take(&mut self.col_regs);
                for (pos, cref) in index_cols.iter().enumerate() {
                    let field = self.emit(
                        Opcode::Field,
                        vec![Operand::register(values), index_list_operand(&[pos])],
                    );
                    self.col_regs.insert(*cref, field);
                }
                let mask = self.lower_expr(condition)?;
                let survivors = self.emit(
                    Opcode::Filter,
                    vec![Operand::register(values), mask],
                );
                self.col_regs = saved;
                let reg = self.emit(
                    Opcode::RepeatIdx,
                    vec![
                        table_operand(*table),
                        index_op(),
                        Operand::register(survivors),
                    ],
                );
                self.rowid_reg = Some(reg);
                Ok(reg)
            }

            PlanStep::Filter {
                source, condition, ..
            } => {
                let table = source_table(source)?;
                self.lower_source(source)?;
                // a constant condition filters everything or nothing
                if let Some(Literal::Bool(b)) = condition.as_literal() {
                    if *b {
                        return self
                            .rowid_reg
                            .ok_or_else(|| CodegenError::Internal("no row source".to_owned()));
                    }
                    let rowids = self.rowid_reg.expect("row source lowered above");
                    let empty = self.emit(
                        Opcode::Range,
                        vec![
                            Operand::register(rowids),
                            Operand::single(
                                vec![DataType::UINT64; 2],
                                vec![uint64_cell(0), uint64_cell(0)],
                            ),
                        ],
                    );
                    self.rowid_reg = Some(empty);
                    return Ok(empty);
                }
                let mut needed = BTreeSet::new();
                expr_columns(condition, &mut needed);
                self.ensure_loaded(table, &needed)?;
                let mask = self.lower_expr(condition)?;
                self.apply_mask(mask)
            }

            PlanStep::Union { sources, .. } | PlanStep::Intersect { sources, .. } => {
                let opcode = if matches!(plan, PlanStep::Union { .. }) {
                    Opcode::Union
                } else {
                    Opcode::Intxn
                };
                let mut acc: Option<RegIndex> = None;
                for source in sources {
                    let reg = self.lower_source(source)?;
                    // operand rows are not aligned across sources
                    self.col_regs.clear();
                    acc = Some(match acc {
                        None => reg,
                        Some(prev) => self.emit(
                            opcode,
                            vec![Operand::register(prev), Operand::register(reg)],
                        ),
                    });
                }
                let reg =
                    acc.ok_or_else(|| CodegenError::Internal("empty set operands".to_owned()))?;
                self.rowid_reg = Some(reg);
                Ok(reg)
            }

            other => Err(CodegenError::Internal(format!(
                "{other} is not a row source"
            ))),
        }
    }

    // -- statements ----------------------------------------------------------

    fn lower_plan(&mut self, plan: &PlanStep) -> Result<(), CodegenError> {
        match plan {
            PlanStep::SelectStep {
                table,
                source,
                columns,
                order_by,
                offset,
                limit,
                ..
            } => self.lower_select(*table, source, columns, order_by, *offset, *limit),

            PlanStep::SelectWithoutTable { columns, .. } => {
                let mut acc: Option<RegIndex> = None;
                for expr in columns {
                    let op = self.lower_expr(expr)?;
                    acc = Some(match acc {
                        // CUT at width 1 materializes an immediate
                        None => self.emit(Opcode::Cut, vec![op, index_list_operand(&[1])]),
                        Some(prev) => {
                            self.emit(Opcode::Zip, vec![Operand::register(prev), op])
                        }
                    });
                }
                acc.ok_or_else(|| CodegenError::Unchecked("empty select list".to_owned()))?;
                Ok(())
            }

            PlanStep::InsertStep {
                table,
                columns,
                rows_exprs,
                ..
            } => self.lower_insert(*table, columns, rows_exprs),

            PlanStep::UpdateStep {
                table,
                source,
                assignments,
                ..
            } => {
                self.seed_registers(*table)?;
                let rowids = self.lower_source(source)?;
                let mut needed = BTreeSet::new();
                for (_, value) in assignments {
                    expr_columns(value, &mut needed);
                }
                self.ensure_loaded(*table, &needed)?;
                let rowids = self.rowid_reg.unwrap_or(rowids);
                let fields: Vec<usize> =
                    assignments.iter().map(|(c, _)| c.index()).collect();
                let mut values: Option<Operand> = None;
                for (_, value) in assignments {
                    let op = self.lower_expr(value)?;
                    values = Some(match values {
                        None => op,
                        Some(prev) => {
                            Operand::register(self.emit(Opcode::Zip, vec![prev, op]))
                        }
                    });
                }
                let values = values.ok_or_else(|| {
                    CodegenError::Unchecked("empty assignment list".to_owned())
                })?;
                self.emit(
                    Opcode::Update,
                    vec![
                        table_operand(*table),
                        Operand::register(rowids),
                        index_list_operand(&fields),
                        values,
                    ],
                );
                Ok(())
            }

            PlanStep::DeleteStep { table, source, .. } => {
                self.seed_registers(*table)?;
                let rowids = self.lower_source(source)?;
                let rowids = self.rowid_reg.unwrap_or(rowids);
                self.emit(
                    Opcode::Delete,
                    vec![table_operand(*table), Operand::register(rowids)],
                );
                Ok(())
            }

            other => Err(CodegenError::Internal(format!(
                "{other} is not a statement plan"
            ))),
        }
    }

    fn lower_select(
        &mut self,
        table: TableRef,
        source: &PlanStep,
        columns: &[SelectColumn],
        order_by: &[OrderingTerm],
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<(), CodegenError> {
        self.seed_registers(table)?;
        self.lower_source(source)?;
        let tbl = self.table(table)?;

        // expand stars into per-column expressions
        enum Output<'e> {
            Col(ColumnRef),
            Expr(&'e Expr),
        }
        let mut outputs: Vec<Output<'_>> = Vec::new();
        for col in columns {
            match col {
                SelectColumn::Star { .. } => {
                    for i in 0..tbl.columns.len() {
                        outputs.push(Output::Col(ColumnRef::new(i as u8)));
                    }
                }
                SelectColumn::Expr(e) => outputs.push(Output::Expr(e)),
            }
        }

        // load every required column
        let mut needed = BTreeSet::new();
        for out in &outputs {
            match out {
                Output::Col(c) => {
                    needed.insert(*c);
                }
                Output::Expr(e) => expr_columns(e, &mut needed),
            }
        }
        for term in order_by {
            expr_columns(&term.expr, &mut needed);
        }
        self.ensure_loaded(table, &needed)?;

        // evaluate outputs, then order-only expressions as extra columns
        let mut parts: Vec<Operand> = Vec::with_capacity(outputs.len());
        for out in &outputs {
            let op = match out {
                Output::Col(c) => Operand::register(
                    *self
                        .col_regs
                        .get(c)
                        .ok_or_else(|| CodegenError::Internal("star column not loaded".to_owned()))?,
                ),
                Output::Expr(e) => self.lower_expr(e)?,
            };
            parts.push(op);
        }
        let mut sort_keys: Vec<(usize, bool)> = Vec::with_capacity(order_by.len());
        for term in order_by {
            let existing = outputs.iter().position(|out| match out {
                Output::Expr(e) => *e == &term.expr,
                Output::Col(c) => {
                    matches!(&term.expr.kind, ExprKind::Column(n) if n.column == Some(*c))
                }
            });
            let idx = match existing {
                Some(i) => i,
                None => {
                    parts.push(self.lower_expr(&term.expr)?);
                    parts.len() - 1
                }
            };
            sort_keys.push((idx, term.desc));
        }

        if parts.is_empty() {
            return Err(CodegenError::Unchecked("empty select list".to_owned()));
        }
        // an all-constant select list still yields one row per source row:
        // zip the row-id register in front and prune it after sorting
        let prepended = parts.iter().all(|p| p.immediate);
        if prepended {
            let rowids = self
                .rowid_reg
                .ok_or_else(|| CodegenError::Internal("no row source".to_owned()))?;
            parts.insert(0, Operand::register(rowids));
            for (idx, _) in &mut sort_keys {
                *idx += 1;
            }
        }

        let mut iter = parts.into_iter();
        let first = iter.next().expect("non-empty checked above");
        let mut zipped = match iter.len() {
            0 => {
                // single column: CUT at width 1 materializes a register
                self.emit(Opcode::Cut, vec![first, index_list_operand(&[1])])
            }
            _ => {
                let mut acc = first;
                for part in iter {
                    acc = Operand::register(self.emit(Opcode::Zip, vec![acc, part]));
                }
                acc.register
            }
        };

        if !sort_keys.is_empty() {
            let keys_op = Operand::immediate(
                vec![DataType::UINT64, DataType::BOOL],
                sort_keys
                    .iter()
                    .map(|(i, desc)| vec![uint64_cell(*i as u64), Raw::from_bool(*desc)])
                    .collect(),
            );
            zipped = self.emit(Opcode::Sort, vec![Operand::register(zipped), keys_op]);
        }

        if prepended {
            zipped = self.emit(
                Opcode::Prune,
                vec![Operand::register(zipped), index_list_operand(&[0])],
            );
        }

        let extra = sort_keys
            .iter()
            .filter(|(i, _)| *i - usize::from(prepended) >= outputs.len())
            .count();
        if extra > 0 {
            zipped = self.emit(
                Opcode::Cut,
                vec![
                    Operand::register(zipped),
                    index_list_operand(&[outputs.len()]),
                ],
            );
        }

        if offset.is_some() || limit.is_some() {
            let mut cells = vec![uint64_cell(offset.unwrap_or(0))];
            let mut dtypes = vec![DataType::UINT64];
            if let Some(limit) = limit {
                cells.push(uint64_cell(limit));
                dtypes.push(DataType::UINT64);
            }
            zipped = self.emit(
                Opcode::Range,
                vec![
                    Operand::register(zipped),
                    Operand::immediate(dtypes, vec![cells]),
                ],
            );
        }
        let _ = zipped;
        Ok(())
    }

    fn lower_insert(
        &mut self,
        table: TableRef,
        columns: &[ColumnRef],
        rows_exprs: &[Vec<Expr>],
    ) -> Result<(), CodegenError> {
        let tbl = self.table(table)?;
        let dtypes: Vec<DataType> = tbl.columns.iter().map(|c| c.dtype).collect();
        let mut tuples = Vec::with_capacity(rows_exprs.len());
        for row in rows_exprs {
            let mut cells: Vec<Option<Raw>> = vec![None; tbl.columns.len()];
            for (expr, cref) in row.iter().zip(columns) {
                let lit = expr.as_literal().ok_or_else(|| {
                    CodegenError::Unsupported(
                        "INSERT values must reduce to constants".to_owned(),
                    )
                })?;
                let dtype = tbl.columns[cref.index()].dtype;
                let operand = literal_operand(lit, dtype)?;
                cells[cref.index()] = Some(operand.tuples[0][0].clone());
            }
            // omitted columns take their default or sequence marker
            for (i, cell) in cells.iter_mut().enumerate() {
                if cell.is_some() {
                    continue;
                }
                let col = &tbl.columns[i];
                *cell = Some(match &col.default {
                    Some(ColumnValue::Number(v)) => Raw::Number(v.clone()),
                    Some(ColumnValue::Bytes(b)) => Raw::Bytes(b.clone()),
                    None => Raw::Bytes(Vec::new()),
                });
            }
            tuples.push(
                cells
                    .into_iter()
                    .map(|c| c.expect("every cell filled above"))
                    .collect(),
            );
        }
        self.emit(
            Opcode::Insert,
            vec![table_operand(table), Operand::immediate(dtypes, tuples)],
        );
        Ok(())
    }
}

/// The table a row-source plan scans.
fn source_table(plan: &PlanStep) -> Result<TableRef, CodegenError> {
    match plan {
        PlanStep::ScanTable { table, .. }
        | PlanStep::ScanIndices { table, .. }
        | PlanStep::ScanIndexValues { table, .. } => Ok(*table),
        PlanStep::Filter { source, .. } => source_table(source),
        PlanStep::Union { sources, .. } | PlanStep::Intersect { sources, .. } => sources
            .first()
            .map(source_table)
            .transpose()?
            .ok_or_else(|| CodegenError::Internal("empty set operands".to_owned())),
        _ => Err(CodegenError::Internal("not a row source".to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersql_ast::{
        ColumnConstraint, ColumnDef, ColumnName, CreateTableStmt, SelectStmt, Span, Statement,
        TableName,
    };
    use ledgersql_checker::{check_create, check_exec, check_query};
    use ledgersql_planner::plan_statement;

    fn sp() -> Span {
        Span::ZERO
    }

    fn schema() -> Schema {
        let mut stmts = vec![Statement::CreateTable(CreateTableStmt {
            table: TableName::new("accounts", sp()),
            columns: vec![
                ColumnDef {
                    name: ColumnName::new("id", sp()),
                    dtype: DataType::UINT64,
                    constraints: vec![ColumnConstraint::PrimaryKey { span: sp() }],
                    span: sp(),
                },
                ColumnDef {
                    name: ColumnName::new("balance", sp()),
                    dtype: DataType::uint(16).unwrap(),
                    constraints: vec![],
                    span: sp(),
                },
            ],
            span: sp(),
        })];
        let (schema, diags) = check_create(&mut stmts);
        assert!(!diags.has_errors(), "{diags:?}");
        schema
    }

    fn lower_select(schema: &Schema, mut stmt: Statement) -> Vec<Instruction> {
        let diags = check_query(std::slice::from_mut(&mut stmt), schema);
        assert!(!diags.has_errors(), "{diags:?}");
        let plan = plan_statement(&stmt, schema).unwrap();
        generate(&plan, schema).unwrap()
    }

    fn opcodes(program: &[Instruction]) -> Vec<Opcode> {
        program.iter().map(|i| i.opcode).collect()
    }

    fn select_where(where_clause: Option<Expr>, order_desc: bool) -> Statement {
        use ledgersql_ast::OrderingTerm;
        let order_by = if order_desc {
            vec![OrderingTerm {
                expr: Expr::new(
                    ExprKind::Column(ColumnName::new("balance", sp())),
                    sp(),
                ),
                desc: true,
                span: sp(),
            }]
        } else {
            vec![]
        };
        Statement::Select(SelectStmt {
            columns: vec![SelectColumn::Star { span: sp() }],
            table: Some(TableName::new("accounts", sp())),
            where_clause,
            order_by,
            offset: None,
            limit: None,
            span: sp(),
        })
    }

    fn col(name: &str) -> Expr {
        Expr::new(ExprKind::Column(ColumnName::new(name, sp())), sp())
    }

    fn num(s: &str) -> Expr {
        Expr::literal(Literal::Number(s.parse().unwrap()), sp())
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

    #[test]
    fn full_scan_select_loads_and_zips() {
        let program = lower_select(&schema(), select_where(None, false));
        let ops = opcodes(&program);
        assert_eq!(ops[0], Opcode::RepeatPk);
        assert!(ops.contains(&Opcode::Load));
        assert!(ops.contains(&Opcode::Zip));
        assert!(!ops.contains(&Opcode::Sort));
    }

    #[test]
    fn order_by_emits_sort() {
        let program = lower_select(&schema(), select_where(None, true));
        let ops = opcodes(&program);
        assert!(ops.contains(&Opcode::Sort));
        // balance is an output column, so no CUT of order-only columns
        assert!(!ops.contains(&Opcode::Cut));
    }

    #[test]
    fn where_on_unindexed_column_filters_loaded_registers() {
        let program = lower_select(
            &schema(),
            select_where(Some(binary(BinaryOp::Gt, col("balance"), num("5"))), false),
        );
        let ops = opcodes(&program);
        assert_eq!(ops[0], Opcode::RepeatPk);
        assert!(ops.contains(&Opcode::Gt));
        // the mask filters the row ids and the loaded balance register
        assert!(ops.iter().filter(|o| **o == Opcode::Filter).count() >= 2);
    }

    #[test]
    fn where_on_primary_key_uses_repeat_idx() {
        let program = lower_select(
            &schema(),
            select_where(Some(binary(BinaryOp::Eq, col("id"), num("7"))), false),
        );
        let ops = opcodes(&program);
        assert_eq!(ops[0], Opcode::RepeatIdx);
        assert!(!ops.contains(&Opcode::RepeatPk));
    }

    #[test]
    fn ge_synthesized_from_gt_eq_or() {
        let program = lower_select(
            &schema(),
            select_where(Some(binary(BinaryOp::Ge, col("balance"), num("5"))), false),
        );
        let ops = opcodes(&program);
        assert!(ops.contains(&Opcode::Gt));
        assert!(ops.contains(&Opcode::Eq));
        assert!(ops.contains(&Opcode::Or));
    }

    #[test]
    fn in_unrolls_to_eq_or_chain() {
        let in_expr = Expr::new(
            ExprKind::In {
                needle: Box::new(col("balance")),
                haystack: vec![num("1"), num("2"), num("3")],
            },
            sp(),
        );
        let program = lower_select(&schema(), select_where(Some(in_expr), false));
        let ops = opcodes(&program);
        // IN over an indexed probe may still plan as a scan of balance;
        // either way the residual chain appears when filtering
        let eqs = ops.iter().filter(|o| **o == Opcode::Eq).count();
        let ors = ops.iter().filter(|o| **o == Opcode::Or).count();
        if ops.contains(&Opcode::RepeatIdx) {
            // planned via hash keys: no residual chain needed
            assert_eq!(ops[0], Opcode::RepeatIdx);
        } else {
            assert_eq!(eqs, 3);
            assert_eq!(ors, 2);
        }
    }

    #[test]
    fn insert_lowers_to_single_instruction() {
        let schema = schema();
        let mut stmt = Statement::Insert(ledgersql_ast::InsertStmt {
            table: TableName::new("accounts", sp()),
            columns: vec![],
            rows: vec![vec![num("1"), num("100")]],
            span: sp(),
        });
        let diags = check_exec(std::slice::from_mut(&mut stmt), &schema);
        assert!(!diags.has_errors(), "{diags:?}");
        let plan = plan_statement(&stmt, &schema).unwrap();
        let program = generate(&plan, &schema).unwrap();
        assert_eq!(opcodes(&program), vec![Opcode::Insert]);
        let values = &program[0].inputs[1];
        assert_eq!(values.column_count(), 2);
        assert_eq!(values.row_count(), 1);
    }

    #[test]
    fn delete_emits_source_then_delete() {
        let schema = schema();
        let mut stmt = Statement::Delete(ledgersql_ast::DeleteStmt {
            table: TableName::new("accounts", sp()),
            where_clause: Some(binary(BinaryOp::Eq, col("id"), num("1"))),
            span: sp(),
        });
        let diags = check_exec(std::slice::from_mut(&mut stmt), &schema);
        assert!(!diags.has_errors(), "{diags:?}");
        let plan = plan_statement(&stmt, &schema).unwrap();
        let program = generate(&plan, &schema).unwrap();
        let ops = opcodes(&program);
        assert_eq!(*ops.last().unwrap(), Opcode::Delete);
    }

    #[test]
    fn registers_seed_past_column_count() {
        let program = lower_select(&schema(), select_where(None, false));
        // two table columns reserve registers 0 and 1
        assert!(program.iter().all(|i| i.output >= 2));
    }
}
