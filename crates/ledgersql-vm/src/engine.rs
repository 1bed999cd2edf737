//! The bytecode interpreter.
//!
//! A single linear pass over the instruction list: each instruction's
//! handler reads its input operands (immediates or registers), computes an
//! output operand, and stores it in the output register. The first
//! [`RuntimeError`] aborts the whole stream; there is no partial result.
//!
//! Execution is synchronous, single-threaded, and non-reentrant. The
//! storage backend is externally-owned shared state; the engine performs no
//! caching across instructions beyond the per-row slot cache inside one
//! LOAD invocation.

use std::cmp::Ordering;

use ledgersql_error::{RuntimeError, VmResult};
use ledgersql_schema::{ColumnAttr, Index, IndexAttr, Schema, Table};
use ledgersql_storage::{encode_index_key, RowReader, StorageBackend, TableStore};
use ledgersql_types::{encode, min_max, ColumnRef, DataType, Decimal, IndexRef, SequenceRef, TableRef, TypeFamily};

use crate::funcs::{Builtins, CallResolver};
use crate::like::like_match;
use crate::opcode::Opcode;
use crate::operand::{cmp_tuples, Operand, Raw, Tuple};
use crate::Instruction;

/// Reserved sequence slot used for the implicit row-id counter of tables
/// without a primary key.
const IMPLICIT_ROW_SEQUENCE: u8 = 0xff;

/// Decode one stored cell per the column's type family.
pub(crate) fn decode_cell(dtype: DataType, bytes: &[u8]) -> VmResult<Raw> {
    if dtype.is_bytes_like() {
        Ok(Raw::Bytes(bytes.to_vec()))
    } else {
        encode::decimal_decode(dtype, bytes)
            .map(Raw::Number)
            .map_err(|e| RuntimeError::StorageCorrupt(e.to_string()))
    }
}

/// Encode one cell into the column's byte representation.
pub(crate) fn encode_cell(dtype: DataType, cell: &Raw) -> VmResult<Vec<u8>> {
    match cell {
        Raw::Number(v) => encode::decimal_encode(dtype, v).map_err(|e| {
            RuntimeError::InvalidDataType {
                opcode: "encode",
                detail: e.to_string(),
            }
        }),
        Raw::Bytes(b) => {
            let expected = dtype.size();
            if matches!(dtype.family(), TypeFamily::DynamicBytes) || b.len() == expected {
                Ok(b.clone())
            } else {
                Err(RuntimeError::InvalidDataType {
                    opcode: "encode",
                    detail: format!("{dtype} expects {expected} bytes, got {}", b.len()),
                })
            }
        }
    }
}

/// Execution context threaded through one run.
pub struct ExecContext {
    /// When set, any out-of-range arithmetic result aborts the stream.
    /// Expected to always be set in production.
    pub safe_math: bool,
    /// Function-call resolver for SOLFUNC.
    pub resolver: Box<dyn CallResolver>,
}

impl Default for ExecContext {
    fn default() -> Self {
        Self {
            safe_math: true,
            resolver: Box::new(Builtins),
        }
    }
}

/// The register-based interpreter.
pub struct Engine<'a> {
    schema: &'a Schema,
    backend: &'a mut dyn StorageBackend,
    ctx: ExecContext,
    registers: Vec<Option<Operand>>,
}

impl<'a> Engine<'a> {
    /// Create an engine over a schema and storage backend.
    pub fn new(schema: &'a Schema, backend: &'a mut dyn StorageBackend, ctx: ExecContext) -> Self {
        Self {
            schema,
            backend,
            ctx,
            registers: Vec::new(),
        }
    }

    /// Execute a program to completion and return the operand left in the
    /// last instruction's output register.
    pub fn execute(&mut self, program: &[Instruction]) -> VmResult<Operand> {
        tracing::debug!(instructions = program.len(), "executing program");
        for inst in program {
            let out = self.exec_inst(inst)?;
            self.set_register(inst.output, out);
        }
        Ok(match program.last() {
            Some(last) => self
                .registers
                .get(last.output)
                .and_then(Clone::clone)
                .ok_or(RuntimeError::EmptyRegister(last.output))?,
            None => Operand::empty(),
        })
    }

    fn set_register(&mut self, index: usize, mut value: Operand) {
        if self.registers.len() <= index {
            self.registers.resize(index + 1, None);
        }
        value.immediate = false;
        value.register = index;
        self.registers[index] = Some(value);
    }

    /// Resolve the `i`-th input operand, cloning register contents.
    fn input(&self, inst: &Instruction, i: usize) -> VmResult<Operand> {
        let op = inst
            .inputs
            .get(i)
            .ok_or(RuntimeError::OperandCountMismatch {
                opcode: inst.opcode.name(),
                expected: i + 1,
                actual: inst.inputs.len(),
            })?;
        if op.immediate {
            Ok(op.clone())
        } else {
            self.registers
                .get(op.register)
                .and_then(Clone::clone)
                .ok_or(RuntimeError::EmptyRegister(op.register))
        }
    }

    fn expect_inputs(&self, inst: &Instruction, expected: usize) -> VmResult<()> {
        if inst.inputs.len() == expected {
            Ok(())
        } else {
            Err(RuntimeError::OperandCountMismatch {
                opcode: inst.opcode.name(),
                expected,
                actual: inst.inputs.len(),
            })
        }
    }

    fn exec_inst(&mut self, inst: &Instruction) -> VmResult<Operand> {
        match inst.opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                self.arith(inst)
            }
            Opcode::Lt | Opcode::Gt | Opcode::Eq => self.compare(inst),
            Opcode::And | Opcode::Or => self.boolean(inst),
            Opcode::Not => self.boolean_not(inst),
            Opcode::Union | Opcode::Intxn => self.set_op(inst),
            Opcode::Like => self.like(inst),
            Opcode::Zip => self.zip(inst),
            Opcode::Field | Opcode::Prune => self.project(inst),
            Opcode::Cut => self.cut(inst),
            Opcode::Sort => self.sort(inst),
            Opcode::Range => self.range(inst),
            Opcode::Filter => self.filter(inst),
            Opcode::Cast => self.cast(inst),
            Opcode::SolFunc => self.sol_func(inst),
            Opcode::Load => self.load(inst),
            Opcode::RepeatPk => self.repeat_pk(inst),
            Opcode::RepeatIdx => self.repeat_idx(inst),
            Opcode::RepeatIdxV => self.repeat_idx_values(inst),
            Opcode::Insert => self.insert(inst),
            Opcode::Update => self.update(inst),
            Opcode::Delete => self.delete(inst),
        }
    }

    // -- pairing helpers -----------------------------------------------------

    /// Row count for a broadcasting pair. A single-row operand broadcasts;
    /// two multi-row operands must agree; an empty operand empties the pair.
    fn paired_rows(a: &Operand, b: &Operand) -> VmResult<usize> {
        let (ra, rb) = (a.row_count(), b.row_count());
        if ra > 1 && rb > 1 && ra != rb {
            return Err(RuntimeError::RowCountMismatch { left: ra, right: rb });
        }
        if ra == 0 || rb == 0 {
            return Ok(0);
        }
        Ok(ra.max(rb))
    }

    /// The narrower of two numeric types: smaller byte width, ties keep the
    /// left type.
    fn narrower(op: &'static str, ta: DataType, tb: DataType) -> VmResult<DataType> {
        if !ta.is_numeric() || !tb.is_numeric() {
            return Err(RuntimeError::InvalidDataType {
                opcode: op,
                detail: format!("expected numeric operands, got {ta} and {tb}"),
            });
        }
        Ok(if tb.size() < ta.size() { tb } else { ta })
    }

    // -- arithmetic ----------------------------------------------------------

    fn arith(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let a = self.input(inst, 0)?;
        let b = self.input(inst, 1)?;
        let name = inst.opcode.name();
        if a.column_count() != b.column_count() {
            return Err(RuntimeError::InvalidDataType {
                opcode: name,
                detail: format!(
                    "column count mismatch: {} vs {}",
                    a.column_count(),
                    b.column_count()
                ),
            });
        }
        let rows = Self::paired_rows(&a, &b)?;
        let mut dtypes = Vec::with_capacity(a.column_count());
        for (ta, tb) in a.dtypes.iter().zip(&b.dtypes) {
            let dt = Self::narrower(name, *ta, *tb)?;
            if matches!(dt.family(), TypeFamily::Bool) {
                return Err(RuntimeError::InvalidDataType {
                    opcode: name,
                    detail: "bool is not an arithmetic type".to_owned(),
                });
            }
            dtypes.push(dt);
        }

        let mut tuples = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut out_row = Vec::with_capacity(dtypes.len());
            for (col, dt) in dtypes.iter().enumerate() {
                let va = a.cell(row, col).as_number().ok_or_else(|| {
                    RuntimeError::InvalidDataType {
                        opcode: name,
                        detail: "bytes operand in arithmetic".to_owned(),
                    }
                })?;
                let vb = b.cell(row, col).as_number().ok_or_else(|| {
                    RuntimeError::InvalidDataType {
                        opcode: name,
                        detail: "bytes operand in arithmetic".to_owned(),
                    }
                })?;
                let result = match inst.opcode {
                    Opcode::Add => va.checked_add(vb),
                    Opcode::Sub => va.checked_sub(vb),
                    Opcode::Mul => va.checked_mul(vb),
                    Opcode::Div => {
                        if vb.is_zero() {
                            return Err(RuntimeError::DividedByZero);
                        }
                        va.checked_div(vb)
                    }
                    Opcode::Mod => {
                        if vb.is_zero() {
                            return Err(RuntimeError::DividedByZero);
                        }
                        va.checked_rem(vb)
                    }
                    _ => unreachable!("non-arithmetic opcode routed to arith"),
                }
                .map_err(|_| RuntimeError::Overflow)?;
                out_row.push(Raw::Number(self.range_checked(*dt, result)?));
            }
            tuples.push(out_row);
        }
        Ok(Operand::immediate(dtypes, tuples))
    }

    /// Apply the safe-math contract to one arithmetic result.
    fn range_checked(&self, dt: DataType, value: Decimal) -> VmResult<Decimal> {
        let (lo, hi) = min_max(dt).map_err(|e| RuntimeError::InvalidDataType {
            opcode: "range",
            detail: e.to_string(),
        })?;
        if value > hi {
            if self.ctx.safe_math {
                return Err(RuntimeError::Overflow);
            }
            return encode::crop(dt, &value).map_err(|e| RuntimeError::internal(e.to_string()));
        }
        if value < lo {
            if self.ctx.safe_math {
                return Err(RuntimeError::Underflow);
            }
            return encode::crop(dt, &value).map_err(|e| RuntimeError::internal(e.to_string()));
        }
        Ok(value)
    }

    // -- comparison ----------------------------------------------------------

    fn cmp_cells(op: &'static str, x: &Raw, y: &Raw) -> VmResult<Ordering> {
        match (x, y) {
            (Raw::Number(a), Raw::Number(b)) => Ok(a.cmp(b)),
            (Raw::Bytes(a), Raw::Bytes(b)) => Ok(a.cmp(b)),
            _ => Err(RuntimeError::InvalidDataType {
                opcode: op,
                detail: "cannot compare numbers with bytes".to_owned(),
            }),
        }
    }

    fn compare(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let a = self.input(inst, 0)?;
        let b = self.input(inst, 1)?;
        let name = inst.opcode.name();
        if a.column_count() != b.column_count() {
            return Err(RuntimeError::InvalidDataType {
                opcode: name,
                detail: "column count mismatch in comparison".to_owned(),
            });
        }
        let rows = Self::paired_rows(&a, &b)?;
        let cols = a.column_count();
        let mut tuples = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut ord = Ordering::Equal;
            for col in 0..cols {
                ord = Self::cmp_cells(name, a.cell(row, col), b.cell(row, col))?;
                if ord != Ordering::Equal {
                    break;
                }
            }
            let result = match inst.opcode {
                Opcode::Lt => ord == Ordering::Less,
                Opcode::Gt => ord == Ordering::Greater,
                Opcode::Eq => ord == Ordering::Equal,
                _ => unreachable!("non-comparison opcode routed to compare"),
            };
            tuples.push(vec![Raw::from_bool(result)]);
        }
        Ok(Operand::immediate(vec![DataType::BOOL], tuples))
    }

    // -- boolean -------------------------------------------------------------

    fn require_bool(op: &'static str, operand: &Operand) -> VmResult<()> {
        if operand.dtypes.iter().all(|d| *d == DataType::BOOL) {
            Ok(())
        } else {
            Err(RuntimeError::InvalidDataType {
                opcode: op,
                detail: "operand is not bool-typed".to_owned(),
            })
        }
    }

    fn boolean(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let a = self.input(inst, 0)?;
        let b = self.input(inst, 1)?;
        let name = inst.opcode.name();
        Self::require_bool(name, &a)?;
        Self::require_bool(name, &b)?;
        if a.column_count() != b.column_count() {
            return Err(RuntimeError::InvalidDataType {
                opcode: name,
                detail: "column count mismatch".to_owned(),
            });
        }
        let rows = Self::paired_rows(&a, &b)?;
        let cols = a.column_count();
        let mut tuples = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut out_row = Vec::with_capacity(cols);
            for col in 0..cols {
                let (x, y) = (a.cell(row, col).is_true(), b.cell(row, col).is_true());
                let v = match inst.opcode {
                    Opcode::And => x && y,
                    Opcode::Or => x || y,
                    _ => unreachable!("non-boolean opcode routed to boolean"),
                };
                out_row.push(Raw::from_bool(v));
            }
            tuples.push(out_row);
        }
        Ok(Operand::immediate(vec![DataType::BOOL; cols], tuples))
    }

    fn boolean_not(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 1)?;
        let a = self.input(inst, 0)?;
        Self::require_bool("NOT", &a)?;
        let tuples = a
            .tuples
            .iter()
            .map(|row| row.iter().map(|c| Raw::from_bool(!c.is_true())).collect())
            .collect();
        Ok(Operand::immediate(a.dtypes.clone(), tuples))
    }

    // -- set operations ------------------------------------------------------

    fn set_op(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let a = self.input(inst, 0)?;
        let b = self.input(inst, 1)?;
        if a.dtypes != b.dtypes {
            return Err(RuntimeError::InvalidDataType {
                opcode: inst.opcode.name(),
                detail: "set operands must share column types".to_owned(),
            });
        }
        let mut out: Vec<Tuple> = match inst.opcode {
            Opcode::Union => a.tuples.iter().chain(&b.tuples).cloned().collect(),
            Opcode::Intxn => {
                let mut right: Vec<&Tuple> = b.tuples.iter().collect();
                right.sort_by(|x, y| cmp_tuples(x.as_slice(), y.as_slice()));
                a.tuples
                    .iter()
                    .filter(|t| {
                        right
                            .binary_search_by(|p| cmp_tuples(p.as_slice(), t.as_slice()))
                            .is_ok()
                    })
                    .cloned()
                    .collect()
            }
            _ => unreachable!("non-set opcode routed to set_op"),
        };
        out.sort_by(|x, y| cmp_tuples(x.as_slice(), y.as_slice()));
        out.dedup_by(|x, y| cmp_tuples(x.as_slice(), y.as_slice()) == Ordering::Equal);
        Ok(Operand::immediate(a.dtypes.clone(), out))
    }

    // -- LIKE ----------------------------------------------------------------

    fn like(&self, inst: &Instruction) -> VmResult<Operand> {
        let subject = self.input(inst, 0)?;
        let pattern = self.input(inst, 1)?;
        let escape = if inst.inputs.len() > 2 {
            let esc = self.input(inst, 2)?;
            match esc.tuples.first().and_then(|row| row.first()) {
                Some(Raw::Bytes(b)) if b.len() == 1 => Some(b[0]),
                Some(Raw::Bytes(b)) if b.is_empty() => None,
                _ => return Err(RuntimeError::InvalidEscape),
            }
        } else {
            None
        };
        let rows = Self::paired_rows(&subject, &pattern)?;
        let mut tuples = Vec::with_capacity(rows);
        for row in 0..rows {
            let s = subject.cell(row, 0).as_bytes().ok_or_else(|| {
                RuntimeError::InvalidDataType {
                    opcode: "LIKE",
                    detail: "subject must be bytes".to_owned(),
                }
            })?;
            let p = pattern.cell(row, 0).as_bytes().ok_or_else(|| {
                RuntimeError::InvalidDataType {
                    opcode: "LIKE",
                    detail: "pattern must be bytes".to_owned(),
                }
            })?;
            tuples.push(vec![Raw::from_bool(like_match(s, p, escape)?)]);
        }
        Ok(Operand::immediate(vec![DataType::BOOL], tuples))
    }

    // -- shape ---------------------------------------------------------------

    fn zip(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let a = self.input(inst, 0)?;
        let b = self.input(inst, 1)?;
        let rows = Self::paired_rows(&a, &b)?;
        let mut dtypes = a.dtypes.clone();
        dtypes.extend(b.dtypes.iter().copied());
        let mut tuples = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut out_row: Tuple = (0..a.column_count())
                .map(|c| a.cell(row, c).clone())
                .collect();
            out_row.extend((0..b.column_count()).map(|c| b.cell(row, c).clone()));
            tuples.push(out_row);
        }
        Ok(Operand::immediate(dtypes, tuples))
    }

    /// Immediate single-row index list of FIELD/PRUNE/SORT/CUT operands.
    fn index_list(&self, inst: &Instruction, i: usize, cols: usize) -> VmResult<Vec<usize>> {
        let op = self.input(inst, i)?;
        let mut out = Vec::with_capacity(op.column_count());
        for cell in op.tuples.first().map(Vec::as_slice).unwrap_or(&[]) {
            let idx = cell
                .as_number()
                .and_then(Decimal::to_u64)
                .ok_or_else(|| RuntimeError::InvalidDataType {
                    opcode: inst.opcode.name(),
                    detail: "index list must hold integers".to_owned(),
                })? as usize;
            if idx >= cols {
                return Err(RuntimeError::IndexOutOfRange {
                    index: idx,
                    columns: cols,
                });
            }
            out.push(idx);
        }
        Ok(out)
    }

    fn project(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let data = self.input(inst, 0)?;
        let listed = self.index_list(inst, 1, data.column_count())?;
        let keep: Vec<usize> = match inst.opcode {
            Opcode::Field => listed,
            Opcode::Prune => (0..data.column_count())
                .filter(|c| !listed.contains(c))
                .collect(),
            _ => unreachable!("non-projection opcode routed to project"),
        };
        let dtypes = keep.iter().map(|c| data.dtypes[*c]).collect();
        let tuples = data
            .tuples
            .iter()
            .map(|row| keep.iter().map(|c| row[*c].clone()).collect())
            .collect();
        Ok(Operand::immediate(dtypes, tuples))
    }

    fn cut(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let data = self.input(inst, 0)?;
        let boundary_op = self.input(inst, 1)?;
        let boundary = boundary_op
            .tuples
            .first()
            .and_then(|row| row.first())
            .and_then(Raw::as_number)
            .and_then(Decimal::to_u64)
            .ok_or_else(|| RuntimeError::InvalidDataType {
                opcode: "CUT",
                detail: "boundary must be an integer".to_owned(),
            })? as usize;
        if boundary > data.column_count() {
            return Err(RuntimeError::IndexOutOfRange {
                index: boundary,
                columns: data.column_count(),
            });
        }
        let dtypes = data.dtypes[..boundary].to_vec();
        let tuples = data
            .tuples
            .iter()
            .map(|row| row[..boundary].to_vec())
            .collect();
        Ok(Operand::immediate(dtypes, tuples))
    }

    fn sort(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let data = self.input(inst, 0)?;
        let keys_op = self.input(inst, 1)?;
        let cols = data.column_count();
        let mut keys: Vec<(usize, bool)> = Vec::with_capacity(keys_op.row_count());
        for row in &keys_op.tuples {
            let idx = row
                .first()
                .and_then(Raw::as_number)
                .and_then(Decimal::to_u64)
                .ok_or_else(|| RuntimeError::InvalidDataType {
                    opcode: "SORT",
                    detail: "sort key column must be an integer".to_owned(),
                })? as usize;
            if idx >= cols {
                return Err(RuntimeError::IndexOutOfRange {
                    index: idx,
                    columns: cols,
                });
            }
            let desc = row.get(1).is_some_and(Raw::is_true);
            keys.push((idx, desc));
        }
        let mut tuples = data.tuples.clone();
        tuples.sort_by(|a, b| {
            for (idx, desc) in &keys {
                let ord = a[*idx].total_cmp(&b[*idx]);
                let ord = if *desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(Operand::immediate(data.dtypes.clone(), tuples))
    }

    fn range(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let data = self.input(inst, 0)?;
        let bounds = self.input(inst, 1)?;
        let row = bounds.tuples.first().map(Vec::as_slice).unwrap_or(&[]);
        let as_u64 = |cell: &Raw| -> VmResult<u64> {
            cell.as_number()
                .and_then(Decimal::to_u64)
                .ok_or_else(|| RuntimeError::InvalidDataType {
                    opcode: "RANGE",
                    detail: "offset/limit must be integers".to_owned(),
                })
        };
        let offset = row.first().map(&as_u64).transpose()?.unwrap_or(0) as usize;
        let limit = row.get(1).map(&as_u64).transpose()?.map(|v| v as usize);
        let tuples: Vec<Tuple> = data
            .tuples
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(Operand::immediate(data.dtypes.clone(), tuples))
    }

    fn filter(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let data = self.input(inst, 0)?;
        let mask = self.input(inst, 1)?;
        Self::require_bool("FILTER", &mask)?;
        if data.row_count() != mask.row_count() {
            return Err(RuntimeError::RowCountMismatch {
                left: data.row_count(),
                right: mask.row_count(),
            });
        }
        let tuples = data
            .tuples
            .iter()
            .zip(&mask.tuples)
            .filter(|(_, m)| m.first().is_some_and(Raw::is_true))
            .map(|(row, _)| row.clone())
            .collect();
        Ok(Operand::immediate(data.dtypes.clone(), tuples))
    }

    // -- CAST ----------------------------------------------------------------

    fn cast(&self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let data = self.input(inst, 0)?;
        let target_op = self.input(inst, 1)?;
        let raw_tag = target_op
            .tuples
            .first()
            .and_then(|row| row.first())
            .and_then(Raw::as_number)
            .and_then(Decimal::to_u64)
            .ok_or_else(|| RuntimeError::InvalidDataType {
                opcode: "CAST",
                detail: "missing target type".to_owned(),
            })?;
        let target = DataType::from_raw(raw_tag as u16).map_err(|e| {
            RuntimeError::InvalidCastType {
                from: "?".to_owned(),
                to: e.to_string(),
            }
        })?;
        if data.column_count() != 1 {
            return Err(RuntimeError::InvalidDataType {
                opcode: "CAST",
                detail: "CAST operand must have one column".to_owned(),
            });
        }
        let source = data.dtypes[0];
        let mut tuples = Vec::with_capacity(data.row_count());
        for row in &data.tuples {
            tuples.push(vec![cast_cell(source, target, &row[0])?]);
        }
        Ok(Operand::immediate(vec![target], tuples))
    }

    // -- functions -----------------------------------------------------------

    fn sol_func(&self, inst: &Instruction) -> VmResult<Operand> {
        let keys = self.input(inst, 0)?;
        let name_op = self.input(inst, 1)?;
        let name_bytes = name_op
            .tuples
            .first()
            .and_then(|row| row.first())
            .and_then(Raw::as_bytes)
            .ok_or_else(|| RuntimeError::InvalidDataType {
                opcode: "SOLFUNC",
                detail: "missing function name".to_owned(),
            })?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        let mut args = Vec::with_capacity(inst.inputs.len().saturating_sub(2));
        for i in 2..inst.inputs.len() {
            args.push(self.input(inst, i)?);
        }
        self.ctx.resolver.call(&name, keys.row_count(), &args)
    }

    // -- storage -------------------------------------------------------------

    fn table_arg(&self, inst: &Instruction, i: usize) -> VmResult<(TableRef, &'a Table)> {
        let op = self.input(inst, i)?;
        let n = op
            .tuples
            .first()
            .and_then(|row| row.first())
            .and_then(Raw::as_number)
            .and_then(Decimal::to_u64)
            .ok_or_else(|| RuntimeError::internal("missing table reference"))?;
        let r = TableRef::new(n as u8);
        let table = self
            .schema
            .table(r)
            .ok_or_else(|| RuntimeError::internal(format!("unknown table {r}")))?;
        Ok((r, table))
    }

    fn index_arg(&self, inst: &Instruction, i: usize, table: &'a Table) -> VmResult<&'a Index> {
        let op = self.input(inst, i)?;
        let n = op
            .tuples
            .first()
            .and_then(|row| row.first())
            .and_then(Raw::as_number)
            .and_then(Decimal::to_u64)
            .ok_or_else(|| RuntimeError::internal("missing index reference"))?;
        table
            .index(IndexRef::new(n as u8))
            .ok_or_else(|| RuntimeError::internal(format!("unknown index #{n}")))
    }

    /// Extract u64 row ids from a single-column operand.
    fn row_id_list(op: &Operand) -> VmResult<Vec<u64>> {
        op.tuples
            .iter()
            .map(|row| {
                row.first()
                    .and_then(Raw::as_number)
                    .and_then(Decimal::to_u64)
                    .ok_or_else(|| RuntimeError::InvalidDataType {
                        opcode: "LOAD",
                        detail: "row ids must be unsigned integers".to_owned(),
                    })
            })
            .collect()
    }

    fn load(&mut self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 3)?;
        let (_, table) = self.table_arg(inst, 0)?;
        let ids = Self::row_id_list(&self.input(inst, 1)?)?;
        let fields = self.index_list(inst, 2, table.columns.len())?;
        let dtypes: Vec<DataType> = fields.iter().map(|f| table.columns[*f].dtype).collect();
        let store = TableStore::new(self.backend, table);
        let mut tuples = Vec::with_capacity(ids.len());
        for id in ids {
            let mut reader = RowReader::new(&table.name, id);
            let mut row = Vec::with_capacity(fields.len());
            for (f, dt) in fields.iter().zip(&dtypes) {
                let bytes = store.read_column(&mut reader, ColumnRef::new(*f as u8));
                row.push(decode_cell(*dt, &bytes)?);
            }
            tuples.push(row);
        }
        Ok(Operand::immediate(dtypes, tuples))
    }

    fn repeat_pk(&mut self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 1)?;
        let (_, table) = self.table_arg(inst, 0)?;
        let store = TableStore::new(self.backend, table);
        let tuples = store
            .row_ids()
            .into_iter()
            .map(|id| vec![Raw::Number(Decimal::from_u64(id))])
            .collect();
        Ok(Operand::immediate(vec![DataType::UINT64], tuples))
    }

    /// Encode one index key row from operand cells aligned with the index's
    /// sorted column list.
    fn encode_key_row(table: &Table, index: &Index, row: &[Raw]) -> VmResult<Vec<u8>> {
        let mut parts = Vec::with_capacity(index.columns.len());
        for (cell, col) in row.iter().zip(&index.columns) {
            let dtype = table.columns[col.index()].dtype;
            parts.push(encode_cell(dtype, cell)?);
        }
        Ok(encode_index_key(&parts))
    }

    fn repeat_idx(&mut self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 3)?;
        let (_, table) = self.table_arg(inst, 0)?;
        let index = self.index_arg(inst, 1, table)?;
        let keys = self.input(inst, 2)?;
        let store = TableStore::new(self.backend, table);
        let mut ids: Vec<u64> = Vec::new();
        for row in &keys.tuples {
            let key = Self::encode_key_row(table, index, row)?;
            ids.extend(store.index_rows(&index.name, &key));
        }
        ids.sort_unstable();
        ids.dedup();
        let tuples = ids
            .into_iter()
            .map(|id| vec![Raw::Number(Decimal::from_u64(id))])
            .collect();
        Ok(Operand::immediate(vec![DataType::UINT64], tuples))
    }

    fn repeat_idx_values(&mut self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let (_, table) = self.table_arg(inst, 0)?;
        let index = self.index_arg(inst, 1, table)?;
        let dtypes: Vec<DataType> = index
            .columns
            .iter()
            .map(|c| table.columns[c.index()].dtype)
            .collect();
        let store = TableStore::new(self.backend, table);
        let mut tuples = Vec::new();
        for key in store.index_keys(&index.name) {
            let parts = ledgersql_storage::decode_index_key(&key)
                .ok_or_else(|| RuntimeError::StorageCorrupt("malformed index key".to_owned()))?;
            if parts.len() != dtypes.len() {
                return Err(RuntimeError::StorageCorrupt(
                    "index key arity mismatch".to_owned(),
                ));
            }
            let mut row = Vec::with_capacity(parts.len());
            for (part, dt) in parts.iter().zip(&dtypes) {
                row.push(decode_cell(*dt, part)?);
            }
            tuples.push(row);
        }
        Ok(Operand::immediate(dtypes, tuples))
    }

    // -- mutation ------------------------------------------------------------

    /// Resolve DEFAULT-sequence markers and encode a full row.
    fn materialize_row(
        store: &mut TableStore<'_>,
        table: &Table,
        row: &[Raw],
    ) -> VmResult<Vec<Vec<u8>>> {
        let mut out = Vec::with_capacity(table.columns.len());
        for (cell, col) in row.iter().zip(&table.columns) {
            let is_sequence_marker = matches!(cell, Raw::Bytes(b) if b.is_empty())
                && col.attr.contains(ColumnAttr::HAS_SEQUENCE);
            if is_sequence_marker {
                let seq = col
                    .sequence
                    .ok_or_else(|| RuntimeError::internal("sequence attr without slot"))?;
                let value = Decimal::from_u64(store.next_sequence(seq));
                out.push(encode_cell(col.dtype, &Raw::Number(value))?);
            } else {
                out.push(encode_cell(col.dtype, cell)?);
            }
        }
        Ok(out)
    }

    /// Derive the row id from the encoded primary-key column (or the
    /// implicit row counter for tables without one).
    fn derive_row_id(
        store: &mut TableStore<'_>,
        table: &Table,
        encoded: &[Vec<u8>],
    ) -> VmResult<u64> {
        match table.primary_key_columns().first() {
            Some(pk) => {
                let col = &table.columns[pk.index()];
                let value = encode::decimal_decode(col.dtype, &encoded[pk.index()])
                    .map_err(|e| RuntimeError::StorageCorrupt(e.to_string()))?;
                value.to_u64().ok_or_else(|| RuntimeError::InvalidDataType {
                    opcode: "INSERT",
                    detail: "primary key out of row-id range".to_owned(),
                })
            }
            None => Ok(store.next_sequence(SequenceRef::new(IMPLICIT_ROW_SEQUENCE))),
        }
    }

    fn index_key_from_encoded(index: &Index, encoded: &[Vec<u8>]) -> Vec<u8> {
        let parts: Vec<Vec<u8>> = index
            .columns
            .iter()
            .map(|c| encoded[c.index()].clone())
            .collect();
        encode_index_key(&parts)
    }

    fn insert(&mut self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let (_, table) = self.table_arg(inst, 0)?;
        let values = self.input(inst, 1)?;
        if values.column_count() != table.columns.len() {
            return Err(RuntimeError::InvalidDataType {
                opcode: "INSERT",
                detail: "value row arity mismatch".to_owned(),
            });
        }
        let mut store = TableStore::new(self.backend, table);
        let mut count: u64 = 0;
        for row in &values.tuples {
            let encoded = Self::materialize_row(&mut store, table, row)?;
            let row_id = Self::derive_row_id(&mut store, table, &encoded)?;
            if store.has_row(row_id) {
                return Err(RuntimeError::ConstraintViolation(format!(
                    "duplicate primary key in table {}",
                    table.name
                )));
            }
            for index in &table.indices {
                if index.attr.contains(IndexAttr::UNIQUE) {
                    let key = Self::index_key_from_encoded(index, &encoded);
                    if !store.index_rows(&index.name, &key).is_empty() {
                        return Err(RuntimeError::ConstraintViolation(format!(
                            "unique index {} violated",
                            index.name
                        )));
                    }
                }
            }
            for (i, bytes) in encoded.iter().enumerate() {
                store.write_column(row_id, ColumnRef::new(i as u8), bytes);
            }
            store.insert_row_id(row_id);
            for index in &table.indices {
                let key = Self::index_key_from_encoded(index, &encoded);
                store.index_insert(&index.name, &key, row_id);
            }
            count += 1;
        }
        Ok(Operand::single(
            vec![DataType::UINT64],
            vec![Raw::Number(Decimal::from_u64(count))],
        ))
    }

    fn update(&mut self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 4)?;
        let (_, table) = self.table_arg(inst, 0)?;
        let ids = Self::row_id_list(&self.input(inst, 1)?)?;
        let fields = self.index_list(inst, 2, table.columns.len())?;
        let values = self.input(inst, 3)?;
        if values.column_count() != fields.len() {
            return Err(RuntimeError::InvalidDataType {
                opcode: "UPDATE",
                detail: "assignment arity mismatch".to_owned(),
            });
        }
        if values.row_count() > 1 && values.row_count() != ids.len() {
            return Err(RuntimeError::RowCountMismatch {
                left: ids.len(),
                right: values.row_count(),
            });
        }
        let touched: Vec<&Index> = table
            .indices
            .iter()
            .filter(|i| i.columns.iter().any(|c| fields.contains(&c.index())))
            .collect();
        let mut store = TableStore::new(self.backend, table);
        for (row, id) in ids.iter().enumerate() {
            // old values of every column feeding a touched index
            let mut reader = RowReader::new(&table.name, *id);
            let mut old: Vec<Vec<u8>> = Vec::with_capacity(table.columns.len());
            for c in 0..table.columns.len() {
                old.push(store.read_column(&mut reader, ColumnRef::new(c as u8)));
            }
            let mut new = old.clone();
            for (vcol, field) in fields.iter().enumerate() {
                let dtype = table.columns[*field].dtype;
                new[*field] = encode_cell(dtype, values.cell(row, vcol))?;
            }
            for &index in &touched {
                let old_key = Self::index_key_from_encoded(index, &old);
                let new_key = Self::index_key_from_encoded(index, &new);
                if old_key == new_key {
                    continue;
                }
                if index.attr.contains(IndexAttr::UNIQUE)
                    && !store.index_rows(&index.name, &new_key).is_empty()
                {
                    return Err(RuntimeError::ConstraintViolation(format!(
                        "unique index {} violated",
                        index.name
                    )));
                }
                store.index_remove(&index.name, &old_key, *id);
                store.index_insert(&index.name, &new_key, *id);
            }
            for field in &fields {
                store.write_column(*id, ColumnRef::new(*field as u8), &new[*field]);
            }
        }
        Ok(Operand::single(
            vec![DataType::UINT64],
            vec![Raw::Number(Decimal::from_u64(ids.len() as u64))],
        ))
    }

    fn delete(&mut self, inst: &Instruction) -> VmResult<Operand> {
        self.expect_inputs(inst, 2)?;
        let (_, table) = self.table_arg(inst, 0)?;
        let ids = Self::row_id_list(&self.input(inst, 1)?)?;
        let mut store = TableStore::new(self.backend, table);
        for id in &ids {
            let mut reader = RowReader::new(&table.name, *id);
            let encoded: Vec<Vec<u8>> = (0..table.columns.len())
                .map(|c| store.read_column(&mut reader, ColumnRef::new(c as u8)))
                .collect();
            for index in &table.indices {
                let key = Self::index_key_from_encoded(index, &encoded);
                store.index_remove(&index.name, &key, *id);
            }
            store.remove_row_id(*id);
            store.clear_row(*id);
        }
        Ok(Operand::single(
            vec![DataType::UINT64],
            vec![Raw::Number(Decimal::from_u64(ids.len() as u64))],
        ))
    }
}

/// Convert one cell between type families.
fn cast_cell(source: DataType, target: DataType, cell: &Raw) -> VmResult<Raw> {
    let bad = || RuntimeError::InvalidCastType {
        from: source.to_string(),
        to: target.to_string(),
    };
    match cell {
        Raw::Number(v) => {
            if target.is_numeric() {
                // numeric -> numeric (bool target: nonzero -> 1)
                encode::crop(target, v)
                    .map(Raw::Number)
                    .map_err(|_| bad())
            } else {
                // numeric -> bytes: raw reinterpretation of the source encoding
                let bytes = encode::decimal_encode(source, v).map_err(|_| bad())?;
                match target.family() {
                    TypeFamily::DynamicBytes => Ok(Raw::Bytes(bytes)),
                    TypeFamily::Bytes if bytes.len() == target.size() => Ok(Raw::Bytes(bytes)),
                    _ => Err(bad()),
                }
            }
        }
        Raw::Bytes(b) => {
            if target.is_numeric() {
                // bytes -> numeric: raw reinterpretation at the target width
                encode::decimal_decode(target, b)
                    .map(Raw::Number)
                    .map_err(|_| bad())
            } else {
                match target.family() {
                    TypeFamily::DynamicBytes => Ok(Raw::Bytes(b.clone())),
                    TypeFamily::Bytes | TypeFamily::Address if b.len() == target.size() => {
                        Ok(Raw::Bytes(b.clone()))
                    }
                    _ => Err(bad()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersql_schema::Column;
    use ledgersql_storage::MemoryBackend;

    fn num(s: &str) -> Raw {
        Raw::Number(s.parse().unwrap())
    }

    fn int8() -> DataType {
        DataType::int(1).unwrap()
    }

    fn imm1(dt: DataType, cells: &[Raw]) -> Operand {
        Operand::immediate(vec![dt], cells.iter().map(|c| vec![c.clone()]).collect())
    }

    fn run(schema: &Schema, backend: &mut MemoryBackend, program: &[Instruction]) -> VmResult<Operand> {
        Engine::new(schema, backend, ExecContext::default()).execute(program)
    }

    fn run_empty(program: &[Instruction]) -> VmResult<Operand> {
        let schema = Schema::new();
        let mut backend = MemoryBackend::new();
        run(&schema, &mut backend, program)
    }

    fn binop(op: Opcode, a: Operand, b: Operand) -> Vec<Instruction> {
        vec![Instruction::new(op, vec![a, b], 0)]
    }

    #[test]
    fn add_overflow_at_int8_boundary() {
        let program = binop(Opcode::Add, imm1(int8(), &[num("127")]), imm1(int8(), &[num("1")]));
        assert_eq!(run_empty(&program), Err(RuntimeError::Overflow));
    }

    #[test]
    fn sub_underflow_at_int8_boundary() {
        let program = binop(Opcode::Sub, imm1(int8(), &[num("-128")]), imm1(int8(), &[num("1")]));
        assert_eq!(run_empty(&program), Err(RuntimeError::Underflow));
    }

    #[test]
    fn div_by_zero_precedes_range_check() {
        let program = binop(Opcode::Div, imm1(int8(), &[num("10")]), imm1(int8(), &[num("0")]));
        assert_eq!(run_empty(&program), Err(RuntimeError::DividedByZero));
        let program = binop(Opcode::Mod, imm1(int8(), &[num("10")]), imm1(int8(), &[num("0")]));
        assert_eq!(run_empty(&program), Err(RuntimeError::DividedByZero));
    }

    #[test]
    fn unsafe_math_crops_instead_of_erroring() {
        let schema = Schema::new();
        let mut backend = MemoryBackend::new();
        let ctx = ExecContext {
            safe_math: false,
            ..ExecContext::default()
        };
        let program = binop(Opcode::Add, imm1(int8(), &[num("127")]), imm1(int8(), &[num("1")]));
        let out = Engine::new(&schema, &mut backend, ctx).execute(&program).unwrap();
        assert_eq!(out.tuples[0][0], num("-128"));
    }

    #[test]
    fn range_check_uses_narrower_type() {
        // int8 + int16: 100 + 100 exceeds int8 max even though int16 holds it
        let program = binop(
            Opcode::Add,
            imm1(int8(), &[num("100")]),
            imm1(DataType::int(2).unwrap(), &[num("100")]),
        );
        assert_eq!(run_empty(&program), Err(RuntimeError::Overflow));
    }

    #[test]
    fn arithmetic_broadcasts_single_row() {
        let program = binop(
            Opcode::Add,
            imm1(int8(), &[num("1"), num("2"), num("3")]),
            imm1(int8(), &[num("10")]),
        );
        let out = run_empty(&program).unwrap();
        let got: Vec<Raw> = out.tuples.iter().map(|r| r[0].clone()).collect();
        assert_eq!(got, vec![num("11"), num("12"), num("13")]);
    }

    #[test]
    fn multi_row_count_mismatch() {
        let program = binop(
            Opcode::Add,
            imm1(int8(), &[num("1"), num("2")]),
            imm1(int8(), &[num("1"), num("2"), num("3")]),
        );
        assert_eq!(
            run_empty(&program),
            Err(RuntimeError::RowCountMismatch { left: 2, right: 3 })
        );
    }

    #[test]
    fn comparisons_yield_bool() {
        let program = binop(
            Opcode::Lt,
            imm1(int8(), &[num("1"), num("5")]),
            imm1(int8(), &[num("3")]),
        );
        let out = run_empty(&program).unwrap();
        assert_eq!(out.dtypes, vec![DataType::BOOL]);
        assert!(out.tuples[0][0].is_true());
        assert!(!out.tuples[1][0].is_true());
    }

    #[test]
    fn boolean_rejects_non_bool() {
        let program = binop(Opcode::And, imm1(int8(), &[num("1")]), imm1(int8(), &[num("1")]));
        assert!(matches!(
            run_empty(&program),
            Err(RuntimeError::InvalidDataType { .. })
        ));
    }

    #[test]
    fn union_dedups_and_sorts() {
        let program = binop(
            Opcode::Union,
            imm1(int8(), &[num("3"), num("1")]),
            imm1(int8(), &[num("2"), num("1")]),
        );
        let out = run_empty(&program).unwrap();
        let got: Vec<Raw> = out.tuples.iter().map(|r| r[0].clone()).collect();
        assert_eq!(got, vec![num("1"), num("2"), num("3")]);
    }

    #[test]
    fn intersection_keeps_common_rows() {
        let program = binop(
            Opcode::Intxn,
            imm1(int8(), &[num("3"), num("1"), num("2")]),
            imm1(int8(), &[num("2"), num("3"), num("9")]),
        );
        let out = run_empty(&program).unwrap();
        let got: Vec<Raw> = out.tuples.iter().map(|r| r[0].clone()).collect();
        assert_eq!(got, vec![num("2"), num("3")]);
    }

    #[test]
    fn sort_multi_key_fixture() {
        // rows (bytes, uint, bool); keys: bool asc @2, uint desc @1
        let bytes1 = DataType::bytes(1).unwrap();
        let uint8 = DataType::uint(1).unwrap();
        let rows: Vec<(&[u8; 1], &str, bool)> = vec![
            (b"c", "1", true),
            (b"b", "2", true),
            (b"a", "3", true),
            (b"a", "1", false),
            (b"b", "2", false),
            (b"c", "3", false),
            (b"b", "3", false),
            (b"a", "3", false),
        ];
        let tuples: Vec<Tuple> = rows
            .iter()
            .map(|(s, n, b)| {
                vec![Raw::Bytes(s.to_vec()), num(n), Raw::from_bool(*b)]
            })
            .collect();
        let data = Operand::immediate(vec![bytes1, uint8, DataType::BOOL], tuples);
        let keys = Operand::immediate(
            vec![DataType::UINT64, DataType::BOOL],
            vec![
                vec![num("2"), Raw::from_bool(false)],
                vec![num("1"), Raw::from_bool(true)],
            ],
        );
        let program = vec![Instruction::new(Opcode::Sort, vec![data, keys], 0)];
        let out = run_empty(&program).unwrap();
        let got: Vec<(Vec<u8>, String, bool)> = out
            .tuples
            .iter()
            .map(|r| {
                (
                    r[0].as_bytes().unwrap().to_vec(),
                    r[1].as_number().unwrap().to_string(),
                    r[2].is_true(),
                )
            })
            .collect();
        let expect: Vec<(Vec<u8>, String, bool)> = vec![
            (b"c".to_vec(), "3".to_owned(), false),
            (b"b".to_vec(), "3".to_owned(), false),
            (b"a".to_vec(), "3".to_owned(), false),
            (b"b".to_vec(), "2".to_owned(), false),
            (b"a".to_vec(), "1".to_owned(), false),
            (b"a".to_vec(), "3".to_owned(), true),
            (b"b".to_vec(), "2".to_owned(), true),
            (b"c".to_vec(), "1".to_owned(), true),
        ];
        assert_eq!(got, expect);
    }

    #[test]
    fn range_beyond_rows_is_empty() {
        let data = imm1(int8(), &[num("1"), num("2")]);
        let bounds = Operand::single(vec![DataType::UINT64], vec![num("20")]);
        let program = vec![Instruction::new(Opcode::Range, vec![data, bounds], 0)];
        assert_eq!(run_empty(&program).unwrap().row_count(), 0);
    }

    #[test]
    fn range_limit_zero_is_empty() {
        let data = imm1(int8(), &[num("1"), num("2")]);
        let bounds = Operand::single(
            vec![DataType::UINT64, DataType::UINT64],
            vec![num("0"), num("0")],
        );
        let program = vec![Instruction::new(Opcode::Range, vec![data, bounds], 0)];
        assert_eq!(run_empty(&program).unwrap().row_count(), 0);
    }

    #[test]
    fn range_offset_then_limit() {
        let data = imm1(int8(), &[num("1"), num("2"), num("3"), num("4")]);
        let bounds = Operand::single(
            vec![DataType::UINT64, DataType::UINT64],
            vec![num("1"), num("2")],
        );
        let program = vec![Instruction::new(Opcode::Range, vec![data, bounds], 0)];
        let out = run_empty(&program).unwrap();
        let got: Vec<Raw> = out.tuples.iter().map(|r| r[0].clone()).collect();
        assert_eq!(got, vec![num("2"), num("3")]);
    }

    #[test]
    fn cast_is_raw_reinterpretation() {
        let int16 = DataType::int(2).unwrap();
        let uint16 = DataType::uint(2).unwrap();
        let target = Operand::single(
            vec![DataType::UINT64],
            vec![Raw::Number(Decimal::from_u64(u64::from(uint16.raw())))],
        );
        let data = imm1(int16, &[num("32767"), num("-32768")]);
        let program = vec![Instruction::new(Opcode::Cast, vec![data, target], 0)];
        let out = run_empty(&program).unwrap();
        assert_eq!(out.dtypes, vec![uint16]);
        assert_eq!(out.tuples[0][0], num("32767"));
        assert_eq!(out.tuples[1][0], num("32768"));
    }

    #[test]
    fn cast_numeric_to_bool_is_nonzero() {
        let target = Operand::single(
            vec![DataType::UINT64],
            vec![Raw::Number(Decimal::from_u64(u64::from(DataType::BOOL.raw())))],
        );
        let data = imm1(DataType::int(4).unwrap(), &[num("7"), num("0")]);
        let program = vec![Instruction::new(Opcode::Cast, vec![data, target], 0)];
        let out = run_empty(&program).unwrap();
        assert!(out.tuples[0][0].is_true());
        assert!(!out.tuples[1][0].is_true());
    }

    #[test]
    fn cast_rejects_width_mismatch_bytes() {
        let bytes4 = DataType::bytes(4).unwrap();
        let target = Operand::single(
            vec![DataType::UINT64],
            vec![Raw::Number(Decimal::from_u64(u64::from(bytes4.raw())))],
        );
        let data = imm1(DataType::int(2).unwrap(), &[num("1")]);
        let program = vec![Instruction::new(Opcode::Cast, vec![data, target], 0)];
        assert!(matches!(
            run_empty(&program),
            Err(RuntimeError::InvalidCastType { .. })
        ));
    }

    #[test]
    fn field_prune_cut_projections() {
        let int16 = DataType::int(2).unwrap();
        let data = Operand::immediate(
            vec![int8(), int16, DataType::BOOL],
            vec![vec![num("1"), num("2"), Raw::from_bool(true)]],
        );
        let keep = Operand::single(
            vec![DataType::UINT64, DataType::UINT64],
            vec![num("2"), num("0")],
        );
        let program = vec![Instruction::new(Opcode::Field, vec![data.clone(), keep], 0)];
        let out = run_empty(&program).unwrap();
        assert_eq!(out.dtypes, vec![DataType::BOOL, int8()]);

        let drop = Operand::single(vec![DataType::UINT64], vec![num("1")]);
        let program = vec![Instruction::new(Opcode::Prune, vec![data.clone(), drop], 0)];
        let out = run_empty(&program).unwrap();
        assert_eq!(out.dtypes, vec![int8(), DataType::BOOL]);

        let boundary = Operand::single(vec![DataType::UINT64], vec![num("2")]);
        let program = vec![Instruction::new(Opcode::Cut, vec![data.clone(), boundary], 0)];
        let out = run_empty(&program).unwrap();
        assert_eq!(out.dtypes, vec![int8(), int16]);

        let oob = Operand::single(vec![DataType::UINT64], vec![num("3")]);
        let program = vec![Instruction::new(Opcode::Field, vec![data, oob], 0)];
        assert_eq!(
            run_empty(&program),
            Err(RuntimeError::IndexOutOfRange { index: 3, columns: 3 })
        );
    }

    #[test]
    fn filter_requires_equal_rows() {
        let data = imm1(int8(), &[num("1"), num("2"), num("3")]);
        let mask = Operand::immediate(
            vec![DataType::BOOL],
            vec![
                vec![Raw::from_bool(true)],
                vec![Raw::from_bool(false)],
                vec![Raw::from_bool(true)],
            ],
        );
        let program = vec![Instruction::new(Opcode::Filter, vec![data.clone(), mask], 0)];
        let out = run_empty(&program).unwrap();
        let got: Vec<Raw> = out.tuples.iter().map(|r| r[0].clone()).collect();
        assert_eq!(got, vec![num("1"), num("3")]);

        let short_mask = Operand::immediate(vec![DataType::BOOL], vec![vec![Raw::from_bool(true)]]);
        let program = vec![Instruction::new(Opcode::Filter, vec![data, short_mask], 0)];
        assert!(matches!(
            run_empty(&program),
            Err(RuntimeError::RowCountMismatch { .. })
        ));
    }

    #[test]
    fn like_over_rows() {
        let subjects = Operand::immediate(
            vec![DataType::DYNAMIC_BYTES],
            vec![
                vec![Raw::Bytes(b"alice".to_vec())],
                vec![Raw::Bytes(b"bob".to_vec())],
            ],
        );
        let pattern = Operand::single(vec![DataType::DYNAMIC_BYTES], vec![Raw::Bytes(b"%li%".to_vec())]);
        let program = vec![Instruction::new(Opcode::Like, vec![subjects, pattern], 0)];
        let out = run_empty(&program).unwrap();
        assert!(out.tuples[0][0].is_true());
        assert!(!out.tuples[1][0].is_true());
    }

    #[test]
    fn empty_register_read_fails() {
        let program = vec![Instruction::new(
            Opcode::Not,
            vec![Operand::register(9)],
            0,
        )];
        assert_eq!(run_empty(&program), Err(RuntimeError::EmptyRegister(9)));
    }

    // -- storage opcodes -----------------------------------------------------

    fn storage_schema() -> Schema {
        let mut table = Table::new("accounts");
        let mut id = Column::new("id", DataType::UINT64);
        id.attr.insert(ColumnAttr::PRIMARY_KEY);
        table.columns.push(id);
        table
            .columns
            .push(Column::new("balance", DataType::uint(16).unwrap()));
        table
            .columns
            .push(Column::new("memo", DataType::DYNAMIC_BYTES));
        table.indices.push(Index::new(
            "primary",
            IndexAttr::UNIQUE,
            vec![ColumnRef::new(0)],
        ));
        table.indices.push(Index::new(
            "by_balance",
            IndexAttr::empty(),
            vec![ColumnRef::new(1)],
        ));
        Schema {
            tables: vec![table],
        }
    }

    fn table_ref_op() -> Operand {
        Operand::single(vec![DataType::UINT64], vec![num("0")])
    }

    fn insert_rows(schema: &Schema, backend: &mut MemoryBackend) {
        let values = Operand::immediate(
            vec![
                DataType::UINT64,
                DataType::uint(16).unwrap(),
                DataType::DYNAMIC_BYTES,
            ],
            vec![
                vec![num("1"), num("100"), Raw::Bytes(b"first".to_vec())],
                vec![num("2"), num("250"), Raw::Bytes(b"second".to_vec())],
                vec![num("3"), num("100"), Raw::Bytes(b"third".to_vec())],
            ],
        );
        let program = vec![Instruction::new(
            Opcode::Insert,
            vec![table_ref_op(), values],
            0,
        )];
        let out = run(schema, backend, &program).unwrap();
        assert_eq!(out.tuples[0][0], num("3"));
    }

    #[test]
    fn insert_then_repeat_pk_and_load() {
        let schema = storage_schema();
        let mut backend = MemoryBackend::new();
        insert_rows(&schema, &mut backend);

        let program = vec![
            Instruction::new(Opcode::RepeatPk, vec![table_ref_op()], 0),
            Instruction::new(
                Opcode::Load,
                vec![
                    table_ref_op(),
                    Operand::register(0),
                    Operand::single(
                        vec![DataType::UINT64, DataType::UINT64],
                        vec![num("1"), num("2")],
                    ),
                ],
                1,
            ),
        ];
        let out = run(&schema, &mut backend, &program).unwrap();
        assert_eq!(out.row_count(), 3);
        assert_eq!(out.tuples[0][0], num("100"));
        assert_eq!(out.tuples[1][1], Raw::Bytes(b"second".to_vec()));
    }

    #[test]
    fn repeat_idx_matches_literal_keys() {
        let schema = storage_schema();
        let mut backend = MemoryBackend::new();
        insert_rows(&schema, &mut backend);

        let keys = Operand::immediate(
            vec![DataType::uint(16).unwrap()],
            vec![vec![num("100")]],
        );
        let program = vec![Instruction::new(
            Opcode::RepeatIdx,
            vec![
                table_ref_op(),
                Operand::single(vec![DataType::UINT64], vec![num("1")]),
                keys,
            ],
            0,
        )];
        let out = run(&schema, &mut backend, &program).unwrap();
        let ids: Vec<Raw> = out.tuples.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![num("1"), num("3")]);
    }

    #[test]
    fn repeat_idx_values_enumerates_distinct_keys() {
        let schema = storage_schema();
        let mut backend = MemoryBackend::new();
        insert_rows(&schema, &mut backend);

        let program = vec![Instruction::new(
            Opcode::RepeatIdxV,
            vec![
                table_ref_op(),
                Operand::single(vec![DataType::UINT64], vec![num("1")]),
            ],
            0,
        )];
        let out = run(&schema, &mut backend, &program).unwrap();
        assert_eq!(out.row_count(), 2);
        let mut values: Vec<String> = out
            .tuples
            .iter()
            .map(|r| r[0].as_number().unwrap().to_string())
            .collect();
        values.sort();
        assert_eq!(values, vec!["100".to_owned(), "250".to_owned()]);
    }

    #[test]
    fn duplicate_primary_key_rejected() {
        let schema = storage_schema();
        let mut backend = MemoryBackend::new();
        insert_rows(&schema, &mut backend);

        let values = Operand::immediate(
            vec![
                DataType::UINT64,
                DataType::uint(16).unwrap(),
                DataType::DYNAMIC_BYTES,
            ],
            vec![vec![num("2"), num("9"), Raw::Bytes(vec![])]],
        );
        let program = vec![Instruction::new(
            Opcode::Insert,
            vec![table_ref_op(), values],
            0,
        )];
        assert!(matches!(
            run(&schema, &mut backend, &program),
            Err(RuntimeError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn update_maintains_indices() {
        let schema = storage_schema();
        let mut backend = MemoryBackend::new();
        insert_rows(&schema, &mut backend);

        // move row 1 from balance 100 to 500
        let program = vec![Instruction::new(
            Opcode::Update,
            vec![
                table_ref_op(),
                Operand::immediate(vec![DataType::UINT64], vec![vec![num("1")]]),
                Operand::single(vec![DataType::UINT64], vec![num("1")]),
                Operand::immediate(vec![DataType::uint(16).unwrap()], vec![vec![num("500")]]),
            ],
            0,
        )];
        run(&schema, &mut backend, &program).unwrap();

        let keys = Operand::immediate(vec![DataType::uint(16).unwrap()], vec![vec![num("100")]]);
        let lookup = vec![Instruction::new(
            Opcode::RepeatIdx,
            vec![
                table_ref_op(),
                Operand::single(vec![DataType::UINT64], vec![num("1")]),
                keys,
            ],
            0,
        )];
        let out = run(&schema, &mut backend, &lookup).unwrap();
        let ids: Vec<Raw> = out.tuples.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![num("3")]);
    }

    #[test]
    fn delete_removes_rows_and_keys() {
        let schema = storage_schema();
        let mut backend = MemoryBackend::new();
        insert_rows(&schema, &mut backend);

        let program = vec![Instruction::new(
            Opcode::Delete,
            vec![
                table_ref_op(),
                Operand::immediate(
                    vec![DataType::UINT64],
                    vec![vec![num("1")], vec![num("3")]],
                ),
            ],
            0,
        )];
        let out = run(&schema, &mut backend, &program).unwrap();
        assert_eq!(out.tuples[0][0], num("2"));

        let list = vec![Instruction::new(Opcode::RepeatPk, vec![table_ref_op()], 0)];
        let out = run(&schema, &mut backend, &list).unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.tuples[0][0], num("2"));
    }

    #[test]
    fn autoincrement_insert_uses_sequence() {
        let mut table = Table::new("events");
        let mut id = Column::new("id", DataType::UINT64);
        id.attr.insert(ColumnAttr::PRIMARY_KEY);
        id.attr.insert(ColumnAttr::HAS_SEQUENCE);
        id.sequence = Some(SequenceRef::new(0));
        table.columns.push(id);
        table.columns.push(Column::new("kind", DataType::uint(1).unwrap()));
        table.indices.push(Index::new(
            "primary",
            IndexAttr::UNIQUE,
            vec![ColumnRef::new(0)],
        ));
        let schema = Schema {
            tables: vec![table],
        };
        let mut backend = MemoryBackend::new();

        // the empty-bytes cell is the DEFAULT-sequence marker
        let values = Operand::immediate(
            vec![DataType::UINT64, DataType::uint(1).unwrap()],
            vec![
                vec![Raw::Bytes(vec![]), num("7")],
                vec![Raw::Bytes(vec![]), num("8")],
            ],
        );
        let program = vec![Instruction::new(
            Opcode::Insert,
            vec![table_ref_op(), values],
            0,
        )];
        run(&schema, &mut backend, &program).unwrap();

        let list = vec![Instruction::new(Opcode::RepeatPk, vec![table_ref_op()], 0)];
        let out = run(&schema, &mut backend, &list).unwrap();
        let ids: Vec<Raw> = out.tuples.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![num("1"), num("2")]);
    }
}
