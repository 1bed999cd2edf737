//! WHERE-clause attribution.
//!
//! [`parse_clause`] walks an already-checked expression tree bottom-up,
//! annotating every node with its referenced column set, an attribute
//! bitmask, and — where the node's satisfying value combinations can be
//! listed — an enumerated hash-key set. Enumerations are bounded: a merge
//! that would exceed [`MAX_HASH_KEYS`] abandons enumeration for that node
//! only, leaving it usable for the other planning strategies.

use std::collections::BTreeSet;

use ledgersql_ast::{BinaryOp, Expr, ExprKind, Literal};
use ledgersql_types::{encode, ColumnRef, DataType};

use crate::PlanError;

/// Upper bound on any clause's enumerated hash-key set.
pub const MAX_HASH_KEYS: usize = 64;

/// One encoded column value inside a hash key.
pub type HashKey = Vec<u8>;

/// Clause attribute bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClauseAttr(u16);

impl ClauseAttr {
    /// The node is a constant literal.
    pub const CONST: Self = Self(1 << 0);
    /// The node is a plain column reference.
    pub const COLUMN: Self = Self(1 << 1);
    /// The node's satisfying values are enumerated in `keys`.
    pub const ENUMERABLE: Self = Self(1 << 2);
    /// The subtree contains a construct that forces a full scan.
    pub const FORCE_SCAN: Self = Self(1 << 3);
    /// The node is a boolean AND.
    pub const AND: Self = Self(1 << 4);
    /// The node is a boolean OR.
    pub const OR: Self = Self(1 << 5);

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

/// One attributed WHERE-subtree. Built bottom-up, discarded after planning.
#[derive(Debug)]
pub struct Clause<'a> {
    /// The underlying expression node.
    pub expr: &'a Expr,
    /// Schema columns referenced anywhere in the subtree.
    pub columns: BTreeSet<ColumnRef>,
    /// Attribute bitmask.
    pub attr: ClauseAttr,
    /// Ascending-sorted columns of the hash-key set, when enumerable.
    pub key_columns: Vec<ColumnRef>,
    /// Hash-key rows aligned with `key_columns`.
    pub keys: Vec<Vec<HashKey>>,
    /// Constant value of a CONST node.
    pub const_value: Option<HashKey>,
    /// Child clauses in operand order.
    pub children: Vec<Clause<'a>>,
}

impl<'a> Clause<'a> {
    fn new(expr: &'a Expr) -> Self {
        Self {
            expr,
            columns: BTreeSet::new(),
            attr: ClauseAttr::empty(),
            key_columns: Vec::new(),
            keys: Vec::new(),
            const_value: None,
            children: Vec::new(),
        }
    }

    /// Whether this clause enumerates its satisfying values.
    #[must_use]
    pub fn is_enumerable(&self) -> bool {
        self.attr.contains(ClauseAttr::ENUMERABLE)
    }
}

/// Encode a checked literal into its column byte representation.
fn encode_literal(dtype: DataType, lit: &Literal) -> Result<HashKey, PlanError> {
    let unencodable = || PlanError::Unchecked("literal kind has no encoding".to_owned());
    match lit {
        Literal::Number(v) => {
            encode::decimal_encode(dtype, v).map_err(|e| PlanError::Unchecked(e.to_string()))
        }
        Literal::Bool(b) => Ok(vec![u8::from(*b)]),
        Literal::Bytes(b) => Ok(b.clone()),
        Literal::Address(a) => a.bytes().map(|b| b.to_vec()).ok_or_else(unencodable),
        Literal::Null | Literal::Any | Literal::Default => Err(unencodable()),
    }
}

/// Merge the hash keys of two column-disjoint AND operands as a bounded
/// cartesian product. `None` means the bound was exceeded and enumeration is
/// abandoned for the merged node.
fn merge_and_keys<'a>(
    left: &Clause<'a>,
    right: &Clause<'a>,
) -> Result<Option<(Vec<ColumnRef>, Vec<Vec<HashKey>>)>, PlanError> {
    // column bookkeeping must agree with the clause column sets
    let left_set: BTreeSet<ColumnRef> = left.key_columns.iter().copied().collect();
    let right_set: BTreeSet<ColumnRef> = right.key_columns.iter().copied().collect();
    if left_set != left.columns || right_set != right.columns {
        return Err(PlanError::Internal(
            "hash-key columns disagree with clause column set".to_owned(),
        ));
    }
    debug_assert!(left_set.is_disjoint(&right_set));

    if left.keys.len().saturating_mul(right.keys.len()) > MAX_HASH_KEYS {
        return Ok(None);
    }

    // merged columns are ascending-sorted; remember where each side's cells go
    let mut order: Vec<(ColumnRef, bool, usize)> = left
        .key_columns
        .iter()
        .enumerate()
        .map(|(i, c)| (*c, true, i))
        .chain(
            right
                .key_columns
                .iter()
                .enumerate()
                .map(|(i, c)| (*c, false, i)),
        )
        .collect();
    order.sort_by_key(|(c, _, _)| *c);
    let key_columns: Vec<ColumnRef> = order.iter().map(|(c, _, _)| *c).collect();

    let mut keys = Vec::with_capacity(left.keys.len() * right.keys.len());
    for l in &left.keys {
        for r in &right.keys {
            let row: Vec<HashKey> = order
                .iter()
                .map(|(_, from_left, i)| {
                    if *from_left {
                        l[*i].clone()
                    } else {
                        r[*i].clone()
                    }
                })
                .collect();
            keys.push(row);
        }
    }
    Ok(Some((key_columns, keys)))
}

/// Concatenate the hash keys of two same-column OR operands, under the same
/// bound as the AND merge.
fn merge_or_keys<'a>(
    left: &Clause<'a>,
    right: &Clause<'a>,
) -> Result<Option<(Vec<ColumnRef>, Vec<Vec<HashKey>>)>, PlanError> {
    if left.key_columns != right.key_columns {
        return Err(PlanError::Internal(
            "OR hash-key columns differ between operands".to_owned(),
        ));
    }
    if left.keys.len() + right.keys.len() > MAX_HASH_KEYS {
        return Ok(None);
    }
    let mut keys = left.keys.clone();
    keys.extend(right.keys.iter().cloned());
    Ok(Some((left.key_columns.clone(), keys)))
}

/// Attribute one expression subtree.
pub fn parse_clause(expr: &Expr) -> Result<Clause<'_>, PlanError> {
    let mut clause = Clause::new(expr);
    match &expr.kind {
        ExprKind::Column(name) => {
            let cref = name
                .column
                .ok_or_else(|| PlanError::Unchecked(format!("unresolved column {}", name.name)))?;
            clause.columns.insert(cref);
            clause.attr.insert(ClauseAttr::COLUMN);
        }

        ExprKind::Literal(lit) => {
            clause.attr.insert(ClauseAttr::CONST);
            let dtype = expr
                .dtype
                .ok_or_else(|| PlanError::Unchecked("untyped literal".to_owned()))?;
            clause.const_value = Some(encode_literal(dtype, lit)?);
        }

        ExprKind::Unary { operand, .. } => {
            let child = parse_clause(operand)?;
            clause.columns.extend(child.columns.iter().copied());
            if child.attr.contains(ClauseAttr::FORCE_SCAN) {
                clause.attr.insert(ClauseAttr::FORCE_SCAN);
            }
            clause.children.push(child);
        }

        ExprKind::Binary { op, left, right } => {
            let l = parse_clause(left)?;
            let r = parse_clause(right)?;
            clause.columns.extend(l.columns.iter().copied());
            clause.columns.extend(r.columns.iter().copied());
            if l.attr.contains(ClauseAttr::FORCE_SCAN) || r.attr.contains(ClauseAttr::FORCE_SCAN)
            {
                clause.attr.insert(ClauseAttr::FORCE_SCAN);
            }
            match op {
                BinaryOp::Eq => {
                    // column-vs-constant equality is directly enumerable
                    let col_const = if l.attr.contains(ClauseAttr::COLUMN)
                        && r.attr.contains(ClauseAttr::CONST)
                    {
                        Some((&l, &r))
                    } else if r.attr.contains(ClauseAttr::COLUMN)
                        && l.attr.contains(ClauseAttr::CONST)
                    {
                        Some((&r, &l))
                    } else {
                        None
                    };
                    if let Some((col, konst)) = col_const {
                        let cref = *col.columns.iter().next().expect("column clause");
                        let value = konst.const_value.clone().expect("const clause");
                        clause.key_columns = vec![cref];
                        clause.keys = vec![vec![value]];
                        clause.attr.insert(ClauseAttr::ENUMERABLE);
                    }
                }
                BinaryOp::And => {
                    clause.attr.insert(ClauseAttr::AND);
                    if l.is_enumerable()
                        && r.is_enumerable()
                        && l.columns.is_disjoint(&r.columns)
                    {
                        if let Some((key_columns, keys)) = merge_and_keys(&l, &r)? {
                            clause.key_columns = key_columns;
                            clause.keys = keys;
                            clause.attr.insert(ClauseAttr::ENUMERABLE);
                        }
                    }
                }
                BinaryOp::Or => {
                    clause.attr.insert(ClauseAttr::OR);
                    if l.is_enumerable() && r.is_enumerable() && l.columns == r.columns {
                        if let Some((key_columns, keys)) = merge_or_keys(&l, &r)? {
                            clause.key_columns = key_columns;
                            clause.keys = keys;
                            clause.attr.insert(ClauseAttr::ENUMERABLE);
                        }
                    }
                }
                // other operators carry no enumeration benefit
                _ => {}
            }
            clause.children.push(l);
            clause.children.push(r);
        }

        ExprKind::In { needle, haystack } => {
            let n = parse_clause(needle)?;
            clause.columns.extend(n.columns.iter().copied());
            let enumerable = n.attr.contains(ClauseAttr::COLUMN)
                && haystack.len() <= MAX_HASH_KEYS
                && haystack
                    .iter()
                    .all(|alt| matches!(&alt.kind, ExprKind::Literal(_)));
            let mut children = vec![n];
            for alt in haystack {
                let c = parse_clause(alt)?;
                clause.columns.extend(c.columns.iter().copied());
                children.push(c);
            }
            if enumerable {
                let cref = *children[0].columns.iter().next().expect("column needle");
                clause.key_columns = vec![cref];
                clause.keys = children[1..]
                    .iter()
                    .map(|c| vec![c.const_value.clone().expect("const alternative")])
                    .collect();
                clause.attr.insert(ClauseAttr::ENUMERABLE);
            }
            clause.children = children;
        }

        ExprKind::Like {
            subject, pattern, ..
        } => {
            for part in [subject, pattern] {
                let c = parse_clause(part)?;
                clause.columns.extend(c.columns.iter().copied());
                if c.attr.contains(ClauseAttr::FORCE_SCAN) {
                    clause.attr.insert(ClauseAttr::FORCE_SCAN);
                }
                clause.children.push(c);
            }
        }

        ExprKind::Cast { operand, .. } => {
            let c = parse_clause(operand)?;
            clause.columns.extend(c.columns.iter().copied());
            if c.attr.contains(ClauseAttr::FORCE_SCAN) {
                clause.attr.insert(ClauseAttr::FORCE_SCAN);
            }
            clause.children.push(c);
        }

        ExprKind::Call { args, .. } => {
            // function calls are never index-usable
            clause.attr.insert(ClauseAttr::FORCE_SCAN);
            for arg in args {
                let c = parse_clause(arg)?;
                clause.columns.extend(c.columns.iter().copied());
                clause.children.push(c);
            }
        }
    }
    Ok(clause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersql_ast::{ColumnName, Span};

    fn typed_num(s: &str, dt: DataType) -> Expr {
        let mut e = Expr::literal(Literal::Number(s.parse().unwrap()), Span::ZERO);
        e.dtype = Some(dt);
        e
    }

    fn resolved_col(r: u8, dt: DataType) -> Expr {
        let mut name = ColumnName::new("c", Span::ZERO);
        name.column = Some(ColumnRef::new(r));
        let mut e = Expr::new(ExprKind::Column(name), Span::ZERO);
        e.dtype = Some(dt);
        e
    }

    fn eq(left: Expr, right: Expr) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Eq,
                left: Box::new(left),
                right: Box::new(right),
            },
            Span::ZERO,
        )
    }

    fn join(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            Span::ZERO,
        )
    }

    fn in_list(col: u8, dt: DataType, values: &[&str]) -> Expr {
        Expr::new(
            ExprKind::In {
                needle: Box::new(resolved_col(col, dt)),
                haystack: values.iter().map(|v| typed_num(v, dt)).collect(),
            },
            Span::ZERO,
        )
    }

    #[test]
    fn equality_is_enumerable() {
        let dt = DataType::uint(1).unwrap();
        let expr = eq(resolved_col(0, dt), typed_num("7", dt));
        let clause = parse_clause(&expr).unwrap();
        assert!(clause.is_enumerable());
        assert_eq!(clause.key_columns, vec![ColumnRef::new(0)]);
        assert_eq!(clause.keys, vec![vec![vec![7u8]]]);
    }

    #[test]
    fn reversed_equality_is_enumerable() {
        let dt = DataType::uint(1).unwrap();
        let expr = eq(typed_num("7", dt), resolved_col(0, dt));
        assert!(parse_clause(&expr).unwrap().is_enumerable());
    }

    #[test]
    fn and_merge_is_cartesian() {
        let dt = DataType::uint(1).unwrap();
        let expr = join(
            BinaryOp::And,
            in_list(0, dt, &["1", "2", "3"]),
            in_list(1, dt, &["4", "5"]),
        );
        let clause = parse_clause(&expr).unwrap();
        assert!(clause.is_enumerable());
        assert_eq!(clause.key_columns, vec![ColumnRef::new(0), ColumnRef::new(1)]);
        assert_eq!(clause.keys.len(), 3 * 2);
    }

    #[test]
    fn and_merge_over_cap_abandons_enumeration_only() {
        let dt = DataType::uint(1).unwrap();
        let nine: Vec<String> = (0..9).map(|i| i.to_string()).collect();
        let nine_refs: Vec<&str> = nine.iter().map(String::as_str).collect();
        let expr = join(
            BinaryOp::And,
            in_list(0, dt, &nine_refs),
            in_list(1, dt, &nine_refs[..8]),
        );
        let clause = parse_clause(&expr).unwrap();
        // 9 * 8 = 72 > 64
        assert!(!clause.is_enumerable());
        assert!(clause.attr.contains(ClauseAttr::AND));
        // children keep their own enumerations
        assert!(clause.children[0].is_enumerable());
        assert!(clause.children[1].is_enumerable());
    }

    #[test]
    fn or_merge_concatenates_same_column() {
        let dt = DataType::uint(1).unwrap();
        let expr = join(
            BinaryOp::Or,
            eq(resolved_col(0, dt), typed_num("1", dt)),
            eq(resolved_col(0, dt), typed_num("2", dt)),
        );
        let clause = parse_clause(&expr).unwrap();
        assert!(clause.is_enumerable());
        assert_eq!(clause.keys.len(), 2);
    }

    #[test]
    fn or_different_columns_not_enumerable() {
        let dt = DataType::uint(1).unwrap();
        let expr = join(
            BinaryOp::Or,
            eq(resolved_col(0, dt), typed_num("1", dt)),
            eq(resolved_col(1, dt), typed_num("2", dt)),
        );
        let clause = parse_clause(&expr).unwrap();
        assert!(!clause.is_enumerable());
        assert!(clause.attr.contains(ClauseAttr::OR));
    }

    #[test]
    fn call_forces_scan() {
        let dt = DataType::uint(1).unwrap();
        let call = Expr::new(
            ExprKind::Call {
                name: "abs".to_owned(),
                args: vec![resolved_col(0, dt)],
            },
            Span::ZERO,
        );
        let expr = eq(call, typed_num("1", dt));
        let clause = parse_clause(&expr).unwrap();
        assert!(clause.attr.contains(ClauseAttr::FORCE_SCAN));
    }

    #[test]
    fn in_with_non_constant_alternative_not_enumerable() {
        let dt = DataType::uint(1).unwrap();
        let expr = Expr::new(
            ExprKind::In {
                needle: Box::new(resolved_col(0, dt)),
                haystack: vec![typed_num("1", dt), resolved_col(1, dt)],
            },
            Span::ZERO,
        );
        let clause = parse_clause(&expr).unwrap();
        assert!(!clause.is_enumerable());
    }
}
