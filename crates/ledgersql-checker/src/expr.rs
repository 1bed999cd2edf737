//! Expression type-checking and constant folding.
//!
//! Every visit receives a [`TypeHint`]: infer with the node's default rule,
//! infer with an explicit byte-size hint (CAST pushes its target width), or
//! match a resolved type exactly. Integer literal inference is two-stage:
//! the signed family at the requested width first, then the unsigned family
//! for non-negative values, then an overflow error (safe math) or a warned
//! crop via encode-then-decode (unsafe math).
//!
//! Constant arithmetic subtrees fold to a single literal before typing, so
//! range checks always see the final value.

use ledgersql_ast::{AddressLit, BinaryOp, Expr, ExprKind, Literal, Span, UnaryOp};
use ledgersql_error::DiagCode;
use ledgersql_storage::keccak256;
use ledgersql_types::{encode, in_range, DataType, Decimal, DecimalError, TypeFamily};

use crate::{Checker, ExprEnv};

/// The type request accompanying every expression visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    /// Infer using the node's default rule.
    Default,
    /// Infer with an explicit byte-size hint (advisory for non-literals).
    Size(u8),
    /// The node must resolve to exactly this type.
    Exact(DataType),
}

/// Result-type rules for the checkable function set.
fn function_signature(name: &str) -> Option<(usize, FnResult)> {
    match name {
        "abs" => Some((1, FnResult::SameAsFirstArg)),
        "length" => Some((1, FnResult::Uint32)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum FnResult {
    SameAsFirstArg,
    Uint32,
}

enum FoldError {
    DividedByZero,
    Overflowed,
    NotNumeric,
}

impl From<DecimalError> for FoldError {
    fn from(e: DecimalError) -> Self {
        match e {
            DecimalError::DividedByZero => Self::DividedByZero,
            _ => Self::Overflowed,
        }
    }
}

/// Evaluate a constant numeric subtree to a single decimal.
fn eval_const_number(expr: &Expr) -> Result<Decimal, FoldError> {
    match &expr.kind {
        ExprKind::Literal(Literal::Number(v)) => Ok(v.clone()),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            operand,
        } => Ok(eval_const_number(operand)?.neg()),
        ExprKind::Binary { op, left, right } if op.is_arithmetic() => {
            let a = eval_const_number(left)?;
            let b = eval_const_number(right)?;
            let out = match op {
                BinaryOp::Add => a.checked_add(&b),
                BinaryOp::Sub => a.checked_sub(&b),
                BinaryOp::Mul => a.checked_mul(&b),
                BinaryOp::Div => a.checked_div(&b),
                BinaryOp::Mod => a.checked_rem(&b),
                _ => unreachable!("guarded by is_arithmetic"),
            }?;
            Ok(out)
        }
        _ => Err(FoldError::NotNumeric),
    }
}

/// Whether a cast between the two types has a defined conversion.
fn castable(source: DataType, target: DataType) -> bool {
    if source.is_numeric() && target.is_numeric() {
        return true;
    }
    // byte-level reinterpretation requires matching widths unless the
    // target is dynamic bytes
    matches!(target.family(), TypeFamily::DynamicBytes) || target.size() == source.size()
}

/// Apply the mandatory part of a hint and record the resolved type.
fn finish(ck: &mut Checker, expr: &mut Expr, dt: DataType, hint: TypeHint) -> bool {
    if let TypeHint::Exact(want) = hint {
        if want != dt {
            ck.error(
                expr.span,
                DiagCode::TypeMismatch,
                format!("expected {want}, got {dt}"),
            );
            return false;
        }
    }
    expr.dtype = Some(dt);
    true
}

/// Type-check `expr` against `hint`, resolving identifiers through `env` and
/// mutating the tree (resolved descriptors, folded constants, cropped
/// literals) in place. Diagnostics accumulate; the return value only says
/// whether this subtree is usable downstream.
pub(crate) fn check_expr(ck: &mut Checker, env: &ExprEnv<'_>, expr: &mut Expr, hint: TypeHint) -> bool {
    // Fold constant numeric subtrees before typing.
    let foldable = matches!(
        &expr.kind,
        ExprKind::Binary { op, .. } if op.is_arithmetic()
    ) || matches!(
        &expr.kind,
        ExprKind::Unary { op: UnaryOp::Neg, .. }
    );
    if foldable && expr.is_constant() {
        match eval_const_number(expr) {
            Ok(v) => expr.kind = ExprKind::Literal(Literal::Number(v)),
            Err(FoldError::DividedByZero) => {
                ck.error(
                    expr.span,
                    DiagCode::ConstantDividedByZero,
                    "constant expression divides by zero",
                );
                return false;
            }
            Err(FoldError::Overflowed) => {
                ck.error(
                    expr.span,
                    DiagCode::ConstantOverflow,
                    "constant expression exceeds decimal bounds",
                );
                return false;
            }
            Err(FoldError::NotNumeric) => {}
        }
    }

    let span = expr.span;
    match &mut expr.kind {
        ExprKind::Literal(lit) => {
            let resolved = type_literal(ck, lit, hint, span);
            match resolved {
                Some(dt) => {
                    expr.dtype = Some(dt);
                    true
                }
                None => false,
            }
        }

        ExprKind::Column(name) => {
            if env.constant_only {
                ck.error(
                    span,
                    DiagCode::NonConstantDefault,
                    format!("column {} in a constant-only expression", name.name),
                );
                return false;
            }
            let Some(table) = env.table else {
                ck.error(
                    span,
                    DiagCode::MissingTable,
                    format!("column {} without a table", name.name),
                );
                return false;
            };
            match env.view.find_column(table, &name.name) {
                Some((cref, col)) => {
                    name.column = Some(cref);
                    let dt = col.dtype;
                    finish(ck, expr, dt, hint)
                }
                None => {
                    ck.error(
                        span,
                        DiagCode::UndefinedColumn,
                        format!("no such column: {}", name.name),
                    );
                    false
                }
            }
        }

        ExprKind::Unary { op, operand } => match op {
            UnaryOp::Not => {
                let ok = check_expr(ck, env, operand.as_mut(), TypeHint::Exact(DataType::BOOL));
                ok && finish(ck, expr, DataType::BOOL, hint)
            }
            UnaryOp::Neg => {
                // non-constant negation: the operand decides the type
                let ok = check_expr(ck, env, operand.as_mut(), hint);
                let Some(dt) = operand.dtype else {
                    return false;
                };
                if !dt.is_signed() {
                    ck.error(
                        span,
                        DiagCode::TypeMismatch,
                        format!("cannot negate {dt}"),
                    );
                    return false;
                }
                ok && finish(ck, expr, dt, hint)
            }
        },

        ExprKind::Binary { op, left, right } => {
            let op = *op;
            if op.is_boolean() {
                let ok_l = check_expr(ck, env, left.as_mut(), TypeHint::Exact(DataType::BOOL));
                let ok_r = check_expr(ck, env, right.as_mut(), TypeHint::Exact(DataType::BOOL));
                return ok_l && ok_r && finish(ck, expr, DataType::BOOL, hint);
            }
            // Type the non-constant side first so `col = literal` binds the
            // literal to the column's type rather than the literal default.
            let literal_first = left.is_constant() && !right.is_constant();
            let (first, second): (&mut Expr, &mut Expr) = if literal_first {
                (right.as_mut(), left.as_mut())
            } else {
                (left.as_mut(), right.as_mut())
            };
            if op.is_comparison() {
                let ok_f = check_expr(ck, env, first, TypeHint::Default);
                let second_hint = first.dtype.map_or(TypeHint::Default, TypeHint::Exact);
                let ok_s = check_expr(ck, env, second, second_hint);
                return ok_f && ok_s && finish(ck, expr, DataType::BOOL, hint);
            }
            // arithmetic with at least one non-constant side
            let ok_f = check_expr(ck, env, first, hint);
            let Some(dt) = first.dtype else { return false };
            if !dt.is_numeric() || matches!(dt.family(), TypeFamily::Bool) {
                ck.error(
                    span,
                    DiagCode::TypeMismatch,
                    format!("{dt} is not an arithmetic type"),
                );
                return false;
            }
            let ok_s = check_expr(ck, env, second, TypeHint::Exact(dt));
            ok_f && ok_s && finish(ck, expr, dt, hint)
        }

        ExprKind::Like {
            subject,
            pattern,
            escape,
        } => {
            let ok_s = check_expr(ck, env, subject.as_mut(), TypeHint::Default);
            if let Some(dt) = subject.dtype {
                if !dt.is_bytes_like() || matches!(dt.family(), TypeFamily::Address) {
                    ck.error(
                        subject.span,
                        DiagCode::TypeMismatch,
                        format!("LIKE subject must be bytes, got {dt}"),
                    );
                    return false;
                }
            }
            let ok_p = check_expr(ck, env, pattern.as_mut(), TypeHint::Default);
            if let Some(dt) = pattern.dtype {
                if !dt.is_bytes_like() {
                    ck.error(
                        pattern.span,
                        DiagCode::TypeMismatch,
                        format!("LIKE pattern must be bytes, got {dt}"),
                    );
                    return false;
                }
            }
            let mut ok_e = true;
            if let Some(esc) = escape {
                ok_e = check_expr(ck, env, esc.as_mut(), TypeHint::Default);
                let is_single_byte = matches!(
                    esc.as_literal(),
                    Some(Literal::Bytes(b)) if b.len() == 1
                );
                if ok_e && !is_single_byte {
                    ck.error(
                        esc.span,
                        DiagCode::BadBytesLength,
                        "ESCAPE must be a single constant byte",
                    );
                    ok_e = false;
                }
            }
            ok_s && ok_p && ok_e && finish(ck, expr, DataType::BOOL, hint)
        }

        ExprKind::Cast { operand, target } => {
            let target = *target;
            let width = u8::try_from(target.size()).unwrap_or(32);
            let ok = check_expr(ck, env, operand.as_mut(), TypeHint::Size(width));
            let Some(src) = operand.dtype else { return false };
            if !castable(src, target) {
                ck.error(
                    span,
                    DiagCode::TypeMismatch,
                    format!("no conversion from {src} to {target}"),
                );
                return false;
            }
            ok && finish(ck, expr, target, hint)
        }

        ExprKind::In { needle, haystack } => {
            let ok_n = check_expr(ck, env, needle.as_mut(), TypeHint::Default);
            let alt_hint = needle.dtype.map_or(TypeHint::Default, TypeHint::Exact);
            let mut ok_alts = true;
            for alt in haystack.iter_mut() {
                ok_alts &= check_expr(ck, env, alt, alt_hint);
            }
            ok_n && ok_alts && finish(ck, expr, DataType::BOOL, hint)
        }

        ExprKind::Call { name, args } => {
            let Some((arity, result)) = function_signature(name) else {
                ck.error(
                    span,
                    DiagCode::UnknownFunction,
                    format!("unknown function: {name}"),
                );
                return false;
            };
            if args.len() != arity {
                ck.error(
                    span,
                    DiagCode::BadArity,
                    format!("{name} expects {arity} argument(s), got {}", args.len()),
                );
                return false;
            }
            let mut ok = true;
            for arg in args.iter_mut() {
                ok &= check_expr(ck, env, arg, TypeHint::Default);
            }
            if !ok {
                return false;
            }
            let dt = match result {
                FnResult::SameAsFirstArg => match args.first().and_then(|a| a.dtype) {
                    Some(dt) => dt,
                    None => return false,
                },
                FnResult::Uint32 => DataType::uint(4).expect("uint32 is valid"),
            };
            finish(ck, expr, dt, hint)
        }
    }
}

// ---------------------------------------------------------------------------
// Literal typing
// ---------------------------------------------------------------------------

fn type_literal(
    ck: &mut Checker,
    lit: &mut Literal,
    hint: TypeHint,
    span: Span,
) -> Option<DataType> {
    match lit {
        Literal::Bool(_) => match hint {
            TypeHint::Exact(dt) if dt != DataType::BOOL => {
                ck.error(span, DiagCode::TypeMismatch, format!("expected {dt}, got bool"));
                None
            }
            _ => Some(DataType::BOOL),
        },

        Literal::Number(v) => resolve_number(ck, v, hint, span),

        Literal::Address(a) => {
            if !valid_address(a) {
                ck.error(
                    span,
                    DiagCode::BadAddressChecksum,
                    "address literal fails its checksum",
                );
                return None;
            }
            match hint {
                TypeHint::Exact(dt) if dt != DataType::ADDRESS => {
                    ck.error(
                        span,
                        DiagCode::TypeMismatch,
                        format!("expected {dt}, got address"),
                    );
                    None
                }
                _ => Some(DataType::ADDRESS),
            }
        }

        Literal::Bytes(b) => match hint {
            TypeHint::Exact(dt) => match dt.family() {
                TypeFamily::DynamicBytes => Some(dt),
                TypeFamily::Bytes | TypeFamily::Address if b.len() == dt.size() => Some(dt),
                TypeFamily::Bytes | TypeFamily::Address => {
                    ck.error(
                        span,
                        DiagCode::BadBytesLength,
                        format!("{dt} expects {} bytes, got {}", dt.size(), b.len()),
                    );
                    None
                }
                _ => {
                    ck.error(span, DiagCode::TypeMismatch, format!("expected {dt}, got bytes"));
                    None
                }
            },
            TypeHint::Size(w) => match DataType::bytes(w) {
                Ok(dt) if b.len() == dt.size() => Some(dt),
                _ => Some(DataType::DYNAMIC_BYTES),
            },
            TypeHint::Default => Some(DataType::DYNAMIC_BYTES),
        },

        Literal::Null => {
            ck.error(span, DiagCode::NullNotAllowed, "NULL is not storable");
            None
        }

        Literal::Any => match hint {
            TypeHint::Exact(dt) => Some(dt),
            _ => {
                ck.error(
                    span,
                    DiagCode::TypeMismatch,
                    "cannot infer a type for ANY",
                );
                None
            }
        },

        Literal::Default => {
            ck.error(
                span,
                DiagCode::TypeMismatch,
                "DEFAULT is only allowed as a column value",
            );
            None
        }
    }
}

/// Two-stage numeric literal typing with warned cropping.
fn resolve_number(
    ck: &mut Checker,
    v: &mut Decimal,
    hint: TypeHint,
    span: Span,
) -> Option<DataType> {
    let exact = |ck: &mut Checker, v: &mut Decimal, dt: DataType| -> Option<DataType> {
        if !dt.is_numeric() {
            ck.error(span, DiagCode::TypeMismatch, format!("expected {dt}, got number"));
            return None;
        }
        match in_range(dt, v) {
            Ok(true) => Some(dt),
            _ if ck.opts.safe_math => {
                ck.error(
                    span,
                    DiagCode::ConstantOverflow,
                    format!("{v} out of range for {dt}"),
                );
                None
            }
            _ => {
                let cropped = encode::crop(dt, v).ok()?;
                ck.warning(
                    span,
                    DiagCode::ConstantCropped,
                    format!("{v} cropped to {cropped} for {dt}"),
                );
                tracing::warn!(value = %v, %dt, "literal cropped to type range");
                *v = cropped;
                Some(dt)
            }
        }
    };

    match hint {
        TypeHint::Exact(dt) => exact(ck, v, dt),
        TypeHint::Default | TypeHint::Size(_) => {
            let width = match hint {
                TypeHint::Size(w) => w,
                _ => 32,
            };
            let (signed, unsigned) = if v.scale() == 0 {
                (DataType::int(width), DataType::uint(width))
            } else {
                (DataType::fixed(width, 18), DataType::ufixed(width, 18))
            };
            let Ok(signed) = signed else {
                ck.error(span, DiagCode::TypeMismatch, "invalid width hint");
                return None;
            };
            if in_range(signed, v).unwrap_or(false) {
                return Some(signed);
            }
            if !v.is_negative() {
                if let Ok(unsigned) = unsigned {
                    if in_range(unsigned, v).unwrap_or(false) {
                        return Some(unsigned);
                    }
                }
            }
            // overflowed both stages
            let crop_dt = if v.is_negative() {
                signed
            } else {
                unsigned.unwrap_or(signed)
            };
            exact(ck, v, crop_dt)
        }
    }
}

// ---------------------------------------------------------------------------
// Address checksum
// ---------------------------------------------------------------------------

/// Validate an address literal: well-formed hex, and when mixed-case, a
/// correct EIP-55-style checksum over the Keccak-256 of the lowercase hex.
fn valid_address(a: &AddressLit) -> bool {
    let Some(hex) = a.text.strip_prefix("0x") else {
        return false;
    };
    if hex.len() != 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }
    let has_lower = hex.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = hex.bytes().any(|b| b.is_ascii_uppercase());
    if !(has_lower && has_upper) {
        // single-case addresses carry no checksum
        return true;
    }
    let lower = hex.to_ascii_lowercase();
    let hash = keccak256(lower.as_bytes());
    for (i, b) in hex.bytes().enumerate() {
        if !b.is_ascii_alphabetic() {
            continue;
        }
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        let want_upper = nibble >= 8;
        if want_upper != b.is_ascii_uppercase() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_accepts_single_case() {
        let a = AddressLit {
            text: "0x52908400098527886e0f7030069857d2e4169ee7".to_owned(),
        };
        assert!(valid_address(&a));
    }

    #[test]
    fn checksum_validates_mixed_case() {
        // canonical EIP-55 test vector
        let good = AddressLit {
            text: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".to_owned(),
        };
        assert!(valid_address(&good));
        let bad = AddressLit {
            text: "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD".to_owned(),
        };
        assert!(!valid_address(&bad));
    }

    #[test]
    fn malformed_addresses_rejected() {
        for text in ["0x123", "52908400098527886e0f7030069857d2e4169ee7", "0xzz"] {
            assert!(!valid_address(&AddressLit {
                text: text.to_owned()
            }));
        }
    }
}
