//! Native function resolution for SOLFUNC.
//!
//! A function call reaches the VM as SOLFUNC with the primary-key rows, the
//! function-name bytes, and then the declared arguments. The resolver maps
//! the name to a native implementation; the embedding environment may swap
//! in its own resolver to expose host functions.

use ledgersql_error::{RuntimeError, VmResult};
use ledgersql_types::{DataType, Decimal};

use crate::operand::{Operand, Raw};

/// Resolves SOLFUNC calls to native implementations.
pub trait CallResolver {
    /// Evaluate `name` over `rows` result rows with the given argument
    /// operands (single-row arguments broadcast).
    fn call(&self, name: &str, rows: usize, args: &[Operand]) -> VmResult<Operand>;
}

/// The built-in deterministic function set.
///
/// `abs(x)` — absolute value, same type as the argument.
/// `length(b)` — byte length of a bytes value, as `uint32`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Builtins;

fn expect_args(name: &str, args: &[Operand], expected: usize) -> VmResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RuntimeError::OperandCountMismatch {
            opcode: "SOLFUNC",
            expected,
            actual: args.len(),
        })
    }
}

fn result_rows(rows: usize, arg: &Operand) -> usize {
    if arg.row_count() > 1 {
        arg.row_count()
    } else {
        rows.max(1)
    }
}

impl CallResolver for Builtins {
    fn call(&self, name: &str, rows: usize, args: &[Operand]) -> VmResult<Operand> {
        match name {
            "abs" => {
                expect_args(name, args, 1)?;
                let arg = &args[0];
                let dtype = *arg.dtypes.first().ok_or_else(|| {
                    RuntimeError::InvalidDataType {
                        opcode: "SOLFUNC",
                        detail: "abs: missing argument column".to_owned(),
                    }
                })?;
                if !dtype.is_numeric() {
                    return Err(RuntimeError::InvalidDataType {
                        opcode: "SOLFUNC",
                        detail: format!("abs: {dtype} is not numeric"),
                    });
                }
                let n = result_rows(rows, arg);
                let tuples = (0..n)
                    .map(|row| {
                        let v = arg.cell(row, 0).as_number().ok_or_else(|| {
                            RuntimeError::InvalidDataType {
                                opcode: "SOLFUNC",
                                detail: "abs: bytes argument".to_owned(),
                            }
                        })?;
                        let out = if v.is_negative() { v.neg() } else { v.clone() };
                        Ok(vec![Raw::Number(out)])
                    })
                    .collect::<VmResult<Vec<_>>>()?;
                Ok(Operand::immediate(vec![dtype], tuples))
            }
            "length" => {
                expect_args(name, args, 1)?;
                let arg = &args[0];
                let n = result_rows(rows, arg);
                let dtype = DataType::uint(4).expect("uint32 is a valid width");
                let tuples = (0..n)
                    .map(|row| {
                        let b = arg.cell(row, 0).as_bytes().ok_or_else(|| {
                            RuntimeError::InvalidDataType {
                                opcode: "SOLFUNC",
                                detail: "length: numeric argument".to_owned(),
                            }
                        })?;
                        Ok(vec![Raw::Number(Decimal::from_u64(b.len() as u64))])
                    })
                    .collect::<VmResult<Vec<_>>>()?;
                Ok(Operand::immediate(vec![dtype], tuples))
            }
            _ => Err(RuntimeError::UnknownFunction(name.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_flips_sign() {
        let arg = Operand::immediate(
            vec![DataType::int(2).unwrap()],
            vec![
                vec![Raw::Number("-5".parse().unwrap())],
                vec![Raw::Number("3".parse().unwrap())],
            ],
        );
        let out = Builtins.call("abs", 2, &[arg]).unwrap();
        assert_eq!(out.tuples[0][0], Raw::Number("5".parse().unwrap()));
        assert_eq!(out.tuples[1][0], Raw::Number("3".parse().unwrap()));
    }

    #[test]
    fn length_counts_bytes() {
        let arg = Operand::single(vec![DataType::DYNAMIC_BYTES], vec![Raw::Bytes(b"hello".to_vec())]);
        let out = Builtins.call("length", 3, &[arg]).unwrap();
        assert_eq!(out.row_count(), 3);
        assert_eq!(out.tuples[2][0], Raw::Number("5".parse().unwrap()));
    }

    #[test]
    fn unknown_function_is_an_error() {
        assert!(matches!(
            Builtins.call("now", 1, &[]),
            Err(RuntimeError::UnknownFunction(_))
        ));
    }
}
