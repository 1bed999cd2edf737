//! Register-based bytecode VM for LedgerSQL.
//!
//! The code generator lowers a plan tree into a flat [`Instruction`] list
//! over virtual registers; [`Engine`] executes it in a single pass against a
//! slot-hashed storage backend. Operands are columnar ([`Operand`]), rows
//! are [`Tuple`]s of [`Raw`] cells, and every opcode's semantics are defined
//! in [`engine`].

use std::fmt;

mod engine;
mod funcs;
mod like;
mod opcode;
mod operand;

pub use engine::{Engine, ExecContext};
pub use funcs::{Builtins, CallResolver};
pub use like::like_match;
pub use opcode::Opcode;
pub use operand::{cmp_tuples, Operand, Raw, RegIndex, Tuple};

/// One bytecode instruction: opcode, ordered inputs, output register.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation.
    pub opcode: Opcode,
    /// Input operands (immediates or register references).
    pub inputs: Vec<Operand>,
    /// Output virtual-register index.
    pub output: RegIndex,
}

impl Instruction {
    /// Construct an instruction.
    #[must_use]
    pub fn new(opcode: Opcode, inputs: Vec<Operand>, output: RegIndex) -> Self {
        Self {
            opcode,
            inputs,
            output,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, input) in self.inputs.iter().enumerate() {
            if i == 0 {
                write!(f, " {input}")?;
            } else {
                write!(f, ", {input}")?;
            }
        }
        write!(f, " -> r{}", self.output)
    }
}

/// Render a whole program, one instruction per line, for EXPLAIN-style
/// listings.
#[must_use]
pub fn render_program(program: &[Instruction]) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    for (i, inst) in program.iter().enumerate() {
        let _ = writeln!(out, "{i:4}  {inst}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersql_types::DataType;

    #[test]
    fn instruction_rendering() {
        let inst = Instruction::new(
            Opcode::Add,
            vec![
                Operand::register(3),
                Operand::single(
                    vec![DataType::INT256],
                    vec![Raw::Number("1".parse().unwrap())],
                ),
            ],
            4,
        );
        assert_eq!(inst.to_string(), "ADD r3, imm[1x1] -> r4");
        let listing = render_program(&[inst]);
        assert!(listing.contains("ADD r3"));
    }
}
