//! LedgerSQL: an embedded, deterministic, SQL-like relational engine.
//!
//! A restricted dialect (CREATE TABLE/INDEX, SELECT, INSERT, UPDATE,
//! DELETE) is checked, cost-planned, and compiled into linear
//! register-based bytecode, then executed against a key/value storage
//! backend addressed by deterministic slot hashes. Suitable for
//! smart-contract-like environments: typed tables, enforced constraints,
//! exact overflow-checked fixed-point arithmetic, and a 1:1 execution cost
//! model.
//!
//! The pipeline: untyped AST → [`checker`] → typed AST + [`Schema`] →
//! [`planner`] → [`PlanStep`] tree → [`codegen`] → [`Instruction`] list →
//! [`vm`] → result [`Operand`].
//!
//! ```no_run
//! use ledgersql::{compile, create_schema, execute, MemoryBackend};
//! # fn statements() -> Vec<ledgersql::ast::Statement> { Vec::new() }
//! # fn query() -> ledgersql::ast::Statement { unimplemented!() }
//! let (schema, diags) = create_schema(&mut statements());
//! assert!(!diags.has_errors());
//!
//! let mut backend = MemoryBackend::new();
//! let compiled = compile(&mut query(), &schema).unwrap();
//! let result = execute(&compiled, &schema, &mut backend).unwrap();
//! ```

use ledgersql_ast::Statement;
use ledgersql_schema::Schema;
use ledgersql_storage::StorageBackend;
use thiserror::Error;

pub use ledgersql_ast as ast;
pub use ledgersql_checker as checker;
pub use ledgersql_codegen as codegen;
pub use ledgersql_error::{
    DiagCategory, DiagCode, Diagnostic, DiagnosticList, RuntimeError, Severity, VmResult,
};
pub use ledgersql_planner as planner;
pub use ledgersql_planner::PlanStep;
pub use ledgersql_schema::SchemaCache;
pub use ledgersql_storage::{MemoryBackend, TableStore, Word};
pub use ledgersql_types::{DataType, Decimal};
pub use ledgersql_vm as vm;
pub use ledgersql_vm::{render_program, Engine, ExecContext, Instruction, Operand, Raw};

// re-exported at the root for embedding convenience
pub use ledgersql_checker::{check_create, check_exec, check_query, CheckOptions};
pub use ledgersql_schema as schema;

/// Errors from [`compile`].
#[derive(Error, Debug)]
pub enum CompileError {
    /// The checker rejected the statement; the list holds the diagnostics.
    #[error("check failed with {} diagnostic(s)", .0.len())]
    Check(DiagnosticList),

    /// Planning failed.
    #[error(transparent)]
    Plan(#[from] ledgersql_planner::PlanError),

    /// Lowering failed.
    #[error(transparent)]
    Codegen(#[from] ledgersql_codegen::CodegenError),
}

/// A checked, planned, and lowered statement, ready to execute.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    /// The chosen plan, kept for EXPLAIN-style inspection.
    pub plan: PlanStep,
    /// The lowered bytecode.
    pub instructions: Vec<Instruction>,
    /// Warnings and notes accumulated during checking.
    pub diagnostics: DiagnosticList,
}

/// Check a CREATE statement set and build its schema.
pub fn create_schema(statements: &mut [Statement]) -> (Schema, DiagnosticList) {
    ledgersql_checker::check_create(statements)
}

/// Compile one query or exec statement against a committed schema.
pub fn compile(statement: &mut Statement, schema: &Schema) -> Result<CompiledQuery, CompileError> {
    compile_with(statement, schema, CheckOptions::default())
}

/// [`compile`] with explicit checker options.
pub fn compile_with(
    statement: &mut Statement,
    schema: &Schema,
    opts: CheckOptions,
) -> Result<CompiledQuery, CompileError> {
    let is_query = statement.kind().is_query();
    let slice = std::slice::from_mut(&mut *statement);
    let diagnostics = if is_query {
        ledgersql_checker::check_query_with(slice, schema, opts)
    } else {
        ledgersql_checker::check_exec_with(slice, schema, opts)
    };
    if diagnostics.has_errors() {
        return Err(CompileError::Check(diagnostics));
    }
    let plan = ledgersql_planner::plan_statement(statement, schema)?;
    let instructions = ledgersql_codegen::generate(&plan, schema)?;
    tracing::debug!(
        cost = plan.cost(),
        instructions = instructions.len(),
        "statement compiled"
    );
    Ok(CompiledQuery {
        plan,
        instructions,
        diagnostics,
    })
}

/// Execute a compiled statement against a storage backend with the default
/// (safe-math) context.
pub fn execute(
    query: &CompiledQuery,
    schema: &Schema,
    backend: &mut dyn StorageBackend,
) -> VmResult<Operand> {
    execute_with(query, schema, backend, ExecContext::default())
}

/// [`execute`] with an explicit execution context.
pub fn execute_with(
    query: &CompiledQuery,
    schema: &Schema,
    backend: &mut dyn StorageBackend,
    ctx: ExecContext,
) -> VmResult<Operand> {
    Engine::new(schema, backend, ctx).execute(&query.instructions)
}
