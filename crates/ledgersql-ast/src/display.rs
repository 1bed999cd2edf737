//! SQL pretty-printing via `fmt::Display` for AST nodes.
//!
//! Each variant renders back to dialect text, replacing the original
//! reflective printer with explicit per-variant formatting.

use std::fmt;

use crate::{
    Assignment, BinaryOp, ColumnConstraint, ColumnDef, CreateIndexStmt, CreateTableStmt,
    DeleteStmt, Expr, ExprKind, InsertStmt, Literal, OrderingTerm, SelectColumn, SelectStmt,
    Statement, UnaryOp, UpdateStmt,
};

fn comma_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn hex_bytes(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    f.write_str("0x")?;
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Neg => f.write_str("-"),
            Self::Not => f.write_str("NOT "),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        })
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("TRUE"),
            Self::Bool(false) => f.write_str("FALSE"),
            Self::Address(a) => f.write_str(&a.text),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bytes(b) => hex_bytes(f, b),
            Self::Null => f.write_str("NULL"),
            Self::Any => f.write_str("ANY"),
            Self::Default => f.write_str("DEFAULT"),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Column(c) => f.write_str(&c.name),
            ExprKind::Literal(lit) => write!(f, "{lit}"),
            ExprKind::Unary { op, operand } => write!(f, "{op}({operand})"),
            ExprKind::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            ExprKind::Like {
                subject,
                pattern,
                escape,
            } => {
                write!(f, "({subject} LIKE {pattern}")?;
                if let Some(esc) = escape {
                    write!(f, " ESCAPE {esc}")?;
                }
                f.write_str(")")
            }
            ExprKind::Cast { operand, target } => write!(f, "CAST({operand} AS {target})"),
            ExprKind::In { needle, haystack } => {
                write!(f, "({needle} IN (")?;
                comma_list(f, haystack)?;
                f.write_str("))")
            }
            ExprKind::Call { name, args } => {
                write!(f, "{name}(")?;
                comma_list(f, args)?;
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for ColumnConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryKey { .. } => f.write_str("PRIMARY KEY"),
            Self::NotNull { .. } => f.write_str("NOT NULL"),
            Self::Unique { .. } => f.write_str("UNIQUE"),
            Self::Default { expr, .. } => write!(f, "DEFAULT {expr}"),
            Self::ForeignKey { table, column, .. } => {
                write!(f, "REFERENCES {} ({})", table.name, column.name)
            }
            Self::Autoincrement { .. } => f.write_str("AUTOINCREMENT"),
        }
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name.name, self.dtype)?;
        for c in &self.constraints {
            write!(f, " {c}")?;
        }
        Ok(())
    }
}

impl fmt::Display for SelectColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Star { .. } => f.write_str("*"),
            Self::Expr(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Display for OrderingTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if self.desc {
            f.write_str(" DESC")?;
        }
        Ok(())
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column.name, self.value)
    }
}

impl fmt::Display for CreateTableStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE TABLE {} (", self.table.name)?;
        comma_list(f, &self.columns)?;
        f.write_str(")")
    }
}

impl fmt::Display for CreateIndexStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CREATE ")?;
        if self.unique {
            f.write_str("UNIQUE ")?;
        }
        write!(f, "INDEX {} ON {} (", self.name.name, self.table.name)?;
        for (i, c) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(&c.name)?;
        }
        f.write_str(")")
    }
}

impl fmt::Display for SelectStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        comma_list(f, &self.columns)?;
        if let Some(table) = &self.table {
            write!(f, " FROM {}", table.name)?;
        }
        if let Some(cond) = &self.where_clause {
            write!(f, " WHERE {cond}")?;
        }
        if !self.order_by.is_empty() {
            f.write_str(" ORDER BY ")?;
            comma_list(f, &self.order_by)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " OFFSET {offset}")?;
        }
        Ok(())
    }
}

impl fmt::Display for InsertStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO {}", self.table.name)?;
        if !self.columns.is_empty() {
            f.write_str(" (")?;
            for (i, c) in self.columns.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                f.write_str(&c.name)?;
            }
            f.write_str(")")?;
        }
        f.write_str(" VALUES ")?;
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str("(")?;
            comma_list(f, row)?;
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Display for UpdateStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPDATE {} SET ", self.table.name)?;
        comma_list(f, &self.assignments)?;
        if let Some(cond) = &self.where_clause {
            write!(f, " WHERE {cond}")?;
        }
        Ok(())
    }
}

impl fmt::Display for DeleteStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {}", self.table.name)?;
        if let Some(cond) = &self.where_clause {
            write!(f, " WHERE {cond}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable(s) => write!(f, "{s}"),
            Self::CreateIndex(s) => write!(f, "{s}"),
            Self::Select(s) => write!(f, "{s}"),
            Self::Insert(s) => write!(f, "{s}"),
            Self::Update(s) => write!(f, "{s}"),
            Self::Delete(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColumnName, Span, TableName};

    fn num(s: &str) -> Expr {
        Expr::literal(Literal::Number(s.parse().unwrap()), Span::ZERO)
    }

    fn col(name: &str) -> Expr {
        Expr::new(ExprKind::Column(ColumnName::new(name, Span::ZERO)), Span::ZERO)
    }

    #[test]
    fn expr_rendering() {
        let e = Expr::new(
            ExprKind::Binary {
                op: BinaryOp::Ge,
                left: Box::new(col("balance")),
                right: Box::new(num("100")),
            },
            Span::ZERO,
        );
        assert_eq!(e.to_string(), "(balance >= 100)");
    }

    #[test]
    fn in_rendering() {
        let e = Expr::new(
            ExprKind::In {
                needle: Box::new(col("id")),
                haystack: vec![num("1"), num("2")],
            },
            Span::ZERO,
        );
        assert_eq!(e.to_string(), "(id IN (1, 2))");
    }

    #[test]
    fn select_rendering() {
        let stmt = SelectStmt {
            columns: vec![SelectColumn::Star { span: Span::ZERO }],
            table: Some(TableName::new("accounts", Span::ZERO)),
            where_clause: Some(Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Eq,
                    left: Box::new(col("id")),
                    right: Box::new(num("7")),
                },
                Span::ZERO,
            )),
            order_by: vec![],
            offset: None,
            limit: Some(10),
            span: Span::ZERO,
        };
        assert_eq!(
            stmt.to_string(),
            "SELECT * FROM accounts WHERE (id = 7) LIMIT 10"
        );
    }
}
