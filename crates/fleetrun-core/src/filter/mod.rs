//! Target selection expressions.
//!
//! An expression is compiled once per command against the fixed instance
//! schema (`Name`, `PrivateAddress`, `PublicAddress`, `Provider`, `Labels`)
//! and then evaluated against every discovered instance. Compilation
//! surfaces syntax and type errors up front; evaluation never fails loudly,
//! an instance that cannot be evaluated simply does not match.
//!
//! ```text
//! Labels["env"] == "prod" && Name startsWith "web-"
//! "canary" in Labels || Provider == "gcp"
//! PrivateAddress matches "^10\\.0\\." and not (Labels.role in ["db", "cache"])
//! ```

mod eval;
mod lexer;
mod parser;

use thiserror::Error;
use tracing::debug;

use crate::Instance;
use parser::{Expr, Parser, Type};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Failure while evaluating a compiled filter against one instance.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("expected a boolean, found {0}")]
    NotBoolean(&'static str),
    #[error("'{operator}' cannot be applied to {found}")]
    Operand {
        operator: &'static str,
        found: &'static str,
    },
    #[error("cannot compare {0} with {1}")]
    Mismatch(&'static str, &'static str),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

/// A target expression ready to be evaluated against instances.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    source: String,
    expr: Option<Expr>,
}

/// Compile `expression`; an empty expression selects every instance.
pub fn compile(expression: &str) -> Result<CompiledFilter, FilterError> {
    let source = expression.trim();
    if source.is_empty() {
        return Ok(CompiledFilter {
            source: String::new(),
            expr: None,
        });
    }

    let tokens = lexer::tokenize(source)?;
    let expr = Parser::new(tokens).parse()?;
    let result_type = parser::type_of(&expr)?;
    if result_type != Type::Bool {
        return Err(FilterError::Type(
            "filter expression must evaluate to a boolean".to_string(),
        ));
    }

    Ok(CompiledFilter {
        source: source.to_string(),
        expr: Some(expr),
    })
}

impl CompiledFilter {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_pass_through(&self) -> bool {
        self.expr.is_none()
    }

    pub fn evaluate(&self, instance: &Instance) -> Result<bool, EvalError> {
        match &self.expr {
            None => Ok(true),
            Some(expr) => eval::evaluate(expr, instance),
        }
    }

    /// Whether `instance` is selected. Evaluation errors count as no match.
    pub fn matches(&self, instance: &Instance) -> bool {
        match self.evaluate(instance) {
            Ok(matched) => matched,
            Err(error) => {
                debug!(instance = %instance.name(), error = %error, "Filter evaluation failed, excluding instance");
                false
            }
        }
    }

    /// Keep the matching instances, preserving their order.
    pub fn select(&self, instances: Vec<Instance>) -> Vec<Instance> {
        instances
            .into_iter()
            .filter(|instance| self.matches(instance))
            .collect()
    }
}
