use regex::Regex;

use super::parser::{CompareOp, Expr, Field, Pattern};
use super::EvalError;
use crate::{Instance, Labels};

#[derive(Debug, Clone, Copy)]
enum Value<'a> {
    /// A label the instance does not carry.
    Null,
    Bool(bool),
    Str(&'a str),
    Map(&'a Labels),
    List(&'a [String]),
}

impl Value<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Map(_) => "map",
            Value::List(_) => "list",
        }
    }
}

pub(crate) fn evaluate(expr: &Expr, instance: &Instance) -> Result<bool, EvalError> {
    match eval(expr, instance)? {
        Value::Bool(result) => Ok(result),
        other => Err(EvalError::NotBoolean(other.kind())),
    }
}

fn eval<'a>(expr: &'a Expr, instance: &'a Instance) -> Result<Value<'a>, EvalError> {
    match expr {
        Expr::Str(value) => Ok(Value::Str(value)),
        Expr::Bool(value) => Ok(Value::Bool(*value)),
        Expr::List(items) => Ok(Value::List(items)),
        Expr::Field(field) => Ok(match field {
            Field::Name => Value::Str(instance.name()),
            Field::PrivateAddress => Value::Str(instance.private_address()),
            Field::PublicAddress => Value::Str(instance.public_address()),
            Field::Provider => Value::Str(instance.provider().as_str()),
            Field::Labels => Value::Map(instance.labels()),
        }),
        Expr::Label(key) => Ok(instance
            .labels()
            .get(key)
            .map_or(Value::Null, |value| Value::Str(value))),
        Expr::Not(operand) => Ok(Value::Bool(!truthy(eval(operand, instance)?)?)),
        Expr::And(lhs, rhs) => {
            if !truthy(eval(lhs, instance)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(eval(rhs, instance)?)?))
        }
        Expr::Or(lhs, rhs) => {
            if truthy(eval(lhs, instance)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(eval(rhs, instance)?)?))
        }
        Expr::Compare { op, lhs, rhs } => {
            let lhs = eval(lhs, instance)?;
            let rhs = eval(rhs, instance)?;
            compare(*op, lhs, rhs).map(Value::Bool)
        }
        Expr::Matches { subject, pattern } => {
            let subject = string_operand(eval(subject, instance)?, "matches")?;
            let matched = match pattern {
                Pattern::Compiled(regex) => regex.is_match(subject),
                Pattern::Dynamic(pattern) => {
                    let source = string_operand(eval(pattern, instance)?, "matches")?;
                    let regex = Regex::new(source)
                        .map_err(|e| EvalError::InvalidPattern(e.to_string()))?;
                    regex.is_match(subject)
                }
            };
            Ok(Value::Bool(matched))
        }
    }
}

fn truthy(value: Value<'_>) -> Result<bool, EvalError> {
    match value {
        Value::Bool(value) => Ok(value),
        other => Err(EvalError::NotBoolean(other.kind())),
    }
}

fn string_operand<'a>(value: Value<'a>, operator: &'static str) -> Result<&'a str, EvalError> {
    match value {
        Value::Str(value) => Ok(value),
        other => Err(EvalError::Operand {
            operator,
            found: other.kind(),
        }),
    }
}

fn compare(op: CompareOp, lhs: Value<'_>, rhs: Value<'_>) -> Result<bool, EvalError> {
    match op {
        CompareOp::Eq => equals(lhs, rhs),
        CompareOp::NotEq => equals(lhs, rhs).map(|equal| !equal),
        CompareOp::In => contains_member(lhs, rhs),
        CompareOp::NotIn => contains_member(lhs, rhs).map(|member| !member),
        CompareOp::Contains => {
            Ok(string_operand(lhs, "contains")?.contains(string_operand(rhs, "contains")?))
        }
        CompareOp::StartsWith => Ok(string_operand(lhs, "startsWith")?
            .starts_with(string_operand(rhs, "startsWith")?)),
        CompareOp::EndsWith => {
            Ok(string_operand(lhs, "endsWith")?.ends_with(string_operand(rhs, "endsWith")?))
        }
    }
}

fn equals(lhs: Value<'_>, rhs: Value<'_>) -> Result<bool, EvalError> {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => Ok(true),
        (Value::Null, _) | (_, Value::Null) => Ok(false),
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (a, b) => Err(EvalError::Mismatch(a.kind(), b.kind())),
    }
}

fn contains_member(needle: Value<'_>, haystack: Value<'_>) -> Result<bool, EvalError> {
    let needle = match needle {
        Value::Null => return Ok(false),
        Value::Str(needle) => needle,
        other => {
            return Err(EvalError::Operand {
                operator: "in",
                found: other.kind(),
            })
        }
    };

    match haystack {
        Value::List(items) => Ok(items.iter().any(|item| item == needle)),
        Value::Map(labels) => Ok(labels.contains_key(needle)),
        other => Err(EvalError::Operand {
            operator: "in",
            found: other.kind(),
        }),
    }
}
