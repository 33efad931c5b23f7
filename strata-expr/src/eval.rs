//! Expression evaluation.
//!
//! Evaluation is total over well-formed trees and missing data: a
//! comparison against a missing field yields "not matching" rather
//! than an error. Errors are reserved for invalid expression syntax
//! (error nodes), operand type mismatches, and wrong arities.

use crate::node::{Expr, OpCode};
use crate::{SYS_PROP_ITEM_CREATED, SYS_PROP_ITEM_EXPIRES, SYS_PROP_ITEM_NAME};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use strata_types::{CoreError, CoreResult, NamedValueSet, Value};

/// The context an expression is evaluated against: the item's
/// application properties plus the `$ItemName` / `$ItemCreated` /
/// `$ItemExpires` system properties.
#[derive(Debug, Clone, Copy)]
pub struct ExprContext<'a> {
    data: &'a NamedValueSet,
    item_name: Option<&'a str>,
    item_created: Option<DateTime<Utc>>,
    item_expires: Option<DateTime<Utc>>,
}

impl<'a> ExprContext<'a> {
    /// A context over bare properties, with no item system properties.
    pub fn new(data: &'a NamedValueSet) -> Self {
        Self {
            data,
            item_name: None,
            item_created: None,
            item_expires: None,
        }
    }

    /// A context for a stored item.
    pub fn for_item(
        data: &'a NamedValueSet,
        item_name: &'a str,
        item_created: DateTime<Utc>,
        item_expires: DateTime<Utc>,
    ) -> Self {
        Self {
            data,
            item_name: Some(item_name),
            item_created: Some(item_created),
            item_expires: Some(item_expires),
        }
    }

    fn resolve(&self, field: &str) -> Option<Value> {
        if let Some(value) = self.data.value(field) {
            return Some(value.clone());
        }
        if field.eq_ignore_ascii_case(SYS_PROP_ITEM_NAME) {
            return self.item_name.map(|name| Value::Str(name.to_string()));
        }
        if field.eq_ignore_ascii_case(SYS_PROP_ITEM_CREATED) {
            return self.item_created.map(Value::DateTime);
        }
        if field.eq_ignore_ascii_case(SYS_PROP_ITEM_EXPIRES) {
            return self.item_expires.map(Value::DateTime);
        }
        None
    }
}

impl Expr {
    /// Evaluates the expression. `None` means "no value" (a missing
    /// field, or a function of one); callers treat it per-operator.
    /// `now` is explicit so time-dependent expressions are
    /// deterministic under test.
    pub fn evaluate(&self, ctx: &ExprContext<'_>, now: DateTime<Utc>) -> CoreResult<Option<Value>> {
        match self {
            Expr::Const(value) => Ok(Some(value.clone())),
            Expr::Field(name) => Ok(ctx.resolve(name)),
            Expr::Error(message) => Err(CoreError::Evaluation(format!(
                "cannot evaluate expression containing errors: {message}"
            ))),
            Expr::Op(op, args) => {
                let mut results = Vec::with_capacity(args.len());
                for arg in args {
                    results.push(arg.evaluate(ctx, now)?);
                }
                apply_op(*op, &results, now)
            }
        }
    }

    /// Evaluates the expression and requires a boolean result.
    pub fn matches(&self, ctx: &ExprContext<'_>, now: DateTime<Utc>) -> CoreResult<bool> {
        match self.evaluate(ctx, now)? {
            Some(Value::Bool(matched)) => Ok(matched),
            Some(other) => Err(CoreError::Evaluation(format!(
                "filter returned non-boolean result: {other}"
            ))),
            None => Err(CoreError::Evaluation(
                "filter returned no result".to_string(),
            )),
        }
    }

    /// Convenience form matching against bare properties at the
    /// current time.
    pub fn matches_props(&self, props: &NamedValueSet) -> CoreResult<bool> {
        self.matches(&ExprContext::new(props), Utc::now())
    }
}

fn check_arity(op: OpCode, results: &[Option<Value>], expected: usize) -> CoreResult<()> {
    if results.len() != expected {
        return Err(CoreError::Evaluation(format!(
            "operator {} requires exactly {} argument(s), got {}",
            op.wire_name(),
            expected,
            results.len()
        )));
    }
    Ok(())
}

fn apply_op(op: OpCode, results: &[Option<Value>], now: DateTime<Utc>) -> CoreResult<Option<Value>> {
    match op {
        OpCode::And => {
            // missing operands are skipped; non-boolean operands fail
            for result in results {
                match result {
                    None => continue,
                    Some(Value::Bool(false)) => return Ok(Some(Value::Bool(false))),
                    Some(Value::Bool(true)) => continue,
                    Some(other) => return Err(non_boolean(op, other)),
                }
            }
            Ok(Some(Value::Bool(true)))
        }
        OpCode::Or => {
            for result in results {
                match result {
                    None => continue,
                    Some(Value::Bool(true)) => return Ok(Some(Value::Bool(true))),
                    Some(Value::Bool(false)) => continue,
                    Some(other) => return Err(non_boolean(op, other)),
                }
            }
            Ok(Some(Value::Bool(false)))
        }
        OpCode::Not => {
            check_arity(op, results, 1)?;
            match &results[0] {
                None => Ok(None),
                Some(Value::Bool(b)) => Ok(Some(Value::Bool(!b))),
                Some(other) => Err(non_boolean(op, other)),
            }
        }
        OpCode::IsNull => {
            check_arity(op, results, 1)?;
            Ok(Some(Value::Bool(results[0].is_none())))
        }
        OpCode::IsNotNull => {
            check_arity(op, results, 1)?;
            Ok(Some(Value::Bool(results[0].is_some())))
        }
        OpCode::Equ | OpCode::Neq | OpCode::Gtr | OpCode::Geq | OpCode::Lss | OpCode::Leq => {
            check_arity(op, results, 2)?;
            // a missing operand never matches
            let (lhs, rhs) = match (&results[0], &results[1]) {
                (Some(lhs), Some(rhs)) => (lhs, rhs),
                _ => return Ok(Some(Value::Bool(false))),
            };
            let ordering = compare_values(lhs, rhs)?;
            let matched = match op {
                OpCode::Equ => ordering == Ordering::Equal,
                OpCode::Neq => ordering != Ordering::Equal,
                OpCode::Gtr => ordering == Ordering::Greater,
                OpCode::Geq => ordering != Ordering::Less,
                OpCode::Lss => ordering == Ordering::Less,
                OpCode::Leq => ordering != Ordering::Greater,
                _ => unreachable!(),
            };
            Ok(Some(Value::Bool(matched)))
        }
        OpCode::Comp => {
            check_arity(op, results, 2)?;
            let (lhs, rhs) = match (&results[0], &results[1]) {
                (Some(lhs), Some(rhs)) => (lhs, rhs),
                _ => return Ok(None),
            };
            let ordering = compare_values(lhs, rhs)?;
            Ok(Some(Value::I64(match ordering {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            })))
        }
        OpCode::Starts | OpCode::Ends | OpCode::Contains => {
            check_arity(op, results, 2)?;
            let needle = match &results[1] {
                Some(Value::Str(s)) => s.to_uppercase(),
                Some(other) => return Err(non_string(op, other)),
                None => {
                    return Err(CoreError::Evaluation(format!(
                        "operator {} requires a search string",
                        op.wire_name()
                    )))
                }
            };
            let haystack = match &results[0] {
                Some(Value::Str(s)) => s.to_uppercase(),
                Some(other) => return Err(non_string(op, other)),
                None => return Ok(Some(Value::Bool(false))),
            };
            let matched = match op {
                OpCode::Starts => haystack.starts_with(&needle),
                OpCode::Ends => haystack.ends_with(&needle),
                OpCode::Contains => haystack.contains(&needle),
                _ => unreachable!(),
            };
            Ok(Some(Value::Bool(matched)))
        }
        OpCode::Lower | OpCode::Upper => {
            check_arity(op, results, 1)?;
            match &results[0] {
                None => Ok(None),
                Some(Value::Str(s)) => Ok(Some(Value::Str(if op == OpCode::Lower {
                    s.to_lowercase()
                } else {
                    s.to_uppercase()
                }))),
                Some(other) => Err(non_string(op, other)),
            }
        }
        OpCode::Now => {
            check_arity(op, results, 0)?;
            Ok(Some(Value::DateTime(now)))
        }
        OpCode::Date => {
            check_arity(op, results, 0)?;
            Ok(Value::DateTime(now).date_part())
        }
        OpCode::Dow => {
            check_arity(op, results, 1)?;
            match &results[0] {
                None => Ok(None),
                Some(value) => value.day_of_week().map(Some).ok_or_else(|| {
                    CoreError::Evaluation(format!(
                        "operator DOW requires a date/time argument, got {value}"
                    ))
                }),
            }
        }
    }
}

fn compare_values(lhs: &Value, rhs: &Value) -> CoreResult<Ordering> {
    lhs.compare(rhs).ok_or_else(|| {
        CoreError::Evaluation(format!("cannot compare values {lhs} and {rhs}"))
    })
}

fn non_boolean(op: OpCode, value: &Value) -> CoreError {
    CoreError::Evaluation(format!(
        "operator {} requires boolean operands, got {value}",
        op.wire_name()
    ))
}

fn non_string(op: OpCode, value: &Value) -> CoreError {
    CoreError::Evaluation(format!(
        "operator {} requires string operands, got {value}",
        op.wire_name()
    ))
}
