//! Expression tree nodes and builders.

use std::fmt;
use strata_types::{NamedValueSet, Value};

/// Operator codes.
///
/// The wire names are transmitted and stored by name; never rename a
/// released value, extend by adding new ones only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // logical
    And,
    Or,
    Not,
    IsNull,
    IsNotNull,
    // relational
    Equ,
    Neq,
    Gtr,
    Geq,
    Lss,
    Leq,
    // string
    Starts,
    Ends,
    Contains,
    Lower,
    Upper,
    // date functions
    Now,
    Date,
    Dow,
    // generic compare
    Comp,
}

impl OpCode {
    /// The stable wire name.
    pub fn wire_name(&self) -> &'static str {
        match self {
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Not => "NOT",
            OpCode::IsNull => "ISNULL",
            OpCode::IsNotNull => "ISNOTNULL",
            OpCode::Equ => "EQU",
            OpCode::Neq => "NEQ",
            OpCode::Gtr => "GTR",
            OpCode::Geq => "GEQ",
            OpCode::Lss => "LSS",
            OpCode::Leq => "LEQ",
            OpCode::Starts => "STARTS",
            OpCode::Ends => "ENDS",
            OpCode::Contains => "CONTAINS",
            OpCode::Lower => "LOWER",
            OpCode::Upper => "UPPER",
            OpCode::Now => "NOW",
            OpCode::Date => "DATE",
            OpCode::Dow => "DOW",
            OpCode::Comp => "COMP",
        }
    }

    /// Parses a wire name (case-insensitive). Unknown names yield
    /// `None`; the deserializer turns those into error nodes.
    pub fn from_wire_name(name: &str) -> Option<OpCode> {
        let all = [
            OpCode::And,
            OpCode::Or,
            OpCode::Not,
            OpCode::IsNull,
            OpCode::IsNotNull,
            OpCode::Equ,
            OpCode::Neq,
            OpCode::Gtr,
            OpCode::Geq,
            OpCode::Lss,
            OpCode::Leq,
            OpCode::Starts,
            OpCode::Ends,
            OpCode::Contains,
            OpCode::Lower,
            OpCode::Upper,
            OpCode::Now,
            OpCode::Date,
            OpCode::Dow,
            OpCode::Comp,
        ];
        all.into_iter()
            .find(|op| op.wire_name().eq_ignore_ascii_case(name))
    }

    fn infix_symbol(&self) -> Option<&'static str> {
        match self {
            OpCode::And => Some("&&"),
            OpCode::Or => Some("||"),
            OpCode::Equ => Some("=="),
            OpCode::Neq => Some("!="),
            OpCode::Gtr => Some(">"),
            OpCode::Geq => Some(">="),
            OpCode::Lss => Some("<"),
            OpCode::Leq => Some("<="),
            OpCode::Starts => Some("StartsWith"),
            OpCode::Ends => Some("EndsWith"),
            OpCode::Contains => Some("Contains"),
            _ => None,
        }
    }
}

/// A filter expression tree.
///
/// `Error` nodes come from deserializing a syntactically well-formed
/// but semantically unrecognized document; they parse successfully
/// (forward compatibility) but any evaluation of a tree containing one
/// fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A typed constant.
    Const(Value),
    /// A reference to a named value in the evaluation context.
    Field(String),
    /// An operator applied to operand subtrees.
    Op(OpCode, Vec<Expr>),
    /// A node that could not be understood at deserialization time.
    Error(String),
}

impl Expr {
    // ── Leaf constructors ────────────────────────────────────────

    /// A constant expression.
    pub fn konst(value: impl Into<Value>) -> Expr {
        Expr::Const(value.into())
    }

    /// A field reference.
    pub fn prop(name: impl Into<String>) -> Expr {
        Expr::Field(name.into())
    }

    /// The match-everything expression (constant true).
    pub fn all() -> Expr {
        Expr::Const(Value::Bool(true))
    }

    // ── Logical operators ────────────────────────────────────────

    pub fn and(args: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Op(OpCode::And, args.into_iter().collect())
    }

    pub fn or(args: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Op(OpCode::Or, args.into_iter().collect())
    }

    pub fn not(arg: Expr) -> Expr {
        Expr::Op(OpCode::Not, vec![arg])
    }

    pub fn is_null(arg: Expr) -> Expr {
        Expr::Op(OpCode::IsNull, vec![arg])
    }

    pub fn is_not_null(arg: Expr) -> Expr {
        Expr::Op(OpCode::IsNotNull, vec![arg])
    }

    // ── Relational operators ─────────────────────────────────────

    pub fn is_eq(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Equ, vec![lhs, rhs])
    }

    pub fn is_ne(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Neq, vec![lhs, rhs])
    }

    pub fn is_gt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Gtr, vec![lhs, rhs])
    }

    pub fn is_ge(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Geq, vec![lhs, rhs])
    }

    pub fn is_lt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Lss, vec![lhs, rhs])
    }

    pub fn is_le(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Leq, vec![lhs, rhs])
    }

    pub fn compare(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Comp, vec![lhs, rhs])
    }

    // ── String operators ─────────────────────────────────────────

    pub fn starts_with(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Starts, vec![lhs, rhs])
    }

    pub fn ends_with(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Ends, vec![lhs, rhs])
    }

    pub fn contains(lhs: Expr, rhs: Expr) -> Expr {
        Expr::Op(OpCode::Contains, vec![lhs, rhs])
    }

    pub fn to_lower(arg: Expr) -> Expr {
        Expr::Op(OpCode::Lower, vec![arg])
    }

    pub fn to_upper(arg: Expr) -> Expr {
        Expr::Op(OpCode::Upper, vec![arg])
    }

    // ── Date functions ───────────────────────────────────────────

    /// The current date/time at evaluation.
    pub fn func_now() -> Expr {
        Expr::Op(OpCode::Now, Vec::new())
    }

    /// The current date (midnight) at evaluation.
    pub fn func_today() -> Expr {
        Expr::Op(OpCode::Date, Vec::new())
    }

    /// The weekday name of a date/time argument.
    pub fn day_of_week(arg: Expr) -> Expr {
        Expr::Op(OpCode::Dow, vec![arg])
    }

    // ── Field/value shortcuts ────────────────────────────────────

    /// `[name] == value`
    pub fn field_eq(name: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::is_eq(Expr::prop(name), Expr::konst(value))
    }

    /// `[name].StartsWith(prefix)`
    pub fn field_starts_with(name: impl Into<String>, prefix: impl Into<String>) -> Expr {
        Expr::starts_with(Expr::prop(name), Expr::konst(prefix.into()))
    }

    /// `IsNotNull([name])`
    pub fn field_is_not_null(name: impl Into<String>) -> Expr {
        Expr::is_not_null(Expr::prop(name))
    }

    /// Builds an AND-joined expression from a property set:
    /// `((p1 == v1) && (p2 == v2) && ...)`. List values expand to
    /// OR alternatives (`p IN (a, b, c)`).
    pub fn and_props(props: &NamedValueSet) -> Expr {
        Expr::and(props.iter().map(|nv| Self::prop_match(nv.name(), nv.value())))
    }

    /// Builds an OR-joined expression from a property set.
    pub fn or_props(props: &NamedValueSet) -> Expr {
        Expr::or(props.iter().map(|nv| Self::prop_match(nv.name(), nv.value())))
    }

    fn prop_match(name: &str, value: &Value) -> Expr {
        match value {
            Value::List(items) => Expr::or(
                items
                    .iter()
                    .map(|item| Expr::field_eq(name, item.clone())),
            ),
            other => Expr::field_eq(name, other.clone()),
        }
    }

    /// Whether any node in the tree failed to deserialize. Evaluating
    /// such a tree always fails.
    pub fn has_errors(&self) -> bool {
        match self {
            Expr::Const(_) | Expr::Field(_) => false,
            Expr::Error(_) => true,
            Expr::Op(_, args) => args.iter().any(Expr::has_errors),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(value) => write!(f, "{value}"),
            Expr::Field(name) => write!(f, "[{name}]"),
            Expr::Error(message) => write!(f, "ERROR('{message}')"),
            Expr::Op(op, args) => {
                if let Some(symbol) = op.infix_symbol() {
                    write!(f, "(")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, " {symbol} ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ")")
                } else {
                    write!(f, "{}(", op.wire_name())?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    write!(f, ")")
                }
            }
        }
    }
}
