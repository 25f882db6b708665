use crate::ir::attribute::format_float;
use std::fmt::Display;
use std::fmt::Formatter;

/// A compile-time known scalar, as produced by folding an op.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(value) => Some(*value),
            Literal::Bool(value) => Some(*value as i64),
            _ => None,
        }
    }
    /// Integers widen to floats, matching scalar promotion.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Literal::Float(value) => Some(*value),
            Literal::Int(value) => Some(*value as f64),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(value) => Some(*value),
            _ => None,
        }
    }
    pub fn is_none(&self) -> bool {
        matches!(self, Literal::None)
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::None => write!(f, "none"),
            Literal::Bool(value) => write!(f, "{value}"),
            Literal::Int(value) => write!(f, "{value}"),
            Literal::Float(value) => write!(f, "{}", format_float(*value)),
            Literal::Str(value) => write!(f, "\"{value}\""),
        }
    }
}
