//! Operators.

use serde::{Deserialize, Serialize};

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,      // +
    Sub,      // -
    Mult,     // *
    Div,      // /
    FloorDiv, // //
    Mod,      // %
    Pow,      // **
    LShift,   // <<
    RShift,   // >>
    BitOr,    // |
    BitXor,   // ^
    BitAnd,   // &
}

impl BinOpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOpKind::Add => "+",
            BinOpKind::Sub => "-",
            BinOpKind::Mult => "*",
            BinOpKind::Div => "/",
            BinOpKind::FloorDiv => "//",
            BinOpKind::Mod => "%",
            BinOpKind::Pow => "**",
            BinOpKind::LShift => "<<",
            BinOpKind::RShift => ">>",
            BinOpKind::BitOr => "|",
            BinOpKind::BitXor => "^",
            BinOpKind::BitAnd => "&",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOpKind {
    Invert, // ~
    Not,    // not
    UAdd,   // +
    USub,   // -
}

/// Comparison operators, including identity and membership tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOpKind {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOpKind::Eq => "==",
            CmpOpKind::NotEq => "!=",
            CmpOpKind::Lt => "<",
            CmpOpKind::LtE => "<=",
            CmpOpKind::Gt => ">",
            CmpOpKind::GtE => ">=",
            CmpOpKind::Is => "is",
            CmpOpKind::IsNot => "is not",
            CmpOpKind::In => "in",
            CmpOpKind::NotIn => "not in",
        }
    }
}

/// Boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoolOpKind {
    And,
    Or,
}
