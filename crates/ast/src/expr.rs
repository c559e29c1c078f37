//! Expression AST nodes.

use crate::node_id::NodeId;
use crate::nodes::{Arguments, Comprehension};
use crate::ops::{BinOpKind, BoolOpKind, CmpOpKind, UnaryOpKind};
use text_size::TextRange;

/// Expression types.
#[derive(Debug, Clone)]
pub enum Expr {
    Num(NumExpr),
    Str(StrExpr),
    Bytes(BytesExpr),
    NameConstant(NameConstantExpr),
    Name(NameExpr),
    BinOp(BinOpExpr),
    UnaryOp(UnaryOpExpr),
    BoolOp(BoolOpExpr),
    Compare(CompareExpr),
    Call(CallExpr),
    Attribute(AttributeExpr),
    Subscript(SubscriptExpr),
    Starred(StarredExpr),
    List(ListExpr),
    Tuple(TupleExpr),
    Set(SetExpr),
    Dict(DictExpr),
    Lambda(LambdaExpr),
    IfExp(IfExpExpr),
    ListComp(ListCompExpr),
    SetComp(SetCompExpr),
    DictComp(DictCompExpr),
    GeneratorExp(GeneratorExpExpr),
    Yield(YieldExpr),
}

impl Expr {
    pub fn span(&self) -> TextRange {
        match self {
            Expr::Num(e) => e.span,
            Expr::Str(e) => e.span,
            Expr::Bytes(e) => e.span,
            Expr::NameConstant(e) => e.span,
            Expr::Name(e) => e.span,
            Expr::BinOp(e) => e.span,
            Expr::UnaryOp(e) => e.span,
            Expr::BoolOp(e) => e.span,
            Expr::Compare(e) => e.span,
            Expr::Call(e) => e.span,
            Expr::Attribute(e) => e.span,
            Expr::Subscript(e) => e.span,
            Expr::Starred(e) => e.span,
            Expr::List(e) => e.span,
            Expr::Tuple(e) => e.span,
            Expr::Set(e) => e.span,
            Expr::Dict(e) => e.span,
            Expr::Lambda(e) => e.span,
            Expr::IfExp(e) => e.span,
            Expr::ListComp(e) => e.span,
            Expr::SetComp(e) => e.span,
            Expr::DictComp(e) => e.span,
            Expr::GeneratorExp(e) => e.span,
            Expr::Yield(e) => e.span,
        }
    }
}

/// Numeric literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone)]
pub struct NumExpr {
    pub value: Number,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct StrExpr {
    pub value: String,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct BytesExpr {
    pub value: Vec<u8>,
    pub span: TextRange,
}

/// `True`, `False`, `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Singleton {
    True,
    False,
    None,
}

#[derive(Debug, Clone)]
pub struct NameConstantExpr {
    pub value: Singleton,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct NameExpr {
    pub id: String,
    pub node_id: NodeId,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct BinOpExpr {
    pub left: Box<Expr>,
    pub op: BinOpKind,
    pub right: Box<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct UnaryOpExpr {
    pub op: UnaryOpKind,
    pub operand: Box<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct BoolOpExpr {
    pub op: BoolOpKind,
    pub values: Vec<Expr>,
    pub span: TextRange,
}

/// A chained comparison: `left op0 comparators[0] op1 comparators[1] ...`.
#[derive(Debug, Clone)]
pub struct CompareExpr {
    pub left: Box<Expr>,
    pub ops: Vec<CmpOpKind>,
    pub comparators: Vec<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct CallExpr {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
    pub keywords: Vec<Keyword>,
    pub starargs: Option<Box<Expr>>,
    pub kwargs: Option<Box<Expr>>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct Keyword {
    pub arg: String,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct AttributeExpr {
    pub value: Box<Expr>,
    pub attr: String,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct SubscriptExpr {
    pub value: Box<Expr>,
    pub slice: Box<Slice>,
    pub span: TextRange,
}

/// Subscript slice forms.
#[derive(Debug, Clone)]
pub enum Slice {
    Index(Expr),
    Range {
        lower: Option<Expr>,
        upper: Option<Expr>,
        step: Option<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct StarredExpr {
    pub value: Box<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct ListExpr {
    pub elts: Vec<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct TupleExpr {
    pub elts: Vec<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct SetExpr {
    pub elts: Vec<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct DictExpr {
    pub keys: Vec<Expr>,
    pub values: Vec<Expr>,
    pub span: TextRange,
}

/// A lambda introduces a function scope; `node_id` keys its scope annotation.
#[derive(Debug, Clone)]
pub struct LambdaExpr {
    pub args: Arguments,
    pub body: Box<Expr>,
    pub node_id: NodeId,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct IfExpExpr {
    pub test: Box<Expr>,
    pub body: Box<Expr>,
    pub orelse: Box<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct ListCompExpr {
    pub elt: Box<Expr>,
    pub generators: Vec<Comprehension>,
    pub node_id: NodeId,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct SetCompExpr {
    pub elt: Box<Expr>,
    pub generators: Vec<Comprehension>,
    pub node_id: NodeId,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct DictCompExpr {
    pub key: Box<Expr>,
    pub value: Box<Expr>,
    pub generators: Vec<Comprehension>,
    pub node_id: NodeId,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct GeneratorExpExpr {
    pub elt: Box<Expr>,
    pub generators: Vec<Comprehension>,
    pub node_id: NodeId,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct YieldExpr {
    pub value: Option<Box<Expr>>,
    pub span: TextRange,
}
