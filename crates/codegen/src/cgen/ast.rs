//! C output AST nodes
//!
//! Closed node kinds for the emitted translation unit. Expressions carry
//! their operator spelling directly; types are a name plus pointer depth.
//! A [`CBlock`] keeps hoisted declarations separate from statements so the
//! visitor can declare storage lazily while appending statements in order.

use serde::{Deserialize, Serialize};

/// A C type: a base identifier plus pointer indirections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CType {
    pub name: String,
    pub pointers: u8,
}

impl CType {
    pub fn named(name: impl Into<String>) -> Self {
        CType {
            name: name.into(),
            pointers: 0,
        }
    }

    pub fn ptr(name: impl Into<String>) -> Self {
        CType {
            name: name.into(),
            pointers: 1,
        }
    }

    pub fn ptr_ptr(name: impl Into<String>) -> Self {
        CType {
            name: name.into(),
            pointers: 2,
        }
    }

    /// The runtime object header pointer, the workhorse type of all emitted code.
    pub fn obj() -> Self {
        CType::ptr("NrObject")
    }

    pub fn int() -> Self {
        CType::named("int")
    }

    pub fn void() -> Self {
        CType::named("void")
    }
}

/// C expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CExpr {
    Id(String),
    IntConst(i64),
    DoubleConst(f64),
    /// Printed quoted, with C escapes applied.
    StrConst(String),
    Unary {
        op: String,
        operand: Box<CExpr>,
    },
    Binary {
        op: String,
        left: Box<CExpr>,
        right: Box<CExpr>,
    },
    Assign {
        lhs: Box<CExpr>,
        rhs: Box<CExpr>,
    },
    Call {
        func: String,
        args: Vec<CExpr>,
    },
    Index {
        base: Box<CExpr>,
        index: Box<CExpr>,
    },
    /// `base->field`
    Arrow {
        base: Box<CExpr>,
        field: String,
    },
    Cast {
        ty: CType,
        operand: Box<CExpr>,
    },
    AddrOf(Box<CExpr>),
    Deref(Box<CExpr>),
}

impl CExpr {
    pub fn id(name: impl Into<String>) -> Self {
        CExpr::Id(name.into())
    }

    pub fn null() -> Self {
        CExpr::Id("NULL".to_string())
    }

    pub fn call(func: impl Into<String>, args: Vec<CExpr>) -> Self {
        CExpr::Call {
            func: func.into(),
            args,
        }
    }

    pub fn assign(lhs: CExpr, rhs: CExpr) -> Self {
        CExpr::Assign {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn assign_id(lhs: impl Into<String>, rhs: CExpr) -> Self {
        CExpr::assign(CExpr::id(lhs), rhs)
    }

    pub fn unary(op: impl Into<String>, operand: CExpr) -> Self {
        CExpr::Unary {
            op: op.into(),
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: impl Into<String>, left: CExpr, right: CExpr) -> Self {
        CExpr::Binary {
            op: op.into(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn index(base: CExpr, index: CExpr) -> Self {
        CExpr::Index {
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    pub fn arrow(base: CExpr, field: impl Into<String>) -> Self {
        CExpr::Arrow {
            base: Box::new(base),
            field: field.into(),
        }
    }

    pub fn addr_of(operand: CExpr) -> Self {
        CExpr::AddrOf(Box::new(operand))
    }

    /// `!expr`
    pub fn not(operand: CExpr) -> Self {
        CExpr::unary("!", operand)
    }
}

/// C statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CStmt {
    Expr(CExpr),
    If {
        cond: CExpr,
        then_block: CBlock,
        else_block: Option<CBlock>,
    },
    DoWhile {
        body: CBlock,
        cond: CExpr,
    },
    Switch {
        cond: CExpr,
        cases: Vec<(i64, Vec<CStmt>)>,
        default: Option<Vec<CStmt>>,
    },
    Label(String),
    Goto(String),
    Break,
    Continue,
    Return(Option<CExpr>),
    Block(CBlock),
    Comment(String),
}

/// A compound statement with an in-place insertion point for hoisted local
/// declarations: `decls` always print before `stmts`, regardless of when the
/// visitor registered them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CBlock {
    pub decls: Vec<CVarDecl>,
    pub stmts: Vec<CStmt>,
}

impl CBlock {
    pub fn new() -> Self {
        CBlock::default()
    }

    pub fn add(&mut self, stmt: CStmt) {
        self.stmts.push(stmt);
    }

    pub fn add_expr(&mut self, expr: CExpr) {
        self.stmts.push(CStmt::Expr(expr));
    }

    pub fn add_decl(&mut self, decl: CVarDecl) {
        self.decls.push(decl);
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty() && self.stmts.is_empty()
    }
}

/// A variable declaration, local or translation-unit level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVarDecl {
    pub name: String,
    pub ty: CType,
    pub is_static: bool,
    pub array_dim: Option<usize>,
    pub init: Option<CExpr>,
}

impl CVarDecl {
    pub fn new(name: impl Into<String>, ty: CType) -> Self {
        CVarDecl {
            name: name.into(),
            ty,
            is_static: false,
            array_dim: None,
            init: None,
        }
    }

    /// An `NrObject *name = NULL;` local, the common case.
    pub fn obj(name: impl Into<String>) -> Self {
        CVarDecl::new(name, CType::obj()).with_init(CExpr::null())
    }

    pub fn with_init(mut self, init: CExpr) -> Self {
        self.init = Some(init);
        self
    }

    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CParam {
    pub name: String,
    pub ty: CType,
}

impl CParam {
    pub fn new(name: impl Into<String>, ty: CType) -> Self {
        CParam {
            name: name.into(),
            ty,
        }
    }

    pub fn obj(name: impl Into<String>) -> Self {
        CParam::new(name, CType::obj())
    }
}

/// A function prototype, used for forward declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CFuncProto {
    pub name: String,
    pub ret: CType,
    pub params: Vec<CParam>,
    pub is_static: bool,
}

/// A function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CFuncDef {
    pub name: String,
    pub ret: CType,
    pub params: Vec<CParam>,
    pub is_static: bool,
    pub body: CBlock,
}

impl CFuncDef {
    pub fn new(name: impl Into<String>, ret: CType, params: Vec<CParam>) -> Self {
        CFuncDef {
            name: name.into(),
            ret,
            params,
            is_static: true,
            body: CBlock::new(),
        }
    }

    pub fn proto(&self) -> CFuncProto {
        CFuncProto {
            name: self.name.clone(),
            ret: self.ret.clone(),
            params: self.params.clone(),
            is_static: self.is_static,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Include {
    pub name: String,
    pub is_system: bool,
}

/// One emitted C source file: includes, then forward declarations, then
/// file-scope variables, then function definitions. The section lists are the
/// insertion points; order within each is append order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub includes: Vec<Include>,
    pub fwd_decls: Vec<CFuncProto>,
    pub vars: Vec<CVarDecl>,
    pub funcs: Vec<CFuncDef>,
}

impl TranslationUnit {
    pub fn new() -> Self {
        TranslationUnit::default()
    }

    pub fn add_include(&mut self, name: impl Into<String>, is_system: bool) {
        let include = Include {
            name: name.into(),
            is_system,
        };
        if !self.includes.contains(&include) {
            self.includes.push(include);
        }
    }

    pub fn add_fwddecl(&mut self, proto: CFuncProto) {
        self.fwd_decls.push(proto);
    }

    pub fn add_var(&mut self, decl: CVarDecl) {
        self.vars.push(decl);
    }

    pub fn add_func(&mut self, func: CFuncDef) {
        self.funcs.push(func);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_dedup() {
        let mut tu = TranslationUnit::new();
        tu.add_include("nr_object.h", false);
        tu.add_include("nr_object.h", false);
        assert_eq!(tu.includes.len(), 1);
    }

    #[test]
    fn test_block_keeps_decls_separate() {
        let mut block = CBlock::new();
        block.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id("x")]));
        block.add_decl(CVarDecl::obj("x"));
        assert_eq!(block.decls.len(), 1);
        assert_eq!(block.stmts.len(), 1);
    }
}
