//! Statement and supporting AST nodes.

use crate::expr::Expr;
use crate::node_id::NodeId;
use crate::ops::BinOpKind;
use text_size::TextRange;

/// A source module: the root scope.
#[derive(Debug, Clone)]
pub struct Module {
    /// Dotted module name, e.g. `pkg.mod`.
    pub name: String,
    /// Source file path, for `__file__` and diagnostics.
    pub filename: String,
    pub body: Vec<Stmt>,
    /// Module docstring (first string literal in the body, if any).
    pub docstring: Option<String>,
    pub node_id: NodeId,
}

/// Statement types.
#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(ExprStmt),
    Assign(AssignStmt),
    AugAssign(AugAssignStmt),
    Delete(DeleteStmt),
    Return(ReturnStmt),
    Pass(PassStmt),
    Break(BreakStmt),
    Continue(ContinueStmt),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    With(WithStmt),
    Raise(RaiseStmt),
    Try(TryStmt),
    Assert(AssertStmt),
    Import(ImportStmt),
    ImportFrom(ImportFromStmt),
    Global(GlobalStmt),
    Nonlocal(NonlocalStmt),
    FuncDef(FuncDefStmt),
    ClassDef(ClassDefStmt),
}

impl Stmt {
    pub fn span(&self) -> TextRange {
        match self {
            Stmt::Expr(s) => s.span,
            Stmt::Assign(s) => s.span,
            Stmt::AugAssign(s) => s.span,
            Stmt::Delete(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::Pass(s) => s.span,
            Stmt::Break(s) => s.span,
            Stmt::Continue(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::For(s) => s.span,
            Stmt::With(s) => s.span,
            Stmt::Raise(s) => s.span,
            Stmt::Try(s) => s.span,
            Stmt::Assert(s) => s.span,
            Stmt::Import(s) => s.span,
            Stmt::ImportFrom(s) => s.span,
            Stmt::Global(s) => s.span,
            Stmt::Nonlocal(s) => s.span,
            Stmt::FuncDef(s) => s.span,
            Stmt::ClassDef(s) => s.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExprStmt {
    pub value: Expr,
    pub span: TextRange,
}

/// `a = b = value`; every target stores the same value.
#[derive(Debug, Clone)]
pub struct AssignStmt {
    pub targets: Vec<Expr>,
    pub value: Expr,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct AugAssignStmt {
    pub target: Expr,
    pub op: BinOpKind,
    pub value: Expr,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub targets: Vec<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct PassStmt {
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct BreakStmt {
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct ContinueStmt {
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    pub test: Expr,
    pub body: Vec<Stmt>,
    pub orelse: Vec<Stmt>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub test: Expr,
    pub body: Vec<Stmt>,
    pub orelse: Vec<Stmt>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct ForStmt {
    pub target: Expr,
    pub iter: Expr,
    pub body: Vec<Stmt>,
    pub orelse: Vec<Stmt>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct WithStmt {
    pub items: Vec<WithItem>,
    pub body: Vec<Stmt>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct WithItem {
    pub context_expr: Expr,
    pub optional_vars: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct RaiseStmt {
    pub exc: Option<Expr>,
    pub cause: Option<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct TryStmt {
    pub body: Vec<Stmt>,
    pub handlers: Vec<ExceptHandler>,
    pub orelse: Vec<Stmt>,
    pub finalbody: Vec<Stmt>,
    pub span: TextRange,
}

/// `except typ as name:`; `typ` may be a tuple of exception classes.
#[derive(Debug, Clone)]
pub struct ExceptHandler {
    pub typ: Option<Expr>,
    pub name: Option<String>,
    pub node_id: NodeId,
    pub body: Vec<Stmt>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct AssertStmt {
    pub test: Expr,
    pub msg: Option<Expr>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct ImportStmt {
    pub names: Vec<Alias>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct ImportFromStmt {
    /// Dotted module path; empty for a bare relative import.
    pub module: String,
    /// Number of leading dots.
    pub level: u32,
    pub names: Vec<Alias>,
    pub span: TextRange,
}

/// `import name as asname`; the bound name is `asname` or the first dotted
/// component of `name`.
#[derive(Debug, Clone)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
    pub node_id: NodeId,
}

impl Alias {
    /// The name this alias binds in the importing scope.
    pub fn bound_name(&self) -> &str {
        match &self.asname {
            Some(asname) => asname,
            None => self.name.split('.').next().unwrap_or(&self.name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalStmt {
    pub names: Vec<String>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct NonlocalStmt {
    pub names: Vec<String>,
    pub span: TextRange,
}

#[derive(Debug, Clone)]
pub struct FuncDefStmt {
    pub name: String,
    pub args: Arguments,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    pub returns: Option<Box<Expr>>,
    pub node_id: NodeId,
    pub span: TextRange,
    /// The function's docstring (first string literal in the body, if any).
    pub docstring: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassDefStmt {
    pub name: String,
    pub bases: Vec<Expr>,
    pub keywords: Vec<crate::expr::Keyword>,
    pub body: Vec<Stmt>,
    pub decorators: Vec<Expr>,
    pub node_id: NodeId,
    pub span: TextRange,
    pub docstring: Option<String>,
}

/// Full parameter grammar: positionals with trailing defaults, `*args`,
/// keyword-only parameters with per-name defaults, `**kwargs`.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    pub args: Vec<Arg>,
    pub defaults: Vec<Expr>,
    pub vararg: Option<Arg>,
    pub kwonlyargs: Vec<Arg>,
    pub kw_defaults: Vec<Option<Expr>>,
    pub kwarg: Option<Arg>,
}

impl Arguments {
    /// All parameter names in canonical order: positional, `*args`,
    /// keyword-only, `**kwargs`.
    pub fn all_args(&self) -> Vec<&Arg> {
        let mut out: Vec<&Arg> = self.args.iter().collect();
        if let Some(vararg) = &self.vararg {
            out.push(vararg);
        }
        out.extend(self.kwonlyargs.iter());
        if let Some(kwarg) = &self.kwarg {
            out.push(kwarg);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Arg {
    pub arg: String,
    pub annotation: Option<Box<Expr>>,
    pub node_id: NodeId,
    pub span: TextRange,
}

/// One `for target in iter [if cond]*` clause of a comprehension.
#[derive(Debug, Clone)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_bound_name() {
        let plain = Alias {
            name: "os".to_string(),
            asname: None,
            node_id: NodeId::new(1),
        };
        assert_eq!(plain.bound_name(), "os");

        let dotted = Alias {
            name: "os.path".to_string(),
            asname: None,
            node_id: NodeId::new(2),
        };
        assert_eq!(dotted.bound_name(), "os");

        let renamed = Alias {
            name: "os.path".to_string(),
            asname: Some("p".to_string()),
            node_id: NodeId::new(3),
        };
        assert_eq!(renamed.bound_name(), "p");
    }

    #[test]
    fn test_all_args_order() {
        let dummy_span = TextRange::default();
        let mk = |name: &str, id: u32| Arg {
            arg: name.to_string(),
            annotation: None,
            node_id: NodeId::new(id),
            span: dummy_span,
        };
        let args = Arguments {
            args: vec![mk("a", 1), mk("b", 2)],
            defaults: vec![],
            vararg: Some(mk("rest", 3)),
            kwonlyargs: vec![mk("k", 4)],
            kw_defaults: vec![None],
            kwarg: Some(mk("kw", 5)),
        };
        let names: Vec<&str> = args.all_args().iter().map(|a| a.arg.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "rest", "k", "kw"]);
    }
}
