//! Shared AST construction helpers for the integration suites.
//!
//! The parser lives outside this workspace, so tests build input trees by
//! hand through this small builder. Spans are zeroed; node ids are real so
//! the resolver's annotations behave exactly as they would on parsed input.

#![allow(dead_code)]

use nacre_ast::*;
use text_size::TextRange;

pub struct AstBuilder {
    ids: NodeIdGenerator,
}

impl AstBuilder {
    pub fn new() -> Self {
        AstBuilder {
            ids: NodeIdGenerator::new(),
        }
    }

    fn sp() -> TextRange {
        TextRange::default()
    }

    pub fn module(&mut self, name: &str, body: Vec<Stmt>) -> Module {
        Module {
            name: name.to_string(),
            filename: format!("{}.na", name),
            body,
            docstring: None,
            node_id: NodeId::ROOT,
        }
    }

    // ---- expressions ------------------------------------------------------

    pub fn name(&mut self, id: &str) -> Expr {
        Expr::Name(NameExpr {
            id: id.to_string(),
            node_id: self.ids.next(),
            span: Self::sp(),
        })
    }

    pub fn int(&mut self, value: i64) -> Expr {
        Expr::Num(NumExpr {
            value: Number::Int(value),
            span: Self::sp(),
        })
    }

    pub fn str_(&mut self, value: &str) -> Expr {
        Expr::Str(StrExpr {
            value: value.to_string(),
            span: Self::sp(),
        })
    }

    pub fn none(&mut self) -> Expr {
        Expr::NameConstant(NameConstantExpr {
            value: Singleton::None,
            span: Self::sp(),
        })
    }

    pub fn bool_(&mut self, value: bool) -> Expr {
        Expr::NameConstant(NameConstantExpr {
            value: if value {
                Singleton::True
            } else {
                Singleton::False
            },
            span: Self::sp(),
        })
    }

    pub fn binop(&mut self, left: Expr, op: BinOpKind, right: Expr) -> Expr {
        Expr::BinOp(BinOpExpr {
            left: Box::new(left),
            op,
            right: Box::new(right),
            span: Self::sp(),
        })
    }

    pub fn call(&mut self, func: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(CallExpr {
            func: Box::new(func),
            args,
            keywords: vec![],
            starargs: None,
            kwargs: None,
            span: Self::sp(),
        })
    }

    pub fn yield_(&mut self, value: Option<Expr>) -> Expr {
        Expr::Yield(YieldExpr {
            value: value.map(Box::new),
            span: Self::sp(),
        })
    }

    pub fn lambda(&mut self, params: &[&str], body: Expr) -> Expr {
        Expr::Lambda(LambdaExpr {
            args: self.params(params),
            body: Box::new(body),
            node_id: self.ids.next(),
            span: Self::sp(),
        })
    }

    // ---- statements -------------------------------------------------------

    pub fn expr_stmt(&mut self, value: Expr) -> Stmt {
        Stmt::Expr(ExprStmt {
            value,
            span: Self::sp(),
        })
    }

    pub fn assign(&mut self, target: &str, value: Expr) -> Stmt {
        let target = self.name(target);
        Stmt::Assign(AssignStmt {
            targets: vec![target],
            value,
            span: Self::sp(),
        })
    }

    pub fn ret(&mut self, value: Option<Expr>) -> Stmt {
        Stmt::Return(ReturnStmt {
            value,
            span: Self::sp(),
        })
    }

    pub fn pass(&mut self) -> Stmt {
        Stmt::Pass(PassStmt { span: Self::sp() })
    }

    pub fn brk(&mut self) -> Stmt {
        Stmt::Break(BreakStmt { span: Self::sp() })
    }

    pub fn if_(&mut self, test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Stmt {
        Stmt::If(IfStmt {
            test,
            body,
            orelse,
            span: Self::sp(),
        })
    }

    pub fn while_(&mut self, test: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::While(WhileStmt {
            test,
            body,
            orelse: vec![],
            span: Self::sp(),
        })
    }

    pub fn for_(&mut self, target: &str, iter: Expr, body: Vec<Stmt>) -> Stmt {
        let target = self.name(target);
        Stmt::For(ForStmt {
            target,
            iter,
            body,
            orelse: vec![],
            span: Self::sp(),
        })
    }

    pub fn raise(&mut self, exc: Expr) -> Stmt {
        Stmt::Raise(RaiseStmt {
            exc: Some(exc),
            cause: None,
            span: Self::sp(),
        })
    }

    pub fn try_(
        &mut self,
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    ) -> Stmt {
        Stmt::Try(TryStmt {
            body,
            handlers,
            orelse,
            finalbody,
            span: Self::sp(),
        })
    }

    pub fn handler(&mut self, typ: Option<Expr>, name: Option<&str>, body: Vec<Stmt>) -> ExceptHandler {
        ExceptHandler {
            typ,
            name: name.map(str::to_string),
            node_id: self.ids.next(),
            body,
            span: Self::sp(),
        }
    }

    pub fn with_(&mut self, context: Expr, binding: Option<&str>, body: Vec<Stmt>) -> Stmt {
        let optional_vars = binding.map(|b| self.name(b));
        Stmt::With(WithStmt {
            items: vec![WithItem {
                context_expr: context,
                optional_vars,
            }],
            body,
            span: Self::sp(),
        })
    }

    pub fn global_(&mut self, names: &[&str]) -> Stmt {
        Stmt::Global(GlobalStmt {
            names: names.iter().map(|n| (*n).to_string()).collect(),
            span: Self::sp(),
        })
    }

    pub fn nonlocal_(&mut self, names: &[&str]) -> Stmt {
        Stmt::Nonlocal(NonlocalStmt {
            names: names.iter().map(|n| (*n).to_string()).collect(),
            span: Self::sp(),
        })
    }

    pub fn func_def(&mut self, name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
        Stmt::FuncDef(FuncDefStmt {
            name: name.to_string(),
            args: self.params(params),
            body,
            decorators: vec![],
            returns: None,
            node_id: self.ids.next(),
            span: Self::sp(),
            docstring: None,
        })
    }

    pub fn class_def(&mut self, name: &str, bases: Vec<Expr>, body: Vec<Stmt>) -> Stmt {
        Stmt::ClassDef(ClassDefStmt {
            name: name.to_string(),
            bases,
            keywords: vec![],
            body,
            decorators: vec![],
            node_id: self.ids.next(),
            span: Self::sp(),
            docstring: None,
        })
    }

    pub fn params(&mut self, names: &[&str]) -> Arguments {
        Arguments {
            args: names
                .iter()
                .map(|name| Arg {
                    arg: (*name).to_string(),
                    annotation: None,
                    node_id: self.ids.next(),
                    span: Self::sp(),
                })
                .collect(),
            defaults: vec![],
            vararg: None,
            kwonlyargs: vec![],
            kw_defaults: vec![],
            kwarg: None,
        }
    }
}

/// Number of non-overlapping occurrences of `needle` in `haystack`.
pub fn count_occurrences(haystack: &str, needle: &str) -> usize {
    haystack.matches(needle).count()
}

/// The body text of one emitted function, located by its definition line
/// (a signature line ending in `{`, not a forward declaration or call).
pub fn function_body<'a>(source: &'a str, func_name: &str) -> &'a str {
    let needle = format!(" {}(", func_name);
    let mut offset = 0;
    for line in source.lines() {
        let line_start = offset;
        offset += line.len() + 1;
        if line.contains(&needle)
            && (line.starts_with("static ") || line.starts_with("int ") || line.starts_with("NrObject"))
            && line.trim_end().ends_with('{')
        {
            let rest = &source[line_start..];
            let open = rest.find('{').expect("definition line ends with a brace");
            let mut depth = 0usize;
            for (pos, ch) in rest[open..].char_indices() {
                match ch {
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            return &rest[open..open + pos + 1];
                        }
                    }
                    _ => {}
                }
            }
            panic!("unbalanced braces in function '{}'", func_name);
        }
    }
    panic!("function '{}' not in emitted source", func_name);
}
