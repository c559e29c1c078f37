//! Name resolution pass
//!
//! Pre-order traversal over a module with a scope stack. Entering a scope
//! runs a declare pass over its immediate statements (global/nonlocal first,
//! then binding occurrences), so that loads inside the scope always see the
//! scope's own locals regardless of textual order. Loads then search the
//! stack outward, skipping class namespaces, falling back to an optimistic
//! module-level symbol whose absence is the runtime's problem, not ours.

use crate::error::{CodegenError, CodegenResult, ResolveErrorKind};
use crate::resolve::scope::{
    Binding, NameRef, ScopeId, ScopeKind, ScopeTable, SymbolId, TypeHint,
};
use nacre_ast as ast;
use nacre_ast::{Expr, NodeId, Stmt};
use std::collections::{HashMap, HashSet};
use text_size::TextRange;
use tracing::debug;

/// The resolver's output: the scope tree plus per-node annotations.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub table: ScopeTable,
    pub module_scope: ScopeId,
    bindings: HashMap<NodeId, SymbolId>,
    scopes: HashMap<NodeId, ScopeId>,
}

impl Resolution {
    /// The symbol a name-bearing node resolved to.
    pub fn binding(&self, node: NodeId) -> Option<SymbolId> {
        self.bindings.get(&node).copied()
    }

    /// The scope introduced by a module/function/class/comprehension node.
    pub fn scope_of(&self, node: NodeId) -> Option<ScopeId> {
        self.scopes.get(&node).copied()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }
}

pub struct Resolver {
    table: ScopeTable,
    stack: Vec<ScopeId>,
    bindings: HashMap<NodeId, SymbolId>,
    scopes: HashMap<NodeId, ScopeId>,
    resolved_roots: HashSet<NodeId>,
    module_scope: Option<ScopeId>,
    /// Promote optimistic module-level synthesis to a fatal undefined-name
    /// error. Off by default: absent names defer to the runtime.
    strict_undefined: bool,
}

impl Resolver {
    pub fn new() -> Self {
        Resolver {
            table: ScopeTable::new(),
            stack: Vec::new(),
            bindings: HashMap::new(),
            scopes: HashMap::new(),
            resolved_roots: HashSet::new(),
            module_scope: None,
            strict_undefined: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict_undefined = true;
        self
    }

    /// Resolve a module in one shot.
    pub fn resolve_module(module: &ast::Module) -> CodegenResult<Resolution> {
        let mut resolver = Resolver::new();
        resolver.resolve(module)?;
        Ok(resolver.finish())
    }

    /// Resolve `module` into this resolver's tables. Resolving the same
    /// module twice is a no-op: no duplicate scopes or symbols are created.
    pub fn resolve(&mut self, module: &ast::Module) -> CodegenResult<()> {
        if self.resolved_roots.contains(&module.node_id) {
            debug!(module = %module.name, "already resolved; skipping");
            return Ok(());
        }

        let builtin = self.table.builtin_scope();
        let scope = self
            .table
            .push_scope(ScopeKind::Module, format!("<module {}>", module.name), Some(builtin));
        self.module_scope = Some(scope);
        self.scopes.insert(module.node_id, scope);

        self.stack.push(scope);
        self.declare_block(&module.body)?;
        self.visit_block(&module.body)?;
        self.stack.pop();

        self.resolved_roots.insert(module.node_id);
        debug!(
            module = %module.name,
            scopes = self.table.scope_count(),
            symbols = self.table.symbol_count(),
            "resolved"
        );
        Ok(())
    }

    pub fn finish(self) -> Resolution {
        Resolution {
            table: self.table,
            module_scope: self.module_scope.expect("resolve() must run before finish()"),
            bindings: self.bindings,
            scopes: self.scopes,
        }
    }

    fn current(&self) -> ScopeId {
        *self.stack.last().expect("scope stack is never empty mid-walk")
    }

    fn module(&self) -> ScopeId {
        self.module_scope.expect("module scope set on entry")
    }

    // ---- declare pass -----------------------------------------------------

    /// Collect the scope's own bindings without descending into nested
    /// scopes. Global/nonlocal declarations run first so later binding
    /// occurrences of the same names become writes through the ref.
    fn declare_block(&mut self, body: &[Stmt]) -> CodegenResult<()> {
        self.declare_scope_directives(body)?;
        for stmt in body {
            self.declare_stmt(stmt)?;
        }
        Ok(())
    }

    fn declare_scope_directives(&mut self, body: &[Stmt]) -> CodegenResult<()> {
        for stmt in body {
            match stmt {
                Stmt::Global(s) => {
                    for name in &s.names {
                        let target = self.table.add_symbol(self.module(), name);
                        self.table.add_reference(
                            self.current(),
                            NameRef {
                                target,
                                is_global: true,
                                is_nonlocal: false,
                            },
                        );
                    }
                }
                Stmt::Nonlocal(s) => {
                    for name in &s.names {
                        let target = self
                            .table
                            .lookup_enclosing_function(self.current(), name)
                            .ok_or_else(|| CodegenError::nonlocal_unbound(name, s.span))?;
                        self.table.add_reference(
                            self.current(),
                            NameRef {
                                target,
                                is_global: false,
                                is_nonlocal: true,
                            },
                        );
                    }
                }
                // directives only apply at statement depth within blocks of
                // the same scope
                Stmt::If(s) => {
                    self.declare_scope_directives(&s.body)?;
                    self.declare_scope_directives(&s.orelse)?;
                }
                Stmt::While(s) => {
                    self.declare_scope_directives(&s.body)?;
                    self.declare_scope_directives(&s.orelse)?;
                }
                Stmt::For(s) => {
                    self.declare_scope_directives(&s.body)?;
                    self.declare_scope_directives(&s.orelse)?;
                }
                Stmt::With(s) => self.declare_scope_directives(&s.body)?,
                Stmt::Try(s) => {
                    self.declare_scope_directives(&s.body)?;
                    for handler in &s.handlers {
                        self.declare_scope_directives(&handler.body)?;
                    }
                    self.declare_scope_directives(&s.orelse)?;
                    self.declare_scope_directives(&s.finalbody)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn declare_stmt(&mut self, stmt: &Stmt) -> CodegenResult<()> {
        match stmt {
            Stmt::Assign(s) => {
                for target in &s.targets {
                    self.declare_target(target);
                }
            }
            Stmt::AugAssign(s) => self.declare_target(&s.target),
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.declare_target(target);
                }
            }
            Stmt::For(s) => {
                self.declare_target(&s.target);
                self.declare_nested(&s.body)?;
                self.declare_nested(&s.orelse)?;
            }
            Stmt::With(s) => {
                for item in &s.items {
                    if let Some(vars) = &item.optional_vars {
                        self.declare_target(vars);
                    }
                }
                self.declare_nested(&s.body)?;
            }
            Stmt::Try(s) => {
                self.declare_nested(&s.body)?;
                for handler in &s.handlers {
                    if let Some(name) = &handler.name {
                        self.bind(name);
                    }
                    self.declare_nested(&handler.body)?;
                }
                self.declare_nested(&s.orelse)?;
                self.declare_nested(&s.finalbody)?;
            }
            Stmt::If(s) => {
                self.declare_nested(&s.body)?;
                self.declare_nested(&s.orelse)?;
            }
            Stmt::While(s) => {
                self.declare_nested(&s.body)?;
                self.declare_nested(&s.orelse)?;
            }
            Stmt::Import(s) => {
                for alias in &s.names {
                    let sym = self.bind(alias.bound_name());
                    self.table.symbol_mut(sym).add_type(TypeHint::Module);
                }
            }
            Stmt::ImportFrom(s) => {
                for alias in &s.names {
                    self.bind(alias.bound_name());
                }
            }
            Stmt::FuncDef(s) => {
                let sym = self.bind(&s.name);
                self.table.symbol_mut(sym).add_type(TypeHint::Function);
            }
            Stmt::ClassDef(s) => {
                let sym = self.bind(&s.name);
                self.table.symbol_mut(sym).add_type(TypeHint::Class);
            }
            _ => {}
        }
        Ok(())
    }

    fn declare_nested(&mut self, body: &[Stmt]) -> CodegenResult<()> {
        for stmt in body {
            self.declare_stmt(stmt)?;
        }
        Ok(())
    }

    /// Binding occurrence of an assignment-like target expression.
    fn declare_target(&mut self, target: &Expr) {
        match target {
            Expr::Name(name) => {
                self.bind(&name.id);
            }
            Expr::Tuple(t) => {
                for elt in &t.elts {
                    self.declare_target(elt);
                }
            }
            Expr::List(l) => {
                for elt in &l.elts {
                    self.declare_target(elt);
                }
            }
            Expr::Starred(s) => self.declare_target(&s.value),
            // attribute/subscript stores bind nothing
            _ => {}
        }
    }

    /// Insert a local symbol unless the name already resolves here (for
    /// instance through a global/nonlocal ref).
    fn bind(&mut self, name: &str) -> SymbolId {
        let current = self.current();
        if let Some(binding) = self.table.scope(current).symbols.get(name) {
            return binding.symbol();
        }
        self.table.add_symbol(current, name)
    }

    // ---- visit pass -------------------------------------------------------

    fn visit_block(&mut self, body: &[Stmt]) -> CodegenResult<()> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &Stmt) -> CodegenResult<()> {
        match stmt {
            Stmt::Expr(s) => self.visit_expr(&s.value)?,
            Stmt::Assign(s) => {
                self.visit_expr(&s.value)?;
                for target in &s.targets {
                    self.visit_store_target(target)?;
                    if let (Expr::Name(name), Some(hint)) = (target, literal_hint(&s.value)) {
                        if let Some(sym) = self.bindings.get(&name.node_id) {
                            self.table.symbol_mut(*sym).add_type(hint);
                        }
                    }
                }
            }
            Stmt::AugAssign(s) => {
                self.visit_expr(&s.value)?;
                // an augmented target is read and written
                if let Expr::Name(name) = &s.target {
                    self.resolve_name(&name.id, name.node_id, name.span)?;
                } else {
                    self.visit_store_target(&s.target)?;
                }
            }
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.visit_store_target(target)?;
                }
            }
            Stmt::Return(s) => {
                if self.table.scope(self.current()).kind != ScopeKind::Function {
                    return Err(CodegenError::InvalidScope(
                        "return outside of function".to_string(),
                    ));
                }
                if let Some(value) = &s.value {
                    self.visit_expr(value)?;
                }
            }
            Stmt::Pass(_) | Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::Global(_) | Stmt::Nonlocal(_) => {} // handled in declare pass
            Stmt::If(s) => {
                self.visit_expr(&s.test)?;
                self.visit_block(&s.body)?;
                self.visit_block(&s.orelse)?;
            }
            Stmt::While(s) => {
                self.visit_expr(&s.test)?;
                self.visit_block(&s.body)?;
                self.visit_block(&s.orelse)?;
            }
            Stmt::For(s) => {
                self.visit_expr(&s.iter)?;
                self.visit_store_target(&s.target)?;
                self.visit_block(&s.body)?;
                self.visit_block(&s.orelse)?;
            }
            Stmt::With(s) => {
                for item in &s.items {
                    self.visit_expr(&item.context_expr)?;
                    if let Some(vars) = &item.optional_vars {
                        self.visit_store_target(vars)?;
                    }
                }
                self.visit_block(&s.body)?;
            }
            Stmt::Raise(s) => {
                if let Some(exc) = &s.exc {
                    self.visit_expr(exc)?;
                }
                if let Some(cause) = &s.cause {
                    self.visit_expr(cause)?;
                }
            }
            Stmt::Try(s) => {
                self.visit_block(&s.body)?;
                for handler in &s.handlers {
                    if let Some(typ) = &handler.typ {
                        self.visit_expr(typ)?;
                    }
                    if let Some(name) = &handler.name {
                        let sym = self.bind(name);
                        self.bindings.insert(handler.node_id, sym);
                    }
                    self.visit_block(&handler.body)?;
                }
                self.visit_block(&s.orelse)?;
                self.visit_block(&s.finalbody)?;
            }
            Stmt::Assert(s) => {
                self.visit_expr(&s.test)?;
                if let Some(msg) = &s.msg {
                    self.visit_expr(msg)?;
                }
            }
            Stmt::Import(s) => {
                for alias in &s.names {
                    let sym = self.bind(alias.bound_name());
                    self.bindings.insert(alias.node_id, sym);
                }
            }
            Stmt::ImportFrom(s) => {
                for alias in &s.names {
                    let sym = self.bind(alias.bound_name());
                    self.bindings.insert(alias.node_id, sym);
                }
            }
            Stmt::FuncDef(s) => self.visit_funcdef(s)?,
            Stmt::ClassDef(s) => self.visit_classdef(s)?,
        }
        Ok(())
    }

    fn visit_funcdef(&mut self, s: &ast::FuncDefStmt) -> CodegenResult<()> {
        // decorators, defaults, and annotations evaluate in the defining scope
        for deco in &s.decorators {
            self.visit_expr(deco)?;
        }
        self.visit_arguments_outer(&s.args)?;

        let name_sym = self.bind(&s.name);
        self.bindings.insert(s.node_id, name_sym);

        let scope = self.enter_function_like(ScopeKind::Function, &s.name, s.node_id)?;
        self.table.symbol_mut(name_sym).nested_scope = Some(scope);

        self.declare_params(&s.args, s.span)?;
        self.declare_block(&s.body)?;
        self.visit_block(&s.body)?;
        self.stack.pop();
        Ok(())
    }

    fn visit_classdef(&mut self, s: &ast::ClassDefStmt) -> CodegenResult<()> {
        for deco in &s.decorators {
            self.visit_expr(deco)?;
        }
        for base in &s.bases {
            self.visit_expr(base)?;
        }
        for kw in &s.keywords {
            self.visit_expr(&kw.value)?;
        }

        let name_sym = self.bind(&s.name);
        self.bindings.insert(s.node_id, name_sym);

        let scope = self
            .table
            .push_scope(ScopeKind::Class, s.name.clone(), Some(self.current()));
        self.scopes.insert(s.node_id, scope);
        self.table.symbol_mut(name_sym).nested_scope = Some(scope);

        self.stack.push(scope);
        self.declare_block(&s.body)?;
        self.visit_block(&s.body)?;
        self.stack.pop();
        Ok(())
    }

    /// Create a function-like scope and mark every enclosing function as
    /// closure-bearing: its locals must move into the shared heap frame so
    /// this new nested scope can reach them.
    fn enter_function_like(
        &mut self,
        kind: ScopeKind,
        name: &str,
        node_id: NodeId,
    ) -> CodegenResult<ScopeId> {
        for enclosing in self.stack.clone() {
            if self.table.scope(enclosing).kind == ScopeKind::Function {
                self.table.scope_mut(enclosing).has_closure = true;
            }
        }
        let scope = self
            .table
            .push_scope(kind, name.to_string(), Some(self.current()));
        self.scopes.insert(node_id, scope);
        self.stack.push(scope);
        Ok(scope)
    }

    fn declare_params(&mut self, args: &ast::Arguments, span: TextRange) -> CodegenResult<()> {
        let mut seen = HashSet::new();
        for arg in args.all_args() {
            if !seen.insert(arg.arg.clone()) {
                return Err(CodegenError::Resolve {
                    kind: ResolveErrorKind::DuplicateParam,
                    name: arg.arg.clone(),
                    span,
                });
            }
            let sym = self.bind(&arg.arg);
            self.bindings.insert(arg.node_id, sym);
        }
        Ok(())
    }

    /// Defaults and annotations belong to the enclosing scope, not the new one.
    fn visit_arguments_outer(&mut self, args: &ast::Arguments) -> CodegenResult<()> {
        for default in &args.defaults {
            self.visit_expr(default)?;
        }
        for default in args.kw_defaults.iter().flatten() {
            self.visit_expr(default)?;
        }
        for arg in args.all_args() {
            if let Some(annotation) = &arg.annotation {
                self.visit_expr(annotation)?;
            }
        }
        Ok(())
    }

    fn visit_store_target(&mut self, target: &Expr) -> CodegenResult<()> {
        match target {
            Expr::Name(name) => {
                // the declare pass bound it; this resolves and annotates
                self.resolve_name(&name.id, name.node_id, name.span)?;
                Ok(())
            }
            Expr::Tuple(t) => {
                for elt in &t.elts {
                    self.visit_store_target(elt)?;
                }
                Ok(())
            }
            Expr::List(l) => {
                for elt in &l.elts {
                    self.visit_store_target(elt)?;
                }
                Ok(())
            }
            Expr::Starred(s) => self.visit_store_target(&s.value),
            Expr::Attribute(a) => self.visit_expr(&a.value),
            Expr::Subscript(s) => {
                self.visit_expr(&s.value)?;
                self.visit_slice(&s.slice)
            }
            other => self.visit_expr(other),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) -> CodegenResult<()> {
        match expr {
            Expr::Num(_) | Expr::Str(_) | Expr::Bytes(_) | Expr::NameConstant(_) => Ok(()),
            Expr::Name(name) => {
                self.resolve_name(&name.id, name.node_id, name.span)?;
                Ok(())
            }
            Expr::BinOp(e) => {
                self.visit_expr(&e.left)?;
                self.visit_expr(&e.right)
            }
            Expr::UnaryOp(e) => self.visit_expr(&e.operand),
            Expr::BoolOp(e) => {
                for value in &e.values {
                    self.visit_expr(value)?;
                }
                Ok(())
            }
            Expr::Compare(e) => {
                self.visit_expr(&e.left)?;
                for comparator in &e.comparators {
                    self.visit_expr(comparator)?;
                }
                Ok(())
            }
            Expr::Call(e) => {
                self.visit_expr(&e.func)?;
                for arg in &e.args {
                    self.visit_expr(arg)?;
                }
                for kw in &e.keywords {
                    self.visit_expr(&kw.value)?;
                }
                if let Some(star) = &e.starargs {
                    self.visit_expr(star)?;
                }
                if let Some(kw) = &e.kwargs {
                    self.visit_expr(kw)?;
                }
                Ok(())
            }
            Expr::Attribute(e) => self.visit_expr(&e.value),
            Expr::Subscript(e) => {
                self.visit_expr(&e.value)?;
                self.visit_slice(&e.slice)
            }
            Expr::Starred(e) => self.visit_expr(&e.value),
            Expr::List(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt)?;
                }
                Ok(())
            }
            Expr::Tuple(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt)?;
                }
                Ok(())
            }
            Expr::Set(e) => {
                for elt in &e.elts {
                    self.visit_expr(elt)?;
                }
                Ok(())
            }
            Expr::Dict(e) => {
                for key in &e.keys {
                    self.visit_expr(key)?;
                }
                for value in &e.values {
                    self.visit_expr(value)?;
                }
                Ok(())
            }
            Expr::Lambda(e) => {
                self.visit_arguments_outer(&e.args)?;
                self.enter_function_like(ScopeKind::Function, "<lambda>", e.node_id)?;
                self.declare_params(&e.args, e.span)?;
                self.visit_expr(&e.body)?;
                self.stack.pop();
                Ok(())
            }
            Expr::IfExp(e) => {
                self.visit_expr(&e.test)?;
                self.visit_expr(&e.body)?;
                self.visit_expr(&e.orelse)
            }
            Expr::ListComp(e) => {
                self.visit_comprehension("<listcomp>", e.node_id, &e.generators, |r| {
                    r.visit_expr(&e.elt)
                })?;
                Ok(())
            }
            Expr::SetComp(e) => {
                self.visit_comprehension("<setcomp>", e.node_id, &e.generators, |r| {
                    r.visit_expr(&e.elt)
                })?;
                Ok(())
            }
            Expr::DictComp(e) => {
                self.visit_comprehension("<dictcomp>", e.node_id, &e.generators, |r| {
                    r.visit_expr(&e.key)?;
                    r.visit_expr(&e.value)
                })?;
                Ok(())
            }
            Expr::GeneratorExp(e) => {
                let scope =
                    self.visit_comprehension("<genexpr>", e.node_id, &e.generators, |r| {
                        r.visit_expr(&e.elt)
                    })?;
                self.table.scope_mut(scope).is_generator = true;
                Ok(())
            }
            Expr::Yield(e) => {
                let current = self.current();
                if self.table.scope(current).kind != ScopeKind::Function {
                    return Err(CodegenError::InvalidScope(
                        "yield outside of function".to_string(),
                    ));
                }
                self.table.scope_mut(current).is_generator = true;
                if let Some(value) = &e.value {
                    self.visit_expr(value)?;
                }
                Ok(())
            }
        }
    }

    fn visit_comprehension<F>(
        &mut self,
        name: &str,
        node_id: NodeId,
        generators: &[ast::Comprehension],
        visit_elt: F,
    ) -> CodegenResult<ScopeId>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        // the first iterable evaluates in the enclosing scope
        let (first, rest) = generators
            .split_first()
            .ok_or_else(|| CodegenError::Internal("comprehension without generators".into()))?;
        self.visit_expr(&first.iter)?;

        let scope = self.enter_function_like(ScopeKind::Comprehension, name, node_id)?;
        self.declare_target(&first.target);
        self.visit_store_target(&first.target)?;
        for cond in &first.ifs {
            self.visit_expr(cond)?;
        }
        for generator in rest {
            self.declare_target(&generator.target);
            self.visit_expr(&generator.iter)?;
            self.visit_store_target(&generator.target)?;
            for cond in &generator.ifs {
                self.visit_expr(cond)?;
            }
        }
        visit_elt(self)?;
        self.stack.pop();
        Ok(scope)
    }

    fn visit_slice(&mut self, slice: &ast::Slice) -> CodegenResult<()> {
        match slice {
            ast::Slice::Index(e) => self.visit_expr(e),
            ast::Slice::Range { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part)?;
                }
                Ok(())
            }
        }
    }

    /// Resolve a name occurrence to its symbol, recording a capture ref when
    /// the symbol lives in an enclosing function scope.
    fn resolve_name(
        &mut self,
        name: &str,
        node_id: NodeId,
        span: TextRange,
    ) -> CodegenResult<SymbolId> {
        let current = self.current();
        let sym = match self.table.lookup(current, name) {
            Some(Binding::Local(sym)) => {
                let owner = self.table.symbol(sym).scope;
                if owner != current && self.table.scope(owner).kind.is_function_like() {
                    // lexical capture of an enclosing function's local
                    self.table.add_reference(
                        current,
                        NameRef {
                            target: sym,
                            is_global: false,
                            is_nonlocal: false,
                        },
                    );
                }
                sym
            }
            Some(Binding::Ref(r)) => r.target,
            None => {
                if self.strict_undefined {
                    return Err(CodegenError::undefined(name, span));
                }
                // optimistic: assume module/builtin level, defer to runtime
                debug!(name, "optimistic module-level resolution");
                let sym = self.table.add_symbol(self.module(), name);
                self.table.symbol_mut(sym).optimistic = true;
                sym
            }
        };
        self.bindings.insert(node_id, sym);
        Ok(sym)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

fn literal_hint(expr: &Expr) -> Option<TypeHint> {
    match expr {
        Expr::Num(n) => Some(match n.value {
            ast::Number::Int(_) => TypeHint::Int,
            ast::Number::Float(_) => TypeHint::Float,
        }),
        Expr::Str(_) => Some(TypeHint::Str),
        Expr::Bytes(_) => Some(TypeHint::Bytes),
        Expr::NameConstant(c) => match c.value {
            ast::Singleton::True | ast::Singleton::False => Some(TypeHint::Bool),
            ast::Singleton::None => None,
        },
        Expr::List(_) => Some(TypeHint::List),
        Expr::Tuple(_) => Some(TypeHint::Tuple),
        Expr::Dict(_) => Some(TypeHint::Dict),
        Expr::Set(_) => Some(TypeHint::Set),
        Expr::Lambda(_) => Some(TypeHint::Function),
        _ => None,
    }
}
