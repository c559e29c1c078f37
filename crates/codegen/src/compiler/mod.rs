//! Code generation visitor
//!
//! Walks the resolved AST and emits the native translation unit. The
//! visitor maintains three pieces of state: the emission context, the
//! scope stack, and (inside the context) the flow-control label stack.

pub mod class;
pub mod context;
pub mod expr;
pub mod flow;
pub mod function;
pub mod module;
pub mod stmt;

pub use context::EmitCtx;
pub use flow::{CleanupFrame, ExcCookie, FlowLabel, END_LABEL};
pub use module::ModuleCompiler;

use crate::error::{CodegenError, CodegenResult};
use crate::resolve::{Resolution, ScopeId, ScopeKind, SymbolId};
use crate::values::{mapping, object, FuncRepr, ModuleRepr, Value};
use context::sanitize;
use std::collections::{HashMap, HashSet};

/// The visitor. One per compiled module; all counters live here or in the
/// emission context, never in ambient state.
pub struct Visitor<'r> {
    pub resolution: &'r mut Resolution,
    pub ctx: EmitCtx,
    pub module: ModuleRepr,
    scopes: Vec<ScopeId>,
    funcs: Vec<FuncRepr>,
    /// Open class bodies: the scope and its namespace dict.
    class_ns: Vec<(ScopeId, Value)>,
    /// Cookies of exception handlers currently being emitted; the innermost
    /// backs a bare `raise`.
    handler_cookies: Vec<ExcCookie>,
    c_names: HashMap<ScopeId, String>,
    c_names_taken: HashSet<String>,
    /// Emission-side label counters, one space per scope. Kept apart from
    /// the scope table's counters so the IR lowering pass does not shift
    /// emitted label numbering.
    labels: HashMap<(ScopeId, String), u32>,
}

impl<'r> Visitor<'r> {
    pub fn new(resolution: &'r mut Resolution, module: ModuleRepr) -> Self {
        Visitor {
            resolution,
            ctx: EmitCtx::new(),
            module,
            scopes: Vec::new(),
            funcs: Vec::new(),
            class_ns: Vec::new(),
            handler_cookies: Vec::new(),
            c_names: HashMap::new(),
            c_names_taken: HashSet::new(),
            labels: HashMap::new(),
        }
    }

    // ---- scope plumbing ---------------------------------------------------

    pub fn push_scope(&mut self, scope: ScopeId) {
        self.scopes.push(scope);
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn current_scope(&self) -> ScopeId {
        *self.scopes.last().expect("scope stack is empty")
    }

    pub fn push_func(&mut self, repr: FuncRepr) {
        self.funcs.push(repr);
    }

    pub fn pop_func(&mut self) -> FuncRepr {
        self.funcs.pop().expect("function repr stack is empty")
    }

    pub fn current_func(&self) -> Option<&FuncRepr> {
        self.funcs.last()
    }

    pub fn current_func_mut(&mut self) -> Option<&mut FuncRepr> {
        self.funcs.last_mut()
    }

    /// Next label in the current scope's label space.
    pub fn label(&mut self, base: &str) -> String {
        let scope = self.current_scope();
        let counter = self.labels.entry((scope, base.to_string())).or_insert(0);
        let label = format!("{}{}", base, counter);
        *counter += 1;
        label
    }

    /// A unique C name base for a nested scope, derived from the owner path.
    pub fn c_name_for(&mut self, scope: ScopeId, name: &str) -> String {
        if let Some(existing) = self.c_names.get(&scope) {
            return existing.clone();
        }
        let base = format!("{}_{}", self.module.c_name, sanitize(name));
        let mut candidate = base.clone();
        let mut counter = 1;
        while !self.c_names_taken.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, counter);
            counter += 1;
        }
        self.c_names.insert(scope, candidate.clone());
        candidate
    }

    pub fn push_class_ns(&mut self, scope: ScopeId, ns: Value) {
        self.class_ns.push((scope, ns));
    }

    pub fn pop_class_ns(&mut self) {
        self.class_ns.pop();
    }

    fn class_ns_for(&self, scope: ScopeId) -> Option<&Value> {
        self.class_ns
            .iter()
            .rev()
            .find(|(s, _)| *s == scope)
            .map(|(_, ns)| ns)
    }

    pub fn push_handler_cookie(&mut self, cookie: ExcCookie) {
        self.handler_cookies.push(cookie);
    }

    pub fn pop_handler_cookie(&mut self) {
        self.handler_cookies.pop();
    }

    pub fn current_handler_cookie(&self) -> Option<ExcCookie> {
        self.handler_cookies.last().cloned()
    }

    // ---- name access routing ---------------------------------------------
    //
    // A resolved symbol's storage decides the access path: module/builtin
    // namespace, an open class namespace dict, or the current function's
    // unified local-variable strategy.

    pub fn load_name(&mut self, sym: SymbolId) -> CodegenResult<Value> {
        let (name, owner_kind, owner) = self.symbol_info(sym);
        match owner_kind {
            ScopeKind::Module | ScopeKind::Builtin => self.module.get_name(&mut self.ctx, &name),
            ScopeKind::Class => {
                let ns = self.class_ns_for(owner).cloned().ok_or_else(|| {
                    CodegenError::Internal(format!("class namespace for '{}' not open", name))
                })?;
                ns_get(&mut self.ctx, &ns, &name)
            }
            ScopeKind::Function | ScopeKind::Comprehension => {
                let repr = self.funcs.last().ok_or_else(|| {
                    CodegenError::Internal(format!("local '{}' loaded outside a function", name))
                })?;
                self.check_local_reachable(repr, &name)?;
                repr.load_var(&mut self.ctx, &name)
            }
        }
    }

    pub fn store_name(&mut self, sym: SymbolId, value: &Value) -> CodegenResult<()> {
        let (name, owner_kind, owner) = self.symbol_info(sym);
        match owner_kind {
            ScopeKind::Module | ScopeKind::Builtin => {
                self.module.set_name(&mut self.ctx, &name, value)
            }
            ScopeKind::Class => {
                let ns = self.class_ns_for(owner).cloned().ok_or_else(|| {
                    CodegenError::Internal(format!("class namespace for '{}' not open", name))
                })?;
                mapping::dict_set_item_string(&mut self.ctx, &ns, &name, value)
            }
            ScopeKind::Function | ScopeKind::Comprehension => {
                let repr = self.funcs.last().ok_or_else(|| {
                    CodegenError::Internal(format!("local '{}' stored outside a function", name))
                })?;
                self.check_local_reachable(repr, &name)?;
                repr.store_var(&mut self.ctx, &name, value)
            }
        }
    }

    pub fn del_name(&mut self, sym: SymbolId) -> CodegenResult<()> {
        let (name, owner_kind, owner) = self.symbol_info(sym);
        match owner_kind {
            ScopeKind::Module | ScopeKind::Builtin => self.module.del_name(&mut self.ctx, &name),
            ScopeKind::Class => {
                let ns = self.class_ns_for(owner).cloned().ok_or_else(|| {
                    CodegenError::Internal(format!("class namespace for '{}' not open", name))
                })?;
                mapping::dict_del_item_string(&mut self.ctx, &ns, &name);
                Ok(())
            }
            ScopeKind::Function | ScopeKind::Comprehension => {
                let repr = self.funcs.last().ok_or_else(|| {
                    CodegenError::Internal(format!("local '{}' deleted outside a function", name))
                })?;
                self.check_local_reachable(repr, &name)?;
                repr.del_var(&mut self.ctx, &name)
            }
        }
    }

    /// A function-local access is only emittable inside that function's
    /// runner; reaching it from an intervening emission context (a class
    /// builder, for instance) is a resolver/codegen mismatch, never a
    /// silent miscompile.
    fn check_local_reachable(&self, repr: &FuncRepr, name: &str) -> CodegenResult<()> {
        if self.ctx.frame_ref().name != repr.runner_name {
            return Err(CodegenError::Internal(format!(
                "local '{}' of '{}' is not reachable from emission context '{}'",
                name,
                repr.name,
                self.ctx.frame_ref().name
            )));
        }
        Ok(())
    }

    fn symbol_info(&self, sym: SymbolId) -> (String, ScopeKind, ScopeId) {
        let symbol = self.resolution.table.symbol(sym);
        let owner = symbol.scope;
        (
            symbol.name.clone(),
            self.resolution.table.scope(owner).kind,
            owner,
        )
    }

    /// The symbol annotation for a name-bearing node.
    pub fn binding(&self, node: nacre_ast::NodeId) -> CodegenResult<SymbolId> {
        self.resolution
            .binding(node)
            .ok_or_else(|| CodegenError::Internal(format!("node {} was never resolved", node)))
    }

    /// Truth-test a value; returns the int slot to branch on.
    pub fn truth(&mut self, value: &Value) -> CodegenResult<String> {
        object::is_true(&mut self.ctx, value)
    }
}

/// Borrowed-to-owned load from an open class namespace dict.
fn ns_get(ctx: &mut EmitCtx, ns: &Value, name: &str) -> CodegenResult<Value> {
    use crate::cgen::CExpr;
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call(
            "NrDict_GetItemString",
            vec![CExpr::id(&ns.name), CExpr::StrConst(name.to_string())],
        ),
    ));
    ctx.fail_if_null(&out.name)?;
    ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&out.name)]));
    Ok(out)
}
