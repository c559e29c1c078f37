//! AST to IR lowering
//!
//! Lowers a resolved module into one [`Frame`] per function-like scope, then
//! slices each finished frame into its CFG. Expressions produce fresh
//! temporaries; `if` lowers to a two-target branch, loops to back-edge
//! jumps, and `try` arms except/finally labels that enclosed statements
//! consult. The IR is an analysis artifact: short-circuit evaluation and the
//! full non-local-exit protocol are restored by the code generation visitor,
//! which walks the resolved AST directly.

use crate::error::{CodegenError, CodegenResult};
use crate::ir::cfg::Cfg;
use crate::ir::frame::Frame;
use crate::ir::op::{Const, Op, Temp};
use crate::resolve::{Resolution, ScopeId, Storage, SymbolId};
use indexmap::IndexMap;
use nacre_ast as ast;
use nacre_ast::{Expr, Stmt};
use smallvec::SmallVec;
use tracing::debug;

/// The lowered IR for one source module: a frame (and its CFG) per
/// function-like scope, module frame first.
#[derive(Debug, Clone)]
pub struct IrModule {
    pub frames: IndexMap<String, Frame>,
    pub cfgs: IndexMap<String, Cfg>,
}

impl IrModule {
    pub fn frame(&self, name: &str) -> Option<&Frame> {
        self.frames.get(name)
    }

    pub fn cfg(&self, name: &str) -> Option<&Cfg> {
        self.cfgs.get(name)
    }
}

/// Labels armed by enclosing try statements, consulted by statements that
/// transfer control.
#[derive(Debug, Clone)]
enum IrFlowLabel {
    Except(String),
    Finally(String),
}

struct FrameCtx {
    frame: Frame,
    scope: ScopeId,
    loops: Vec<(String, String)>, // (continue target, break target)
    flow: Vec<IrFlowLabel>,
    cookies: u32,
}

pub struct Lowerer<'a> {
    resolution: &'a mut Resolution,
    frames: IndexMap<String, Frame>,
    stack: Vec<FrameCtx>,
    path: Vec<String>,
}

impl<'a> Lowerer<'a> {
    /// Lower a resolved module to frames and CFGs.
    pub fn lower_module(
        resolution: &'a mut Resolution,
        module: &ast::Module,
    ) -> CodegenResult<IrModule> {
        let mut lowerer = Lowerer {
            resolution,
            frames: IndexMap::new(),
            stack: Vec::new(),
            path: vec![module.name.clone()],
        };

        let scope = lowerer.resolution.module_scope;
        lowerer.push_frame(module.name.clone(), scope);
        for stmt in &module.body {
            lowerer.lower_stmt(stmt)?;
        }
        lowerer.emit(Op::Return { value: None });
        lowerer.pop_frame();

        let cfgs = lowerer
            .frames
            .iter()
            .map(|(name, frame)| (name.clone(), Cfg::build(frame)))
            .collect();
        debug!(frames = lowerer.frames.len(), "lowered module");
        Ok(IrModule {
            frames: lowerer.frames,
            cfgs,
        })
    }

    // ---- frame plumbing ---------------------------------------------------

    fn push_frame(&mut self, name: String, scope: ScopeId) {
        self.stack.push(FrameCtx {
            frame: Frame::new(name),
            scope,
            loops: Vec::new(),
            flow: Vec::new(),
            cookies: 0,
        });
    }

    fn pop_frame(&mut self) {
        let mut ctx = self.stack.pop().expect("frame stack underflow");
        ctx.frame.finish();
        self.frames.insert(ctx.frame.name.clone(), ctx.frame);
    }

    fn ctx(&mut self) -> &mut FrameCtx {
        self.stack.last_mut().expect("no active frame")
    }

    fn emit(&mut self, op: Op) {
        self.ctx().frame.push(op);
    }

    fn temp(&mut self) -> Temp {
        self.ctx().frame.temp()
    }

    /// Prepare a label for the next op, flushing any label still pending
    /// from an inner construct onto a Nop first.
    fn place_label(&mut self, label: String) {
        let frame = &mut self.ctx().frame;
        if frame.has_pending_label() {
            frame.push(Op::Nop);
        }
        frame.prepare_label(label);
    }

    fn label(&mut self, base: &str) -> String {
        let scope = self.ctx().scope;
        self.resolution.table.scope_mut(scope).next_label(base)
    }

    /// Unique frame name for a nested scope.
    fn frame_name(&self, name: &str, scope: ScopeId) -> String {
        let base = self.path.join(".");
        if name.starts_with('<') {
            format!("{}.{}${}", base, name, scope.0)
        } else {
            format!("{}.{}", base, name)
        }
    }

    fn binding_of(&self, node: ast::NodeId, what: &str) -> CodegenResult<SymbolId> {
        self.resolution
            .binding(node)
            .ok_or_else(|| CodegenError::Internal(format!("unresolved {} node {}", what, node)))
    }

    fn scope_of(&self, node: ast::NodeId, what: &str) -> CodegenResult<ScopeId> {
        self.resolution
            .scope_of(node)
            .ok_or_else(|| CodegenError::Internal(format!("{} node {} has no scope", what, node)))
    }

    // ---- name access ------------------------------------------------------

    fn load_symbol(&mut self, symbol: SymbolId) -> Temp {
        let target = self.temp();
        let op = match self.storage_kind(symbol) {
            Storage::StackSlot | Storage::SharedCell => Op::LoadLocal { target, symbol },
            Storage::Namespace => Op::LoadGlobal { target, symbol },
        };
        self.emit(op);
        target
    }

    fn store_symbol(&mut self, symbol: SymbolId, value: Temp) {
        let op = match self.storage_kind(symbol) {
            Storage::StackSlot | Storage::SharedCell => Op::StoreLocal { symbol, value },
            Storage::Namespace => Op::StoreGlobal { symbol, value },
        };
        self.emit(op);
    }

    fn storage_kind(&self, symbol: SymbolId) -> Storage {
        self.resolution.table.storage(symbol)
    }

    /// The innermost armed except/finally label, consulted by raises.
    fn current_handler_label(&mut self) -> Option<String> {
        self.ctx().flow.iter().rev().find_map(|label| match label {
            IrFlowLabel::Except(l) | IrFlowLabel::Finally(l) => Some(l.clone()),
        })
    }

    // ---- statements -------------------------------------------------------

    fn lower_block(&mut self, body: &[Stmt]) -> CodegenResult<()> {
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> CodegenResult<()> {
        match stmt {
            Stmt::Expr(s) => {
                self.lower_expr(&s.value)?;
                Ok(())
            }
            Stmt::Assign(s) => {
                let value = self.lower_expr(&s.value)?;
                for target in &s.targets {
                    self.lower_store(target, value)?;
                }
                Ok(())
            }
            Stmt::AugAssign(s) => {
                let current = self.lower_expr(&s.target)?;
                let rhs = self.lower_expr(&s.value)?;
                let target = self.temp();
                self.emit(Op::Binary {
                    target,
                    op: s.op,
                    left: current,
                    right: rhs,
                });
                self.lower_store(&s.target, target)
            }
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.lower_delete(target)?;
                }
                Ok(())
            }
            Stmt::Return(s) => {
                let value = match &s.value {
                    Some(expr) => Some(self.lower_expr(expr)?),
                    None => None,
                };
                self.emit(Op::Return { value });
                Ok(())
            }
            Stmt::Pass(_) => Ok(()),
            Stmt::Break(s) => {
                let target = self
                    .ctx()
                    .loops
                    .last()
                    .map(|(_, brk)| brk.clone())
                    .ok_or_else(|| {
                        CodegenError::InvalidScope(format!("break outside loop at {:?}", s.span))
                    })?;
                self.emit(Op::Jump { label: target });
                Ok(())
            }
            Stmt::Continue(s) => {
                let target = self
                    .ctx()
                    .loops
                    .last()
                    .map(|(cont, _)| cont.clone())
                    .ok_or_else(|| {
                        CodegenError::InvalidScope(format!("continue outside loop at {:?}", s.span))
                    })?;
                self.emit(Op::Jump { label: target });
                Ok(())
            }
            Stmt::If(s) => self.lower_if(s),
            Stmt::While(s) => self.lower_while(s),
            Stmt::For(s) => self.lower_for(s),
            Stmt::With(s) => self.lower_with(s),
            Stmt::Raise(s) => {
                let exc = match &s.exc {
                    Some(expr) => Some(self.lower_expr(expr)?),
                    None => None,
                };
                let handler = self.current_handler_label();
                self.emit(Op::Raise { exc, handler });
                Ok(())
            }
            Stmt::Try(s) => self.lower_try(s),
            Stmt::Assert(s) => self.lower_assert(s),
            Stmt::Import(s) => {
                for alias in &s.names {
                    let target = self.temp();
                    self.emit(Op::ImportName {
                        target,
                        module: alias.name.clone(),
                    });
                    let symbol = self.binding_of(alias.node_id, "import alias")?;
                    self.store_symbol(symbol, target);
                }
                Ok(())
            }
            Stmt::ImportFrom(s) => {
                let module = self.temp();
                self.emit(Op::ImportName {
                    target: module,
                    module: s.module.clone(),
                });
                for alias in &s.names {
                    let target = self.temp();
                    self.emit(Op::LoadAttr {
                        target,
                        object: module,
                        attr: alias.name.clone(),
                    });
                    let symbol = self.binding_of(alias.node_id, "import alias")?;
                    self.store_symbol(symbol, target);
                }
                Ok(())
            }
            Stmt::Global(_) | Stmt::Nonlocal(_) => Ok(()),
            Stmt::FuncDef(s) => {
                let scope = self.scope_of(s.node_id, "funcdef")?;
                self.lower_function_body(&s.name, scope, &s.body)?;
                let target = self.temp();
                self.emit(Op::MakeFunction { target, scope });
                let symbol = self.binding_of(s.node_id, "funcdef")?;
                self.store_symbol(symbol, target);
                Ok(())
            }
            Stmt::ClassDef(s) => {
                let scope = self.scope_of(s.node_id, "classdef")?;
                self.lower_function_body(&s.name, scope, &s.body)?;
                let target = self.temp();
                self.emit(Op::MakeFunction { target, scope });
                let symbol = self.binding_of(s.node_id, "classdef")?;
                self.store_symbol(symbol, target);
                Ok(())
            }
        }
    }

    /// Lower a nested scope's body into its own frame.
    fn lower_function_body(
        &mut self,
        name: &str,
        scope: ScopeId,
        body: &[Stmt],
    ) -> CodegenResult<()> {
        let frame_name = self.frame_name(name, scope);
        self.path.push(name.to_string());
        self.push_frame(frame_name, scope);
        self.lower_block(body)?;
        self.emit(Op::Return { value: None });
        self.pop_frame();
        self.path.pop();
        Ok(())
    }

    fn lower_if(&mut self, s: &ast::IfStmt) -> CodegenResult<()> {
        let test = self.lower_expr(&s.test)?;
        let then_label = self.label("iftrue");
        let end_label = self.label("ifend");
        let else_label = if s.orelse.is_empty() {
            end_label.clone()
        } else {
            self.label("iffalse")
        };

        self.emit(Op::Branch {
            test,
            true_label: then_label.clone(),
            false_label: else_label.clone(),
        });
        self.place_label(then_label);
        self.lower_block(&s.body)?;
        self.emit(Op::Jump {
            label: end_label.clone(),
        });
        if !s.orelse.is_empty() {
            self.place_label(else_label);
            self.lower_block(&s.orelse)?;
        }
        self.place_label(end_label);
        Ok(())
    }

    fn lower_while(&mut self, s: &ast::WhileStmt) -> CodegenResult<()> {
        let test_label = self.label("whiletest");
        let body_label = self.label("whilebody");
        let end_label = self.label("whileend");
        let exit_label = if s.orelse.is_empty() {
            end_label.clone()
        } else {
            self.label("whileelse")
        };

        self.place_label(test_label.clone());
        let test = self.lower_expr(&s.test)?;
        self.emit(Op::Branch {
            test,
            true_label: body_label.clone(),
            false_label: exit_label.clone(),
        });
        self.place_label(body_label);
        self.ctx()
            .loops
            .push((test_label.clone(), end_label.clone()));
        self.lower_block(&s.body)?;
        self.ctx().loops.pop();
        self.emit(Op::Jump { label: test_label });
        if !s.orelse.is_empty() {
            self.place_label(exit_label);
            self.lower_block(&s.orelse)?;
        }
        self.place_label(end_label);
        Ok(())
    }

    fn lower_for(&mut self, s: &ast::ForStmt) -> CodegenResult<()> {
        let iterable = self.lower_expr(&s.iter)?;
        let iter = self.temp();
        self.emit(Op::GetIter {
            target: iter,
            iterable,
        });

        let next_label = self.label("fornext");
        let end_label = self.label("forend");
        let exit_label = if s.orelse.is_empty() {
            end_label.clone()
        } else {
            self.label("forelse")
        };

        self.place_label(next_label.clone());
        let item = self.temp();
        self.emit(Op::IterNext {
            target: item,
            iter,
            done_label: exit_label.clone(),
        });
        self.lower_store(&s.target, item)?;
        self.ctx()
            .loops
            .push((next_label.clone(), end_label.clone()));
        self.lower_block(&s.body)?;
        self.ctx().loops.pop();
        self.emit(Op::Jump { label: next_label });
        if !s.orelse.is_empty() {
            self.place_label(exit_label);
            self.lower_block(&s.orelse)?;
        }
        self.place_label(end_label);
        Ok(())
    }

    fn lower_with(&mut self, s: &ast::WithStmt) -> CodegenResult<()> {
        // nested items desugar innermost-last
        self.lower_with_items(&s.items, &s.body)
    }

    fn lower_with_items(&mut self, items: &[ast::WithItem], body: &[Stmt]) -> CodegenResult<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.lower_block(body);
        };

        let manager = self.lower_expr(&item.context_expr)?;
        let enter = self.temp();
        self.emit(Op::LoadAttr {
            target: enter,
            object: manager,
            attr: "__enter__".to_string(),
        });
        let entered = self.temp();
        self.emit(Op::Call {
            target: entered,
            func: enter,
            args: SmallVec::new(),
            keywords: Vec::new(),
            stararg: None,
            kwarg: None,
        });
        if let Some(vars) = &item.optional_vars {
            self.lower_store(vars, entered)?;
        }

        let exit_label = self.label("withexit");
        self.emit(Op::SetupFinally {
            label: exit_label.clone(),
        });
        self.ctx().flow.push(IrFlowLabel::Finally(exit_label.clone()));
        self.lower_with_items(rest, body)?;
        self.ctx().flow.pop();

        self.place_label(exit_label);
        let exit = self.temp();
        self.emit(Op::LoadAttr {
            target: exit,
            object: manager,
            attr: "__exit__".to_string(),
        });
        let suppressed = self.temp();
        self.emit(Op::Call {
            target: suppressed,
            func: exit,
            args: SmallVec::new(),
            keywords: Vec::new(),
            stararg: None,
            kwarg: None,
        });
        self.emit(Op::EndFinally);
        Ok(())
    }

    fn lower_try(&mut self, s: &ast::TryStmt) -> CodegenResult<()> {
        let has_finally = !s.finalbody.is_empty();
        let has_handlers = !s.handlers.is_empty();
        let end_label = self.label("tryend");
        let finally_label = self.label("finally");
        let except_label = self.label("except");
        let after_body = if has_finally {
            finally_label.clone()
        } else {
            end_label.clone()
        };

        if has_finally {
            self.emit(Op::SetupFinally {
                label: finally_label.clone(),
            });
            self.ctx()
                .flow
                .push(IrFlowLabel::Finally(finally_label.clone()));
        }
        if has_handlers {
            self.emit(Op::SetupExcept {
                label: except_label.clone(),
            });
            self.ctx()
                .flow
                .push(IrFlowLabel::Except(except_label.clone()));
        }

        self.lower_block(&s.body)?;

        if has_handlers {
            self.emit(Op::EndExcept);
            self.ctx().flow.pop();
        }
        // the else clause runs only when the body fell through cleanly
        self.lower_block(&s.orelse)?;
        self.emit(Op::Jump {
            label: after_body.clone(),
        });

        if has_handlers {
            let cookie = self.ctx().cookies;
            self.ctx().cookies += 1;

            self.place_label(except_label);
            self.emit(Op::SaveException { cookie });

            let fail_label = self.label("tryfail");
            for (index, handler) in s.handlers.iter().enumerate() {
                let body_label = self.label("exh");
                let next_label = if index + 1 < s.handlers.len() {
                    self.label("exm")
                } else {
                    fail_label.clone()
                };
                match &handler.typ {
                    Some(typ) => {
                        let exc_type = self.lower_expr(typ)?;
                        let matched = self.temp();
                        self.emit(Op::ExceptMatch {
                            target: matched,
                            exc_type,
                        });
                        self.emit(Op::Branch {
                            test: matched,
                            true_label: body_label.clone(),
                            false_label: next_label.clone(),
                        });
                    }
                    None => {
                        // bare except matches anything
                        self.emit(Op::Jump {
                            label: body_label.clone(),
                        });
                    }
                }
                self.place_label(body_label);
                if handler.name.is_some() {
                    let symbol = self.binding_of(handler.node_id, "except handler")?;
                    let value = self.temp();
                    self.emit(Op::LoadConst {
                        target: value,
                        value: Const::None,
                    });
                    // bound to the normalized exception value at emission time
                    self.store_symbol(symbol, value);
                }
                self.lower_block(&handler.body)?;
                self.emit(Op::Jump {
                    label: after_body.clone(),
                });
                if index + 1 < s.handlers.len() {
                    self.place_label(next_label);
                }
            }

            // no handler matched: restore and propagate
            self.place_label(fail_label);
            self.emit(Op::RestoreException { cookie });
            let handler = self.current_handler_label();
            self.emit(Op::Raise { exc: None, handler });
        }

        if has_finally {
            self.ctx().flow.pop();
            self.place_label(finally_label);
            self.lower_block(&s.finalbody)?;
            self.emit(Op::EndFinally);
        }
        self.place_label(end_label);
        Ok(())
    }

    fn lower_assert(&mut self, s: &ast::AssertStmt) -> CodegenResult<()> {
        let test = self.lower_expr(&s.test)?;
        let pass_label = self.label("assertok");
        let fail_label = self.label("assertfail");
        self.emit(Op::Branch {
            test,
            true_label: pass_label.clone(),
            false_label: fail_label.clone(),
        });
        self.place_label(fail_label);
        let exc = match &s.msg {
            Some(msg) => Some(self.lower_expr(msg)?),
            None => None,
        };
        let handler = self.current_handler_label();
        self.emit(Op::Raise { exc, handler });
        self.place_label(pass_label);
        Ok(())
    }

    // ---- stores and deletes ----------------------------------------------

    fn lower_store(&mut self, target: &Expr, value: Temp) -> CodegenResult<()> {
        match target {
            Expr::Name(name) => {
                let symbol = self.binding_of(name.node_id, "store target")?;
                self.store_symbol(symbol, value);
                Ok(())
            }
            Expr::Tuple(t) => self.lower_unpack(&t.elts, value),
            Expr::List(l) => self.lower_unpack(&l.elts, value),
            Expr::Attribute(a) => {
                let object = self.lower_expr(&a.value)?;
                self.emit(Op::StoreAttr {
                    object,
                    attr: a.attr.clone(),
                    value,
                });
                Ok(())
            }
            Expr::Subscript(sub) => {
                let object = self.lower_expr(&sub.value)?;
                let index = self.lower_slice(&sub.slice)?;
                self.emit(Op::StoreItem {
                    object,
                    index,
                    value,
                });
                Ok(())
            }
            Expr::Starred(star) => self.lower_store(&star.value, value),
            other => Err(CodegenError::Internal(format!(
                "invalid assignment target at {:?}",
                other.span()
            ))),
        }
    }

    fn lower_unpack(&mut self, elts: &[Expr], value: Temp) -> CodegenResult<()> {
        for (i, elt) in elts.iter().enumerate() {
            let index = self.temp();
            self.emit(Op::LoadConst {
                target: index,
                value: Const::Int(i as i64),
            });
            let item = self.temp();
            self.emit(Op::LoadItem {
                target: item,
                object: value,
                index,
            });
            self.lower_store(elt, item)?;
        }
        Ok(())
    }

    fn lower_delete(&mut self, target: &Expr) -> CodegenResult<()> {
        match target {
            Expr::Name(name) => {
                let symbol = self.binding_of(name.node_id, "delete target")?;
                self.emit(Op::DeleteLocal { symbol });
                Ok(())
            }
            Expr::Attribute(a) => {
                let object = self.lower_expr(&a.value)?;
                self.emit(Op::DeleteAttr {
                    object,
                    attr: a.attr.clone(),
                });
                Ok(())
            }
            Expr::Subscript(sub) => {
                let object = self.lower_expr(&sub.value)?;
                let index = self.lower_slice(&sub.slice)?;
                self.emit(Op::DeleteItem { object, index });
                Ok(())
            }
            other => Err(CodegenError::Internal(format!(
                "invalid delete target at {:?}",
                other.span()
            ))),
        }
    }

    // ---- expressions ------------------------------------------------------

    fn lower_expr(&mut self, expr: &Expr) -> CodegenResult<Temp> {
        match expr {
            Expr::Num(n) => {
                let value = match &n.value {
                    ast::Number::Int(v) => Const::Int(*v),
                    ast::Number::Float(v) => Const::Float(*v),
                };
                self.lower_const(value)
            }
            Expr::Str(s) => self.lower_const(Const::Str(s.value.clone())),
            Expr::Bytes(b) => self.lower_const(Const::Bytes(b.value.clone())),
            Expr::NameConstant(c) => {
                let value = match c.value {
                    ast::Singleton::True => Const::Bool(true),
                    ast::Singleton::False => Const::Bool(false),
                    ast::Singleton::None => Const::None,
                };
                self.lower_const(value)
            }
            Expr::Name(name) => {
                let symbol = self.binding_of(name.node_id, "name")?;
                Ok(self.load_symbol(symbol))
            }
            Expr::BinOp(e) => {
                let left = self.lower_expr(&e.left)?;
                let right = self.lower_expr(&e.right)?;
                let target = self.temp();
                self.emit(Op::Binary {
                    target,
                    op: e.op,
                    left,
                    right,
                });
                Ok(target)
            }
            Expr::UnaryOp(e) => {
                let operand = self.lower_expr(&e.operand)?;
                let target = self.temp();
                self.emit(Op::Unary {
                    target,
                    op: e.op,
                    operand,
                });
                Ok(target)
            }
            Expr::BoolOp(e) => {
                let mut values = SmallVec::new();
                for value in &e.values {
                    values.push(self.lower_expr(value)?);
                }
                let target = self.temp();
                self.emit(Op::BoolJoin {
                    target,
                    op: e.op,
                    values,
                });
                Ok(target)
            }
            Expr::Compare(e) => {
                let mut left = self.lower_expr(&e.left)?;
                let mut results: SmallVec<[Temp; 4]> = SmallVec::new();
                for (op, comparator) in e.ops.iter().zip(&e.comparators) {
                    let right = self.lower_expr(comparator)?;
                    let target = self.temp();
                    self.emit(Op::Compare {
                        target,
                        op: *op,
                        left,
                        right,
                    });
                    results.push(target);
                    left = right;
                }
                if results.len() == 1 {
                    Ok(results[0])
                } else {
                    let target = self.temp();
                    self.emit(Op::BoolJoin {
                        target,
                        op: ast::BoolOpKind::And,
                        values: results,
                    });
                    Ok(target)
                }
            }
            Expr::Call(e) => {
                let func = self.lower_expr(&e.func)?;
                let mut args = SmallVec::new();
                for arg in &e.args {
                    args.push(self.lower_expr(arg)?);
                }
                let mut keywords = Vec::new();
                for kw in &e.keywords {
                    keywords.push((kw.arg.clone(), self.lower_expr(&kw.value)?));
                }
                let stararg = match &e.starargs {
                    Some(expr) => Some(self.lower_expr(expr)?),
                    None => None,
                };
                let kwarg = match &e.kwargs {
                    Some(expr) => Some(self.lower_expr(expr)?),
                    None => None,
                };
                let target = self.temp();
                self.emit(Op::Call {
                    target,
                    func,
                    args,
                    keywords,
                    stararg,
                    kwarg,
                });
                Ok(target)
            }
            Expr::Attribute(e) => {
                let object = self.lower_expr(&e.value)?;
                let target = self.temp();
                self.emit(Op::LoadAttr {
                    target,
                    object,
                    attr: e.attr.clone(),
                });
                Ok(target)
            }
            Expr::Subscript(e) => {
                let object = self.lower_expr(&e.value)?;
                let index = self.lower_slice(&e.slice)?;
                let target = self.temp();
                self.emit(Op::LoadItem {
                    target,
                    object,
                    index,
                });
                Ok(target)
            }
            Expr::Starred(e) => self.lower_expr(&e.value),
            Expr::List(e) => self.lower_build(&e.elts, BuildKind::List),
            Expr::Tuple(e) => self.lower_build(&e.elts, BuildKind::Tuple),
            Expr::Set(e) => self.lower_build(&e.elts, BuildKind::Set),
            Expr::Dict(e) => {
                let mut keys = SmallVec::new();
                let mut values = SmallVec::new();
                for key in &e.keys {
                    keys.push(self.lower_expr(key)?);
                }
                for value in &e.values {
                    values.push(self.lower_expr(value)?);
                }
                let target = self.temp();
                self.emit(Op::BuildDict {
                    target,
                    keys,
                    values,
                });
                Ok(target)
            }
            Expr::Lambda(e) => {
                let scope = self.scope_of(e.node_id, "lambda")?;
                let frame_name = self.frame_name("<lambda>", scope);
                self.path.push("<lambda>".to_string());
                self.push_frame(frame_name, scope);
                let result = self.lower_expr(&e.body)?;
                self.emit(Op::Return {
                    value: Some(result),
                });
                self.pop_frame();
                self.path.pop();

                let target = self.temp();
                self.emit(Op::MakeFunction { target, scope });
                Ok(target)
            }
            Expr::IfExp(e) => {
                let test = self.lower_expr(&e.test)?;
                let then_value = self.lower_expr(&e.body)?;
                let else_value = self.lower_expr(&e.orelse)?;
                let target = self.temp();
                self.emit(Op::Select {
                    target,
                    test,
                    then_value,
                    else_value,
                });
                Ok(target)
            }
            Expr::ListComp(e) => {
                self.lower_comprehension("<listcomp>", e.node_id, &e.generators, CompKind::List {
                    elt: &e.elt,
                })
            }
            Expr::SetComp(e) => {
                self.lower_comprehension("<setcomp>", e.node_id, &e.generators, CompKind::Set {
                    elt: &e.elt,
                })
            }
            Expr::DictComp(e) => self.lower_comprehension(
                "<dictcomp>",
                e.node_id,
                &e.generators,
                CompKind::Dict {
                    key: &e.key,
                    value: &e.value,
                },
            ),
            Expr::GeneratorExp(e) => self.lower_comprehension(
                "<genexpr>",
                e.node_id,
                &e.generators,
                CompKind::Generator { elt: &e.elt },
            ),
            Expr::Yield(e) => {
                let value = match &e.value {
                    Some(expr) => self.lower_expr(expr)?,
                    None => self.lower_const(Const::None)?,
                };
                let target = self.temp();
                self.emit(Op::Yield { target, value });
                Ok(target)
            }
        }
    }

    fn lower_const(&mut self, value: Const) -> CodegenResult<Temp> {
        let target = self.temp();
        self.emit(Op::LoadConst { target, value });
        Ok(target)
    }

    fn lower_build(&mut self, elts: &[Expr], kind: BuildKind) -> CodegenResult<Temp> {
        let mut items = SmallVec::new();
        for elt in elts {
            items.push(self.lower_expr(elt)?);
        }
        let target = self.temp();
        let op = match kind {
            BuildKind::List => Op::BuildList { target, items },
            BuildKind::Tuple => Op::BuildTuple { target, items },
            BuildKind::Set => Op::BuildSet { target, items },
        };
        self.emit(op);
        Ok(target)
    }

    fn lower_slice(&mut self, slice: &ast::Slice) -> CodegenResult<Temp> {
        match slice {
            ast::Slice::Index(expr) => self.lower_expr(expr),
            ast::Slice::Range { lower, upper, step } => {
                let mut items = SmallVec::new();
                for part in [lower, upper, step] {
                    let temp = match part {
                        Some(expr) => self.lower_expr(expr)?,
                        None => self.lower_const(Const::None)?,
                    };
                    items.push(temp);
                }
                let target = self.temp();
                self.emit(Op::BuildTuple { target, items });
                Ok(target)
            }
        }
    }

    /// Lower a comprehension to a dedicated frame plus a make-and-call in the
    /// current frame.
    fn lower_comprehension(
        &mut self,
        name: &str,
        node_id: ast::NodeId,
        generators: &[ast::Comprehension],
        kind: CompKind<'_>,
    ) -> CodegenResult<Temp> {
        let scope = self.scope_of(node_id, "comprehension")?;
        let frame_name = self.frame_name(name, scope);
        self.path.push(name.to_string());
        self.push_frame(frame_name, scope);

        let container = match kind {
            CompKind::List { .. } => {
                let target = self.temp();
                self.emit(Op::BuildList {
                    target,
                    items: SmallVec::new(),
                });
                Some(target)
            }
            CompKind::Set { .. } => {
                let target = self.temp();
                self.emit(Op::BuildSet {
                    target,
                    items: SmallVec::new(),
                });
                Some(target)
            }
            CompKind::Dict { .. } => {
                let target = self.temp();
                self.emit(Op::BuildDict {
                    target,
                    keys: SmallVec::new(),
                    values: SmallVec::new(),
                });
                Some(target)
            }
            CompKind::Generator { .. } => None,
        };

        self.lower_comp_level(generators, 0, &kind, container)?;
        self.emit(Op::Return { value: container });
        self.pop_frame();
        self.path.pop();

        let func = self.temp();
        self.emit(Op::MakeFunction {
            target: func,
            scope,
        });
        let target = self.temp();
        self.emit(Op::Call {
            target,
            func,
            args: SmallVec::new(),
            keywords: Vec::new(),
            stararg: None,
            kwarg: None,
        });
        Ok(target)
    }

    fn lower_comp_level(
        &mut self,
        generators: &[ast::Comprehension],
        depth: usize,
        kind: &CompKind<'_>,
        container: Option<Temp>,
    ) -> CodegenResult<()> {
        let Some(generator) = generators.get(depth) else {
            // innermost level: produce one element
            match kind {
                CompKind::List { elt } | CompKind::Set { elt } => {
                    let method = if matches!(kind, CompKind::List { .. }) {
                        "append"
                    } else {
                        "add"
                    };
                    let value = self.lower_expr(elt)?;
                    let container = container
                        .ok_or_else(|| CodegenError::Internal("missing container".into()))?;
                    let append = self.temp();
                    self.emit(Op::LoadAttr {
                        target: append,
                        object: container,
                        attr: method.to_string(),
                    });
                    let discard = self.temp();
                    self.emit(Op::Call {
                        target: discard,
                        func: append,
                        args: SmallVec::from_slice(&[value]),
                        keywords: Vec::new(),
                        stararg: None,
                        kwarg: None,
                    });
                }
                CompKind::Dict { key, value } => {
                    let k = self.lower_expr(key)?;
                    let v = self.lower_expr(value)?;
                    let container = container
                        .ok_or_else(|| CodegenError::Internal("missing container".into()))?;
                    self.emit(Op::StoreItem {
                        object: container,
                        index: k,
                        value: v,
                    });
                }
                CompKind::Generator { elt } => {
                    let value = self.lower_expr(elt)?;
                    let target = self.temp();
                    self.emit(Op::Yield { target, value });
                }
            }
            return Ok(());
        };

        let iterable = self.lower_expr(&generator.iter)?;
        let iter = self.temp();
        self.emit(Op::GetIter {
            target: iter,
            iterable,
        });
        let next_label = self.label("compnext");
        let end_label = self.label("compend");
        self.place_label(next_label.clone());
        let item = self.temp();
        self.emit(Op::IterNext {
            target: item,
            iter,
            done_label: end_label.clone(),
        });
        self.lower_store(&generator.target, item)?;

        // guard conditions: failing any jumps back to the next iteration
        for cond in &generator.ifs {
            let test = self.lower_expr(cond)?;
            let keep_label = self.label("compif");
            self.emit(Op::Branch {
                test,
                true_label: keep_label.clone(),
                false_label: next_label.clone(),
            });
            self.place_label(keep_label);
        }

        self.lower_comp_level(generators, depth + 1, kind, container)?;
        self.emit(Op::Jump { label: next_label });
        self.place_label(end_label);
        Ok(())
    }
}

enum BuildKind {
    List,
    Tuple,
    Set,
}

enum CompKind<'e> {
    List { elt: &'e Expr },
    Set { elt: &'e Expr },
    Dict { key: &'e Expr, value: &'e Expr },
    Generator { elt: &'e Expr },
}
