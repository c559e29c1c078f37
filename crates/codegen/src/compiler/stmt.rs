//! Statement emission
//!
//! Loops and conditionals compile to labels and gotos in the current
//! function body; try/except, try/finally, and with statements build on the
//! flow-control stack in `flow.rs`. Every loop is label-based so that
//! break/continue can run intervening cleanup before leaving.

use crate::cgen::{CBlock, CExpr, CStmt, CType};
use crate::compiler::flow::{CleanupFrame, FlowLabel};
use crate::compiler::Visitor;
use crate::error::{CodegenError, CodegenResult};
use crate::values::{number, object, sequence, Value};
use nacre_ast as ast;
use nacre_ast::{Expr, Stmt};

impl Visitor<'_> {
    pub fn visit_block(&mut self, body: &[Stmt]) -> CodegenResult<()> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    pub fn visit_stmt(&mut self, stmt: &Stmt) -> CodegenResult<()> {
        match stmt {
            Stmt::Expr(s) => {
                self.visit_expr(&s.value)?;
                Ok(())
            }
            Stmt::Assign(s) => {
                let value = self.visit_expr(&s.value)?;
                for target in &s.targets {
                    self.emit_store(target, &value)?;
                }
                Ok(())
            }
            Stmt::AugAssign(s) => {
                let current = self.visit_expr(&s.target)?;
                let rhs = self.visit_expr(&s.value)?;
                let result = object::inplace_binop(&mut self.ctx, s.op, &current, &rhs)?;
                self.emit_store(&s.target, &result)
            }
            Stmt::Delete(s) => {
                for target in &s.targets {
                    self.emit_delete(target)?;
                }
                Ok(())
            }
            Stmt::Return(s) => {
                let value = match &s.value {
                    Some(expr) => self.visit_expr(expr)?,
                    None => number::none(&mut self.ctx),
                };
                self.emit_return_value(&value)
            }
            Stmt::Pass(_) => Ok(()),
            Stmt::Break(_) => self.ctx.emit_loop_exit(true),
            Stmt::Continue(_) => self.ctx.emit_loop_exit(false),
            Stmt::If(s) => self.visit_if(s),
            Stmt::While(s) => self.visit_while(s),
            Stmt::For(s) => {
                let iterable = self.visit_expr(&s.iter)?;
                let orelse = if s.orelse.is_empty() {
                    None
                } else {
                    Some(s.orelse.as_slice())
                };
                self.emit_for_loop(&s.target, &iterable, orelse, |visitor| {
                    visitor.visit_block(&s.body)
                })
            }
            Stmt::With(s) => self.visit_with(&s.items, &s.body),
            Stmt::Raise(s) => self.visit_raise(s),
            Stmt::Try(s) => self.visit_try(s),
            Stmt::Assert(s) => self.visit_assert(s),
            Stmt::Import(s) => self.visit_import(s),
            Stmt::ImportFrom(s) => self.visit_import_from(s),
            Stmt::Global(_) | Stmt::Nonlocal(_) => Ok(()),
            Stmt::FuncDef(s) => self.visit_funcdef(s),
            Stmt::ClassDef(s) => self.visit_classdef(s),
        }
    }

    // ---- assignment targets ----------------------------------------------

    pub fn emit_store(&mut self, target: &Expr, value: &Value) -> CodegenResult<()> {
        match target {
            Expr::Name(name) => {
                let sym = self.binding(name.node_id)?;
                self.store_name(sym, value)
            }
            Expr::Attribute(a) => {
                let object_value = self.visit_expr(&a.value)?;
                object::set_attr(&mut self.ctx, &object_value, &a.attr, value)
            }
            Expr::Subscript(sub) => {
                let object_value = self.visit_expr(&sub.value)?;
                let index = self.visit_slice(&sub.slice)?;
                object::set_item(&mut self.ctx, &object_value, &index, value)
            }
            Expr::Tuple(t) => self.emit_unpack(&t.elts, value),
            Expr::List(l) => self.emit_unpack(&l.elts, value),
            Expr::Starred(star) => self.emit_store(&star.value, value),
            other => Err(CodegenError::Internal(format!(
                "invalid assignment target at {:?}",
                other.span()
            ))),
        }
    }

    fn emit_unpack(&mut self, elts: &[Expr], value: &Value) -> CodegenResult<()> {
        for (index, elt) in elts.iter().enumerate() {
            let key = number::new_int(&mut self.ctx, index as i64)?;
            let item = object::get_item(&mut self.ctx, value, &key)?;
            self.emit_store(elt, &item)?;
        }
        Ok(())
    }

    fn emit_delete(&mut self, target: &Expr) -> CodegenResult<()> {
        match target {
            Expr::Name(name) => {
                let sym = self.binding(name.node_id)?;
                self.del_name(sym)
            }
            Expr::Attribute(a) => {
                let object_value = self.visit_expr(&a.value)?;
                object::del_attr(&mut self.ctx, &object_value, &a.attr)
            }
            Expr::Subscript(sub) => {
                let object_value = self.visit_expr(&sub.value)?;
                let index = self.visit_slice(&sub.slice)?;
                object::del_item(&mut self.ctx, &object_value, &index)
            }
            other => Err(CodegenError::Internal(format!(
                "invalid delete target at {:?}",
                other.span()
            ))),
        }
    }

    // ---- return ----------------------------------------------------------

    /// Set the return slot and unwind through any pending cleanup to the end
    /// label. In a generator this is an exhaustion point: the end label
    /// clears the resume sentinel instead of returning a value.
    pub fn emit_return_value(&mut self, value: &Value) -> CodegenResult<()> {
        let is_generator = self.current_func().is_some_and(|r| r.is_generator);
        if !is_generator {
            self.ctx.add_expr(CExpr::call(
                "Nr_XDecRef",
                vec![CExpr::id("__return_value__")],
            ));
            self.ctx.add_expr(CExpr::assign_id(
                "__return_value__",
                CExpr::id(&value.name),
            ));
            self.ctx.add_expr(CExpr::call(
                "Nr_IncRef",
                vec![CExpr::id("__return_value__")],
            ));
        }
        self.ctx.emit_return_path()
    }

    // ---- conditionals and loops ------------------------------------------

    fn visit_if(&mut self, s: &ast::IfStmt) -> CodegenResult<()> {
        let test = self.visit_expr(&s.test)?;
        let truth = self.truth(&test)?;
        let else_label = self.label("ifelse");
        let end_label = self.label("ifend");

        let mut skip = CBlock::new();
        skip.add(CStmt::Goto(if s.orelse.is_empty() {
            end_label.clone()
        } else {
            else_label.clone()
        }));
        self.ctx.add(CStmt::If {
            cond: CExpr::binary("==", CExpr::IntConst(0), CExpr::id(&truth)),
            then_block: skip,
            else_block: None,
        });

        self.visit_block(&s.body)?;
        if !s.orelse.is_empty() {
            self.ctx.add(CStmt::Goto(end_label.clone()));
            self.ctx.add(CStmt::Label(else_label));
            self.visit_block(&s.orelse)?;
        }
        self.ctx.add(CStmt::Label(end_label));
        Ok(())
    }

    fn visit_while(&mut self, s: &ast::WhileStmt) -> CodegenResult<()> {
        let test_label = self.label("whiletest");
        let end_label = self.label("whileend");
        let else_label = if s.orelse.is_empty() {
            end_label.clone()
        } else {
            self.label("whileelse")
        };

        self.ctx.add(CStmt::Label(test_label.clone()));
        let test = self.visit_expr(&s.test)?;
        let truth = self.truth(&test)?;
        let mut leave = CBlock::new();
        leave.add(CStmt::Goto(else_label.clone()));
        self.ctx.add(CStmt::If {
            cond: CExpr::binary("==", CExpr::IntConst(0), CExpr::id(&truth)),
            then_block: leave,
            else_block: None,
        });

        self.ctx.push_flow(FlowLabel::Loop {
            break_label: end_label.clone(),
            continue_label: test_label.clone(),
        });
        self.visit_block(&s.body)?;
        self.ctx.pop_flow();
        self.ctx.add(CStmt::Goto(test_label));

        if !s.orelse.is_empty() {
            // runs only when the loop exits without break
            self.ctx.add(CStmt::Label(else_label));
            self.visit_block(&s.orelse)?;
        }
        self.ctx.add(CStmt::Label(end_label));
        Ok(())
    }

    /// Shared loop shape for `for` statements and comprehension levels:
    /// fetch the iterator, advance one slot per iteration, distinguish
    /// exhaustion from error on the null result.
    pub fn emit_for_loop<F>(
        &mut self,
        target: &Expr,
        iterable: &Value,
        orelse: Option<&[Stmt]>,
        body: F,
    ) -> CodegenResult<()>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        let iter = object::get_iter(&mut self.ctx, iterable)?;
        let next_label = self.label("fornext");
        let end_label = self.label("forend");
        let else_label = match orelse {
            Some(_) => self.label("forelse"),
            None => end_label.clone(),
        };

        let item = object::declare(&mut self.ctx);
        self.ctx.add(CStmt::Label(next_label.clone()));
        // release the previous iteration's reference before overwriting
        self.ctx
            .add_expr(CExpr::call("Nr_XDecRef", vec![CExpr::id(&item.name)]));
        self.ctx.add_expr(CExpr::assign_id(
            &item.name,
            CExpr::call("NrIter_Next", vec![CExpr::id(&iter.name)]),
        ));

        // null means exhaustion, unless the runtime left an error pending
        let exhausted = self.ctx.nested(|ctx| {
            let err = ctx.declare_typed("iter_err", CType::obj(), None);
            ctx.add_expr(CExpr::assign_id(
                &err,
                CExpr::call("NrErr_Occurred", vec![]),
            ));
            let fail = ctx.nested(|ctx| ctx.emit_fail_path())?;
            ctx.add(CStmt::If {
                cond: CExpr::id(&err),
                then_block: fail,
                else_block: None,
            });
            ctx.add(CStmt::Goto(else_label.clone()));
            Ok(())
        })?;
        self.ctx.add(CStmt::If {
            cond: CExpr::not(CExpr::id(&item.name)),
            then_block: exhausted,
            else_block: None,
        });

        self.emit_store(target, &item)?;

        self.ctx.push_flow(FlowLabel::Loop {
            break_label: end_label.clone(),
            continue_label: next_label.clone(),
        });
        let result = body(self);
        self.ctx.pop_flow();
        result?;
        self.ctx.add(CStmt::Goto(next_label));

        if let Some(orelse) = orelse {
            self.ctx.add(CStmt::Label(else_label));
            self.visit_block(orelse)?;
        }
        self.ctx.add(CStmt::Label(end_label));
        Ok(())
    }

    // ---- raise and assert -------------------------------------------------

    fn visit_raise(&mut self, s: &ast::RaiseStmt) -> CodegenResult<()> {
        match &s.exc {
            Some(exc) => {
                let inst = self.visit_expr(exc)?;
                // a class raises a fresh instance; an instance raises itself
                let is_type = self.ctx.declare_typed("is_type", CType::int(), None);
                self.ctx.add_expr(CExpr::assign_id(
                    &is_type,
                    CExpr::call("NrType_Check", vec![CExpr::id(&inst.name)]),
                ));
                let then_block = self.ctx.nested(|ctx| {
                    ctx.add_expr(CExpr::call(
                        "NrErr_SetObject",
                        vec![CExpr::id(&inst.name), CExpr::null()],
                    ));
                    Ok(())
                })?;
                let else_block = self.ctx.nested(|ctx| {
                    let ty = object::declare(ctx);
                    ctx.add_expr(CExpr::assign_id(
                        &ty.name,
                        CExpr::call("NrObject_Type", vec![CExpr::id(&inst.name)]),
                    ));
                    ctx.fail_if_null(&ty.name)?;
                    ctx.add_expr(CExpr::call(
                        "NrErr_SetObject",
                        vec![CExpr::id(&ty.name), CExpr::id(&inst.name)],
                    ));
                    Ok(())
                })?;
                self.ctx.add(CStmt::If {
                    cond: CExpr::id(&is_type),
                    then_block,
                    else_block: Some(else_block),
                });
            }
            None => {
                // bare raise: re-arm the exception of the innermost handler
                match self.current_handler_cookie() {
                    Some(cookie) => {
                        self.ctx.restore_exception(&cookie);
                    }
                    None => {
                        self.ctx.add_expr(CExpr::call(
                            "NrErr_SetString",
                            vec![
                                CExpr::id("NrExc_RuntimeError"),
                                CExpr::StrConst("no active exception to re-raise".to_string()),
                            ],
                        ));
                    }
                }
            }
        }
        self.ctx.emit_fail_path()
    }

    fn visit_assert(&mut self, s: &ast::AssertStmt) -> CodegenResult<()> {
        let test = self.visit_expr(&s.test)?;
        let truth = self.truth(&test)?;
        let ok_label = self.label("assertok");

        let mut pass = CBlock::new();
        pass.add(CStmt::Goto(ok_label.clone()));
        self.ctx.add(CStmt::If {
            cond: CExpr::id(&truth),
            then_block: pass,
            else_block: None,
        });

        match &s.msg {
            Some(msg) => {
                let value = self.visit_expr(msg)?;
                self.ctx.add_expr(CExpr::call(
                    "NrErr_SetObject",
                    vec![CExpr::id("NrExc_AssertionError"), CExpr::id(&value.name)],
                ));
            }
            None => {
                self.ctx.add_expr(CExpr::call(
                    "NrErr_SetString",
                    vec![
                        CExpr::id("NrExc_AssertionError"),
                        CExpr::StrConst("assertion failed".to_string()),
                    ],
                ));
            }
        }
        self.ctx.emit_fail_path()?;
        self.ctx.add(CStmt::Label(ok_label));
        Ok(())
    }

    // ---- try / except / finally ------------------------------------------

    fn visit_try(&mut self, s: &ast::TryStmt) -> CodegenResult<()> {
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
            self.ctx
                .push_flow(FlowLabel::Finally(CleanupFrame::new(finally_label.clone())));
        }
        if has_handlers {
            self.ctx.push_flow(FlowLabel::Except {
                label: except_label.clone(),
            });
        }

        self.visit_block(&s.body)?;

        if has_handlers {
            self.ctx.pop_flow();
        }
        // else clause: only on clean fall-through of the body
        self.visit_block(&s.orelse)?;
        self.ctx.add(CStmt::Goto(after_body.clone()));

        if has_handlers {
            self.emit_handlers(s, &except_label, &after_body)?;
        }

        if has_finally {
            // the finally body itself runs outside the region it guards
            let frame = match self.ctx.pop_flow() {
                FlowLabel::Finally(frame) => frame,
                other => {
                    return Err(CodegenError::Internal(format!(
                        "expected finally frame on flow stack, found {:?}",
                        other
                    )))
                }
            };
            self.ctx.add(CStmt::Label(finally_label));
            self.visit_block(&s.finalbody)?;
            self.ctx.emit_resume_dispatch(&frame);
        }
        self.ctx.add(CStmt::Label(end_label));
        Ok(())
    }

    /// Exception dispatch: assert an error is pending, save it into a
    /// cookie, then test each clause in source order. No match restores the
    /// cookie and continues the non-local exit.
    fn emit_handlers(
        &mut self,
        s: &ast::TryStmt,
        except_label: &str,
        after_body: &str,
    ) -> CodegenResult<()> {
        self.ctx.add(CStmt::Label(except_label.to_string()));

        let pending = self.ctx.declare_typed("pending", CType::obj(), None);
        self.ctx.add_expr(CExpr::assign_id(
            &pending,
            CExpr::call("NrErr_Occurred", vec![]),
        ));
        self.ctx.fail_if_null(&pending)?;

        let cookie = self.ctx.fetch_exception();
        self.push_handler_cookie(cookie.clone());

        let fail_label = self.label("tryfail");
        for (index, handler) in s.handlers.iter().enumerate() {
            let next_label = if index + 1 < s.handlers.len() {
                self.label("exm")
            } else {
                fail_label.clone()
            };
            if let Some(typ) = &handler.typ {
                // a tuple clause tests each member, OR-combined by the
                // runtime's match predicate
                let classes = self.visit_expr(typ)?;
                let matched = self.ctx.declare_typed("matched", CType::int(), None);
                self.ctx.add_expr(CExpr::assign_id(
                    &matched,
                    CExpr::call(
                        "NrErr_GivenMatches",
                        vec![CExpr::id(&cookie.ty), CExpr::id(&classes.name)],
                    ),
                ));
                let mut no_match = CBlock::new();
                no_match.add(CStmt::Goto(next_label.clone()));
                self.ctx.add(CStmt::If {
                    cond: CExpr::not(CExpr::id(&matched)),
                    then_block: no_match,
                    else_block: None,
                });
            }

            if handler.name.is_some() {
                let value_slot = self.ctx.normalize_exception(&cookie);
                let bound = Value::obj(value_slot);
                let sym = self.binding(handler.node_id)?;
                self.store_name(sym, &bound)?;
            }
            self.visit_block(&handler.body)?;
            // falling off the handler clears the error: restore re-arms the
            // cookie (consuming the extra reference) and the clear drops it
            self.ctx.restore_exception(&cookie);
            self.ctx.add_expr(CExpr::call("NrErr_Clear", vec![]));
            self.ctx.add(CStmt::Goto(after_body.to_string()));

            if index + 1 < s.handlers.len() {
                self.ctx.add(CStmt::Label(next_label));
            }
        }

        // no clause matched: restore and keep unwinding
        self.ctx.add(CStmt::Label(fail_label));
        self.ctx.restore_exception(&cookie);
        self.pop_handler_cookie();
        self.ctx.emit_fail_path()?;
        Ok(())
    }

    // ---- with ------------------------------------------------------------

    fn visit_with(&mut self, items: &[ast::WithItem], body: &[Stmt]) -> CodegenResult<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.visit_block(body);
        };

        let manager = self.visit_expr(&item.context_expr)?;
        let enter = object::get_attr(&mut self.ctx, &manager, "__enter__")?;
        let exit = object::get_attr(&mut self.ctx, &manager, "__exit__")?;

        let empty = sequence::tuple_pack(&mut self.ctx, &[])?;
        let entered = object::call(&mut self.ctx, &enter, Some(&empty), None)?;
        if let Some(vars) = &item.optional_vars {
            self.emit_store(vars, &entered)?;
        }

        let exit_label = self.label("withexit");
        let done_label = self.label("withend");
        // the suppression path resets __resume__ even when nothing armed it
        self.ctx.ensure_resume_cell();
        self.ctx
            .push_flow(FlowLabel::WithExit(CleanupFrame::new(exit_label.clone())));

        if rest.is_empty() {
            self.visit_block(body)?;
        } else {
            self.visit_with(rest, body)?;
        }

        let frame = match self.ctx.pop_flow() {
            FlowLabel::WithExit(frame) => frame,
            other => {
                return Err(CodegenError::Internal(format!(
                    "expected with-exit frame on flow stack, found {:?}",
                    other
                )))
            }
        };

        // the exit label runs with whatever exception state the arrival
        // path left pending; an empty cookie means a normal exit
        self.ctx.add(CStmt::Label(exit_label));
        let cookie = self.ctx.fetch_exception();
        let had_exc = self.ctx.declare_typed("had_exc", CType::int(), None);
        self.ctx.add_expr(CExpr::assign_id(
            &had_exc,
            CExpr::binary("!=", CExpr::id(&cookie.ty), CExpr::null()),
        ));
        for slot in [&cookie.ty, &cookie.val, &cookie.tb] {
            let fill = {
                let mut block = CBlock::new();
                block.add_expr(CExpr::assign_id(slot, CExpr::id("Nr_None")));
                block.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(slot)]));
                block
            };
            self.ctx.add(CStmt::If {
                cond: CExpr::not(CExpr::id(slot)),
                then_block: fill,
                else_block: None,
            });
        }

        let exc_args = sequence::tuple_pack(
            &mut self.ctx,
            &[
                Value::obj(&cookie.ty),
                Value::obj(&cookie.val),
                Value::obj(&cookie.tb),
            ],
        )?;
        let exit_result = object::call(&mut self.ctx, &exit, Some(&exc_args), None)?;
        let suppressed = self.truth(&exit_result)?;

        // a truthy result with a live exception cancels the unwind entirely
        let handled = self.ctx.nested(|ctx| {
            let swallow = ctx.nested(|ctx| {
                // the unwind is cancelled; drop the cookie's spare references
                for slot in [&cookie.ty, &cookie.val, &cookie.tb] {
                    ctx.add_expr(CExpr::call("Nr_XDecRef", vec![CExpr::id(slot)]));
                }
                ctx.add_expr(CExpr::assign_id("__resume__", CExpr::IntConst(0)));
                ctx.add(CStmt::Goto(done_label.clone()));
                Ok(())
            })?;
            ctx.add(CStmt::If {
                cond: CExpr::id(&suppressed),
                then_block: swallow,
                else_block: None,
            });
            // not suppressed: the exception goes back to being pending
            ctx.restore_exception(&cookie);
            Ok(())
        })?;
        self.ctx.add(CStmt::If {
            cond: CExpr::id(&had_exc),
            then_block: handled,
            else_block: None,
        });

        self.ctx.emit_resume_dispatch(&frame);
        self.ctx.add(CStmt::Label(done_label));
        Ok(())
    }

    // ---- imports ----------------------------------------------------------

    fn visit_import(&mut self, s: &ast::ImportStmt) -> CodegenResult<()> {
        for alias in &s.names {
            let bound = alias.bound_name().to_string();
            // without a rename the top-level package is what gets bound
            let target_module = match &alias.asname {
                Some(_) => alias.name.clone(),
                None => bound.clone(),
            };
            let module = object::declare(&mut self.ctx);
            self.ctx.add_expr(CExpr::assign_id(
                &module.name,
                CExpr::call(
                    "NrImport_Module",
                    vec![CExpr::StrConst(alias.name.clone())],
                ),
            ));
            self.ctx.fail_if_null(&module.name)?;
            let value = if target_module == alias.name {
                module
            } else {
                let top = object::declare(&mut self.ctx);
                self.ctx.add_expr(CExpr::assign_id(
                    &top.name,
                    CExpr::call(
                        "NrImport_Module",
                        vec![CExpr::StrConst(target_module.clone())],
                    ),
                ));
                self.ctx.fail_if_null(&top.name)?;
                top
            };
            let sym = self.binding(alias.node_id)?;
            self.store_name(sym, &value)?;
        }
        Ok(())
    }

    fn visit_import_from(&mut self, s: &ast::ImportFromStmt) -> CodegenResult<()> {
        let module = object::declare(&mut self.ctx);
        self.ctx.add_expr(CExpr::assign_id(
            &module.name,
            CExpr::call(
                "NrImport_Module",
                vec![CExpr::StrConst(s.module.clone())],
            ),
        ));
        self.ctx.fail_if_null(&module.name)?;
        for alias in &s.names {
            let value = object::get_attr(&mut self.ctx, &module, &alias.name)?;
            let sym = self.binding(alias.node_id)?;
            self.store_name(sym, &value)?;
        }
        Ok(())
    }
}
