//! Function, lambda, and generator compilation
//!
//! Every callable compiles to a stub/runner pair. The stub speaks the
//! runtime's generic `(self, args, kwargs)` calling convention: it unpacks
//! positional and keyword arguments, fills defaults, and rejects bad arity.
//! The runner is the real body. For a generator the stub instead packs the
//! arguments into a heap block and creates the generator object with its
//! own coroutine stack; the runner is entered on that stack and shuttles
//! values out through the shared slot.

use crate::cgen::{CExpr, CParam, CStmt, CType, CVarDecl};
use crate::compiler::context::sanitize;
use crate::compiler::flow::{FlowLabel, END_LABEL};
use crate::compiler::Visitor;
use crate::error::{CodegenError, CodegenResult};
use crate::resolve::ScopeId;
use crate::values::function::{ARGS_INDEX, GEN_INDEX, GEN_STACK_SIZE, RET_INDEX, SELF_INDEX};
use crate::values::{mapping, object, sequence, FuncRepr, Value};
use nacre_ast as ast;

impl Visitor<'_> {
    pub fn visit_funcdef(&mut self, s: &ast::FuncDefStmt) -> CodegenResult<()> {
        let scope = self.resolution.scope_of(s.node_id).ok_or_else(|| {
            CodegenError::Internal(format!("function '{}' has no resolved scope", s.name))
        })?;
        let func = self.emit_function_object(
            scope,
            &s.name,
            &s.args,
            s.docstring.as_deref(),
            &s.decorators,
            |visitor| visitor.visit_block(&s.body),
        )?;
        let sym = self.binding(s.node_id)?;
        self.store_name(sym, &func)
    }

    /// Compile a callable: defaults and decorators evaluate in the defining
    /// context, the stub/runner pair lands in the translation unit, and the
    /// returned value is the (possibly decorated) function object.
    pub fn emit_function_object<F>(
        &mut self,
        scope: ScopeId,
        name: &str,
        args: &ast::Arguments,
        docstring: Option<&str>,
        decorators: &[ast::Expr],
        emit_body: F,
    ) -> CodegenResult<Value>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        let c_name = self.c_name_for(scope, name);
        let mut repr = FuncRepr::new(&self.resolution.table, scope, c_name);

        self.ctx
            .tu
            .add_var(CVarDecl::obj(&repr.obj_name).with_static());

        // decorators evaluate before the function object exists
        let mut decorator_values = Vec::new();
        for deco in decorators {
            decorator_values.push(self.visit_expr(deco)?);
        }

        let defaults_name = self.emit_defaults_array(&repr, &args.defaults)?;
        let kwdefaults_name = self.emit_kwdefaults_array(&repr, &args.kw_defaults)?;

        self.emit_runner(&mut repr, args, emit_body)?;
        self.emit_stub(&repr, args, defaults_name.as_deref(), kwdefaults_name.as_deref())?;

        let fnobj = repr.emit_funcobj_new(&mut self.ctx, docstring)?;
        if repr.uses_stack() {
            // enclosing levels come from the creator's stack; inside the
            // enclosing runner that is the local __stack__, anywhere else
            // (a class builder between the two) it hangs off the enclosing
            // function object
            let parent_stack = self
                .current_func()
                .filter(|enclosing| enclosing.uses_stack())
                .map(|enclosing| {
                    if self.ctx.frame_ref().name == enclosing.runner_name {
                        CExpr::id("__stack__")
                    } else {
                        CExpr::call("NrFunc_GetStack", vec![CExpr::id(&enclosing.obj_name)])
                    }
                });
            repr.emit_stack_alloc(&mut self.ctx, parent_stack)?;
        }

        // innermost decorator applies first
        let mut result = fnobj;
        for deco in decorator_values.iter().rev() {
            let packed = sequence::tuple_pack(&mut self.ctx, &[result])?;
            result = object::call(&mut self.ctx, deco, Some(&packed), None)?;
        }
        Ok(result)
    }

    fn emit_defaults_array(
        &mut self,
        repr: &FuncRepr,
        defaults: &[ast::Expr],
    ) -> CodegenResult<Option<String>> {
        if defaults.is_empty() {
            return Ok(None);
        }
        let arr = format!("{}_defaults", repr.c_name);
        let mut decl = CVarDecl::new(&arr, CType::obj()).with_static();
        decl.array_dim = Some(defaults.len());
        self.ctx.tu.add_var(decl);
        for (index, default) in defaults.iter().enumerate() {
            let value = self.visit_expr(default)?;
            self.ctx
                .add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&value.name)]));
            self.ctx.add_expr(CExpr::Assign {
                lhs: Box::new(CExpr::index(
                    CExpr::id(&arr),
                    CExpr::IntConst(index as i64),
                )),
                rhs: Box::new(CExpr::id(&value.name)),
            });
        }
        Ok(Some(arr))
    }

    fn emit_kwdefaults_array(
        &mut self,
        repr: &FuncRepr,
        kw_defaults: &[Option<ast::Expr>],
    ) -> CodegenResult<Option<String>> {
        if kw_defaults.iter().all(Option::is_none) {
            return Ok(None);
        }
        let arr = format!("{}_kwdefaults", repr.c_name);
        let mut decl = CVarDecl::new(&arr, CType::obj()).with_static();
        decl.array_dim = Some(kw_defaults.len());
        self.ctx.tu.add_var(decl);
        for (index, default) in kw_defaults.iter().enumerate() {
            let Some(default) = default else { continue };
            let value = self.visit_expr(default)?;
            self.ctx
                .add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&value.name)]));
            self.ctx.add_expr(CExpr::Assign {
                lhs: Box::new(CExpr::index(
                    CExpr::id(&arr),
                    CExpr::IntConst(index as i64),
                )),
                rhs: Box::new(CExpr::id(&value.name)),
            });
        }
        Ok(Some(arr))
    }

    // ---- runner ------------------------------------------------------------

    fn emit_runner<F>(
        &mut self,
        repr: &mut FuncRepr,
        args: &ast::Arguments,
        emit_body: F,
    ) -> CodegenResult<()>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        let arg_names: Vec<String> = args.all_args().iter().map(|a| a.arg.clone()).collect();

        if repr.is_generator {
            self.ctx.begin_func(
                repr.runner_name.clone(),
                CType::void(),
                vec![CParam::new("gen_args", CType::ptr("void"))],
            );
        } else {
            let mut params = vec![CParam::obj("__self__")];
            for name in &arg_names {
                params.push(CParam::obj(format!("arg_{}", sanitize(name))));
            }
            self.ctx
                .begin_func(repr.runner_name.clone(), CType::obj(), params);
        }
        self.ctx.push_flow(FlowLabel::End);

        if !repr.is_generator {
            self.ctx
                .declare_typed("__return_value__", CType::obj(), Some(CExpr::null()));
        }

        if repr.is_generator {
            self.emit_generator_intro(repr)?;
        }
        if repr.uses_stack() {
            repr.emit_runner_stack_intro(&mut self.ctx)?;
        }

        self.emit_runner_arg_binding(repr, &arg_names)?;
        self.emit_runner_local_decls(repr, &arg_names)?;

        self.push_scope(repr.scope);
        self.push_func(repr.clone());
        let body_result = emit_body(self);
        *repr = self.pop_func();
        self.pop_scope();
        body_result?;

        if repr.is_generator {
            self.ctx.add(CStmt::Label(END_LABEL.to_string()));
            self.emit_cleanup_release();
            repr.emit_runner_stack_outro(&mut self.ctx);
            repr.emit_generator_exhaust(&mut self.ctx);
            self.ctx.add(CStmt::Return(None));
        } else {
            // falling off the end returns None
            self.ctx
                .add_expr(CExpr::assign_id("__return_value__", CExpr::id("Nr_None")));
            self.ctx.add_expr(CExpr::call(
                "Nr_IncRef",
                vec![CExpr::id("__return_value__")],
            ));
            self.ctx.add(CStmt::Label(END_LABEL.to_string()));
            self.emit_cleanup_release();
            repr.emit_runner_stack_outro(&mut self.ctx);
            self.ctx
                .add(CStmt::Return(Some(CExpr::id("__return_value__"))));
        }

        self.ctx.pop_flow();
        let func = self.ctx.end_func()?;
        self.ctx.tu.add_fwddecl(func.proto());
        self.ctx.tu.add_func(func);
        Ok(())
    }

    fn emit_generator_intro(&mut self, repr: &FuncRepr) -> CodegenResult<()> {
        self.ctx.comment("unpack the coroutine argument block");
        let args_slot =
            self.ctx
                .declare_typed("__args__", CType::ptr_ptr("NrObject"), Some(CExpr::null()));
        self.ctx.add_expr(CExpr::assign_id(
            &args_slot,
            CExpr::Cast {
                ty: CType::ptr_ptr("NrObject"),
                operand: Box::new(CExpr::id("gen_args")),
            },
        ));

        let self_slot = self
            .ctx
            .declare_typed("__self__", CType::obj(), Some(CExpr::null()));
        self.ctx.add_expr(CExpr::assign_id(
            &self_slot,
            FuncRepr::args_slot(SELF_INDEX),
        ));
        self.ctx.fail_if_null(&self_slot)?;

        let gen_slot = self
            .ctx
            .declare_typed("__gen__", CType::obj(), Some(CExpr::null()));
        self.ctx
            .add_expr(CExpr::assign_id(&gen_slot, FuncRepr::args_slot(GEN_INDEX)));
        self.ctx.fail_if_null(&gen_slot)?;

        let rc = self.ctx.declare_typed("enter_rc", CType::int(), None);
        self.ctx.add_expr(CExpr::assign_id(
            &rc,
            CExpr::call("NrGen_EnterContext", vec![CExpr::id(&self_slot)]),
        ));
        self.ctx.fail_if_nonzero(&rc)?;
        let _ = repr;
        Ok(())
    }

    /// Attach incoming arguments to their storage. Four cases, one per
    /// capability combination.
    fn emit_runner_arg_binding(
        &mut self,
        repr: &mut FuncRepr,
        arg_names: &[String],
    ) -> CodegenResult<()> {
        for (index, name) in arg_names.iter().enumerate() {
            match (repr.is_generator, repr.has_closure) {
                (false, false) => {
                    // copy the borrowed parameter into an owned local
                    let param = format!("arg_{}", sanitize(name));
                    let slot = self.ctx.declare_obj(name);
                    self.ctx
                        .add_expr(CExpr::assign_id(&slot, CExpr::id(&param)));
                    self.ctx
                        .add_expr(CExpr::call("Nr_XIncRef", vec![CExpr::id(&slot)]));
                    repr.bind_local(name, slot);
                }
                (false, true) => {
                    // closure: the parameter moves into its cell
                    let param = format!("arg_{}", sanitize(name));
                    let value = Value::obj(&param);
                    repr.store_var(&mut self.ctx, name, &value)?;
                }
                (true, false) => {
                    // generator: arguments arrive through the heap block
                    let slot = self.ctx.declare_obj(name);
                    self.ctx.add_expr(CExpr::assign_id(
                        &slot,
                        FuncRepr::args_slot(ARGS_INDEX + index as i64),
                    ));
                    self.ctx
                        .add_expr(CExpr::call("Nr_XIncRef", vec![CExpr::id(&slot)]));
                    repr.bind_local(name, slot);
                }
                (true, true) => {
                    // generator-closure: the merged strategy, block slots
                    // land directly in the shared cells
                    self.ctx
                        .comment(&format!("bind generator-closure arg '{}'", name));
                    let tmp = self.ctx.tmp_obj();
                    self.ctx.add_expr(CExpr::assign_id(
                        &tmp,
                        FuncRepr::args_slot(ARGS_INDEX + index as i64),
                    ));
                    self.ctx
                        .add_expr(CExpr::call("Nr_XIncRef", vec![CExpr::id(&tmp)]));
                    let value = Value::obj(&tmp);
                    repr.store_var(&mut self.ctx, name, &value)?;
                }
            }
        }
        Ok(())
    }

    /// Declare owned slots for plain locals that are not parameters; cell
    /// locals need no declaration, they live in the stack levels.
    fn emit_runner_local_decls(
        &mut self,
        repr: &mut FuncRepr,
        arg_names: &[String],
    ) -> CodegenResult<()> {
        let locals: Vec<String> = self
            .resolution
            .table
            .scope(repr.scope)
            .local_names()
            .iter()
            .map(|n| (*n).to_string())
            .collect();
        for name in locals {
            if arg_names.contains(&name) || repr.has_closure {
                continue;
            }
            let slot = self.ctx.declare_obj(&name);
            repr.bind_local(&name, slot);
        }
        Ok(())
    }

    fn emit_cleanup_release(&mut self) {
        for slot in self.ctx.cleanup_slots().into_iter().rev() {
            self.ctx
                .add_expr(CExpr::call("Nr_XDecRef", vec![CExpr::id(&slot)]));
        }
    }

    // ---- stub --------------------------------------------------------------

    fn emit_stub(
        &mut self,
        repr: &FuncRepr,
        args: &ast::Arguments,
        defaults_name: Option<&str>,
        kwdefaults_name: Option<&str>,
    ) -> CodegenResult<()> {
        self.ctx.begin_func(
            repr.stub_name.clone(),
            CType::obj(),
            vec![
                CParam::obj("self"),
                CParam::obj("args"),
                CParam::obj("kwargs"),
            ],
        );
        self.ctx.push_flow(FlowLabel::End);
        self.ctx
            .declare_typed("__return_value__", CType::obj(), Some(CExpr::null()));

        let args_value = Value::obj("args");
        let args_size = sequence::tuple_size(&mut self.ctx, &args_value);

        let mut call_slots: Vec<String> = Vec::new();

        // positional parameters: positional tuple, then keyword, then default
        let kwstart = args.args.len() - args.defaults.len();
        for (index, arg) in args.args.iter().enumerate() {
            self.ctx.comment(&format!("grab arg '{}'", arg.arg));
            let slot = self.ctx.declare_obj(&arg.arg);
            let slot_value = Value::obj(&slot);

            let from_tuple = self.ctx.nested(|ctx| {
                sequence::tuple_get_unchecked(
                    ctx,
                    &args_value,
                    CExpr::IntConst(index as i64),
                    &slot_value,
                );
                Ok(())
            })?;
            let from_kw = self.ctx.nested(|ctx| {
                let probe = ctx.nested(|ctx| {
                    let kwargs_value = Value::obj("kwargs");
                    mapping::dict_get_item_string_nofail(ctx, &kwargs_value, &arg.arg, &slot_value);
                    Ok(())
                })?;
                ctx.add(CStmt::If {
                    cond: CExpr::id("kwargs"),
                    then_block: probe,
                    else_block: None,
                });

                let fallback = ctx.nested(|ctx| {
                    if index >= kwstart {
                        let offset = index - kwstart;
                        let arr = defaults_name.expect("defaulted arg implies defaults array");
                        ctx.add_expr(CExpr::assign_id(
                            &slot_value.name,
                            CExpr::index(CExpr::id(arr), CExpr::IntConst(offset as i64)),
                        ));
                        ctx.add_expr(CExpr::call(
                            "Nr_XIncRef",
                            vec![CExpr::id(&slot_value.name)],
                        ));
                    } else {
                        ctx.add_expr(CExpr::call(
                            "NrErr_SetString",
                            vec![
                                CExpr::id("NrExc_TypeError"),
                                CExpr::StrConst(format!(
                                    "{}() missing required argument '{}'",
                                    repr.name, arg.arg
                                )),
                            ],
                        ));
                        ctx.emit_fail_path()?;
                    }
                    Ok(())
                })?;
                ctx.add(CStmt::If {
                    cond: CExpr::not(CExpr::id(&slot_value.name)),
                    then_block: fallback,
                    else_block: None,
                });
                Ok(())
            })?;
            self.ctx.add(CStmt::If {
                cond: CExpr::binary(
                    ">",
                    CExpr::id(&args_size),
                    CExpr::IntConst(index as i64),
                ),
                then_block: from_tuple,
                else_block: Some(from_kw),
            });
            call_slots.push(slot);
        }

        // overflow positionals become *args or a TypeError
        if args.vararg.is_some() {
            self.ctx.comment("collect varargs");
            let star = sequence::tuple_get_slice(
                &mut self.ctx,
                &args_value,
                CExpr::IntConst(args.args.len() as i64),
                CExpr::id(&args_size),
            )?;
            call_slots.push(star.name);
        } else {
            let too_many = self.ctx.nested(|ctx| {
                ctx.add_expr(CExpr::call(
                    "NrErr_SetString",
                    vec![
                        CExpr::id("NrExc_TypeError"),
                        CExpr::StrConst(format!(
                            "{}() takes at most {} positional arguments",
                            repr.name,
                            args.args.len()
                        )),
                    ],
                ));
                ctx.emit_fail_path()
            })?;
            self.ctx.add(CStmt::If {
                cond: CExpr::binary(
                    ">",
                    CExpr::id(&args_size),
                    CExpr::IntConst(args.args.len() as i64),
                ),
                then_block: too_many,
                else_block: None,
            });
        }

        // keyword-only parameters
        for (index, arg) in args.kwonlyargs.iter().enumerate() {
            self.ctx.comment(&format!("grab kwonly arg '{}'", arg.arg));
            let slot = self.ctx.declare_obj(&arg.arg);
            let slot_value = Value::obj(&slot);

            let probe = self.ctx.nested(|ctx| {
                let kwargs_value = Value::obj("kwargs");
                mapping::dict_get_item_string_nofail(ctx, &kwargs_value, &arg.arg, &slot_value);
                Ok(())
            })?;
            self.ctx.add(CStmt::If {
                cond: CExpr::id("kwargs"),
                then_block: probe,
                else_block: None,
            });

            let fallback = self.ctx.nested(|ctx| {
                if let Some(arr) = kwdefaults_name {
                    ctx.add_expr(CExpr::assign_id(
                        &slot_value.name,
                        CExpr::index(CExpr::id(arr), CExpr::IntConst(index as i64)),
                    ));
                    ctx.add_expr(CExpr::call(
                        "Nr_XIncRef",
                        vec![CExpr::id(&slot_value.name)],
                    ));
                }
                let missing = ctx.nested(|ctx| {
                    ctx.add_expr(CExpr::call(
                        "NrErr_SetString",
                        vec![
                            CExpr::id("NrExc_TypeError"),
                            CExpr::StrConst(format!(
                                "{}() missing required keyword-only argument '{}'",
                                repr.name, arg.arg
                            )),
                        ],
                    ));
                    ctx.emit_fail_path()
                })?;
                ctx.add(CStmt::If {
                    cond: CExpr::not(CExpr::id(&slot_value.name)),
                    then_block: missing,
                    else_block: None,
                });
                Ok(())
            })?;
            self.ctx.add(CStmt::If {
                cond: CExpr::not(CExpr::id(&slot_value.name)),
                then_block: fallback,
                else_block: None,
            });
            call_slots.push(slot);
        }

        // remaining keywords become **kwargs
        if args.kwarg.is_some() {
            self.ctx.comment("collect remaining kwargs");
            let kw_slot = self.ctx.declare_obj("kw_rest");
            let copy = self.ctx.nested(|ctx| {
                ctx.add_expr(CExpr::assign_id(
                    &kw_slot,
                    CExpr::call("NrDict_Copy", vec![CExpr::id("kwargs")]),
                ));
                Ok(())
            })?;
            let fresh = self.ctx.nested(|ctx| {
                ctx.add_expr(CExpr::assign_id(
                    &kw_slot,
                    CExpr::call("NrDict_New", vec![]),
                ));
                Ok(())
            })?;
            self.ctx.add(CStmt::If {
                cond: CExpr::id("kwargs"),
                then_block: copy,
                else_block: Some(fresh),
            });
            self.ctx.fail_if_null(&kw_slot)?;
            let kw_value = Value::obj(&kw_slot);
            for arg in args.args.iter().chain(&args.kwonlyargs) {
                mapping::dict_del_item_string(&mut self.ctx, &kw_value, &arg.arg);
            }
            call_slots.push(kw_slot);
        }

        if repr.is_generator {
            self.emit_generator_stub_call(repr, &call_slots)?;
        } else {
            let mut call_args = vec![CExpr::id("self")];
            call_args.extend(call_slots.iter().map(|s| CExpr::id(s)));
            self.ctx.add_expr(CExpr::assign_id(
                "__return_value__",
                CExpr::call(&repr.runner_name, call_args),
            ));
            self.ctx.fail_if_null("__return_value__")?;
        }

        self.ctx.add(CStmt::Label(END_LABEL.to_string()));
        self.emit_cleanup_release();
        self.ctx
            .add(CStmt::Return(Some(CExpr::id("__return_value__"))));

        self.ctx.pop_flow();
        let func = self.ctx.end_func()?;
        self.ctx.tu.add_fwddecl(func.proto());
        self.ctx.tu.add_func(func);
        Ok(())
    }

    /// Generator creation: pack self/gen/ret plus arguments into a heap
    /// block and hand it to the runtime with the runner and a fresh
    /// coroutine stack.
    fn emit_generator_stub_call(
        &mut self,
        repr: &FuncRepr,
        call_slots: &[String],
    ) -> CodegenResult<()> {
        self.ctx.comment("pack the coroutine argument block");
        let block = self
            .ctx
            .declare_typed("gen_argslist", CType::ptr_ptr("NrObject"), None);
        self.ctx.add_expr(CExpr::assign_id(
            &block,
            CExpr::call(
                "calloc",
                vec![
                    CExpr::IntConst(call_slots.len() as i64 + ARGS_INDEX),
                    CExpr::Id("sizeof(NrObject*)".to_string()),
                ],
            ),
        ));
        self.ctx.fail_if_null(&block)?;

        let set = |slot: i64, value: CExpr| CExpr::Assign {
            lhs: Box::new(CExpr::index(CExpr::id(&block), CExpr::IntConst(slot))),
            rhs: Box::new(value),
        };
        self.ctx.add_expr(set(SELF_INDEX, CExpr::id("self")));
        self.ctx
            .add_expr(CExpr::call("Nr_XIncRef", vec![CExpr::id("self")]));
        self.ctx.add_expr(set(GEN_INDEX, CExpr::null()));
        self.ctx.add_expr(set(RET_INDEX, CExpr::null()));
        for (index, slot) in call_slots.iter().enumerate() {
            self.ctx
                .add_expr(CExpr::call("Nr_XIncRef", vec![CExpr::id(slot)]));
            self.ctx
                .add_expr(set(ARGS_INDEX + index as i64, CExpr::id(slot)));
        }

        self.ctx.add_expr(CExpr::assign_id(
            "__return_value__",
            CExpr::call(
                "NrGen_New",
                vec![
                    CExpr::StrConst(repr.name.clone()),
                    CExpr::id(&repr.runner_name),
                    CExpr::id(&block),
                    CExpr::IntConst(GEN_STACK_SIZE),
                ],
            ),
        ));
        self.ctx.fail_if_null("__return_value__")?;
        self.ctx.add_expr(CExpr::call(
            "Nr_IncRef",
            vec![CExpr::id("__return_value__")],
        ));
        self.ctx
            .add_expr(set(GEN_INDEX, CExpr::id("__return_value__")));
        Ok(())
    }
}
