//! Expression emission

use crate::cgen::{CExpr, CStmt};
use crate::compiler::Visitor;
use crate::error::{CodegenError, CodegenResult};
use crate::values::{mapping, number, object, sequence, Value};
use nacre_ast as ast;
use nacre_ast::Expr;

impl Visitor<'_> {
    /// Emit an expression; the returned value is an owned slot.
    pub fn visit_expr(&mut self, expr: &Expr) -> CodegenResult<Value> {
        match expr {
            Expr::Num(n) => match n.value {
                ast::Number::Int(v) => number::new_int(&mut self.ctx, v),
                ast::Number::Float(v) => number::new_float(&mut self.ctx, v),
            },
            Expr::Str(s) => sequence::new_str(&mut self.ctx, &s.value),
            Expr::Bytes(b) => sequence::new_bytes(&mut self.ctx, &b.value),
            Expr::NameConstant(c) => match c.value {
                ast::Singleton::True => number::new_bool(&mut self.ctx, true),
                ast::Singleton::False => number::new_bool(&mut self.ctx, false),
                ast::Singleton::None => Ok(number::none(&mut self.ctx)),
            },
            Expr::Name(name) => {
                let sym = self.binding(name.node_id)?;
                self.load_name(sym)
            }
            Expr::BinOp(e) => {
                let left = self.visit_expr(&e.left)?;
                let right = self.visit_expr(&e.right)?;
                object::binop(&mut self.ctx, e.op, &left, &right)
            }
            Expr::UnaryOp(e) => {
                let operand = self.visit_expr(&e.operand)?;
                object::unaryop(&mut self.ctx, e.op, &operand)
            }
            Expr::BoolOp(e) => self.visit_boolop(e),
            Expr::Compare(e) => self.visit_compare(e),
            Expr::Call(e) => self.visit_call(e),
            Expr::Attribute(e) => {
                let value = self.visit_expr(&e.value)?;
                object::get_attr(&mut self.ctx, &value, &e.attr)
            }
            Expr::Subscript(e) => {
                let value = self.visit_expr(&e.value)?;
                let index = self.visit_slice(&e.slice)?;
                object::get_item(&mut self.ctx, &value, &index)
            }
            Expr::Starred(e) => self.visit_expr(&e.value),
            Expr::List(e) => {
                let items = self.visit_all(&e.elts)?;
                sequence::new_list(&mut self.ctx, &items)
            }
            Expr::Tuple(e) => {
                let items = self.visit_all(&e.elts)?;
                sequence::tuple_pack(&mut self.ctx, &items)
            }
            Expr::Set(e) => {
                let set = mapping::set_new(&mut self.ctx)?;
                for elt in &e.elts {
                    let item = self.visit_expr(elt)?;
                    mapping::set_add(&mut self.ctx, &set, &item)?;
                }
                Ok(set)
            }
            Expr::Dict(e) => {
                let dict = mapping::dict_new(&mut self.ctx)?;
                for (key, value) in e.keys.iter().zip(&e.values) {
                    let k = self.visit_expr(key)?;
                    let v = self.visit_expr(value)?;
                    mapping::dict_set_item(&mut self.ctx, &dict, &k, &v)?;
                }
                Ok(dict)
            }
            Expr::Lambda(e) => self.visit_lambda(e),
            Expr::IfExp(e) => self.visit_ifexp(e),
            Expr::ListComp(e) => self.visit_comprehension_expr(
                e.node_id,
                "<listcomp>",
                &e.generators,
                CompBody::List { elt: &e.elt },
            ),
            Expr::SetComp(e) => self.visit_comprehension_expr(
                e.node_id,
                "<setcomp>",
                &e.generators,
                CompBody::Set { elt: &e.elt },
            ),
            Expr::DictComp(e) => self.visit_comprehension_expr(
                e.node_id,
                "<dictcomp>",
                &e.generators,
                CompBody::Dict {
                    key: &e.key,
                    value: &e.value,
                },
            ),
            Expr::GeneratorExp(e) => self.visit_comprehension_expr(
                e.node_id,
                "<genexpr>",
                &e.generators,
                CompBody::Generator { elt: &e.elt },
            ),
            Expr::Yield(e) => self.visit_yield(e),
        }
    }

    fn visit_all(&mut self, exprs: &[Expr]) -> CodegenResult<Vec<Value>> {
        exprs.iter().map(|e| self.visit_expr(e)).collect()
    }

    /// Short-circuit boolean chain: the result slot takes each operand in
    /// turn, bailing out as soon as the operator's answer is decided.
    fn visit_boolop(&mut self, e: &ast::BoolOpExpr) -> CodegenResult<Value> {
        let out = object::declare(&mut self.ctx);
        let done = self.label("booldone");
        let last = e.values.len() - 1;
        for (index, operand) in e.values.iter().enumerate() {
            let value = self.visit_expr(operand)?;
            self.ctx.add_expr(CExpr::call(
                "Nr_XDecRef",
                vec![CExpr::id(&out.name)],
            ));
            object::assign(&mut self.ctx, &out, &value);
            if index < last {
                let truth = self.truth(&value)?;
                let cond = match e.op {
                    ast::BoolOpKind::And => CExpr::not(CExpr::id(&truth)),
                    ast::BoolOpKind::Or => CExpr::id(&truth),
                };
                let mut then_block = crate::cgen::CBlock::new();
                then_block.add(CStmt::Goto(done.clone()));
                self.ctx.add(CStmt::If {
                    cond,
                    then_block,
                    else_block: None,
                });
            }
        }
        self.ctx.add(CStmt::Label(done));
        Ok(out)
    }

    /// Chained comparison with short-circuit: each link evaluates once and
    /// a false link ends the chain carrying its own result.
    fn visit_compare(&mut self, e: &ast::CompareExpr) -> CodegenResult<Value> {
        let out = object::declare(&mut self.ctx);
        let done = self.label("cmpdone");
        let mut left = self.visit_expr(&e.left)?;
        let last = e.ops.len() - 1;
        for (index, (op, comparator)) in e.ops.iter().zip(&e.comparators).enumerate() {
            let right = self.visit_expr(comparator)?;
            let result = object::rich_compare(&mut self.ctx, *op, &left, &right)?;
            self.ctx.add_expr(CExpr::call(
                "Nr_XDecRef",
                vec![CExpr::id(&out.name)],
            ));
            object::assign(&mut self.ctx, &out, &result);
            if index < last {
                let truth = self.truth(&result)?;
                let mut then_block = crate::cgen::CBlock::new();
                then_block.add(CStmt::Goto(done.clone()));
                self.ctx.add(CStmt::If {
                    cond: CExpr::not(CExpr::id(&truth)),
                    then_block,
                    else_block: None,
                });
            }
            left = right;
        }
        self.ctx.add(CStmt::Label(done));
        Ok(out)
    }

    fn visit_call(&mut self, e: &ast::CallExpr) -> CodegenResult<Value> {
        let func = self.visit_expr(&e.func)?;

        let positional = self.visit_all(&e.args)?;
        let mut args = sequence::tuple_pack(&mut self.ctx, &positional)?;
        if let Some(star) = &e.starargs {
            let star_value = self.visit_expr(star)?;
            let star_tuple = object::declare(&mut self.ctx);
            self.ctx.add_expr(CExpr::assign_id(
                &star_tuple.name,
                CExpr::call("NrSeq_Tuple", vec![CExpr::id(&star_value.name)]),
            ));
            self.ctx.fail_if_null(&star_tuple.name)?;
            let joined = object::declare(&mut self.ctx);
            self.ctx.add_expr(CExpr::assign_id(
                &joined.name,
                CExpr::call(
                    "NrTuple_Concat",
                    vec![CExpr::id(&args.name), CExpr::id(&star_tuple.name)],
                ),
            ));
            self.ctx.fail_if_null(&joined.name)?;
            args = joined;
        }

        let kwargs = if e.keywords.is_empty() && e.kwargs.is_none() {
            None
        } else {
            let dict = mapping::dict_new(&mut self.ctx)?;
            for kw in &e.keywords {
                let value = self.visit_expr(&kw.value)?;
                mapping::dict_set_item_string(&mut self.ctx, &dict, &kw.arg, &value)?;
            }
            if let Some(extra) = &e.kwargs {
                let extra_value = self.visit_expr(extra)?;
                let rc = self.ctx.declare_typed("rc", crate::cgen::CType::int(), None);
                self.ctx.add_expr(CExpr::assign_id(
                    &rc,
                    CExpr::call(
                        "NrDict_Update",
                        vec![CExpr::id(&dict.name), CExpr::id(&extra_value.name)],
                    ),
                ));
                self.ctx.fail_if_nonzero(&rc)?;
            }
            Some(dict)
        };

        let result = object::call(&mut self.ctx, &func, Some(&args), kwargs.as_ref())?;

        // a call may have recursed through this very frame; re-arm our cell
        // level before touching locals again
        let restore = self
            .current_func()
            .filter(|repr| repr.has_closure && self.ctx.frame_ref().name == repr.runner_name)
            .cloned();
        if let Some(repr) = restore {
            repr.emit_restore_cells_after_call(&mut self.ctx);
        }
        Ok(result)
    }

    pub(crate) fn visit_slice(&mut self, slice: &ast::Slice) -> CodegenResult<Value> {
        match slice {
            ast::Slice::Index(expr) => self.visit_expr(expr),
            ast::Slice::Range { lower, upper, step } => {
                let mut parts = Vec::new();
                for part in [lower, upper, step] {
                    let value = match part {
                        Some(expr) => self.visit_expr(expr)?,
                        None => number::none(&mut self.ctx),
                    };
                    parts.push(value);
                }
                let out = object::declare(&mut self.ctx);
                self.ctx.add_expr(CExpr::assign_id(
                    &out.name,
                    CExpr::call(
                        "NrSlice_New",
                        parts.iter().map(|p| CExpr::id(&p.name)).collect(),
                    ),
                ));
                self.ctx.fail_if_null(&out.name)?;
                Ok(out)
            }
        }
    }

    fn visit_ifexp(&mut self, e: &ast::IfExpExpr) -> CodegenResult<Value> {
        let out = object::declare(&mut self.ctx);
        let test = self.visit_expr(&e.test)?;
        let truth = self.truth(&test)?;
        let else_label = self.label("ternelse");
        let done = self.label("terndone");

        let mut skip = crate::cgen::CBlock::new();
        skip.add(CStmt::Goto(else_label.clone()));
        self.ctx.add(CStmt::If {
            cond: CExpr::not(CExpr::id(&truth)),
            then_block: skip,
            else_block: None,
        });

        let then_value = self.visit_expr(&e.body)?;
        object::assign(&mut self.ctx, &out, &then_value);
        self.ctx.add(CStmt::Goto(done.clone()));

        self.ctx.add(CStmt::Label(else_label));
        let else_value = self.visit_expr(&e.orelse)?;
        object::assign(&mut self.ctx, &out, &else_value);
        self.ctx.add(CStmt::Label(done));
        Ok(out)
    }

    fn visit_yield(&mut self, e: &ast::YieldExpr) -> CodegenResult<Value> {
        let repr = self
            .current_func()
            .filter(|r| r.is_generator)
            .cloned()
            .ok_or_else(|| CodegenError::InvalidScope("yield outside of generator".to_string()))?;
        let value = match &e.value {
            Some(expr) => self.visit_expr(expr)?,
            None => number::none(&mut self.ctx),
        };
        repr.emit_yield(&mut self.ctx, &value)?;
        // no send protocol: a resumed yield expression evaluates to None
        Ok(number::none(&mut self.ctx))
    }

    fn visit_lambda(&mut self, e: &ast::LambdaExpr) -> CodegenResult<Value> {
        let scope = self.resolution.scope_of(e.node_id).ok_or_else(|| {
            CodegenError::Internal("lambda scope missing from resolution".to_string())
        })?;
        self.emit_function_object(scope, "<lambda>", &e.args, None, &[], |visitor| {
            let result = visitor.visit_expr(&e.body)?;
            visitor.emit_return_value(&result)
        })
    }

    fn visit_comprehension_expr(
        &mut self,
        node_id: ast::NodeId,
        name: &str,
        generators: &[ast::Comprehension],
        body: CompBody<'_>,
    ) -> CodegenResult<Value> {
        let scope = self.resolution.scope_of(node_id).ok_or_else(|| {
            CodegenError::Internal("comprehension scope missing from resolution".to_string())
        })?;
        let args = ast::Arguments::default();
        let func = self.emit_function_object(scope, name, &args, None, &[], |visitor| {
            visitor.emit_comprehension_body(generators, &body)
        })?;
        // a comprehension runs immediately; a generator expression hands
        // back the suspended generator itself
        let empty = sequence::tuple_pack(&mut self.ctx, &[])?;
        object::call(&mut self.ctx, &func, Some(&empty), None)
    }

    fn emit_comprehension_body(
        &mut self,
        generators: &[ast::Comprehension],
        body: &CompBody<'_>,
    ) -> CodegenResult<()> {
        let container = match body {
            CompBody::List { .. } => Some(sequence::list_new(&mut self.ctx)?),
            CompBody::Set { .. } => Some(mapping::set_new(&mut self.ctx)?),
            CompBody::Dict { .. } => Some(mapping::dict_new(&mut self.ctx)?),
            CompBody::Generator { .. } => None,
        };
        self.emit_comp_level(generators, 0, body, container.as_ref())?;
        match container {
            Some(container) => self.emit_return_value(&container),
            None => Ok(()), // generator runner exhausts through the end label
        }
    }

    fn emit_comp_level(
        &mut self,
        generators: &[ast::Comprehension],
        depth: usize,
        body: &CompBody<'_>,
        container: Option<&Value>,
    ) -> CodegenResult<()> {
        let Some(generator) = generators.get(depth) else {
            match body {
                CompBody::List { elt } => {
                    let value = self.visit_expr(elt)?;
                    let container = container
                        .ok_or_else(|| CodegenError::Internal("missing container".into()))?;
                    sequence::list_append(&mut self.ctx, container, &value)?;
                }
                CompBody::Set { elt } => {
                    let value = self.visit_expr(elt)?;
                    let container = container
                        .ok_or_else(|| CodegenError::Internal("missing container".into()))?;
                    mapping::set_add(&mut self.ctx, container, &value)?;
                }
                CompBody::Dict { key, value } => {
                    let k = self.visit_expr(key)?;
                    let v = self.visit_expr(value)?;
                    let container = container
                        .ok_or_else(|| CodegenError::Internal("missing container".into()))?;
                    mapping::dict_set_item(&mut self.ctx, container, &k, &v)?;
                }
                CompBody::Generator { elt } => {
                    let value = self.visit_expr(elt)?;
                    let repr = self
                        .current_func()
                        .cloned()
                        .ok_or_else(|| CodegenError::Internal("genexpr outside function".into()))?;
                    repr.emit_yield(&mut self.ctx, &value)?;
                }
            }
            return Ok(());
        };

        let iterable = self.visit_expr(&generator.iter)?;
        self.emit_for_loop(&generator.target, &iterable, None, |visitor| {
            for cond in &generator.ifs {
                let test = visitor.visit_expr(cond)?;
                let truth = visitor.truth(&test)?;
                let keep = visitor.label("compif");
                let mut skip = crate::cgen::CBlock::new();
                skip.add(CStmt::Goto(visitor.comp_continue_label()?));
                visitor.ctx.add(CStmt::If {
                    cond: CExpr::not(CExpr::id(&truth)),
                    then_block: skip,
                    else_block: None,
                });
                visitor.ctx.add(CStmt::Label(keep));
            }
            visitor.emit_comp_level(generators, depth + 1, body, container)
        })
    }

    /// The continue label of the innermost loop, for comprehension guards.
    fn comp_continue_label(&self) -> CodegenResult<String> {
        let frame = self.ctx.frame_ref();
        for label in frame.flow.iter().rev() {
            if let FlowLabelRef::Found(continue_label) = flow_continue(label) {
                return Ok(continue_label);
            }
        }
        Err(CodegenError::Internal(
            "comprehension guard outside loop".into(),
        ))
    }
}

enum FlowLabelRef {
    Found(String),
    NotLoop,
}

fn flow_continue(label: &crate::compiler::flow::FlowLabel) -> FlowLabelRef {
    match label {
        crate::compiler::flow::FlowLabel::Loop { continue_label, .. } => {
            FlowLabelRef::Found(continue_label.clone())
        }
        _ => FlowLabelRef::NotLoop,
    }
}

pub(crate) enum CompBody<'e> {
    List { elt: &'e Expr },
    Set { elt: &'e Expr },
    Dict { key: &'e Expr, value: &'e Expr },
    Generator { elt: &'e Expr },
}
