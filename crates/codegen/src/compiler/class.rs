//! Class compilation
//!
//! A class statement compiles to a builder function taking the bases tuple:
//! the builder runs the class body into a namespace dict (stores and loads
//! of class-level names go through the dict), then asks the runtime to
//! build the class object. The def site packs the bases, calls the builder,
//! applies decorators, and binds the result.

use crate::cgen::{CExpr, CParam, CStmt, CType};
use crate::compiler::flow::{FlowLabel, END_LABEL};
use crate::compiler::Visitor;
use crate::error::{CodegenError, CodegenResult};
use crate::values::{object, sequence, ClassRepr, Value};
use nacre_ast as ast;

impl Visitor<'_> {
    pub fn visit_classdef(&mut self, s: &ast::ClassDefStmt) -> CodegenResult<()> {
        let scope = self.resolution.scope_of(s.node_id).ok_or_else(|| {
            CodegenError::Internal(format!("class '{}' has no resolved scope", s.name))
        })?;
        let c_name = self.c_name_for(scope, &s.name);
        let repr = ClassRepr::new(s.name.clone(), c_name);

        // decorators and bases evaluate in the defining scope
        let mut decorator_values = Vec::new();
        for deco in &s.decorators {
            decorator_values.push(self.visit_expr(deco)?);
        }
        let mut base_values = Vec::new();
        for base in &s.bases {
            base_values.push(self.visit_expr(base)?);
        }

        self.emit_class_builder(&repr, scope, s)?;

        // call the builder with the packed bases
        let bases = sequence::tuple_pack(&mut self.ctx, &base_values)?;
        let cls = object::declare(&mut self.ctx);
        self.ctx.add_expr(CExpr::assign_id(
            &cls.name,
            CExpr::call(&repr.builder_name, vec![CExpr::id(&bases.name)]),
        ));
        self.ctx.fail_if_null(&cls.name)?;

        let mut result = cls;
        for deco in decorator_values.iter().rev() {
            let packed = sequence::tuple_pack(&mut self.ctx, &[result])?;
            result = object::call(&mut self.ctx, deco, Some(&packed), None)?;
        }

        let sym = self.binding(s.node_id)?;
        self.store_name(sym, &result)
    }

    fn emit_class_builder(
        &mut self,
        repr: &ClassRepr,
        scope: crate::resolve::ScopeId,
        s: &ast::ClassDefStmt,
    ) -> CodegenResult<()> {
        self.ctx.begin_func(
            repr.builder_name.clone(),
            CType::obj(),
            vec![CParam::obj("bases")],
        );
        self.ctx.push_flow(FlowLabel::End);
        self.ctx
            .declare_typed("__return_value__", CType::obj(), Some(CExpr::null()));

        let ns = repr.emit_namespace(&mut self.ctx)?;
        if let Some(doc) = &s.docstring {
            let doc_value = sequence::new_str(&mut self.ctx, doc)?;
            repr.set_name(&mut self.ctx, &ns, "__doc__", &doc_value)?;
        }

        self.push_scope(scope);
        self.push_class_ns(scope, ns.clone());
        let body_result = self.visit_block(&s.body);
        self.pop_class_ns();
        self.pop_scope();
        body_result?;

        let bases_value = Value::obj("bases");
        let cls = repr.emit_build(&mut self.ctx, &bases_value, &ns)?;
        self.ctx
            .add_expr(CExpr::assign_id("__return_value__", CExpr::id(&cls.name)));
        self.ctx.add_expr(CExpr::call(
            "Nr_IncRef",
            vec![CExpr::id("__return_value__")],
        ));

        self.ctx.add(CStmt::Label(END_LABEL.to_string()));
        for slot in self.ctx.cleanup_slots().into_iter().rev() {
            self.ctx
                .add_expr(CExpr::call("Nr_XDecRef", vec![CExpr::id(&slot)]));
        }
        self.ctx
            .add(CStmt::Return(Some(CExpr::id("__return_value__"))));

        self.ctx.pop_flow();
        let func = self.ctx.end_func()?;
        self.ctx.tu.add_fwddecl(func.proto());
        self.ctx.tu.add_func(func);
        Ok(())
    }
}
