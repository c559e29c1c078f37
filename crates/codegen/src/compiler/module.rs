//! Module compilation
//!
//! One native translation unit per source module: the fixed runtime
//! includes, a static module object, and an idempotent builder function
//! that creates the module, seeds its special attributes, and runs the
//! module body. A process-wide `main` aggregates the per-module builders
//! and invokes the entry module.

use crate::cgen::{CBlock, CExpr, CParam, CStmt, CType, TranslationUnit};
use crate::compiler::flow::{FlowLabel, END_LABEL};
use crate::compiler::Visitor;
use crate::error::CodegenResult;
use crate::resolve::Resolution;
use crate::values::ModuleRepr;
use nacre_ast as ast;
use tracing::debug;

/// The fixed auxiliary includes every emitted unit carries: the runtime's
/// object header, the closure-frame allocator, the function-object wrapper,
/// and the generator/coroutine support library.
pub const RUNTIME_INCLUDES: &[&str] = &["nr_object.h", "nr_frame.h", "nr_function.h", "nr_coro.h"];

pub struct ModuleCompiler;

impl ModuleCompiler {
    /// Compile a resolved module into its translation unit.
    pub fn compile(
        resolution: &mut Resolution,
        module: &ast::Module,
    ) -> CodegenResult<TranslationUnit> {
        let repr = ModuleRepr::new(module.name.clone());
        let module_scope = resolution.module_scope;
        let mut visitor = Visitor::new(resolution, repr.clone());

        visitor.ctx.tu.add_include("stdlib.h", true);
        visitor.ctx.tu.add_include("string.h", true);
        for include in RUNTIME_INCLUDES {
            visitor.ctx.tu.add_include(*include, false);
        }
        repr.declare(&mut visitor.ctx);

        visitor
            .ctx
            .begin_func(repr.builder_name.clone(), CType::obj(), vec![]);
        visitor.ctx.push_flow(FlowLabel::End);
        visitor
            .ctx
            .declare_typed("__return_value__", CType::obj(), Some(CExpr::null()));

        repr.emit_return_existing(&mut visitor.ctx);
        visitor
            .ctx
            .comment(&format!("create module \"{}\"", module.name));
        repr.emit_new(&mut visitor.ctx)?;
        repr.set_initial_string_attr(&mut visitor.ctx, "__name__", Some(&module.name))?;
        repr.set_initial_string_attr(&mut visitor.ctx, "__file__", Some(&module.filename))?;
        repr.set_initial_string_attr(&mut visitor.ctx, "__doc__", module.docstring.as_deref())?;

        visitor.push_scope(module_scope);
        let body_result = visitor.visit_block(&module.body);
        visitor.pop_scope();
        body_result?;

        visitor.ctx.add_expr(CExpr::assign_id(
            "__return_value__",
            CExpr::id(&repr.obj_name),
        ));
        visitor.ctx.add_expr(CExpr::call(
            "Nr_IncRef",
            vec![CExpr::id("__return_value__")],
        ));

        visitor.ctx.add(CStmt::Label(END_LABEL.to_string()));
        for slot in visitor.ctx.cleanup_slots().into_iter().rev() {
            visitor
                .ctx
                .add_expr(CExpr::call("Nr_XDecRef", vec![CExpr::id(&slot)]));
        }
        visitor
            .ctx
            .add(CStmt::Return(Some(CExpr::id("__return_value__"))));

        visitor.ctx.pop_flow();
        let builder = visitor.ctx.end_func()?;
        visitor.ctx.tu.add_fwddecl(builder.proto());
        visitor.ctx.tu.add_func(builder);

        debug!(module = %module.name, funcs = visitor.ctx.tu.funcs.len(), "module compiled");
        Ok(visitor.ctx.tu)
    }

    /// Emit the process-wide `main`: initialize the runtime, build every
    /// module (entry module last), and report a failed build through the
    /// runtime's traceback printer.
    pub fn emit_main(modules: &[ModuleRepr], entry: &ModuleRepr) -> TranslationUnit {
        let mut tu = TranslationUnit::new();
        for include in RUNTIME_INCLUDES {
            tu.add_include(*include, false);
        }
        for module in modules {
            tu.add_fwddecl(crate::cgen::CFuncProto {
                name: module.builder_name.clone(),
                ret: CType::obj(),
                params: vec![],
                is_static: false,
            });
        }

        let mut main = crate::cgen::CFuncDef::new(
            "main",
            CType::int(),
            vec![
                CParam::new("argc", CType::int()),
                CParam::new("argv", CType::ptr_ptr("char")),
            ],
        );
        main.is_static = false;

        main.body
            .add_expr(CExpr::call("Nr_Initialize", vec![]));
        main.body.add_decl(crate::cgen::CVarDecl::obj("mod"));

        let mut ordered: Vec<&ModuleRepr> = modules
            .iter()
            .filter(|m| m.name != entry.name)
            .collect();
        ordered.push(entry);
        for module in ordered {
            main.body.add_expr(CExpr::assign_id(
                "mod",
                CExpr::call(&module.builder_name, vec![]),
            ));
            let mut failed = CBlock::new();
            failed.add_expr(CExpr::call("NrErr_Print", vec![]));
            failed.add(CStmt::Return(Some(CExpr::IntConst(1))));
            main.body.add(CStmt::If {
                cond: CExpr::not(CExpr::id("mod")),
                then_block: failed,
                else_block: None,
            });
            main.body
                .add_expr(CExpr::call("Nr_DecRef", vec![CExpr::id("mod")]));
        }

        main.body.add_expr(CExpr::call("Nr_Finalize", vec![]));
        main.body.add(CStmt::Return(Some(CExpr::IntConst(0))));
        tu.add_func(main);
        tu
    }
}
