//! Module representation
//!
//! Each source module becomes a static object plus an idempotent builder
//! function. Module-level names live in the module namespace; loads and
//! stores go through attribute access on the module object.

use crate::cgen::{CBlock, CExpr, CStmt, CVarDecl};
use crate::compiler::context::{sanitize, EmitCtx};
use crate::error::CodegenResult;
use crate::values::{object, sequence, ReprKind, Value};

#[derive(Debug, Clone)]
pub struct ModuleRepr {
    /// Dotted source name.
    pub name: String,
    pub c_name: String,
    /// Static slot holding the module object.
    pub obj_name: String,
    pub builder_name: String,
}

impl ModuleRepr {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let c_name = sanitize(&name);
        ModuleRepr {
            obj_name: format!("{}_mod", c_name),
            builder_name: format!("nacre_module_{}_build", c_name),
            name,
            c_name,
        }
    }

    pub fn value(&self) -> Value {
        Value::new(&self.obj_name, ReprKind::Module)
    }

    /// File-scope declaration of the module slot.
    pub fn declare(&self, ctx: &mut EmitCtx) {
        ctx.tu
            .add_var(CVarDecl::obj(&self.obj_name).with_static());
    }

    /// Builder prologue: a second call returns the existing module.
    pub fn emit_return_existing(&self, ctx: &mut EmitCtx) {
        let mut then_block = CBlock::new();
        then_block.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&self.obj_name)]));
        then_block.add(CStmt::Return(Some(CExpr::id(&self.obj_name))));
        ctx.add(CStmt::If {
            cond: CExpr::id(&self.obj_name),
            then_block,
            else_block: None,
        });
    }

    pub fn emit_new(&self, ctx: &mut EmitCtx) -> CodegenResult<()> {
        ctx.add_expr(CExpr::assign_id(
            &self.obj_name,
            CExpr::call(
                "NrModule_New",
                vec![CExpr::StrConst(self.name.clone())],
            ),
        ));
        ctx.fail_if_null(&self.obj_name)
    }

    /// Seed a string attribute like `__name__` or `__doc__`.
    pub fn set_initial_string_attr(
        &self,
        ctx: &mut EmitCtx,
        attr: &str,
        text: Option<&str>,
    ) -> CodegenResult<()> {
        let module = self.value();
        match text {
            Some(text) => {
                let value = sequence::new_str(ctx, text)?;
                object::set_attr(ctx, &module, attr, &value)
            }
            None => {
                let none = Value::obj("Nr_None");
                object::set_attr(ctx, &module, attr, &none)
            }
        }
    }

    /// Load a module-level (or optimistic/builtin) name.
    pub fn get_name(&self, ctx: &mut EmitCtx, name: &str) -> CodegenResult<Value> {
        let module = self.value();
        object::get_attr(ctx, &module, name)
    }

    /// Store a module-level name.
    pub fn set_name(&self, ctx: &mut EmitCtx, name: &str, value: &Value) -> CodegenResult<()> {
        let module = self.value();
        object::set_attr(ctx, &module, name, value)
    }

    pub fn del_name(&self, ctx: &mut EmitCtx, name: &str) -> CodegenResult<()> {
        let module = self.value();
        object::del_attr(ctx, &module, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgen::{CType, Printer};
    use crate::compiler::flow::FlowLabel;

    #[test]
    fn test_builder_names_derived_from_dotted_name() {
        let repr = ModuleRepr::new("pkg.mod");
        assert_eq!(repr.obj_name, "pkg_mod_mod");
        assert_eq!(repr.builder_name, "nacre_module_pkg_mod_build");
    }

    #[test]
    fn test_return_existing_is_idempotent_guard() {
        let repr = ModuleRepr::new("m");
        let mut ctx = EmitCtx::new();
        ctx.begin_func("b", CType::obj(), vec![]);
        ctx.push_flow(FlowLabel::End);
        repr.emit_return_existing(&mut ctx);
        let text = Printer::new().print_func_def(&ctx.end_func().unwrap());
        assert!(text.contains("if (m_mod)"));
        assert!(text.contains("return m_mod;"));
    }
}
