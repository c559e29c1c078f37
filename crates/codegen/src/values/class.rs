//! Class representation
//!
//! A class compiles to a builder function that runs the class body into a
//! namespace dict and then asks the runtime to forge the class object from
//! name, bases, and namespace.

use crate::cgen::CExpr;
use crate::compiler::context::EmitCtx;
use crate::error::CodegenResult;
use crate::values::{mapping, object, ReprKind, Value};

#[derive(Debug, Clone)]
pub struct ClassRepr {
    pub name: String,
    pub c_name: String,
    pub builder_name: String,
}

impl ClassRepr {
    pub fn new(name: impl Into<String>, c_name: String) -> Self {
        let name = name.into();
        ClassRepr {
            builder_name: format!("{}_build", c_name),
            name,
            c_name,
        }
    }

    /// Fresh namespace dict for the class body to populate.
    pub fn emit_namespace(&self, ctx: &mut EmitCtx) -> CodegenResult<Value> {
        mapping::dict_new(ctx)
    }

    /// Store into the class namespace.
    pub fn set_name(
        &self,
        ctx: &mut EmitCtx,
        ns: &Value,
        name: &str,
        value: &Value,
    ) -> CodegenResult<()> {
        mapping::dict_set_item_string(ctx, ns, name, value)
    }

    /// Load from the class namespace; absent entries fail at runtime.
    pub fn get_name(&self, ctx: &mut EmitCtx, ns: &Value, name: &str) -> CodegenResult<Value> {
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

    /// Forge the class object from name, bases tuple, and namespace.
    pub fn emit_build(
        &self,
        ctx: &mut EmitCtx,
        bases: &Value,
        ns: &Value,
    ) -> CodegenResult<Value> {
        let out = object::declare(ctx);
        ctx.add_expr(CExpr::assign_id(
            &out.name,
            CExpr::call(
                "NrType_BuildClass",
                vec![
                    CExpr::StrConst(self.name.clone()),
                    CExpr::id(&bases.name),
                    CExpr::id(&ns.name),
                ],
            ),
        ));
        ctx.fail_if_null(&out.name)?;
        Ok(Value::new(out.name, ReprKind::Class))
    }
}
