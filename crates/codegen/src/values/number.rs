//! Numeric and singleton constructors

use crate::cgen::CExpr;
use crate::compiler::context::EmitCtx;
use crate::error::CodegenResult;
use crate::values::{object, ReprKind, Value};

pub fn new_int(ctx: &mut EmitCtx, value: i64) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrInt_FromLong", vec![CExpr::IntConst(value)]),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Int))
}

pub fn new_float(ctx: &mut EmitCtx, value: f64) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrFloat_FromDouble", vec![CExpr::DoubleConst(value)]),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Float))
}

pub fn new_bool(ctx: &mut EmitCtx, value: bool) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrBool_FromLong", vec![CExpr::IntConst(i64::from(value))]),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Bool))
}

/// An owned alias of the `Nr_None` singleton.
pub fn none(ctx: &mut EmitCtx) -> Value {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(&out.name, CExpr::id("Nr_None")));
    ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&out.name)]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgen::{CType, Printer};
    use crate::compiler::flow::FlowLabel;

    #[test]
    fn test_int_constructor() {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::obj(), vec![]);
        ctx.push_flow(FlowLabel::End);
        new_int(&mut ctx, 42).unwrap();
        let text = Printer::new().print_func_def(&ctx.end_func().unwrap());
        assert!(text.contains("NrInt_FromLong(42)"));
    }
}
