//! String, bytes, tuple, and list construction

use crate::cgen::{CExpr, CType};
use crate::compiler::context::EmitCtx;
use crate::error::CodegenResult;
use crate::values::{object, ReprKind, Value};

pub fn new_str(ctx: &mut EmitCtx, value: &str) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call(
            "NrStr_FromString",
            vec![CExpr::StrConst(value.to_string())],
        ),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Str))
}

pub fn new_bytes(ctx: &mut EmitCtx, value: &[u8]) -> CodegenResult<Value> {
    let literal: String = value.iter().map(|b| format!("\\x{:02x}", b)).collect();
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call(
            "NrBytes_FromStringAndSize",
            vec![
                CExpr::Id(format!("\"{}\"", literal)),
                CExpr::IntConst(value.len() as i64),
            ],
        ),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Bytes))
}

/// Build a tuple from already-evaluated items. The set-item entry steals a
/// reference, so each packed item is increfed first; the tuple owns them
/// from then on.
pub fn tuple_pack(ctx: &mut EmitCtx, items: &[Value]) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrTuple_New", vec![CExpr::IntConst(items.len() as i64)]),
    ));
    ctx.fail_if_null(&out.name)?;
    for (index, item) in items.iter().enumerate() {
        ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&item.name)]));
        ctx.add_expr(CExpr::call(
            "NrTuple_SetItem",
            vec![
                CExpr::id(&out.name),
                CExpr::IntConst(index as i64),
                CExpr::id(&item.name),
            ],
        ));
    }
    Ok(Value::new(out.name, ReprKind::Tuple))
}

/// Borrowed positional fetch with no bounds check; the caller guarded the
/// index already.
pub fn tuple_get_unchecked(
    ctx: &mut EmitCtx,
    tuple: &Value,
    index: CExpr,
    out: &Value,
) {
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrTuple_GetItem", vec![CExpr::id(&tuple.name), index]),
    ));
    ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&out.name)]));
}

pub fn tuple_size(ctx: &mut EmitCtx, tuple: &Value) -> String {
    let size = ctx.declare_typed("size", CType::named("long"), None);
    ctx.add_expr(CExpr::assign_id(
        &size,
        CExpr::call("NrTuple_Size", vec![CExpr::id(&tuple.name)]),
    ));
    size
}

/// Slice the tail of an args tuple into the `*args` value.
pub fn tuple_get_slice(
    ctx: &mut EmitCtx,
    tuple: &Value,
    low: CExpr,
    high: CExpr,
) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call(
            "NrTuple_GetSlice",
            vec![CExpr::id(&tuple.name), low, high],
        ),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Tuple))
}

pub fn list_new(ctx: &mut EmitCtx) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrList_New", vec![CExpr::IntConst(0)]),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::List))
}

pub fn list_append(ctx: &mut EmitCtx, list: &Value, item: &Value) -> CodegenResult<()> {
    let rc = ctx.declare_typed("rc", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call(
            "NrList_Append",
            vec![CExpr::id(&list.name), CExpr::id(&item.name)],
        ),
    ));
    ctx.fail_if_nonzero(&rc)
}

pub fn new_list(ctx: &mut EmitCtx, items: &[Value]) -> CodegenResult<Value> {
    let list = list_new(ctx)?;
    for item in items {
        list_append(ctx, &list, item)?;
    }
    Ok(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgen::Printer;
    use crate::compiler::flow::FlowLabel;

    fn with_func<F: FnOnce(&mut EmitCtx)>(build: F) -> String {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::obj(), vec![]);
        ctx.push_flow(FlowLabel::End);
        build(&mut ctx);
        Printer::new().print_func_def(&ctx.end_func().unwrap())
    }

    #[test]
    fn test_tuple_pack_increfs_before_steal() {
        let text = with_func(|ctx| {
            let a = Value::obj("a");
            tuple_pack(ctx, &[a]).unwrap();
        });
        let incref_pos = text.find("Nr_IncRef(a)").unwrap();
        let set_pos = text.find("NrTuple_SetItem").unwrap();
        assert!(incref_pos < set_pos);
    }

    #[test]
    fn test_bytes_literal_escaped() {
        let text = with_func(|ctx| {
            new_bytes(ctx, &[0x00, 0xff]).unwrap();
        });
        assert!(text.contains("\\x00\\xff"));
        assert!(text.contains(", 2)"));
    }
}
