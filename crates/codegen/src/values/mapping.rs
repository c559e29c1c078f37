//! Dict and set construction

use crate::cgen::{CBlock, CExpr, CStmt, CType};
use crate::compiler::context::EmitCtx;
use crate::error::CodegenResult;
use crate::values::{object, ReprKind, Value};

pub fn dict_new(ctx: &mut EmitCtx) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(&out.name, CExpr::call("NrDict_New", vec![])));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Dict))
}

pub fn dict_set_item(
    ctx: &mut EmitCtx,
    dict: &Value,
    key: &Value,
    value: &Value,
) -> CodegenResult<()> {
    let rc = ctx.declare_typed("rc", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call(
            "NrDict_SetItem",
            vec![
                CExpr::id(&dict.name),
                CExpr::id(&key.name),
                CExpr::id(&value.name),
            ],
        ),
    ));
    ctx.fail_if_nonzero(&rc)
}

pub fn dict_set_item_string(
    ctx: &mut EmitCtx,
    dict: &Value,
    key: &str,
    value: &Value,
) -> CodegenResult<()> {
    let rc = ctx.declare_typed("rc", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call(
            "NrDict_SetItemString",
            vec![
                CExpr::id(&dict.name),
                CExpr::StrConst(key.to_string()),
                CExpr::id(&value.name),
            ],
        ),
    ));
    ctx.fail_if_nonzero(&rc)
}

/// Probe a dict without failing on a miss: the out slot stays null when the
/// key is absent. The found reference is owned by the slot.
pub fn dict_get_item_string_nofail(ctx: &mut EmitCtx, dict: &Value, key: &str, out: &Value) {
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call(
            "NrDict_GetItemString",
            vec![CExpr::id(&dict.name), CExpr::StrConst(key.to_string())],
        ),
    ));
    let mut then_block = CBlock::new();
    then_block.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&out.name)]));
    ctx.add(CStmt::If {
        cond: CExpr::id(&out.name),
        then_block,
        else_block: None,
    });
}

pub fn dict_del_item_string(ctx: &mut EmitCtx, dict: &Value, key: &str) {
    ctx.add_expr(CExpr::call(
        "NrDict_DelItemString",
        vec![CExpr::id(&dict.name), CExpr::StrConst(key.to_string())],
    ));
}

pub fn dict_copy(ctx: &mut EmitCtx, dict: &Value) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrDict_Copy", vec![CExpr::id(&dict.name)]),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Dict))
}

pub fn set_new(ctx: &mut EmitCtx) -> CodegenResult<Value> {
    let out = object::declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrSet_New", vec![CExpr::null()]),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Set))
}

pub fn set_add(ctx: &mut EmitCtx, set: &Value, item: &Value) -> CodegenResult<()> {
    let rc = ctx.declare_typed("rc", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call(
            "NrSet_Add",
            vec![CExpr::id(&set.name), CExpr::id(&item.name)],
        ),
    ));
    ctx.fail_if_nonzero(&rc)
}
