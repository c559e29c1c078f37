//! Generic object operations
//!
//! Everything any runtime object supports: the reference-count protocol,
//! attribute and item access, calls, truth tests, and operator dispatch.
//! Each value-producing emission is followed by the null/negative check
//! that routes failure into the current flow-control path.

use crate::cgen::{CExpr, CType};
use crate::compiler::context::EmitCtx;
use crate::error::CodegenResult;
use crate::values::{ReprKind, Value};
use nacre_ast::{BinOpKind, CmpOpKind, UnaryOpKind};

/// Allocate a fresh owned object slot.
pub fn declare(ctx: &mut EmitCtx) -> Value {
    Value::obj(ctx.tmp_obj())
}

// ---- reference counting ---------------------------------------------------

pub fn incref(ctx: &mut EmitCtx, value: &Value) {
    ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&value.name)]));
}

pub fn xincref(ctx: &mut EmitCtx, value: &Value) {
    ctx.add_expr(CExpr::call("Nr_XIncRef", vec![CExpr::id(&value.name)]));
}

/// Release and unregister: the slot leaves the cleanup list so the end
/// label cannot release it a second time.
pub fn decref(ctx: &mut EmitCtx, value: &Value) {
    ctx.add_expr(CExpr::call("Nr_DecRef", vec![CExpr::id(&value.name)]));
    ctx.add_expr(CExpr::assign_id(&value.name, CExpr::null()));
    ctx.cleanup_remove(&value.name);
}

pub fn xdecref(ctx: &mut EmitCtx, value: &Value) {
    ctx.add_expr(CExpr::call("Nr_XDecRef", vec![CExpr::id(&value.name)]));
    ctx.add_expr(CExpr::assign_id(&value.name, CExpr::null()));
    ctx.cleanup_remove(&value.name);
}

/// Null out a possibly-unset slot without touching the cleanup list.
pub fn clear(ctx: &mut EmitCtx, value: &Value) {
    ctx.add_expr(CExpr::call(
        "Nr_Clear",
        vec![CExpr::addr_of(CExpr::id(&value.name))],
    ));
}

/// `dst = src` plus the reference the new alias owns.
pub fn assign(ctx: &mut EmitCtx, dst: &Value, src: &Value) {
    ctx.add_expr(CExpr::assign_id(&dst.name, CExpr::id(&src.name)));
    ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&dst.name)]));
}

/// Bind `dst` to the shared `Nr_None` singleton.
pub fn assign_none(ctx: &mut EmitCtx, dst: &Value) {
    ctx.add_expr(CExpr::assign_id(&dst.name, CExpr::id("Nr_None")));
    ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&dst.name)]));
}

// ---- attributes and items -------------------------------------------------

pub fn get_attr(ctx: &mut EmitCtx, object: &Value, attr: &str) -> CodegenResult<Value> {
    let out = declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call(
            "NrObject_GetAttr",
            vec![CExpr::id(&object.name), CExpr::StrConst(attr.to_string())],
        ),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(out)
}

pub fn set_attr(ctx: &mut EmitCtx, object: &Value, attr: &str, value: &Value) -> CodegenResult<()> {
    let rc = ctx.declare_typed("rc", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call(
            "NrObject_SetAttr",
            vec![
                CExpr::id(&object.name),
                CExpr::StrConst(attr.to_string()),
                CExpr::id(&value.name),
            ],
        ),
    ));
    ctx.fail_if_nonzero(&rc)
}

pub fn del_attr(ctx: &mut EmitCtx, object: &Value, attr: &str) -> CodegenResult<()> {
    let rc = ctx.declare_typed("rc", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call(
            "NrObject_DelAttr",
            vec![CExpr::id(&object.name), CExpr::StrConst(attr.to_string())],
        ),
    ));
    ctx.fail_if_nonzero(&rc)
}

pub fn get_item(ctx: &mut EmitCtx, object: &Value, index: &Value) -> CodegenResult<Value> {
    let out = declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call(
            "NrObject_GetItem",
            vec![CExpr::id(&object.name), CExpr::id(&index.name)],
        ),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(out)
}

pub fn set_item(
    ctx: &mut EmitCtx,
    object: &Value,
    index: &Value,
    value: &Value,
) -> CodegenResult<()> {
    let rc = ctx.declare_typed("rc", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call(
            "NrObject_SetItem",
            vec![
                CExpr::id(&object.name),
                CExpr::id(&index.name),
                CExpr::id(&value.name),
            ],
        ),
    ));
    ctx.fail_if_nonzero(&rc)
}

pub fn del_item(ctx: &mut EmitCtx, object: &Value, index: &Value) -> CodegenResult<()> {
    let rc = ctx.declare_typed("rc", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call(
            "NrObject_DelItem",
            vec![CExpr::id(&object.name), CExpr::id(&index.name)],
        ),
    ));
    ctx.fail_if_nonzero(&rc)
}

// ---- calls and tests ------------------------------------------------------

/// Generic call through the runtime: positional tuple plus optional kwargs
/// dict, both nullable.
pub fn call(
    ctx: &mut EmitCtx,
    func: &Value,
    args: Option<&Value>,
    kwargs: Option<&Value>,
) -> CodegenResult<Value> {
    let out = declare(ctx);
    let args_expr = args.map_or_else(CExpr::null, |v| CExpr::id(&v.name));
    let kwargs_expr = kwargs.map_or_else(CExpr::null, |v| CExpr::id(&v.name));
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call(
            "NrObject_Call",
            vec![CExpr::id(&func.name), args_expr, kwargs_expr],
        ),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(out)
}

/// Truth-test an object; returns the int slot holding the result.
pub fn is_true(ctx: &mut EmitCtx, value: &Value) -> CodegenResult<String> {
    let rc = ctx.declare_typed("istrue", CType::int(), None);
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::call("NrObject_IsTrue", vec![CExpr::id(&value.name)]),
    ));
    ctx.fail_if_negative(&rc)?;
    Ok(rc)
}

/// Identity test; no runtime entry needed, pointer equality is the answer.
pub fn is_same(ctx: &mut EmitCtx, left: &Value, right: &Value, negate: bool) -> String {
    let rc = ctx.declare_typed("is_same", CType::int(), None);
    let op = if negate { "!=" } else { "==" };
    ctx.add_expr(CExpr::assign_id(
        &rc,
        CExpr::binary(op, CExpr::id(&left.name), CExpr::id(&right.name)),
    ));
    rc
}

pub fn get_iter(ctx: &mut EmitCtx, iterable: &Value) -> CodegenResult<Value> {
    let out = declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrObject_GetIter", vec![CExpr::id(&iterable.name)]),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(out)
}

/// Advance an iterator without a failure check: a null result with no
/// pending error is normal exhaustion, which the loop emitter handles.
pub fn iter_next_raw(ctx: &mut EmitCtx, iter: &Value) -> Value {
    let out = declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrIter_Next", vec![CExpr::id(&iter.name)]),
    ));
    out
}

// ---- operator dispatch ----------------------------------------------------

fn binop_entry(op: BinOpKind) -> &'static str {
    match op {
        BinOpKind::Add => "NrNum_Add",
        BinOpKind::Sub => "NrNum_Subtract",
        BinOpKind::Mult => "NrNum_Multiply",
        BinOpKind::Div => "NrNum_TrueDivide",
        BinOpKind::FloorDiv => "NrNum_FloorDivide",
        BinOpKind::Mod => "NrNum_Remainder",
        BinOpKind::Pow => "NrNum_Power",
        BinOpKind::LShift => "NrNum_Lshift",
        BinOpKind::RShift => "NrNum_Rshift",
        BinOpKind::BitOr => "NrNum_Or",
        BinOpKind::BitXor => "NrNum_Xor",
        BinOpKind::BitAnd => "NrNum_And",
    }
}

fn inplace_binop_entry(op: BinOpKind) -> &'static str {
    match op {
        BinOpKind::Add => "NrNum_InPlaceAdd",
        BinOpKind::Sub => "NrNum_InPlaceSubtract",
        BinOpKind::Mult => "NrNum_InPlaceMultiply",
        BinOpKind::Div => "NrNum_InPlaceTrueDivide",
        BinOpKind::FloorDiv => "NrNum_InPlaceFloorDivide",
        BinOpKind::Mod => "NrNum_InPlaceRemainder",
        BinOpKind::Pow => "NrNum_InPlacePower",
        BinOpKind::LShift => "NrNum_InPlaceLshift",
        BinOpKind::RShift => "NrNum_InPlaceRshift",
        BinOpKind::BitOr => "NrNum_InPlaceOr",
        BinOpKind::BitXor => "NrNum_InPlaceXor",
        BinOpKind::BitAnd => "NrNum_InPlaceAnd",
    }
}

pub fn binop(ctx: &mut EmitCtx, op: BinOpKind, left: &Value, right: &Value) -> CodegenResult<Value> {
    dispatch_binop(ctx, binop_entry(op), op, left, right)
}

pub fn inplace_binop(
    ctx: &mut EmitCtx,
    op: BinOpKind,
    left: &Value,
    right: &Value,
) -> CodegenResult<Value> {
    dispatch_binop(ctx, inplace_binop_entry(op), op, left, right)
}

fn dispatch_binop(
    ctx: &mut EmitCtx,
    entry: &str,
    op: BinOpKind,
    left: &Value,
    right: &Value,
) -> CodegenResult<Value> {
    let out = declare(ctx);
    let mut args = vec![CExpr::id(&left.name), CExpr::id(&right.name)];
    if op == BinOpKind::Pow {
        // ternary power entry point; no modulus
        args.push(CExpr::id("Nr_None"));
    }
    ctx.add_expr(CExpr::assign_id(&out.name, CExpr::call(entry, args)));
    ctx.fail_if_null(&out.name)?;
    Ok(out)
}

pub fn unaryop(
    ctx: &mut EmitCtx,
    op: UnaryOpKind,
    operand: &Value,
) -> CodegenResult<Value> {
    match op {
        UnaryOpKind::Not => {
            let rc = is_true(ctx, operand)?;
            let out = declare(ctx);
            ctx.add_expr(CExpr::assign_id(
                &out.name,
                CExpr::call(
                    "NrBool_FromLong",
                    vec![CExpr::not(CExpr::id(&rc))],
                ),
            ));
            ctx.fail_if_null(&out.name)?;
            Ok(Value::new(out.name, ReprKind::Bool))
        }
        UnaryOpKind::Invert | UnaryOpKind::UAdd | UnaryOpKind::USub => {
            let entry = match op {
                UnaryOpKind::Invert => "NrNum_Invert",
                UnaryOpKind::UAdd => "NrNum_Positive",
                _ => "NrNum_Negative",
            };
            let out = declare(ctx);
            ctx.add_expr(CExpr::assign_id(
                &out.name,
                CExpr::call(entry, vec![CExpr::id(&operand.name)]),
            ));
            ctx.fail_if_null(&out.name)?;
            Ok(out)
        }
    }
}

fn compare_constant(op: CmpOpKind) -> &'static str {
    match op {
        CmpOpKind::Eq => "NR_EQ",
        CmpOpKind::NotEq => "NR_NE",
        CmpOpKind::Lt => "NR_LT",
        CmpOpKind::LtE => "NR_LE",
        CmpOpKind::Gt => "NR_GT",
        CmpOpKind::GtE => "NR_GE",
        _ => unreachable!("identity/membership compare routed separately"),
    }
}

/// Rich comparison producing an object result.
pub fn rich_compare(
    ctx: &mut EmitCtx,
    op: CmpOpKind,
    left: &Value,
    right: &Value,
) -> CodegenResult<Value> {
    match op {
        CmpOpKind::Is | CmpOpKind::IsNot => {
            let rc = is_same(ctx, left, right, op == CmpOpKind::IsNot);
            bool_from_int(ctx, &rc)
        }
        CmpOpKind::In | CmpOpKind::NotIn => {
            let rc = ctx.declare_typed("contains", CType::int(), None);
            ctx.add_expr(CExpr::assign_id(
                &rc,
                CExpr::call(
                    "NrSeq_Contains",
                    vec![CExpr::id(&right.name), CExpr::id(&left.name)],
                ),
            ));
            ctx.fail_if_negative(&rc)?;
            if op == CmpOpKind::NotIn {
                ctx.add_expr(CExpr::assign_id(&rc, CExpr::not(CExpr::id(&rc))));
            }
            bool_from_int(ctx, &rc)
        }
        _ => {
            let out = declare(ctx);
            ctx.add_expr(CExpr::assign_id(
                &out.name,
                CExpr::call(
                    "NrObject_RichCompare",
                    vec![
                        CExpr::id(&left.name),
                        CExpr::id(&right.name),
                        CExpr::id(compare_constant(op)),
                    ],
                ),
            ));
            ctx.fail_if_null(&out.name)?;
            Ok(out)
        }
    }
}

fn bool_from_int(ctx: &mut EmitCtx, int_slot: &str) -> CodegenResult<Value> {
    let out = declare(ctx);
    ctx.add_expr(CExpr::assign_id(
        &out.name,
        CExpr::call("NrBool_FromLong", vec![CExpr::id(int_slot)]),
    ));
    ctx.fail_if_null(&out.name)?;
    Ok(Value::new(out.name, ReprKind::Bool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgen::{CType, Printer};
    use crate::compiler::flow::FlowLabel;

    fn with_func<F: FnOnce(&mut EmitCtx)>(build: F) -> String {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::obj(), vec![]);
        ctx.push_flow(FlowLabel::End);
        build(&mut ctx);
        let func = ctx.end_func().unwrap();
        Printer::new().print_func_def(&func)
    }

    #[test]
    fn test_get_attr_emits_call_and_check() {
        let text = with_func(|ctx| {
            let obj = Value::obj("o");
            object_get(ctx, &obj);
        });
        assert!(text.contains("NrObject_GetAttr(o, \"field\")"));
        assert!(text.contains("Nr_UNLIKELY"));
        assert!(text.contains("goto end;"));
    }

    fn object_get(ctx: &mut EmitCtx, obj: &Value) {
        get_attr(ctx, obj, "field").unwrap();
    }

    #[test]
    fn test_decref_unregisters_cleanup() {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::obj(), vec![]);
        ctx.push_flow(FlowLabel::End);
        let value = declare(&mut ctx);
        assert_eq!(ctx.cleanup_slots().len(), 1);
        decref(&mut ctx, &value);
        assert!(ctx.cleanup_slots().is_empty());
        let _ = ctx.end_func();
    }

    #[test]
    fn test_binop_pow_gets_none_modulus() {
        let text = with_func(|ctx| {
            let l = Value::obj("l");
            let r = Value::obj("r");
            binop(ctx, BinOpKind::Pow, &l, &r).unwrap();
        });
        assert!(text.contains("NrNum_Power(l, r, Nr_None)"));
    }

    #[test]
    fn test_membership_swaps_operands() {
        let text = with_func(|ctx| {
            let item = Value::obj("item");
            let seq = Value::obj("seq");
            rich_compare(ctx, CmpOpKind::In, &item, &seq).unwrap();
        });
        assert!(text.contains("NrSeq_Contains(seq, item)"));
    }
}
