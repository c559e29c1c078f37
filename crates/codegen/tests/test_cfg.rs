//! IR lowering and CFG construction tests
//!
//! Checks the control-flow skeleton of lowered programs: label economy for
//! plain conditionals and loops, block linkage, and retention (but not
//! linkage) of unreachable ops.

mod common;

use common::AstBuilder;
use nacre_codegen::ir::{Lowerer, Op};
use nacre_codegen::resolve::Resolver;

#[test]
fn test_plain_if_produces_minimal_skeleton() {
    // x = 1
    // if x:
    //     x = 2
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let init = b.assign("x", one);
    let test = b.name("x");
    let two = b.int(2);
    let then_assign = b.assign("x", two);
    let if_stmt = b.if_(test, vec![then_assign], vec![]);
    let module = b.module("m", vec![init, if_stmt]);

    let mut resolution = Resolver::resolve_module(&module).unwrap();
    let ir = Lowerer::lower_module(&mut resolution, &module).unwrap();

    let frame = ir.frame("m").unwrap();
    // exactly one branch, no finally scaffolding for an exception-free body
    let branches = frame
        .ops()
        .iter()
        .filter(|entry| matches!(entry.op, Op::Branch { .. }))
        .count();
    assert_eq!(branches, 1);
    let cleanup_ops = frame
        .ops()
        .iter()
        .filter(|entry| {
            matches!(
                entry.op,
                Op::SetupFinally { .. } | Op::SetupExcept { .. } | Op::SaveException { .. }
            )
        })
        .count();
    assert_eq!(cleanup_ops, 0);

    let cfg = ir.cfg("m").unwrap();
    let entry = cfg.block(cfg.entry());
    assert_eq!(entry.outbound.len(), 2);
}

#[test]
fn test_while_produces_back_edge() {
    let mut b = AstBuilder::new();
    let test = b.bool_(true);
    let body = b.pass();
    let loop_stmt = b.while_(test, vec![body]);
    let module = b.module("m", vec![loop_stmt]);

    let mut resolution = Resolver::resolve_module(&module).unwrap();
    let ir = Lowerer::lower_module(&mut resolution, &module).unwrap();

    let cfg = ir.cfg("m").unwrap();
    let has_back_edge = cfg
        .blocks()
        .iter()
        .any(|block| block.outbound.iter().any(|succ| *succ <= block.id));
    assert!(has_back_edge, "loop must link back to its test block");
}

#[test]
fn test_function_gets_its_own_frame() {
    let mut b = AstBuilder::new();
    let value = b.int(42);
    let ret = b.ret(Some(value));
    let func = b.func_def("answer", &[], vec![ret]);
    let module = b.module("m", vec![func]);

    let mut resolution = Resolver::resolve_module(&module).unwrap();
    let ir = Lowerer::lower_module(&mut resolution, &module).unwrap();

    assert!(ir.frame("m").is_some());
    assert!(ir.frame("m.answer").is_some());
    // the module frame materializes the function and stores it
    let module_frame = ir.frame("m").unwrap();
    assert!(module_frame
        .ops()
        .iter()
        .any(|entry| matches!(entry.op, Op::MakeFunction { .. })));
}

#[test]
fn test_try_finally_arms_cleanup_labels() {
    let mut b = AstBuilder::new();
    let body = b.pass();
    let cleanup_fn = b.name("cleanup");
    let call = b.call(cleanup_fn, vec![]);
    let cleanup = b.expr_stmt(call);
    let try_stmt = b.try_(vec![body], vec![], vec![], vec![cleanup]);
    let module = b.module("m", vec![try_stmt]);

    let mut resolution = Resolver::resolve_module(&module).unwrap();
    let ir = Lowerer::lower_module(&mut resolution, &module).unwrap();

    let frame = ir.frame("m").unwrap();
    let setups = frame
        .ops()
        .iter()
        .filter(|entry| matches!(entry.op, Op::SetupFinally { .. }))
        .count();
    let ends = frame
        .ops()
        .iter()
        .filter(|entry| matches!(entry.op, Op::EndFinally))
        .count();
    assert_eq!(setups, 1);
    assert_eq!(ends, 1);
}

#[test]
fn test_except_dispatch_ops_in_source_order() {
    // try: pass
    // except A: pass
    // except B: pass
    let mut b = AstBuilder::new();
    let body = b.pass();
    let a = b.name("A");
    let pass_a = b.pass();
    let handler_a = b.handler(Some(a), None, vec![pass_a]);
    let b_cls = b.name("B");
    let pass_b = b.pass();
    let handler_b = b.handler(Some(b_cls), None, vec![pass_b]);
    let try_stmt = b.try_(vec![body], vec![handler_a, handler_b], vec![], vec![]);
    let module = b.module("m", vec![try_stmt]);

    let mut resolution = Resolver::resolve_module(&module).unwrap();
    let ir = Lowerer::lower_module(&mut resolution, &module).unwrap();

    let frame = ir.frame("m").unwrap();
    let matches_count = frame
        .ops()
        .iter()
        .filter(|entry| matches!(entry.op, Op::ExceptMatch { .. }))
        .count();
    assert_eq!(matches_count, 2);

    // the unmatched tail restores the cookie and re-raises
    let ops: Vec<_> = frame.ops().iter().map(|e| &e.op).collect();
    let restore_pos = ops
        .iter()
        .position(|op| matches!(op, Op::RestoreException { .. }))
        .unwrap();
    assert!(matches!(ops[restore_pos + 1], Op::Raise { exc: None, .. }));
}

#[test]
fn test_unreachable_ops_retained_but_unlinked() {
    // while True: break
    // (the jump back to the test is unreachable after break)
    let mut b = AstBuilder::new();
    let test = b.bool_(true);
    let brk = b.brk();
    let loop_stmt = b.while_(test, vec![brk]);
    let module = b.module("m", vec![loop_stmt]);

    let mut resolution = Resolver::resolve_module(&module).unwrap();
    let ir = Lowerer::lower_module(&mut resolution, &module).unwrap();

    let frame = ir.frame("m").unwrap();
    let cfg = ir.cfg("m").unwrap();
    let linked_ops: usize = cfg.blocks().iter().map(|block| block.op_count()).sum();
    assert!(linked_ops <= frame.len());
    // exactly one entry block exists
    let entries = cfg
        .blocks()
        .iter()
        .filter(|block| block.inbound.is_empty() && block.id != cfg.entry())
        .count();
    assert_eq!(entries, 0);
}

#[test]
fn test_generator_yield_lowering() {
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let y1 = b.yield_(Some(one));
    let s1 = b.expr_stmt(y1);
    let two = b.int(2);
    let y2 = b.yield_(Some(two));
    let s2 = b.expr_stmt(y2);
    let gen = b.func_def("g", &[], vec![s1, s2]);
    let module = b.module("m", vec![gen]);

    let mut resolution = Resolver::resolve_module(&module).unwrap();
    let ir = Lowerer::lower_module(&mut resolution, &module).unwrap();

    let frame = ir.frame("m.g").unwrap();
    let yields = frame
        .ops()
        .iter()
        .filter(|entry| matches!(entry.op, Op::Yield { .. }))
        .count();
    assert_eq!(yields, 2);
}
