//! Generator lowering tests
//!
//! A generator compiles to a stub that creates the coroutine and a runner
//! entered on its dedicated stack. These tests pin the switch protocol:
//! transfer counts, the exhaustion sentinel, and the merged field-access
//! strategy of generator-closures.

mod common;

use common::{count_occurrences, function_body, AstBuilder};
use nacre_codegen::compile;

fn two_yield_module() -> nacre_ast::Module {
    // def g():
    //     yield 1
    //     yield 2
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let y1 = b.yield_(Some(one));
    let s1 = b.expr_stmt(y1);
    let two = b.int(2);
    let y2 = b.yield_(Some(two));
    let s2 = b.expr_stmt(y2);
    let gen = b.func_def("g", &[], vec![s1, s2]);
    b.module("m", vec![gen])
}

#[test]
fn test_stub_creates_coroutine() {
    let compiled = compile(&two_yield_module()).unwrap();
    let stub = function_body(&compiled.source, "m_g_stub");

    // args block: self, generator, yield slot, then arguments
    assert!(stub.contains("calloc(3, sizeof(NrObject*))"));
    assert!(stub.contains("NrGen_New(\"g\", m_g_runner, gen_argslist, 4096)"));
    // the generator learns its own identity through the block
    assert!(stub.contains("gen_argslist[1] = __return_value__;"));
}

#[test]
fn test_runner_switches_out_per_yield_and_once_for_exhaustion() {
    let compiled = compile(&two_yield_module()).unwrap();
    let runner = function_body(&compiled.source, "m_g_runner");

    // two yields plus the final exhaustion switch-out
    assert_eq!(count_occurrences(runner, "NrCoro_Transfer"), 3);
    // entered once at the top and re-entered after each yield
    assert_eq!(count_occurrences(runner, "NrGen_EnterContext"), 3);
    assert_eq!(count_occurrences(runner, "NrGen_LeaveContext"), 3);
}

#[test]
fn test_yield_publishes_value_then_clears_slot() {
    let compiled = compile(&two_yield_module()).unwrap();
    let runner = function_body(&compiled.source, "m_g_runner");

    // each yield writes the shared slot before transferring and clears it
    // on resumption; the exhaustion path clears it one final time
    assert_eq!(count_occurrences(runner, "__args__[2] = NULL;"), 3);

    // values go out in source order
    let first = runner.find("NrInt_FromLong(1)").unwrap();
    let second = runner.find("NrInt_FromLong(2)").unwrap();
    assert!(first < second);

    // exhaustion order: leave context, clear sentinel, transfer out
    let tail = &runner[runner.rfind("end:;").unwrap()..];
    let leave = tail.find("NrGen_LeaveContext").unwrap();
    let clear = tail.find("__args__[2] = NULL;").unwrap();
    let transfer = tail.find("NrCoro_Transfer").unwrap();
    assert!(leave < clear);
    assert!(clear < transfer);
}

#[test]
fn test_explicit_return_exhausts_through_end_label() {
    // def g():
    //     yield 1
    //     return
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let y = b.yield_(Some(one));
    let s = b.expr_stmt(y);
    let ret = b.ret(None);
    let gen = b.func_def("g", &[], vec![s, ret]);
    let module = b.module("m", vec![gen]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_g_runner");

    // the return routes through the shared exhaustion point: exactly one
    // sentinel-clear-then-transfer tail after the end label
    let tail = &runner[runner.rfind("end:;").unwrap()..];
    assert_eq!(count_occurrences(tail, "NrCoro_Transfer"), 1);
    assert!(runner.contains("goto end;"));
}

#[test]
fn test_generator_arguments_arrive_through_block() {
    // def g(n):
    //     yield n
    let mut b = AstBuilder::new();
    let n_ref = b.name("n");
    let y = b.yield_(Some(n_ref));
    let s = b.expr_stmt(y);
    let gen = b.func_def("g", &["n"], vec![s]);
    let module = b.module("m", vec![gen]);

    let compiled = compile(&module).unwrap();
    let stub = function_body(&compiled.source, "m_g_stub");
    let runner = function_body(&compiled.source, "m_g_runner");

    // stub packs the argument after the three protocol slots
    assert!(stub.contains("gen_argslist[3]"));
    // runner unpacks it from the same slot
    assert!(runner.contains("= __args__[3];"));
}

#[test]
fn test_generator_closure_merges_both_strategies() {
    // def g(step):
    //     def peek():
    //         return step
    //     yield step
    let mut b = AstBuilder::new();
    let step_in_peek = b.name("step");
    let peek_ret = b.ret(Some(step_in_peek));
    let peek = b.func_def("peek", &[], vec![peek_ret]);
    let step_in_yield = b.name("step");
    let y = b.yield_(Some(step_in_yield));
    let s = b.expr_stmt(y);
    let gen = b.func_def("g", &["step"], vec![peek, s]);
    let module = b.module("m", vec![gen]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_g_runner");

    // argument lands directly in the shared cell, not a C local
    assert!(runner.contains("bind generator-closure arg 'step'"));
    assert!(runner.contains("__stack__[0]->cells[0]"));
    // and the yield still goes through the coroutine protocol
    assert!(runner.contains("NrCoro_Transfer"));

    // the nested function reads the same cell through the shared stack
    let peek_runner = function_body(&compiled.source, "m_peek_runner");
    assert!(peek_runner.contains("__stack__[0]->cells[0]"));
}
