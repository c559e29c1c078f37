//! Non-local control flow emission tests
//!
//! Exercises the hardest protocol end to end: raise/return/break crossing
//! finally and with regions, exception dispatch, and the resume machinery
//! in the emitted C source.

mod common;

use common::{count_occurrences, function_body, AstBuilder};
use nacre_codegen::compile;

#[test]
fn test_finally_body_emitted_once_for_raise() {
    // def f():
    //     try:
    //         raise E()
    //     finally:
    //         cleanup()
    let mut b = AstBuilder::new();
    let e_cls = b.name("E");
    let exc = b.call(e_cls, vec![]);
    let raise = b.raise(exc);
    let cleanup_fn = b.name("cleanup");
    let call = b.call(cleanup_fn, vec![]);
    let cleanup = b.expr_stmt(call);
    let try_stmt = b.try_(vec![raise], vec![], vec![], vec![cleanup]);
    let func = b.func_def("f", &[], vec![try_stmt]);
    let module = b.module("m", vec![func]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_f_runner");

    // the cleanup call is emitted exactly once; every path reaches it via
    // the finally label rather than by duplication
    assert_eq!(count_occurrences(runner, "\"cleanup\""), 1);
    assert!(runner.contains("finally0:;"));

    // the raise parks the exception, runs the cleanup, and restores
    let fetch = runner.find("NrErr_Fetch").unwrap();
    let jump = runner.find("goto finally0;").unwrap();
    let restore = runner.find("NrErr_Restore").unwrap();
    assert!(fetch < jump);
    assert!(jump < restore);
}

#[test]
fn test_return_through_finally_arms_resume() {
    // def f():
    //     try:
    //         return 1
    //     finally:
    //         cleanup()
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let ret = b.ret(Some(one));
    let cleanup_fn = b.name("cleanup");
    let call = b.call(cleanup_fn, vec![]);
    let cleanup = b.expr_stmt(call);
    let try_stmt = b.try_(vec![ret], vec![], vec![], vec![cleanup]);
    let func = b.func_def("f", &[], vec![try_stmt]);
    let module = b.module("m", vec![func]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_f_runner");

    assert!(runner.contains("__resume__ = 1;"));
    assert!(runner.contains("goto finally0;"));
    assert!(runner.contains("resume1:;"));
    // the finally closes with a dispatch back to the suspended exit
    assert!(runner.contains("switch (__resume__)"));
    assert!(runner.contains("goto resume1;"));
    // the suspended exit continues to the end label
    assert!(runner.contains("goto end;"));
}

#[test]
fn test_break_runs_finally_before_leaving_loop() {
    // def f():
    //     while True:
    //         try:
    //             break
    //         finally:
    //             cleanup()
    let mut b = AstBuilder::new();
    let brk = b.brk();
    let cleanup_fn = b.name("cleanup");
    let call = b.call(cleanup_fn, vec![]);
    let cleanup = b.expr_stmt(call);
    let try_stmt = b.try_(vec![brk], vec![], vec![], vec![cleanup]);
    let test = b.bool_(true);
    let loop_stmt = b.while_(test, vec![try_stmt]);
    let func = b.func_def("f", &[], vec![loop_stmt]);
    let module = b.module("m", vec![func]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_f_runner");

    let arm = runner.find("__resume__ = 1;").unwrap();
    let to_finally = runner.find("goto finally0;").unwrap();
    let to_loop_end = runner.find("goto whileend0;").unwrap();
    assert!(arm < to_finally);
    assert!(to_finally < to_loop_end);
}

#[test]
fn test_exception_dispatch_tests_clauses_in_order() {
    // def f():
    //     try:
    //         risky()
    //     except A:
    //         pass
    //     except B as err:
    //         pass
    let mut b = AstBuilder::new();
    let risky = b.name("risky");
    let call = b.call(risky, vec![]);
    let body = b.expr_stmt(call);
    let a_cls = b.name("A");
    let pass_a = b.pass();
    let handler_a = b.handler(Some(a_cls), None, vec![pass_a]);
    let b_cls = b.name("B");
    let pass_b = b.pass();
    let handler_b = b.handler(Some(b_cls), Some("err"), vec![pass_b]);
    let try_stmt = b.try_(vec![body], vec![handler_a, handler_b], vec![], vec![]);
    let func = b.func_def("f", &[], vec![try_stmt]);
    let module = b.module("m", vec![func]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_f_runner");

    // handler label asserts a pending exception and saves the cookie
    let occurred = runner.find("NrErr_Occurred").unwrap();
    let fetch = runner.find("NrErr_Fetch").unwrap();
    assert!(occurred < fetch);

    // clause tests run in source order
    let load_a = runner.find("\"A\"").unwrap();
    let load_b = runner.find("\"B\"").unwrap();
    assert!(load_a < load_b);
    assert_eq!(count_occurrences(runner, "NrErr_GivenMatches"), 2);

    // the bound clause normalizes the cookie before binding
    assert!(runner.contains("NrErr_Normalize"));

    // the no-match tail restores and keeps unwinding
    let restore = runner.rfind("NrErr_Restore").unwrap();
    let end_jump = runner.rfind("goto end;").unwrap();
    assert!(restore < end_jump);
}

#[test]
fn test_with_loads_enter_and_exit_and_suppresses() {
    // def f():
    //     with mgr() as h:
    //         use(h)
    let mut b = AstBuilder::new();
    let mgr = b.name("mgr");
    let mgr_call = b.call(mgr, vec![]);
    let use_fn = b.name("use");
    let h_ref = b.name("h");
    let use_call = b.call(use_fn, vec![h_ref]);
    let body = b.expr_stmt(use_call);
    let with_stmt = b.with_(mgr_call, Some("h"), vec![body]);
    let func = b.func_def("f", &[], vec![with_stmt]);
    let module = b.module("m", vec![func]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_f_runner");

    // enter and exit resolve before the body runs
    let enter = runner.find("\"__enter__\"").unwrap();
    let exit = runner.find("\"__exit__\"").unwrap();
    let exit_label = runner.find("withexit0:;").unwrap();
    assert!(enter < exit_label);
    assert!(exit < exit_label);

    // the exit call sees the (possibly empty) cookie and a truthy result
    // cancels the unwind
    assert!(runner.contains("had_exc"));
    assert!(runner.contains("NrObject_IsTrue"));
    assert!(runner.contains("goto withend0;"));
}

#[test]
fn test_nested_finally_chains_resume_points() {
    // def f():
    //     try:
    //         try:
    //             return 1
    //         finally:
    //             inner()
    //     finally:
    //         outer()
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let ret = b.ret(Some(one));
    let inner_fn = b.name("inner");
    let inner_call = b.call(inner_fn, vec![]);
    let inner_cleanup = b.expr_stmt(inner_call);
    let inner_try = b.try_(vec![ret], vec![], vec![], vec![inner_cleanup]);
    let outer_fn = b.name("outer");
    let outer_call = b.call(outer_fn, vec![]);
    let outer_cleanup = b.expr_stmt(outer_call);
    let outer_try = b.try_(vec![inner_try], vec![], vec![], vec![outer_cleanup]);
    let func = b.func_def("f", &[], vec![outer_try]);
    let module = b.module("m", vec![func]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_f_runner");

    // the return unwinds through both cleanups in order: inner first
    let arm_inner = runner.find("__resume__ = 1;").unwrap();
    let arm_outer = runner.find("__resume__ = 2;").unwrap();
    assert!(arm_inner < arm_outer);
    assert!(runner.contains("resume1:;"));
    assert!(runner.contains("resume2:;"));
    // each cleanup body appears exactly once
    assert_eq!(count_occurrences(runner, "\"inner\""), 1);
    assert_eq!(count_occurrences(runner, "\"outer\""), 1);
}
