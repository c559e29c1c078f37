//! Translation unit emission tests
//!
//! Whole-module output shape: includes, the idempotent module builder, the
//! aggregated `main`, class builders, and reference-count balance over the
//! emitted statement lists.

mod common;

use common::{count_occurrences, function_body, AstBuilder};
use nacre_codegen::{compile, compile_program};

#[test]
fn test_unit_carries_runtime_includes() {
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let assign = b.assign("x", one);
    let module = b.module("m", vec![assign]);

    let compiled = compile(&module).unwrap();
    for include in ["nr_object.h", "nr_frame.h", "nr_function.h", "nr_coro.h"] {
        assert!(
            compiled.source.contains(&format!("#include \"{}\"", include)),
            "missing include {}",
            include
        );
    }
}

#[test]
fn test_module_builder_is_idempotent_and_seeds_attributes() {
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let assign = b.assign("x", one);
    let module = b.module("m", vec![assign]);

    let compiled = compile(&module).unwrap();
    let builder = function_body(&compiled.source, "nacre_module_m_build");

    // a second call returns the existing module object
    assert!(builder.contains("if (m_mod)"));
    assert!(builder.contains("return m_mod;"));
    assert!(builder.contains("NrModule_New(\"m\")"));
    for attr in ["__name__", "__file__", "__doc__"] {
        assert!(builder.contains(&format!("\"{}\"", attr)));
    }
    // module body ran: the store goes through the module namespace
    assert!(builder.contains("NrObject_SetAttr(m_mod, \"x\""));
}

#[test]
fn test_refcount_balance_in_straight_line_builder() {
    // x = 1; y = x
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let first = b.assign("x", one);
    let x_ref = b.name("x");
    let second = b.assign("y", x_ref);
    let module = b.module("m", vec![first, second]);

    let compiled = compile(&module).unwrap();
    let builder = function_body(&compiled.source, "nacre_module_m_build");

    // every owned slot declared in the builder is released exactly once at
    // the end label
    for line in builder.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("NrObject* ") {
            if let Some(name) = rest.strip_suffix(" = NULL;") {
                if name == "__return_value__" {
                    continue; // ownership transfers to the caller
                }
                assert_eq!(
                    count_occurrences(builder, &format!("Nr_XDecRef({})", name)),
                    1,
                    "slot {} must be released exactly once",
                    name
                );
            }
        }
    }
}

#[test]
fn test_function_runner_releases_owned_argument_copy() {
    // def f(x):
    //     return x
    let mut b = AstBuilder::new();
    let x_ref = b.name("x");
    let ret = b.ret(Some(x_ref));
    let func = b.func_def("f", &["x"], vec![ret]);
    let module = b.module("m", vec![func]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_f_runner");

    // the parameter is copied into an owned slot and released at the end
    assert!(runner.contains("x = arg_x;"));
    assert_eq!(count_occurrences(runner, "Nr_XIncRef(x)"), 1);
    assert_eq!(count_occurrences(runner, "Nr_XDecRef(x)"), 1);
    // the loaded return value owns its reference
    assert!(runner.contains("goto end;"));
}

#[test]
fn test_class_compiles_to_builder() {
    // class C:
    //     def m(self):
    //         return 1
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let ret = b.ret(Some(one));
    let method = b.func_def("m", &["self"], vec![ret]);
    let class = b.class_def("C", vec![], vec![method]);
    let module = b.module("mod", vec![class]);

    let compiled = compile(&module).unwrap();
    let builder = function_body(&compiled.source, "mod_C_build");

    // the class body populates a namespace dict and forges the class
    assert!(builder.contains("NrDict_New()"));
    assert!(builder.contains("NrDict_SetItemString"));
    assert!(builder.contains("NrType_BuildClass(\"C\", bases"));

    // the method got its own stub/runner pair
    assert!(compiled.source.contains("mod_m_stub"));
    assert!(compiled.source.contains("mod_m_runner"));
}

#[test]
fn test_closure_allocates_shared_stack_at_def_site() {
    // def outer():
    //     x = 1
    //     def inner():
    //         return x
    //     return inner
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let assign = b.assign("x", one);
    let x_ref = b.name("x");
    let inner_ret = b.ret(Some(x_ref));
    let inner = b.func_def("inner", &[], vec![inner_ret]);
    let inner_name = b.name("inner");
    let outer_ret = b.ret(Some(inner_name));
    let outer = b.func_def("outer", &[], vec![assign, inner, outer_ret]);
    let module = b.module("m", vec![outer]);

    let compiled = compile(&module).unwrap();
    let outer_runner = function_body(&compiled.source, "m_outer_runner");

    // outer owns the cell level and shares its stack with inner's object
    assert!(outer_runner.contains("NrCells_New(2)"));
    assert!(outer_runner.contains("NrStack_New(2)"));
    assert!(outer_runner.contains("NrFunc_SetStack"));
    // locals route through the cells
    assert!(outer_runner.contains("__stack__[0]->cells[0]"));

    let inner_runner = function_body(&compiled.source, "m_inner_runner");
    assert!(inner_runner.contains("__stack__[0]->cells[0]"));
    // inner has no cell level of its own
    assert!(!inner_runner.contains("NrCells_New"));
}

#[test]
fn test_program_main_builds_entry_last() {
    let mut b1 = AstBuilder::new();
    let one = b1.int(1);
    let assign = b1.assign("x", one);
    let util = b1.module("util", vec![assign]);

    let mut b2 = AstBuilder::new();
    let two = b2.int(2);
    let assign2 = b2.assign("y", two);
    let main_mod = b2.module("app", vec![assign2]);

    let program = compile_program(&[util, main_mod], "app").unwrap();
    assert_eq!(program.modules.len(), 2);

    let main_text = &program.main_source;
    assert!(main_text.contains("int main(int argc, char** argv)"));
    let util_pos = main_text.find("nacre_module_util_build()").unwrap();
    let app_pos = main_text.find("nacre_module_app_build()").unwrap();
    assert!(util_pos < app_pos, "entry module must build last");
    assert!(main_text.contains("NrErr_Print"));
    assert!(main_text.contains("Nr_Initialize"));
    assert!(main_text.contains("Nr_Finalize"));
}

#[test]
fn test_exception_free_function_has_bare_skeleton() {
    // def f(x):
    //     if x:
    //         x = 1
    //     while x:
    //         x = 2
    let mut b = AstBuilder::new();
    let test1 = b.name("x");
    let one = b.int(1);
    let then_assign = b.assign("x", one);
    let if_stmt = b.if_(test1, vec![then_assign], vec![]);
    let test2 = b.name("x");
    let two = b.int(2);
    let loop_assign = b.assign("x", two);
    let while_stmt = b.while_(test2, vec![loop_assign]);
    let func = b.func_def("f", &["x"], vec![if_stmt, while_stmt]);
    let module = b.module("m", vec![func]);

    let compiled = compile(&module).unwrap();
    let runner = function_body(&compiled.source, "m_f_runner");

    // one label per if, two per loop, plus the end label; nothing else
    let labels: Vec<&str> = runner
        .lines()
        .map(str::trim)
        .filter(|line| line.ends_with(":;"))
        .collect();
    pretty_assertions::assert_eq!(
        labels,
        vec!["ifend0:;", "whiletest0:;", "whileend0:;", "end:;"]
    );

    // and no finally/resume scaffolding leaked into an exception-free body
    assert!(!runner.contains("__resume__"));
    assert!(!runner.contains("NrErr_Fetch"));
}

#[test]
fn test_unknown_entry_module_is_an_error() {
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let assign = b.assign("x", one);
    let module = b.module("m", vec![assign]);

    let err = compile_program(&[module], "nope").unwrap_err();
    assert!(matches!(
        err,
        nacre_codegen::CodegenError::UnresolvedModule { .. }
    ));
}
