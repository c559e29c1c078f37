//! Scope and closure resolution tests
//!
//! Covers name aliasing across nesting depths, class-scope skipping,
//! re-resolution idempotence, and the fatal invalid-scope cases.

mod common;

use common::AstBuilder;
use nacre_codegen::error::CodegenError;
use nacre_codegen::resolve::{Resolver, ScopeKind, Storage};

#[test]
fn test_nested_references_alias_one_symbol() {
    // def outer():
    //     x = 1
    //     def mid():
    //         def inner():
    //             return x
    //         return x
    let mut b = AstBuilder::new();
    let x_in_inner = b.name("x");
    let x_in_mid = b.name("x");
    let inner_ret = b.ret(Some(x_in_inner.clone()));
    let inner = b.func_def("inner", &[], vec![inner_ret]);
    let mid_ret = b.ret(Some(x_in_mid.clone()));
    let mid = b.func_def("mid", &[], vec![inner, mid_ret]);
    let one = b.int(1);
    let assign = b.assign("x", one);
    let outer = b.func_def("outer", &[], vec![assign, mid]);
    let module = b.module("m", vec![outer]);

    let resolution = Resolver::resolve_module(&module).unwrap();

    let inner_id = match &x_in_inner {
        nacre_ast::Expr::Name(n) => n.node_id,
        _ => unreachable!(),
    };
    let mid_id = match &x_in_mid {
        nacre_ast::Expr::Name(n) => n.node_id,
        _ => unreachable!(),
    };
    // references at two different depths point at the *same* symbol
    let inner_sym = resolution.binding(inner_id).unwrap();
    let mid_sym = resolution.binding(mid_id).unwrap();
    assert_eq!(inner_sym, mid_sym);

    // and the defining function carries the closure flag
    let owner = resolution.table.symbol(inner_sym).scope;
    assert_eq!(resolution.table.scope(owner).name, "outer");
    assert!(resolution.table.scope(owner).has_closure);
    assert_eq!(resolution.table.storage(inner_sym), Storage::SharedCell);
}

#[test]
fn test_resolution_is_idempotent() {
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let assign = b.assign("x", one);
    let x = b.name("x");
    let use_x = b.expr_stmt(x);
    let module = b.module("m", vec![assign, use_x]);

    let mut resolver = Resolver::new();
    resolver.resolve(&module).unwrap();
    // resolving the already-resolved tree again is a no-op
    resolver.resolve(&module).unwrap();
    let resolution = resolver.finish();

    let x_symbols = (0..resolution.table.symbol_count() as u32)
        .map(nacre_codegen::resolve::SymbolId)
        .filter(|id| resolution.table.symbol(*id).name == "x")
        .count();
    assert_eq!(x_symbols, 1);
}

#[test]
fn test_class_body_sees_module_names() {
    // CONST = 1
    // class C:
    //     value = CONST
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let const_def = b.assign("CONST", one);
    let const_ref = b.name("CONST");
    let value_assign = b.assign("value", const_ref.clone());
    let class = b.class_def("C", vec![], vec![value_assign]);
    let module = b.module("m", vec![const_def, class]);

    let resolution = Resolver::resolve_module(&module).unwrap();

    let ref_id = match &const_ref {
        nacre_ast::Expr::Name(n) => n.node_id,
        _ => unreachable!(),
    };
    let sym = resolution.binding(ref_id).unwrap();
    let owner = resolution.table.symbol(sym).scope;
    assert_eq!(resolution.table.scope(owner).kind, ScopeKind::Module);
    assert!(!resolution.table.symbol(sym).optimistic);
}

#[test]
fn test_method_skips_class_scope() {
    // x = 1
    // class C:
    //     x = 2
    //     def m(self):
    //         return x     # module x, not the class attribute
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let module_x = b.assign("x", one);
    let two = b.int(2);
    let class_x = b.assign("x", two);
    let x_ref = b.name("x");
    let ret = b.ret(Some(x_ref.clone()));
    let method = b.func_def("m", &["self"], vec![ret]);
    let class = b.class_def("C", vec![], vec![class_x, method]);
    let module = b.module("m", vec![module_x, class]);

    let resolution = Resolver::resolve_module(&module).unwrap();
    let ref_id = match &x_ref {
        nacre_ast::Expr::Name(n) => n.node_id,
        _ => unreachable!(),
    };
    let sym = resolution.binding(ref_id).unwrap();
    let owner = resolution.table.symbol(sym).scope;
    assert_eq!(resolution.table.scope(owner).kind, ScopeKind::Module);
}

#[test]
fn test_yield_marks_generator() {
    let mut b = AstBuilder::new();
    let one = b.int(1);
    let y = b.yield_(Some(one));
    let stmt = b.expr_stmt(y);
    let gen = b.func_def("gen", &[], vec![stmt]);
    let module = b.module("m", vec![gen]);

    let resolution = Resolver::resolve_module(&module).unwrap();
    let gen_scope = (0..resolution.table.scope_count() as u32)
        .map(nacre_codegen::resolve::ScopeId)
        .find(|id| resolution.table.scope(*id).name == "gen")
        .unwrap();
    assert!(resolution.table.scope(gen_scope).is_generator);
}

#[test]
fn test_yield_at_module_level_is_fatal() {
    let mut b = AstBuilder::new();
    let y = b.yield_(None);
    let stmt = b.expr_stmt(y);
    let module = b.module("m", vec![stmt]);

    let err = Resolver::resolve_module(&module).unwrap_err();
    assert!(matches!(err, CodegenError::InvalidScope(_)));
}

#[test]
fn test_nonlocal_without_binding_is_fatal() {
    let mut b = AstBuilder::new();
    let decl = b.nonlocal_(&["ghost"]);
    let inner = b.func_def("inner", &[], vec![decl]);
    let outer = b.func_def("outer", &[], vec![inner]);
    let module = b.module("m", vec![outer]);

    let err = Resolver::resolve_module(&module).unwrap_err();
    assert!(matches!(err, CodegenError::Resolve { .. }));
}

#[test]
fn test_nonlocal_aliases_enclosing_binding() {
    // def outer():
    //     count = 0
    //     def bump():
    //         nonlocal count
    //         count = 1
    let mut b = AstBuilder::new();
    let zero = b.int(0);
    let init = b.assign("count", zero);
    let decl = b.nonlocal_(&["count"]);
    let one = b.int(1);
    let store = b.assign("count", one);
    let bump = b.func_def("bump", &[], vec![decl, store]);
    let outer = b.func_def("outer", &[], vec![init, bump]);
    let module = b.module("m", vec![outer]);

    let resolution = Resolver::resolve_module(&module).unwrap();
    // exactly one 'count' symbol exists, owned by outer
    let count_syms: Vec<_> = (0..resolution.table.symbol_count() as u32)
        .map(nacre_codegen::resolve::SymbolId)
        .filter(|id| resolution.table.symbol(*id).name == "count")
        .collect();
    assert_eq!(count_syms.len(), 1);
    let owner = resolution.table.symbol(count_syms[0]).scope;
    assert_eq!(resolution.table.scope(owner).name, "outer");
}

#[test]
fn test_unknown_name_resolves_optimistically() {
    let mut b = AstBuilder::new();
    let mystery = b.name("mystery");
    let stmt = b.expr_stmt(mystery.clone());
    let module = b.module("m", vec![stmt]);

    let resolution = Resolver::resolve_module(&module).unwrap();
    let ref_id = match &mystery {
        nacre_ast::Expr::Name(n) => n.node_id,
        _ => unreachable!(),
    };
    let sym = resolution.binding(ref_id).unwrap();
    assert!(resolution.table.symbol(sym).optimistic);

    // strict mode promotes the same load to a fatal error
    let err = {
        let mut resolver = Resolver::new().strict();
        resolver.resolve(&module).unwrap_err()
    };
    assert!(matches!(err, CodegenError::Resolve { .. }));
}

#[test]
fn test_builtin_names_resolve_without_bindings() {
    let mut b = AstBuilder::new();
    let print_fn = b.name("print");
    let one = b.int(1);
    let call = b.call(print_fn, vec![one]);
    let stmt = b.expr_stmt(call);
    let module = b.module("m", vec![stmt]);

    let resolution = Resolver::resolve_module(&module).unwrap();
    // print came from the builtin scope, not an optimistic synthesis
    let syms: Vec<_> = (0..resolution.table.symbol_count() as u32)
        .map(nacre_codegen::resolve::SymbolId)
        .filter(|id| resolution.table.symbol(*id).name == "print")
        .collect();
    assert_eq!(syms.len(), 1);
    assert!(!resolution.table.symbol(syms[0]).optimistic);
}
