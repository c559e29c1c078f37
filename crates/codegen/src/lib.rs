//! # Nacre Code Generation
//!
//! The middle and back end of the Nacre ahead-of-time translator: given a
//! parsed module, resolve scopes and closures, lower each function to a
//! linear IR with a control-flow graph, and emit an equivalent C
//! translation unit against the reference-counted `Nr` object runtime.
//!
//! ## Architecture
//!
//! The pipeline, one module at a time:
//! 1. **Resolve**: build the scope tree, bind every name, classify locals
//!    as stack slots, shared heap cells, or namespace entries
//! 2. **Lower**: flatten each function-like scope into linear ops and slice
//!    them into basic blocks (the analysis-side view of the program)
//! 3. **Emit**: walk the resolved AST and produce native declarations and
//!    statements, including the non-local-exit and generator protocols
//! 4. **Print**: serialize the C output AST to one translation unit
//!
//! ## Usage
//!
//! ```rust,ignore
//! use nacre_codegen::compile;
//!
//! let compiled = compile(&module)?;
//! std::fs::write("out/mod.c", &compiled.source)?;
//! ```

pub mod cgen;
pub mod compiler;
pub mod error;
pub mod ir;
pub mod linker;
pub mod resolve;
pub mod values;

pub use cgen::{Printer, TranslationUnit};
pub use compiler::ModuleCompiler;
pub use error::{CodegenError, CodegenResult};
pub use ir::{Cfg, Frame, IrModule, Lowerer};
pub use linker::{Located, MissLog, ModuleLocator, NullLocator, ProjectLocator};
pub use resolve::{Resolution, Resolver};
pub use values::ModuleRepr;

use nacre_ast as ast;

/// Everything produced for one source module.
#[derive(Debug)]
pub struct CompiledModule {
    pub name: String,
    pub resolution: Resolution,
    pub ir: IrModule,
    pub unit: TranslationUnit,
    pub source: String,
}

/// Compile one module: resolve, lower, emit, print.
pub fn compile(module: &ast::Module) -> CodegenResult<CompiledModule> {
    let mut resolution = Resolver::resolve_module(module)?;
    let ir = Lowerer::lower_module(&mut resolution, module)?;
    let unit = ModuleCompiler::compile(&mut resolution, module)?;
    let source = Printer::new().print_unit(&unit);
    Ok(CompiledModule {
        name: module.name.clone(),
        resolution,
        ir,
        unit,
        source,
    })
}

/// A compiled program: one unit per module plus the aggregating `main`.
#[derive(Debug)]
pub struct CompiledProgram {
    pub modules: Vec<CompiledModule>,
    pub main_source: String,
}

/// Compile a set of modules and the process-wide `main` that builds each
/// module and invokes the entry module last.
pub fn compile_program(modules: &[ast::Module], entry: &str) -> CodegenResult<CompiledProgram> {
    let compiled: Vec<CompiledModule> = modules.iter().map(compile).collect::<Result<_, _>>()?;

    let reprs: Vec<ModuleRepr> = compiled
        .iter()
        .map(|m| ModuleRepr::new(m.name.clone()))
        .collect();
    let entry_repr = reprs
        .iter()
        .find(|r| r.name == entry)
        .ok_or_else(|| CodegenError::UnresolvedModule {
            module: entry.to_string(),
        })?
        .clone();

    let main_unit = ModuleCompiler::emit_main(&reprs, &entry_repr);
    let main_source = Printer::new().print_unit(&main_unit);
    Ok(CompiledProgram {
        modules: compiled,
        main_source,
    })
}
