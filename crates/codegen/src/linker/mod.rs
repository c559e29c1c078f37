//! Module resolution interface
//!
//! The discovery layer that maps dotted module names to files lives outside
//! this crate; we consume it through the [`ModuleLocator`] trait. A module
//! the locator cannot find is not fatal: the import still compiles against
//! a runtime lookup, and the miss lands in a [`MissLog`] that callers may
//! promote to an error at the end of the run.

pub mod locator;

pub use locator::{Located, ModuleLocator, NullLocator, ProjectLocator};

use crate::error::{CodegenError, CodegenResult};
use nacre_ast as ast;
use nacre_ast::Stmt;
use std::path::Path;
use text_size::TextRange;
use tracing::debug;

/// One unresolved dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissRecord {
    /// The importing module.
    pub importer: String,
    /// The dotted name that could not be located.
    pub module: String,
    pub span: TextRange,
}

/// Recorded misses for the end-of-run summary.
#[derive(Debug, Clone, Default)]
pub struct MissLog {
    records: Vec<MissRecord>,
}

impl MissLog {
    pub fn new() -> Self {
        MissLog::default()
    }

    pub fn record(&mut self, importer: &str, module: &str, span: TextRange) {
        debug!(importer, module, "unresolved module");
        self.records.push(MissRecord {
            importer: importer.to_string(),
            module: module.to_string(),
            span,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MissRecord> {
        self.records.iter()
    }

    /// In strict mode any recorded miss becomes fatal.
    pub fn check(&self, strict: bool) -> CodegenResult<()> {
        if strict {
            if let Some(first) = self.records.first() {
                return Err(CodegenError::UnresolvedModule {
                    module: first.module.clone(),
                });
            }
        }
        Ok(())
    }
}

/// A dependency discovered in a module body.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub module: String,
    pub located: Located,
    pub span: TextRange,
}

/// Walk a module's statements, locate every imported module, and log the
/// ones the locator cannot find. Compilation proceeds either way; the
/// emitted import goes through the runtime, which raises if the module is
/// really absent.
pub fn scan_imports(
    module: &ast::Module,
    locator: &dyn ModuleLocator,
    requesting_dir: &Path,
    misses: &mut MissLog,
) -> Vec<ImportRecord> {
    let mut records = Vec::new();
    scan_stmts(&module.body, module, locator, requesting_dir, misses, &mut records);
    records
}

fn scan_stmts(
    body: &[Stmt],
    module: &ast::Module,
    locator: &dyn ModuleLocator,
    dir: &Path,
    misses: &mut MissLog,
    records: &mut Vec<ImportRecord>,
) {
    for stmt in body {
        match stmt {
            Stmt::Import(s) => {
                for alias in &s.names {
                    locate_one(&alias.name, s.span, module, locator, dir, misses, records);
                }
            }
            Stmt::ImportFrom(s) => {
                locate_one(&s.module, s.span, module, locator, dir, misses, records);
            }
            Stmt::If(s) => {
                scan_stmts(&s.body, module, locator, dir, misses, records);
                scan_stmts(&s.orelse, module, locator, dir, misses, records);
            }
            Stmt::While(s) => {
                scan_stmts(&s.body, module, locator, dir, misses, records);
                scan_stmts(&s.orelse, module, locator, dir, misses, records);
            }
            Stmt::For(s) => {
                scan_stmts(&s.body, module, locator, dir, misses, records);
                scan_stmts(&s.orelse, module, locator, dir, misses, records);
            }
            Stmt::With(s) => scan_stmts(&s.body, module, locator, dir, misses, records),
            Stmt::Try(s) => {
                scan_stmts(&s.body, module, locator, dir, misses, records);
                for handler in &s.handlers {
                    scan_stmts(&handler.body, module, locator, dir, misses, records);
                }
                scan_stmts(&s.orelse, module, locator, dir, misses, records);
                scan_stmts(&s.finalbody, module, locator, dir, misses, records);
            }
            Stmt::FuncDef(s) => scan_stmts(&s.body, module, locator, dir, misses, records),
            Stmt::ClassDef(s) => scan_stmts(&s.body, module, locator, dir, misses, records),
            _ => {}
        }
    }
}

fn locate_one(
    name: &str,
    span: TextRange,
    module: &ast::Module,
    locator: &dyn ModuleLocator,
    dir: &Path,
    misses: &mut MissLog,
    records: &mut Vec<ImportRecord>,
) {
    let located = locator.locate(name, dir);
    if matches!(located, Located::Missing) {
        misses.record(&module.name, name, span);
    }
    records.push(ImportRecord {
        module: name.to_string(),
        located,
        span,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacre_ast::{Alias, ImportStmt, Module, NodeId, NodeIdGenerator};

    fn module_importing(names: &[&str]) -> Module {
        let mut ids = NodeIdGenerator::new();
        let aliases = names
            .iter()
            .map(|name| Alias {
                name: (*name).to_string(),
                asname: None,
                node_id: ids.next(),
            })
            .collect();
        Module {
            name: "main".to_string(),
            filename: "main.na".to_string(),
            body: vec![Stmt::Import(ImportStmt {
                names: aliases,
                span: TextRange::default(),
            })],
            docstring: None,
            node_id: NodeId::ROOT,
        }
    }

    #[test]
    fn test_missing_module_is_logged_not_fatal() {
        let module = module_importing(&["nowhere"]);
        let locator = NullLocator;
        let mut misses = MissLog::new();
        let records = scan_imports(&module, &locator, Path::new("."), &mut misses);
        assert_eq!(records.len(), 1);
        assert_eq!(misses.len(), 1);
        assert!(misses.check(false).is_ok());
        assert!(misses.check(true).is_err());
    }

    #[test]
    fn test_located_module_not_logged() {
        let module = module_importing(&["util"]);
        let mut locator = ProjectLocator::new();
        locator.add_source("util", "util.na");
        let mut misses = MissLog::new();
        let records = scan_imports(&module, &locator, Path::new("."), &mut misses);
        assert!(misses.is_empty());
        assert!(matches!(records[0].located, Located::Source(_)));
    }
}
