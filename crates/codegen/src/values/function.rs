//! Function, closure, and generator representations
//!
//! One composed representation covers every callable kind: capability flags
//! (`has_closure`, `is_generator`) select the storage strategy inside a
//! single set of field-access methods instead of a diamond of subtypes.
//!
//! Storage strategies:
//! - plain function: locals are C locals of the runner;
//! - closure: locals live in the heap locals stack, `__stack__[level]->cells[i]`,
//!   shared by reference with every nested and resumed frame;
//! - generator: locals are runner C locals, stable because the runner owns a
//!   dedicated coroutine stack; arguments arrive through the heap args block;
//! - generator-closure: the merged strategy, arguments land directly in the
//!   locals-stack cells.

use crate::cgen::{CExpr, CStmt, CType};
use crate::compiler::context::{sanitize, EmitCtx};
use crate::error::{CodegenError, CodegenResult};
use crate::resolve::{ScopeId, ScopeTable};
use crate::values::{object, Value};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Slot indices in a generator's heap args block.
pub const SELF_INDEX: i64 = 0;
pub const GEN_INDEX: i64 = 1;
pub const RET_INDEX: i64 = 2;
pub const ARGS_INDEX: i64 = 3;

/// Default native stack size for a generator's coroutine.
pub const GEN_STACK_SIZE: i64 = 4096;

#[derive(Debug, Clone)]
pub struct FuncRepr {
    pub scope: ScopeId,
    /// Source-level name.
    pub name: String,
    /// Sanitized, globally-unique C name base.
    pub c_name: String,
    pub has_closure: bool,
    pub is_generator: bool,
    pub stub_name: String,
    pub runner_name: String,
    /// The static slot holding the callable object.
    pub obj_name: String,
    /// Cell coordinates for every name reachable through the locals stack.
    layout: IndexMap<String, (usize, usize)>,
    /// This function's own level in the stack, when it keeps one.
    pub own_level: usize,
    /// Depth of the locals stack reachable from this function.
    pub stack_depth: usize,
    /// Plain locals: source name to C slot name, filled as slots declare.
    locals: HashMap<String, String>,
}

impl FuncRepr {
    /// Build the representation for a resolved function-like scope.
    pub fn new(table: &ScopeTable, scope: ScopeId, c_name: String) -> FuncRepr {
        let s = table.scope(scope);
        let has_closure = s.has_closure;
        let is_generator = s.is_generator;
        let levels = table.closure_levels(scope);
        let own_level = levels.len().saturating_sub(1);

        // enclosing levels are always cell-backed when they exist; this
        // function's own locals join them only when it carries a closure
        let mut layout = IndexMap::new();
        for (level, scope_id) in levels.iter().enumerate() {
            if level == own_level && !has_closure {
                continue;
            }
            if !table.scope(*scope_id).has_closure {
                continue;
            }
            for (index, name) in table.scope(*scope_id).local_names().iter().enumerate() {
                layout.insert((*name).to_string(), (level, index));
            }
        }

        FuncRepr {
            scope,
            name: s.name.clone(),
            stub_name: format!("{}_stub", c_name),
            runner_name: format!("{}_runner", c_name),
            obj_name: format!("{}_fnobj", c_name),
            c_name,
            has_closure,
            is_generator,
            layout,
            own_level,
            stack_depth: own_level + 1,
            locals: HashMap::new(),
        }
    }

    /// True when any local or captured name routes through the locals stack.
    pub fn uses_stack(&self) -> bool {
        !self.layout.is_empty() || self.has_closure
    }

    /// Number of cell slots at this function's own level.
    pub fn own_cell_count(&self) -> usize {
        self.layout
            .values()
            .filter(|(level, _)| *level == self.own_level)
            .count()
    }

    /// Register the C slot backing a plain local.
    pub fn bind_local(&mut self, name: &str, c_slot: String) {
        self.locals.insert(name.to_string(), c_slot);
    }

    pub fn local_slot(&self, name: &str) -> Option<&str> {
        self.locals.get(name).map(String::as_str)
    }

    fn cell_coords(&self, name: &str) -> Option<(usize, usize)> {
        self.layout.get(name).copied()
    }

    /// `__stack__[level]->cells[index]`
    fn cell_ref(level: usize, index: usize) -> CExpr {
        CExpr::index(
            CExpr::arrow(
                CExpr::index(CExpr::id("__stack__"), CExpr::IntConst(level as i64)),
                "cells",
            ),
            CExpr::IntConst(index as i64),
        )
    }

    // ---- unified field access --------------------------------------------
    //
    // One load/store/delete path for every callable kind; the capability
    // flags pick the storage inside.

    /// Load a local or captured name into a fresh slot. An unset slot raises
    /// the unbound-local error through the normal fail path.
    pub fn load_var(&self, ctx: &mut EmitCtx, name: &str) -> CodegenResult<Value> {
        let out = object::declare(ctx);
        let source = match self.cell_coords(name) {
            Some((level, index)) => Self::cell_ref(level, index),
            None => {
                let slot = self.local_slot(name).ok_or_else(|| {
                    CodegenError::Internal(format!(
                        "no storage for '{}' in function '{}'",
                        name, self.name
                    ))
                })?;
                CExpr::id(slot)
            }
        };
        ctx.add_expr(CExpr::assign_id(&out.name, source));
        self.unbound_check(ctx, &out.name, name)?;
        ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&out.name)]));
        Ok(out)
    }

    /// Store a value under a local or captured name.
    pub fn store_var(&self, ctx: &mut EmitCtx, name: &str, value: &Value) -> CodegenResult<()> {
        let slot = match self.cell_coords(name) {
            Some((level, index)) => Self::cell_ref(level, index),
            None => {
                let slot = self.local_slot(name).ok_or_else(|| {
                    CodegenError::Internal(format!(
                        "no storage for '{}' in function '{}'",
                        name, self.name
                    ))
                })?;
                CExpr::id(slot)
            }
        };
        ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&value.name)]));
        ctx.add_expr(CExpr::call("Nr_XDecRef", vec![slot.clone()]));
        ctx.add_expr(CExpr::Assign {
            lhs: Box::new(slot),
            rhs: Box::new(CExpr::id(&value.name)),
        });
        Ok(())
    }

    /// Delete a local or captured name.
    pub fn del_var(&self, ctx: &mut EmitCtx, name: &str) -> CodegenResult<()> {
        let slot = match self.cell_coords(name) {
            Some((level, index)) => Self::cell_ref(level, index),
            None => {
                let slot = self.local_slot(name).ok_or_else(|| {
                    CodegenError::Internal(format!(
                        "no storage for '{}' in function '{}'",
                        name, self.name
                    ))
                })?;
                CExpr::id(slot)
            }
        };
        ctx.add_expr(CExpr::call("Nr_XDecRef", vec![slot.clone()]));
        ctx.add_expr(CExpr::Assign {
            lhs: Box::new(slot),
            rhs: Box::new(CExpr::null()),
        });
        Ok(())
    }

    fn unbound_check(&self, ctx: &mut EmitCtx, slot: &str, name: &str) -> CodegenResult<()> {
        let then_block = ctx.nested(|ctx| {
            ctx.add_expr(CExpr::call(
                "NrErr_SetString",
                vec![
                    CExpr::id("NrExc_UnboundLocalError"),
                    CExpr::StrConst(format!(
                        "local variable '{}' referenced before assignment",
                        name
                    )),
                ],
            ));
            ctx.emit_fail_path()
        })?;
        ctx.add(CStmt::If {
            cond: CExpr::not(CExpr::id(slot)),
            then_block,
            else_block: None,
        });
        Ok(())
    }

    // ---- callable object construction ------------------------------------

    /// Create the callable object at the definition site.
    pub fn emit_funcobj_new(
        &self,
        ctx: &mut EmitCtx,
        docstring: Option<&str>,
    ) -> CodegenResult<Value> {
        let doc = match docstring {
            Some(text) => CExpr::StrConst(text.to_string()),
            None => CExpr::null(),
        };
        ctx.add_expr(CExpr::assign_id(
            &self.obj_name,
            CExpr::call(
                "NrFunc_New",
                vec![
                    CExpr::StrConst(self.name.clone()),
                    CExpr::id(&self.stub_name),
                    doc,
                ],
            ),
        ));
        ctx.fail_if_null(&self.obj_name)?;
        Ok(Value::obj(&self.obj_name))
    }

    /// Allocate this function's locals stack at the definition site: the
    /// creator allocates, enclosing levels are shared by reference (never
    /// copied), and the stack is attached to the callable object.
    pub fn emit_stack_alloc(&self, ctx: &mut EmitCtx, parent_stack: Option<CExpr>) -> CodegenResult<()> {
        let stack = ctx.declare_typed(
            &format!("{}_stack", sanitize(&self.name)),
            CType::ptr_ptr("NrCells"),
            None,
        );
        ctx.add_expr(CExpr::assign_id(
            &stack,
            CExpr::call(
                "NrStack_New",
                vec![CExpr::IntConst(self.stack_depth as i64)],
            ),
        ));
        ctx.fail_if_null(&stack)?;

        if let Some(parent) = parent_stack {
            for level in 0..self.own_level {
                ctx.add_expr(CExpr::call(
                    "NrStack_SetCells",
                    vec![
                        CExpr::id(&stack),
                        CExpr::IntConst(level as i64),
                        CExpr::index(parent.clone(), CExpr::IntConst(level as i64)),
                    ],
                ));
            }
        }
        ctx.add_expr(CExpr::call(
            "NrFunc_SetStack",
            vec![
                CExpr::id(&self.obj_name),
                CExpr::id(&stack),
                CExpr::IntConst(self.stack_depth as i64),
            ],
        ));
        Ok(())
    }

    /// Runner prologue for stack-carrying functions: fetch the shared stack
    /// from the callable, allocate this invocation's own cell level.
    pub fn emit_runner_stack_intro(&self, ctx: &mut EmitCtx) -> CodegenResult<()> {
        let stack = ctx.declare_typed(
            "__stack__",
            CType::ptr_ptr("NrCells"),
            Some(CExpr::null()),
        );
        ctx.add_expr(CExpr::assign_id(
            &stack,
            CExpr::call("NrFunc_GetStack", vec![CExpr::id("__self__")]),
        ));
        ctx.fail_if_null(&stack)?;

        if self.has_closure {
            let cells =
                ctx.declare_typed("__cells__", CType::ptr("NrCells"), Some(CExpr::null()));
            ctx.add_expr(CExpr::assign_id(
                &cells,
                CExpr::call(
                    "NrCells_New",
                    vec![CExpr::IntConst(self.own_cell_count() as i64)],
                ),
            ));
            ctx.fail_if_null(&cells)?;
            ctx.add_expr(CExpr::call(
                "NrStack_SetCells",
                vec![
                    CExpr::id(&stack),
                    CExpr::IntConst(self.own_level as i64),
                    CExpr::id(&cells),
                ],
            ));
        }
        Ok(())
    }

    /// Runner epilogue: release this invocation's cell level.
    pub fn emit_runner_stack_outro(&self, ctx: &mut EmitCtx) {
        if self.has_closure {
            ctx.add_expr(CExpr::call(
                "NrCells_Free",
                vec![
                    CExpr::id("__stack__"),
                    CExpr::IntConst(self.own_level as i64),
                ],
            ));
        }
    }

    /// Restore this frame's cell level after a call that may have recursed
    /// through the same function object.
    pub fn emit_restore_cells_after_call(&self, ctx: &mut EmitCtx) {
        if self.has_closure {
            ctx.add_expr(CExpr::call(
                "NrStack_RestoreCells",
                vec![
                    CExpr::id("__stack__"),
                    CExpr::IntConst(self.own_level as i64),
                    CExpr::id("__cells__"),
                ],
            ));
        }
    }

    // ---- generator protocol ----------------------------------------------

    /// `__args__[index]`
    pub fn args_slot(index: i64) -> CExpr {
        CExpr::index(CExpr::id("__args__"), CExpr::IntConst(index))
    }

    /// Emit a yield: publish the value in the shared slot, switch out to the
    /// last switched-in stack, and on resumption clear the slot again.
    pub fn emit_yield(&self, ctx: &mut EmitCtx, value: &Value) -> CodegenResult<()> {
        ctx.add_expr(CExpr::Assign {
            lhs: Box::new(Self::args_slot(RET_INDEX)),
            rhs: Box::new(CExpr::id(&value.name)),
        });
        ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&value.name)]));

        ctx.add_expr(CExpr::call(
            "NrGen_LeaveContext",
            vec![CExpr::id("__self__")],
        ));
        self.emit_transfer_out(ctx);
        ctx.add_expr(CExpr::call(
            "NrGen_EnterContext",
            vec![CExpr::id("__self__")],
        ));

        ctx.add_expr(CExpr::Assign {
            lhs: Box::new(Self::args_slot(RET_INDEX)),
            rhs: Box::new(CExpr::null()),
        });
        Ok(())
    }

    /// Permanent switch-out: clear the resume slot as the exhaustion
    /// sentinel, then transfer control back for the last time.
    pub fn emit_generator_exhaust(&self, ctx: &mut EmitCtx) {
        ctx.add_expr(CExpr::call(
            "NrGen_LeaveContext",
            vec![CExpr::id("__self__")],
        ));
        ctx.add_expr(CExpr::Assign {
            lhs: Box::new(Self::args_slot(RET_INDEX)),
            rhs: Box::new(CExpr::null()),
        });
        self.emit_transfer_out(ctx);
    }

    fn emit_transfer_out(&self, ctx: &mut EmitCtx) {
        ctx.add_expr(CExpr::call(
            "NrCoro_Transfer",
            vec![
                CExpr::call("NrGen_GetContext", vec![CExpr::id("__gen__")]),
                CExpr::call("NrGen_GetSourceContext", vec![CExpr::id("__gen__")]),
            ],
        ));
    }
}
