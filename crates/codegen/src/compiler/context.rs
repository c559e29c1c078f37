//! Emission context
//!
//! The single mutable compiler context threaded through every visitor call:
//! the translation unit under construction, a stack of open function bodies,
//! per-function name/temporary/label counters, the end-of-scope cleanup
//! list, and the flow-control label stack. Nothing here is ambient or
//! global; dropping the context drops all emission state.

use crate::cgen::{CBlock, CExpr, CFuncDef, CParam, CStmt, CType, CVarDecl, TranslationUnit};
use crate::compiler::flow::FlowLabel;
use crate::error::{CodegenError, CodegenResult};
use std::collections::HashSet;

/// One function body under construction.
pub struct FuncFrame {
    pub name: String,
    ret: CType,
    params: Vec<CParam>,
    is_static: bool,
    /// Hoisted declarations; printed at the top of the body.
    decls: Vec<CVarDecl>,
    /// Stack of open compound statements; statements append to the innermost.
    blocks: Vec<CBlock>,
    /// Owned object slots released at the `end` label, in reverse order.
    pub cleanup: Vec<String>,
    /// Flow-control labels active at the current emission point.
    pub flow: Vec<FlowLabel>,
    names: HashSet<String>,
    tmp: u32,
    resume: u32,
    resume_declared: bool,
    cookie: u32,
}

impl FuncFrame {
    fn new(name: String, ret: CType, params: Vec<CParam>) -> Self {
        let mut names = HashSet::new();
        for param in &params {
            names.insert(param.name.clone());
        }
        FuncFrame {
            name,
            ret,
            params,
            is_static: true,
            decls: Vec::new(),
            blocks: vec![CBlock::new()],
            cleanup: Vec::new(),
            flow: Vec::new(),
            names,
            tmp: 0,
            resume: 0,
            resume_declared: false,
            cookie: 0,
        }
    }
}

/// The emission context.
pub struct EmitCtx {
    pub tu: TranslationUnit,
    frames: Vec<FuncFrame>,
}

impl EmitCtx {
    pub fn new() -> Self {
        EmitCtx {
            tu: TranslationUnit::new(),
            frames: Vec::new(),
        }
    }

    // ---- function lifecycle ----------------------------------------------

    /// Open a new function body; emission goes there until the matching
    /// [`EmitCtx::end_func`].
    pub fn begin_func(&mut self, name: impl Into<String>, ret: CType, params: Vec<CParam>) {
        self.frames.push(FuncFrame::new(name.into(), ret, params));
    }

    /// Close the innermost function and hand back its definition.
    pub fn end_func(&mut self) -> CodegenResult<CFuncDef> {
        let mut frame = self
            .frames
            .pop()
            .ok_or_else(|| CodegenError::Internal("end_func with no open function".into()))?;
        if frame.blocks.len() != 1 {
            return Err(CodegenError::Internal(format!(
                "function {} closed with {} open blocks",
                frame.name,
                frame.blocks.len()
            )));
        }
        let mut body = frame.blocks.pop().expect("checked above");
        body.decls = frame.decls;
        Ok(CFuncDef {
            name: frame.name,
            ret: frame.ret,
            params: frame.params,
            is_static: frame.is_static,
            body,
        })
    }

    pub fn frame(&mut self) -> &mut FuncFrame {
        self.frames.last_mut().expect("no open function frame")
    }

    pub fn frame_ref(&self) -> &FuncFrame {
        self.frames.last().expect("no open function frame")
    }

    pub fn in_function(&self) -> bool {
        !self.frames.is_empty()
    }

    // ---- statement emission ----------------------------------------------

    pub fn add(&mut self, stmt: CStmt) {
        self.frame()
            .blocks
            .last_mut()
            .expect("function frame always has an open block")
            .add(stmt);
    }

    pub fn add_expr(&mut self, expr: CExpr) {
        self.add(CStmt::Expr(expr));
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.add(CStmt::Comment(text.into()));
    }

    /// Emit into a detached block; used for if/else arms and loop bodies.
    pub fn nested<F>(&mut self, fill: F) -> CodegenResult<CBlock>
    where
        F: FnOnce(&mut Self) -> CodegenResult<()>,
    {
        self.frame().blocks.push(CBlock::new());
        let result = fill(self);
        let block = self
            .frame()
            .blocks
            .pop()
            .expect("nested block pushed above");
        result?;
        Ok(block)
    }

    // ---- names and declarations ------------------------------------------

    /// Reserve a unique identifier in the current function.
    pub fn reserve_name(&mut self, base: &str) -> String {
        let frame = self.frame();
        let sanitized = sanitize(base);
        if frame.names.insert(sanitized.clone()) {
            return sanitized;
        }
        let mut counter = 1;
        loop {
            let candidate = format!("{}_{}", sanitized, counter);
            if frame.names.insert(candidate.clone()) {
                return candidate;
            }
            counter += 1;
        }
    }

    pub fn tmp_name(&mut self) -> String {
        loop {
            let n = self.frame().tmp;
            self.frame().tmp += 1;
            let candidate = format!("t{}", n);
            if self.frame().names.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Declare an owned `NrObject *` slot, hoisted to the function top and
    /// registered for end-of-scope cleanup.
    pub fn declare_obj(&mut self, base: &str) -> String {
        let name = self.reserve_name(base);
        self.frame().decls.push(CVarDecl::obj(&name));
        self.frame().cleanup.push(name.clone());
        name
    }

    /// Declare a temporary owned object slot.
    pub fn tmp_obj(&mut self) -> String {
        let name = self.tmp_name();
        self.frame().decls.push(CVarDecl::obj(&name));
        self.frame().cleanup.push(name.clone());
        name
    }

    /// Declare a non-object local (int flags, sizes, stack pointers); never
    /// in the cleanup list.
    pub fn declare_typed(&mut self, base: &str, ty: CType, init: Option<CExpr>) -> String {
        let name = self.reserve_name(base);
        let mut decl = CVarDecl::new(&name, ty);
        decl.init = init;
        self.frame().decls.push(decl);
        name
    }

    /// Drop a slot from the cleanup list; paired with an emitted decref so
    /// the end label cannot release it a second time.
    pub fn cleanup_remove(&mut self, name: &str) {
        self.frame().cleanup.retain(|n| n != name);
    }

    /// The cleanup list, innermost-last.
    pub fn cleanup_slots(&self) -> Vec<String> {
        self.frame_ref().cleanup.clone()
    }

    // ---- flow-control bookkeeping ----------------------------------------

    pub fn push_flow(&mut self, label: FlowLabel) {
        self.frame().flow.push(label);
    }

    pub fn pop_flow(&mut self) -> FlowLabel {
        self.frame()
            .flow
            .pop()
            .expect("flow stack pop without matching push")
    }

    /// Declare the per-function `__resume__` cell if it is not there yet.
    pub fn ensure_resume_cell(&mut self) {
        if !self.frame().resume_declared {
            self.frame().resume_declared = true;
            let decl = CVarDecl::new("__resume__", CType::int()).with_init(CExpr::IntConst(0));
            self.frame().decls.push(decl);
            self.frame().names.insert("__resume__".to_string());
        }
    }

    /// Arm a new resume point; returns its non-zero dispatch id and the
    /// resume label to place after the cleanup jump. Declares the per-
    /// function `__resume__` cell on first use.
    pub fn new_resume_point(&mut self) -> (i64, String) {
        self.ensure_resume_cell();
        self.frame().resume += 1;
        let id = self.frame().resume as i64;
        let label = format!("resume{}", id);
        (id, label)
    }

    /// A fresh exception-cookie index for this function.
    pub fn next_cookie(&mut self) -> u32 {
        let id = self.frame().cookie;
        self.frame().cookie += 1;
        id
    }
}

impl Default for EmitCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// Make an arbitrary source name usable as a C identifier.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_name_uniquifies() {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::obj(), vec![]);
        let a = ctx.reserve_name("x");
        let b = ctx.reserve_name("x");
        assert_eq!(a, "x");
        assert_eq!(b, "x_1");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a.b<c>"), "a_b_c_");
        assert_eq!(sanitize("3x"), "_3x");
    }

    #[test]
    fn test_cleanup_registration_and_removal() {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::obj(), vec![]);
        let a = ctx.declare_obj("a");
        let b = ctx.declare_obj("b");
        assert_eq!(ctx.cleanup_slots(), vec![a.clone(), b.clone()]);
        ctx.cleanup_remove(&a);
        assert_eq!(ctx.cleanup_slots(), vec![b]);
    }

    #[test]
    fn test_end_func_hoists_decls() {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::void(), vec![]);
        ctx.declare_obj("x");
        ctx.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id("x")]));
        let func = ctx.end_func().unwrap();
        assert_eq!(func.body.decls.len(), 1);
        assert_eq!(func.body.stmts.len(), 1);
    }

    #[test]
    fn test_nested_blocks_detach() {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::void(), vec![]);
        let block = ctx
            .nested(|ctx| {
                ctx.add_expr(CExpr::id("inner"));
                Ok(())
            })
            .unwrap();
        assert_eq!(block.stmts.len(), 1);
        let func = ctx.end_func().unwrap();
        assert!(func.body.stmts.is_empty());
    }
}
