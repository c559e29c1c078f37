//! Non-local control flow
//!
//! The flow-control label stack and the unwind protocol. Any statement that
//! transfers control out of its block (`return`, `break`, `continue`, a
//! raise, or a failed runtime call) walks the stack outward. For every
//! intervening finally/with-exit region it arms the per-function
//! `__resume__` cell with a fresh resume-point id, jumps to the cleanup
//! label, and places the resume label; the cleanup block ends with a
//! dispatch switch that sends control back to wherever the unwind left off.
//! Pending exceptions are parked in a cookie around each cleanup body and
//! restored afterwards.

use crate::cgen::{CExpr, CStmt};
use crate::compiler::context::EmitCtx;
use crate::error::{CodegenError, CodegenResult};

/// The label every function ends on; cleanup and return live there.
pub const END_LABEL: &str = "end";

/// A pending label on the flow-control stack. Consulted, never stored, by
/// statements that change control flow.
#[derive(Debug, Clone)]
pub enum FlowLabel {
    Loop {
        break_label: String,
        continue_label: String,
    },
    Except {
        label: String,
    },
    Finally(CleanupFrame),
    WithExit(CleanupFrame),
    End,
}

/// A finally/with-exit region: its cleanup label plus the resume points
/// armed against it so far. The dispatch switch is emitted from these when
/// the region closes.
#[derive(Debug, Clone)]
pub struct CleanupFrame {
    pub label: String,
    pub resume_points: Vec<(i64, String)>,
}

impl CleanupFrame {
    pub fn new(label: String) -> Self {
        CleanupFrame {
            label,
            resume_points: Vec::new(),
        }
    }
}

/// A saved (type, value, traceback) triple. The slots are cleanup-registered
/// and the fetch adds an extra reference, so a later restore (which steals
/// one reference) and the end-label release (which drops the other) balance.
#[derive(Debug, Clone)]
pub struct ExcCookie {
    pub ty: String,
    pub val: String,
    pub tb: String,
}

/// Why the stack is being unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnwindKind {
    /// An exception is pending; stop at the innermost handler.
    Fail,
    /// Normal return; run every cleanup on the way to the end label.
    Return,
    Break,
    Continue,
}

impl EmitCtx {
    // ---- exception cookies ------------------------------------------------

    /// Save the pending exception into a fresh cookie.
    pub fn fetch_exception(&mut self) -> ExcCookie {
        let cookie = ExcCookie {
            ty: self.tmp_obj(),
            val: self.tmp_obj(),
            tb: self.tmp_obj(),
        };
        self.add_expr(CExpr::call(
            "NrErr_Fetch",
            vec![
                CExpr::addr_of(CExpr::id(&cookie.ty)),
                CExpr::addr_of(CExpr::id(&cookie.val)),
                CExpr::addr_of(CExpr::id(&cookie.tb)),
            ],
        ));
        // fetch transfers one reference; restore will steal one back, and
        // the end label drops the extra
        for slot in [&cookie.ty, &cookie.val, &cookie.tb] {
            self.add_expr(CExpr::call("Nr_XIncRef", vec![CExpr::id(slot)]));
        }
        cookie
    }

    /// Re-arm a saved cookie as the pending exception.
    pub fn restore_exception(&mut self, cookie: &ExcCookie) {
        self.add_expr(CExpr::call(
            "NrErr_Restore",
            vec![
                CExpr::id(&cookie.ty),
                CExpr::id(&cookie.val),
                CExpr::id(&cookie.tb),
            ],
        ));
    }

    /// Turn the cookie's class/value pair into a concrete exception value
    /// for binding; returns the slot holding a new reference to it.
    pub fn normalize_exception(&mut self, cookie: &ExcCookie) -> String {
        self.add_expr(CExpr::call(
            "NrErr_Normalize",
            vec![
                CExpr::addr_of(CExpr::id(&cookie.ty)),
                CExpr::addr_of(CExpr::id(&cookie.val)),
                CExpr::addr_of(CExpr::id(&cookie.tb)),
            ],
        ));
        self.add_expr(CExpr::call("Nr_IncRef", vec![CExpr::id(&cookie.val)]));
        cookie.val.clone()
    }

    // ---- failure checks ---------------------------------------------------

    /// `if (Nr_UNLIKELY(!slot)) { <unwind with pending exception> }`
    pub fn fail_if_null(&mut self, slot: &str) -> CodegenResult<()> {
        let cond = CExpr::call("Nr_UNLIKELY", vec![CExpr::not(CExpr::id(slot))]);
        self.fail_if(cond)
    }

    /// For int-returning runtime entries where nonzero signals failure.
    pub fn fail_if_nonzero(&mut self, slot: &str) -> CodegenResult<()> {
        let cond = CExpr::call(
            "Nr_UNLIKELY",
            vec![CExpr::binary("!=", CExpr::IntConst(0), CExpr::id(slot))],
        );
        self.fail_if(cond)
    }

    /// For int-returning runtime entries where negative signals failure.
    pub fn fail_if_negative(&mut self, slot: &str) -> CodegenResult<()> {
        let cond = CExpr::call(
            "Nr_UNLIKELY",
            vec![CExpr::binary(">", CExpr::IntConst(0), CExpr::id(slot))],
        );
        self.fail_if(cond)
    }

    fn fail_if(&mut self, cond: CExpr) -> CodegenResult<()> {
        let then_block = self.nested(|ctx| ctx.emit_fail_path())?;
        self.add(CStmt::If {
            cond,
            then_block,
            else_block: None,
        });
        Ok(())
    }

    // ---- unwind paths -----------------------------------------------------

    /// Unwind with a pending exception: run intervening cleanups with the
    /// exception parked in a cookie, stop at the innermost handler or the
    /// end label.
    pub fn emit_fail_path(&mut self) -> CodegenResult<()> {
        self.unwind(UnwindKind::Fail)
    }

    /// Unwind for `return`: run every intervening cleanup, then jump to the
    /// end label. The return value slot is already set.
    pub fn emit_return_path(&mut self) -> CodegenResult<()> {
        self.unwind(UnwindKind::Return)
    }

    /// Unwind for `break`/`continue`: run cleanups up to the innermost loop,
    /// then jump to its break or continue label.
    pub fn emit_loop_exit(&mut self, want_break: bool) -> CodegenResult<()> {
        self.unwind(if want_break {
            UnwindKind::Break
        } else {
            UnwindKind::Continue
        })
    }

    /// Walk the flow stack outward, emitting cleanup forwarding and the
    /// final jump.
    fn unwind(&mut self, kind: UnwindKind) -> CodegenResult<()> {
        enum Step {
            Cleanup(usize),
            Stop(String),
        }

        let mut steps = Vec::new();
        let mut stopped = false;
        {
            let frame = self.frame_ref();
            for (index, label) in frame.flow.iter().enumerate().rev() {
                match label {
                    FlowLabel::Loop {
                        break_label,
                        continue_label,
                    } => match kind {
                        UnwindKind::Break => {
                            steps.push(Step::Stop(break_label.clone()));
                            stopped = true;
                        }
                        UnwindKind::Continue => {
                            steps.push(Step::Stop(continue_label.clone()));
                            stopped = true;
                        }
                        _ => {}
                    },
                    FlowLabel::Except { label } => {
                        if kind == UnwindKind::Fail {
                            steps.push(Step::Stop(label.clone()));
                            stopped = true;
                        }
                    }
                    FlowLabel::Finally(_) | FlowLabel::WithExit(_) => {
                        steps.push(Step::Cleanup(index));
                    }
                    FlowLabel::End => {
                        steps.push(Step::Stop(END_LABEL.to_string()));
                        stopped = true;
                    }
                }
                if stopped {
                    break;
                }
            }
        }
        if !stopped {
            match kind {
                UnwindKind::Break => {
                    return Err(CodegenError::InvalidScope("break outside of loop".into()))
                }
                UnwindKind::Continue => {
                    return Err(CodegenError::InvalidScope(
                        "continue outside of loop".into(),
                    ))
                }
                _ => {
                    return Err(CodegenError::Internal(
                        "flow stack has no end label".into(),
                    ))
                }
            }
        }

        let exception_pending = kind == UnwindKind::Fail;
        for step in steps {
            match step {
                Step::Cleanup(index) => {
                    let cookie = if exception_pending {
                        Some(self.fetch_exception())
                    } else {
                        None
                    };
                    let (id, resume_label) = self.new_resume_point();
                    let cleanup_label = {
                        let frame = self.frame();
                        match &mut frame.flow[index] {
                            FlowLabel::Finally(cleanup) | FlowLabel::WithExit(cleanup) => {
                                cleanup.resume_points.push((id, resume_label.clone()));
                                cleanup.label.clone()
                            }
                            _ => unreachable!("cleanup step indexes a cleanup entry"),
                        }
                    };
                    self.add_expr(CExpr::assign_id("__resume__", CExpr::IntConst(id)));
                    self.add(CStmt::Goto(cleanup_label));
                    self.add(CStmt::Label(resume_label));
                    if let Some(cookie) = &cookie {
                        self.restore_exception(cookie);
                    }
                }
                Step::Stop(label) => {
                    self.add(CStmt::Goto(label));
                }
            }
        }
        Ok(())
    }

    /// Close a cleanup region: emit the resume dispatch that forwards
    /// suspended exits to their recorded destinations. Falling through with
    /// `__resume__ == 0` continues normally.
    pub fn emit_resume_dispatch(&mut self, cleanup: &CleanupFrame) {
        if cleanup.resume_points.is_empty() {
            return;
        }
        let cases = cleanup
            .resume_points
            .iter()
            .map(|(id, dest)| {
                (
                    *id,
                    vec![
                        CStmt::Expr(CExpr::assign_id("__resume__", CExpr::IntConst(0))),
                        CStmt::Goto(dest.clone()),
                    ],
                )
            })
            .collect();
        self.add(CStmt::Switch {
            cond: CExpr::id("__resume__"),
            cases,
            default: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgen::{CType, Printer};

    fn render(ctx: &mut EmitCtx) -> String {
        let func = ctx.end_func().unwrap();
        Printer::new().print_func_def(&func)
    }

    fn new_func_ctx() -> EmitCtx {
        let mut ctx = EmitCtx::new();
        ctx.begin_func("f", CType::obj(), vec![]);
        ctx.push_flow(FlowLabel::End);
        ctx
    }

    #[test]
    fn test_return_path_without_cleanup_goes_straight_to_end() {
        let mut ctx = new_func_ctx();
        ctx.emit_return_path().unwrap();
        let text = render(&mut ctx);
        assert!(text.contains("goto end;"));
        assert!(!text.contains("__resume__"));
    }

    #[test]
    fn test_return_path_through_finally_arms_resume() {
        let mut ctx = new_func_ctx();
        ctx.push_flow(FlowLabel::Finally(CleanupFrame::new("finally0".to_string())));
        ctx.emit_return_path().unwrap();

        // the finally entry recorded the armed resume point
        let armed = match ctx.pop_flow() {
            FlowLabel::Finally(cleanup) => cleanup,
            other => panic!("unexpected flow entry: {:?}", other),
        };
        assert_eq!(armed.resume_points.len(), 1);

        let text = render(&mut ctx);
        assert!(text.contains("__resume__ = 1;"));
        assert!(text.contains("goto finally0;"));
        assert!(text.contains("resume1:;"));
        assert!(text.contains("goto end;"));
    }

    #[test]
    fn test_fail_path_stops_at_handler() {
        let mut ctx = new_func_ctx();
        ctx.push_flow(FlowLabel::Except {
            label: "except0".to_string(),
        });
        ctx.emit_fail_path().unwrap();
        let text = render(&mut ctx);
        assert!(text.contains("goto except0;"));
        assert!(!text.contains("goto end;"));
    }

    #[test]
    fn test_fail_path_parks_exception_around_finally() {
        let mut ctx = new_func_ctx();
        ctx.push_flow(FlowLabel::Finally(CleanupFrame::new("finally0".to_string())));
        ctx.emit_fail_path().unwrap();
        ctx.pop_flow();
        let text = render(&mut ctx);
        assert!(text.contains("NrErr_Fetch"));
        assert!(text.contains("goto finally0;"));
        assert!(text.contains("NrErr_Restore"));
        assert!(text.contains("goto end;"));
    }

    #[test]
    fn test_break_unwinds_to_loop_not_end() {
        let mut ctx = new_func_ctx();
        ctx.push_flow(FlowLabel::Loop {
            break_label: "whileend0".to_string(),
            continue_label: "whiletest0".to_string(),
        });
        ctx.push_flow(FlowLabel::Finally(CleanupFrame::new("finally0".to_string())));
        ctx.emit_loop_exit(true).unwrap();
        ctx.pop_flow();
        ctx.pop_flow();
        let text = render(&mut ctx);
        assert!(text.contains("goto finally0;"));
        assert!(text.contains("goto whileend0;"));
        assert!(!text.contains("goto end;"));
    }

    #[test]
    fn test_break_outside_loop_is_invalid() {
        let mut ctx = new_func_ctx();
        let err = ctx.emit_loop_exit(true).unwrap_err();
        assert!(matches!(err, CodegenError::InvalidScope(_)));
        let _ = ctx.end_func();
    }

    #[test]
    fn test_resume_dispatch_emits_switch() {
        let mut ctx = new_func_ctx();
        let mut cleanup = CleanupFrame::new("finally0".to_string());
        cleanup.resume_points.push((1, "resume1".to_string()));
        cleanup.resume_points.push((2, "resume2".to_string()));
        ctx.emit_resume_dispatch(&cleanup);
        let text = render(&mut ctx);
        assert!(text.contains("switch (__resume__)"));
        assert!(text.contains("case 1:"));
        assert!(text.contains("goto resume2;"));
    }

    #[test]
    fn test_continue_picks_continue_label() {
        let mut ctx = new_func_ctx();
        ctx.push_flow(FlowLabel::Loop {
            break_label: "forend0".to_string(),
            continue_label: "fornext0".to_string(),
        });
        ctx.emit_loop_exit(false).unwrap();
        ctx.pop_flow();
        let text = render(&mut ctx);
        assert!(text.contains("goto fornext0;"));
    }
}
