//! IR operation definitions
//!
//! A closed tagged union: every operation the lowering can produce is a
//! variant here, so an unhandled kind is a compile-time error in whatever
//! matches on it. Value-producing ops write a fresh [`Temp`] that is never
//! overwritten (static single use).

use crate::resolve::{ScopeId, SymbolId};
use nacre_ast::{BinOpKind, BoolOpKind, CmpOpKind, UnaryOpKind};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A single-assignment temporary, numbered per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Temp(pub u32);

impl std::fmt::Display for Temp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Constants loadable by a single op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
    None,
}

/// One IR operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    LoadConst {
        target: Temp,
        value: Const,
    },
    LoadLocal {
        target: Temp,
        symbol: SymbolId,
    },
    StoreLocal {
        symbol: SymbolId,
        value: Temp,
    },
    LoadGlobal {
        target: Temp,
        symbol: SymbolId,
    },
    StoreGlobal {
        symbol: SymbolId,
        value: Temp,
    },
    LoadAttr {
        target: Temp,
        object: Temp,
        attr: String,
    },
    StoreAttr {
        object: Temp,
        attr: String,
        value: Temp,
    },
    LoadItem {
        target: Temp,
        object: Temp,
        index: Temp,
    },
    StoreItem {
        object: Temp,
        index: Temp,
        value: Temp,
    },
    DeleteLocal {
        symbol: SymbolId,
    },
    DeleteAttr {
        object: Temp,
        attr: String,
    },
    DeleteItem {
        object: Temp,
        index: Temp,
    },
    Binary {
        target: Temp,
        op: BinOpKind,
        left: Temp,
        right: Temp,
    },
    Unary {
        target: Temp,
        op: UnaryOpKind,
        operand: Temp,
    },
    Compare {
        target: Temp,
        op: CmpOpKind,
        left: Temp,
        right: Temp,
    },
    /// Eager truth-join of already-evaluated operands. The emitted program
    /// short-circuits; the IR form exists for dataflow over the operands.
    BoolJoin {
        target: Temp,
        op: BoolOpKind,
        values: SmallVec<[Temp; 4]>,
    },
    /// Value select between two already-evaluated alternatives.
    Select {
        target: Temp,
        test: Temp,
        then_value: Temp,
        else_value: Temp,
    },
    /// Test the pending exception against a class (or tuple of classes).
    ExceptMatch {
        target: Temp,
        exc_type: Temp,
    },
    Call {
        target: Temp,
        func: Temp,
        args: SmallVec<[Temp; 4]>,
        keywords: Vec<(String, Temp)>,
        stararg: Option<Temp>,
        kwarg: Option<Temp>,
    },
    BuildTuple {
        target: Temp,
        items: SmallVec<[Temp; 4]>,
    },
    BuildList {
        target: Temp,
        items: SmallVec<[Temp; 4]>,
    },
    BuildSet {
        target: Temp,
        items: SmallVec<[Temp; 4]>,
    },
    BuildDict {
        target: Temp,
        keys: SmallVec<[Temp; 4]>,
        values: SmallVec<[Temp; 4]>,
    },
    /// Materialize the callable object for a nested function-like scope.
    MakeFunction {
        target: Temp,
        scope: ScopeId,
    },
    GetIter {
        target: Temp,
        iterable: Temp,
    },
    /// Advance an iterator; jumps to `done_label` on exhaustion.
    IterNext {
        target: Temp,
        iter: Temp,
        done_label: String,
    },
    ImportName {
        target: Temp,
        module: String,
    },
    Branch {
        test: Temp,
        true_label: String,
        false_label: String,
    },
    Jump {
        label: String,
    },
    Return {
        value: Option<Temp>,
    },
    /// Raise an exception. `handler` is the innermost armed except/finally
    /// label at the raise site, recorded so the CFG can link the edge.
    Raise {
        exc: Option<Temp>,
        handler: Option<String>,
    },
    Yield {
        target: Temp,
        value: Temp,
    },
    /// Arm the exception-dispatch label for the enclosed region.
    SetupExcept {
        label: String,
    },
    EndExcept,
    /// Arm the cleanup label for the enclosed region.
    SetupFinally {
        label: String,
    },
    EndFinally,
    /// Save the pending exception triple into the numbered cookie.
    SaveException {
        cookie: u32,
    },
    /// Restore the numbered cookie as the pending exception.
    RestoreException {
        cookie: u32,
    },
    Nop,
}

impl Op {
    /// Ops that end a basic block.
    pub fn terminates_block(&self) -> bool {
        matches!(
            self,
            Op::Branch { .. } | Op::Jump { .. } | Op::Return { .. } | Op::Raise { .. }
        )
    }

    /// The temporary this op defines, if any.
    pub fn target(&self) -> Option<Temp> {
        match self {
            Op::LoadConst { target, .. }
            | Op::LoadLocal { target, .. }
            | Op::LoadGlobal { target, .. }
            | Op::LoadAttr { target, .. }
            | Op::LoadItem { target, .. }
            | Op::Binary { target, .. }
            | Op::Unary { target, .. }
            | Op::Compare { target, .. }
            | Op::Call { target, .. }
            | Op::BuildTuple { target, .. }
            | Op::BuildList { target, .. }
            | Op::BuildSet { target, .. }
            | Op::BuildDict { target, .. }
            | Op::MakeFunction { target, .. }
            | Op::GetIter { target, .. }
            | Op::IterNext { target, .. }
            | Op::ImportName { target, .. }
            | Op::BoolJoin { target, .. }
            | Op::Select { target, .. }
            | Op::ExceptMatch { target, .. }
            | Op::Yield { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Labels this op can transfer control to.
    pub fn jump_targets(&self) -> Vec<&str> {
        match self {
            Op::Branch {
                true_label,
                false_label,
                ..
            } => vec![true_label.as_str(), false_label.as_str()],
            Op::Jump { label } => vec![label.as_str()],
            Op::IterNext { done_label, .. } => vec![done_label.as_str()],
            Op::Raise {
                handler: Some(label),
                ..
            } => vec![label.as_str()],
            _ => Vec::new(),
        }
    }
}

/// An op plus its optional frame-local label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpEntry {
    pub label: Option<String>,
    pub op: Op,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminators() {
        assert!(Op::Jump {
            label: "x".to_string()
        }
        .terminates_block());
        assert!(Op::Return { value: None }.terminates_block());
        assert!(!Op::Nop.terminates_block());
        assert!(!Op::SetupFinally {
            label: "f".to_string()
        }
        .terminates_block());
    }

    #[test]
    fn test_target_extraction() {
        let op = Op::Binary {
            target: Temp(3),
            op: BinOpKind::Add,
            left: Temp(1),
            right: Temp(2),
        };
        assert_eq!(op.target(), Some(Temp(3)));
        assert_eq!(Op::Nop.target(), None);
    }
}
