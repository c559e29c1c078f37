//! Per-function linear IR frames

use super::op::{Op, OpEntry, Temp};
use serde::{Deserialize, Serialize};

/// The IR program for one function/module/lambda/comprehension body:
/// a sequence of ops plus a pending-label cursor. A prepared label attaches
/// to the next op pushed; preparing two labels for the same op is a lowering
/// bug and panics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Globally-unique frame name, e.g. `mod.f.inner`.
    pub name: String,
    ops: Vec<OpEntry>,
    ready_label: Option<String>,
    next_temp: u32,
}

impl Frame {
    pub fn new(name: impl Into<String>) -> Self {
        Frame {
            name: name.into(),
            ops: Vec::new(),
            ready_label: None,
            next_temp: 0,
        }
    }

    /// A fresh single-assignment temporary.
    pub fn temp(&mut self) -> Temp {
        let t = Temp(self.next_temp);
        self.next_temp += 1;
        t
    }

    pub fn has_pending_label(&self) -> bool {
        self.ready_label.is_some()
    }

    /// Prepare a label to be placed on the next op.
    pub fn prepare_label(&mut self, label: String) {
        assert!(
            self.ready_label.is_none(),
            "two labels readied for the same op: {} <- {}",
            self.ready_label.as_deref().unwrap_or(""),
            label
        );
        self.ready_label = Some(label);
    }

    /// Append an op, consuming any prepared label.
    pub fn push(&mut self, op: Op) {
        let label = self.ready_label.take();
        self.ops.push(OpEntry { label, op });
    }

    /// Materialize a trailing prepared label onto a Nop so it survives into
    /// the block slicing.
    pub fn finish(&mut self) {
        if self.ready_label.is_some() {
            self.push(Op::Nop);
        }
    }

    pub fn ops(&self) -> &[OpEntry] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepared_label_attaches_to_next_op() {
        let mut frame = Frame::new("f");
        frame.prepare_label("loop0".to_string());
        frame.push(Op::Nop);
        assert_eq!(frame.ops()[0].label.as_deref(), Some("loop0"));
        frame.push(Op::Nop);
        assert_eq!(frame.ops()[1].label, None);
    }

    #[test]
    fn test_finish_materializes_trailing_label() {
        let mut frame = Frame::new("f");
        frame.push(Op::Return { value: None });
        frame.prepare_label("end0".to_string());
        frame.finish();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.ops()[1].label.as_deref(), Some("end0"));
    }

    #[test]
    #[should_panic(expected = "two labels readied")]
    fn test_double_prepare_panics() {
        let mut frame = Frame::new("f");
        frame.prepare_label("a".to_string());
        frame.prepare_label("b".to_string());
    }

    #[test]
    fn test_temps_are_fresh() {
        let mut frame = Frame::new("f");
        let a = frame.temp();
        let b = frame.temp();
        assert_ne!(a, b);
    }
}
