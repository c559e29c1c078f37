//! Intermediate representation and control-flow graph
//!
//! Each function-like scope lowers to a [`Frame`]: a flat, linear list of
//! typed operations with a fresh temporary per value-producing expression.
//! After a frame is fully emitted it is sliced into basic blocks linked by
//! explicit branch/jump edges; the resulting [`Cfg`] is computed once and
//! never mutated.

pub mod block;
pub mod cfg;
pub mod frame;
pub mod lower;
pub mod op;

pub use block::{BasicBlock, BlockId};
pub use cfg::Cfg;
pub use frame::Frame;
pub use lower::{IrModule, Lowerer};
pub use op::{Const, Op, OpEntry, Temp};
