//! Abstract Syntax Tree (AST) contract for the Nacre translator.
//!
//! This crate defines the tree shape the front-end parser hands to the
//! middle end. The parser itself lives outside this workspace; everything
//! here is the *contract*: scope-introducing nodes carry a statement body,
//! name-bearing nodes carry a [`NodeId`] the resolver keys its annotations
//! on, and spans are byte ranges into the original source.

pub mod expr;
pub mod node_id;
pub mod nodes;
pub mod ops;

pub use expr::*;
pub use node_id::{NodeId, NodeIdGenerator};
pub use nodes::*;
pub use ops::{BinOpKind, BoolOpKind, CmpOpKind, UnaryOpKind};
