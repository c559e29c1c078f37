//! Scope and closure resolution
//!
//! Builds the lexical scope tree for a module, resolves every name reference
//! to a [`Symbol`] or [`NameRef`], and classifies each local as a native
//! stack slot, a shared heap cell, or a namespace entry. The classification
//! drives everything downstream: which function representation a scope gets,
//! and which storage strategy each load/store compiles to.

pub mod resolver;
pub mod scope;

pub use resolver::{Resolution, Resolver};
pub use scope::{
    Binding, NameRef, Scope, ScopeId, ScopeKind, ScopeTable, Storage, Symbol, SymbolId, TypeHint,
};
