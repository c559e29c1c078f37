//! Scope tree, symbols, and name references
//!
//! Scopes and symbols live in arenas and refer to each other by index, so
//! the parent links and symbol back-references are lookup-only and the
//! structure has no ownership cycles. Symbol tables are insertion-ordered:
//! binding order is the layout of the shared locals array for closures, so
//! the order is semantic, not cosmetic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Names the runtime resolves without any user binding.
pub const BUILTIN_NAMES: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "callable", "chr", "dict", "divmod", "enumerate",
    "filter", "float", "getattr", "hasattr", "hash", "hex", "id", "int", "isinstance",
    "issubclass", "iter", "len", "list", "map", "max", "min", "next", "object", "ord", "pow",
    "print", "range", "repr", "reversed", "round", "set", "setattr", "sorted", "str", "sum",
    "super", "tuple", "type", "zip", "BaseException", "Exception", "ArithmeticError",
    "AttributeError", "IndexError", "KeyError", "LookupError", "NameError", "NotImplementedError",
    "OSError", "RuntimeError", "StopIteration", "TypeError", "ValueError", "ZeroDivisionError",
    "__name__", "__file__", "__doc__", "NotImplemented", "Ellipsis",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScopeKind {
    Builtin,
    Module,
    Class,
    Function,
    Comprehension,
}

impl ScopeKind {
    /// Function-like scopes own real frames: locals, closure cells, labels.
    pub fn is_function_like(self) -> bool {
        matches!(self, ScopeKind::Function | ScopeKind::Comprehension)
    }
}

/// Semantic types proven for a symbol during resolution. Purely advisory;
/// the most generic representation wins when hints disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeHint {
    Object,
    Int,
    Float,
    Bool,
    Str,
    Bytes,
    Tuple,
    List,
    Dict,
    Set,
    Function,
    Class,
    Module,
}

/// Where a symbol's storage lives in the emitted program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Storage {
    /// A plain C local in the owning runner function.
    StackSlot,
    /// A cell in the heap-allocated, per-nesting-level locals array.
    SharedCell,
    /// An entry in a module or class namespace object.
    Namespace,
}

/// A declared binding. Created once per distinct binding site and never
/// destroyed during compilation; the resolver only ever appends type hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub scope: ScopeId,
    /// Set when this symbol is itself a function/class/comprehension.
    pub nested_scope: Option<ScopeId>,
    pub types: Vec<TypeHint>,
    /// True when the load was resolved optimistically at module level and is
    /// deferred to the runtime if actually absent.
    pub optimistic: bool,
}

impl Symbol {
    pub fn add_type(&mut self, hint: TypeHint) {
        if !self.types.contains(&hint) {
            self.types.push(hint);
        }
    }

    /// The single proven type, or the most generic one on disagreement.
    pub fn hint(&self) -> TypeHint {
        match self.types.as_slice() {
            [single] => *single,
            _ => TypeHint::Object,
        }
    }
}

/// A non-owning alias recording that an enclosing scope's symbol is used
/// locally. Never introduces a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRef {
    pub target: SymbolId,
    pub is_global: bool,
    pub is_nonlocal: bool,
}

/// An entry in a scope's symbol table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Binding {
    Local(SymbolId),
    Ref(NameRef),
}

impl Binding {
    /// The symbol this entry ultimately denotes.
    pub fn symbol(self) -> SymbolId {
        match self {
            Binding::Local(id) => id,
            Binding::Ref(r) => r.target,
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, Binding::Local(_))
    }
}

/// One lexical scope: an ordered symbol table plus resolution flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scope {
    pub kind: ScopeKind,
    /// Owner name: function/class name, `<module>`, `<lambda>`, `<genexpr>`.
    pub name: String,
    pub parent: Option<ScopeId>,
    pub symbols: IndexMap<String, Binding>,
    /// Set when the body contains a `yield`.
    pub is_generator: bool,
    /// Set when a function is lexically nested below this one; forces this
    /// scope's locals into a shared heap frame.
    pub has_closure: bool,
    label_counters: HashMap<String, u32>,
}

impl Scope {
    fn new(kind: ScopeKind, name: impl Into<String>, parent: Option<ScopeId>) -> Self {
        Scope {
            kind,
            name: name.into(),
            parent,
            symbols: IndexMap::new(),
            is_generator: false,
            has_closure: false,
            label_counters: HashMap::new(),
        }
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// True when `name` is bound here, not merely referenced.
    pub fn owns_name(&self, name: &str) -> bool {
        matches!(self.symbols.get(name), Some(Binding::Local(_)))
    }

    /// Next label in this scope's unique label space, e.g. `finally2`.
    pub fn next_label(&mut self, base: &str) -> String {
        let counter = self.label_counters.entry(base.to_string()).or_insert(0);
        let label = format!("{}{}", base, counter);
        *counter += 1;
        label
    }

    /// Locally-bound names in binding order; the locals-array layout.
    pub fn local_names(&self) -> Vec<&str> {
        self.symbols
            .iter()
            .filter(|(_, b)| b.is_local())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Arena of scopes and symbols for one compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    builtin: ScopeId,
}

impl ScopeTable {
    pub fn new() -> Self {
        let mut table = ScopeTable {
            scopes: Vec::new(),
            symbols: Vec::new(),
            builtin: ScopeId(0),
        };
        let builtin = table.push_scope(ScopeKind::Builtin, "<builtins>", None);
        table.builtin = builtin;
        for name in BUILTIN_NAMES {
            table.add_symbol(builtin, name);
        }
        table
    }

    pub fn builtin_scope(&self) -> ScopeId {
        self.builtin
    }

    pub fn push_scope(
        &mut self,
        kind: ScopeKind,
        name: impl Into<String>,
        parent: Option<ScopeId>,
    ) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(kind, name, parent));
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Insert a local symbol if absent; returns the (existing or new) id.
    pub fn add_symbol(&mut self, scope: ScopeId, name: &str) -> SymbolId {
        if let Some(binding) = self.scopes[scope.0 as usize].symbols.get(name) {
            return binding.symbol();
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            name: name.to_string(),
            scope,
            nested_scope: None,
            types: Vec::new(),
            optimistic: false,
        });
        self.scopes[scope.0 as usize]
            .symbols
            .insert(name.to_string(), Binding::Local(id));
        id
    }

    /// Record that `scope` uses an enclosing scope's symbol. No-op when the
    /// scope already binds or references the name.
    pub fn add_reference(&mut self, scope: ScopeId, name_ref: NameRef) -> SymbolId {
        let name = self.symbol(name_ref.target).name.clone();
        if let Some(existing) = self.scopes[scope.0 as usize].symbols.get(&name) {
            return existing.symbol();
        }
        self.scopes[scope.0 as usize]
            .symbols
            .insert(name, Binding::Ref(name_ref));
        name_ref.target
    }

    /// Look `name` up from `scope` outward. Class scopes are invisible to
    /// lookups that originate below them: a class body sees its own names,
    /// but functions nested inside the class do not.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<Binding> {
        let mut current = Some(scope);
        let mut first = true;
        while let Some(id) = current {
            let s = self.scope(id);
            if first || s.kind != ScopeKind::Class {
                if let Some(binding) = s.symbols.get(name) {
                    return Some(*binding);
                }
            }
            first = false;
            current = s.parent;
        }
        None
    }

    /// Look up restricted to enclosing *function* scopes, for `nonlocal`.
    pub fn lookup_enclosing_function(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = self.scope(scope).parent;
        while let Some(id) = current {
            let s = self.scope(id);
            if s.kind == ScopeKind::Function && s.owns_name(name) {
                return s.symbols.get(name).map(|b| b.symbol());
            }
            if s.kind == ScopeKind::Module {
                break;
            }
            current = s.parent;
        }
        None
    }

    /// The module scope enclosing `scope`.
    pub fn module_of(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scope(id).kind == ScopeKind::Module {
                return Some(id);
            }
            current = self.scope(id).parent;
        }
        None
    }

    /// Nearest function-like scope at or above `scope`, ignoring classes.
    pub fn nearest_function(&self, scope: ScopeId) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scope(id).kind == ScopeKind::Function {
                return Some(id);
            }
            current = self.scope(id).parent;
        }
        None
    }

    /// Where the symbol's storage lives in the emitted program.
    pub fn storage(&self, sym: SymbolId) -> Storage {
        let symbol = self.symbol(sym);
        let scope = self.scope(symbol.scope);
        match scope.kind {
            ScopeKind::Builtin | ScopeKind::Module | ScopeKind::Class => Storage::Namespace,
            ScopeKind::Function | ScopeKind::Comprehension => {
                if scope.has_closure {
                    Storage::SharedCell
                } else {
                    Storage::StackSlot
                }
            }
        }
    }

    /// The chain of enclosing function scopes, outermost first, ending with
    /// `scope` itself. This is the level order of the shared locals stack.
    pub fn closure_levels(&self, scope: ScopeId) -> Vec<ScopeId> {
        let mut levels = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            if self.scope(id).kind.is_function_like() {
                levels.push(id);
            }
            current = self.scope(id).parent;
        }
        levels.reverse();
        levels
    }

    /// The (level, index) cell coordinates of every name visible from
    /// `scope` through the shared locals stack. Inner levels mask outer ones.
    pub fn closure_layout(&self, scope: ScopeId) -> IndexMap<String, (usize, usize)> {
        let mut layout = IndexMap::new();
        for (level, scope_id) in self.closure_levels(scope).iter().enumerate() {
            for (index, name) in self.scope(*scope_id).local_names().iter().enumerate() {
                layout.insert((*name).to_string(), (level, index));
            }
        }
        layout
    }
}

impl Default for ScopeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_module() -> (ScopeTable, ScopeId) {
        let mut table = ScopeTable::new();
        let builtin = table.builtin_scope();
        let module = table.push_scope(ScopeKind::Module, "<module>", Some(builtin));
        (table, module)
    }

    #[test]
    fn test_lookup_walks_outward() {
        let (mut table, module) = table_with_module();
        let sym = table.add_symbol(module, "x");
        let func = table.push_scope(ScopeKind::Function, "f", Some(module));
        let found = table.lookup(func, "x").unwrap();
        assert_eq!(found.symbol(), sym);
    }

    #[test]
    fn test_class_scope_skipped_for_nested_functions() {
        let (mut table, module) = table_with_module();
        let module_sym = table.add_symbol(module, "x");
        let class = table.push_scope(ScopeKind::Class, "C", Some(module));
        let class_sym = table.add_symbol(class, "x");
        let method = table.push_scope(ScopeKind::Function, "m", Some(class));

        // the class body itself sees its own binding
        assert_eq!(table.lookup(class, "x").unwrap().symbol(), class_sym);
        // but a function inside the class skips it and finds the module's
        assert_eq!(table.lookup(method, "x").unwrap().symbol(), module_sym);
    }

    #[test]
    fn test_add_symbol_idempotent() {
        let (mut table, module) = table_with_module();
        let a = table.add_symbol(module, "x");
        let b = table.add_symbol(module, "x");
        assert_eq!(a, b);
        assert_eq!(table.scope(module).local_names(), vec!["x"]);
    }

    #[test]
    fn test_storage_classification() {
        let (mut table, module) = table_with_module();
        let m = table.add_symbol(module, "g");
        let outer = table.push_scope(ScopeKind::Function, "outer", Some(module));
        let a = table.add_symbol(outer, "a");
        let plain = table.push_scope(ScopeKind::Function, "plain", Some(module));
        let b = table.add_symbol(plain, "b");
        table.scope_mut(outer).has_closure = true;

        assert_eq!(table.storage(m), Storage::Namespace);
        assert_eq!(table.storage(a), Storage::SharedCell);
        assert_eq!(table.storage(b), Storage::StackSlot);
    }

    #[test]
    fn test_closure_layout_masks_outer_names() {
        let (mut table, module) = table_with_module();
        let outer = table.push_scope(ScopeKind::Function, "outer", Some(module));
        table.add_symbol(outer, "x");
        table.add_symbol(outer, "y");
        let inner = table.push_scope(ScopeKind::Function, "inner", Some(outer));
        table.add_symbol(inner, "x");

        let layout = table.closure_layout(inner);
        assert_eq!(layout.get("y"), Some(&(0, 1)));
        // inner's x masks outer's x
        assert_eq!(layout.get("x"), Some(&(1, 0)));
    }

    #[test]
    fn test_labels_unique_per_scope() {
        let (mut table, module) = table_with_module();
        let func = table.push_scope(ScopeKind::Function, "f", Some(module));
        let a = table.scope_mut(func).next_label("finally");
        let b = table.scope_mut(func).next_label("finally");
        let c = table.scope_mut(func).next_label("whileloop");
        assert_eq!(a, "finally0");
        assert_eq!(b, "finally1");
        assert_eq!(c, "whileloop0");
    }
}
