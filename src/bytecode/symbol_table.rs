//! Lexical scope resolution.
//!
//! Scopes live in an arena indexed by position; each records the index of
//! its enclosing scope. Entering a function body pushes a scope and leaving
//! pops it, so the innermost scope is always the last one. Index 0 is the
//! global scope and is never popped.

use std::collections::HashMap;

use tracing::trace;

/// Storage class of a resolved name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    /// Captured from an enclosing function.
    Free,
    /// The function currently being compiled, for self-recursion.
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
    pub mutable: bool,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    outer: Option<usize>,
    store: HashMap<String, Symbol>,
    /// Original symbols captured by this scope, in capture order.
    free_symbols: Vec<Symbol>,
    num_definitions: usize,
}

/// What a function scope leaves behind once compiled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosedScope {
    pub free_symbols: Vec<Symbol>,
    pub num_definitions: usize,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl SymbolTable {
    /// A table holding only the global scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    /// A global table with every name in `builtins` installed at its position.
    pub fn with_builtins<'a>(builtins: impl IntoIterator<Item = &'a str>) -> Self {
        let mut table = Self::new();
        for (index, name) in builtins.into_iter().enumerate() {
            table.define_builtin(index, name);
        }
        table
    }

    fn current(&self) -> usize {
        self.scopes.len() - 1
    }

    pub fn is_global(&self) -> bool {
        self.scopes.len() == 1
    }

    pub fn enter_scope(&mut self) {
        let outer = self.current();
        self.scopes.push(Scope {
            outer: Some(outer),
            ..Scope::default()
        });
    }

    /// Pop the innermost function scope. The global scope is never popped.
    pub fn leave_scope(&mut self) -> Option<ClosedScope> {
        if self.is_global() {
            return None;
        }
        self.scopes.pop().map(|scope| ClosedScope {
            free_symbols: scope.free_symbols,
            num_definitions: scope.num_definitions,
        })
    }

    /// Drop every function scope, e.g. after a failed compile.
    pub fn reset_to_global(&mut self) {
        self.scopes.truncate(1);
    }

    /// Allocate the next slot in the innermost scope.
    pub fn define(&mut self, name: &str, mutable: bool) -> Symbol {
        let current = self.current();
        let scope_kind = if current == 0 {
            SymbolScope::Global
        } else {
            SymbolScope::Local
        };

        let scope = &mut self.scopes[current];
        let symbol = Symbol {
            name: name.to_string(),
            scope: scope_kind,
            index: scope.num_definitions,
            mutable,
        };
        scope.store.insert(name.to_string(), symbol.clone());
        scope.num_definitions += 1;

        trace!(target: "shark::symbols", name, index = symbol.index, scope = ?scope_kind, "define");
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Builtin,
            index,
            mutable: false,
        };
        self.scopes[0].store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol {
            name: name.to_string(),
            scope: SymbolScope::Function,
            index: 0,
            mutable: false,
        };
        let current = self.current();
        self.scopes[current]
            .store
            .insert(name.to_string(), symbol.clone());

        trace!(target: "shark::symbols", name, "define function name");
        symbol
    }

    /// Look `name` up in the innermost scope only.
    pub fn lookup_own(&self, name: &str) -> Option<&Symbol> {
        self.scopes[self.current()].store.get(name)
    }

    /// Resolve `name` from the innermost scope outwards, capturing it as a
    /// free variable in every function scope between its definition and here.
    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        self.resolve_in(self.current(), name)
    }

    fn resolve_in(&mut self, index: usize, name: &str) -> Option<Symbol> {
        if let Some(symbol) = self.scopes[index].store.get(name) {
            return Some(symbol.clone());
        }

        let outer = self.scopes[index].outer?;
        let symbol = self.resolve_in(outer, name)?;

        match symbol.scope {
            SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
            _ => Some(self.define_free(index, symbol)),
        }
    }

    fn define_free(&mut self, index: usize, original: Symbol) -> Symbol {
        let scope = &mut self.scopes[index];
        scope.free_symbols.push(original.clone());

        let symbol = Symbol {
            name: original.name.clone(),
            scope: SymbolScope::Free,
            index: scope.free_symbols.len() - 1,
            mutable: original.mutable,
        };
        scope.store.insert(original.name, symbol.clone());

        trace!(target: "shark::symbols", name = %symbol.name, index = symbol.index, "capture free");
        symbol
    }

    /// Captures recorded so far by the innermost scope.
    pub fn free_symbols(&self) -> &[Symbol] {
        &self.scopes[self.current()].free_symbols
    }

    pub fn num_definitions(&self) -> usize {
        self.scopes[self.current()].num_definitions
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
