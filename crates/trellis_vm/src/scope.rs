//! Lexical scopes.
//!
//! A scope is a row of symbol slots (slot 0 is self) plus shared links to
//! its caller, a late-bound lookup table, and partial arguments. Scopes are
//! held behind `Rc` and copied on write, so a scope captured by a region is
//! never changed through another alias.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use trellis_foundation::Value;
use trellis_reactive::{ValueRef, const_ref};

/// Late-bound names shared by a scope and its children.
pub type EvalTable = Rc<RefCell<HashMap<String, ValueRef>>>;

/// One lexical scope.
#[derive(Clone, Default)]
pub struct Scope {
    slots: Vec<Option<ValueRef>>,
    caller: Option<Rc<Scope>>,
    eval: Option<EvalTable>,
    partial_map: Option<Rc<HashMap<String, ValueRef>>>,
}

impl Scope {
    /// Creates a root scope with `size` symbol slots after self.
    #[must_use]
    pub fn root(self_ref: ValueRef, size: usize) -> Self {
        let mut slots = vec![None; size + 1];
        slots[0] = Some(self_ref);
        Self {
            slots,
            ..Self::default()
        }
    }

    /// Returns the reference bound to a slot, or a constant `nil`.
    #[must_use]
    pub fn get(&self, slot: usize) -> ValueRef {
        self.slots
            .get(slot)
            .and_then(Clone::clone)
            .unwrap_or_else(|| const_ref(Value::Nil))
    }

    /// Returns self.
    #[must_use]
    pub fn self_ref(&self) -> ValueRef {
        self.get(0)
    }

    /// Binds a slot, growing the scope if needed.
    pub fn bind(&mut self, slot: usize, reference: ValueRef) {
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        self.slots[slot] = Some(reference);
    }

    /// Returns the caller scope.
    #[must_use]
    pub fn caller(&self) -> Option<&Rc<Scope>> {
        self.caller.as_ref()
    }

    /// Sets the caller scope.
    pub fn set_caller(&mut self, caller: Rc<Scope>) {
        self.caller = Some(caller);
    }

    /// Gives the scope a late-bound lookup table if it has none.
    pub fn bind_eval(&mut self) {
        if self.eval.is_none() {
            self.eval = Some(EvalTable::default());
        }
    }

    /// Binds a late-bound name. Returns false if the scope has no table.
    pub fn set_eval(&self, name: &str, reference: ValueRef) -> bool {
        match &self.eval {
            Some(table) => {
                table.borrow_mut().insert(name.to_string(), reference);
                true
            }
            None => false,
        }
    }

    /// Sets the partial-arguments map.
    pub fn set_partial_map(&mut self, map: HashMap<String, ValueRef>) {
        self.partial_map = Some(Rc::new(map));
    }

    /// Looks a name up in the late-bound table, then the partial map.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<ValueRef> {
        if let Some(reference) = self
            .eval
            .as_ref()
            .and_then(|table| table.borrow().get(name).cloned())
        {
            return Some(reference);
        }
        self.partial_map
            .as_ref()
            .and_then(|map| map.get(name).cloned())
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("slots", &self.slots.len())
            .field("has_caller", &self.caller.is_some())
            .field("has_eval", &self.eval.is_some())
            .finish_non_exhaustive()
    }
}
