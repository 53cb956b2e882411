//! The constant pool.
//!
//! Four append-only tables, each addressed by a 1-based `u32` handle. Handle
//! zero is reserved for "absent" and never resolves.

use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use trellis_foundation::{Error, Invariant, Result, Value};

/// The compile-time layout of a scope.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SymbolTable {
    /// Names of the scope's symbols. Symbol `i` lives in slot `i + 1`.
    pub symbols: Vec<String>,
    /// True if the scope needs a late-bound lookup table.
    pub has_eval: bool,
}

impl SymbolTable {
    /// Creates a table from symbol names.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
            has_eval: false,
        }
    }

    /// Marks the table as needing late-bound lookups.
    #[must_use]
    pub fn with_eval(mut self) -> Self {
        self.has_eval = true;
        self
    }

    /// Returns the slot a symbol is bound to, if any.
    #[must_use]
    pub fn slot_of(&self, name: &str) -> Option<u32> {
        self.symbols
            .iter()
            .position(|symbol| symbol == name)
            .and_then(|index| u32::try_from(index + 1).ok())
    }
}

/// Typed tables of constants referenced by instructions.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConstantPool {
    strings: Vec<Arc<str>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    string_index: HashMap<Arc<str>, u32>,
    arrays: Vec<Vec<u32>>,
    tables: Vec<SymbolTable>,
    values: Vec<Value>,
}

impl ConstantPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string and returns its handle.
    ///
    /// Equal strings share one handle.
    pub fn string(&mut self, value: &str) -> u32 {
        if let Some(&handle) = self.string_index.get(value) {
            return handle;
        }
        let shared: Arc<str> = Arc::from(value);
        self.strings.push(Arc::clone(&shared));
        let handle = to_handle(self.strings.len());
        self.string_index.insert(shared, handle);
        handle
    }

    /// Stores an array of words and returns its handle.
    pub fn array(&mut self, words: Vec<u32>) -> u32 {
        self.arrays.push(words);
        to_handle(self.arrays.len())
    }

    /// Stores a symbol table and returns its handle.
    pub fn symbol_table(&mut self, table: SymbolTable) -> u32 {
        self.tables.push(table);
        to_handle(self.tables.len())
    }

    /// Stores an opaque value and returns its handle.
    pub fn value(&mut self, value: Value) -> u32 {
        self.values.push(value);
        to_handle(self.values.len())
    }

    /// Resolves a string handle.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidConstant`] for handle zero or out-of-range handles.
    pub fn get_string(&self, handle: u32) -> Result<&Arc<str>> {
        lookup(&self.strings, "strings", handle)
    }

    /// Resolves an array handle.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidConstant`] for handle zero or out-of-range handles.
    pub fn get_array(&self, handle: u32) -> Result<&[u32]> {
        lookup(&self.arrays, "arrays", handle).map(Vec::as_slice)
    }

    /// Resolves a symbol table handle.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidConstant`] for handle zero or out-of-range handles.
    pub fn get_symbol_table(&self, handle: u32) -> Result<&SymbolTable> {
        lookup(&self.tables, "symbol tables", handle)
    }

    /// Resolves an opaque value handle.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidConstant`] for handle zero or out-of-range handles.
    pub fn get_value(&self, handle: u32) -> Result<&Value> {
        lookup(&self.values, "values", handle)
    }

    /// Rebuilds the string index after deserialization.
    pub(crate) fn reindex(&mut self) {
        self.string_index = self
            .strings
            .iter()
            .enumerate()
            .map(|(index, s)| (Arc::clone(s), to_handle(index + 1)))
            .collect();
    }
}

fn to_handle(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn lookup<'a, T>(table: &'a [T], name: &'static str, handle: u32) -> Result<&'a T> {
    let invalid = || Error::invariant(Invariant::InvalidConstant { table: name, handle });
    let index = usize::try_from(handle).map_err(|_| invalid())?;
    index
        .checked_sub(1)
        .and_then(|index| table.get(index))
        .ok_or_else(invalid)
}
