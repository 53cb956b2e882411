//! The Trellis virtual machine.
//!
//! This crate runs compiled template programs:
//! - [`render_main`] - The append pass, stepped through a [`TemplateIterator`]
//! - [`RenderResult::rerender`] - The update pass over the recorded opcodes
//! - [`ElementBuilder`] and [`Bounds`] - Cursors and live extents over an [`OutputTree`]
//! - [`reconcile`] - Minimal-move keyed-list reconciliation
//! - [`Capability`] - Host helpers, modifiers, and components behind a [`Resolver`]
//!
//! [`MemoryTree`] is a small in-memory output tree for tests and examples.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod append;
pub mod capability;
pub mod config;
pub mod elements;
pub mod list;
pub mod memory;
pub mod render;
mod runtime;
pub mod scope;
pub mod stack;
pub mod tree;
mod update;
pub mod updating;

pub use capability::{
    Arguments, Capability, ComponentDefinition, ComponentInstance, Destructor, Helper,
    MapResolver, ModifierDefinition, ModifierInstance, Resolver,
};
pub use config::VmConfig;
pub use elements::{Bounds, ElementBuilder};
pub use list::{ListDelegate, Patch, diff, reconcile};
pub use memory::MemoryTree;
pub use render::{RenderResult, Step, TemplateIterator, render_main};
pub use runtime::Runtime;
pub use scope::Scope;
pub use stack::{EvaluationStack, Registers, Slot};
pub use tree::OutputTree;
pub use update::RenderStats;
pub use updating::{OpId, UpdatingOp, UpdatingTree};
