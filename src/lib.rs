//! Trellis - Incremental tree-rendering virtual machine
//!
//! This crate re-exports all layers of the Trellis system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: trellis_vm         - Append and update interpreters, element builder, list reconciler
//! Layer 2: trellis_program    - Heap, constant pool, instruction encoding, assembler
//! Layer 1: trellis_reactive   - Revision clock, tags, references, iteration artifacts
//! Layer 0: trellis_foundation - Core types (Value, NodeId, Error)
//! ```

pub use trellis_foundation as foundation;
pub use trellis_program as program;
pub use trellis_reactive as reactive;
pub use trellis_vm as vm;
