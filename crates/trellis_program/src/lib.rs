//! Compiled program representation for Trellis.
//!
//! This crate provides:
//! - [`Heap`] - A relocatable word buffer addressed through stable handles
//! - [`ConstantPool`] - Typed tables of strings, arrays, symbol tables, and values
//! - [`Op`] - The instruction set and its fixed-width wire encoding
//! - [`Assembler`] - Emits instructions, resolves labels, builds standard region shapes
//! - [`Program`] - A heap and constant pool bundled for execution
//!
//! Programs are written once and then only read. Every position saved
//! across a compaction is a [`Handle`] plus an offset, never a raw address.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod assembler;
pub mod constants;
pub mod heap;
pub mod opcode;
pub mod program;

pub use assembler::{Assembler, BlockBuilder, Label};
pub use constants::{ConstantPool, SymbolTable};
pub use heap::{Handle, Heap};
pub use opcode::{MachineOp, OPCODE_SIZE, Op, PrimitiveKind, Register, StackDelta, Syscall};
pub use program::{Program, ResumePoint};
