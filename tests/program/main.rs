//! Integration tests for Layer 2: Program
//!
//! Tests for the heap, the constant pool, instruction encoding, and assembly.

mod assembly;
mod codec;
mod heap;
