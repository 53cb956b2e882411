//! Integration tests for Layer 0: Foundation
//!
//! Tests for core types: Value, NodeId, Error, and persistent collections.

mod errors;
mod values;
