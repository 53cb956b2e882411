//! Integration tests for Layer 1: Reactive
//!
//! Tests for the revision clock, tags, references, and iteration artifacts.

mod iteration;
mod references;
mod tags;
