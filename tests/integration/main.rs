//! Cross-layer integration tests for Trellis
//!
//! End-to-end scenarios that run through every layer, from references to the
//! output tree.

mod cache_groups;
mod scenarios;
