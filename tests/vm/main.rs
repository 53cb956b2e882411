//! Integration tests for the interpreters
//!
//! These drive whole programs through `render_main` and `rerender` against a
//! `MemoryTree`.

mod balance;
mod lists;
mod rendering;
