//! Core values, node identifiers, and errors for Trellis.
//!
//! This crate provides:
//! - [`Value`] - The data every reference in the VM produces
//! - [`NodeId`] - Opaque identifiers for nodes in the host's output tree
//! - [`Error`] - Error type separating invariant violations from user failures
//! - Persistent collections ([`LtVec`], [`LtMap`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod error;
pub mod node;
pub mod value;

pub use collections::{LtMap, LtVec};
pub use error::{Error, ErrorContext, ErrorKind, Invariant};
pub use node::NodeId;
pub use value::Value;

/// Result alias used across every Trellis layer.
pub type Result<T> = std::result::Result<T, Error>;
