//! Dependency tracking for Trellis.
//!
//! This crate provides the reactive substrate both interpreters share:
//! - [`revision`] - The per-thread monotonic revision clock
//! - [`Tag`] - Revision markers (constant, volatile, dirtyable, updatable, combined)
//! - [`tracking`] - Track frames that record which tags a computation read
//! - [`Reference`] - Lazily evaluated, tag-cached value cells
//! - [`IterationArtifacts`] - Keyed, order-tagged views of list references
//!
//! Invalidation is pull-based. Changing a source never notifies dependents;
//! a dependent finds out the next time its tag is validated.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod iterable;
pub mod reference;
pub mod revision;
pub mod tag;
pub mod tracking;

pub use iterable::{IterationArtifacts, IterationItem, ItemKey, KeyFor};
pub use reference::{
    ComputeReference, ConstReference, Reference, SourceReference, ValueRef, compute_ref,
    const_ref, property_ref,
};
pub use revision::Revision;
pub use tag::{DirtyableTag, Tag, UpdatableTag, combine, validate_tag, value_for_tag};
pub use tracking::{begin_track_frame, consume_tag, end_track_frame, track, untrack};
