//! The revision clock.
//!
//! A revision is a point in logical time. The clock only moves forward, and
//! it moves exactly when some dirtyable tag is dirtied. Each thread has its
//! own clock because tags are `!Send`: no tag can be observed from another
//! thread.

use std::cell::Cell;

/// A point on the revision clock.
pub type Revision = u64;

/// Revision of tags that never change.
pub const CONSTANT: Revision = 0;

/// Revision every fresh tag starts at.
pub const INITIAL: Revision = 1;

/// Revision of tags that must always be treated as changed.
pub const VOLATILE: Revision = u64::MAX;

thread_local! {
    static CLOCK: Cell<Revision> = const { Cell::new(INITIAL) };
}

/// Returns the current revision without advancing it.
#[must_use]
pub fn current() -> Revision {
    CLOCK.with(Cell::get)
}

/// Advances the clock and returns the new revision.
pub fn bump() -> Revision {
    CLOCK.with(|clock| {
        let next = clock.get() + 1;
        clock.set(next);
        next
    })
}
