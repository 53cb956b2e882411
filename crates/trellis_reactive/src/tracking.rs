//! Track frames.
//!
//! While a frame is open, every [`consume_tag`] call records a dependency in
//! it. Frames nest strictly: a compute reference opens one around its
//! computation, and whatever it reads lands in its own frame rather than in
//! the frame of whoever asked for its value.

use std::cell::RefCell;

use trellis_foundation::{Error, Invariant, Result};

use crate::tag::{Tag, combine};

thread_local! {
    static FRAMES: RefCell<Vec<Vec<Tag>>> = const { RefCell::new(Vec::new()) };
}

/// Opens a new track frame.
pub fn begin_track_frame() {
    FRAMES.with(|frames| frames.borrow_mut().push(Vec::new()));
}

/// Closes the innermost track frame and combines what it recorded.
///
/// # Errors
/// Returns [`Invariant::UnbalancedTrackFrames`] if no frame is open.
pub fn end_track_frame() -> Result<Tag> {
    let recorded = FRAMES.with(|frames| frames.borrow_mut().pop());
    match recorded {
        Some(tags) => Ok(combine(tags)),
        None => Err(Error::invariant(Invariant::UnbalancedTrackFrames)),
    }
}

/// Records `tag` as a dependency of the innermost open frame, if any.
pub fn consume_tag(tag: &Tag) {
    if tag.is_constant() {
        return;
    }
    FRAMES.with(|frames| {
        if let Some(frame) = frames.borrow_mut().last_mut() {
            frame.push(tag.clone());
        }
    });
}

/// Returns the number of open frames.
#[must_use]
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

/// Runs `f` inside a fresh frame and returns its result with the combined tag.
///
/// # Errors
/// Returns [`Invariant::UnbalancedTrackFrames`] if `f` closed more frames
/// than it opened.
pub fn track<T>(f: impl FnOnce() -> T) -> Result<(T, Tag)> {
    begin_track_frame();
    let value = f();
    let tag = end_track_frame()?;
    Ok((value, tag))
}

/// Runs `f` without leaking its reads into the enclosing frame.
///
/// # Errors
/// Returns [`Invariant::UnbalancedTrackFrames`] if `f` closed more frames
/// than it opened.
pub fn untrack<T>(f: impl FnOnce() -> T) -> Result<T> {
    track(f).map(|(value, _)| value)
}
