//! Revision tags.
//!
//! A [`Tag`] answers one question: at which revision did the thing it
//! describes last change? Consumers capture [`value_for_tag`] after reading
//! and later ask [`validate_tag`] whether anything moved since.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::revision::{self, CONSTANT, INITIAL, Revision, VOLATILE};

/// An opaque, cheaply cloneable revision marker.
#[derive(Clone)]
pub struct Tag(TagKind);

#[derive(Clone)]
enum TagKind {
    Constant,
    Volatile,
    Dirtyable(Rc<Cell<Revision>>),
    Updatable(Rc<UpdatableCell>),
    Combinator(Rc<[Tag]>),
}

impl Tag {
    /// A tag that never changes.
    #[must_use]
    pub const fn constant() -> Self {
        Self(TagKind::Constant)
    }

    /// A tag that never validates.
    #[must_use]
    pub const fn volatile() -> Self {
        Self(TagKind::Volatile)
    }

    /// Returns true if this tag can never change.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self.0, TagKind::Constant)
    }

    /// Returns true if both handles refer to the same underlying tag.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (TagKind::Constant, TagKind::Constant) | (TagKind::Volatile, TagKind::Volatile) => {
                true
            }
            (TagKind::Dirtyable(a), TagKind::Dirtyable(b)) => Rc::ptr_eq(a, b),
            (TagKind::Updatable(a), TagKind::Updatable(b)) => Rc::ptr_eq(a, b),
            (TagKind::Combinator(a), TagKind::Combinator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self::constant()
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.0 {
            TagKind::Constant => "Constant",
            TagKind::Volatile => "Volatile",
            TagKind::Dirtyable(_) => "Dirtyable",
            TagKind::Updatable(_) => "Updatable",
            TagKind::Combinator(tags) => return write!(f, "Combinator({})", tags.len()),
        };
        write!(f, "{kind}@{}", value_for_tag(self))
    }
}

/// Returns the revision at which `tag` last changed.
///
/// Purely observational: never advances the clock.
#[must_use]
pub fn value_for_tag(tag: &Tag) -> Revision {
    match &tag.0 {
        TagKind::Constant => CONSTANT,
        TagKind::Volatile => VOLATILE,
        TagKind::Dirtyable(revision) => revision.get(),
        TagKind::Updatable(cell) => cell.compute(),
        TagKind::Combinator(tags) => tags.iter().map(value_for_tag).max().unwrap_or(CONSTANT),
    }
}

/// Returns true if nothing `tag` describes changed since `snapshot` was taken.
///
/// A volatile tag never validates.
#[must_use]
pub fn validate_tag(tag: &Tag, snapshot: Revision) -> bool {
    snapshot != VOLATILE && value_for_tag(tag) == snapshot
}

/// Combines tags into one whose value is the maximum of its inputs.
///
/// Constant inputs are dropped. An empty combination is constant and a
/// single input is returned as-is.
#[must_use]
pub fn combine<I>(tags: I) -> Tag
where
    I: IntoIterator<Item = Tag>,
{
    let mut live: Vec<Tag> = tags.into_iter().filter(|tag| !tag.is_constant()).collect();
    match live.len() {
        0 => Tag::constant(),
        1 => live.pop().unwrap_or_default(),
        _ => Tag(TagKind::Combinator(live.into())),
    }
}

// ============================================================================
// Dirtyable
// ============================================================================

/// The owning handle of a tag backed by a mutable cell.
#[derive(Clone)]
pub struct DirtyableTag(Rc<Cell<Revision>>);

impl DirtyableTag {
    /// Creates a tag at the initial revision.
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(INITIAL)))
    }

    /// Marks the tag changed by advancing the clock.
    pub fn dirty(&self) {
        self.0.set(revision::bump());
    }

    /// Returns the read-only tag.
    #[must_use]
    pub fn tag(&self) -> Tag {
        Tag(TagKind::Dirtyable(Rc::clone(&self.0)))
    }
}

impl Default for DirtyableTag {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Updatable
// ============================================================================

struct UpdatableCell {
    revision: Cell<Revision>,
    inner: RefCell<Tag>,
    /// Value of `inner` when it was swapped in; `None` once it moved.
    buffered: Cell<Option<Revision>>,
    last_value: Cell<Revision>,
    last_checked: Cell<Option<Revision>>,
    computing: Cell<bool>,
}

impl UpdatableCell {
    fn compute(&self) -> Revision {
        let now = revision::current();
        if self.last_checked.get() == Some(now) || self.computing.get() {
            return self.last_value.get();
        }
        self.computing.set(true);
        let inner = self.inner.borrow().clone();
        let inner_value = value_for_tag(&inner);
        let mut value = self.revision.get();
        if self.buffered.get() == Some(inner_value) {
            value = value.max(self.last_value.get());
        } else {
            self.buffered.set(None);
            value = value.max(inner_value);
        }
        let value = value.max(self.last_value.get());
        self.last_value.set(value);
        self.last_checked.set(Some(now));
        self.computing.set(false);
        value
    }
}

/// The owning handle of a tag whose inputs can be swapped.
///
/// Identity stays fixed across [`UpdatableTag::update`], so anything that
/// captured [`UpdatableTag::tag`] keeps observing the new inputs.
#[derive(Clone)]
pub struct UpdatableTag(Rc<UpdatableCell>);

impl UpdatableTag {
    /// Creates a tag with no inputs at the initial revision.
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(UpdatableCell {
            revision: Cell::new(INITIAL),
            inner: RefCell::new(Tag::constant()),
            buffered: Cell::new(None),
            last_value: Cell::new(INITIAL),
            last_checked: Cell::new(None),
            computing: Cell::new(false),
        }))
    }

    /// Swaps the inputs.
    ///
    /// The swap itself is not a change: the tag only moves once the new
    /// inputs move past the revision they had when swapped in.
    pub fn update(&self, inner: Tag) {
        let cell = &self.0;
        if inner.is_constant() {
            cell.buffered.set(None);
        } else {
            cell.buffered.set(Some(value_for_tag(&inner)));
        }
        *cell.inner.borrow_mut() = inner;
        cell.last_checked.set(None);
    }

    /// Marks the tag itself changed.
    pub fn dirty(&self) {
        self.0.revision.set(revision::bump());
        self.0.last_checked.set(None);
    }

    /// Returns the read-only tag.
    #[must_use]
    pub fn tag(&self) -> Tag {
        Tag(TagKind::Updatable(Rc::clone(&self.0)))
    }
}

impl Default for UpdatableTag {
    fn default() -> Self {
        Self::new()
    }
}
