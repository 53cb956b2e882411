//! References: lazily evaluated, tag-cached value cells.
//!
//! Three kinds exist:
//! - [`ConstReference`] never changes and is never re-evaluated.
//! - [`SourceReference`] wraps an externally owned mutable cell.
//! - [`ComputeReference`] derives its value from other references and
//!   re-runs its computation only when something it read has changed.
//!
//! Reading any reference consumes its tag into the innermost open track
//! frame, which is how compute references discover their dependencies.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use trellis_foundation::{Result, Value};

use crate::revision::Revision;
use crate::tag::{DirtyableTag, Tag, UpdatableTag, validate_tag, value_for_tag};
use crate::tracking::{begin_track_frame, consume_tag, end_track_frame};

/// A value cell with a revision tag.
pub trait Reference {
    /// The type of value this reference produces.
    type Value;

    /// Reads the current value, consuming this reference's tag.
    ///
    /// # Errors
    /// Returns an error if a computation on the read path fails.
    fn value(&self) -> Result<Self::Value>;

    /// Returns the tag describing when the value last changed.
    fn tag(&self) -> Tag;

    /// Returns true if the value can never change.
    fn is_const(&self) -> bool {
        false
    }
}

/// The reference type the VM moves around.
pub type ValueRef = Rc<dyn Reference<Value = Value>>;

// ============================================================================
// Const
// ============================================================================

/// A reference to a value that never changes.
#[derive(Clone, Debug)]
pub struct ConstReference<T>(T);

impl<T: Clone> ConstReference<T> {
    /// Wraps a value.
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self(value)
    }
}

impl<T: Clone> Reference for ConstReference<T> {
    type Value = T;

    fn value(&self) -> Result<T> {
        Ok(self.0.clone())
    }

    fn tag(&self) -> Tag {
        Tag::constant()
    }

    fn is_const(&self) -> bool {
        true
    }
}

// ============================================================================
// Source
// ============================================================================

struct SourceCell<T> {
    value: RefCell<T>,
    tag: DirtyableTag,
}

/// A shared, externally mutable cell.
///
/// Clones share the cell. Every write dirties the tag, which is the only
/// way the rest of the system learns that anything changed.
pub struct SourceReference<T>(Rc<SourceCell<T>>);

impl<T> Clone for SourceReference<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Clone> SourceReference<T> {
    /// Creates a cell holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self(Rc::new(SourceCell {
            value: RefCell::new(value),
            tag: DirtyableTag::new(),
        }))
    }

    /// Reads the value without consuming the tag.
    #[must_use]
    pub fn peek(&self) -> T {
        self.0.value.borrow().clone()
    }

    /// Replaces the value and dirties the tag.
    pub fn set(&self, value: T) {
        *self.0.value.borrow_mut() = value;
        self.0.tag.dirty();
    }

    /// Mutates the value in place and dirties the tag.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.0.value.borrow_mut());
        self.0.tag.dirty();
    }

    /// Returns true if both handles share one cell.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone + PartialEq> SourceReference<T> {
    /// Replaces the value and dirties the tag only if the value differs.
    ///
    /// Returns true if the value changed.
    pub fn set_if_changed(&self, value: T) -> bool {
        if *self.0.value.borrow() == value {
            return false;
        }
        self.set(value);
        true
    }
}

impl SourceReference<Value> {
    /// Returns a type-erased handle to this cell.
    #[must_use]
    pub fn to_ref(&self) -> ValueRef {
        Rc::new(self.clone())
    }
}

impl<T: Clone> Reference for SourceReference<T> {
    type Value = T;

    fn value(&self) -> Result<T> {
        consume_tag(&self.0.tag.tag());
        Ok(self.peek())
    }

    fn tag(&self) -> Tag {
        self.0.tag.tag()
    }
}

impl<T: fmt::Debug> fmt::Debug for SourceReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SourceReference")
            .field(&*self.0.value.borrow())
            .finish()
    }
}

// ============================================================================
// Compute
// ============================================================================

type ComputeFn<T> = Box<dyn Fn() -> Result<T>>;

struct ComputeCell<T> {
    compute: ComputeFn<T>,
    tag: UpdatableTag,
    cache: RefCell<Option<(T, Revision)>>,
    invocations: Cell<u64>,
}

/// A derived reference that caches its last value.
///
/// The reference owns one stable updatable tag. Each recomputation swaps the
/// tag's inputs for whatever the computation read, so consumers that captured
/// the tag follow dependency sets that change shape between runs.
pub struct ComputeReference<T>(Rc<ComputeCell<T>>);

impl<T> Clone for ComputeReference<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Clone + 'static> ComputeReference<T> {
    /// Creates a reference from a fallible computation.
    #[must_use]
    pub fn new(compute: impl Fn() -> Result<T> + 'static) -> Self {
        Self(Rc::new(ComputeCell {
            compute: Box::new(compute),
            tag: UpdatableTag::new(),
            cache: RefCell::new(None),
            invocations: Cell::new(0),
        }))
    }

    /// Returns how many times the computation has run.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.0.invocations.get()
    }

    fn cached(&self, tag: &Tag) -> Option<T> {
        let cache = self.0.cache.borrow();
        match cache.as_ref() {
            Some((value, snapshot)) if validate_tag(tag, *snapshot) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<T: Clone + 'static> Reference for ComputeReference<T> {
    type Value = T;

    fn value(&self) -> Result<T> {
        let tag = self.0.tag.tag();
        if let Some(value) = self.cached(&tag) {
            consume_tag(&tag);
            return Ok(value);
        }

        begin_track_frame();
        self.0.invocations.set(self.0.invocations.get() + 1);
        let computed = (self.0.compute)();
        let dependencies = end_track_frame()?;
        self.0.tag.update(dependencies);
        consume_tag(&tag);

        let value = computed?;
        *self.0.cache.borrow_mut() = Some((value.clone(), value_for_tag(&tag)));
        Ok(value)
    }

    fn tag(&self) -> Tag {
        self.0.tag.tag()
    }
}

// ============================================================================
// Constructors
// ============================================================================

/// Creates a constant [`ValueRef`].
#[must_use]
pub fn const_ref(value: impl Into<Value>) -> ValueRef {
    Rc::new(ConstReference::new(value.into()))
}

/// Creates a computed [`ValueRef`].
#[must_use]
pub fn compute_ref(compute: impl Fn() -> Result<Value> + 'static) -> ValueRef {
    Rc::new(ComputeReference::new(compute))
}

/// Derives a reference to `key` inside the map `parent` produces.
///
/// The child reads `Nil` when the key is absent or the parent is not a map.
/// A constant parent yields a constant child.
///
/// # Errors
/// Returns an error only if reading a constant parent fails.
pub fn property_ref(parent: &ValueRef, key: &str) -> Result<ValueRef> {
    if parent.is_const() {
        return Ok(const_ref(parent.value()?.get_property(key)));
    }
    let parent = Rc::clone(parent);
    let key = key.to_string();
    Ok(compute_ref(move || Ok(parent.value()?.get_property(&key))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::track;
    use trellis_foundation::Error;

    #[test]
    fn const_reference_is_const() {
        let reference = const_ref(3);
        assert!(reference.is_const());
        assert!(reference.tag().is_constant());
        assert_eq!(reference.value().unwrap(), Value::Int(3));
    }

    #[test]
    fn source_set_dirties() {
        let source = SourceReference::new(Value::Int(1));
        let tag = source.tag();
        let snapshot = value_for_tag(&tag);
        source.set(Value::Int(1));
        assert!(!validate_tag(&tag, snapshot));
    }

    #[test]
    fn source_set_if_changed() {
        let source = SourceReference::new(Value::Int(1));
        let tag = source.tag();
        let snapshot = value_for_tag(&tag);
        assert!(!source.set_if_changed(Value::Int(1)));
        assert!(validate_tag(&tag, snapshot));
        assert!(source.set_if_changed(Value::Int(2)));
        assert!(!validate_tag(&tag, snapshot));
    }

    #[test]
    fn source_update_in_place() {
        let source = SourceReference::new(vec![1]);
        source.update(|items| items.push(2));
        assert_eq!(source.peek(), vec![1, 2]);
    }

    #[test]
    fn source_read_is_tracked() {
        let source = SourceReference::new(Value::Nil);
        let (_, tag) = track(|| source.value()).unwrap();
        assert!(!tag.is_constant());
    }

    #[test]
    fn compute_caches_until_input_changes() {
        let source = SourceReference::new(Value::Int(2));
        let input = source.clone();
        let doubled = ComputeReference::new(move || {
            let n = input.value()?.as_int().unwrap_or(0);
            Ok(Value::Int(n * 2))
        });

        assert_eq!(doubled.value().unwrap(), Value::Int(4));
        assert_eq!(doubled.value().unwrap(), Value::Int(4));
        assert_eq!(doubled.invocations(), 1);

        source.set(Value::Int(5));
        assert_eq!(doubled.value().unwrap(), Value::Int(10));
        assert_eq!(doubled.invocations(), 2);
    }

    #[test]
    fn compute_tag_follows_dependencies() {
        let source = SourceReference::new(Value::Int(1));
        let input = source.clone();
        let derived = ComputeReference::new(move || input.value());
        derived.value().unwrap();

        let tag = derived.tag();
        let snapshot = value_for_tag(&tag);
        assert!(validate_tag(&tag, snapshot));
        source.set(Value::Int(2));
        assert!(!validate_tag(&tag, snapshot));
    }

    #[test]
    fn compute_dependencies_can_change_shape() {
        let flag = SourceReference::new(Value::Bool(true));
        let left = SourceReference::new(Value::from("left"));
        let right = SourceReference::new(Value::from("right"));
        let (f, l, r) = (flag.clone(), left.clone(), right.clone());
        let pick = ComputeReference::new(move || {
            if f.value()?.is_truthy() { l.value() } else { r.value() }
        });

        assert_eq!(pick.value().unwrap(), Value::from("left"));
        right.set(Value::from("RIGHT"));
        assert_eq!(pick.value().unwrap(), Value::from("left"));
        assert_eq!(pick.invocations(), 1);

        flag.set(Value::Bool(false));
        assert_eq!(pick.value().unwrap(), Value::from("RIGHT"));
        left.set(Value::from("LEFT"));
        assert_eq!(pick.value().unwrap(), Value::from("RIGHT"));
        assert_eq!(pick.invocations(), 2);
    }

    #[test]
    fn compute_errors_are_not_cached() {
        let source = SourceReference::new(Value::Int(0));
        let input = source.clone();
        let checked = ComputeReference::new(move || {
            let value = input.value()?;
            if value == Value::Int(0) {
                Err(Error::computation("zero"))
            } else {
                Ok(value)
            }
        });

        assert!(checked.value().is_err());
        source.set(Value::Int(1));
        assert_eq!(checked.value().unwrap(), Value::Int(1));
    }

    #[test]
    fn nested_compute_propagates_tags() {
        let source = SourceReference::new(Value::Int(1));
        let input = source.clone();
        let inner = ComputeReference::new(move || input.value());
        let inner_clone = inner.clone();
        let outer = ComputeReference::new(move || inner_clone.value());

        outer.value().unwrap();
        outer.value().unwrap();
        assert_eq!(outer.invocations(), 1);

        source.set(Value::Int(7));
        assert_eq!(outer.value().unwrap(), Value::Int(7));
        assert_eq!(outer.invocations(), 2);
        assert_eq!(inner.invocations(), 2);
    }

    #[test]
    fn property_refs() {
        let item = SourceReference::new(Value::map_of([("key", Value::Int(1))]));
        let key = property_ref(&item.to_ref(), "key").unwrap();
        assert!(!key.is_const());
        assert_eq!(key.value().unwrap(), Value::Int(1));

        item.set(Value::map_of([("key", Value::Int(2))]));
        assert_eq!(key.value().unwrap(), Value::Int(2));

        let constant = property_ref(&const_ref(Value::Nil), "key").unwrap();
        assert!(constant.is_const());
        assert_eq!(constant.value().unwrap(), Value::Nil);
    }
}
