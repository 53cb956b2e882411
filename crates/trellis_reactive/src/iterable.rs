//! Keyed iteration over list references.
//!
//! [`IterationArtifacts`] turns a reference to a list into an ordered set of
//! keyed items. Each key owns two source cells (the item value and its memo,
//! which is the item's index) that survive across refreshes, so the body
//! rendered for a retained item keeps observing the same cells. The order
//! tag moves only when the key sequence itself changes.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;
use trellis_foundation::{Error, Result, Value};

use crate::reference::{SourceReference, ValueRef, compute_ref};
use crate::revision::Revision;
use crate::tag::{DirtyableTag, Tag, combine, validate_tag, value_for_tag};
use crate::tracking::consume_tag;

/// How items are keyed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyFor {
    /// Key by position (`"@index"`).
    Index,
    /// Key by the item's own value (`"@identity"`).
    Identity,
    /// Key by a property of each item.
    Path(String),
}

impl KeyFor {
    /// Compiles a key specifier.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        match spec {
            "@index" => Self::Index,
            "@identity" | "" => Self::Identity,
            path => Self::Path(path.to_string()),
        }
    }

    fn key_of(&self, item: &Value, index: usize) -> Value {
        match self {
            Self::Index => Value::Int(i64::try_from(index).unwrap_or(i64::MAX)),
            Self::Identity => item.clone(),
            Self::Path(path) => item.get_property(path),
        }
    }
}

/// A unique item key.
///
/// Duplicate keys within one sequence are told apart by their occurrence
/// ordinal, so two equal primitives under `@identity` never collapse into one
/// item.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    /// The key computed from the item.
    pub key: Value,
    /// How many earlier items in the sequence produced the same key.
    pub occurrence: u32,
}

impl ItemKey {
    /// Creates a first-occurrence key.
    #[must_use]
    pub fn new(key: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            occurrence: 0,
        }
    }
}

impl fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.occurrence == 0 {
            write!(f, "{:?}", self.key)
        } else {
            write!(f, "{:?}#{}", self.key, self.occurrence)
        }
    }
}

/// One keyed item and its long-lived cells.
#[derive(Clone, Debug)]
pub struct IterationItem {
    /// The item's key.
    pub key: ItemKey,
    /// Cell holding the item value.
    pub value: SourceReference<Value>,
    /// Cell holding the item's index.
    pub memo: SourceReference<Value>,
}

/// A keyed, order-tagged view of a list reference.
pub struct IterationArtifacts {
    source: ValueRef,
    key_for: KeyFor,
    items: RefCell<Vec<IterationItem>>,
    order: DirtyableTag,
    last_source: Cell<Option<Revision>>,
}

impl IterationArtifacts {
    /// Creates artifacts over `source`. Nothing is read until [`refresh`].
    ///
    /// [`refresh`]: IterationArtifacts::refresh
    #[must_use]
    pub fn new(source: ValueRef, key_for: KeyFor) -> Self {
        Self {
            source,
            key_for,
            items: RefCell::new(Vec::new()),
            order: DirtyableTag::new(),
            last_source: Cell::new(None),
        }
    }

    /// Re-reads the source if its tag moved.
    ///
    /// Retained keys keep their cells; cells are only dirtied when their
    /// contents change. Returns true if the key sequence changed.
    ///
    /// # Errors
    /// Returns a type mismatch if the source is neither a list nor nil, or
    /// whatever error reading the source produced.
    pub fn refresh(&self) -> Result<bool> {
        let source_tag = self.source.tag();
        if let Some(snapshot) = self.last_source.get() {
            if validate_tag(&source_tag, snapshot) {
                return Ok(false);
            }
        }

        let list = match self.source.value()? {
            Value::Nil => Vec::new(),
            Value::Vec(items) => items.iter().cloned().collect(),
            other => return Err(Error::type_mismatch("list", other.type_name())),
        };
        self.last_source.set(Some(value_for_tag(&source_tag)));

        let old_keys = self.keys();
        let mut previous: HashMap<ItemKey, IterationItem> = self
            .items
            .borrow_mut()
            .drain(..)
            .map(|item| (item.key.clone(), item))
            .collect();

        let mut seen: HashMap<Value, u32> = HashMap::new();
        let mut next = Vec::with_capacity(list.len());
        for (index, value) in list.into_iter().enumerate() {
            let raw = self.key_for.key_of(&value, index);
            let occurrence = seen.entry(raw.clone()).or_insert(0);
            let key = ItemKey {
                key: raw,
                occurrence: *occurrence,
            };
            *occurrence += 1;

            let memo = Value::Int(i64::try_from(index).unwrap_or(i64::MAX));
            let item = match previous.remove(&key) {
                Some(item) => {
                    item.value.set_if_changed(value);
                    item.memo.set_if_changed(memo);
                    item
                }
                None => IterationItem {
                    key,
                    value: SourceReference::new(value),
                    memo: SourceReference::new(memo),
                },
            };
            next.push(item);
        }

        let changed = old_keys.len() != next.len()
            || old_keys.iter().zip(&next).any(|(old, new)| *old != new.key);
        if changed {
            debug!(
                before = old_keys.len(),
                after = next.len(),
                "iteration order changed"
            );
            self.order.dirty();
        }
        *self.items.borrow_mut() = next;
        Ok(changed)
    }

    /// Returns the items in order as of the last refresh.
    #[must_use]
    pub fn items(&self) -> Vec<IterationItem> {
        self.items.borrow().clone()
    }

    /// Returns the keys in order as of the last refresh.
    #[must_use]
    pub fn keys(&self) -> Vec<ItemKey> {
        self.items.borrow().iter().map(|item| item.key.clone()).collect()
    }

    /// Returns the number of items as of the last refresh.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    /// Returns true if there were no items at the last refresh.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// The tag that moves only when membership or order changes.
    #[must_use]
    pub fn order_tag(&self) -> Tag {
        self.order.tag()
    }

    /// The tag that decides whether [`refresh`] has work to do.
    ///
    /// It also moves when an item's value changes without the key sequence
    /// moving, because only a refresh can tell the two apart. Consumers that
    /// care about membership or order alone watch [`order_tag`].
    ///
    /// [`refresh`]: IterationArtifacts::refresh
    /// [`order_tag`]: IterationArtifacts::order_tag
    #[must_use]
    pub fn refresh_tag(&self) -> Tag {
        combine([self.source.tag(), self.order.tag()])
    }

    /// A reference that is truthy while the source has items.
    ///
    /// Reading it refreshes the artifacts.
    #[must_use]
    pub fn non_empty_ref(self: &Rc<Self>) -> ValueRef {
        let artifacts = Rc::clone(self);
        compute_ref(move || {
            artifacts.refresh()?;
            consume_tag(&artifacts.refresh_tag());
            Ok(Value::Bool(!artifacts.is_empty()))
        })
    }
}

impl fmt::Debug for IterationArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterationArtifacts")
            .field("key_for", &self.key_for)
            .field("keys", &self.keys())
            .finish_non_exhaustive()
    }
}
