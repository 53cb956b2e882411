//! The updating-opcode tree.
//!
//! The append pass records one [`UpdatingOp`] for every piece of output that
//! can change. They live in a generational arena ([`UpdatingTree`]) linked
//! into sibling lists, so the update pass can walk, splice, and tear down
//! subtrees without owning pointers. A stale [`OpId`] never aliases a newer
//! opcode in the same slot.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use trellis_foundation::{Error, Invariant, NodeId, Result, Value};
use trellis_program::ResumePoint;
use trellis_reactive::{
    IterationArtifacts, ItemKey, Revision, Tag, UpdatableTag, ValueRef, combine,
};

use crate::capability::{SharedComponent, SharedModifier};
use crate::elements::Bounds;
use crate::scope::Scope;
use crate::stack::Slot;

/// A generational index into an [`UpdatingTree`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpId {
    index: u32,
    generation: u32,
}

/// A replayable region: everything needed to rebuild it from scratch.
pub struct TryOp {
    /// Where the region's body starts.
    pub resume: ResumePoint,
    /// The scope the body ran in.
    pub scope: Rc<Scope>,
    /// The stack slots the body started with.
    pub args: Vec<Slot>,
    /// The region's live extent.
    pub bounds: Bounds,
    /// Combined tag of the region's children.
    pub tag: UpdatableTag,
    /// Remote blocks opened directly by the region.
    pub remote: Vec<Bounds>,
    /// The item key when the region is one item of a keyed loop.
    pub key: Option<ItemKey>,
    /// Set when the last rebuild failed. The region then has no children
    /// left to notice changes, so the next pass rebuilds it outright.
    pub stale: bool,
}

/// A keyed loop.
pub struct ListOp {
    /// The iterated list.
    pub artifacts: Rc<IterationArtifacts>,
    /// The scope item bodies run in.
    pub scope: Rc<Scope>,
    /// Where each item body starts.
    pub body: ResumePoint,
    /// The list's live extent.
    pub bounds: Bounds,
    /// Rendered keys in order.
    pub keys: Vec<ItemKey>,
    /// Item regions by key.
    pub items: HashMap<ItemKey, OpId>,
    /// Revision of the artifacts' tag at the last sync.
    pub last_iterated: Revision,
    /// Combined tag of the artifacts and the items.
    pub tag: UpdatableTag,
}

/// What an [`UpdatingOp::Assert`] guards.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssertKind {
    /// The value's truthiness.
    Truthiness,
    /// The value itself.
    Same,
}

/// One node of the updating tree.
pub enum UpdatingOp {
    /// The top of a render result.
    Root {
        /// Extent of the whole result.
        bounds: Bounds,
        /// Remote blocks opened outside any region.
        remote: Vec<Bounds>,
    },
    /// A replayable region.
    Try(TryOp),
    /// A keyed loop.
    List(ListOp),
    /// Forces the enclosing region to rebuild if a value moved.
    Assert {
        /// The guarded property.
        kind: AssertKind,
        /// The observed reference.
        reference: ValueRef,
        /// The last observed value (a bool for truthiness asserts).
        last: Value,
    },
    /// A text node bound to a reference.
    DynamicText {
        /// The text source.
        reference: ValueRef,
        /// The patched node.
        node: NodeId,
        /// The last text written.
        last: String,
    },
    /// An attribute bound to a reference.
    DynamicAttr {
        /// The attribute source.
        reference: ValueRef,
        /// The patched element.
        element: NodeId,
        /// The attribute name.
        name: Arc<str>,
        /// The last value applied.
        last: Value,
    },
    /// A live modifier.
    Modifier {
        /// The instance.
        instance: SharedModifier,
        /// Revision of the instance tag when last installed or updated.
        last_revision: Revision,
    },
    /// A live component.
    Component {
        /// The instance.
        instance: SharedComponent,
        /// Revision of the instance tag when last created or updated.
        last_revision: Revision,
    },
    /// Skips to `target` while `tag` validates.
    JumpIfNotModified {
        /// Combined tag of the guarded run.
        tag: UpdatableTag,
        /// Revision of the tag when the run last completed.
        last_revision: Revision,
        /// The [`UpdatingOp::DidModify`] that closes the run.
        target: Option<OpId>,
    },
    /// Closes a cache group and re-snapshots its guard.
    DidModify {
        /// The guard to re-snapshot.
        guard: OpId,
    },
}

impl UpdatingOp {
    /// Returns the tag that moves when this opcode has work to do.
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Self::Root { .. } | Self::DidModify { .. } => Tag::constant(),
            Self::Try(op) => op.tag.tag(),
            Self::List(op) => op.tag.tag(),
            Self::Assert { reference, .. }
            | Self::DynamicText { reference, .. }
            | Self::DynamicAttr { reference, .. } => reference.tag(),
            Self::Modifier { instance, .. } => instance.borrow().tag(),
            Self::Component { instance, .. } => instance.borrow().tag(),
            Self::JumpIfNotModified { tag, .. } => tag.tag(),
        }
    }

    /// Returns a short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Root { .. } => "Root",
            Self::Try(_) => "Try",
            Self::List(_) => "List",
            Self::Assert { .. } => "Assert",
            Self::DynamicText { .. } => "DynamicText",
            Self::DynamicAttr { .. } => "DynamicAttr",
            Self::Modifier { .. } => "Modifier",
            Self::Component { .. } => "Component",
            Self::JumpIfNotModified { .. } => "JumpIfNotModified",
            Self::DidModify { .. } => "DidModify",
        }
    }
}

impl fmt::Debug for UpdatingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Arena
// ============================================================================

#[derive(Default)]
struct Links {
    parent: Option<OpId>,
    prev: Option<OpId>,
    next: Option<OpId>,
    first: Option<OpId>,
    last: Option<OpId>,
}

struct Entry {
    generation: u32,
    op: Option<UpdatingOp>,
    links: Links,
}

/// Arena of updating opcodes linked into a tree.
#[derive(Default)]
pub struct UpdatingTree {
    entries: Vec<Entry>,
    free: Vec<u32>,
    live: usize,
}

impl UpdatingTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live opcodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no opcode is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn entry(&self, id: OpId) -> Result<&Entry> {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation && entry.op.is_some())
            .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))
    }

    fn entry_mut(&mut self, id: OpId) -> Result<&mut Entry> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation && entry.op.is_some())
            .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))
    }

    /// Returns true if `id` names a live opcode.
    #[must_use]
    pub fn contains(&self, id: OpId) -> bool {
        self.entry(id).is_ok()
    }

    /// Looks up an opcode.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] for a stale id.
    pub fn get(&self, id: OpId) -> Result<&UpdatingOp> {
        self.entry(id)?
            .op
            .as_ref()
            .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))
    }

    /// Looks up an opcode mutably.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] for a stale id.
    pub fn get_mut(&mut self, id: OpId) -> Result<&mut UpdatingOp> {
        self.entry_mut(id)?
            .op
            .as_mut()
            .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))
    }

    /// Inserts a parentless opcode.
    pub fn insert_root(&mut self, op: UpdatingOp) -> OpId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.op = Some(op);
            entry.links = Links::default();
            return OpId {
                index,
                generation: entry.generation,
            };
        }
        let index = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(Entry {
            generation: 0,
            op: Some(op),
            links: Links::default(),
        });
        OpId {
            index,
            generation: 0,
        }
    }

    /// Appends an opcode as the last child of `parent`.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] if `parent` is stale.
    pub fn append_child(&mut self, parent: OpId, op: UpdatingOp) -> Result<OpId> {
        let last = self.entry(parent)?.links.last;
        let id = self.insert_root(op);
        self.link(parent, id, last, None)?;
        Ok(id)
    }

    fn link(
        &mut self,
        parent: OpId,
        id: OpId,
        prev: Option<OpId>,
        next: Option<OpId>,
    ) -> Result<()> {
        {
            let links = &mut self.entry_mut(id)?.links;
            links.parent = Some(parent);
            links.prev = prev;
            links.next = next;
        }
        match prev {
            Some(prev) => self.entry_mut(prev)?.links.next = Some(id),
            None => self.entry_mut(parent)?.links.first = Some(id),
        }
        match next {
            Some(next) => self.entry_mut(next)?.links.prev = Some(id),
            None => self.entry_mut(parent)?.links.last = Some(id),
        }
        Ok(())
    }

    fn unlink(&mut self, id: OpId) -> Result<()> {
        let (parent, prev, next) = {
            let links = &mut self.entry_mut(id)?.links;
            let parent = links.parent.take();
            (parent, links.prev.take(), links.next.take())
        };
        let Some(parent) = parent else {
            return Ok(());
        };
        match prev {
            Some(prev) => self.entry_mut(prev)?.links.next = next,
            None => self.entry_mut(parent)?.links.first = next,
        }
        match next {
            Some(next) => self.entry_mut(next)?.links.prev = prev,
            None => self.entry_mut(parent)?.links.last = prev,
        }
        Ok(())
    }

    /// Returns the parent of an opcode.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] for a stale id.
    pub fn parent(&self, id: OpId) -> Result<Option<OpId>> {
        Ok(self.entry(id)?.links.parent)
    }

    /// Returns the first child of an opcode.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] for a stale id.
    pub fn first_child(&self, id: OpId) -> Result<Option<OpId>> {
        Ok(self.entry(id)?.links.first)
    }

    /// Returns the next sibling of an opcode.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] for a stale id.
    pub fn next_sibling(&self, id: OpId) -> Result<Option<OpId>> {
        Ok(self.entry(id)?.links.next)
    }

    /// Returns the children of an opcode in order.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] for a stale id.
    pub fn children(&self, id: OpId) -> Result<Vec<OpId>> {
        let mut children = Vec::new();
        let mut cursor = self.first_child(id)?;
        while let Some(child) = cursor {
            children.push(child);
            cursor = self.next_sibling(child)?;
        }
        Ok(children)
    }

    /// Returns the siblings that follow `id`.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] for a stale id.
    pub fn following(&self, id: OpId) -> Result<Vec<OpId>> {
        let mut siblings = Vec::new();
        let mut cursor = self.next_sibling(id)?;
        while let Some(sibling) = cursor {
            siblings.push(sibling);
            cursor = self.next_sibling(sibling)?;
        }
        Ok(siblings)
    }

    /// Returns the combined tag of an opcode's children.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] for a stale id.
    pub fn children_tag(&self, id: OpId) -> Result<Tag> {
        let tags = self
            .children(id)?
            .into_iter()
            .map(|child| self.get(child).map(UpdatingOp::tag))
            .collect::<Result<Vec<_>>>()?;
        Ok(combine(tags))
    }

    /// Moves an opcode before one of its siblings, or to the end.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] if either id is stale or
    /// `id` has no parent.
    pub fn move_before(&mut self, id: OpId, before: Option<OpId>) -> Result<()> {
        let parent = self
            .parent(id)?
            .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))?;
        if before == Some(id) {
            return Ok(());
        }
        self.unlink(id)?;
        let prev = match before {
            Some(before) => self.entry(before)?.links.prev,
            None => self.entry(parent)?.links.last,
        };
        self.link(parent, id, prev, before)
    }

    /// Unlinks and frees an opcode and its descendants.
    ///
    /// The freed opcodes are returned children first, so destructors can run
    /// bottom-up.
    ///
    /// # Errors
    /// Returns [`Invariant::DoubleRelease`] if `id` was already freed.
    pub fn remove(&mut self, id: OpId) -> Result<Vec<UpdatingOp>> {
        if !self.contains(id) {
            return Err(Error::invariant(Invariant::DoubleRelease));
        }
        self.unlink(id)?;
        let mut order = Vec::new();
        let mut pending = vec![(id, false)];
        while let Some((current, expanded)) = pending.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            pending.push((current, true));
            for child in self.children(current)?.into_iter().rev() {
                pending.push((child, false));
            }
        }
        let mut removed = Vec::with_capacity(order.len());
        for current in order {
            let entry = &mut self.entries[current.index as usize];
            if let Some(op) = entry.op.take() {
                removed.push(op);
            }
            entry.generation = entry.generation.wrapping_add(1);
            entry.links = Links::default();
            self.free.push(current.index);
            self.live -= 1;
        }
        Ok(removed)
    }

    /// Frees every child of an opcode, children of children first.
    ///
    /// # Errors
    /// Returns [`Invariant::MissingUpdatingFrame`] if `id` is stale.
    pub fn clear_children(&mut self, id: OpId) -> Result<Vec<UpdatingOp>> {
        let mut removed = Vec::new();
        for child in self.children(id)? {
            removed.extend(self.remove(child)?);
        }
        Ok(removed)
    }
}

impl fmt::Debug for UpdatingTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatingTree")
            .field("live", &self.live)
            .finish_non_exhaustive()
    }
}
