//! The element builder and live bounds.
//!
//! [`ElementBuilder`] layers cursors and blocks over an [`OutputTree`].
//! Every region the VM enters gets a [`Bounds`]: a shared, live description
//! of the first and last nodes it owns. Bounds nest, so a parent's extent
//! follows its children when they rebuild or reorder.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use trellis_foundation::{Error, Invariant, NodeId, Result};

use crate::tree::OutputTree;

/// One end of a simple block.
#[derive(Clone, Debug)]
pub enum Edge {
    /// A node appended directly to the block.
    Node(NodeId),
    /// A nested block.
    Block(Bounds),
}

impl Edge {
    fn first_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(node) => Some(*node),
            Self::Block(bounds) => bounds.first_node(),
        }
    }

    fn last_node(&self) -> Option<NodeId> {
        match self {
            Self::Node(node) => Some(*node),
            Self::Block(bounds) => bounds.last_node(),
        }
    }
}

/// The contents of a live block.
#[derive(Debug)]
pub enum LiveBlock {
    /// A region of siblings.
    Simple {
        /// The element the region lives in.
        parent: NodeId,
        /// The first thing appended at nesting depth zero.
        first: Option<Edge>,
        /// The last thing appended at nesting depth zero.
        last: Option<Edge>,
        /// Elements currently open inside the block.
        nesting: usize,
    },
    /// The items of a keyed loop followed by a marker comment.
    List {
        /// The element the items live in.
        parent: NodeId,
        /// Item bounds in order.
        items: Vec<Bounds>,
        /// Trailing marker, present once the list is closed.
        marker: Option<NodeId>,
    },
}

/// A shared handle to a live block.
#[derive(Clone)]
pub struct Bounds(Rc<RefCell<LiveBlock>>);

impl Bounds {
    /// Creates an empty simple block.
    #[must_use]
    pub fn simple(parent: NodeId) -> Self {
        Self(Rc::new(RefCell::new(LiveBlock::Simple {
            parent,
            first: None,
            last: None,
            nesting: 0,
        })))
    }

    /// Creates an empty list block.
    #[must_use]
    pub fn list(parent: NodeId) -> Self {
        Self(Rc::new(RefCell::new(LiveBlock::List {
            parent,
            items: Vec::new(),
            marker: None,
        })))
    }

    /// Returns true if both handles share one block.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the element the block lives in.
    #[must_use]
    pub fn parent(&self) -> NodeId {
        match &*self.0.borrow() {
            LiveBlock::Simple { parent, .. } | LiveBlock::List { parent, .. } => *parent,
        }
    }

    /// Returns true for list blocks.
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(&*self.0.borrow(), LiveBlock::List { .. })
    }

    /// Returns the first node the block owns.
    #[must_use]
    pub fn first_node(&self) -> Option<NodeId> {
        match &*self.0.borrow() {
            LiveBlock::Simple { first, .. } => first.as_ref().and_then(Edge::first_node),
            LiveBlock::List { items, marker, .. } => items
                .iter()
                .find_map(Bounds::first_node)
                .or(*marker),
        }
    }

    /// Returns the last node the block owns.
    #[must_use]
    pub fn last_node(&self) -> Option<NodeId> {
        match &*self.0.borrow() {
            LiveBlock::Simple { last, .. } => last.as_ref().and_then(Edge::last_node),
            LiveBlock::List { items, marker, .. } => {
                marker.or_else(|| items.iter().rev().find_map(Bounds::last_node))
            }
        }
    }

    /// Returns the nodes the block owns, in order.
    #[must_use]
    pub fn nodes(&self, tree: &dyn OutputTree) -> Vec<NodeId> {
        let (Some(first), Some(last)) = (self.first_node(), self.last_node()) else {
            return Vec::new();
        };
        let mut nodes = vec![first];
        let mut current = first;
        while current != last {
            match tree.next_sibling(current) {
                Some(next) => {
                    nodes.push(next);
                    current = next;
                }
                None => break,
            }
        }
        nodes
    }

    /// Removes every node the block owns and returns the sibling that
    /// followed them.
    pub fn clear(&self, tree: &mut dyn OutputTree) -> Option<NodeId> {
        let nodes = self.nodes(tree);
        let next = nodes.last().and_then(|&last| tree.next_sibling(last));
        let parent = self.parent();
        for node in nodes {
            tree.remove_child(parent, node);
        }
        next
    }

    /// Moves every node the block owns before `reference`.
    pub fn move_before(&self, tree: &mut dyn OutputTree, reference: Option<NodeId>) {
        let parent = self.parent();
        for node in self.nodes(tree) {
            tree.insert_before(parent, node, reference);
        }
    }

    /// Forgets the block's contents so it can be rebuilt in place.
    pub fn reset(&self) {
        let parent = self.parent();
        *self.0.borrow_mut() = LiveBlock::Simple {
            parent,
            first: None,
            last: None,
            nesting: 0,
        };
    }

    /// Returns the item bounds of a list block.
    #[must_use]
    pub fn items(&self) -> Vec<Bounds> {
        match &*self.0.borrow() {
            LiveBlock::List { items, .. } => items.clone(),
            LiveBlock::Simple { .. } => Vec::new(),
        }
    }

    /// Returns the marker of a closed list block.
    #[must_use]
    pub fn marker(&self) -> Option<NodeId> {
        match &*self.0.borrow() {
            LiveBlock::List { marker, .. } => *marker,
            LiveBlock::Simple { .. } => None,
        }
    }

    /// Removes an item from a list block.
    pub fn remove_item(&self, item: &Bounds) {
        if let LiveBlock::List { items, .. } = &mut *self.0.borrow_mut() {
            items.retain(|existing| !existing.ptr_eq(item));
        }
    }

    /// Places an item of a list block before another item, or last.
    pub fn place_item(&self, item: &Bounds, before: Option<&Bounds>) {
        if let LiveBlock::List { items, .. } = &mut *self.0.borrow_mut() {
            items.retain(|existing| !existing.ptr_eq(item));
            let index = before
                .and_then(|b| items.iter().position(|existing| existing.ptr_eq(b)))
                .unwrap_or(items.len());
            items.insert(index, item.clone());
        }
    }

    fn did_append_edge(&self, edge: Edge) {
        match &mut *self.0.borrow_mut() {
            LiveBlock::Simple {
                first,
                last,
                nesting,
                ..
            } => {
                if *nesting == 0 {
                    if first.is_none() {
                        *first = Some(edge.clone());
                    }
                    *last = Some(edge);
                }
            }
            LiveBlock::List { items, .. } => {
                if let Edge::Block(bounds) = edge {
                    items.push(bounds);
                }
            }
        }
    }

    fn did_open_element(&self, element: NodeId) {
        self.did_append_edge(Edge::Node(element));
        if let LiveBlock::Simple { nesting, .. } = &mut *self.0.borrow_mut() {
            *nesting += 1;
        }
    }

    fn did_close_element(&self) {
        if let LiveBlock::Simple { nesting, .. } = &mut *self.0.borrow_mut() {
            *nesting = nesting.saturating_sub(1);
        }
    }

    fn is_empty(&self) -> bool {
        match &*self.0.borrow() {
            LiveBlock::Simple { first, .. } => first.is_none(),
            LiveBlock::List { marker, .. } => marker.is_none(),
        }
    }

    fn set_marker(&self, node: NodeId) {
        if let LiveBlock::List { marker, .. } = &mut *self.0.borrow_mut() {
            *marker = Some(node);
        }
    }
}

impl fmt::Debug for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bounds")
            .field("parent", &self.parent())
            .field("first", &self.first_node())
            .field("last", &self.last_node())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum CursorKind {
    Root,
    Element,
    Remote,
}

#[derive(Copy, Clone, Debug)]
struct Cursor {
    element: NodeId,
    next_sibling: Option<NodeId>,
    kind: CursorKind,
}

/// A block plus the cursor depth it was opened at.
#[derive(Debug)]
struct OpenBlock {
    bounds: Bounds,
    cursors: usize,
}

/// Tracks where output goes and which block owns it.
#[derive(Debug)]
pub struct ElementBuilder {
    cursors: Vec<Cursor>,
    blocks: Vec<OpenBlock>,
    constructing: Option<NodeId>,
}

impl ElementBuilder {
    /// Creates a builder that inserts into `parent` before `next_sibling`.
    #[must_use]
    pub fn new(parent: NodeId, next_sibling: Option<NodeId>) -> Self {
        Self {
            cursors: vec![Cursor {
                element: parent,
                next_sibling,
                kind: CursorKind::Root,
            }],
            blocks: Vec::new(),
            constructing: None,
        }
    }

    /// Returns the element output currently goes into.
    #[must_use]
    pub fn element(&self) -> NodeId {
        self.cursor().element
    }

    /// Returns the number of open blocks.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true once every element and remote cursor has been closed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.cursors.len() == 1 && self.constructing.is_none()
    }

    fn cursor(&self) -> Cursor {
        // The root cursor is never popped.
        self.cursors[self.cursors.len() - 1]
    }

    fn insert(&mut self, tree: &mut dyn OutputTree, node: NodeId) {
        let cursor = self.cursor();
        tree.insert_before(cursor.element, node, cursor.next_sibling);
    }

    fn innermost(&self) -> Option<&Bounds> {
        self.blocks.last().map(|block| &block.bounds)
    }

    fn open_block(&mut self, bounds: Bounds) {
        self.blocks.push(OpenBlock {
            bounds,
            cursors: self.cursors.len(),
        });
    }

    fn notify(&self, edge: Edge) {
        if let Some(block) = self.innermost() {
            block.did_append_edge(edge);
        }
    }

    // === Nodes ===

    /// Appends a text node.
    pub fn append_text(&mut self, tree: &mut dyn OutputTree, text: &str) -> NodeId {
        let node = tree.create_text(text);
        self.insert(tree, node);
        self.notify(Edge::Node(node));
        node
    }

    /// Appends a comment.
    pub fn append_comment(&mut self, tree: &mut dyn OutputTree, text: &str) -> NodeId {
        let node = tree.create_comment(text);
        self.insert(tree, node);
        self.notify(Edge::Node(node));
        node
    }

    /// Creates an element that attributes and modifiers can target before it
    /// is inserted.
    ///
    /// # Errors
    /// Returns [`Invariant::UnbalancedBlocks`] if another element is still
    /// under construction.
    pub fn open_element(&mut self, tree: &mut dyn OutputTree, tag: &str) -> Result<NodeId> {
        if self.constructing.is_some() {
            return Err(Error::invariant(Invariant::UnbalancedBlocks));
        }
        let element = tree.create_element(tag);
        self.constructing = Some(element);
        Ok(element)
    }

    /// Returns the element under construction.
    ///
    /// # Errors
    /// Returns [`Invariant::UnbalancedBlocks`] if no element is under construction.
    pub fn constructing(&self) -> Result<NodeId> {
        self.constructing
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedBlocks))
    }

    /// Inserts the element under construction and descends into it.
    ///
    /// # Errors
    /// Returns [`Invariant::UnbalancedBlocks`] if no element is under construction.
    pub fn flush_element(&mut self, tree: &mut dyn OutputTree) -> Result<NodeId> {
        let element = self.constructing()?;
        self.constructing = None;
        self.insert(tree, element);
        if let Some(block) = self.innermost() {
            block.did_open_element(element);
        }
        self.cursors.push(Cursor {
            element,
            next_sibling: None,
            kind: CursorKind::Element,
        });
        Ok(element)
    }

    /// Leaves the current element and returns it.
    ///
    /// # Errors
    /// Returns [`Invariant::UnbalancedBlocks`] if the current cursor is not
    /// an element opened by [`ElementBuilder::flush_element`].
    pub fn close_element(&mut self) -> Result<NodeId> {
        if self.cursor().kind != CursorKind::Element {
            return Err(Error::invariant(Invariant::UnbalancedBlocks));
        }
        let cursor = self.cursor();
        self.cursors.pop();
        if let Some(block) = self.innermost() {
            block.did_close_element();
        }
        Ok(cursor.element)
    }

    // === Blocks ===

    /// Opens a simple block inside the current one.
    pub fn push_simple_block(&mut self) -> Bounds {
        let bounds = Bounds::simple(self.element());
        self.notify(Edge::Block(bounds.clone()));
        self.open_block(bounds.clone());
        bounds
    }

    /// Opens a list block inside the current one.
    pub fn push_list_block(&mut self) -> Bounds {
        let bounds = Bounds::list(self.element());
        self.notify(Edge::Block(bounds.clone()));
        self.open_block(bounds.clone());
        bounds
    }

    /// Reopens an existing block without registering it with a parent.
    pub fn resume_block(&mut self, bounds: Bounds) {
        self.open_block(bounds);
    }

    /// Returns the innermost block.
    ///
    /// # Errors
    /// Returns [`Invariant::UnbalancedBlocks`] if no block is open.
    pub fn current_block(&self) -> Result<Bounds> {
        self.innermost()
            .cloned()
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedBlocks))
    }

    /// Closes the innermost block.
    ///
    /// An empty simple block gets a placeholder comment so it always has a
    /// position. A list block gets its trailing marker.
    ///
    /// # Errors
    /// Returns [`Invariant::UnbalancedBlocks`] if no block is open.
    pub fn pop_block(&mut self, tree: &mut dyn OutputTree) -> Result<Bounds> {
        let bounds = self
            .blocks
            .pop()
            .map(|block| block.bounds)
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedBlocks))?;
        if bounds.is_empty() {
            let node = tree.create_comment("");
            self.insert(tree, node);
            if bounds.is_list() {
                bounds.set_marker(node);
            } else {
                bounds.did_append_edge(Edge::Node(node));
            }
        }
        Ok(bounds)
    }

    /// Redirects output into `element` before `next_sibling`.
    ///
    /// The returned block is not part of the current block's bounds, so the
    /// caller must tear it down separately.
    pub fn push_remote(&mut self, element: NodeId, next_sibling: Option<NodeId>) -> Bounds {
        self.cursors.push(Cursor {
            element,
            next_sibling,
            kind: CursorKind::Remote,
        });
        let bounds = Bounds::simple(element);
        self.open_block(bounds.clone());
        bounds
    }

    /// Closes the innermost remote block and returns to the previous cursor.
    ///
    /// # Errors
    /// Returns [`Invariant::UnbalancedBlocks`] if the current cursor is not remote.
    pub fn pop_remote(&mut self, tree: &mut dyn OutputTree) -> Result<Bounds> {
        if self.cursor().kind != CursorKind::Remote {
            return Err(Error::invariant(Invariant::UnbalancedBlocks));
        }
        let bounds = self.pop_block(tree)?;
        self.cursors.pop();
        Ok(bounds)
    }

    /// Closes everything an interrupted run left open.
    ///
    /// Each block is closed under the cursor it was opened with, so an empty
    /// block gets its placeholder in its own element and every bounds
    /// resolves to the nodes already inserted.
    pub fn settle(&mut self, tree: &mut dyn OutputTree) {
        self.constructing = None;
        while let Some(block) = self.blocks.last() {
            let depth = block.cursors.max(1);
            self.cursors.truncate(depth);
            if self.pop_block(tree).is_err() {
                break;
            }
        }
        self.cursors.truncate(1);
    }
}
