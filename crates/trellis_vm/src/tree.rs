//! The host output tree.

use trellis_foundation::NodeId;

/// The imperative interface the VM drives to build and patch output.
///
/// The VM never inspects the concrete representation. Node identities are
/// issued by the host and must stay stable for the life of the node.
pub trait OutputTree {
    /// Creates a detached element.
    fn create_element(&mut self, tag: &str) -> NodeId;

    /// Creates a detached text node.
    fn create_text(&mut self, text: &str) -> NodeId;

    /// Creates a detached comment.
    fn create_comment(&mut self, text: &str) -> NodeId;

    /// Inserts `node` into `parent` before `reference`, or at the end when
    /// `reference` is `None`. A node that already has a parent is moved.
    fn insert_before(&mut self, parent: NodeId, node: NodeId, reference: Option<NodeId>);

    /// Detaches `node` from `parent`.
    fn remove_child(&mut self, parent: NodeId, node: NodeId);

    /// Returns the sibling after `node`, if any.
    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;

    /// Sets an attribute.
    fn set_attribute(&mut self, element: NodeId, name: &str, value: &str);

    /// Removes an attribute.
    fn remove_attribute(&mut self, element: NodeId, name: &str);

    /// Replaces the contents of a text node.
    fn set_text(&mut self, node: NodeId, text: &str);
}
