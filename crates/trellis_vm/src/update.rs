//! The update interpreter.
//!
//! [`UpdateVm`] walks the updating tree with an explicit frame stack. Leaf
//! opcodes patch the output in place. An opcode that can no longer patch
//! (an assert whose value moved, or a failing computation) unwinds to the
//! nearest enclosing region, which tears down its contents and re-runs its
//! body through the append interpreter.

use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};
use trellis_foundation::{Error, Invariant, NodeId, Result, Value};
use trellis_reactive::{
    IterationItem, ItemKey, combine, validate_tag, value_for_tag,
};

use crate::append::{AppendVm, Balance, Resumption, apply_attribute};
use crate::config::VmConfig;
use crate::elements::{Bounds, ElementBuilder};
use crate::list::{ListDelegate, reconcile};
use crate::runtime::{RenderState, Runtime};
use crate::stack::Slot;
use crate::tree::OutputTree;
use crate::updating::{AssertKind, ListOp, OpId, TryOp, UpdatingOp};

/// Counters describing one update pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    /// Updating opcodes evaluated.
    pub evaluated: usize,
    /// Cache groups skipped because their tag validated.
    pub skipped_groups: usize,
    /// Regions torn down and rebuilt.
    pub rebuilt: usize,
    /// List items inserted.
    pub inserts: usize,
    /// List items moved.
    pub moves: usize,
    /// List items kept in place.
    pub retains: usize,
    /// List items deleted.
    pub deletes: usize,
}

/// Why evaluation stopped early.
#[derive(Debug)]
pub(crate) enum Unwind {
    /// A guarded value moved; the enclosing region must rebuild.
    Rebuild,
    /// A computation failed.
    Failed(Error),
    /// A rebuild failed. No handler may absorb it.
    Fatal(Error),
}

impl From<Error> for Unwind {
    fn from(error: Error) -> Self {
        Self::Failed(error)
    }
}

struct Frame {
    current: Option<OpId>,
    handler: Option<OpId>,
}

/// The incremental interpreter.
pub(crate) struct UpdateVm<'a> {
    runtime: Runtime<'a>,
    config: VmConfig,
    state: RenderState,
    frames: Vec<Frame>,
    stats: RenderStats,
}

impl<'a> UpdateVm<'a> {
    pub(crate) fn new(runtime: Runtime<'a>, config: VmConfig, state: RenderState) -> Self {
        Self {
            runtime,
            config,
            state,
            frames: Vec::new(),
            stats: RenderStats::default(),
        }
    }

    /// Gives back the state and the counters.
    pub(crate) fn finish(self) -> (RenderState, RenderStats) {
        (self.state, self.stats)
    }

    /// Evaluates everything below `root`.
    pub(crate) fn execute(&mut self, root: OpId, tree: &mut dyn OutputTree) -> Result<()> {
        let first = self.state.ops.first_child(root)?;
        self.frames.push(Frame {
            current: first,
            handler: None,
        });
        while let Some(frame) = self.frames.last_mut() {
            let Some(id) = frame.current else {
                self.frames.pop();
                continue;
            };
            frame.current = self.state.ops.next_sibling(id)?;
            self.stats.evaluated += 1;
            match self.evaluate(id, tree) {
                Ok(()) => {}
                Err(Unwind::Failed(error)) if error.is_invariant() => return Err(error),
                Err(Unwind::Fatal(error)) => return Err(error),
                Err(unwind) => self.throw(unwind, tree)?,
            }
        }
        Ok(())
    }

    fn evaluate(
        &mut self,
        id: OpId,
        tree: &mut dyn OutputTree,
    ) -> std::result::Result<(), Unwind> {
        if self.config.trace_opcodes {
            trace!(op = self.state.ops.get(id)?.name(), "update");
        }
        let first = self.state.ops.first_child(id)?;
        match self.state.ops.get_mut(id)? {
            UpdatingOp::Root { .. } => self.frames.push(Frame {
                current: first,
                handler: None,
            }),
            UpdatingOp::Try(op) => {
                if op.stale {
                    return self.rebuild(id, tree).map_err(Unwind::Fatal);
                }
                self.frames.push(Frame {
                    current: first,
                    handler: Some(id),
                });
            }
            UpdatingOp::List(_) => {
                self.sync_list(id, tree)?;
                let first = self.state.ops.first_child(id)?;
                self.frames.push(Frame {
                    current: first,
                    handler: None,
                });
            }
            UpdatingOp::Assert {
                kind,
                reference,
                last,
            } => {
                let value = reference.value()?;
                let observed = match kind {
                    AssertKind::Truthiness => Value::Bool(value.is_truthy()),
                    AssertKind::Same => value,
                };
                if observed != *last {
                    return Err(Unwind::Rebuild);
                }
            }
            UpdatingOp::DynamicText {
                reference,
                node,
                last,
            } => {
                let text = reference.value()?.to_text();
                if text != *last {
                    tree.set_text(*node, &text);
                    *last = text;
                }
            }
            UpdatingOp::DynamicAttr {
                reference,
                element,
                name,
                last,
            } => {
                let value = reference.value()?;
                if value != *last {
                    apply_attribute(tree, *element, name, &value);
                    *last = value;
                }
            }
            UpdatingOp::Modifier {
                instance,
                last_revision,
            } => {
                let tag = instance.borrow().tag();
                if !validate_tag(&tag, *last_revision) {
                    *last_revision = value_for_tag(&tag);
                    self.state.transaction.update(Rc::clone(instance));
                }
            }
            UpdatingOp::Component {
                instance,
                last_revision,
            } => {
                let tag = instance.borrow().tag();
                if !validate_tag(&tag, *last_revision) {
                    instance.borrow_mut().update()?;
                    *last_revision = value_for_tag(&instance.borrow().tag());
                    self.state.transaction.did_update(Rc::clone(instance));
                }
            }
            UpdatingOp::JumpIfNotModified {
                tag,
                last_revision,
                target,
            } => {
                if !self.config.always_revalidate && validate_tag(&tag.tag(), *last_revision) {
                    let target = *target;
                    let frame = self
                        .frames
                        .last_mut()
                        .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))?;
                    frame.current = target;
                    self.stats.skipped_groups += 1;
                }
            }
            UpdatingOp::DidModify { guard } => {
                let guard = *guard;
                if let UpdatingOp::JumpIfNotModified {
                    tag, last_revision, ..
                } = self.state.ops.get_mut(guard)?
                {
                    *last_revision = value_for_tag(&tag.tag());
                }
            }
        }
        Ok(())
    }

    /// Pops frames up to the nearest region and rebuilds it.
    fn throw(&mut self, unwind: Unwind, tree: &mut dyn OutputTree) -> Result<()> {
        while let Some(frame) = self.frames.pop() {
            if let Some(handler) = frame.handler {
                return self.rebuild(handler, tree);
            }
        }
        match unwind {
            Unwind::Rebuild => Err(Error::invariant(Invariant::UnhandledAssertion)),
            Unwind::Failed(error) | Unwind::Fatal(error) => Err(error),
        }
    }

    fn rebuild(&mut self, id: OpId, tree: &mut dyn OutputTree) -> Result<()> {
        self.stats.rebuilt += 1;
        let removed = self.state.ops.clear_children(id)?;
        self.state.teardown(removed, tree);
        let (bounds, resume, scope, args) = match self.state.ops.get_mut(id)? {
            UpdatingOp::Try(op) => {
                for remote in mem::take(&mut op.remote) {
                    remote.clear(tree);
                }
                op.stale = false;
                (
                    op.bounds.clone(),
                    op.resume,
                    Rc::clone(&op.scope),
                    op.args.clone(),
                )
            }
            _ => return Err(Error::invariant(Invariant::MissingUpdatingFrame)),
        };
        debug!(region = ?bounds, "rebuilding region");
        let next = bounds.clear(tree);
        bounds.reset();
        let mut elements = ElementBuilder::new(bounds.parent(), next);
        elements.resume_block(bounds.clone());
        let pc = self.runtime.program.address_of(resume)?;
        let outcome = self.resume(
            tree,
            Resumption {
                scope,
                pc,
                elements,
                updating: vec![id],
                balance: Balance {
                    blocks: 0,
                    updating: 0,
                    scopes: 1,
                },
            },
            |vm| vm.load_stack(args),
        );
        if let Err(error) = outcome {
            debug!(region = ?bounds, %error, "rebuild failed");
            self.abandon(id, &bounds, next, tree)?;
            return Err(error);
        }
        Ok(())
    }

    /// Discards a half-built region, leaving only its placeholder, and
    /// marks it for a rebuild on the next pass.
    fn abandon(
        &mut self,
        id: OpId,
        bounds: &Bounds,
        next: Option<NodeId>,
        tree: &mut dyn OutputTree,
    ) -> Result<()> {
        let removed = self.state.ops.clear_children(id)?;
        self.state.teardown(removed, tree);
        if let UpdatingOp::Try(op) = self.state.ops.get_mut(id)? {
            for remote in mem::take(&mut op.remote) {
                remote.clear(tree);
            }
            op.stale = true;
            op.tag.dirty();
        }
        bounds.clear(tree);
        bounds.reset();
        let mut elements = ElementBuilder::new(bounds.parent(), next);
        elements.resume_block(bounds.clone());
        elements.pop_block(tree).map(drop)
    }

    /// Lends the state to an append machine and runs it to completion.
    fn resume(
        &mut self,
        tree: &mut dyn OutputTree,
        resumption: Resumption,
        prepare: impl FnOnce(&mut AppendVm<'a>) -> Result<()>,
    ) -> Result<()> {
        let state = mem::take(&mut self.state);
        let mut vm = AppendVm::resume(self.runtime, self.config.clone(), state, resumption);
        let outcome = prepare(&mut vm).and_then(|()| vm.run(tree));
        if outcome.is_err() {
            vm.settle(tree);
        }
        self.state = vm.into_state();
        outcome
    }

    // === Lists ===

    fn list_op(&self, id: OpId) -> Result<&ListOp> {
        match self.state.ops.get(id)? {
            UpdatingOp::List(op) => Ok(op),
            _ => Err(Error::invariant(Invariant::MissingUpdatingFrame)),
        }
    }

    fn list_op_mut(&mut self, id: OpId) -> Result<&mut ListOp> {
        match self.state.ops.get_mut(id)? {
            UpdatingOp::List(op) => Ok(op),
            _ => Err(Error::invariant(Invariant::MissingUpdatingFrame)),
        }
    }

    fn region_bounds(&self, id: OpId) -> Result<Bounds> {
        match self.state.ops.get(id)? {
            UpdatingOp::Try(op) => Ok(op.bounds.clone()),
            _ => Err(Error::invariant(Invariant::MissingUpdatingFrame)),
        }
    }

    fn item_id(&self, list: OpId, key: &ItemKey) -> Result<OpId> {
        self.list_op(list)?
            .items
            .get(key)
            .copied()
            .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))
    }

    /// Brings a list in line with its artifacts.
    fn sync_list(&mut self, id: OpId, tree: &mut dyn OutputTree) -> Result<()> {
        let (artifacts, last_iterated) = {
            let op = self.list_op(id)?;
            (Rc::clone(&op.artifacts), op.last_iterated)
        };
        if !self.config.always_revalidate && validate_tag(&artifacts.refresh_tag(), last_iterated) {
            return Ok(());
        }
        artifacts.refresh()?;
        let keys = artifacts.keys();
        let old = self.list_op(id)?.keys.clone();
        if old != keys {
            debug!(before = old.len(), after = keys.len(), "syncing list");
            let items: Vec<(ItemKey, IterationItem)> = artifacts
                .items()
                .into_iter()
                .map(|item| (item.key.clone(), item))
                .collect();
            let mut sync = ListSync {
                vm: self,
                tree,
                list: id,
            };
            if let Err(error) = reconcile(&old, &items, &mut sync) {
                // Keep the keys in line with the items actually rendered, so
                // the next sync starts from the real order.
                let rendered = self.rendered_keys(id)?;
                self.list_op_mut(id)?.keys = rendered;
                return Err(error);
            }
            self.list_op_mut(id)?.keys = keys;
        }
        let children = self.state.ops.children_tag(id)?;
        let op = self.list_op_mut(id)?;
        op.last_iterated = value_for_tag(&artifacts.refresh_tag());
        op.tag.update(combine([artifacts.refresh_tag(), children]));
        Ok(())
    }

    fn rendered_keys(&self, list: OpId) -> Result<Vec<ItemKey>> {
        let mut keys = Vec::new();
        for child in self.state.ops.children(list)? {
            if let UpdatingOp::Try(TryOp { key: Some(key), .. }) = self.state.ops.get(child)? {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    /// The node a list item must be placed before.
    fn item_anchor(&self, list: OpId, before: Option<OpId>) -> Result<Option<NodeId>> {
        match before {
            Some(before) => Ok(self.region_bounds(before)?.first_node()),
            None => Ok(self.list_op(list)?.bounds.marker()),
        }
    }

    fn insert_item(
        &mut self,
        tree: &mut dyn OutputTree,
        list: OpId,
        key: &ItemKey,
        item: &IterationItem,
        before: Option<&ItemKey>,
    ) -> Result<()> {
        let before = before.map(|key| self.item_id(list, key)).transpose()?;
        let anchor = self.item_anchor(list, before)?;
        let (bounds, scope, body) = {
            let op = self.list_op(list)?;
            (op.bounds.clone(), Rc::clone(&op.scope), op.body)
        };
        let mut elements = ElementBuilder::new(bounds.parent(), anchor);
        elements.resume_block(bounds.clone());
        let pc = self.runtime.program.address_of(body)?;
        let slots = vec![Slot::Ref(item.value.to_ref()), Slot::Ref(item.memo.to_ref())];
        let entered = key.clone();
        let outcome = self.resume(
            tree,
            Resumption {
                scope,
                pc,
                elements,
                updating: vec![list],
                balance: Balance {
                    blocks: 1,
                    updating: 1,
                    scopes: 1,
                },
            },
            |vm| {
                vm.load_stack(slots)?;
                vm.enter_item(entered).map(drop)
            },
        );
        if let Err(error) = outcome {
            if self.list_op(list)?.items.contains_key(key) {
                self.delete_item(tree, list, key)?;
            }
            return Err(error);
        }
        let id = self.item_id(list, key)?;
        self.state.ops.move_before(id, before)?;
        let before_bounds = before.map(|id| self.region_bounds(id)).transpose()?;
        bounds.place_item(&self.region_bounds(id)?, before_bounds.as_ref());
        Ok(())
    }

    fn move_item(
        &mut self,
        tree: &mut dyn OutputTree,
        list: OpId,
        key: &ItemKey,
        before: Option<&ItemKey>,
    ) -> Result<()> {
        let id = self.item_id(list, key)?;
        let before = before.map(|key| self.item_id(list, key)).transpose()?;
        let anchor = self.item_anchor(list, before)?;
        let item_bounds = self.region_bounds(id)?;
        let before_bounds = before.map(|id| self.region_bounds(id)).transpose()?;
        item_bounds.move_before(tree, anchor);
        self.list_op(list)?
            .bounds
            .place_item(&item_bounds, before_bounds.as_ref());
        self.state.ops.move_before(id, before)
    }

    fn delete_item(&mut self, tree: &mut dyn OutputTree, list: OpId, key: &ItemKey) -> Result<()> {
        let id = self
            .list_op_mut(list)?
            .items
            .remove(key)
            .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))?;
        let item_bounds = self.region_bounds(id)?;
        let removed = self.state.ops.remove(id)?;
        self.state.teardown(removed, tree);
        item_bounds.clear(tree);
        self.list_op(list)?.bounds.remove_item(&item_bounds);
        Ok(())
    }
}

struct ListSync<'v, 'a, 't> {
    vm: &'v mut UpdateVm<'a>,
    tree: &'t mut dyn OutputTree,
    list: OpId,
}

impl ListDelegate<ItemKey, IterationItem> for ListSync<'_, '_, '_> {
    fn insert(&mut self, key: &ItemKey, item: &IterationItem, before: Option<&ItemKey>) -> Result<()> {
        self.vm.stats.inserts += 1;
        self.vm.insert_item(self.tree, self.list, key, item, before)
    }

    fn retain(&mut self, _key: &ItemKey, _item: &IterationItem) -> Result<()> {
        self.vm.stats.retains += 1;
        Ok(())
    }

    fn move_item(
        &mut self,
        key: &ItemKey,
        _item: &IterationItem,
        before: Option<&ItemKey>,
    ) -> Result<()> {
        self.vm.stats.moves += 1;
        self.vm.move_item(self.tree, self.list, key, before)
    }

    fn delete(&mut self, key: &ItemKey) -> Result<()> {
        self.vm.stats.deletes += 1;
        self.vm.delete_item(self.tree, self.list, key)
    }
}
