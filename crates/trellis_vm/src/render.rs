//! Render entry points.
//!
//! [`render_main`] prepares the first pass and hands back a
//! [`TemplateIterator`] the host steps one instruction at a time (or runs to
//! completion with [`TemplateIterator::sync`]). The finished
//! [`RenderResult`] owns everything later passes need.

use std::mem;

use tracing::debug;
use trellis_foundation::{Error, Invariant, NodeId, Result};
use trellis_program::Handle;
use trellis_reactive::ValueRef;

use crate::append::AppendVm;
use crate::config::VmConfig;
use crate::elements::Bounds;
use crate::runtime::{RenderState, Runtime};
use crate::stack::Registers;
use crate::tree::OutputTree;
use crate::update::{RenderStats, UpdateVm};
use crate::updating::OpId;

/// Prepares the first render of `entry` into `root_element`.
///
/// `entry` is a layout block: it starts by popping `self_ref` into a root
/// scope. Nothing runs until the iterator is stepped.
///
/// # Errors
/// Returns [`Invariant::InvalidHandle`] if `entry` is not a live block.
pub fn render_main<'a>(
    runtime: Runtime<'a>,
    tree: &'a mut dyn OutputTree,
    root_element: NodeId,
    entry: Handle,
    self_ref: ValueRef,
    config: VmConfig,
) -> Result<TemplateIterator<'a>> {
    debug!(?entry, "starting render");
    let (vm, root, bounds) = AppendVm::main(runtime, config.clone(), root_element, entry, self_ref)?;
    Ok(TemplateIterator {
        vm: Some(vm),
        tree,
        root,
        bounds,
        config,
    })
}

/// The outcome of one step.
pub enum Step {
    /// More instructions remain.
    Continue,
    /// The pass finished and committed.
    Done(RenderResult),
}

/// Steps the first pass.
pub struct TemplateIterator<'a> {
    vm: Option<AppendVm<'a>>,
    tree: &'a mut dyn OutputTree,
    root: OpId,
    bounds: Bounds,
    config: VmConfig,
}

impl TemplateIterator<'_> {
    /// Executes one instruction.
    ///
    /// A failed step ends the pass; later calls report exhaustion.
    ///
    /// # Errors
    /// Returns the error raised by the instruction or the final commit, or
    /// [`Invariant::IteratorExhausted`] once the pass is over.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Step> {
        let vm = self
            .vm
            .as_mut()
            .ok_or_else(|| Error::invariant(Invariant::IteratorExhausted))?;
        match vm.step(self.tree) {
            Ok(false) => return Ok(Step::Continue),
            Ok(true) => {}
            Err(error) => {
                self.vm = None;
                return Err(error);
            }
        }
        let Some(vm) = self.vm.take() else {
            return Err(Error::invariant(Invariant::IteratorExhausted));
        };
        let mut state = vm.into_state();
        state.transaction.commit(self.tree)?;
        debug!(opcodes = state.ops.len(), "render complete");
        Ok(Step::Done(RenderResult {
            state,
            root: self.root,
            bounds: self.bounds.clone(),
            config: self.config.clone(),
            destroyed: false,
        }))
    }

    /// Runs the pass to completion.
    ///
    /// # Errors
    /// Returns the first error raised by [`TemplateIterator::next`].
    pub fn sync(mut self) -> Result<RenderResult> {
        loop {
            if let Step::Done(result) = self.next()? {
                return Ok(result);
            }
        }
    }

    /// Returns the registers, or `None` once the pass is over.
    #[must_use]
    pub fn registers(&self) -> Option<Registers> {
        self.vm.as_ref().map(AppendVm::registers)
    }

    /// Returns `sp`, or `None` once the pass is over.
    #[must_use]
    pub fn sp(&self) -> Option<isize> {
        self.vm.as_ref().map(AppendVm::sp)
    }
}

/// A rendered program, ready to be updated or destroyed.
pub struct RenderResult {
    state: RenderState,
    root: OpId,
    bounds: Bounds,
    config: VmConfig,
    destroyed: bool,
}

impl RenderResult {
    /// Returns the extent of the rendered output.
    #[must_use]
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Returns the number of live updating opcodes.
    #[must_use]
    pub fn opcode_count(&self) -> usize {
        self.state.ops.len()
    }

    /// Returns true once [`RenderResult::destroy`] has run.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Brings the output up to date with the current revision.
    ///
    /// # Errors
    /// Returns [`Invariant::Destroyed`] after [`RenderResult::destroy`], any
    /// invariant violation, a failure no region could absorb, or a failure
    /// while rebuilding or committing.
    pub fn rerender(
        &mut self,
        runtime: Runtime<'_>,
        tree: &mut dyn OutputTree,
    ) -> Result<RenderStats> {
        if self.destroyed {
            return Err(Error::invariant(Invariant::Destroyed));
        }
        let mut vm = UpdateVm::new(runtime, self.config.clone(), mem::take(&mut self.state));
        let outcome = vm.execute(self.root, tree);
        let (state, stats) = vm.finish();
        self.state = state;
        outcome?;
        self.state.transaction.commit(tree)?;
        debug!(
            evaluated = stats.evaluated,
            skipped = stats.skipped_groups,
            rebuilt = stats.rebuilt,
            inserts = stats.inserts,
            moves = stats.moves,
            deletes = stats.deletes,
            "rerender complete"
        );
        Ok(stats)
    }

    /// Tears the whole result down.
    ///
    /// Destructors run once each, children before parents, and every node
    /// the result inserted is removed.
    ///
    /// # Errors
    /// Returns [`Invariant::Destroyed`] if the result was already destroyed.
    pub fn destroy(&mut self, tree: &mut dyn OutputTree) -> Result<()> {
        if self.destroyed {
            return Err(Error::invariant(Invariant::Destroyed));
        }
        let removed = self.state.ops.remove(self.root)?;
        self.state.teardown(removed, tree);
        self.bounds.clear(tree);
        self.destroyed = true;
        debug!("render result destroyed");
        Ok(())
    }
}
