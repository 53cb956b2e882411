//! State shared by both passes: the runtime handles, the capability cache,
//! the updating tree, and the commit transaction.

use std::mem;
use std::rc::Rc;

use tracing::debug;
use trellis_foundation::Result;
use trellis_program::Program;

use crate::capability::{CapabilityCache, Resolver, SharedComponent, SharedModifier};
use crate::tree::OutputTree;
use crate::updating::{UpdatingOp, UpdatingTree};

/// The read-only inputs of a pass.
#[derive(Copy, Clone)]
pub struct Runtime<'a> {
    /// The compiled program.
    pub program: &'a Program,
    /// Resolves capability specifiers.
    pub resolver: &'a dyn Resolver,
}

impl<'a> Runtime<'a> {
    /// Bundles a program and a resolver.
    #[must_use]
    pub fn new(program: &'a Program, resolver: &'a dyn Resolver) -> Self {
        Self { program, resolver }
    }
}

/// Work deferred to the end of a pass.
#[derive(Default)]
pub(crate) struct Transaction {
    installs: Vec<SharedModifier>,
    updates: Vec<SharedModifier>,
    created: Vec<SharedComponent>,
    updated: Vec<SharedComponent>,
}

impl Transaction {
    pub(crate) fn install(&mut self, modifier: SharedModifier) {
        self.installs.push(modifier);
    }

    pub(crate) fn update(&mut self, modifier: SharedModifier) {
        self.updates.push(modifier);
    }

    pub(crate) fn did_create(&mut self, component: SharedComponent) {
        self.created.push(component);
    }

    pub(crate) fn did_update(&mut self, component: SharedComponent) {
        self.updated.push(component);
    }

    /// Runs every deferred hook in scheduling order.
    pub(crate) fn commit(&mut self, tree: &mut dyn OutputTree) -> Result<()> {
        debug!(
            installs = self.installs.len(),
            updates = self.updates.len(),
            created = self.created.len(),
            updated = self.updated.len(),
            "committing transaction"
        );
        for modifier in mem::take(&mut self.installs) {
            modifier.borrow_mut().install(tree)?;
        }
        for modifier in mem::take(&mut self.updates) {
            modifier.borrow_mut().update(tree)?;
        }
        for component in mem::take(&mut self.created) {
            component.borrow_mut().did_create()?;
        }
        for component in mem::take(&mut self.updated) {
            component.borrow_mut().did_update()?;
        }
        Ok(())
    }

    fn forget(&mut self, modifier: &SharedModifier) {
        self.installs.retain(|pending| !Rc::ptr_eq(pending, modifier));
        self.updates.retain(|pending| !Rc::ptr_eq(pending, modifier));
    }

    fn forget_component(&mut self, component: &SharedComponent) {
        self.created.retain(|pending| !Rc::ptr_eq(pending, component));
        self.updated.retain(|pending| !Rc::ptr_eq(pending, component));
    }
}

/// Everything a render result owns between passes.
#[derive(Default)]
pub(crate) struct RenderState {
    pub(crate) ops: UpdatingTree,
    pub(crate) capabilities: CapabilityCache,
    pub(crate) transaction: Transaction,
}

impl RenderState {
    /// Runs the destructors of freed opcodes and removes their remote blocks.
    ///
    /// `ops` must be in the order [`UpdatingTree::remove`] returns them.
    pub(crate) fn teardown(&mut self, ops: Vec<UpdatingOp>, tree: &mut dyn OutputTree) {
        for op in ops {
            match op {
                UpdatingOp::Modifier { instance, .. } => {
                    self.transaction.forget(&instance);
                    let destructor = instance.borrow_mut().destructor();
                    if let Some(destructor) = destructor {
                        destructor();
                    }
                }
                UpdatingOp::Component { instance, .. } => {
                    self.transaction.forget_component(&instance);
                    let destructor = instance.borrow_mut().destructor();
                    if let Some(destructor) = destructor {
                        destructor();
                    }
                }
                UpdatingOp::Root { remote, .. } => {
                    for bounds in remote {
                        bounds.clear(tree);
                    }
                }
                UpdatingOp::Try(op) => {
                    for bounds in op.remote {
                        bounds.clear(tree);
                    }
                }
                _ => {}
            }
        }
    }
}
