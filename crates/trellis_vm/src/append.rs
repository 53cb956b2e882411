//! The append interpreter.
//!
//! [`AppendVm`] runs a program once against a data context. It builds the
//! output tree through an [`ElementBuilder`] and records an updating opcode
//! for everything that may change later. The same machine also re-runs
//! single regions for the update pass: a rebuild or a list insertion resumes
//! it from a saved program position with a saved scope and stack.
//!
//! Jump operands are relative to the address of the jumping instruction.

#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::too_many_lines)]


use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::trace;
use trellis_foundation::{Error, ErrorContext, Invariant, NodeId, Result, Value};
use trellis_program::{
    Handle, MachineOp, OPCODE_SIZE, Op, PrimitiveKind, ResumePoint, Syscall,
};
use trellis_reactive::{
    IterationArtifacts, IterationItem, ItemKey, KeyFor, UpdatableTag, ValueRef, combine,
    compute_ref, const_ref, property_ref, value_for_tag,
};

use crate::capability::{Arguments, ModifierDefinition, SharedComponent, SharedModifier};
use crate::config::VmConfig;
use crate::elements::{Bounds, ElementBuilder};
use crate::runtime::{RenderState, Runtime};
use crate::scope::Scope;
use crate::stack::{EvaluationStack, Registers, Slot};
use crate::tree::OutputTree;
use crate::updating::{AssertKind, ListOp, OpId, TryOp, UpdatingOp};

/// Depths the machine must be back at when it halts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Balance {
    pub(crate) blocks: usize,
    pub(crate) updating: usize,
    pub(crate) scopes: usize,
}

/// Saved state to resume the machine from.
pub(crate) struct Resumption {
    pub(crate) scope: Rc<Scope>,
    pub(crate) pc: usize,
    pub(crate) elements: ElementBuilder,
    pub(crate) updating: Vec<OpId>,
    pub(crate) balance: Balance,
}

struct ListCursor {
    op: OpId,
    items: Vec<IterationItem>,
    next: usize,
}

type PendingModifier = (Rc<dyn ModifierDefinition>, Arguments);

/// The first-pass interpreter.
pub(crate) struct AppendVm<'a> {
    runtime: Runtime<'a>,
    config: VmConfig,
    state: RenderState,
    stack: EvaluationStack,
    scopes: Vec<Rc<Scope>>,
    elements: ElementBuilder,
    updating: Vec<OpId>,
    cache_groups: Vec<OpId>,
    lists: Vec<ListCursor>,
    components: Vec<SharedComponent>,
    modifiers: Vec<Vec<PendingModifier>>,
    balance: Balance,
    halted: bool,
}

impl<'a> AppendVm<'a> {
    /// Prepares a full render of `entry` into `root_element`.
    ///
    /// Returns the machine and the root of its updating tree.
    pub(crate) fn main(
        runtime: Runtime<'a>,
        config: VmConfig,
        root_element: NodeId,
        entry: Handle,
        self_ref: ValueRef,
    ) -> Result<(Self, OpId, Bounds)> {
        let mut state = RenderState::default();
        let mut elements = ElementBuilder::new(root_element, None);
        let bounds = elements.push_simple_block();
        let root = state.ops.insert_root(UpdatingOp::Root {
            bounds: bounds.clone(),
            remote: Vec::new(),
        });
        let pc = runtime.program.entry(entry)?;
        let mut vm = Self::with_state(
            runtime,
            config,
            state,
            elements,
            Balance {
                blocks: 1,
                updating: 1,
                scopes: 0,
            },
        );
        vm.updating.push(root);
        vm.stack.set_pc(pc as isize);
        vm.stack.push_ref(self_ref)?;
        Ok((vm, root, bounds))
    }

    /// Prepares a machine that continues from saved state.
    pub(crate) fn resume(
        runtime: Runtime<'a>,
        config: VmConfig,
        state: RenderState,
        resumption: Resumption,
    ) -> Self {
        let mut vm = Self::with_state(
            runtime,
            config,
            state,
            resumption.elements,
            resumption.balance,
        );
        vm.scopes.push(resumption.scope);
        vm.updating = resumption.updating;
        vm.stack.set_pc(resumption.pc as isize);
        vm
    }

    fn with_state(
        runtime: Runtime<'a>,
        config: VmConfig,
        state: RenderState,
        elements: ElementBuilder,
        balance: Balance,
    ) -> Self {
        let stack = EvaluationStack::new(
            config.initial_stack_capacity,
            config.max_stack,
            config.max_call_depth,
        );
        Self {
            runtime,
            config,
            state,
            stack,
            scopes: Vec::new(),
            elements,
            updating: Vec::new(),
            cache_groups: Vec::new(),
            lists: Vec::new(),
            components: Vec::new(),
            modifiers: Vec::new(),
            balance,
            halted: false,
        }
    }

    /// Gives back the state the machine built.
    pub(crate) fn into_state(self) -> RenderState {
        self.state
    }

    /// Returns the registers.
    pub(crate) fn registers(&self) -> Registers {
        self.stack.registers()
    }

    /// Returns `sp`.
    pub(crate) fn sp(&self) -> isize {
        self.stack.sp()
    }

    /// Closes whatever an interrupted run left open in the output.
    pub(crate) fn settle(&mut self, tree: &mut dyn OutputTree) {
        self.elements.settle(tree);
    }

    /// Pushes saved slots, bottom first.
    pub(crate) fn load_stack(&mut self, slots: Vec<Slot>) -> Result<()> {
        for slot in slots {
            self.stack.push(slot)?;
        }
        Ok(())
    }

    // === Dispatch ===

    /// Runs until the machine halts.
    pub(crate) fn run(&mut self, tree: &mut dyn OutputTree) -> Result<()> {
        while !self.step(tree)? {}
        Ok(())
    }

    /// Executes one instruction. Returns true once the machine has halted.
    pub(crate) fn step(&mut self, tree: &mut dyn OutputTree) -> Result<bool> {
        if self.halted {
            return Ok(true);
        }
        let pc = self.stack.registers().pc;
        let at = usize::try_from(pc)
            .map_err(|_| Error::invariant(Invariant::InvalidAddress(pc as usize)))?;
        let op = self.runtime.program.opcode_at(at)?;
        if self.config.trace_opcodes {
            trace!(pc = at, sp = self.stack.sp(), op = %op, "append");
        }
        self.stack.set_pc((at + OPCODE_SIZE) as isize);
        let outcome = match op {
            Op::Machine(op) => self.machine(op, at),
            Op::Syscall(op) => self.syscall(op, at, tree),
        };
        outcome.map_err(|error| {
            error.with_context(ErrorContext::new().with_pc(at).with_opcode(op.to_string()))
        })?;
        Ok(self.halted)
    }

    fn machine(&mut self, op: MachineOp, at: usize) -> Result<()> {
        match op {
            MachineOp::PushFrame => self.stack.push_frame(),
            MachineOp::PopFrame => self.stack.pop_frame(),
            MachineOp::InvokeVirtual => match self.stack.pop()? {
                Slot::Block(block) => self.call(block),
                _ => Err(Error::invariant(Invariant::UnexpectedStackSlot {
                    expected: "block",
                })),
            },
            MachineOp::InvokeStatic(block) => self.call(block),
            MachineOp::Jump(offset) => {
                self.stack.set_pc(target(at, offset)?);
                Ok(())
            }
            MachineOp::Return => {
                let ra = self.stack.registers().ra;
                if ra == -1 {
                    self.halt()
                } else {
                    self.stack.set_pc(ra);
                    Ok(())
                }
            }
            MachineOp::ReturnTo(offset) => {
                self.stack.set_ra(target(at, offset)?);
                Ok(())
            }
        }
    }

    fn call(&mut self, block: Handle) -> Result<()> {
        let entry = self.runtime.program.entry(block)?;
        self.stack.set_ra(self.stack.registers().pc);
        self.stack.set_pc(entry as isize);
        Ok(())
    }

    fn halt(&mut self) -> Result<()> {
        if self.stack.frames() != 0 {
            return Err(Error::invariant(Invariant::UnbalancedFrames));
        }
        if self.scopes.len() != self.balance.scopes {
            return Err(Error::invariant(Invariant::UnbalancedScopes));
        }
        if !self.cache_groups.is_empty() {
            return Err(Error::invariant(Invariant::UnbalancedCacheGroups));
        }
        if self.elements.depth() != self.balance.blocks
            || !self.elements.is_settled()
            || self.updating.len() != self.balance.updating
            || !self.lists.is_empty()
            || !self.components.is_empty()
            || !self.modifiers.is_empty()
        {
            return Err(Error::invariant(Invariant::UnbalancedBlocks));
        }
        self.stack.set_pc(-1);
        self.halted = true;
        Ok(())
    }

    fn syscall(&mut self, op: Syscall, at: usize, tree: &mut dyn OutputTree) -> Result<()> {
        match op {
            // === Stack ===
            Syscall::PrimitiveReference { kind, payload } => {
                let value = self.primitive(kind, payload)?;
                self.stack.push_ref(const_ref(value))
            }
            Syscall::Dup { register, offset } => self.stack.dup(register, offset),
            Syscall::Pop(count) => self.stack.drop_slots(count as usize),
            Syscall::PushBlock(block) => self.stack.push(Slot::Block(block)),

            // === Scopes and lookups ===
            Syscall::GetVariable(slot) => {
                let reference = self.scope()?.get(slot as usize);
                self.stack.push_ref(reference)
            }
            Syscall::SetVariable(slot) => {
                let reference = self.stack.pop_ref()?;
                self.scope_mut()?.bind(slot as usize, reference);
                Ok(())
            }
            Syscall::BindBlockParams(symbols) => {
                let slots = self.runtime.program.constants().get_array(symbols)?.to_vec();
                let references = self.stack.pop_refs(slots.len())?;
                let scope = self.scope_mut()?;
                for (slot, reference) in slots.into_iter().zip(references) {
                    scope.bind(slot as usize, reference);
                }
                Ok(())
            }
            Syscall::GetProperty(name) => {
                let name = self.string(name)?;
                let parent = self.stack.pop_ref()?;
                self.stack.push_ref(property_ref(&parent, &name)?)
            }
            Syscall::ResolveMaybeLocal(name) => {
                let name = self.string(name)?;
                let scope = self.scope()?;
                let reference = match scope.lookup(&name) {
                    Some(reference) => reference,
                    None => property_ref(&scope.self_ref(), &name)?,
                };
                self.stack.push_ref(reference)
            }
            Syscall::RootScope(table) => {
                let table = self.runtime.program.constants().get_symbol_table(table)?;
                let self_ref = self.stack.pop_ref()?;
                let mut scope = Scope::root(self_ref, table.symbols.len());
                if let Some(caller) = self.scopes.last() {
                    scope.set_caller(Rc::clone(caller));
                }
                if table.has_eval {
                    scope.bind_eval();
                }
                self.scopes.push(Rc::new(scope));
                Ok(())
            }
            Syscall::ChildScope => {
                let child = Rc::clone(self.scope()?);
                self.scopes.push(child);
                Ok(())
            }
            Syscall::PopScope => self
                .scopes
                .pop()
                .map(drop)
                .ok_or_else(|| Error::invariant(Invariant::UnbalancedScopes)),
            Syscall::PushCallerScope => {
                let caller = self
                    .scope()?
                    .caller()
                    .cloned()
                    .ok_or_else(|| Error::invariant(Invariant::UnbalancedScopes))?;
                self.scopes.push(caller);
                Ok(())
            }
            Syscall::BindEvalScope => {
                self.scope_mut()?.bind_eval();
                Ok(())
            }
            Syscall::SetEvalVariable(name) => {
                let name = self.string(name)?;
                let reference = self.stack.pop_ref()?;
                if self.scope()?.set_eval(&name, reference) {
                    Ok(())
                } else {
                    Err(Error::invariant(Invariant::UnbalancedScopes))
                }
            }

            // === Derived references ===
            Syscall::Concat(count) => {
                let parts = self.stack.pop_refs(count as usize)?;
                let reference = if parts.iter().all(|part| part.is_const()) {
                    const_ref(concat(&parts)?)
                } else {
                    compute_ref(move || concat(&parts).map(Value::from))
                };
                self.stack.push_ref(reference)
            }
            Syscall::Helper { specifier, argc } => {
                let args = Arguments::new(self.stack.pop_refs(argc as usize)?);
                let helper = self.state.capabilities.helper(
                    self.runtime.resolver,
                    self.runtime.program.constants(),
                    specifier,
                )?;
                self.stack
                    .push_ref(compute_ref(move || helper.call(&args.values()?)))
            }
            Syscall::ToBoolean => {
                let reference = self.stack.pop_ref()?;
                let boolean = if reference.is_const() {
                    const_ref(reference.value()?.is_truthy())
                } else {
                    compute_ref(move || Ok(Value::Bool(reference.value()?.is_truthy())))
                };
                self.stack.push_ref(boolean)
            }

            // === Conditionals ===
            Syscall::JumpIf(offset) => self.branch(at, offset, true),
            Syscall::JumpUnless(offset) => self.branch(at, offset, false),
            Syscall::AssertSame => {
                let reference = self.stack.peek_ref()?;
                let last = reference.value()?;
                if !reference.is_const() {
                    self.append_op(UpdatingOp::Assert {
                        kind: AssertKind::Same,
                        reference,
                        last,
                    })?;
                }
                Ok(())
            }

            // === Output ===
            Syscall::Text(text) => {
                let text = self.string(text)?;
                self.elements.append_text(tree, &text);
                Ok(())
            }
            Syscall::Comment(text) => {
                let text = self.string(text)?;
                self.elements.append_comment(tree, &text);
                Ok(())
            }
            Syscall::AppendText => {
                let reference = self.stack.pop_ref()?;
                let text = reference.value()?.to_text();
                let node = self.elements.append_text(tree, &text);
                if !reference.is_const() {
                    self.append_op(UpdatingOp::DynamicText {
                        reference,
                        node,
                        last: text,
                    })?;
                }
                Ok(())
            }
            Syscall::OpenElement(tag) => {
                let tag = self.string(tag)?;
                self.elements.open_element(tree, &tag)?;
                self.modifiers.push(Vec::new());
                Ok(())
            }
            Syscall::StaticAttr { name, value } => {
                let element = self.elements.constructing()?;
                let (name, value) = (self.string(name)?, self.string(value)?);
                tree.set_attribute(element, &name, &value);
                Ok(())
            }
            Syscall::DynamicAttr(name) => {
                let name = self.string(name)?;
                let reference = self.stack.pop_ref()?;
                let element = self.elements.constructing()?;
                let value = reference.value()?;
                apply_attribute(tree, element, &name, &value);
                if !reference.is_const() {
                    self.append_op(UpdatingOp::DynamicAttr {
                        reference,
                        element,
                        name,
                        last: value,
                    })?;
                }
                Ok(())
            }
            Syscall::FlushElement => self.elements.flush_element(tree).map(drop),
            Syscall::CloseElement => self.close_element(),
            Syscall::PushRemoteElement => self.push_remote(),
            Syscall::PopRemoteElement => self.elements.pop_remote(tree).map(drop),
            Syscall::Modifier { specifier, argc } => {
                let args = Arguments::new(self.stack.pop_refs(argc as usize)?);
                let definition = self.state.capabilities.modifier(
                    self.runtime.resolver,
                    self.runtime.program.constants(),
                    specifier,
                )?;
                self.elements.constructing()?;
                self.modifiers
                    .last_mut()
                    .ok_or_else(|| Error::invariant(Invariant::UnbalancedBlocks))?
                    .push((definition, args));
                Ok(())
            }

            // === Regions ===
            Syscall::Enter(count) => {
                let args = self.stack.capture(count as usize)?;
                let resume = self.next_pc()?;
                self.open_region(args, resume, None).map(drop)
            }
            Syscall::Exit => self.exit(tree),
            Syscall::PutIterator(key) => {
                let key_for = KeyFor::parse(&self.string(key)?);
                let list = self.stack.pop_ref()?;
                let artifacts = Rc::new(IterationArtifacts::new(list, key_for));
                let non_empty = artifacts.non_empty_ref();
                self.stack.push(Slot::Iterator(artifacts))?;
                self.stack.push_ref(non_empty)
            }
            Syscall::EnterList(offset) => self.enter_list(at, offset),
            Syscall::Iterate(offset) => self.iterate(at, offset),
            Syscall::ExitList => self.exit_list(tree),

            // === Components ===
            Syscall::BeginComponent { specifier, argc } => {
                let args = Arguments::new(self.stack.pop_refs(argc as usize)?);
                let definition = self.state.capabilities.component(
                    self.runtime.resolver,
                    self.runtime.program.constants(),
                    specifier,
                )?;
                let instance = definition.create(&args)?;
                let self_ref = instance.self_ref();
                let last_revision = value_for_tag(&instance.tag());
                let instance: SharedComponent = Rc::new(RefCell::new(instance));
                self.append_op(UpdatingOp::Component {
                    instance: Rc::clone(&instance),
                    last_revision,
                })?;
                self.components.push(instance);
                self.stack.push_ref(self_ref)?;
                self.stack.push(Slot::Block(definition.layout()))
            }
            Syscall::EndComponent => {
                let instance = self
                    .components
                    .pop()
                    .ok_or_else(|| Error::invariant(Invariant::UnbalancedBlocks))?;
                self.state.transaction.did_create(instance);
                Ok(())
            }

            // === Cache groups ===
            Syscall::BeginCacheGroup => {
                let guard = self.append_op(UpdatingOp::JumpIfNotModified {
                    tag: UpdatableTag::new(),
                    last_revision: 0,
                    target: None,
                })?;
                self.cache_groups.push(guard);
                Ok(())
            }
            Syscall::CommitCacheGroup => self.commit_cache_group(),
        }
    }

    // === Helpers ===

    fn primitive(&self, kind: PrimitiveKind, payload: u32) -> Result<Value> {
        let constants = self.runtime.program.constants();
        Ok(match kind {
            PrimitiveKind::Nil => Value::Nil,
            PrimitiveKind::Bool => Value::Bool(payload != 0),
            PrimitiveKind::Int => Value::Int(i64::from(payload as i32)),
            PrimitiveKind::String => Value::String(Arc::clone(constants.get_string(payload)?)),
            PrimitiveKind::Value => constants.get_value(payload)?.clone(),
        })
    }

    fn string(&self, handle: u32) -> Result<Arc<str>> {
        self.runtime
            .program
            .constants()
            .get_string(handle)
            .map(Arc::clone)
    }

    fn scope(&self) -> Result<&Rc<Scope>> {
        self.scopes
            .last()
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedScopes))
    }

    fn scope_mut(&mut self) -> Result<&mut Scope> {
        self.scopes
            .last_mut()
            .map(Rc::make_mut)
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedScopes))
    }

    fn parent_op(&self) -> Result<OpId> {
        self.updating
            .last()
            .copied()
            .ok_or_else(|| Error::invariant(Invariant::MissingUpdatingFrame))
    }

    fn append_op(&mut self, op: UpdatingOp) -> Result<OpId> {
        let parent = self.parent_op()?;
        self.state.ops.append_child(parent, op)
    }

    fn next_pc(&self) -> Result<ResumePoint> {
        let pc = self.stack.registers().pc as usize;
        self.runtime.program.resume_point(pc)
    }

    fn branch(&mut self, at: usize, offset: i32, when: bool) -> Result<()> {
        let reference = self.stack.pop_ref()?;
        let truthy = reference.value()?.is_truthy();
        if !reference.is_const() {
            self.append_op(UpdatingOp::Assert {
                kind: AssertKind::Truthiness,
                reference,
                last: Value::Bool(truthy),
            })?;
        }
        if truthy == when {
            self.stack.set_pc(target(at, offset)?);
        }
        Ok(())
    }

    fn close_element(&mut self) -> Result<()> {
        let element = self.elements.close_element()?;
        let pending = self
            .modifiers
            .pop()
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedBlocks))?;
        for (definition, args) in pending {
            let instance = definition.create(element, &args)?;
            let last_revision = value_for_tag(&instance.tag());
            let instance: SharedModifier = Rc::new(RefCell::new(instance));
            self.append_op(UpdatingOp::Modifier {
                instance: Rc::clone(&instance),
                last_revision,
            })?;
            self.state.transaction.install(instance);
        }
        Ok(())
    }

    fn push_remote(&mut self) -> Result<()> {
        let element = match self.stack.pop_ref()?.value()? {
            Value::Node(node) => node,
            other => return Err(Error::type_mismatch("node", other.type_name())),
        };
        let before = match self.stack.pop_ref()?.value()? {
            Value::Nil => None,
            Value::Node(node) => Some(node),
            other => return Err(Error::type_mismatch("node", other.type_name())),
        };
        let bounds = self.elements.push_remote(element, before);
        for &id in self.updating.iter().rev() {
            match self.state.ops.get_mut(id)? {
                UpdatingOp::Root { remote, .. } => {
                    remote.push(bounds);
                    return Ok(());
                }
                UpdatingOp::Try(op) => {
                    op.remote.push(bounds);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(Error::invariant(Invariant::MissingUpdatingFrame))
    }

    fn open_region(
        &mut self,
        args: Vec<Slot>,
        resume: ResumePoint,
        key: Option<ItemKey>,
    ) -> Result<OpId> {
        let scope = Rc::clone(self.scope()?);
        let bounds = self.elements.push_simple_block();
        let id = self.append_op(UpdatingOp::Try(TryOp {
            resume,
            scope,
            args,
            bounds,
            tag: UpdatableTag::new(),
            remote: Vec::new(),
            key,
            stale: false,
        }))?;
        self.updating.push(id);
        Ok(id)
    }

    fn exit(&mut self, tree: &mut dyn OutputTree) -> Result<()> {
        let id = self.parent_op()?;
        let children = self.state.ops.children_tag(id)?;
        match self.state.ops.get(id)? {
            UpdatingOp::Try(op) => op.tag.update(children),
            _ => return Err(Error::invariant(Invariant::UnbalancedBlocks)),
        }
        self.updating.pop();
        self.elements.pop_block(tree).map(drop)
    }

    /// Opens the region for one item of the innermost list.
    ///
    /// The item's value and memo must be the top two slots, and `pc` must
    /// point at the item body.
    pub(crate) fn enter_item(&mut self, key: ItemKey) -> Result<OpId> {
        let list = self.parent_op()?;
        if !matches!(self.state.ops.get(list)?, UpdatingOp::List(_)) {
            return Err(Error::invariant(Invariant::MissingUpdatingFrame));
        }
        let args = self.stack.capture(2)?;
        let resume = self.next_pc()?;
        let id = self.open_region(args, resume, Some(key.clone()))?;
        if let UpdatingOp::List(op) = self.state.ops.get_mut(list)? {
            op.items.insert(key, id);
        }
        Ok(id)
    }

    fn enter_list(&mut self, at: usize, offset: i32) -> Result<()> {
        let artifacts = self.stack.peek_iterator()?;
        let body_addr = usize::try_from(target(at, offset)?)
            .map_err(|_| Error::invariant(Invariant::InvalidAddress(at)))?;
        let body = self.runtime.program.resume_point(body_addr)?;
        let scope = Rc::clone(self.scope()?);
        let bounds = self.elements.push_list_block();
        let items = artifacts.items();
        let id = self.append_op(UpdatingOp::List(ListOp {
            last_iterated: value_for_tag(&artifacts.refresh_tag()),
            keys: items.iter().map(|item| item.key.clone()).collect(),
            artifacts,
            scope,
            body,
            bounds,
            items: HashMap::new(),
            tag: UpdatableTag::new(),
        }))?;
        self.updating.push(id);
        self.lists.push(ListCursor {
            op: id,
            items,
            next: 0,
        });
        Ok(())
    }

    fn iterate(&mut self, at: usize, offset: i32) -> Result<()> {
        let cursor = self
            .lists
            .last_mut()
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedBlocks))?;
        let Some(item) = cursor.items.get(cursor.next).cloned() else {
            self.stack.set_pc(target(at, offset)?);
            return Ok(());
        };
        cursor.next += 1;
        self.stack.push_ref(item.value.to_ref())?;
        self.stack.push_ref(item.memo.to_ref())?;
        self.enter_item(item.key).map(drop)
    }

    fn exit_list(&mut self, tree: &mut dyn OutputTree) -> Result<()> {
        let cursor = self
            .lists
            .pop()
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedBlocks))?;
        if self.updating.last() != Some(&cursor.op) {
            return Err(Error::invariant(Invariant::UnbalancedBlocks));
        }
        self.updating.pop();
        self.elements.pop_block(tree)?;
        let children = self.state.ops.children_tag(cursor.op)?;
        if let UpdatingOp::List(op) = self.state.ops.get_mut(cursor.op)? {
            op.tag.update(combine([op.artifacts.refresh_tag(), children]));
        }
        Ok(())
    }

    fn commit_cache_group(&mut self) -> Result<()> {
        let guard = self
            .cache_groups
            .pop()
            .ok_or_else(|| Error::invariant(Invariant::UnbalancedCacheGroups))?;
        if self.state.ops.parent(guard)? != Some(self.parent_op()?) {
            return Err(Error::invariant(Invariant::UnbalancedCacheGroups));
        }
        let tags = self
            .state
            .ops
            .following(guard)?
            .into_iter()
            .map(|id| self.state.ops.get(id).map(UpdatingOp::tag))
            .collect::<Result<Vec<_>>>()?;
        let did_modify = self.append_op(UpdatingOp::DidModify { guard })?;
        if let UpdatingOp::JumpIfNotModified {
            tag,
            last_revision,
            target,
        } = self.state.ops.get_mut(guard)?
        {
            tag.update(combine(tags));
            *last_revision = value_for_tag(&tag.tag());
            *target = Some(did_modify);
        }
        Ok(())
    }
}

/// Resolves a jump operand against the address of the jumping instruction.
fn target(at: usize, offset: i32) -> Result<isize> {
    let target = at as isize + offset as isize;
    if target < 0 {
        return Err(Error::invariant(Invariant::InvalidAddress(at)));
    }
    Ok(target)
}

fn concat(parts: &[ValueRef]) -> Result<String> {
    let mut text = String::new();
    for part in parts {
        text.push_str(&part.value()?.to_text());
    }
    Ok(text)
}

/// Writes an attribute value. `nil` and `false` remove the attribute and
/// `true` sets it empty.
pub(crate) fn apply_attribute(
    tree: &mut dyn OutputTree,
    element: NodeId,
    name: &str,
    value: &Value,
) {
    match value {
        Value::Nil | Value::Bool(false) => tree.remove_attribute(element, name),
        Value::Bool(true) => tree.set_attribute(element, name, ""),
        other => tree.set_attribute(element, name, &other.to_text()),
    }
}
