//! Hand assembly of programs.
//!
//! [`Assembler`] owns the heap and constant pool while a program is being
//! built. Each [`BlockBuilder`] collects the instructions of one heap
//! allocation, resolves its labels into relative targets, and writes it out
//! on [`BlockBuilder::commit`].
//!
//! The higher-level emitters (`replayable`, `replayable_if`, `each`,
//! `invoke_component`, `cache_group`, `in_element`) produce the fixed region
//! shapes the VM expects. Everything inside a region is free-form.

#![allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]

use trellis_foundation::{Error, Invariant, Result, Value};

use crate::constants::{ConstantPool, SymbolTable};
use crate::heap::{Handle, Heap};
use crate::opcode::{MachineOp, OPCODE_SIZE, Op, PrimitiveKind, Register, Syscall};
use crate::program::Program;

/// A jump target inside one block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Label(u32);

/// Builds a [`Program`] one block at a time.
#[derive(Debug, Default)]
pub struct Assembler {
    heap: Heap,
    constants: ConstantPool,
}

impl Assembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new block.
    pub fn block(&mut self) -> BlockBuilder<'_> {
        BlockBuilder {
            asm: self,
            ops: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Assembles a layout: a block that pops self into a fresh root scope,
    /// runs `body`, and returns.
    ///
    /// # Errors
    /// Returns an error if `body` leaves a label unbound.
    pub fn layout(
        &mut self,
        table: SymbolTable,
        body: impl FnOnce(&mut BlockBuilder<'_>),
    ) -> Result<Handle> {
        let table = self.constants.symbol_table(table);
        let mut block = self.block();
        block.root_scope(table);
        body(&mut block);
        block.pop_scope();
        block.ret();
        block.commit()
    }

    /// Returns the constant pool.
    pub fn constants_mut(&mut self) -> &mut ConstantPool {
        &mut self.constants
    }

    /// Finishes assembly.
    #[must_use]
    pub fn finish(self) -> Program {
        Program::new(self.heap, self.constants)
    }
}

/// Collects the instructions of one block.
#[derive(Debug)]
pub struct BlockBuilder<'a> {
    asm: &'a mut Assembler,
    ops: Vec<Op>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl BlockBuilder<'_> {
    // =========================================================================
    // Emission
    // =========================================================================

    /// Appends an instruction and returns its index in the block.
    pub fn emit(&mut self, op: impl Into<Op>) -> usize {
        let index = self.ops.len();
        self.ops.push(op.into());
        index
    }

    /// Returns the number of instructions emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Creates an unbound label.
    pub fn label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Binds a label to the next instruction.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0 as usize] = Some(self.ops.len());
    }

    fn emit_to(&mut self, op: impl Into<Op>, label: Label) {
        let index = self.emit(op);
        self.fixups.push((index, label));
    }

    /// Interns a string constant.
    pub fn string(&mut self, value: &str) -> u32 {
        self.asm.constants.string(value)
    }

    /// Resolves labels and writes the block to the heap.
    ///
    /// # Errors
    /// Returns [`Invariant::UnboundLabel`] if a referenced label was never bound.
    pub fn commit(self) -> Result<Handle> {
        let Self {
            asm,
            mut ops,
            labels,
            fixups,
        } = self;

        for (index, label) in fixups {
            let target = labels[label.0 as usize]
                .ok_or_else(|| Error::invariant(Invariant::UnboundLabel(label.0)))?;
            let rel = (target as i64 - index as i64) * OPCODE_SIZE as i64;
            ops[index] = ops[index].with_target(rel as i32);
        }

        let handle = asm.heap.malloc()?;
        for op in &ops {
            for word in op.encode() {
                asm.heap.push(word)?;
            }
        }
        asm.heap.finish_malloc(handle)?;
        Ok(handle)
    }

    // =========================================================================
    // Machine Operations
    // =========================================================================

    /// `PushFrame`
    pub fn push_frame(&mut self) -> &mut Self {
        self.emit(MachineOp::PushFrame);
        self
    }

    /// `PopFrame`
    pub fn pop_frame(&mut self) -> &mut Self {
        self.emit(MachineOp::PopFrame);
        self
    }

    /// `InvokeStatic`
    pub fn invoke_static(&mut self, block: Handle) -> &mut Self {
        self.emit(MachineOp::InvokeStatic(block));
        self
    }

    /// `InvokeVirtual`
    pub fn invoke_virtual(&mut self) -> &mut Self {
        self.emit(MachineOp::InvokeVirtual);
        self
    }

    /// `Jump` to a label.
    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.emit_to(MachineOp::Jump(0), label);
        self
    }

    /// `Return`
    pub fn ret(&mut self) -> &mut Self {
        self.emit(MachineOp::Return);
        self
    }

    /// `ReturnTo` a label.
    pub fn return_to(&mut self, label: Label) -> &mut Self {
        self.emit_to(MachineOp::ReturnTo(0), label);
        self
    }

    // =========================================================================
    // References and Scopes
    // =========================================================================

    /// Pushes a constant `nil`.
    pub fn nil(&mut self) -> &mut Self {
        self.primitive(PrimitiveKind::Nil, 0)
    }

    /// Pushes a constant boolean.
    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.primitive(PrimitiveKind::Bool, u32::from(value))
    }

    /// Pushes a constant integer.
    pub fn int(&mut self, value: i32) -> &mut Self {
        self.primitive(PrimitiveKind::Int, value as u32)
    }

    /// Pushes a constant string.
    pub fn str(&mut self, value: &str) -> &mut Self {
        let handle = self.string(value);
        self.primitive(PrimitiveKind::String, handle)
    }

    /// Pushes an arbitrary constant value.
    pub fn value(&mut self, value: Value) -> &mut Self {
        let handle = self.asm.constants.value(value);
        self.primitive(PrimitiveKind::Value, handle)
    }

    fn primitive(&mut self, kind: PrimitiveKind, payload: u32) -> &mut Self {
        self.emit(Syscall::PrimitiveReference { kind, payload });
        self
    }

    /// `Dup`
    pub fn dup(&mut self, register: Register, offset: u32) -> &mut Self {
        self.emit(Syscall::Dup { register, offset });
        self
    }

    /// `Pop`
    pub fn pop(&mut self, count: u32) -> &mut Self {
        self.emit(Syscall::Pop(count));
        self
    }

    /// `PushBlock`
    pub fn push_block(&mut self, block: Handle) -> &mut Self {
        self.emit(Syscall::PushBlock(block));
        self
    }

    /// `GetVariable`
    pub fn get_variable(&mut self, slot: u32) -> &mut Self {
        self.emit(Syscall::GetVariable(slot));
        self
    }

    /// `SetVariable`
    pub fn set_variable(&mut self, slot: u32) -> &mut Self {
        self.emit(Syscall::SetVariable(slot));
        self
    }

    /// Pushes self (slot 0).
    pub fn self_ref(&mut self) -> &mut Self {
        self.get_variable(0)
    }

    /// `BindBlockParams`
    pub fn bind_block_params(&mut self, slots: &[u32]) -> &mut Self {
        let array = self.asm.constants.array(slots.to_vec());
        self.emit(Syscall::BindBlockParams(array));
        self
    }

    /// `GetProperty`
    pub fn get_property(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Syscall::GetProperty(name));
        self
    }

    /// Pushes a path of properties below a symbol slot.
    pub fn get_path(&mut self, slot: u32, path: &[&str]) -> &mut Self {
        self.get_variable(slot);
        for name in path {
            self.get_property(name);
        }
        self
    }

    /// `ResolveMaybeLocal`
    pub fn resolve_maybe_local(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Syscall::ResolveMaybeLocal(name));
        self
    }

    /// `RootScope` with a previously stored symbol table.
    pub fn root_scope(&mut self, table: u32) -> &mut Self {
        self.emit(Syscall::RootScope(table));
        self
    }

    /// `ChildScope`
    pub fn child_scope(&mut self) -> &mut Self {
        self.emit(Syscall::ChildScope);
        self
    }

    /// `PopScope`
    pub fn pop_scope(&mut self) -> &mut Self {
        self.emit(Syscall::PopScope);
        self
    }

    /// `PushCallerScope`
    pub fn push_caller_scope(&mut self) -> &mut Self {
        self.emit(Syscall::PushCallerScope);
        self
    }

    /// `BindEvalScope`
    pub fn bind_eval_scope(&mut self) -> &mut Self {
        self.emit(Syscall::BindEvalScope);
        self
    }

    /// `SetEvalVariable`
    pub fn set_eval_variable(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Syscall::SetEvalVariable(name));
        self
    }

    /// `Concat`
    pub fn concat(&mut self, count: u32) -> &mut Self {
        self.emit(Syscall::Concat(count));
        self
    }

    /// `Helper`
    pub fn helper(&mut self, name: &str, argc: u32) -> &mut Self {
        let specifier = self.string(name);
        self.emit(Syscall::Helper { specifier, argc });
        self
    }

    /// `ToBoolean`
    pub fn to_boolean(&mut self) -> &mut Self {
        self.emit(Syscall::ToBoolean);
        self
    }

    /// `JumpIf` to a label.
    pub fn jump_if(&mut self, label: Label) -> &mut Self {
        self.emit_to(Syscall::JumpIf(0), label);
        self
    }

    /// `JumpUnless` to a label.
    pub fn jump_unless(&mut self, label: Label) -> &mut Self {
        self.emit_to(Syscall::JumpUnless(0), label);
        self
    }

    /// `AssertSame`
    pub fn assert_same(&mut self) -> &mut Self {
        self.emit(Syscall::AssertSame);
        self
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// `Text`
    pub fn text(&mut self, value: &str) -> &mut Self {
        let text = self.string(value);
        self.emit(Syscall::Text(text));
        self
    }

    /// `Comment`
    pub fn comment(&mut self, value: &str) -> &mut Self {
        let text = self.string(value);
        self.emit(Syscall::Comment(text));
        self
    }

    /// `AppendText`
    pub fn append_text(&mut self) -> &mut Self {
        self.emit(Syscall::AppendText);
        self
    }

    /// `OpenElement`
    pub fn open_element(&mut self, tag: &str) -> &mut Self {
        let tag = self.string(tag);
        self.emit(Syscall::OpenElement(tag));
        self
    }

    /// `StaticAttr`
    pub fn static_attr(&mut self, name: &str, value: &str) -> &mut Self {
        let name = self.string(name);
        let value = self.string(value);
        self.emit(Syscall::StaticAttr { name, value });
        self
    }

    /// `DynamicAttr`
    pub fn dynamic_attr(&mut self, name: &str) -> &mut Self {
        let name = self.string(name);
        self.emit(Syscall::DynamicAttr(name));
        self
    }

    /// `FlushElement`
    pub fn flush_element(&mut self) -> &mut Self {
        self.emit(Syscall::FlushElement);
        self
    }

    /// `CloseElement`
    pub fn close_element(&mut self) -> &mut Self {
        self.emit(Syscall::CloseElement);
        self
    }

    /// `Modifier`
    pub fn modifier(&mut self, name: &str, argc: u32) -> &mut Self {
        let specifier = self.string(name);
        self.emit(Syscall::Modifier { specifier, argc });
        self
    }

    /// Emits a complete element with static content.
    pub fn element(&mut self, tag: &str, content: impl FnOnce(&mut Self)) -> &mut Self {
        self.open_element(tag).flush_element();
        content(self);
        self.close_element()
    }

    // =========================================================================
    // Regions
    // =========================================================================

    /// Emits a region that can be replayed from its entry state.
    ///
    /// `args` pushes the region's arguments and returns how many it pushed.
    /// `body` receives the label of the region's exit and must fall through
    /// to it or jump to it.
    ///
    /// ```text
    ///     PushFrame
    ///     ReturnTo END
    ///     <args>
    ///     Enter(n)
    ///     <body>
    /// FINALLY:
    ///     Exit
    ///     Return
    /// END:
    ///     PopFrame
    /// ```
    pub fn replayable(
        &mut self,
        args: impl FnOnce(&mut Self) -> u32,
        body: impl FnOnce(&mut Self, Label),
    ) -> &mut Self {
        let finally = self.label();
        let end = self.label();
        self.push_frame();
        self.return_to(end);
        let count = args(self);
        self.emit(Syscall::Enter(count));
        body(self, finally);
        self.bind(finally);
        self.emit(Syscall::Exit);
        self.ret();
        self.bind(end);
        self.pop_frame()
    }

    /// Emits a conditional region that rebuilds when the condition's
    /// truthiness flips.
    pub fn replayable_if(
        &mut self,
        condition: impl FnOnce(&mut Self),
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.replayable(
            |b| {
                condition(b);
                1
            },
            |b, finally| {
                let alternate = b.label();
                b.jump_unless(alternate);
                then(b);
                b.jump(finally);
                b.bind(alternate);
                otherwise(b);
            },
        )
    }

    /// Emits a keyed loop.
    ///
    /// Each item body runs in a child scope with the item bound to
    /// `params[0]` and its index to `params[1]`. `otherwise` renders when the
    /// list is empty.
    pub fn each(
        &mut self,
        list: impl FnOnce(&mut Self),
        key: &str,
        params: [u32; 2],
        body: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) -> &mut Self {
        let key = self.string(key);
        self.replayable(
            |b| {
                list(b);
                1
            },
            |b, finally| {
                let alternate = b.label();
                let iterate = b.label();
                let item = b.label();
                let done = b.label();

                b.emit(Syscall::PutIterator(key));
                b.jump_unless(alternate);
                b.push_frame();
                b.dup(Register::Fp, 1);
                b.return_to(iterate);
                b.emit_to(Syscall::EnterList(0), item);

                b.bind(iterate);
                b.emit_to(Syscall::Iterate(0), done);

                b.bind(item);
                b.child_scope();
                b.bind_block_params(&params);
                body(b);
                b.pop_scope();
                b.emit(Syscall::Exit);
                b.ret();

                b.bind(done);
                b.emit(Syscall::ExitList);
                b.pop_frame();
                b.jump(finally);

                b.bind(alternate);
                otherwise(b);
            },
        )
    }

    /// Emits a component invocation.
    ///
    /// `args` pushes the positional arguments and returns how many it pushed.
    pub fn invoke_component(&mut self, name: &str, args: impl FnOnce(&mut Self) -> u32) -> &mut Self {
        let specifier = self.string(name);
        self.push_frame();
        let argc = args(self);
        self.emit(Syscall::BeginComponent { specifier, argc });
        self.invoke_virtual();
        self.emit(Syscall::EndComponent);
        self.pop_frame()
    }

    /// Wraps `body` in a cache group.
    pub fn cache_group(&mut self, body: impl FnOnce(&mut Self)) -> &mut Self {
        self.emit(Syscall::BeginCacheGroup);
        body(self);
        self.emit(Syscall::CommitCacheGroup);
        self
    }

    /// Renders `body` into another element.
    ///
    /// `element` pushes a reference to the target node and `insert_before`
    /// pushes a reference to the node to insert before (or `nil` to append).
    /// The region rebuilds if the target changes.
    pub fn in_element(
        &mut self,
        element: impl FnOnce(&mut Self),
        insert_before: impl FnOnce(&mut Self),
        body: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.replayable(
            |b| {
                insert_before(b);
                element(b);
                2
            },
            |b, _| {
                b.assert_same();
                b.emit(Syscall::PushRemoteElement);
                body(b);
                b.emit(Syscall::PopRemoteElement);
            },
        )
    }
}
