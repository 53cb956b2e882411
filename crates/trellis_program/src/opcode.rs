//! Instruction set for the Trellis VM.
//!
//! Every instruction is [`OPCODE_SIZE`] words: `[type, op1, op2, op3]`.
//! Whether an instruction is a machine op (registers only) or a syscall
//! (stack, scope, and output tree) is a property of its variant, so the two
//! interpreters can never disagree about which handler owns it.
//!
//! Jump targets are offsets relative to the address of the jumping
//! instruction itself. Call targets are heap handles.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::fmt;

use trellis_foundation::{Error, Invariant, Result};

use crate::constants::ConstantPool;
use crate::heap::Handle;

/// Number of words in one instruction.
pub const OPCODE_SIZE: usize = 4;

/// A register an instruction can address relative to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Register {
    /// The stack pointer (index of the top slot).
    Sp,
    /// The frame pointer.
    Fp,
}

/// The kind of constant a `PrimitiveReference` pushes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// `nil`; the payload is ignored.
    Nil,
    /// A boolean; the payload is 0 or 1.
    Bool,
    /// An `i32` stored as its bit pattern.
    Int,
    /// A string constant handle.
    String,
    /// An opaque value constant handle.
    Value,
}

/// Register-only instructions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MachineOp {
    /// Push `ra` and `fp`, then point `fp` at the saved `ra`: `[] -> [ra, fp]`
    PushFrame,
    /// Drop the frame and restore `ra` and `fp` from it.
    PopFrame,
    /// Pop a block handle and call it: `[block] -> []`
    InvokeVirtual,
    /// Call a block by handle.
    InvokeStatic(Handle),
    /// Jump to a relative target.
    Jump(i32),
    /// Jump to `ra`. Halts when `ra` is -1.
    Return,
    /// Set `ra` to a relative target.
    ReturnTo(i32),
}

/// Domain instructions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Syscall {
    // === References ===
    /// Push a constant reference: `[] -> [ref]`
    PrimitiveReference {
        /// What the payload encodes.
        kind: PrimitiveKind,
        /// The encoded constant.
        payload: u32,
    },
    /// Copy the slot at `register - offset`: `[] -> [slot]`
    Dup {
        /// The base register.
        register: Register,
        /// Distance below the register.
        offset: u32,
    },
    /// Drop slots: `[a.., n] -> []`
    Pop(u32),
    /// Push a block handle: `[] -> [block]`
    PushBlock(Handle),
    /// Push the reference bound to a symbol slot: `[] -> [ref]`
    GetVariable(u32),
    /// Bind a symbol slot: `[ref] -> []`
    SetVariable(u32),
    /// Bind the symbols of an array constant, last symbol from the top.
    BindBlockParams(u32),
    /// Replace a reference with a reference to one of its properties.
    GetProperty(u32),
    /// Push a late-bound name, falling back to a property of self.
    ResolveMaybeLocal(u32),
    /// Pop self and push a fresh scope shaped by a symbol table.
    RootScope(u32),
    /// Push a copy of the current scope.
    ChildScope,
    /// Pop the current scope.
    PopScope,
    /// Push the caller of the current scope.
    PushCallerScope,
    /// Give the current scope a late-bound lookup table.
    BindEvalScope,
    /// Bind a late-bound name: `[ref] -> []`
    SetEvalVariable(u32),
    /// Concatenate the text of `n` references: `[a.., n] -> [text]`
    Concat(u32),
    /// Call a helper on `argc` arguments: `[args..] -> [result]`
    Helper {
        /// String handle of the helper's specifier.
        specifier: u32,
        /// Number of positional arguments.
        argc: u32,
    },
    /// Replace a reference with its truthiness.
    ToBoolean,

    // === Conditionals ===
    /// Pop a reference and jump if it is truthy.
    JumpIf(i32),
    /// Pop a reference and jump if it is falsy.
    JumpUnless(i32),
    /// Assert that the top reference keeps its current value.
    AssertSame,

    // === Output ===
    /// Append static text.
    Text(u32),
    /// Append a static comment.
    Comment(u32),
    /// Pop a reference and append its text: `[ref] -> []`
    AppendText,
    /// Start constructing an element.
    OpenElement(u32),
    /// Set a static attribute on the constructing element.
    StaticAttr {
        /// String handle of the attribute name.
        name: u32,
        /// String handle of the attribute value.
        value: u32,
    },
    /// Pop a reference and set it as an attribute: `[ref] -> []`
    DynamicAttr(u32),
    /// Insert the constructing element and descend into it.
    FlushElement,
    /// Leave the current element.
    CloseElement,
    /// Render into another element: `[insert_before, element] -> []`
    PushRemoteElement,
    /// Return from a remote element.
    PopRemoteElement,
    /// Attach a modifier to the constructing element: `[args..] -> []`
    Modifier {
        /// String handle of the modifier's specifier.
        specifier: u32,
        /// Number of positional arguments.
        argc: u32,
    },

    // === Regions ===
    /// Open a replayable region capturing the top `n` slots.
    Enter(u32),
    /// Close the innermost region.
    Exit,
    /// Replace a list reference with an iterator and a non-empty flag:
    /// `[list] -> [iterator, non_empty]`
    PutIterator(u32),
    /// Open a keyed list whose items render from a relative body target.
    EnterList(i32),
    /// Push the next item and its memo, or jump to a relative break target.
    Iterate(i32),
    /// Close the innermost keyed list.
    ExitList,
    /// Create a component: `[args..] -> [self, layout]`
    BeginComponent {
        /// String handle of the component's specifier.
        specifier: u32,
        /// Number of positional arguments.
        argc: u32,
    },
    /// Finish the innermost component.
    EndComponent,
    /// Start a run of updating opcodes guarded by one combined tag.
    BeginCacheGroup,
    /// Close the innermost cache group.
    CommitCacheGroup,
}

/// A decoded instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// Register-only instruction.
    Machine(MachineOp),
    /// Domain instruction.
    Syscall(Syscall),
}

/// The static effect of an instruction on the stack pointer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StackDelta {
    /// `sp` moves by exactly this much.
    Fixed(i32),
    /// `sp` becomes `fp - 1`.
    Frame,
    /// Depends on runtime state.
    Dynamic,
}

mod code {
    pub const PUSH_FRAME: u32 = 0;
    pub const POP_FRAME: u32 = 1;
    pub const INVOKE_VIRTUAL: u32 = 2;
    pub const INVOKE_STATIC: u32 = 3;
    pub const JUMP: u32 = 4;
    pub const RETURN: u32 = 5;
    pub const RETURN_TO: u32 = 6;

    pub const PRIMITIVE_REFERENCE: u32 = 16;
    pub const DUP: u32 = 17;
    pub const POP: u32 = 18;
    pub const PUSH_BLOCK: u32 = 19;
    pub const GET_VARIABLE: u32 = 20;
    pub const SET_VARIABLE: u32 = 21;
    pub const BIND_BLOCK_PARAMS: u32 = 22;
    pub const GET_PROPERTY: u32 = 23;
    pub const RESOLVE_MAYBE_LOCAL: u32 = 24;
    pub const ROOT_SCOPE: u32 = 25;
    pub const CHILD_SCOPE: u32 = 26;
    pub const POP_SCOPE: u32 = 27;
    pub const PUSH_CALLER_SCOPE: u32 = 28;
    pub const BIND_EVAL_SCOPE: u32 = 29;
    pub const SET_EVAL_VARIABLE: u32 = 30;
    pub const CONCAT: u32 = 31;
    pub const HELPER: u32 = 32;
    pub const TO_BOOLEAN: u32 = 33;
    pub const JUMP_IF: u32 = 34;
    pub const JUMP_UNLESS: u32 = 35;
    pub const ASSERT_SAME: u32 = 36;
    pub const TEXT: u32 = 37;
    pub const COMMENT: u32 = 38;
    pub const APPEND_TEXT: u32 = 39;
    pub const OPEN_ELEMENT: u32 = 40;
    pub const STATIC_ATTR: u32 = 41;
    pub const DYNAMIC_ATTR: u32 = 42;
    pub const FLUSH_ELEMENT: u32 = 43;
    pub const CLOSE_ELEMENT: u32 = 44;
    pub const PUSH_REMOTE_ELEMENT: u32 = 45;
    pub const POP_REMOTE_ELEMENT: u32 = 46;
    pub const MODIFIER: u32 = 47;
    pub const ENTER: u32 = 48;
    pub const EXIT: u32 = 49;
    pub const PUT_ITERATOR: u32 = 50;
    pub const ENTER_LIST: u32 = 51;
    pub const ITERATE: u32 = 52;
    pub const EXIT_LIST: u32 = 53;
    pub const BEGIN_COMPONENT: u32 = 54;
    pub const END_COMPONENT: u32 = 55;
    pub const BEGIN_CACHE_GROUP: u32 = 56;
    pub const COMMIT_CACHE_GROUP: u32 = 57;
}

impl Op {
    /// Encodes the instruction as `[type, op1, op2, op3]`.
    #[must_use]
    pub fn encode(&self) -> [u32; OPCODE_SIZE] {
        match *self {
            Self::Machine(op) => match op {
                MachineOp::PushFrame => [code::PUSH_FRAME, 0, 0, 0],
                MachineOp::PopFrame => [code::POP_FRAME, 0, 0, 0],
                MachineOp::InvokeVirtual => [code::INVOKE_VIRTUAL, 0, 0, 0],
                MachineOp::InvokeStatic(handle) => [code::INVOKE_STATIC, handle.raw(), 0, 0],
                MachineOp::Jump(rel) => [code::JUMP, rel as u32, 0, 0],
                MachineOp::Return => [code::RETURN, 0, 0, 0],
                MachineOp::ReturnTo(rel) => [code::RETURN_TO, rel as u32, 0, 0],
            },
            Self::Syscall(op) => encode_syscall(op),
        }
    }

    /// Decodes an instruction.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidOpcode`] for unknown type words or operands.
    pub fn decode(words: [u32; OPCODE_SIZE]) -> Result<Self> {
        let [ty, op1, op2, _] = words;
        let invalid = || Error::invariant(Invariant::InvalidOpcode(ty));
        let machine = |op| Ok(Self::Machine(op));
        let sys = |op| Ok(Self::Syscall(op));

        match ty {
            code::PUSH_FRAME => machine(MachineOp::PushFrame),
            code::POP_FRAME => machine(MachineOp::PopFrame),
            code::INVOKE_VIRTUAL => machine(MachineOp::InvokeVirtual),
            code::INVOKE_STATIC => machine(MachineOp::InvokeStatic(Handle(op1))),
            code::JUMP => machine(MachineOp::Jump(op1 as i32)),
            code::RETURN => machine(MachineOp::Return),
            code::RETURN_TO => machine(MachineOp::ReturnTo(op1 as i32)),

            code::PRIMITIVE_REFERENCE => {
                let kind = match op1 {
                    0 => PrimitiveKind::Nil,
                    1 => PrimitiveKind::Bool,
                    2 => PrimitiveKind::Int,
                    3 => PrimitiveKind::String,
                    4 => PrimitiveKind::Value,
                    _ => return Err(invalid()),
                };
                sys(Syscall::PrimitiveReference { kind, payload: op2 })
            }
            code::DUP => {
                let register = match op1 {
                    0 => Register::Sp,
                    1 => Register::Fp,
                    _ => return Err(invalid()),
                };
                sys(Syscall::Dup {
                    register,
                    offset: op2,
                })
            }
            code::POP => sys(Syscall::Pop(op1)),
            code::PUSH_BLOCK => sys(Syscall::PushBlock(Handle(op1))),
            code::GET_VARIABLE => sys(Syscall::GetVariable(op1)),
            code::SET_VARIABLE => sys(Syscall::SetVariable(op1)),
            code::BIND_BLOCK_PARAMS => sys(Syscall::BindBlockParams(op1)),
            code::GET_PROPERTY => sys(Syscall::GetProperty(op1)),
            code::RESOLVE_MAYBE_LOCAL => sys(Syscall::ResolveMaybeLocal(op1)),
            code::ROOT_SCOPE => sys(Syscall::RootScope(op1)),
            code::CHILD_SCOPE => sys(Syscall::ChildScope),
            code::POP_SCOPE => sys(Syscall::PopScope),
            code::PUSH_CALLER_SCOPE => sys(Syscall::PushCallerScope),
            code::BIND_EVAL_SCOPE => sys(Syscall::BindEvalScope),
            code::SET_EVAL_VARIABLE => sys(Syscall::SetEvalVariable(op1)),
            code::CONCAT => sys(Syscall::Concat(op1)),
            code::HELPER => sys(Syscall::Helper {
                specifier: op1,
                argc: op2,
            }),
            code::TO_BOOLEAN => sys(Syscall::ToBoolean),
            code::JUMP_IF => sys(Syscall::JumpIf(op1 as i32)),
            code::JUMP_UNLESS => sys(Syscall::JumpUnless(op1 as i32)),
            code::ASSERT_SAME => sys(Syscall::AssertSame),
            code::TEXT => sys(Syscall::Text(op1)),
            code::COMMENT => sys(Syscall::Comment(op1)),
            code::APPEND_TEXT => sys(Syscall::AppendText),
            code::OPEN_ELEMENT => sys(Syscall::OpenElement(op1)),
            code::STATIC_ATTR => sys(Syscall::StaticAttr {
                name: op1,
                value: op2,
            }),
            code::DYNAMIC_ATTR => sys(Syscall::DynamicAttr(op1)),
            code::FLUSH_ELEMENT => sys(Syscall::FlushElement),
            code::CLOSE_ELEMENT => sys(Syscall::CloseElement),
            code::PUSH_REMOTE_ELEMENT => sys(Syscall::PushRemoteElement),
            code::POP_REMOTE_ELEMENT => sys(Syscall::PopRemoteElement),
            code::MODIFIER => sys(Syscall::Modifier {
                specifier: op1,
                argc: op2,
            }),
            code::ENTER => sys(Syscall::Enter(op1)),
            code::EXIT => sys(Syscall::Exit),
            code::PUT_ITERATOR => sys(Syscall::PutIterator(op1)),
            code::ENTER_LIST => sys(Syscall::EnterList(op1 as i32)),
            code::ITERATE => sys(Syscall::Iterate(op1 as i32)),
            code::EXIT_LIST => sys(Syscall::ExitList),
            code::BEGIN_COMPONENT => sys(Syscall::BeginComponent {
                specifier: op1,
                argc: op2,
            }),
            code::END_COMPONENT => sys(Syscall::EndComponent),
            code::BEGIN_CACHE_GROUP => sys(Syscall::BeginCacheGroup),
            code::COMMIT_CACHE_GROUP => sys(Syscall::CommitCacheGroup),
            _ => Err(invalid()),
        }
    }

    /// Returns true if this instruction's first operand is a relative target.
    #[must_use]
    pub fn has_relative_target(&self) -> bool {
        matches!(
            self,
            Self::Machine(MachineOp::Jump(_) | MachineOp::ReturnTo(_))
                | Self::Syscall(
                    Syscall::JumpIf(_)
                        | Syscall::JumpUnless(_)
                        | Syscall::EnterList(_)
                        | Syscall::Iterate(_)
                )
        )
    }

    /// Returns a copy with its relative target replaced.
    ///
    /// Instructions without a relative target are returned unchanged.
    #[must_use]
    pub fn with_target(self, rel: i32) -> Self {
        match self {
            Self::Machine(MachineOp::Jump(_)) => Self::Machine(MachineOp::Jump(rel)),
            Self::Machine(MachineOp::ReturnTo(_)) => Self::Machine(MachineOp::ReturnTo(rel)),
            Self::Syscall(Syscall::JumpIf(_)) => Self::Syscall(Syscall::JumpIf(rel)),
            Self::Syscall(Syscall::JumpUnless(_)) => Self::Syscall(Syscall::JumpUnless(rel)),
            Self::Syscall(Syscall::EnterList(_)) => Self::Syscall(Syscall::EnterList(rel)),
            Self::Syscall(Syscall::Iterate(_)) => Self::Syscall(Syscall::Iterate(rel)),
            other => other,
        }
    }

    /// Returns the instruction's effect on `sp`.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidConstant`] if the operand of
    /// `BindBlockParams` does not name an array.
    pub fn stack_delta(&self, constants: &ConstantPool) -> Result<StackDelta> {
        let fixed = |n: i64| Ok(StackDelta::Fixed(i32::try_from(n).unwrap_or(i32::MIN)));
        match *self {
            Self::Machine(op) => match op {
                MachineOp::PushFrame => fixed(2),
                MachineOp::PopFrame => Ok(StackDelta::Frame),
                MachineOp::InvokeVirtual => fixed(-1),
                MachineOp::InvokeStatic(_)
                | MachineOp::Jump(_)
                | MachineOp::Return
                | MachineOp::ReturnTo(_) => fixed(0),
            },
            Self::Syscall(op) => match op {
                Syscall::PrimitiveReference { .. }
                | Syscall::Dup { .. }
                | Syscall::PushBlock(_)
                | Syscall::GetVariable(_)
                | Syscall::ResolveMaybeLocal(_)
                | Syscall::PutIterator(_) => fixed(1),
                Syscall::Pop(n) => fixed(-i64::from(n)),
                Syscall::SetVariable(_)
                | Syscall::RootScope(_)
                | Syscall::SetEvalVariable(_)
                | Syscall::JumpIf(_)
                | Syscall::JumpUnless(_)
                | Syscall::AppendText
                | Syscall::DynamicAttr(_) => fixed(-1),
                Syscall::BindBlockParams(array) => {
                    let len = constants.get_array(array)?.len();
                    fixed(-i64::try_from(len).unwrap_or(i64::MAX))
                }
                Syscall::Concat(n) => fixed(1 - i64::from(n)),
                Syscall::Helper { argc, .. } => fixed(1 - i64::from(argc)),
                Syscall::Modifier { argc, .. } => fixed(-i64::from(argc)),
                Syscall::BeginComponent { argc, .. } => fixed(2 - i64::from(argc)),
                Syscall::PushRemoteElement => fixed(-2),
                Syscall::Iterate(_) => Ok(StackDelta::Dynamic),
                Syscall::GetProperty(_)
                | Syscall::ChildScope
                | Syscall::PopScope
                | Syscall::PushCallerScope
                | Syscall::BindEvalScope
                | Syscall::ToBoolean
                | Syscall::AssertSame
                | Syscall::Text(_)
                | Syscall::Comment(_)
                | Syscall::OpenElement(_)
                | Syscall::StaticAttr { .. }
                | Syscall::FlushElement
                | Syscall::CloseElement
                | Syscall::PopRemoteElement
                | Syscall::Enter(_)
                | Syscall::Exit
                | Syscall::EnterList(_)
                | Syscall::ExitList
                | Syscall::EndComponent
                | Syscall::BeginCacheGroup
                | Syscall::CommitCacheGroup => fixed(0),
            },
        }
    }
}

impl From<MachineOp> for Op {
    fn from(op: MachineOp) -> Self {
        Self::Machine(op)
    }
}

impl From<Syscall> for Op {
    fn from(op: Syscall) -> Self {
        Self::Syscall(op)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine(op) => write!(f, "{op:?}"),
            Self::Syscall(op) => write!(f, "{op:?}"),
        }
    }
}

fn encode_syscall(op: Syscall) -> [u32; OPCODE_SIZE] {
    match op {
        Syscall::PrimitiveReference { kind, payload } => {
            let kind = match kind {
                PrimitiveKind::Nil => 0,
                PrimitiveKind::Bool => 1,
                PrimitiveKind::Int => 2,
                PrimitiveKind::String => 3,
                PrimitiveKind::Value => 4,
            };
            [code::PRIMITIVE_REFERENCE, kind, payload, 0]
        }
        Syscall::Dup { register, offset } => {
            let register = match register {
                Register::Sp => 0,
                Register::Fp => 1,
            };
            [code::DUP, register, offset, 0]
        }
        Syscall::Pop(n) => [code::POP, n, 0, 0],
        Syscall::PushBlock(handle) => [code::PUSH_BLOCK, handle.raw(), 0, 0],
        Syscall::GetVariable(symbol) => [code::GET_VARIABLE, symbol, 0, 0],
        Syscall::SetVariable(symbol) => [code::SET_VARIABLE, symbol, 0, 0],
        Syscall::BindBlockParams(array) => [code::BIND_BLOCK_PARAMS, array, 0, 0],
        Syscall::GetProperty(name) => [code::GET_PROPERTY, name, 0, 0],
        Syscall::ResolveMaybeLocal(name) => [code::RESOLVE_MAYBE_LOCAL, name, 0, 0],
        Syscall::RootScope(table) => [code::ROOT_SCOPE, table, 0, 0],
        Syscall::ChildScope => [code::CHILD_SCOPE, 0, 0, 0],
        Syscall::PopScope => [code::POP_SCOPE, 0, 0, 0],
        Syscall::PushCallerScope => [code::PUSH_CALLER_SCOPE, 0, 0, 0],
        Syscall::BindEvalScope => [code::BIND_EVAL_SCOPE, 0, 0, 0],
        Syscall::SetEvalVariable(name) => [code::SET_EVAL_VARIABLE, name, 0, 0],
        Syscall::Concat(n) => [code::CONCAT, n, 0, 0],
        Syscall::Helper { specifier, argc } => [code::HELPER, specifier, argc, 0],
        Syscall::ToBoolean => [code::TO_BOOLEAN, 0, 0, 0],
        Syscall::JumpIf(rel) => [code::JUMP_IF, rel as u32, 0, 0],
        Syscall::JumpUnless(rel) => [code::JUMP_UNLESS, rel as u32, 0, 0],
        Syscall::AssertSame => [code::ASSERT_SAME, 0, 0, 0],
        Syscall::Text(text) => [code::TEXT, text, 0, 0],
        Syscall::Comment(text) => [code::COMMENT, text, 0, 0],
        Syscall::AppendText => [code::APPEND_TEXT, 0, 0, 0],
        Syscall::OpenElement(tag) => [code::OPEN_ELEMENT, tag, 0, 0],
        Syscall::StaticAttr { name, value } => [code::STATIC_ATTR, name, value, 0],
        Syscall::DynamicAttr(name) => [code::DYNAMIC_ATTR, name, 0, 0],
        Syscall::FlushElement => [code::FLUSH_ELEMENT, 0, 0, 0],
        Syscall::CloseElement => [code::CLOSE_ELEMENT, 0, 0, 0],
        Syscall::PushRemoteElement => [code::PUSH_REMOTE_ELEMENT, 0, 0, 0],
        Syscall::PopRemoteElement => [code::POP_REMOTE_ELEMENT, 0, 0, 0],
        Syscall::Modifier { specifier, argc } => [code::MODIFIER, specifier, argc, 0],
        Syscall::Enter(args) => [code::ENTER, args, 0, 0],
        Syscall::Exit => [code::EXIT, 0, 0, 0],
        Syscall::PutIterator(key) => [code::PUT_ITERATOR, key, 0, 0],
        Syscall::EnterList(rel) => [code::ENTER_LIST, rel as u32, 0, 0],
        Syscall::Iterate(rel) => [code::ITERATE, rel as u32, 0, 0],
        Syscall::ExitList => [code::EXIT_LIST, 0, 0, 0],
        Syscall::BeginComponent { specifier, argc } => {
            [code::BEGIN_COMPONENT, specifier, argc, 0]
        }
        Syscall::EndComponent => [code::END_COMPONENT, 0, 0, 0],
        Syscall::BeginCacheGroup => [code::BEGIN_CACHE_GROUP, 0, 0, 0],
        Syscall::CommitCacheGroup => [code::COMMIT_CACHE_GROUP, 0, 0, 0],
    }
}
