//! The operand stack and machine registers.
//!
//! `sp` is the index of the top slot and is always `len - 1`, so it is
//! derived rather than stored. A frame is the region starting at `fp`,
//! whose first two slots hold the caller's `ra` and `fp`.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use std::fmt;
use std::rc::Rc;

use trellis_foundation::{Error, Invariant, Result};
use trellis_program::{Handle, Register};
use trellis_reactive::{IterationArtifacts, ValueRef};

/// One operand stack slot.
#[derive(Clone)]
pub enum Slot {
    /// A reference.
    Ref(ValueRef),
    /// A saved register.
    Register(isize),
    /// A block to invoke.
    Block(Handle),
    /// The artifacts of a keyed loop.
    Iterator(Rc<IterationArtifacts>),
    /// Nothing.
    Empty,
}

impl Slot {
    fn kind(&self) -> &'static str {
        match self {
            Self::Ref(_) => "reference",
            Self::Register(_) => "register",
            Self::Block(_) => "block",
            Self::Iterator(_) => "iterator",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(value) => write!(f, "Register({value})"),
            Self::Block(handle) => write!(f, "Block({handle:?})"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// The machine registers other than `sp`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Registers {
    /// Address of the next instruction. -1 once halted.
    pub pc: isize,
    /// Return address. -1 returns to the host.
    pub ra: isize,
    /// Frame pointer. -1 outside any frame.
    pub fp: isize,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            pc: -1,
            ra: -1,
            fp: -1,
        }
    }
}

/// The operand stack plus registers.
#[derive(Debug)]
pub struct EvaluationStack {
    slots: Vec<Slot>,
    registers: Registers,
    max_stack: usize,
    frames: usize,
    max_frames: usize,
}

impl EvaluationStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new(capacity: usize, max_stack: usize, max_frames: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity.min(max_stack)),
            registers: Registers::default(),
            max_stack,
            frames: 0,
            max_frames,
        }
    }

    /// Returns the registers.
    #[must_use]
    pub fn registers(&self) -> Registers {
        self.registers
    }

    /// Returns `sp`.
    #[must_use]
    pub fn sp(&self) -> isize {
        self.slots.len() as isize - 1
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the stack holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the number of open frames.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Sets `pc`.
    pub fn set_pc(&mut self, pc: isize) {
        self.registers.pc = pc;
    }

    /// Sets `ra`.
    pub fn set_ra(&mut self, ra: isize) {
        self.registers.ra = ra;
    }

    /// Pushes a slot.
    ///
    /// # Errors
    /// Returns [`Invariant::StackOverflow`] past the configured limit.
    pub fn push(&mut self, slot: Slot) -> Result<()> {
        if self.slots.len() >= self.max_stack {
            return Err(Error::invariant(Invariant::StackOverflow {
                limit: self.max_stack,
            }));
        }
        self.slots.push(slot);
        Ok(())
    }

    /// Pushes a reference.
    ///
    /// # Errors
    /// Returns [`Invariant::StackOverflow`] past the configured limit.
    pub fn push_ref(&mut self, reference: ValueRef) -> Result<()> {
        self.push(Slot::Ref(reference))
    }

    /// Pops a slot.
    ///
    /// # Errors
    /// Returns [`Invariant::StackUnderflow`] if the stack is empty.
    pub fn pop(&mut self) -> Result<Slot> {
        self.slots
            .pop()
            .ok_or_else(|| Error::invariant(Invariant::StackUnderflow))
    }

    /// Pops a reference.
    ///
    /// # Errors
    /// Returns [`Invariant::StackUnderflow`] on an empty stack or
    /// [`Invariant::UnexpectedStackSlot`] if the top is not a reference.
    pub fn pop_ref(&mut self) -> Result<ValueRef> {
        match self.pop()? {
            Slot::Ref(reference) => Ok(reference),
            _ => Err(unexpected("reference")),
        }
    }

    /// Pops `count` references, returned in push order.
    ///
    /// # Errors
    /// Fails like [`EvaluationStack::pop_ref`].
    pub fn pop_refs(&mut self, count: usize) -> Result<Vec<ValueRef>> {
        let mut refs = (0..count)
            .map(|_| self.pop_ref())
            .collect::<Result<Vec<_>>>()?;
        refs.reverse();
        Ok(refs)
    }

    /// Drops `count` slots.
    ///
    /// # Errors
    /// Returns [`Invariant::StackUnderflow`] if fewer slots exist.
    pub fn drop_slots(&mut self, count: usize) -> Result<()> {
        let len = self
            .slots
            .len()
            .checked_sub(count)
            .ok_or_else(|| Error::invariant(Invariant::StackUnderflow))?;
        self.slots.truncate(len);
        Ok(())
    }

    /// Returns the slot `depth` below the top.
    ///
    /// # Errors
    /// Returns [`Invariant::StackUnderflow`] if the stack is not that deep.
    pub fn peek(&self, depth: usize) -> Result<&Slot> {
        self.slots
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.slots.get(index))
            .ok_or_else(|| Error::invariant(Invariant::StackUnderflow))
    }

    /// Returns the reference on top.
    ///
    /// # Errors
    /// Fails like [`EvaluationStack::pop_ref`].
    pub fn peek_ref(&self) -> Result<ValueRef> {
        match self.peek(0)? {
            Slot::Ref(reference) => Ok(Rc::clone(reference)),
            _ => Err(unexpected("reference")),
        }
    }

    /// Returns the iterator on top.
    ///
    /// # Errors
    /// Returns [`Invariant::UnexpectedStackSlot`] if the top is not an iterator.
    pub fn peek_iterator(&self) -> Result<Rc<IterationArtifacts>> {
        match self.peek(0)? {
            Slot::Iterator(artifacts) => Ok(Rc::clone(artifacts)),
            _ => Err(unexpected("iterator")),
        }
    }

    /// Pushes a copy of the slot at `register - offset`.
    ///
    /// # Errors
    /// Returns [`Invariant::StackUnderflow`] if the position is outside the stack.
    pub fn dup(&mut self, register: Register, offset: u32) -> Result<()> {
        let base = match register {
            Register::Sp => self.sp(),
            Register::Fp => self.registers.fp,
        };
        let position = base - offset as isize;
        let slot = usize::try_from(position)
            .ok()
            .and_then(|index| self.slots.get(index))
            .cloned()
            .ok_or_else(|| Error::invariant(Invariant::StackUnderflow))?;
        self.push(slot)
    }

    /// Clones the top `count` slots, bottom first.
    ///
    /// # Errors
    /// Returns [`Invariant::StackUnderflow`] if fewer slots exist.
    pub fn capture(&self, count: usize) -> Result<Vec<Slot>> {
        let start = self
            .slots
            .len()
            .checked_sub(count)
            .ok_or_else(|| Error::invariant(Invariant::StackUnderflow))?;
        Ok(self.slots[start..].to_vec())
    }

    /// Saves `ra` and `fp` and starts a new frame.
    ///
    /// # Errors
    /// Returns [`Invariant::StackOverflow`] past the stack or depth limit.
    pub fn push_frame(&mut self) -> Result<()> {
        if self.frames >= self.max_frames {
            return Err(Error::invariant(Invariant::StackOverflow {
                limit: self.max_frames,
            }));
        }
        self.push(Slot::Register(self.registers.ra))?;
        self.push(Slot::Register(self.registers.fp))?;
        self.registers.fp = self.sp() - 1;
        self.frames += 1;
        Ok(())
    }

    /// Drops the current frame and restores `ra` and `fp`.
    ///
    /// # Errors
    /// Returns [`Invariant::UnbalancedFrames`] if no frame is open or the
    /// saved registers are missing.
    pub fn pop_frame(&mut self) -> Result<()> {
        let unbalanced = || Error::invariant(Invariant::UnbalancedFrames);
        if self.frames == 0 {
            return Err(unbalanced());
        }
        let fp = usize::try_from(self.registers.fp).map_err(|_| unbalanced())?;
        let (Some(Slot::Register(ra)), Some(Slot::Register(saved_fp))) =
            (self.slots.get(fp), self.slots.get(fp + 1))
        else {
            return Err(unbalanced());
        };
        let (ra, saved_fp) = (*ra, *saved_fp);
        self.slots.truncate(fp);
        self.registers.ra = ra;
        self.registers.fp = saved_fp;
        self.frames -= 1;
        Ok(())
    }
}

fn unexpected(expected: &'static str) -> Error {
    Error::invariant(Invariant::UnexpectedStackSlot { expected })
}
