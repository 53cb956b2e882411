//! A finished program: heap plus constant pool.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use trellis_foundation::{Error, Invariant, Result};

use crate::constants::ConstantPool;
use crate::heap::{Handle, Heap};
use crate::opcode::{OPCODE_SIZE, Op};

/// A program position that survives heap compaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResumePoint {
    /// The allocation containing the position.
    pub handle: Handle,
    /// Word offset from the start of the allocation.
    pub offset: usize,
}

/// Compiled instructions and their constants.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Program {
    heap: Heap,
    constants: ConstantPool,
}

impl Program {
    /// Bundles a heap and a constant pool.
    #[must_use]
    pub fn new(heap: Heap, constants: ConstantPool) -> Self {
        Self { heap, constants }
    }

    /// Returns the heap.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Returns the constant pool.
    #[must_use]
    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    /// Decodes the instruction at a raw address.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidAddress`] if the instruction runs past the
    /// heap, or [`Invariant::InvalidOpcode`] if it does not decode.
    pub fn opcode_at(&self, addr: usize) -> Result<Op> {
        let mut words = [0u32; OPCODE_SIZE];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.heap.get(addr + i)?;
        }
        Op::decode(words)
    }

    /// Resolves a block handle to the address of its first instruction.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidHandle`] if the block is not live.
    pub fn entry(&self, block: Handle) -> Result<usize> {
        self.heap.getaddr(block)
    }

    /// Captures a raw address as a relocatable resume point.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidAddress`] if no live allocation contains `addr`.
    pub fn resume_point(&self, addr: usize) -> Result<ResumePoint> {
        self.heap
            .handle_at(addr)
            .map(|(handle, offset)| ResumePoint { handle, offset })
            .ok_or_else(|| Error::invariant(Invariant::InvalidAddress(addr)))
    }

    /// Resolves a resume point to its current raw address.
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidHandle`] if the allocation was freed.
    pub fn address_of(&self, point: ResumePoint) -> Result<usize> {
        Ok(self.heap.getaddr(point.handle)? + point.offset)
    }

    /// Releases a block. Its words are reclaimed by the next [`compact`].
    ///
    /// # Errors
    /// Returns [`Invariant::InvalidHandle`] if the block is not allocated.
    ///
    /// [`compact`]: Program::compact
    pub fn free(&mut self, block: Handle) -> Result<()> {
        self.heap.free(block)
    }

    /// Compacts the heap. Resume points and handles stay valid.
    ///
    /// # Errors
    /// Returns [`Invariant::OpenAllocation`] if an allocation is still open.
    pub fn compact(&mut self) -> Result<()> {
        self.heap.compact()
    }

    /// Encodes the program as a MessagePack image.
    ///
    /// # Errors
    /// Returns a serialization error if encoding fails.
    #[cfg(feature = "serde")]
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Decodes a MessagePack image.
    ///
    /// # Errors
    /// Returns a serialization error if the bytes are not a program image.
    #[cfg(feature = "serde")]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut program: Self =
            rmp_serde::from_slice(bytes).map_err(|e| Error::serialization(e.to_string()))?;
        program.constants.reindex();
        Ok(program)
    }
}
