//! Error types for the Trellis system.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.
//!
//! Errors come in two classes. Invariant violations ([`ErrorKind::Invariant`])
//! mean a compiler or host broke a contract of the VM; they are never
//! recovered from. Everything else describes a failure of user code or host
//! data, which the update interpreter may answer by rebuilding a region.

use std::fmt;

use thiserror::Error;

/// The main error type for Trellis operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates an invariant violation error.
    #[must_use]
    pub fn invariant(invariant: Invariant) -> Self {
        Self::new(ErrorKind::Invariant(invariant))
    }

    /// Creates an error for a failed user computation.
    #[must_use]
    pub fn computation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Computation(message.into()))
    }

    /// Creates an unresolved capability error.
    #[must_use]
    pub fn unresolved(specifier: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnresolvedCapability(specifier.into()))
    }

    /// Creates a capability mismatch error.
    #[must_use]
    pub fn capability_mismatch(specifier: impl Into<String>, expected: &'static str) -> Self {
        Self::new(ErrorKind::CapabilityMismatch {
            specifier: specifier.into(),
            expected,
        })
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: &'static str, actual: &'static str) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization(message.into()))
    }

    /// Returns true if this error is a contract violation ("BUG"-class).
    #[must_use]
    pub fn is_invariant(&self) -> bool {
        matches!(self.kind, ErrorKind::Invariant(_))
    }

    /// Returns the violated invariant, if this is an invariant error.
    #[must_use]
    pub fn as_invariant(&self) -> Option<&Invariant> {
        match &self.kind {
            ErrorKind::Invariant(invariant) => Some(invariant),
            _ => None,
        }
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A VM contract was violated. Never recovered from.
    #[error("BUG: {0}")]
    Invariant(Invariant),

    /// A user computation or capability callback failed.
    #[error("computation failed: {0}")]
    Computation(String),

    /// The resolver returned nothing for a specifier.
    #[error("unresolved capability: {0}")]
    UnresolvedCapability(String),

    /// The resolver returned a capability of the wrong kind.
    #[error("capability {specifier} is not a {expected}")]
    CapabilityMismatch {
        /// The specifier that was resolved.
        specifier: String,
        /// The kind of capability the call site needed.
        expected: &'static str,
    },

    /// A value had the wrong shape for the operation.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected value type.
        expected: &'static str,
        /// The actual value type encountered.
        actual: &'static str,
    },

    /// A program image could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Contract violations detected by the heap, the constant pool, or the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invariant {
    /// A pop or peek reached below the bottom of the operand stack.
    StackUnderflow,
    /// The operand stack or the call depth exceeded its configured limit.
    StackOverflow {
        /// The configured limit.
        limit: usize,
    },
    /// A frame was popped without a matching push.
    UnbalancedFrames,
    /// A scope was popped without a matching push.
    UnbalancedScopes,
    /// A block, element, or remote cursor was closed without a matching open.
    UnbalancedBlocks,
    /// A cache group was committed without a matching begin.
    UnbalancedCacheGroups,
    /// A track frame was ended without a matching begin.
    UnbalancedTrackFrames,
    /// The update interpreter had no frame to work with.
    MissingUpdatingFrame,
    /// An updating opcode was torn down twice.
    DoubleRelease,
    /// A heap handle is unknown, freed, or purged.
    InvalidHandle(u32),
    /// A raw heap address is out of range.
    InvalidAddress(usize),
    /// A constant pool handle is zero or out of range.
    InvalidConstant {
        /// The table that was indexed.
        table: &'static str,
        /// The offending handle.
        handle: u32,
    },
    /// An instruction word does not decode to a known opcode.
    InvalidOpcode(u32),
    /// A stack slot did not hold what the instruction expected.
    UnexpectedStackSlot {
        /// What the instruction expected.
        expected: &'static str,
    },
    /// An assembler label was referenced but never bound.
    UnboundLabel(u32),
    /// The heap was written with the wrong allocation state.
    OpenAllocation,
    /// A template iterator was stepped after it finished.
    IteratorExhausted,
    /// An assertion was invalidated with no enclosing region to rebuild.
    UnhandledAssertion,
    /// A render result was used after it was destroyed.
    Destroyed,
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackUnderflow => write!(f, "stack underflow"),
            Self::StackOverflow { limit } => write!(f, "stack overflow (limit {limit})"),
            Self::UnbalancedFrames => write!(f, "unbalanced frame push/pop"),
            Self::UnbalancedScopes => write!(f, "unbalanced scope push/pop"),
            Self::UnbalancedBlocks => write!(f, "unbalanced block open/close"),
            Self::UnbalancedCacheGroups => write!(f, "unbalanced cache group"),
            Self::UnbalancedTrackFrames => write!(f, "unbalanced track frame"),
            Self::MissingUpdatingFrame => write!(f, "missing updating-opcode frame"),
            Self::DoubleRelease => write!(f, "updating opcode released twice"),
            Self::InvalidHandle(handle) => write!(f, "invalid heap handle {handle}"),
            Self::InvalidAddress(addr) => write!(f, "invalid heap address {addr}"),
            Self::InvalidConstant { table, handle } => {
                write!(f, "invalid constant handle {handle} in {table} table")
            }
            Self::InvalidOpcode(word) => write!(f, "invalid opcode type {word}"),
            Self::UnexpectedStackSlot { expected } => {
                write!(f, "unexpected stack slot, expected {expected}")
            }
            Self::UnboundLabel(label) => write!(f, "label {label} was never bound"),
            Self::OpenAllocation => write!(f, "heap allocation state violated"),
            Self::IteratorExhausted => write!(f, "template iterator already finished"),
            Self::UnhandledAssertion => write!(f, "assertion failed outside any region"),
            Self::Destroyed => write!(f, "render result already destroyed"),
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Program counter at the time of the error.
    pub pc: Option<usize>,
    /// Name of the opcode that was executing.
    pub opcode: Option<String>,
    /// Stack of nested regions (outermost first).
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the program counter.
    #[must_use]
    pub fn with_pc(mut self, pc: usize) -> Self {
        self.pc = Some(pc);
        self
    }

    /// Sets the opcode name.
    #[must_use]
    pub fn with_opcode(mut self, opcode: impl Into<String>) -> Self {
        self.opcode = Some(opcode.into());
        self
    }

    /// Adds a region frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(opcode) = &self.opcode {
            write!(f, "in {opcode}")?;
        }
        if let Some(pc) = self.pc {
            write!(f, " at pc {pc}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}
