//! Configuration for the interpreters.

/// Limits and debugging switches shared by the append and update passes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum number of operand stack slots.
    pub max_stack: usize,

    /// Slots reserved up front for the operand stack.
    pub initial_stack_capacity: usize,

    /// Maximum number of nested frames.
    pub max_call_depth: usize,

    /// Never skip cache groups, even when their tag validates.
    pub always_revalidate: bool,

    /// Emit a `trace!` event for every dispatched opcode.
    pub trace_opcodes: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack: 4096,
            initial_stack_capacity: 64,
            max_call_depth: 512,
            always_revalidate: false,
            trace_opcodes: false,
        }
    }
}

impl VmConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration for debugging: every cache group re-runs and
    /// every opcode is traced.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            always_revalidate: true,
            trace_opcodes: true,
            ..Self::default()
        }
    }

    /// Builder method to set the stack limit.
    #[must_use]
    pub fn with_max_stack(mut self, slots: usize) -> Self {
        self.max_stack = slots;
        self
    }

    /// Builder method to set the initial stack capacity.
    #[must_use]
    pub fn with_initial_stack_capacity(mut self, slots: usize) -> Self {
        self.initial_stack_capacity = slots;
        self
    }

    /// Builder method to set the frame depth limit.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Builder method to enable/disable cache-group skipping.
    #[must_use]
    pub fn with_always_revalidate(mut self, always: bool) -> Self {
        self.always_revalidate = always;
        self
    }

    /// Builder method to enable/disable opcode tracing.
    #[must_use]
    pub fn with_trace_opcodes(mut self, trace: bool) -> Self {
        self.trace_opcodes = trace;
        self
    }
}
