//! Integration tests for Error types
//!
//! Tests error construction, display, context, and the invariant split.

use trellis_foundation::{Error, ErrorContext, ErrorKind, Invariant};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn invariants_are_flagged() {
    let err = Error::invariant(Invariant::StackOverflow { limit: 8 });
    assert!(err.is_invariant());
    assert_eq!(err.as_invariant(), Some(&Invariant::StackOverflow { limit: 8 }));
    assert!(format!("{err}").contains("limit 8"));
}

#[test]
fn user_failures_are_not_invariants() {
    let err = Error::computation("division by zero");
    assert!(!err.is_invariant());
    assert!(err.as_invariant().is_none());
    assert!(matches!(err.kind, ErrorKind::Computation(_)));
}

#[test]
fn capability_errors_name_the_specifier() {
    let err = Error::unresolved("tooltip");
    assert!(format!("{err}").contains("tooltip"));

    let err = Error::capability_mismatch("tooltip", "modifier");
    assert!(matches!(
        err.kind,
        ErrorKind::CapabilityMismatch { ref specifier, expected: "modifier" } if specifier == "tooltip"
    ));
}

#[test]
fn type_mismatch_display() {
    let err = Error::type_mismatch("node", "string");
    let msg = format!("{err}");
    assert!(msg.contains("node"));
    assert!(msg.contains("string"));
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn context_is_attached() {
    let err = Error::invariant(Invariant::UnbalancedBlocks).with_context(
        ErrorContext::new()
            .with_pc(40)
            .with_opcode("CloseElement")
            .with_frame("Try"),
    );
    let context = err.context.as_ref().unwrap();
    assert_eq!(context.pc, Some(40));
    assert_eq!(context.opcode.as_deref(), Some("CloseElement"));
    assert_eq!(context.stack, ["Try"]);

    let rendered = format!("{context}");
    assert!(rendered.contains("CloseElement"));
    assert!(rendered.contains("pc 40"));
}
