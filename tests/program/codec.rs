//! Integration tests for instruction encoding

use proptest::prelude::*;
use trellis_foundation::Invariant;
use trellis_program::{
    Assembler, MachineOp, OPCODE_SIZE, Op, PrimitiveKind, StackDelta, SymbolTable, Syscall,
};

#[test]
fn assembled_blocks_decode_word_for_word() {
    let mut asm = Assembler::new();
    let entry = asm
        .layout(SymbolTable::new(["item", "index"]), |b| {
            b.each(
                |b| {
                    b.self_ref().get_property("rows");
                },
                "id",
                [1, 2],
                |b| {
                    b.get_variable(1).append_text();
                },
                |b| {
                    b.text("none");
                },
            );
        })
        .unwrap();
    let program = asm.finish();
    let words = program.heap().words(entry).unwrap();
    assert_eq!(words.len() % OPCODE_SIZE, 0);

    let start = program.entry(entry).unwrap();
    let ops: Vec<Op> = (0..words.len() / OPCODE_SIZE)
        .map(|i| program.opcode_at(start + i * OPCODE_SIZE).unwrap())
        .collect();
    assert!(matches!(ops[0], Op::Syscall(Syscall::RootScope(_))));
    assert_eq!(ops.last(), Some(&Op::Machine(MachineOp::Return)));
    assert!(ops.iter().any(|op| matches!(op, Op::Syscall(Syscall::EnterList(_)))));
}

#[test]
fn negative_integers_survive_the_payload() {
    let mut asm = Assembler::new();
    let mut block = asm.block();
    block.int(-7).pop(1).ret();
    let handle = block.commit().unwrap();
    let program = asm.finish();

    let first = program.opcode_at(program.entry(handle).unwrap()).unwrap();
    assert_eq!(
        first,
        Op::Syscall(Syscall::PrimitiveReference {
            kind: PrimitiveKind::Int,
            payload: -7i32 as u32,
        })
    );
}

#[test]
fn machine_ops_leave_the_stack_alone_or_reset_it() {
    let program = Assembler::new().finish();
    let constants = program.constants();
    for op in [MachineOp::Jump(8), MachineOp::Return, MachineOp::ReturnTo(-4)] {
        assert_eq!(Op::from(op).stack_delta(constants).unwrap(), StackDelta::Fixed(0));
    }
    assert_eq!(
        Op::from(MachineOp::PopFrame).stack_delta(constants).unwrap(),
        StackDelta::Frame
    );
}

#[test]
fn truncated_programs_fail_to_decode() {
    let program = Assembler::new().finish();
    let err = program.opcode_at(0).unwrap_err();
    assert_eq!(err.as_invariant(), Some(&Invariant::InvalidAddress(0)));
}

proptest! {
    #[test]
    fn relative_targets_keep_their_sign(rel in any::<i32>()) {
        for op in [
            Op::Machine(MachineOp::Jump(rel)),
            Op::Machine(MachineOp::ReturnTo(rel)),
            Op::Syscall(Syscall::JumpIf(rel)),
            Op::Syscall(Syscall::Iterate(rel)),
        ] {
            let decoded = Op::decode(op.encode()).unwrap();
            prop_assert_eq!(decoded, op);
            prop_assert!(decoded.has_relative_target());
        }
    }
}
