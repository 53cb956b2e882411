//! Integration tests for assembled programs and their images

use trellis_foundation::{Invariant, Value};
use trellis_program::{
    Assembler, Handle, MachineOp, OPCODE_SIZE, Op, Program, SymbolTable, Syscall,
};

fn partial_and_layout() -> (Program, Handle, Handle) {
    let mut asm = Assembler::new();
    let mut partial = asm.block();
    partial.text("partial").ret();
    let partial = partial.commit().unwrap();

    let layout = asm
        .layout(SymbolTable::new(["title"]), |b| {
            b.element("h1", |b| {
                b.get_variable(1).append_text();
            });
            b.push_frame().invoke_static(partial).pop_frame();
            b.value(Value::from(vec![Value::Int(1), Value::Int(2)]))
                .pop(1);
        })
        .unwrap();
    (asm.finish(), partial, layout)
}

fn decode_all(program: &Program, handle: Handle) -> Vec<Op> {
    let start = program.entry(handle).unwrap();
    let len = program.heap().sizeof(handle).unwrap();
    (0..len / OPCODE_SIZE)
        .map(|i| program.opcode_at(start + i * OPCODE_SIZE).unwrap())
        .collect()
}

#[test]
fn blocks_are_laid_out_back_to_back() {
    let (program, partial, layout) = partial_and_layout();
    assert_eq!(program.entry(partial).unwrap(), 0);
    assert_eq!(
        program.entry(layout).unwrap(),
        program.heap().sizeof(partial).unwrap()
    );
    assert_eq!(
        program.heap().len(),
        program.heap().sizeof(partial).unwrap() + program.heap().sizeof(layout).unwrap()
    );
}

#[test]
fn static_calls_name_their_block() {
    let (program, partial, layout) = partial_and_layout();
    let ops = decode_all(&program, layout);
    assert!(ops.contains(&Op::Machine(MachineOp::InvokeStatic(partial))));
    assert!(ops.iter().any(|op| matches!(op, Op::Syscall(Syscall::OpenElement(_)))));
    assert!(ops.contains(&Op::Syscall(Syscall::CloseElement)));
}

#[test]
fn resume_points_follow_compaction() {
    let (mut program, partial, layout) = partial_and_layout();
    let close = decode_all(&program, layout)
        .iter()
        .position(|op| *op == Op::Syscall(Syscall::CloseElement))
        .unwrap();
    let addr = program.entry(layout).unwrap() + close * OPCODE_SIZE;
    let point = program.resume_point(addr).unwrap();

    program.free(partial).unwrap();
    program.compact().unwrap();

    let moved = program.address_of(point).unwrap();
    assert!(moved < addr);
    assert_eq!(
        program.opcode_at(moved).unwrap(),
        Op::Syscall(Syscall::CloseElement)
    );
    let err = program.entry(partial).unwrap_err();
    assert_eq!(err.as_invariant(), Some(&Invariant::InvalidHandle(partial.raw())));
}

#[test]
fn images_keep_code_and_constants() {
    let (program, _, layout) = partial_and_layout();
    let restored = Program::from_bytes(&program.to_bytes().unwrap()).unwrap();

    assert_eq!(decode_all(&restored, layout), decode_all(&program, layout));

    let ops = decode_all(&restored, layout);
    let Some(Op::Syscall(Syscall::RootScope(table))) = ops.first().copied() else {
        panic!("layout starts with a root scope");
    };
    assert_eq!(
        restored.constants().get_symbol_table(table).unwrap().slot_of("title"),
        Some(1)
    );
    let Some(Op::Syscall(Syscall::OpenElement(tag))) = ops
        .iter()
        .copied()
        .find(|op| matches!(op, Op::Syscall(Syscall::OpenElement(_))))
    else {
        panic!("layout opens an element");
    };
    assert_eq!(&**restored.constants().get_string(tag).unwrap(), "h1");

    let mut pool = restored.constants().clone();
    assert_eq!(pool.string("h1"), tag);
}

#[test]
fn garbage_is_not_an_image() {
    let err = Program::from_bytes(b"not a program").unwrap_err();
    assert!(err.to_string().contains("serialization"));
}
