//! Stack balance: every step moves `sp` by the instruction's declared delta.

use proptest::prelude::*;
use trellis_foundation::{Result, Value};
use trellis_program::{
    Assembler, BlockBuilder, Handle, MachineOp, Op, Program, Register, StackDelta, SymbolTable,
};
use trellis_reactive::SourceReference;
use trellis_vm::{MapResolver, MemoryTree, OutputTree, Runtime, Step, VmConfig, render_main};

#[derive(Clone, Debug)]
enum Piece {
    Int(i32),
    Str(String),
    Nil,
    SelfProperty(String),
    DupTop,
    Pop,
    Concat,
    ToBoolean,
    Upper,
    AppendText,
    Text(String),
    Element(String),
    Framed(i32),
    Conditional(bool),
    CacheGroup(String),
}

impl Piece {
    /// Operands the piece consumes, and how many it leaves behind.
    fn arity(&self) -> (usize, usize) {
        match self {
            Self::Int(_) | Self::Str(_) | Self::Nil | Self::SelfProperty(_) => (0, 1),
            Self::DupTop => (1, 2),
            Self::Pop | Self::AppendText => (1, 0),
            Self::Concat => (2, 1),
            Self::ToBoolean | Self::Upper => (1, 1),
            Self::Text(_)
            | Self::Element(_)
            | Self::Framed(_)
            | Self::Conditional(_)
            | Self::CacheGroup(_) => (0, 0),
        }
    }

    fn emit(&self, b: &mut BlockBuilder<'_>) {
        match self {
            Self::Int(n) => {
                b.int(*n);
            }
            Self::Str(s) => {
                b.str(s);
            }
            Self::Nil => {
                b.nil();
            }
            Self::SelfProperty(name) => {
                b.self_ref().get_property(name);
            }
            Self::DupTop => {
                b.dup(Register::Sp, 0);
            }
            Self::Pop => {
                b.pop(1);
            }
            Self::Concat => {
                b.concat(2);
            }
            Self::ToBoolean => {
                b.to_boolean();
            }
            Self::Upper => {
                b.helper("upper", 1);
            }
            Self::AppendText => {
                b.append_text();
            }
            Self::Text(s) => {
                b.text(s);
            }
            Self::Element(tag) => {
                b.element(tag, |b| {
                    b.self_ref().get_property("name").append_text();
                });
            }
            Self::Framed(n) => {
                b.push_frame().int(*n).int(*n).pop_frame();
            }
            Self::Conditional(flag) => {
                b.replayable_if(
                    |b| {
                        b.bool(*flag);
                    },
                    |b| {
                        b.text("yes");
                    },
                    |b| {
                        b.text("no");
                    },
                );
            }
            Self::CacheGroup(s) => {
                b.cache_group(|b| {
                    b.str(s).append_text();
                });
            }
        }
    }
}

fn piece() -> impl Strategy<Value = Piece> {
    let word = "[a-z]{1,6}";
    prop_oneof![
        any::<i32>().prop_map(Piece::Int),
        word.prop_map(Piece::Str),
        Just(Piece::Nil),
        prop_oneof![Just("name".to_string()), Just("count".to_string())]
            .prop_map(Piece::SelfProperty),
        Just(Piece::DupTop),
        Just(Piece::Pop),
        Just(Piece::Concat),
        Just(Piece::ToBoolean),
        Just(Piece::Upper),
        Just(Piece::AppendText),
        word.prop_map(Piece::Text),
        prop_oneof![Just("p".to_string()), Just("span".to_string())].prop_map(Piece::Element),
        any::<i32>().prop_map(Piece::Framed),
        any::<bool>().prop_map(Piece::Conditional),
        word.prop_map(Piece::CacheGroup),
    ]
}

/// Assembles the pieces whose operands are available, then drains the stack.
fn assemble(pieces: &[Piece]) -> (Program, Handle) {
    let mut asm = Assembler::new();
    let entry = asm
        .layout(SymbolTable::default(), |b| {
            let mut depth = 0usize;
            for piece in pieces {
                let (consumes, produces) = piece.arity();
                if depth < consumes {
                    continue;
                }
                piece.emit(b);
                depth = depth - consumes + produces;
            }
            if depth > 0 {
                b.pop(u32::try_from(depth).unwrap());
            }
        })
        .unwrap();
    (asm.finish(), entry)
}

fn upper(args: &[Value]) -> Result<Value> {
    Ok(Value::from(args[0].to_text().to_uppercase()))
}

/// Steps the program, checking each instruction's effect on `sp`.
fn check_balance(program: &Program, entry: Handle) -> usize {
    let resolver = MapResolver::new().with_helper("upper", upper);
    let context = SourceReference::new(Value::map_of([
        ("name", Value::from("ada")),
        ("count", Value::Int(3)),
    ]));
    let mut tree = MemoryTree::new();
    let root = tree.create_element("div");
    let mut iter = render_main(
        Runtime::new(program, &resolver),
        &mut tree,
        root,
        entry,
        context.to_ref(),
        VmConfig::new(),
    )
    .unwrap();

    let mut frames = Vec::new();
    let mut steps = 0;
    loop {
        let pc = usize::try_from(iter.registers().unwrap().pc).unwrap();
        let op = program.opcode_at(pc).unwrap();
        let delta = op.stack_delta(program.constants()).unwrap();
        let before = iter.sp().unwrap();
        if op == Op::Machine(MachineOp::PushFrame) {
            frames.push(before);
        }

        let step = iter.next().unwrap();
        steps += 1;
        let Step::Continue = step else {
            break;
        };
        let after = iter.sp().unwrap();
        match delta {
            StackDelta::Fixed(n) => {
                assert_eq!(after, before + n as isize, "{op} at {pc}");
            }
            StackDelta::Frame => {
                assert_eq!(Some(after), frames.pop(), "{op} at {pc}");
            }
            StackDelta::Dynamic => {}
        }
    }
    assert!(frames.is_empty());
    steps
}

#[test]
fn an_empty_layout_balances() {
    let (program, entry) = assemble(&[]);
    assert_eq!(check_balance(&program, entry), 3);
}

#[test]
fn nested_regions_balance() {
    let (program, entry) = assemble(&[
        Piece::Conditional(true),
        Piece::SelfProperty("name".into()),
        Piece::Upper,
        Piece::DupTop,
        Piece::Concat,
        Piece::AppendText,
        Piece::Framed(7),
        Piece::CacheGroup("x".into()),
        Piece::Conditional(false),
    ]);
    assert!(check_balance(&program, entry) > 20);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_programs_balance(pieces in proptest::collection::vec(piece(), 0..24)) {
        let (program, entry) = assemble(&pieces);
        check_balance(&program, entry);
    }
}
