//! End-to-end rendering scenarios.

use std::cell::Cell;
use std::rc::Rc;

use trellis_foundation::{NodeId, Result, Value};
use trellis_program::{Assembler, SymbolTable};
use trellis_reactive::{ComputeReference, Reference, SourceReference, Tag};
use trellis_vm::{
    Arguments, Destructor, MapResolver, MemoryTree, ModifierDefinition, ModifierInstance,
    OutputTree, Patch, Runtime, VmConfig, diff, render_main,
};

fn render_into(
    program: &trellis_program::Program,
    resolver: &MapResolver,
    entry: trellis_program::Handle,
    context: &SourceReference<Value>,
) -> (MemoryTree, NodeId, trellis_vm::RenderResult) {
    let mut tree = MemoryTree::new();
    let root = tree.create_element("div");
    let result = render_main(
        Runtime::new(program, resolver),
        &mut tree,
        root,
        entry,
        context.to_ref(),
        VmConfig::new(),
    )
    .unwrap()
    .sync()
    .unwrap();
    (tree, root, result)
}

// ============================================================================
// Conditional teardown
// ============================================================================

#[derive(Clone, Default)]
struct Recorder {
    destroyed: Rc<Cell<usize>>,
}

struct RecorderInstance {
    args: Arguments,
    destroyed: Rc<Cell<usize>>,
}

impl ModifierDefinition for Recorder {
    fn create(&self, _: NodeId, args: &Arguments) -> Result<Box<dyn ModifierInstance>> {
        Ok(Box::new(RecorderInstance {
            args: args.clone(),
            destroyed: Rc::clone(&self.destroyed),
        }))
    }
}

impl ModifierInstance for RecorderInstance {
    fn tag(&self) -> Tag {
        self.args.tag()
    }

    fn install(&mut self, _: &mut dyn OutputTree) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, _: &mut dyn OutputTree) -> Result<()> {
        Ok(())
    }

    fn destructor(&mut self) -> Option<Destructor> {
        let destroyed = Rc::clone(&self.destroyed);
        Some(Box::new(move || destroyed.set(destroyed.get() + 1)))
    }
}

#[test]
fn flipping_a_condition_tears_down_the_old_branch() {
    let recorder = Recorder::default();
    let destroyed = Rc::clone(&recorder.destroyed);
    let resolver = MapResolver::new().with_modifier("recorder", recorder);
    let mut asm = Assembler::new();
    let entry = asm
        .layout(SymbolTable::default(), |b| {
            b.replayable_if(
                |b| {
                    b.self_ref().get_property("cond");
                },
                |b| {
                    b.open_element("span");
                    b.modifier("recorder", 0);
                    b.flush_element();
                    b.text("yes");
                    b.close_element();
                },
                |b| {
                    b.text("no");
                },
            );
        })
        .unwrap();
    let program = asm.finish();
    let context = SourceReference::new(Value::map_of([("cond", Value::Bool(true))]));

    let (mut tree, root, mut result) = render_into(&program, &resolver, entry, &context);
    assert_eq!(tree.text_content(root), "yes");
    assert_eq!(destroyed.get(), 0);

    context.set(Value::map_of([("cond", Value::Bool(false))]));
    let stats = result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    assert_eq!(tree.inner_html(root), "no");
    assert_eq!(stats.rebuilt, 1);
    assert_eq!(destroyed.get(), 1);

    result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    result.destroy(&mut tree).unwrap();
    assert_eq!(destroyed.get(), 1);
}

// ============================================================================
// Keyed reorder
// ============================================================================

#[test]
fn removing_and_swapping_keeps_retained_nodes() {
    let mut asm = Assembler::new();
    let entry = asm
        .layout(SymbolTable::new(["item", "index"]), |b| {
            b.each(
                |b| {
                    b.self_ref().get_property("rows");
                },
                "key",
                [1, 2],
                |b| {
                    b.element("p", |b| {
                        b.get_path(1, &["key"]).append_text();
                    });
                },
                |_| {},
            );
        })
        .unwrap();
    let program = asm.finish();
    let resolver = MapResolver::new();
    let row = |key: i64| Value::map_of([("key", Value::Int(key))]);
    let rows = |keys: &[i64]| {
        Value::map_of([(
            "rows",
            Value::from(keys.iter().map(|&k| row(k)).collect::<Vec<_>>()),
        )])
    };
    let context = SourceReference::new(rows(&[1, 2, 3]));

    let (mut tree, root, mut result) = render_into(&program, &resolver, entry, &context);
    assert_eq!(tree.text_content(root), "123");
    let children = tree.children(root).to_vec();
    let (one, two) = (children[0], children[1]);

    context.set(rows(&[2, 1]));
    let stats = result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    assert_eq!(tree.text_content(root), "21");
    assert_eq!((stats.deletes, stats.moves, stats.inserts), (1, 1, 0));
    assert_eq!(stats.rebuilt, 0);
    assert_eq!(&tree.children(root)[..2], &[two, one]);

    let patches = diff(&[1, 2, 3], &[2, 1]);
    assert_eq!(patches[0], Patch::Delete { key: 3 });
    assert_eq!(
        patches
            .iter()
            .filter(|p| matches!(p, Patch::Move { .. }))
            .count(),
        1
    );
    assert!(!patches.iter().any(|p| matches!(p, Patch::Insert { .. })));
}

// ============================================================================
// Compute caching
// ============================================================================

#[test]
fn computations_rerun_once_per_change() {
    let source = SourceReference::new(Value::Int(2));
    let input = source.clone();
    let squared = ComputeReference::new(move || {
        let n = input.value()?.as_int().unwrap_or(0);
        Ok(Value::Int(n * n))
    });

    assert_eq!(squared.value().unwrap(), Value::Int(4));
    assert_eq!(squared.value().unwrap(), Value::Int(4));
    assert_eq!(squared.invocations(), 1);

    source.set(Value::Int(3));
    assert_eq!(squared.value().unwrap(), Value::Int(9));
    assert_eq!(squared.invocations(), 2);
}

#[test]
fn helpers_rerun_once_per_change() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let resolver = MapResolver::new().with_helper("double", move |args: &[Value]| {
        counter.set(counter.get() + 1);
        Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
    });
    let mut asm = Assembler::new();
    let entry = asm
        .layout(SymbolTable::default(), |b| {
            b.self_ref().get_property("n").helper("double", 1).append_text();
        })
        .unwrap();
    let program = asm.finish();
    let context = SourceReference::new(Value::map_of([("n", Value::Int(4))]));

    let (mut tree, root, mut result) = render_into(&program, &resolver, entry, &context);
    assert_eq!(tree.text_content(root), "8");
    assert_eq!(calls.get(), 1);

    result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    assert_eq!(calls.get(), 1);

    context.set(Value::map_of([("n", Value::Int(5))]));
    result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    assert_eq!(tree.text_content(root), "10");
    assert_eq!(calls.get(), 2);
}
