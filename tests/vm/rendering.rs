//! Whole-program rendering across passes.

use trellis_foundation::{Result, Value};
use trellis_program::{Assembler, Handle, Program, SymbolTable};
use trellis_reactive::{Reference, SourceReference};
use trellis_vm::{
    MapResolver, MemoryTree, OutputTree, RenderResult, Runtime, VmConfig, render_main,
};

fn greeting_program() -> (Program, Handle, Handle) {
    let mut asm = Assembler::new();
    let mut scratch = asm.block();
    scratch.text("scratch").ret();
    let scratch = scratch.commit().unwrap();

    let entry = asm
        .layout(SymbolTable::default(), |b| {
            b.element("h1", |b| {
                b.text("Hi ");
                b.self_ref().get_property("name").append_text();
            });
            b.replayable_if(
                |b| {
                    b.self_ref().get_property("admin");
                },
                |b| {
                    b.element("button", |b| {
                        b.text("delete");
                    });
                },
                |b| {
                    b.text("read only");
                },
            );
        })
        .unwrap();
    (asm.finish(), scratch, entry)
}

fn first_render(
    program: &Program,
    resolver: &MapResolver,
    entry: Handle,
    context: &SourceReference<Value>,
    config: VmConfig,
) -> Result<(MemoryTree, trellis_foundation::NodeId, RenderResult)> {
    let mut tree = MemoryTree::new();
    let root = tree.create_element("main");
    let result = render_main(
        Runtime::new(program, resolver),
        &mut tree,
        root,
        entry,
        context.to_ref(),
        config,
    )?
    .sync()?;
    Ok((tree, root, result))
}

fn person(name: &str, admin: bool) -> Value {
    Value::map_of([("name", Value::from(name)), ("admin", Value::Bool(admin))])
}

#[test]
fn independent_results_share_a_program() {
    let (program, _, entry) = greeting_program();
    let resolver = MapResolver::new();
    let ada = SourceReference::new(person("Ada", true));
    let bob = SourceReference::new(person("Bob", false));

    let (mut left, left_root, mut left_result) =
        first_render(&program, &resolver, entry, &ada, VmConfig::new()).unwrap();
    let (mut right, right_root, mut right_result) =
        first_render(&program, &resolver, entry, &bob, VmConfig::new()).unwrap();
    assert_eq!(left.inner_html(left_root), "<h1>Hi Ada</h1><button>delete</button>");
    assert_eq!(right.inner_html(right_root), "<h1>Hi Bob</h1>read only");

    bob.set(person("Bob", true));
    let untouched = left.mutations();
    left_result
        .rerender(Runtime::new(&program, &resolver), &mut left)
        .unwrap();
    right_result
        .rerender(Runtime::new(&program, &resolver), &mut right)
        .unwrap();
    assert_eq!(left.mutations(), untouched);
    assert_eq!(right.inner_html(right_root), "<h1>Hi Bob</h1><button>delete</button>");
}

#[test]
fn regions_rebuild_after_compaction() {
    let (mut program, scratch, entry) = greeting_program();
    let resolver = MapResolver::new();
    let context = SourceReference::new(person("Ada", false));
    let (mut tree, root, mut result) =
        first_render(&program, &resolver, entry, &context, VmConfig::new()).unwrap();

    let before = program.entry(entry).unwrap();
    program.free(scratch).unwrap();
    program.compact().unwrap();
    assert!(program.entry(entry).unwrap() < before);

    context.set(person("Ada", true));
    let stats = result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    assert_eq!(stats.rebuilt, 1);
    assert_eq!(tree.inner_html(root), "<h1>Hi Ada</h1><button>delete</button>");
}

#[test]
fn always_revalidate_never_skips() {
    let left = SourceReference::new(Value::from("x"));
    let reader = left.clone();
    let resolver = MapResolver::new().with_helper("read", move |_: &[Value]| reader.value());
    let mut asm = Assembler::new();
    let entry = asm
        .layout(SymbolTable::default(), |b| {
            b.cache_group(|b| {
                b.helper("read", 0).append_text();
            });
        })
        .unwrap();
    let program = asm.finish();
    let context = SourceReference::new(Value::Nil);

    let (mut tree, root, mut result) = first_render(
        &program,
        &resolver,
        entry,
        &context,
        VmConfig::debug(),
    )
    .unwrap();
    let stats = result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    assert_eq!(stats.skipped_groups, 0);
    assert!(stats.evaluated > 0);
    assert_eq!(tree.text_content(root), "x");
}

#[test]
fn destroy_clears_the_root() {
    let (program, _, entry) = greeting_program();
    let resolver = MapResolver::new();
    let context = SourceReference::new(person("Ada", true));
    let (mut tree, root, mut result) =
        first_render(&program, &resolver, entry, &context, VmConfig::new()).unwrap();
    assert!(!result.bounds().nodes(&tree).is_empty());

    result.destroy(&mut tree).unwrap();
    assert!(tree.children(root).is_empty());
    assert!(result.is_destroyed());
}

#[test]
fn stack_limits_come_from_the_config() {
    let (program, _, entry) = greeting_program();
    let resolver = MapResolver::new();
    let context = SourceReference::new(person("Ada", true));
    let err = first_render(
        &program,
        &resolver,
        entry,
        &context,
        VmConfig::new().with_max_stack(1),
    )
    .err()
    .unwrap();
    assert!(err.is_invariant());
    assert!(err.context.is_some());
}
