//! Cache groups skip unchanged regions.

use std::cell::Cell;
use std::rc::Rc;

use trellis_foundation::Value;
use trellis_program::{Assembler, SymbolTable};
use trellis_reactive::{Reference, SourceReference};
use trellis_vm::{MapResolver, MemoryTree, OutputTree, Runtime, VmConfig, render_main};

const GROUPS: usize = 4;
const LEAVES: usize = 3;

struct Counters {
    sources: Vec<SourceReference<Value>>,
    calls: Vec<Rc<Cell<usize>>>,
}

impl Counters {
    fn new() -> (Self, MapResolver) {
        let mut resolver = MapResolver::new();
        let mut sources = Vec::new();
        let mut calls = Vec::new();
        for group in 0..GROUPS {
            let source = SourceReference::new(Value::Int(0));
            let count = Rc::new(Cell::new(0));
            let (reader, counter) = (source.clone(), Rc::clone(&count));
            resolver = resolver.with_helper(&format!("read{group}"), move |_: &[Value]| {
                counter.set(counter.get() + 1);
                reader.value()
            });
            sources.push(source);
            calls.push(count);
        }
        (Self { sources, calls }, resolver)
    }

    fn total(&self) -> usize {
        self.calls.iter().map(|c| c.get()).sum()
    }
}

#[test]
fn only_changed_groups_do_work() {
    let (counters, resolver) = Counters::new();
    let mut asm = Assembler::new();
    let entry = asm
        .layout(SymbolTable::default(), |b| {
            for group in 0..GROUPS {
                b.cache_group(|b| {
                    b.element("section", |b| {
                        b.helper(&format!("read{group}"), 0).append_text();
                        for leaf in 0..LEAVES {
                            b.text(&format!("-{leaf}"));
                        }
                    });
                });
            }
        })
        .unwrap();
    let program = asm.finish();
    let context = SourceReference::new(Value::Nil);
    let mut tree = MemoryTree::new();
    let root = tree.create_element("div");
    let mut result = render_main(
        Runtime::new(&program, &resolver),
        &mut tree,
        root,
        entry,
        context.to_ref(),
        VmConfig::new(),
    )
    .unwrap()
    .sync()
    .unwrap();
    assert_eq!(counters.total(), GROUPS);

    let mutations = tree.mutations();
    let stats = result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    assert_eq!(stats.skipped_groups, GROUPS);
    assert_eq!(counters.total(), GROUPS);
    assert_eq!(tree.mutations(), mutations);

    counters.sources[2].set(Value::Int(9));
    let stats = result
        .rerender(Runtime::new(&program, &resolver), &mut tree)
        .unwrap();
    assert_eq!(stats.skipped_groups, GROUPS - 1);
    assert_eq!(counters.calls[2].get(), 2);
    assert_eq!(counters.total(), GROUPS + 1);
    assert_eq!(tree.mutations(), mutations + 1);
    assert!(tree.text_content(root).contains("9-0-1-2"));
}
