//! Keyed lists through the interpreters and through `reconcile` directly.

use proptest::prelude::*;
use trellis_foundation::{Result, Value};
use trellis_program::{Assembler, Handle, Program, SymbolTable};
use trellis_reactive::SourceReference;
use trellis_vm::{
    ListDelegate, MapResolver, MemoryTree, OutputTree, RenderResult, Runtime, VmConfig, reconcile,
    render_main,
};

fn list_program(key: &str) -> (Program, Handle) {
    let mut asm = Assembler::new();
    let entry = asm
        .layout(SymbolTable::new(["item", "index"]), |b| {
            b.element("ul", |b| {
                b.each(
                    |b| {
                        b.self_ref();
                    },
                    key,
                    [1, 2],
                    |b| {
                        b.element("li", |b| {
                            b.get_variable(1).append_text();
                        });
                    },
                    |_| {},
                );
            });
        })
        .unwrap();
    (asm.finish(), entry)
}

fn ints(values: &[i64]) -> Value {
    Value::from(values.iter().copied().map(Value::Int).collect::<Vec<_>>())
}

struct Harness {
    program: Program,
    resolver: MapResolver,
    tree: MemoryTree,
    list: trellis_foundation::NodeId,
    context: SourceReference<Value>,
    result: RenderResult,
}

impl Harness {
    fn new(key: &str, initial: &[i64]) -> Self {
        let (program, entry) = list_program(key);
        let resolver = MapResolver::new();
        let mut tree = MemoryTree::new();
        let root = tree.create_element("div");
        let context = SourceReference::new(ints(initial));
        let result = render_main(
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
        let list = tree.children(root)[0];
        Self {
            program,
            resolver,
            tree,
            list,
            context,
            result,
        }
    }

    fn update(&mut self, values: &[i64]) -> trellis_vm::RenderStats {
        self.context.set(ints(values));
        self.result
            .rerender(Runtime::new(&self.program, &self.resolver), &mut self.tree)
            .unwrap()
    }

    fn items(&self) -> Vec<trellis_foundation::NodeId> {
        self.tree.children(self.list).to_vec()
    }

    fn text(&self) -> String {
        self.tree.text_content(self.list)
    }
}

#[test]
fn duplicate_primitives_keep_their_own_rows() {
    let mut list = Harness::new("@identity", &[1, 1, 2]);
    assert_eq!(list.text(), "112");
    let before = list.items();

    let stats = list.update(&[1, 2, 1]);
    assert_eq!(list.text(), "121");
    assert_eq!((stats.inserts, stats.deletes, stats.moves), (0, 0, 1));
    let after = list.items();
    assert_eq!(after[0], before[0]);
    assert_eq!(after[1], before[2]);
    assert_eq!(after[2], before[1]);
}

#[test]
fn index_keys_update_rows_in_place() {
    let mut list = Harness::new("@index", &[1, 2]);
    let before = list.items();

    let stats = list.update(&[2, 1]);
    assert_eq!(list.text(), "21");
    assert_eq!((stats.inserts, stats.deletes, stats.moves), (0, 0, 0));
    assert_eq!(list.items(), before);
}

#[test]
fn appended_items_land_at_the_end() {
    let mut list = Harness::new("@identity", &[1, 2]);
    let before = list.items();

    let stats = list.update(&[1, 2, 3]);
    assert_eq!(list.text(), "123");
    assert_eq!(stats.inserts, 1);
    assert_eq!(&list.items()[..2], &before[..2]);
}

#[test]
fn unchanged_lists_touch_nothing() {
    let mut list = Harness::new("@identity", &[3, 1, 2]);
    let mutations = list.tree.mutations();
    let stats = list.update(&[3, 1, 2]);
    assert_eq!(stats.moves + stats.inserts + stats.deletes, 0);
    assert_eq!(list.tree.mutations(), mutations);
}

#[test]
fn emptied_and_refilled_lists_rebuild() {
    let mut list = Harness::new("@identity", &[1]);
    let stats = list.update(&[]);
    assert_eq!(stats.rebuilt, 1);
    assert_eq!(list.text(), "");

    let stats = list.update(&[4, 5]);
    assert_eq!(stats.rebuilt, 1);
    assert_eq!(list.text(), "45");
}

// ============================================================================
// reconcile
// ============================================================================

#[derive(Default)]
struct Keys {
    keys: Vec<u8>,
    deleting: bool,
    deletes_first: bool,
}

impl Keys {
    fn place(&mut self, key: u8, before: Option<&u8>) {
        let index = before
            .and_then(|b| self.keys.iter().position(|k| k == b))
            .unwrap_or(self.keys.len());
        self.keys.insert(index, key);
    }
}

impl ListDelegate<u8, ()> for Keys {
    fn insert(&mut self, key: &u8, (): &(), before: Option<&u8>) -> Result<()> {
        self.deleting = false;
        self.place(*key, before);
        Ok(())
    }

    fn retain(&mut self, _: &u8, (): &()) -> Result<()> {
        self.deleting = false;
        Ok(())
    }

    fn move_item(&mut self, key: &u8, (): &(), before: Option<&u8>) -> Result<()> {
        self.deleting = false;
        self.keys.retain(|k| k != key);
        self.place(*key, before);
        Ok(())
    }

    fn delete(&mut self, key: &u8) -> Result<()> {
        if !self.deleting {
            self.deletes_first = false;
        }
        self.keys.retain(|k| k != key);
        Ok(())
    }
}

fn unique_keys() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::hash_set(0u8..32, 0..12)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

proptest! {
    #[test]
    fn delegates_end_with_the_new_order(old in unique_keys(), new in unique_keys()) {
        let mut delegate = Keys {
            keys: old.clone(),
            deleting: true,
            deletes_first: true,
        };
        let items: Vec<(u8, ())> = new.iter().map(|&k| (k, ())).collect();
        reconcile(&old, &items, &mut delegate).unwrap();
        prop_assert_eq!(&delegate.keys, &new);
        prop_assert!(delegate.deletes_first);
    }
}
