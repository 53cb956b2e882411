//! Integration tests for iteration artifacts

use std::rc::Rc;

use trellis_foundation::{ErrorKind, Value};
use trellis_reactive::{
    IterationArtifacts, ItemKey, KeyFor, Reference, SourceReference, validate_tag, value_for_tag,
};

fn row(id: i64, label: &str) -> Value {
    Value::map_of([("id", Value::Int(id)), ("label", Value::from(label))])
}

#[test]
fn key_specifiers() {
    assert_eq!(KeyFor::parse("@index"), KeyFor::Index);
    assert_eq!(KeyFor::parse("@identity"), KeyFor::Identity);
    assert_eq!(KeyFor::parse(""), KeyFor::Identity);
    assert_eq!(KeyFor::parse("id"), KeyFor::Path("id".to_string()));
}

#[test]
fn retained_keys_keep_their_cells() {
    let source = SourceReference::new(Value::from(vec![row(1, "a"), row(2, "b")]));
    let artifacts = IterationArtifacts::new(source.to_ref(), KeyFor::parse("id"));
    assert!(artifacts.refresh().unwrap());
    let first = artifacts.items()[0].clone();
    let memo_snapshot = value_for_tag(&first.memo.tag());

    source.set(Value::from(vec![row(2, "b"), row(1, "A")]));
    assert!(artifacts.refresh().unwrap());
    let moved = artifacts.items()[1].clone();
    assert!(moved.value.ptr_eq(&first.value));
    assert_eq!(moved.value.peek().get_property("label"), Value::from("A"));
    assert_eq!(moved.memo.peek(), Value::Int(1));
    assert!(!validate_tag(&moved.memo.tag(), memo_snapshot));
}

#[test]
fn order_tag_ignores_content_only_changes() {
    let source = SourceReference::new(Value::from(vec![row(1, "a")]));
    let artifacts = IterationArtifacts::new(source.to_ref(), KeyFor::parse("id"));
    artifacts.refresh().unwrap();
    let order = value_for_tag(&artifacts.order_tag());
    let all = value_for_tag(&artifacts.refresh_tag());

    source.set(Value::from(vec![row(1, "changed")]));
    assert!(!artifacts.refresh().unwrap());
    assert!(validate_tag(&artifacts.order_tag(), order));
    assert!(!validate_tag(&artifacts.refresh_tag(), all));
}

#[test]
fn duplicate_identities_stay_distinct() {
    let source = SourceReference::new(Value::from(vec![7i64, 7, 8]));
    let artifacts = IterationArtifacts::new(source.to_ref(), KeyFor::Identity);
    artifacts.refresh().unwrap();
    let keys = artifacts.keys();
    assert_eq!(keys[0], ItemKey::new(7i64));
    assert_eq!(keys[1].key, Value::Int(7));
    assert_eq!(keys[1].occurrence, 1);
    assert_eq!(keys[2], ItemKey::new(8i64));
}

#[test]
fn nil_is_empty_and_scalars_are_rejected() {
    let source = SourceReference::new(Value::Nil);
    let artifacts = Rc::new(IterationArtifacts::new(source.to_ref(), KeyFor::Index));
    let non_empty = artifacts.non_empty_ref();
    assert_eq!(non_empty.value().unwrap(), Value::Bool(false));

    source.set(Value::from(vec!["x"]));
    assert_eq!(non_empty.value().unwrap(), Value::Bool(true));
    assert_eq!(artifacts.len(), 1);

    source.set(Value::Int(3));
    let err = artifacts.refresh().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { expected: "list", .. }));
}
