//! Integration tests for references

use std::cell::Cell;
use std::rc::Rc;

use trellis_foundation::{Error, ErrorKind, Value};
use trellis_reactive::{
    ComputeReference, Reference, SourceReference, const_ref, property_ref, track, untrack,
    validate_tag, value_for_tag,
};

#[test]
fn compute_runs_only_when_inputs_move() {
    let source = SourceReference::new(Value::Int(1));
    let input = source.clone();
    let doubled = ComputeReference::new(move || {
        let n = input.value()?.as_int().unwrap_or(0);
        Ok(Value::Int(n * 2))
    });

    assert_eq!(doubled.value().unwrap(), Value::Int(2));
    assert_eq!(doubled.value().unwrap(), Value::Int(2));
    assert_eq!(doubled.invocations(), 1);

    source.set(Value::Int(5));
    assert_eq!(doubled.value().unwrap(), Value::Int(10));
    assert_eq!(doubled.invocations(), 2);
}

#[test]
fn set_if_changed_leaves_equal_values_alone() {
    let source = SourceReference::new(Value::from("a"));
    let snapshot = value_for_tag(&source.tag());
    assert!(!source.set_if_changed(Value::from("a")));
    assert!(validate_tag(&source.tag(), snapshot));
    assert!(source.set_if_changed(Value::from("b")));
    assert!(!validate_tag(&source.tag(), snapshot));
}

#[test]
fn dependencies_follow_the_branch_taken() {
    let flag = SourceReference::new(Value::Bool(true));
    let left = SourceReference::new(Value::from("left"));
    let right = SourceReference::new(Value::from("right"));
    let (f, l, r) = (flag.clone(), left.clone(), right.clone());
    let chosen = ComputeReference::new(move || {
        if f.value()?.is_truthy() {
            l.value()
        } else {
            r.value()
        }
    });

    assert_eq!(chosen.value().unwrap(), Value::from("left"));
    right.set(Value::from("RIGHT"));
    chosen.value().unwrap();
    assert_eq!(chosen.invocations(), 1);

    flag.set(Value::Bool(false));
    assert_eq!(chosen.value().unwrap(), Value::from("RIGHT"));
    left.set(Value::from("LEFT"));
    chosen.value().unwrap();
    assert_eq!(chosen.invocations(), 2);
}

#[test]
fn reads_are_tracked_into_the_innermost_frame() {
    let source = SourceReference::new(Value::Int(0));
    let (_, tag) = track(|| source.value()).unwrap();
    let snapshot = value_for_tag(&tag);
    source.set(Value::Int(1));
    assert!(!validate_tag(&tag, snapshot));

    let (_, outer) = track(|| untrack(|| source.value()).unwrap()).unwrap();
    assert!(outer.is_constant());
}

#[test]
fn failures_are_not_cached() {
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let failing = ComputeReference::<Value>::new(move || {
        counter.set(counter.get() + 1);
        Err(Error::computation("nope"))
    });

    let err = failing.value().unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Computation(_)));
    assert!(failing.value().is_err());
    assert_eq!(calls.get(), 2);
}

#[test]
fn properties_of_constants_are_constant() {
    let person = const_ref(Value::map_of([("name", Value::from("Ada"))]));
    let name = property_ref(&person, "name").unwrap();
    assert!(name.is_const());
    assert_eq!(name.value().unwrap(), Value::from("Ada"));

    let source = SourceReference::new(Value::map_of([("name", Value::from("Ada"))]));
    let name = property_ref(&source.to_ref(), "name").unwrap();
    assert!(!name.is_const());
    source.set(Value::map_of([("name", Value::from("Grace"))]));
    assert_eq!(name.value().unwrap(), Value::from("Grace"));
}
