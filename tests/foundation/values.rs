//! Integration tests for Value types
//!
//! Tests truthiness, text rendering, property access, and structural equality.

use std::collections::HashSet;

use trellis_foundation::collections::{LtMap, LtVec};
use trellis_foundation::{NodeId, Value};

// =============================================================================
// Truthiness
// =============================================================================

#[test]
fn falsy_values() {
    for value in [
        Value::Nil,
        Value::Bool(false),
        Value::Int(0),
        Value::Float(0.0),
        Value::Float(f64::NAN),
        Value::from(""),
        Value::Vec(LtVec::new()),
    ] {
        assert!(!value.is_truthy(), "{value:?} should be falsy");
    }
}

#[test]
fn maps_and_nodes_are_truthy() {
    assert!(Value::Map(LtMap::new()).is_truthy());
    assert!(Value::Node(NodeId::new(0)).is_truthy());
    assert!(Value::from(vec![Value::Nil]).is_truthy());
}

// =============================================================================
// Text
// =============================================================================

#[test]
fn text_rendering() {
    assert_eq!(Value::Nil.to_text(), "");
    assert_eq!(Value::from("plain").to_text(), "plain");
    assert_eq!(Value::Int(-3).to_text(), "-3");
    assert_eq!(Value::Bool(true).to_text(), "true");
    assert_eq!(Value::from(vec![1i64, 2]).to_text(), "[1 2]");
    assert_eq!(Value::Node(NodeId::new(9)).to_text(), "#9");
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn property_access() {
    let person = Value::map_of([("name", Value::from("Ada")), ("age", Value::Int(36))]);
    assert_eq!(person.get_property("name").as_str(), Some("Ada"));
    assert_eq!(person.get_property("age").as_int(), Some(36));
    assert!(person.get_property("missing").is_nil());
    assert!(Value::Int(1).get_property("name").is_nil());
}

#[test]
fn maps_are_persistent() {
    let original = Value::map_of([("a", Value::Int(1))]);
    let map = original.as_map().unwrap();
    let updated = Value::Map(map.insert(Value::from("a"), Value::Int(2)));
    assert_eq!(original.get_property("a"), Value::Int(1));
    assert_eq!(updated.get_property("a"), Value::Int(2));
}

// =============================================================================
// Equality and Hashing
// =============================================================================

#[test]
fn floats_compare_by_bits() {
    assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    assert_ne!(Value::Int(1), Value::Float(1.0));
}

#[test]
fn values_hash_structurally() {
    let mut set = HashSet::new();
    set.insert(Value::from(vec![1i64, 2]));
    set.insert(Value::from(vec![1i64, 2]));
    set.insert(Value::map_of([("k", Value::Nil)]));
    set.insert(Value::map_of([("k", Value::Nil)]));
    assert_eq!(set.len(), 2);
}

#[test]
fn type_names() {
    assert_eq!(Value::Nil.type_name(), "nil");
    assert_eq!(Value::from("x").type_name(), "string");
    assert_eq!(Value::Node(NodeId::new(1)).type_name(), "node");
    assert_eq!(Value::from(vec![Value::Nil]).type_name(), "list");
}
