//! Integration tests for tags and the revision clock

use trellis_reactive::revision;
use trellis_reactive::{DirtyableTag, Tag, UpdatableTag, combine, validate_tag, value_for_tag};

#[test]
fn dirtying_advances_the_clock() {
    let tag = DirtyableTag::new();
    let snapshot = value_for_tag(&tag.tag());
    let before = revision::current();

    tag.dirty();
    assert!(revision::current() > before);
    assert!(!validate_tag(&tag.tag(), snapshot));
    assert_eq!(value_for_tag(&tag.tag()), revision::current());
}

#[test]
fn reading_never_advances_the_clock() {
    let tag = DirtyableTag::new();
    let combined = combine([tag.tag(), Tag::constant()]);
    let before = revision::current();
    for _ in 0..3 {
        let _ = value_for_tag(&combined);
    }
    assert_eq!(revision::current(), before);
}

#[test]
fn combined_tags_follow_their_newest_input() {
    let a = DirtyableTag::new();
    let b = DirtyableTag::new();
    let both = combine([a.tag(), b.tag()]);
    let snapshot = value_for_tag(&both);

    b.dirty();
    assert!(!validate_tag(&both, snapshot));
    assert_eq!(value_for_tag(&both), value_for_tag(&b.tag()));
}

#[test]
fn constant_inputs_drop_out_of_combinations() {
    let combined = combine([Tag::constant(), Tag::constant()]);
    assert!(combined.is_constant());

    let live = DirtyableTag::new();
    let single = combine([Tag::constant(), live.tag()]);
    assert!(single.ptr_eq(&live.tag()));
}

#[test]
fn volatile_tags_never_validate() {
    let tag = combine([Tag::volatile(), DirtyableTag::new().tag()]);
    assert!(!validate_tag(&tag, value_for_tag(&tag)));
}

#[test]
fn swapping_updatable_inputs_is_not_a_change() {
    let old = DirtyableTag::new();
    let new = DirtyableTag::new();
    let updatable = UpdatableTag::new();
    updatable.update(old.tag());
    let snapshot = value_for_tag(&updatable.tag());

    // `new` was dirtied before the swap, so its revision is already past the snapshot.
    new.dirty();
    updatable.update(new.tag());
    assert!(validate_tag(&updatable.tag(), snapshot));

    old.dirty();
    assert!(validate_tag(&updatable.tag(), snapshot));

    new.dirty();
    assert!(!validate_tag(&updatable.tag(), snapshot));
}

#[test]
fn dirtying_an_updatable_tag_invalidates_it() {
    let updatable = UpdatableTag::new();
    let snapshot = value_for_tag(&updatable.tag());
    updatable.dirty();
    assert!(!validate_tag(&updatable.tag(), snapshot));
}
