//! Integration tests for the relocatable heap

use trellis_foundation::Invariant;
use trellis_program::heap::EntryState;
use trellis_program::{Handle, Heap};

fn allocate(heap: &mut Heap, words: &[u32]) -> Handle {
    let handle = heap.malloc().unwrap();
    for &word in words {
        heap.push(word).unwrap();
    }
    heap.finish_malloc(handle).unwrap();
    handle
}

#[test]
fn allocations_are_contiguous() {
    let mut heap = Heap::new();
    let a = allocate(&mut heap, &[1, 2, 3]);
    let b = allocate(&mut heap, &[4]);
    assert_eq!(heap.getaddr(a).unwrap(), 0);
    assert_eq!(heap.getaddr(b).unwrap(), 3);
    assert_eq!(heap.sizeof(a).unwrap(), 3);
    assert_eq!(heap.words(b).unwrap(), &[4]);
    assert_eq!(heap.len(), 4);
}

#[test]
fn only_one_allocation_may_be_open() {
    let mut heap = Heap::new();
    let open = heap.malloc().unwrap();
    let err = heap.malloc().unwrap_err();
    assert_eq!(err.as_invariant(), Some(&Invariant::OpenAllocation));
    assert!(heap.free(open).is_err());
    assert!(heap.compact().is_err());
    heap.finish_malloc(open).unwrap();
    assert!(heap.push(9).is_err());
}

#[test]
fn compaction_slides_live_words_left() {
    let mut heap = Heap::new();
    let a = allocate(&mut heap, &[1, 1]);
    let b = allocate(&mut heap, &[2, 2, 2]);
    let c = allocate(&mut heap, &[3]);

    heap.free(b).unwrap();
    assert_eq!(heap.state(b), Some(EntryState::Freed));
    heap.compact().unwrap();

    assert_eq!(heap.state(b), Some(EntryState::Purged));
    assert_eq!(heap.len(), 3);
    assert_eq!(heap.getaddr(a).unwrap(), 0);
    assert_eq!(heap.getaddr(c).unwrap(), 2);
    assert_eq!(heap.words(c).unwrap(), &[3]);
    assert!(heap.getaddr(b).is_err());
}

#[test]
fn pointers_follow_their_allocation() {
    let mut heap = Heap::new();
    let a = allocate(&mut heap, &[1, 1]);
    let b = allocate(&mut heap, &[2, 2, 2]);
    let into_b = heap.alloc_pointer(4).unwrap();
    let into_a = heap.alloc_pointer(1).unwrap();

    heap.free(a).unwrap();
    heap.compact().unwrap();
    assert_eq!(heap.getaddr(into_b).unwrap(), 2);
    assert_eq!(heap.get(heap.getaddr(into_b).unwrap()).unwrap(), 2);
    assert_eq!(heap.getaddr(b).unwrap(), 0);
    assert!(heap.getaddr(into_a).is_err());
}

#[test]
fn addresses_map_back_to_handles() {
    let mut heap = Heap::new();
    let a = allocate(&mut heap, &[1, 1]);
    let b = allocate(&mut heap, &[2, 2, 2]);
    assert_eq!(heap.handle_at(1), Some((a, 1)));
    assert_eq!(heap.handle_at(2), Some((b, 0)));
    assert_eq!(heap.handle_at(5), None);

    heap.free(a).unwrap();
    assert_eq!(heap.handle_at(0), None);
}

#[test]
fn double_free_is_rejected() {
    let mut heap = Heap::new();
    let a = allocate(&mut heap, &[1]);
    heap.free(a).unwrap();
    let err = heap.free(a).unwrap_err();
    assert_eq!(err.as_invariant(), Some(&Invariant::InvalidHandle(a.raw())));
}
