use std::sync::Arc;
use std::thread;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::*;
use crate::config::GcMode;
use crate::value::{ListKind, SetKind, Value};

use test_log::test;

fn rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(11)
}

fn list(heap: &Heap, r: ObjRef) -> Vec<i32> {
    heap.list(r, |l| l.values().map(|v| v.as_int()).collect())
}

#[test]
fn test_alloc_and_sweep_unmarked() {
    let heap = Heap::new(4);
    let mut rng = rng();
    let a = heap.alloc_list(List::from_ints([1, 2]), &mut rng);
    let mut s = Set::new(SetKind::Int);
    s.insert(&Value::Int(7));
    let b = heap.alloc_set(s, &mut rng);
    assert!(a.bucket() < 4);
    assert_eq!(list(&heap, a), vec![1, 2]);
    assert_eq!(heap.set(b, |s| s.len()), 1);
    assert_eq!((heap.live_lists(), heap.live_sets()), (1, 1));

    heap.mark(b);
    for bucket in 0..heap.buckets() {
        heap.sweep(bucket, true, true);
    }
    assert!(!heap.contains(a));
    assert!(heap.contains(b));
    assert_eq!(heap.live_lists(), 0);
    // allocation counts only drop when a collection resets them
    assert_eq!(heap.lists_since(), 1);
}

#[test]
fn test_handles_round_trip_and_never_zero() {
    let heap = Heap::new(2);
    let mut rng = rng();
    for _ in 0..32 {
        let r = heap.alloc_list(List::new(ListKind::Int), &mut rng);
        assert_ne!(r.raw(), 0);
        assert_eq!(ObjRef::from_raw(r.raw()), Some(r));
    }
    assert_eq!(ObjRef::from_raw(0), None);
}

#[test]
#[should_panic(expected = "already freed")]
fn test_use_after_sweep() {
    let heap = Heap::new(1);
    let a = heap.alloc_list(List::from_ints([1]), &mut rng());
    heap.sweep(0, true, false);
    list(&heap, a);
}

#[test]
#[should_panic(expected = "marking freed object")]
fn test_mark_after_sweep() {
    let heap = Heap::new(1);
    let a = heap.alloc_list(List::from_ints([1]), &mut rng());
    heap.sweep(0, true, false);
    heap.mark(a);
}

#[test]
fn test_sweep_keeps_marked() {
    let heap = Heap::new(1);
    let mut rng = rng();
    let keep = heap.alloc_list(List::from_ints([1, 2, 3]), &mut rng);
    let gone = heap.alloc_list(List::from_ints([4]), &mut rng);
    heap.mark(keep);
    assert_eq!(heap.sweep(0, true, true), (1, 0));
    assert!(heap.contains(keep));
    assert!(!heap.contains(gone));
    assert_eq!(list(&heap, keep), vec![1, 2, 3]);

    // marks do not survive a sweep
    assert_eq!(heap.sweep(0, true, true), (1, 0));
    assert!(!heap.contains(keep));
}

#[test]
fn test_sweep_by_kind() {
    let heap = Heap::new(1);
    let mut rng = rng();
    let l = heap.alloc_list(List::from_ints([1]), &mut rng);
    let s = heap.alloc_set(Set::new(SetKind::Float), &mut rng);
    assert_eq!(heap.sweep(0, false, true), (0, 1));
    assert!(heap.contains(l));
    assert!(!heap.contains(s));
}

#[test]
fn test_poll_thresholds() {
    let heap = Arc::new(Heap::new(1));
    let gc = Collector::new(heap.clone(), GcMode::Allocations(2), 1);
    let mut rng = rng();
    heap.alloc_list(List::from_ints([1]), &mut rng);
    heap.alloc_list(List::from_ints([2]), &mut rng);
    assert!(!gc.poll());
    let kept = heap.alloc_list(List::from_ints([3]), &mut rng);
    assert!(gc.poll());
    assert!(gc.requested());

    gc.collect(0, |h| h.mark(kept));
    assert!(!gc.requested());
    assert_eq!(gc.collections(), 1);
    assert_eq!(heap.lists_since(), 0);
    assert_eq!(heap.live_lists(), 1);
    assert_eq!(list(&heap, kept), vec![3]);
}

#[test]
fn test_cycle_mode() {
    let heap = Arc::new(Heap::new(2));
    let gc = Collector::new(heap, GcMode::Cycles(3), 2);
    for _ in 0..5 {
        // only the leader's cycles count
        gc.cycle(1);
    }
    assert!(!gc.poll());
    for _ in 0..3 {
        gc.cycle(0);
    }
    assert!(gc.poll());

    let disabled = Collector::new(Arc::new(Heap::new(1)), GcMode::Disabled, 1);
    disabled.heap().alloc_list(List::from_ints([1]), &mut rng());
    assert!(!disabled.poll());
}

#[test]
fn test_parallel_collection() {
    const WORKERS: usize = 3;
    let heap = Arc::new(Heap::new(WORKERS));
    let gc = Collector::new(heap.clone(), GcMode::default(), WORKERS);
    let mut rng = rng();

    // every worker owns one root, the rest is garbage
    let roots : Vec<ObjRef> = (0..WORKERS as i32)
        .map(|i| heap.alloc_list(List::from_ints([i, i]), &mut rng))
        .collect();
    let garbage : Vec<ObjRef> = (0..50)
        .map(|i| heap.alloc_list(List::from_ints([i]), &mut rng))
        .collect();

    thread::scope(|s| {
        for (w, root) in roots.iter().enumerate() {
            let gc = &gc;
            let root = *root;
            s.spawn(move || gc.collect(w, |h| h.mark(root)));
        }
    });

    assert_eq!(gc.collections(), 1);
    for (i, r) in roots.iter().enumerate() {
        assert_eq!(list(&heap, *r), vec![i as i32, i as i32]);
    }
    assert!(garbage.iter().all(|g| !heap.contains(*g)));
    assert_eq!(heap.live_lists(), WORKERS as u64);
}
