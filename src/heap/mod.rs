use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::Rng;
use slab::Slab;

use crate::value::{List, Set};

pub mod collect;

pub use collect::Collector;

const KEY_BITS: u32 = 40;
const KEY_MASK: u64 = (1 << KEY_BITS) - 1;

// Handle to a list or set on the heap. A fact field holding 0 is nil,
// so handles are never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(NonZeroU64);

impl ObjRef {
    fn new(bucket: usize, key: usize) -> ObjRef {
        let raw = ((bucket as u64) << KEY_BITS) | ((key as u64 + 1) & KEY_MASK);
        match NonZeroU64::new(raw) {
            Some(r) => ObjRef(r),
            None => panic!("object key {} overflows its handle", key)
        }
    }

    pub fn from_raw(raw: u64) -> Option<ObjRef> {
        NonZeroU64::new(raw).map(ObjRef)
    }

    pub fn raw(self) -> u64 {
        self.0.get()
    }

    pub fn bucket(self) -> usize {
        (self.0.get() >> KEY_BITS) as usize
    }

    fn key(self) -> usize {
        ((self.0.get() & KEY_MASK) - 1) as usize
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.bucket(), self.key())
    }
}

#[derive(Debug)]
pub enum Object {
    List(List),
    Set(Set),
}

#[derive(Debug)]
struct Slot {
    obj: Object,
    marked: bool,
}

#[derive(Debug, Default)]
struct Counter {
    live: AtomicU64,
    // allocations since the last collection of this kind
    since: AtomicU64,
}

impl Counter {
    fn alloc(&self) {
        self.live.fetch_add(1, Ordering::Relaxed);
        self.since.fetch_add(1, Ordering::Relaxed);
    }

    fn free(&self, n: u64) {
        self.live.fetch_sub(n, Ordering::Relaxed);
    }
}

// List and set objects, sharded over one mutex protected
// bucket per worker.
#[derive(Debug)]
pub struct Heap {
    buckets: Box<[Mutex<Slab<Slot>>]>,
    lists: Counter,
    sets: Counter,
}

impl Heap {
    pub fn new(buckets: usize) -> Heap {
        Heap {
            buckets: (0..buckets.max(1)).map(|_| Mutex::new(Slab::new())).collect(),
            lists: Counter::default(),
            sets: Counter::default()
        }
    }

    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn alloc<R: Rng + ?Sized>(&self, obj: Object, rng: &mut R) -> ObjRef {
        match &obj {
            Object::List(_) => self.lists.alloc(),
            Object::Set(_) => self.sets.alloc(),
        }
        let bucket = rng.gen_range(0..self.buckets.len());
        let key = self.buckets[bucket].lock().insert(Slot { obj, marked: false });
        ObjRef::new(bucket, key)
    }

    pub fn alloc_list<R: Rng + ?Sized>(&self, list: List, rng: &mut R) -> ObjRef {
        self.alloc(Object::List(list), rng)
    }

    pub fn alloc_set<R: Rng + ?Sized>(&self, set: Set, rng: &mut R) -> ObjRef {
        self.alloc(Object::Set(set), rng)
    }

    fn with<T, F: FnOnce(&Object) -> T>(&self, r: ObjRef, f: F) -> T {
        let bucket = match self.buckets.get(r.bucket()) {
            Some(b) => b.lock(),
            None => panic!("object {} is outside the heap", r)
        };
        match bucket.get(r.key()) {
            Some(slot) => f(&slot.obj),
            None => panic!("object {} was already freed", r)
        }
    }

    pub fn list<T, F: FnOnce(&List) -> T>(&self, r: ObjRef, f: F) -> T {
        self.with(r, |o| match o {
            Object::List(l) => f(l),
            Object::Set(_) => panic!("object {} is a set, expected a list", r)
        })
    }

    pub fn set<T, F: FnOnce(&Set) -> T>(&self, r: ObjRef, f: F) -> T {
        self.with(r, |o| match o {
            Object::Set(s) => f(s),
            Object::List(_) => panic!("object {} is a list, expected a set", r)
        })
    }

    // the copy half of copy-on-write
    pub fn copy_list(&self, r: ObjRef) -> List {
        self.list(r, List::clone)
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        self.buckets.get(r.bucket())
            .map(|b| b.lock().contains(r.key()))
            .unwrap_or(false)
    }

    pub fn mark(&self, r: ObjRef) {
        let mut bucket = self.buckets[r.bucket()].lock();
        match bucket.get_mut(r.key()) {
            Some(slot) => slot.marked = true,
            None => panic!("marking freed object {}", r)
        }
    }

    // frees what was not marked among the selected kinds and
    // clears every mark. Returns (lists, sets) freed.
    pub fn sweep(&self, bucket: usize, lists: bool, sets: bool) -> (u64, u64) {
        let (mut fl, mut fs) = (0, 0);
        if let Some(b) = self.buckets.get(bucket) {
            b.lock().retain(|_, slot| {
                if slot.marked {
                    slot.marked = false;
                    return true;
                }
                match slot.obj {
                    Object::List(_) if lists => { fl += 1; false },
                    Object::Set(_) if sets => { fs += 1; false },
                    _ => true
                }
            });
        }
        self.lists.free(fl);
        self.sets.free(fs);
        (fl, fs)
    }

    pub fn live_lists(&self) -> u64 {
        self.lists.live.load(Ordering::Relaxed)
    }

    pub fn live_sets(&self) -> u64 {
        self.sets.live.load(Ordering::Relaxed)
    }

    pub fn lists_since(&self) -> u64 {
        self.lists.since.load(Ordering::Relaxed)
    }

    pub fn sets_since(&self) -> u64 {
        self.sets.since.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self, lists: bool, sets: bool) {
        if lists {
            self.lists.since.store(0, Ordering::Relaxed);
        }
        if sets {
            self.sets.since.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
pub mod test;
