use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};

use log::debug;

use crate::config::GcMode;

use super::Heap;

// Stop-the-world mark and sweep over the list/set heap.
// Every worker has to call `collect` once a collection is
// requested, the barriers line them up.
pub struct Collector {
    heap: Arc<Heap>,
    mode: GcMode,
    workers: usize,
    initial: Barrier,
    marked: Barrier,
    swept: Barrier,
    done: Barrier,
    requested: AtomicBool,
    cycles: AtomicU64,
    collections: AtomicU64,
}

impl Collector {
    pub fn new(heap: Arc<Heap>, mode: GcMode, workers: usize) -> Self {
        let workers = workers.max(1);
        Collector {
            heap, mode, workers,
            initial: Barrier::new(workers),
            marked: Barrier::new(workers),
            swept: Barrier::new(workers),
            done: Barrier::new(workers),
            requested: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            collections: AtomicU64::new(0)
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // Counts one handled fact. Only the leader counts, as only
    // it drives the cycle based trigger.
    pub fn cycle(&self, worker: usize) {
        if worker == 0 {
            self.cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Safepoint check after handling a fact, may raise the request.
    // Must only be called while the caller still holds work, so no
    // other worker can have finished the run in the meantime.
    pub fn poll(&self) -> bool {
        let over = match self.mode {
            GcMode::Disabled => false,
            GcMode::Allocations(threshold) =>
                self.heap.lists_since() > threshold || self.heap.sets_since() > threshold,
            GcMode::Cycles(n) => self.cycles.load(Ordering::Relaxed) >= n
        };
        if over {
            self.requested.store(true, Ordering::SeqCst);
        }
        self.requested()
    }

    // read only check for idle workers
    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    fn kinds(&self) -> (bool, bool) {
        match self.mode {
            GcMode::Allocations(threshold) => {
                let lists = self.heap.lists_since() > threshold;
                let sets = self.heap.sets_since() > threshold;
                if lists || sets { (lists, sets) } else { (true, true) }
            },
            _ => (true, true)
        }
    }

    // `mark` walks the roots this worker owns
    pub fn collect<F: FnOnce(&Heap)>(&self, worker: usize, mark: F) {
        self.initial.wait();
        // nobody allocates until the sweep, so every worker
        // reads the same counters here
        let (lists, sets) = self.kinds();
        mark(&self.heap);
        self.marked.wait();

        let (fl, fs) = self.heap.sweep(worker, lists, sets);
        debug!(target: "gc", "worker {} freed {} lists, {} sets", worker, fl, fs);
        if worker == 0 {
            // buckets without a worker of their own
            for b in self.workers..self.heap.buckets() {
                self.heap.sweep(b, lists, sets);
            }
        }
        self.swept.wait();

        if worker == 0 {
            self.heap.reset(lists, sets);
            self.cycles.store(0, Ordering::Relaxed);
            self.requested.store(false, Ordering::SeqCst);
            let n = self.collections.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(target: "gc", "collection {} done, {} lists and {} sets live",
                   n, self.heap.live_lists(), self.heap.live_sets());
        }
        self.done.wait();
    }
}
