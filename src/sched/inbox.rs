use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::db::trace_fact;
use crate::fact::{Fact, NodeId};
use crate::heap::Heap;
use crate::program::Program;
use crate::vm::Router;

#[derive(Debug, Default)]
struct Pending {
    fifo: VecDeque<(Arc<Fact>, i32)>,
    // stratified arrivals, lowest round first once the fifo is drained
    strata: BTreeMap<u8, VecDeque<(Arc<Fact>, i32)>>,
    closed: bool,
}

// A node's arrival queue. Anyone may push, only the owning
// worker pops.
#[derive(Debug, Default)]
pub struct Inbox {
    pending: Mutex<Pending>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    // false once the node has terminated
    pub fn push(&self, fact: Arc<Fact>, delta: i32, round: u8) -> bool {
        let mut p = self.pending.lock();
        if p.closed {
            return false;
        }
        if round == 0 {
            p.fifo.push_back((fact, delta));
        } else {
            p.strata.entry(round).or_default().push_back((fact, delta));
        }
        true
    }

    pub fn pop(&self) -> Option<(Arc<Fact>, i32)> {
        let mut p = self.pending.lock();
        if let Some(f) = p.fifo.pop_front() {
            return Some(f);
        }
        let mut stratum = p.strata.first_entry()?;
        let f = stratum.get_mut().pop_front();
        if stratum.get().is_empty() {
            stratum.remove();
        }
        f
    }

    pub fn len(&self) -> usize {
        let p = self.pending.lock();
        p.fifo.len() + p.strata.values().map(|q| q.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // drops everything queued, returns how many were dropped
    pub fn close(&self) -> usize {
        let mut p = self.pending.lock();
        p.closed = true;
        let n = p.fifo.len() + p.strata.values().map(|q| q.len()).sum::<usize>();
        p.fifo.clear();
        p.strata.clear();
        n
    }

    pub fn trace(&self, prog: &Program, heap: &Heap) {
        let p = self.pending.lock();
        for (f, _) in p.fifo.iter().chain(p.strata.values().flatten()) {
            trace_fact(prog, heap, f, false);
        }
    }
}

// Every node's inbox plus the count of facts not yet fully handled.
// A count of zero means the run is over.
pub struct Mailboxes<'a> {
    prog: &'a Program,
    inboxes: Vec<Inbox>,
    inflight: AtomicUsize,
}

impl<'a> Mailboxes<'a> {
    pub fn new(prog: &'a Program, nodes: usize) -> Self {
        Mailboxes {
            prog,
            inboxes: (0..nodes).map(|_| Inbox::new()).collect(),
            inflight: AtomicUsize::new(0)
        }
    }

    pub fn inbox(&self, node: NodeId) -> &Inbox {
        match self.inboxes.get(node as usize) {
            Some(i) => i,
            None => panic!("no such node {}", node)
        }
    }

    pub fn push(&self, to: NodeId, fact: Arc<Fact>, delta: i32) {
        let round = self.prog.ty(fact.ty()).round;
        // counted before it becomes visible to the owner
        self.inflight.fetch_add(1, Ordering::SeqCst);
        if !self.inbox(to).push(fact, delta, round) {
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            trace!(target: "sched", "node {} has terminated, dropping", to);
        }
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }

    pub fn finished(&self, n: usize) {
        self.inflight.fetch_sub(n, Ordering::SeqCst);
    }
}

impl Router for Mailboxes<'_> {
    fn send(&self, _from: NodeId, to: NodeId, fact: Arc<Fact>, delta: i32) {
        self.push(to, fact, delta);
    }
}
