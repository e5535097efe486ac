use std::fmt::Write;
use std::sync::Arc;

use crate::fact::{Fact, NodeId};
use crate::heap::Heap;
use crate::program::{Program, TypeId};

pub mod aggregate;
pub mod delta;
pub mod handle;

#[derive(Debug, Clone)]
pub enum Records {
    // how many derivations support the fact
    Count(i32),
    // aggregate group: the contributors, in storage order
    Group(Vec<(Arc<Fact>, i32)>),
}

#[derive(Debug, Clone)]
pub struct Entry {
    // for a group, the representative holding the accumulator
    pub fact: Arc<Fact>,
    pub records: Records,
}

impl Entry {
    pub fn count(&self) -> i32 {
        match &self.records {
            Records::Count(c) => *c,
            Records::Group(_) => 1
        }
    }

    pub fn members(&self) -> &[(Arc<Fact>, i32)] {
        match &self.records {
            Records::Group(m) => m,
            Records::Count(_) => panic!("entry is not an aggregate group")
        }
    }

    pub(crate) fn members_mut(&mut self) -> &mut Vec<(Arc<Fact>, i32)> {
        match &mut self.records {
            Records::Group(m) => m,
            Records::Count(_) => panic!("entry is not an aggregate group")
        }
    }
}

#[derive(Debug, Clone)]
pub enum Store {
    // append only, deduplicated
    Persistent(Vec<Arc<Fact>>),
    Queue(Vec<Entry>),
}

// One node's facts, per type. Only ever touched by the worker that
// owns the node, so nothing in here is locked.
#[derive(Debug)]
pub struct NodeDb {
    id: NodeId,
    stores: Vec<Store>,
    snapshots: Vec<Option<Arc<Fact>>>,
    proved: Vec<i32>,
    terminated: bool,
}

impl NodeDb {
    pub fn new(prog: &Program, id: NodeId) -> NodeDb {
        let stores = prog.types().iter().map(|t| {
            if t.is_persistent() && t.agg.is_none() {
                Store::Persistent(Vec::new())
            } else {
                Store::Queue(Vec::new())
            }
        }).collect();
        NodeDb {
            id, stores,
            snapshots: vec![None; prog.num_types()],
            proved: vec![0; prog.num_types()],
            terminated: false
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn terminate(&mut self) {
        self.terminated = true;
    }

    fn store(&self, ty: TypeId) -> &Store {
        match self.stores.get(ty as usize) {
            Some(s) => s,
            None => panic!("unknown type id {}", ty)
        }
    }

    pub(crate) fn queue_mut(&mut self, ty: TypeId) -> &mut Vec<Entry> {
        match self.stores.get_mut(ty as usize) {
            Some(Store::Queue(q)) => q,
            Some(Store::Persistent(_)) => panic!("type {} is persistent", ty),
            None => panic!("unknown type id {}", ty)
        }
    }

    pub(crate) fn persistent_mut(&mut self, ty: TypeId) -> &mut Vec<Arc<Fact>> {
        match self.stores.get_mut(ty as usize) {
            Some(Store::Persistent(p)) => p,
            Some(Store::Queue(_)) => panic!("type {} is not persistent", ty),
            None => panic!("unknown type id {}", ty)
        }
    }

    pub fn queue(&self, ty: TypeId) -> &[Entry] {
        match self.store(ty) {
            Store::Queue(q) => q,
            Store::Persistent(_) => &[]
        }
    }

    pub fn persistent(&self, ty: TypeId) -> &[Arc<Fact>] {
        match self.store(ty) {
            Store::Persistent(p) => p,
            Store::Queue(_) => &[]
        }
    }

    // every fact of a type currently visible to ITERATE
    pub fn snapshot(&self, ty: TypeId) -> Vec<Arc<Fact>> {
        match self.store(ty) {
            Store::Persistent(p) => p.clone(),
            Store::Queue(q) => q.iter().map(|e| e.fact.clone()).collect()
        }
    }

    // number of distinct stored facts (or groups) of a type
    pub fn len(&self, ty: TypeId) -> usize {
        match self.store(ty) {
            Store::Persistent(p) => p.len(),
            Store::Queue(q) => q.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stores.iter().all(|s| match s {
            Store::Persistent(p) => p.is_empty(),
            Store::Queue(q) => q.is_empty()
        })
    }

    // multiplicity of a stored fact, None if absent
    pub fn count(&self, fact: &Fact) -> Option<i32> {
        match self.store(fact.ty()) {
            Store::Persistent(p) => p.iter().any(|f| **f == *fact).then_some(1),
            Store::Queue(q) => q.iter().find(|e| *e.fact == *fact).map(|e| e.count())
        }
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.count(fact).is_some()
    }

    // the group whose key prefix `fact` shares
    pub fn group(&self, prog: &Program, fact: &Fact) -> Option<&Entry> {
        let key = prog.ty(fact.ty()).key_len();
        self.queue(fact.ty()).iter().find(|e| e.fact.prefix_eq(fact, key))
    }

    pub(crate) fn group_index(&self, prog: &Program, fact: &Fact) -> Option<usize> {
        let key = prog.ty(fact.ty()).key_len();
        self.queue(fact.ty()).iter().position(|e| e.fact.prefix_eq(fact, key))
    }

    pub fn retained(&self, ty: TypeId) -> Option<&Arc<Fact>> {
        self.snapshots.get(ty as usize).and_then(|s| s.as_ref())
    }

    pub(crate) fn retain(&mut self, ty: TypeId, fact: Arc<Fact>) {
        self.snapshots[ty as usize] = Some(fact);
    }

    pub(crate) fn take_retained(&mut self, ty: TypeId) -> Option<Arc<Fact>> {
        self.snapshots[ty as usize].take()
    }

    pub fn proved(&self, ty: TypeId) -> i32 {
        self.proved[ty as usize]
    }

    pub(crate) fn add_proved(&mut self, ty: TypeId, delta: i32) -> i32 {
        let p = &mut self.proved[ty as usize];
        *p += delta;
        *p
    }

    // marks every list and set reachable from this node's facts
    pub fn trace(&self, prog: &Program, heap: &Heap) {
        for store in self.stores.iter() {
            match store {
                Store::Persistent(p) => for f in p.iter() {
                    trace_fact(prog, heap, f, false);
                },
                Store::Queue(q) => for e in q.iter() {
                    let grouped = matches!(e.records, Records::Group(_));
                    trace_fact(prog, heap, &e.fact, grouped);
                    if let Records::Group(members) = &e.records {
                        for (f, _) in members.iter() {
                            trace_fact(prog, heap, f, false);
                        }
                    }
                }
            }
        }
        for f in self.snapshots.iter().flatten() {
            trace_fact(prog, heap, f, false);
        }
    }

    pub fn dump(&self, prog: &Program, heap: &Heap) -> String {
        let mut s = format!("node {}:\n", self.id);
        for (ty, store) in self.stores.iter().enumerate() {
            let ty = ty as TypeId;
            match store {
                Store::Persistent(p) => for f in p.iter() {
                    let _ = writeln!(s, "  {}", f.show(prog, heap));
                },
                Store::Queue(q) => for e in q.iter() {
                    match &e.records {
                        Records::Count(c) => {
                            let _ = writeln!(s, "  {} x{}", e.fact.show(prog, heap), c);
                        },
                        Records::Group(m) => {
                            let _ = writeln!(s, "  {} ({} contributors)", e.fact.show(prog, heap), m.len());
                        }
                    }
                }
            }
            if let Some(f) = self.retained(ty) {
                let _ = writeln!(s, "  [retained] {}", f.show(prog, heap));
            }
        }
        s
    }
}

// Set union contributors carry a bare element where the set goes,
// only the group representative holds a real set.
pub fn trace_fact(prog: &Program, heap: &Heap, fact: &Fact, representative: bool) {
    let skip = match prog.ty(fact.ty()).agg {
        Some(a) if a.op.is_set_union() && !representative => Some(a.field),
        _ => None
    };
    for (i, r) in fact.objects(prog) {
        if Some(i) != skip {
            heap.mark(r);
        }
    }
    for f in fact.nested() {
        trace_fact(prog, heap, f, false);
    }
}

#[cfg(test)]
pub mod test;
