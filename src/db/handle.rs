use std::mem;
use std::sync::Arc;

use log::{debug, trace};

use crate::fact::Fact;
use crate::program::{AggOp, Props, TypeId};
use crate::value::Value;
use crate::vm::Machine;

use super::{Entry, Records};

impl Machine<'_> {
    // Stores (delta > 0) or retracts (delta < 0) a fact at this node
    // and runs whatever rule bodies that triggers.
    pub fn handle(&mut self, fact: Arc<Fact>, delta: i32) {
        let prog = self.prog;
        let ty = fact.ty();
        let desc = prog.ty(ty);
        let reserved = prog.reserved();
        trace!(target: "db", "node {}: {} ({:+})", self.node(), fact.show(prog, self.heap), delta);

        if Some(ty) == reserved.terminate {
            debug!(target: "db", "node {} terminates", self.node());
            self.db.terminate();
            return;
        }
        if Some(ty) == reserved.proved || Some(ty) == reserved.terminated {
            self.run(&fact, delta);
            return;
        }
        if desc.props.contains(Props::DELETE) {
            return self.delete(&fact, delta);
        }
        if desc.props.contains(Props::SCHEDULE) {
            debug!(target: "db", "node {}: schedule marker {}, {} ({:+})", self.node(),
                   fact.get(prog, 0), fact.get(prog, 1), delta);
            return;
        }
        if desc.props.contains(Props::PROVED) {
            self.prove(ty, delta);
        }

        if desc.agg.is_some() && !desc.is_linear() {
            self.aggregate(fact, delta)
        } else if desc.is_persistent() && desc.agg.is_none() {
            self.persistent(fact, delta)
        } else {
            self.plain(fact, delta)
        }
    }

    fn prove(&mut self, ty: TypeId, delta: i32) {
        let prog = self.prog;
        let total = self.db.add_proved(ty, delta);
        if let Some(proved) = prog.reserved().proved {
            let f = Fact::with(prog, proved, &[Value::Int(ty as i32), Value::Int(total)]);
            self.router.send(self.node(), self.node(), Arc::new(f), 1);
        }
    }

    fn persistent(&mut self, fact: Arc<Fact>, delta: i32) {
        let prog = self.prog;
        if delta < 0 {
            panic!("persistent fact {} cannot be retracted", fact.show(prog, self.heap));
        }
        let store = self.db.persistent_mut(fact.ty());
        if store.iter().any(|f| **f == *fact) {
            trace!(target: "db", "{} already known", fact.show(prog, self.heap));
            return;
        }
        store.push(fact.clone());
        self.run(&fact, delta);
    }

    // regular and linear facts, linear aggregates included
    fn plain(&mut self, fact: Arc<Fact>, delta: i32) {
        let prog = self.prog;
        let ty = fact.ty();
        let desc = prog.ty(ty);
        let queue = self.db.queue_mut(ty);

        if let Some(i) = queue.iter().position(|e| *e.fact == *fact) {
            let count = match &mut queue[i].records {
                Records::Count(c) => {
                    *c += delta;
                    *c
                },
                Records::Group(_) => panic!("{} is stored as an aggregate group", desc.name)
            };
            if count > 0 {
                return;
            }
            if desc.is_delta() {
                let old = queue.remove(i);
                self.db.retain(ty, old.fact);
                return;
            }
            let stored = queue[i].fact.clone();
            self.run(&stored, -1);
            let queue = self.db.queue_mut(ty);
            if let Some(i) = queue.iter().position(|e| *e.fact == *fact && e.count() <= 0) {
                queue.remove(i);
            }
            return;
        }

        // retracting something never stored
        if delta <= 0 {
            return;
        }
        queue.push(Entry { fact: fact.clone(), records: Records::Count(delta) });
        if desc.is_delta() {
            self.process_deltas(&fact);
        }
        self.run(&fact, delta);
    }

    fn aggregate(&mut self, fact: Arc<Fact>, delta: i32) {
        let prog = self.prog;
        let ty = fact.ty();
        let op = match prog.ty(ty).agg {
            Some(a) => a.op,
            None => panic!("{} is not an aggregate", prog.ty(ty).name)
        };

        let gi = match self.db.group_index(prog, &fact) {
            Some(gi) => gi,
            None => {
                if delta <= 0 {
                    return;
                }
                let rep = Arc::new((*fact).clone());
                let queue = self.db.queue_mut(ty);
                queue.push(Entry { fact: rep, records: Records::Group(vec![(fact, delta)]) });
                let gi = queue.len() - 1;
                self.recompute(ty, gi, true);
                let rep = self.db.queue(ty)[gi].fact.clone();
                self.run(&rep, 1);
                return;
            }
        };

        let members = self.db.queue_mut(ty)[gi].members_mut();
        match members.iter().position(|(f, _)| **f == *fact) {
            Some(mi) => {
                members[mi].1 += delta;
                if members[mi].1 > 0 {
                    return self.recompute(ty, gi, false);
                }
                members.remove(mi);
                if members.is_empty() {
                    let group = self.db.queue_mut(ty).remove(gi);
                    self.run(&group.fact, -1);
                } else {
                    self.recompute(ty, gi, false);
                }
            },
            // FIRST never moves once seeded
            None if delta <= 0 || op == AggOp::First => (),
            None => {
                members.push((fact, delta));
                self.recompute(ty, gi, false);
            }
        }
    }

    // a delete marker wipes every fact of the type in its field 0
    fn delete(&mut self, marker: &Fact, delta: i32) {
        let prog = self.prog;
        if delta < 0 {
            return;
        }
        let raw = marker.int(prog, 0);
        let target = match TypeId::try_from(raw) {
            Ok(t) if (t as usize) < prog.num_types() => prog.ty(t),
            _ => panic!("delete marker {} names unknown type {}", prog.ty(marker.ty()).name, raw)
        };
        if target.is_persistent() {
            panic!("delete marker {} targets persistent type {}", prog.ty(marker.ty()).name, target.name);
        }
        let entries = mem::take(self.db.queue_mut(target.id));
        debug!(target: "db", "node {} deletes {} facts of {}", self.node(), entries.len(), target.name);
        for e in entries {
            match e.records {
                Records::Count(_) if target.is_delta() => self.db.retain(target.id, e.fact),
                _ => {
                    self.run(&e.fact, -1);
                }
            }
        }
    }
}
