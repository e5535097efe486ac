use std::sync::Arc;

use log::trace;
use rand::RngCore;

use crate::fact::Fact;
use crate::heap::Heap;
use crate::program::{AggOp, AggSpec, Program, TypeId};
use crate::value::{List, ListKind, Set, SetKind, Value};
use crate::vm::Machine;

// The running value of an aggregate while a group is folded
#[derive(Debug, Clone)]
pub enum Acc {
    Int(i32),
    Float(f32),
    // FIRST keeps whatever the first contributor holds, handles included
    First(Value),
    Set(Set),
    List(List),
}

fn list_of(prog: &Program, heap: &Heap, spec: AggSpec, fact: &Fact) -> List {
    match fact.get(prog, spec.field) {
        Value::List(r) => heap.copy_list(r),
        Value::Nil => match spec.op {
            AggOp::SumListFloat => List::new(ListKind::Float),
            _ => List::new(ListKind::Int)
        },
        v => panic!("{:?} aggregates a list field holding {:?}", spec.op, v)
    }
}

impl Acc {
    // the value a group with a single contributor folds to
    pub fn seed(prog: &Program, heap: &Heap, spec: AggSpec, fact: &Fact, count: i32) -> Acc {
        use AggOp::*;
        match spec.op {
            First => Acc::First(fact.get(prog, spec.field)),
            MaxInt | MinInt => Acc::Int(fact.int(prog, spec.field)),
            SumInt => Acc::Int(fact.int(prog, spec.field).wrapping_mul(count)),
            MaxFloat | MinFloat => Acc::Float(fact.float(prog, spec.field)),
            SumFloat => Acc::Float(fact.float(prog, spec.field) * count as f32),
            SetUnionInt | SetUnionFloat => {
                let kind = if spec.op == SetUnionInt { SetKind::Int } else { SetKind::Float };
                let mut s = Set::new(kind);
                s.insert(&fact.elem(prog, spec.field));
                Acc::Set(s)
            },
            SumListInt | SumListFloat => {
                let mut l = list_of(prog, heap, spec, fact);
                l.scale(count);
                Acc::List(l)
            }
        }
    }

    // Folds in one more contributor. True when the contributor
    // took over the value, which makes it the group's target.
    pub fn fold(&mut self, prog: &Program, heap: &Heap, spec: AggSpec, fact: &Fact, count: i32) -> bool {
        use AggOp::*;
        match (spec.op, self) {
            (First, _) => false,
            (MaxInt, Acc::Int(a)) => replace(a, fact.int(prog, spec.field), |n, a| n > a),
            (MinInt, Acc::Int(a)) => replace(a, fact.int(prog, spec.field), |n, a| n < a),
            (SumInt, Acc::Int(a)) => {
                *a = a.wrapping_add(fact.int(prog, spec.field).wrapping_mul(count));
                false
            },
            (MaxFloat, Acc::Float(a)) => replace(a, fact.float(prog, spec.field), |n, a| n > a),
            (MinFloat, Acc::Float(a)) => replace(a, fact.float(prog, spec.field), |n, a| n < a),
            (SumFloat, Acc::Float(a)) => {
                *a += fact.float(prog, spec.field) * count as f32;
                false
            },
            (SetUnionInt | SetUnionFloat, Acc::Set(s)) => {
                s.insert(&fact.elem(prog, spec.field));
                false
            },
            (SumListInt | SumListFloat, Acc::List(l)) => {
                match fact.get(prog, spec.field) {
                    Value::List(r) => heap.list(r, |o| l.add_scaled(o, count)),
                    _ => l.add_scaled(&list_of(prog, heap, spec, fact), count)
                }
                false
            },
            (op, acc) => panic!("{:?} cannot fold into {:?}", op, acc)
        }
    }

    // does this differ from what the representative holds now
    pub fn changed(&self, heap: &Heap, old: &Value) -> bool {
        match (self, old) {
            (Acc::First(_), _) => false,
            (Acc::Int(a), Value::Int(b)) => a != b,
            (Acc::Float(a), Value::Float(b)) => a != b,
            (Acc::Set(s), Value::Set(r)) => heap.set(*r, |o| o != s),
            (Acc::Set(s), Value::Nil) => !s.is_empty(),
            (Acc::List(l), Value::List(r)) => heap.list(*r, |o| o != l),
            (Acc::List(l), Value::Nil) => !l.is_empty(),
            _ => true
        }
    }

    // writes the value into the representative, allocating sets and lists
    pub fn install(self, prog: &Program, heap: &Heap, rng: &mut dyn RngCore,
                   fact: &mut Fact, field: usize) {
        let v = match self {
            Acc::First(v) => v,
            Acc::Int(i) => Value::Int(i),
            Acc::Float(f) => Value::Float(f),
            Acc::Set(s) => Value::Set(heap.alloc_set(s, rng)),
            Acc::List(l) if l.is_empty() => Value::Nil,
            Acc::List(l) => Value::List(heap.alloc_list(l, rng)),
        };
        fact.set(prog, field, &v);
    }
}

fn replace<T: Copy, F: Fn(T, T) -> bool>(acc: &mut T, next: T, wins: F) -> bool {
    if wins(next, *acc) {
        *acc = next;
        true
    } else {
        false
    }
}

impl Machine<'_> {
    // Refolds group `gi` of `ty` from its contributors and, when the
    // value moved, retracts and rederives the representative.
    pub(crate) fn recompute(&mut self, ty: TypeId, gi: usize, first: bool) {
        let prog = self.prog;
        let heap = self.heap;
        let desc = prog.ty(ty);
        let spec = match desc.agg {
            Some(a) => a,
            None => panic!("{} is not an aggregate", desc.name)
        };
        let entry = &self.db.queue(ty)[gi];
        let (acc, target) = {
            let members = entry.members();
            let (head, count) = match members.first() {
                Some(m) => m,
                None => panic!("aggregate group of {} has no contributors", desc.name)
            };
            let mut acc = Acc::seed(prog, heap, spec, head, *count);
            let mut target = head.clone();
            for (f, c) in members[1..].iter() {
                if acc.fold(prog, heap, spec, f, *c) {
                    target = f.clone();
                }
            }
            (acc, target)
        };
        let rep = entry.fact.clone();

        if first {
            let mut f = (*rep).clone();
            acc.install(prog, heap, &mut *self.rng, &mut f, spec.field);
            self.db.queue_mut(ty)[gi].fact = Arc::new(f);
            return;
        }
        if !acc.changed(heap, &rep.get(prog, spec.field)) {
            trace!(target: "db", "{} unchanged", rep.show(prog, heap));
            return;
        }

        self.run(&rep, -1);
        // the old accumulator stays on the heap until nothing
        // references it anymore
        let mut f = (*rep).clone();
        acc.install(prog, heap, &mut *self.rng, &mut f, spec.field);
        let field = desc.field(spec.field);
        f.copy_tail(&target, field.offset + field.ty.size());
        let f = Arc::new(f);
        match self.db.group_index(prog, &rep) {
            Some(gi) => self.db.queue_mut(ty)[gi].fact = f.clone(),
            None => panic!("aggregate group {} vanished", rep.show(prog, heap))
        }
        trace!(target: "db", "{} now {}", rep.show(prog, heap), f.show(prog, heap));
        self.run(&f, 1);
    }
}
