use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::config::GcMode;
use crate::fact::{Fact, NodeId};
use crate::heap::{Collector, Heap};
use crate::program::{AggOp, FieldType, Program, Props, TypeId};
use crate::program::asm::{field, reg, ProgramBuilder, TypeDecl};
use crate::value::{List, ListKind, Set, SetKind, Value};
use crate::vm::{Externs, Machine, Operand, Router};

use super::*;
use super::aggregate::Acc;

use test_log::test;

// Records everything sent and feeds what a node sends
// itself back into it.
#[derive(Default)]
struct Loopback {
    sent: Mutex<Vec<(NodeId, Arc<Fact>, i32)>>,
    pending: Mutex<VecDeque<(Arc<Fact>, i32)>>,
}

impl Router for Loopback {
    fn send(&self, from: NodeId, to: NodeId, fact: Arc<Fact>, delta: i32) {
        self.sent.lock().push((to, fact.clone(), delta));
        if from == to {
            self.pending.lock().push_back((fact, delta));
        }
    }
}

struct Node {
    prog: Program,
    heap: Arc<Heap>,
    externs: Externs,
    out: Loopback,
    db: NodeDb,
    rng: ChaCha8Rng,
}

impl Node {
    fn new(b: &ProgramBuilder) -> Node {
        let prog = b.load().unwrap();
        let db = NodeDb::new(&prog, 0);
        Node {
            prog, db,
            heap: Arc::new(Heap::new(1)),
            externs: Externs::new(),
            out: Loopback::default(),
            rng: ChaCha8Rng::seed_from_u64(5),
        }
    }

    fn fact(&self, ty: TypeId, values: &[Value]) -> Arc<Fact> {
        Arc::new(Fact::with(&self.prog, ty, values))
    }

    fn handle(&mut self, fact: Arc<Fact>, delta: i32) {
        Machine::new(&self.prog, &self.heap, &self.externs, &self.out, &mut self.db, &mut self.rng)
            .handle(fact, delta);
        loop {
            let next = self.out.pending.lock().pop_front();
            match next {
                Some((f, d)) => Machine::new(&self.prog, &self.heap, &self.externs,
                                             &self.out, &mut self.db, &mut self.rng).handle(f, d),
                None => break
            }
        }
    }

    // (value, delta) of every `log` fact sent so far
    fn logged(&self, log: TypeId) -> Vec<(i32, i32)> {
        self.out.sent.lock().iter()
            .filter(|(_, f, _)| f.ty() == log)
            .map(|(_, f, d)| (f.int(&self.prog, 0), *d))
            .collect()
    }

    fn rep(&self, like: &Fact) -> Arc<Fact> {
        match self.db.group(&self.prog, like) {
            Some(e) => e.fact.clone(),
            None => panic!("no group for {}", like.show(&self.prog, &self.heap))
        }
    }

    fn set_of(&self, f: &Fact, idx: usize) -> Vec<i32> {
        match f.get(&self.prog, idx) {
            Value::Set(r) => self.heap.set(r, |s| s.values().map(|v| v.as_int()).collect()),
            v => panic!("expected a set, got {:?}", v)
        }
    }

    fn list_of(&self, f: &Fact, idx: usize) -> Vec<i32> {
        match f.get(&self.prog, idx) {
            Value::List(r) => self.heap.list(r, |l| l.values().map(|v| v.as_int()).collect()),
            Value::Nil => Vec::new(),
            v => panic!("expected a list, got {:?}", v)
        }
    }
}

fn log_type(b: &mut ProgramBuilder) -> TypeId {
    b.decl(TypeDecl::new("log", &[FieldType::Int]))
}

// the body of `ty` sends log(field idx) to its own node
fn logs(b: &mut ProgramBuilder, ty: TypeId, log: TypeId, idx: u8) {
    b.body(ty, |w| {
        w.mov(Operand::Fact, reg(0))
         .alloc(log, 1)
         .mov(field(0, idx), field(1, 0))
         .send(1, 1)
         .ret();
    });
}

fn ints(vals: &[i32]) -> Vec<Value> {
    vals.iter().map(|i| Value::Int(*i)).collect()
}

#[test]
fn test_linear_counts() {
    let mut b = ProgramBuilder::new();
    let log = log_type(&mut b);
    let a = b.decl(TypeDecl::new("a", &[FieldType::Int, FieldType::Int]).linear());
    logs(&mut b, a, log, 0);
    let mut n = Node::new(&b);
    let f = n.fact(a, &ints(&[1, 2]));

    n.handle(f.clone(), 1);
    n.handle(f.clone(), 1);
    assert_eq!(n.db.count(&f), Some(2));
    assert!(n.db.dump(&n.prog, &n.heap).contains("a(1, 2) x2"));

    n.handle(f.clone(), -2);
    assert_eq!(n.db.count(&f), None);
    assert_eq!(n.db.len(a), 0);
    // derived once on the way in, retracted once on the way out
    assert_eq!(n.logged(log), vec![(1, 1), (1, -1)]);
}

#[test]
fn test_retract_unknown_is_noop() {
    let mut b = ProgramBuilder::new();
    let log = log_type(&mut b);
    let a = b.decl(TypeDecl::new("a", &[FieldType::Int]));
    logs(&mut b, a, log, 0);
    let mut n = Node::new(&b);
    let f = n.fact(a, &ints(&[1]));
    n.handle(f.clone(), -1);
    assert!(n.db.is_empty());
    assert!(n.logged(log).is_empty());

    n.handle(f.clone(), 1);
    n.handle(f, -1);
    // only the log facts are left behind
    assert_eq!(n.db.len(a), 0);
    assert_eq!(n.logged(log), vec![(1, 1), (1, -1)]);
}

fn sum_prog() -> (ProgramBuilder, TypeId, TypeId) {
    let mut b = ProgramBuilder::new();
    let log = log_type(&mut b);
    let s = b.decl(TypeDecl::new("s", &[FieldType::Int, FieldType::Int])
        .aggregate(AggOp::SumInt, 1));
    logs(&mut b, s, log, 1);
    (b, log, s)
}

#[test]
fn test_sum_group() {
    let (b, log, s) = sum_prog();
    let mut n = Node::new(&b);
    let five = n.fact(s, &ints(&[0, 5]));
    let six = n.fact(s, &ints(&[0, 6]));

    n.handle(five.clone(), 1);
    n.handle(six.clone(), 1);
    assert_eq!(n.rep(&five).int(&n.prog, 1), 11);
    assert_eq!(n.db.len(s), 1);
    assert_eq!(n.db.group(&n.prog, &five).unwrap().members().len(), 2);

    // another key is another group
    let other = n.fact(s, &ints(&[1, 2]));
    n.handle(other.clone(), 1);
    assert_eq!(n.db.len(s), 2);
    assert_eq!(n.rep(&other).int(&n.prog, 1), 2);

    n.handle(five, -1);
    assert_eq!(n.rep(&six).int(&n.prog, 1), 6);
    n.handle(six.clone(), -1);
    assert!(n.db.group(&n.prog, &six).is_none());
    assert_eq!(n.db.len(s), 1);

    assert_eq!(n.logged(log), vec![
        (5, 1), (5, -1), (11, 1), (2, 1),
        (11, -1), (6, 1), (6, -1)
    ]);
}

#[test]
fn test_sum_weighs_by_count() {
    let (b, log, s) = sum_prog();
    let mut n = Node::new(&b);
    let five = n.fact(s, &ints(&[0, 5]));
    n.handle(five.clone(), 2);
    assert_eq!(n.rep(&five).int(&n.prog, 1), 10);
    n.handle(n.fact(s, &ints(&[0, 1])), 3);
    assert_eq!(n.rep(&five).int(&n.prog, 1), 13);
    n.handle(five.clone(), -1);
    assert_eq!(n.rep(&five).int(&n.prog, 1), 8);
    // the representative is derived once, whatever count created the group
    assert_eq!(n.logged(log), vec![(10, 1), (10, -1), (13, 1), (13, -1), (8, 1)]);
}

#[test]
fn test_max_takes_trailing_fields() {
    let mut b = ProgramBuilder::new();
    let m = b.decl(TypeDecl::new("m", &[FieldType::Int, FieldType::Int, FieldType::Int])
        .aggregate(AggOp::MaxInt, 1));
    let mut n = Node::new(&b);
    let low = n.fact(m, &ints(&[0, 3, 100]));
    let high = n.fact(m, &ints(&[0, 7, 200]));
    let mid = n.fact(m, &ints(&[0, 5, 300]));

    n.handle(low.clone(), 1);
    n.handle(high.clone(), 1);
    let rep = n.rep(&low);
    assert_eq!((rep.int(&n.prog, 1), rep.int(&n.prog, 2)), (7, 200));

    // not a new maximum, nothing moves
    n.handle(mid.clone(), 1);
    assert!(Arc::ptr_eq(&rep, &n.rep(&low)));

    n.handle(high, -1);
    let rep = n.rep(&low);
    assert_eq!((rep.int(&n.prog, 1), rep.int(&n.prog, 2)), (5, 300));
}

#[test]
fn test_min_float() {
    let mut b = ProgramBuilder::new();
    let m = b.decl(TypeDecl::new("m", &[FieldType::Int, FieldType::Float])
        .aggregate(AggOp::MinFloat, 1));
    let mut n = Node::new(&b);
    for x in [2.5, -1.0, 4.0] {
        n.handle(n.fact(m, &[Value::Int(0), Value::Float(x)]), 1);
    }
    let rep = n.rep(&n.fact(m, &[Value::Int(0), Value::Float(0.0)]));
    assert_eq!(rep.float(&n.prog, 1), -1.0);
}

#[test]
fn test_first_never_moves() {
    let mut b = ProgramBuilder::new();
    let f = b.decl(TypeDecl::new("f", &[FieldType::Int, FieldType::Int])
        .aggregate(AggOp::First, 1));
    let mut n = Node::new(&b);
    let five = n.fact(f, &ints(&[0, 5]));
    let nine = n.fact(f, &ints(&[0, 9]));
    n.handle(five.clone(), 1);
    n.handle(nine.clone(), 1);
    assert_eq!(n.rep(&five).int(&n.prog, 1), 5);
    assert_eq!(n.db.group(&n.prog, &five).unwrap().members().len(), 1);

    n.handle(nine, -1);
    assert_eq!(n.db.len(f), 1);
    n.handle(five, -1);
    assert_eq!(n.db.len(f), 0);
}

fn union_prog() -> (ProgramBuilder, TypeId, TypeId) {
    let mut b = ProgramBuilder::new();
    let log = log_type(&mut b);
    let u = b.decl(TypeDecl::new("u", &[FieldType::Int, FieldType::SetInt])
        .aggregate(AggOp::SetUnionInt, 1));
    logs(&mut b, u, log, 0);
    (b, log, u)
}

#[test]
fn test_set_union() {
    let (b, log, u) = union_prog();
    let mut n = Node::new(&b);
    let three = n.fact(u, &ints(&[0, 3]));
    n.handle(three.clone(), 1);
    let first = n.rep(&three);
    assert_eq!(n.set_of(&first, 1), vec![3]);

    // the same element again does not change the set
    n.handle(three.clone(), 1);
    let same = n.rep(&three);
    assert!(Arc::ptr_eq(&first, &same));
    assert_eq!(n.set_of(&same, 1), vec![3]);

    n.handle(n.fact(u, &ints(&[0, 5])), 1);
    let rep = n.rep(&three);
    assert_eq!(n.set_of(&rep, 1), vec![3, 5]);
    assert_ne!(rep.obj(&n.prog, 1), first.obj(&n.prog, 1));
    assert_eq!(n.logged(log), vec![(0, 1), (0, -1), (0, 1)]);
}

#[test]
fn test_acc_changed() {
    let heap = Heap::new(1);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut s = Set::new(SetKind::Int);
    s.insert(&Value::Int(3));
    let r = heap.alloc_set(s.clone(), &mut rng);
    assert!(!Acc::Set(s.clone()).changed(&heap, &Value::Set(r)));
    s.insert(&Value::Int(4));
    assert!(Acc::Set(s).changed(&heap, &Value::Set(r)));

    assert!(!Acc::Int(3).changed(&heap, &Value::Int(3)));
    assert!(Acc::Float(3.0).changed(&heap, &Value::Float(2.0)));
    assert!(!Acc::First(Value::Int(1)).changed(&heap, &Value::Int(9)));
    assert!(!Acc::List(List::new(ListKind::Int)).changed(&heap, &Value::Nil));
}

fn sum_list_prog() -> (ProgramBuilder, TypeId) {
    let mut b = ProgramBuilder::new();
    let sl = b.decl(TypeDecl::new("sl", &[FieldType::Int, FieldType::ListInt])
        .aggregate(AggOp::SumListInt, 1));
    (b, sl)
}

#[test]
fn test_sum_list() {
    let (b, sl) = sum_list_prog();
    let mut n = Node::new(&b);
    let a = n.heap.alloc_list(List::from_ints([1, 2]), &mut n.rng);
    let c = n.heap.alloc_list(List::from_ints([10, 20]), &mut n.rng);
    let fa = n.fact(sl, &[Value::Int(0), Value::List(a)]);
    let fc = n.fact(sl, &[Value::Int(0), Value::List(c)]);
    n.handle(fa.clone(), 1);
    n.handle(fc, 2);
    assert_eq!(n.list_of(&n.rep(&fa), 1), vec![21, 42]);
    // contributors keep their own lists
    assert_eq!(n.list_of(&fa, 1), vec![1, 2]);
}

#[test]
#[should_panic(expected = "different lengths")]
fn test_sum_list_length_mismatch() {
    let (b, sl) = sum_list_prog();
    let mut n = Node::new(&b);
    let a = n.heap.alloc_list(List::from_ints([1, 2]), &mut n.rng);
    let c = n.heap.alloc_list(List::from_ints([1, 2, 3]), &mut n.rng);
    n.handle(n.fact(sl, &[Value::Int(0), Value::List(a)]), 1);
    n.handle(n.fact(sl, &[Value::Int(0), Value::List(c)]), 1);
}

#[test]
fn test_persistent_dedup() {
    let mut b = ProgramBuilder::new();
    let log = log_type(&mut b);
    let p = b.decl(TypeDecl::new("p", &[FieldType::Int]).persistent());
    logs(&mut b, p, log, 0);
    let mut n = Node::new(&b);
    n.handle(n.fact(p, &ints(&[4])), 1);
    n.handle(n.fact(p, &ints(&[4])), 1);
    n.handle(n.fact(p, &ints(&[5])), 1);
    assert_eq!(n.db.persistent(p).len(), 2);
    assert_eq!(n.logged(log), vec![(4, 1), (5, 1)]);
}

#[test]
#[should_panic(expected = "cannot be retracted")]
fn test_persistent_retraction() {
    let mut b = ProgramBuilder::new();
    let p = b.decl(TypeDecl::new("p", &[FieldType::Int]).persistent());
    let mut n = Node::new(&b);
    n.handle(n.fact(p, &ints(&[4])), 1);
    n.handle(n.fact(p, &ints(&[4])), -1);
}

#[test]
fn test_delta_tracking() {
    let mut b = ProgramBuilder::new();
    let log = log_type(&mut b);
    let d = b.decl(TypeDecl::new("d", &[FieldType::Int, FieldType::Int]));
    let l = b.decl(TypeDecl::new("l", &[FieldType::Int, FieldType::Int]).linear().delta(d, 1));
    logs(&mut b, d, log, 1);
    let mut n = Node::new(&b);

    let old = n.fact(l, &ints(&[0, 10]));
    n.handle(old.clone(), 1);
    assert!(n.logged(log).is_empty());

    n.handle(old.clone(), -1);
    assert_eq!(n.db.len(l), 0);
    assert_eq!(n.db.retained(l), Some(&old));

    n.handle(n.fact(l, &ints(&[0, 14])), 1);
    assert_eq!(n.logged(log), vec![(4, 1)]);
    assert!(n.db.retained(l).is_none());
    // the derived fact is only ever run, never stored
    assert_eq!(n.db.len(d), 0);
}

fn delete_prog(persistent: bool) -> (ProgramBuilder, TypeId, TypeId, TypeId) {
    let mut b = ProgramBuilder::new();
    let log = log_type(&mut b);
    let decl = TypeDecl::new("t", &[FieldType::Int]);
    let t = b.decl(if persistent { decl.persistent() } else { decl });
    let del = b.decl(TypeDecl::new("del", &[FieldType::Type]).props(Props::DELETE));
    logs(&mut b, t, log, 0);
    (b, log, t, del)
}

#[test]
fn test_delete_marker() {
    let (b, log, t, del) = delete_prog(false);
    let mut n = Node::new(&b);
    n.handle(n.fact(t, &ints(&[1])), 1);
    n.handle(n.fact(t, &ints(&[2])), 3);

    let marker = n.fact(del, &ints(&[t as i32]));
    n.handle(marker.clone(), -1);
    assert_eq!(n.db.len(t), 2);

    n.handle(marker, 1);
    assert_eq!(n.db.len(t), 0);
    let mut gone : Vec<_> = n.logged(log).into_iter().filter(|(_, d)| *d < 0).collect();
    gone.sort();
    assert_eq!(gone, vec![(1, -1), (2, -1)]);
    // markers are not stored
    assert_eq!(n.db.len(del), 0);
}

#[test]
#[should_panic(expected = "targets persistent")]
fn test_delete_persistent_target() {
    let (b, _, t, del) = delete_prog(true);
    let mut n = Node::new(&b);
    n.handle(n.fact(del, &ints(&[t as i32])), 1);
}

#[test]
fn test_proved_counts() {
    let mut b = ProgramBuilder::new();
    let log = log_type(&mut b);
    let proved = b.decl(TypeDecl::new("proved", &[FieldType::Type, FieldType::Int]));
    let g = b.decl(TypeDecl::new("g", &[FieldType::Int]).props(Props::PROVED));
    logs(&mut b, proved, log, 1);
    let mut n = Node::new(&b);

    n.handle(n.fact(g, &ints(&[1])), 1);
    n.handle(n.fact(g, &ints(&[2])), 1);
    assert_eq!(n.db.proved(g), 2);
    assert_eq!(n.db.len(g), 2);
    assert_eq!(n.logged(log), vec![(1, 1), (2, 1)]);
    // the proved notices themselves are never stored
    assert_eq!(n.db.len(proved), 0);
}

#[test]
fn test_schedule_and_terminate() {
    let mut b = ProgramBuilder::new();
    let sched = b.decl(TypeDecl::new("sched", &[FieldType::Int, FieldType::Int])
        .props(Props::SCHEDULE));
    let stop = b.decl(TypeDecl::new("terminate", &[]));
    let mut n = Node::new(&b);

    n.handle(n.fact(sched, &ints(&[1, 2])), 1);
    assert!(n.db.is_empty());
    assert!(!n.db.is_terminated());

    n.handle(n.fact(stop, &[]), 1);
    assert!(n.db.is_terminated());
}

#[test]
fn test_trace_keeps_stored_objects() {
    let mut b = ProgramBuilder::new();
    let t = b.decl(TypeDecl::new("t", &[FieldType::ListInt]));
    let u = b.decl(TypeDecl::new("u", &[FieldType::Int, FieldType::SetInt])
        .aggregate(AggOp::SetUnionInt, 1));
    let mut n = Node::new(&b);

    let kept = n.heap.alloc_list(List::from_ints([1, 2]), &mut n.rng);
    let garbage = n.heap.alloc_list(List::from_ints([3]), &mut n.rng);
    n.handle(n.fact(t, &[Value::List(kept)]), 1);

    // small elements that would read as handles if traced
    n.handle(n.fact(u, &ints(&[0, 1])), 1);
    let first = n.rep(&n.fact(u, &ints(&[0, 1]))).obj(&n.prog, 1).unwrap();
    n.handle(n.fact(u, &ints(&[0, 2])), 1);
    let rep = n.rep(&n.fact(u, &ints(&[0, 1])));

    let gc = Collector::new(n.heap.clone(), GcMode::default(), 1);
    gc.collect(0, |h| n.db.trace(&n.prog, h));

    assert!(n.heap.contains(kept));
    assert!(!n.heap.contains(garbage));
    // the superseded accumulator is gone, the current one stays
    assert!(!n.heap.contains(first));
    assert_eq!(n.set_of(&rep, 1), vec![1, 2]);
}
