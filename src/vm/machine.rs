use std::sync::Arc;

use log::trace;
use rand::seq::SliceRandom;
use rand::RngCore;

use crate::db::NodeDb;
use crate::fact::{Fact, NodeId};
use crate::heap::Heap;
use crate::program::{Program, TypeId};
use crate::value::{List, ListKind, SetKind, Value};

use super::externs::{CallCtx, Externs};
use super::op::{self, BinOp, Instr, Match, Operand, RegAddr};
use super::reg::Registers;

// Hands derived facts to whoever owns the destination node,
// the current node included.
pub trait Router: Send + Sync {
    fn send(&self, from: NodeId, to: NodeId, fact: Arc<Fact>, delta: i32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    // RETURN, unwinds every enclosing ITERATE
    Returned,
    // NEXT, only this continuation is done
    Next,
}

// Executes rule bodies for one node. Lives for the handling of a
// single incoming fact and owns the node's database for that long.
pub struct Machine<'a> {
    pub(crate) prog: &'a Program,
    pub(crate) heap: &'a Heap,
    pub(crate) externs: &'a Externs,
    pub(crate) router: &'a dyn Router,
    pub(crate) db: &'a mut NodeDb,
    pub(crate) rng: &'a mut dyn RngCore,
}

impl<'a> Machine<'a> {
    pub fn new(prog: &'a Program, heap: &'a Heap, externs: &'a Externs,
               router: &'a dyn Router, db: &'a mut NodeDb, rng: &'a mut dyn RngCore) -> Self {
        Machine { prog, heap, externs, router, db, rng }
    }

    pub fn node(&self) -> NodeId {
        self.db.id()
    }

    pub fn db(&self) -> &NodeDb {
        &*self.db
    }

    // runs the rule body of the fact's type from the top
    pub fn run(&mut self, fact: &Arc<Fact>, delta: i32) -> Outcome {
        let start = self.prog.ty(fact.ty()).start;
        let mut regs = Registers::new();
        self.process(fact, start, delta, &mut regs)
    }

    pub fn process(&mut self, fact: &Arc<Fact>, mut pc: usize, delta: i32, regs: &mut Registers) -> Outcome {
        let prog = self.prog;
        loop {
            let (instr, len) = match op::decode(prog, pc) {
                Ok(i) => i,
                Err(e) => panic!("bad instruction at {:#x}: {}", pc, e)
            };
            trace!(target: "vm", "{:04x} {}", pc, instr);
            use Instr::*;
            match instr {
                Return => return Outcome::Returned,
                Next => return Outcome::Next,
                Else => panic!("ELSE at {:#x} is not implemented", pc),
                If { reg, jump } => {
                    if !regs[reg].truthy() {
                        pc += jump;
                        continue;
                    }
                },
                Iterate { ty, jump, matches } => {
                    let body = pc + len;
                    if self.iterate(fact, ty, &matches, body, delta, regs) == Outcome::Returned {
                        return Outcome::Returned;
                    }
                    pc += jump;
                    continue;
                },
                Send { msg, dest, delay } => self.send(fact, msg, dest, &delay, delta, regs),
                Remove { reg } => {
                    if delta > 0 {
                        let f = regs[reg].as_fact().clone();
                        regs.clear(reg);
                        self.handle(f, -1);
                    }
                },
                Op { op, lhs, rhs, dst } => {
                    let l = self.eval(&lhs, fact, regs);
                    let r = self.eval(&rhs, fact, regs);
                    regs[dst] = binop(op, &l, &r);
                },
                Move { src, dst } => {
                    let v = self.eval(&src, fact, regs);
                    self.store(&dst, v, regs);
                },
                MoveNil { dst } => self.store(&dst, Value::Nil, regs),
                Alloc { ty, dst } => {
                    let f = Value::Fact(Arc::new(Fact::new(prog, ty)));
                    self.store(&dst, f, regs);
                },
                Call { func, dst, args } => {
                    let args : Vec<Value> = args.iter().map(|a| self.eval(a, fact, regs)).collect();
                    let mut ctx = CallCtx {
                        prog, heap: self.heap, node: self.node(), rng: &mut *self.rng
                    };
                    regs[dst] = self.externs.call(func, &mut ctx, &args);
                },
                Cons { head, tail, dst } => {
                    let h = self.eval(&head, fact, regs);
                    let t = self.eval(&tail, fact, regs);
                    let v = self.cons(h, t);
                    self.store(&dst, v, regs);
                },
                Head { list, dst } => {
                    let v = match self.eval(&list, fact, regs) {
                        Value::List(r) => match self.heap.list(r, List::head) {
                            Some(v) => v,
                            None => panic!("head of empty list {}", r)
                        },
                        v => panic!("head of {:?}", v)
                    };
                    self.store(&dst, v, regs);
                },
                Tail { list, dst } => {
                    let v = match self.eval(&list, fact, regs) {
                        Value::List(r) => {
                            let mut l = self.heap.copy_list(r);
                            l.pop_head();
                            if l.is_empty() {
                                Value::Nil
                            } else {
                                Value::List(self.heap.alloc_list(l, &mut *self.rng))
                            }
                        },
                        v => panic!("tail of {:?}", v)
                    };
                    self.store(&dst, v, regs);
                },
                TestNil { src, dst } => {
                    let v = self.eval(&src, fact, regs);
                    regs[dst] = Value::Int(v.is_nil() as i32);
                },
                Not { src, dst } => {
                    regs[dst] = Value::Int(!regs[src].truthy() as i32);
                },
            }
            pc += len;
        }
    }

    fn iterate(&mut self, fact: &Arc<Fact>, ty: TypeId, matches: &[Match],
               body: usize, delta: i32, regs: &mut Registers) -> Outcome {
        let mut candidates = self.db.snapshot(ty);
        candidates.shuffle(&mut *self.rng);
        trace!(target: "vm", "iterating {} facts of {}", candidates.len(), self.prog.ty(ty).name);
        for c in candidates {
            let hit = matches.iter().all(|m| {
                let want = self.eval(&m.value, fact, regs);
                c.get(self.prog, m.field as usize).same(&want)
            });
            if hit && self.process(&c, body, delta, regs) == Outcome::Returned {
                return Outcome::Returned;
            }
        }
        Outcome::Next
    }

    fn send(&mut self, fact: &Arc<Fact>, msg: RegAddr, dest: RegAddr,
            delay: &Operand, delta: i32, regs: &Registers) {
        match self.eval(delay, fact, regs) {
            Value::Int(0) => (),
            d => panic!("delayed send ({}) is not supported", d)
        }
        let out = regs[msg].as_fact().clone();
        let to = if msg == dest || regs[dest].same(&regs[msg]) {
            self.node()
        } else {
            regs[dest].as_node()
        };
        trace!(target: "vm", "send {} from {} to {} ({})",
               out.show(self.prog, self.heap), self.node(), to, delta);
        self.router.send(self.node(), to, out, delta);
    }

    fn eval(&self, o: &Operand, fact: &Arc<Fact>, regs: &Registers) -> Value {
        match o {
            Operand::Reg(r) => regs[*r].clone(),
            Operand::Int(i) => Value::Int(*i),
            Operand::Float(f) => Value::Float(*f),
            Operand::Field { reg, field } => regs[*reg].as_fact().get(self.prog, *field as usize),
            Operand::Nil => Value::Nil,
            Operand::Fact => Value::Fact(fact.clone()),
            Operand::Host => Value::Node(self.node()),
        }
    }

    fn store(&self, dst: &Operand, v: Value, regs: &mut Registers) {
        match dst {
            Operand::Reg(r) => regs[*r] = v,
            Operand::Field { reg, field } => {
                let idx = *field as usize;
                let ty = regs[*reg].as_fact().ty();
                self.check_kind(ty, idx, &v);
                match &mut regs[*reg] {
                    Value::Fact(f) => Arc::make_mut(f).set(self.prog, idx, &v),
                    o => panic!("field write into {:?}", o)
                }
            },
            o => panic!("cannot write into {:?}", o)
        }
    }

    // lists and sets written into a field must hold what the field declares
    fn check_kind(&self, ty: TypeId, idx: usize, v: &Value) {
        let field = self.prog.ty(ty).field(idx).ty;
        match v {
            Value::List(r) => {
                let kind = self.heap.list(*r, List::kind);
                if ListKind::of_field(field) != Some(kind) {
                    panic!("{:?} list stored into a {:?} field", kind, field);
                }
            },
            Value::Set(r) => {
                let kind = self.heap.set(*r, |s| s.kind());
                if SetKind::of_field(field) != Some(kind) {
                    panic!("{:?} set stored into a {:?} field", kind, field);
                }
            },
            _ => ()
        }
    }

    fn cons(&mut self, head: Value, tail: Value) -> Value {
        let mut l = match (&tail, ListKind::of_value(&head)) {
            (_, None) => panic!("cannot cons {:?}", head),
            (Value::Nil, Some(kind)) => List::new(kind),
            (Value::List(r), Some(kind)) => {
                let l = self.heap.copy_list(*r);
                if l.kind() != kind {
                    panic!("cannot cons {:?} onto a {:?} list", head, l.kind());
                }
                l
            },
            (t, _) => panic!("cons onto {:?}", t)
        };
        l.push_head(&head);
        Value::List(self.heap.alloc_list(l, &mut *self.rng))
    }
}

fn ints(l: &Value, r: &Value) -> (i32, i32) {
    (l.as_int(), r.as_int())
}

fn floats(l: &Value, r: &Value) -> (f32, f32) {
    (l.as_float(), r.as_float())
}

fn truth(b: bool) -> Value {
    Value::Int(b as i32)
}

pub fn binop(op: BinOp, l: &Value, r: &Value) -> Value {
    use BinOp::*;
    match op {
        NeqF => { let (a, b) = floats(l, r); truth(a != b) },
        NeqI => { let (a, b) = ints(l, r); truth(a != b) },
        EqF => { let (a, b) = floats(l, r); truth(a == b) },
        EqI => { let (a, b) = ints(l, r); truth(a == b) },
        LessF => { let (a, b) = floats(l, r); truth(a < b) },
        LessI => { let (a, b) = ints(l, r); truth(a < b) },
        LessEqF => { let (a, b) = floats(l, r); truth(a <= b) },
        LessEqI => { let (a, b) = ints(l, r); truth(a <= b) },
        GreaterF => { let (a, b) = floats(l, r); truth(a > b) },
        GreaterI => { let (a, b) = ints(l, r); truth(a > b) },
        GreaterEqF => { let (a, b) = floats(l, r); truth(a >= b) },
        GreaterEqI => { let (a, b) = ints(l, r); truth(a >= b) },
        ModF => { let (a, b) = floats(l, r); Value::Float(a % b) },
        ModI => {
            let (a, b) = ints(l, r);
            if b == 0 { panic!("integer modulo by zero"); }
            Value::Int(a.wrapping_rem(b))
        },
        PlusF => { let (a, b) = floats(l, r); Value::Float(a + b) },
        PlusI => { let (a, b) = ints(l, r); Value::Int(a.wrapping_add(b)) },
        MinusF => { let (a, b) = floats(l, r); Value::Float(a - b) },
        MinusI => { let (a, b) = ints(l, r); Value::Int(a.wrapping_sub(b)) },
        TimesF => { let (a, b) = floats(l, r); Value::Float(a * b) },
        TimesI => { let (a, b) = ints(l, r); Value::Int(a.wrapping_mul(b)) },
        DivF => { let (a, b) = floats(l, r); Value::Float(a / b) },
        DivI => {
            let (a, b) = ints(l, r);
            if b == 0 { panic!("integer division by zero"); }
            Value::Int(a.wrapping_div(b))
        },
        NeqA => truth(!l.same(r)),
        EqA => truth(l.same(r)),
    }
}
