use rand::RngCore;

use crate::fact::NodeId;
use crate::heap::Heap;
use crate::program::{Program, MAX_EXTERNS};
use crate::value::{List, Set, Value};

pub type ExternFn = Box<dyn Fn(&mut CallCtx<'_>, &[Value]) -> Value + Send + Sync>;

// What a native function gets to see of the machine
pub struct CallCtx<'a> {
    pub prog: &'a Program,
    pub heap: &'a Heap,
    pub node: NodeId,
    pub(crate) rng: &'a mut dyn RngCore,
}

impl<'a> CallCtx<'a> {
    pub fn new_list(&mut self, list: List) -> Value {
        if list.is_empty() {
            return Value::Nil;
        }
        Value::List(self.heap.alloc_list(list, &mut *self.rng))
    }

    pub fn new_set(&mut self, set: Set) -> Value {
        Value::Set(self.heap.alloc_set(set, &mut *self.rng))
    }
}

// The native function table, indexed by the id CALL carries.
// The functions themselves live with the embedder.
pub struct Externs {
    funcs: Vec<Option<(u8, ExternFn)>>,
}

impl Default for Externs {
    fn default() -> Self {
        Externs { funcs: (0..MAX_EXTERNS).map(|_| None).collect() }
    }
}

impl Externs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: u8, arity: u8, f: F) -> &mut Self
            where F: Fn(&mut CallCtx<'_>, &[Value]) -> Value + Send + Sync + 'static {
        match self.funcs.get_mut(id as usize) {
            Some(slot) => *slot = Some((arity, Box::new(f))),
            None => panic!("external function id {} is out of range", id)
        }
        self
    }

    pub fn arity(&self, id: u8) -> Option<u8> {
        self.funcs.get(id as usize).and_then(|f| f.as_ref()).map(|(a, _)| *a)
    }

    pub fn call(&self, id: u8, ctx: &mut CallCtx<'_>, args: &[Value]) -> Value {
        match self.funcs.get(id as usize).and_then(|f| f.as_ref()) {
            Some((_, f)) => f(ctx, args),
            None => panic!("external function {} is not registered", id)
        }
    }
}
