use std::sync::Arc;

use log::trace;

use crate::fact::Fact;
use crate::value::Value;
use crate::vm::Machine;

impl Machine<'_> {
    // Emits the change between a reinserted delta tracked fact and the
    // one retained when it was last consumed. Each derived fact is the
    // old one with the tracked field replaced by new minus old.
    pub(crate) fn process_deltas(&mut self, fact: &Fact) {
        let prog = self.prog;
        let ty = fact.ty();
        let old = match self.db.take_retained(ty) {
            Some(old) => old,
            None => return
        };
        for d in prog.ty(ty).deltas.iter() {
            let diff = match (fact.get(prog, d.field), old.get(prog, d.field)) {
                (Value::Int(n), Value::Int(o)) => Value::Int(n.wrapping_sub(o)),
                (Value::Float(n), Value::Float(o)) => Value::Float(n - o),
                (n, o) => panic!("no delta between {:?} and {:?}", n, o)
            };
            let mut derived = Fact::new(prog, d.ty);
            derived.copy_prefix(&old);
            derived.set(prog, d.field, &diff);
            let derived = Arc::new(derived);
            trace!(target: "db", "delta {}", derived.show(prog, self.heap));
            self.run(&derived, 1);
        }
    }
}
