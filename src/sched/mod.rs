use std::fmt::Write;
use std::process;
use std::sync::Arc;
use std::thread;

use log::{debug, error, info};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::{Config, Error, ErrorKind, Result};
use crate::db::NodeDb;
use crate::fact::{Fact, NodeId};
use crate::heap::{Collector, Heap};
use crate::program::{FieldType, Program, TypeId};
use crate::value::Value;
use crate::vm::{Externs, Machine};

pub mod inbox;

pub use inbox::{Inbox, Mailboxes};

// A fact naming a node in its first field, the shape
// of both `_init` and `edge`
fn node_fact(prog: &Program, ty: TypeId, node: NodeId) -> Result<Fact> {
    let desc = prog.ty(ty);
    let mut f = Fact::new(prog, ty);
    match desc.fields.first().map(|f| f.ty) {
        None => (),
        Some(FieldType::Addr) => f.set(prog, 0, &Value::Node(node)),
        Some(t) => return Err(Error::with(ErrorKind::BadType,
            format!("{} must take a node as its first field, not {:?}", desc.name, t)))
    }
    Ok(f)
}

// Sets up a graph of nodes and the facts they start from, then runs
// the program to a fixpoint over a fixed pool of workers.
pub struct Runtime {
    prog: Program,
    externs: Externs,
    config: Config,
    nodes: usize,
    initial: Vec<(NodeId, Arc<Fact>, i32)>,
    heap: Arc<Heap>,
}

impl Runtime {
    pub fn new(prog: Program, config: Config) -> Self {
        Self::with_externs(prog, Externs::new(), config)
    }

    pub fn with_externs(prog: Program, externs: Externs, config: Config) -> Self {
        let heap = Arc::new(Heap::new(config.threads.max(1)));
        Runtime { prog, externs, config, nodes: 0, initial: Vec::new(), heap }
    }

    pub fn program(&self) -> &Program {
        &self.prog
    }

    // for building lists and sets the initial facts refer to
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes
    }

    pub fn add_node(&mut self) -> NodeId {
        self.nodes += 1;
        (self.nodes - 1) as NodeId
    }

    fn check_node(&self, node: NodeId) -> Result<()> {
        if (node as usize) < self.nodes {
            Ok(())
        } else {
            Err(Error::with(ErrorKind::NotFound, format!("no such node {}", node)))
        }
    }

    // `edge(to)` at `from`, if the program knows about edges
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.check_node(from)?;
        self.check_node(to)?;
        if let Some(edge) = self.prog.reserved().edge {
            let f = node_fact(&self.prog, edge, to)?;
            self.initial.push((from, Arc::new(f), 1));
        }
        Ok(())
    }

    pub fn assert_fact(&mut self, node: NodeId, fact: Fact, delta: i32) -> Result<()> {
        self.check_node(node)?;
        if fact.ty() as usize >= self.prog.num_types() {
            return Err(Error::with(ErrorKind::BadType,
                format!("fact of unknown type {}", fact.ty())));
        }
        self.initial.push((node, Arc::new(fact), delta));
        Ok(())
    }

    pub fn run(self) -> Result<Report> {
        let Runtime { prog, externs, config, nodes, initial, heap } = self;
        let threads = config.threads.max(1);

        let mail = Mailboxes::new(&prog, nodes);
        if let Some(init) = prog.reserved().init {
            for n in 0..nodes as NodeId {
                mail.push(n, Arc::new(node_fact(&prog, init, n)?), 1);
            }
        }
        for (node, fact, delta) in initial {
            mail.push(node, fact, delta);
        }

        let gc = Collector::new(heap.clone(), config.gc, threads);
        let mut owned : Vec<Vec<NodeDb>> = (0..threads).map(|_| Vec::new()).collect();
        for n in 0..nodes {
            owned[n % threads].push(NodeDb::new(&prog, n as NodeId));
        }
        info!(target: "sched", "running {} nodes on {} workers, {} facts queued",
              nodes, threads, mail.inflight());

        let finished = thread::scope(|s| -> Result<Vec<(Vec<NodeDb>, u64)>> {
            let mut handles = Vec::with_capacity(threads);
            for (id, dbs) in owned.into_iter().enumerate() {
                let rng = match config.seed {
                    Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(id as u64)),
                    None => ChaCha8Rng::from_entropy()
                };
                let worker = Worker {
                    id, dbs, rng,
                    prog: &prog, externs: &externs, mail: &mail, gc: &gc,
                    handled: 0
                };
                let h = thread::Builder::new()
                    .name(format!("meld-worker-{}", id))
                    .spawn_scoped(s, move || worker.run())?;
                handles.push(h);
            }
            handles.into_iter().map(|h| h.join().map_err(|_|
                Error::new_const(ErrorKind::Internal, "worker thread panicked"))).collect()
        })?;

        let mut handled = 0;
        let mut dbs = Vec::with_capacity(nodes);
        for (d, h) in finished {
            dbs.extend(d);
            handled += h;
        }
        dbs.sort_by_key(|d| d.id());
        let collections = gc.collections();
        drop(mail);
        info!(target: "sched", "fixpoint after {} facts, {} collections", handled, collections);
        Ok(Report { prog, heap, nodes: dbs, handled, collections })
    }
}

// What a finished run leaves behind
pub struct Report {
    prog: Program,
    heap: Arc<Heap>,
    nodes: Vec<NodeDb>,
    pub handled: u64,
    pub collections: u64,
}

impl Report {
    pub fn program(&self) -> &Program {
        &self.prog
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn nodes(&self) -> &[NodeDb] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeDb> {
        self.nodes.get(id as usize)
    }

    pub fn dump(&self) -> String {
        let mut s = String::new();
        for n in self.nodes.iter() {
            let _ = write!(s, "{}", n.dump(&self.prog, &self.heap));
        }
        s
    }
}

// Runtime invariant violations are fatal. A worker dying on its own
// would leave the rest waiting at a barrier forever.
struct AbortOnPanic(usize);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(target: "sched", "worker {} hit a fatal error", self.0);
            process::abort();
        }
    }
}

struct Worker<'a> {
    id: usize,
    prog: &'a Program,
    externs: &'a Externs,
    mail: &'a Mailboxes<'a>,
    gc: &'a Collector,
    dbs: Vec<NodeDb>,
    rng: ChaCha8Rng,
    handled: u64,
}

impl Worker<'_> {
    fn run(mut self) -> (Vec<NodeDb>, u64) {
        let _guard = AbortOnPanic(self.id);
        debug!(target: "sched", "worker {} owns {} nodes", self.id, self.dbs.len());
        let mail = self.mail;
        loop {
            let mut idle = true;
            for i in 0..self.dbs.len() {
                let inbox = mail.inbox(self.dbs[i].id());
                while let Some((fact, delta)) = inbox.pop() {
                    idle = false;
                    self.step(i, fact, delta);
                }
            }
            if !idle {
                continue;
            }
            // an idle worker never raises a collection, it only joins one
            if self.gc.requested() {
                self.collect();
            } else if mail.inflight() == 0 {
                break;
            } else {
                thread::yield_now();
            }
        }
        debug!(target: "sched", "worker {} done after {} facts", self.id, self.handled);
        (self.dbs, self.handled)
    }

    fn step(&mut self, i: usize, fact: Arc<Fact>, delta: i32) {
        let db = &mut self.dbs[i];
        let node = db.id();
        Machine::new(self.prog, self.gc.heap(), self.externs, self.mail, db, &mut self.rng)
            .handle(fact, delta);
        self.handled += 1;

        let mut done = 1;
        if self.dbs[i].is_terminated() {
            done += self.mail.inbox(node).close();
        }
        self.gc.cycle(self.id);
        // still holding this fact, so nobody can see the run as finished
        if self.gc.poll() {
            self.collect();
        }
        self.mail.finished(done);
    }

    fn collect(&mut self) {
        let (prog, mail, dbs) = (self.prog, self.mail, &self.dbs);
        self.gc.collect(self.id, |heap| {
            for db in dbs.iter() {
                db.trace(prog, heap);
                mail.inbox(db.id()).trace(prog, heap);
            }
        });
    }
}
