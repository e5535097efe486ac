// Runtime knobs. The CLI fills these in from its arguments,
// library users construct them directly.

pub const DEFAULT_GC_THRESHOLD: u64 = 250_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    // collect once this many objects of a kind were allocated
    // since the last collection
    Allocations(u64),
    // collect every n handled facts, counted by the leader worker
    Cycles(u64),
    Disabled
}

impl Default for GcMode {
    fn default() -> Self {
        GcMode::Allocations(DEFAULT_GC_THRESHOLD)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub threads: usize,
    pub gc: GcMode,
    // seeds the per-worker ITERATE shuffles, entropy when None
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config { threads: 1, gc: GcMode::default(), seed: None }
    }
}

impl Config {
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn gc(mut self, gc: GcMode) -> Self {
        self.gc = gc;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
