pub mod util;
pub mod config;
pub mod program;
pub mod fact;
pub mod value;
pub mod heap;
pub mod db;
pub mod vm;
pub mod sched;

pub use util::{Error, ErrorKind, Result};
pub use config::{Config, GcMode};
pub use program::{Program, TypeId};
pub use fact::{Fact, NodeId};
