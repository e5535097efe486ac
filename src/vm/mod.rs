pub mod op;
pub mod reg;
pub mod externs;
pub mod machine;

pub use externs::{CallCtx, ExternFn, Externs};
pub use machine::{Machine, Outcome, Router};
pub use op::{decode, instr_len, BinOp, Instr, Operand, RegAddr};
pub use reg::Registers;
