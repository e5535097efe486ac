use std::convert::TryFrom;
use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Error, ErrorKind, Result};
use crate::program::{Program, TypeId};

pub type RegAddr = u8;

pub const NUM_REGS: usize = 32;

// operand tags (6 bits)
pub const VAL_FLOAT: u8 = 0x00;
pub const VAL_INT: u8 = 0x01;
pub const VAL_FIELD: u8 = 0x02;
pub const VAL_HOST: u8 = 0x03;
pub const VAL_NIL: u8 = 0x05;
pub const VAL_TUPLE: u8 = 0x1f;
pub const VAL_REG: u8 = 0x20;

// opcodes that are a single byte value
pub const RETURN_INSTR: u8 = 0x00;
pub const NEXT_INSTR: u8 = 0x01;
pub const ELSE_INSTR: u8 = 0x02;
pub const MOVE_NIL_INSTR: u8 = 0x03;
pub const TEST_NIL_INSTR: u8 = 0x04;
pub const CONS_INSTR: u8 = 0x05;
pub const HEAD_INSTR: u8 = 0x06;
pub const NOT_INSTR: u8 = 0x07;
pub const TAIL_INSTR: u8 = 0x0c;
pub const ITER_INSTR: u8 = 0xa0;

// base values of the opcodes that pack operands into the first byte
pub const SEND_BASE: u8 = 0x08;
pub const CALL_BASE: u8 = 0x20;
pub const MOVE_BASE: u8 = 0x30;
pub const ALLOC_BASE: u8 = 0x40;
pub const IF_BASE: u8 = 0x60;
pub const REMOVE_BASE: u8 = 0x80;
pub const OP_BASE: u8 = 0xc0;

// iterate match flags
pub const ITER_NONE: u8 = 0xc0;
pub const ITER_LAST: u8 = 0x40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum BinOp {
    NeqF = 0x00, NeqI = 0x01,
    EqF = 0x02, EqI = 0x03,
    LessF = 0x04, LessI = 0x05,
    LessEqF = 0x06, LessEqI = 0x07,
    GreaterF = 0x08, GreaterI = 0x09,
    GreaterEqF = 0x0a, GreaterEqI = 0x0b,
    ModF = 0x0c, ModI = 0x0d,
    PlusF = 0x0e, PlusI = 0x0f,
    MinusF = 0x10, MinusI = 0x11,
    TimesF = 0x12, TimesI = 0x13,
    DivF = 0x14, DivI = 0x15,
    NeqA = 0x16, EqA = 0x17,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Reg(RegAddr),
    Int(i32),
    Float(f32),
    Field { reg: RegAddr, field: u8 },
    Nil,
    // the fact the rule body is running for
    Fact,
    Host,
}

impl Operand {
    pub fn is_place(&self) -> bool {
        matches!(self, Operand::Reg(_) | Operand::Field { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub field: u8,
    pub value: Operand,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Return,
    Next,
    Else,
    If { reg: RegAddr, jump: usize },
    Iterate { ty: TypeId, jump: usize, matches: Vec<Match> },
    Send { msg: RegAddr, dest: RegAddr, delay: Operand },
    Remove { reg: RegAddr },
    Op { op: BinOp, lhs: Operand, rhs: Operand, dst: RegAddr },
    Move { src: Operand, dst: Operand },
    MoveNil { dst: Operand },
    Alloc { ty: TypeId, dst: Operand },
    Call { func: u8, dst: RegAddr, args: Vec<Operand> },
    Cons { head: Operand, tail: Operand, dst: Operand },
    Head { list: Operand, dst: Operand },
    Tail { list: Operand, dst: Operand },
    TestNil { src: Operand, dst: RegAddr },
    Not { src: RegAddr, dst: RegAddr },
}

fn truncated() -> Error {
    Error::new_const(ErrorKind::BadFormat, "instruction runs past the end of the program")
}

fn byte(code: &[u8], at: usize) -> Result<u8> {
    code.get(at).copied().ok_or_else(truncated)
}

// how many payload bytes follow an operand tag
pub fn payload_len(tag: u8) -> Result<usize> {
    match tag {
        VAL_FLOAT | VAL_INT => Ok(4),
        VAL_FIELD => Ok(2),
        VAL_HOST | VAL_NIL | VAL_TUPLE => Ok(0),
        t if t & VAL_REG != 0 => Ok(0),
        t => Err(Error::with(ErrorKind::BadFormat, format!("unknown operand tag {:#x}", t)))
    }
}

// reads the payload of an operand tagged `tag` starting at `at`
fn operand(code: &[u8], tag: u8, at: usize) -> Result<(Operand, usize)> {
    let len = payload_len(tag)?;
    let p = code.get(at..at + len).ok_or_else(truncated)?;
    let o = match tag {
        VAL_FLOAT => Operand::Float(f32::from_le_bytes([p[0], p[1], p[2], p[3]])),
        VAL_INT => Operand::Int(i32::from_le_bytes([p[0], p[1], p[2], p[3]])),
        VAL_FIELD => Operand::Field { field: p[0], reg: p[1] & 0x1f },
        VAL_HOST => Operand::Host,
        VAL_NIL => Operand::Nil,
        VAL_TUPLE => Operand::Fact,
        t => Operand::Reg(t & 0x1f)
    };
    Ok((o, len))
}

// decodes the operands whose tags are the bytes code[tags..tags+n],
// payloads follow the tags in order
fn operands<const N: usize>(code: &[u8], tags: usize) -> Result<([Operand; N], usize)> {
    let mut ops = [Operand::Nil; N];
    let mut at = tags + N;
    for (i, o) in ops.iter_mut().enumerate() {
        let (v, len) = operand(code, byte(code, tags + i)? & 0x3f, at)?;
        *o = v;
        at += len;
    }
    Ok((ops, at))
}

fn place(o: Operand, pc: usize) -> Result<Operand> {
    if o.is_place() {
        Ok(o)
    } else {
        Err(Error::with(ErrorKind::BadFormat,
            format!("instruction at {:#x} writes to {:?}", pc, o)))
    }
}

fn call_arity(prog: &Program, func: u8) -> Result<usize> {
    prog.arity(func).ok_or_else(||
        Error::with(ErrorKind::NotFound, format!("external function {} is not registered", func)))
}

// total byte length of the instruction at pc, from the
// shapes of its operands alone
pub fn instr_len(prog: &Program, pc: usize) -> Result<usize> {
    let code = prog.code();
    let b0 = byte(code, pc)?;
    let tag = |i: usize| -> Result<usize> { payload_len(byte(code, pc + i)? & 0x3f) };
    Ok(match b0 {
        RETURN_INSTR | NEXT_INSTR | ELSE_INSTR => 1,
        MOVE_NIL_INSTR => 2 + tag(1)?,
        TEST_NIL_INSTR => 3 + tag(1)?,
        CONS_INSTR => 4 + tag(1)? + tag(2)? + tag(3)?,
        HEAD_INSTR | TAIL_INSTR => 3 + tag(1)? + tag(2)?,
        NOT_INSTR => 3,
        0x08..=0x0b => 3 + tag(2)?,
        0x20..=0x2f => {
            let func = ((b0 & 0xf) << 3) | (byte(code, pc + 1)? >> 5);
            let mut len = 2;
            for _ in 0..call_arity(prog, func)? {
                len += 1 + tag(len)?;
            }
            len
        },
        0x30..=0x3f => {
            let b1 = byte(code, pc + 1)?;
            2 + payload_len(((b0 & 0xf) << 2) | (b1 >> 6))? + payload_len(b1 & 0x3f)?
        },
        0x40..=0x5f => 2 + tag(1)?,
        0x60..=0x7f => 4,
        0x80..=0x9f => 1,
        ITER_INSTR => {
            let mut len = 4;
            if byte(code, pc + len + 1)? & ITER_NONE == ITER_NONE {
                len + 2
            } else {
                loop {
                    let flags = byte(code, pc + len + 1)?;
                    len += 2 + payload_len(flags & 0x3f)?;
                    if flags & ITER_LAST != 0 {
                        break len;
                    }
                }
            }
        },
        0xc0..=0xff => {
            let b1 = byte(code, pc + 1)?;
            3 + payload_len(b0 & 0x3f)? + payload_len(b1 >> 2)?
        },
        op => return Err(Error::with(ErrorKind::BadFormat,
            format!("unknown opcode {:#x} at {:#x}", op, pc)))
    })
}

pub fn decode(prog: &Program, pc: usize) -> Result<(Instr, usize)> {
    let code = prog.code();
    let b0 = byte(code, pc)?;
    let (instr, end) = match b0 {
        RETURN_INSTR => (Instr::Return, pc + 1),
        NEXT_INSTR => (Instr::Next, pc + 1),
        ELSE_INSTR => (Instr::Else, pc + 1),
        MOVE_NIL_INSTR => {
            let ([dst], end) = operands::<1>(code, pc + 1)?;
            (Instr::MoveNil { dst: place(dst, pc)? }, end)
        },
        TEST_NIL_INSTR => {
            let tag = byte(code, pc + 1)? & 0x3f;
            let dst = byte(code, pc + 2)? & 0x1f;
            let (src, len) = operand(code, tag, pc + 3)?;
            (Instr::TestNil { src, dst }, pc + 3 + len)
        },
        CONS_INSTR => {
            let ([head, tail, dst], end) = operands::<3>(code, pc + 1)?;
            (Instr::Cons { head, tail, dst: place(dst, pc)? }, end)
        },
        HEAD_INSTR => {
            let ([list, dst], end) = operands::<2>(code, pc + 1)?;
            (Instr::Head { list, dst: place(dst, pc)? }, end)
        },
        TAIL_INSTR => {
            let ([list, dst], end) = operands::<2>(code, pc + 1)?;
            (Instr::Tail { list, dst: place(dst, pc)? }, end)
        },
        NOT_INSTR => {
            let src = byte(code, pc + 1)? & 0x1f;
            let dst = byte(code, pc + 2)? & 0x1f;
            (Instr::Not { src, dst }, pc + 3)
        },
        0x08..=0x0b => {
            let b1 = byte(code, pc + 1)?;
            let msg = ((b0 & 0x3) << 3) | (b1 >> 5);
            let dest = b1 & 0x1f;
            let (delay, len) = operand(code, byte(code, pc + 2)? & 0x3f, pc + 3)?;
            (Instr::Send { msg, dest, delay }, pc + 3 + len)
        },
        0x20..=0x2f => {
            let b1 = byte(code, pc + 1)?;
            let func = ((b0 & 0xf) << 3) | (b1 >> 5);
            let dst = b1 & 0x1f;
            let mut at = pc + 2;
            let mut args = Vec::new();
            for _ in 0..call_arity(prog, func)? {
                let (a, len) = operand(code, byte(code, at)? & 0x3f, at + 1)?;
                args.push(a);
                at += 1 + len;
            }
            (Instr::Call { func, dst, args }, at)
        },
        0x30..=0x3f => {
            let b1 = byte(code, pc + 1)?;
            let (src, slen) = operand(code, ((b0 & 0xf) << 2) | (b1 >> 6), pc + 2)?;
            let (dst, dlen) = operand(code, b1 & 0x3f, pc + 2 + slen)?;
            (Instr::Move { src, dst: place(dst, pc)? }, pc + 2 + slen + dlen)
        },
        0x40..=0x5f => {
            let b1 = byte(code, pc + 1)?;
            let ty = ((b0 & 0x1f) << 2) | (b1 >> 6);
            let (dst, len) = operand(code, b1 & 0x3f, pc + 2)?;
            (Instr::Alloc { ty, dst: place(dst, pc)? }, pc + 2 + len)
        },
        0x60..=0x7f => {
            let reg = byte(code, pc + 1)? & 0x1f;
            let jump = byte(code, pc + 2)? as usize | (byte(code, pc + 3)? as usize) << 8;
            (Instr::If { reg, jump }, pc + 4)
        },
        0x80..=0x9f => (Instr::Remove { reg: b0 & 0x1f }, pc + 1),
        ITER_INSTR => {
            let ty = byte(code, pc + 1)? & 0x7f;
            let jump = byte(code, pc + 2)? as usize | (byte(code, pc + 3)? as usize) << 8;
            let mut at = pc + 4;
            let mut matches = Vec::new();
            if byte(code, at + 1)? & ITER_NONE == ITER_NONE {
                at += 2;
            } else {
                loop {
                    let field = byte(code, at)?;
                    let flags = byte(code, at + 1)?;
                    let (value, len) = operand(code, flags & 0x3f, at + 2)?;
                    matches.push(Match { field, value });
                    at += 2 + len;
                    if flags & ITER_LAST != 0 {
                        break;
                    }
                }
            }
            (Instr::Iterate { ty, jump, matches }, at)
        },
        0xc0..=0xff => {
            let b1 = byte(code, pc + 1)?;
            let b2 = byte(code, pc + 2)?;
            let (lhs, llen) = operand(code, b0 & 0x3f, pc + 3)?;
            let (rhs, rlen) = operand(code, b1 >> 2, pc + 3 + llen)?;
            let dst = ((b1 & 0x3) << 3) | (b2 >> 5);
            let op = BinOp::try_from(b2 & 0x1f).map_err(|_|
                Error::with(ErrorKind::BadFormat, format!("unknown operation {:#x} at {:#x}", b2 & 0x1f, pc)))?;
            (Instr::Op { op, lhs, rhs, dst }, pc + 3 + llen + rlen)
        },
        op => return Err(Error::with(ErrorKind::BadFormat,
            format!("unknown opcode {:#x} at {:#x}", op, pc)))
    };
    Ok((instr, end - pc))
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "reg {}", r),
            Operand::Int(i) => write!(f, "{}", i),
            Operand::Float(x) => write!(f, "{:?}", x),
            Operand::Field { reg, field } => write!(f, "{}.{}", reg, field),
            Operand::Nil => write!(f, "nil"),
            Operand::Fact => write!(f, "tuple"),
            Operand::Host => write!(f, "host"),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instr::*;
        match self {
            Return => write!(f, "RETURN"),
            Next => write!(f, "NEXT"),
            Else => write!(f, "ELSE"),
            If { reg, jump } => write!(f, "IF reg {} ELSE +{}", reg, jump),
            Iterate { ty, jump, matches } => {
                write!(f, "ITERATE {} (+{})", ty, jump)?;
                for m in matches.iter() {
                    write!(f, " {}={}", m.field, m.value)?;
                }
                Ok(())
            },
            Send { msg, dest, delay } => write!(f, "SEND reg {} TO reg {} IN {}", msg, dest, delay),
            Remove { reg } => write!(f, "REMOVE reg {}", reg),
            Op { op, lhs, rhs, dst } => write!(f, "OP {} {:?} {} TO reg {}", lhs, op, rhs, dst),
            Move { src, dst } => write!(f, "MOVE {} TO {}", src, dst),
            MoveNil { dst } => write!(f, "MOVE-NIL TO {}", dst),
            Alloc { ty, dst } => write!(f, "ALLOC {} TO {}", ty, dst),
            Call { func, dst, args } => {
                write!(f, "CALL {} TO reg {}", func, dst)?;
                for a in args.iter() {
                    write!(f, " {}", a)?;
                }
                Ok(())
            },
            Cons { head, tail, dst } => write!(f, "CONS {} :: {} TO {}", head, tail, dst),
            Head { list, dst } => write!(f, "HEAD {} TO {}", list, dst),
            Tail { list, dst } => write!(f, "TAIL {} TO {}", list, dst),
            TestNil { src, dst } => write!(f, "TEST-NIL {} TO reg {}", src, dst),
            Not { src, dst } => write!(f, "NOT reg {} TO reg {}", src, dst),
        }
    }
}
