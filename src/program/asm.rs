// A small assembler for program blobs. The compiler proper lives
// outside this crate, this is what the tests and tools use to
// put programs together by hand.

use bytes::Bytes;

use crate::Result;
use crate::vm::Externs;
use crate::vm::op::*;

use super::{AggOp, FieldType, Program, Props, TypeId};

#[derive(Debug, Clone)]
pub struct TypeDecl {
    name: String,
    props: Props,
    agg: Option<(AggOp, usize)>,
    round: u8,
    fields: Vec<FieldType>,
    deltas: Vec<(TypeId, usize)>,
}

impl TypeDecl {
    pub fn new(name: &str, fields: &[FieldType]) -> Self {
        TypeDecl {
            name: name.to_string(),
            props: Props::empty(),
            agg: None, round: 0,
            fields: fields.to_vec(),
            deltas: Vec::new()
        }
    }

    pub fn linear(mut self) -> Self {
        self.props |= Props::LINEAR;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.props |= Props::PERSISTENT;
        self
    }

    pub fn props(mut self, props: Props) -> Self {
        self.props |= props;
        self
    }

    pub fn aggregate(mut self, op: AggOp, field: usize) -> Self {
        self.props |= Props::AGG;
        self.agg = Some((op, field));
        self
    }

    pub fn round(mut self, round: u8) -> Self {
        self.round = round;
        self
    }

    pub fn delta(mut self, ty: TypeId, field: usize) -> Self {
        self.deltas.push((ty, field));
        self
    }
}

#[derive(Debug, Default)]
pub struct ProgramBuilder {
    types: Vec<(TypeDecl, Vec<u8>)>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decl(&mut self, decl: TypeDecl) -> TypeId {
        let id = self.types.len() as TypeId;
        self.types.push((decl, vec![RETURN_INSTR]));
        id
    }

    pub fn body<F: FnOnce(&mut CodeWriter)>(&mut self, ty: TypeId, f: F) -> &mut Self {
        let mut w = CodeWriter::new();
        f(&mut w);
        self.types[ty as usize].1 = w.finish();
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.types.iter().map(|(d, _)| d.name.clone()).collect()
    }

    pub fn build(&self) -> Bytes {
        let count = self.types.len();
        let mut out = vec![count as u8];
        let table = out.len();
        out.resize(table + 2 * count, 0);

        let desc_len : usize = self.types.iter()
            .map(|(d, _)| 7 + d.fields.len() + 2 * d.deltas.len()).sum();
        let mut body_at = table + 2 * count + desc_len;

        for (i, (d, code)) in self.types.iter().enumerate() {
            let at = out.len();
            out[table + 2 * i] = at as u8;
            out[table + 2 * i + 1] = (at >> 8) as u8;
            out.push(body_at as u8);
            out.push((body_at >> 8) as u8);
            out.push(d.props.bits());
            out.push(match d.agg {
                Some((op, field)) => (u8::from(op) << 4) | (field as u8 & 0xf),
                None => 0
            });
            out.push(d.round);
            out.push(d.fields.len() as u8);
            out.push(d.deltas.len() as u8);
            out.extend(d.fields.iter().map(|f| u8::from(*f)));
            for (ty, field) in d.deltas.iter() {
                out.push(*ty);
                out.push(*field as u8);
            }
            body_at += code.len();
        }
        for (_, code) in self.types.iter() {
            out.extend_from_slice(code);
        }
        Bytes::from(out)
    }

    pub fn load(&self) -> Result<Program> {
        Program::load(self.build(), &self.names())
    }

    pub fn load_with(&self, externs: &Externs) -> Result<Program> {
        Program::load_with(self.build(), &self.names(), externs)
    }
}

pub fn reg(r: RegAddr) -> Operand {
    Operand::Reg(r)
}

pub fn field(reg: RegAddr, field: u8) -> Operand {
    Operand::Field { reg, field }
}

#[derive(Debug, Default)]
pub struct CodeWriter {
    code: Vec<u8>,
}

impl CodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }

    fn tag(o: &Operand) -> u8 {
        match o {
            Operand::Float(_) => VAL_FLOAT,
            Operand::Int(_) => VAL_INT,
            Operand::Field { .. } => VAL_FIELD,
            Operand::Host => VAL_HOST,
            Operand::Nil => VAL_NIL,
            Operand::Fact => VAL_TUPLE,
            Operand::Reg(r) => VAL_REG | (r & 0x1f)
        }
    }

    fn payload(&mut self, o: &Operand) {
        match o {
            Operand::Float(f) => self.code.extend_from_slice(&f.to_le_bytes()),
            Operand::Int(i) => self.code.extend_from_slice(&i.to_le_bytes()),
            Operand::Field { reg, field } => {
                self.code.push(*field);
                self.code.push(reg & 0x1f);
            },
            _ => ()
        }
    }

    fn tagged(&mut self, opcode: u8, ops: &[Operand]) -> &mut Self {
        self.code.push(opcode);
        for o in ops.iter() {
            self.code.push(Self::tag(o));
        }
        for o in ops.iter() {
            self.payload(o);
        }
        self
    }

    // writes a relative jump at `at`, measured from `from`
    fn patch(&mut self, at: usize, from: usize) {
        let rel = self.code.len() - from;
        self.code[at] = rel as u8;
        self.code[at + 1] = (rel >> 8) as u8;
    }

    pub fn ret(&mut self) -> &mut Self {
        self.code.push(RETURN_INSTR);
        self
    }

    pub fn next(&mut self) -> &mut Self {
        self.code.push(NEXT_INSTR);
        self
    }

    pub fn else_(&mut self) -> &mut Self {
        self.code.push(ELSE_INSTR);
        self
    }

    // `then` runs when the register is true, otherwise
    // execution continues after it
    pub fn if_<F: FnOnce(&mut CodeWriter)>(&mut self, r: RegAddr, then: F) -> &mut Self {
        let start = self.code.len();
        self.code.extend_from_slice(&[IF_BASE, r & 0x1f, 0, 0]);
        then(self);
        self.patch(start + 2, start);
        self
    }

    pub fn iterate<F>(&mut self, ty: TypeId, matches: &[(u8, Operand)], body: F) -> &mut Self
            where F: FnOnce(&mut CodeWriter) {
        let start = self.code.len();
        self.code.extend_from_slice(&[ITER_INSTR, ty & 0x7f, 0, 0]);
        if matches.is_empty() {
            self.code.extend_from_slice(&[0, ITER_NONE]);
        }
        for (i, (f, v)) in matches.iter().enumerate() {
            let last = if i + 1 == matches.len() { ITER_LAST } else { 0 };
            self.code.push(*f);
            self.code.push(Self::tag(v) | last);
            self.payload(v);
        }
        body(self);
        self.patch(start + 2, start);
        self
    }

    pub fn send(&mut self, msg: RegAddr, dest: RegAddr) -> &mut Self {
        self.send_delay(msg, dest, Operand::Int(0))
    }

    pub fn send_delay(&mut self, msg: RegAddr, dest: RegAddr, delay: Operand) -> &mut Self {
        self.code.push(SEND_BASE | ((msg >> 3) & 0x3));
        self.code.push(((msg & 0x7) << 5) | (dest & 0x1f));
        self.code.push(Self::tag(&delay));
        self.payload(&delay);
        self
    }

    pub fn remove(&mut self, r: RegAddr) -> &mut Self {
        self.code.push(REMOVE_BASE | (r & 0x1f));
        self
    }

    pub fn op(&mut self, op: BinOp, lhs: Operand, rhs: Operand, dst: RegAddr) -> &mut Self {
        self.code.push(OP_BASE | Self::tag(&lhs));
        self.code.push((Self::tag(&rhs) << 2) | ((dst >> 3) & 0x3));
        self.code.push(((dst & 0x7) << 5) | u8::from(op));
        self.payload(&lhs);
        self.payload(&rhs);
        self
    }

    pub fn mov(&mut self, src: Operand, dst: Operand) -> &mut Self {
        let s = Self::tag(&src);
        self.code.push(MOVE_BASE | (s >> 2));
        self.code.push(((s & 0x3) << 6) | Self::tag(&dst));
        self.payload(&src);
        self.payload(&dst);
        self
    }

    pub fn move_nil(&mut self, dst: Operand) -> &mut Self {
        self.tagged(MOVE_NIL_INSTR, &[dst])
    }

    pub fn alloc(&mut self, ty: TypeId, dst: RegAddr) -> &mut Self {
        self.alloc_into(ty, Operand::Reg(dst))
    }

    // a fresh fact straight into a register or a field
    pub fn alloc_into(&mut self, ty: TypeId, dst: Operand) -> &mut Self {
        self.code.push(ALLOC_BASE | ((ty >> 2) & 0x1f));
        self.code.push(((ty & 0x3) << 6) | Self::tag(&dst));
        self.payload(&dst);
        self
    }

    pub fn call(&mut self, func: u8, dst: RegAddr, args: &[Operand]) -> &mut Self {
        self.code.push(CALL_BASE | ((func >> 3) & 0xf));
        self.code.push(((func & 0x7) << 5) | (dst & 0x1f));
        for a in args.iter() {
            self.code.push(Self::tag(a));
            self.payload(a);
        }
        self
    }

    pub fn cons(&mut self, head: Operand, tail: Operand, dst: Operand) -> &mut Self {
        self.tagged(CONS_INSTR, &[head, tail, dst])
    }

    pub fn head(&mut self, list: Operand, dst: Operand) -> &mut Self {
        self.tagged(HEAD_INSTR, &[list, dst])
    }

    pub fn tail(&mut self, list: Operand, dst: Operand) -> &mut Self {
        self.tagged(TAIL_INSTR, &[list, dst])
    }

    pub fn test_nil(&mut self, src: Operand, dst: RegAddr) -> &mut Self {
        self.code.push(TEST_NIL_INSTR);
        self.code.push(Self::tag(&src));
        self.code.push(dst & 0x1f);
        self.payload(&src);
        self
    }

    pub fn not(&mut self, src: RegAddr, dst: RegAddr) -> &mut Self {
        self.code.extend_from_slice(&[NOT_INSTR, src & 0x1f, dst & 0x1f]);
        self
    }

    // raw bytes, for exercising the decoder on malformed input
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }
}
