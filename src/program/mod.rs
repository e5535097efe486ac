use std::convert::TryFrom;
use std::fmt::Write;

use bitflags::bitflags;
use bytes::Bytes;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Error, ErrorKind, Result};
use crate::vm::Externs;
use crate::vm::op::{self, Instr};

pub mod asm;

pub type TypeId = u8;

// ALLOC and ITERATE carry 7 bit type ids
pub const MAX_TYPES: usize = 128;
pub const MAX_EXTERNS: usize = 128;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Props: u8 {
        const AGG        = 0x01;
        const PERSISTENT = 0x02;
        const LINEAR     = 0x04;
        const DELETE     = 0x08;
        const SCHEDULE   = 0x10;
        const ROUTING    = 0x20;
        const PROVED     = 0x40;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FieldType {
    Int = 0,
    Float = 1,
    Addr = 2,
    ListInt = 3,
    ListFloat = 4,
    ListAddr = 5,
    SetInt = 6,
    SetFloat = 7,
    Type = 8,
}

impl FieldType {
    pub fn size(self) -> usize {
        use FieldType::*;
        match self {
            Int | Float | Type => 4,
            Addr | ListInt | ListFloat | ListAddr | SetInt | SetFloat => 8
        }
    }

    pub fn is_list(self) -> bool {
        matches!(self, FieldType::ListInt | FieldType::ListFloat | FieldType::ListAddr)
    }

    pub fn is_set(self) -> bool {
        matches!(self, FieldType::SetInt | FieldType::SetFloat)
    }

    // does this field hold a heap object handle
    pub fn is_object(self) -> bool {
        self.is_list() || self.is_set()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum AggOp {
    First = 1,
    MaxInt = 2,
    MinInt = 3,
    SumInt = 4,
    MaxFloat = 5,
    MinFloat = 6,
    SumFloat = 7,
    SetUnionInt = 8,
    SetUnionFloat = 9,
    SumListInt = 10,
    SumListFloat = 11,
}

impl AggOp {
    // the field type the aggregated slot must be declared with,
    // None if any type will do
    pub fn field_type(self) -> Option<FieldType> {
        use AggOp::*;
        match self {
            First => None,
            MaxInt | MinInt | SumInt => Some(FieldType::Int),
            MaxFloat | MinFloat | SumFloat => Some(FieldType::Float),
            SetUnionInt => Some(FieldType::SetInt),
            SetUnionFloat => Some(FieldType::SetFloat),
            SumListInt => Some(FieldType::ListInt),
            SumListFloat => Some(FieldType::ListFloat),
        }
    }

    pub fn is_set_union(self) -> bool {
        matches!(self, AggOp::SetUnionInt | AggOp::SetUnionFloat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggSpec {
    pub op: AggOp,
    pub field: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaSpec {
    pub ty: TypeId,
    pub field: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub ty: FieldType,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct TypeDesc {
    pub id: TypeId,
    pub name: String,
    pub props: Props,
    pub agg: Option<AggSpec>,
    pub round: u8,
    pub fields: Vec<Field>,
    pub deltas: Vec<DeltaSpec>,
    pub size: usize,
    // rule body is code[start..end]
    pub start: usize,
    pub end: usize,
}

impl TypeDesc {
    pub fn is_persistent(&self) -> bool { self.props.contains(Props::PERSISTENT) }
    pub fn is_linear(&self) -> bool { self.props.contains(Props::LINEAR) }
    pub fn is_delta(&self) -> bool { !self.deltas.is_empty() }

    pub fn field(&self, idx: usize) -> Field {
        match self.fields.get(idx) {
            Some(f) => *f,
            None => panic!("type {} has no field {}", self.name, idx)
        }
    }

    // bytes that make up the aggregate group key
    pub fn key_len(&self) -> usize {
        match self.agg {
            Some(a) => self.fields[a.field].offset,
            None => self.size
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reserved {
    pub init: Option<TypeId>,
    pub edge: Option<TypeId>,
    pub proved: Option<TypeId>,
    pub terminate: Option<TypeId>,
    pub terminated: Option<TypeId>,
}

// The loaded, immutable program. Built once and shared
// by reference with every component.
#[derive(Debug)]
pub struct Program {
    code: Bytes,
    types: Vec<TypeDesc>,
    arities: Vec<Option<u8>>,
    reserved: Reserved,
}

fn byte(code: &[u8], at: usize) -> Result<u8> {
    code.get(at).copied().ok_or_else(||
        Error::new_const(ErrorKind::BadFormat, "program truncated"))
}

fn word(code: &[u8], at: usize) -> Result<usize> {
    Ok(byte(code, at)? as usize | (byte(code, at + 1)? as usize) << 8)
}

impl Program {
    pub fn load<C: Into<Bytes>>(code: C, names: &[String]) -> Result<Program> {
        Program::load_with(code, names, &Externs::new())
    }

    pub fn load_with<C: Into<Bytes>>(code: C, names: &[String], externs: &Externs) -> Result<Program> {
        let code : Bytes = code.into();
        let count = byte(&code, 0)? as usize;
        if count == 0 || count > MAX_TYPES {
            return Err(Error::with(ErrorKind::BadFormat,
                format!("bad type count {}", count)));
        }
        let mut types = Vec::with_capacity(count);
        for id in 0..count {
            let at = word(&code, 1 + 2 * id)?;
            types.push(Self::load_type(&code, id as TypeId, at, names)?);
        }
        // deltas may only point at types we know about
        for t in types.iter() {
            for d in t.deltas.iter() {
                let target = types.get(d.ty as usize).ok_or_else(||
                    Error::with(ErrorKind::BadType,
                        format!("{} has a delta for unknown type {}", t.name, d.ty)))?;
                let f = t.fields.get(d.field).ok_or_else(||
                    Error::with(ErrorKind::BadFormat,
                        format!("{} has a delta on missing field {}", t.name, d.field)))?;
                if !matches!(f.ty, FieldType::Int | FieldType::Float) {
                    return Err(Error::with(ErrorKind::BadType,
                        format!("{} has a delta on non numeric field {}", t.name, d.field)));
                }
                if target.fields.get(d.field).map(|x| x.ty) != Some(f.ty) {
                    return Err(Error::with(ErrorKind::BadType,
                        format!("delta type {} does not match {}", target.name, t.name)));
                }
            }
        }
        // body ends at the next body start
        let mut starts : Vec<usize> = types.iter().map(|t| t.start).collect();
        starts.sort_unstable();
        starts.dedup();
        for t in types.iter_mut() {
            t.end = starts.iter().copied().find(|s| *s > t.start).unwrap_or(code.len());
            if t.start > code.len() {
                return Err(Error::with(ErrorKind::BadFormat,
                    format!("{} starts past the end of the program", t.name)));
            }
        }
        let reserved = Reserved {
            init: Self::find(&types, "_init"),
            edge: Self::find(&types, "edge"),
            proved: Self::find(&types, "proved"),
            terminate: Self::find(&types, "terminate"),
            terminated: Self::find(&types, "terminated"),
        };
        let prog = Program {
            code, types, reserved,
            arities: (0..MAX_EXTERNS).map(|i| externs.arity(i as u8)).collect()
        };
        prog.validate()?;
        log::debug!(target: "program", "loaded {} types, {} bytes of code",
                    prog.types.len(), prog.code.len());
        Ok(prog)
    }

    fn find(types: &[TypeDesc], name: &str) -> Option<TypeId> {
        types.iter().find(|t| t.name == name).map(|t| t.id)
    }

    fn load_type(code: &[u8], id: TypeId, at: usize, names: &[String]) -> Result<TypeDesc> {
        let name = names.get(id as usize).cloned()
                        .unwrap_or_else(|| format!("type{}", id));
        let start = word(code, at)?;
        let props = Props::from_bits(byte(code, at + 2)?).ok_or_else(||
            Error::with(ErrorKind::BadFormat, format!("{} has unknown property bits", name)))?;
        let agg_byte = byte(code, at + 3)?;
        let round = byte(code, at + 4)?;
        let nargs = byte(code, at + 5)? as usize;
        let ndeltas = byte(code, at + 6)? as usize;

        let mut fields = Vec::with_capacity(nargs);
        let mut offset = 0;
        for i in 0..nargs {
            let tag = byte(code, at + 7 + i)?;
            let ty = FieldType::try_from(tag).map_err(|_|
                Error::with(ErrorKind::BadType,
                    format!("{} field {} has unknown type tag {:#x}", name, i, tag)))?;
            fields.push(Field { ty, offset });
            offset += ty.size();
        }
        let mut deltas = Vec::with_capacity(ndeltas);
        let base = at + 7 + nargs;
        for i in 0..ndeltas {
            deltas.push(DeltaSpec {
                ty: byte(code, base + 2 * i)?,
                field: byte(code, base + 2 * i + 1)? as usize,
            });
        }

        let agg = match agg_byte >> 4 {
            0 => None,
            o => {
                let op = AggOp::try_from(o).map_err(|_|
                    Error::with(ErrorKind::BadFormat,
                        format!("{} has unknown aggregate {}", name, o)))?;
                let field = (agg_byte & 0xf) as usize;
                let f = fields.get(field).ok_or_else(||
                    Error::with(ErrorKind::BadFormat,
                        format!("{} aggregates missing field {}", name, field)))?;
                if let Some(expect) = op.field_type() {
                    if expect != f.ty {
                        return Err(Error::with(ErrorKind::BadType,
                            format!("{} aggregates {:?} with {:?}", name, f.ty, op)));
                    }
                }
                Some(AggSpec { op, field })
            }
        };
        if agg.is_some() != props.contains(Props::AGG) {
            return Err(Error::with(ErrorKind::BadFormat,
                format!("{} aggregate flag disagrees with aggregate spec", name)));
        }
        if props.contains(Props::DELETE) && fields.first().map(|f| f.ty) != Some(FieldType::Type) {
            return Err(Error::with(ErrorKind::BadType,
                format!("delete marker {} must name a type in field 0", name)));
        }
        if !deltas.is_empty() && !props.contains(Props::LINEAR) {
            return Err(Error::with(ErrorKind::BadFormat,
                format!("{} tracks deltas but is not linear", name)));
        }
        Ok(TypeDesc {
            id, name, props, agg, round, fields, deltas,
            size: offset, start, end: start
        })
    }

    // decode every body once so the interpreter never sees
    // a malformed instruction
    fn validate(&self) -> Result<()> {
        for t in self.types.iter() {
            let mut pc = t.start;
            while pc < t.end {
                let (instr, len) = op::decode(self, pc)?;
                match instr {
                    Instr::Alloc { ty, .. } | Instr::Iterate { ty, .. } => {
                        if ty as usize >= self.types.len() {
                            return Err(Error::with(ErrorKind::BadType,
                                format!("{} at {:#x} references unknown type {}", t.name, pc, ty)));
                        }
                    },
                    _ => ()
                }
                pc += len;
            }
        }
        Ok(())
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn types(&self) -> &[TypeDesc] {
        &self.types
    }

    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    pub fn ty(&self, id: TypeId) -> &TypeDesc {
        match self.types.get(id as usize) {
            Some(t) => t,
            None => panic!("unknown type id {}", id)
        }
    }

    pub fn type_named(&self, name: &str) -> Option<&TypeDesc> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn reserved(&self) -> &Reserved {
        &self.reserved
    }

    pub fn arity(&self, func: u8) -> Option<usize> {
        self.arities.get(func as usize).copied().flatten().map(|a| a as usize)
    }

    pub fn info(&self) -> String {
        let mut s = String::new();
        for t in self.types.iter() {
            let _ = write!(s, "{:>3} {}(", t.id, t.name);
            for (i, f) in t.fields.iter().enumerate() {
                if i > 0 { s.push_str(", "); }
                let _ = write!(s, "{:?}", f.ty);
            }
            let _ = write!(s, ") size={} props={:?}", t.size, t.props);
            if let Some(a) = t.agg {
                let _ = write!(s, " agg={:?}@{}", a.op, a.field);
            }
            if t.round > 0 {
                let _ = write!(s, " round={}", t.round);
            }
            for d in t.deltas.iter() {
                let _ = write!(s, " delta={}@{}", self.ty(d.ty).name, d.field);
            }
            s.push('\n');
        }
        s
    }

    pub fn disassemble(&self, ty: TypeId) -> String {
        let t = self.ty(ty);
        let mut s = format!("{}:\n", t.name);
        let mut pc = t.start;
        while pc < t.end {
            match op::decode(self, pc) {
                Ok((instr, len)) => {
                    let _ = writeln!(s, "  {:04x}  {}", pc, instr);
                    pc += len;
                },
                Err(e) => {
                    let _ = writeln!(s, "  {:04x}  <{}>", pc, e);
                    break;
                }
            }
        }
        s
    }
}
