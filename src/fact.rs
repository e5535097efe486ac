use std::fmt::Write;
use std::sync::Arc;

use crate::heap::{Heap, ObjRef};
use crate::program::{FieldType, Program, TypeId};
use crate::value::Value;

pub type NodeId = u64;

// A fact: a type id plus its fields packed by the type's
// layout. Equality is type plus byte equality of the fields,
// which makes list and set fields compare by handle.
// A fact allocated straight into a field of another sits in
// `nested`, keyed by the byte offset of that field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    ty: TypeId,
    data: Box<[u8]>,
    nested: Vec<(usize, Arc<Fact>)>,
}

impl Fact {
    pub fn new(prog: &Program, ty: TypeId) -> Fact {
        Fact { ty, data: vec![0; prog.ty(ty).size].into_boxed_slice(), nested: Vec::new() }
    }

    // a fact with the given field values, in order
    pub fn with(prog: &Program, ty: TypeId, values: &[Value]) -> Fact {
        let mut f = Fact::new(prog, ty);
        for (i, v) in values.iter().enumerate() {
            f.set(prog, i, v);
        }
        f
    }

    pub fn ty(&self) -> TypeId {
        self.ty
    }

    fn slot(&self, prog: &Program, idx: usize) -> (FieldType, std::ops::Range<usize>) {
        let f = prog.ty(self.ty).field(idx);
        (f.ty, f.offset..f.offset + f.ty.size())
    }

    fn nested_at(&self, at: usize) -> Option<&Arc<Fact>> {
        self.nested.iter().find(|(o, _)| *o == at).map(|(_, f)| f)
    }

    // facts held directly in fields of this one
    pub fn nested(&self) -> impl Iterator<Item = &Arc<Fact>> {
        self.nested.iter().map(|(_, f)| f)
    }

    pub fn get(&self, prog: &Program, idx: usize) -> Value {
        let (ty, r) = self.slot(prog, idx);
        if let Some(f) = self.nested_at(r.start) {
            return Value::Fact(f.clone());
        }
        let b = &self.data[r];
        match ty {
            FieldType::Int | FieldType::Type => Value::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            FieldType::Float => Value::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            FieldType::Addr => Value::Node(u64::from_le_bytes(word(b))),
            t => match ObjRef::from_raw(u64::from_le_bytes(word(b))) {
                None => Value::Nil,
                Some(r) if t.is_list() => Value::List(r),
                Some(r) => Value::Set(r)
            }
        }
    }

    pub fn set(&mut self, prog: &Program, idx: usize, v: &Value) {
        let desc = prog.ty(self.ty);
        let (ty, r) = self.slot(prog, idx);
        self.nested.retain(|(o, _)| *o != r.start);
        if let Value::Fact(f) = v {
            // any pointer sized slot can hold one
            if ty.size() != 8 {
                panic!("cannot store a fact in a {:?} field of {}", ty, desc.name);
            }
            self.data[r.clone()].fill(0);
            self.nested.push((r.start, f.clone()));
            self.nested.sort_by_key(|(o, _)| *o);
            return;
        }
        // only set union contributors carry a bare element in a set field
        let elem = desc.agg.map_or(false, |a| a.op.is_set_union() && a.field == idx);
        let b = &mut self.data[r];
        match (ty, v) {
            (FieldType::Int | FieldType::Type, Value::Int(i)) => b.copy_from_slice(&i.to_le_bytes()),
            (FieldType::Float, Value::Float(f)) => b.copy_from_slice(&f.to_le_bytes()),
            (FieldType::Addr, Value::Node(n)) => b.copy_from_slice(&n.to_le_bytes()),
            (t, Value::Nil) if t.is_object() => b.copy_from_slice(&0u64.to_le_bytes()),
            (t, Value::List(o)) if t.is_list() => b.copy_from_slice(&o.raw().to_le_bytes()),
            (t, Value::Set(o)) if t.is_set() => b.copy_from_slice(&o.raw().to_le_bytes()),
            // a set union contributor's element
            (FieldType::SetInt, Value::Int(i)) if elem => {
                b.fill(0);
                b[..4].copy_from_slice(&i.to_le_bytes());
            },
            (FieldType::SetFloat, Value::Float(f)) if elem => {
                b.fill(0);
                b[..4].copy_from_slice(&f.to_le_bytes());
            },
            (t, v) => panic!("cannot store {:?} in a {:?} field of {}", v, t, desc.name)
        }
    }

    // the element a set union contributor carries in its set slot
    pub fn elem(&self, prog: &Program, idx: usize) -> Value {
        let (ty, r) = self.slot(prog, idx);
        let b = &self.data[r];
        match ty {
            FieldType::SetInt => Value::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            FieldType::SetFloat => Value::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            t => panic!("{:?} field has no element", t)
        }
    }

    pub fn int(&self, prog: &Program, idx: usize) -> i32 {
        self.get(prog, idx).as_int()
    }

    pub fn float(&self, prog: &Program, idx: usize) -> f32 {
        self.get(prog, idx).as_float()
    }

    pub fn node(&self, prog: &Program, idx: usize) -> NodeId {
        self.get(prog, idx).as_node()
    }

    // the heap object in a list or set field, None for nil
    pub fn obj(&self, prog: &Program, idx: usize) -> Option<ObjRef> {
        match self.get(prog, idx) {
            Value::List(r) | Value::Set(r) => Some(r),
            _ => None
        }
    }

    // same type and the first `len` bytes agree
    pub fn prefix_eq(&self, other: &Fact, len: usize) -> bool {
        let inside = |f: &&(usize, Arc<Fact>)| f.0 < len;
        self.ty == other.ty && self.data[..len] == other.data[..len]
            && self.nested.iter().filter(inside).eq(other.nested.iter().filter(inside))
    }

    // overwrite bytes from `from` onwards with other's
    pub fn copy_tail(&mut self, other: &Fact, from: usize) {
        let n = self.data.len().min(other.data.len());
        if from < n {
            self.data[from..n].copy_from_slice(&other.data[from..n]);
            self.nested.retain(|(o, _)| *o < from || *o >= n);
            self.nested.extend(other.nested.iter().filter(|(o, _)| *o >= from && *o < n).cloned());
            self.nested.sort_by_key(|(o, _)| *o);
        }
    }

    // copies as many leading bytes as both layouts hold
    pub fn copy_prefix(&mut self, other: &Fact) {
        let n = self.data.len().min(other.data.len());
        self.data[..n].copy_from_slice(&other.data[..n]);
        self.nested.retain(|(o, _)| *o >= n);
        self.nested.extend(other.nested.iter().filter(|(o, _)| *o < n).cloned());
        self.nested.sort_by_key(|(o, _)| *o);
    }

    // every heap object referenced from this fact
    pub fn objects<'a>(&'a self, prog: &'a Program) -> impl Iterator<Item = (usize, ObjRef)> + 'a {
        prog.ty(self.ty).fields.iter().enumerate()
            .filter(|(_, f)| f.ty.is_object())
            .filter_map(move |(i, _)| self.obj(prog, i).map(|r| (i, r)))
    }

    pub fn show(&self, prog: &Program, heap: &Heap) -> String {
        let desc = prog.ty(self.ty);
        let mut s = format!("{}(", desc.name);
        for i in 0..desc.fields.len() {
            if i > 0 { s.push_str(", "); }
            let _ = match self.get(prog, i) {
                Value::List(r) if heap.contains(r) => heap.list(r, |l| write!(s, "{}", l)),
                Value::Set(r) if heap.contains(r) => heap.set(r, |x| write!(s, "{}", x)),
                Value::Fact(n) => write!(s, "{}", n.show(prog, heap)),
                v => write!(s, "{}", v)
            };
        }
        s.push(')');
        s
    }
}

fn word(b: &[u8]) -> [u8; 8] {
    let mut w = [0; 8];
    w.copy_from_slice(&b[..8]);
    w
}
