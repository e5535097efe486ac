use std::fmt;

use ordered_float::OrderedFloat;

use crate::program::FieldType;

use super::{Chain, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    Int,
    Float,
}

impl SetKind {
    pub fn of_field(ty: FieldType) -> Option<SetKind> {
        match ty {
            FieldType::SetInt => Some(SetKind::Int),
            FieldType::SetFloat => Some(SetKind::Float),
            _ => None
        }
    }
}

// Sorted, duplicate free. Two sets built from the same elements
// are laid out identically, so equality is a linear walk.
#[derive(Debug, Clone, PartialEq)]
pub enum Set {
    Int(Chain<i32>),
    Float(Chain<OrderedFloat<f32>>),
}

impl Set {
    pub fn new(kind: SetKind) -> Self {
        match kind {
            SetKind::Int => Set::Int(Chain::new()),
            SetKind::Float => Set::Float(Chain::new()),
        }
    }

    pub fn kind(&self) -> SetKind {
        match self {
            Set::Int(_) => SetKind::Int,
            Set::Float(_) => SetKind::Float,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Set::Int(c) => c.len(),
            Set::Float(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, v: &Value) -> bool {
        match (self, v) {
            (Set::Int(c), Value::Int(i)) => c.insert_sorted(*i),
            (Set::Float(c), Value::Float(f)) => c.insert_sorted(OrderedFloat(*f)),
            (s, v) => panic!("cannot put {:?} into a {:?} set", v, s.kind())
        }
    }

    pub fn union(&mut self, other: &Set) {
        match (self, other) {
            (Set::Int(a), Set::Int(b)) => for e in b.iter() { a.insert_sorted(e); },
            (Set::Float(a), Set::Float(b)) => for e in b.iter() { a.insert_sorted(e); },
            (a, b) => panic!("cannot union a {:?} set with a {:?} set", a.kind(), b.kind())
        }
    }

    pub fn values(&self) -> Box<dyn Iterator<Item = Value> + '_> {
        match self {
            Set::Int(c) => Box::new(c.iter().map(Value::Int)),
            Set::Float(c) => Box::new(c.iter().map(|f| Value::Float(f.into_inner()))),
        }
    }
}

impl fmt::Display for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, v) in self.values().enumerate() {
            if i > 0 { write!(f, ", ")?; }
            write!(f, "{}", v)?;
        }
        write!(f, "}}")
    }
}
