use std::fmt;

use crate::fact::NodeId;
use crate::program::FieldType;

use super::{Chain, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Int,
    Float,
    Node,
}

impl ListKind {
    pub fn of_field(ty: FieldType) -> Option<ListKind> {
        match ty {
            FieldType::ListInt => Some(ListKind::Int),
            FieldType::ListFloat => Some(ListKind::Float),
            FieldType::ListAddr => Some(ListKind::Node),
            _ => None
        }
    }

    // the kind a list must have to cons this value onto it
    pub fn of_value(v: &Value) -> Option<ListKind> {
        match v {
            Value::Int(_) => Some(ListKind::Int),
            Value::Float(_) => Some(ListKind::Float),
            Value::Node(_) => Some(ListKind::Node),
            _ => None
        }
    }
}

// Homogeneous singly linked list. Callers copy before mutating
// a list that is reachable from a stored fact.
#[derive(Debug, Clone, PartialEq)]
pub enum List {
    Int(Chain<i32>),
    Float(Chain<f32>),
    Node(Chain<NodeId>),
}

impl List {
    pub fn new(kind: ListKind) -> Self {
        match kind {
            ListKind::Int => List::Int(Chain::new()),
            ListKind::Float => List::Float(Chain::new()),
            ListKind::Node => List::Node(Chain::new()),
        }
    }

    pub fn from_ints<I: IntoIterator<Item = i32>>(i: I) -> Self {
        List::Int(i.into_iter().collect())
    }

    pub fn from_floats<I: IntoIterator<Item = f32>>(i: I) -> Self {
        List::Float(i.into_iter().collect())
    }

    pub fn kind(&self) -> ListKind {
        match self {
            List::Int(_) => ListKind::Int,
            List::Float(_) => ListKind::Float,
            List::Node(_) => ListKind::Node,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            List::Int(c) => c.len(),
            List::Float(c) => c.len(),
            List::Node(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head(&self) -> Option<Value> {
        match self {
            List::Int(c) => c.first().map(Value::Int),
            List::Float(c) => c.first().map(Value::Float),
            List::Node(c) => c.first().map(Value::Node),
        }
    }

    pub fn push_head(&mut self, v: &Value) {
        match (self, v) {
            (List::Int(c), Value::Int(i)) => c.push_head(*i),
            (List::Float(c), Value::Float(f)) => c.push_head(*f),
            (List::Node(c), Value::Node(n)) => c.push_head(*n),
            (l, v) => panic!("cannot put {:?} into a {:?} list", v, l.kind())
        }
    }

    pub fn push_tail(&mut self, v: &Value) {
        match (self, v) {
            (List::Int(c), Value::Int(i)) => c.push_tail(*i),
            (List::Float(c), Value::Float(f)) => c.push_tail(*f),
            (List::Node(c), Value::Node(n)) => c.push_tail(*n),
            (l, v) => panic!("cannot put {:?} into a {:?} list", v, l.kind())
        }
    }

    pub fn pop_head(&mut self) -> Option<Value> {
        match self {
            List::Int(c) => c.pop_head().map(Value::Int),
            List::Float(c) => c.pop_head().map(Value::Float),
            List::Node(c) => c.pop_head().map(Value::Node),
        }
    }

    pub fn values(&self) -> Box<dyn Iterator<Item = Value> + '_> {
        match self {
            List::Int(c) => Box::new(c.iter().map(Value::Int)),
            List::Float(c) => Box::new(c.iter().map(Value::Float)),
            List::Node(c) => Box::new(c.iter().map(Value::Node)),
        }
    }

    // multiplies every element by a contributor's multiplicity
    pub fn scale(&mut self, by: i32) {
        match self {
            List::Int(c) => c.map_in_place(|x| x.wrapping_mul(by)),
            List::Float(c) => c.map_in_place(|x| x * by as f32),
            List::Node(_) => panic!("cannot sum a list of nodes")
        }
    }

    // self += other * by, elementwise. The lengths must agree.
    pub fn add_scaled(&mut self, other: &List, by: i32) {
        if self.len() != other.len() {
            panic!("summing lists of different lengths ({} and {})", self.len(), other.len());
        }
        match (self, other) {
            (List::Int(a), List::Int(b)) => a.zip_in_place(b, |x, y| x.wrapping_add(y.wrapping_mul(by))),
            (List::Float(a), List::Float(b)) => a.zip_in_place(b, |x, y| x + y * by as f32),
            (a, b) => panic!("cannot sum a {:?} list with a {:?} list", a.kind(), b.kind())
        }
    }
}

impl fmt::Display for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.values().enumerate() {
            if i > 0 { write!(f, ", ")?; }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}
