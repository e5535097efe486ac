use std::fmt;
use std::sync::Arc;

use crate::fact::{Fact, NodeId};
use crate::heap::ObjRef;

pub mod chain;
pub mod list;
pub mod set;

pub use chain::Chain;
pub use list::{List, ListKind};
pub use set::{Set, SetKind};

// What a register (or a decoded field) holds
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Int(i32),
    Float(f32),
    Node(NodeId),
    List(ObjRef),
    Set(ObjRef),
    Fact(Arc<Fact>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            _ => true
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> i32 {
        match self {
            Value::Int(i) => *i,
            v => panic!("expected an int, found {:?}", v)
        }
    }

    pub fn as_float(&self) -> f32 {
        match self {
            Value::Float(f) => *f,
            v => panic!("expected a float, found {:?}", v)
        }
    }

    pub fn as_node(&self) -> NodeId {
        match self {
            Value::Node(n) => *n,
            v => panic!("expected a node, found {:?}", v)
        }
    }

    pub fn as_fact(&self) -> &Arc<Fact> {
        match self {
            Value::Fact(f) => f,
            v => panic!("expected a fact, found {:?}", v)
        }
    }

    // address equality: same heap object, same fact, same node.
    // Scalars compare bitwise.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Node(a), Value::Node(b)) => a == b,
            (Value::List(a), Value::List(b)) | (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Fact(a), Value::Fact(b)) => Arc::ptr_eq(a, b),
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Node(n) => write!(f, "@{}", n),
            Value::List(r) => write!(f, "list#{}", r),
            Value::Set(r) => write!(f, "set#{}", r),
            Value::Fact(t) => write!(f, "fact<{}>", t.ty()),
        }
    }
}
