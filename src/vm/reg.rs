use std::ops::{Index, IndexMut};

use crate::value::Value;

use super::op::{RegAddr, NUM_REGS};

// One interpreter invocation's scratch registers
#[derive(Debug, Clone, Default)]
pub struct Registers([Value; NUM_REGS]);

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self, r: RegAddr) {
        self.0[r as usize] = Value::Nil;
    }
}

impl Index<RegAddr> for Registers {
    type Output = Value;

    fn index(&self, r: RegAddr) -> &Value {
        &self.0[r as usize]
    }
}

impl IndexMut<RegAddr> for Registers {
    fn index_mut(&mut self, r: RegAddr) -> &mut Value {
        &mut self.0[r as usize]
    }
}
