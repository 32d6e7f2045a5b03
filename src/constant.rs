//! Constant pool: one `arith.constant` per distinct literal text

use indexmap::IndexMap;

use crate::value::{Literal, OpId, Value};

#[derive(Debug, Clone)]
pub struct PooledConstant {
    pub value: Value,
    pub op: OpId,
    pub literal: Literal,
}

/// Canonical literal text -> defining constant op, in first-use order
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    by_text: IndexMap<String, PooledConstant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, literal: &Literal) -> Option<&PooledConstant> {
        self.by_text.get(&literal.canonical_text())
    }

    pub(crate) fn insert(&mut self, literal: Literal, value: Value, op: OpId) {
        self.by_text.insert(
            literal.canonical_text(),
            PooledConstant { value, op, literal },
        );
    }

    pub fn len(&self) -> usize {
        self.by_text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_text.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PooledConstant> {
        self.by_text.values()
    }
}
