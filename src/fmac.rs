//! Fused multiply-accumulate builder
//!
//! A builder collects the terms of one fused unit without emitting anything;
//! `result` then emits a single `fmac.<pairs>` operation.
//!
//! ```text
//! let mut unit = FmacBuilder::new(&[i, j])?;
//! let mut acc: Operand = bias.into();
//! for (w, x) in pairs {
//!     let p = unit.mul(state, w, x)?;
//!     acc = unit.add(state, acc, p).into();
//! }
//! let y = unit.result(state, true)?;
//! ```

use std::collections::HashSet;

use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::op::{OpType, PeIndex};
use crate::state::{CompilerState, OpOptions};
use crate::value::{Operand, Value, ValueId};

pub struct FmacBuilder {
    pe: PeIndex,
    mul_operands: Vec<Operand>,
    add_operands: Vec<Operand>,
    /// Placeholders handed out by this builder
    terms: HashSet<ValueId>,
}

impl FmacBuilder {
    pub fn new(coords: &[usize]) -> CompileResult<Self> {
        let pe = PeIndex::canonicalize(coords)?;
        debug!(pe = %pe, "fmac starts");
        Ok(Self {
            pe,
            mul_operands: Vec::new(),
            add_operands: Vec::new(),
            terms: HashSet::new(),
        })
    }

    pub fn pe(&self) -> PeIndex {
        self.pe
    }

    /// Number of multiply pairs recorded so far
    pub fn pairs(&self) -> usize {
        self.mul_operands.len() / 2
    }

    fn is_term(&self, operand: &Operand) -> bool {
        matches!(operand, Operand::Value(v) if self.terms.contains(v.id()))
    }

    fn placeholder(&mut self, state: &mut CompilerState, name: String) -> Value {
        let term = state.fresh_value(name);
        self.terms.insert(term.id().clone());
        term
    }

    /// Record an addition. Exactly one `add` operand over the builder's
    /// lifetime may come from outside the builder: the accumulator.
    pub fn add(
        &mut self,
        state: &mut CompilerState,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> Value {
        let (a, b) = (a.into(), b.into());
        let name = format!("FMAC_ADD_{}({}, {})", self.pe, a, b);
        self.add_operands.push(a);
        self.add_operands.push(b);
        self.placeholder(state, name)
    }

    /// Record one multiply pair
    pub fn mul(
        &mut self,
        state: &mut CompilerState,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> CompileResult<Value> {
        let (a, b) = (a.into(), b.into());
        if self.is_term(&a) || self.is_term(&b) {
            return Err(CompileError::operand(format!(
                "FMAC at {} cannot multiply its own partial terms",
                self.pe
            )));
        }
        let name = format!("FMAC_MUL_{}({}, {})", self.pe, a, b);
        self.mul_operands.push(a);
        self.mul_operands.push(b);
        Ok(self.placeholder(state, name))
    }

    /// Emit the fused operation. With `copy`, the result is moved through a
    /// fresh register on the same PE before it is handed back.
    pub fn result(self, state: &mut CompilerState, copy: bool) -> CompileResult<Value> {
        let accumulators: Vec<&Operand> = self
            .add_operands
            .iter()
            .filter(|operand| !self.is_term(operand))
            .collect();
        if accumulators.len() != 1 {
            return Err(CompileError::FmacAccumulator {
                pe: self.pe.to_string(),
                found: accumulators.len(),
            });
        }

        let pairs = self.pairs();
        let mut operands = Vec::with_capacity(1 + self.mul_operands.len());
        operands.push(accumulators[0].clone());
        operands.extend(self.mul_operands.iter().cloned());

        let options = OpOptions {
            pe: Some(self.pe),
            aux_dep: true,
            overload: Some(pairs.to_string()),
            ..OpOptions::default()
        };
        let fused = state.create_new_op(OpType::Fmac, operands, options)?;
        state.latencies_mut().record_fmac(pairs);

        let fused = if copy {
            state.set_current_pe(&fused);
            state.copy(&fused)?
        } else {
            fused
        };
        debug!(pe = %self.pe, pairs, "fmac ends");
        Ok(fused)
    }
}
