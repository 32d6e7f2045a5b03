//! Balanced-tree reduction
//!
//! Summing N terms with a left fold costs N - 1 sequential adds. Splitting off
//! the largest power-of-two prefix, reducing it as a perfect binary tree and
//! recursing on the remainder keeps the critical path at ceil(log2 N) adds.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::state::CompilerState;
use crate::value::{Operand, ValueId};

/// Partial sums the reduction engine has combined, and those it has copied
#[derive(Debug, Clone, Default)]
pub struct ReuseSet {
    combined: HashSet<ValueId>,
    copied: HashSet<ValueId>,
}

impl ReuseSet {
    fn note_combined(&mut self, operand: &Operand) {
        if let Operand::Value(v) = operand {
            if !v.is_constant() {
                self.combined.insert(v.id().clone());
            }
        }
    }

    pub fn was_combined(&self, id: &ValueId) -> bool {
        self.combined.contains(id)
    }

    pub fn was_copied(&self, id: &ValueId) -> bool {
        self.copied.contains(id)
    }
}

/// Length of the largest power-of-two prefix of `n` terms
pub fn perfect_prefix_len(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        1 << (usize::BITS - 1 - n.leading_zeros())
    }
}

fn add_pair(state: &mut CompilerState, a: &Operand, b: &Operand) -> CompileResult<Operand> {
    if let Some(v) = a.as_value().or_else(|| b.as_value()) {
        state.set_current_pe(v);
    }
    state.reuse.note_combined(a);
    state.reuse.note_combined(b);
    Ok(Operand::Value(state.add(a.clone(), b.clone())?))
}

/// Copy a partial sum that has already fed another combination, once per value
fn break_alias(state: &mut CompilerState, term: Operand) -> CompileResult<Operand> {
    let value = match &term {
        Operand::Value(v) if !v.is_constant() => v.clone(),
        _ => return Ok(term),
    };
    if !state.reuse.was_combined(value.id()) || !state.reuse.copied.insert(value.id().clone()) {
        return Ok(term);
    }
    state.set_current_pe(&value);
    Ok(Operand::Value(state.copy(&value)?))
}

/// Pair neighbours level by level until one term is left
pub fn reduce_perfect_tree(state: &mut CompilerState, values: &[Operand]) -> CompileResult<Operand> {
    if values.is_empty() || !values.len().is_power_of_two() {
        return Err(CompileError::NotPowerOfTwo { len: values.len() });
    }

    let mut level = values.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(add_pair(state, &pair[0], &pair[1])?);
        }
        level = next;
    }
    Ok(level.swap_remove(0))
}

/// Sum `values` with minimal dependency depth
pub fn recursive_sum(state: &mut CompilerState, values: &[Operand]) -> CompileResult<Operand> {
    match values.len() {
        0 => Err(CompileError::invalid_op("cannot reduce an empty sequence")),
        1 => Ok(values[0].clone()),
        n => {
            let (perfect, rest) = values.split_at(perfect_prefix_len(n));
            debug!(len = perfect.len(), "start perfect tree");
            let perfect_sum = reduce_perfect_tree(state, perfect)?;
            debug!("end perfect tree");

            if rest.is_empty() {
                return Ok(perfect_sum);
            }

            let smaller_sum = recursive_sum(state, rest)?;
            let smaller_sum = break_alias(state, smaller_sum)?;
            let perfect_sum = break_alias(state, perfect_sum)?;
            add_pair(state, &perfect_sum, &smaller_sum)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluate;
    use crate::op::{OpType, PeIndex};
    use crate::value::{Literal, Value};
    use indexmap::IndexMap;

    fn inputs(state: &mut CompilerState, n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| state.input(format!("v{}", i), &[i % 4, i / 4]).unwrap())
            .collect()
    }

    fn operands(values: &[Value]) -> Vec<Operand> {
        values.iter().map(Operand::from).collect()
    }

    fn ceil_log2(n: usize) -> usize {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }

    #[test]
    fn test_perfect_prefix_len() {
        assert_eq!(perfect_prefix_len(1), 1);
        assert_eq!(perfect_prefix_len(5), 4);
        assert_eq!(perfect_prefix_len(8), 8);
        assert_eq!(perfect_prefix_len(1023), 512);
    }

    #[test]
    fn test_remainder_is_always_shorter_than_prefix() {
        // the "rest as long as the perfect tree" case cannot happen
        for n in 1..=4096 {
            let p = perfect_prefix_len(n);
            assert!(n - p < p, "n = {}", n);
        }
    }

    #[test]
    fn test_single_value_emits_nothing() {
        let mut state = CompilerState::default();
        let x = inputs(&mut state, 1);
        let r = recursive_sum(&mut state, &operands(&x)).unwrap();
        assert_eq!(r, Operand::from(&x[0]));
        assert!(state.lines().is_empty());
    }

    #[test]
    fn test_empty_and_non_power_of_two_fail() {
        let mut state = CompilerState::default();
        assert!(recursive_sum(&mut state, &[]).is_err());
        let x = inputs(&mut state, 3);
        assert!(matches!(
            reduce_perfect_tree(&mut state, &operands(&x)),
            Err(CompileError::NotPowerOfTwo { len: 3 })
        ));
    }

    #[test]
    fn test_five_terms_shape() {
        let mut state = CompilerState::default();
        let x = inputs(&mut state, 5);
        let r = recursive_sum(&mut state, &operands(&x)).unwrap();
        let r = r.as_value().unwrap().clone();

        // ((a+b)+(c+d)) + e
        let top = state.producer_of(&r).unwrap();
        assert_eq!(top.opcode, OpType::Add);
        assert_eq!(top.operands[1], x[4]);
        let left = state.producer_of(&top.operands[0]).unwrap();
        let ab = state.producer_of(&left.operands[0]).unwrap();
        let cd = state.producer_of(&left.operands[1]).unwrap();
        assert_eq!(ab.operands, vec![x[0].clone(), x[1].clone()]);
        assert_eq!(cd.operands, vec![x[2].clone(), x[3].clone()]);

        assert_eq!(state.op_depth(&r, OpType::Add), 3);
        assert_eq!(state.operations().len(), 4);
    }

    #[test]
    fn test_depth_is_ceil_log2_for_all_sizes() {
        for n in 2..=40 {
            let mut state = CompilerState::default();
            let x = inputs(&mut state, n);
            let r = recursive_sum(&mut state, &operands(&x)).unwrap();
            let r = r.as_value().unwrap().clone();
            assert_eq!(state.op_depth(&r, OpType::Add), ceil_log2(n), "n = {}", n);
            // N terms always take N - 1 adds
            let adds = state
                .operations()
                .iter()
                .filter(|op| op.opcode == OpType::Add)
                .count();
            assert_eq!(adds, n - 1, "n = {}", n);
        }
    }

    #[test]
    fn test_sum_of_literals_evaluates_to_total() {
        for n in 1..=17 {
            let mut state = CompilerState::default();
            let terms: Vec<Operand> = (1..=n).map(|i| Operand::from(i as f64 * 0.5)).collect();
            let r = recursive_sum(&mut state, &terms).unwrap();
            let expected: f64 = (1..=n).map(|i| i as f64 * 0.5).sum();

            let got = match r {
                Operand::Value(v) => {
                    let env = evaluate(state.operations(), &IndexMap::new()).unwrap();
                    env[v.id()]
                }
                Operand::Literal(l) => l.as_f64(),
            };
            assert!((got - expected).abs() < 1e-9, "n = {}", n);
        }
    }

    #[test]
    fn test_adds_follow_the_first_term_placement() {
        let mut state = CompilerState::default();
        let a = state.input("a", &[3, 1]).unwrap();
        let b = state.input("b", &[0, 0]).unwrap();
        let r = recursive_sum(&mut state, &[a.into(), b.into()]).unwrap();
        let r = r.as_value().unwrap();
        assert_eq!(state.pe_of(r), Some(PeIndex::canonicalize(&[3, 1]).unwrap()));
    }

    #[test]
    fn test_reused_partial_sum_is_copied_once() {
        let mut state = CompilerState::default();
        let x = inputs(&mut state, 3);
        let terms = operands(&x);

        recursive_sum(&mut state, &terms).unwrap();
        let copies = |state: &CompilerState| {
            state
                .operations()
                .iter()
                .filter(|op| op.opcode == OpType::Copy)
                .count()
        };
        assert_eq!(copies(&state), 0);

        // x[2] was already combined by the first reduction
        recursive_sum(&mut state, &terms).unwrap();
        assert_eq!(copies(&state), 1);
        assert!(state.reuse.was_copied(x[2].id()));

        recursive_sum(&mut state, &terms).unwrap();
        assert_eq!(copies(&state), 1);
    }

    #[test]
    fn test_constants_are_never_copied() {
        let mut state = CompilerState::default();
        let x = inputs(&mut state, 2);
        let terms = vec![x[0].clone().into(), x[1].clone().into(), Literal::Float(1.0).into()];
        recursive_sum(&mut state, &terms).unwrap();
        recursive_sum(&mut state, &terms).unwrap();
        assert!(state
            .operations()
            .iter()
            .filter(|op| op.opcode == OpType::Copy)
            .all(|op| !op.operands[0].is_constant()));
    }
}
