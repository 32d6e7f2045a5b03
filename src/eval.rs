//! Reference evaluator for emitted operations
//!
//! Runs the recorded ops on `f64` in op-id order. Hardware rounding is not
//! modelled.

use indexmap::IndexMap;

use crate::error::{CompileError, CompileResult};
use crate::op::{OpType, Operation};
use crate::value::{Value, ValueId};

/// Evaluate `ops` given bindings for every input value. Returns the value of
/// every input and every op result.
pub fn evaluate(
    ops: &[Operation],
    inputs: &IndexMap<ValueId, f64>,
) -> CompileResult<IndexMap<ValueId, f64>> {
    let mut env = inputs.clone();

    for op in ops {
        op.opcode.check_arity(op.operands.len())?;
        let args = op
            .operands
            .iter()
            .map(|v| lookup(&env, v))
            .collect::<CompileResult<Vec<f64>>>()?;

        let result = match op.opcode {
            OpType::Add => args[0] + args[1],
            OpType::Sub => args[0] - args[1],
            OpType::Mul => args[0] * args[1],
            OpType::Div => args[0] / args[1],
            OpType::Gt => {
                if args[0] > args[1] {
                    1.0
                } else {
                    0.0
                }
            }
            OpType::Neg => -args[0],
            OpType::Relu => args[0].max(0.0),
            OpType::Copy => args[0],
            OpType::Cst => op
                .literal
                .map(|l| l.as_f64())
                .ok_or_else(|| CompileError::invalid_op(format!("constant op {} has no literal", op.id)))?,
            OpType::Fmac => {
                let acc = args[0];
                acc + args[1..]
                    .chunks(2)
                    .map(|pair| pair[0] * pair[1])
                    .sum::<f64>()
            }
        };
        env.insert(op.result.id().clone(), result);
    }

    Ok(env)
}

fn lookup(env: &IndexMap<ValueId, f64>, value: &Value) -> CompileResult<f64> {
    env.get(value.id())
        .copied()
        .ok_or_else(|| CompileError::undefined(format!("{} ({})", value, value.name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmac::FmacBuilder;
    use crate::state::CompilerState;

    #[test]
    fn test_elementwise_ops() {
        let mut state = CompilerState::default();
        let x = state.input("x", &[0]).unwrap();
        let y = state.input("y", &[1]).unwrap();
        let d = state.div(&x, &y).unwrap();
        let n = state.neg(&d).unwrap();
        let r = state.relu(&n).unwrap();
        let g = state.gt(&x, &y).unwrap();

        let mut inputs = IndexMap::new();
        inputs.insert(x.id().clone(), 6.0);
        inputs.insert(y.id().clone(), 3.0);
        let env = evaluate(state.operations(), &inputs).unwrap();

        assert_eq!(env[d.id()], 2.0);
        assert_eq!(env[n.id()], -2.0);
        assert_eq!(env[r.id()], 0.0);
        assert_eq!(env[g.id()], 1.0);
    }

    #[test]
    fn test_fmac() {
        let mut state = CompilerState::default();
        let xs: Vec<Value> = (0..4)
            .map(|i| state.input(format!("x{}", i), &[i]).unwrap())
            .collect();

        let mut unit = FmacBuilder::new(&[0]).unwrap();
        let p = unit.mul(&mut state, &xs[0], &xs[1]).unwrap();
        let acc = unit.add(&mut state, 10.0, p);
        let q = unit.mul(&mut state, &xs[2], &xs[3]).unwrap();
        unit.add(&mut state, acc, q);
        let r = unit.result(&mut state, true).unwrap();

        let inputs: IndexMap<ValueId, f64> = xs
            .iter()
            .zip([1.0, 2.0, 3.0, 4.0])
            .map(|(v, x)| (v.id().clone(), x))
            .collect();
        let env = evaluate(state.operations(), &inputs).unwrap();
        assert_eq!(env[r.id()], 10.0 + 2.0 + 12.0);
    }

    #[test]
    fn test_missing_input_binding() {
        let mut state = CompilerState::default();
        let x = state.input("x", &[0]).unwrap();
        state.copy(&x).unwrap();
        assert!(matches!(
            evaluate(state.operations(), &IndexMap::new()),
            Err(CompileError::UndefinedVariable { .. })
        ));
    }
}
