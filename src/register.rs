//! Register files: grids of live per-PE values, and the reductions over them

use crate::error::{CompileError, CompileResult};
use crate::reduce::recursive_sum;
use crate::state::CompilerState;
use crate::value::{Operand, Value};

/// An N-dimensional, row-major grid of registers
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterFile {
    name: String,
    shape: Vec<usize>,
    registers: Vec<Operand>,
}

fn unravel(mut offset: usize, shape: &[usize]) -> Vec<usize> {
    let mut idx = vec![0; shape.len()];
    for (axis, dim) in shape.iter().enumerate().rev() {
        idx[axis] = offset % dim;
        offset /= dim;
    }
    idx
}

impl RegisterFile {
    pub fn new(
        name: impl Into<String>,
        shape: Vec<usize>,
        registers: Vec<Operand>,
    ) -> CompileResult<Self> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if shape.is_empty() || registers.len() != expected {
            return Err(CompileError::shape_mismatch(
                format!("{} registers for shape {:?}", expected, shape),
                format!("{} registers in '{}'", registers.len(), name),
            ));
        }
        Ok(Self {
            name,
            shape,
            registers,
        })
    }

    /// Build a grid by calling `f` with every index in row-major order
    pub fn from_fn(
        name: impl Into<String>,
        shape: Vec<usize>,
        mut f: impl FnMut(&[usize]) -> CompileResult<Operand>,
    ) -> CompileResult<Self> {
        let len: usize = shape.iter().product();
        let registers = (0..len)
            .map(|offset| f(unravel(offset, &shape).as_slice()))
            .collect::<CompileResult<Vec<_>>>()?;
        Self::new(name, shape, registers)
    }

    pub fn filled(
        name: impl Into<String>,
        shape: Vec<usize>,
        operand: Operand,
    ) -> CompileResult<Self> {
        let len: usize = shape.iter().product();
        Self::new(name, shape, vec![operand; len])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn registers(&self) -> &[Operand] {
        &self.registers
    }

    pub fn into_registers(self) -> Vec<Operand> {
        self.registers
    }

    fn offset(&self, idx: &[usize]) -> Option<usize> {
        if idx.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (i, dim) in idx.iter().zip(&self.shape) {
            if i >= dim {
                return None;
            }
            offset = offset * dim + i;
        }
        Some(offset)
    }

    pub fn get(&self, idx: &[usize]) -> Option<&Operand> {
        self.offset(idx).map(|o| &self.registers[o])
    }

    /// Every index paired with its register, row-major
    pub fn indexed(&self) -> impl Iterator<Item = (Vec<usize>, &Operand)> + '_ {
        self.registers
            .iter()
            .enumerate()
            .map(move |(offset, operand)| (unravel(offset, &self.shape), operand))
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
        self.registers.iter().filter_map(Operand::as_value)
    }

    pub fn reshape(self, shape: Vec<usize>) -> CompileResult<Self> {
        Self::new(self.name, shape, self.registers)
    }

    /// Swap the two axes of a rank-2 grid. No registers move on the hardware.
    pub fn transposed(&self) -> CompileResult<Self> {
        let (rows, cols) = match self.shape.as_slice() {
            [rows, cols] => (*rows, *cols),
            other => {
                return Err(CompileError::shape_mismatch(
                    "a rank-2 register file",
                    format!("shape {:?}", other),
                ))
            }
        };
        Self::from_fn(format!("{}.T", self.name), vec![cols, rows], |idx| {
            Ok(self.registers[idx[1] * cols + idx[0]].clone())
        })
    }
}

fn check_same_shape(dst: &RegisterFile, src: &RegisterFile) -> CompileResult<()> {
    if dst.shape != src.shape {
        return Err(CompileError::shape_mismatch(
            format!("'{}' shape {:?}", dst.name, dst.shape),
            format!("'{}' shape {:?}", src.name, src.shape),
        ));
    }
    Ok(())
}

fn copied_registers(state: &mut CompilerState, src: &[Operand]) -> CompileResult<Vec<Operand>> {
    src.iter()
        .map(|operand| match operand {
            Operand::Value(v) => {
                state.set_current_pe(v);
                Ok(Operand::Value(state.copy(v)?))
            }
            literal => Ok(literal.clone()),
        })
        .collect()
}

/// Move every value of `src` through a fresh register into `dst`.
/// Literal entries pass through unchanged.
pub fn copy_registers(
    state: &mut CompilerState,
    dst: &mut RegisterFile,
    src: &RegisterFile,
) -> CompileResult<()> {
    check_same_shape(dst, src)?;
    dst.registers = copied_registers(state, &src.registers)?;
    Ok(())
}

pub fn self_copy(state: &mut CompilerState, grid: &mut RegisterFile) -> CompileResult<()> {
    grid.registers = copied_registers(state, &grid.registers)?;
    Ok(())
}

/// Fold partial sums spread along axis 0 of `fmac` (with `init` stacked
/// beneath) into one accumulator per remaining position.
pub fn reduce_tiling(
    state: &mut CompilerState,
    fmac: &mut RegisterFile,
    init: &RegisterFile,
) -> CompileResult<()> {
    if fmac.rank() != init.rank() || fmac.shape[1..] != init.shape[1..] {
        return Err(CompileError::shape_mismatch(
            format!("'{}' shape {:?} on every axis but the first", fmac.name, fmac.shape),
            format!("'{}' shape {:?}", init.name, init.shape),
        ));
    }

    let inner: usize = fmac.shape[1..].iter().product();
    let depth = fmac.shape[0] + init.shape[0];
    let stacked: Vec<&Operand> = fmac.registers.iter().chain(init.registers.iter()).collect();

    let mut reduced = Vec::with_capacity(inner);
    for position in 0..inner {
        let column: Vec<Operand> = (0..depth)
            .map(|layer| stacked[layer * inner + position].clone())
            .collect();
        reduced.push(recursive_sum(state, &column)?);
    }

    let mut shape = fmac.shape.clone();
    shape[0] = 1;
    fmac.shape = shape;
    fmac.registers = reduced;
    self_copy(state, fmac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::evaluate;
    use crate::op::{OpType, PeIndex};
    use crate::value::{Literal, ValueId};
    use indexmap::IndexMap;

    fn grid(state: &mut CompilerState, name: &str, shape: Vec<usize>) -> RegisterFile {
        RegisterFile::from_fn(name, shape, |idx| {
            let label = format!("{}{:?}", name, idx);
            Ok(state.input(label, idx)?.into())
        })
        .unwrap()
    }

    fn count(state: &CompilerState, opcode: OpType) -> usize {
        state
            .operations()
            .iter()
            .filter(|op| op.opcode == opcode)
            .count()
    }

    #[test]
    fn test_copy_emits_one_copy_per_value() {
        let mut state = CompilerState::default();
        let src = grid(&mut state, "src", vec![2, 2]);
        let mut dst = grid(&mut state, "dst", vec![2, 2]);

        copy_registers(&mut state, &mut dst, &src).unwrap();
        assert_eq!(count(&state, OpType::Copy), 4);

        for ((idx, copied), original) in dst.indexed().zip(src.registers()) {
            let copied = copied.as_value().unwrap();
            assert_ne!(Some(copied), original.as_value());
            let op = state.producer_of(copied).unwrap();
            assert_eq!(Some(&op.operands[0]), original.as_value());
            assert_eq!(op.pe, PeIndex::canonicalize(&idx).unwrap());
        }
    }

    #[test]
    fn test_copy_passes_literals_through() {
        let mut state = CompilerState::default();
        let x = state.input("x", &[0, 0]).unwrap();
        let src = RegisterFile::new("src", vec![1, 2], vec![Operand::from(x), Operand::from(Literal::Float(2.0))]).unwrap();
        let mut dst = src.clone();
        copy_registers(&mut state, &mut dst, &src).unwrap();

        assert_eq!(count(&state, OpType::Copy), 1);
        assert_eq!(dst.get(&[0, 1]), Some(&Operand::Literal(Literal::Float(2.0))));
        assert!(state.constants().is_empty());
    }

    #[test]
    fn test_copy_rejects_mismatched_shapes() {
        let mut state = CompilerState::default();
        let src = grid(&mut state, "src", vec![2, 2]);
        let mut dst = grid(&mut state, "dst", vec![4, 1]);
        assert!(matches!(
            copy_registers(&mut state, &mut dst, &src),
            Err(CompileError::ShapeMismatch { .. })
        ));
        assert!(state.lines().is_empty());
    }

    #[test]
    fn test_self_copy_keeps_logical_content() {
        let mut state = CompilerState::default();
        let mut g = grid(&mut state, "g", vec![3]);
        let before = g.clone();
        self_copy(&mut state, &mut g).unwrap();

        assert_eq!(g.shape(), before.shape());
        for (after, orig) in g.values().zip(before.values()) {
            assert_ne!(after, orig);
            assert!(state.depends_on(after, orig));
        }
    }

    #[test]
    fn test_reduce_tiling_folds_stacking_axis() {
        let mut state = CompilerState::default();
        let mut fmac = grid(&mut state, "acc", vec![1, 4]);
        let init = grid(&mut state, "init", vec![1, 4]);
        let fmac_inputs = fmac.clone();

        reduce_tiling(&mut state, &mut fmac, &init).unwrap();
        assert_eq!(fmac.shape(), &[1, 4]);
        assert_eq!(count(&state, OpType::Add), 4);
        assert_eq!(count(&state, OpType::Copy), 4);

        for ((out, a), b) in fmac.values().zip(fmac_inputs.values()).zip(init.values()) {
            assert!(state.depends_on(out, a));
            assert!(state.depends_on(out, b));
            assert_eq!(state.producer_of(out).unwrap().opcode, OpType::Copy);
        }
    }

    #[test]
    fn test_reduce_tiling_numeric() {
        let mut state = CompilerState::default();
        let mut fmac = grid(&mut state, "acc", vec![3, 2]);
        let init = grid(&mut state, "init", vec![1, 2]);

        let mut inputs: IndexMap<ValueId, f64> = IndexMap::new();
        for (i, v) in fmac.values().chain(init.values()).enumerate() {
            inputs.insert(v.id().clone(), (i + 1) as f64);
        }
        reduce_tiling(&mut state, &mut fmac, &init).unwrap();
        let env = evaluate(state.operations(), &inputs).unwrap();

        // column 0 holds 1, 3, 5 and init 7; column 1 holds 2, 4, 6 and init 8
        let outs: Vec<f64> = fmac.values().map(|v| env[v.id()]).collect();
        assert_eq!(outs, vec![16.0, 20.0]);
    }

    #[test]
    fn test_reduce_tiling_shape_checks() {
        let mut state = CompilerState::default();
        let mut fmac = grid(&mut state, "acc", vec![2, 4]);
        let init = grid(&mut state, "init", vec![1, 3]);
        assert!(reduce_tiling(&mut state, &mut fmac, &init).is_err());

        let init = grid(&mut state, "init", vec![4]);
        assert!(reduce_tiling(&mut state, &mut fmac, &init).is_err());
    }

    #[test]
    fn test_transposed() {
        let mut state = CompilerState::default();
        let g = grid(&mut state, "g", vec![2, 3]);
        let t = g.transposed().unwrap();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.get(&[2, 1]), g.get(&[1, 2]));
        assert!(state.lines().is_empty());
    }
}
