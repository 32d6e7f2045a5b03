//! Lowering from the typed kernel program onto the PE array
//!
//! Every intermediate is a rank-2 [`RegisterFile`]. Elementwise ops put the
//! result for element `(i, j)` on PE `(i, j)`. A matrix product is planned by
//! [`TilingStrategy`]; tile `t` of output `(i, j)` is one fused unit on PE
//! `(t, i, j)`, and with more than one tile the layers are folded together by
//! [`reduce_tiling`].

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::ast::{TypedExpr, TypedExprKind, TypedProgram};
use crate::error::{CompileError, CompileResult};
use crate::eval;
use crate::fmac::FmacBuilder;
use crate::hardware::{HlsConfig, IrProgram, PortBinding};
use crate::op::{OpType, PeIndex};
use crate::reduce::recursive_sum;
use crate::register::{reduce_tiling, RegisterFile};
use crate::state::{CompilerState, OpOptions};
use crate::tiling::TilingStrategy;
use crate::value::{Literal, Operand};

/// Drives the IR engine over a typed program
pub struct CodeGenerator {
    state: CompilerState,
    tiler: TilingStrategy,
    bindings: HashMap<String, RegisterFile>,
    matmul_count: usize,
}

/// Everything a lowering produced, before it is packaged as an [`IrProgram`]
pub struct Lowered {
    pub state: CompilerState,
    pub inputs: Vec<RegisterFile>,
    /// One grid per statement, named after its target
    pub outputs: Vec<RegisterFile>,
}

impl CodeGenerator {
    pub fn new(config: HlsConfig) -> Self {
        let tiler = TilingStrategy::new(&config);
        Self {
            state: CompilerState::new(config),
            tiler,
            bindings: HashMap::new(),
            matmul_count: 0,
        }
    }

    /// Lower `program` and package the result
    pub fn generate(self, program: TypedProgram) -> CompileResult<IrProgram> {
        self.lower(program).map(Lowered::into_program)
    }

    pub fn lower(mut self, program: TypedProgram) -> CompileResult<Lowered> {
        let mut inputs = Vec::with_capacity(program.inputs.len());
        for (name, (rows, cols)) in &program.inputs {
            let grid = self.declare_input(name, *rows, *cols)?;
            self.bindings.insert(name.clone(), grid.clone());
            inputs.push(grid);
        }

        let mut outputs = Vec::with_capacity(program.statements.len());
        for stmt in &program.statements {
            let grid = self.lower_expr(&stmt.value)?.with_name(stmt.target.as_str());
            self.bindings.insert(stmt.target.clone(), grid.clone());
            outputs.push(grid);
        }

        Ok(Lowered {
            state: self.state,
            inputs,
            outputs,
        })
    }

    fn declare_input(&mut self, name: &str, rows: usize, cols: usize) -> CompileResult<RegisterFile> {
        let state = &mut self.state;
        RegisterFile::from_fn(name, vec![rows, cols], |idx| {
            let label = format!("{}[{},{}]", name, idx[0], idx[1]);
            Ok(state.input(label, idx)?.into())
        })
    }

    fn lower_expr(&mut self, expr: &TypedExpr) -> CompileResult<RegisterFile> {
        match &expr.expr {
            TypedExprKind::Variable(name) => self
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| CompileError::undefined(name.as_str())),

            TypedExprKind::Scalar(n) => {
                RegisterFile::filled("scalar", vec![1, 1], Literal::Float(*n).into())
            }

            TypedExprKind::Matrix(rows) => {
                let shape = vec![rows.len(), rows.first().map_or(0, Vec::len)];
                let registers = rows
                    .iter()
                    .flatten()
                    .map(|v| Operand::Literal(Literal::Float(*v)))
                    .collect();
                RegisterFile::new("literal", shape, registers)
            }

            TypedExprKind::Zip(opcode, l, r) => self.lower_binary(*opcode, expr, l, r),
            TypedExprKind::Map(opcode, x) => self.lower_unary(*opcode, x),

            TypedExprKind::Transpose(x) => self.lower_expr(x)?.transposed(),

            TypedExprKind::Sum(x) => {
                let grid = self.lower_expr(x)?;
                let total = recursive_sum(&mut self.state, grid.registers())?;
                RegisterFile::new("sum", vec![1, 1], vec![total])
            }

            TypedExprKind::MatMul(l, r) => self.lower_matmul(l, r),
        }
    }

    fn place(&mut self, i: usize, j: usize) -> CompileResult<OpOptions> {
        let pe = PeIndex::canonicalize(&[i, j])?;
        self.state.set_current_pe_index(pe);
        Ok(OpOptions::at(pe))
    }

    fn lower_binary(
        &mut self,
        opcode: OpType,
        expr: &TypedExpr,
        l: &TypedExpr,
        r: &TypedExpr,
    ) -> CompileResult<RegisterFile> {
        let lhs = self.lower_expr(l)?;
        let rhs = self.lower_expr(r)?;
        let (rows, cols) = expr.shape.dimensions();

        let mut registers = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                let a = broadcast_at(&lhs, i, j)?;
                let b = broadcast_at(&rhs, i, j)?;
                let options = self.place(i, j)?;
                let out = self.state.create_new_op(opcode, vec![a, b], options)?;
                registers.push(out.into());
            }
        }
        RegisterFile::new(opcode.mnemonic(), vec![rows, cols], registers)
    }

    fn lower_unary(&mut self, opcode: OpType, x: &TypedExpr) -> CompileResult<RegisterFile> {
        let grid = self.lower_expr(x)?;
        let shape = grid.shape().to_vec();

        let mut registers = Vec::with_capacity(grid.len());
        for (idx, operand) in grid.indexed() {
            let options = self.place(idx[0], idx[1])?;
            let out = self.state.create_new_op(opcode, vec![operand.clone()], options)?;
            registers.push(out.into());
        }
        RegisterFile::new(opcode.mnemonic(), shape, registers)
    }

    fn lower_matmul(&mut self, l: &TypedExpr, r: &TypedExpr) -> CompileResult<RegisterFile> {
        let a = self.lower_expr(l)?;
        let b = self.lower_expr(r)?;
        let (m, k, n) = match (a.shape(), b.shape()) {
            ([m, k1], [k2, n]) if k1 == k2 => (*m, *k1, *n),
            (left, right) => {
                return Err(CompileError::lowering(format!(
                    "cannot multiply {:?} by {:?}",
                    left, right
                )))
            }
        };

        let plan = self.tiler.plan_matmul(m, k, n)?;
        let id = self.matmul_count;
        self.matmul_count += 1;
        debug!(id, m, k, n, tiles = plan.tiles.len(), "lowering matmul");

        let mut layers = Vec::with_capacity(plan.tiles.len());
        for tile in &plan.tiles {
            let state = &mut self.state;
            let name = format!("mm{}.t{}", id, tile.index);
            let layer = RegisterFile::from_fn(name, vec![1, m, n], |idx| {
                let (i, j) = (idx[1], idx[2]);
                let mut unit = FmacBuilder::new(&[tile.index, i, j])?;
                let mut acc: Operand = Literal::Float(0.0).into();
                for kk in tile.range.clone() {
                    let x = register_at(&a, [i, kk])?;
                    let y = register_at(&b, [kk, j])?;
                    let p = unit.mul(state, x, y)?;
                    acc = unit.add(state, acc, p).into();
                }
                Ok(unit.result(state, true)?.into())
            })?;
            layers.push(layer);
        }

        let mut layers = layers.into_iter();
        let init = layers
            .next()
            .ok_or_else(|| CompileError::lowering("matmul plan has no tiles"))?;
        let rest: Vec<Operand> = layers.flat_map(RegisterFile::into_registers).collect();
        if rest.is_empty() {
            return init.reshape(vec![m, n]);
        }

        let depth = rest.len() / (m * n);
        let mut partials = RegisterFile::new(format!("mm{}", id), vec![depth, m, n], rest)?;
        reduce_tiling(&mut self.state, &mut partials, &init)?;
        partials.reshape(vec![m, n])
    }
}

fn register_at(grid: &RegisterFile, idx: [usize; 2]) -> CompileResult<Operand> {
    grid.get(&idx).cloned().ok_or_else(|| {
        CompileError::lowering(format!(
            "index {:?} is outside '{}' {:?}",
            idx,
            grid.name(),
            grid.shape()
        ))
    })
}

/// Element `(i, j)`, with a single-register grid standing for every element
fn broadcast_at(grid: &RegisterFile, i: usize, j: usize) -> CompileResult<Operand> {
    if grid.len() == 1 {
        Ok(grid.registers()[0].clone())
    } else {
        register_at(grid, [i, j])
    }
}

fn port(grid: &RegisterFile) -> PortBinding {
    PortBinding {
        name: grid.name().to_string(),
        shape: grid.shape().to_vec(),
        registers: grid.registers().iter().map(Operand::to_string).collect(),
    }
}

impl Lowered {
    /// Last output bound to `name`
    pub fn output(&self, name: &str) -> Option<&RegisterFile> {
        self.outputs.iter().rev().find(|grid| grid.name() == name)
    }

    /// Run the emitted ops on `f64` given row-major data for every input.
    /// Returns row-major data for every output.
    pub fn evaluate(
        &self,
        bindings: &IndexMap<String, Vec<f64>>,
    ) -> CompileResult<IndexMap<String, Vec<f64>>> {
        let mut env = IndexMap::new();
        for grid in &self.inputs {
            let data = bindings
                .get(grid.name())
                .ok_or_else(|| CompileError::undefined(grid.name()))?;
            if data.len() != grid.len() {
                return Err(CompileError::shape_mismatch(
                    format!("{} elements for '{}'", grid.len(), grid.name()),
                    format!("{}", data.len()),
                ));
            }
            for (operand, x) in grid.registers().iter().zip(data) {
                if let Operand::Value(v) = operand {
                    env.insert(v.id().clone(), *x);
                }
            }
        }

        let env = eval::evaluate(self.state.operations(), &env)?;
        let mut results = IndexMap::new();
        for grid in &self.outputs {
            let data = grid
                .registers()
                .iter()
                .map(|operand| match operand {
                    Operand::Value(v) => env
                        .get(v.id())
                        .copied()
                        .ok_or_else(|| CompileError::undefined(v.to_string())),
                    Operand::Literal(l) => Ok(l.as_f64()),
                })
                .collect::<CompileResult<Vec<f64>>>()?;
            results.insert(grid.name().to_string(), data);
        }
        Ok(results)
    }

    pub fn into_program(self) -> IrProgram {
        let mut program = IrProgram::from_state(&self.state);
        for grid in &self.inputs {
            program.add_input(port(grid));
        }
        let paths = self.state.critical_paths();
        for grid in &self.outputs {
            let critical_path = grid
                .values()
                .filter_map(|v| paths.get(v.id()).copied())
                .max()
                .unwrap_or(0);
            program.add_output(port(grid), critical_path);
        }
        program.generate_summary();
        program
    }
}
