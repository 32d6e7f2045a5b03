//! Per-compilation compiler state
//!
//! `CompilerState` owns every piece of mutable bookkeeping a compilation
//! needs: the value and op counters, the dependency graph, the PE map, the
//! single-producer map, the constant pool, the latency table and the emitted
//! IR lines. All graph construction goes through [`CompilerState::create_new_op`]
//! so these stay consistent with each other.
//!
//! One instance serves exactly one compilation. Every mutator takes
//! `&mut self`; nothing is global.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use tracing::trace;

use crate::constant::ConstantPool;
use crate::error::{CompileError, CompileResult};
use crate::hardware::HlsConfig;
use crate::latency::LatencyTable;
use crate::op::{OpType, Operation, PeIndex};
use crate::reduce::ReuseSet;
use crate::value::{Literal, OpId, Operand, Value, ValueId};

/// Dataflow edge from an operation to one of its non-constant operands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub op: OpId,
    pub operand: ValueId,
}

/// Ordering-only edge between two fused units sharing a PE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxDependency {
    pub before: OpId,
    pub after: OpId,
}

/// Optional knobs for [`CompilerState::create_new_op`]
#[derive(Debug, Clone, Default)]
pub struct OpOptions {
    /// Placement; defaults to the current PE
    pub pe: Option<PeIndex>,
    /// Result value; defaults to a fresh one
    pub result: Option<Value>,
    /// Serialize after the previous fused unit on the same PE
    pub aux_dep: bool,
    pub overload: Option<String>,
    pub attrs: IndexMap<String, String>,
}

impl OpOptions {
    pub fn at(pe: PeIndex) -> Self {
        Self {
            pe: Some(pe),
            ..Self::default()
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }
}

pub struct CompilerState {
    config: HlsConfig,
    next_value: u64,
    next_op: u64,
    current_pe: PeIndex,
    ops: Vec<Operation>,
    edges: Vec<DependencyEdge>,
    aux_deps: Vec<AuxDependency>,
    last_fused: IndexMap<PeIndex, OpId>,
    producers: IndexMap<ValueId, OpId>,
    pe_map: IndexMap<ValueId, PeIndex>,
    constants: ConstantPool,
    latencies: LatencyTable,
    pub(crate) reuse: ReuseSet,
    sink: Vec<String>,
}

impl CompilerState {
    pub fn new(config: HlsConfig) -> Self {
        let latencies = LatencyTable::from_config(&config);
        Self {
            config,
            next_value: 0,
            next_op: 0,
            current_pe: PeIndex::origin(),
            ops: Vec::new(),
            edges: Vec::new(),
            aux_deps: Vec::new(),
            last_fused: IndexMap::new(),
            producers: IndexMap::new(),
            pe_map: IndexMap::new(),
            constants: ConstantPool::new(),
            latencies,
            reuse: ReuseSet::default(),
            sink: Vec::new(),
        }
    }

    /// Drop everything recorded so far and start an independent compilation
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    // ----- identity -----

    pub fn next_value_id(&mut self) -> ValueId {
        let id = ValueId::Var(self.next_value);
        self.next_value += 1;
        id
    }

    pub fn next_op_id(&mut self) -> OpId {
        let id = OpId(self.next_op);
        self.next_op += 1;
        id
    }

    /// A new value with no producer and no placement
    pub fn fresh_value(&mut self, name: impl Into<String>) -> Value {
        let id = self.next_value_id();
        Value::new(id, name)
    }

    /// Declare an externally driven value living at `coords`
    pub fn input(&mut self, name: impl Into<String>, coords: &[usize]) -> CompileResult<Value> {
        let pe = PeIndex::canonicalize(coords)?;
        let value = self.fresh_value(name);
        self.assign_pe(&value, pe);
        Ok(value)
    }

    // ----- bookkeeping -----

    pub fn record_edge(&mut self, op: OpId, operand: &Value) {
        if operand.is_constant() {
            return;
        }
        self.edges.push(DependencyEdge {
            op,
            operand: operand.id().clone(),
        });
    }

    pub fn assign_pe(&mut self, value: &Value, pe: PeIndex) {
        self.pe_map.insert(value.id().clone(), pe);
    }

    /// Enforce that `value` has exactly one producer
    pub fn record_result(&mut self, value: &Value, op: OpId) -> CompileResult<()> {
        if let Some(first) = self.producers.get(value.id()) {
            return Err(CompileError::DuplicateProducer {
                value: value.to_string(),
                first: first.0,
                second: op.0,
            });
        }
        self.producers.insert(value.id().clone(), op);
        Ok(())
    }

    pub fn emit_text(&mut self, line: String) {
        self.sink.push(line);
    }

    fn add_aux_dep(&mut self, pe: PeIndex, op: OpId) {
        if let Some(before) = self.last_fused.insert(pe, op) {
            self.aux_deps.push(AuxDependency { before, after: op });
        }
    }

    // ----- ambient placement -----

    pub fn current_pe(&self) -> PeIndex {
        self.current_pe
    }

    /// Move the ambient PE to wherever `value` lives. Unplaced values leave it alone.
    pub fn set_current_pe(&mut self, value: &Value) {
        if let Some(pe) = self.pe_map.get(value.id()) {
            if pe.is_placed() {
                self.current_pe = *pe;
            }
        }
    }

    pub fn set_current_pe_index(&mut self, pe: PeIndex) {
        self.current_pe = pe;
    }

    // ----- constants -----

    /// Intern a literal, emitting its `arith.constant` the first time only
    pub fn constant(&mut self, literal: Literal) -> CompileResult<Value> {
        literal.validate()?;
        if let Some(pooled) = self.constants.get(&literal) {
            return Ok(pooled.value.clone());
        }

        let value = Value::new(literal.value_id(), literal.canonical_text());
        let id = self.next_op_id();
        let op = Operation {
            opcode: OpType::Cst,
            pe: PeIndex::Unplaced,
            id,
            operands: Vec::new(),
            result: value.clone(),
            overload: None,
            attrs: IndexMap::new(),
            literal: Some(literal),
        };
        let line = op.emit(&self.config.dtype);
        self.emit_text(line);
        self.ops.push(op);
        self.assign_pe(&value, PeIndex::Unplaced);
        self.record_result(&value, id)?;
        self.constants.insert(literal, value.clone(), id);
        Ok(value)
    }

    // ----- op factory -----

    fn check_defined(&self, value: &Value) -> CompileResult<()> {
        if self.pe_map.contains_key(value.id()) {
            Ok(())
        } else {
            Err(CompileError::operand(format!(
                "{} ({}) is used before it is defined",
                value,
                value.name()
            )))
        }
    }

    /// Build, record and emit one operation, returning its result value
    pub fn create_new_op(
        &mut self,
        opcode: OpType,
        operands: Vec<Operand>,
        options: OpOptions,
    ) -> CompileResult<Value> {
        if opcode == OpType::Cst {
            return Err(CompileError::operand(
                "constants come from the constant pool, not the op factory",
            ));
        }
        opcode.check_arity(operands.len())?;

        for operand in &operands {
            match operand {
                Operand::Value(v) => self.check_defined(v)?,
                Operand::Literal(l) => l.validate()?,
            }
        }

        let pe = options.pe.unwrap_or(self.current_pe);
        let result = match options.result {
            Some(value) => {
                if let Some(first) = self.producers.get(value.id()) {
                    return Err(CompileError::DuplicateProducer {
                        value: value.to_string(),
                        first: first.0,
                        second: self.next_op,
                    });
                }
                if self.pe_map.contains_key(value.id()) {
                    return Err(CompileError::operand(format!(
                        "{} is an input and cannot be produced by an op",
                        value
                    )));
                }
                value
            }
            None => self.fresh_value(""),
        };

        let mut args = Vec::with_capacity(operands.len());
        for operand in operands {
            args.push(match operand {
                Operand::Value(v) => v,
                Operand::Literal(l) => self.constant(l)?,
            });
        }

        let id = self.next_op_id();
        let op = Operation {
            opcode,
            pe,
            id,
            operands: args,
            result: result.clone(),
            overload: options.overload,
            attrs: options.attrs,
            literal: None,
        };
        for operand in &op.operands {
            self.record_edge(id, operand);
        }

        let line = op.emit(&self.config.dtype);
        let opr = op.opr();
        trace!(op_id = %id, opr = %opr, pe = %pe, "emit");
        self.emit_text(line);

        if options.aux_dep {
            self.add_aux_dep(pe, id);
        }

        self.ops.push(op);
        self.assign_pe(&result, pe);
        self.record_result(&result, id)?;
        Ok(result)
    }

    fn binary(
        &mut self,
        opcode: OpType,
        a: impl Into<Operand>,
        b: impl Into<Operand>,
    ) -> CompileResult<Value> {
        self.create_new_op(opcode, vec![a.into(), b.into()], OpOptions::default())
    }

    fn unary(&mut self, opcode: OpType, a: impl Into<Operand>) -> CompileResult<Value> {
        self.create_new_op(opcode, vec![a.into()], OpOptions::default())
    }

    pub fn add(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> CompileResult<Value> {
        self.binary(OpType::Add, a, b)
    }

    pub fn sub(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> CompileResult<Value> {
        self.binary(OpType::Sub, a, b)
    }

    pub fn mul(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> CompileResult<Value> {
        self.binary(OpType::Mul, a, b)
    }

    pub fn div(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> CompileResult<Value> {
        self.binary(OpType::Div, a, b)
    }

    pub fn gt(&mut self, a: impl Into<Operand>, b: impl Into<Operand>) -> CompileResult<Value> {
        self.binary(OpType::Gt, a, b)
    }

    pub fn neg(&mut self, a: impl Into<Operand>) -> CompileResult<Value> {
        self.unary(OpType::Neg, a)
    }

    pub fn relu(&mut self, a: impl Into<Operand>) -> CompileResult<Value> {
        self.unary(OpType::Relu, a)
    }

    pub fn copy(&mut self, a: impl Into<Operand>) -> CompileResult<Value> {
        self.unary(OpType::Copy, a)
    }

    // ----- queries -----

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn aux_dependencies(&self) -> &[AuxDependency] {
        &self.aux_deps
    }

    /// Emitted IR, one line per operation, in emission order
    pub fn lines(&self) -> &[String] {
        &self.sink
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    pub fn latencies(&self) -> &LatencyTable {
        &self.latencies
    }

    pub fn latencies_mut(&mut self) -> &mut LatencyTable {
        &mut self.latencies
    }

    pub fn pe_of(&self, value: &Value) -> Option<PeIndex> {
        self.pe_map.get(value.id()).copied()
    }

    pub fn operation(&self, id: OpId) -> Option<&Operation> {
        self.ops
            .binary_search_by_key(&id, |op| op.id)
            .ok()
            .map(|idx| &self.ops[idx])
    }

    pub fn producer_of(&self, value: &Value) -> Option<&Operation> {
        self.producers
            .get(value.id())
            .and_then(|id| self.operation(*id))
    }

    /// Whether `ancestor` is reachable from `value` through producers
    pub fn depends_on(&self, value: &Value, ancestor: &Value) -> bool {
        let mut stack = vec![value.id().clone()];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if &id == ancestor.id() {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(op) = self.producers.get(&id).and_then(|op| self.operation(*op)) {
                stack.extend(op.operands.iter().map(|v| v.id().clone()));
            }
        }
        false
    }

    // ops are stored in id order, which is a topological order
    fn longest_chain(&self, weight: impl Fn(&Operation) -> u32) -> HashMap<ValueId, u32> {
        let mut dist: HashMap<ValueId, u32> = HashMap::new();
        for op in &self.ops {
            let base = op
                .operands
                .iter()
                .filter_map(|v| dist.get(v.id()).copied())
                .max()
                .unwrap_or(0);
            dist.insert(op.result.id().clone(), base.saturating_add(weight(op)));
        }
        dist
    }

    /// Number of `opcode` operations on the longest chain ending at `value`
    pub fn op_depth(&self, value: &Value, opcode: OpType) -> usize {
        self.longest_chain(|op| u32::from(op.opcode == opcode))
            .get(value.id())
            .copied()
            .unwrap_or(0) as usize
    }

    /// Latency-weighted longest chain ending at `value`, in cycles
    pub fn critical_path(&self, value: &Value) -> u32 {
        self.critical_paths().get(value.id()).copied().unwrap_or(0)
    }

    /// Critical path of every op result, computed in one pass.
    /// Values without a producer are absent and count as 0.
    pub fn critical_paths(&self) -> HashMap<ValueId, u32> {
        self.longest_chain(|op| self.latencies.latency_of(op))
    }
}

impl Default for CompilerState {
    fn default() -> Self {
        Self::new(HlsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state_with_inputs(n: usize) -> (CompilerState, Vec<Value>) {
        let mut state = CompilerState::default();
        let inputs = (0..n)
            .map(|i| state.input(format!("x{}", i), &[i]).unwrap())
            .collect();
        (state, inputs)
    }

    #[test]
    fn test_op_ids_follow_emission_order() {
        let (mut state, x) = state_with_inputs(3);
        let a = state.add(&x[0], &x[1]).unwrap();
        let b = state.mul(&a, 2.0).unwrap();
        state.sub(&b, &x[2]).unwrap();

        let ids: Vec<u64> = state.operations().iter().map(|op| op.id.0).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(state.lines().len(), state.operations().len());
        for (op, line) in state.operations().iter().zip(state.lines()) {
            assert!(line.contains(&format!("op_id = \"{}\"", op.id)));
        }
    }

    #[test]
    fn test_same_literal_interned_once() {
        let (mut state, x) = state_with_inputs(2);
        let a = state.mul(&x[0], 3.5).unwrap();
        let b = state.mul(&x[1], 3.5).unwrap();

        let csts: Vec<_> = state
            .operations()
            .iter()
            .filter(|op| op.opcode == OpType::Cst)
            .collect();
        assert_eq!(csts.len(), 1);
        assert_eq!(state.constants().len(), 1);

        let cst = &csts[0].result;
        assert_eq!(&state.producer_of(&a).unwrap().operands[1], cst);
        assert_eq!(&state.producer_of(&b).unwrap().operands[1], cst);
        assert_eq!(
            state.lines()[0],
            "%val_cst_3p5 = \"arith.constant\" () {  pe = \"(-1,)\", opr = \"arith.constant\", op_id = \"0\", value = 3.5 : f32  } : () -> f32"
        );
    }

    #[test]
    fn test_constants_have_a_producer_but_no_edges() {
        let (mut state, x) = state_with_inputs(1);
        let r = state.add(&x[0], 1.0).unwrap();

        let cst = state.constant(Literal::Float(1.0)).unwrap();
        assert_eq!(state.producer_of(&cst).unwrap().opcode, OpType::Cst);
        assert_eq!(state.pe_of(&cst), Some(PeIndex::Unplaced));

        let op = state.producer_of(&r).unwrap().id;
        let edges: Vec<_> = state.edges().iter().filter(|e| e.op == op).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(&edges[0].operand, x[0].id());
    }

    #[test]
    fn test_duplicate_producer_is_fatal() {
        let (mut state, x) = state_with_inputs(2);
        let target = state.fresh_value("target");
        state
            .create_new_op(
                OpType::Add,
                vec![x[0].clone().into(), x[1].clone().into()],
                OpOptions::default().with_result(target.clone()),
            )
            .unwrap();
        let lines_before = state.lines().len();

        let err = state
            .create_new_op(
                OpType::Sub,
                vec![x[0].clone().into(), x[1].clone().into()],
                OpOptions::default().with_result(target),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateProducer { .. }));
        assert_eq!(state.lines().len(), lines_before);

        let err = state.record_result(&x[0], OpId(99));
        assert!(err.is_ok());
        assert!(state.record_result(&x[0], OpId(100)).is_err());
    }

    #[test]
    fn test_undefined_operand_rejected() {
        let mut state = CompilerState::default();
        let ghost = state.fresh_value("ghost");
        let err = state.relu(&ghost).unwrap_err();
        assert!(matches!(err, CompileError::InvalidOperand { .. }));
        assert!(state.lines().is_empty());
    }

    #[test]
    fn test_cst_through_factory_and_bad_literals_rejected() {
        let mut state = CompilerState::default();
        assert!(state
            .create_new_op(OpType::Cst, vec![], OpOptions::default())
            .is_err());
        let x = state.input("x", &[0]).unwrap();
        assert!(state.add(&x, f64::NAN).is_err());
        assert!(state.constants().is_empty());
    }

    #[test]
    fn test_current_pe_drives_implicit_placement() {
        let mut state = CompilerState::default();
        let a = state.input("a", &[1, 1]).unwrap();
        let b = state.input("b", &[2, 3]).unwrap();

        state.set_current_pe(&b);
        let r = state.add(&a, &b).unwrap();
        assert_eq!(state.pe_of(&r), Some(PeIndex::canonicalize(&[2, 3]).unwrap()));

        // constants are unplaced and leave the context alone
        let c = state.constant(Literal::Int(7)).unwrap();
        state.set_current_pe(&c);
        assert_eq!(state.current_pe(), PeIndex::canonicalize(&[2, 3]).unwrap());
    }

    #[test]
    fn test_aux_dependency_between_fused_units_on_one_pe() {
        let (mut state, x) = state_with_inputs(3);
        let pe = PeIndex::canonicalize(&[0, 1]).unwrap();
        let fused = |state: &mut CompilerState| {
            state
                .create_new_op(
                    OpType::Fmac,
                    vec![x[0].clone().into(), x[1].clone().into(), x[2].clone().into()],
                    OpOptions {
                        pe: Some(pe),
                        aux_dep: true,
                        overload: Some("1".into()),
                        ..OpOptions::default()
                    },
                )
                .unwrap()
        };
        let first = fused(&mut state);
        let second = fused(&mut state);

        let deps = state.aux_dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].before, state.producer_of(&first).unwrap().id);
        assert_eq!(deps[0].after, state.producer_of(&second).unwrap().id);
    }

    #[test]
    fn test_critical_path_and_depth() {
        let (mut state, x) = state_with_inputs(3);
        let m = state.mul(&x[0], &x[1]).unwrap();
        let a = state.add(&m, &x[2]).unwrap();
        let r = state.relu(&a).unwrap();

        // mul 2 + add 3 + relu 1
        assert_eq!(state.critical_path(&r), 6);
        assert_eq!(state.op_depth(&r, OpType::Add), 1);
        assert!(state.depends_on(&r, &x[0]));
        assert!(!state.depends_on(&m, &x[2]));
    }

    #[test]
    fn test_critical_paths_cover_every_result() {
        let (mut state, x) = state_with_inputs(2);
        let m = state.mul(&x[0], &x[1]).unwrap();
        let a = state.add(&m, 1.0).unwrap();

        let paths = state.critical_paths();
        assert_eq!(paths.len(), state.operations().len());
        for v in [&m, &a] {
            assert_eq!(paths[v.id()], state.critical_path(v));
        }
        assert!(!paths.contains_key(x[0].id()));
    }

    #[test]
    fn test_critical_path_saturates_on_huge_latencies() {
        let config = HlsConfig::new(4, u32::MAX, 2);
        let mut state = CompilerState::new(config);
        let x = state.input("x", &[0]).unwrap();
        let a = state.add(&x, 1.0).unwrap();
        let b = state.add(&a, 1.0).unwrap();
        assert_eq!(state.critical_path(&b), u32::MAX);
    }

    #[test]
    fn test_reset_starts_over() {
        let (mut state, x) = state_with_inputs(2);
        state.add(&x[0], &x[1]).unwrap();
        state.reset();
        assert!(state.lines().is_empty());
        assert!(state.operations().is_empty());
        assert_eq!(state.next_value_id(), ValueId::Var(0));
        assert_eq!(state.next_op_id(), OpId(0));
    }
}
