//! Operation model and its textual emission grammar

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;

use crate::error::{CompileError, CompileResult};
use crate::value::{Literal, OpId, Value};

/// Number of coordinates in a canonical PE index.
pub const PE_RANK: usize = 4;

/// The closed set of hardware opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpType {
    Add,
    Sub,
    Mul,
    Div,
    Gt,
    Neg,
    Relu,
    Cst,
    Copy,
    Fmac,
}

impl OpType {
    pub const ALL: [OpType; 10] = [
        OpType::Add,
        OpType::Sub,
        OpType::Mul,
        OpType::Div,
        OpType::Gt,
        OpType::Neg,
        OpType::Relu,
        OpType::Cst,
        OpType::Copy,
        OpType::Fmac,
    ];

    /// Mnemonic used in the emitted IR
    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpType::Add => "fadd",
            OpType::Sub => "fsub",
            OpType::Mul => "fmul",
            OpType::Div => "fdiv",
            OpType::Gt => "fcmpugt",
            OpType::Neg => "fneg",
            OpType::Relu => "frelu",
            OpType::Cst => "arith.constant",
            OpType::Copy => "copy",
            OpType::Fmac => "fmac",
        }
    }

    /// Check that `n` operands are legal for this opcode
    pub fn check_arity(&self, n: usize) -> CompileResult<()> {
        let ok = match self {
            OpType::Add | OpType::Sub | OpType::Mul | OpType::Div | OpType::Gt => n == 2,
            OpType::Neg | OpType::Relu | OpType::Copy => n == 1,
            OpType::Cst => n == 0,
            // accumulator plus at least one multiply pair
            OpType::Fmac => n >= 3 && n % 2 == 1,
        };
        if ok {
            Ok(())
        } else {
            Err(CompileError::operand(format!(
                "{} cannot take {} operand(s)",
                self.mnemonic(),
                n
            )))
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

impl FromStr for OpType {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpType::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic() == s)
            .ok_or_else(|| CompileError::UnknownOpcode { name: s.to_string() })
    }
}

/// Spatial placement of an operation's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeIndex {
    /// Not spatially placed (constants)
    Unplaced,
    Placed([usize; PE_RANK]),
}

impl PeIndex {
    pub fn origin() -> Self {
        PeIndex::Placed([0; PE_RANK])
    }

    /// Left-pad `coords` with zeros to `PE_RANK` entries, so `(i, j)` and
    /// `(0, 0, i, j)` name the same PE.
    pub fn canonicalize(coords: &[usize]) -> CompileResult<Self> {
        if coords.is_empty() {
            return Err(CompileError::pe_index("a PE index needs at least one coordinate"));
        }
        if coords.len() > PE_RANK {
            return Err(CompileError::pe_index(format!(
                "{:?} has {} coordinates, at most {} are supported",
                coords,
                coords.len(),
                PE_RANK
            )));
        }
        let mut canonical = [0; PE_RANK];
        canonical[PE_RANK - coords.len()..].copy_from_slice(coords);
        Ok(PeIndex::Placed(canonical))
    }

    pub fn coords(&self) -> Option<&[usize; PE_RANK]> {
        match self {
            PeIndex::Placed(c) => Some(c),
            PeIndex::Unplaced => None,
        }
    }

    pub fn is_placed(&self) -> bool {
        matches!(self, PeIndex::Placed(_))
    }
}

impl fmt::Display for PeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeIndex::Unplaced => write!(f, "(-1,)"),
            PeIndex::Placed(coords) => {
                let parts: Vec<String> = coords.iter().map(|c| c.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

/// One hardware-level instruction
#[derive(Debug, Clone)]
pub struct Operation {
    pub opcode: OpType,
    pub pe: PeIndex,
    pub id: OpId,
    pub operands: Vec<Value>,
    pub result: Value,
    /// Disambiguates FMAC variants by fan-in
    pub overload: Option<String>,
    pub attrs: IndexMap<String, String>,
    /// Only set for `arith.constant`
    pub literal: Option<Literal>,
}

impl Operation {
    /// `opr` attribute: mnemonic plus optional overload
    pub fn opr(&self) -> String {
        match &self.overload {
            Some(tag) => format!("{}.{}", self.opcode.mnemonic(), tag),
            None => self.opcode.mnemonic().to_string(),
        }
    }

    fn attrs_text(&self) -> String {
        let mut attrs = vec![
            format!("pe = \"{}\"", self.pe),
            format!("opr = \"{}\"", self.opr()),
            format!("op_id = \"{}\"", self.id),
        ];
        for (name, value) in &self.attrs {
            attrs.push(format!("{} = \"{}\"", name, value));
        }
        attrs.join(", ")
    }

    /// Render the single IR line for this operation
    pub fn emit(&self, dtype: &str) -> String {
        let attrs = self.attrs_text();
        match (&self.opcode, &self.literal) {
            (OpType::Cst, Some(literal)) => format!(
                "{} = \"{}\" () {{  {}, value = {} : {}  }} : () -> {}",
                self.result,
                self.opcode.mnemonic(),
                attrs,
                literal,
                dtype,
                dtype
            ),
            _ => {
                let args: Vec<String> = self.operands.iter().map(|v| v.to_string()).collect();
                let types = vec![dtype; self.operands.len()].join(", ");
                format!(
                    "{} = \"{}\" ({}) {{  {}  }} : ({}) -> {}",
                    self.result,
                    self.opcode.mnemonic(),
                    args.join(", "),
                    attrs,
                    types,
                    dtype
                )
            }
        }
    }
}
