//! SSA values and the literal operands that feed them

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{CompileError, CompileResult};

/// Identity of an SSA value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueId {
    /// Allocated from the per-compilation value counter
    Var(u64),
    /// Derived from the mangled canonical text of a literal
    Const(String),
}

impl ValueId {
    pub fn is_constant(&self) -> bool {
        matches!(self, ValueId::Const(_))
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueId::Var(n) => write!(f, "{}", n),
            ValueId::Const(text) => write!(f, "cst_{}", text),
        }
    }
}

/// Identity of an operation. Ids are handed out in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable SSA handle. Two values are the same value iff their ids match;
/// the name is for debugging only.
#[derive(Debug, Clone)]
pub struct Value {
    id: ValueId,
    name: String,
}

impl Value {
    pub(crate) fn new(id: ValueId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> &ValueId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_constant(&self) -> bool {
        self.id.is_constant()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%val_{}", self.id)
    }
}

/// A raw literal operand, lowered through the constant pool on first use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl Literal {
    /// Text embedded in the `arith.constant` line. Identical text means the
    /// same constant.
    pub fn canonical_text(&self) -> String {
        match self {
            Literal::Float(v) => format!("{:?}", v),
            Literal::Int(v) => v.to_string(),
            Literal::Bool(true) => "True".to_string(),
            Literal::Bool(false) => "False".to_string(),
        }
    }

    /// Rejects literals the hardware number format cannot represent.
    pub fn validate(&self) -> CompileResult<()> {
        match self {
            Literal::Float(v) if !v.is_finite() => Err(CompileError::operand(format!(
                "literal {} is not a finite number",
                v
            ))),
            _ => Ok(()),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Literal::Float(v) => *v,
            Literal::Int(v) => *v as f64,
            Literal::Bool(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// `3.5` -> `cst_3p5`, `-1.0` -> `cst_m1p0`.
    pub(crate) fn value_id(&self) -> ValueId {
        let mangled = self
            .canonical_text()
            .chars()
            .filter_map(|c| match c {
                '.' => Some('p'),
                '-' => Some('m'),
                '+' => None,
                other => Some(other),
            })
            .collect();
        ValueId::Const(mangled)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_text())
    }
}

/// Anything that can sit in an operand slot or a register.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Literal(Literal),
}

impl Operand {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Operand::Value(v) => Some(v),
            Operand::Literal(_) => None,
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Operand::Value(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Value(v) => write!(f, "{}", v),
            Operand::Literal(l) => write!(f, "{}", l),
        }
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl From<&Value> for Operand {
    fn from(v: &Value) -> Self {
        Operand::Value(v.clone())
    }
}

impl From<Literal> for Operand {
    fn from(l: Literal) -> Self {
        Operand::Literal(l)
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Literal(Literal::Float(v))
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Literal(Literal::Int(v))
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Literal(Literal::Bool(v))
    }
}
