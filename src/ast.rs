//! Abstract Syntax Tree definitions for the kernel language

use crate::op::OpType;

/// A parsed kernel: statements in source order
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

/// A statement in the program
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Variable assignment: `X = expr`
    Assignment { target: String, value: Expr },
    /// Bare expression; its result is still an output
    Expression(Expr),
}

/// Expression types
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Matrix variable reference
    Variable(String),

    /// Scalar literal
    Scalar(f64),

    /// Matrix literal: `[[1, 2], [3, 4]]`
    Matrix(MatrixLiteral),

    /// Matrix multiplication: `A @ B`
    MatMul(Box<Expr>, Box<Expr>),

    /// `A + B`, `A - B`, `A * B`, `A / B`, elementwise
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),

    /// Element-wise comparison: `A > B`
    Gt(Box<Expr>, Box<Expr>),

    /// Unary minus: `-A`
    Neg(Box<Expr>),

    /// Matrix transpose: `A.T` or `np.transpose(A)`
    Transpose(Box<Expr>),

    /// Function call: `relu(x)`, `np.zeros((m, n))`, `x.sum()`.
    /// Method calls are named `.name` and take the receiver as first argument.
    FunctionCall { name: String, args: Vec<Expr> },

    /// Tuple literal for shapes: `(3, 4)`
    Tuple(Vec<Expr>),
}

/// Rows of a `[[..], [..]]` literal
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixLiteral {
    pub rows: Vec<Vec<f64>>,
}

impl MatrixLiteral {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn shape(&self) -> (usize, usize) {
        let m = self.rows.len();
        let n = if m > 0 { self.rows[0].len() } else { 0 };
        (m, n)
    }
}

/// An expression annotated with the shape it evaluates to
#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub expr: TypedExprKind,
    pub shape: Shape,
}

/// Shape of a value. Scalars behave as 1x1 matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Matrix { rows: usize, cols: usize },
}

impl Shape {
    pub fn matrix(rows: usize, cols: usize) -> Self {
        Shape::Matrix { rows, cols }
    }

    pub fn is_matrix(&self) -> bool {
        matches!(self, Shape::Matrix { .. })
    }

    pub fn dimensions(&self) -> (usize, usize) {
        match self {
            Shape::Matrix { rows, cols } => (*rows, *cols),
            Shape::Scalar => (1, 1),
        }
    }

    /// Broadcasts against anything
    pub fn is_unit(&self) -> bool {
        self.dimensions() == (1, 1)
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::Scalar => write!(f, "scalar"),
            Shape::Matrix { rows, cols } => write!(f, "({}, {})", rows, cols),
        }
    }
}

/// What a typed node computes. Elementwise nodes carry the opcode every
/// element lowers to.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedExprKind {
    Variable(String),
    Scalar(f64),
    Matrix(Vec<Vec<f64>>),
    MatMul(Box<TypedExpr>, Box<TypedExpr>),
    /// One binary op per output element, with 1x1 operands broadcast
    Zip(OpType, Box<TypedExpr>, Box<TypedExpr>),
    /// One unary op per element
    Map(OpType, Box<TypedExpr>),
    Transpose(Box<TypedExpr>),
    /// Reduce every element to one scalar
    Sum(Box<TypedExpr>),
}

/// One assignment; a bare expression is assigned to `_`
#[derive(Debug, Clone, PartialEq)]
pub struct TypedStatement {
    pub target: String,
    pub value: TypedExpr,
}

/// Output of the analyzer, ready for lowering
#[derive(Debug, Clone, PartialEq)]
pub struct TypedProgram {
    pub statements: Vec<TypedStatement>,
    /// Free variables with their declared shapes, in first-use order
    pub inputs: Vec<(String, (usize, usize))>,
}
