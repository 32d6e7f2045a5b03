//! Type analyzer for inferring matrix shapes
//!
//! Performs shape inference and type checking on the AST. Every variable must
//! either be declared up front with [`Analyzer::define_matrix`] (a program
//! input) or assigned by an earlier statement.

use std::collections::HashMap;

use crate::ast::*;
use crate::error::{CompileError, CompileResult};
use crate::op::OpType;

/// Largest number of elements any matrix may have. Every element becomes at
/// least one register on the PE array.
pub const MAX_ELEMENTS: usize = 1 << 20;

/// Largest `m * k * n` a single matrix product may need
pub const MAX_MATMUL_PRODUCTS: usize = 1 << 24;

fn check_size(what: &str, dims: &[usize], limit: usize) -> CompileResult<()> {
    let count = dims.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d));
    match count {
        Some(n) if n <= limit => Ok(()),
        _ => Err(CompileError::type_error(format!(
            "{} {:?} exceeds the limit of {} elements",
            what, dims, limit
        ))),
    }
}

/// Analyzer for type checking and shape inference
pub struct Analyzer {
    /// Declared input shapes: name -> (rows, cols)
    declared: HashMap<String, (usize, usize)>,
    /// Shapes of assigned variables
    bound: HashMap<String, Shape>,
    inputs: Vec<(String, (usize, usize))>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self {
            declared: HashMap::new(),
            bound: HashMap::new(),
            inputs: Vec::new(),
        }
    }

    /// Declare an input matrix with known shape
    pub fn define_matrix(&mut self, name: &str, shape: (usize, usize)) {
        self.declared.insert(name.to_string(), shape);
    }

    /// Analyze a program and produce typed AST
    pub fn analyze(&mut self, program: Program) -> CompileResult<TypedProgram> {
        let mut statements = Vec::new();

        for stmt in program.statements {
            statements.push(self.analyze_statement(stmt)?);
        }

        Ok(TypedProgram {
            statements,
            inputs: std::mem::take(&mut self.inputs),
        })
    }

    fn analyze_statement(&mut self, stmt: Statement) -> CompileResult<TypedStatement> {
        match stmt {
            Statement::Assignment { target, value } => {
                let typed_value = self.analyze_expr(&value)?;
                self.bound.insert(target.clone(), typed_value.shape);
                Ok(TypedStatement {
                    target,
                    value: typed_value,
                })
            }
            Statement::Expression(expr) => {
                let typed_value = self.analyze_expr(&expr)?;
                Ok(TypedStatement {
                    target: "_".to_string(),
                    value: typed_value,
                })
            }
        }
    }

    fn variable_shape(&mut self, name: &str) -> CompileResult<Shape> {
        if let Some(shape) = self.bound.get(name) {
            return Ok(*shape);
        }
        let (rows, cols) = *self
            .declared
            .get(name)
            .ok_or_else(|| CompileError::undefined(name))?;
        if rows == 0 || cols == 0 {
            return Err(CompileError::shape_mismatch(
                "non-empty input",
                format!("{} with shape ({}, {})", name, rows, cols),
            ));
        }
        check_size(&format!("input '{}'", name), &[rows, cols], MAX_ELEMENTS)?;
        if !self.inputs.iter().any(|(n, _)| n == name) {
            self.inputs.push((name.to_string(), (rows, cols)));
        }
        Ok(Shape::matrix(rows, cols))
    }

    /// Analyze an expression and infer its shape
    fn analyze_expr(&mut self, expr: &Expr) -> CompileResult<TypedExpr> {
        match expr {
            Expr::Variable(name) => {
                let shape = self.variable_shape(name)?;
                Ok(TypedExpr {
                    expr: TypedExprKind::Variable(name.clone()),
                    shape,
                })
            }

            Expr::Scalar(n) => Ok(TypedExpr {
                expr: TypedExprKind::Scalar(*n),
                shape: Shape::Scalar,
            }),

            Expr::Matrix(mat) => {
                let (rows, cols) = mat.shape();
                if rows == 0 || cols == 0 {
                    return Err(CompileError::type_error("empty matrix literal"));
                }
                Ok(TypedExpr {
                    expr: TypedExprKind::Matrix(mat.rows.clone()),
                    shape: Shape::matrix(rows, cols),
                })
            }

            Expr::MatMul(left, right) => self.analyze_matmul(left, right),

            Expr::Add(left, right) => self.analyze_elementwise(left, right, OpType::Add),
            Expr::Sub(left, right) => self.analyze_elementwise(left, right, OpType::Sub),
            Expr::Mul(left, right) => self.analyze_elementwise(left, right, OpType::Mul),
            Expr::Div(left, right) => self.analyze_elementwise(left, right, OpType::Div),
            Expr::Gt(left, right) => self.analyze_elementwise(left, right, OpType::Gt),

            Expr::Neg(inner) => self.analyze_map(inner, OpType::Neg),

            Expr::Transpose(inner) => self.analyze_transpose(inner),

            Expr::FunctionCall { name, args } => self.analyze_function_call(name, args),

            Expr::Tuple(_) => Err(CompileError::type_error(
                "tuples are only valid as shape arguments",
            )),
        }
    }

    fn analyze_matmul(&mut self, left: &Expr, right: &Expr) -> CompileResult<TypedExpr> {
        let left_typed = self.analyze_expr(left)?;
        let right_typed = self.analyze_expr(right)?;

        let shape = match (&left_typed.shape, &right_typed.shape) {
            (Shape::Matrix { rows: m, cols: k1 }, Shape::Matrix { rows: k2, cols: n }) => {
                if k1 != k2 {
                    return Err(CompileError::ShapeMismatch {
                        expected: format!("inner dimensions to match, got {} and {}", k1, k2),
                        got: format!("left: ({}, {}), right: ({}, {})", m, k1, k2, n),
                    });
                }
                check_size("matmul result", &[*m, *n], MAX_ELEMENTS)?;
                check_size("matmul", &[*m, *k1, *n], MAX_MATMUL_PRODUCTS)?;
                Shape::matrix(*m, *n)
            }
            _ => return Err(CompileError::type_error("MatMul requires matrix operands")),
        };

        Ok(TypedExpr {
            expr: TypedExprKind::MatMul(Box::new(left_typed), Box::new(right_typed)),
            shape,
        })
    }

    fn analyze_elementwise(
        &mut self,
        left: &Expr,
        right: &Expr,
        opcode: OpType,
    ) -> CompileResult<TypedExpr> {
        let left_typed = self.analyze_expr(left)?;
        let right_typed = self.analyze_expr(right)?;
        let shape = self.check_broadcast_compatible(&left_typed.shape, &right_typed.shape)?;

        Ok(TypedExpr {
            expr: TypedExprKind::Zip(opcode, Box::new(left_typed), Box::new(right_typed)),
            shape,
        })
    }

    fn analyze_map(&mut self, inner: &Expr, opcode: OpType) -> CompileResult<TypedExpr> {
        let inner = self.analyze_expr(inner)?;
        let shape = inner.shape;
        Ok(TypedExpr {
            expr: TypedExprKind::Map(opcode, Box::new(inner)),
            shape,
        })
    }

    fn analyze_transpose(&mut self, inner: &Expr) -> CompileResult<TypedExpr> {
        let inner_typed = self.analyze_expr(inner)?;
        let shape = match inner_typed.shape {
            Shape::Matrix { rows, cols } => Shape::matrix(cols, rows),
            Shape::Scalar => Shape::Scalar,
        };
        Ok(TypedExpr {
            expr: TypedExprKind::Transpose(Box::new(inner_typed)),
            shape,
        })
    }

    fn expect_args(name: &str, args: &[Expr], count: usize) -> CompileResult<()> {
        if args.len() != count {
            return Err(CompileError::type_error(format!(
                "{} expects {} argument(s), got {}",
                name,
                count,
                args.len()
            )));
        }
        Ok(())
    }

    /// Analyze a builtin or numpy function call
    fn analyze_function_call(&mut self, name: &str, args: &[Expr]) -> CompileResult<TypedExpr> {
        match name {
            "np.zeros" | "np.ones" => {
                Self::expect_args(name, args, 1)?;
                let (rows, cols) = self.extract_shape(&args[0])?;
                check_size(name, &[rows, cols], MAX_ELEMENTS)?;
                let fill = if name == "np.ones" { 1.0 } else { 0.0 };
                Ok(TypedExpr {
                    expr: TypedExprKind::Matrix(vec![vec![fill; cols]; rows]),
                    shape: Shape::matrix(rows, cols),
                })
            }

            "np.eye" | "np.identity" => {
                Self::expect_args(name, args, 1)?;
                let n = self.extract_dim(&args[0])?;
                check_size(name, &[n, n], MAX_ELEMENTS)?;
                let mut matrix = vec![vec![0.0; n]; n];
                for (i, row) in matrix.iter_mut().enumerate() {
                    row[i] = 1.0;
                }
                Ok(TypedExpr {
                    expr: TypedExprKind::Matrix(matrix),
                    shape: Shape::matrix(n, n),
                })
            }

            "np.transpose" => {
                Self::expect_args(name, args, 1)?;
                self.analyze_transpose(&args[0])
            }

            "np.matmul" | "np.dot" => {
                Self::expect_args(name, args, 2)?;
                self.analyze_matmul(&args[0], &args[1])
            }

            "relu" | "np.relu" | ".relu" => {
                Self::expect_args(name, args, 1)?;
                self.analyze_map(&args[0], OpType::Relu)
            }

            "sum" | "np.sum" | ".sum" => {
                Self::expect_args(name, args, 1)?;
                let inner = self.analyze_expr(&args[0])?;
                Ok(TypedExpr {
                    expr: TypedExprKind::Sum(Box::new(inner)),
                    shape: Shape::Scalar,
                })
            }

            _ => Err(CompileError::type_error(format!("Unknown function: {}", name))),
        }
    }

    /// Extract a shape tuple from an expression
    fn extract_shape(&self, expr: &Expr) -> CompileResult<(usize, usize)> {
        match expr {
            Expr::Tuple(elements) if elements.len() == 2 => {
                let rows = self.extract_dim(&elements[0])?;
                let cols = self.extract_dim(&elements[1])?;
                Ok((rows, cols))
            }
            _ => Err(CompileError::type_error("Expected shape tuple (rows, cols)")),
        }
    }

    /// Extract a positive integral dimension
    fn extract_dim(&self, expr: &Expr) -> CompileResult<usize> {
        match expr {
            Expr::Scalar(n) if *n >= 1.0 && n.fract() == 0.0 => Ok(*n as usize),
            Expr::Scalar(n) => Err(CompileError::type_error(format!(
                "dimension must be a positive integer, got {}",
                n
            ))),
            _ => Err(CompileError::type_error("Expected numeric value")),
        }
    }

    /// Check if two shapes are broadcast compatible
    fn check_broadcast_compatible(&self, left: &Shape, right: &Shape) -> CompileResult<Shape> {
        match (left, right) {
            (Shape::Scalar, Shape::Scalar) => Ok(Shape::Scalar),
            (unit, other) | (other, unit) if unit.is_unit() && other.is_matrix() => Ok(*other),
            (l, r) if l.dimensions() == r.dimensions() => Ok(*l),
            (l, r) => Err(CompileError::ShapeMismatch {
                expected: "matching shapes for broadcast".to_string(),
                got: format!("{} and {}", l, r),
            }),
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}
