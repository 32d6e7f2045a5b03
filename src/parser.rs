//! Parser for the kernel language
//!
//! Parses statements like:
//! - `C = A @ B`
//! - `Y = relu(W @ X + 0.5)`
//! - `s = sum(x * y)`
//! - `M = A > B; N = -A.T`
//!
//! Precedence, loosest first: `>`, then `+ -`, then `* /`, then `@`, then
//! unary minus, then postfix `.T` / `.method()`.

use crate::ast::{Expr, MatrixLiteral, Program, Statement};
use crate::error::{CompileError, CompileResult};
use crate::lexer::{Lexer, Token};

/// Parser for kernel expressions
pub struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    /// Lex `source` up front; lexer errors surface here
    pub fn new(source: &str) -> CompileResult<Self> {
        let tokens = Lexer::tokenize(source)?
            .into_iter()
            .map(|(tok, span)| (tok, span.start))
            .collect();
        Ok(Self { tokens, pos: 0 })
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    fn lookahead(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|(_, at)| *at)
            .unwrap_or(0)
    }

    /// Advance to the next token
    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(tok, _)| tok.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Check if current token matches expected
    fn check(&self, expected: &Token) -> bool {
        match self.current() {
            Some(tok) => std::mem::discriminant(tok) == std::mem::discriminant(expected),
            None => false,
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> CompileError {
        CompileError::parse_error(format!("{} at position {}", message, self.position()))
    }

    /// Consume token if it matches, otherwise error
    fn expect(&mut self, expected: Token) -> CompileResult<()> {
        if self.check(&expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format_args!(
                "expected '{}', got {}",
                expected,
                self.describe_current()
            )))
        }
    }

    fn describe_current(&self) -> String {
        match self.current() {
            Some(tok) => format!("'{}'", tok),
            None => "end of input".to_string(),
        }
    }

    fn expect_ident(&mut self, what: &str) -> CompileResult<String> {
        match self.current() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format_args!("expected {}", what))),
        }
    }

    /// Parse a complete program (multiple statements)
    pub fn parse_program(&mut self) -> CompileResult<Program> {
        let mut statements = Vec::new();

        while self.current().is_some() {
            if self.check(&Token::Semicolon) {
                self.advance();
                continue;
            }
            statements.push(self.parse_statement()?);
        }

        Ok(Program { statements })
    }

    /// Parse a single statement
    fn parse_statement(&mut self) -> CompileResult<Statement> {
        if let (Some(Token::Ident(name)), Some(Token::Equals)) = (self.current(), self.lookahead(1)) {
            let target = name.clone();
            self.pos += 2;
            let value = self.parse_expr()?;
            return Ok(Statement::Assignment { target, value });
        }

        let expr = self.parse_expr()?;
        Ok(Statement::Expression(expr))
    }

    /// Parse an expression (handles operator precedence)
    pub fn parse_expr(&mut self) -> CompileResult<Expr> {
        self.parse_comparison()
    }

    /// Parse comparisons: a > b
    fn parse_comparison(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_additive()?;

        while self.check(&Token::Greater) {
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Gt(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// Parse additive expressions: a + b, a - b
    fn parse_additive(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_multiplicative()?;

        loop {
            if self.check(&Token::Plus) {
                self.advance();
                let right = self.parse_multiplicative()?;
                left = Expr::Add(Box::new(left), Box::new(right));
            } else if self.check(&Token::Minus) {
                self.advance();
                let right = self.parse_multiplicative()?;
                left = Expr::Sub(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }

        Ok(left)
    }

    /// Parse multiplicative expressions: a * b, a / b
    fn parse_multiplicative(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_matmul()?;

        loop {
            if self.check(&Token::Star) {
                self.advance();
                let right = self.parse_matmul()?;
                left = Expr::Mul(Box::new(left), Box::new(right));
            } else if self.check(&Token::Slash) {
                self.advance();
                let right = self.parse_matmul()?;
                left = Expr::Div(Box::new(left), Box::new(right));
            } else {
                break;
            }
        }

        Ok(left)
    }

    /// Parse matrix multiplication: a @ b
    fn parse_matmul(&mut self) -> CompileResult<Expr> {
        let mut left = self.parse_unary()?;
        while self.check(&Token::MatMul) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::MatMul(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// Parse unary expressions: -a
    fn parse_unary(&mut self) -> CompileResult<Expr> {
        if self.check(&Token::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            // fold literals so `-1.5` stays a constant
            Ok(match operand {
                Expr::Scalar(n) => Expr::Scalar(-n),
                other => Expr::Neg(Box::new(other)),
            })
        } else {
            self.parse_postfix()
        }
    }

    /// Parse postfix expressions: a.T, a.method()
    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let mut expr = self.parse_primary()?;

        while self.check(&Token::Dot) {
            self.advance();
            let name = self.expect_ident("identifier after '.'")?;

            if name == "T" {
                expr = Expr::Transpose(Box::new(expr));
            } else if self.check(&Token::LParen) {
                let args = self.parse_args()?;
                expr = Expr::FunctionCall {
                    name: format!(".{}", name),
                    args: std::iter::once(expr).chain(args).collect(),
                };
            } else {
                return Err(self.error(format_args!("unknown attribute '{}'", name)));
            }
        }

        Ok(expr)
    }

    /// Parse primary expressions: literals, variables, parenthesized, function calls
    fn parse_primary(&mut self) -> CompileResult<Expr> {
        match self.current() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.advance();
                Ok(Expr::Scalar(n))
            }

            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();

                // numpy function: np.func()
                if name == "np" && self.check(&Token::Dot) {
                    self.advance();
                    let func_name = self.expect_ident("function name after 'np.'")?;
                    let args = self.parse_args()?;
                    return Ok(Expr::FunctionCall {
                        name: format!("np.{}", func_name),
                        args,
                    });
                }

                if self.check(&Token::LParen) {
                    let args = self.parse_args()?;
                    return Ok(Expr::FunctionCall { name, args });
                }

                Ok(Expr::Variable(name))
            }

            Some(Token::LParen) => {
                self.advance();
                let first = self.parse_expr()?;

                if self.check(&Token::Comma) {
                    let mut elements = vec![first];
                    while self.check(&Token::Comma) {
                        self.advance();
                        if self.check(&Token::RParen) {
                            break; // Trailing comma
                        }
                        elements.push(self.parse_expr()?);
                    }
                    self.expect(Token::RParen)?;
                    Ok(Expr::Tuple(elements))
                } else {
                    self.expect(Token::RParen)?;
                    Ok(first)
                }
            }

            Some(Token::LBracket) => self.parse_matrix_literal(),

            None => Err(self.error("unexpected end of input")),

            Some(_) => Err(self.error(format_args!("unexpected token {}", self.describe_current()))),
        }
    }

    /// Parse function arguments: (arg1, arg2, ...)
    fn parse_args(&mut self) -> CompileResult<Vec<Expr>> {
        self.expect(Token::LParen)?;

        let mut args = Vec::new();

        if !self.check(&Token::RParen) {
            args.push(self.parse_expr()?);

            while self.check(&Token::Comma) {
                self.advance();
                if self.check(&Token::RParen) {
                    break; // Trailing comma
                }
                args.push(self.parse_expr()?);
            }
        }

        self.expect(Token::RParen)?;
        Ok(args)
    }

    /// Parse a matrix literal: [[1, 2], [3, 4]] or a row vector [1, 2]
    fn parse_matrix_literal(&mut self) -> CompileResult<Expr> {
        self.expect(Token::LBracket)?;

        if self.check(&Token::LBracket) {
            let mut rows = Vec::new();

            while self.check(&Token::LBracket) {
                rows.push(self.parse_row()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }

            self.expect(Token::RBracket)?;

            let expected_len = rows[0].len();
            for (i, row) in rows.iter().enumerate() {
                if row.len() != expected_len {
                    return Err(self.error(format_args!(
                        "row {} has {} elements, expected {}",
                        i,
                        row.len(),
                        expected_len
                    )));
                }
            }

            Ok(Expr::Matrix(MatrixLiteral::new(rows)))
        } else {
            let row = self.parse_number_list()?;
            self.expect(Token::RBracket)?;
            Ok(Expr::Matrix(MatrixLiteral::new(vec![row])))
        }
    }

    /// Parse a row: [1, 2, 3]
    fn parse_row(&mut self) -> CompileResult<Vec<f64>> {
        self.expect(Token::LBracket)?;
        let values = self.parse_number_list()?;
        self.expect(Token::RBracket)?;
        Ok(values)
    }

    fn parse_signed_number(&mut self) -> CompileResult<f64> {
        let negate = self.check(&Token::Minus);
        if negate {
            self.advance();
        }
        match self.current() {
            Some(Token::Number(n)) => {
                let n = *n;
                self.advance();
                Ok(if negate { -n } else { n })
            }
            _ => Err(self.error("expected number in matrix literal")),
        }
    }

    /// Parse a non-empty list of numbers
    fn parse_number_list(&mut self) -> CompileResult<Vec<f64>> {
        let mut values = vec![self.parse_signed_number()?];

        while self.check(&Token::Comma) {
            self.advance();
            if self.check(&Token::RBracket) {
                break; // Trailing comma
            }
            values.push(self.parse_signed_number()?);
        }

        Ok(values)
    }
}
