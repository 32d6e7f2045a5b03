//! Error types for the HLS compiler
//!
//! Every failure is fatal for the compilation that raised it. Nothing here is
//! retryable; the variants only exist so callers can tell a front-end mistake
//! from a broken core invariant.

use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parser error: {message}")]
    ParseError { message: String },

    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Tiling error: {message}")]
    TilingError { message: String },

    #[error("Lowering error: {message}")]
    LoweringError { message: String },

    #[error("Perfect tree needs a power-of-two number of terms, got {len}")]
    NotPowerOfTwo { len: usize },

    #[error("Value {value} already produced by op {first}, cannot be produced again by op {second}")]
    DuplicateProducer {
        value: String,
        first: u64,
        second: u64,
    },

    #[error("FMAC at {pe} needs exactly one accumulator, found {found}")]
    FmacAccumulator { pe: String, found: usize },

    #[error("Unknown opcode: {name}")]
    UnknownOpcode { name: String },

    #[error("Invalid operand: {message}")]
    InvalidOperand { message: String },

    #[error("Invalid PE index: {message}")]
    InvalidPeIndex { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl CompileError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        CompileError::ParseError { message: msg.into() }
    }

    pub fn type_error(msg: impl Into<String>) -> Self {
        CompileError::TypeError { message: msg.into() }
    }

    pub fn undefined(name: impl Into<String>) -> Self {
        CompileError::UndefinedVariable { name: name.into() }
    }

    pub fn invalid_op(msg: impl Into<String>) -> Self {
        CompileError::InvalidOperation { message: msg.into() }
    }

    pub fn tiling(msg: impl Into<String>) -> Self {
        CompileError::TilingError { message: msg.into() }
    }

    pub fn lowering(msg: impl Into<String>) -> Self {
        CompileError::LoweringError { message: msg.into() }
    }

    pub fn operand(msg: impl Into<String>) -> Self {
        CompileError::InvalidOperand { message: msg.into() }
    }

    pub fn pe_index(msg: impl Into<String>) -> Self {
        CompileError::InvalidPeIndex { message: msg.into() }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::ConfigError { message: msg.into() }
    }

    pub fn shape_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        CompileError::ShapeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}
