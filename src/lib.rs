//! Bragg HLS backend
//!
//! This library lowers small tensor kernels into a scheduled, PE-placed IR
//! for a fixed grid of arithmetic processing elements. The IR engine
//! ([`CompilerState`], [`FmacBuilder`], [`recursive_sum`], [`reduce_tiling`])
//! can be driven directly, or through the NumPy-style kernel language.
//!
//! # Example
//!
//! ```rust
//! use bragg_hls::{compile_with_shapes, HlsConfig};
//!
//! let config = HlsConfig::default(); // 4-pair fused units, f32
//! let shapes = vec![("A", (2, 3)), ("B", (3, 2))];
//! let result = compile_with_shapes("C = relu(A @ B)", &shapes, &config).unwrap();
//! println!("{}", result);
//! ```

pub mod analyzer;
pub mod ast;
pub mod codegen;
pub mod constant;
pub mod error;
pub mod eval;
pub mod fmac;
pub mod hardware;
pub mod latency;
pub mod lexer;
pub mod op;
pub mod parser;
pub mod reduce;
pub mod register;
pub mod state;
pub mod tiling;
pub mod value;

use tracing::info;

pub use analyzer::Analyzer;
pub use ast::*;
pub use codegen::{CodeGenerator, Lowered};
pub use error::{CompileError, CompileResult};
pub use fmac::FmacBuilder;
pub use hardware::{HlsConfig, IrProgram, PortBinding};
pub use latency::{LatencyEntry, LatencyTable};
pub use op::{OpType, Operation, PeIndex, PE_RANK};
pub use parser::Parser;
pub use reduce::{recursive_sum, reduce_perfect_tree};
pub use register::{copy_registers, reduce_tiling, self_copy, RegisterFile};
pub use state::{CompilerState, OpOptions};
pub use tiling::TilingStrategy;
pub use value::{Literal, OpId, Operand, Value, ValueId};

/// Compile a kernel whose operands are all literals
pub fn compile(source: &str, config: &HlsConfig) -> CompileResult<IrProgram> {
    compile_with_shapes(source, &[], config)
}

/// Compile with explicit input matrix dimensions
pub fn compile_with_shapes(
    source: &str,
    shapes: &[(&str, (usize, usize))],
    config: &HlsConfig,
) -> CompileResult<IrProgram> {
    lower_with_shapes(source, shapes, config).map(Lowered::into_program)
}

/// Parse, check and lower, keeping the compiler state for inspection
pub fn lower_with_shapes(
    source: &str,
    shapes: &[(&str, (usize, usize))],
    config: &HlsConfig,
) -> CompileResult<Lowered> {
    config.validate()?;
    info!(inputs = shapes.len(), fmac_pairs = config.fmac_pairs, "compile start");

    let program = Parser::new(source)?.parse_program()?;

    let mut analyzer = Analyzer::new();
    for (name, shape) in shapes {
        analyzer.define_matrix(name, *shape);
    }
    let typed_program = analyzer.analyze(program)?;

    let lowered = CodeGenerator::new(config.clone()).lower(typed_program)?;
    info!(
        ops = lowered.state.operations().len(),
        outputs = lowered.outputs.len(),
        "compile finished"
    );
    Ok(lowered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compile_literals_only() {
        let program = compile("y = [[1.5, 2]] * 2", &HlsConfig::default()).unwrap();
        assert_eq!(
            program.lines,
            vec![
                "%val_cst_1p5 = \"arith.constant\" () {  pe = \"(-1,)\", opr = \"arith.constant\", op_id = \"0\", value = 1.5 : f32  } : () -> f32",
                "%val_cst_2p0 = \"arith.constant\" () {  pe = \"(-1,)\", opr = \"arith.constant\", op_id = \"1\", value = 2.0 : f32  } : () -> f32",
                "%val_0 = \"fmul\" (%val_cst_1p5, %val_cst_2p0) {  pe = \"(0, 0, 0, 0)\", opr = \"fmul\", op_id = \"2\"  } : (f32, f32) -> f32",
                "%val_1 = \"fmul\" (%val_cst_2p0, %val_cst_2p0) {  pe = \"(0, 0, 0, 1)\", opr = \"fmul\", op_id = \"3\"  } : (f32, f32) -> f32",
            ]
        );
    }

    #[test]
    fn test_undefined_input_is_reported() {
        let err = compile("C = A @ B", &HlsConfig::default()).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedVariable { .. }));
    }

    #[test]
    fn test_oversized_builtin_is_an_error() {
        let err = compile("C = np.zeros((100000000000, 100000000000))", &HlsConfig::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::TypeError { .. }));
    }

    #[test]
    fn test_invalid_config_rejected_before_parsing() {
        let config = HlsConfig {
            fmac_pairs: 0,
            ..HlsConfig::default()
        };
        assert!(matches!(
            compile("y = 1 + 1", &config),
            Err(CompileError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_lower_and_evaluate_mlp_layer() {
        let lowered = lower_with_shapes(
            "h = relu(W @ x + b)",
            &[("W", (2, 3)), ("x", (3, 1)), ("b", (2, 1))],
            &HlsConfig::new(2, 3, 2),
        )
        .unwrap();

        let mut bindings = IndexMap::new();
        bindings.insert("W".to_string(), vec![1.0, -1.0, 2.0, 0.5, 0.5, -3.0]);
        bindings.insert("x".to_string(), vec![1.0, 2.0, 3.0]);
        bindings.insert("b".to_string(), vec![0.5, 1.0]);
        let out = lowered.evaluate(&bindings).unwrap();

        // row 0: 1 - 2 + 6 + 0.5; row 1: 0.5 + 1 - 9 + 1 -> clamped
        assert_eq!(out["h"], vec![5.5, 0.0]);
    }
}
