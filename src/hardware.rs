//! Hardware-facing configuration and the compiled program artifact
//!
//! `HlsConfig` carries the constants the external scheduler and hardware
//! generator agree on (latencies, element type, fused-unit fan-in).
//! `IrProgram` is what a compilation hands to them.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::latency::LatencyEntry;
use crate::op::OpType;
use crate::state::CompilerState;

/// Configuration for the target PE array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    /// Maximum multiply pairs one fused unit accumulates
    pub fmac_pairs: usize,
    /// Element type written into every IR signature
    pub dtype: String,
    /// Cycles for an add/sub unit
    pub add_latency: u32,
    /// Cycles for a multiplier
    pub mul_latency: u32,
    /// Cycles for a divider
    pub div_latency: u32,
}

impl HlsConfig {
    pub fn new(fmac_pairs: usize, add_latency: u32, mul_latency: u32) -> Self {
        Self {
            fmac_pairs,
            add_latency,
            mul_latency,
            ..Self::default()
        }
    }

    pub fn with_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.dtype = dtype.into();
        self
    }

    pub fn from_json_str(json: &str) -> CompileResult<Self> {
        let config: HlsConfig = serde_json::from_str(json)
            .map_err(|e| CompileError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> CompileResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            CompileError::config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> CompileResult<()> {
        if self.fmac_pairs == 0 {
            return Err(CompileError::config("fmac_pairs must be at least 1"));
        }
        if self.dtype.trim().is_empty() {
            return Err(CompileError::config("dtype must not be empty"));
        }
        Ok(())
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            fmac_pairs: 4,
            dtype: "f32".to_string(),
            add_latency: 3,
            mul_latency: 2,
            div_latency: 3,
        }
    }
}

/// A named tensor crossing the program boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortBinding {
    pub name: String,
    pub shape: Vec<usize>,
    /// Value names (or literal text) in row-major order
    pub registers: Vec<String>,
}

/// A complete compiled program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrProgram {
    pub config: HlsConfig,
    /// IR text, one line per operation, in emission order
    pub lines: Vec<String>,
    pub inputs: Vec<PortBinding>,
    pub outputs: Vec<PortBinding>,
    pub latencies: Vec<LatencyEntry>,
    /// Distinct FMAC pair counts the hardware generator must instantiate
    pub fmac_variants: Vec<usize>,
    pub op_count: usize,
    pub constant_count: usize,
    /// Longest latency-weighted path to any output, in cycles
    pub critical_path: u32,
    pub summary: String,
}

impl IrProgram {
    /// Snapshot everything a finished compilation emitted
    pub fn from_state(state: &CompilerState) -> Self {
        let ops = state.operations();
        let constant_count = ops.iter().filter(|op| op.opcode == OpType::Cst).count();
        Self {
            config: state.config().clone(),
            lines: state.lines().to_vec(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            latencies: state.latencies().entries(),
            fmac_variants: state.latencies().fmac_variants().collect(),
            op_count: ops.len() - constant_count,
            constant_count,
            critical_path: 0,
            summary: String::new(),
        }
    }

    pub fn add_input(&mut self, port: PortBinding) {
        self.inputs.push(port);
    }

    pub fn add_output(&mut self, port: PortBinding, critical_path: u32) {
        self.critical_path = self.critical_path.max(critical_path);
        self.outputs.push(port);
    }

    pub fn generate_summary(&mut self) {
        let fmacs = if self.fmac_variants.is_empty() {
            "none".to_string()
        } else {
            self.fmac_variants
                .iter()
                .map(|n| format!("fmac.{}", n))
                .collect::<Vec<_>>()
                .join(", ")
        };

        self.summary = format!(
            "IR Program Summary:\n\
             ===================\n\
             Element type: {}\n\
             Operations: {} (+{} constants)\n\
             FMAC variants: {}\n\
             Critical path: {} cycles\n\
             Inputs: {}\n\
             Outputs: {}\n",
            self.config.dtype,
            self.op_count,
            self.constant_count,
            fmacs,
            self.critical_path,
            self.inputs.len(),
            self.outputs.len()
        );
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Latency table alone, for the scheduler
    pub fn latencies_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.latencies)
    }

    /// The raw IR stream
    pub fn to_ir_text(&self) -> String {
        let mut text = self.lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }
}

impl std::fmt::Display for IrProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "IR Program")?;
        writeln!(f, "==========")?;
        writeln!(f, "Element type: {}", self.config.dtype)?;
        writeln!(f, "Operations: {} (+{} constants)", self.op_count, self.constant_count)?;
        writeln!(f, "Critical path: {} cycles", self.critical_path)?;
        writeln!(f)?;

        for port in &self.inputs {
            writeln!(f, "input {} {:?}", port.name, port.shape)?;
        }
        for port in &self.outputs {
            writeln!(f, "output {} {:?} = [{}]", port.name, port.shape, port.registers.join(", "))?;
        }
        writeln!(f)?;

        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config = HlsConfig::from_json_str(r#"{ "add_latency": 5, "dtype": "f16" }"#).unwrap();
        assert_eq!(config.add_latency, 5);
        assert_eq!(config.dtype, "f16");
        assert_eq!(config.mul_latency, 2);
        assert_eq!(config.fmac_pairs, 4);
    }

    #[test]
    fn test_config_rejects_zero_fanin() {
        let err = HlsConfig::from_json_str(r#"{ "fmac_pairs": 0 }"#).unwrap_err();
        assert!(matches!(err, CompileError::ConfigError { .. }));
        assert!(HlsConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_program_snapshot() {
        let mut state = CompilerState::new(HlsConfig::new(2, 3, 2));
        let x = state.input("x", &[0]).unwrap();
        let y = state.add(&x, 1.0).unwrap();

        let mut program = IrProgram::from_state(&state);
        program.add_output(
            PortBinding {
                name: "y".into(),
                shape: vec![1, 1],
                registers: vec![y.to_string()],
            },
            state.critical_path(&y),
        );
        program.generate_summary();

        assert_eq!(program.op_count, 1);
        assert_eq!(program.constant_count, 1);
        assert_eq!(program.critical_path, 3);
        assert_eq!(program.to_ir_text().lines().count(), 2);
        assert!(program.summary.contains("Critical path: 3 cycles"));
        assert!(program.to_json().unwrap().contains("\"fmac_variants\""));
    }
}
