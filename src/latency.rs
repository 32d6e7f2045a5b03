//! Static latency model consumed by the downstream scheduler

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::hardware::HlsConfig;
use crate::op::{OpType, Operation};

/// One row of the exported latency table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyEntry {
    pub opr: String,
    pub latency: u32,
}

/// Opcode -> cycle count, plus every FMAC variant seen so far
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyTable {
    add_latency: u32,
    mul_latency: u32,
    div_latency: u32,
    fmac_variants: BTreeSet<usize>,
}

impl LatencyTable {
    pub fn new(add_latency: u32, mul_latency: u32, div_latency: u32) -> Self {
        Self {
            add_latency,
            mul_latency,
            div_latency,
            fmac_variants: BTreeSet::new(),
        }
    }

    pub fn from_config(config: &HlsConfig) -> Self {
        Self::new(config.add_latency, config.mul_latency, config.div_latency)
    }

    /// Fixed latency of an opcode; `None` for FMAC, whose latency depends on fan-in
    pub fn fixed(&self, opcode: OpType) -> Option<u32> {
        match opcode {
            OpType::Add | OpType::Sub => Some(self.add_latency),
            OpType::Mul => Some(self.mul_latency),
            OpType::Div => Some(self.div_latency),
            OpType::Gt | OpType::Neg | OpType::Relu | OpType::Copy => Some(1),
            OpType::Cst => Some(0),
            OpType::Fmac => None,
        }
    }

    /// One multiply stage followed by an add per accumulated pair.
    /// Saturates at `u32::MAX`.
    pub fn fmac_latency(&self, n_pairs: usize) -> u32 {
        let pairs = u32::try_from(n_pairs).unwrap_or(u32::MAX);
        self.mul_latency
            .saturating_add(self.add_latency.saturating_mul(pairs))
    }

    pub fn latency_of(&self, op: &Operation) -> u32 {
        match self.fixed(op.opcode) {
            Some(latency) => latency,
            None => self.fmac_latency(op.operands.len().saturating_sub(1) / 2),
        }
    }

    pub fn record_fmac(&mut self, n_pairs: usize) {
        self.fmac_variants.insert(n_pairs);
    }

    /// Distinct FMAC pair counts, ascending
    pub fn fmac_variants(&self) -> impl Iterator<Item = usize> + '_ {
        self.fmac_variants.iter().copied()
    }

    /// Every fixed opcode followed by one `fmac.<k>` row per instantiated variant
    pub fn entries(&self) -> Vec<LatencyEntry> {
        let fixed = OpType::ALL.iter().filter_map(|op| {
            self.fixed(*op).map(|latency| LatencyEntry {
                opr: op.mnemonic().to_string(),
                latency,
            })
        });
        let fused = self.fmac_variants.iter().map(|n| LatencyEntry {
            opr: format!("{}.{}", OpType::Fmac.mnemonic(), n),
            latency: self.fmac_latency(*n),
        });
        fixed.chain(fused).collect()
    }
}

impl Default for LatencyTable {
    fn default() -> Self {
        Self::from_config(&HlsConfig::default())
    }
}
