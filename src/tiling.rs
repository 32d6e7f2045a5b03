//! Contraction-axis tiling for fused multiply-accumulate
//!
//! A fused unit accumulates at most `fmac_pairs` products. For C = A @ B
//! where A is MxK and B is KxN, the K axis is cut into contiguous tiles of at
//! most that many elements. Every tile becomes one layer of fused units, one
//! unit per output element, and the layers are folded back together with a
//! balanced reduction.

use std::ops::Range;

use crate::error::{CompileError, CompileResult};
use crate::hardware::HlsConfig;

/// Tiling strategy for matrix products
pub struct TilingStrategy {
    fmac_pairs: usize,
}

impl TilingStrategy {
    pub fn new(config: &HlsConfig) -> Self {
        Self {
            fmac_pairs: config.fmac_pairs,
        }
    }

    /// Plan `(m x k) @ (k x n)`
    pub fn plan_matmul(&self, m: usize, k: usize, n: usize) -> CompileResult<MatMulPlan> {
        if self.fmac_pairs == 0 {
            return Err(CompileError::tiling("fused units need at least one multiply pair"));
        }
        if m == 0 || k == 0 || n == 0 {
            return Err(CompileError::tiling(format!(
                "cannot tile an empty product ({}x{}) @ ({}x{})",
                m, k, k, n
            )));
        }

        let k_tiles = (k + self.fmac_pairs - 1) / self.fmac_pairs;
        let tiles = (0..k_tiles)
            .map(|index| {
                let start = index * self.fmac_pairs;
                let end = ((index + 1) * self.fmac_pairs).min(k);
                KTile {
                    index,
                    range: start..end,
                    is_first: index == 0,
                    is_last: index == k_tiles - 1,
                }
            })
            .collect();

        Ok(MatMulPlan {
            output_shape: (m, n),
            inner: k,
            tile_size: self.fmac_pairs,
            tiles,
        })
    }
}

/// How one matrix product maps onto layers of fused units
#[derive(Debug, Clone, PartialEq)]
pub struct MatMulPlan {
    pub output_shape: (usize, usize),
    /// Length of the contraction axis
    pub inner: usize,
    pub tile_size: usize,
    pub tiles: Vec<KTile>,
}

impl MatMulPlan {
    pub fn is_single_tile(&self) -> bool {
        self.tiles.len() == 1
    }

    /// Fused units the plan instantiates
    pub fn unit_count(&self) -> usize {
        self.tiles.len() * self.output_shape.0 * self.output_shape.1
    }
}

/// One contiguous slice of the contraction axis
#[derive(Debug, Clone, PartialEq)]
pub struct KTile {
    pub index: usize,
    pub range: Range<usize>,
    /// Is this the first tile along K?
    pub is_first: bool,
    /// Is this the last tile along K?
    pub is_last: bool,
}

impl KTile {
    /// Multiply pairs each unit in this layer carries
    pub fn pairs(&self) -> usize {
        self.range.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(fmac_pairs: usize) -> TilingStrategy {
        TilingStrategy::new(&HlsConfig {
            fmac_pairs,
            ..HlsConfig::default()
        })
    }

    #[test]
    fn test_small_matmul_no_tiling() {
        let plan = strategy(4).plan_matmul(2, 3, 2).unwrap();
        assert!(plan.is_single_tile());
        assert_eq!(plan.tiles[0].range, 0..3);
        assert!(plan.tiles[0].is_first && plan.tiles[0].is_last);
        assert_eq!(plan.unit_count(), 4);
    }

    #[test]
    fn test_large_matmul_tiling() {
        let plan = strategy(4).plan_matmul(6, 10, 6).unwrap();

        let ranges: Vec<_> = plan.tiles.iter().map(|t| t.range.clone()).collect();
        assert_eq!(ranges, vec![0..4, 4..8, 8..10]);
        assert_eq!(plan.tiles[2].pairs(), 2);
        assert!(plan.tiles[0].is_first && !plan.tiles[0].is_last);
        assert!(!plan.tiles[1].is_first && !plan.tiles[1].is_last);
        assert!(plan.tiles[2].is_last);
        assert_eq!(plan.unit_count(), 3 * 36);
    }

    #[test]
    fn test_tiles_cover_inner_axis_exactly() {
        for k in 1..=33 {
            for pairs in 1..=6 {
                let plan = strategy(pairs).plan_matmul(1, k, 1).unwrap();
                let covered: Vec<usize> = plan.tiles.iter().flat_map(|t| t.range.clone()).collect();
                assert_eq!(covered, (0..k).collect::<Vec<_>>());
                assert!(plan.tiles.iter().all(|t| t.pairs() <= pairs && t.pairs() > 0));
            }
        }
    }

    #[test]
    fn test_rejects_empty_dimensions() {
        assert!(strategy(4).plan_matmul(0, 2, 2).is_err());
        assert!(strategy(4).plan_matmul(2, 0, 2).is_err());
        assert!(strategy(0).plan_matmul(2, 2, 2).is_err());
    }
}
