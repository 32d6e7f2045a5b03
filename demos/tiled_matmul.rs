//! Compile a matmul whose contraction axis does not fit one fused unit, then
//! check the emitted IR against a direct computation.
//!
//! Run with `cargo run --example tiled_matmul`.

use bragg_hls::{lower_with_shapes, CompileResult, HlsConfig};
use indexmap::IndexMap;

fn main() -> CompileResult<()> {
    let (m, k, n) = (2, 6, 2);
    let config = HlsConfig::new(4, 3, 2);

    let lowered = lower_with_shapes("C = A @ B", &[("A", (m, k)), ("B", (k, n))], &config)?;

    let a: Vec<f64> = (0..m * k).map(|x| x as f64).collect();
    let b: Vec<f64> = (0..k * n).map(|x| 1.0 - x as f64 * 0.25).collect();
    let mut bindings = IndexMap::new();
    bindings.insert("A".to_string(), a.clone());
    bindings.insert("B".to_string(), b.clone());
    let out = lowered.evaluate(&bindings)?;

    for i in 0..m {
        for j in 0..n {
            let expected: f64 = (0..k).map(|kk| a[i * k + kk] * b[kk * n + j]).sum();
            println!("C[{},{}] = {:>8} (expected {})", i, j, out["C"][i * n + j], expected);
        }
    }

    let program = lowered.into_program();
    println!();
    println!("{}", program.summary);
    Ok(())
}
