//! Build a dot product straight on the IR engine, without the kernel language.
//!
//! Each of the `LANES` PEs fuses a slice of the products into one FMAC; the
//! per-lane partial sums are then combined with a balanced reduction.
//!
//! Run with `cargo run --example dot_product`.

use bragg_hls::{recursive_sum, CompileResult, CompilerState, FmacBuilder, HlsConfig, Operand};

const LEN: usize = 11;
const LANES: usize = 3;

fn main() -> CompileResult<()> {
    let mut state = CompilerState::new(HlsConfig::default());

    let xs = (0..LEN)
        .map(|i| state.input(format!("x[{}]", i), &[i % LANES]))
        .collect::<CompileResult<Vec<_>>>()?;
    let ws = (0..LEN)
        .map(|i| state.input(format!("w[{}]", i), &[i % LANES]))
        .collect::<CompileResult<Vec<_>>>()?;

    let mut partials = Vec::with_capacity(LANES);
    for lane in 0..LANES {
        let mut unit = FmacBuilder::new(&[lane])?;
        let mut acc: Operand = 0.0.into();
        for i in (lane..LEN).step_by(LANES) {
            let p = unit.mul(&mut state, &ws[i], &xs[i])?;
            acc = unit.add(&mut state, acc, p).into();
        }
        partials.push(Operand::from(unit.result(&mut state, true)?));
    }

    let total = recursive_sum(&mut state, &partials)?;

    for line in state.lines() {
        println!("{}", line);
    }
    println!();
    if let Operand::Value(v) = &total {
        println!("result {} after {} cycles", v, state.critical_path(v));
    }
    for entry in state.latencies().entries() {
        println!("{:>16} {}", entry.opr, entry.latency);
    }
    Ok(())
}
