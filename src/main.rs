//! Bragg HLS compiler CLI
//!
//! Usage:
//!   braggc "C = A @ B" --shape A=3x4 --shape B=4x5
//!   braggc -f kernel.np --config board.json --ir
//!   braggc "s = sum([[1, 2, 3]] * 2)" --latencies

use clap::Parser as ClapParser;
use colored::Colorize;
use std::fs;
use std::io::{self, Read};
use std::process;

use bragg_hls::{compile_with_shapes, CompileError, HlsConfig, IrProgram};
use tracing::Level;

#[derive(ClapParser, Debug)]
#[command(name = "braggc")]
#[command(author = "FPGA Team")]
#[command(version = "0.1.0")]
#[command(about = "Lowers NumPy-style kernels to PE-placed HLS IR")]
struct Args {
    /// Kernel to compile (e.g., "C = relu(A @ B)")
    #[arg(value_name = "EXPR")]
    expression: Option<String>,

    /// Read kernel from file
    #[arg(short = 'f', long = "file")]
    input_file: Option<String>,

    /// Define input matrix shapes (e.g., "A=3x4")
    #[arg(short = 's', long = "shape", value_parser = parse_shape)]
    shapes: Vec<(String, (usize, usize))>,

    /// Load the PE array configuration from a JSON file
    #[arg(short = 'c', long = "config")]
    config_file: Option<String>,

    /// Maximum multiply pairs per fused unit
    #[arg(short = 'n', long = "fmac-pairs")]
    fmac_pairs: Option<usize>,

    /// Element type written into IR signatures
    #[arg(long = "dtype")]
    dtype: Option<String>,

    /// Adder latency in cycles
    #[arg(long = "add-latency")]
    add_latency: Option<u32>,

    /// Multiplier latency in cycles
    #[arg(long = "mul-latency")]
    mul_latency: Option<u32>,

    /// Output the whole program as JSON
    #[arg(short = 'j', long = "json")]
    json_output: bool,

    /// Output the latency table as JSON
    #[arg(long = "latencies")]
    latencies_output: bool,

    /// Output only the raw IR lines
    #[arg(long = "ir")]
    ir_output: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn parse_shape(s: &str) -> Result<(String, (usize, usize)), String> {
    let parts: Vec<&str> = s.split('=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid shape format: {}", s));
    }

    let name = parts[0].to_string();
    let dims: Vec<&str> = parts[1].split('x').collect();
    if dims.len() != 2 {
        return Err(format!("Invalid dimensions: {}", parts[1]));
    }

    let rows = dims[0]
        .parse::<usize>()
        .map_err(|_| format!("Invalid row count: {}", dims[0]))?;
    let cols = dims[1]
        .parse::<usize>()
        .map_err(|_| format!("Invalid col count: {}", dims[1]))?;

    Ok((name, (rows, cols)))
}

fn fail(what: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", what.red(), err);
    process::exit(1);
}

fn load_config(args: &Args) -> Result<HlsConfig, CompileError> {
    let mut config = match &args.config_file {
        Some(path) => HlsConfig::from_file(path)?,
        None => HlsConfig::default(),
    };
    if let Some(n) = args.fmac_pairs {
        config.fmac_pairs = n;
    }
    if let Some(dtype) = &args.dtype {
        config.dtype = dtype.clone();
    }
    if let Some(cycles) = args.add_latency {
        config.add_latency = cycles;
    }
    if let Some(cycles) = args.mul_latency {
        config.mul_latency = cycles;
    }
    config.validate()?;
    Ok(config)
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    // Get kernel from argument, file, or stdin
    let source = if let Some(expr) = &args.expression {
        expr.clone()
    } else if let Some(file) = &args.input_file {
        fs::read_to_string(file)
            .unwrap_or_else(|e| fail("Error", format!("Failed to read file '{}': {}", file, e)))
    } else {
        let mut buffer = String::new();
        if let Err(e) = io::stdin().read_to_string(&mut buffer) {
            fail("Error", format!("Failed to read stdin: {}", e));
        }
        buffer
    };

    let config = load_config(&args).unwrap_or_else(|e| fail("Configuration error", e));

    if args.verbose {
        println!("{}", "Bragg HLS Compiler".bold().blue());
        println!("{}", "=".repeat(35));
        println!();
        println!("{}: {}", "Input".green(), source.trim());
        println!(
            "{}: fmac.{} max, {} (add {} / mul {} / div {} cycles)",
            "Target".green(),
            config.fmac_pairs,
            config.dtype,
            config.add_latency,
            config.mul_latency,
            config.div_latency
        );
        println!();
    }

    let shapes: Vec<(&str, (usize, usize))> = args
        .shapes
        .iter()
        .map(|(name, shape)| (name.as_str(), *shape))
        .collect();

    let result = compile_with_shapes(&source, &shapes, &config)
        .unwrap_or_else(|e| fail("Compilation error", e));

    if args.json_output {
        match result.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error", format!("Failed to serialize to JSON: {}", e)),
        }
    } else if args.latencies_output {
        match result.latencies_json() {
            Ok(json) => println!("{}", json),
            Err(e) => fail("Error", format!("Failed to serialize latencies: {}", e)),
        }
    } else if args.ir_output {
        print!("{}", result.to_ir_text());
    } else {
        print_program(&result, args.verbose);
    }
}

fn print_program(program: &IrProgram, verbose: bool) {
    println!("{}", "Compilation Results".bold().green());
    println!("{}", "=".repeat(50));
    println!();

    println!("{}: {}", "Element type".cyan(), program.config.dtype);
    println!(
        "{}: {} (+{} constants)",
        "Operations".cyan(),
        program.op_count,
        program.constant_count
    );
    let variants: Vec<String> = program
        .fmac_variants
        .iter()
        .map(|n| format!("fmac.{}", n))
        .collect();
    println!("{}: {}", "FMAC variants".cyan(), variants.join(", "));
    println!("{}: {} cycles", "Critical path".cyan(), program.critical_path);
    println!();

    for port in &program.inputs {
        println!("{} {} {:?}", "input".yellow(), port.name.bold(), port.shape);
    }
    for port in &program.outputs {
        println!("{} {} {:?}", "output".yellow(), port.name.bold(), port.shape);
        if verbose {
            println!("  {}", port.registers.join(", "));
        }
    }
    println!();

    if verbose || program.lines.len() <= 32 {
        println!("{}", "IR".bold().yellow());
        println!("{}", "-".repeat(50));
        for line in &program.lines {
            println!("{}", line);
        }
    } else {
        println!("({} IR lines, use -v or --ir to print them)", program.lines.len());
    }
}
