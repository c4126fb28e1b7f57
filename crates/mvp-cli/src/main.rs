//! `mvp` — command-line interface for the MVP kernel driver.
//!
//! ```text
//! USAGE:
//!   mvp limits             Print the co-processor resource model
//!   mvp conv2d-demo        Run a depthwise convolution on the software backend
//!   mvp fc-demo            Run a fully-connected layer on the software backend
//!   mvp verify             Cross-check the two convolution generators
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use half::f16;
use mvp_driver::backends::SoftwareMvp;
use mvp_driver::{
    bias_convert, depthwise_conv2d_s8_test, fully_connected_s8, output_multiplier, Conv2dParams,
    FullyConnectedParams, ProgramContext,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mvp", about = "MVP co-processor kernel driver CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the co-processor resource model.
    Limits,
    /// Run a small depthwise convolution through the software backend.
    Conv2dDemo,
    /// Run a small fully-connected layer through the software backend.
    FcDemo,
    /// Run both convolution generators over a shape grid and compare.
    Verify,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Cmd::Limits => cmd_limits(),
        Cmd::Conv2dDemo => cmd_conv2d_demo(),
        Cmd::FcDemo => cmd_fc_demo(),
        Cmd::Verify => cmd_verify(),
    }
}

fn cmd_limits() -> Result<()> {
    use mvp_chip::limits as l;
    println!("MVP co-processor resource model");
    println!("===============================");
    println!("  registers            {}", l::NUM_REGS);
    println!("  array descriptors    {}", l::NUM_ARRAYS);
    println!("  dims per array       {}", l::NUM_ARRAY_DIMS);
    println!("  loop descriptors     {}", l::NUM_LOOPS);
    println!("  instructions         {}", l::NUM_INSTRUCTIONS);
    println!("  max dimension count  {}", l::MAX_DIM_COUNT);
    println!("  dimension stride     {}..={}", l::MIN_DIM_STRIDE, l::MAX_DIM_STRIDE);
    println!("  loop increments      {}", l::NUM_LOOP_INCRS);
    Ok(())
}

fn fill_pattern(buf: &mut [i8], seed: u32, range: i8) {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    let span = i32::from(range) * 2 + 1;
    for v in buf.iter_mut() {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        *v = ((i32::from((state >> 16) as u16) % span) - i32::from(range)) as i8;
    }
}

/// Borrow a 2-byte aligned window of `len` bytes from `storage`.
fn aligned(storage: &mut Vec<i8>, len: usize) -> &mut [i8] {
    storage.clear();
    storage.resize(len + 1, 0);
    let off = storage.as_ptr() as usize % 2;
    &mut storage[off..off + len]
}

struct ConvShape {
    input: usize,
    channels: usize,
    filter: usize,
    stride: usize,
    dilation: usize,
    pad: usize,
}

impl ConvShape {
    fn output(&self) -> usize {
        let eff = (self.filter - 1) * self.dilation + 1;
        (self.input + 2 * self.pad - eff) / self.stride + 1
    }
}

/// Run one square conv case through the chosen generator; returns the
/// output and the number of programs submitted.
fn run_conv(shape: &ConvShape, force_optimized: bool) -> Result<(Vec<i8>, usize)> {
    let out = shape.output();
    let mut input_store = Vec::new();
    let input = aligned(&mut input_store, shape.input * shape.input * shape.channels);
    fill_pattern(input, 11, 3);
    let mut filter_store = Vec::new();
    let filter = aligned(&mut filter_store, shape.filter * shape.filter * shape.channels);
    fill_pattern(filter, 23, 2);

    let mut bias = vec![f16::ZERO; shape.channels];
    let raw: Vec<i32> = (0..shape.channels).map(|c| 16 * (c as i32 % 3 - 1)).collect();
    bias_convert(&raw, &mut bias)?;
    let scaler = vec![output_multiplier(1.0); shape.channels];

    let mut out_store = Vec::new();
    let output = aligned(&mut out_store, out * out * shape.channels);

    let mut params = Conv2dParams {
        input,
        input_offset: 1,
        filter,
        bias: &bias,
        output_scaler: &scaler,
        output,
        output_offset: 0,
        batches: 1,
        input_height: shape.input,
        input_width: shape.input,
        in_channels: shape.channels,
        output_height: out,
        output_width: out,
        out_channels: shape.channels,
        filter_height: shape.filter,
        filter_width: shape.filter,
        stride_height: shape.stride,
        stride_width: shape.stride,
        dilation_height: shape.dilation,
        dilation_width: shape.dilation,
        padding: shape.pad != 0,
        pad_height: shape.pad,
        pad_width: shape.pad,
        activation_min: -128,
        activation_max: 127,
    };

    let mut backend = SoftwareMvp::new();
    let mut ctx = ProgramContext::new_double(&mut backend);
    depthwise_conv2d_s8_test(&mut params, &mut ctx, force_optimized)?;
    Ok((params.output.to_vec(), ctx.programs_submitted()))
}

fn cmd_conv2d_demo() -> Result<()> {
    let shape = ConvShape { input: 6, channels: 4, filter: 3, stride: 1, dilation: 1, pad: 1 };
    let (output, programs) = run_conv(&shape, false)?;
    let out = shape.output();

    println!("Depthwise conv2d: {0}x{0}x{1}, 3x3 filter, stride 1, pad 1", shape.input, shape.channels);
    println!("Programs submitted: {programs}");
    println!();
    for c in 0..shape.channels {
        println!("channel {c}:");
        for y in 0..out {
            let row: Vec<String> = (0..out)
                .map(|x| format!("{:>4}", output[(y * out + x) * shape.channels + c]))
                .collect();
            println!("  {}", row.join(" "));
        }
    }
    Ok(())
}

fn cmd_fc_demo() -> Result<()> {
    const DEPTH: usize = 16;
    const NODES: usize = 4;

    let mut input = vec![0i8; DEPTH];
    fill_pattern(&mut input, 3, 4);
    let mut weights = vec![0i8; NODES * DEPTH];
    fill_pattern(&mut weights, 5, 2);
    let mut bias = vec![f16::ZERO; NODES];
    bias_convert(&[32, 0, -32, 64], &mut bias)?;
    let mut output = vec![0i8; NODES];

    let mut params = FullyConnectedParams {
        input: &input,
        input_offset: 0,
        weights: &weights,
        weight_offset: 0,
        bias: &bias,
        output: &mut output,
        output_offset: 0,
        multiplier: output_multiplier(1.0),
        batches: 1,
        accum_depth: DEPTH,
        output_depth: NODES,
        activation_min: -128,
        activation_max: 127,
    };

    let mut backend = SoftwareMvp::new();
    let mut ctx = ProgramContext::new_double(&mut backend);
    fully_connected_s8(&mut params, &mut ctx)?;

    println!("Fully-connected: {DEPTH} -> {NODES}");
    println!("Programs submitted: {}", ctx.programs_submitted());
    println!("Output: {output:?}");
    Ok(())
}

fn cmd_verify() -> Result<()> {
    // Shapes where both generators are structurally valid.
    let shapes = [
        ConvShape { input: 4, channels: 8, filter: 3, stride: 1, dilation: 1, pad: 1 },
        ConvShape { input: 6, channels: 4, filter: 3, stride: 1, dilation: 1, pad: 0 },
        ConvShape { input: 8, channels: 2, filter: 3, stride: 2, dilation: 1, pad: 1 },
        ConvShape { input: 5, channels: 3, filter: 2, stride: 1, dilation: 1, pad: 0 },
        ConvShape { input: 8, channels: 6, filter: 5, stride: 1, dilation: 1, pad: 2 },
    ];

    println!("Generator agreement check");
    println!("  {:>10}  {:>9}  {:>10}  {:>10}  {:>7}", "shape", "filter", "opt progs", "gen progs", "match");
    let mut failures = 0;
    for shape in &shapes {
        let (opt, opt_programs) = run_conv(shape, true)?;
        let (gen, gen_programs) = run_conv(shape, false)?;
        let matches = opt == gen;
        if !matches {
            failures += 1;
        }
        println!(
            "  {:>7}x{:<2}  {:>6}x{:<2}  {:>10}  {:>10}  {:>7}",
            shape.input,
            shape.channels,
            shape.filter,
            shape.filter,
            opt_programs,
            gen_programs,
            if matches { "ok" } else { "MISMATCH" }
        );
    }
    println!();
    if failures == 0 {
        println!("All {} shapes agree across generators.", shapes.len());
        Ok(())
    } else {
        anyhow::bail!("{failures} shape(s) diverged between generators")
    }
}
