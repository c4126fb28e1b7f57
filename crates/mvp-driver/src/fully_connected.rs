//! Fully-connected (matmul) kernel.
//!
//! Computes `output = clamp((input + input_offset) · weight * multiplier
//! + output_offset)` over `[batches x output_depth]` with reduction
//! dimension `accum_depth`, entirely on the co-processor.
//!
//! Two paths, selected by the reduction depth:
//!
//! - **Small input** — one program with three nested loops (batch,
//!   output node, accumulation) computes every output element in a
//!   single submission. Taken when the accumulation fits one hardware
//!   dimension: depth <= 1024, or 2048 when even (the packed datatype
//!   splits the reduction across the two lanes).
//! - **Large input** — the reduction is factorized into `n * m` with
//!   both factors <= 1024 and walked as a two-dimensional array; one
//!   shape-invariant program template is re-pointed and resubmitted per
//!   `(batch, node)` pair, reloading the bias register each time.
//!
//! The quantization scheme requires a zero weight offset; calls with a
//! nonzero one are rejected before the output buffer is touched.

use crate::backend::OperandSet;
use crate::builder::ProgramContext;
use crate::error::{KernelError, Result};
use crate::math::{clamp_i8, ACCUMULATOR_MULTIPLIER, ACCUMULATOR_SCALER, FP16_MAX};
use half::f16;
use mvp_chip::limits::MAX_DIM_COUNT;
use mvp_chip::{ArrayId, Datatype, HwDim, LoadStream, Opcode, Operand, RegId, StoreStream};
use tracing::debug;

/// Parameters for one fully-connected call.
///
/// `bias` is in accumulator units (see [`bias_convert`]) and
/// `multiplier` in accumulator-output units (see [`output_multiplier`]);
/// both conversions are done once at model-load time, not per call.
#[derive(Debug)]
pub struct FullyConnectedParams<'a> {
    /// Input activations, `[batches x accum_depth]` row-major.
    pub input: &'a [i8],
    /// Zero point added to every input element.
    pub input_offset: i32,
    /// Weights, `[output_depth x accum_depth]` row-major.
    pub weights: &'a [i8],
    /// Weight zero point; must be 0.
    pub weight_offset: i32,
    /// Per-node bias in accumulator units, length `output_depth`.
    pub bias: &'a [f16],
    /// Output, `[batches x output_depth]` row-major.
    pub output: &'a mut [i8],
    /// Zero point added to every output element.
    pub output_offset: i32,
    /// Output multiplier in accumulator-output units.
    pub multiplier: f16,
    /// Number of batches.
    pub batches: usize,
    /// Reduction depth.
    pub accum_depth: usize,
    /// Number of output nodes.
    pub output_depth: usize,
    /// Activation clamp lower bound.
    pub activation_min: i32,
    /// Activation clamp upper bound.
    pub activation_max: i32,
}

/// Largest factor the two-dimensional accumulation walk accepts per
/// dimension.
const MAX_FACTOR: u32 = MAX_DIM_COUNT;

/// Small primes used by the greedy trial-division factorization.
const SMALL_PRIMES: [u32; 11] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31];

/// Which path a parameter set selects, plus the derived layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    /// Single-program path; field is the paired-lane flag.
    Small { paired: bool },
    /// Factorized path: `(n, m)` walk, paired-lane flag.
    Large { n: u32, m: u32, paired: bool },
}

/// Convert int32 bias values into accumulator units.
///
/// Each value is scaled by the fixed accumulator scaler and written as
/// half precision. Values whose scaled magnitude exceeds the
/// half-precision range are clamped (so `dst` always holds finite
/// values) and reported.
///
/// # Errors
///
/// `InvalidParameter` when `dst` is shorter than `bias`, or any scaled
/// value fell outside the representable range.
pub fn bias_convert(bias: &[i32], dst: &mut [f16]) -> Result<()> {
    if dst.len() < bias.len() {
        return Err(KernelError::invalid_parameter(format!(
            "bias destination holds {} of {} values",
            dst.len(),
            bias.len()
        )));
    }
    let mut out_of_range = false;
    for (b, d) in bias.iter().zip(dst.iter_mut()) {
        let scaled = f64::from(*b) * f64::from(ACCUMULATOR_SCALER);
        if scaled.abs() > f64::from(FP16_MAX) {
            out_of_range = true;
        }
        *d = f16::from_f64(scaled.clamp(-f64::from(FP16_MAX), f64::from(FP16_MAX)));
    }
    if out_of_range {
        return Err(KernelError::invalid_parameter(
            "bias value outside the half-precision range".to_string(),
        ));
    }
    Ok(())
}

/// Convert a double-precision output multiplier into accumulator-output
/// units.
///
/// The value is scaled by the accumulator multiplier and clamped into
/// the half-precision range. Unlike [`bias_convert`] this clamps
/// silently; out-of-range multipliers degrade precision instead of
/// failing the call.
#[must_use]
pub fn output_multiplier(multiplier: f64) -> f16 {
    let scaled = multiplier * f64::from(ACCUMULATOR_MULTIPLIER);
    f16::from_f64(scaled.clamp(-f64::from(FP16_MAX), f64::from(FP16_MAX)))
}

/// Factor `number` into `n * m` with both factors at most `max_factor`,
/// moving the smallest usable prime from `m` to `n` until `m` fits.
///
/// Returns `None` when `number` has no such factorization over the
/// small prime set — either a residual prime factor above 31 is still
/// too large, or the collected factor `n` itself outgrew the bound.
#[must_use]
pub fn factorize(number: u32, max_factor: u32) -> Option<(u32, u32)> {
    let mut n = 1u32;
    let mut m = number;
    while m > max_factor {
        let p = SMALL_PRIMES.iter().find(|&&p| m % p == 0)?;
        m /= p;
        n *= p;
    }
    if n > max_factor || n == 0 {
        return None;
    }
    Some((n, m))
}

fn validate(params: &FullyConnectedParams<'_>) -> Result<Path> {
    if params.weight_offset != 0 {
        return Err(KernelError::invalid_parameter(format!(
            "weight offset must be 0, got {}",
            params.weight_offset
        )));
    }
    let (b, d, n) = (params.batches, params.accum_depth, params.output_depth);
    if b == 0 || d == 0 || n == 0 {
        return Err(KernelError::invalid_parameter(
            "batches, accum_depth and output_depth must be nonzero".to_string(),
        ));
    }
    if params.input.len() != b * d {
        return Err(KernelError::invalid_parameter(format!(
            "input length {} != batches*accum_depth {}",
            params.input.len(),
            b * d
        )));
    }
    if params.weights.len() != n * d {
        return Err(KernelError::invalid_parameter(format!(
            "weights length {} != output_depth*accum_depth {}",
            params.weights.len(),
            n * d
        )));
    }
    if params.bias.len() != n {
        return Err(KernelError::invalid_parameter(format!(
            "bias length {} != output_depth {}",
            params.bias.len(),
            n
        )));
    }
    if params.output.len() != b * n {
        return Err(KernelError::invalid_parameter(format!(
            "output length {} != batches*output_depth {}",
            params.output.len(),
            b * n
        )));
    }

    // Packed lanes need the accumulation rows to start on even bytes.
    let paired = d % 2 == 0
        && params.input.as_ptr() as usize % 2 == 0
        && params.weights.as_ptr() as usize % 2 == 0;
    let units = if paired { d / 2 } else { d };

    if units <= MAX_DIM_COUNT as usize {
        // Single-program path: batch and node become loop counts.
        if b > MAX_DIM_COUNT as usize || n > MAX_DIM_COUNT as usize {
            return Err(KernelError::invalid_range(format!(
                "batches {b} and output_depth {n} must be <= {MAX_DIM_COUNT} for the single-program path"
            )));
        }
        return Ok(Path::Small { paired });
    }

    let units = u32::try_from(units)
        .map_err(|_| KernelError::invalid_parameter("accum_depth overflows".to_string()))?;
    let (fac_n, fac_m) = factorize(units, MAX_FACTOR).ok_or_else(|| {
        KernelError::invalid_parameter(format!(
            "accumulation depth {units} has no factorization into two factors <= {MAX_FACTOR}"
        ))
    })?;
    Ok(Path::Large { n: fac_n, m: fac_m, paired })
}

/// Check whether the co-processor supports this call, with no side
/// effects. Every validation failure reads as "unsupported".
#[must_use]
pub fn fully_connected_s8_is_supported(params: &FullyConnectedParams<'_>) -> bool {
    validate(params).is_ok()
}

/// Run the fully-connected kernel.
///
/// # Errors
///
/// `InvalidParameter` / `InvalidRange` on malformed or unsupported
/// parameters (the output buffer is untouched), or a backend fault.
pub fn fully_connected_s8(
    params: &mut FullyConnectedParams<'_>,
    ctx: &mut ProgramContext<'_>,
) -> Result<()> {
    let path = validate(params)?;
    debug!(?path, batches = params.batches, accum_depth = params.accum_depth, "fully-connected");
    match path {
        Path::Small { paired } => small_input(params, ctx, paired)?,
        Path::Large { n, m, paired } => large_input(params, ctx, n, m, paired)?,
    }
    ctx.wait_for_completion()?;
    clamp_i8(params.output, params.activation_min, params.activation_max);
    Ok(())
}

fn int8_type(paired: bool) -> Datatype {
    if paired { Datatype::ComplexInt8 } else { Datatype::Int8 }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn small_input(
    params: &mut FullyConnectedParams<'_>,
    ctx: &mut ProgramContext<'_>,
    paired: bool,
) -> Result<()> {
    let b = params.batches as u32;
    let n = params.output_depth as u32;
    let units = (params.accum_depth / if paired { 2 } else { 1 }) as u32;
    let dtype = int8_type(paired);

    // Register allocation:
    //   Constants:
    //     c_accumulator_scaler    R0
    //     c_input_offset_scaled   R1
    //     c_output_multiplier     R3
    //     c_output_offset         R4
    //   Working:
    //     r_bias                  R2
    //     r_input                 R5
    //     r_weight                R6
    //     r_acc                   R7
    //
    // Arrays:
    //   Array0  input    [batch x accum]
    //   Array1  output   [batch x node]
    //   Array2  weights  [node x accum]
    //   Array3  bias     [node]
    ctx.begin_program();
    ctx.config_array(
        ArrayId::A0,
        Operand::Input,
        0,
        dtype,
        [(1, 0), (b, units as i32), (units, 1)],
    );
    ctx.config_array(
        ArrayId::A1,
        Operand::Output,
        0,
        Datatype::Int8,
        [(1, 0), (b, params.output_depth as i32), (n, 1)],
    );
    ctx.config_array(
        ArrayId::A2,
        Operand::Weights,
        0,
        dtype,
        [(1, 0), (n, units as i32), (units, 1)],
    );
    ctx.config_array(ArrayId::A3, Operand::Bias, 0, Datatype::Float16, [(n, 1), (1, 0), (1, 0)]);

    set_common_regs(ctx, params);

    ctx.begin_loop(b);
    {
        ctx.begin_loop(n);
        {
            ctx.compute(Opcode::Clear, Some(RegId::R7), None, None, None, [None, None], None);
            ctx.begin_loop(units);
            {
                emit_accum_pair(ctx);
            }
            ctx.end_loop(); // accumulation
            ctx.postloop_incr(ArrayId::A2, HwDim::Row);
            emit_finish(ctx, paired);
        }
        ctx.end_loop(); // nodes
        ctx.postloop_incr(ArrayId::A0, HwDim::Row);
        ctx.postloop_incr(ArrayId::A1, HwDim::Row);
    }
    ctx.end_loop(); // batches

    let mut operands = OperandSet {
        input: params.input,
        weights: params.weights,
        bias: params.bias,
        scaler: &[],
        output: &mut *params.output,
    };
    ctx.execute_program(&mut operands)
}

#[allow(clippy::cast_possible_wrap)]
fn large_input(
    params: &mut FullyConnectedParams<'_>,
    ctx: &mut ProgramContext<'_>,
    n_factor: u32,
    m_factor: u32,
    paired: bool,
) -> Result<()> {
    let units = params.accum_depth / if paired { 2 } else { 1 };
    let dtype = int8_type(paired);

    // Same register map as the single-program path, except the bias is
    // a constant reloaded per invocation (R2).
    for batch in 0..params.batches {
        for node in 0..params.output_depth {
            ctx.begin_program();
            ctx.config_array(
                ArrayId::A0,
                Operand::Input,
                batch * units,
                dtype,
                [(1, 0), (m_factor, n_factor as i32), (n_factor, 1)],
            );
            ctx.config_array(
                ArrayId::A1,
                Operand::Output,
                batch * params.output_depth + node,
                Datatype::Int8,
                [(1, 0), (1, 0), (1, 0)],
            );
            ctx.config_array(
                ArrayId::A2,
                Operand::Weights,
                node * units,
                dtype,
                [(1, 0), (m_factor, n_factor as i32), (n_factor, 1)],
            );
            set_common_regs(ctx, params);
            ctx.set_reg(RegId::R2, params.bias[node]);

            ctx.compute(Opcode::Clear, Some(RegId::R7), None, None, None, [None, None], None);
            ctx.begin_loop(m_factor);
            {
                ctx.begin_loop(n_factor);
                {
                    emit_accum_pair(ctx);
                }
                ctx.end_loop();
                ctx.postloop_incr(ArrayId::A0, HwDim::Row);
                ctx.postloop_incr(ArrayId::A2, HwDim::Row);
            }
            ctx.end_loop();
            if paired {
                ctx.compute(
                    Opcode::SumPair,
                    Some(RegId::R7),
                    None,
                    None,
                    Some(RegId::R7),
                    [None, None],
                    None,
                );
            }
            ctx.compute(
                Opcode::AddR,
                Some(RegId::R7),
                Some(RegId::R7),
                Some(RegId::R2),
                None,
                [None, None],
                None,
            );
            ctx.compute(
                Opcode::MacR,
                Some(RegId::R5),
                Some(RegId::R7),
                Some(RegId::R3),
                Some(RegId::R4),
                [None, None],
                Some(StoreStream { src: RegId::R5, array: ArrayId::A1, incr: None }),
            );

            let mut operands = OperandSet {
                input: params.input,
                weights: params.weights,
                bias: params.bias,
                scaler: &[],
                output: &mut *params.output,
            };
            ctx.execute_program(&mut operands)?;
        }
    }
    Ok(())
}

fn set_common_regs(ctx: &mut ProgramContext<'_>, params: &FullyConnectedParams<'_>) {
    #[allow(clippy::cast_precision_loss)]
    let offset_scaled = params.input_offset as f32 * ACCUMULATOR_SCALER;
    ctx.set_reg(RegId::R0, f16::from_f32(ACCUMULATOR_SCALER));
    ctx.set_reg(RegId::R1, f16::from_f32(offset_scaled));
    ctx.set_reg(RegId::R3, params.multiplier);
    #[allow(clippy::cast_precision_loss)]
    ctx.set_reg(RegId::R4, f16::from_f32(params.output_offset as f32));
}

/// The two-instruction accumulation body:
/// `r_input = (input + input_offset) * scaler; r_acc += r_input * weight`.
fn emit_accum_pair(ctx: &mut ProgramContext<'_>) {
    ctx.compute(
        Opcode::MacR,
        Some(RegId::R5),
        Some(RegId::R5),
        Some(RegId::R0),
        Some(RegId::R1),
        [
            Some(LoadStream { dst: RegId::R5, array: ArrayId::A0, incr: Some(HwDim::Col) }),
            None,
        ],
        None,
    );
    ctx.compute(
        Opcode::MacR,
        Some(RegId::R7),
        Some(RegId::R5),
        Some(RegId::R6),
        Some(RegId::R7),
        [
            Some(LoadStream { dst: RegId::R6, array: ArrayId::A2, incr: Some(HwDim::Col) }),
            None,
        ],
        None,
    );
}

/// Close out one node in the single-program path: reduce the lane pair,
/// add the streamed bias, rescale and store.
fn emit_finish(ctx: &mut ProgramContext<'_>, paired: bool) {
    if paired {
        ctx.compute(
            Opcode::SumPair,
            Some(RegId::R7),
            None,
            None,
            Some(RegId::R7),
            [None, None],
            None,
        );
    }
    ctx.compute(
        Opcode::AddR,
        Some(RegId::R7),
        Some(RegId::R7),
        Some(RegId::R2),
        None,
        [
            Some(LoadStream { dst: RegId::R2, array: ArrayId::A3, incr: Some(HwDim::Vec) }),
            None,
        ],
        None,
    );
    ctx.compute(
        Opcode::MacR,
        Some(RegId::R5),
        Some(RegId::R7),
        Some(RegId::R3),
        Some(RegId::R4),
        [None, None],
        Some(StoreStream { src: RegId::R5, array: ArrayId::A1, incr: Some(HwDim::Col) }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareMvp;

    #[test]
    fn factorize_moves_small_primes() {
        let (n, m) = factorize(1500, 1024).unwrap();
        assert_eq!(n * m, 1500);
        assert!(n <= 1024 && m <= 1024);
    }

    #[test]
    fn factorize_leaves_small_numbers_alone() {
        assert_eq!(factorize(100, 1024), Some((1, 100)));
    }

    #[test]
    fn factorize_fails_on_large_primes() {
        // 104729 is prime and beyond the small prime set.
        assert_eq!(factorize(104_729, 1024), None);
    }

    #[test]
    fn factorize_fails_when_n_outgrows_the_bound() {
        // 2^22: dividing m below 1024 forces n to 4096.
        assert_eq!(factorize(1 << 22, 1024), None);
    }

    #[test]
    fn bias_convert_scales_into_accumulator_units() {
        let mut dst = [f16::ZERO; 2];
        bias_convert(&[256, -512], &mut dst).unwrap();
        assert_eq!(dst[0].to_f32(), 1.0);
        assert_eq!(dst[1].to_f32(), -2.0);
    }

    #[test]
    fn bias_convert_rejects_but_leaves_finite_values() {
        let mut dst = [f16::ZERO; 2];
        let err = bias_convert(&[20_000_000, 256], &mut dst).unwrap_err();
        assert!(matches!(err, KernelError::InvalidParameter { .. }));
        assert!(dst[0].is_finite());
        assert_eq!(dst[1].to_f32(), 1.0);
    }

    #[test]
    fn bias_rejects_multiplier_clamps() {
        // The asymmetry is deliberate: bias conversion reports range
        // overflow, multiplier conversion saturates silently.
        let mut dst = [f16::ZERO; 1];
        assert!(bias_convert(&[20_000_000], &mut dst).is_err());

        let clamped = output_multiplier(1000.0);
        assert_eq!(clamped.to_f32(), FP16_MAX);
    }

    #[test]
    fn output_multiplier_scales_by_accumulator_multiplier() {
        assert_eq!(output_multiplier(1.0).to_f32(), 256.0);
        assert_eq!(output_multiplier(0.5).to_f32(), 128.0);
    }

    fn run(params: &mut FullyConnectedParams<'_>) -> Result<usize> {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        fully_connected_s8(params, &mut ctx)?;
        Ok(ctx.programs_submitted())
    }

    #[test]
    fn small_input_path_computes_dot_products() {
        let input = [1i8, 2, 3, 4];
        let weights = [1i8, 1, 1, 1, 1, -1, 2, 0];
        let mut bias = [f16::ZERO; 2];
        bias_convert(&[16, -16], &mut bias).unwrap();
        let mut output = [0i8; 2];
        let mut params = FullyConnectedParams {
            input: &input,
            input_offset: 0,
            weights: &weights,
            weight_offset: 0,
            bias: &bias,
            output: &mut output,
            output_offset: 3,
            multiplier: output_multiplier(1.0),
            batches: 1,
            accum_depth: 4,
            output_depth: 2,
            activation_min: -128,
            activation_max: 127,
        };
        let programs = run(&mut params).unwrap();
        assert_eq!(programs, 1);
        // node0: 1+2+3+4 + 16 + 3 = 29; node1: 1-2+6+0 - 16 + 3 = -8
        assert_eq!(output, [29, -8]);
    }

    #[test]
    fn input_offset_is_applied() {
        let input = [0i8, 1];
        let weights = [2i8, 2];
        let bias = [f16::ZERO; 1];
        let mut output = [0i8; 1];
        let mut params = FullyConnectedParams {
            input: &input,
            input_offset: 3,
            weights: &weights,
            weight_offset: 0,
            bias: &bias,
            output: &mut output,
            output_offset: 0,
            multiplier: output_multiplier(1.0),
            batches: 1,
            accum_depth: 2,
            output_depth: 1,
            activation_min: -128,
            activation_max: 127,
        };
        run(&mut params).unwrap();
        // (0+3)*2 + (1+3)*2 = 14
        assert_eq!(output[0], 14);
    }

    #[test]
    fn large_input_path_submits_per_output_element() {
        // accum_depth 3000 exceeds the even-input threshold of 2048;
        // the paired reduction factorizes 1500 into two in-range
        // factors and one program runs per (batch, node).
        let mut input = vec![0i8; 3000];
        for d in [0usize, 500, 999, 2222] {
            input[d] = 1;
        }
        let weights = vec![1i8; 2 * 3000];
        let mut bias = [f16::ZERO; 2];
        bias_convert(&[0, 256 * 100], &mut bias).unwrap();
        let mut output = [0i8; 2];
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
            accum_depth: 3000,
            output_depth: 2,
            activation_min: -128,
            activation_max: 127,
        };
        let programs = run(&mut params).unwrap();
        assert_eq!(programs, 2);
        // node0: 4 ones; node1: 4 + 100 saturates the int8 store.
        assert_eq!(output, [4, 127]);
    }

    #[test]
    fn batches_walk_their_own_rows() {
        let input = [1i8, 0, 0, 2];
        let weights = [5i8, 7];
        let bias = [f16::ZERO; 1];
        let mut output = [0i8; 2];
        let mut params = FullyConnectedParams {
            input: &input,
            input_offset: 0,
            weights: &weights,
            weight_offset: 0,
            bias: &bias,
            output: &mut output,
            output_offset: 0,
            multiplier: output_multiplier(1.0),
            batches: 2,
            accum_depth: 2,
            output_depth: 1,
            activation_min: -128,
            activation_max: 127,
        };
        run(&mut params).unwrap();
        assert_eq!(output, [5, 14]);
    }

    #[test]
    fn activation_range_clamps_the_output() {
        let input = [10i8, 10];
        let weights = [1i8, 1];
        let bias = [f16::ZERO; 1];
        let mut output = [0i8; 1];
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
            accum_depth: 2,
            output_depth: 1,
            activation_min: -6,
            activation_max: 6,
        };
        run(&mut params).unwrap();
        assert_eq!(output[0], 6);
    }

    #[test]
    fn nonzero_weight_offset_is_rejected_without_touching_output() {
        let input = [1i8, 2];
        let weights = [3i8, 4];
        let bias = [f16::ZERO; 1];
        let mut output = [99i8; 1];
        let mut params = FullyConnectedParams {
            input: &input,
            input_offset: 0,
            weights: &weights,
            weight_offset: 1,
            bias: &bias,
            output: &mut output,
            output_offset: 0,
            multiplier: output_multiplier(1.0),
            batches: 1,
            accum_depth: 2,
            output_depth: 1,
            activation_min: -128,
            activation_max: 127,
        };
        let err = run(&mut params).unwrap_err();
        assert!(matches!(err, KernelError::InvalidParameter { .. }));
        assert_eq!(output, [99]);
    }

    #[test]
    fn is_supported_flattens_failures() {
        let input = [1i8, 2];
        let weights = [3i8, 4];
        let bias = [f16::ZERO; 1];
        let mut output = [0i8; 1];
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
            accum_depth: 2,
            output_depth: 1,
            activation_min: -128,
            activation_max: 127,
        };
        assert!(fully_connected_s8_is_supported(&params));
        params.weight_offset = 5;
        assert!(!fully_connected_s8_is_supported(&params));
    }
}
