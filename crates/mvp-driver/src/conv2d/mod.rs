//! Depthwise 2D convolution kernel.
//!
//! Two generators cover the parameter space:
//!
//! - [`optimized`] — depth multiplier 1, no dilation. One program per
//!   output pixel with the channel walk mapped straight onto a hardware
//!   dimension; efficient when the pixel count is small relative to the
//!   filter volume.
//! - [`general`] — arbitrary stride, dilation, padding and depth
//!   multiplier. Decomposes the output plane into boundary sub-regions
//!   and folds each region's loop nest into the three-dimensional
//!   descriptor model with the dimension algebra; one program per
//!   batch / channel / row-group slice of a region.
//!
//! The entry point probes the optimized generator, prefers it only for
//! small inputs, and falls back between the two; a failure of the
//! committed path after the other was structurally eligible retries the
//! other, since correctness outranks the performance heuristic.

pub mod general;
pub mod optimized;

use crate::builder::ProgramContext;
use crate::error::{KernelError, Result};
use crate::math::clamp_i8;
use half::f16;
use tracing::{debug, error};

/// Parameters for one depthwise convolution call.
///
/// Tensors are NHWC row-major. The filter is `[filter_height x
/// filter_width x out_channels]`; `bias` is in accumulator units and
/// `output_scaler` in accumulator-output units, both of length
/// `out_channels` (see the fully-connected conversion helpers).
#[derive(Debug)]
pub struct Conv2dParams<'a> {
    /// Input activations, `[batches x input_height x input_width x in_channels]`.
    pub input: &'a [i8],
    /// Zero point added to every input element.
    pub input_offset: i32,
    /// Filter weights, `[filter_height x filter_width x out_channels]`.
    pub filter: &'a [i8],
    /// Per-channel bias in accumulator units.
    pub bias: &'a [f16],
    /// Per-channel output scaler in accumulator-output units.
    pub output_scaler: &'a [f16],
    /// Output, `[batches x output_height x output_width x out_channels]`.
    pub output: &'a mut [i8],
    /// Zero point added to every output element.
    pub output_offset: i32,
    /// Number of batches.
    pub batches: usize,
    /// Input height.
    pub input_height: usize,
    /// Input width.
    pub input_width: usize,
    /// Input channel count.
    pub in_channels: usize,
    /// Output height.
    pub output_height: usize,
    /// Output width.
    pub output_width: usize,
    /// Output channel count; must be a multiple of `in_channels`.
    pub out_channels: usize,
    /// Filter height.
    pub filter_height: usize,
    /// Filter width.
    pub filter_width: usize,
    /// Vertical stride.
    pub stride_height: usize,
    /// Horizontal stride.
    pub stride_width: usize,
    /// Vertical dilation.
    pub dilation_height: usize,
    /// Horizontal dilation.
    pub dilation_width: usize,
    /// Whether the call uses padding; when false both pad amounts must
    /// be zero.
    pub padding: bool,
    /// Top padding.
    pub pad_height: usize,
    /// Left padding.
    pub pad_width: usize,
    /// Activation clamp lower bound.
    pub activation_min: i32,
    /// Activation clamp upper bound.
    pub activation_max: i32,
}

impl Conv2dParams<'_> {
    /// Output channels per input channel.
    #[must_use]
    pub fn depth_multiplier(&self) -> usize {
        self.out_channels / self.in_channels.max(1)
    }
}

/// Shared parameter validation; every generator builds on this.
pub(crate) fn validate_common(params: &Conv2dParams<'_>) -> Result<()> {
    let p = params;
    if p.batches == 0
        || p.in_channels == 0
        || p.out_channels == 0
        || p.input_height == 0
        || p.input_width == 0
        || p.output_height == 0
        || p.output_width == 0
        || p.filter_height == 0
        || p.filter_width == 0
    {
        return Err(KernelError::invalid_parameter("zero-sized dimension".to_string()));
    }
    if p.stride_height == 0 || p.stride_width == 0 || p.dilation_height == 0 || p.dilation_width == 0
    {
        return Err(KernelError::invalid_parameter(
            "stride and dilation must be nonzero".to_string(),
        ));
    }
    if p.out_channels % p.in_channels != 0 {
        return Err(KernelError::invalid_parameter(format!(
            "out_channels {} is not a multiple of in_channels {}",
            p.out_channels, p.in_channels
        )));
    }
    if !p.padding && (p.pad_height != 0 || p.pad_width != 0) {
        return Err(KernelError::invalid_parameter(
            "padding amounts given without the padding flag".to_string(),
        ));
    }
    let in_len = p.batches * p.input_height * p.input_width * p.in_channels;
    if p.input.len() != in_len {
        return Err(KernelError::invalid_parameter(format!(
            "input length {} != {in_len}",
            p.input.len()
        )));
    }
    let filter_len = p.filter_height * p.filter_width * p.out_channels;
    if p.filter.len() != filter_len {
        return Err(KernelError::invalid_parameter(format!(
            "filter length {} != {filter_len}",
            p.filter.len()
        )));
    }
    let out_len = p.batches * p.output_height * p.output_width * p.out_channels;
    if p.output.len() != out_len {
        return Err(KernelError::invalid_parameter(format!(
            "output length {} != {out_len}",
            p.output.len()
        )));
    }
    if p.bias.len() != p.out_channels || p.output_scaler.len() != p.out_channels {
        return Err(KernelError::invalid_parameter(format!(
            "bias/scaler length must equal out_channels {}",
            p.out_channels
        )));
    }
    Ok(())
}

/// One run of output positions sharing a filter truncation along one
/// spatial axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeRegion {
    /// First output position of the run.
    pub out_min: usize,
    /// Number of output positions.
    pub out_count: usize,
    /// First filter tap inside the input.
    pub f_start: usize,
    /// Number of filter taps inside the input.
    pub f_count: usize,
}

/// Split one spatial axis of the output into runs sharing a filter
/// truncation.
///
/// A leading-boundary position (input origin negative) forms its own
/// run; positions where the full filter fits share one run up to the
/// last such position; trailing-boundary positions again form single
/// runs. This keeps the per-region program shape-invariant without
/// per-pixel programs for the interior.
pub(crate) fn edge_regions(
    out_size: usize,
    in_size: usize,
    filter: usize,
    stride: usize,
    dilation: usize,
    pad: usize,
) -> Result<Vec<EdgeRegion>> {
    let effective_filter = (filter - 1) * dilation + 1;
    let in_size_i = i64::try_from(in_size).unwrap_or(i64::MAX);
    // Last output position whose full filter window fits.
    let center_max = (in_size_i - i64::try_from(effective_filter).unwrap_or(i64::MAX)
        + i64::try_from(pad).unwrap_or(0))
        .div_euclid(i64::try_from(stride).unwrap_or(1));

    let mut regions = Vec::new();
    let mut out_min = 0usize;
    while out_min < out_size {
        let origin = i64::try_from(out_min * stride).unwrap_or(i64::MAX)
            - i64::try_from(pad).unwrap_or(0);
        let f_start = if origin < 0 {
            usize::try_from((-origin + i64::try_from(dilation).unwrap_or(1) - 1)
                .div_euclid(i64::try_from(dilation).unwrap_or(1)))
            .unwrap_or(usize::MAX)
        } else {
            0
        };
        // Number of taps with origin + f*dilation < in_size.
        let f_end = if origin >= in_size_i {
            0
        } else {
            let span = in_size_i - origin;
            let taps = (span + i64::try_from(dilation).unwrap_or(1) - 1)
                .div_euclid(i64::try_from(dilation).unwrap_or(1));
            usize::try_from(taps).unwrap_or(usize::MAX).min(filter)
        };
        if f_end <= f_start {
            return Err(KernelError::invalid_range(format!(
                "output position {out_min} sees no input (padding too large)"
            )));
        }
        let out_max = if origin < 0 {
            out_min // Case 1: each position has its own truncation start.
        } else if in_size_i - origin >= i64::try_from(effective_filter).unwrap_or(i64::MAX) {
            // Case 2a: full window fits for a run of positions.
            usize::try_from(center_max).unwrap_or(out_min).max(out_min).min(out_size - 1)
        } else {
            out_min // Case 2b: each position has its own truncation end.
        };
        regions.push(EdgeRegion {
            out_min,
            out_count: out_max - out_min + 1,
            f_start,
            f_count: f_end - f_start,
        });
        out_min = out_max + 1;
    }
    Ok(regions)
}

/// Check whether the co-processor supports this call, with no side
/// effects. Every generator failure reads as "unsupported".
#[must_use]
pub fn depthwise_conv2d_s8_is_supported(params: &Conv2dParams<'_>) -> bool {
    if validate_common(params).is_err() {
        return false;
    }
    optimized::plan(params).is_ok() || general::plan(params).is_ok()
}

/// Run the depthwise convolution.
///
/// # Errors
///
/// `InvalidParameter` on malformed parameters; `Unsupported` when every
/// eligible generator failed (also logged at error level and asserted
/// in debug builds, since the caller is expected to have probed
/// support); backend faults pass through.
pub fn depthwise_conv2d_s8(
    params: &mut Conv2dParams<'_>,
    ctx: &mut ProgramContext<'_>,
) -> Result<()> {
    validate_common(params)?;

    // Probe the optimized generator; prefer it only when the input is
    // small relative to the filter volume, since it issues one program
    // per output pixel.
    let opt_plan = optimized::plan(params).ok();
    let small_input = params.input_width * params.input_height
        <= 4 * params.filter_width * params.filter_height * params.out_channels;
    let opt_preferred = opt_plan.is_some() && small_input;
    debug!(opt_eligible = opt_plan.is_some(), opt_preferred, "depthwise conv2d");

    let mut ret: Result<()> = Err(KernelError::Unsupported { kernel: "depthwise_conv2d" });
    if opt_preferred {
        if let Some(plan) = &opt_plan {
            ret = optimized::execute(plan, params, ctx);
        }
        if ret.is_err() {
            ret = general::plan(params).and_then(|plan| general::execute(&plan, params, ctx));
        }
    } else {
        ret = general::plan(params).and_then(|plan| general::execute(&plan, params, ctx));
        if ret.is_err() {
            // The heuristic rejected the optimized path but it is
            // structurally valid; correctness first.
            if let Some(plan) = &opt_plan {
                ret = optimized::execute(plan, params, ctx);
            }
        }
    }

    if let Err(err) = ret {
        error!("depthwise conv2d: all generators exhausted: {err}");
        debug_assert!(false, "depthwise conv2d generators exhausted: {err}");
        return Err(KernelError::Unsupported { kernel: "depthwise_conv2d" });
    }

    ctx.wait_for_completion()?;
    clamp_i8(params.output, params.activation_min, params.activation_max);
    Ok(())
}

/// Run a specific generator, bypassing selection. For testing only.
///
/// # Errors
///
/// Propagates the chosen generator's planning or execution error.
pub fn depthwise_conv2d_s8_test(
    params: &mut Conv2dParams<'_>,
    ctx: &mut ProgramContext<'_>,
    force_optimized: bool,
) -> Result<()> {
    validate_common(params)?;
    if force_optimized {
        let plan = optimized::plan(params)?;
        optimized::execute(&plan, params, ctx)?;
    } else {
        let plan = general::plan(params)?;
        general::execute(&plan, params, ctx)?;
    }
    ctx.wait_for_completion()?;
    clamp_i8(params.output, params.activation_min, params.activation_max);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_positions_share_one_region() {
        // 1-D view: input 4, filter 3, stride 1, pad 1 -> output 4.
        let regions = edge_regions(4, 4, 3, 1, 1, 1).unwrap();
        assert_eq!(
            regions,
            vec![
                EdgeRegion { out_min: 0, out_count: 1, f_start: 1, f_count: 2 },
                EdgeRegion { out_min: 1, out_count: 2, f_start: 0, f_count: 3 },
                EdgeRegion { out_min: 3, out_count: 1, f_start: 0, f_count: 2 },
            ]
        );
    }

    #[test]
    fn no_padding_is_a_single_region() {
        // Input 6, filter 3, stride 1, no padding -> output 4, full
        // filter everywhere.
        let regions = edge_regions(4, 6, 3, 1, 1, 0).unwrap();
        assert_eq!(
            regions,
            vec![EdgeRegion { out_min: 0, out_count: 4, f_start: 0, f_count: 3 }]
        );
    }

    #[test]
    fn dilation_truncates_in_tap_units() {
        // Input 6, filter 3, dilation 2 (effective 5), stride 1, pad 2.
        let regions = edge_regions(6, 6, 3, 1, 2, 2).unwrap();
        // out 0: origin -2, taps start at 1; out 1: origin -1, start 1
        // (ceil(1/2)); outs with full window: origins 0..=1; trailing.
        assert_eq!(regions[0], EdgeRegion { out_min: 0, out_count: 1, f_start: 1, f_count: 2 });
        assert_eq!(regions[1], EdgeRegion { out_min: 1, out_count: 1, f_start: 1, f_count: 2 });
        assert_eq!(regions[2], EdgeRegion { out_min: 2, out_count: 2, f_start: 0, f_count: 3 });
        assert_eq!(regions[3], EdgeRegion { out_min: 4, out_count: 1, f_start: 0, f_count: 2 });
        assert_eq!(regions[4], EdgeRegion { out_min: 5, out_count: 1, f_start: 0, f_count: 2 });
    }

    #[test]
    fn oversized_padding_is_rejected() {
        assert!(edge_regions(8, 2, 3, 1, 1, 6).is_err());
    }
}
