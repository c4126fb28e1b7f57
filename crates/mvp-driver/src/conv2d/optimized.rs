//! Optimized depthwise convolution generator.
//!
//! Restricted to depth multiplier 1 and no dilation. Issues one program
//! per output pixel: the channel walk maps directly onto a hardware
//! dimension (no flattening), with the filter window in two nested
//! loops inside the channel loop. Per-channel bias and output scaler
//! stream from their own arrays, and the activation clamp is emitted as
//! an in-program instruction only when the requested range is narrower
//! than full int8, saving a cycle per output element otherwise.
//!
//! Best used with a double-buffered program area so the engine consumes
//! one pixel's program while the next is built; completion is awaited
//! once by the entry point after all pixels are submitted.

use super::{validate_common, Conv2dParams};
use crate::backend::OperandSet;
use crate::builder::ProgramContext;
use crate::error::{KernelError, Result};
use crate::math::ACCUMULATOR_SCALER;
use half::f16;
use mvp_chip::limits::{MAX_DIM_COUNT, MAX_DIM_STRIDE};
use mvp_chip::{ArrayId, Datatype, HwDim, LoadStream, Opcode, Operand, RegId, StoreStream};

/// Largest filter edge the per-pixel program accepts.
const MAX_FILTER_EDGE: usize = 1024;

/// Validated configuration for the per-pixel generator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OptPlan {
    paired: bool,
}

/// Check eligibility and hardware feasibility without side effects.
///
/// # Errors
///
/// `InvalidRange` when the configuration is outside this generator's
/// restrictions; the strategy selector falls back to the general
/// generator.
pub(crate) fn plan(params: &Conv2dParams<'_>) -> Result<OptPlan> {
    validate_common(params)?;
    let p = params;
    if p.dilation_width != 1 || p.dilation_height != 1 {
        return Err(KernelError::invalid_range(
            "per-pixel generator does not support dilation".to_string(),
        ));
    }
    if p.out_channels != p.in_channels {
        return Err(KernelError::invalid_range(
            "per-pixel generator requires depth multiplier 1".to_string(),
        ));
    }
    if p.filter_width > MAX_FILTER_EDGE || p.filter_height > MAX_FILTER_EDGE {
        return Err(KernelError::invalid_range(format!(
            "filter {}x{} exceeds the {MAX_FILTER_EDGE} edge limit",
            p.filter_height, p.filter_width
        )));
    }

    // Packed channel pairs when the depth is even and every int8
    // buffer starts on an even byte; otherwise scalar.
    let paired = p.in_channels % 2 == 0
        && p.input.as_ptr() as usize % 2 == 0
        && p.output.as_ptr() as usize % 2 == 0
        && p.filter.as_ptr() as usize % 2 == 0;
    let depth = p.in_channels / if paired { 2 } else { 1 };

    if depth > MAX_DIM_COUNT as usize {
        return Err(KernelError::invalid_range(format!(
            "channel depth {depth} exceeds the dimension count limit"
        )));
    }
    if p.input_width * depth > MAX_DIM_STRIDE as usize {
        return Err(KernelError::invalid_range(format!(
            "input row stride {} exceeds the stride limit",
            p.input_width * depth
        )));
    }
    if p.filter_width * depth > MAX_DIM_STRIDE as usize {
        return Err(KernelError::invalid_range(format!(
            "filter row stride {} exceeds the stride limit",
            p.filter_width * depth
        )));
    }
    Ok(OptPlan { paired })
}

/// Emit and submit one program per output pixel.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub(crate) fn execute(
    plan: &OptPlan,
    params: &mut Conv2dParams<'_>,
    ctx: &mut ProgramContext<'_>,
) -> Result<()> {
    // Consume the shape parameters up front.
    let batches = params.batches;
    let input_height = params.input_height;
    let input_width = params.input_width;
    let output_height = params.output_height;
    let output_width = params.output_width;
    let filter_height = params.filter_height;
    let filter_width = params.filter_width;
    let stride_height = params.stride_height;
    let stride_width = params.stride_width;
    let pad_height = params.pad_height;
    let pad_width = params.pad_width;
    let c = params.in_channels;

    let par = if plan.paired { 2 } else { 1 };
    let depth = c / par;
    let int8_dt = if plan.paired { Datatype::ComplexInt8 } else { Datatype::Int8 };
    let f16_dt = if plan.paired { Datatype::ComplexFloat16 } else { Datatype::Float16 };
    let narrow = params.activation_min != -128 || params.activation_max != 127;

    let in_row = input_width * c;
    let in_plane = input_height * in_row;
    let out_row = output_width * c;
    let out_plane = output_height * out_row;

    for batch in 0..batches {
        for out_y in 0..output_height {
            for out_x in 0..output_width {
                let y_origin = (out_y * stride_height) as i64 - pad_height as i64;
                let x_origin = (out_x * stride_width) as i64 - pad_width as i64;

                // Filter window clamped to the input extent.
                let fy_start = (-y_origin).max(0) as usize;
                let fy_end = (filter_height as i64).min(input_height as i64 - y_origin);
                let fx_start = (-x_origin).max(0) as usize;
                let fx_end = (filter_width as i64).min(input_width as i64 - x_origin);
                if fy_end <= fy_start as i64 || fx_end <= fx_start as i64 {
                    return Err(KernelError::invalid_range(format!(
                        "output pixel ({out_y},{out_x}) sees no input"
                    )));
                }
                let fy_cnt = (fy_end as usize - fy_start) as u32;
                let fx_cnt = (fx_end as usize - fx_start) as u32;

                let in_offset = (batch * in_plane
                    + (y_origin + fy_start as i64) as usize * in_row
                    + (x_origin + fx_start as i64) as usize * c)
                    / par;
                let out_offset = (batch * out_plane + out_y * out_row + out_x * c) / par;
                let filt_offset = (fy_start * filter_width + fx_start) * c / par;

                emit_pixel_program(
                    ctx,
                    params,
                    PixelLayout {
                        depth: depth as u32,
                        fy_cnt,
                        fx_cnt,
                        in_offset,
                        out_offset,
                        filt_offset,
                        in_row_stride: (in_row / par) as i32,
                        filt_row_stride: (filter_width * c / par) as i32,
                        col_stride: (c / par) as i32,
                        int8_dt,
                        f16_dt,
                        narrow,
                    },
                );

                let mut operands = OperandSet {
                    input: params.input,
                    weights: params.filter,
                    bias: params.bias,
                    scaler: params.output_scaler,
                    output: &mut *params.output,
                };
                ctx.execute_program(&mut operands)?;
            }
        }
    }
    Ok(())
}

/// Resolved addressing for one pixel's program.
struct PixelLayout {
    depth: u32,
    fy_cnt: u32,
    fx_cnt: u32,
    in_offset: usize,
    out_offset: usize,
    filt_offset: usize,
    in_row_stride: i32,
    filt_row_stride: i32,
    col_stride: i32,
    int8_dt: Datatype,
    f16_dt: Datatype,
    narrow: bool,
}

fn emit_pixel_program(ctx: &mut ProgramContext<'_>, params: &Conv2dParams<'_>, l: PixelLayout) {
    // Register allocation:
    //   Constants:
    //     c_accumulator_scaler    R0
    //     c_input_offset_scaled   R1
    //     c_output_offset         R2
    //     c_activation_min        R3   (narrow range only)
    //     c_activation_max        R4   (narrow range only)
    //   Working:
    //     r_acc                   R5
    //     r_input / r_result      R6
    //     r_weight / r_scaler     R7
    //
    // Arrays:
    //   Array0  input     Array3  bias
    //   Array1  output    Array4  output scaler
    //   Array2  filter
    ctx.begin_program();
    ctx.config_array(
        ArrayId::A0,
        Operand::Input,
        l.in_offset,
        l.int8_dt,
        [(l.depth, 1), (l.fy_cnt, l.in_row_stride), (l.fx_cnt, l.col_stride)],
    );
    ctx.config_array(
        ArrayId::A1,
        Operand::Output,
        l.out_offset,
        l.int8_dt,
        [(l.depth, 1), (1, 0), (1, 0)],
    );
    ctx.config_array(
        ArrayId::A2,
        Operand::Weights,
        l.filt_offset,
        l.int8_dt,
        [(l.depth, 1), (l.fy_cnt, l.filt_row_stride), (l.fx_cnt, l.col_stride)],
    );
    ctx.config_array(ArrayId::A3, Operand::Bias, 0, l.f16_dt, [(l.depth, 1), (1, 0), (1, 0)]);
    ctx.config_array(ArrayId::A4, Operand::Scaler, 0, l.f16_dt, [(l.depth, 1), (1, 0), (1, 0)]);

    #[allow(clippy::cast_precision_loss)]
    let offset_scaled = params.input_offset as f32 * ACCUMULATOR_SCALER;
    ctx.set_reg(RegId::R0, f16::from_f32(ACCUMULATOR_SCALER));
    ctx.set_reg(RegId::R1, f16::from_f32(offset_scaled));
    #[allow(clippy::cast_precision_loss)]
    ctx.set_reg(RegId::R2, f16::from_f32(params.output_offset as f32));
    if l.narrow {
        #[allow(clippy::cast_precision_loss)]
        ctx.set_reg(RegId::R3, f16::from_f32(params.activation_min as f32));
        #[allow(clippy::cast_precision_loss)]
        ctx.set_reg(RegId::R4, f16::from_f32(params.activation_max as f32));
    }

    ctx.begin_loop(l.depth);
    {
        // r_acc = bias[channel]
        ctx.compute(
            Opcode::Noop,
            None,
            None,
            None,
            None,
            [
                Some(LoadStream { dst: RegId::R5, array: ArrayId::A3, incr: Some(HwDim::Vec) }),
                None,
            ],
            None,
        );
        ctx.begin_loop(l.fy_cnt);
        {
            ctx.begin_loop(l.fx_cnt);
            {
                // r_input = (input * scaler) + offset_scaled
                ctx.compute(
                    Opcode::MacR,
                    Some(RegId::R6),
                    Some(RegId::R6),
                    Some(RegId::R0),
                    Some(RegId::R1),
                    [
                        Some(LoadStream {
                            dst: RegId::R6,
                            array: ArrayId::A0,
                            incr: Some(HwDim::Col),
                        }),
                        None,
                    ],
                    None,
                );
                // r_acc += r_input * weight
                ctx.compute(
                    Opcode::MacR,
                    Some(RegId::R5),
                    Some(RegId::R6),
                    Some(RegId::R7),
                    Some(RegId::R5),
                    [
                        Some(LoadStream {
                            dst: RegId::R7,
                            array: ArrayId::A2,
                            incr: Some(HwDim::Col),
                        }),
                        None,
                    ],
                    None,
                );
            }
            ctx.end_loop(); // filter columns
            ctx.postloop_incr(ArrayId::A0, HwDim::Row);
            ctx.postloop_incr(ArrayId::A2, HwDim::Row);
        }
        ctx.end_loop(); // filter rows
        ctx.postloop_incr(ArrayId::A0, HwDim::Vec);
        ctx.postloop_incr(ArrayId::A2, HwDim::Vec);

        // r_result = r_acc * output_scaler + output_offset
        if l.narrow {
            ctx.compute(
                Opcode::MacR,
                Some(RegId::R6),
                Some(RegId::R5),
                Some(RegId::R7),
                Some(RegId::R2),
                [
                    Some(LoadStream { dst: RegId::R7, array: ArrayId::A4, incr: Some(HwDim::Vec) }),
                    None,
                ],
                None,
            );
            ctx.compute(
                Opcode::Clip,
                Some(RegId::R6),
                Some(RegId::R3),
                Some(RegId::R4),
                Some(RegId::R6),
                [None, None],
                Some(StoreStream { src: RegId::R6, array: ArrayId::A1, incr: Some(HwDim::Vec) }),
            );
        } else {
            ctx.compute(
                Opcode::MacR,
                Some(RegId::R6),
                Some(RegId::R5),
                Some(RegId::R7),
                Some(RegId::R2),
                [
                    Some(LoadStream { dst: RegId::R7, array: ArrayId::A4, incr: Some(HwDim::Vec) }),
                    None,
                ],
                Some(StoreStream { src: RegId::R6, array: ArrayId::A1, incr: Some(HwDim::Vec) }),
            );
        }
    }
    ctx.end_loop(); // channels
}
