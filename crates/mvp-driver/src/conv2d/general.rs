//! General depthwise convolution generator.
//!
//! Handles arbitrary stride, dilation, padding and depth multiplier by
//! decomposing the output plane into boundary sub-regions (one filter
//! truncation per region, see [`edge_regions`]) and folding each
//! region's loop nest into the descriptor model with the dimension
//! algebra:
//!
//! - Output rows covered by one program are grouped so their filter
//!   windows tile the input without overlap; the row-group axis is then
//!   flattened into the filter-row axis, with the inter-group gap
//!   recorded as an extra-increment remainder and replayed at the
//!   filter-row loop's completion.
//! - Row groups whose combined walk exceeds the dimension count limit
//!   are split into host-side chunks.
//! - The batch, channel and depth-multiplier axes always run host-side:
//!   the in-program dimensions are spent on the pixel run and the
//!   filter window, and per-channel constants (bias, output scaler)
//!   live in registers.
//!
//! An even depth multiplier halves into the packed datatype: each lane
//! carries one of two adjacent per-channel outputs, so filter, bias,
//! scaler and output walk in pairs while the input stays scalar and
//! replicates into both lanes. This requires 2-byte alignment of the
//! filter and output buffers and is rejected, not silently dropped,
//! when they are misaligned.

use super::{edge_regions, validate_common, Conv2dParams};
use crate::backend::OperandSet;
use crate::builder::ProgramContext;
use crate::dims::IterationSpace;
use crate::error::{KernelError, Result};
use crate::math::ACCUMULATOR_SCALER;
use half::f16;
use mvp_chip::limits::MAX_DIM_COUNT;
use mvp_chip::{ArrayId, Datatype, LoadStream, Opcode, Operand, RegId, StoreStream};

/// Input walk axes, in hardware-dimension assignment order.
#[derive(Debug, Clone, Copy)]
enum InAxis {
    /// Batch (host).
    Batch,
    /// Input channel (host).
    Channel,
    /// Input row origin of the region slice (host).
    YBase,
    /// Input column origin of the region slice (host).
    XBase,
    /// Output column inside the region.
    Ox,
    /// Output row group inside the slice; flattened into `Fy`.
    OyGroup,
    /// Filter row.
    Fy,
    /// Filter column.
    Fx,
}
const IN_AXES: usize = 8;

impl From<InAxis> for usize {
    fn from(a: InAxis) -> usize {
        a as usize
    }
}

/// Output walk axes.
#[derive(Debug, Clone, Copy)]
enum OutAxis {
    /// Batch (host).
    Batch,
    /// Output channel (host).
    Channel,
    /// First output row of the slice (host).
    OyPos,
    /// Output column inside the region.
    Ox,
    /// Output row group inside the slice.
    OyGroup,
}
const OUT_AXES: usize = 5;

impl From<OutAxis> for usize {
    fn from(a: OutAxis) -> usize {
        a as usize
    }
}

/// Filter walk axes.
#[derive(Debug, Clone, Copy)]
enum FiltAxis {
    /// Output channel (host).
    Channel,
    /// Filter row.
    Fy,
    /// Filter column.
    Fx,
}
const FILT_AXES: usize = 3;

impl From<FiltAxis> for usize {
    fn from(a: FiltAxis) -> usize {
        a as usize
    }
}

/// One program class: a region slice whose programs differ only in
/// their batch/channel offsets.
#[derive(Debug, Clone)]
struct ClassSpec {
    in_space: IterationSpace<IN_AXES>,
    out_space: IterationSpace<OUT_AXES>,
    filt_space: IterationSpace<FILT_AXES>,
    nox: u32,
    oy_size: u32,
    fy_cnt: u32,
    fx_cnt: u32,
}

/// Validated decomposition of one call.
#[derive(Debug, Clone)]
pub(crate) struct GeneralPlan {
    paired: bool,
    classes: Vec<ClassSpec>,
}

/// Plan the call without side effects: compute every region slice and
/// validate all hardware constraints.
///
/// # Errors
///
/// `InvalidParameter` / `InvalidRange` when the call cannot be mapped;
/// the strategy selector treats this as "try another generator".
pub(crate) fn plan(params: &Conv2dParams<'_>) -> Result<GeneralPlan> {
    validate_common(params)?;
    let p = params;
    let c = p.in_channels;
    let cm = p.out_channels;
    let m = p.depth_multiplier();

    let paired = m % 2 == 0;
    if paired {
        // Packed lanes touch the filter and output in adjacent pairs.
        if p.filter.as_ptr() as usize % 2 != 0 || p.output.as_ptr() as usize % 2 != 0 {
            return Err(KernelError::invalid_parameter(
                "filter and output must be 2-byte aligned for paired depth-multiplier lanes"
                    .to_string(),
            ));
        }
    }
    let par = if paired { 2 } else { 1 };

    let x_regions = edge_regions(
        p.output_width,
        p.input_width,
        p.filter_width,
        p.stride_width,
        p.dilation_width,
        p.pad_width,
    )?;
    let y_regions = edge_regions(
        p.output_height,
        p.input_height,
        p.filter_height,
        p.stride_height,
        p.dilation_height,
        p.pad_height,
    )?;

    let mut classes = Vec::new();
    for rx in &x_regions {
        for ry in &y_regions {
            let fy_cnt = ry.f_count;
            let noy = ry.out_count;

            // Group output rows so consecutive in-program rows tile the
            // input: `incr` rows of output per group step, chosen so
            // the input advance is a whole number of filter-row strides.
            let (incr, extra) = if noy == 1 {
                (1, 0)
            } else {
                let mut incr = (fy_cnt * p.dilation_height).div_ceil(p.stride_height);
                while (incr * p.stride_height) % p.dilation_height != 0 {
                    incr += 1;
                }
                (incr, (incr * p.stride_height) / p.dilation_height - fy_cnt)
            };

            let per_group = fy_cnt + extra;
            let group_cap = MAX_DIM_COUNT as usize / per_group;
            if group_cap == 0 {
                return Err(KernelError::invalid_range(format!(
                    "filter row walk {per_group} exceeds the dimension count limit"
                )));
            }

            let n_offsets = incr.min(noy);
            for phase in 0..n_offsets {
                let total_groups = (noy - phase).div_ceil(incr);
                let mut g0 = 0usize;
                while g0 < total_groups {
                    let oy_size = (total_groups - g0).min(group_cap);
                    let oy_start = ry.out_min + phase + g0 * incr;
                    classes.push(build_class(
                        p, par, rx, ry, incr, oy_start, oy_size, c, cm,
                    )?);
                    g0 += oy_size;
                }
            }
        }
    }
    Ok(GeneralPlan { paired, classes })
}

#[allow(clippy::too_many_arguments, clippy::cast_possible_truncation)]
fn build_class(
    p: &Conv2dParams<'_>,
    par: usize,
    rx: &super::EdgeRegion,
    ry: &super::EdgeRegion,
    incr: usize,
    oy_start: usize,
    oy_size: usize,
    c: usize,
    cm: usize,
) -> Result<ClassSpec> {
    let nox = rx.out_count;
    let fy_cnt = ry.f_count;
    let fx_cnt = rx.f_count;

    // Region origins in the input are non-negative by construction:
    // the truncation start absorbs the padding overhang.
    let y_base = oy_start * p.stride_height + ry.f_start * p.dilation_height - p.pad_height;
    let x_base = rx.out_min * p.stride_width + rx.f_start * p.dilation_width - p.pad_width;

    let mut ins = IterationSpace::<IN_AXES>::new();
    ins.set(InAxis::Batch, 0, 1, p.input_height * p.input_width * c);
    ins.set(InAxis::Channel, 0, 1, 1);
    ins.set(InAxis::YBase, y_base, 1, p.input_width * c);
    ins.set(InAxis::XBase, x_base, 1, c);
    ins.set(InAxis::Ox, 0, nox as u32, p.stride_width * c);
    ins.set(
        InAxis::OyGroup,
        0,
        oy_size as u32,
        incr * p.stride_height * p.input_width * c,
    );
    ins.set(InAxis::Fy, 0, fy_cnt as u32, p.dilation_height * p.input_width * c);
    ins.set(InAxis::Fx, 0, fx_cnt as u32, p.dilation_width * c);
    if oy_size > 1 {
        ins.flatten_into(InAxis::OyGroup, InAxis::Fy)?;
    }
    ins.assign_hw_dims()?;

    let mut outs = IterationSpace::<OUT_AXES>::new();
    outs.set(OutAxis::Batch, 0, 1, p.output_height * p.output_width * cm / par);
    outs.set(OutAxis::Channel, 0, 1, 1);
    outs.set(OutAxis::OyPos, oy_start, 1, p.output_width * cm / par);
    outs.set(OutAxis::Ox, rx.out_min, nox as u32, cm / par);
    outs.set(OutAxis::OyGroup, 0, oy_size as u32, incr * p.output_width * cm / par);
    outs.assign_hw_dims()?;

    let mut filts = IterationSpace::<FILT_AXES>::new();
    filts.set(FiltAxis::Channel, 0, 1, 1);
    filts.set(FiltAxis::Fy, ry.f_start, fy_cnt as u32, p.filter_width * cm / par);
    filts.set(FiltAxis::Fx, rx.f_start, fx_cnt as u32, cm / par);
    filts.assign_hw_dims()?;

    Ok(ClassSpec {
        in_space: ins,
        out_space: outs,
        filt_space: filts,
        nox: nox as u32,
        oy_size: oy_size as u32,
        fy_cnt: fy_cnt as u32,
        fx_cnt: fx_cnt as u32,
    })
}

/// Emit and submit every program of a validated plan.
///
/// Submission order is region-major, then row phase, then batch,
/// channel and depth-multiplier group — matching the plan's class
/// order, so the program-area reuse discipline holds.
pub(crate) fn execute(
    plan: &GeneralPlan,
    params: &mut Conv2dParams<'_>,
    ctx: &mut ProgramContext<'_>,
) -> Result<()> {
    let m = params.depth_multiplier();
    let par = if plan.paired { 2 } else { 1 };
    let pair_dt = if plan.paired { Datatype::ComplexInt8 } else { Datatype::Int8 };

    for class in &plan.classes {
        let mut ins = class.in_space.clone();
        let mut outs = class.out_space.clone();
        let mut filts = class.filt_space.clone();
        for batch in 0..params.batches {
            for channel in 0..params.in_channels {
                for m0 in (0..m).step_by(par) {
                    let oc = channel * m + m0;
                    ins.set_offset(InAxis::Batch, batch);
                    ins.set_offset(InAxis::Channel, channel);
                    outs.set_offset(OutAxis::Batch, batch);
                    outs.set_offset(OutAxis::Channel, oc / par);
                    filts.set_offset(FiltAxis::Channel, oc / par);

                    emit_program(ctx, params, class, &ins, &outs, &filts, oc, plan.paired, pair_dt);

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
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn emit_program(
    ctx: &mut ProgramContext<'_>,
    params: &Conv2dParams<'_>,
    class: &ClassSpec,
    ins: &IterationSpace<IN_AXES>,
    outs: &IterationSpace<OUT_AXES>,
    filts: &IterationSpace<FILT_AXES>,
    oc: usize,
    paired: bool,
    pair_dt: Datatype,
) {
    // Register allocation:
    //   Constants:
    //     c_accumulator_scaler    R0
    //     c_input_offset_scaled   R1
    //     c_output_offset         R2
    //     c_bias                  R3
    //     c_output_scaler         R4
    //   Working:
    //     r_acc                   R5
    //     r_input / r_result      R6
    //     r_weight                R7
    //
    // Arrays:
    //   Array0  input
    //   Array1  output
    //   Array2  filter
    ctx.begin_program();
    ctx.config_array(ArrayId::A0, Operand::Input, ins.flat_offset(), Datatype::Int8, ins.dim_specs());
    ctx.config_array(ArrayId::A1, Operand::Output, outs.flat_offset(), pair_dt, outs.dim_specs());
    ctx.config_array(ArrayId::A2, Operand::Weights, filts.flat_offset(), pair_dt, filts.dim_specs());

    #[allow(clippy::cast_precision_loss)]
    let offset_scaled = params.input_offset as f32 * ACCUMULATOR_SCALER;
    ctx.set_reg(RegId::R0, f16::from_f32(ACCUMULATOR_SCALER));
    ctx.set_reg(RegId::R1, f16::from_f32(offset_scaled));
    #[allow(clippy::cast_precision_loss)]
    ctx.set_reg(RegId::R2, f16::from_f32(params.output_offset as f32));
    if paired {
        ctx.set_reg_pair(RegId::R3, params.bias[oc], params.bias[oc + 1]);
        ctx.set_reg_pair(RegId::R4, params.output_scaler[oc], params.output_scaler[oc + 1]);
    } else {
        ctx.set_reg(RegId::R3, params.bias[oc]);
        ctx.set_reg(RegId::R4, params.output_scaler[oc]);
    }

    ctx.begin_loop(class.nox);
    {
        ctx.begin_loop(class.oy_size);
        {
            // r_acc = c_bias
            ctx.compute(
                Opcode::Copy,
                Some(RegId::R5),
                None,
                None,
                Some(RegId::R3),
                [None, None],
                None,
            );
            ctx.begin_loop(class.fy_cnt);
            {
                ctx.begin_loop(class.fx_cnt);
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
                                incr: ins.stream_dim(InAxis::Fx),
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
                                incr: filts.stream_dim(FiltAxis::Fx),
                            }),
                            None,
                        ],
                        None,
                    );
                }
                ctx.end_loop(); // filter columns
                ins.advance(ctx, ArrayId::A0, InAxis::Fy);
                filts.advance(ctx, ArrayId::A2, FiltAxis::Fy);
            }
            ctx.end_loop(); // filter rows
            ins.advance(ctx, ArrayId::A0, InAxis::OyGroup);

            // r_result = r_acc * output_scaler + output_offset
            ctx.compute(
                Opcode::MacR,
                Some(RegId::R6),
                Some(RegId::R5),
                Some(RegId::R4),
                Some(RegId::R2),
                [None, None],
                Some(StoreStream {
                    src: RegId::R6,
                    array: ArrayId::A1,
                    incr: outs.stream_dim(OutAxis::OyGroup),
                }),
            );
        }
        ctx.end_loop(); // row groups
        ins.advance(ctx, ArrayId::A0, InAxis::Ox);
        outs.advance(ctx, ArrayId::A1, OutAxis::Ox);
    }
    ctx.end_loop(); // output columns
}
