//! Software (interpreter) backend.
//!
//! Executes compiled program images on the CPU with the same precision
//! model as the co-processor: half-precision lane pairs, rounding to
//! binary16 after every ALU operation, int8 saturation on store. This
//! enables:
//!
//! 1. **CI without hardware** — every kernel test runs against this
//!    backend.
//! 2. **Generator cross-checking** — two generators claiming to
//!    compute the same kernel must produce identical output here.
//!
//! The interpreter is strict where silicon is forgiving: every array
//! access is bounds-checked against the bound operand buffer, and a
//! walk that leaves the buffer fails the submission instead of reading
//! garbage.

use crate::backend::{BackendType, MvpBackend, OperandSet};
use crate::error::{KernelError, Result};
use crate::math::saturate_i8;
use half::f16;
use mvp_chip::limits;
use mvp_chip::program::DimStep;
use mvp_chip::{
    ArrayDescriptor, ArrayId, Datatype, Instruction, LoadStream, Opcode, Operand, Program, RegId,
    StoreStream,
};
use tracing::trace;

/// Software execution backend.
///
/// `execute` runs the program synchronously, so `wait_for_completion`
/// is an ordering no-op; submission order trivially equals execution
/// order.
#[derive(Debug, Default)]
pub struct SoftwareMvp {
    programs_run: usize,
}

impl SoftwareMvp {
    /// Create a software backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Programs executed so far.
    #[must_use]
    pub const fn programs_run(&self) -> usize {
        self.programs_run
    }
}

impl MvpBackend for SoftwareMvp {
    fn execute(&mut self, program: &Program, operands: &mut OperandSet<'_>) -> Result<()> {
        let mut machine = Machine::new(program);
        machine.run(program, operands)?;
        self.programs_run += 1;
        trace!(total = self.programs_run, "program executed");
        Ok(())
    }

    fn wait_for_completion(&mut self) -> Result<()> {
        Ok(())
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }
}

/// One register: two lanes, kept as f32 values that are always exactly
/// representable in binary16.
type Lanes = (f32, f32);

struct Machine {
    regs: [Lanes; limits::NUM_REGS],
    counters: [[u32; limits::NUM_ARRAY_DIMS]; limits::NUM_ARRAYS],
}

impl Machine {
    fn new(program: &Program) -> Self {
        let mut regs = [(0.0, 0.0); limits::NUM_REGS];
        for (lanes, pair) in regs.iter_mut().zip(program.regs.iter()) {
            *lanes = (
                f16::from_bits(pair.re_bits).to_f32(),
                f16::from_bits(pair.im_bits).to_f32(),
            );
        }
        Self { regs, counters: [[0; limits::NUM_ARRAY_DIMS]; limits::NUM_ARRAYS] }
    }

    fn run(&mut self, program: &Program, operands: &mut OperandSet<'_>) -> Result<()> {
        let live: Vec<usize> = (0..program.num_loops).collect();
        if program.num_instrs == 0 {
            return Ok(());
        }
        self.run_range(program, operands, 0, program.num_instrs - 1, &live)
    }

    /// Execute the instruction range `first..=last`. `candidates` holds
    /// loop indices not yet entered, in program (outer-before-inner)
    /// order.
    fn run_range(
        &mut self,
        program: &Program,
        operands: &mut OperandSet<'_>,
        first: usize,
        last: usize,
        candidates: &[usize],
    ) -> Result<()> {
        let mut pos = first;
        while pos <= last {
            let found = candidates.iter().position(|&li| {
                program.loops[li].as_ref().is_some_and(|l| l.first == pos && l.last <= last)
            });
            if let Some(k) = found {
                let li = candidates[k];
                let l = program.loops[li].as_ref().ok_or_else(|| {
                    KernelError::fault("loop descriptor slot empty".to_string())
                })?;
                let inner: Vec<usize> = candidates[k + 1..]
                    .iter()
                    .copied()
                    .filter(|&other| {
                        program.loops[other]
                            .as_ref()
                            .is_some_and(|o| o.first >= l.first && o.last <= l.last)
                    })
                    .collect();
                for _ in 0..l.count {
                    self.run_range(program, operands, l.first, l.last, &inner)?;
                }
                for step in l.incrs.iter().flatten() {
                    self.apply_incr(program, *step)?;
                }
                for step in l.resets.iter().flatten() {
                    self.counters[step.array.index()][step.dim.index()] = 0;
                }
                pos = l.last + 1;
            } else {
                self.exec_instr(program, operands, &program.instrs[pos])?;
                pos += 1;
            }
        }
        Ok(())
    }

    fn apply_incr(&mut self, program: &Program, step: DimStep) -> Result<()> {
        let desc = descriptor(program, step.array)?;
        let count = desc.dim(step.dim).count;
        let c = &mut self.counters[step.array.index()][step.dim.index()];
        *c = (*c + 1) % count;
        Ok(())
    }

    fn exec_instr(
        &mut self,
        program: &Program,
        operands: &mut OperandSet<'_>,
        instr: &Instruction,
    ) -> Result<()> {
        for load in instr.loads.iter().flatten() {
            self.exec_load(program, operands, *load)?;
        }
        self.exec_alu(instr)?;
        if let Some(store) = instr.store {
            self.exec_store(program, operands, store)?;
        }
        Ok(())
    }

    fn exec_load(
        &mut self,
        program: &Program,
        operands: &OperandSet<'_>,
        load: LoadStream,
    ) -> Result<()> {
        let desc = descriptor(program, load.array)?;
        let addr = self.address(load.array, desc)?;
        let lanes = match (desc.operand, desc.datatype) {
            (Operand::Input, dt @ (Datatype::Int8 | Datatype::ComplexInt8)) => {
                read_i8(operands.input, addr, dt, load.array)?
            }
            (Operand::Weights, dt @ (Datatype::Int8 | Datatype::ComplexInt8)) => {
                read_i8(operands.weights, addr, dt, load.array)?
            }
            (Operand::Output, dt @ (Datatype::Int8 | Datatype::ComplexInt8)) => {
                read_i8(operands.output, addr, dt, load.array)?
            }
            (Operand::Bias, dt @ (Datatype::Float16 | Datatype::ComplexFloat16)) => {
                read_f16(operands.bias, addr, dt, load.array)?
            }
            (Operand::Scaler, dt @ (Datatype::Float16 | Datatype::ComplexFloat16)) => {
                read_f16(operands.scaler, addr, dt, load.array)?
            }
            (operand, datatype) => {
                return Err(KernelError::fault(format!(
                    "array {:?}: datatype {datatype:?} incompatible with operand {operand}",
                    load.array
                )))
            }
        };
        self.regs[load.dst.index()] = lanes;
        if let Some(dim) = load.incr {
            self.apply_incr(program, DimStep { array: load.array, dim })?;
        }
        Ok(())
    }

    fn exec_store(
        &mut self,
        program: &Program,
        operands: &mut OperandSet<'_>,
        store: StoreStream,
    ) -> Result<()> {
        let desc = descriptor(program, store.array)?;
        if desc.operand != Operand::Output {
            return Err(KernelError::fault(format!(
                "store to read-only operand {}",
                desc.operand
            )));
        }
        let addr = self.address(store.array, desc)?;
        let value = self.regs[store.src.index()];
        match desc.datatype {
            Datatype::Int8 => {
                let slot = operands
                    .output
                    .get_mut(addr)
                    .ok_or_else(|| oob(store.array, addr, 1))?;
                *slot = saturate_i8(value.0);
            }
            Datatype::ComplexInt8 => {
                let byte = addr * 2;
                if byte + 1 >= operands.output.len() {
                    return Err(oob(store.array, addr, 2));
                }
                operands.output[byte] = saturate_i8(value.0);
                operands.output[byte + 1] = saturate_i8(value.1);
            }
            Datatype::Float16 | Datatype::ComplexFloat16 => {
                return Err(KernelError::fault(
                    "half-precision stores are not supported".to_string(),
                ))
            }
        }
        if let Some(dim) = store.incr {
            self.apply_incr(program, DimStep { array: store.array, dim })?;
        }
        Ok(())
    }

    fn exec_alu(&mut self, instr: &Instruction) -> Result<()> {
        let op = instr.op;
        if !op.writes_z() {
            return Ok(());
        }
        let x = self.operand_lanes(op.uses_x(), instr.x, "X")?;
        let y = self.operand_lanes(op.uses_y(), instr.y, "Y")?;
        let a = self.operand_lanes(op.uses_a(), instr.a, "A")?;
        let raw: Lanes = match op {
            Opcode::Noop => unreachable!("Noop writes no destination"),
            Opcode::Clear => (0.0, 0.0),
            Opcode::Copy => a,
            Opcode::AddR => (x.0 + y.0, x.1 + y.1),
            Opcode::MulR => (x.0 * y.0, x.1 * y.1),
            Opcode::MacR => (x.0.mul_add(y.0, a.0), x.1.mul_add(y.1, a.1)),
            Opcode::Clip => (a.0.clamp(x.0, y.0), a.1.clamp(x.1, y.1)),
            Opcode::SumPair => {
                let s = a.0 + a.1;
                (s, s)
            }
        };
        let z = instr
            .z
            .ok_or_else(|| KernelError::fault(format!("{op:?} without Z operand")))?;
        self.regs[z.index()] = round_f16(raw);
        Ok(())
    }

    fn operand_lanes(&self, used: bool, reg: Option<RegId>, role: &str) -> Result<Lanes> {
        if !used {
            return Ok((0.0, 0.0));
        }
        reg.map(|r| self.regs[r.index()])
            .ok_or_else(|| KernelError::fault(format!("missing {role} operand register")))
    }

    /// Current element address of `array`, in datatype units.
    fn address(&self, array: ArrayId, desc: &ArrayDescriptor) -> Result<usize> {
        let mut addr = i64::try_from(desc.offset)
            .map_err(|_| KernelError::fault("descriptor offset overflow".to_string()))?;
        for (dim, spec) in desc.dims.iter().enumerate() {
            addr += i64::from(self.counters[array.index()][dim]) * i64::from(spec.stride);
        }
        usize::try_from(addr)
            .map_err(|_| KernelError::fault(format!("negative element address {addr}")))
    }
}

fn descriptor(program: &Program, array: ArrayId) -> Result<&ArrayDescriptor> {
    program
        .array(array)
        .ok_or_else(|| KernelError::fault(format!("array {array:?} not configured")))
}

fn oob(array: ArrayId, addr: usize, lanes: usize) -> KernelError {
    KernelError::fault(format!(
        "array {array:?} access at unit {addr} (x{lanes}) outside operand buffer"
    ))
}

fn read_i8(buf: &[i8], addr: usize, dt: Datatype, array: ArrayId) -> Result<Lanes> {
    match dt {
        Datatype::Int8 => {
            let v = f32::from(*buf.get(addr).ok_or_else(|| oob(array, addr, 1))?);
            Ok((v, v))
        }
        Datatype::ComplexInt8 => {
            let byte = addr * 2;
            if byte + 1 >= buf.len() {
                return Err(oob(array, addr, 2));
            }
            Ok((f32::from(buf[byte]), f32::from(buf[byte + 1])))
        }
        _ => unreachable!("caller matched int8 datatypes"),
    }
}

fn read_f16(buf: &[f16], addr: usize, dt: Datatype, array: ArrayId) -> Result<Lanes> {
    match dt {
        Datatype::Float16 => {
            let v = buf.get(addr).ok_or_else(|| oob(array, addr, 1))?.to_f32();
            Ok((v, v))
        }
        Datatype::ComplexFloat16 => {
            let pair = addr * 2;
            if pair + 1 >= buf.len() {
                return Err(oob(array, addr, 2));
            }
            Ok((buf[pair].to_f32(), buf[pair + 1].to_f32()))
        }
        _ => unreachable!("caller matched f16 datatypes"),
    }
}

fn round_f16(lanes: Lanes) -> Lanes {
    (
        f16::from_f32(lanes.0).to_f32(),
        f16::from_f32(lanes.1).to_f32(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramContext;
    use mvp_chip::HwDim;

    fn load(dst: RegId, array: ArrayId, incr: Option<HwDim>) -> Option<LoadStream> {
        Some(LoadStream { dst, array, incr })
    }

    fn store(src: RegId, array: ArrayId, incr: Option<HwDim>) -> Option<StoreStream> {
        Some(StoreStream { src, array, incr })
    }

    #[test]
    fn element_copy_loop() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.config_array(ArrayId::A0, Operand::Input, 0, Datatype::Int8, [(4, 1), (1, 0), (1, 0)]);
        ctx.config_array(ArrayId::A1, Operand::Output, 0, Datatype::Int8, [(4, 1), (1, 0), (1, 0)]);
        ctx.begin_loop(4);
        ctx.compute(
            Opcode::Copy,
            Some(RegId::R1),
            None,
            None,
            Some(RegId::R0),
            [load(RegId::R0, ArrayId::A0, Some(HwDim::Vec)), None],
            store(RegId::R1, ArrayId::A1, Some(HwDim::Vec)),
        );
        ctx.end_loop();

        let input = [5i8, -3, 7, 100];
        let mut output = [0i8; 4];
        let mut ops = OperandSet {
            input: &input,
            weights: &[],
            bias: &[],
            scaler: &[],
            output: &mut output,
        };
        ctx.execute_program(&mut ops).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn dot_product_accumulates() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.config_array(ArrayId::A0, Operand::Input, 0, Datatype::Int8, [(3, 1), (1, 0), (1, 0)]);
        ctx.config_array(ArrayId::A2, Operand::Weights, 0, Datatype::Int8, [(3, 1), (1, 0), (1, 0)]);
        ctx.config_array(ArrayId::A1, Operand::Output, 0, Datatype::Int8, [(1, 0), (1, 0), (1, 0)]);
        ctx.compute(Opcode::Clear, Some(RegId::R2), None, None, None, [None, None], None);
        ctx.begin_loop(3);
        ctx.compute(
            Opcode::MacR,
            Some(RegId::R2),
            Some(RegId::R0),
            Some(RegId::R1),
            Some(RegId::R2),
            [
                load(RegId::R0, ArrayId::A0, Some(HwDim::Vec)),
                load(RegId::R1, ArrayId::A2, Some(HwDim::Vec)),
            ],
            None,
        );
        ctx.end_loop();
        ctx.compute(
            Opcode::Copy,
            Some(RegId::R3),
            None,
            None,
            Some(RegId::R2),
            [None, None],
            store(RegId::R3, ArrayId::A1, None),
        );

        let input = [1i8, 2, 3];
        let weights = [4i8, 5, 6];
        let mut output = [0i8; 1];
        let mut ops = OperandSet {
            input: &input,
            weights: &weights,
            bias: &[],
            scaler: &[],
            output: &mut output,
        };
        ctx.execute_program(&mut ops).unwrap();
        assert_eq!(output[0], 32); // 1*4 + 2*5 + 3*6
    }

    #[test]
    fn loop_completion_advances_row() {
        // Walk a 2x3 row-major matrix: inner loop walks columns (the
        // column counter wraps), the inner loop's completion advances
        // the row.
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.config_array(ArrayId::A0, Operand::Input, 0, Datatype::Int8, [(1, 0), (2, 3), (3, 1)]);
        ctx.config_array(ArrayId::A1, Operand::Output, 0, Datatype::Int8, [(6, 1), (1, 0), (1, 0)]);
        ctx.begin_loop(2);
        ctx.begin_loop(3);
        ctx.compute(
            Opcode::Copy,
            Some(RegId::R1),
            None,
            None,
            Some(RegId::R0),
            [load(RegId::R0, ArrayId::A0, Some(HwDim::Col)), None],
            store(RegId::R1, ArrayId::A1, Some(HwDim::Vec)),
        );
        ctx.end_loop();
        ctx.postloop_incr(ArrayId::A0, HwDim::Row);
        ctx.end_loop();

        let input = [1i8, 2, 3, 4, 5, 6];
        let mut output = [0i8; 6];
        let mut ops = OperandSet {
            input: &input,
            weights: &[],
            bias: &[],
            scaler: &[],
            output: &mut output,
        };
        ctx.execute_program(&mut ops).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn multiple_increment_entries_stride_the_walk() {
        // Inner unit loop completion carries three increments: the walk
        // reads elements 0 and 3.
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.config_array(ArrayId::A0, Operand::Input, 0, Datatype::Int8, [(6, 1), (1, 0), (1, 0)]);
        ctx.config_array(ArrayId::A1, Operand::Output, 0, Datatype::Int8, [(2, 1), (1, 0), (1, 0)]);
        ctx.begin_loop(2);
        ctx.begin_loop(1);
        ctx.compute(
            Opcode::Copy,
            Some(RegId::R1),
            None,
            None,
            Some(RegId::R0),
            [load(RegId::R0, ArrayId::A0, None), None],
            store(RegId::R1, ArrayId::A1, Some(HwDim::Vec)),
        );
        ctx.end_loop();
        ctx.postloop_incr(ArrayId::A0, HwDim::Vec);
        ctx.postloop_incr(ArrayId::A0, HwDim::Vec);
        ctx.postloop_incr(ArrayId::A0, HwDim::Vec);
        ctx.end_loop();

        let input = [10i8, 20, 30, 40, 50, 60];
        let mut output = [0i8; 2];
        let mut ops = OperandSet {
            input: &input,
            weights: &[],
            bias: &[],
            scaler: &[],
            output: &mut output,
        };
        ctx.execute_program(&mut ops).unwrap();
        assert_eq!(output, [10, 40]);
    }

    #[test]
    fn complex_datatype_moves_pairs() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.config_array(
            ArrayId::A0,
            Operand::Input,
            0,
            Datatype::ComplexInt8,
            [(2, 1), (1, 0), (1, 0)],
        );
        ctx.config_array(
            ArrayId::A1,
            Operand::Output,
            0,
            Datatype::ComplexInt8,
            [(2, 1), (1, 0), (1, 0)],
        );
        ctx.begin_loop(2);
        ctx.compute(
            Opcode::Copy,
            Some(RegId::R1),
            None,
            None,
            Some(RegId::R0),
            [load(RegId::R0, ArrayId::A0, Some(HwDim::Vec)), None],
            store(RegId::R1, ArrayId::A1, Some(HwDim::Vec)),
        );
        ctx.end_loop();

        let input = [1i8, -2, 3, -4];
        let mut output = [0i8; 4];
        let mut ops = OperandSet {
            input: &input,
            weights: &[],
            bias: &[],
            scaler: &[],
            output: &mut output,
        };
        ctx.execute_program(&mut ops).unwrap();
        assert_eq!(output, input);
    }

    #[test]
    fn int8_store_saturates() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.config_array(ArrayId::A1, Operand::Output, 0, Datatype::Int8, [(1, 0), (1, 0), (1, 0)]);
        ctx.set_reg(RegId::R0, f16::from_f32(200.0));
        ctx.compute(
            Opcode::Copy,
            Some(RegId::R1),
            None,
            None,
            Some(RegId::R0),
            [None, None],
            store(RegId::R1, ArrayId::A1, None),
        );
        let mut output = [0i8; 1];
        let mut ops = OperandSet {
            input: &[],
            weights: &[],
            bias: &[],
            scaler: &[],
            output: &mut output,
        };
        ctx.execute_program(&mut ops).unwrap();
        assert_eq!(output[0], 127);
    }

    #[test]
    fn sum_pair_reduces_lanes() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.config_array(ArrayId::A1, Operand::Output, 0, Datatype::Int8, [(1, 0), (1, 0), (1, 0)]);
        ctx.set_reg_pair(RegId::R0, f16::from_f32(1.5), f16::from_f32(2.5));
        ctx.compute(
            Opcode::SumPair,
            Some(RegId::R1),
            None,
            None,
            Some(RegId::R0),
            [None, None],
            store(RegId::R1, ArrayId::A1, None),
        );
        let mut output = [0i8; 1];
        let mut ops = OperandSet {
            input: &[],
            weights: &[],
            bias: &[],
            scaler: &[],
            output: &mut output,
        };
        ctx.execute_program(&mut ops).unwrap();
        assert_eq!(output[0], 4);
    }

    #[test]
    fn out_of_bounds_walk_is_a_fault() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.config_array(ArrayId::A0, Operand::Input, 0, Datatype::Int8, [(8, 1), (1, 0), (1, 0)]);
        ctx.config_array(ArrayId::A1, Operand::Output, 0, Datatype::Int8, [(8, 1), (1, 0), (1, 0)]);
        ctx.begin_loop(8);
        ctx.compute(
            Opcode::Copy,
            Some(RegId::R1),
            None,
            None,
            Some(RegId::R0),
            [load(RegId::R0, ArrayId::A0, Some(HwDim::Vec)), None],
            store(RegId::R1, ArrayId::A1, Some(HwDim::Vec)),
        );
        ctx.end_loop();

        let input = [0i8; 4]; // shorter than the declared walk
        let mut output = [0i8; 8];
        let mut ops = OperandSet {
            input: &input,
            weights: &[],
            bias: &[],
            scaler: &[],
            output: &mut output,
        };
        let err = ctx.execute_program(&mut ops).unwrap_err();
        assert!(matches!(err, KernelError::Fault { .. }));
    }
}
