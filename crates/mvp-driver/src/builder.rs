//! Program builder and program-area management.
//!
//! A [`ProgramContext`] owns the program area (one or two reusable
//! program slots) and a handle to the execution backend. Generators
//! drive it with the emission calls below; errors found during emission
//! accumulate first-error-wins into an explicit status slot and surface
//! when the program is submitted, so generator code stays linear while
//! no error is ever lost.
//!
//! Double buffering: with two slots, `execute_program` flips to the
//! other slot, so the next program can be built while the backend
//! consumes the previous one. A single-slot area relies on the backend
//! having consumed the program before the next `begin_program`.

use crate::backend::{MvpBackend, OperandSet};
use crate::error::{KernelError, Result};
use half::f16;
use mvp_chip::limits;
use mvp_chip::program::{DimStep, RegPair};
use mvp_chip::{
    ArrayDescriptor, ArrayId, Datatype, DimSpec, HwDim, Instruction, LoadStream, LoopDescriptor,
    Opcode, Operand, Program, RegId, StoreStream,
};
use tracing::trace;

/// Number of program slots in a double-buffered area.
const DOUBLE_SLOTS: usize = 2;

/// Program area plus builder state, bound to an execution backend.
pub struct ProgramContext<'b> {
    backend: &'b mut dyn MvpBackend,
    slots: [Program; DOUBLE_SLOTS],
    num_slots: usize,
    current: usize,
    status: Option<KernelError>,
    loop_stack: Vec<usize>,
    last_closed: Option<usize>,
    programs_submitted: usize,
}

impl std::fmt::Debug for ProgramContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramContext")
            .field("num_slots", &self.num_slots)
            .field("current", &self.current)
            .field("programs_submitted", &self.programs_submitted)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<'b> ProgramContext<'b> {
    /// Create a single-buffered program area.
    pub fn new_single(backend: &'b mut dyn MvpBackend) -> Self {
        Self::new(backend, 1)
    }

    /// Create a double-buffered program area.
    pub fn new_double(backend: &'b mut dyn MvpBackend) -> Self {
        Self::new(backend, DOUBLE_SLOTS)
    }

    fn new(backend: &'b mut dyn MvpBackend, num_slots: usize) -> Self {
        Self {
            backend,
            slots: [Program::default(), Program::default()],
            num_slots,
            current: 0,
            status: None,
            loop_stack: Vec::new(),
            last_closed: None,
            programs_submitted: 0,
        }
    }

    /// Programs submitted through this context.
    #[must_use]
    pub const fn programs_submitted(&self) -> usize {
        self.programs_submitted
    }

    /// The program slot currently being built.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.slots[self.current]
    }

    fn record(&mut self, err: KernelError) {
        if self.status.is_none() {
            self.status = Some(err);
        }
    }

    /// Start building a fresh program in the current slot.
    pub fn begin_program(&mut self) {
        self.slots[self.current].clear();
        self.loop_stack.clear();
        self.last_closed = None;
    }

    /// Bind an array descriptor.
    ///
    /// `dims` gives `(count, stride)` per dimension in [`HwDim`] order,
    /// in datatype units. Violations of the dimension bounds are
    /// recorded in the status slot.
    pub fn config_array(
        &mut self,
        array: ArrayId,
        operand: Operand,
        offset: usize,
        datatype: Datatype,
        dims: [(u32, i32); limits::NUM_ARRAY_DIMS],
    ) {
        for (count, stride) in dims {
            if count == 0 || count > limits::MAX_DIM_COUNT {
                self.record(KernelError::invalid_range(format!(
                    "array {array:?} dimension count {count} outside 1..={}",
                    limits::MAX_DIM_COUNT
                )));
            }
            if !(limits::MIN_DIM_STRIDE..=limits::MAX_DIM_STRIDE).contains(&stride) {
                self.record(KernelError::invalid_range(format!(
                    "array {array:?} stride {stride} outside {}..={}",
                    limits::MIN_DIM_STRIDE,
                    limits::MAX_DIM_STRIDE
                )));
            }
        }
        let descriptor = ArrayDescriptor {
            operand,
            offset,
            datatype,
            dims: [
                DimSpec { count: dims[0].0, stride: dims[0].1 },
                DimSpec { count: dims[1].0, stride: dims[1].1 },
                DimSpec { count: dims[2].0, stride: dims[2].1 },
            ],
        };
        self.slots[self.current].arrays[array.index()] = Some(descriptor);
    }

    /// Set a register to a replicated half-precision constant.
    pub fn set_reg(&mut self, reg: RegId, value: f16) {
        self.set_reg_pair(reg, value, value);
    }

    /// Set a register to a pair of half-precision constants.
    pub fn set_reg_pair(&mut self, reg: RegId, re: f16, im: f16) {
        self.slots[self.current].regs[reg.index()] =
            RegPair { re_bits: re.to_bits(), im_bits: im.to_bits() };
    }

    /// Open a hardware loop around the instructions emitted until the
    /// matching [`end_loop`](Self::end_loop).
    pub fn begin_loop(&mut self, count: u32) {
        if count == 0 || count > limits::MAX_DIM_COUNT {
            self.record(KernelError::invalid_range(format!(
                "loop count {count} outside 1..={}",
                limits::MAX_DIM_COUNT
            )));
        }
        let program = &mut self.slots[self.current];
        if program.num_loops >= limits::NUM_LOOPS {
            self.record(KernelError::invalid_range(format!(
                "program needs more than {} loops",
                limits::NUM_LOOPS
            )));
            return;
        }
        let idx = program.num_loops;
        program.loops[idx] = Some(LoopDescriptor {
            count,
            first: program.num_instrs,
            last: program.num_instrs,
            incrs: [None; limits::NUM_LOOP_INCRS],
            resets: [None; limits::NUM_LOOP_RESETS],
        });
        program.num_loops += 1;
        self.loop_stack.push(idx);
    }

    /// Close the innermost open loop.
    pub fn end_loop(&mut self) {
        let Some(idx) = self.loop_stack.pop() else {
            self.record(KernelError::invalid_range(
                "end_loop without matching begin_loop".to_string(),
            ));
            return;
        };
        let program = &mut self.slots[self.current];
        let num_instrs = program.num_instrs;
        if let Some(l) = program.loops[idx].as_mut() {
            if num_instrs == l.first {
                self.record(KernelError::invalid_range("loop body is empty".to_string()));
                return;
            }
            l.last = num_instrs - 1;
        }
        self.last_closed = Some(idx);
    }

    /// Free post-completion increment entries on the most recently
    /// closed loop.
    #[must_use]
    pub fn free_incr_slots(&self) -> usize {
        self.last_closed
            .and_then(|idx| self.slots[self.current].loops[idx].as_ref())
            .map_or(0, LoopDescriptor::free_incrs)
    }

    /// Advance `dim` of `array` by one step each time the most recently
    /// closed loop completes.
    pub fn postloop_incr(&mut self, array: ArrayId, dim: HwDim) {
        let Some(idx) = self.last_closed else {
            self.record(KernelError::invalid_range(
                "postloop_incr before any loop was closed".to_string(),
            ));
            return;
        };
        let slot = self.slots[self.current].loops[idx]
            .as_mut()
            .and_then(|l| l.incrs.iter_mut().find(|s| s.is_none()));
        match slot {
            Some(entry) => *entry = Some(DimStep { array, dim }),
            None => self.record(KernelError::invalid_range(format!(
                "loop increment entries exhausted (max {})",
                limits::NUM_LOOP_INCRS
            ))),
        }
    }

    /// Reset `dim` of `array` to zero each time the most recently
    /// closed loop completes.
    pub fn postloop_reset(&mut self, array: ArrayId, dim: HwDim) {
        let Some(idx) = self.last_closed else {
            self.record(KernelError::invalid_range(
                "postloop_reset before any loop was closed".to_string(),
            ));
            return;
        };
        let slot = self.slots[self.current].loops[idx]
            .as_mut()
            .and_then(|l| l.resets.iter_mut().find(|s| s.is_none()));
        match slot {
            Some(entry) => *entry = Some(DimStep { array, dim }),
            None => self.record(KernelError::invalid_range(format!(
                "loop reset entries exhausted (max {})",
                limits::NUM_LOOP_RESETS
            ))),
        }
    }

    /// Append an instruction.
    #[allow(clippy::too_many_arguments)]
    pub fn compute(
        &mut self,
        op: Opcode,
        z: Option<RegId>,
        x: Option<RegId>,
        y: Option<RegId>,
        a: Option<RegId>,
        loads: [Option<LoadStream>; limits::NUM_LOAD_STREAMS],
        store: Option<StoreStream>,
    ) {
        let program = &mut self.slots[self.current];
        if program.num_instrs >= limits::NUM_INSTRUCTIONS {
            self.record(KernelError::invalid_range(format!(
                "program needs more than {} instructions",
                limits::NUM_INSTRUCTIONS
            )));
            return;
        }
        program.instrs[program.num_instrs] = Instruction { op, z, x, y, a, loads, store };
        program.num_instrs += 1;
    }

    /// Advance `dim` of `array` by `steps` at the completion of the
    /// most recently closed loop, spilling into an auxiliary no-op
    /// micro-loop when the loop's increment entries run out.
    ///
    /// The micro-loop is a `steps`-count loop around a single no-op
    /// whose inner completion fires once per iteration — the standard
    /// replay shape for flatten remainders.
    pub fn postloop_incr_by(&mut self, array: ArrayId, dim: HwDim, steps: u32) {
        let direct = steps.min(u32::try_from(self.free_incr_slots()).unwrap_or(0));
        for _ in 0..direct {
            self.postloop_incr(array, dim);
        }
        let remaining = steps - direct;
        if remaining > 0 {
            self.incr_microloop(array, dim, remaining);
        }
    }

    /// Emit a no-op micro-loop advancing `dim` of `array` by `steps`.
    pub fn incr_microloop(&mut self, array: ArrayId, dim: HwDim, steps: u32) {
        self.begin_loop(steps);
        self.begin_loop(1);
        self.compute(Opcode::Noop, None, None, None, None, [None, None], None);
        self.end_loop();
        self.postloop_incr(array, dim);
        self.end_loop();
    }

    /// Submit the current program for execution and flip to the next
    /// slot.
    ///
    /// # Errors
    ///
    /// Surfaces the first error recorded during emission, or the
    /// backend's submission error. Unclosed loops are an emission
    /// error.
    pub fn execute_program(&mut self, operands: &mut OperandSet<'_>) -> Result<()> {
        if !self.loop_stack.is_empty() {
            self.record(KernelError::invalid_range(format!(
                "{} loop(s) left open at submission",
                self.loop_stack.len()
            )));
        }
        if let Some(err) = self.status.take() {
            return Err(err);
        }
        trace!(
            instrs = self.slots[self.current].num_instrs,
            loops = self.slots[self.current].num_loops,
            slot = self.current,
            "submitting program"
        );
        self.backend.execute(&self.slots[self.current], operands)?;
        self.programs_submitted += 1;
        self.current = (self.current + 1) % self.num_slots;
        Ok(())
    }

    /// Block until every submitted program has completed.
    ///
    /// # Errors
    ///
    /// Propagates a failure of any previously submitted program.
    pub fn wait_for_completion(&mut self) -> Result<()> {
        self.backend.wait_for_completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SoftwareMvp;

    fn empty_operands(out: &mut [i8]) -> OperandSet<'_> {
        OperandSet { input: &[], weights: &[], bias: &[], scaler: &[], output: out }
    }

    #[test]
    fn instruction_budget_is_enforced() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        for _ in 0..=limits::NUM_INSTRUCTIONS {
            ctx.compute(Opcode::Noop, None, None, None, None, [None, None], None);
        }
        let mut out = [0i8; 1];
        let err = ctx.execute_program(&mut empty_operands(&mut out)).unwrap_err();
        assert!(matches!(err, KernelError::InvalidRange { .. }));
    }

    #[test]
    fn unmatched_end_loop_is_an_error() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.end_loop();
        let mut out = [0i8; 1];
        assert!(ctx.execute_program(&mut empty_operands(&mut out)).is_err());
    }

    #[test]
    fn open_loop_at_submission_is_an_error() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.begin_loop(2);
        ctx.compute(Opcode::Noop, None, None, None, None, [None, None], None);
        let mut out = [0i8; 1];
        assert!(ctx.execute_program(&mut empty_operands(&mut out)).is_err());
    }

    #[test]
    fn first_error_wins() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.begin_loop(0); // first error: zero count
        ctx.compute(Opcode::Noop, None, None, None, None, [None, None], None);
        ctx.end_loop();
        ctx.end_loop(); // second error: unmatched
        let mut out = [0i8; 1];
        let err = ctx.execute_program(&mut empty_operands(&mut out)).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("loop count 0"), "unexpected error: {msg}");
    }

    #[test]
    fn double_buffer_flips_slots() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_double(&mut backend);
        let mut out = [0i8; 1];
        ctx.begin_program();
        ctx.compute(Opcode::Noop, None, None, None, None, [None, None], None);
        ctx.execute_program(&mut empty_operands(&mut out)).unwrap();
        assert_eq!(ctx.current, 1);
        ctx.begin_program();
        ctx.compute(Opcode::Noop, None, None, None, None, [None, None], None);
        ctx.execute_program(&mut empty_operands(&mut out)).unwrap();
        assert_eq!(ctx.current, 0);
        assert_eq!(ctx.programs_submitted(), 2);
    }

    #[test]
    fn postloop_incr_spills_to_microloop() {
        let mut backend = SoftwareMvp::new();
        let mut ctx = ProgramContext::new_single(&mut backend);
        ctx.begin_program();
        ctx.begin_loop(2);
        ctx.compute(Opcode::Noop, None, None, None, None, [None, None], None);
        ctx.end_loop();
        let steps = limits::NUM_LOOP_INCRS as u32 + 2;
        ctx.postloop_incr_by(ArrayId::A0, HwDim::Row, steps);
        // Spill adds two loop descriptors (outer micro-loop + inner unit loop).
        assert_eq!(ctx.program().num_loops, 3);
        assert!(ctx.status.is_none());
    }
}
