//! The compiled program representation.
//!
//! A program is the unit of submission to the co-processor: a register
//! file image, up to five array descriptors, up to eight instructions,
//! and loop descriptors that repeat instruction ranges. All containers
//! are fixed-capacity arrays indexed by the typed identifiers in
//! [`crate::types`] — the representation mirrors the silicon, so bounds
//! checking is total and allocation-free.
//!
//! Register constants are stored as raw half-precision bit patterns;
//! this crate models formats only and leaves arithmetic to the driver.

use crate::alu::Opcode;
use crate::limits;
use crate::types::{ArrayId, Datatype, HwDim, Operand, RegId};

/// A register constant: two half-precision lanes as raw bit patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegPair {
    /// Real lane, IEEE 754 binary16 bits.
    pub re_bits: u16,
    /// Imaginary lane, IEEE 754 binary16 bits.
    pub im_bits: u16,
}

/// Count and stride of one array dimension, in datatype units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimSpec {
    /// Iteration count (1..=[`limits::MAX_DIM_COUNT`]). A count of 1
    /// makes the dimension inert.
    pub count: u32,
    /// Step between consecutive positions, in datatype units.
    pub stride: i32,
}

impl Default for DimSpec {
    fn default() -> Self {
        Self { count: 1, stride: 0 }
    }
}

/// An array descriptor: one operand buffer walked over up to three
/// dimensions.
///
/// `offset` is in datatype units from the start of the operand buffer.
/// Each dimension keeps a counter; an increment past `count - 1` wraps
/// the counter to zero without carrying into other dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDescriptor {
    /// Operand buffer this descriptor addresses.
    pub operand: Operand,
    /// Base offset into the operand, in datatype units.
    pub offset: usize,
    /// Element datatype.
    pub datatype: Datatype,
    /// Per-dimension counts and strides, indexed by [`HwDim`].
    pub dims: [DimSpec; limits::NUM_ARRAY_DIMS],
}

impl ArrayDescriptor {
    /// Dimension spec for `dim`.
    #[must_use]
    pub const fn dim(&self, dim: HwDim) -> DimSpec {
        self.dims[dim.index()]
    }
}

/// One load stream: reads the next element(s) of `array` into `dst`
/// before the ALU operation executes, then optionally advances a
/// dimension counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStream {
    /// Destination register.
    pub dst: RegId,
    /// Source array.
    pub array: ArrayId,
    /// Dimension advanced by one step after the load.
    pub incr: Option<HwDim>,
}

/// The store stream: writes `src` to the current position of `array`
/// after the ALU operation executes, then optionally advances a
/// dimension counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStream {
    /// Source register.
    pub src: RegId,
    /// Destination array.
    pub array: ArrayId,
    /// Dimension advanced by one step after the store.
    pub incr: Option<HwDim>,
}

/// One instruction: an ALU operation with register operands plus
/// optional load/store micro-operations.
///
/// Per-cycle order is loads, then ALU, then store — a load may feed the
/// same register the ALU reads in the same instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Instruction {
    /// ALU operation.
    pub op: Opcode,
    /// Destination register (`Z`).
    pub z: Option<RegId>,
    /// Source register (`X`).
    pub x: Option<RegId>,
    /// Source register (`Y`).
    pub y: Option<RegId>,
    /// Source register (`A`).
    pub a: Option<RegId>,
    /// Load streams, executed in slot order before the ALU.
    pub loads: [Option<LoadStream>; limits::NUM_LOAD_STREAMS],
    /// Store stream, executed after the ALU.
    pub store: Option<StoreStream>,
}

/// One array-dimension step applied when a loop completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimStep {
    /// Target array.
    pub array: ArrayId,
    /// Target dimension.
    pub dim: HwDim,
}

/// A hardware loop: repeats the instruction range `first..=last`
/// `count` times, then applies its increment and reset entries once.
///
/// Increments advance a dimension counter by one step each; listing the
/// same dimension more than once advances it multiple steps. When a
/// loop is nested inside another, its completion fires once per outer
/// iteration — this is the replay point for the flatten remainders the
/// dimension algebra records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDescriptor {
    /// Iteration count.
    pub count: u32,
    /// First instruction of the body.
    pub first: usize,
    /// Last instruction of the body (inclusive).
    pub last: usize,
    /// Dimension steps applied after the final iteration.
    pub incrs: [Option<DimStep>; limits::NUM_LOOP_INCRS],
    /// Dimension counters reset to zero after the final iteration.
    pub resets: [Option<DimStep>; limits::NUM_LOOP_RESETS],
}

impl LoopDescriptor {
    /// Number of used increment entries.
    #[must_use]
    pub fn num_incrs(&self) -> usize {
        self.incrs.iter().filter(|s| s.is_some()).count()
    }

    /// Remaining increment entry capacity.
    #[must_use]
    pub fn free_incrs(&self) -> usize {
        limits::NUM_LOOP_INCRS - self.num_incrs()
    }
}

/// A complete program image, sized for the hardware resource namespace.
///
/// A default (cleared) program has no instructions, loops, or bound
/// arrays and an all-zero register file. Program areas reuse the same
/// image across submissions by clearing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Initial register file.
    pub regs: [RegPair; limits::NUM_REGS],
    /// Bound array descriptors.
    pub arrays: [Option<ArrayDescriptor>; limits::NUM_ARRAYS],
    /// Instruction store; only the first `num_instrs` entries are live.
    pub instrs: [Instruction; limits::NUM_INSTRUCTIONS],
    /// Number of live instructions.
    pub num_instrs: usize,
    /// Loop descriptor store; only the first `num_loops` entries are live.
    pub loops: [Option<LoopDescriptor>; limits::NUM_LOOPS],
    /// Number of live loop descriptors.
    pub num_loops: usize,
}

impl Default for Program {
    fn default() -> Self {
        Self {
            regs: [RegPair::default(); limits::NUM_REGS],
            arrays: [None; limits::NUM_ARRAYS],
            instrs: [Instruction::default(); limits::NUM_INSTRUCTIONS],
            num_instrs: 0,
            loops: [const { None }; limits::NUM_LOOPS],
            num_loops: 0,
        }
    }
}

impl Program {
    /// Reset to the cleared state for reuse.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Live instructions.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instrs[..self.num_instrs]
    }

    /// Live loop descriptors.
    #[must_use]
    pub fn loop_descriptors(&self) -> impl Iterator<Item = &LoopDescriptor> {
        self.loops[..self.num_loops].iter().filter_map(Option::as_ref)
    }

    /// Descriptor bound to `array`, if any.
    #[must_use]
    pub const fn array(&self, array: ArrayId) -> Option<&ArrayDescriptor> {
        self.arrays[array.index()].as_ref()
    }
}
