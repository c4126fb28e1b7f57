//! Resource limits of the MVP co-processor.
//!
//! The engine exposes a fixed namespace: everything below is a hard
//! architectural bound, not a tunable. The driver's program builder
//! rejects any program that exceeds one of these, and the dimension
//! algebra exists precisely to fold arbitrary tensor loop nests into
//! the [`NUM_ARRAY_DIMS`]-dimensional descriptor model.

/// Number of general-purpose registers (R0..R7). Each register holds a
/// pair of half-precision lanes.
pub const NUM_REGS: usize = 8;

/// Number of array descriptors (A0..A4) a program can bind.
pub const NUM_ARRAYS: usize = 5;

/// Number of loop descriptors available to one program.
pub const NUM_LOOPS: usize = 8;

/// Maximum number of instructions in one program.
pub const NUM_INSTRUCTIONS: usize = 8;

/// Dimensions per array descriptor. An array walks at most three
/// dimensions; tensors of higher logical rank must be flattened down to
/// this before a descriptor can be emitted.
pub const NUM_ARRAY_DIMS: usize = 3;

/// Maximum iteration count of one array dimension or hardware loop.
/// Dimension count registers are 10 bits wide (counts 1..=1024).
pub const MAX_DIM_COUNT: u32 = 1024;

/// Maximum per-dimension stride, in datatype units. Stride registers are
/// 12-bit signed; the kernel generators only ever use the non-negative
/// range.
pub const MAX_DIM_STRIDE: i32 = 2047;

/// Minimum (most negative) per-dimension stride.
pub const MIN_DIM_STRIDE: i32 = -2048;

/// Load streams available to one instruction.
pub const NUM_LOAD_STREAMS: usize = 2;

/// Post-completion increment entries one loop descriptor can carry.
/// Each entry advances one array dimension by one step; the same
/// dimension may appear more than once to advance multiple steps.
pub const NUM_LOOP_INCRS: usize = 4;

/// Post-completion reset entries one loop descriptor can carry.
pub const NUM_LOOP_RESETS: usize = 4;
