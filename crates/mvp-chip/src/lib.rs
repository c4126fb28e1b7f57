//! Silicon model for the MVP matrix/vector co-processor.
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the co-processor: resource limits, typed register/array/
//! loop identifiers, the ALU operation set, and the micro-coded program
//! format the driver compiles kernels into.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`limits`] | Resource limits — register/array/loop/instruction counts, dimension bounds |
//! | [`types`] | Typed identifiers for the fixed hardware namespace |
//! | [`alu`] | ALU operation set and lane-pair semantics |
//! | [`program`] | The compiled program representation (descriptors, instructions, loops) |
//!
//! # Execution model
//!
//! The MVP is a micro-coded streaming engine. One program holds at most
//! [`limits::NUM_INSTRUCTIONS`] instructions; hardware loops repeat
//! instruction ranges, and array descriptors walk up to
//! [`limits::NUM_ARRAY_DIMS`] dimensions of a bound operand buffer with
//! per-dimension counts and strides. Every register holds a pair of
//! half-precision lanes, so a "complex" datatype processes two packed
//! values per cycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alu;
pub mod limits;
pub mod program;
pub mod types;

pub use alu::Opcode;
pub use program::{
    ArrayDescriptor, DimSpec, Instruction, LoadStream, LoopDescriptor, Program, StoreStream,
};
pub use types::{ArrayId, Datatype, HwDim, Operand, RegId};
