//! Kernel driver for the MVP matrix/vector co-processor.
//!
//! Compiles quantized int8 tensor kernels — depthwise 2D convolution
//! and fully-connected — into micro-coded programs for the fixed-
//! function engine modeled by [`mvp_chip`], and runs them through a
//! pluggable execution backend.
//!
//! # Architecture
//!
//! ```text
//! kernel entry points (conv2d, fully_connected)
//!   └─ strategy selection: probe generators, prefer by cost heuristic
//!        └─ kernel program generators (per-pixel / region-decomposed)
//!             ├─ dimension algebra (dims): flatten/split tensor axes
//!             │  into the 3-dimension descriptor model
//!             └─ program builder (builder): emission + program area
//!                  └─ execution backend (backends): software interpreter
//! ```
//!
//! # Quick start
//!
//! ```
//! use half::f16;
//! use mvp_driver::prelude::*;
//!
//! # fn main() -> mvp_driver::Result<()> {
//! let input = [1i8, 2, 3, 4];
//! let weights = [1i8, 1, 1, 1];
//! let bias = [f16::ZERO];
//! let mut output = [0i8; 1];
//! let mut params = FullyConnectedParams {
//!     input: &input,
//!     input_offset: 0,
//!     weights: &weights,
//!     weight_offset: 0,
//!     bias: &bias,
//!     output: &mut output,
//!     output_offset: 0,
//!     multiplier: output_multiplier(1.0),
//!     batches: 1,
//!     accum_depth: 4,
//!     output_depth: 1,
//!     activation_min: -128,
//!     activation_max: 127,
//! };
//!
//! let mut backend = SoftwareMvp::new();
//! let mut ctx = ProgramContext::new_double(&mut backend);
//! fully_connected_s8(&mut params, &mut ctx)?;
//! assert_eq!(output[0], 10);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

mod backend;
pub mod backends;
mod builder;
pub mod conv2d;
pub mod dims;
mod error;
pub mod fully_connected;
pub mod math;

pub use backend::{BackendType, MvpBackend, OperandSet};
pub use builder::ProgramContext;
pub use conv2d::{
    depthwise_conv2d_s8, depthwise_conv2d_s8_is_supported, depthwise_conv2d_s8_test, Conv2dParams,
};
pub use error::{KernelError, Result};
pub use fully_connected::{
    bias_convert, factorize, fully_connected_s8, fully_connected_s8_is_supported,
    output_multiplier, FullyConnectedParams,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::backends::SoftwareMvp;
    pub use crate::{
        bias_convert, depthwise_conv2d_s8, depthwise_conv2d_s8_is_supported, fully_connected_s8,
        fully_connected_s8_is_supported, output_multiplier, Conv2dParams, FullyConnectedParams,
        KernelError, MvpBackend, OperandSet, ProgramContext, Result,
    };
}
