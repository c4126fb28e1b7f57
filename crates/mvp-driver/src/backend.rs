//! Execution backend abstraction.
//!
//! Program building is synchronous on the calling core; program
//! *execution* happens on the co-processor. The backend trait models
//! the two primitives the kernels need: an asynchronous-submit
//! `execute` and a blocking `wait_for_completion`.

use crate::error::Result;
use half::f16;
use mvp_chip::Program;
use std::fmt::Debug;

/// Operand buffers one program submission executes against.
///
/// Array descriptors inside a [`Program`] name their operand by role;
/// the backend resolves the role against this set. Roles a kernel does
/// not use stay empty.
#[derive(Debug)]
pub struct OperandSet<'a> {
    /// Input activation tensor.
    pub input: &'a [i8],
    /// Weight / filter tensor.
    pub weights: &'a [i8],
    /// Per-output-channel bias vector.
    pub bias: &'a [f16],
    /// Per-output-channel output scaler vector.
    pub scaler: &'a [f16],
    /// Output tensor.
    pub output: &'a mut [i8],
}

/// Backend type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Software interpreter — CPU execution of the program image, no
    /// hardware required.
    Software,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "Software (interpreter)"),
        }
    }
}

/// Execution backend for compiled programs.
///
/// Submission order is preserved: programs submitted by one kernel
/// invocation execute in submission order, and `wait_for_completion`
/// returns only after every submitted program has finished.
pub trait MvpBackend: Debug {
    /// Submit one program for execution against `operands`.
    ///
    /// Semantically asynchronous: the call may return before the
    /// program has executed, as long as ordering and
    /// `wait_for_completion` guarantees hold.
    ///
    /// # Errors
    ///
    /// Returns an error if the program is malformed or an array walk
    /// leaves its operand buffer.
    fn execute(&mut self, program: &Program, operands: &mut OperandSet<'_>) -> Result<()>;

    /// Block until every submitted program has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if a previously submitted program failed.
    fn wait_for_completion(&mut self) -> Result<()>;

    /// Backend type for diagnostics.
    fn backend_type(&self) -> BackendType;
}
