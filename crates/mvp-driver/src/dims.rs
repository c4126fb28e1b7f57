//! Dimension algebra: mapping logical tensor loop nests onto the
//! three-dimensional array descriptor model.
//!
//! A kernel describes each tensor walk as a set of named logical axes
//! (batch, channel, output column, filter row, ...), each with an
//! offset, size, and stride in datatype units. The co-processor gives
//! every array descriptor only [`limits::NUM_ARRAY_DIMS`] dimensions,
//! so higher-rank walks must be *flattened*: two axes whose strides
//! nest exactly fold into one linear counter, with any address gap
//! recorded as an "extra increment" remainder the generator replays at
//! a loop boundary.
//!
//! Axes a kernel iterates host-side (one program per index) keep size 1
//! here and carry the host index in their offset, so [`flat_offset`]
//! produces the per-program base address.
//!
//! [`flat_offset`]: IterationSpace::flat_offset

use crate::builder::ProgramContext;
use crate::error::{KernelError, Result};
use mvp_chip::limits;
use mvp_chip::{ArrayId, HwDim};

/// One logical axis of a tensor walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct Axis {
    /// Current index along the axis (host-side position or in-region
    /// origin). Contributes `offset * stride` to the base address.
    pub offset: usize,
    /// Iteration count inside one program. Host axes keep 1.
    pub size: u32,
    /// Step between consecutive positions, in datatype units.
    pub stride: usize,
    /// Flatten remainder: extra steps of the target axis needed per
    /// advance of this axis.
    extra: u32,
    /// Axis this one was flattened into.
    flattened_into: Option<usize>,
    /// Hardware dimension assigned by [`IterationSpace::assign_hw_dims`].
    hw: Option<HwDim>,
}

/// A fixed set of `N` logical axes describing one tensor walk.
///
/// Axes are addressed by a kernel-declared enum convertible to a dense
/// index; declaration order decides hardware dimension assignment.
#[derive(Debug, Clone)]
pub struct IterationSpace<const N: usize> {
    axes: [Axis; N],
}

impl<const N: usize> Default for IterationSpace<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> IterationSpace<N> {
    /// Create a space with every axis inert (size 1, stride 0).
    #[must_use]
    pub fn new() -> Self {
        Self { axes: [Axis::default(); N] }
    }

    /// Describe an axis.
    pub fn set(&mut self, axis: impl Into<usize>, offset: usize, size: u32, stride: usize) {
        let a = &mut self.axes[axis.into()];
        a.offset = offset;
        a.size = size;
        a.stride = stride;
        a.extra = 0;
        a.flattened_into = None;
        a.hw = None;
    }

    /// Update the current index of an axis (host loop position).
    pub fn set_offset(&mut self, axis: impl Into<usize>, offset: usize) {
        self.axes[axis.into()].offset = offset;
    }

    /// Axis accessor.
    #[must_use]
    pub fn axis(&self, axis: impl Into<usize>) -> &Axis {
        &self.axes[axis.into()]
    }

    /// An axis is active iff it iterates (`size > 1`) and moves the
    /// address (`stride > 0`).
    #[must_use]
    pub fn is_active(&self, axis: impl Into<usize>) -> bool {
        let a = &self.axes[axis.into()];
        a.size > 1 && a.stride > 0
    }

    /// Number of active axes; must not exceed
    /// [`limits::NUM_ARRAY_DIMS`] before a descriptor can be emitted.
    #[must_use]
    pub fn num_active(&self) -> usize {
        (0..N).filter(|&i| self.is_active(i)).count()
    }

    /// Flatten remainder recorded on an axis.
    #[must_use]
    pub fn extra(&self, axis: impl Into<usize>) -> u32 {
        self.axes[axis.into()].extra
    }

    /// Hardware dimension assigned to an axis.
    #[must_use]
    pub fn hw_dim(&self, axis: impl Into<usize>) -> Option<HwDim> {
        self.axes[axis.into()].hw
    }

    /// Fold `outer` into `inner` so one linear counter walks both.
    ///
    /// Requires `stride[outer]` to be an exact multiple of
    /// `stride[inner]`, and the multiple to cover at least
    /// `size[inner]` steps. The shortfall between the multiple and
    /// `size[inner]` becomes the recorded extra-increment remainder:
    /// addresses the linear counter cannot reach on its own, replayed
    /// by the generator each time `outer` logically advances.
    ///
    /// # Errors
    ///
    /// `InvalidRange` when the strides do not nest or the remainder
    /// would be negative; the caller abandons this decomposition.
    pub fn flatten_into(&mut self, outer: impl Into<usize>, inner: impl Into<usize>) -> Result<()> {
        let outer = outer.into();
        let inner = inner.into();
        let (so, si) = (self.axes[outer].stride, self.axes[inner].stride);
        if si == 0 || so % si != 0 {
            return Err(KernelError::invalid_range(format!(
                "flatten: stride {so} of axis {outer} is not a multiple of stride {si} of axis {inner}"
            )));
        }
        let ratio = u32::try_from(so / si).map_err(|_| {
            KernelError::invalid_range(format!("flatten: stride ratio {} overflows", so / si))
        })?;
        let size_inner = self.axes[inner].size;
        if ratio < size_inner {
            return Err(KernelError::invalid_range(format!(
                "flatten: axes overlap (ratio {ratio} < inner size {size_inner})"
            )));
        }
        let extra = ratio - size_inner;
        self.axes[inner].size = (size_inner + extra) * self.axes[outer].size;
        self.axes[outer].size = 1;
        self.axes[outer].extra = extra;
        self.axes[outer].flattened_into = Some(inner);
        Ok(())
    }

    /// Inverse of [`flatten_into`](Self::flatten_into): divide `inner`
    /// back into `group_size` chunks carried by `outer`.
    ///
    /// # Errors
    ///
    /// `InvalidRange` unless `size[inner]` divides exactly into
    /// `group_size` chunks larger than the recorded remainder.
    pub fn split_from(
        &mut self,
        inner: impl Into<usize>,
        outer: impl Into<usize>,
        group_size: u32,
    ) -> Result<()> {
        let inner = inner.into();
        let outer = outer.into();
        if group_size == 0 || self.axes[inner].size % group_size != 0 {
            return Err(KernelError::invalid_range(format!(
                "split: size {} of axis {inner} does not divide into {group_size} chunks",
                self.axes[inner].size
            )));
        }
        let chunk = self.axes[inner].size / group_size;
        let extra = self.axes[outer].extra;
        if chunk <= extra {
            return Err(KernelError::invalid_range(format!(
                "split: chunk {chunk} does not cover remainder {extra}"
            )));
        }
        self.axes[outer].size = group_size;
        self.axes[outer].stride = self.axes[inner].stride * chunk as usize;
        self.axes[outer].extra = 0;
        self.axes[outer].flattened_into = None;
        self.axes[inner].size = chunk - extra;
        Ok(())
    }

    /// Assign hardware dimensions to the active axes in declaration
    /// order and validate the per-dimension bounds.
    ///
    /// # Errors
    ///
    /// `InvalidRange` when more than [`limits::NUM_ARRAY_DIMS`] axes
    /// are active, or an active axis exceeds the dimension count or
    /// stride limits.
    pub fn assign_hw_dims(&mut self) -> Result<()> {
        let mut next = 0;
        for i in 0..N {
            self.axes[i].hw = None;
            if !self.is_active(i) {
                continue;
            }
            let Some(&dim) = HwDim::ALL.get(next) else {
                return Err(KernelError::invalid_range(format!(
                    "{} active axes exceed the {}-dimension descriptor model",
                    self.num_active(),
                    limits::NUM_ARRAY_DIMS
                )));
            };
            let a = &self.axes[i];
            if a.size > limits::MAX_DIM_COUNT {
                return Err(KernelError::invalid_range(format!(
                    "axis {i} size {} exceeds {}",
                    a.size,
                    limits::MAX_DIM_COUNT
                )));
            }
            if a.stride > limits::MAX_DIM_STRIDE as usize {
                return Err(KernelError::invalid_range(format!(
                    "axis {i} stride {} exceeds {}",
                    a.stride,
                    limits::MAX_DIM_STRIDE
                )));
            }
            self.axes[i].hw = Some(dim);
            next += 1;
        }
        Ok(())
    }

    /// Base address of the walk: the sum of `offset * stride` over all
    /// axes, in datatype units.
    #[must_use]
    pub fn flat_offset(&self) -> usize {
        self.axes.iter().map(|a| a.offset * a.stride).sum()
    }

    /// Descriptor dimension table `(count, stride)` in [`HwDim`] order,
    /// from the assignment made by
    /// [`assign_hw_dims`](Self::assign_hw_dims). Unassigned dimensions
    /// are inert.
    #[must_use]
    pub fn dim_specs(&self) -> [(u32, i32); limits::NUM_ARRAY_DIMS] {
        let mut specs = [(1u32, 0i32); limits::NUM_ARRAY_DIMS];
        for a in &self.axes {
            if let Some(dim) = a.hw {
                // Bounds were validated during assignment.
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                {
                    specs[dim.index()] = (a.size, a.stride as i32);
                }
            }
        }
        specs
    }

    /// Load-stream increment dimension for an axis, if it is active.
    #[must_use]
    pub fn stream_dim(&self, axis: impl Into<usize>) -> Option<HwDim> {
        let i = axis.into();
        if self.is_active(i) {
            self.axes[i].hw
        } else {
            None
        }
    }

    /// Emit the loop-completion advance for a logical axis on the most
    /// recently closed loop.
    ///
    /// An active axis advances its own hardware dimension by one step.
    /// An axis that was flattened away advances its target's dimension
    /// by the recorded remainder (the steps the linear counter cannot
    /// take itself), consuming free increment entries on the loop and
    /// spilling into a no-op micro-loop when they run out. Inert axes
    /// emit nothing.
    pub fn advance(&self, ctx: &mut ProgramContext<'_>, array: ArrayId, axis: impl Into<usize>) {
        let i = axis.into();
        let a = &self.axes[i];
        if self.is_active(i) {
            if let Some(dim) = a.hw {
                ctx.postloop_incr(array, dim);
            }
        } else if let Some(target) = a.flattened_into {
            if a.extra > 0 {
                if let Some(dim) = self.axes[target].hw {
                    ctx.postloop_incr_by(array, dim, a.extra);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A walk with four axes, indexed 0..=3.
    type Space = IterationSpace<4>;

    #[test]
    fn activity_needs_size_and_stride() {
        let mut s = Space::new();
        s.set(0usize, 0, 4, 0); // moves nothing
        s.set(1usize, 0, 1, 8); // iterates nothing
        s.set(2usize, 0, 3, 2);
        assert!(!s.is_active(0usize));
        assert!(!s.is_active(1usize));
        assert!(s.is_active(2usize));
        assert_eq!(s.num_active(), 1);
    }

    #[test]
    fn flatten_computes_remainder() {
        // inner: 3 steps of stride 2 (covers 6 units); outer strides 8,
        // so each outer step leaves a gap of 1 inner step.
        let mut s = Space::new();
        s.set(0usize, 0, 5, 8);
        s.set(1usize, 0, 3, 2);
        s.flatten_into(0usize, 1usize).unwrap();
        assert_eq!(s.extra(0usize), 1);
        assert_eq!(s.axis(1usize).size, (3 + 1) * 5);
        assert_eq!(s.axis(0usize).size, 1);
    }

    #[test]
    fn flatten_rejects_non_nesting_strides() {
        let mut s = Space::new();
        s.set(0usize, 0, 4, 7);
        s.set(1usize, 0, 3, 2);
        assert!(s.flatten_into(0usize, 1usize).is_err());
    }

    #[test]
    fn flatten_rejects_overlapping_axes() {
        // outer stride 4 covers only 2 inner steps but inner size is 3.
        let mut s = Space::new();
        s.set(0usize, 0, 4, 4);
        s.set(1usize, 0, 3, 2);
        assert!(s.flatten_into(0usize, 1usize).is_err());
    }

    #[test]
    fn split_undoes_flatten() {
        let mut s = Space::new();
        s.set(0usize, 0, 5, 8);
        s.set(1usize, 0, 3, 2);
        s.flatten_into(0usize, 1usize).unwrap();
        s.split_from(1usize, 0usize, 5).unwrap();
        assert_eq!(s.axis(0usize).size, 5);
        assert_eq!(s.axis(0usize).stride, 8);
        assert_eq!(s.axis(1usize).size, 3);
        assert_eq!(s.axis(1usize).stride, 2);
        assert_eq!(s.extra(0usize), 0);
    }

    #[test]
    fn assign_respects_dimension_budget() {
        let mut s = Space::new();
        s.set(0usize, 0, 2, 100);
        s.set(1usize, 0, 2, 10);
        s.set(2usize, 0, 2, 1);
        s.assign_hw_dims().unwrap();
        assert_eq!(s.hw_dim(0usize), Some(HwDim::Vec));
        assert_eq!(s.hw_dim(1usize), Some(HwDim::Row));
        assert_eq!(s.hw_dim(2usize), Some(HwDim::Col));

        s.set(3usize, 0, 2, 1000);
        let err = s.assign_hw_dims().unwrap_err();
        assert!(matches!(err, KernelError::InvalidRange { .. }));
    }

    #[test]
    fn assign_validates_count_and_stride_limits() {
        let mut s = Space::new();
        s.set(0usize, 0, limits::MAX_DIM_COUNT + 1, 1);
        assert!(s.assign_hw_dims().is_err());

        let mut s = Space::new();
        s.set(0usize, 0, 2, limits::MAX_DIM_STRIDE as usize + 1);
        assert!(s.assign_hw_dims().is_err());
    }

    #[test]
    fn flat_offset_sums_all_axes() {
        let mut s = Space::new();
        s.set(0usize, 2, 1, 100); // host axis at index 2
        s.set(1usize, 3, 4, 10);
        s.set(2usize, 1, 2, 1);
        assert_eq!(s.flat_offset(), 2 * 100 + 3 * 10 + 1);
    }

    #[test]
    fn inert_axes_stay_unassigned() {
        let mut s = Space::new();
        s.set(0usize, 4, 1, 100); // host axis
        s.set(1usize, 0, 6, 1);
        s.assign_hw_dims().unwrap();
        assert_eq!(s.hw_dim(0usize), None);
        assert_eq!(s.hw_dim(1usize), Some(HwDim::Vec));
        let specs = s.dim_specs();
        assert_eq!(specs[0], (6, 1));
        assert_eq!(specs[1], (1, 0));
    }
}
