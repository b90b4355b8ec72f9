// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Error types for building a hardware setup.
//!
//! Two families of errors exist:
//!
//! - [`PassError`] is reported while constructing a [`crate::pass::RenderPass`], when the
//!   description itself is malformed (bad indices, dependency cycles, ...).
//! - [`Error`] is reported by [`crate::hwsetup::create_renderpass_hwsetup`] when a valid pass
//!   cannot be scheduled with the available resources.
//!
//! Everything else the scheduler detects is a broken invariant and panics.

use std::collections::TryReserveError;

/// Which hardware budget was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Budget {
    /// More tile buffers than the render pass allows.
    TileBuffers,
    /// More end-of-tile surfaces than the EOT program can write.
    EotSurfaces,
    /// More simultaneous pixel back-end emits than there are emit registers.
    PbeEmits,
    /// A single pixel is wider than the pixel output registers.
    OutputRegisters,
}

/// Failure while scheduling a render pass onto hardware renders.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Out of host memory {0}")]
    OutOfHostMemory(#[from] TryReserveError),
    #[error("Too many objects: {0:?} budget exceeded")]
    TooManyObjects(Budget),
}

/// A render-pass description that can't be scheduled at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PassError {
    #[error("Subpass {subpass} references attachment {attachment}, but the pass has {count} attachments")]
    AttachmentOutOfRange {
        subpass: usize,
        attachment: usize,
        count: usize,
    },
    #[error("Subpass {subpass} uses attachment {attachment} as a color attachment more than once")]
    DuplicateColorAttachment { subpass: usize, attachment: usize },
    #[error("Subpass {subpass} has {resolves} resolve attachments for {colors} color attachments")]
    ResolveCountMismatch {
        subpass: usize,
        resolves: usize,
        colors: usize,
    },
    #[error("Subpass {subpass} resolves an unused color attachment slot {slot}")]
    ResolveOfUnusedColor { subpass: usize, slot: usize },
    #[error("Subpass {subpass} can't resolve into attachment {attachment}")]
    InvalidResolveDestination { subpass: usize, attachment: usize },
    #[error("Subpass {subpass} depends on subpass {dependency}, but the pass has {count} subpasses")]
    DependencyOutOfRange {
        subpass: usize,
        dependency: usize,
        count: usize,
    },
    #[error("Subpass {0} depends on itself")]
    SelfDependency(usize),
    #[error("Subpass dependencies form a cycle through subpass {0}")]
    DependencyCycle(usize),
    #[error("Sample count of {0} must be nonzero")]
    ZeroSampleCount(&'static str),
    #[error("Subpass {subpass} uses attachment {attachment} as depth/stencil but it has no depth or stencil aspect")]
    NotDepthStencil { subpass: usize, attachment: usize },
    #[error("Subpass {subpass} uses depth/stencil attachment {attachment} as a color attachment")]
    DepthStencilAsColor { subpass: usize, attachment: usize },
}

/// Pushes onto a vec, reporting allocation failure instead of aborting.
pub(crate) fn try_push<T>(vec: &mut Vec<T>, value: T) -> Result<(), Error> {
    vec.try_reserve(1)?;
    vec.push(value);
    Ok(())
}

/// Builds a vec of `len` copies of `value`, reporting allocation failure instead of aborting.
pub(crate) fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>, Error> {
    let mut vec = Vec::new();
    vec.try_reserve_exact(len)?;
    vec.resize(len, value);
    Ok(vec)
}
