// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Render-pass descriptions.

A [`RenderPass`] is the immutable input to the scheduler: the attachments the pass touches, and
the logical subpasses that read and write them.  Descriptions are validated once in
[`RenderPass::new`], so the scheduler can treat any malformed index as a broken invariant.

# Example

```
use pvr_hwpass::pass::{Attachment, LoadOp, RenderPass, StoreOp, Subpass};
use pvr_hwpass::pixel_formats::PixelFormat;

let color = Attachment::new(PixelFormat::RGBA8UNorm)
    .with_load_op(LoadOp::Clear)
    .with_store_op(StoreOp::Store);
let pass = RenderPass::new(vec![color], vec![Subpass::new(1).with_color(0)], 0).unwrap();
assert_eq!(pass.subpasses().len(), 1);
```
*/

use crate::error::PassError;
use crate::pixel_formats::{Aspects, PixelFormat};

/// What happens to an attachment's contents when a render first touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    /// Read the previous contents from memory.
    Load,
    /// Fill with the clear value.
    Clear,
    /// Contents are undefined.
    DontCare,
}

/// What happens to an attachment's contents at the end of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// One attachment of a render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub format: PixelFormat,
    pub sample_count: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    /// Whether the pixel back-end can resolve this attachment.  Defaults from the format.
    pub is_pbe_downscalable: bool,
}

impl Attachment {
    /// A single-sampled attachment whose contents are neither loaded nor stored.
    pub fn new(format: PixelFormat) -> Self {
        Attachment {
            format,
            sample_count: 1,
            load_op: LoadOp::DontCare,
            store_op: StoreOp::DontCare,
            stencil_load_op: LoadOp::DontCare,
            stencil_store_op: StoreOp::DontCare,
            is_pbe_downscalable: format.is_pbe_downscalable(),
        }
    }

    pub fn with_load_op(mut self, load_op: LoadOp) -> Self {
        self.load_op = load_op;
        self
    }

    pub fn with_store_op(mut self, store_op: StoreOp) -> Self {
        self.store_op = store_op;
        self
    }

    pub fn with_stencil_ops(mut self, load_op: LoadOp, store_op: StoreOp) -> Self {
        self.stencil_load_op = load_op;
        self.stencil_store_op = store_op;
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    pub fn with_pbe_downscalable(mut self, downscalable: bool) -> Self {
        self.is_pbe_downscalable = downscalable;
        self
    }

    pub fn aspects(&self) -> Aspects {
        self.format.aspects()
    }

    /// Dwords of on-chip color storage one pixel needs.
    pub fn dwords_per_pixel(&self) -> u32 {
        self.format.dwords_per_pixel()
    }
}

/// An edge in the subpass dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubpassDependency {
    /// The subpass that must be scheduled first.
    pub subpass: usize,
    /// When set, the two subpasses must not share a hardware render.
    pub flush: bool,
}

/// One logical subpass.
///
/// `None` entries in the attachment lists are unused slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subpass {
    pub color_attachments: Vec<Option<usize>>,
    /// When present, has one entry per color slot.
    pub resolve_attachments: Option<Vec<Option<usize>>>,
    pub input_attachments: Vec<Option<usize>>,
    pub depth_stencil_attachment: Option<usize>,
    pub sample_count: u32,
    pub dependencies: Vec<SubpassDependency>,
}

impl Subpass {
    pub fn new(sample_count: u32) -> Self {
        Subpass {
            color_attachments: Vec::new(),
            resolve_attachments: None,
            input_attachments: Vec::new(),
            depth_stencil_attachment: None,
            sample_count,
            dependencies: Vec::new(),
        }
    }

    fn push_color(mut self, color: Option<usize>, resolve: Option<usize>) -> Self {
        self.color_attachments.push(color);
        if resolve.is_some() && self.resolve_attachments.is_none() {
            self.resolve_attachments = Some(vec![None; self.color_attachments.len() - 1]);
        }
        if let Some(resolves) = &mut self.resolve_attachments {
            resolves.push(resolve);
        }
        self
    }

    pub fn with_color(self, attachment: usize) -> Self {
        self.push_color(Some(attachment), None)
    }

    /// Adds an unused color slot.
    pub fn with_unused_color(self) -> Self {
        self.push_color(None, None)
    }

    /// Adds a color attachment that is resolved into `resolve` at the end of its render.
    pub fn with_resolved_color(self, attachment: usize, resolve: usize) -> Self {
        self.push_color(Some(attachment), Some(resolve))
    }

    pub fn with_input(mut self, attachment: usize) -> Self {
        self.input_attachments.push(Some(attachment));
        self
    }

    pub fn with_unused_input(mut self) -> Self {
        self.input_attachments.push(None);
        self
    }

    pub fn with_depth_stencil(mut self, attachment: usize) -> Self {
        self.depth_stencil_attachment = Some(attachment);
        self
    }

    pub fn with_dependency(mut self, subpass: usize) -> Self {
        self.dependencies.push(SubpassDependency {
            subpass,
            flush: false,
        });
        self
    }

    /// Adds a dependency that also forbids merging the two subpasses into one render.
    pub fn with_flushing_dependency(mut self, subpass: usize) -> Self {
        self.dependencies.push(SubpassDependency {
            subpass,
            flush: true,
        });
        self
    }

    /// Resolve target for color slot `slot`, if any.
    pub fn resolve_for(&self, slot: usize) -> Option<usize> {
        self.resolve_attachments
            .as_ref()
            .and_then(|resolves| resolves.get(slot).copied().flatten())
    }

    /// Used color attachments, in slot order.
    pub fn colors(&self) -> impl Iterator<Item = usize> + '_ {
        self.color_attachments.iter().flatten().copied()
    }

    /// Used input attachments, in slot order.
    pub fn inputs(&self) -> impl Iterator<Item = usize> + '_ {
        self.input_attachments.iter().flatten().copied()
    }

    /// Whether `attachment` is read as an input attachment.
    pub fn is_input(&self, attachment: usize) -> bool {
        self.inputs().any(|input| input == attachment)
    }

    /// `(slot, source, destination)` for each resolved color slot.
    pub fn resolves(&self) -> impl Iterator<Item = (usize, usize, usize)> + '_ {
        self.color_attachments
            .iter()
            .enumerate()
            .filter_map(|(slot, color)| Some((slot, (*color)?, self.resolve_for(slot)?)))
    }
}

/// A validated render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPass {
    attachments: Vec<Attachment>,
    subpasses: Vec<Subpass>,
    max_tilebuffer_count: u32,
}

impl RenderPass {
    /// Validates and builds a render pass.
    ///
    /// `max_tilebuffer_count` bounds how many tile buffers any single hardware render may use.
    pub fn new(
        attachments: Vec<Attachment>,
        subpasses: Vec<Subpass>,
        max_tilebuffer_count: u32,
    ) -> Result<Self, PassError> {
        if attachments.iter().any(|a| a.sample_count == 0) {
            return Err(PassError::ZeroSampleCount("attachment"));
        }
        for (index, subpass) in subpasses.iter().enumerate() {
            validate_subpass(index, subpass, &attachments, subpasses.len())?;
        }
        check_acyclic(&subpasses)?;
        Ok(RenderPass {
            attachments,
            subpasses,
            max_tilebuffer_count,
        })
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn subpasses(&self) -> &[Subpass] {
        &self.subpasses
    }

    pub fn max_tilebuffer_count(&self) -> u32 {
        self.max_tilebuffer_count
    }
}

fn validate_subpass(
    index: usize,
    subpass: &Subpass,
    attachments: &[Attachment],
    subpass_count: usize,
) -> Result<(), PassError> {
    if subpass.sample_count == 0 {
        return Err(PassError::ZeroSampleCount("subpass"));
    }
    let in_range = |attachment: usize| {
        if attachment < attachments.len() {
            Ok(())
        } else {
            Err(PassError::AttachmentOutOfRange {
                subpass: index,
                attachment,
                count: attachments.len(),
            })
        }
    };

    for (slot, color) in subpass.colors().enumerate() {
        in_range(color)?;
        if attachments[color].aspects().is_depth_or_stencil() {
            return Err(PassError::DepthStencilAsColor {
                subpass: index,
                attachment: color,
            });
        }
        if subpass.colors().take(slot).any(|other| other == color) {
            return Err(PassError::DuplicateColorAttachment {
                subpass: index,
                attachment: color,
            });
        }
    }
    for input in subpass.inputs() {
        in_range(input)?;
    }
    if let Some(ds) = subpass.depth_stencil_attachment {
        in_range(ds)?;
        if !attachments[ds].aspects().is_depth_or_stencil() {
            return Err(PassError::NotDepthStencil {
                subpass: index,
                attachment: ds,
            });
        }
    }

    if let Some(resolves) = &subpass.resolve_attachments {
        if resolves.len() != subpass.color_attachments.len() {
            return Err(PassError::ResolveCountMismatch {
                subpass: index,
                resolves: resolves.len(),
                colors: subpass.color_attachments.len(),
            });
        }
        for (slot, resolve) in resolves.iter().enumerate() {
            let Some(resolve) = *resolve else { continue };
            in_range(resolve)?;
            if subpass.color_attachments[slot].is_none() {
                return Err(PassError::ResolveOfUnusedColor {
                    subpass: index,
                    slot,
                });
            }
            let clashes = attachments[resolve].aspects().is_depth_or_stencil()
                || subpass.colors().any(|color| color == resolve)
                || subpass.is_input(resolve)
                || subpass.depth_stencil_attachment == Some(resolve)
                || resolves[..slot].contains(&Some(resolve));
            if clashes {
                return Err(PassError::InvalidResolveDestination {
                    subpass: index,
                    attachment: resolve,
                });
            }
        }
    }

    for dependency in &subpass.dependencies {
        if dependency.subpass >= subpass_count {
            return Err(PassError::DependencyOutOfRange {
                subpass: index,
                dependency: dependency.subpass,
                count: subpass_count,
            });
        }
        if dependency.subpass == index {
            return Err(PassError::SelfDependency(index));
        }
    }
    Ok(())
}

/// Kahn's algorithm over the dependency lists; reports a subpass left on a cycle.
fn check_acyclic(subpasses: &[Subpass]) -> Result<(), PassError> {
    let mut in_count: Vec<usize> = subpasses.iter().map(|s| s.dependencies.len()).collect();
    let mut dependents = vec![Vec::new(); subpasses.len()];
    for (index, subpass) in subpasses.iter().enumerate() {
        for dependency in &subpass.dependencies {
            dependents[dependency.subpass].push(index);
        }
    }
    let mut ready: Vec<usize> = (0..subpasses.len()).filter(|&i| in_count[i] == 0).collect();
    let mut visited = 0;
    while let Some(index) = ready.pop() {
        visited += 1;
        for &dependent in &dependents[index] {
            in_count[dependent] -= 1;
            if in_count[dependent] == 0 {
                ready.push(dependent);
            }
        }
    }
    if visited == subpasses.len() {
        Ok(())
    } else {
        let stuck = in_count
            .iter()
            .position(|&count| count > 0)
            .expect("unvisited subpass has pending dependencies");
        Err(PassError::DependencyCycle(stuck))
    }
}
