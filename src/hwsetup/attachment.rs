// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Per-attachment scheduling state.

use crate::error::{Error, try_push};
use crate::hwsetup::output::{MrtResource, Storage};
use crate::pass::{Attachment, LoadOp, RenderPass, StoreOp, Subpass};

/// Mutable view of one attachment while the pass is being scheduled.
#[derive(Debug, Clone)]
pub(crate) struct AttachmentState {
    /// Op to use the next time the attachment becomes resident.
    pub(crate) load_op: LoadOp,
    pub(crate) stencil_load_op: LoadOp,
    /// Uses in subpasses not yet scheduled, plus one if the pass stores it.
    pub(crate) remaining_count: u32,
    pub(crate) stencil_remaining_count: u32,
    /// On-chip location plus the format details the encoder needs.
    pub(crate) resource: MrtResource,
    /// Subpass within the open render where the attachment became resident.
    pub(crate) first_use: Option<usize>,
    /// Subpass within the open render where the attachment was last referenced.
    pub(crate) last_use: Option<usize>,
    /// Last subpass (in pass order) that reads the attachment; `subpass_count` if stored.
    pub(crate) last_read: Option<usize>,
    /// Position in the render's EOT resources while the render is closing.
    pub(crate) mrt_index: Option<usize>,
    pub(crate) last_resolve_src_render: Option<usize>,
    pub(crate) last_resolve_dst_render: Option<usize>,
    /// The on-chip storage holds a replicated depth value.
    pub(crate) z_replicate: bool,
    pub(crate) is_pbe_downscalable: bool,
    pub(crate) has_stencil: bool,
    pub(crate) dwords: u32,
    pub(crate) eot_surface_required: bool,
}

impl AttachmentState {
    pub(crate) fn new(attachment: &Attachment) -> Self {
        AttachmentState {
            load_op: attachment.load_op,
            stencil_load_op: attachment.stencil_load_op,
            remaining_count: 0,
            stencil_remaining_count: 0,
            resource: MrtResource::for_attachment(attachment, Storage::Unallocated),
            first_use: None,
            last_use: None,
            last_read: None,
            mrt_index: None,
            last_resolve_src_render: None,
            last_resolve_dst_render: None,
            z_replicate: false,
            is_pbe_downscalable: attachment.is_pbe_downscalable,
            has_stencil: attachment.aspects().contains_stencil(),
            dwords: attachment.dwords_per_pixel(),
            eot_surface_required: false,
        }
    }

    pub(crate) fn storage(&self) -> Storage {
        self.resource.storage
    }

    pub(crate) fn is_resident(&self) -> bool {
        self.resource.storage.is_allocated()
    }

    /// Takes away one pending use.  Returns true when this was the last one.
    ///
    /// # Panics
    /// If the attachment had no uses left.
    pub(crate) fn take_use(&mut self, subpass_num: usize) -> bool {
        self.remaining_count = self
            .remaining_count
            .checked_sub(1)
            .expect("attachment dereferenced more often than it is used");
        let last = self.remaining_count == 0;
        if last && self.first_use.is_some() {
            self.last_use = Some(subpass_num);
        }
        if self.has_stencil {
            self.stencil_remaining_count = self
                .stencil_remaining_count
                .checked_sub(1)
                .expect("stencil dereferenced more often than it is used");
        }
        last
    }
}

/// Color outputs of `subpass` naming `attachment`; a resolved color counts twice.
fn color_output_uses(subpass: &Subpass, attachment: usize) -> u32 {
    subpass
        .color_attachments
        .iter()
        .enumerate()
        .filter(|(_, color)| **color == Some(attachment))
        .map(|(slot, _)| if subpass.resolve_for(slot).is_some() { 2 } else { 1 })
        .sum()
}

/// Builds the starting state of every attachment by counting its uses across the pass.
pub(crate) fn init_attachments(pass: &RenderPass) -> Result<Vec<AttachmentState>, Error> {
    let subpass_count = pass.subpasses().len();
    let mut states = Vec::new();
    states.try_reserve_exact(pass.attachments().len())?;
    for (index, attachment) in pass.attachments().iter().enumerate() {
        let mut state = AttachmentState::new(attachment);
        for (subpass_index, subpass) in pass.subpasses().iter().enumerate() {
            let color_uses = color_output_uses(subpass, index);
            let input_uses = subpass.inputs().filter(|&i| i == index).count() as u32;
            if color_uses + input_uses != 0 {
                state.last_read = Some(subpass_index);
            }
            state.remaining_count += color_uses + input_uses;
            if subpass.depth_stencil_attachment == Some(index) {
                state.remaining_count += 1;
            }
        }
        if state.has_stencil {
            state.stencil_remaining_count = state.remaining_count;
            if attachment.stencil_store_op == StoreOp::Store {
                state.stencil_remaining_count += 1;
            }
        }
        if attachment.store_op == StoreOp::Store {
            state.remaining_count += 1;
            state.last_read = Some(subpass_count);
        }
        try_push(&mut states, state)?;
    }
    Ok(states)
}
