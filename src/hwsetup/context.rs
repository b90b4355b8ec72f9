// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! State shared by the merge and close steps while a pass is scheduled.

use crate::device::DeviceInfo;
use crate::error::{Error, try_filled, try_push};
use crate::hwsetup::alloc::Alloc;
use crate::hwsetup::attachment::{AttachmentState, init_attachments};
use crate::hwsetup::output::{HwRender, HwSetup, Storage, SubpassMapping};
use crate::pass::RenderPass;

/// Scheduling state of one subpass placed in the open render.
#[derive(Debug)]
pub(crate) struct RenderSubpass {
    /// Index in the render pass.
    pub(crate) input: usize,
    /// The subpass writes a depth value that is replicated into color storage.
    pub(crate) z_replicate: bool,
    /// Storage in use while the subpass runs.
    pub(crate) alloc: Alloc,
}

/// The render subpasses are currently merged into.
#[derive(Debug)]
pub(crate) struct OpenRender {
    pub(crate) hw: HwRender,
    /// Parallel to `hw.subpasses`.
    pub(crate) subpasses: Vec<RenderSubpass>,
}

impl OpenRender {
    pub(crate) fn new(sample_count: u32) -> Self {
        OpenRender {
            hw: HwRender::new(sample_count),
            subpasses: Vec::new(),
        }
    }
}

pub(crate) struct Context<'a> {
    pub(crate) device: &'a DeviceInfo,
    pub(crate) pass: &'a RenderPass,
    pub(crate) attachments: Vec<AttachmentState>,
    /// Closed renders.
    pub(crate) renders: Vec<HwRender>,
    pub(crate) surface_allocate: Vec<bool>,
    pub(crate) subpass_map: Vec<Option<SubpassMapping>>,
    pub(crate) render: Option<OpenRender>,
    /// Storage in use in the open render.
    pub(crate) alloc: Alloc,
    /// Attachment currently holding the on-chip depth/stencil.
    pub(crate) ds_attachment: Option<usize>,
    /// Attachments holding on-chip color storage, in the order they got it.
    pub(crate) active: Vec<usize>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(device: &'a DeviceInfo, pass: &'a RenderPass) -> Result<Self, Error> {
        Ok(Context {
            device,
            pass,
            attachments: init_attachments(pass)?,
            renders: Vec::new(),
            surface_allocate: try_filled(pass.attachments().len(), false)?,
            subpass_map: try_filled(pass.subpasses().len(), None)?,
            render: None,
            alloc: Alloc::default(),
            ds_attachment: None,
            active: Vec::new(),
        })
    }

    /// Index of the open render, or of the last closed one when none is open.
    pub(crate) fn current_render_index(&self) -> Option<usize> {
        if self.render.is_some() {
            Some(self.renders.len())
        } else {
            self.renders.len().checked_sub(1)
        }
    }

    pub(crate) fn open_render(&mut self) -> &mut OpenRender {
        self.render.as_mut().expect("no render is open")
    }

    /// Device memory must back `attachment`.
    pub(crate) fn mark_surface_alloc(&mut self, attachment: usize) {
        self.surface_allocate[attachment] = true;
    }

    pub(crate) fn make_surface_active(
        &mut self,
        attachment: usize,
        subpass_num: usize,
    ) -> Result<(), Error> {
        let state = &mut self.attachments[attachment];
        assert!(
            state.first_use.is_none(),
            "attachment {attachment} made resident twice in one render"
        );
        state.first_use = Some(subpass_num);
        try_push(&mut self.active, attachment)
    }

    pub(crate) fn free_surface_storage(&mut self, attachment: usize) {
        let state = &mut self.attachments[attachment];
        assert!(
            state.is_resident(),
            "attachment {attachment} has no storage to free"
        );
        self.alloc.free(state.storage(), state.dwords);
        state.resource.storage = Storage::Unallocated;
        let position = self
            .active
            .iter()
            .position(|&a| a == attachment)
            .expect("resident attachment missing from the active list");
        self.active.remove(position);
    }

    pub(crate) fn reset_surface(&mut self, attachment: usize) {
        let state = &mut self.attachments[attachment];
        state.first_use = None;
        state.last_use = None;
        state.z_replicate = false;
        self.free_surface_storage(attachment);
    }

    /// Drops one pending use, releasing the storage after the last one.
    pub(crate) fn dereference(&mut self, attachment: usize, subpass_num: usize) {
        let state = &mut self.attachments[attachment];
        if state.take_use(subpass_num) && state.is_resident() {
            self.free_surface_storage(attachment);
        }
    }

    /// Forgets the per-render state after a close.
    pub(crate) fn reset_render(&mut self) {
        assert!(
            self.active.is_empty(),
            "attachments still resident after the render closed"
        );
        self.render = None;
        self.ds_attachment = None;
        self.alloc = Alloc::default();
    }

    pub(crate) fn finish(self) -> Result<HwSetup, Error> {
        assert!(self.render.is_none(), "render left open");
        let mut subpass_map = Vec::new();
        subpass_map.try_reserve_exact(self.subpass_map.len())?;
        subpass_map.extend(
            self.subpass_map
                .iter()
                .map(|mapping| mapping.expect("every subpass is scheduled")),
        );
        Ok(HwSetup {
            renders: self.renders,
            surface_allocate: self.surface_allocate,
            subpass_map,
            tile_buffer_size: self.device.tile_buffer_size(),
        })
    }
}
