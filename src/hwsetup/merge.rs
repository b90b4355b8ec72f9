// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Folding subpasses into the open render.
//!
//! For each subpass the scheduler first asks whether it can join the open render at all (matching
//! sample counts, no depth/stencil conflict, no pending resolve, enough emit registers), then tries
//! to find storage for its new color outputs and for any depth value it reads as an input
//! attachment.  Failure of either closes the render and places the subpass in a fresh one.

use smallvec::SmallVec;

use crate::error::{Budget, Error, try_filled, try_push};
use crate::hwsetup::PBE_EMIT_REGS;
use crate::hwsetup::alloc::Alloc;
use crate::hwsetup::attachment::AttachmentState;
use crate::hwsetup::context::{Context, OpenRender, RenderSubpass};
use crate::hwsetup::output::{HwSubpass, InputAccess, MrtResource, MrtSetup, Storage};
use crate::pass::{LoadOp, Subpass};

/// How the incoming subpass relates to on-chip depth.
#[derive(Debug, Clone, Copy)]
struct DepthParams {
    /// Depth/stencil attachment of the open render.
    existing_ds: Option<usize>,
    /// The open render's depth is read as an input attachment by the incoming subpass.
    existing_ds_is_input: bool,
    /// The incoming subpass reads its own depth as an input attachment.
    incoming_ds_is_input: bool,
}

/// Storage found for a subpass that has not been committed yet.
#[derive(Debug)]
struct Candidate {
    /// Storage in use once the subpass is added.
    alloc: Alloc,
    /// Per color slot: new storage, or unallocated when the attachment is already resident.
    color: Vec<Storage>,
    existing_zrep: Storage,
    incoming_zrep: Storage,
}

impl Context<'_> {
    /// Index of the first subpass in the open render that writes `attachment` as depth/stencil.
    fn first_ds_write(&self, attachment: usize) -> Option<usize> {
        let render = self.render.as_ref()?;
        render.subpasses.iter().position(|subpass| {
            self.pass.subpasses()[subpass.input].depth_stencil_attachment == Some(attachment)
        })
    }

    /// Finds color storage for a depth value replicated from its first write to now.
    fn z_replicate_space_available(
        &self,
        alloc: &mut Alloc,
        attachment: usize,
    ) -> Result<Storage, Error> {
        let state = &self.attachments[attachment];
        if state.z_replicate {
            assert!(state.is_resident(), "replicated depth has no storage");
            return Ok(Storage::Unallocated);
        }

        // the storage must be free in every subpass since the depth was first written
        let mut combined = alloc.try_clone()?;
        if let Some(render) = &self.render {
            let first = self
                .first_ds_write(attachment)
                .unwrap_or(render.subpasses.len());
            for subpass in &render.subpasses[first..] {
                combined.merge(&subpass.alloc)?;
            }
        }
        let storage = combined.alloc_color_storage(
            self.device,
            self.pass.max_tilebuffer_count(),
            state.dwords,
        )?;
        alloc.mark_allocated(storage, state.dwords)?;
        Ok(storage)
    }

    /// Finds storage for the subpass's new color outputs and depth replicates.
    fn subpass_space_available(
        &self,
        subpass: &Subpass,
        depth: &DepthParams,
    ) -> Result<Candidate, Error> {
        let mut alloc = self.alloc.try_clone()?;
        let mut color = try_filled(subpass.color_attachments.len(), Storage::Unallocated)?;

        for (slot, attachment) in subpass.color_attachments.iter().enumerate() {
            let Some(attachment) = *attachment else {
                continue;
            };
            let state = &self.attachments[attachment];
            if state.is_resident() {
                continue;
            }
            let storage = alloc.alloc_color_storage(
                self.device,
                self.pass.max_tilebuffer_count(),
                state.dwords,
            )?;
            // tile buffers cost more than a second render
            if self.render.is_some() && !matches!(storage, Storage::OutputReg { .. }) {
                logwise::warn_sync!(
                    "attachment {attachment} would spill to a tile buffer; not merging",
                    attachment = attachment
                );
                return Err(Error::TooManyObjects(Budget::TileBuffers));
            }
            color[slot] = storage;
        }

        let mut existing_zrep = Storage::Unallocated;
        let mut incoming_zrep = Storage::Unallocated;
        if depth.existing_ds_is_input {
            let existing = depth.existing_ds.expect("existing depth read as input");
            existing_zrep = self.z_replicate_space_available(&mut alloc, existing)?;
        }
        if depth.incoming_ds_is_input {
            let incoming = subpass
                .depth_stencil_attachment
                .expect("incoming depth read as input");
            if depth.existing_ds == Some(incoming) {
                incoming_zrep = existing_zrep;
            } else {
                incoming_zrep = self.z_replicate_space_available(&mut alloc, incoming)?;
            }
        }

        Ok(Candidate {
            alloc,
            color,
            existing_zrep,
            incoming_zrep,
        })
    }

    /// Whether the render can bind only one depth/stencil surface for loads and stores.
    fn render_binds_ds(&self) -> bool {
        let Some(render) = &self.render else {
            return false;
        };
        if render.hw.ds_attachment.is_some() {
            return true;
        }
        // the first depth clear in a render is hoisted to render level at close
        render
            .subpasses
            .iter()
            .zip(&render.hw.subpasses)
            .find(|(subpass, _)| {
                self.pass.subpasses()[subpass.input]
                    .depth_stencil_attachment
                    .is_some()
            })
            .is_some_and(|(_, hw)| hw.depth_init_op == LoadOp::Clear || hw.stencil_clear)
    }

    /// Whether switching the on-chip depth/stencil to `incoming` loses data.
    fn depth_zls_conflict(&self, incoming: Option<usize>, existing_ds_is_input: bool) -> bool {
        let (Some(existing), Some(incoming)) = (self.ds_attachment, incoming) else {
            return false;
        };
        if existing == incoming {
            return false;
        }
        let existing = &self.attachments[existing];
        let incoming = &self.attachments[incoming];

        // a single remaining read as an input can be served from a replicate
        if existing.remaining_count > 0
            && !(existing_ds_is_input && existing.remaining_count == 1)
        {
            return true;
        }
        if existing.has_stencil && existing.stencil_remaining_count > 0 {
            return true;
        }
        // can't load mid-render
        if incoming.load_op == LoadOp::Load {
            return true;
        }
        if incoming.has_stencil && incoming.stencil_load_op == LoadOp::Load {
            return true;
        }
        let outlives_subpass = incoming.remaining_count > 1
            || (incoming.has_stencil && incoming.stencil_remaining_count > 1);
        outlives_subpass && self.render_binds_ds()
    }

    fn is_pending_resolve_dst(&self, attachment: usize) -> bool {
        let last = self.attachments[attachment].last_resolve_dst_render;
        last.is_some() && last == self.current_render_index()
    }

    fn is_pending_resolve_src(&self, attachment: usize) -> bool {
        let last = self.attachments[attachment].last_resolve_src_render;
        last.is_some() && last == self.current_render_index()
    }

    /// Whether the render's live color outputs plus the subpass's would need too many emits.
    fn exceeds_pbe_registers(&self, render: &OpenRender, subpass: &Subpass, index: usize) -> bool {
        let is_live = |state: &AttachmentState| state.last_read.is_some_and(|read| read > index);
        let mut live: SmallVec<[usize; PBE_EMIT_REGS as usize]> = SmallVec::new();
        for placed in &render.subpasses {
            for color in self.pass.subpasses()[placed.input].colors() {
                if is_live(&self.attachments[color]) && !live.contains(&color) {
                    live.push(color);
                }
            }
        }
        for color in subpass.colors() {
            if is_live(&self.attachments[color]) && !live.contains(&color) {
                if live.len() >= PBE_EMIT_REGS as usize {
                    return true;
                }
                live.push(color);
            }
        }
        false
    }

    /// Why the subpass can't join the open render, if anything stops it.
    fn combine_conflict(
        &self,
        subpass: &Subpass,
        index: usize,
        depth: &DepthParams,
    ) -> Option<&'static str> {
        // stencil can't be replicated
        if depth.existing_ds_is_input {
            let existing = depth.existing_ds.expect("existing depth read as input");
            if self.attachments[existing].has_stencil {
                return Some("existing stencil read as input");
            }
        }
        if depth.incoming_ds_is_input && self.render.is_some() {
            let incoming = subpass
                .depth_stencil_attachment
                .expect("incoming depth read as input");
            if self.attachments[incoming].has_stencil {
                return Some("incoming stencil read as input");
            }
        }
        if let Some(render) = &self.render {
            if render.hw.sample_count != subpass.sample_count {
                return Some("sample count differs");
            }
        }
        if self.depth_zls_conflict(subpass.depth_stencil_attachment, depth.existing_ds_is_input) {
            return Some("depth/stencil conflict");
        }
        let current = self.current_render_index();
        for dependency in subpass.dependencies.iter().filter(|d| d.flush) {
            let placed = self.subpass_map[dependency.subpass].map(|mapping| mapping.render);
            if placed.is_some() && placed == current {
                return Some("flushing dependency");
            }
        }
        if subpass.inputs().any(|input| self.is_pending_resolve_dst(input)) {
            return Some("input is a pending resolve destination");
        }
        if subpass
            .colors()
            .any(|color| self.is_pending_resolve_dst(color) || self.is_pending_resolve_src(color))
        {
            return Some("color is part of a pending resolve");
        }
        for (_, _, dst) in subpass.resolves() {
            if self.is_pending_resolve_dst(dst) {
                return Some("resolve destination already pending");
            }
            if self.attachments[dst].is_resident() {
                return Some("resolve destination is resident");
            }
        }
        if let Some(render) = &self.render {
            if self.exceeds_pbe_registers(render, subpass, index) {
                return Some("too many live color outputs");
            }
        }
        None
    }

    /// Tries to fit the subpass into the open render.
    ///
    /// `Ok(None)` means it must go in a new render.
    fn can_combine_with_render(
        &self,
        subpass: &Subpass,
        index: usize,
        depth: &DepthParams,
    ) -> Result<Option<Candidate>, Error> {
        if let Some(reason) = self.combine_conflict(subpass, index, depth) {
            logwise::trace_sync!(
                "subpass {index} can't merge: {reason}",
                index = index,
                reason = reason
            );
            return Ok(None);
        }
        match self.subpass_space_available(subpass, depth) {
            Ok(candidate) => Ok(Some(candidate)),
            Err(Error::TooManyObjects(budget)) => {
                logwise::trace_sync!(
                    "subpass {index} can't merge: out of storage {budget}",
                    index = index,
                    budget = logwise::privacy::LogIt(&budget)
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Gives the depth value of `attachment` color storage from its first write onwards.
    fn enable_z_replicate(&mut self, attachment: usize, dst: Storage) -> Result<(), Error> {
        let pass = self.pass;
        let already = self.attachments[attachment].z_replicate;
        if already {
            assert!(self.attachments[attachment].is_resident());
            assert!(!dst.is_allocated());
        } else {
            assert!(!self.attachments[attachment].is_resident());
            assert!(dst.is_allocated(), "no storage found for the depth replicate");
            self.attachments[attachment].resource.storage = dst;
        }
        let first = self
            .first_ds_write(attachment)
            .expect("replicated depth is written earlier in the render");
        let resource = self.attachments[attachment].resource;
        let dwords = self.attachments[attachment].dwords;

        let render = self.open_render();
        let last = render.subpasses.len() - 1;
        for i in first..render.subpasses.len() {
            let writes = pass.subpasses()[render.subpasses[i].input].depth_stencil_attachment
                == Some(attachment);
            if writes && !render.subpasses[i].z_replicate {
                render.subpasses[i].z_replicate = true;
                // the incoming subpass gets its replicate after its storage details
                if i != last {
                    copy_z_replicate_details(
                        &mut render.hw.subpasses[i],
                        &pass.subpasses()[render.subpasses[i].input],
                        resource,
                    )?;
                }
            }
        }
        if !already {
            for subpass in &mut render.subpasses[first..last] {
                subpass.alloc.mark_allocated(dst, dwords)?;
            }
            self.make_surface_active(attachment, first)?;
            self.attachments[attachment].z_replicate = true;
        }
        Ok(())
    }

    /// Places a subpass into the open render, or a new one.
    pub(crate) fn merge_subpass(&mut self, index: usize) -> Result<(), Error> {
        let pass = self.pass;
        let subpass = &pass.subpasses()[index];
        let incoming_ds = subpass.depth_stencil_attachment;
        let mut depth = DepthParams {
            existing_ds: self.ds_attachment,
            existing_ds_is_input: self.ds_attachment.is_some_and(|ds| subpass.is_input(ds)),
            incoming_ds_is_input: incoming_ds.is_some_and(|ds| subpass.is_input(ds)),
        };

        let candidate = match self.can_combine_with_render(subpass, index, &depth)? {
            Some(candidate) => candidate,
            None => {
                self.close_render()?;
                depth.existing_ds = None;
                depth.existing_ds_is_input = false;
                self.subpass_space_available(subpass, &depth)?
            }
        };

        if self.render.is_none() {
            logwise::trace_sync!(
                "render {render} opened by subpass {index}",
                render = self.renders.len(),
                index = index
            );
            self.render = Some(OpenRender::new(subpass.sample_count));
        }
        let render = self.open_render();
        let subpass_num = render.subpasses.len();
        try_push(
            &mut render.subpasses,
            RenderSubpass {
                input: index,
                z_replicate: false,
                alloc: candidate.alloc.try_clone()?,
            },
        )?;
        try_push(
            &mut render.hw.subpasses,
            HwSubpass {
                index,
                setup: MrtSetup::default(),
                color_init_ops: try_filled(subpass.color_attachments.len(), LoadOp::DontCare)?,
                input_access: Vec::new(),
                z_replicate: None,
                depth_init_op: LoadOp::DontCare,
                stencil_clear: false,
            },
        )?;

        if let Some(ds) = incoming_ds {
            if self.ds_attachment != Some(ds) {
                self.switch_depth_stencil(ds);
            }
        }

        for (slot, attachment) in subpass.color_attachments.iter().enumerate() {
            let Some(attachment) = *attachment else {
                continue;
            };
            if self.attachments[attachment].first_use.is_some() {
                continue;
            }
            let op = self.attachments[attachment].load_op;
            if op == LoadOp::Load {
                self.mark_surface_alloc(attachment);
            }
            // written now, so the next residency has to load it
            self.attachments[attachment].load_op = LoadOp::Load;
            let hw_subpass = self.current_hw_subpass();
            hw_subpass.color_init_ops[slot] = op;
        }

        for (slot, attachment) in subpass.color_attachments.iter().enumerate() {
            let Some(attachment) = *attachment else {
                continue;
            };
            let dst = candidate.color[slot];
            if self.attachments[attachment].first_use.is_none() {
                assert!(!self.attachments[attachment].is_resident());
                assert!(dst.is_allocated(), "new color output has no storage");
                self.attachments[attachment].resource.storage = dst;
                self.make_surface_active(attachment, subpass_num)?;
            } else {
                assert!(!dst.is_allocated());
            }
        }

        if depth.existing_ds_is_input {
            let existing = depth.existing_ds.expect("existing depth read as input");
            self.enable_z_replicate(existing, candidate.existing_zrep)?;
        }
        if depth.incoming_ds_is_input {
            let incoming = incoming_ds.expect("incoming depth read as input");
            if depth.existing_ds != Some(incoming) {
                self.enable_z_replicate(incoming, candidate.incoming_zrep)?;
            } else {
                assert_eq!(candidate.existing_zrep, candidate.incoming_zrep);
            }
        }

        // after replication, in case the replicated depth is also an input
        let render = self.render.as_mut().expect("no render is open");
        let hw_subpass = render
            .hw
            .subpasses
            .last_mut()
            .expect("subpass was just added");
        copy_storage_details(hw_subpass, subpass, &self.attachments)?;
        if render.subpasses[subpass_num].z_replicate {
            let ds = incoming_ds.expect("replicating subpass writes depth");
            copy_z_replicate_details(hw_subpass, subpass, self.attachments[ds].resource)?;
        }

        logwise::trace_sync!(
            "subpass {index} placed at {render}.{subpass}",
            index = index,
            render = self.renders.len(),
            subpass = subpass_num
        );
        self.alloc = candidate.alloc;
        Ok(())
    }

    fn current_hw_subpass(&mut self) -> &mut HwSubpass {
        self.open_render()
            .hw
            .subpasses
            .last_mut()
            .expect("subpass was just added")
    }

    /// Makes `ds` the on-chip depth/stencil, loading or clearing it as its ops say.
    fn switch_depth_stencil(&mut self, ds: usize) {
        let state = &self.attachments[ds];
        let (load_op, stencil_load_op, has_stencil) =
            (state.load_op, state.stencil_load_op, state.has_stencil);
        let depth_load = load_op == LoadOp::Load;
        let stencil_load = has_stencil && stencil_load_op == LoadOp::Load;

        let render = self.open_render();
        let hw_subpass = render
            .hw
            .subpasses
            .last_mut()
            .expect("subpass was just added");
        match load_op {
            LoadOp::Load => hw_subpass.depth_init_op = LoadOp::Load,
            LoadOp::Clear => hw_subpass.depth_init_op = LoadOp::Clear,
            LoadOp::DontCare => {}
        }
        if has_stencil && stencil_load_op == LoadOp::Clear {
            hw_subpass.stencil_clear = true;
        }
        if depth_load {
            render.hw.depth_init = LoadOp::Load;
        }
        if stencil_load {
            render.hw.stencil_init = LoadOp::Load;
        }
        if depth_load || stencil_load {
            assert!(
                render.hw.ds_attachment.is_none(),
                "render loads two depth/stencil attachments"
            );
            render.hw.ds_attachment = Some(ds);
            self.mark_surface_alloc(ds);
        }
        self.ds_attachment = Some(ds);
    }
}

/// Records where the subpass finds its color outputs and input attachments.
fn copy_storage_details(
    hw_subpass: &mut HwSubpass,
    subpass: &Subpass,
    attachments: &[AttachmentState],
) -> Result<(), Error> {
    let resources = &mut hw_subpass.setup.resources;
    resources
        .try_reserve(subpass.color_attachments.len() + subpass.input_attachments.len())?;
    for attachment in &subpass.color_attachments {
        let resource = match attachment {
            Some(attachment) => {
                let state = &attachments[*attachment];
                assert!(state.is_resident(), "color output has no storage");
                state.resource
            }
            None => MrtResource::default(),
        };
        resources.push(resource);
    }

    hw_subpass
        .input_access
        .try_reserve_exact(subpass.input_attachments.len())?;
    for input in &subpass.input_attachments {
        let access = input.map(|input| {
            let state = &attachments[input];
            if !state.is_resident() {
                return InputAccess::OffChip;
            }
            let render_target = match subpass
                .color_attachments
                .iter()
                .position(|color| *color == Some(input))
            {
                Some(slot) => slot,
                None => {
                    resources.push(state.resource);
                    resources.len() - 1
                }
            };
            if state.z_replicate {
                InputAccess::OnChipZReplicate { render_target }
            } else {
                InputAccess::OnChip { render_target }
            }
        });
        hw_subpass.input_access.push(access);
    }
    Ok(())
}

/// Points the subpass's depth replicate at `resource`, sharing the slot of a matching input.
fn copy_z_replicate_details(
    hw_subpass: &mut HwSubpass,
    subpass: &Subpass,
    resource: MrtResource,
) -> Result<(), Error> {
    assert!(hw_subpass.z_replicate.is_none(), "depth replicated twice");
    let ds = subpass
        .depth_stencil_attachment
        .expect("replicating subpass writes depth");
    let as_input = subpass
        .input_attachments
        .iter()
        .zip(&hw_subpass.input_access)
        .find(|(input, _)| **input == Some(ds))
        .and_then(|(_, access)| access.and_then(|access| access.render_target()));
    let render_target = match as_input {
        Some(render_target) => render_target,
        None => {
            try_push(&mut hw_subpass.setup.resources, resource)?;
            hw_subpass.setup.resources.len() - 1
        }
    };
    hw_subpass.setup.resources[render_target] = resource;
    hw_subpass.z_replicate = Some(render_target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInfo;
    use crate::hwsetup::create_renderpass_hwsetup;
    use crate::hwsetup::output::ResolveType;
    use crate::pass::{Attachment, RenderPass, StoreOp};
    use crate::pixel_formats::PixelFormat;

    const NO_DEPTH: DepthParams = DepthParams {
        existing_ds: None,
        existing_ds_is_input: false,
        incoming_ds_is_input: false,
    };

    fn cleared(format: PixelFormat) -> Attachment {
        Attachment::new(format).with_load_op(LoadOp::Clear)
    }

    fn depth_switch_pass(second_depth_reused: bool) -> RenderPass {
        let mut subpasses = vec![
            Subpass::new(1).with_depth_stencil(0),
            Subpass::new(1).with_depth_stencil(1).with_dependency(0),
        ];
        if second_depth_reused {
            subpasses.push(Subpass::new(1).with_depth_stencil(1).with_dependency(1));
        }
        RenderPass::new(
            vec![cleared(PixelFormat::D32Float), cleared(PixelFormat::D32Float)],
            subpasses,
            0,
        )
        .unwrap()
    }

    #[test]
    fn cleared_depth_that_outlives_its_subpass_starts_a_render() {
        let device = DeviceInfo::new();
        let pass = depth_switch_pass(true);
        let mut ctx = Context::new(&device, &pass).unwrap();
        ctx.schedule_subpass(0).unwrap();
        assert!(ctx.render_binds_ds());
        assert!(ctx.depth_zls_conflict(Some(1), false));
        assert_eq!(
            ctx.combine_conflict(&pass.subpasses()[1], 1, &DepthParams {
                existing_ds: Some(0),
                ..NO_DEPTH
            }),
            Some("depth/stencil conflict")
        );

        let setup = create_renderpass_hwsetup(&device, &pass, false).unwrap();
        assert_eq!(setup.renders.len(), 2);
        assert_eq!(setup.renders[0].ds_attachment, Some(0));
        assert_eq!(setup.renders[1].ds_attachment, Some(1));
        assert_eq!(setup.renders[1].depth_init, LoadOp::Clear);
        assert_eq!(setup.subpass_map[1].render, 1);
        assert_eq!(setup.subpass_map[2].render, 1);
    }

    #[test]
    fn depth_used_by_one_subpass_switches_mid_render() {
        let device = DeviceInfo::new();
        let pass = depth_switch_pass(false);
        let mut ctx = Context::new(&device, &pass).unwrap();
        ctx.schedule_subpass(0).unwrap();
        assert!(!ctx.depth_zls_conflict(Some(1), false));

        let setup = create_renderpass_hwsetup(&device, &pass, false).unwrap();
        assert_eq!(setup.renders.len(), 1);
        let render = &setup.renders[0];
        // only the first clear is hoisted, the second runs in its subpass
        assert_eq!(render.ds_attachment, Some(0));
        assert_eq!(render.depth_init, LoadOp::Clear);
        assert_eq!(render.subpasses[1].depth_init_op, LoadOp::Clear);
        assert!(!render.depth_store);
    }

    #[test]
    fn resolve_source_is_not_written_again_in_its_render() {
        let device = DeviceInfo::new();
        let pass = RenderPass::new(
            vec![
                cleared(PixelFormat::RGBA8UNorm).with_sample_count(4),
                Attachment::new(PixelFormat::RGBA8UNorm),
            ],
            vec![
                Subpass::new(4).with_resolved_color(0, 1),
                Subpass::new(4).with_color(0).with_dependency(0),
            ],
            0,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        ctx.schedule_subpass(0).unwrap();
        assert!(ctx.is_pending_resolve_src(0));
        assert!(ctx.is_pending_resolve_dst(1));
        assert_eq!(
            ctx.combine_conflict(&pass.subpasses()[1], 1, &NO_DEPTH),
            Some("color is part of a pending resolve")
        );

        let setup = create_renderpass_hwsetup(&device, &pass, false).unwrap();
        assert_eq!(setup.renders.len(), 2);
        let resolve = setup.renders[0]
            .eot_surfaces
            .iter()
            .find(|s| s.need_resolve())
            .unwrap();
        assert_eq!(resolve.resolve_type, Some(ResolveType::Pbe));
        assert_eq!(resolve.src_attachment, Some(0));
        // the source was stored so the second render can carry on from it
        assert_eq!(setup.renders[1].color_init[0].attachment, 0);
        assert_eq!(setup.renders[1].color_init[0].op, LoadOp::Load);
    }

    #[test]
    fn live_colors_are_capped_at_the_emit_count() {
        let device = DeviceInfo::new();
        let attachments = (0..9)
            .map(|_| cleared(PixelFormat::R8UNorm).with_store_op(StoreOp::Store))
            .collect();
        let first = (0..8).fold(Subpass::new(1), |subpass, i| subpass.with_color(i));
        let pass = RenderPass::new(
            attachments,
            vec![first, Subpass::new(1).with_color(8).with_dependency(0)],
            0,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        ctx.schedule_subpass(0).unwrap();
        let render = ctx.render.as_ref().unwrap();
        assert!(ctx.exceeds_pbe_registers(render, &pass.subpasses()[1], 1));
        assert_eq!(
            ctx.combine_conflict(&pass.subpasses()[1], 1, &NO_DEPTH),
            Some("too many live color outputs")
        );

        let setup = create_renderpass_hwsetup(&device, &pass, false).unwrap();
        assert_eq!(setup.renders.len(), 2);
        assert_eq!(setup.renders[0].pbe_emits, 8);
        assert_eq!(setup.renders[1].pbe_emits, 1);
    }

    #[test]
    fn colors_that_die_in_their_subpass_are_not_live() {
        let device = DeviceInfo::new();
        let attachments = (0..9)
            .map(|i| {
                let store = if i == 8 { StoreOp::Store } else { StoreOp::DontCare };
                cleared(PixelFormat::R8UNorm).with_store_op(store)
            })
            .collect();
        let first = (0..8).fold(Subpass::new(1), |subpass, i| subpass.with_color(i));
        let pass = RenderPass::new(
            attachments,
            vec![first, Subpass::new(1).with_color(8).with_dependency(0)],
            0,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        ctx.schedule_subpass(0).unwrap();
        let render = ctx.render.as_ref().unwrap();
        assert!(!ctx.exceeds_pbe_registers(render, &pass.subpasses()[1], 1));
        assert_eq!(ctx.combine_conflict(&pass.subpasses()[1], 1, &NO_DEPTH), None);
    }

    #[test]
    fn tile_buffer_spill_is_refused_while_a_render_is_open() {
        let device = DeviceInfo::new().with_output_regs_per_pixel(1);
        let pass = RenderPass::new(
            vec![
                cleared(PixelFormat::R32Float).with_store_op(StoreOp::Store),
                cleared(PixelFormat::R32Float).with_store_op(StoreOp::Store),
            ],
            vec![
                Subpass::new(1).with_color(0),
                Subpass::new(1).with_color(1).with_dependency(0),
            ],
            1,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        ctx.schedule_subpass(0).unwrap();
        let space = ctx.subpass_space_available(&pass.subpasses()[1], &NO_DEPTH);
        assert!(matches!(
            space,
            Err(Error::TooManyObjects(Budget::TileBuffers))
        ));
        assert!(
            ctx.can_combine_with_render(&pass.subpasses()[1], 1, &NO_DEPTH)
                .unwrap()
                .is_none()
        );

        // a fresh render may still use the tile buffer
        let setup = create_renderpass_hwsetup(&device, &pass, false).unwrap();
        assert_eq!(setup.renders.len(), 2);
        assert_eq!(setup.renders[1].tile_buffers_count, 0);
    }

    #[test]
    fn depth_read_later_is_replicated_from_its_first_write() {
        let device = DeviceInfo::new();
        let pass = RenderPass::new(
            vec![
                cleared(PixelFormat::D32Float),
                cleared(PixelFormat::RGBA8UNorm).with_store_op(StoreOp::Store),
                cleared(PixelFormat::RGBA8UNorm).with_store_op(StoreOp::Store),
            ],
            vec![
                Subpass::new(1).with_depth_stencil(0),
                Subpass::new(1).with_color(1).with_dependency(0),
                Subpass::new(1).with_color(2).with_input(0).with_dependency(1),
            ],
            0,
        )
        .unwrap();
        let setup = create_renderpass_hwsetup(&device, &pass, false).unwrap();
        assert_eq!(setup.renders.len(), 1);
        let render = &setup.renders[0];
        let zrep = Storage::OutputReg {
            output_reg: 2,
            offset: 0,
        };

        let writer = &render.subpasses[0];
        assert_eq!(writer.z_replicate, Some(0));
        assert_eq!(writer.setup.resources[0].storage, zrep);

        let between = &render.subpasses[1];
        assert_eq!(between.z_replicate, None);
        assert_eq!(
            between.setup.resources[0].storage,
            Storage::OutputReg {
                output_reg: 0,
                offset: 0
            }
        );

        let reader = &render.subpasses[2];
        assert_eq!(
            reader.input_access[0],
            Some(InputAccess::OnChipZReplicate { render_target: 1 })
        );
        assert_eq!(reader.setup.resources[1].storage, zrep);
        assert_eq!(
            reader.setup.resources[0].storage,
            Storage::OutputReg {
                output_reg: 1,
                offset: 0
            }
        );
        assert!(!render.depth_store);
        assert_eq!(render.output_regs_count, 4);
    }
}
