// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Closing a render: render-level initialisation, stores, and the end-of-tile program.

use smallvec::SmallVec;

use crate::bittricks::next_power_of_two;
use crate::error::{Budget, Error, try_push};
use crate::hwsetup::alloc::Alloc;
use crate::hwsetup::context::{Context, OpenRender};
use crate::hwsetup::output::{ColorInit, EotSurface, HwRender, MrtSetup, ResolveType};
use crate::hwsetup::{MAX_EOT_SURFACES, PBE_EMIT_REGS};
use crate::pass::{LoadOp, StoreOp};

impl Context<'_> {
    /// Moves color loads and clears, and the first depth/stencil clear, to the start of the render
    /// where the storage has no earlier occupant.
    fn setup_render_init(&self, render: &mut OpenRender) -> Result<(), Error> {
        // which dwords some attachment already occupied earlier in the render
        let mut used = Alloc::default();
        let mut first_ds = true;
        let hw = &mut render.hw;
        for (i, (placed, hw_subpass)) in render
            .subpasses
            .iter()
            .zip(hw.subpasses.iter_mut())
            .enumerate()
        {
            let subpass = &self.pass.subpasses()[placed.input];
            if first_ds && (hw_subpass.depth_init_op == LoadOp::Clear || hw_subpass.stencil_clear)
            {
                let ds = subpass
                    .depth_stencil_attachment
                    .expect("depth/stencil cleared without an attachment");
                assert!(
                    hw.ds_attachment.is_none_or(|bound| bound == ds),
                    "render binds two depth/stencil attachments"
                );
                hw.ds_attachment = Some(ds);
                if hw_subpass.depth_init_op == LoadOp::Clear {
                    hw.depth_init = LoadOp::Clear;
                }
                if hw_subpass.stencil_clear {
                    hw.stencil_init = LoadOp::Clear;
                    hw_subpass.stencil_clear = false;
                }
            }
            if subpass.depth_stencil_attachment.is_some() {
                first_ds = false;
            }

            for (slot, attachment) in subpass.color_attachments.iter().enumerate() {
                let Some(attachment) = *attachment else {
                    continue;
                };
                let state = &self.attachments[attachment];
                if state.first_use != Some(i) {
                    assert_eq!(
                        hw_subpass.color_init_ops[slot],
                        LoadOp::DontCare,
                        "resident attachment {attachment} initialised again"
                    );
                    continue;
                }
                let resource = hw_subpass.setup.resources[slot];
                let op = hw_subpass.color_init_ops[slot];
                let first_occupant = used.claim(resource.storage, state.dwords)?;
                if first_occupant && op != LoadOp::DontCare {
                    try_push(&mut hw.color_init, ColorInit { attachment, op })?;
                    try_push(&mut hw.init_setup.resources, resource)?;
                    hw_subpass.color_init_ops[slot] = LoadOp::DontCare;
                }
            }
        }
        Ok(())
    }

    /// Stores the on-chip depth/stencil if anything reads it after this render.
    fn store_depth_stencil(&mut self, hw: &mut HwRender) {
        let Some(ds) = self.ds_attachment else {
            return;
        };
        let state = &mut self.attachments[ds];
        hw.depth_store = state.remaining_count > 0;
        hw.stencil_store = state.stencil_remaining_count > 0;
        state.load_op = LoadOp::Load;
        state.stencil_load_op = LoadOp::Load;
        if hw.depth_store || hw.stencil_store {
            assert!(
                hw.ds_attachment.is_none_or(|bound| bound == ds),
                "render stores a depth/stencil attachment it doesn't bind"
            );
            hw.ds_attachment = Some(ds);
            self.mark_surface_alloc(ds);
        }
    }

    /// Copies the final register and tile buffer counts into every setup of the render.
    fn finalise_storage_counts(&self, hw: &mut HwRender) {
        hw.output_regs_count = next_power_of_two(self.alloc.output_regs_count());
        hw.tile_buffers_count = self.alloc.tile_buffers_count();
        assert!(hw.tile_buffers_count <= self.pass.max_tilebuffer_count());

        let tile_buffer_size = self.device.tile_buffer_size();
        let (output_regs, tile_buffers) = (hw.output_regs_count, hw.tile_buffers_count);
        let finalise = |setup: &mut MrtSetup| {
            setup.num_output_regs = output_regs;
            setup.num_tile_buffers = tile_buffers;
            setup.tile_buffer_size = tile_buffer_size;
        };
        hw.subpasses
            .iter_mut()
            .for_each(|subpass| finalise(&mut subpass.setup));
        finalise(&mut hw.init_setup);
        finalise(&mut hw.eot_setup);
    }

    /// Marks the colors and resolve destinations written at the end of the render, returning how
    /// many there are.
    fn count_eot_surfaces(&mut self, render: &OpenRender) -> usize {
        let mut count = 0;
        for placed in &render.subpasses {
            let subpass = &self.pass.subpasses()[placed.input];
            for (slot, color) in subpass.color_attachments.iter().enumerate() {
                let Some(color) = *color else {
                    continue;
                };
                let resolve = subpass.resolve_for(slot);
                let state = &mut self.attachments[color];
                // the resolve itself holds one of the remaining uses
                let resolve_uses = if resolve.is_some() { 1 } else { 0 };
                if state.is_resident()
                    && state.remaining_count > resolve_uses
                    && !state.eot_surface_required
                {
                    state.eot_surface_required = true;
                    count += 1;
                }
                if let Some(dst) = resolve {
                    let dst = &mut self.attachments[dst];
                    if !dst.eot_surface_required {
                        dst.eot_surface_required = true;
                        count += 1;
                    }
                }
            }
        }
        count
    }

    /// Builds the end-of-tile surface list and decides how each resolve is done.
    fn setup_eot_surfaces(
        &mut self,
        render: &OpenRender,
        hw: &mut HwRender,
    ) -> Result<(), Error> {
        let count = self.count_eot_surfaces(render);
        if count > MAX_EOT_SURFACES {
            logwise::trace_sync!(
                "render writes {count} surfaces at end of tile",
                count = count
            );
            return Err(Error::TooManyObjects(Budget::EotSurfaces));
        }
        hw.eot_surfaces.try_reserve_exact(count)?;
        hw.pbe_emits = 0;

        for placed in &render.subpasses {
            let subpass = &self.pass.subpasses()[placed.input];
            for (slot, color) in subpass.color_attachments.iter().enumerate() {
                let Some(color) = *color else {
                    continue;
                };
                if let Some(dst) = subpass.resolve_for(slot) {
                    let dst_state = &mut self.attachments[dst];
                    assert!(dst_state.eot_surface_required, "resolve destination not counted");
                    dst_state.eot_surface_required = false;
                    // written by the resolve, so later uses must load it
                    dst_state.load_op = LoadOp::Load;
                    self.mark_surface_alloc(dst);

                    let src = &mut self.attachments[color];
                    src.remaining_count = src
                        .remaining_count
                        .checked_sub(1)
                        .expect("resolve source has no use left for the resolve");
                    let mrt_index = src
                        .mrt_index
                        .expect("resolve source has no on-chip storage at end of tile");
                    let resolve_type = if !src.is_pbe_downscalable {
                        assert!(src.remaining_count > 0, "transfer resolve source isn't stored");
                        Some(ResolveType::Transfer)
                    } else if src.remaining_count == 0 {
                        hw.pbe_emits += 1;
                        Some(ResolveType::Pbe)
                    } else {
                        // decided once every plain store is counted
                        None
                    };
                    try_push(
                        &mut hw.eot_surfaces,
                        EotSurface {
                            mrt_index,
                            attachment: dst,
                            src_attachment: Some(color),
                            resolve_type,
                        },
                    )?;
                }

                let state = &mut self.attachments[color];
                if state.eot_surface_required {
                    assert!(state.remaining_count > 0);
                    state.eot_surface_required = false;
                    let mrt_index = state
                        .mrt_index
                        .expect("stored color has no on-chip storage at end of tile");
                    self.mark_surface_alloc(color);
                    try_push(
                        &mut hw.eot_surfaces,
                        EotSurface {
                            mrt_index,
                            attachment: color,
                            src_attachment: None,
                            resolve_type: None,
                        },
                    )?;
                    hw.pbe_emits += 1;
                }
            }
        }
        if hw.pbe_emits > PBE_EMIT_REGS {
            logwise::trace_sync!(
                "render needs {emits} emits for stores alone",
                emits = hw.pbe_emits
            );
            return Err(Error::TooManyObjects(Budget::PbeEmits));
        }

        for surface in hw
            .eot_surfaces
            .iter_mut()
            .filter(|surface| surface.need_resolve() && surface.resolve_type.is_none())
        {
            if hw.pbe_emits == PBE_EMIT_REGS {
                logwise::warn_sync!(
                    "no emit register left to resolve into attachment {dst}; using the transfer engine",
                    dst = surface.attachment
                );
                surface.resolve_type = Some(ResolveType::Transfer);
            } else {
                surface.resolve_type = Some(ResolveType::Pbe);
                hw.pbe_emits += 1;
            }
        }
        Ok(())
    }

    /// Whether skipping the render would lose a clear or a resolve.
    fn has_side_effects(&self, hw: &HwRender) -> bool {
        if (hw.depth_init == LoadOp::Clear && hw.depth_store)
            || (hw.stencil_init == LoadOp::Clear && hw.stencil_store)
        {
            return true;
        }
        hw.eot_surfaces.iter().any(|surface| {
            let attachment = &self.pass.attachments()[surface.attachment];
            (attachment.load_op == LoadOp::Clear && attachment.store_op == StoreOp::Store)
                || surface.need_resolve()
        })
    }

    /// Finishes the open render and appends it to the closed ones.  Does nothing without one.
    pub(crate) fn close_render(&mut self) -> Result<(), Error> {
        let Some(mut render) = self.render.take() else {
            return Ok(());
        };
        let spill = if self.alloc.tile_buffers_count() > 0 {
            Some(logwise::perfwarn_begin!("render with tile buffers"))
        } else {
            None
        };

        self.setup_render_init(&mut render)?;
        let mut hw = std::mem::replace(&mut render.hw, HwRender::new(0));
        self.store_depth_stencil(&mut hw);
        self.finalise_storage_counts(&mut hw);

        // the depth unit writes replicated depth itself
        let replicated: SmallVec<[usize; 2]> = self
            .active
            .iter()
            .copied()
            .filter(|&attachment| self.attachments[attachment].z_replicate)
            .collect();
        for attachment in replicated {
            self.reset_surface(attachment);
        }

        hw.eot_setup.resources.try_reserve_exact(self.active.len())?;
        for (mrt_index, &attachment) in self.active.iter().enumerate() {
            let state = &mut self.attachments[attachment];
            assert!(state.remaining_count > 0, "unused attachment still resident");
            assert!(state.mrt_index.is_none());
            state.mrt_index = Some(mrt_index);
            hw.eot_setup.resources.push(state.resource);
        }

        self.setup_eot_surfaces(&render, &mut hw)?;
        hw.has_side_effects = self.has_side_effects(&hw);

        while let Some(&attachment) = self.active.first() {
            self.attachments[attachment].mrt_index = None;
            self.reset_surface(attachment);
        }

        logwise::trace_sync!(
            "render {render} closed: {subpasses} subpasses, {regs} output registers, {tile_buffers} tile buffers, {surfaces} eot surfaces",
            render = self.renders.len(),
            subpasses = hw.subpasses.len(),
            regs = hw.output_regs_count,
            tile_buffers = hw.tile_buffers_count,
            surfaces = hw.eot_surfaces.len()
        );
        self.reset_render();
        try_push(&mut self.renders, hw)?;
        drop(spill);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceInfo;
    use crate::hwsetup::context::RenderSubpass;
    use crate::hwsetup::output::Storage;
    use crate::pass::{Attachment, RenderPass, Subpass};
    use crate::pixel_formats::PixelFormat;

    fn schedule(ctx: &mut Context<'_>, subpasses: &[usize]) {
        for &subpass in subpasses {
            ctx.schedule_subpass(subpass).unwrap();
        }
    }

    #[test]
    fn closing_without_a_render_is_a_no_op() {
        let device = DeviceInfo::new();
        let pass = RenderPass::new(
            vec![Attachment::new(PixelFormat::R8UNorm)],
            vec![Subpass::new(1).with_color(0)],
            0,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        ctx.close_render().unwrap();
        assert!(ctx.renders.is_empty());
    }

    #[test]
    fn clear_moves_to_render_init() {
        let device = DeviceInfo::new();
        let pass = RenderPass::new(
            vec![
                Attachment::new(PixelFormat::RGBA8UNorm)
                    .with_load_op(LoadOp::Clear)
                    .with_store_op(StoreOp::Store),
            ],
            vec![Subpass::new(1).with_color(0)],
            0,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        schedule(&mut ctx, &[0]);
        ctx.close_render().unwrap();

        let render = &ctx.renders[0];
        assert_eq!(
            render.color_init,
            vec![ColorInit {
                attachment: 0,
                op: LoadOp::Clear
            }]
        );
        assert_eq!(render.init_setup.resources.len(), 1);
        assert_eq!(render.subpasses[0].color_init_ops, vec![LoadOp::DontCare]);
        assert!(render.has_side_effects);
        assert!(render.load_ops_contain_clear());
    }

    #[test]
    fn reused_storage_initialises_in_its_subpass() {
        let device = DeviceInfo::new().with_output_regs_per_pixel(2);
        let pass = RenderPass::new(
            vec![
                Attachment::new(PixelFormat::RGBA8UNorm).with_load_op(LoadOp::Clear),
                Attachment::new(PixelFormat::RGBA8UNorm)
                    .with_load_op(LoadOp::Clear)
                    .with_store_op(StoreOp::Store),
                Attachment::new(PixelFormat::RGBA8UNorm)
                    .with_load_op(LoadOp::Clear)
                    .with_store_op(StoreOp::Store),
            ],
            vec![
                Subpass::new(1).with_color(0),
                Subpass::new(1).with_color(1).with_input(0).with_dependency(0),
                Subpass::new(1).with_color(2).with_dependency(1),
            ],
            0,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        // attachment 0 is freed after its input read, and attachment 2 takes its register
        schedule(&mut ctx, &[0, 1, 2]);
        ctx.close_render().unwrap();

        assert_eq!(ctx.renders.len(), 1);
        let render = &ctx.renders[0];
        let initialised: Vec<usize> = render.color_init.iter().map(|init| init.attachment).collect();
        assert_eq!(initialised, vec![0, 1]);
        assert_eq!(render.subpasses[1].color_init_ops, vec![LoadOp::DontCare]);
        assert_eq!(render.subpasses[2].color_init_ops, vec![LoadOp::Clear]);
        assert_eq!(
            render.subpasses[2].setup.resources[0].storage,
            Storage::OutputReg {
                output_reg: 0,
                offset: 0
            }
        );
    }

    #[test]
    fn depth_clear_is_hoisted_and_stored() {
        let device = DeviceInfo::new();
        let pass = RenderPass::new(
            vec![
                Attachment::new(PixelFormat::D24UNormS8UInt)
                    .with_load_op(LoadOp::Clear)
                    .with_store_op(StoreOp::Store)
                    .with_stencil_ops(LoadOp::Clear, StoreOp::DontCare),
            ],
            vec![Subpass::new(1).with_depth_stencil(0)],
            0,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        schedule(&mut ctx, &[0]);
        ctx.close_render().unwrap();

        let render = &ctx.renders[0];
        assert_eq!(render.ds_attachment, Some(0));
        assert_eq!(render.depth_init, LoadOp::Clear);
        assert_eq!(render.stencil_init, LoadOp::Clear);
        assert!(!render.subpasses[0].stencil_clear);
        assert!(render.depth_store);
        assert!(!render.stencil_store);
        assert!(render.has_side_effects);
        assert!(ctx.surface_allocate[0]);
    }

    #[test]
    fn setups_share_final_counts() {
        let device = DeviceInfo::new().with_output_regs_per_pixel(4);
        let pass = RenderPass::new(
            vec![
                Attachment::new(PixelFormat::RGBA16Float).with_store_op(StoreOp::Store),
                Attachment::new(PixelFormat::R32Float).with_store_op(StoreOp::Store),
            ],
            vec![Subpass::new(1).with_color(0).with_color(1)],
            0,
        )
        .unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        schedule(&mut ctx, &[0]);
        ctx.close_render().unwrap();

        let render = &ctx.renders[0];
        // three dwords round up to four registers
        assert_eq!(render.output_regs_count, 4);
        assert_eq!(render.tile_buffers_count, 0);
        for setup in [&render.subpasses[0].setup, &render.init_setup, &render.eot_setup] {
            assert_eq!(setup.num_output_regs, 4);
            assert_eq!(setup.num_tile_buffers, 0);
            assert_eq!(setup.tile_buffer_size, device.tile_buffer_size());
        }
        assert_eq!(render.eot_setup.resources.len(), 2);
        assert_eq!(
            render.eot_setup.resources[1].storage,
            Storage::OutputReg {
                output_reg: 2,
                offset: 0
            }
        );
        assert_eq!(render.pbe_emits, 2);
        assert!(ctx.active.is_empty());
    }

    #[test]
    fn too_many_eot_surfaces() {
        let device = DeviceInfo::new();
        let attachments = (0..17)
            .map(|_| Attachment::new(PixelFormat::R8UNorm).with_store_op(StoreOp::Store))
            .collect();
        let subpasses = (0..17).map(|i| Subpass::new(1).with_color(i)).collect();
        let pass = RenderPass::new(attachments, subpasses, 0).unwrap();
        let mut ctx = Context::new(&device, &pass).unwrap();
        // more resident colors than any real render could hold
        let mut render = OpenRender::new(1);
        for i in 0..17 {
            let state = &mut ctx.attachments[i];
            state.resource.storage = Storage::OutputReg {
                output_reg: 0,
                offset: 0,
            };
            render.subpasses.push(RenderSubpass {
                input: i,
                z_replicate: false,
                alloc: Alloc::default(),
            });
            ctx.active.push(i);
        }
        assert_eq!(ctx.count_eot_surfaces(&render), 17);
    }
}
