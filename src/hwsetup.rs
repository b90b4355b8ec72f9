// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Scheduling a render pass onto hardware renders.

A tile-based GPU keeps each tile's color and depth on-chip while it draws.  Consecutive subpasses
that read each other's output can often share one hardware render, passing data through pixel
output registers (or, more expensively, tile buffers) instead of through memory.

[`create_renderpass_hwsetup`] walks the subpasses in dependency order, greedily merging each into
the open render when storage and hardware limits allow, and closing the render otherwise.  The
result is a [`HwSetup`]: the list of renders with their storage layout, what each render loads,
clears, stores and resolves, and where every logical subpass ended up.

```
use pvr_hwpass::device::DeviceInfo;
use pvr_hwpass::hwsetup::create_renderpass_hwsetup;
use pvr_hwpass::pass::{Attachment, LoadOp, RenderPass, StoreOp, Subpass};
use pvr_hwpass::pixel_formats::PixelFormat;

let pass = RenderPass::new(
    vec![
        Attachment::new(PixelFormat::RGBA8UNorm)
            .with_load_op(LoadOp::Clear)
            .with_store_op(StoreOp::Store),
        Attachment::new(PixelFormat::RGBA8UNorm).with_load_op(LoadOp::Clear),
    ],
    vec![
        Subpass::new(1).with_color(1),
        Subpass::new(1).with_color(0).with_input(1).with_dependency(0),
    ],
    0,
)
.unwrap();
let setup = create_renderpass_hwsetup(&DeviceInfo::new(), &pass, false).unwrap();
// the second subpass reads the first's output straight from on-chip storage
assert_eq!(setup.renders.len(), 1);
assert_eq!(setup.renders[0].eot_surfaces.len(), 1);
```
*/

mod alloc;
mod attachment;
mod close;
mod context;
mod graph;
mod merge;
mod output;

pub use output::{
    ColorInit, EotSurface, HwRender, HwSetup, HwSubpass, InputAccess, MrtResource, MrtSetup,
    ResolveType, Storage, SubpassMapping,
};

use crate::device::DeviceInfo;
use crate::error::Error;
use crate::pass::{LoadOp, RenderPass};
use context::Context;
use graph::SubpassGraph;

/// Surfaces the pixel back-end can write at the end of one tile.
pub const PBE_EMIT_REGS: u32 = 8;

/// Surfaces one end-of-tile program can write.
pub const MAX_EOT_SURFACES: usize = 16;

impl Context<'_> {
    /// Places one subpass and retires the attachment uses it accounts for.
    fn schedule_subpass(&mut self, index: usize) -> Result<(), Error> {
        let pass = self.pass;
        let subpass = &pass.subpasses()[index];
        self.merge_subpass(index)?;

        let render = self.render.as_ref().expect("merge leaves a render open");
        let subpass_num = render.subpasses.len() - 1;
        self.subpass_map[index] = Some(SubpassMapping {
            render: self.renders.len(),
            subpass: subpass_num,
        });

        for color in subpass.colors() {
            self.dereference(color, subpass_num);
        }
        for input in subpass.inputs() {
            self.dereference(input, subpass_num);
        }
        if let Some(ds) = subpass.depth_stencil_attachment {
            let state = &mut self.attachments[ds];
            // only a replicate gives depth color storage
            if state.take_use(subpass_num) && state.z_replicate && state.is_resident() {
                self.free_surface_storage(ds);
            }
            let state = &mut self.attachments[ds];
            state.load_op = LoadOp::Load;
            state.stencil_load_op = LoadOp::Load;
        }

        let render_index = self.renders.len();
        let subpass_count = pass.subpasses().len();
        for (_, src, dst) in subpass.resolves() {
            let src = &mut self.attachments[src];
            assert_ne!(src.last_resolve_src_render, Some(render_index));
            src.last_resolve_src_render = Some(render_index);
            // a transfer resolve reads the source from memory after the pass
            if !src.is_pbe_downscalable && src.last_read < Some(subpass_count) {
                src.last_read = Some(subpass_count);
                src.remaining_count += 1;
            }
            let dst = &mut self.attachments[dst];
            assert_ne!(dst.last_resolve_dst_render, Some(render_index));
            dst.last_resolve_dst_render = Some(render_index);
        }
        Ok(())
    }
}

/// Schedules `pass` onto hardware renders.
///
/// With `disable_merge` every subpass gets a render of its own.
///
/// # Errors
/// [`Error::TooManyObjects`] when a subpass's colors don't fit even in an empty render, or a
/// render would need more end-of-tile surfaces or emits than the hardware has.
/// [`Error::OutOfHostMemory`] when an allocation fails.
pub fn create_renderpass_hwsetup(
    device: &DeviceInfo,
    pass: &RenderPass,
    disable_merge: bool,
) -> Result<HwSetup, Error> {
    logwise::info_sync!(
        "scheduling {subpasses} subpasses over {attachments} attachments",
        subpasses = pass.subpasses().len(),
        attachments = pass.attachments().len()
    );
    let mut ctx = Context::new(device, pass)?;
    let mut graph = SubpassGraph::new(pass)?;

    for _ in 0..pass.subpasses().len() {
        let next = graph
            .pick_ready()
            .expect("validated pass always has a ready subpass");
        ctx.schedule_subpass(next)?;
        graph.on_scheduled(next);
        if disable_merge {
            ctx.close_render()?;
        }
    }
    ctx.close_render()?;

    let setup = ctx.finish()?;
    logwise::info_sync!(
        "scheduled into {renders} renders",
        renders = setup.renders.len()
    );
    Ok(setup)
}
