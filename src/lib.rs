// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! pvr_hwpass schedules Vulkan-style render passes onto the hardware renders of a tile-based GPU.

A render pass is a list of attachments and a graph of subpasses that write and read them.  A
tile-based renderer draws one screen tile at a time with the tile's color and depth kept on-chip,
so the cheapest way to run a pass is to fold as many subpasses as possible into one hardware render,
handing data between them through on-chip storage, and only touching memory at the start and end.

This crate decides that folding.  Given a [`pass::RenderPass`] and the capabilities of the part
([`device::DeviceInfo`]), [`hwsetup::create_renderpass_hwsetup`] produces a [`hwsetup::HwSetup`]:

* which subpasses share each hardware render, in an order that respects every dependency,
* where each color output lives on-chip (pixel output registers, or tile buffers on overflow),
* what each render loads or clears when it starts, and what its end-of-tile program stores,
* how multisample resolves are done (by the pixel back-end, or by a later transfer),
* which attachments need device memory at all.

The [`submit`] module turns the render list into per-queue jobs chained through per-stage sync
points.

# Quick start

```
use pvr_hwpass::device::DeviceInfo;
use pvr_hwpass::hwsetup::create_renderpass_hwsetup;
use pvr_hwpass::pass::{Attachment, LoadOp, RenderPass, StoreOp, Subpass};
use pvr_hwpass::pixel_formats::PixelFormat;

let color = Attachment::new(PixelFormat::RGBA8UNorm)
    .with_load_op(LoadOp::Clear)
    .with_store_op(StoreOp::Store);
let pass = RenderPass::new(vec![color], vec![Subpass::new(1).with_color(0)], 0).unwrap();

let setup = create_renderpass_hwsetup(&DeviceInfo::new(), &pass, false).unwrap();
let render = &setup.renders[0];
assert_eq!(render.tile_buffers_count, 0);
assert!(!render.eot_surfaces[0].need_resolve());
```

# Errors

Malformed descriptions are rejected when the [`pass::RenderPass`] is built.  A valid pass can
still fail to schedule when it needs more on-chip storage or end-of-tile capacity than the hardware
offers; see [`error::Error`].
*/

pub mod device;
pub mod error;
pub mod hwsetup;
pub mod pass;
pub mod pixel_formats;
pub mod submit;

mod bittricks;

pub use error::{Error, PassError};
pub use hwsetup::{HwSetup, create_renderpass_hwsetup};
