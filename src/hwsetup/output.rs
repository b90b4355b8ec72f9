// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The hardware setup handed to command encoding.

use crate::pass::{Attachment, LoadOp};

/// Where a render target lives on-chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Storage {
    #[default]
    Unallocated,
    /// A range of pixel output registers.
    OutputReg {
        output_reg: u32,
        /// Byte offset within the register.
        offset: u32,
    },
    /// A range of dwords in a tile buffer.
    TileBuffer { tile_buffer: u32, offset_dw: u32 },
}

impl Storage {
    pub fn is_allocated(&self) -> bool {
        !matches!(self, Storage::Unallocated)
    }

    /// First dword of the range within its buffer.
    pub(crate) fn start(&self) -> Option<u32> {
        match *self {
            Storage::Unallocated => None,
            Storage::OutputReg { output_reg, .. } => Some(output_reg),
            Storage::TileBuffer { offset_dw, .. } => Some(offset_dw),
        }
    }
}

/// A render target binding as seen by a shader or the EOT program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MrtResource {
    pub storage: Storage,
    /// Bytes per pixel of the attachment.
    pub intermediate_size: u32,
    /// Which bits of each dword hold data.
    pub valid_mask: [u32; 4],
}

impl MrtResource {
    pub(crate) fn for_attachment(attachment: &Attachment, storage: Storage) -> Self {
        MrtResource {
            storage,
            intermediate_size: attachment.format.bytes_per_pixel(),
            valid_mask: attachment.format.valid_mask(),
        }
    }
}

/// A set of render targets plus the storage sizing of the render they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MrtSetup {
    pub resources: Vec<MrtResource>,
    pub num_output_regs: u32,
    pub num_tile_buffers: u32,
    /// Bytes per tile buffer.
    pub tile_buffer_size: u64,
}

impl MrtSetup {
    pub fn num_render_targets(&self) -> usize {
        self.resources.len()
    }
}

/// How a subpass reads one of its input attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputAccess {
    /// Sampled from memory.
    OffChip,
    /// Read from on-chip color storage.
    OnChip { render_target: usize },
    /// Read from the color storage the depth value is replicated into.
    OnChipZReplicate { render_target: usize },
}

impl InputAccess {
    pub fn render_target(&self) -> Option<usize> {
        match *self {
            InputAccess::OffChip => None,
            InputAccess::OnChip { render_target }
            | InputAccess::OnChipZReplicate { render_target } => Some(render_target),
        }
    }
}

/// A color attachment initialised once at the start of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorInit {
    pub attachment: usize,
    pub op: LoadOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveType {
    /// Down-scaled by the pixel back-end as part of the EOT program.
    Pbe,
    /// Resolved afterwards by the transfer engine from the stored source.
    Transfer,
}

/// One surface written by the end-of-tile program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EotSurface {
    /// Index into the render's `eot_setup` resources of the source data.
    pub mrt_index: usize,
    /// Attachment written to memory.
    pub attachment: usize,
    /// Source of a resolve.
    pub src_attachment: Option<usize>,
    pub resolve_type: Option<ResolveType>,
}

impl EotSurface {
    pub fn need_resolve(&self) -> bool {
        self.src_attachment.is_some()
    }
}

/// One logical subpass as placed in a hardware render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwSubpass {
    /// Index of the subpass in the render pass.
    pub index: usize,
    /// Color outputs in slot order, then on-chip inputs, then any depth replicate.
    pub setup: MrtSetup,
    /// Per color slot.  Unused slots are [`LoadOp::DontCare`].
    pub color_init_ops: Vec<LoadOp>,
    /// Per input slot; `None` for unused slots.
    pub input_access: Vec<Option<InputAccess>>,
    /// Render target the depth is replicated into.
    pub z_replicate: Option<usize>,
    pub depth_init_op: LoadOp,
    pub stencil_clear: bool,
}

/// One hardware render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwRender {
    /// Attachment bound to the on-chip depth/stencil for loads and stores.
    pub ds_attachment: Option<usize>,
    pub depth_init: LoadOp,
    pub stencil_init: LoadOp,
    pub depth_store: bool,
    pub stencil_store: bool,
    pub sample_count: u32,
    pub subpasses: Vec<HwSubpass>,
    /// Colors loaded or cleared once for the whole render, parallel to `init_setup`.
    pub color_init: Vec<ColorInit>,
    pub init_setup: MrtSetup,
    pub eot_setup: MrtSetup,
    pub eot_surfaces: Vec<EotSurface>,
    /// Pixel output registers, a power of two.
    pub output_regs_count: u32,
    pub tile_buffers_count: u32,
    pub pbe_emits: u32,
    /// False when the render can be skipped if it has no draws.
    pub has_side_effects: bool,
}

impl HwRender {
    pub(crate) fn new(sample_count: u32) -> Self {
        HwRender {
            ds_attachment: None,
            depth_init: LoadOp::DontCare,
            stencil_init: LoadOp::DontCare,
            depth_store: false,
            stencil_store: false,
            sample_count,
            subpasses: Vec::new(),
            color_init: Vec::new(),
            init_setup: MrtSetup::default(),
            eot_setup: MrtSetup::default(),
            eot_surfaces: Vec::new(),
            output_regs_count: 0,
            tile_buffers_count: 0,
            pbe_emits: 0,
            has_side_effects: false,
        }
    }

    /// Whether the render clears anything when it starts.
    pub fn load_ops_contain_clear(&self) -> bool {
        self.color_init.iter().any(|init| init.op == LoadOp::Clear)
            || self.depth_init == LoadOp::Clear
            || self.stencil_init == LoadOp::Clear
    }
}

/// Where a logical subpass ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubpassMapping {
    pub render: usize,
    pub subpass: usize,
}

/// A render pass scheduled onto hardware renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwSetup {
    /// In submission order.
    pub renders: Vec<HwRender>,
    /// Per attachment: whether device memory backs it.
    pub surface_allocate: Vec<bool>,
    /// Per logical subpass.
    pub subpass_map: Vec<SubpassMapping>,
    pub tile_buffer_size: u64,
}

impl HwSetup {
    /// The hardware subpass a logical subpass was placed in.
    pub fn hw_subpass(&self, subpass: usize) -> Option<&HwSubpass> {
        let mapping = self.subpass_map.get(subpass)?;
        self.renders
            .get(mapping.render)?
            .subpasses
            .get(mapping.subpass)
    }

    /// Whether any render clears an attachment at render level.
    pub fn load_ops_contain_clear(&self) -> bool {
        self.renders.iter().any(HwRender::load_ops_contain_clear)
    }
}

static_assertions::assert_impl_all!(HwSetup: Send, Sync, Clone);
static_assertions::assert_impl_all!(HwRender: Send, Sync);
