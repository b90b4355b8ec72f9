// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Hardware capabilities the scheduler depends on.
//!
//! Different GPU generations differ in how much on-chip color storage a pixel gets and in a few
//! alignment rules.  Rather than consulting a global feature table, callers describe the target
//! with a [`DeviceInfo`] and hand it to [`crate::hwsetup::create_renderpass_hwsetup`].
//!
//! # Example
//!
//! ```
//! use pvr_hwpass::device::DeviceInfo;
//!
//! let device = DeviceInfo {
//!     max_output_regs_per_pixel: 4,
//!     pbe2_in_xe: true,
//!     ..DeviceInfo::new()
//! };
//! assert_eq!(device.tile_buffer_size(), 4 * 4);
//! ```

/// Width in dwords of one pixel output register bank, and of one tile buffer slot.
pub const ALLOC_BUFFER_DWORDS: u32 = 8;

/// Description of the target GPU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Pixel output registers available per pixel, in dwords.  At most [`ALLOC_BUFFER_DWORDS`].
    pub max_output_regs_per_pixel: u32,
    /// When set, 64-bit and 128-bit formats must start at an even output register.
    pub pbe2_in_xe: bool,
    /// Number of clusters per core.
    pub num_clusters: u32,
    /// When set each USC owns its tiles, so the cluster count is used as-is for tile-buffer sizing.
    pub tile_per_usc: bool,
    /// Total reserved partition size across the clusters of one core.
    pub total_reserved_partition_size: u32,
    /// Number of cores tile buffers are duplicated across.
    pub max_num_cores: u32,
}

impl DeviceInfo {
    /// A single-core, single-cluster part with eight output registers.
    pub fn new() -> Self {
        DeviceInfo {
            max_output_regs_per_pixel: ALLOC_BUFFER_DWORDS,
            pbe2_in_xe: false,
            num_clusters: 1,
            tile_per_usc: false,
            total_reserved_partition_size: 4,
            max_num_cores: 1,
        }
    }

    pub fn with_output_regs_per_pixel(mut self, regs: u32) -> Self {
        self.max_output_regs_per_pixel = regs;
        self
    }

    pub fn with_pbe2_in_xe(mut self, pbe2_in_xe: bool) -> Self {
        self.pbe2_in_xe = pbe2_in_xe;
        self
    }

    /// Sets the cluster layout used for tile-buffer sizing.
    pub fn with_clusters(mut self, num_clusters: u32, tile_per_usc: bool) -> Self {
        self.num_clusters = num_clusters;
        self.tile_per_usc = tile_per_usc;
        self
    }

    pub fn with_partition_size(mut self, total_reserved_partition_size: u32) -> Self {
        self.total_reserved_partition_size = total_reserved_partition_size;
        self
    }

    pub fn with_cores(mut self, max_num_cores: u32) -> Self {
        self.max_num_cores = max_num_cores;
        self
    }

    /// Output registers usable per pixel, clamped to the bitset width.
    pub(crate) fn output_regs(&self) -> u32 {
        self.max_output_regs_per_pixel.min(ALLOC_BUFFER_DWORDS)
    }

    /// Whether pixels of `dwords` size need an even start offset.
    pub(crate) fn needs_even_offset(&self, dwords: u32) -> bool {
        self.pbe2_in_xe && (dwords == 2 || dwords == 4)
    }

    fn tile_buffer_size_per_core(&self) -> u64 {
        let clusters = u64::from(self.num_clusters.max(1));
        let clusters = if self.tile_per_usc {
            clusters
        } else {
            clusters.next_power_of_two()
        };
        // partitions across all clusters * 16 * 16 quadrant pixels, as dwords
        u64::from(self.total_reserved_partition_size)
            .saturating_mul(clusters)
            .saturating_mul(size_of::<u32>() as u64)
    }

    /// Bytes of memory to allocate for one tile buffer.
    ///
    /// On a multicore system the buffer is duplicated for each core.  Saturates at `u64::MAX`.
    pub fn tile_buffer_size(&self) -> u64 {
        self.tile_buffer_size_per_core()
            .saturating_mul(u64::from(self.max_num_cores.max(1)))
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::new()
    }
}
