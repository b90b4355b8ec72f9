// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Bookkeeping for on-chip color storage.
//!
//! Each buffer (the pixel output registers, and each tile buffer) is a small bitset with one bit
//! per dword.  An [`Alloc`] is cheap to copy, which is how the scheduler tries a subpass against a
//! render without committing to it.

use crate::bittricks::range_mask;
use crate::device::{ALLOC_BUFFER_DWORDS, DeviceInfo};
use crate::error::{Budget, Error};
use crate::hwsetup::output::Storage;

/// Which dwords of one buffer are in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct AllocBuffer {
    bits: u32,
}

impl AllocBuffer {
    fn mask(start: u32, dwords: u32) -> u32 {
        assert!(
            start + dwords <= ALLOC_BUFFER_DWORDS,
            "storage range {start}+{dwords} outside the buffer"
        );
        range_mask(start, dwords)
    }

    pub(crate) fn is_free(&self, start: u32, dwords: u32) -> bool {
        self.bits & Self::mask(start, dwords) == 0
    }

    /// First-fit search for `dwords` contiguous free dwords.
    pub(crate) fn find_space(&self, device: &DeviceInfo, dwords: u32) -> Option<u32> {
        let max_regs = device.output_regs();
        if dwords == 0 || dwords > max_regs {
            return None;
        }
        let alignment = if device.needs_even_offset(dwords) { 2 } else { 1 };
        (0..=max_regs - dwords)
            .step_by(alignment)
            .find(|&start| self.is_free(start, dwords))
    }

    /// # Panics
    /// If any of the range is already in use.
    pub(crate) fn mark(&mut self, start: u32, dwords: u32) {
        let mask = Self::mask(start, dwords);
        assert!(
            self.bits & mask == 0,
            "storage range {start}+{dwords} allocated twice"
        );
        self.bits |= mask;
    }

    /// # Panics
    /// If any of the range was not in use.
    pub(crate) fn free(&mut self, start: u32, dwords: u32) {
        let mask = Self::mask(start, dwords);
        assert!(
            self.bits & mask == mask,
            "storage range {start}+{dwords} freed but not allocated"
        );
        self.bits &= !mask;
    }

    pub(crate) fn merge(&mut self, other: &AllocBuffer) {
        self.bits |= other.bits;
    }

    #[cfg(test)]
    pub(crate) fn is_used(&self, dword: u32) -> bool {
        !self.is_free(dword, 1)
    }
}

/// Which output registers and tile-buffer dwords are in use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Alloc {
    output_reg: AllocBuffer,
    /// Registers the render needs, at least the highest allocated dword in any buffer.
    output_regs_count: u32,
    tile_buffers: Vec<AllocBuffer>,
}

impl Alloc {
    /// Copies the state, reporting allocation failure.
    pub(crate) fn try_clone(&self) -> Result<Self, Error> {
        let mut tile_buffers = Vec::new();
        tile_buffers.try_reserve_exact(self.tile_buffers.len())?;
        tile_buffers.extend_from_slice(&self.tile_buffers);
        Ok(Alloc {
            output_reg: self.output_reg,
            output_regs_count: self.output_regs_count,
            tile_buffers,
        })
    }

    pub(crate) fn output_regs_count(&self) -> u32 {
        self.output_regs_count
    }

    pub(crate) fn tile_buffers_count(&self) -> u32 {
        self.tile_buffers.len() as u32
    }

    #[cfg(test)]
    pub(crate) fn tile_buffer(&self, index: u32) -> Option<&AllocBuffer> {
        self.tile_buffers.get(index as usize)
    }

    fn grow_tile_buffers(&mut self, count: usize) -> Result<(), Error> {
        if self.tile_buffers.len() < count {
            self.tile_buffers
                .try_reserve(count - self.tile_buffers.len())?;
            self.tile_buffers.resize(count, AllocBuffer::default());
        }
        Ok(())
    }

    /// ORs `other` into this state.
    pub(crate) fn merge(&mut self, other: &Alloc) -> Result<(), Error> {
        self.output_reg.merge(&other.output_reg);
        self.output_regs_count = self.output_regs_count.max(other.output_regs_count);
        self.grow_tile_buffers(other.tile_buffers.len())?;
        for (dst, src) in self.tile_buffers.iter_mut().zip(&other.tile_buffers) {
            dst.merge(src);
        }
        Ok(())
    }

    /// Finds and claims storage for a pixel of `dwords` dwords.
    ///
    /// Output registers are preferred, then existing tile buffers, then a new tile buffer while
    /// fewer than `max_tile_buffers` exist.
    pub(crate) fn alloc_color_storage(
        &mut self,
        device: &DeviceInfo,
        max_tile_buffers: u32,
        dwords: u32,
    ) -> Result<Storage, Error> {
        if dwords > device.output_regs() {
            return Err(Error::TooManyObjects(Budget::OutputRegisters));
        }
        let storage = if let Some(output_reg) = self.output_reg.find_space(device, dwords) {
            Storage::OutputReg {
                output_reg,
                offset: 0,
            }
        } else if let Some((tile_buffer, offset_dw)) = self
            .tile_buffers
            .iter()
            .enumerate()
            .find_map(|(i, buffer)| Some((i as u32, buffer.find_space(device, dwords)?)))
        {
            Storage::TileBuffer {
                tile_buffer,
                offset_dw,
            }
        } else if self.tile_buffers_count() == max_tile_buffers {
            return Err(Error::TooManyObjects(Budget::TileBuffers));
        } else {
            Storage::TileBuffer {
                tile_buffer: self.tile_buffers_count(),
                offset_dw: 0,
            }
        };
        self.mark_allocated(storage, dwords)?;
        Ok(storage)
    }

    /// Claims `storage`, growing the tile-buffer list if it names a new buffer.
    pub(crate) fn mark_allocated(&mut self, storage: Storage, dwords: u32) -> Result<(), Error> {
        match storage {
            Storage::Unallocated => unreachable!("marking unallocated storage"),
            Storage::OutputReg { output_reg, .. } => {
                self.output_reg.mark(output_reg, dwords);
                self.output_regs_count = self.output_regs_count.max(output_reg + dwords);
            }
            Storage::TileBuffer {
                tile_buffer,
                offset_dw,
            } => {
                self.grow_tile_buffers(tile_buffer as usize + 1)?;
                self.tile_buffers[tile_buffer as usize].mark(offset_dw, dwords);
                // on-chip and tile-buffer pixels share a layout, so registers must cover both
                self.output_regs_count = self.output_regs_count.max(offset_dw + dwords);
            }
        }
        Ok(())
    }

    /// Sets the range of `storage` whether or not it was set, returning true when none of it was.
    pub(crate) fn claim(&mut self, storage: Storage, dwords: u32) -> Result<bool, Error> {
        let buffer = match storage {
            Storage::Unallocated => unreachable!("claiming unallocated storage"),
            Storage::OutputReg { .. } => &mut self.output_reg,
            Storage::TileBuffer { tile_buffer, .. } => {
                self.grow_tile_buffers(tile_buffer as usize + 1)?;
                &mut self.tile_buffers[tile_buffer as usize]
            }
        };
        let start = storage.start().expect("allocated storage has a start");
        let fresh = buffer.is_free(start, dwords);
        buffer.bits |= AllocBuffer::mask(start, dwords);
        Ok(fresh)
    }

    pub(crate) fn free(&mut self, storage: Storage, dwords: u32) {
        match storage {
            Storage::Unallocated => unreachable!("freeing unallocated storage"),
            Storage::OutputReg { output_reg, .. } => self.output_reg.free(output_reg, dwords),
            Storage::TileBuffer {
                tile_buffer,
                offset_dw,
            } => self
                .tile_buffers
                .get_mut(tile_buffer as usize)
                .expect("freeing storage in a tile buffer that was never allocated")
                .free(offset_dw, dwords),
        }
    }
}
