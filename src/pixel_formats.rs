// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Pixel format definitions for render-pass attachments.
//!
//! The scheduler only cares about a few properties of a format:
//!
//! - How many bits a pixel occupies, which decides how many dwords of on-chip
//!   color storage (pixel output registers or tile buffer) it needs
//! - Which aspects (color, depth, stencil) it carries
//! - Whether the pixel back-end can down-scale it during a multisample resolve
//!
//! # Available Formats
//!
//! ## Color
//! - [`PixelFormat::R8UNorm`], [`PixelFormat::R16Float`], [`PixelFormat::R32Float`], [`PixelFormat::R32SInt`]
//! - [`PixelFormat::RG16Float`], [`PixelFormat::RG32Float`]
//! - [`PixelFormat::RGBA8UNorm`], [`PixelFormat::RGBA8UnormSRGB`], [`PixelFormat::BGRA8UNormSRGB`], [`PixelFormat::A2B10G10R10UNorm`]
//! - [`PixelFormat::RGBA16Unorm`], [`PixelFormat::RGBA16Float`]
//! - [`PixelFormat::RGBA32Float`], [`PixelFormat::RGBA32UInt`]
//!
//! ## Depth/stencil
//! - [`PixelFormat::D16UNorm`], [`PixelFormat::D32Float`], [`PixelFormat::S8UInt`]
//! - [`PixelFormat::D24UNormS8UInt`], [`PixelFormat::D32FloatS8UInt`]
//!
//! # Examples
//!
//! ```
//! use pvr_hwpass::pixel_formats::PixelFormat;
//!
//! // 128 bits per pixel needs four dwords of color storage
//! assert_eq!(PixelFormat::RGBA32Float.dwords_per_pixel(), 4);
//! assert!(!PixelFormat::RGBA32Float.is_pbe_downscalable());
//! assert!(PixelFormat::D24UNormS8UInt.aspects().contains_stencil());
//! ```

/*
Quick note on type design.  Texture formats elsewhere tend to be zero-sized types so the
pixel format is part of the type and writes can be typechecked.

Render passes are described at runtime though, and the scheduler only ever asks a format for
its size and aspects.  There is nothing to typecheck, so an enum is the better fit here.
 */

use crate::bittricks;
use std::fmt::Debug;

/// Which components of an image an attachment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Aspects(u8);

impl Aspects {
    pub const COLOR: Aspects = Aspects(1 << 0);
    pub const DEPTH: Aspects = Aspects(1 << 1);
    pub const STENCIL: Aspects = Aspects(1 << 2);
    pub const DEPTH_STENCIL: Aspects = Self::DEPTH.union(Self::STENCIL);

    pub const fn empty() -> Self {
        Aspects(0)
    }
    pub const fn contains(self, other: Aspects) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
    pub const fn contains_stencil(self) -> bool {
        self.contains(Self::STENCIL)
    }
    pub const fn contains_depth(self) -> bool {
        self.contains(Self::DEPTH)
    }
    pub const fn is_depth_or_stencil(self) -> bool {
        self.0 & Self::DEPTH_STENCIL.0 != 0
    }
    pub const fn union(self, other: Aspects) -> Self {
        Aspects(self.0 | other.0)
    }
}

/// Pixel format of a render-pass attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// 8-bit normalized unsigned integer, single red channel.
    R8UNorm,
    /// 16-bit half-precision float, single red channel.
    R16Float,
    /// 32-bit float, single red channel.
    R32Float,
    /// 32-bit signed integer, single red channel.
    R32SInt,
    /// Two-channel 16-bit float.
    RG16Float,
    /// Two-channel 32-bit float (8 bytes total).
    RG32Float,
    /// 4-channel 8-bit normalized (4 bytes total).
    RGBA8UNorm,
    /// 4-channel 8-bit normalized with sRGB encoding.
    RGBA8UnormSRGB,
    /// 4-channel 8-bit normalized with sRGB encoding (BGRA order).
    BGRA8UNormSRGB,
    /// Packed 10/10/10/2 normalized.
    A2B10G10R10UNorm,
    /// 4-channel 16-bit normalized (8 bytes total).
    RGBA16Unorm,
    /// 4-channel 16-bit float (8 bytes total).
    RGBA16Float,
    /// 4-channel 32-bit float (16 bytes total).
    RGBA32Float,
    /// 4-channel 32-bit unsigned integer (16 bytes total).
    RGBA32UInt,
    /// 16-bit normalized depth.
    D16UNorm,
    /// 32-bit float depth.
    D32Float,
    /// 8-bit stencil only.
    S8UInt,
    /// 24-bit normalized depth with 8-bit stencil.
    D24UNormS8UInt,
    /// 32-bit float depth with 8-bit stencil (padded to 64 bits).
    D32FloatS8UInt,
}

impl PixelFormat {
    /// Size of one pixel in bits.
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::R8UNorm | PixelFormat::S8UInt => 8,
            PixelFormat::R16Float | PixelFormat::D16UNorm => 16,
            PixelFormat::R32Float
            | PixelFormat::R32SInt
            | PixelFormat::RG16Float
            | PixelFormat::RGBA8UNorm
            | PixelFormat::RGBA8UnormSRGB
            | PixelFormat::BGRA8UNormSRGB
            | PixelFormat::A2B10G10R10UNorm
            | PixelFormat::D32Float
            | PixelFormat::D24UNormS8UInt => 32,
            PixelFormat::RG32Float
            | PixelFormat::RGBA16Unorm
            | PixelFormat::RGBA16Float
            | PixelFormat::D32FloatS8UInt => 64,
            PixelFormat::RGBA32Float | PixelFormat::RGBA32UInt => 128,
        }
    }

    /// Size of one pixel in bytes, rounded up.
    pub const fn bytes_per_pixel(self) -> u32 {
        bittricks::bytes_for_bits(self.bits_per_pixel())
    }

    /// Number of dwords of on-chip color storage one pixel occupies.
    pub const fn dwords_per_pixel(self) -> u32 {
        bittricks::dwords_for_bits(self.bits_per_pixel())
    }

    pub const fn aspects(self) -> Aspects {
        match self {
            PixelFormat::D16UNorm | PixelFormat::D32Float => Aspects::DEPTH,
            PixelFormat::S8UInt => Aspects::STENCIL,
            PixelFormat::D24UNormS8UInt | PixelFormat::D32FloatS8UInt => Aspects::DEPTH_STENCIL,
            _ => Aspects::COLOR,
        }
    }

    /// True for integer color formats.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            PixelFormat::R32SInt | PixelFormat::RGBA32UInt | PixelFormat::S8UInt
        )
    }

    /// Number of color channels; zero for depth/stencil formats.
    pub const fn channels(self) -> u32 {
        match self {
            PixelFormat::R8UNorm
            | PixelFormat::R16Float
            | PixelFormat::R32Float
            | PixelFormat::R32SInt => 1,
            PixelFormat::RG16Float | PixelFormat::RG32Float => 2,
            PixelFormat::RGBA8UNorm
            | PixelFormat::RGBA8UnormSRGB
            | PixelFormat::BGRA8UNormSRGB
            | PixelFormat::A2B10G10R10UNorm
            | PixelFormat::RGBA16Unorm
            | PixelFormat::RGBA16Float
            | PixelFormat::RGBA32Float
            | PixelFormat::RGBA32UInt => 4,
            _ => 0,
        }
    }

    /// Whether the pixel back-end can down-scale this format during a multisample resolve.
    ///
    /// Integer formats are excluded because the PBE averages samples while a resolve of an
    /// integer attachment has to pick one.  Wide pack modes (32-bit channels, or 16-bit channels
    /// with more than two of them) have no down-scaling path.
    pub const fn is_pbe_downscalable(self) -> bool {
        if self.is_integer() || self.aspects().is_depth_or_stencil() {
            return false;
        }
        let channels = self.channels();
        let bits_per_channel = self.bits_per_pixel() / channels;
        match bits_per_channel {
            32 => false,
            16 => channels <= 2,
            _ => true,
        }
    }

    /// Which bits of each dword of a pixel hold data.
    ///
    /// Full dwords are all ones; a trailing partial dword gets a low-bit mask.
    pub const fn valid_mask(self) -> [u32; 4] {
        let bits = self.bits_per_pixel();
        let full = bits / 32;
        let part = bits % 32;
        let mut mask = [0u32; 4];
        let mut i = 0;
        while i < full as usize {
            mask[i] = u32::MAX;
            i += 1;
        }
        if part > 0 {
            mask[full as usize] = bittricks::low_bits(part);
        }
        mask
    }
}
