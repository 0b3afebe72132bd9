//! Texel layouts of the formats the spy can read back, and the transforms
//! applied to read-back data before it goes into the trace.

use ash::vk;

/// Size of one texel block and the block's footprint in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub size: u32,
    pub width: u32,
    pub height: u32,
}

impl BlockInfo {
    const fn texel(size: u32) -> Self {
        Self { size, width: 1, height: 1 }
    }

    const fn block(size: u32, width: u32, height: u32) -> Self {
        Self { size, width, height }
    }
}

/// Layout of `format`'s texels as copied out of `aspect`.
///
/// Depth and stencil aspects of combined formats copy out separately, so
/// their layout depends on the aspect.
pub fn block_info(format: vk::Format, aspect: vk::ImageAspectFlags) -> Option<BlockInfo> {
    if aspect == vk::ImageAspectFlags::STENCIL {
        return match format {
            vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT => Some(BlockInfo::texel(1)),
            _ => None,
        };
    }

    let info = match format {
        vk::Format::R8_UNORM | vk::Format::R8_SNORM | vk::Format::R8_UINT | vk::Format::R8_SINT
        | vk::Format::R8_SRGB => BlockInfo::texel(1),

        vk::Format::R8G8_UNORM | vk::Format::R8G8_UINT | vk::Format::R16_UNORM | vk::Format::R16_UINT
        | vk::Format::R16_SFLOAT | vk::Format::R5G6B5_UNORM_PACK16 | vk::Format::B5G6R5_UNORM_PACK16
        | vk::Format::R4G4B4A4_UNORM_PACK16 | vk::Format::R5G5B5A1_UNORM_PACK16
        | vk::Format::D16_UNORM => BlockInfo::texel(2),

        vk::Format::R8G8B8_UNORM | vk::Format::R8G8B8_SRGB | vk::Format::B8G8R8_UNORM => BlockInfo::texel(3),

        vk::Format::R8G8B8A8_UNORM | vk::Format::R8G8B8A8_SRGB | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT | vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB
        | vk::Format::A2B10G10R10_UNORM_PACK32 | vk::Format::A2R10G10B10_UNORM_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32 | vk::Format::R16G16_SFLOAT | vk::Format::R16G16_UNORM
        | vk::Format::R32_SFLOAT | vk::Format::R32_UINT | vk::Format::R32_SINT
        | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT
        | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => BlockInfo::texel(4),

        vk::Format::D16_UNORM_S8_UINT => BlockInfo::texel(2),

        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R16G16B16A16_UNORM | vk::Format::R16G16B16A16_UINT
        | vk::Format::R32G32_SFLOAT | vk::Format::R32G32_UINT => BlockInfo::texel(8),

        vk::Format::R32G32B32_SFLOAT => BlockInfo::texel(12),

        vk::Format::R32G32B32A32_SFLOAT | vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT => BlockInfo::texel(16),

        vk::Format::BC1_RGB_UNORM_BLOCK | vk::Format::BC1_RGBA_UNORM_BLOCK | vk::Format::BC1_RGBA_SRGB_BLOCK
        | vk::Format::BC4_UNORM_BLOCK | vk::Format::ETC2_R8G8B8_UNORM_BLOCK
        | vk::Format::ETC2_R8G8B8_SRGB_BLOCK | vk::Format::ETC2_R8G8B8A1_UNORM_BLOCK
        | vk::Format::EAC_R11_UNORM_BLOCK => BlockInfo::block(8, 4, 4),

        vk::Format::BC2_UNORM_BLOCK | vk::Format::BC3_UNORM_BLOCK | vk::Format::BC3_SRGB_BLOCK
        | vk::Format::BC5_UNORM_BLOCK | vk::Format::BC7_UNORM_BLOCK | vk::Format::BC7_SRGB_BLOCK
        | vk::Format::ETC2_R8G8B8A8_UNORM_BLOCK | vk::Format::ETC2_R8G8B8A8_SRGB_BLOCK
        | vk::Format::EAC_R11G11_UNORM_BLOCK | vk::Format::ASTC_4X4_UNORM_BLOCK
        | vk::Format::ASTC_4X4_SRGB_BLOCK => BlockInfo::block(16, 4, 4),

        vk::Format::ASTC_8X8_UNORM_BLOCK | vk::Format::ASTC_8X8_SRGB_BLOCK => BlockInfo::block(16, 8, 8),

        _ => return None,
    };
    Some(info)
}

/// The aspects an image of `format` has.
pub fn aspects(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        },
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        },
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// The individual aspects of `flags`, in bit order.
pub fn split_aspects(flags: vk::ImageAspectFlags) -> Vec<vk::ImageAspectFlags> {
    [vk::ImageAspectFlags::COLOR, vk::ImageAspectFlags::DEPTH, vk::ImageAspectFlags::STENCIL]
        .into_iter()
        .filter(|aspect| flags.contains(*aspect))
        .collect()
}

/// Extent of mip `level` of an image with base extent `extent`.
pub fn mip_extent(extent: vk::Extent3D, level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (extent.width >> level).max(1),
        height: (extent.height >> level).max(1),
        depth: (extent.depth >> level).max(1),
    }
}

/// Bytes in one row of texel blocks of a tightly packed copy.
pub fn row_pitch(block: BlockInfo, width: u32) -> u64 {
    width.div_ceil(block.width) as u64 * block.size as u64
}

/// Rows of texel blocks in `height` texels.
pub fn block_rows(block: BlockInfo, height: u32) -> u32 {
    height.div_ceil(block.height)
}

/// Bytes in a tightly packed copy of `extent`.
pub fn copy_size(block: BlockInfo, extent: vk::Extent3D) -> u64 {
    row_pitch(block, extent.width) * block_rows(block, extent.height) as u64 * extent.depth as u64
}

/// Whether copies of `format`'s `aspect` carry a depth value in the low 24
/// bits of each 32-bit texel.
pub fn is_x8_d24(format: vk::Format, aspect: vk::ImageAspectFlags) -> bool {
    aspect == vk::ImageAspectFlags::DEPTH
        && matches!(format, vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D24_UNORM_S8_UINT)
}

/// Drops the unused high byte of each little-endian 32-bit depth texel.
///
/// Texel `i` occupies bytes `4i..4i+4` as `[d0, d1, d2, x]` with `d0` least
/// significant; the output holds `[d0, d1, d2]` at `3i..3i+3`.
pub fn strip_x8_d24(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(4)
        .flat_map(|texel| [texel[0], texel[1], texel[2]])
        .collect()
}

/// Reorders BGRA texels to RGBA in place.
pub fn bgra_to_rgba(data: &mut [u8]) {
    for texel in data.chunks_exact_mut(4) {
        texel.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use crate::formats::*;

    #[test]
    fn compressed_copies_are_sized_in_blocks() {
        let block = block_info(vk::Format::BC1_RGBA_UNORM_BLOCK, vk::ImageAspectFlags::COLOR).unwrap();
        let extent = vk::Extent3D { width: 5, height: 5, depth: 1 };

        assert_eq!(row_pitch(block, 5), 16);
        assert_eq!(copy_size(block, extent), 32);
    }

    #[test]
    fn combined_depth_stencil_copies_per_aspect() {
        let format = vk::Format::D24_UNORM_S8_UINT;

        assert_eq!(aspects(format), vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL);
        assert_eq!(block_info(format, vk::ImageAspectFlags::DEPTH).unwrap().size, 4);
        assert_eq!(block_info(format, vk::ImageAspectFlags::STENCIL).unwrap().size, 1);
        assert!(is_x8_d24(format, vk::ImageAspectFlags::DEPTH));
        assert!(!is_x8_d24(format, vk::ImageAspectFlags::STENCIL));
    }

    #[test]
    fn x8_d24_keeps_the_low_three_bytes() {
        let data = [0x01, 0x02, 0x03, 0xff, 0x11, 0x12, 0x13, 0xee];

        assert_eq!(strip_x8_d24(&data), vec![0x01, 0x02, 0x03, 0x11, 0x12, 0x13]);
    }

    #[test]
    fn mips_never_collapse_below_one_texel() {
        let extent = vk::Extent3D { width: 8, height: 2, depth: 1 };

        assert_eq!(mip_extent(extent, 2), vk::Extent3D { width: 2, height: 1, depth: 1 });
    }
}
