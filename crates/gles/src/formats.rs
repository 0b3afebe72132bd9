//! Texel sizes and read-back formats for the GL formats the spy tracks.

use crate::gl::*;

/// Bytes per pixel of client data in `format`/`ty`.
pub fn bytes_per_pixel(format: GLenum, ty: GLenum) -> Option<u32> {
    let components = match format {
        GL_RED | GL_ALPHA | GL_LUMINANCE | GL_DEPTH_COMPONENT => 1,
        GL_RG | GL_LUMINANCE_ALPHA => 2,
        GL_RGB => 3,
        GL_RGBA => 4,
        GL_DEPTH_STENCIL => return match ty {
            GL_UNSIGNED_INT_24_8 => Some(4),
            GL_FLOAT_32_UNSIGNED_INT_24_8_REV => Some(8),
            _ => None,
        },
        _ => return None,
    };

    match ty {
        GL_UNSIGNED_BYTE | GL_BYTE => Some(components),
        GL_UNSIGNED_SHORT | GL_SHORT | GL_HALF_FLOAT | GL_HALF_FLOAT_OES => Some(components * 2),
        GL_UNSIGNED_INT | GL_INT | GL_FLOAT => Some(components * 4),
        GL_UNSIGNED_SHORT_5_6_5 | GL_UNSIGNED_SHORT_4_4_4_4 | GL_UNSIGNED_SHORT_5_5_5_1 => Some(2),
        GL_UNSIGNED_INT_2_10_10_10_REV => Some(4),
        _ => None,
    }
}

/// Bytes the driver reads for a `width` x `height` image whose rows start on
/// `alignment` byte boundaries. The last row is not padded.
pub fn image_size(width: i32, height: i32, format: GLenum, ty: GLenum, alignment: i32) -> Option<u64> {
    if width <= 0 || height <= 0 {
        return Some(0);
    }

    let bpp = bytes_per_pixel(format, ty)? as u64;
    let row = width as u64 * bpp;
    let alignment = alignment.max(1) as u64;
    let stride = (row + alignment - 1) / alignment * alignment;

    Some(stride * (height as u64 - 1) + row)
}

/// Block width, height and byte size of a compressed format.
pub fn compressed_block(internal_format: GLenum) -> Option<(u32, u32, u32)> {
    match internal_format {
        GL_ETC1_RGB8_OES | GL_COMPRESSED_RGB8_ETC2 => Some((4, 4, 8)),
        GL_COMPRESSED_RGBA8_ETC2_EAC => Some((4, 4, 16)),
        GL_COMPRESSED_RGBA_ASTC_4x4_KHR => Some((4, 4, 16)),
        GL_COMPRESSED_RGBA_ASTC_8x8_KHR => Some((8, 8, 16)),
        _ => None,
    }
}

pub fn is_compressed(internal_format: GLenum) -> bool {
    compressed_block(internal_format).is_some()
}

pub fn compressed_size(internal_format: GLenum, width: i32, height: i32) -> Option<u64> {
    let (bw, bh, bytes) = compressed_block(internal_format)?;
    let blocks_x = (width.max(0) as u64 + bw as u64 - 1) / bw as u64;
    let blocks_y = (height.max(0) as u64 + bh as u64 - 1) / bh as u64;
    Some(blocks_x * blocks_y * bytes as u64)
}

pub fn is_depth(internal_format: GLenum) -> bool {
    matches!(
        internal_format,
        GL_DEPTH_COMPONENT
            | GL_DEPTH_STENCIL
            | GL_DEPTH_COMPONENT16
            | GL_DEPTH_COMPONENT24
            | GL_DEPTH_COMPONENT32F
            | GL_DEPTH24_STENCIL8
    )
}

pub fn is_stencil_only(internal_format: GLenum) -> bool {
    internal_format == GL_STENCIL_INDEX8
}

/// Client format and type a sized internal format is read back with.
///
/// Unsized internal formats (`GL_RGBA` given to `glTexImage2D`) carry their
/// client format and type on the level instead.
pub fn sized_transfer_format(internal_format: GLenum) -> Option<(GLenum, GLenum)> {
    match internal_format {
        GL_R8 => Some((GL_RED, GL_UNSIGNED_BYTE)),
        GL_RG8 => Some((GL_RG, GL_UNSIGNED_BYTE)),
        GL_RGB8 | GL_RGB565 => Some((GL_RGB, GL_UNSIGNED_BYTE)),
        GL_RGBA8 | GL_SRGB8_ALPHA8 | GL_RGBA4 | GL_RGB5_A1 => Some((GL_RGBA, GL_UNSIGNED_BYTE)),
        GL_RGBA16F => Some((GL_RGBA, GL_HALF_FLOAT)),
        GL_RGBA32F => Some((GL_RGBA, GL_FLOAT)),
        GL_DEPTH_COMPONENT16 => Some((GL_DEPTH_COMPONENT, GL_UNSIGNED_SHORT)),
        GL_DEPTH_COMPONENT24 => Some((GL_DEPTH_COMPONENT, GL_UNSIGNED_INT)),
        GL_DEPTH_COMPONENT32F => Some((GL_DEPTH_COMPONENT, GL_FLOAT)),
        GL_DEPTH24_STENCIL8 => Some((GL_DEPTH_STENCIL, GL_UNSIGNED_INT_24_8)),
        _ => None,
    }
}

/// Format and type `glReadPixels` can return for a color attachment of this
/// format. Everything normalized reads back as RGBA8.
pub fn read_format(internal_format: GLenum) -> (GLenum, GLenum) {
    match internal_format {
        GL_RGBA16F | GL_RGBA32F => (GL_RGBA, GL_FLOAT),
        _ => (GL_RGBA, GL_UNSIGNED_BYTE),
    }
}

/// Converts depth encoded by the resample shader, 24 bits spread over the
/// red (high), green and blue (low) channels of RGBA8 texels, into packed
/// little-endian 24-bit depth values.
pub fn unpack_encoded_depth24(rgba: &[u8]) -> Vec<u8> {
    rgba.chunks_exact(4)
        .flat_map(|texel| [texel[2], texel[1], texel[0]])
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::formats::*;
    use crate::gl::*;

    #[test]
    fn rows_are_padded_to_the_unpack_alignment() {
        // 3 RGB pixels is 9 bytes, padded to 12 on all but the last row.
        assert_eq!(image_size(3, 2, GL_RGB, GL_UNSIGNED_BYTE, 4), Some(21));
        assert_eq!(image_size(3, 2, GL_RGB, GL_UNSIGNED_BYTE, 1), Some(18));
        assert_eq!(image_size(4, 4, GL_RGBA, GL_UNSIGNED_BYTE, 4), Some(64));
        assert_eq!(image_size(0, 4, GL_RGBA, GL_UNSIGNED_BYTE, 4), Some(0));
    }

    #[test]
    fn unknown_formats_have_no_size() {
        assert_eq!(image_size(4, 4, 0x1234, GL_UNSIGNED_BYTE, 4), None);
        assert_eq!(bytes_per_pixel(GL_RGBA, 0x1234), None);
    }

    #[test]
    fn compressed_sizes_round_up_to_whole_blocks() {
        assert_eq!(compressed_size(GL_ETC1_RGB8_OES, 4, 4), Some(8));
        assert_eq!(compressed_size(GL_ETC1_RGB8_OES, 5, 5), Some(32));
        assert_eq!(compressed_size(GL_COMPRESSED_RGBA_ASTC_8x8_KHR, 16, 8), Some(32));
        assert_eq!(compressed_size(GL_RGBA8, 4, 4), None);
    }

    #[test]
    fn encoded_depth_is_packed_low_byte_first() {
        let rgba = [0x12, 0x34, 0x56, 0xff, 0x00, 0x00, 0x01, 0xff];
        assert_eq!(unpack_encoded_depth24(&rgba), vec![0x56, 0x34, 0x12, 0x01, 0x00, 0x00]);
    }
}
