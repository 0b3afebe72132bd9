use spyglass_encoder::FramebufferObservation;

/// Framebuffer observations are shrunk to fit in this many pixels per side.
pub const MAX_OBSERVATION_SIZE: u32 = 256;

/// Box-filters an RGBA8 image so neither side exceeds `max`, keeping the
/// aspect ratio. Returns the new size and pixels.
pub fn downsample_rgba8(data: &[u8], width: u32, height: u32, max: u32) -> (u32, u32, Vec<u8>) {
    debug_assert_eq!(data.len(), (width * height * 4) as usize);
    if width == 0 || height == 0 {
        return (0, 0, Vec::new());
    }

    let scale = (width.max(height) + max - 1) / max;
    if scale <= 1 {
        return (width, height, data.to_vec());
    }

    let out_width = (width / scale).max(1);
    let out_height = (height / scale).max(1);
    let mut out = Vec::with_capacity((out_width * out_height * 4) as usize);

    for y in 0..out_height {
        for x in 0..out_width {
            let mut sum = [0u32; 4];
            let mut count = 0u32;
            for sy in y * scale..((y + 1) * scale).min(height) {
                for sx in x * scale..((x + 1) * scale).min(width) {
                    let i = ((sy * width + sx) * 4) as usize;
                    for c in 0..4 {
                        sum[c] += data[i + c] as u32;
                    }
                    count += 1;
                }
            }
            for c in sum {
                out.push((c / count) as u8);
            }
        }
    }

    (out_width, out_height, out)
}

/// Reverses the row order of an image in place.
///
/// GL reads pixels bottom-up while traces store images top-down.
pub fn flip_rows(data: &mut [u8], row_pitch: usize, height: usize) {
    debug_assert!(data.len() >= row_pitch * height);
    for y in 0..height / 2 {
        let (top, bottom) = data.split_at_mut((height - 1 - y) * row_pitch);
        top[y * row_pitch..(y + 1) * row_pitch].swap_with_slice(&mut bottom[..row_pitch]);
    }
}

pub fn framebuffer_observation(data: &[u8], width: u32, height: u32) -> FramebufferObservation {
    let (downsampled_width, downsampled_height, data) =
        downsample_rgba8(data, width, height, MAX_OBSERVATION_SIZE);

    FramebufferObservation {
        original_width: width,
        original_height: height,
        downsampled_width,
        downsampled_height,
        data,
    }
}

#[cfg(test)]
mod tests {
    use crate::{downsample_rgba8, flip_rows, framebuffer_observation};

    #[test]
    fn small_images_are_left_alone() {
        let data = vec![9u8; 4 * 4 * 4];
        let (w, h, out) = downsample_rgba8(&data, 4, 4, 256);

        assert_eq!((w, h), (4, 4));
        assert_eq!(out, data);
    }

    #[test]
    fn large_images_are_averaged_down() {
        // 4x2 image, left half black, right half white, shrunk by 2.
        let mut data = Vec::new();
        for _ in 0..2 {
            data.extend_from_slice(&[0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255, 255, 255, 255, 255, 255]);
        }
        let (w, h, out) = downsample_rgba8(&data, 4, 2, 2);

        assert_eq!((w, h), (2, 1));
        assert_eq!(out, vec![0, 0, 0, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn rows_flip_top_to_bottom() {
        let mut data = vec![1, 1, 2, 2, 3, 3];
        flip_rows(&mut data, 2, 3);

        assert_eq!(data, vec![3, 3, 2, 2, 1, 1]);
    }

    #[test]
    fn observations_keep_the_original_size() {
        let data = vec![0u8; 512 * 300 * 4];
        let observation = framebuffer_observation(&data, 512, 300);

        assert_eq!(observation.original_width, 512);
        assert_eq!(observation.downsampled_width, 256);
        assert_eq!(observation.downsampled_height, 150);
        assert_eq!(observation.data.len(), 256 * 150 * 4);
    }
}
