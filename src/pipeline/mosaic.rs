use rayon::prelude::*;

use crate::{
    error::FrameError,
    types::{Frame, check_rgba_len},
};

/// Replaces every `block_size`×`block_size` block of an RGBA buffer with the
/// truncated mean of its R, G and B channels. Alpha is left as is.
///
/// Blocks are anchored at the top-left corner; blocks on the right and bottom
/// edges are clipped to the image and averaged over their in-bounds pixels
/// only. A block size of 0 is treated as 1, which leaves the buffer unchanged.
pub fn pixelate(
    rgba: &mut [u8],
    width: u32,
    height: u32,
    block_size: u32,
) -> Result<(), FrameError> {
    check_rgba_len(rgba.len(), width, height)?;

    let block = block_size.max(1) as usize;
    if block == 1 {
        return Ok(());
    }

    let width = width as usize;
    let stride = width * 4;
    // Each band of `block` rows holds a full row of blocks, so bands never
    // share pixels and can be averaged in parallel.
    rgba.par_chunks_mut(stride * block)
        .for_each(|band| pixelate_band(band, width, block));

    Ok(())
}

pub fn pixelate_frame(frame: &mut Frame, block_size: u32) -> Result<(), FrameError> {
    pixelate(&mut frame.rgba, frame.width, frame.height, block_size)
}

fn pixelate_band(band: &mut [u8], width: usize, block: usize) {
    let stride = width * 4;
    let rows = band.len() / stride;

    for x0 in (0..width).step_by(block) {
        let x1 = (x0 + block).min(width);
        let span = x0 * 4..x1 * 4;

        let mut sum = [0u32; 3];
        for row in band.chunks_exact(stride) {
            for px in row[span.clone()].chunks_exact(4) {
                sum[0] += px[0] as u32;
                sum[1] += px[1] as u32;
                sum[2] += px[2] as u32;
            }
        }

        let count = (rows * (x1 - x0)) as u32;
        let mean = [
            (sum[0] / count) as u8,
            (sum[1] / count) as u8,
            (sum[2] / count) as u8,
        ];

        for row in band.chunks_exact_mut(stride) {
            for px in row[span.clone()].chunks_exact_mut(4) {
                px[..3].copy_from_slice(&mean);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_frame(width: u32, height: u32, seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
        (0..width * height * 4)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect()
    }

    fn pixel(rgba: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * width + x) * 4) as usize;
        [rgba[idx], rgba[idx + 1], rgba[idx + 2], rgba[idx + 3]]
    }

    #[test]
    fn every_block_is_uniform_and_alpha_is_kept() {
        let (width, height) = (37, 23);
        for block in 1..=30u32 {
            let original = noise_frame(width, height, block);
            let mut rgba = original.clone();
            pixelate(&mut rgba, width, height, block).unwrap();

            for y in 0..height {
                for x in 0..width {
                    let anchor = pixel(&rgba, width, x - x % block, y - y % block);
                    let current = pixel(&rgba, width, x, y);
                    assert_eq!(current[..3], anchor[..3], "block {block} at ({x},{y})");
                    assert_eq!(current[3], pixel(&original, width, x, y)[3]);
                }
            }
        }
    }

    #[test]
    fn block_size_one_is_identity() {
        let original = noise_frame(16, 9, 7);
        let mut rgba = original.clone();
        pixelate(&mut rgba, 16, 9, 1).unwrap();
        assert_eq!(rgba, original);

        pixelate(&mut rgba, 16, 9, 0).unwrap();
        assert_eq!(rgba, original);
    }

    #[test]
    fn uniform_block_keeps_its_color() {
        let mut rgba = [12u8, 200, 77, 9].repeat(6 * 6);
        pixelate(&mut rgba, 6, 6, 6).unwrap();
        assert_eq!(rgba, [12u8, 200, 77, 9].repeat(6 * 6));
    }

    #[test]
    fn partial_blocks_average_only_in_bounds_pixels() {
        // Red channel carries the pixel index, green is constant, blue is the row.
        let (width, height) = (4u32, 4u32);
        let mut rgba = Vec::new();
        for y in 0..height {
            for x in 0..width {
                rgba.extend_from_slice(&[(y * width + x) as u8, 50, y as u8, 100 + x as u8]);
            }
        }
        let original = rgba.clone();

        pixelate(&mut rgba, width, height, 3).unwrap();

        // [0,3)x[0,3): red 0+1+2+4+5+6+8+9+10 = 45 / 9, blue (0+1+2)*3 / 9.
        assert_eq!(pixel(&rgba, width, 1, 1)[..3], [5, 50, 1]);
        // Right strip x=3, y in [0,3): red 3+7+11 = 21 / 3.
        assert_eq!(pixel(&rgba, width, 3, 2)[..3], [7, 50, 1]);
        // Bottom strip y=3, x in [0,3): red 12+13+14 = 39 / 3.
        assert_eq!(pixel(&rgba, width, 0, 3)[..3], [13, 50, 3]);
        // Corner pixel averages itself.
        assert_eq!(pixel(&rgba, width, 3, 3)[..3], [15, 50, 3]);

        for (after, before) in rgba.chunks_exact(4).zip(original.chunks_exact(4)) {
            assert_eq!(after[3], before[3]);
        }
    }

    #[test]
    fn mean_truncates_toward_zero() {
        let mut rgba = vec![1, 0, 255, 255, 2, 1, 254, 255];
        pixelate(&mut rgba, 2, 1, 2).unwrap();
        assert_eq!(rgba, vec![1, 0, 254, 255, 1, 0, 254, 255]);
    }

    #[test]
    fn malformed_buffers_are_rejected_untouched() {
        let mut rgba = vec![9u8; 10];
        assert_eq!(
            pixelate(&mut rgba, 2, 2, 2),
            Err(FrameError::SizeMismatch {
                expected: 16,
                actual: 10
            })
        );
        assert_eq!(rgba, vec![9u8; 10]);

        let mut frame = Frame::new(Vec::new(), 0, 0);
        assert!(matches!(
            pixelate_frame(&mut frame, 4),
            Err(FrameError::Empty { .. })
        ));
    }
}
