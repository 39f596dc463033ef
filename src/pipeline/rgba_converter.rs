use std::convert::TryFrom;

use anyhow::{Result, anyhow};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Decodes whatever the driver delivered into a tightly packed RGBA frame.
pub fn decode_camera_buffer(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    decode_pixels(
        buffer.source_frame_format(),
        buffer.buffer(),
        resolution.width_x,
        resolution.height_y,
    )
}

fn decode_pixels(format: FrameFormat, data: &[u8], width: u32, height: u32) -> Result<Frame> {
    let (rgba, width, height) = match format {
        FrameFormat::MJPEG => mjpeg_to_rgba(data)?,
        FrameFormat::NV12 => (nv12_to_rgba(data, width, height)?, width, height),
        FrameFormat::YUYV => (yuyv_to_rgba(data, width, height)?, width, height),
        FrameFormat::RAWRGB => (packed_rgb_to_rgba(data, width, height, false)?, width, height),
        FrameFormat::RAWBGR => (packed_rgb_to_rgba(data, width, height, true)?, width, height),
        FrameFormat::GRAY => (gray_to_rgba(data, width, height)?, width, height),
    };

    let frame = Frame::new(rgba, width, height);
    frame.validate()?;
    Ok(frame)
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn ensure_len(label: &str, data: &[u8], expected: usize) -> Result<()> {
    if data.len() < expected {
        return Err(anyhow!(
            "{label} buffer too small: got {}, expected {expected}",
            data.len()
        ));
    }
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let y_plane_len = pixel_count(width, height);
    let uv_plane_len = y_plane_len / 2;
    ensure_len("NV12", data, y_plane_len + uv_plane_len)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..y_plane_len],
        y_stride: width,
        uv_plane: &data[y_plane_len..y_plane_len + uv_plane_len],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; y_plane_len * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    ensure_len("YUYV", data, pixel_count(width, height) * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV422→RGBA failed: {err:?}"))?;

    Ok(rgba)
}

/// MJPEG frames carry their own dimensions; those win over the negotiated
/// resolution.
fn mjpeg_to_rgba(data: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;

    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder reported no image info"))?;
    let width = u32::try_from(info.width)?;
    let height = u32::try_from(info.height)?;
    Ok((rgba, width, height))
}

fn packed_rgb_to_rgba(data: &[u8], width: u32, height: u32, swap_rb: bool) -> Result<Vec<u8>> {
    let pixels = pixel_count(width, height);
    ensure_len(if swap_rb { "BGR" } else { "RGB" }, data, pixels * 3)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(3))
        .for_each(|(dst, src)| {
            let (r, b) = if swap_rb { (src[2], src[0]) } else { (src[0], src[2]) };
            dst[0] = r;
            dst[1] = src[1];
            dst[2] = b;
            dst[3] = 255;
        });

    Ok(rgba)
}

fn gray_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let pixels = pixel_count(width, height);
    ensure_len("GRAY", data, pixels)?;

    let mut rgba = vec![0u8; pixels * 4];
    rgba.par_chunks_mut(4)
        .zip(data[..pixels].par_iter().copied())
        .for_each(|(dst, value)| {
            dst[..3].fill(value);
            dst[3] = 255;
        });

    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_rgb_and_bgr_become_opaque_rgba() {
        let data = [10, 20, 30, 40, 50, 60];

        let rgb = decode_pixels(FrameFormat::RAWRGB, &data, 2, 1).unwrap();
        assert_eq!(rgb.rgba, vec![10, 20, 30, 255, 40, 50, 60, 255]);

        let bgr = decode_pixels(FrameFormat::RAWBGR, &data, 2, 1).unwrap();
        assert_eq!(bgr.rgba, vec![30, 20, 10, 255, 60, 50, 40, 255]);
        assert_eq!((bgr.width, bgr.height), (2, 1));
    }

    #[test]
    fn gray_is_replicated_across_channels() {
        let frame = decode_pixels(FrameFormat::GRAY, &[0, 128, 255, 7], 2, 2).unwrap();
        assert_eq!(
            frame.rgba,
            vec![0, 0, 0, 255, 128, 128, 128, 255, 255, 255, 255, 255, 7, 7, 7, 255]
        );
    }

    #[test]
    fn short_buffers_are_errors() {
        assert!(decode_pixels(FrameFormat::RAWRGB, &[1, 2, 3], 2, 1).is_err());
        assert!(decode_pixels(FrameFormat::GRAY, &[1], 2, 2).is_err());
        assert!(decode_pixels(FrameFormat::YUYV, &[0; 4], 4, 4).is_err());
        assert!(decode_pixels(FrameFormat::NV12, &[0; 8], 4, 4).is_err());
    }

    #[test]
    fn zero_sized_frames_are_rejected() {
        assert!(decode_pixels(FrameFormat::GRAY, &[], 0, 0).is_err());
    }

    #[test]
    fn garbage_mjpeg_is_an_error() {
        assert!(decode_pixels(FrameFormat::MJPEG, &[0, 1, 2, 3], 2, 2).is_err());
    }
}
