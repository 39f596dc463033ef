use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crate::error::FrameError;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
        }
    }

    /// Rejects zero-sized frames and buffers that do not hold exactly
    /// `width * height` RGBA pixels.
    pub fn validate(&self) -> Result<(), FrameError> {
        check_rgba_len(self.rgba.len(), self.width, self.height)
    }
}

pub(crate) fn check_rgba_len(len: usize, width: u32, height: u32) -> Result<(), FrameError> {
    if width == 0 || height == 0 {
        return Err(FrameError::Empty { width, height });
    }
    let expected = (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(4);
    if len != expected {
        return Err(FrameError::SizeMismatch {
            expected,
            actual: len,
        });
    }
    Ok(())
}

/// A body keypoint in normalized image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            visibility: 1.0,
        }
    }
}

/// Landmarks in MediaPipe pose order (0 = nose, 11 = left shoulder, ...).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    pub fn get(&self, index: usize) -> Option<&Landmark> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.points.iter()
    }
}

impl FromIterator<Landmark> for LandmarkSet {
    fn from_iter<I: IntoIterator<Item = Landmark>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Clone, Debug)]
pub struct PoseResult {
    /// Sequence number of the submission this result belongs to.
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub landmarks: LandmarkSet,
}

pub const MIN_BLOCK_SIZE: u32 = 2;
pub const MAX_BLOCK_SIZE: u32 = 30;
pub const DEFAULT_BLOCK_SIZE: u32 = 10;

/// Mosaic block size shared between the UI and the render loop.
#[derive(Clone, Debug)]
pub struct BlockSize(Arc<AtomicU32>);

impl BlockSize {
    pub fn new(value: u32) -> Self {
        Self(Arc::new(AtomicU32::new(Self::clamp(value))))
    }

    pub fn clamp(value: u32) -> u32 {
        value.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Stores the clamped value and returns it together with whether it changed.
    pub fn set(&self, value: u32) -> (u32, bool) {
        let value = Self::clamp(value);
        let previous = self.0.swap(value, Ordering::AcqRel);
        (value, previous != value)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}
