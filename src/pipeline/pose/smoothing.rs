use crate::types::{Landmark, LandmarkSet};

pub const DEFAULT_SMOOTHING: f32 = 0.5;

/// Exponential moving average over consecutive detections of the same body.
#[derive(Debug)]
pub struct LandmarkSmoother {
    alpha: f32,
    previous: Option<LandmarkSet>,
}

impl LandmarkSmoother {
    /// `alpha` is the weight of the newest detection, clamped to `(0, 1]`.
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(f32::EPSILON, 1.0),
            previous: None,
        }
    }

    pub fn apply(&mut self, current: LandmarkSet) -> LandmarkSet {
        let smoothed = match &self.previous {
            Some(previous) if previous.len() == current.len() => previous
                .iter()
                .zip(current.iter())
                .map(|(prev, cur)| Landmark {
                    x: prev.x + self.alpha * (cur.x - prev.x),
                    y: prev.y + self.alpha * (cur.y - prev.y),
                    visibility: cur.visibility,
                })
                .collect(),
            _ => current,
        };
        self.previous = Some(smoothed.clone());
        smoothed
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
