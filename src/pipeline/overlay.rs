use super::{
    mailbox::Mailbox,
    skeleton::{RgbaSurface, draw_skeleton},
};
use crate::types::{Frame, PoseResult};

/// Completion handler for pose results: keeps the overlay surface, drops
/// results that arrive out of order and publishes each finished overlay.
pub struct OverlayPainter {
    surface: RgbaSurface,
    last_seq: Option<u64>,
    output: Mailbox<Frame>,
}

impl OverlayPainter {
    pub fn new(output: Mailbox<Frame>) -> Self {
        Self {
            surface: RgbaSurface::new(0, 0),
            last_seq: None,
            output,
        }
    }

    /// Draws `result` unless a newer one has already been drawn. Returns
    /// whether the overlay was replaced.
    pub fn paint(&mut self, result: PoseResult) -> bool {
        if self.last_seq.is_some_and(|last| result.seq <= last) {
            log::debug!(
                "discarding stale pose result {} (latest drawn {:?})",
                result.seq,
                self.last_seq
            );
            return false;
        }
        self.last_seq = Some(result.seq);

        self.surface.resize(result.width, result.height);
        draw_skeleton(&mut self.surface, &result.landmarks);

        self.output.post(Frame::new(
            self.surface.rgba.clone(),
            self.surface.width,
            self.surface.height,
        ));
        true
    }
}
