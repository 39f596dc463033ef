use crate::types::LandmarkSet;

/// Bones drawn between MediaPipe pose landmarks: shoulders, torso sides, hips,
/// arms and legs.
pub const CONNECTIONS: &[(usize, usize)] = &[
    (11, 12),
    (11, 23),
    (12, 24),
    (23, 24),
    (11, 13),
    (13, 15),
    (12, 14),
    (14, 16),
    (23, 25),
    (25, 27),
    (24, 26),
    (26, 28),
];

pub const SKELETON_LINE_THICKNESS: i32 = 4;
pub const LANDMARK_RADIUS: i32 = 5;

const LINE_COLOR: [u8; 4] = [0, 255, 0, 255];
const POINT_COLOR: [u8; 4] = [255, 0, 0, 255];

/// Drawing surface the skeleton is rendered onto.
pub trait Canvas {
    fn size(&self) -> (u32, u32);
    fn clear(&mut self);
    fn line(&mut self, from: (f32, f32), to: (f32, f32), color: [u8; 4], thickness: i32);
    fn fill_circle(&mut self, center: (f32, f32), radius: i32, color: [u8; 4]);
}

/// Replaces whatever is on `canvas` with the skeleton of `landmarks`.
///
/// Connections with a missing endpoint are skipped; every landmark that is
/// present gets a marker whether or not it belongs to a drawn bone.
pub fn draw_skeleton<C: Canvas + ?Sized>(canvas: &mut C, landmarks: &LandmarkSet) {
    canvas.clear();
    if landmarks.is_empty() {
        return;
    }

    let (width, height) = canvas.size();
    let to_pixels = |x: f32, y: f32| (x * width as f32, y * height as f32);

    for &(a, b) in CONNECTIONS {
        if let (Some(pa), Some(pb)) = (landmarks.get(a), landmarks.get(b)) {
            canvas.line(
                to_pixels(pa.x, pa.y),
                to_pixels(pb.x, pb.y),
                LINE_COLOR,
                SKELETON_LINE_THICKNESS,
            );
        }
    }

    for point in landmarks.iter() {
        canvas.fill_circle(to_pixels(point.x, point.y), LANDMARK_RADIUS, POINT_COLOR);
    }
}

/// Transparent RGBA overlay buffer.
#[derive(Clone, Debug)]
pub struct RgbaSurface {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RgbaSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            rgba: vec![0; width as usize * height as usize * 4],
            width,
            height,
        }
    }

    /// Resizes the surface, discarding its contents when the size changes.
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            *self = Self::new(width, height);
        }
    }

    fn put_pixel_safe(&mut self, x: i32, y: i32, color: [u8; 4]) {
        if x < 0 || y < 0 {
            return;
        }
        let (ux, uy) = (x as u32, y as u32);
        if ux >= self.width || uy >= self.height {
            return;
        }
        let idx = ((uy * self.width + ux) as usize) * 4;
        if idx + 3 < self.rgba.len() {
            self.rgba[idx..idx + 4].copy_from_slice(&color);
        }
    }
}

impl Canvas for RgbaSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.rgba.fill(0);
    }

    fn line(&mut self, from: (f32, f32), to: (f32, f32), color: [u8; 4], thickness: i32) {
        let (mut x0, mut y0) = (from.0 as i32, from.1 as i32);
        let (x1, y1) = (to.0 as i32, to.1 as i32);
        let dx = (x1 - x0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let dy = -(y1 - y0).abs();
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        // Square brush exactly `thickness` pixels wide; even widths lean
        // towards the top-left.
        let thickness = thickness.max(1);
        let brush = -(thickness / 2)..=(thickness - 1) / 2;

        loop {
            for ox in brush.clone() {
                for oy in brush.clone() {
                    self.put_pixel_safe(x0 + ox, y0 + oy, color);
                }
            }
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    fn fill_circle(&mut self, center: (f32, f32), radius: i32, color: [u8; 4]) {
        let (cx, cy) = (center.0 as i32, center.1 as i32);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.put_pixel_safe(cx + dx, cy + dy, color);
                }
            }
        }
    }
}
