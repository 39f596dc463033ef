use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::bounded;
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
};

use super::{mailbox::Mailbox, rgba_converter, scheduler::FrameSource};
use crate::types::Frame;

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

pub const IDEAL_WIDTH: u32 = 640;
pub const IDEAL_HEIGHT: u32 = 480;
const IDEAL_FRAME_RATE: u32 = 30;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraSettings {
    pub index: u32,
    pub width: u32,
    pub height: u32,
}

impl CameraSettings {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            width: IDEAL_WIDTH,
            height: IDEAL_HEIGHT,
        }
    }
}

fn requested_formats(settings: &CameraSettings) -> Vec<RequestedFormat<'static>> {
    let mut formats: Vec<RequestedFormat<'static>> = [FrameFormat::MJPEG, FrameFormat::YUYV]
        .into_iter()
        .map(|format| {
            RequestedFormat::with_formats(
                RequestedFormatType::Closest(CameraFormat::new(
                    Resolution::new(settings.width, settings.height),
                    format,
                    IDEAL_FRAME_RATE,
                )),
                PREFERRED_PIXEL_FORMATS,
            )
        })
        .collect();

    formats.extend([
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        // Fall back to any format Nokhwa can decode.
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]);
    formats
}

const READ_RETRY_BASE: Duration = Duration::from_millis(10);
const READ_RETRY_MAX: Duration = Duration::from_millis(500);

/// Spacing of frame reads while the device keeps failing, e.g. after it was
/// unplugged. Doubles per consecutive failure up to `READ_RETRY_MAX`.
#[derive(Debug, Default)]
struct ReadBackoff {
    failures: u32,
}

impl ReadBackoff {
    /// Records a failed read and returns how long to wait before the next one.
    fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let factor = 1u32 << (self.failures - 1).min(6);
        (READ_RETRY_BASE * factor).min(READ_RETRY_MAX)
    }

    fn on_success(&mut self) {
        if self.failures > 0 {
            log::info!("camera recovered after {} failed reads", self.failures);
            self.failures = 0;
        }
    }

    fn failures(&self) -> u32 {
        self.failures
    }

    /// Logs the 1st, 2nd, 4th, 8th, ... failure of a streak.
    fn should_log(&self) -> bool {
        self.failures.is_power_of_two()
    }
}

#[derive(Clone, Debug)]
pub struct CameraDevice {
    pub index: CameraIndex,
    pub label: String,
}

pub fn available_cameras() -> Result<Vec<CameraDevice>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .map(|info| CameraDevice {
            index: info.index().clone(),
            label: info.human_name(),
        })
        .collect())
}

fn build_camera(settings: &CameraSettings) -> Result<Camera> {
    let index = CameraIndex::Index(settings.index);
    let mut last_err = None;

    for requested in requested_formats(settings) {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// A running capture thread. Only the newest decoded frame is kept.
#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    frames: Mailbox<Frame>,
}

impl CameraStream {
    /// Opens the device on the capture thread and blocks until the stream is
    /// either running or has failed to open.
    pub fn open(settings: CameraSettings) -> Result<Self> {
        let frames = Mailbox::new();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);

        let stop_flag = stop.clone();
        let capture_frames = frames.clone();
        let handle = thread::spawn(move || {
            // Nokhwa cameras are not Send, so the device lives on this thread.
            let mut camera = match build_camera(&settings) {
                Ok(camera) => camera,
                Err(err) => {
                    let _ = ready_tx.send(Err(format!("{err:#}")));
                    return;
                }
            };
            let format = camera.camera_format();
            log::info!(
                "camera {} opened: {}x{} {:?} @ {} fps",
                settings.index,
                format.width(),
                format.height(),
                format.format(),
                format.frame_rate()
            );
            let _ = ready_tx.send(Ok(()));

            let mut backoff = ReadBackoff::default();
            while !stop_flag.load(Ordering::Relaxed) {
                let frame_start = Instant::now();
                let buffer = match camera.frame() {
                    Ok(buffer) => {
                        backoff.on_success();
                        buffer
                    }
                    Err(err) => {
                        let delay = backoff.on_failure();
                        if backoff.should_log() {
                            log::warn!(
                                "camera frame read failed {} time(s) in a row (after {:?}): {err:?}",
                                backoff.failures(),
                                frame_start.elapsed()
                            );
                        }
                        thread::sleep(delay);
                        continue;
                    }
                };

                match rgba_converter::decode_camera_buffer(&buffer) {
                    Ok(frame) => {
                        capture_frames.post(frame);
                    }
                    Err(err) => log::warn!("failed to decode camera frame {err:?}"),
                }
            }

            if let Err(err) = camera.stop_stream() {
                log::warn!("failed to stop camera stream: {err:?}");
            }
            log::info!("camera {} released", settings.index);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop,
                handle: Some(handle),
                frames,
            }),
            Ok(Err(message)) => {
                let _ = handle.join();
                Err(anyhow!(message))
            }
            Err(_) => {
                let _ = handle.join();
                Err(anyhow!("camera thread exited before the device opened"))
            }
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl FrameSource for CameraStream {
    fn current_frame(&mut self, wait: Duration) -> Option<Frame> {
        self.frames.wait(wait)
    }

    fn release(&mut self) {
        self.shutdown();
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}
