mod common;
mod ort;
mod smoothing;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, bounded};

use super::mailbox::Mailbox;
use crate::types::{Frame, LandmarkSet, PoseResult};

use self::smoothing::LandmarkSmoother;

pub use self::ort::load_ort_engine;
pub use self::smoothing::DEFAULT_SMOOTHING;

pub const DEFAULT_MIN_DETECTION_CONFIDENCE: f32 = 0.5;

#[derive(Clone, Debug)]
pub struct PoseDetection {
    pub landmarks: LandmarkSet,
    pub confidence: f32,
}

/// Black-box pose estimator. `Ok(None)` means nobody was found in the frame.
pub trait PoseService: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Option<PoseDetection>>;
}

/// Fire-and-forget frame submission as seen by the render loop.
pub trait PoseSink {
    /// Returns whether the frame was accepted.
    fn submit(&self, frame: Frame) -> bool;
}

impl<T: PoseSink + ?Sized> PoseSink for Arc<T> {
    fn submit(&self, frame: Frame) -> bool {
        (**self).submit(frame)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoseState {
    Loading,
    Ready,
    Failed,
}

impl PoseState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoseState::Loading,
            1 => PoseState::Ready,
            _ => PoseState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PoseState::Loading => 0,
            PoseState::Ready => 1,
            PoseState::Failed => 2,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoseSettings {
    pub min_detection_confidence: f32,
    /// Weight of the newest detection; `None` disables smoothing.
    pub smoothing: Option<f32>,
}

impl Default for PoseSettings {
    fn default() -> Self {
        Self {
            min_detection_confidence: DEFAULT_MIN_DETECTION_CONFIDENCE,
            smoothing: Some(DEFAULT_SMOOTHING),
        }
    }
}

struct PoseJob {
    seq: u64,
    frame: Frame,
}

/// Hands frames to a pose service running on its own worker thread.
///
/// At most one detection runs at a time and at most one frame waits behind
/// it; a newer submission replaces the waiting one. Until the service has
/// finished loading every submission is ignored, and if loading fails the
/// client stays inert for good.
pub struct PoseClient {
    jobs: Mailbox<PoseJob>,
    state: Arc<AtomicU8>,
    ready_rx: Receiver<()>,
    next_seq: AtomicU64,
    _handle: Option<thread::JoinHandle<()>>,
}

impl PoseClient {
    /// Starts the worker. `loader` runs on the worker thread and `on_result`
    /// is invoked there for every detection, in submission order.
    pub fn spawn<L, S, F>(loader: L, settings: PoseSettings, on_result: F) -> Self
    where
        L: FnOnce() -> anyhow::Result<S> + Send + 'static,
        S: PoseService,
        F: FnMut(PoseResult) + Send + 'static,
    {
        let jobs = Mailbox::new();
        let job_rx = jobs.receiver();
        let state = Arc::new(AtomicU8::new(PoseState::Loading.as_u8()));
        // Never sent on; dropping the sender wakes everyone in `wait_ready`.
        let (ready_tx, ready_rx) = bounded::<()>(0);

        let worker_state = state.clone();
        let handle = thread::spawn(move || {
            let service = match loader() {
                Ok(service) => {
                    log::info!("pose estimator ready");
                    worker_state.store(PoseState::Ready.as_u8(), Ordering::Release);
                    drop(ready_tx);
                    service
                }
                Err(err) => {
                    log::error!(
                        "pose estimator unavailable, continuing without skeleton: {err:?}"
                    );
                    worker_state.store(PoseState::Failed.as_u8(), Ordering::Release);
                    drop(ready_tx);
                    return;
                }
            };

            run_worker_loop(service, job_rx, settings, on_result);
        });

        Self {
            jobs,
            state,
            ready_rx,
            next_seq: AtomicU64::new(0),
            _handle: Some(handle),
        }
    }

    /// A client that never becomes ready.
    pub fn disabled() -> Self {
        let (_, ready_rx) = bounded::<()>(0);
        Self {
            jobs: Mailbox::new(),
            state: Arc::new(AtomicU8::new(PoseState::Failed.as_u8())),
            ready_rx,
            next_seq: AtomicU64::new(0),
            _handle: None,
        }
    }

    pub fn state(&self) -> PoseState {
        PoseState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Blocks until the service finished loading or `timeout` elapsed.
    /// Returns whether the client is ready.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        if self.state() == PoseState::Loading {
            let _ = self.ready_rx.recv_timeout(timeout);
        }
        self.state() == PoseState::Ready
    }
}

const READY_POLL: Duration = Duration::from_millis(250);

/// Follows a client until its loader has settled and logs the outcome. Holds
/// only a weak reference, so it never keeps a dropped client alive.
///
/// Yields the settled state, or `None` when the client went away first.
pub fn watch_readiness(client: &Arc<PoseClient>) -> thread::JoinHandle<Option<PoseState>> {
    let weak = Arc::downgrade(client);
    thread::spawn(move || {
        loop {
            let client = weak.upgrade()?;
            if client.wait_ready(READY_POLL) {
                log::info!("skeleton overlay enabled");
                return Some(PoseState::Ready);
            }
            if client.state() == PoseState::Failed {
                log::warn!("skeleton overlay disabled, rendering mosaic only");
                return Some(PoseState::Failed);
            }
        }
    })
}

impl PoseSink for PoseClient {
    fn submit(&self, frame: Frame) -> bool {
        if self.state() != PoseState::Ready {
            return false;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(stale) = self.jobs.post(PoseJob { seq, frame }) {
            log::trace!("pose worker busy, replaced pending frame {}", stale.seq);
        }
        true
    }
}

fn run_worker_loop<S, F>(
    mut service: S,
    job_rx: Receiver<PoseJob>,
    settings: PoseSettings,
    mut on_result: F,
) where
    S: PoseService,
    F: FnMut(PoseResult),
{
    let mut smoother = settings.smoothing.map(LandmarkSmoother::new);

    // Ends once the owning client is dropped.
    while let Ok(job) = job_rx.recv() {
        match service.detect(&job.frame) {
            Ok(Some(detection)) if detection.confidence >= settings.min_detection_confidence => {
                let landmarks = match smoother.as_mut() {
                    Some(smoother) => smoother.apply(detection.landmarks),
                    None => detection.landmarks,
                };
                on_result(PoseResult {
                    seq: job.seq,
                    width: job.frame.width,
                    height: job.frame.height,
                    landmarks,
                });
            }
            Ok(_) => {
                if let Some(smoother) = smoother.as_mut() {
                    smoother.reset();
                }
            }
            Err(err) => {
                log::warn!("pose inference failed: {err:?}");
            }
        }
    }

    log::debug!("pose worker stopped");
}
