use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread,
    time::Duration,
};

use super::{mailbox::Mailbox, mosaic::pixelate_frame, pose::PoseSink};
use crate::{
    error::FrameError,
    types::{BlockSize, Frame},
};

/// Longest a tick waits for the next camera frame before giving the loop a
/// chance to observe a stop request.
pub const FRAME_WAIT: Duration = Duration::from_millis(50);

pub trait FrameSource: Send + 'static {
    /// Waits up to `wait` for a frame newer than the last one returned.
    fn current_frame(&mut self, wait: Duration) -> Option<Frame>;
    /// Stops the underlying device. Called once when the loop stops.
    fn release(&mut self);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn current_frame(&mut self, wait: Duration) -> Option<Frame> {
        (**self).current_frame(wait)
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Primary canvas the pixelated frames are painted to.
pub trait FrameSink: Send + 'static {
    fn present(&mut self, frame: Frame);
}

impl FrameSink for Mailbox<Frame> {
    fn present(&mut self, frame: Frame) {
        self.post(frame);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Starting,
    Running,
    Stopped,
}

impl LoopState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LoopState::Idle,
            1 => LoopState::Starting,
            2 => LoopState::Running,
            _ => LoopState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Starting => 1,
            LoopState::Running => 2,
            LoopState::Stopped => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotStarted,
    NoFrame,
    Malformed(FrameError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Rendered { frame: u64, pose_submitted: bool },
    Skipped(SkipReason),
    Stopped,
}

/// One tick of the pipeline: read, pixelate, paint, hand off to pose.
pub struct Scheduler<S, P, C> {
    state: LoopState,
    source: Option<S>,
    pose: P,
    canvas: C,
    block_size: BlockSize,
    rendered: u64,
}

impl<S, P, C> Scheduler<S, P, C>
where
    S: FrameSource,
    P: PoseSink,
    C: FrameSink,
{
    pub fn new(source: S, pose: P, canvas: C, block_size: BlockSize) -> Self {
        Self {
            state: LoopState::Idle,
            source: Some(source),
            pose,
            canvas,
            block_size,
            rendered: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The frame source has been acquired.
    pub fn on_source_ready(&mut self) {
        if self.state == LoopState::Idle {
            self.state = LoopState::Starting;
            log::debug!("frame source ready, waiting for first frame");
        }
    }

    pub fn tick(&mut self) -> TickOutcome {
        match self.state {
            LoopState::Stopped => return TickOutcome::Stopped,
            LoopState::Idle => return TickOutcome::Skipped(SkipReason::NotStarted),
            LoopState::Starting | LoopState::Running => {}
        }
        let Some(source) = self.source.as_mut() else {
            return TickOutcome::Stopped;
        };

        let Some(mut frame) = source.current_frame(FRAME_WAIT) else {
            return TickOutcome::Skipped(SkipReason::NoFrame);
        };
        if let Err(err) = frame.validate() {
            log::debug!("skipping malformed frame: {err}");
            return TickOutcome::Skipped(SkipReason::Malformed(err));
        }

        if self.state == LoopState::Starting {
            log::info!("render loop running at {}x{}", frame.width, frame.height);
            self.state = LoopState::Running;
        }

        // Read once so the whole frame uses one block size.
        let block_size = self.block_size.get();
        let raw = frame.clone();
        if let Err(err) = pixelate_frame(&mut frame, block_size) {
            log::debug!("skipping frame that failed to pixelate: {err}");
            return TickOutcome::Skipped(SkipReason::Malformed(err));
        }

        self.canvas.present(frame);
        let pose_submitted = self.pose.submit(raw);
        self.rendered += 1;

        TickOutcome::Rendered {
            frame: self.rendered,
            pose_submitted,
        }
    }

    /// Moves to `Stopped` and releases the frame source. Idempotent.
    pub fn stop(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Stopped;
        if let Some(mut source) = self.source.take() {
            source.release();
        }
        log::info!("render loop stopped after {} frames", self.rendered);
    }
}

/// Runs a [`Scheduler`] on its own thread, one tick after another.
///
/// Each tick yields inside the frame source while waiting for the next frame,
/// so the loop follows the camera's frame rate and never overlaps itself.
#[derive(Debug)]
pub struct RenderLoop {
    stop: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RenderLoop {
    pub fn spawn<S, P, C>(mut scheduler: Scheduler<S, P, C>) -> Self
    where
        S: FrameSource,
        P: PoseSink + Send + 'static,
        C: FrameSink,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let state = Arc::new(AtomicU8::new(scheduler.state().as_u8()));
        let stop_flag = stop.clone();
        let shared_state = state.clone();

        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                let outcome = scheduler.tick();
                shared_state.store(scheduler.state().as_u8(), Ordering::Release);
                match outcome {
                    TickOutcome::Stopped => break,
                    TickOutcome::Skipped(SkipReason::NotStarted) => thread::sleep(FRAME_WAIT),
                    TickOutcome::Skipped(_) | TickOutcome::Rendered { .. } => {}
                }
            }
            scheduler.stop();
            shared_state.store(LoopState::Stopped.as_u8(), Ordering::Release);
        });

        Self {
            stop,
            state,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancels the next tick and waits for the loop to release its source.
    /// No tick runs once this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("render loop thread panicked");
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Mutex, atomic::AtomicUsize},
        time::Instant,
    };

    use super::*;

    #[derive(Clone, Default)]
    struct Counters {
        reads: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
        submissions: Arc<AtomicUsize>,
    }

    /// Plays back scripted frames, then keeps returning `fallback`.
    struct ScriptedSource {
        script: VecDeque<Option<Frame>>,
        fallback: Option<Frame>,
        counters: Counters,
    }

    impl FrameSource for ScriptedSource {
        fn current_frame(&mut self, _wait: Duration) -> Option<Frame> {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            match self.script.pop_front() {
                Some(frame) => frame,
                None => self.fallback.clone(),
            }
        }

        fn release(&mut self) {
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone)]
    struct RecordingPose {
        counters: Counters,
        frames: Arc<Mutex<Vec<Frame>>>,
    }

    impl PoseSink for RecordingPose {
        fn submit(&self, frame: Frame) -> bool {
            self.counters.submissions.fetch_add(1, Ordering::SeqCst);
            self.frames.lock().unwrap().push(frame);
            true
        }
    }

    fn gradient(width: u32, height: u32) -> Frame {
        let mut rgba = Vec::new();
        for y in 0..height {
            for x in 0..width {
                rgba.extend_from_slice(&[(x * 10) as u8, (y * 10) as u8, 0, 255]);
            }
        }
        Frame::new(rgba, width, height)
    }

    fn scheduler(
        script: Vec<Option<Frame>>,
        fallback: Option<Frame>,
        block_size: BlockSize,
    ) -> (
        Scheduler<ScriptedSource, RecordingPose, Mailbox<Frame>>,
        Counters,
        RecordingPose,
        Mailbox<Frame>,
    ) {
        let counters = Counters::default();
        let source = ScriptedSource {
            script: script.into(),
            fallback,
            counters: counters.clone(),
        };
        let pose = RecordingPose {
            counters: counters.clone(),
            frames: Arc::new(Mutex::new(Vec::new())),
        };
        let canvas = Mailbox::new();
        let scheduler = Scheduler::new(source, pose.clone(), canvas.clone(), block_size);
        (scheduler, counters, pose, canvas)
    }

    #[test]
    fn walks_through_the_state_machine() {
        let (mut scheduler, counters, pose, canvas) =
            scheduler(vec![None, Some(gradient(4, 4))], None, BlockSize::new(2));

        assert_eq!(scheduler.state(), LoopState::Idle);
        assert_eq!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::NotStarted)
        );
        assert_eq!(counters.reads.load(Ordering::SeqCst), 0);

        scheduler.on_source_ready();
        assert_eq!(scheduler.state(), LoopState::Starting);
        assert_eq!(scheduler.tick(), TickOutcome::Skipped(SkipReason::NoFrame));
        assert_eq!(scheduler.state(), LoopState::Starting);

        assert_eq!(
            scheduler.tick(),
            TickOutcome::Rendered {
                frame: 1,
                pose_submitted: true
            }
        );
        assert_eq!(scheduler.state(), LoopState::Running);

        let painted = canvas.take().expect("frame painted");
        // Top-left 2x2 block of the gradient: red (0+10+0+10)/4, green likewise.
        assert_eq!(painted.rgba[..4], [5, 5, 0, 255]);

        // The pose path receives the untouched camera frame.
        let submitted = pose.frames.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].rgba, gradient(4, 4).rgba);
    }

    #[test]
    fn nothing_is_read_or_submitted_after_stop() {
        let (mut scheduler, counters, _, _) =
            scheduler(Vec::new(), Some(gradient(8, 8)), BlockSize::default());
        scheduler.on_source_ready();
        for _ in 0..3 {
            assert!(matches!(scheduler.tick(), TickOutcome::Rendered { .. }));
        }

        scheduler.stop();
        let reads = counters.reads.load(Ordering::SeqCst);
        let submissions = counters.submissions.load(Ordering::SeqCst);
        assert_eq!((reads, submissions), (3, 3));

        for _ in 0..10 {
            assert_eq!(scheduler.tick(), TickOutcome::Stopped);
        }
        scheduler.stop();

        assert_eq!(scheduler.state(), LoopState::Stopped);
        assert_eq!(counters.reads.load(Ordering::SeqCst), reads);
        assert_eq!(counters.submissions.load(Ordering::SeqCst), submissions);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn block_size_change_applies_on_next_tick() {
        let block_size = BlockSize::new(2);
        let (mut scheduler, _, _, canvas) =
            scheduler(Vec::new(), Some(gradient(4, 4)), block_size.clone());
        scheduler.on_source_ready();

        scheduler.tick();
        assert_eq!(canvas.take().unwrap().rgba[..4], [5, 5, 0, 255]);

        block_size.set(4);
        scheduler.tick();
        // Whole 4x4 frame is one block: red and green average to (0+10+20+30)/4.
        assert_eq!(canvas.take().unwrap().rgba[..4], [15, 15, 0, 255]);
        assert_eq!(scheduler.state(), LoopState::Running);
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let broken = Frame::new(vec![0; 7], 4, 4);
        let (mut scheduler, counters, _, canvas) = scheduler(
            vec![Some(Frame::new(Vec::new(), 0, 0)), Some(broken)],
            Some(gradient(4, 4)),
            BlockSize::default(),
        );
        scheduler.on_source_ready();

        assert!(matches!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::Malformed(FrameError::Empty { .. }))
        ));
        assert!(matches!(
            scheduler.tick(),
            TickOutcome::Skipped(SkipReason::Malformed(FrameError::SizeMismatch { .. }))
        ));
        assert!(canvas.take().is_none());
        assert_eq!(counters.submissions.load(Ordering::SeqCst), 0);

        assert!(matches!(scheduler.tick(), TickOutcome::Rendered { .. }));
    }

    #[test]
    fn render_loop_stops_deterministically() {
        let (mut scheduler, counters, _, canvas) =
            scheduler(Vec::new(), Some(gradient(8, 8)), BlockSize::default());
        scheduler.on_source_ready();
        let render_loop = RenderLoop::spawn(scheduler);

        let deadline = Instant::now() + Duration::from_secs(2);
        while counters.submissions.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(counters.submissions.load(Ordering::SeqCst) >= 5);
        assert_eq!(render_loop.state(), LoopState::Running);
        assert!(canvas.take().is_some());

        render_loop.stop();
        let reads = counters.reads.load(Ordering::SeqCst);
        let submissions = counters.submissions.load(Ordering::SeqCst);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(counters.reads.load(Ordering::SeqCst), reads);
        assert_eq!(counters.submissions.load(Ordering::SeqCst), submissions);
    }
}
