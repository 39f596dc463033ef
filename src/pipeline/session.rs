use std::sync::Arc;

use super::{
    mailbox::Mailbox,
    pose::{PoseClient, PoseState},
    scheduler::{FrameSource, LoopState, RenderLoop, Scheduler},
};
use crate::{
    error::PipelineError,
    model_download::DownloadProgress,
    types::{BlockSize, Frame},
};

/// What a block-size change does to a running stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParameterChangePolicy {
    /// Only the shared value changes; the next tick picks it up.
    #[default]
    LiveUpdate,
    /// Stop the stream, release the camera and open it again.
    RestartStream,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not started, or the device is open but no frame has arrived yet.
    Waiting,
    Running,
    DeviceUnavailable(String),
}

type SourceOpener = Box<dyn FnMut() -> anyhow::Result<Box<dyn FrameSource>> + Send>;

/// Owns everything that lives for one application run: the pose client, the
/// shared block size, the output mailboxes and the current render loop.
pub struct MosaicSession {
    open_source: SourceOpener,
    pose: Arc<PoseClient>,
    block_size: BlockSize,
    policy: ParameterChangePolicy,
    canvas: Mailbox<Frame>,
    overlay: Mailbox<Frame>,
    render_loop: Option<RenderLoop>,
    last_error: Option<String>,
    model_download: DownloadProgress,
}

impl MosaicSession {
    /// `overlay` must be the mailbox the pose client's painter publishes to.
    pub fn new<F>(
        open_source: F,
        pose: Arc<PoseClient>,
        block_size: BlockSize,
        policy: ParameterChangePolicy,
        overlay: Mailbox<Frame>,
    ) -> Self
    where
        F: FnMut() -> anyhow::Result<Box<dyn FrameSource>> + Send + 'static,
    {
        Self {
            open_source: Box::new(open_source),
            pose,
            block_size,
            policy,
            canvas: Mailbox::new(),
            overlay,
            render_loop: None,
            last_error: None,
            model_download: DownloadProgress::default(),
        }
    }

    /// Progress of the pose model download, as recorded by the pose loader.
    pub fn with_model_download(mut self, progress: DownloadProgress) -> Self {
        self.model_download = progress;
        self
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.render_loop.is_some() {
            return Ok(());
        }

        let source = match (self.open_source)() {
            Ok(source) => source,
            Err(err) => {
                let message = format!("{err:#}");
                log::error!("camera unavailable: {message}");
                self.last_error = Some(message.clone());
                return Err(PipelineError::DeviceUnavailable(message));
            }
        };
        self.last_error = None;

        let mut scheduler = Scheduler::new(
            source,
            self.pose.clone(),
            self.canvas.clone(),
            self.block_size.clone(),
        );
        scheduler.on_source_ready();
        self.render_loop = Some(RenderLoop::spawn(scheduler));
        log::info!("mosaic session started (block size {})", self.block_size.get());
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(render_loop) = self.render_loop.take() {
            render_loop.stop();
        }
    }

    pub fn restart(&mut self) -> Result<(), PipelineError> {
        self.stop();
        self.start()
    }

    /// Stores the clamped value and returns it.
    pub fn set_block_size(&mut self, value: u32) -> u32 {
        let (value, changed) = self.block_size.set(value);
        if changed && self.policy == ParameterChangePolicy::RestartStream && self.render_loop.is_some()
        {
            log::info!("block size changed to {value}, restarting camera stream");
            if let Err(err) = self.restart() {
                log::error!("failed to restart camera stream: {err}");
            }
        }
        value
    }

    pub fn block_size(&self) -> u32 {
        self.block_size.get()
    }

    pub fn status(&self) -> SessionStatus {
        if let Some(message) = &self.last_error {
            return SessionStatus::DeviceUnavailable(message.clone());
        }
        match self.render_loop.as_ref().map(RenderLoop::state) {
            Some(LoopState::Running) => SessionStatus::Running,
            _ => SessionStatus::Waiting,
        }
    }

    pub fn pose_state(&self) -> PoseState {
        self.pose.state()
    }

    /// `(downloaded, total)` bytes while the pose model is being fetched.
    pub fn model_download(&self) -> Option<(u64, Option<u64>)> {
        self.model_download.snapshot()
    }

    /// Latest pixelated frame.
    pub fn canvas(&self) -> &Mailbox<Frame> {
        &self.canvas
    }

    /// Latest skeleton overlay.
    pub fn overlay(&self) -> &Mailbox<Frame> {
        &self.overlay
    }
}

impl Drop for MosaicSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::{Duration, Instant},
    };

    use anyhow::anyhow;

    use super::*;
    use crate::model_download::ModelDownloadEvent;

    struct LoopingSource {
        releases: Arc<AtomicUsize>,
    }

    impl FrameSource for LoopingSource {
        fn current_frame(&mut self, wait: Duration) -> Option<Frame> {
            thread::sleep(wait.min(Duration::from_millis(2)));
            Some(Frame::new(vec![200; 8 * 8 * 4], 8, 8))
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session(
        policy: ParameterChangePolicy,
    ) -> (MosaicSession, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let releases = Arc::new(AtomicUsize::new(0));
        let (open_count, release_count) = (opens.clone(), releases.clone());
        let session = MosaicSession::new(
            move || {
                open_count.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(LoopingSource {
                    releases: release_count.clone(),
                }) as Box<dyn FrameSource>)
            },
            Arc::new(PoseClient::disabled()),
            BlockSize::default(),
            policy,
            Mailbox::new(),
        );
        (session, opens, releases)
    }

    fn wait_for_running(session: &MosaicSession) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if session.status() == SessionStatus::Running {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn unavailable_device_is_reported_without_retry() {
        let opens = Arc::new(AtomicUsize::new(0));
        let open_count = opens.clone();
        let mut session = MosaicSession::new(
            move || {
                open_count.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("permission denied"))
            },
            Arc::new(PoseClient::disabled()),
            BlockSize::default(),
            ParameterChangePolicy::LiveUpdate,
            Mailbox::new(),
        );

        let err = session.start().unwrap_err();
        assert!(matches!(err, PipelineError::DeviceUnavailable(ref msg) if msg.contains("permission denied")));
        assert_eq!(
            session.status(),
            SessionStatus::DeviceUnavailable("permission denied".into())
        );
        thread::sleep(Duration::from_millis(20));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(session.pose_state(), PoseState::Failed);
        assert_eq!(session.model_download(), None);
    }

    #[test]
    fn exposes_model_download_progress() {
        let progress = DownloadProgress::default();
        let (session, _, _) = session(ParameterChangePolicy::LiveUpdate);
        let session = session.with_model_download(progress.clone());

        progress.record(&ModelDownloadEvent::Started { total: Some(1000) });
        progress.record(&ModelDownloadEvent::Progress {
            downloaded: 250,
            total: Some(1000),
        });
        assert_eq!(session.model_download(), Some((250, Some(1000))));
    }

    #[test]
    fn runs_mosaic_only_without_pose() {
        let (mut session, _, releases) = session(ParameterChangePolicy::LiveUpdate);
        assert_eq!(session.status(), SessionStatus::Waiting);

        session.start().unwrap();
        assert!(wait_for_running(&session));
        let frame = session
            .canvas()
            .wait(Duration::from_secs(1))
            .expect("pixelated frame");
        assert_eq!((frame.width, frame.height), (8, 8));
        assert!(session.overlay().take().is_none());

        session.stop();
        session.stop();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(session.status(), SessionStatus::Waiting);
    }

    #[test]
    fn live_update_keeps_the_stream() {
        let (mut session, opens, releases) = session(ParameterChangePolicy::LiveUpdate);
        session.start().unwrap();

        assert_eq!(session.set_block_size(15), 15);
        assert_eq!(session.set_block_size(100), 30);
        assert_eq!(session.set_block_size(0), 2);
        assert_eq!(session.block_size(), 2);
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn restart_policy_reopens_the_source_on_change() {
        let (mut session, opens, releases) = session(ParameterChangePolicy::RestartStream);
        session.start().unwrap();

        session.set_block_size(12);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        // Same value: nothing changes.
        session.set_block_size(12);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert!(wait_for_running(&session));
    }

    #[test]
    fn dropping_the_session_releases_the_source() {
        let (mut session, _, releases) = session(ParameterChangePolicy::LiveUpdate);
        session.start().unwrap();
        drop(session);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
