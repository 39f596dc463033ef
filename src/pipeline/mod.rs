#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod mailbox;
pub mod mosaic;
pub mod overlay;
pub mod pose;
#[cfg(feature = "camera-nokhwa")]
pub mod rgba_converter;
pub mod scheduler;
pub mod session;
pub mod skeleton;

use std::sync::Arc;

// Re-exports for convenience
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraSettings, CameraStream, available_cameras};
pub use mailbox::Mailbox;
pub use overlay::OverlayPainter;
pub use pose::{
    DEFAULT_MIN_DETECTION_CONFIDENCE, DEFAULT_SMOOTHING, PoseClient, PoseSettings, PoseState,
    load_ort_engine, watch_readiness,
};
pub use scheduler::FrameSource;
pub use session::{MosaicSession, ParameterChangePolicy, SessionStatus};

use crate::{config::AppConfig, model_download::DownloadProgress, types::BlockSize};

/// Wires the camera, pose client and overlay painter for one application run.
/// The pose model starts loading immediately; the camera opens on `start`.
pub fn build_session(config: &AppConfig) -> MosaicSession {
    let overlay = Mailbox::new();
    let download = DownloadProgress::default();

    let pose = match &config.pose {
        Some(settings) => {
            let model_path = config.model_path.clone();
            let loader_download = download.clone();
            let mut painter = OverlayPainter::new(overlay.clone());
            let client = Arc::new(PoseClient::spawn(
                move || load_ort_engine(&model_path, &loader_download),
                settings.clone(),
                move |result| {
                    painter.paint(result);
                },
            ));
            let _ = watch_readiness(&client);
            client
        }
        None => {
            log::info!("pose estimation disabled, running mosaic only");
            Arc::new(PoseClient::disabled())
        }
    };

    MosaicSession::new(
        camera_opener(config.camera_index),
        pose,
        BlockSize::new(config.block_size),
        config.change_policy,
        overlay,
    )
    .with_model_download(download)
}

#[cfg(feature = "camera-nokhwa")]
fn camera_opener(
    index: u32,
) -> impl FnMut() -> anyhow::Result<Box<dyn FrameSource>> + Send + 'static {
    move || {
        let stream = CameraStream::open(CameraSettings::new(index))?;
        Ok(Box::new(stream) as Box<dyn FrameSource>)
    }
}

#[cfg(not(feature = "camera-nokhwa"))]
fn camera_opener(
    index: u32,
) -> impl FnMut() -> anyhow::Result<Box<dyn FrameSource>> + Send + 'static {
    move || {
        Err(anyhow::anyhow!(
            "camera {index} unavailable: built without the camera-nokhwa feature"
        ))
    }
}
