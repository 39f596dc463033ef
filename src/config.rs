use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;

use crate::{
    model_download::default_pose_model_path,
    pipeline::{
        DEFAULT_MIN_DETECTION_CONFIDENCE, DEFAULT_SMOOTHING, ParameterChangePolicy, PoseSettings,
    },
    types::{BlockSize, DEFAULT_BLOCK_SIZE},
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Live camera mosaic with a pose skeleton overlay"
)]
pub struct Args {
    /// Index of the camera to open.
    #[arg(long, env = "POSE_MOSAIC_CAMERA", default_value_t = 0)]
    camera_index: u32,

    /// Initial mosaic block size in pixels, clamped to 2..=30.
    #[arg(long, env = "POSE_MOSAIC_BLOCK_SIZE", default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: u32,

    /// Pose landmark model; downloaded on first run when missing.
    #[arg(long, env = "POSE_MOSAIC_MODEL")]
    model: Option<PathBuf>,

    /// Detections below this confidence count as "nobody in frame".
    #[arg(long, default_value_t = DEFAULT_MIN_DETECTION_CONFIDENCE)]
    min_detection_confidence: f32,

    /// Draw raw detections instead of smoothing them across frames.
    #[arg(long)]
    no_smoothing: bool,

    /// Run mosaic-only, without loading the pose model.
    #[arg(long)]
    no_pose: bool,

    /// Reopen the camera whenever the block size changes.
    #[arg(long)]
    restart_on_change: bool,

    /// Print the available cameras and exit.
    #[arg(long)]
    list_cameras: bool,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub camera_index: u32,
    pub block_size: u32,
    pub model_path: PathBuf,
    /// `None` runs without pose estimation.
    pub pose: Option<PoseSettings>,
    pub change_policy: ParameterChangePolicy,
    pub list_cameras: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Args::parse().try_into()
    }
}

impl TryFrom<Args> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: Args) -> Result<Self> {
        if !(0.0..=1.0).contains(&args.min_detection_confidence) {
            bail!(
                "--min-detection-confidence must be within 0..=1, got {}",
                args.min_detection_confidence
            );
        }

        let pose = (!args.no_pose).then(|| PoseSettings {
            min_detection_confidence: args.min_detection_confidence,
            smoothing: (!args.no_smoothing).then_some(DEFAULT_SMOOTHING),
        });
        let change_policy = if args.restart_on_change {
            ParameterChangePolicy::RestartStream
        } else {
            ParameterChangePolicy::LiveUpdate
        };

        Ok(Self {
            camera_index: args.camera_index,
            block_size: BlockSize::clamp(args.block_size),
            model_path: args.model.unwrap_or_else(default_pose_model_path),
            pose,
            change_policy,
            list_cameras: args.list_cameras,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<AppConfig> {
        let argv = std::iter::once("pose-mosaic").chain(extra.iter().copied());
        Args::try_parse_from(argv)?.try_into()
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.model_path, default_pose_model_path());
        assert_eq!(config.change_policy, ParameterChangePolicy::LiveUpdate);
        assert!(!config.list_cameras);

        let pose = config.pose.expect("pose enabled by default");
        assert_eq!(pose.min_detection_confidence, DEFAULT_MIN_DETECTION_CONFIDENCE);
        assert_eq!(pose.smoothing, Some(DEFAULT_SMOOTHING));
    }

    #[test]
    fn block_size_is_clamped() {
        assert_eq!(parse(&["--block-size", "1"]).unwrap().block_size, 2);
        assert_eq!(parse(&["--block-size", "64"]).unwrap().block_size, 30);
        assert_eq!(parse(&["--block-size", "7"]).unwrap().block_size, 7);
    }

    #[test]
    fn flags_map_onto_config() {
        let config = parse(&[
            "--camera-index",
            "2",
            "--model",
            "/tmp/pose.onnx",
            "--no-smoothing",
            "--restart-on-change",
            "--min-detection-confidence",
            "0.8",
        ])
        .unwrap();
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.model_path, PathBuf::from("/tmp/pose.onnx"));
        assert_eq!(config.change_policy, ParameterChangePolicy::RestartStream);
        let pose = config.pose.unwrap();
        assert_eq!(pose.smoothing, None);
        assert_eq!(pose.min_detection_confidence, 0.8);

        assert!(parse(&["--no-pose"]).unwrap().pose.is_none());
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        assert!(parse(&["--min-detection-confidence", "1.5"]).is_err());
        assert!(parse(&["--camera-index", "-1"]).is_err());
    }
}
