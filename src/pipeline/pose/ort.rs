use std::path::Path;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{PoseDetection, PoseService, common};
use crate::{
    model_download::{DownloadProgress, ensure_pose_model_ready},
    types::Frame,
};

/// Downloads the pose model if needed and opens an ORT session on it. Meant
/// to run as the pose client's loader; download events go to `progress`.
pub fn load_ort_engine(model_path: &Path, progress: &DownloadProgress) -> Result<OrtPoseEngine> {
    ensure_pose_model_ready(model_path, |event| progress.record(&event)).with_context(|| {
        format!(
            "failed to prepare pose model at {}",
            model_path.display()
        )
    })?;

    let engine = OrtPoseEngine::new(model_path)?;
    log::info!("pose ORT backend ready using {}", model_path.display());
    Ok(engine)
}

pub struct OrtPoseEngine {
    session: Session,
}

impl OrtPoseEngine {
    pub fn new(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ORT session from {}", model_path.display()))?;

        Ok(Self { session })
    }
}

impl PoseService for OrtPoseEngine {
    fn detect(&mut self, frame: &Frame) -> Result<Option<PoseDetection>> {
        let (input, letterbox) = common::prepare_frame(frame)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run ORT session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "pose model returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let confidence = outputs[1]
            .try_extract_array::<f32>()
            .ok()
            .and_then(|arr| arr.iter().next().copied())
            .unwrap_or(0.0);
        if confidence <= 0.0 {
            return Ok(None);
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = common::decode_landmarks(&flattened, &letterbox)?;

        Ok(Some(PoseDetection {
            landmarks,
            confidence: confidence.clamp(0.0, 1.0),
        }))
    }
}
