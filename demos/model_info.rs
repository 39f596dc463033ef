#[path = "../src/model_download.rs"]
mod model_download;

use std::path::{Path, PathBuf};

use anyhow::Result;
use model_download::{ModelDownloadEvent, default_pose_model_path, ensure_pose_model_ready};
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::ValueType,
};

fn main() -> Result<()> {
    env_logger::init();

    let model_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_pose_model_path);

    println!("Loading pose model: {}", model_path.display());
    ensure_pose_model_ready(&model_path, |event| {
        if event == ModelDownloadEvent::AlreadyPresent {
            println!("Model already downloaded");
        }
    })?;
    print_model_info(&model_path)
}

fn print_model_info(model_path: &Path) -> Result<()> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .commit_from_file(model_path)?;

    println!("Inputs:");
    for (idx, input) in session.inputs.iter().enumerate() {
        println!("  {idx}: name=\"{}\" type={:?}", input.name, input.input_type);
        if let ValueType::Tensor { shape, .. } = &input.input_type {
            println!("     shape={shape:?}");
        }
    }

    // Expect landmarks (1x195), pose confidence (1x1), then segmentation and
    // heatmap outputs the app does not read.
    println!("Outputs:");
    for (idx, output) in session.outputs.iter().enumerate() {
        println!("  {idx}: name=\"{}\" type={:?}", output.name, output.output_type);
        if let ValueType::Tensor { shape, .. } = &output.output_type {
            println!("     shape={shape:?}");
        }
    }

    Ok(())
}
