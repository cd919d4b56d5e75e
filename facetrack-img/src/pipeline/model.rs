use std::path::Path;

use anyhow::{Context, Result};
use ort::execution_providers;
use ort::session::builder::GraphOptimizationLevel;
pub use ort::session::Session;

pub fn initialize_model(model_path: &Path, threads: usize) -> Result<Session> {
    // XNNPACK when the runtime has it, plain CPU otherwise
    ort::init()
        .with_execution_providers([execution_providers::XNNPACKExecutionProvider::default().build()])
        .commit()?;

    let model = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load ONNX model {}", model_path.display()))?;

    Ok(model)
}
