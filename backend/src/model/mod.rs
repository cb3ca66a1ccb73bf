//! The convolutional grading network on libtorch.

pub mod learner;
pub mod network;
pub mod predictor;

use ndarray::Array4;
use tch::{nn, Device, Tensor};

pub use learner::TorchLearner;
pub use network::RetinaNet;
pub use predictor::TorchPredictor;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("Input array is not contiguous")]
    Layout,
    #[error("Snapshot is missing variable {0}")]
    MissingVariable(String),
}

/// Copies an NHWC array into a tensor on `device`.
pub fn to_input_tensor(array: &Array4<f32>, device: Device) -> Result<Tensor, ModelError> {
    let (batch, height, width, channels) = array.dim();
    let contiguous = array.as_standard_layout();
    let data = contiguous.as_slice().ok_or(ModelError::Layout)?;
    Ok(Tensor::from_slice(data)
        .view([batch as i64, height as i64, width as i64, channels as i64])
        .to_device(device))
}

pub fn parameter_count(vs: &nn::VarStore) -> usize {
    vs.trainable_variables().iter().map(|t| t.numel()).sum()
}
