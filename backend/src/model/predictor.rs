use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use tch::nn::{self, ModuleT};
use tch::{Device, Kind};

use super::{parameter_count, to_input_tensor, ModelError, RetinaNet};
use crate::inference::{InferenceError, Predictor, PredictorKind};

struct Loaded {
    _vs: nn::VarStore,
    net: RetinaNet,
}

/// Trained weights served behind a mutex; forward passes run one at a time.
pub struct TorchPredictor {
    model: Mutex<Loaded>,
    device: Device,
    parameters: usize,
}

impl TorchPredictor {
    pub fn load(path: &Path, image_size: u32) -> Result<Self, ModelError> {
        let device = Device::cuda_if_available();
        let mut vs = nn::VarStore::new(device);
        let net = RetinaNet::new(&vs.root(), image_size as i64);
        vs.load(path)?;
        let parameters = parameter_count(&vs);
        vs.freeze();

        log::info!("Loaded {} parameters on {:?}", parameters, device);
        Ok(Self {
            model: Mutex::new(Loaded { _vs: vs, net }),
            device,
            parameters,
        })
    }
}

impl Predictor for TorchPredictor {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let xs = to_input_tensor(input, self.device)
            .map_err(|e| InferenceError::Model(e.to_string()))?;
        let model = self.model.lock().map_err(|_| InferenceError::Poisoned)?;

        let output = tch::no_grad(|| model.net.forward_t(&xs, false).softmax(-1, Kind::Float));
        let output_flat = output.to_device(Device::Cpu).view([-1]);
        Vec::<f32>::try_from(&output_flat).map_err(|e| InferenceError::Model(e.to_string()))
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::Trained
    }

    fn parameter_count(&self) -> Option<usize> {
        Some(self.parameters)
    }
}
