use std::collections::HashMap;
use std::path::Path;

use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::{Device, Tensor};

use super::{parameter_count, to_input_tensor, ModelError, RetinaNet};
use crate::dataset::{Batch, ImageSource};
use crate::training::trainer::{EpochMetrics, Learner};
use crate::training::TrainingError;

/// Adam + cross-entropy over a freshly initialized [`RetinaNet`].
pub struct TorchLearner {
    vs: nn::VarStore,
    net: RetinaNet,
    optimizer: nn::Optimizer,
    device: Device,
}

impl TorchLearner {
    pub fn new(device: Device, image_size: u32, learning_rate: f64) -> Result<Self, ModelError> {
        let vs = nn::VarStore::new(device);
        let net = RetinaNet::new(&vs.root(), image_size as i64);
        let optimizer = nn::Adam::default().build(&vs, learning_rate)?;
        Ok(Self {
            vs,
            net,
            optimizer,
            device,
        })
    }

    pub fn parameter_count(&self) -> usize {
        parameter_count(&self.vs)
    }

    fn tensors(&self, batch: &Batch) -> Result<(Tensor, Tensor), ModelError> {
        let xs = to_input_tensor(&batch.images, self.device)?;
        let ys = Tensor::from_slice(&batch.labels).to_device(self.device);
        Ok((xs, ys))
    }
}

/// Sample-weighted running means of loss and accuracy.
#[derive(Default)]
struct Totals {
    loss: f64,
    correct: f64,
    samples: usize,
}

impl Totals {
    fn add(
        &mut self,
        logits: &Tensor,
        labels: &Tensor,
        loss: &Tensor,
        n: usize,
    ) -> Result<(), ModelError> {
        self.loss += f64::try_from(loss)? * n as f64;
        self.correct += f64::try_from(&logits.accuracy_for_logits(labels))? * n as f64;
        self.samples += n;
        Ok(())
    }

    fn finish(self) -> EpochMetrics {
        if self.samples == 0 {
            return EpochMetrics {
                loss: f64::NAN,
                accuracy: 0.0,
            };
        }
        EpochMetrics {
            loss: self.loss / self.samples as f64,
            accuracy: self.correct / self.samples as f64,
        }
    }
}

impl Learner for TorchLearner {
    type Snapshot = HashMap<String, Tensor>;

    fn train_epoch(
        &mut self,
        batches: &mut ImageSource,
        learning_rate: f64,
    ) -> Result<EpochMetrics, TrainingError> {
        self.optimizer.set_lr(learning_rate);
        let mut totals = Totals::default();
        for batch in batches {
            let batch = batch?;
            let (xs, ys) = self.tensors(&batch)?;
            let logits = self.net.forward_t(&xs, true);
            let loss = logits.cross_entropy_for_logits(&ys);
            self.optimizer.backward_step(&loss);
            totals.add(&logits.detach(), &ys, &loss.detach(), batch.len())?;
        }
        Ok(totals.finish())
    }

    fn evaluate(&mut self, batches: &mut ImageSource) -> Result<EpochMetrics, TrainingError> {
        let mut totals = Totals::default();
        for batch in batches {
            let batch = batch?;
            let (xs, ys) = self.tensors(&batch)?;
            let (logits, loss) = tch::no_grad(|| {
                let logits = self.net.forward_t(&xs, false);
                let loss = logits.cross_entropy_for_logits(&ys);
                (logits, loss)
            });
            totals.add(&logits, &ys, &loss, batch.len())?;
        }
        Ok(totals.finish())
    }

    fn snapshot(&self) -> Self::Snapshot {
        tch::no_grad(|| {
            self.vs
                .variables()
                .into_iter()
                .map(|(name, tensor)| (name, tensor.copy()))
                .collect()
        })
    }

    fn restore(&mut self, snapshot: &Self::Snapshot) -> Result<(), TrainingError> {
        tch::no_grad(|| {
            for (name, mut variable) in self.vs.variables() {
                let saved = snapshot.get(&name).ok_or(ModelError::MissingVariable(name.clone()))?;
                variable.copy_(saved);
            }
            Ok::<(), ModelError>(())
        })?;
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<(), TrainingError> {
        self.vs.save(path).map_err(ModelError::from)?;
        Ok(())
    }
}
