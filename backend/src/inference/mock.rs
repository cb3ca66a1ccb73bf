use std::sync::Mutex;

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::Severity;

use super::{InferenceError, Predictor, PredictorKind};

const DEFAULT_SEED: u64 = 42;

/// Stand-in used when no trained weights are available. Scores are drawn from
/// a seeded RNG, so a fresh instance always produces the same sequence.
pub struct MockPredictor {
    rng: Mutex<StdRng>,
}

impl MockPredictor {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for MockPredictor {
    fn default() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }
}

impl Predictor for MockPredictor {
    fn predict(&self, _input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
        let mut rng = self.rng.lock().map_err(|_| InferenceError::Poisoned)?;
        let raw: Vec<f32> = (0..Severity::COUNT).map(|_| rng.random::<f32>()).collect();
        let total: f32 = raw.iter().sum();
        if total <= f32::EPSILON {
            return Ok(vec![1.0 / Severity::COUNT as f32; Severity::COUNT]);
        }
        Ok(raw.into_iter().map(|v| v / total).collect())
    }

    fn kind(&self) -> PredictorKind {
        PredictorKind::Mock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::build_result;

    fn input() -> Array4<f32> {
        Array4::zeros((1, 8, 8, 3))
    }

    #[test]
    fn scores_are_a_distribution() {
        let predictor = MockPredictor::default();
        for _ in 0..20 {
            let probabilities = predictor.predict(&input()).unwrap();
            assert_eq!(probabilities.len(), Severity::COUNT);
            assert!(probabilities.iter().all(|&p| p >= 0.0));

            let result = build_result(&probabilities, 0.0).unwrap();
            assert!((result.severity_scores.total() - 100.0).abs() < 1e-3);
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = MockPredictor::with_seed(7);
        let b = MockPredictor::with_seed(7);
        for _ in 0..3 {
            assert_eq!(a.predict(&input()).unwrap(), b.predict(&input()).unwrap());
        }
        assert_eq!(a.kind(), PredictorKind::Mock);
    }
}
