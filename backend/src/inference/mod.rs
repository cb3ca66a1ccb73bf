pub mod mock;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use ndarray::Array4;
use serde::Serialize;
use shared::{PredictionResult, Severity, SeverityScores};

use crate::cache::{content_hash, PredictionCache};
use crate::preprocess::{PreprocessError, Preprocessor};

pub use mock::MockPredictor;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Predictor returned {got} scores, expected {expected}")]
    ScoreCount { got: usize, expected: usize },
    #[error("Predictor lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PredictorKind {
    Mock,
    Trained,
}

/// Scores a preprocessed `(1, H, W, 3)` batch: one probability per severity
/// class, in severity order.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError>;

    fn kind(&self) -> PredictorKind;

    fn parameter_count(&self) -> Option<usize> {
        None
    }
}

/// The inference service: preprocessing, prediction and the duplicate cache.
#[derive(Clone)]
pub struct Classifier {
    predictor: Arc<dyn Predictor>,
    preprocessor: Arc<Preprocessor>,
    cache: PredictionCache,
}

impl Classifier {
    pub fn new(
        predictor: Arc<dyn Predictor>,
        preprocessor: Preprocessor,
        cache: PredictionCache,
    ) -> Self {
        Self {
            predictor,
            preprocessor: Arc::new(preprocessor),
            cache,
        }
    }

    pub fn predictor(&self) -> &dyn Predictor {
        self.predictor.as_ref()
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Classifies an encoded image, returning the stored result unchanged when
    /// the same bytes were classified recently.
    pub fn classify(&self, image: &[u8]) -> Result<PredictionResult, InferenceError> {
        let key = content_hash(image);
        if let Some(cached) = self.cache.get(&key) {
            info!("Duplicate image detected, returning cached result");
            return Ok(cached);
        }

        let result = self.classify_uncached(image)?;
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    pub fn classify_uncached(&self, image: &[u8]) -> Result<PredictionResult, InferenceError> {
        let started = Instant::now();
        let input = self.preprocessor.preprocess(image)?;
        let probabilities = self.predictor.predict(&input)?;
        build_result(&probabilities, started.elapsed().as_secs_f64())
    }
}

/// Picks the most probable class (first on ties) and scales every score to
/// percent independently.
pub fn build_result(
    probabilities: &[f32],
    processing_time: f64,
) -> Result<PredictionResult, InferenceError> {
    if probabilities.len() != Severity::COUNT {
        return Err(InferenceError::ScoreCount {
            got: probabilities.len(),
            expected: Severity::COUNT,
        });
    }

    let mut best = 0;
    for (index, &p) in probabilities.iter().enumerate() {
        if p > probabilities[best] {
            best = index;
        }
    }

    let mut scores = [0.0; Severity::COUNT];
    for (score, &p) in scores.iter_mut().zip(probabilities) {
        *score = p * 100.0;
    }

    Ok(PredictionResult {
        severity: Severity::ALL[best],
        confidence: probabilities[best] * 100.0,
        severity_scores: SeverityScores(scores),
        processing_time,
    })
}

/// Chooses the predictor once at startup: the trained network when its
/// weights load, the mock scorer otherwise.
pub fn load_predictor(model_path: &Path, image_size: u32) -> Arc<dyn Predictor> {
    match load_trained(model_path, image_size) {
        Some(predictor) => predictor,
        None => {
            warn!("Using mock model");
            Arc::new(MockPredictor::default())
        }
    }
}

/// Modification date of the weights file, `YYYY-MM-DD` in local time.
pub fn model_file_date(path: &Path) -> Option<String> {
    let modified = fs::metadata(path).and_then(|meta| meta.modified()).ok()?;
    Some(chrono::DateTime::<chrono::Local>::from(modified).format("%Y-%m-%d").to_string())
}

#[cfg(feature = "torch")]
fn load_trained(model_path: &Path, image_size: u32) -> Option<Arc<dyn Predictor>> {
    use crate::model::TorchPredictor;

    if !model_path.exists() {
        warn!("Model file not found at {}", model_path.display());
        return None;
    }

    info!("Loading model from {}", model_path.display());
    match TorchPredictor::load(model_path, image_size) {
        Ok(predictor) => {
            info!("Model loaded successfully");
            Some(Arc::new(predictor))
        }
        Err(e) => {
            log::error!("Error loading model: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "torch"))]
fn load_trained(model_path: &Path, _image_size: u32) -> Option<Arc<dyn Predictor>> {
    warn!(
        "Built without the torch feature, ignoring model file {}",
        model_path.display()
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::PreprocessConfig;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPredictor {
        calls: AtomicUsize,
    }

    impl Predictor for CountingPredictor {
        fn predict(&self, input: &Array4<f32>) -> Result<Vec<f32>, InferenceError> {
            assert_eq!(input.shape(), &[1, 16, 16, 3]);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.1, 0.2, 0.4, 0.2, 0.1])
        }

        fn kind(&self) -> PredictorKind {
            PredictorKind::Trained
        }
    }

    fn png(seed: u8) -> Vec<u8> {
        let image = RgbImage::from_fn(20, 20, |x, y| Rgb([seed, x as u8, y as u8]));
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    fn classifier(predictor: Arc<CountingPredictor>, cache: PredictionCache) -> Classifier {
        let preprocessor = Preprocessor::new(PreprocessConfig {
            image_size: 16,
            ..PreprocessConfig::default()
        });
        Classifier::new(predictor, preprocessor, cache)
    }

    #[test]
    fn result_picks_argmax_and_scales_to_percent() {
        let result = build_result(&[0.05, 0.1, 0.6, 0.2, 0.05], 0.25).unwrap();
        assert_eq!(result.severity, Severity::Moderate);
        assert!((result.confidence - 60.0).abs() < 1e-4);
        assert!((result.severity_scores.get(Severity::Severe) - 20.0).abs() < 1e-4);
        assert_eq!(result.processing_time, 0.25);
    }

    #[test]
    fn ties_resolve_to_lowest_class() {
        let result = build_result(&[0.3, 0.3, 0.2, 0.1, 0.1], 0.0).unwrap();
        assert_eq!(result.severity, Severity::NoDr);
    }

    #[test]
    fn wrong_score_count_is_an_error() {
        assert!(matches!(
            build_result(&[0.5, 0.5], 0.0),
            Err(InferenceError::ScoreCount { got: 2, expected: 5 })
        ));
    }

    #[test]
    fn repeated_image_hits_cache() {
        let predictor = Arc::new(CountingPredictor { calls: AtomicUsize::new(0) });
        let classifier = classifier(predictor.clone(), PredictionCache::new(8));

        let first = classifier.classify(&png(1)).unwrap();
        let second = classifier.classify(&png(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 1);

        classifier.classify(&png(2)).unwrap();
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn uncached_path_always_predicts() {
        let predictor = Arc::new(CountingPredictor { calls: AtomicUsize::new(0) });
        let classifier = classifier(predictor.clone(), PredictionCache::new(8));

        classifier.classify_uncached(&png(3)).unwrap();
        classifier.classify_uncached(&png(3)).unwrap();
        assert_eq!(predictor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn model_date_comes_from_file_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dr_model.ot");
        fs::write(&path, b"weights").unwrap();

        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(model_file_date(&path), Some(today));
        assert_eq!(model_file_date(&dir.path().join("missing.ot")), None);
    }

    #[test]
    fn missing_weights_fall_back_to_mock() {
        let predictor = load_predictor(Path::new("/nonexistent/dr_model.ot"), 224);
        assert_eq!(predictor.kind(), PredictorKind::Mock);
        assert_eq!(predictor.parameter_count(), None);
    }
}
