use std::collections::HashMap;
use std::fmt;

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::IntoEnumIterator;
use strum_macros::{EnumIter, IntoStaticStr};

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;
pub const INPUT_CHANNELS: u32 = 3;

/// Diabetic retinopathy stage, ordered from healthy to most advanced.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum Severity {
    #[serde(rename = "No DR")]
    #[strum(serialize = "No DR")]
    NoDr,
    #[serde(rename = "Mild DR")]
    #[strum(serialize = "Mild DR")]
    Mild,
    #[serde(rename = "Moderate DR")]
    #[strum(serialize = "Moderate DR")]
    Moderate,
    #[serde(rename = "Severe DR")]
    #[strum(serialize = "Severe DR")]
    Severe,
    #[serde(rename = "Proliferative DR")]
    #[strum(serialize = "Proliferative DR")]
    Proliferative,
}

impl Severity {
    pub const COUNT: usize = 5;

    pub const ALL: [Severity; Self::COUNT] = [
        Severity::NoDr,
        Severity::Mild,
        Severity::Moderate,
        Severity::Severe,
        Severity::Proliferative,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Display name used on the wire, e.g. `"Moderate DR"`.
    pub fn label(self) -> &'static str {
        self.into()
    }

    /// Parses a class directory name: an index (`"2"`), a display name
    /// (`"Moderate DR"`) or a variant name (`"moderate"`, `"no_dr"`).
    pub fn from_name(name: &str) -> Option<Self> {
        if let Ok(index) = name.trim().parse::<usize>() {
            return Self::from_index(index);
        }
        let wanted = squash(name);
        Self::iter().find(|severity| {
            squash(severity.label()) == wanted || squash(&format!("{:?}", severity)) == wanted
        })
    }
}

fn squash(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-class scores in percent, serialized as a label → score map in
/// severity order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeverityScores(pub [f32; Severity::COUNT]);

impl SeverityScores {
    pub fn get(&self, severity: Severity) -> f32 {
        self.0[severity.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Severity, f32)> + '_ {
        Severity::iter().map(move |severity| (severity, self.get(severity)))
    }

    pub fn total(&self) -> f32 {
        self.0.iter().sum()
    }
}

impl Serialize for SeverityScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Severity::COUNT))?;
        for (severity, score) in self.iter() {
            map.serialize_entry(severity.label(), &score)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SeverityScores {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = HashMap::<String, f32>::deserialize(deserializer)?;
        let mut scores = [0.0; Severity::COUNT];
        for (label, score) in raw {
            let severity = Severity::from_name(&label)
                .ok_or_else(|| D::Error::custom(format!("unknown severity label: {}", label)))?;
            scores[severity.index()] = score;
        }
        Ok(Self(scores))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub severity: Severity,
    /// Top class probability in percent.
    pub confidence: f32,
    pub severity_scores: SeverityScores,
    /// Seconds spent on preprocessing and the forward pass.
    pub processing_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    pub success: bool,
    pub data: PredictionResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictionResponse {
    pub predictions: Vec<PredictionResult>,
    pub failed_images: Vec<String>,
    pub total_processing_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_loaded: bool,
    pub input_shape: [u32; 3],
    pub last_training_date: Option<String>,
    pub total_parameters: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainResponse {
    pub message: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub validation_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub epochs_run: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_matches_index() {
        for (index, severity) in Severity::iter().enumerate() {
            assert_eq!(severity.index(), index);
            assert_eq!(Severity::from_index(index), Some(severity));
        }
        assert_eq!(Severity::from_index(5), None);
    }

    #[test]
    fn severity_names_parse() {
        assert_eq!(Severity::from_name("3"), Some(Severity::Severe));
        assert_eq!(Severity::from_name("Moderate DR"), Some(Severity::Moderate));
        assert_eq!(Severity::from_name("no_dr"), Some(Severity::NoDr));
        assert_eq!(Severity::from_name("proliferative"), Some(Severity::Proliferative));
        assert_eq!(Severity::from_name("glaucoma"), None);
        assert_eq!(Severity::Mild.to_string(), "Mild DR");
    }

    #[test]
    fn labels_match_serde_names() {
        for severity in Severity::iter() {
            let json = serde_json::to_string(&severity).unwrap();
            assert_eq!(json, format!("\"{}\"", severity.label()));
        }
        assert_eq!(Severity::Proliferative.label(), "Proliferative DR");
    }

    #[test]
    fn scores_serialize_in_severity_order() {
        let scores = SeverityScores([10.0, 20.0, 30.0, 25.0, 15.0]);
        let json = serde_json::to_string(&scores).unwrap();
        assert_eq!(
            json,
            r#"{"No DR":10.0,"Mild DR":20.0,"Moderate DR":30.0,"Severe DR":25.0,"Proliferative DR":15.0}"#
        );

        let back: SeverityScores = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scores);
    }

    #[test]
    fn prediction_uses_display_label() {
        let result = PredictionResult {
            severity: Severity::Moderate,
            confidence: 30.0,
            severity_scores: SeverityScores::default(),
            processing_time: 0.5,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["severity"], "Moderate DR");
    }
}
