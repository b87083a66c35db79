// ********* Input data structures ***********

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::HashSet;

/// The smallest geographic entity for which votes are recorded (typically a municipality).
///
/// The raw features are ordered the same way as the feature names of the
/// dataset. Missing values are encoded as non-finite numbers (`f64::NAN`)
/// and are resolved by the normalizer.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ElectoralUnit {
    pub id: String,
    pub region: Option<String>,
    pub municipality_code: Option<String>,
    pub features: Vec<f64>,
}

impl ElectoralUnit {
    pub fn new(id: &str, features: &[f64]) -> ElectoralUnit {
        ElectoralUnit {
            id: id.to_string(),
            region: None,
            municipality_code: None,
            features: features.to_vec(),
        }
    }

    pub fn has_missing_values(&self) -> bool {
        self.features.iter().any(|x| !x.is_finite())
    }
}

/// A validated collection of units sharing the same schema.
#[derive(PartialEq, Debug, Clone)]
pub struct Dataset {
    feature_names: Vec<String>,
    units: Vec<ElectoralUnit>,
    // Index of the feature that measures abstention, if any.
    abstention_feature: Option<usize>,
}

impl Dataset {
    /// Checks the schema of the units.
    ///
    /// A dataset needs at least one unit and one feature, every unit must have
    /// one value per feature name, and the identifiers must be unique and non-empty.
    pub fn new(
        feature_names: &[String],
        units: Vec<ElectoralUnit>,
    ) -> Result<Dataset, AnalysisErrors> {
        if feature_names.is_empty() {
            return InvalidDatasetSnafu {
                reason: "no feature declared",
            }
            .fail();
        }
        if units.is_empty() {
            return InvalidDatasetSnafu {
                reason: "no electoral unit",
            }
            .fail();
        }
        let mut seen: HashSet<&str> = HashSet::new();
        for u in units.iter() {
            if u.id.is_empty() {
                return InvalidDatasetSnafu {
                    reason: "a unit has an empty identifier",
                }
                .fail();
            }
            if !seen.insert(u.id.as_str()) {
                return InvalidDatasetSnafu {
                    reason: format!("duplicate unit identifier {}", u.id),
                }
                .fail();
            }
            if u.features.len() != feature_names.len() {
                return InvalidDatasetSnafu {
                    reason: format!(
                        "unit {} has {} features, expected {}",
                        u.id,
                        u.features.len(),
                        feature_names.len()
                    ),
                }
                .fail();
            }
        }
        Ok(Dataset {
            feature_names: feature_names.to_vec(),
            units,
            abstention_feature: None,
        })
    }

    /// Marks one of the features as the abstention rate. It only changes how
    /// the clusters are named.
    pub fn with_abstention_feature(self, name: &str) -> Result<Dataset, AnalysisErrors> {
        let idx = self
            .feature_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| AnalysisErrors::InvalidDataset {
                reason: format!("unknown abstention feature {}", name),
            })?;
        Ok(Dataset {
            abstention_feature: Some(idx),
            ..self
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn units(&self) -> &[ElectoralUnit] {
        &self.units
    }

    pub fn abstention_feature(&self) -> Option<usize> {
        self.abstention_feature
    }

    pub fn dimension(&self) -> usize {
        self.feature_names.len()
    }
}

// ******** Output data structures *********

/// The normalized representation of a unit. No value is NaN.
pub type FeatureVector = Vec<f64>;

/// A cluster index, in `[0, K)`.
pub type ClusterLabel = usize;

/// Which model produced a score.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Serialize, Deserialize)]
pub enum ModelScope {
    /// Projection of the cluster centroid on the principal axis.
    Centroid,
    /// The unit was labeled: the score is the label itself.
    Observed,
    /// Regression fitted on the labeled units of this cluster.
    Cluster(ClusterLabel),
    /// Regression fitted on all the labeled units.
    Global,
}

impl std::fmt::Display for ModelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelScope::Centroid => write!(f, "centroid"),
            ModelScope::Observed => write!(f, "observed"),
            ModelScope::Cluster(c) => write!(f, "cluster:{}", c),
            ModelScope::Global => write!(f, "global"),
        }
    }
}

impl std::str::FromStr for ModelScope {
    type Err = AnalysisErrors;

    fn from_str(s: &str) -> Result<ModelScope, AnalysisErrors> {
        match s {
            "centroid" => Ok(ModelScope::Centroid),
            "observed" => Ok(ModelScope::Observed),
            "global" => Ok(ModelScope::Global),
            x => match x.strip_prefix("cluster:").map(|c| c.parse::<usize>()) {
                Some(Ok(c)) => Ok(ModelScope::Cluster(c)),
                _ => InvalidDatasetSnafu {
                    reason: format!("unknown model scope {:?}", x),
                }
                .fail(),
            },
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub score: f64,
    /// In `[0, 1]`, higher is more certain.
    pub confidence: f64,
    pub model: ModelScope,
}

/// Everything known about a unit after one run of the pipeline.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub unit_id: String,
    pub features: FeatureVector,
    pub cluster: ClusterLabel,
    pub inference: InferenceOutput,
}

/// A successful result that was computed in a degraded way.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum Caveat {
    /// The clustering hit the iteration bound before the assignments were stable.
    NotConverged { iterations: u32 },
    /// A cluster had too few labeled units and used the global fit.
    GlobalFallback { cluster: ClusterLabel, labeled: usize },
    /// Units dropped because of missing values.
    ExcludedUnits { ids: Vec<String> },
    /// Units whose missing values were replaced by the column mean.
    ImputedUnits { ids: Vec<String> },
    /// Constant features, replaced by zero.
    DegenerateFeatures { indices: Vec<usize> },
}

/// Errors that prevent the pipeline from completing.
#[derive(PartialEq, Debug, Clone, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AnalysisErrors {
    #[snafu(display("Invalid dataset: {reason}"))]
    InvalidDataset { reason: String },
    #[snafu(display("Invalid configuration: {reason}"))]
    InvalidConfiguration { reason: String },
    #[snafu(display("Clustering error: {reason}"))]
    Clustering { reason: String },
    #[snafu(display("Insufficient labeled data: {reason}"))]
    InsufficientData { reason: String },
    #[snafu(display("Unit {unit_id} is missing from the {missing_from}"))]
    Integrity {
        unit_id: String,
        missing_from: String,
    },
    #[snafu(display("Analysis cancelled before iteration {iteration}"))]
    Cancelled { iteration: u32 },
}

// ********* Configuration **********

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum InferenceMode {
    Unsupervised,
    Supervised,
}

/// How exact distance ties are resolved, both when seeding and when assigning.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TieBreakMode {
    /// The lowest index wins (cluster index, or unit order by identifier).
    LowestIndex,
    /// A permutation keyed on the seed. It uses a cryptographic hash instead
    /// of a random generator, so the same seed always gives the same order.
    Random(u64),
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum MissingDataPolicy {
    /// Drop the units with at least one missing value.
    Exclude,
    /// Replace a missing value with the mean of its column.
    ImputeMean,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Target number of clusters.
    pub k: usize,
    pub max_iterations: u32,
    pub mode: InferenceMode,
    pub tiebreak_mode: TieBreakMode,
    pub missing_data: MissingDataPolicy,
    /// Below this number of labeled units, a cluster uses the global fit.
    pub min_labeled_per_cluster: usize,
    pub ridge_penalty: f64,
}

impl AnalysisConfig {
    pub const DEFAULT_CONFIG: AnalysisConfig = AnalysisConfig {
        k: 5,
        max_iterations: 100,
        mode: InferenceMode::Unsupervised,
        tiebreak_mode: TieBreakMode::LowestIndex,
        missing_data: MissingDataPolicy::Exclude,
        min_labeled_per_cluster: 3,
        ridge_penalty: 1.0,
    };

    pub fn with_k(k: usize) -> AnalysisConfig {
        AnalysisConfig {
            k,
            ..AnalysisConfig::DEFAULT_CONFIG
        }
    }

    /// Sets the random seed used for tie breaking.
    pub fn with_seed(self, seed: Option<u64>) -> AnalysisConfig {
        AnalysisConfig {
            tiebreak_mode: match seed {
                Some(s) => TieBreakMode::Random(s),
                None => TieBreakMode::LowestIndex,
            },
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), AnalysisErrors> {
        if !(self.ridge_penalty.is_finite() && self.ridge_penalty > 0.0) {
            return InvalidConfigurationSnafu {
                reason: format!("ridge penalty must be positive, got {}", self.ridge_penalty),
            }
            .fail();
        }
        if self.min_labeled_per_cluster == 0 {
            return InvalidConfigurationSnafu {
                reason: "min_labeled_per_cluster must be at least 1",
            }
            .fail();
        }
        Ok(())
    }
}
