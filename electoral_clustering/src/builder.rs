use std::collections::BTreeMap;

pub use crate::config::*;
use crate::pipeline::{run_analysis, AnalysisOutcome};

/// A builder for assembling a dataset unit by unit.
///
/// The feature names must be declared before adding units.
///
/// ```
/// pub use electoral_clustering::builder::Builder;
/// pub use electoral_clustering::AnalysisConfig;
/// # use electoral_clustering::AnalysisErrors;
///
/// let mut builder = Builder::new(&AnalysisConfig::with_k(2))?
///     .features(&["PSOE".to_string(), "PP".to_string()])?;
///
/// builder.add_unit("Sevilla/Dos Hermanas", &[0.35, 0.20])?;
/// builder.add_unit("Sevilla/Utrera", &[0.33, 0.22])?;
/// builder.add_unit("Almería/El Ejido", &[0.15, 0.40])?;
/// builder.label("Sevilla/Utrera", 0.5)?;
///
/// let outcome = builder.run()?;
/// assert_eq!(outcome.records.len(), 3);
///
/// # Ok::<(), AnalysisErrors>(())
/// ```
pub struct Builder {
    pub(crate) _config: AnalysisConfig,
    pub(crate) _feature_names: Option<Vec<String>>,
    pub(crate) _abstention_feature: Option<String>,
    pub(crate) _units: Vec<ElectoralUnit>,
    pub(crate) _labels: BTreeMap<String, f64>,
}

impl Builder {
    pub fn new(config: &AnalysisConfig) -> Result<Builder, AnalysisErrors> {
        config.validate()?;
        Ok(Builder {
            _config: config.clone(),
            _feature_names: None,
            _abstention_feature: None,
            _units: Vec::new(),
            _labels: BTreeMap::new(),
        })
    }

    /// Declares the features. The units added before are dropped.
    pub fn features(self, names: &[String]) -> Result<Builder, AnalysisErrors> {
        if names.is_empty() {
            return InvalidDatasetSnafu {
                reason: "no feature declared",
            }
            .fail();
        }
        Ok(Builder {
            _config: self._config,
            _feature_names: Some(names.to_vec()),
            _abstention_feature: None,
            _units: Vec::new(),
            _labels: BTreeMap::new(),
        })
    }

    /// Marks one of the declared features as the abstention rate.
    pub fn abstention_feature(self, name: &str) -> Result<Builder, AnalysisErrors> {
        let known = self
            ._feature_names
            .as_deref()
            .map(|ns| ns.iter().any(|n| n == name))
            .unwrap_or(false);
        if !known {
            return InvalidDatasetSnafu {
                reason: format!("unknown abstention feature {}", name),
            }
            .fail();
        }
        Ok(Builder {
            _abstention_feature: Some(name.to_string()),
            ..self
        })
    }

    /// Adds a unit with its raw features, in the order of the declared names.
    ///
    /// Missing values can be passed as `f64::NAN`.
    pub fn add_unit(&mut self, id: &str, features: &[f64]) -> Result<(), AnalysisErrors> {
        self.add_unit_2(ElectoralUnit::new(id, features))
    }

    /// Adds a unit together with its geographic attributes.
    pub fn add_unit_with_geo(
        &mut self,
        id: &str,
        region: &str,
        municipality_code: Option<&str>,
        features: &[f64],
    ) -> Result<(), AnalysisErrors> {
        self.add_unit_2(ElectoralUnit {
            region: Some(region.to_string()),
            municipality_code: municipality_code.map(|s| s.to_string()),
            ..ElectoralUnit::new(id, features)
        })
    }

    pub fn add_unit_2(&mut self, unit: ElectoralUnit) -> Result<(), AnalysisErrors> {
        let dim = match self._feature_names.as_deref() {
            Some(ns) => ns.len(),
            None => {
                return InvalidDatasetSnafu {
                    reason: "the features must be declared before the units",
                }
                .fail();
            }
        };
        if unit.features.len() != dim {
            return InvalidDatasetSnafu {
                reason: format!(
                    "unit {} has {} features, expected {}",
                    unit.id,
                    unit.features.len(),
                    dim
                ),
            }
            .fail();
        }
        self._units.push(unit);
        Ok(())
    }

    /// Attaches a historical target to a unit, for the supervised mode.
    pub fn label(&mut self, id: &str, target: f64) -> Result<(), AnalysisErrors> {
        if !target.is_finite() {
            return InvalidDatasetSnafu {
                reason: format!("label of {} is not a finite number", id),
            }
            .fail();
        }
        self._labels.insert(id.to_string(), target);
        Ok(())
    }

    /// Validates the dataset and runs the whole pipeline.
    pub fn run(&self) -> Result<AnalysisOutcome, AnalysisErrors> {
        let names = self._feature_names.clone().unwrap_or_default();
        let mut dataset = Dataset::new(&names, self._units.clone())?;
        if let Some(name) = self._abstention_feature.as_deref() {
            dataset = dataset.with_abstention_feature(name)?;
        }
        let labels = if self._labels.is_empty() {
            None
        } else {
            Some(&self._labels)
        };
        run_analysis(&dataset, &self._config, labels, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["PSOE".to_string(), "PP".to_string(), "Abstencion".to_string()]
    }

    #[test]
    fn units_need_features() {
        let mut b = Builder::new(&AnalysisConfig::with_k(2)).unwrap();
        assert!(b.add_unit("a", &[0.1]).is_err());
    }

    #[test]
    fn wrong_dimension() {
        let mut b = Builder::new(&AnalysisConfig::with_k(2))
            .unwrap()
            .features(&names())
            .unwrap();
        assert!(matches!(
            b.add_unit("a", &[0.1, 0.2]),
            Err(AnalysisErrors::InvalidDataset { .. })
        ));
    }

    #[test]
    fn duplicate_units_fail_at_run() {
        let mut b = Builder::new(&AnalysisConfig::with_k(1))
            .unwrap()
            .features(&names())
            .unwrap();
        b.add_unit("a", &[0.1, 0.2, 0.7]).unwrap();
        b.add_unit("a", &[0.2, 0.2, 0.6]).unwrap();
        assert!(matches!(
            b.run(),
            Err(AnalysisErrors::InvalidDataset { .. })
        ));
    }

    #[test]
    fn abstention_names_the_cluster() {
        let mut b = Builder::new(&AnalysisConfig::with_k(1))
            .unwrap()
            .features(&names())
            .unwrap()
            .abstention_feature("Abstencion")
            .unwrap();
        b.add_unit_with_geo("Cádiz/Barbate", "Cádiz", Some("11007"), &[0.2, 0.2, 0.6])
            .unwrap();
        b.add_unit("Cádiz/Vejer", &[0.25, 0.15, 0.6]).unwrap();
        let outcome = b.run().unwrap();
        assert_eq!(outcome.profiles[0].name, "High abstention");
    }

    #[test]
    fn unknown_abstention_feature() {
        let b = Builder::new(&AnalysisConfig::with_k(1))
            .unwrap()
            .features(&names())
            .unwrap();
        assert!(b.abstention_feature("Blanco").is_err());
    }

    #[test]
    fn non_finite_label() {
        let mut b = Builder::new(&AnalysisConfig::with_k(1)).unwrap();
        assert!(b.label("a", f64::NAN).is_err());
    }
}
