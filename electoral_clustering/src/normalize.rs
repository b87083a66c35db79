//! Standardization of the raw features.

use log::{debug, info, warn};
use std::collections::BTreeMap;

use crate::config::*;

// Standard deviations below this value mark a constant column.
const DEGENERATE_STD: f64 = 1e-12;

/// Per-feature summary statistics of one run.
#[derive(PartialEq, Debug, Clone)]
pub struct FeatureStats {
    pub means: Vec<f64>,
    /// Population standard deviations.
    pub std_devs: Vec<f64>,
}

impl FeatureStats {
    pub fn is_degenerate(&self, feature: usize) -> bool {
        self.std_devs
            .get(feature)
            .map(|s| *s < DEGENERATE_STD)
            .unwrap_or(true)
    }

    pub fn degenerate_features(&self) -> Vec<usize> {
        (0..self.std_devs.len())
            .filter(|idx| self.is_degenerate(*idx))
            .collect()
    }

    /// Applies the z-score transform. Degenerate features become zero.
    pub fn transform(&self, raw: &[f64]) -> FeatureVector {
        raw.iter()
            .enumerate()
            .map(|(idx, x)| {
                if self.is_degenerate(idx) {
                    0.0
                } else {
                    (x - self.means[idx]) / self.std_devs[idx]
                }
            })
            .collect()
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct Normalized {
    pub features: BTreeMap<String, FeatureVector>,
    pub stats: FeatureStats,
    /// Units dropped because of missing values.
    pub excluded: Vec<String>,
    /// Units with at least one imputed value.
    pub imputed: Vec<String>,
}

impl Normalized {
    pub fn caveats(&self) -> Vec<Caveat> {
        let mut res: Vec<Caveat> = Vec::new();
        if !self.excluded.is_empty() {
            res.push(Caveat::ExcludedUnits {
                ids: self.excluded.clone(),
            });
        }
        if !self.imputed.is_empty() {
            res.push(Caveat::ImputedUnits {
                ids: self.imputed.clone(),
            });
        }
        let degenerate = self.stats.degenerate_features();
        if !degenerate.is_empty() {
            res.push(Caveat::DegenerateFeatures {
                indices: degenerate,
            });
        }
        res
    }
}

/// Normalizes the raw features of the dataset.
pub fn normalize(
    dataset: &Dataset,
    policy: MissingDataPolicy,
) -> Result<Normalized, AnalysisErrors> {
    normalize_units(dataset.units(), dataset.dimension(), policy)
}

/// Normalizes a set of units of dimension `dim`.
///
/// Unlike [`normalize`], the units have not been validated yet, so the
/// dimension and the uniqueness of the identifiers are checked here. The
/// statistics are accumulated in identifier order and do not depend on the
/// order of `units`.
pub fn normalize_units(
    units: &[ElectoralUnit],
    dim: usize,
    policy: MissingDataPolicy,
) -> Result<Normalized, AnalysisErrors> {
    info!(
        "normalize: {} units, {} features, policy {:?}",
        units.len(),
        dim,
        policy
    );
    if units.is_empty() {
        return InvalidDatasetSnafu {
            reason: "cannot normalize an empty set of units",
        }
        .fail();
    }
    if let Some(u) = units.iter().find(|u| u.features.len() != dim) {
        return InvalidDatasetSnafu {
            reason: format!(
                "unit {} has {} features, expected {}",
                u.id,
                u.features.len(),
                dim
            ),
        }
        .fail();
    }
    let mut ordered: Vec<&ElectoralUnit> = units.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    if let Some(w) = ordered.windows(2).find(|w| w[0].id == w[1].id) {
        return InvalidDatasetSnafu {
            reason: format!("duplicate unit identifier {}", w[0].id),
        }
        .fail();
    }

    // Resolve the missing values first.
    let mut excluded: Vec<String> = Vec::new();
    let mut imputed: Vec<String> = Vec::new();
    let mut kept: Vec<(String, Vec<f64>)> = Vec::new();
    match policy {
        MissingDataPolicy::Exclude => {
            for u in ordered.iter() {
                if u.has_missing_values() {
                    excluded.push(u.id.clone());
                } else {
                    kept.push((u.id.clone(), u.features.clone()));
                }
            }
        }
        MissingDataPolicy::ImputeMean => {
            let column_means = finite_column_means(&ordered, dim)?;
            for u in ordered.iter() {
                if u.has_missing_values() {
                    imputed.push(u.id.clone());
                }
                let row: Vec<f64> = u
                    .features
                    .iter()
                    .zip(column_means.iter())
                    .map(|(x, m)| if x.is_finite() { *x } else { *m })
                    .collect();
                kept.push((u.id.clone(), row));
            }
        }
    }
    if !excluded.is_empty() {
        warn!(
            "normalize: excluding {} units with missing values: {:?}",
            excluded.len(),
            excluded
        );
    }
    if kept.is_empty() {
        return InvalidDatasetSnafu {
            reason: "every unit has missing values",
        }
        .fail();
    }

    let n = kept.len() as f64;
    let mut means = vec![0.0; dim];
    for (_, row) in kept.iter() {
        for (m, x) in means.iter_mut().zip(row.iter()) {
            *m += x;
        }
    }
    for m in means.iter_mut() {
        *m /= n;
    }
    let mut std_devs = vec![0.0; dim];
    for (_, row) in kept.iter() {
        for ((s, x), m) in std_devs.iter_mut().zip(row.iter()).zip(means.iter()) {
            *s += (x - m) * (x - m);
        }
    }
    for s in std_devs.iter_mut() {
        *s = (*s / n).sqrt();
    }
    let stats = FeatureStats { means, std_devs };
    debug!("normalize: stats: {:?}", stats);

    let features: BTreeMap<String, FeatureVector> = kept
        .iter()
        .map(|(id, row)| (id.clone(), stats.transform(row)))
        .collect();
    Ok(Normalized {
        features,
        stats,
        excluded,
        imputed,
    })
}

fn finite_column_means(units: &[&ElectoralUnit], dim: usize) -> Result<Vec<f64>, AnalysisErrors> {
    let mut res: Vec<f64> = Vec::with_capacity(dim);
    for idx in 0..dim {
        let values: Vec<f64> = units
            .iter()
            .map(|u| u.features[idx])
            .filter(|x| x.is_finite())
            .collect();
        if values.is_empty() {
            return InvalidDatasetSnafu {
                reason: format!("feature {} has no value in any unit", idx),
            }
            .fail();
        }
        res.push(values.iter().sum::<f64>() / values.len() as f64);
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(rows: &[(&str, &[f64])]) -> Vec<ElectoralUnit> {
        rows.iter()
            .map(|(id, f)| ElectoralUnit::new(id, f))
            .collect()
    }

    #[test]
    fn standardizes_each_feature() {
        let us = units(&[
            ("a", &[1.0, 10.0]),
            ("b", &[2.0, 20.0]),
            ("c", &[3.0, 60.0]),
            ("d", &[6.0, 30.0]),
        ]);
        let res = normalize_units(&us, 2, MissingDataPolicy::Exclude).unwrap();
        for feature in 0..2 {
            let col: Vec<f64> = res.features.values().map(|v| v[feature]).collect();
            let mean = col.iter().sum::<f64>() / col.len() as f64;
            let var = col.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / col.len() as f64;
            assert!(mean.abs() < 1e-9);
            assert!((var.sqrt() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_feature_is_zero() {
        let us = units(&[("a", &[1.0, 5.0]), ("b", &[2.0, 5.0]), ("c", &[4.0, 5.0])]);
        let res = normalize_units(&us, 2, MissingDataPolicy::Exclude).unwrap();
        assert!(res.features.values().all(|v| v[1] == 0.0));
        assert_eq!(res.stats.degenerate_features(), vec![1]);
        assert_eq!(
            res.caveats(),
            vec![Caveat::DegenerateFeatures { indices: vec![1] }]
        );
    }

    #[test]
    fn empty_input_is_invalid() {
        let res = normalize_units(&[], 2, MissingDataPolicy::Exclude);
        assert!(matches!(res, Err(AnalysisErrors::InvalidDataset { .. })));
    }

    #[test]
    fn dimension_mismatch_is_invalid() {
        let us = units(&[("a", &[1.0, 2.0]), ("b", &[1.0])]);
        let res = normalize_units(&us, 2, MissingDataPolicy::Exclude);
        assert!(matches!(res, Err(AnalysisErrors::InvalidDataset { .. })));
    }

    #[test]
    fn missing_values_excluded() {
        let us = units(&[
            ("a", &[1.0, 2.0]),
            ("b", &[f64::NAN, 3.0]),
            ("c", &[3.0, 4.0]),
        ]);
        let res = normalize_units(&us, 2, MissingDataPolicy::Exclude).unwrap();
        assert_eq!(res.excluded, vec!["b".to_string()]);
        assert_eq!(res.features.len(), 2);
        assert!(res.features.values().flatten().all(|x| x.is_finite()));
    }

    #[test]
    fn missing_values_imputed() {
        let us = units(&[
            ("a", &[1.0, 2.0]),
            ("b", &[f64::NAN, 3.0]),
            ("c", &[3.0, 4.0]),
        ]);
        let res = normalize_units(&us, 2, MissingDataPolicy::ImputeMean).unwrap();
        assert_eq!(res.imputed, vec!["b".to_string()]);
        assert_eq!(res.features.len(), 3);
        // The imputed value is the column mean, hence exactly zero once centered.
        assert!(res.features["b"][0].abs() < 1e-12);
    }

    #[test]
    fn all_missing_column_is_invalid() {
        let us = units(&[("a", &[f64::NAN, 2.0]), ("b", &[f64::NAN, 3.0])]);
        let res = normalize_units(&us, 2, MissingDataPolicy::ImputeMean);
        assert!(matches!(res, Err(AnalysisErrors::InvalidDataset { .. })));
        let res = normalize_units(&us, 2, MissingDataPolicy::Exclude);
        assert!(matches!(res, Err(AnalysisErrors::InvalidDataset { .. })));
    }

    #[test]
    fn independent_of_input_order() {
        let mut us = units(&[("a", &[1.0]), ("b", &[4.0]), ("c", &[7.0])]);
        let r1 = normalize_units(&us, 1, MissingDataPolicy::Exclude).unwrap();
        us.reverse();
        let r2 = normalize_units(&us, 1, MissingDataPolicy::Exclude).unwrap();
        assert_eq!(r1.features, r2.features);
    }

    #[test]
    fn statistics_independent_of_input_order() {
        let mut us = units(&[
            ("u0", &[0.1, f64::NAN]),
            ("u1", &[0.2, 0.3]),
            ("u2", &[0.3, 0.7]),
            ("u3", &[0.7, 0.1]),
        ]);
        for policy in [MissingDataPolicy::Exclude, MissingDataPolicy::ImputeMean] {
            let r1 = normalize_units(&us, 2, policy).unwrap();
            us.reverse();
            let r2 = normalize_units(&us, 2, policy).unwrap();
            us.reverse();
            assert_eq!(r1, r2);
        }
    }

    #[test]
    fn duplicate_identifiers_are_invalid() {
        let us = units(&[("a", &[1.0]), ("b", &[2.0]), ("a", &[3.0])]);
        let res = normalize_units(&us, 1, MissingDataPolicy::Exclude);
        assert!(matches!(res, Err(AnalysisErrors::InvalidDataset { .. })));
    }
}
