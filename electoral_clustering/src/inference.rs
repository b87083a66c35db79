//! Per-unit score inference.
//!
//! Two modes are available:
//!
//! - unsupervised: the score of a unit is the projection of its cluster
//! centroid on the first principal axis of all the units. The confidence
//! measures how clearly the unit belongs to its cluster.
//!
//! - supervised: a ridge regression maps the features to historical targets.
//! Each cluster with enough labeled units gets its own fit, the others use a
//! fit over all the labeled units. The confidence of a cluster fit never
//! falls below the confidence of the global fit, so that labeling more units
//! of a cluster cannot lower the confidence of its other units.

use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

use crate::config::*;
use crate::kmeans::Clustering;
use crate::linalg::{cholesky_solve, covariance, distance, dominant_eigenpair, dot, Matrix};

const EIGEN_SWEEPS: usize = 1000;

/// The outputs of the inference model and the caveats found along the way.
#[derive(PartialEq, Debug, Clone)]
pub struct Inference {
    pub outputs: BTreeMap<String, InferenceOutput>,
    pub caveats: Vec<Caveat>,
}

/// A fitted linear model: `target = intercept + coefficients . features`.
#[derive(PartialEq, Debug, Clone)]
pub struct LinearFit {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    /// Number of labeled units used for the fit.
    pub samples: usize,
    /// Root mean squared training residual.
    pub rmse: f64,
}

impl LinearFit {
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.intercept + dot(&self.coefficients, features)
    }

    /// Grows with the number of samples and shrinks with the residual error.
    pub fn confidence(&self) -> f64 {
        let n = self.samples as f64;
        (n / (n + 1.0)) / (1.0 + self.rmse)
    }
}

/// Runs the inference in the mode selected by the configuration.
pub fn infer(
    features: &BTreeMap<String, FeatureVector>,
    clustering: &Clustering,
    labels: Option<&BTreeMap<String, f64>>,
    config: &AnalysisConfig,
) -> Result<Inference, AnalysisErrors> {
    match config.mode {
        InferenceMode::Unsupervised => {
            if labels.map(|l| !l.is_empty()).unwrap_or(false) {
                info!("infer: unsupervised mode, the labels are not used");
            }
            infer_unsupervised(features, clustering)
        }
        InferenceMode::Supervised => {
            let empty: BTreeMap<String, f64> = BTreeMap::new();
            infer_supervised(
                features,
                clustering,
                labels.unwrap_or(&empty),
                config.min_labeled_per_cluster,
                config.ridge_penalty,
            )
        }
    }
}

/// First principal axis of the feature vectors.
///
/// The sign is fixed so that the component with the largest magnitude is
/// positive. A zero vector is returned when all the features are constant.
pub fn principal_axis(features: &BTreeMap<String, FeatureVector>) -> Vec<f64> {
    let rows: Vec<&[f64]> = features.values().map(|v| v.as_slice()).collect();
    let dim = rows.first().map(|r| r.len()).unwrap_or(0);
    let cov = covariance(&rows, dim);
    match dominant_eigenpair(&cov, EIGEN_SWEEPS) {
        Some((eigenvalue, mut axis)) => {
            debug!(
                "principal_axis: eigenvalue {} axis {:?}",
                eigenvalue, axis
            );
            let pivot = axis
                .iter()
                .enumerate()
                .fold((0, 0.0f64), |(bi, bv), (i, v)| {
                    if v.abs() > bv.abs() {
                        (i, *v)
                    } else {
                        (bi, bv)
                    }
                });
            if pivot.1 < 0.0 {
                for x in axis.iter_mut() {
                    *x = -*x;
                }
            }
            axis
        }
        None => {
            warn!("principal_axis: all the features are constant");
            vec![0.0; dim]
        }
    }
}

pub fn infer_unsupervised(
    features: &BTreeMap<String, FeatureVector>,
    clustering: &Clustering,
) -> Result<Inference, AnalysisErrors> {
    let axis = principal_axis(features);
    let centroid_scores: Vec<f64> = clustering
        .centroids
        .iter()
        .map(|c| dot(c, &axis))
        .collect();
    info!("infer_unsupervised: centroid scores: {:?}", centroid_scores);

    let mut outputs: BTreeMap<String, InferenceOutput> = BTreeMap::new();
    for (id, f) in features.iter() {
        let cluster = *clustering
            .assignments
            .get(id)
            .ok_or_else(|| AnalysisErrors::Integrity {
                unit_id: id.clone(),
                missing_from: "cluster assignments".to_string(),
            })?;
        outputs.insert(
            id.clone(),
            InferenceOutput {
                score: centroid_scores[cluster],
                confidence: membership_confidence(f, cluster, &clustering.centroids),
                model: ModelScope::Centroid,
            },
        );
    }
    Ok(Inference {
        outputs,
        caveats: vec![],
    })
}

/// Silhouette-style separation between the own centroid and the closest other one.
fn membership_confidence(
    point: &[f64],
    cluster: ClusterLabel,
    centroids: &[FeatureVector],
) -> f64 {
    let a = distance(point, &centroids[cluster]);
    let b = centroids
        .iter()
        .enumerate()
        .filter(|(c, _)| *c != cluster)
        .map(|(_, centroid)| distance(point, centroid))
        .fold(f64::INFINITY, f64::min);
    if b.is_infinite() {
        // Single cluster
        return 1.0 / (1.0 + a);
    }
    let m = a.max(b);
    if m == 0.0 {
        1.0
    } else {
        ((b - a) / m).clamp(0.0, 1.0)
    }
}

pub fn infer_supervised(
    features: &BTreeMap<String, FeatureVector>,
    clustering: &Clustering,
    labels: &BTreeMap<String, f64>,
    min_labeled_per_cluster: usize,
    ridge_penalty: f64,
) -> Result<Inference, AnalysisErrors> {
    let mut usable: BTreeMap<&String, f64> = BTreeMap::new();
    for (id, target) in labels.iter() {
        match features.get(id) {
            Some(_) if target.is_finite() => {
                usable.insert(id, *target);
            }
            Some(_) => warn!("infer_supervised: ignoring non-finite label for {}", id),
            None => warn!("infer_supervised: ignoring label for unknown unit {}", id),
        }
    }
    info!(
        "infer_supervised: {} usable labels out of {}",
        usable.len(),
        labels.len()
    );
    if usable.is_empty() {
        return InsufficientDataSnafu {
            reason: "supervised mode requires at least one labeled unit",
        }
        .fail();
    }

    let global_samples: Vec<(&[f64], f64)> = usable
        .iter()
        .map(|(id, t)| (features[*id].as_slice(), *t))
        .collect();
    let global = fit_ridge(&global_samples, ridge_penalty)?;
    info!(
        "infer_supervised: global fit on {} samples, rmse {:.6}",
        global.samples, global.rmse
    );

    let mut caveats: Vec<Caveat> = Vec::new();
    let mut cluster_fits: HashMap<ClusterLabel, LinearFit> = HashMap::new();
    for cluster in 0..clustering.k() {
        let samples: Vec<(&[f64], f64)> = usable
            .iter()
            .filter(|(id, _)| clustering.assignments.get(**id) == Some(&cluster))
            .map(|(id, t)| (features[*id].as_slice(), *t))
            .collect();
        if samples.len() >= min_labeled_per_cluster {
            let fit = fit_ridge(&samples, ridge_penalty)?;
            debug!(
                "infer_supervised: cluster {} fit on {} samples, rmse {:.6}",
                cluster, fit.samples, fit.rmse
            );
            cluster_fits.insert(cluster, fit);
        } else {
            warn!(
                "infer_supervised: cluster {} has {} labeled units (< {}), using the global fit",
                cluster,
                samples.len(),
                min_labeled_per_cluster
            );
            caveats.push(Caveat::GlobalFallback {
                cluster,
                labeled: samples.len(),
            });
        }
    }

    let mut outputs: BTreeMap<String, InferenceOutput> = BTreeMap::new();
    for (id, f) in features.iter() {
        let cluster = *clustering
            .assignments
            .get(id)
            .ok_or_else(|| AnalysisErrors::Integrity {
                unit_id: id.clone(),
                missing_from: "cluster assignments".to_string(),
            })?;
        let output = if let Some(target) = usable.get(id) {
            InferenceOutput {
                score: *target,
                confidence: 1.0,
                model: ModelScope::Observed,
            }
        } else if let Some(fit) = cluster_fits.get(&cluster) {
            InferenceOutput {
                score: fit.predict(f),
                confidence: fit.confidence().max(global.confidence()),
                model: ModelScope::Cluster(cluster),
            }
        } else {
            InferenceOutput {
                score: global.predict(f),
                confidence: global.confidence(),
                model: ModelScope::Global,
            }
        };
        outputs.insert(id.clone(), output);
    }
    Ok(Inference { outputs, caveats })
}

/// Ridge regression with an unpenalized intercept.
///
/// The features and targets are centered, then `(X'X + lambda I) b = X'y` is
/// solved. The intercept restores the means.
pub fn fit_ridge(samples: &[(&[f64], f64)], penalty: f64) -> Result<LinearFit, AnalysisErrors> {
    if samples.is_empty() {
        return InsufficientDataSnafu {
            reason: "cannot fit a model without samples",
        }
        .fail();
    }
    let dim = samples[0].0.len();
    let n = samples.len() as f64;
    let mut x_mean = vec![0.0; dim];
    for (x, _) in samples.iter() {
        for (m, v) in x_mean.iter_mut().zip(x.iter()) {
            *m += v / n;
        }
    }
    let y_mean: f64 = samples.iter().map(|(_, y)| y / n).sum();

    let mut gram: Matrix = vec![vec![0.0; dim]; dim];
    let mut rhs = vec![0.0; dim];
    for (x, y) in samples.iter() {
        let xc: Vec<f64> = x.iter().zip(x_mean.iter()).map(|(v, m)| v - m).collect();
        let yc = y - y_mean;
        for i in 0..dim {
            rhs[i] += xc[i] * yc;
            for j in 0..dim {
                gram[i][j] += xc[i] * xc[j];
            }
        }
    }
    for (i, row) in gram.iter_mut().enumerate() {
        row[i] += penalty;
    }
    let coefficients = match cholesky_solve(&gram, &rhs) {
        Some(b) => b,
        None => {
            return InvalidConfigurationSnafu {
                reason: format!("ridge system is not positive definite (penalty {})", penalty),
            }
            .fail()
        }
    };
    let intercept = y_mean - dot(&coefficients, &x_mean);
    let mut fit = LinearFit {
        intercept,
        coefficients,
        samples: samples.len(),
        rmse: 0.0,
    };
    let sse: f64 = samples
        .iter()
        .map(|(x, y)| {
            let r = y - fit.predict(x);
            r * r
        })
        .sum();
    fit.rmse = (sse / n).sqrt();
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmeans::cluster_units;

    fn features(rows: &[(&str, &[f64])]) -> BTreeMap<String, FeatureVector> {
        rows.iter()
            .map(|(id, f)| (id.to_string(), f.to_vec()))
            .collect()
    }

    fn two_groups() -> BTreeMap<String, FeatureVector> {
        features(&[
            ("a", &[-1.0, -1.0]),
            ("b", &[-1.0, -0.8]),
            ("c", &[-0.9, -1.1]),
            ("d", &[1.0, 1.0]),
            ("e", &[1.1, 0.9]),
            ("f", &[0.9, 1.2]),
        ])
    }

    #[test]
    fn unsupervised_needs_no_labels() {
        let f = two_groups();
        let cl = cluster_units(&f, &AnalysisConfig::with_k(2), None).unwrap();
        let res = infer(&f, &cl, None, &AnalysisConfig::with_k(2)).unwrap();
        assert_eq!(res.outputs.len(), 6);
        assert!(res.caveats.is_empty());
        // Same cluster, same score.
        assert_eq!(res.outputs["a"].score, res.outputs["b"].score);
        assert!(res.outputs["a"].score < res.outputs["d"].score);
        for o in res.outputs.values() {
            assert_eq!(o.model, ModelScope::Centroid);
            assert!(o.confidence >= 0.0 && o.confidence <= 1.0);
        }
    }

    #[test]
    fn principal_axis_sign_is_fixed() {
        let f = features(&[("a", &[0.0, 0.0]), ("b", &[-2.0, -1.0]), ("c", &[2.0, 1.0])]);
        let axis = principal_axis(&f);
        assert!(axis[0] > 0.0);
        assert!((axis[0] - 2.0 / 5f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn constant_features_give_zero_axis() {
        let f = features(&[("a", &[0.0, 0.0]), ("b", &[0.0, 0.0])]);
        assert_eq!(principal_axis(&f), vec![0.0, 0.0]);
    }

    #[test]
    fn supervised_without_labels_is_fatal() {
        let f = two_groups();
        let cfg = AnalysisConfig {
            mode: InferenceMode::Supervised,
            ..AnalysisConfig::with_k(2)
        };
        let cl = cluster_units(&f, &cfg, None).unwrap();
        let res = infer(&f, &cl, None, &cfg);
        assert!(matches!(res, Err(AnalysisErrors::InsufficientData { .. })));
        let only_unknown: BTreeMap<String, f64> = [("zz".to_string(), 1.0)].into_iter().collect();
        let res = infer(&f, &cl, Some(&only_unknown), &cfg);
        assert!(matches!(res, Err(AnalysisErrors::InsufficientData { .. })));
    }

    #[test]
    fn sparse_cluster_falls_back_to_global_fit() {
        let f = two_groups();
        let cfg = AnalysisConfig {
            mode: InferenceMode::Supervised,
            ..AnalysisConfig::with_k(2)
        };
        let cl = cluster_units(&f, &cfg, None).unwrap();
        let labels: BTreeMap<String, f64> = [("a", 1.0), ("b", 2.0), ("d", 5.0)]
            .iter()
            .map(|(id, t)| (id.to_string(), *t))
            .collect();
        let res = infer(&f, &cl, Some(&labels), &cfg).unwrap();
        assert_eq!(res.caveats.len(), 2);
        assert_eq!(res.outputs["a"].model, ModelScope::Observed);
        assert_eq!(res.outputs["a"].score, 1.0);
        assert_eq!(res.outputs["c"].model, ModelScope::Global);
        assert_eq!(res.outputs["e"].model, ModelScope::Global);
    }

    #[test]
    fn dense_cluster_gets_its_own_fit() {
        let f = two_groups();
        let cfg = AnalysisConfig {
            mode: InferenceMode::Supervised,
            min_labeled_per_cluster: 2,
            ..AnalysisConfig::with_k(2)
        };
        let cl = cluster_units(&f, &cfg, None).unwrap();
        let labels: BTreeMap<String, f64> = [("a", 1.0), ("b", 2.0), ("d", 5.0)]
            .iter()
            .map(|(id, t)| (id.to_string(), *t))
            .collect();
        let res = infer(&f, &cl, Some(&labels), &cfg).unwrap();
        let cluster_a = cl.assignments["a"];
        assert_eq!(res.outputs["c"].model, ModelScope::Cluster(cluster_a));
        assert_eq!(
            res.caveats,
            vec![Caveat::GlobalFallback {
                cluster: cl.assignments["d"],
                labeled: 1
            }]
        );
    }

    #[test]
    fn confidence_grows_with_samples() {
        // Targets that are exactly linear: the residual stays zero.
        let rows: Vec<Vec<f64>> = (0..8).map(|i| vec![i as f64, (i * i) as f64]).collect();
        let mut previous = 0.0;
        for n in 1..=8 {
            let samples: Vec<(&[f64], f64)> = rows[..n]
                .iter()
                .map(|r| (r.as_slice(), 3.0))
                .collect();
            let fit = fit_ridge(&samples, 1.0).unwrap();
            assert!(fit.rmse < 1e-12);
            assert!(fit.confidence() > previous);
            previous = fit.confidence();
        }
    }

    #[test]
    fn confidence_does_not_drop_when_a_cluster_gets_its_own_fit() {
        let f = features(&[
            ("a0", &[-1.0, -1.0]),
            ("a1", &[-1.1, -0.9]),
            ("a2", &[-0.9, -1.1]),
            ("a3", &[-1.0, -1.2]),
            ("a4", &[-1.2, -1.0]),
            ("b0", &[1.0, 1.0]),
            ("b1", &[1.1, 0.9]),
            ("b2", &[0.9, 1.1]),
            ("b3", &[1.0, 1.2]),
            ("b4", &[1.2, 1.0]),
        ]);
        let cfg = AnalysisConfig {
            mode: InferenceMode::Supervised,
            ..AnalysisConfig::with_k(2)
        };
        let cl = cluster_units(&f, &cfg, None).unwrap();
        assert_eq!(cl.cluster_sizes(), vec![5, 5]);
        let cluster_a = cl.assignments["a4"];
        let mut labels: BTreeMap<String, f64> = ["b0", "b1", "b2", "b3"]
            .iter()
            .map(|id| (id.to_string(), 3.0))
            .collect();
        let mut previous = 0.0;
        // Below, at and above the threshold of 3 labeled units.
        for (n, id) in ["a0", "a1", "a2", "a3"].iter().enumerate() {
            labels.insert(id.to_string(), 3.0);
            let res = infer(&f, &cl, Some(&labels), &cfg).unwrap();
            let out = &res.outputs["a4"];
            let expected_model = if n + 1 >= cfg.min_labeled_per_cluster {
                ModelScope::Cluster(cluster_a)
            } else {
                ModelScope::Global
            };
            assert_eq!(out.model, expected_model);
            assert!(out.confidence >= previous, "{} < {}", out.confidence, previous);
            previous = out.confidence;
        }
    }

    #[test]
    fn ridge_recovers_a_linear_trend() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let samples: Vec<(&[f64], f64)> = rows
            .iter()
            .map(|r| (r.as_slice(), 2.0 * r[0] + 1.0))
            .collect();
        let fit = fit_ridge(&samples, 1e-6).unwrap();
        assert!((fit.coefficients[0] - 2.0).abs() < 1e-4);
        assert!((fit.intercept - 1.0).abs() < 1e-3);
        assert!((fit.predict(&[30.0]) - 61.0).abs() < 1e-2);
    }
}
