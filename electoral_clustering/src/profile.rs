use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::*;

// A feature above this share dominates its cluster.
const DOMINANCE_THRESHOLD: f64 = 0.40;

/// A readable description of a cluster, computed on the raw features.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ClusterProfile {
    pub cluster: ClusterLabel,
    pub name: String,
    pub size: usize,
    /// Mean of the raw features of the members, ignoring missing values.
    pub mean_features: Vec<f64>,
}

pub fn describe_clusters(
    dataset: &Dataset,
    assignments: &BTreeMap<String, ClusterLabel>,
    k: usize,
) -> Vec<ClusterProfile> {
    let dim = dataset.dimension();
    let mut sums = vec![vec![0.0; dim]; k];
    let mut counts = vec![vec![0usize; dim]; k];
    let mut sizes = vec![0usize; k];
    for u in dataset.units() {
        if let Some(&c) = assignments.get(&u.id) {
            sizes[c] += 1;
            for (idx, x) in u.features.iter().enumerate() {
                if x.is_finite() {
                    sums[c][idx] += x;
                    counts[c][idx] += 1;
                }
            }
        }
    }
    (0..k)
        .map(|c| {
            let mean_features: Vec<f64> = sums[c]
                .iter()
                .zip(counts[c].iter())
                .map(|(s, n)| if *n > 0 { s / *n as f64 } else { 0.0 })
                .collect();
            let name = cluster_name(
                &mean_features,
                dataset.feature_names(),
                dataset.abstention_feature(),
            );
            debug!("describe_clusters: cluster {} ({} units): {}", c, sizes[c], name);
            ClusterProfile {
                cluster: c,
                name,
                size: sizes[c],
                mean_features,
            }
        })
        .collect()
}

/// Names a cluster after its dominant features.
pub fn cluster_name(
    mean_features: &[f64],
    feature_names: &[String],
    abstention_feature: Option<usize>,
) -> String {
    let mut order: Vec<usize> = (0..mean_features.len()).collect();
    // Stable sort: equal means keep the feature order.
    order.sort_by(|a, b| mean_features[*b].total_cmp(&mean_features[*a]));
    match order.as_slice() {
        [] => "Empty".to_string(),
        [top, ..] if Some(*top) == abstention_feature && mean_features[*top] > DOMINANCE_THRESHOLD => {
            "High abstention".to_string()
        }
        [top, ..] if mean_features[*top] > DOMINANCE_THRESHOLD => {
            format!("Stronghold {}", feature_names[*top])
        }
        [top] => format!("Mixed {}", feature_names[*top]),
        [top, second, ..] => format!("Mixed {}-{}", feature_names[*top], feature_names[*second]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(ns: &[&str]) -> Vec<String> {
        ns.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn naming_rules() {
        let fs = names(&["PSOE", "PP", "Abstencion"]);
        assert_eq!(cluster_name(&[0.5, 0.2, 0.3], &fs, Some(2)), "Stronghold PSOE");
        assert_eq!(cluster_name(&[0.2, 0.3, 0.45], &fs, Some(2)), "High abstention");
        assert_eq!(cluster_name(&[0.2, 0.3, 0.45], &fs, None), "Stronghold Abstencion");
        assert_eq!(cluster_name(&[0.3, 0.35, 0.2], &fs, Some(2)), "Mixed PP-PSOE");
        assert_eq!(cluster_name(&[0.3], &names(&["PP"]), None), "Mixed PP");
    }

    #[test]
    fn profiles_use_raw_features() {
        let fs = names(&["PSOE", "PP"]);
        let units = vec![
            ElectoralUnit::new("a", &[0.6, 0.1]),
            ElectoralUnit::new("b", &[0.4, f64::NAN]),
            ElectoralUnit::new("c", &[0.1, 0.5]),
        ];
        let ds = Dataset::new(&fs, units).unwrap();
        let assignments: BTreeMap<String, ClusterLabel> =
            [("a", 0), ("b", 0), ("c", 1)].iter().map(|(id, c)| (id.to_string(), *c)).collect();
        let ps = describe_clusters(&ds, &assignments, 2);
        assert_eq!(ps.len(), 2);
        assert_eq!(ps[0].size, 2);
        assert!((ps[0].mean_features[0] - 0.5).abs() < 1e-12);
        assert!((ps[0].mean_features[1] - 0.1).abs() < 1e-12);
        assert_eq!(ps[0].name, "Stronghold PSOE");
        assert_eq!(ps[1].name, "Stronghold PP");
    }
}
