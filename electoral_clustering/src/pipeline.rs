use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use crate::aggregate::aggregate;
use crate::config::*;
use crate::inference::infer;
use crate::kmeans::cluster_units;
use crate::normalize::{normalize, FeatureStats};
use crate::profile::{describe_clusters, ClusterProfile};

/// Summary of the clustering stage.
#[derive(PartialEq, Debug, Clone)]
pub struct ClusteringSummary {
    pub centroids: Vec<FeatureVector>,
    pub iterations: u32,
    pub converged: bool,
    pub inertia: f64,
    pub sizes: Vec<usize>,
}

/// The complete result of one analysis.
#[derive(PartialEq, Debug, Clone)]
pub struct AnalysisOutcome {
    pub records: BTreeMap<String, AnalysisRecord>,
    pub stats: FeatureStats,
    pub clustering: ClusteringSummary,
    pub profiles: Vec<ClusterProfile>,
    pub caveats: Vec<Caveat>,
}

impl AnalysisOutcome {
    /// True if the results should be shown with a warning.
    pub fn is_degraded(&self) -> bool {
        !self.caveats.is_empty()
    }

    pub fn assignments(&self) -> BTreeMap<String, ClusterLabel> {
        self.records
            .iter()
            .map(|(id, r)| (id.clone(), r.cluster))
            .collect()
    }
}

/// Runs the whole pipeline: normalization, clustering, inference and aggregation.
///
/// Arguments:
/// * `dataset` the validated units
/// * `config` the options of this run
/// * `labels` historical targets by unit identifier, for the supervised mode
/// * `cancel` an optional flag to stop the clustering between iterations
pub fn run_analysis(
    dataset: &Dataset,
    config: &AnalysisConfig,
    labels: Option<&BTreeMap<String, f64>>,
    cancel: Option<&AtomicBool>,
) -> Result<AnalysisOutcome, AnalysisErrors> {
    info!(
        "run_analysis: {} units, {} features, config: {:?}",
        dataset.units().len(),
        dataset.dimension(),
        config
    );
    config.validate()?;

    let normalized = normalize(dataset, config.missing_data)?;
    let mut caveats: Vec<Caveat> = normalized.caveats();

    let clustering = cluster_units(&normalized.features, config, cancel)?;
    if !clustering.converged {
        caveats.push(Caveat::NotConverged {
            iterations: clustering.iterations,
        });
    }

    let inference = infer(&normalized.features, &clustering, labels, config)?;
    caveats.extend(inference.caveats.iter().cloned());

    let records = aggregate(
        &normalized.features,
        &clustering.assignments,
        &inference.outputs,
    )?;
    let profiles = describe_clusters(dataset, &clustering.assignments, clustering.k());
    for p in profiles.iter() {
        info!(
            "run_analysis: cluster {} ({}): {} units",
            p.cluster, p.name, p.size
        );
    }
    if !caveats.is_empty() {
        warn!("run_analysis: degraded results: {:?}", caveats);
    }

    Ok(AnalysisOutcome {
        records,
        stats: normalized.stats,
        clustering: ClusteringSummary {
            sizes: clustering.cluster_sizes(),
            centroids: clustering.centroids,
            iterations: clustering.iterations,
            converged: clustering.converged,
            inertia: clustering.inertia,
        },
        profiles,
        caveats,
    })
}
