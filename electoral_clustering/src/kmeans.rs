//! Deterministic k-means partitioning of the electoral units.
//!
//! Seeding uses the farthest-point rule: the first seed is the unit farthest
//! from the global mean, every further seed is the unit farthest from its
//! closest seed. The assignment and update steps follow Lloyd's algorithm.
//! Empty clusters are reseeded with the unit that is the worst fit of its own
//! cluster.

use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::*;
use crate::linalg::{mean_vector, squared_distance};

/// The outcome of one clustering run.
#[derive(PartialEq, Debug, Clone)]
pub struct Clustering {
    pub assignments: BTreeMap<String, ClusterLabel>,
    pub centroids: Vec<FeatureVector>,
    /// Number of assignment steps performed.
    pub iterations: u32,
    /// False if the iteration bound was reached with assignments still moving.
    pub converged: bool,
    /// Within-cluster sum of squared distances.
    pub inertia: f64,
    /// Number of times an empty cluster was reseeded.
    pub reseeds: u32,
}

impl Clustering {
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.k()];
        for c in self.assignments.values() {
            sizes[*c] += 1;
        }
        sizes
    }

    /// The identifiers of the members of a cluster, in ascending order.
    pub fn members(&self, cluster: ClusterLabel) -> Vec<&String> {
        self.assignments
            .iter()
            .filter_map(|(id, c)| if *c == cluster { Some(id) } else { None })
            .collect()
    }
}

/// Partitions the feature vectors into `config.k` clusters.
///
/// Arguments:
/// * `features` the normalized features, by unit identifier
/// * `config` only `k`, `max_iterations` and `tiebreak_mode` are used
/// * `cancel` if provided, checked before each iteration. When it is set, the
/// run stops with `AnalysisErrors::Cancelled`.
pub fn cluster_units(
    features: &BTreeMap<String, FeatureVector>,
    config: &AnalysisConfig,
    cancel: Option<&AtomicBool>,
) -> Result<Clustering, AnalysisErrors> {
    let k = config.k;
    let n = features.len();
    info!(
        "cluster_units: {} units, k: {}, max_iterations: {}, tiebreak: {:?}",
        n, k, config.max_iterations, config.tiebreak_mode
    );
    if k == 0 {
        return ClusteringSnafu {
            reason: "the number of clusters must be positive",
        }
        .fail();
    }
    if k > n {
        return ClusteringSnafu {
            reason: format!("cannot partition {} units into {} clusters", n, k),
        }
        .fail();
    }
    if config.max_iterations == 0 {
        return ClusteringSnafu {
            reason: "the iteration bound must be positive",
        }
        .fail();
    }

    // The BTreeMap order makes the whole run independent of the input order.
    let ids: Vec<&String> = features.keys().collect();
    let points: Vec<&[f64]> = features.values().map(|v| v.as_slice()).collect();
    let dim = points[0].len();
    if let Some((id, _)) = features.iter().find(|(_, v)| v.len() != dim) {
        return InvalidDatasetSnafu {
            reason: format!("unit {} does not have {} features", id, dim),
        }
        .fail();
    }

    let tiebreak = TieBreaker::new(config.tiebreak_mode);
    let seeds = farthest_point_seeds(&ids, &points, k, &tiebreak);
    debug!("cluster_units: seeds: {:?}", seeds.iter().map(|i| ids[*i]).collect::<Vec<_>>());
    let mut centroids: Vec<FeatureVector> = seeds.iter().map(|i| points[*i].to_vec()).collect();

    let mut previous: Option<Vec<ClusterLabel>> = None;
    let mut converged = false;
    let mut iterations: u32 = 0;
    let mut reseeds: u32 = 0;
    while iterations < config.max_iterations {
        if let Some(flag) = cancel {
            if flag.load(Ordering::SeqCst) {
                info!("cluster_units: cancelled at iteration {}", iterations + 1);
                return CancelledSnafu {
                    iteration: iterations + 1,
                }
                .fail();
            }
        }
        iterations += 1;

        let mut labels: Vec<ClusterLabel> = points
            .iter()
            .zip(ids.iter())
            .map(|(p, id)| nearest_centroid(p, &centroids, id, &tiebreak))
            .collect();

        if previous.as_ref() == Some(&labels) {
            converged = true;
            debug!("cluster_units: stable assignments at iteration {}", iterations);
            break;
        }

        let mut updated = compute_centroids(&points, &labels, k, dim);
        let mut reseeded = false;
        // Reseed the empty clusters, one at a time.
        while let Some(empty) = (0..k).find(|c| !labels.contains(c)) {
            let donor = worst_fitted_unit(&points, &labels, &updated, k, &ids, &tiebreak);
            debug!(
                "cluster_units: iteration {}: cluster {} is empty, reseeding from {}",
                iterations, empty, ids[donor]
            );
            let old = labels[donor];
            labels[donor] = empty;
            updated[empty] = points[donor].to_vec();
            updated[old] = cluster_mean(&points, &labels, old, dim);
            reseeds += 1;
            reseeded = true;
        }
        previous = Some(labels);
        // Same centroids: the next assignment step would repeat this one.
        // A reseeded label is not a nearest-centroid assignment.
        if !reseeded && updated == centroids {
            converged = true;
            debug!("cluster_units: stable centroids at iteration {}", iterations);
            break;
        }
        centroids = updated;
    }

    let labels = match previous {
        Some(l) => l,
        // The iteration bound is positive, so this only covers an empty loop.
        None => points
            .iter()
            .zip(ids.iter())
            .map(|(p, id)| nearest_centroid(p, &centroids, id, &tiebreak))
            .collect(),
    };
    if !converged {
        warn!(
            "cluster_units: no stable assignment after {} iterations",
            iterations
        );
    }
    let inertia: f64 = points
        .iter()
        .zip(labels.iter())
        .map(|(p, c)| squared_distance(p, &centroids[*c]))
        .sum();
    info!(
        "cluster_units: done after {} iterations, converged: {}, inertia: {:.6}, reseeds: {}",
        iterations, converged, inertia, reseeds
    );
    let assignments: BTreeMap<String, ClusterLabel> = ids
        .iter()
        .zip(labels.iter())
        .map(|(id, c)| ((*id).clone(), *c))
        .collect();
    Ok(Clustering {
        assignments,
        centroids,
        iterations,
        converged,
        inertia,
        reseeds,
    })
}

/// Orders the candidates of a tie.
///
/// In the random mode, candidates are sorted by the hash of the seed, a salt
/// and their index. This is hard to guess in advance but fully reproducible.
struct TieBreaker {
    mode: TieBreakMode,
}

impl TieBreaker {
    fn new(mode: TieBreakMode) -> TieBreaker {
        TieBreaker { mode }
    }

    /// True if `challenger` should win the tie against `incumbent`.
    fn prefers(&self, challenger: usize, incumbent: usize, salt: &str) -> bool {
        match self.mode {
            TieBreakMode::LowestIndex => challenger < incumbent,
            TieBreakMode::Random(seed) => {
                permutation_key(seed, salt, challenger) < permutation_key(seed, salt, incumbent)
            }
        }
    }
}

fn permutation_key(seed: u64, salt: &str, idx: usize) -> String {
    sha256::digest(format!("{:020}{:08}{}", seed, idx, salt).as_str())
}

/// Picks the index maximizing `score`, resolving exact ties with the tie breaker.
fn pick_max<F>(candidates: &[usize], score: F, tiebreak: &TieBreaker, salt: &str) -> Option<usize>
where
    F: Fn(usize) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for &c in candidates {
        let s = score(c);
        best = match best {
            None => Some((c, s)),
            Some((_, bs)) if s > bs => Some((c, s)),
            Some((b, bs)) if s == bs && tiebreak.prefers(c, b, salt) => Some((c, s)),
            x => x,
        };
    }
    best.map(|(c, _)| c)
}

fn farthest_point_seeds(
    ids: &[&String],
    points: &[&[f64]],
    k: usize,
    tiebreak: &TieBreaker,
) -> Vec<usize> {
    let dim = points[0].len();
    let global_mean = mean_vector(points.iter().copied(), dim);
    let all: Vec<usize> = (0..points.len()).collect();
    let mut seeds: Vec<usize> = Vec::with_capacity(k);
    // Candidates are always non-empty because k <= number of points.
    if let Some(first) = pick_max(
        &all,
        |i| squared_distance(points[i], &global_mean),
        tiebreak,
        "seed-0",
    ) {
        seeds.push(first);
    }
    // Distance of every point to its closest seed so far.
    let mut closest: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, points[seeds[0]]))
        .collect();
    while seeds.len() < k {
        let remaining: Vec<usize> = all.iter().copied().filter(|i| !seeds.contains(i)).collect();
        let salt = format!("seed-{}", seeds.len());
        let next = match pick_max(&remaining, |i| closest[i], tiebreak, &salt) {
            Some(x) => x,
            None => break,
        };
        debug!(
            "farthest_point_seeds: seed {} is {} at squared distance {}",
            seeds.len(),
            ids[next],
            closest[next]
        );
        seeds.push(next);
        for (i, d) in closest.iter_mut().enumerate() {
            *d = d.min(squared_distance(points[i], points[next]));
        }
    }
    seeds
}

fn nearest_centroid(
    point: &[f64],
    centroids: &[FeatureVector],
    unit_id: &str,
    tiebreak: &TieBreaker,
) -> ClusterLabel {
    let mut best: (ClusterLabel, f64) = (0, squared_distance(point, &centroids[0]));
    for (c, centroid) in centroids.iter().enumerate().skip(1) {
        let d = squared_distance(point, centroid);
        if d < best.1 || (d == best.1 && tiebreak.prefers(c, best.0, unit_id)) {
            best = (c, d);
        }
    }
    best.0
}

fn cluster_mean(
    points: &[&[f64]],
    labels: &[ClusterLabel],
    cluster: ClusterLabel,
    dim: usize,
) -> FeatureVector {
    mean_vector(
        points
            .iter()
            .zip(labels.iter())
            .filter(|(_, c)| **c == cluster)
            .map(|(p, _)| *p),
        dim,
    )
}

fn compute_centroids(
    points: &[&[f64]],
    labels: &[ClusterLabel],
    k: usize,
    dim: usize,
) -> Vec<FeatureVector> {
    (0..k)
        .map(|c| cluster_mean(points, labels, c, dim))
        .collect()
}

/// The unit farthest from its own centroid, among clusters with more than one member.
fn worst_fitted_unit(
    points: &[&[f64]],
    labels: &[ClusterLabel],
    centroids: &[FeatureVector],
    k: usize,
    ids: &[&String],
    tiebreak: &TieBreaker,
) -> usize {
    let mut sizes = vec![0usize; k];
    for c in labels.iter() {
        sizes[*c] += 1;
    }
    let candidates: Vec<usize> = (0..points.len())
        .filter(|i| sizes[labels[*i]] > 1)
        .collect();
    // With k <= n and an empty cluster, some cluster has at least two members.
    pick_max(
        &candidates,
        |i| squared_distance(points[i], &centroids[labels[i]]),
        tiebreak,
        "reseed",
    )
    .unwrap_or_else(|| {
        warn!(
            "worst_fitted_unit: no cluster with several members among {} units",
            ids.len()
        );
        0
    })
}
