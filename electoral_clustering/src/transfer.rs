//! Estimation of vote transfers between two elections.
//!
//! For every unit, the shares of the source election `x` (one entry per
//! source party, abstention included) and of the destination election `y`
//! are known. The transfer matrix `P` is the row-stochastic matrix that
//! minimizes the weighted error:
//!
//! ```text
//! sum_i w_i || y_i - x_i P ||^2    with P >= 0 and every row of P summing to 1
//! ```
//!
//! The weight `w_i` is the size of the unit (total of its source row) divided
//! by the mean size, so that large municipalities count more than small
//! villages. The problem is solved by projected gradient descent.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::*;
use crate::linalg::{dominant_eigenpair, Matrix};

const EIGEN_SWEEPS: usize = 1000;

/// Vote counts of a set of units in two elections.
#[derive(PartialEq, Debug, Clone)]
pub struct TransferSample {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    /// One entry per unit: (source counts, destination counts).
    pub rows: Vec<(Vec<f64>, Vec<f64>)>,
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub struct TransferOptions {
    pub max_iterations: u32,
    /// Stops when no coefficient moves by more than this value.
    pub tolerance: f64,
}

impl TransferOptions {
    pub const DEFAULT_OPTIONS: TransferOptions = TransferOptions {
        max_iterations: 5000,
        tolerance: 1e-9,
    };
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TransferMatrix {
    pub sources: Vec<String>,
    pub targets: Vec<String>,
    /// `shares[i][j]`: share of the voters of source `i` who went to target `j`.
    pub shares: Vec<Vec<f64>>,
    pub units: usize,
    pub iterations: u32,
    pub converged: bool,
    /// Weighted squared error of the fit.
    pub loss: f64,
}

impl TransferMatrix {
    pub fn share(&self, source: &str, target: &str) -> Option<f64> {
        let i = self.sources.iter().position(|s| s == source)?;
        let j = self.targets.iter().position(|t| t == target)?;
        Some(self.shares[i][j])
    }
}

/// Which units a transfer matrix was estimated on.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransferScope {
    Global,
    Cluster(ClusterLabel),
}

pub fn estimate_transfer_matrix(
    sample: &TransferSample,
    options: &TransferOptions,
) -> Result<TransferMatrix, AnalysisErrors> {
    let n_src = sample.sources.len();
    let n_dst = sample.targets.len();
    if sample.rows.is_empty() || n_src == 0 || n_dst == 0 {
        return InvalidDatasetSnafu {
            reason: "a transfer matrix needs units, source parties and target parties",
        }
        .fail();
    }
    if let Some(idx) = sample
        .rows
        .iter()
        .position(|(x, y)| x.len() != n_src || y.len() != n_dst)
    {
        return InvalidDatasetSnafu {
            reason: format!("transfer row {} does not match the party lists", idx),
        }
        .fail();
    }
    if sample
        .rows
        .iter()
        .any(|(x, y)| x.iter().chain(y.iter()).any(|v| !v.is_finite() || *v < 0.0))
    {
        return InvalidDatasetSnafu {
            reason: "vote counts must be finite and non-negative",
        }
        .fail();
    }

    let (x, y, w) = shares_and_weights(&sample.rows);
    // Weighted Gram matrix X'WX and cross product X'WY: the gradient only needs these.
    let mut gram: Matrix = vec![vec![0.0; n_src]; n_src];
    let mut cross: Matrix = vec![vec![0.0; n_dst]; n_src];
    for ((xi, yi), wi) in x.iter().zip(y.iter()).zip(w.iter()) {
        for a in 0..n_src {
            for b in 0..n_src {
                gram[a][b] += wi * xi[a] * xi[b];
            }
            for j in 0..n_dst {
                cross[a][j] += wi * xi[a] * yi[j];
            }
        }
    }

    let mut p: Matrix = vec![vec![1.0 / n_dst as f64; n_dst]; n_src];
    let lipschitz = dominant_eigenpair(&gram, EIGEN_SWEEPS)
        .map(|(l, _)| 2.0 * l)
        .unwrap_or(0.0);
    if lipschitz <= 0.0 {
        warn!("estimate_transfer_matrix: no source votes, returning the uniform matrix");
        return Ok(TransferMatrix {
            sources: sample.sources.clone(),
            targets: sample.targets.clone(),
            loss: loss(&x, &y, &w, &p),
            shares: p,
            units: sample.rows.len(),
            iterations: 0,
            converged: true,
        });
    }
    let step = 1.0 / lipschitz;
    info!(
        "estimate_transfer_matrix: {} units, {}x{} matrix, step {:.6}",
        sample.rows.len(),
        n_src,
        n_dst,
        step
    );

    let mut iterations: u32 = 0;
    let mut converged = false;
    while iterations < options.max_iterations {
        iterations += 1;
        // gradient = 2 (X'WX P - X'WY)
        let mut max_change: f64 = 0.0;
        let mut next: Matrix = Vec::with_capacity(n_src);
        for a in 0..n_src {
            let row: Vec<f64> = (0..n_dst)
                .map(|j| {
                    let gp: f64 = (0..n_src).map(|b| gram[a][b] * p[b][j]).sum();
                    let grad = 2.0 * (gp - cross[a][j]);
                    p[a][j] - step * grad
                })
                .collect();
            let projected = project_on_simplex(&row);
            for (new, old) in projected.iter().zip(p[a].iter()) {
                max_change = max_change.max((new - old).abs());
            }
            next.push(projected);
        }
        p = next;
        if max_change < options.tolerance {
            converged = true;
            break;
        }
    }
    let final_loss = loss(&x, &y, &w, &p);
    if converged {
        debug!(
            "estimate_transfer_matrix: converged after {} iterations, loss {:.8}",
            iterations, final_loss
        );
    } else {
        warn!(
            "estimate_transfer_matrix: stopped after {} iterations, loss {:.8}",
            iterations, final_loss
        );
    }
    Ok(TransferMatrix {
        sources: sample.sources.clone(),
        targets: sample.targets.clone(),
        shares: p,
        units: sample.rows.len(),
        iterations,
        converged,
        loss: final_loss,
    })
}

/// Estimates one matrix per cluster and one for all the units.
///
/// `rows` holds the source and destination counts by unit identifier. Units
/// without a cluster are only used for the global matrix.
pub fn transfers_by_cluster(
    sources: &[String],
    targets: &[String],
    rows: &BTreeMap<String, (Vec<f64>, Vec<f64>)>,
    assignments: &BTreeMap<String, ClusterLabel>,
    k: usize,
    options: &TransferOptions,
) -> Result<BTreeMap<TransferScope, TransferMatrix>, AnalysisErrors> {
    let mut res: BTreeMap<TransferScope, TransferMatrix> = BTreeMap::new();
    for cluster in 0..k {
        let cluster_rows: Vec<(Vec<f64>, Vec<f64>)> = rows
            .iter()
            .filter(|(id, _)| assignments.get(*id) == Some(&cluster))
            .map(|(_, r)| r.clone())
            .collect();
        if cluster_rows.is_empty() {
            warn!("transfers_by_cluster: cluster {} has no transfer data", cluster);
            continue;
        }
        if cluster_rows.len() < sources.len() {
            warn!(
                "transfers_by_cluster: cluster {} has fewer units ({}) than source parties ({}), the estimate may be unstable",
                cluster,
                cluster_rows.len(),
                sources.len()
            );
        }
        let sample = TransferSample {
            sources: sources.to_vec(),
            targets: targets.to_vec(),
            rows: cluster_rows,
        };
        res.insert(
            TransferScope::Cluster(cluster),
            estimate_transfer_matrix(&sample, options)?,
        );
    }
    let sample = TransferSample {
        sources: sources.to_vec(),
        targets: targets.to_vec(),
        rows: rows.values().cloned().collect(),
    };
    res.insert(
        TransferScope::Global,
        estimate_transfer_matrix(&sample, options)?,
    );
    Ok(res)
}

/// Estimated number of voters moving from each source to each target.
///
/// `source_totals` are the votes of each source party in the first election,
/// in the order of `matrix.sources`.
pub fn absolute_transfers(
    matrix: &TransferMatrix,
    source_totals: &[f64],
) -> Result<Vec<Vec<f64>>, AnalysisErrors> {
    check_totals(matrix, source_totals)?;
    Ok(matrix
        .shares
        .iter()
        .zip(source_totals.iter())
        .map(|(row, total)| row.iter().map(|s| s * total).collect())
        .collect())
}

fn check_totals(matrix: &TransferMatrix, source_totals: &[f64]) -> Result<(), AnalysisErrors> {
    if source_totals.len() != matrix.sources.len() {
        return InvalidDatasetSnafu {
            reason: format!(
                "{} source totals for {} source parties",
                source_totals.len(),
                matrix.sources.len()
            ),
        }
        .fail();
    }
    Ok(())
}

/// One coefficient of a transfer matrix.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TransferFlow {
    pub source: String,
    pub target: String,
    pub share: f64,
}

/// Shares above which a coefficient is reported.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct HighlightThresholds {
    pub retention: f64,
    pub to_abstention: f64,
    pub to_watched: f64,
}

impl HighlightThresholds {
    pub const DEFAULT_THRESHOLDS: HighlightThresholds = HighlightThresholds {
        retention: 0.6,
        to_abstention: 0.1,
        to_watched: 0.1,
    };
}

/// The notable coefficients of a transfer matrix.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferHighlights {
    /// Sources keeping their voters.
    pub retention: Vec<TransferFlow>,
    /// Sources losing voters to the abstention.
    pub to_abstention: Vec<TransferFlow>,
    /// Sources sending voters to the watched target.
    pub to_watched: Vec<TransferFlow>,
}

/// Finds the coefficients above the thresholds, all strictly.
///
/// Sources without votes in `source_totals` keep the uniform starting row and
/// are skipped. `abstention` and `watched` name targets; a missing name only
/// empties the corresponding list.
pub fn transfer_highlights(
    matrix: &TransferMatrix,
    source_totals: &[f64],
    abstention: &str,
    watched: &str,
    thresholds: &HighlightThresholds,
) -> Result<TransferHighlights, AnalysisErrors> {
    check_totals(matrix, source_totals)?;
    let flow = |source: &str, target: &str, share: f64| TransferFlow {
        source: source.to_string(),
        target: target.to_string(),
        share,
    };
    let mut res = TransferHighlights::default();
    for (i, source) in matrix.sources.iter().enumerate() {
        if source_totals[i] <= 0.0 {
            continue;
        }
        let source = source.as_str();
        if let Some(share) = matrix.share(source, source) {
            if share > thresholds.retention {
                res.retention.push(flow(source, source, share));
            }
        }
        if source != abstention {
            if let Some(share) = matrix.share(source, abstention) {
                if share > thresholds.to_abstention {
                    res.to_abstention.push(flow(source, abstention, share));
                }
            }
        }
        if source != watched {
            if let Some(share) = matrix.share(source, watched) {
                if share > thresholds.to_watched {
                    res.to_watched.push(flow(source, watched, share));
                }
            }
        }
    }
    debug!("transfer_highlights: {:?}", res);
    Ok(res)
}

fn shares_and_weights(rows: &[(Vec<f64>, Vec<f64>)]) -> (Matrix, Matrix, Vec<f64>) {
    let to_shares = |v: &Vec<f64>| -> (Vec<f64>, f64) {
        let total: f64 = v.iter().sum();
        let denominator = if total == 0.0 { 1.0 } else { total };
        (v.iter().map(|x| x / denominator).collect(), total)
    };
    let mut x: Matrix = Vec::with_capacity(rows.len());
    let mut y: Matrix = Vec::with_capacity(rows.len());
    let mut sizes: Vec<f64> = Vec::with_capacity(rows.len());
    for (src, dst) in rows.iter() {
        let (xs, size) = to_shares(src);
        let (ys, _) = to_shares(dst);
        x.push(xs);
        y.push(ys);
        sizes.push(size);
    }
    let mean_size = sizes.iter().sum::<f64>() / sizes.len() as f64;
    let w: Vec<f64> = if mean_size > 0.0 {
        sizes.iter().map(|s| s / mean_size).collect()
    } else {
        vec![1.0; sizes.len()]
    };
    (x, y, w)
}

fn loss(x: &Matrix, y: &Matrix, w: &[f64], p: &Matrix) -> f64 {
    x.iter()
        .zip(y.iter())
        .zip(w.iter())
        .map(|((xi, yi), wi)| {
            let err: f64 = yi
                .iter()
                .enumerate()
                .map(|(j, yij)| {
                    let pred: f64 = xi.iter().zip(p.iter()).map(|(xa, pa)| xa * pa[j]).sum();
                    (yij - pred) * (yij - pred)
                })
                .sum();
            wi * err
        })
        .sum()
}

/// Euclidean projection on the probability simplex (sort-based algorithm).
pub(crate) fn project_on_simplex(v: &[f64]) -> Vec<f64> {
    let mut sorted = v.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (idx, u) in sorted.iter().enumerate() {
        cumulative += u;
        let t = (cumulative - 1.0) / (idx + 1) as f64;
        if u - t > 0.0 {
            theta = t;
        }
    }
    v.iter().map(|x| (x - theta).max(0.0)).collect()
}
