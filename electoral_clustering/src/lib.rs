/*!
Clustering of electoral units by voting pattern, with score inference and
vote-transfer estimation.

The pipeline runs in four stages, each one returning plain values:

1. [normalize] turns the raw shares of every unit into z-scores,
2. [cluster_units] groups the units with a deterministic k-means,
3. [infer] computes a score and a confidence for every unit,
4. [aggregate] merges everything into one [AnalysisRecord] per unit.

[run_analysis] chains the four stages. The [builder::Builder] offers a more
incremental interface. See the [manual] for the input formats of the
`elanalyze` program.
*/

mod aggregate;
mod config;
mod inference;
mod kmeans;
mod linalg;
mod normalize;
mod pipeline;
mod profile;
mod transfer;

pub mod builder;
pub mod manual;

pub use crate::aggregate::{aggregate, from_flat_table, to_flat_table, FlatTable};
pub use crate::config::*;
pub use crate::inference::{
    fit_ridge, infer, infer_supervised, infer_unsupervised, principal_axis, Inference, LinearFit,
};
pub use crate::kmeans::{cluster_units, Clustering};
pub use crate::normalize::{normalize, normalize_units, FeatureStats, Normalized};
pub use crate::pipeline::{run_analysis, AnalysisOutcome, ClusteringSummary};
pub use crate::profile::{cluster_name, describe_clusters, ClusterProfile};
pub use crate::transfer::{
    absolute_transfers, estimate_transfer_matrix, transfer_highlights, transfers_by_cluster,
    HighlightThresholds, TransferFlow, TransferHighlights, TransferMatrix, TransferOptions,
    TransferSample, TransferScope,
};
