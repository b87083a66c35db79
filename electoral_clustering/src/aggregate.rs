use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::*;

/// Merges the outputs of the pipeline stages into one record per unit.
///
/// All the mappings must cover exactly the same units. Any unit present in
/// one mapping and absent from another is an integrity error, and nothing
/// is returned.
pub fn aggregate(
    features: &BTreeMap<String, FeatureVector>,
    clusters: &BTreeMap<String, ClusterLabel>,
    inference: &BTreeMap<String, InferenceOutput>,
) -> Result<BTreeMap<String, AnalysisRecord>, AnalysisErrors> {
    check_coverage(features.keys(), "cluster assignments", |id| clusters.contains_key(id))?;
    check_coverage(features.keys(), "inference outputs", |id| inference.contains_key(id))?;
    check_coverage(clusters.keys(), "feature vectors", |id| features.contains_key(id))?;
    check_coverage(inference.keys(), "feature vectors", |id| features.contains_key(id))?;

    let records: BTreeMap<String, AnalysisRecord> = features
        .iter()
        .map(|(id, f)| {
            (
                id.clone(),
                AnalysisRecord {
                    unit_id: id.clone(),
                    features: f.clone(),
                    cluster: clusters[id],
                    inference: inference[id],
                },
            )
        })
        .collect();
    info!("aggregate: {} records", records.len());
    Ok(records)
}

fn check_coverage<'a, I, F>(ids: I, other: &str, present: F) -> Result<(), AnalysisErrors>
where
    I: Iterator<Item = &'a String>,
    F: Fn(&String) -> bool,
{
    for id in ids {
        if !present(id) {
            debug!("check_coverage: {} missing from {}", id, other);
            return IntegritySnafu {
                unit_id: id.clone(),
                missing_from: other,
            }
            .fail();
        }
    }
    Ok(())
}

/// The records as a flat table: one row per unit.
///
/// The columns are `unit_id, cluster, score, confidence, model` and then one
/// column per feature. The numbers use the shortest representation that
/// parses back to the same value, so the conversion loses nothing.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FlatTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

const FIXED_COLUMNS: [&str; 5] = ["unit_id", "cluster", "score", "confidence", "model"];

pub fn to_flat_table(
    records: &BTreeMap<String, AnalysisRecord>,
    feature_names: &[String],
) -> FlatTable {
    let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|s| s.to_string()).collect();
    header.extend(feature_names.iter().cloned());
    let rows: Vec<Vec<String>> = records
        .values()
        .map(|r| {
            let mut row = vec![
                r.unit_id.clone(),
                r.cluster.to_string(),
                r.inference.score.to_string(),
                r.inference.confidence.to_string(),
                r.inference.model.to_string(),
            ];
            row.extend(r.features.iter().map(|x| x.to_string()));
            row
        })
        .collect();
    FlatTable { header, rows }
}

pub fn from_flat_table(
    table: &FlatTable,
) -> Result<BTreeMap<String, AnalysisRecord>, AnalysisErrors> {
    let fixed_ok = table.header.len() >= FIXED_COLUMNS.len()
        && table
            .header
            .iter()
            .zip(FIXED_COLUMNS.iter())
            .all(|(h, f)| h == f);
    if !fixed_ok {
        return InvalidDatasetSnafu {
            reason: format!("unexpected flat table header {:?}", table.header),
        }
        .fail();
    }
    let mut res: BTreeMap<String, AnalysisRecord> = BTreeMap::new();
    for (lineno, row) in table.rows.iter().enumerate() {
        if row.len() != table.header.len() {
            return InvalidDatasetSnafu {
                reason: format!(
                    "row {} has {} cells, expected {}",
                    lineno,
                    row.len(),
                    table.header.len()
                ),
            }
            .fail();
        }
        let parse_f64 = |s: &String| -> Result<f64, AnalysisErrors> {
            s.parse::<f64>().map_err(|_| AnalysisErrors::InvalidDataset {
                reason: format!("row {}: cannot parse number {:?}", lineno, s),
            })
        };
        let cluster = row[1]
            .parse::<ClusterLabel>()
            .map_err(|_| AnalysisErrors::InvalidDataset {
                reason: format!("row {}: cannot parse cluster {:?}", lineno, row[1]),
            })?;
        let features: FeatureVector = row[FIXED_COLUMNS.len()..]
            .iter()
            .map(|s| parse_f64(s))
            .collect::<Result<_, _>>()?;
        let record = AnalysisRecord {
            unit_id: row[0].clone(),
            features,
            cluster,
            inference: InferenceOutput {
                score: parse_f64(&row[2])?,
                confidence: parse_f64(&row[3])?,
                model: row[4].parse::<ModelScope>()?,
            },
        };
        if res.insert(row[0].clone(), record).is_some() {
            return InvalidDatasetSnafu {
                reason: format!("duplicate unit {} in the flat table", row[0]),
            }
            .fail();
        }
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(score: f64) -> InferenceOutput {
        InferenceOutput {
            score,
            confidence: 0.5,
            model: ModelScope::Centroid,
        }
    }

    fn inputs() -> (
        BTreeMap<String, FeatureVector>,
        BTreeMap<String, ClusterLabel>,
        BTreeMap<String, InferenceOutput>,
    ) {
        let features = [("a", vec![0.1, -0.2]), ("b", vec![1.0 / 3.0, 2.5])]
            .iter()
            .map(|(id, f)| (id.to_string(), f.clone()))
            .collect();
        let clusters = [("a", 0), ("b", 1)]
            .iter()
            .map(|(id, c)| (id.to_string(), *c))
            .collect();
        let inference = [("a", output(-0.7)), ("b", output(0.7))]
            .iter()
            .map(|(id, o)| (id.to_string(), *o))
            .collect();
        (features, clusters, inference)
    }

    #[test]
    fn merges_all_mappings() {
        let (f, c, i) = inputs();
        let res = aggregate(&f, &c, &i).unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(res["b"].cluster, 1);
        assert_eq!(res["b"].inference.score, 0.7);
        assert_eq!(res["a"].features, vec![0.1, -0.2]);
    }

    #[test]
    fn missing_cluster_is_an_integrity_error() {
        let (f, mut c, i) = inputs();
        c.remove("b");
        let res = aggregate(&f, &c, &i);
        assert_eq!(
            res,
            Err(AnalysisErrors::Integrity {
                unit_id: "b".to_string(),
                missing_from: "cluster assignments".to_string()
            })
        );
    }

    #[test]
    fn extra_inference_is_an_integrity_error() {
        let (f, c, mut i) = inputs();
        i.insert("z".to_string(), output(0.0));
        let res = aggregate(&f, &c, &i);
        assert!(matches!(res, Err(AnalysisErrors::Integrity { .. })));
    }

    #[test]
    fn missing_features_is_an_integrity_error() {
        let (mut f, c, i) = inputs();
        f.remove("a");
        let res = aggregate(&f, &c, &i);
        assert!(matches!(res, Err(AnalysisErrors::Integrity { .. })));
    }

    #[test]
    fn flat_table_is_lossless() {
        let (f, c, mut i) = inputs();
        i.get_mut("b").unwrap().model = ModelScope::Cluster(1);
        let records = aggregate(&f, &c, &i).unwrap();
        let names = vec!["PSOE".to_string(), "PP".to_string()];
        let table = to_flat_table(&records, &names);
        assert_eq!(table.header.len(), 7);
        assert_eq!(table.rows[1][4], "cluster:1");
        assert_eq!(from_flat_table(&table).unwrap(), records);
    }

    #[test]
    fn flat_table_rejects_bad_rows() {
        let table = FlatTable {
            header: FIXED_COLUMNS.iter().map(|s| s.to_string()).collect(),
            rows: vec![vec![
                "a".to_string(),
                "x".to_string(),
                "0".to_string(),
                "0".to_string(),
                "centroid".to_string(),
            ]],
        };
        assert!(matches!(
            from_flat_table(&table),
            Err(AnalysisErrors::InvalidDataset { .. })
        ));
    }
}
