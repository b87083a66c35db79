use std::collections::BTreeMap;

use electoral_clustering::*;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn names() -> Vec<String> {
    ["PSOE", "PP", "Abstencion"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// Three groups: socialist villages, conservative towns and high abstention.
fn dataset() -> Dataset {
    let units = vec![
        ElectoralUnit::new("Jaén/Andújar", &[0.50, 0.15, 0.30]),
        ElectoralUnit::new("Jaén/Linares", &[0.52, 0.14, 0.29]),
        ElectoralUnit::new("Jaén/Úbeda", &[0.49, 0.16, 0.31]),
        ElectoralUnit::new("Málaga/Marbella", &[0.15, 0.50, 0.30]),
        ElectoralUnit::new("Málaga/Estepona", &[0.16, 0.49, 0.31]),
        ElectoralUnit::new("Málaga/Benahavís", &[0.14, 0.52, 0.29]),
        ElectoralUnit::new("Cádiz/Barbate", &[0.20, 0.15, 0.60]),
        ElectoralUnit::new("Cádiz/La Línea", &[0.18, 0.17, 0.62]),
        ElectoralUnit::new("Cádiz/Algeciras", &[0.19, 0.16, 0.61]),
    ];
    Dataset::new(&names(), units)
        .unwrap()
        .with_abstention_feature("Abstencion")
        .unwrap()
}

#[test]
fn profiles_name_the_groups() {
    init();
    let outcome = run_analysis(&dataset(), &AnalysisConfig::with_k(3), None, None).unwrap();
    assert!(outcome.clustering.converged);
    let mut found: Vec<String> = outcome.profiles.iter().map(|p| p.name.clone()).collect();
    found.sort();
    assert_eq!(
        found,
        vec!["High abstention", "Stronghold PP", "Stronghold PSOE"]
    );
    for p in outcome.profiles.iter() {
        assert_eq!(p.size, 3);
    }
}

#[test]
fn more_clusters_than_units() {
    init();
    let res = run_analysis(&dataset(), &AnalysisConfig::with_k(20), None, None);
    assert!(matches!(res, Err(AnalysisErrors::Clustering { .. })));
    let outcome = run_analysis(&dataset(), &AnalysisConfig::with_k(9), None, None).unwrap();
    assert!(outcome.clustering.sizes.iter().all(|s| *s == 1));
}

#[test]
fn flat_table_round_trip() {
    init();
    let ds = dataset();
    let outcome = run_analysis(&ds, &AnalysisConfig::with_k(3), None, None).unwrap();
    let table = to_flat_table(&outcome.records, ds.feature_names());
    assert_eq!(table.rows.len(), 9);
    assert_eq!(table.header[5], "PSOE");
    assert_eq!(from_flat_table(&table).unwrap(), outcome.records);
}

#[test]
fn supervised_scores_follow_the_labels() {
    init();
    let config = AnalysisConfig {
        mode: InferenceMode::Supervised,
        min_labeled_per_cluster: 1,
        ..AnalysisConfig::with_k(3)
    };
    let labels: BTreeMap<String, f64> = [
        ("Jaén/Andújar", 0.8),
        ("Jaén/Linares", 0.82),
        ("Málaga/Marbella", 0.2),
        ("Cádiz/Barbate", 0.5),
    ]
    .iter()
    .map(|(id, t)| (id.to_string(), *t))
    .collect();
    let outcome = run_analysis(&dataset(), &config, Some(&labels), None).unwrap();
    assert!(!outcome.is_degraded());
    let ubeda = outcome.records["Jaén/Úbeda"].inference;
    let estepona = outcome.records["Málaga/Estepona"].inference;
    assert!(ubeda.score > estepona.score);
    assert!(ubeda.confidence > 0.0 && ubeda.confidence <= 1.0);
    assert_eq!(
        outcome.records["Jaén/Linares"].inference.model,
        ModelScope::Observed
    );
}

#[test]
fn transfers_between_two_elections() {
    init();
    let sources: Vec<String> = ["PSOE", "PP"].iter().map(|s| s.to_string()).collect();
    let targets: Vec<String> = ["PSOE", "PP", "VOX"].iter().map(|s| s.to_string()).collect();
    // PSOE keeps 80% and loses 20% to PP. PP keeps 70% and loses 30% to VOX.
    let truth = [[0.8, 0.2, 0.0], [0.0, 0.7, 0.3]];
    let mut rows: BTreeMap<String, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    let starts = [
        ("a", [600.0, 400.0]),
        ("b", [300.0, 700.0]),
        ("c", [500.0, 500.0]),
        ("d", [900.0, 100.0]),
    ];
    for (id, start) in starts.iter() {
        let end: Vec<f64> = (0..3)
            .map(|j| start[0] * truth[0][j] + start[1] * truth[1][j])
            .collect();
        rows.insert(id.to_string(), (start.to_vec(), end));
    }
    let assignments: BTreeMap<String, ClusterLabel> = [("a", 0), ("b", 0), ("c", 1), ("d", 1)]
        .iter()
        .map(|(id, c)| (id.to_string(), *c))
        .collect();
    let res = transfers_by_cluster(
        &sources,
        &targets,
        &rows,
        &assignments,
        2,
        &TransferOptions::DEFAULT_OPTIONS,
    )
    .unwrap();
    assert_eq!(res.len(), 3);
    let global = &res[&TransferScope::Global];
    assert!((global.share("PSOE", "PSOE").unwrap() - 0.8).abs() < 1e-3);
    assert!((global.share("PP", "VOX").unwrap() - 0.3).abs() < 1e-3);
    let absolute = absolute_transfers(global, &[2300.0, 1700.0]).unwrap();
    assert!((absolute[1][2] - 510.0).abs() < 2.0);
}
