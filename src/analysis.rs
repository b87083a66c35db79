use log::{debug, info, warn};

use electoral_clustering::*;
use snafu::{prelude::*, ErrorCompat, Snafu};

use std::fs;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Reader, Xlsx};

use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::analysis::config_reader::*;
use crate::analysis::io_common::simplify_file_name;
use crate::analysis::pivot::{
    build_dataset, build_tables, election_names, transfer_rows, ElectionTables, ABSTENTION_FEATURE,
};
use crate::args::Args;

pub mod config_reader;
mod io_common;
mod io_csv;
mod io_excel;
mod pivot;

#[derive(Debug, Snafu)]
pub enum AnalysisCliError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("The Excel file has no worksheet or no header row"))]
    EmptyExcel {},
    #[snafu(display("Worksheet {name} not found"))]
    MissingWorksheet { name: String },
    #[snafu(display("Line {lineno}: unexpected cell {content}"))]
    ExcelWrongCellType { lineno: u64, content: String },
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Invalid JSON"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Expected a positive integer, got {content}"))]
    ParsingJsonNumber { content: String },
    #[snafu(display("The configuration file has no parent directory"))]
    MissingParentDir {},
    #[snafu(display("Error opening file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Line {lineno}: could not parse the CSV record"))]
    CsvLineParse { source: csv::Error, lineno: usize },
    #[snafu(display("Line {lineno}: too few columns"))]
    LineTooShort { lineno: usize },
    #[snafu(display("Line {lineno}: {content} is not a number"))]
    ParsingNumber { lineno: usize, content: String },
    #[snafu(display("Column {name} is missing from {path}"))]
    MissingColumn { name: String, path: String },
    #[snafu(display("Error writing to {path}"))]
    CsvWrite { source: csv::Error, path: String },
    #[snafu(display("Error writing to {path}"))]
    WritingOutput {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("No unit found for {election}"))]
    NoRecords { election: String },
    #[snafu(display("Analysis failed"))]
    Analysis { source: AnalysisErrors },
    #[snafu(display("The summary differs from the reference {path}"))]
    ReferenceMismatch { path: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

type CliResult<T> = Result<T, AnalysisCliError>;
type BCliResult<T> = Result<T, Box<AnalysisCliError>>;

// The party whose gains are reported with the transfers.
const WATCHED_PARTY: &str = "VOX";

/// One line of the long format, as parsed by the readers.
///
/// Missing census, abstention or voters are NaN.
#[derive(PartialEq, Debug, Clone)]
pub struct VoteRow {
    pub election: String,
    pub province: String,
    /// None for the aggregation rows.
    pub municipality: Option<String>,
    /// Canonical party name.
    pub party: String,
    pub votes: f64,
    pub census: f64,
    pub abstention: f64,
    pub voters: f64,
}

fn fmt_share(x: f64) -> JSValue {
    json!(format!("{:.4}", x))
}

fn fmt_votes(x: f64) -> JSValue {
    json!(format!("{:.0}", x))
}

fn validate_rules(rules: &AnalysisRules) -> CliResult<AnalysisConfig> {
    let defaults = AnalysisConfig::DEFAULT_CONFIG;
    let k = match read_js_opt_int(&rules.cluster_count)? {
        Some(x) => x as usize,
        None => defaults.k,
    };
    let max_iterations = match read_js_opt_int(&rules.max_iterations)? {
        Some(x) if x <= u32::MAX as u64 => x as u32,
        Some(x) => whatever!("maxIterations is too large: {}", x),
        None => defaults.max_iterations,
    };
    let min_labeled_per_cluster = match read_js_opt_int(&rules.min_labeled_per_cluster)? {
        Some(x) => x as usize,
        None => defaults.min_labeled_per_cluster,
    };
    let res = AnalysisConfig {
        k,
        max_iterations,
        mode: rules.mode()?,
        tiebreak_mode: TieBreakMode::LowestIndex,
        missing_data: rules.missing_data()?,
        min_labeled_per_cluster,
        ridge_penalty: rules.ridge_penalty.unwrap_or(defaults.ridge_penalty),
    }
    .with_seed(rules.random_seed()?);
    Ok(res)
}

fn resolve_path(root: &Path, file_path: &str) -> String {
    let p: PathBuf = root.join(file_path);
    p.as_path().display().to_string()
}

fn infer_provider(path: &str, input_type: &Option<String>) -> String {
    match input_type {
        Some(x) => x.clone(),
        None => match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("xlsx") | Some("xlsm") => "xlsx".to_string(),
            _ => "csv".to_string(),
        },
    }
}

fn input_source(input: String, args: &Args) -> FileSource {
    FileSource {
        provider: infer_provider(&input, &args.input_type),
        file_path: input,
        excel_worksheet_name: args.excel_worksheet_name.clone(),
    }
}

/// Reads the configuration file. The relative paths it contains are resolved
/// against its directory.
fn read_job_config(config_path: &str) -> BCliResult<AnalysisJobConfig> {
    let mut config = read_config(config_path)?;
    let root_p = Path::new(config_path)
        .parent()
        .context(MissingParentDirSnafu {})?;
    for cfs in config.data_sources.iter_mut() {
        cfs.file_path = resolve_path(root_p, &cfs.file_path);
    }
    if let Some(ls) = config.labels.as_mut() {
        ls.file_path = resolve_path(root_p, &ls.file_path);
    }
    let out_dir = config
        .output_settings
        .output_directory
        .clone()
        .unwrap_or_default();
    config.output_settings.output_directory = Some(resolve_path(root_p, &out_dir));
    Ok(config)
}

/// The configuration when no file is given: everything comes from the flags.
fn config_from_args(args: &Args) -> CliResult<AnalysisJobConfig> {
    let input = match args.input.clone() {
        Some(x) => x,
        None => whatever!("No input: provide --config or --input"),
    };
    let start_election = match args.start.clone() {
        Some(x) => x,
        None => whatever!("No start election: provide --config or --start"),
    };
    Ok(AnalysisJobConfig {
        output_settings: OutputSettings::default(),
        data_sources: vec![input_source(input, args)],
        selection: Selection {
            start_election,
            end_election: None,
            province: None,
            municipality: None,
        },
        rules: AnalysisRules::default(),
        labels: None,
    })
}

/// The flags take precedence over the configuration file.
fn apply_args(config: &mut AnalysisJobConfig, args: &Args) {
    if let Some(input) = args.input.clone() {
        config.data_sources = vec![input_source(input, args)];
    }
    let sel = &mut config.selection;
    if let Some(x) = args.start.clone() {
        sel.start_election = x;
    }
    if args.end.is_some() {
        sel.end_election = args.end.clone();
    }
    if args.province.is_some() {
        sel.province = args.province.clone();
    }
    if args.municipality.is_some() {
        sel.municipality = args.municipality.clone();
    }
    let rules = &mut config.rules;
    if let Some(k) = args.clusters {
        rules.cluster_count = Some(json!(k));
    }
    if let Some(x) = args.max_iterations {
        rules.max_iterations = Some(json!(x));
    }
    if args.mode.is_some() {
        rules.mode = args.mode.clone();
    }
    if let Some(x) = args.random_seed {
        rules.random_seed = Some(json!(x));
    }
    if args.missing_data.is_some() {
        rules.missing_data = args.missing_data.clone();
    }
    if let Some(path) = args.labels.clone() {
        config.labels = Some(match config.labels.take() {
            Some(ls) => LabelSource {
                file_path: path,
                ..ls
            },
            None => LabelSource {
                file_path: path,
                id_column: None,
                target_column: None,
            },
        });
    }
}

fn read_rows(cfs: &FileSource) -> BCliResult<Vec<VoteRow>> {
    info!("Attempting to read {:?} ({})", cfs.file_path, cfs.provider);
    match cfs.provider.as_str() {
        "csv" => io_csv::read_csv_rows(cfs.file_path.clone(), cfs),
        "xlsx" | "excel" => io_excel::read_excel_rows(cfs.file_path.clone(), cfs),
        x => Err(Box::new(AnalysisCliError::Whatever {
            message: format!("Provider not implemented {:?}", x),
            source: None,
        })),
    }
}

/// The elections found in the data sources of the flags or of the
/// configuration file.
fn available_elections(args: &Args) -> BCliResult<Vec<String>> {
    let sources = match (args.input.clone(), args.config.as_ref()) {
        (Some(input), _) => vec![input_source(input, args)],
        (None, Some(config_path)) => read_job_config(config_path)?.data_sources,
        (None, None) => {
            return Err(Box::new(AnalysisCliError::Whatever {
                message: "No input: provide --config or --input".to_string(),
                source: None,
            }))
        }
    };
    let mut rows: Vec<VoteRow> = Vec::new();
    for cfs in sources.iter() {
        let mut file_rows = read_rows(cfs)?;
        rows.append(&mut file_rows);
    }
    Ok(election_names(&rows))
}

fn output_config(config: &AnalysisJobConfig, ac: &AnalysisConfig) -> OutputConfig {
    OutputConfig {
        analysis: config.output_settings.analysis_name.clone(),
        sources: config
            .data_sources
            .iter()
            .map(|cfs| simplify_file_name(&cfs.file_path))
            .collect(),
        start_election: config.selection.start_election.clone(),
        end_election: config.selection.end_election.clone(),
        province: config.selection.province.clone(),
        municipality: config.selection.municipality.clone(),
        cluster_count: ac.k,
        max_iterations: ac.max_iterations,
        mode: match ac.mode {
            InferenceMode::Unsupervised => "unsupervised".to_string(),
            InferenceMode::Supervised => "supervised".to_string(),
        },
        random_seed: match ac.tiebreak_mode {
            TieBreakMode::Random(seed) => Some(seed.to_string()),
            TieBreakMode::LowestIndex => None,
        },
        missing_data: match ac.missing_data {
            MissingDataPolicy::Exclude => "exclude".to_string(),
            MissingDataPolicy::ImputeMean => "imputeMean".to_string(),
        },
    }
}

fn clusters_to_json(outcome: &AnalysisOutcome, feature_names: &[String]) -> Vec<JSValue> {
    outcome
        .profiles
        .iter()
        .map(|p| {
            let mut means: JSMap<String, JSValue> = JSMap::new();
            for (name, x) in feature_names.iter().zip(p.mean_features.iter()) {
                means.insert(name.clone(), fmt_share(*x));
            }
            json!({
                "cluster": p.cluster,
                "name": p.name,
                "size": p.size,
                "meanFeatures": means,
            })
        })
        .collect()
}

fn units_to_json(outcome: &AnalysisOutcome) -> JSMap<String, JSValue> {
    outcome
        .records
        .iter()
        .map(|(id, r)| {
            (
                id.clone(),
                json!({
                    "cluster": r.cluster,
                    "score": fmt_share(r.inference.score),
                    "confidence": fmt_share(r.inference.confidence),
                    "model": r.inference.model.to_string(),
                }),
            )
        })
        .collect()
}

fn flows_to_json(flows: &[TransferFlow]) -> Vec<JSValue> {
    flows
        .iter()
        .map(|f| {
            json!({
                "source": f.source,
                "target": f.target,
                "share": fmt_share(f.share),
            })
        })
        .collect()
}

fn transfers_to_json(
    tables: &ElectionTables,
    outcome: &AnalysisOutcome,
    k: usize,
) -> BCliResult<Option<Vec<JSValue>>> {
    let end = match tables.end.as_ref() {
        Some(x) => x,
        None => return Ok(None),
    };
    let tr = transfer_rows(&tables.start, end);
    let assignments = outcome.assignments();
    let matrices = transfers_by_cluster(
        &tr.sources,
        &tr.targets,
        &tr.rows,
        &assignments,
        k,
        &TransferOptions::DEFAULT_OPTIONS,
    )
    .context(AnalysisSnafu {})?;

    let mut res: Vec<JSValue> = Vec::new();
    for (scope, matrix) in matrices.iter() {
        let (scope_name, totals) = match scope {
            TransferScope::Global => ("global".to_string(), tr.source_totals(tr.rows.keys())),
            TransferScope::Cluster(c) => (
                format!("cluster:{}", c),
                tr.source_totals(
                    assignments
                        .iter()
                        .filter(|(_, ac)| *ac == c)
                        .map(|(id, _)| id),
                ),
            ),
        };
        if !matrix.converged {
            warn!(
                "transfers: the estimation for {} did not converge in {} iterations",
                scope_name, matrix.iterations
            );
        }
        let votes = absolute_transfers(matrix, &totals).context(AnalysisSnafu {})?;
        let highlights = transfer_highlights(
            matrix,
            &totals,
            ABSTENTION_FEATURE,
            WATCHED_PARTY,
            &HighlightThresholds::DEFAULT_THRESHOLDS,
        )
        .context(AnalysisSnafu {})?;
        let mut shares_js: JSMap<String, JSValue> = JSMap::new();
        let mut votes_js: JSMap<String, JSValue> = JSMap::new();
        for (i, src) in matrix.sources.iter().enumerate() {
            let mut s_row: JSMap<String, JSValue> = JSMap::new();
            let mut v_row: JSMap<String, JSValue> = JSMap::new();
            for (j, dst) in matrix.targets.iter().enumerate() {
                s_row.insert(dst.clone(), fmt_share(matrix.shares[i][j]));
                v_row.insert(dst.clone(), fmt_votes(votes[i][j]));
            }
            shares_js.insert(src.clone(), JSValue::Object(s_row));
            votes_js.insert(src.clone(), JSValue::Object(v_row));
        }
        res.push(json!({
            "scope": scope_name,
            "units": matrix.units,
            "converged": matrix.converged,
            "shares": shares_js,
            "votes": votes_js,
            "highlights": {
                "retention": flows_to_json(&highlights.retention),
                "toAbstention": flows_to_json(&highlights.to_abstention),
                "toVox": flows_to_json(&highlights.to_watched),
            },
        }));
    }
    Ok(Some(res))
}

fn build_summary_js(
    config: &AnalysisJobConfig,
    ac: &AnalysisConfig,
    dataset: &Dataset,
    outcome: &AnalysisOutcome,
    transfers: Option<Vec<JSValue>>,
) -> BCliResult<JSValue> {
    let c = output_config(config, ac);
    let caveats = serde_json::to_value(&outcome.caveats).context(ParsingJsonSnafu {})?;
    let mut js = json!({
        "config": c,
        "features": dataset.feature_names(),
        "degraded": outcome.is_degraded(),
        "caveats": caveats,
        "clustering": {
            "converged": outcome.clustering.converged,
            "inertia": fmt_share(outcome.clustering.inertia),
            "sizes": outcome.clustering.sizes,
        },
        "clusters": clusters_to_json(outcome, dataset.feature_names()),
        "units": units_to_json(outcome),
    });
    if let Some(tjs) = transfers {
        js["transfers"] = JSValue::Array(tjs);
    }
    Ok(js)
}

fn write_output(path: &str, contents: &str) -> BCliResult<()> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent).context(WritingOutputSnafu {
            path: path.to_string(),
        })?;
    }
    fs::write(path, contents).context(WritingOutputSnafu {
        path: path.to_string(),
    })?;
    info!("write_output: summary written to {:?}", path);
    Ok(())
}

fn output_path(config: &AnalysisJobConfig, file_name: &Option<String>) -> Option<String> {
    let dir = config
        .output_settings
        .output_directory
        .clone()
        .unwrap_or_default();
    file_name
        .as_ref()
        .map(|f| resolve_path(Path::new(&dir), f))
}

pub fn run_analysis_job(args: &Args) -> BCliResult<()> {
    if args.list_elections {
        for name in available_elections(args)? {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut config = match args.config.as_ref() {
        Some(config_path) => read_job_config(config_path)?,
        None => config_from_args(args)?,
    };
    apply_args(&mut config, args);
    info!("config: {:?}", config);

    let analysis_config = validate_rules(&config.rules)?;

    if config.data_sources.is_empty() {
        return Err(Box::new(AnalysisCliError::Whatever {
            message: "No data source in the configuration".to_string(),
            source: None,
        }));
    }
    let mut rows: Vec<VoteRow> = Vec::new();
    for cfs in config.data_sources.iter() {
        let mut file_rows = read_rows(cfs)?;
        rows.append(&mut file_rows);
    }

    let tables = build_tables(&rows, &config.selection)?;
    let dataset = build_dataset(&tables)?;
    debug!("dataset: {:?}", dataset);

    let labels = match config.labels.as_ref() {
        Some(ls) => Some(io_csv::read_csv_labels(ls.file_path.clone(), ls)?),
        None => None,
    };
    if analysis_config.mode == InferenceMode::Supervised && labels.is_none() {
        warn!("Supervised mode without a labels file");
    }

    let outcome = run_analysis(&dataset, &analysis_config, labels.as_ref(), None)
        .context(AnalysisSnafu {})?;
    if outcome.is_degraded() {
        warn!("The analysis completed with caveats: {:?}", outcome.caveats);
    }

    let transfers = transfers_to_json(&tables, &outcome, analysis_config.k)?;
    let result_js = build_summary_js(&config, &analysis_config, &dataset, &outcome, transfers)?;
    let pretty_js_stats = serde_json::to_string_pretty(&result_js).context(ParsingJsonSnafu {})?;

    let out_path = match args.out.as_deref() {
        Some("stdout") => None,
        Some(p) => Some(p.to_string()),
        None => output_path(&config, &config.output_settings.summary_file),
    };
    match out_path {
        Some(p) => write_output(&p, &pretty_js_stats)?,
        None => println!("{}", pretty_js_stats),
    }

    let table_path = match args.table.clone() {
        Some(p) => Some(p),
        None => output_path(&config, &config.output_settings.table_file),
    };
    if let Some(p) = table_path {
        if let Some(parent) = Path::new(&p).parent() {
            fs::create_dir_all(parent).context(WritingOutputSnafu { path: p.clone() })?;
        }
        let table = to_flat_table(&outcome.records, dataset.feature_names());
        io_csv::write_csv_table(&p, &table)?;
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = args.reference.clone() {
        let summary_ref = read_summary(summary_p.clone())?;
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference string");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            return Err(Box::new(AnalysisCliError::ReferenceMismatch { path: summary_p }));
        }
    }

    Ok(())
}

pub fn report_error(e: &AnalysisCliError) {
    eprintln!("An error occured {}", e);
    if let Some(source) = std::error::Error::source(e) {
        eprintln!("caused by: {}", source);
    }
    if let Some(bt) = ErrorCompat::backtrace(e) {
        eprintln!("trace: {}", bt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_dir() -> &'static str {
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests")
    }

    fn run_job(flags: &[&str]) -> BCliResult<()> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut argv: Vec<&str> = vec!["elanalyze"];
        argv.extend_from_slice(flags);
        let args = Args::parse_from(argv);
        let res = run_analysis_job(&args);
        if let Err(e) = res.as_ref() {
            report_error(e);
        }
        res
    }

    fn test_wrapper(test_name: &str) {
        let config = format!("{}/{}/{}_config.json", test_dir(), test_name, test_name);
        let reference = format!(
            "{}/{}/{}_expected_summary.json",
            test_dir(),
            test_name,
            test_name
        );
        let res = run_job(&["--config", &config, "--reference", &reference, "--out", "stdout"]);
        assert!(res.is_ok());
    }

    #[test]
    fn two_blocs() {
        test_wrapper("two_blocs");
    }

    #[test]
    fn two_blocs_reference_mismatch() {
        let config = format!("{}/two_blocs/two_blocs_config.json", test_dir());
        let reference = format!("{}/two_blocs/two_blocs_expected_summary.json", test_dir());
        // Three clusters do not give the reference summary.
        let res = run_job(&[
            "--config", &config, "--reference", &reference, "--out", "stdout", "-k", "3",
        ]);
        assert!(matches!(
            res.map_err(|e| *e),
            Err(AnalysisCliError::ReferenceMismatch { .. })
        ));
    }

    #[test]
    fn transfers() {
        test_wrapper("transfers");
    }

    #[test]
    fn list_elections() {
        let input = format!("{}/two_blocs/two_blocs.csv", test_dir());
        let args = Args::parse_from(["elanalyze", "--list-elections", "--input", input.as_str()]);
        assert_eq!(
            available_elections(&args).unwrap(),
            vec!["Convocatoria 2015/03", "Convocatoria 2018/12"]
        );
        let config = format!("{}/transfers/transfers_config.json", test_dir());
        let res = run_job(&["--list-elections", "--config", &config]);
        assert!(res.is_ok());
        let res = run_job(&["--list-elections"]);
        assert!(res.is_err());
    }

    #[test]
    fn flags_only() {
        let input = format!("{}/two_blocs/two_blocs.csv", test_dir());
        let res = run_job(&[
            "--input",
            &input,
            "--start",
            "Convocatoria 2015/03",
            "--end",
            "Convocatoria 2018/12",
            "-k",
            "2",
            "--random-seed",
            "7",
            "--out",
            "stdout",
        ]);
        assert!(res.is_ok());
    }

    #[test]
    fn unknown_election() {
        let input = format!("{}/two_blocs/two_blocs.csv", test_dir());
        let res = run_job(&["--input", &input, "--start", "Convocatoria 1900/01", "--out", "stdout"]);
        assert!(matches!(
            res.map_err(|e| *e),
            Err(AnalysisCliError::NoRecords { .. })
        ));
    }

    #[test]
    fn too_many_clusters() {
        let input = format!("{}/two_blocs/two_blocs.csv", test_dir());
        let res = run_job(&[
            "--input",
            &input,
            "--start",
            "Convocatoria 2015/03",
            "--province",
            "Sevilla",
            "-k",
            "10",
            "--out",
            "stdout",
        ]);
        assert!(matches!(
            res.map_err(|e| *e),
            Err(AnalysisCliError::Analysis {
                source: AnalysisErrors::Clustering { .. }
            })
        ));
    }

    #[test]
    fn rules() {
        let rules = AnalysisRules {
            cluster_count: Some(json!("4")),
            random_seed: Some(json!(12)),
            missing_data: Some("imputeMean".to_string()),
            ..AnalysisRules::default()
        };
        let ac = validate_rules(&rules).unwrap();
        assert_eq!(ac.k, 4);
        assert_eq!(ac.tiebreak_mode, TieBreakMode::Random(12));
        assert_eq!(ac.missing_data, MissingDataPolicy::ImputeMean);
        assert_eq!(ac.max_iterations, 100);
        assert!(validate_rules(&AnalysisRules {
            cluster_count: Some(json!("many")),
            ..AnalysisRules::default()
        })
        .is_err());
    }

    #[test]
    fn providers() {
        assert_eq!(infer_provider("a/b.xlsx", &None), "xlsx");
        assert_eq!(infer_provider("a/b.csv", &None), "csv");
        assert_eq!(infer_provider("a/b.xlsx", &Some("csv".to_string())), "csv");
    }
}
