use crate::analysis::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputSettings {
    #[serde(rename = "analysisName")]
    pub analysis_name: Option<String>,
    #[serde(rename = "outputDirectory")]
    pub output_directory: Option<String>,
    #[serde(rename = "summaryFile")]
    pub summary_file: Option<String>,
    #[serde(rename = "tableFile")]
    pub table_file: Option<String>,
}

/// The echo of the configuration in the summary.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub analysis: Option<String>,
    pub sources: Vec<String>,
    #[serde(rename = "startElection")]
    pub start_election: String,
    #[serde(rename = "endElection")]
    pub end_election: Option<String>,
    pub province: Option<String>,
    pub municipality: Option<String>,
    #[serde(rename = "clusterCount")]
    pub cluster_count: usize,
    #[serde(rename = "maxIterations")]
    pub max_iterations: u32,
    pub mode: String,
    #[serde(rename = "randomSeed")]
    pub random_seed: Option<String>,
    #[serde(rename = "missingData")]
    pub missing_data: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct FileSource {
    pub provider: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "excelWorksheetName")]
    pub excel_worksheet_name: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    #[serde(rename = "startElection")]
    pub start_election: String,
    #[serde(rename = "endElection")]
    pub end_election: Option<String>,
    pub province: Option<String>,
    pub municipality: Option<String>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnalysisRules {
    #[serde(rename = "clusterCount")]
    pub cluster_count: Option<JSValue>,
    #[serde(rename = "maxIterations")]
    pub max_iterations: Option<JSValue>,
    pub mode: Option<String>,
    #[serde(rename = "randomSeed")]
    pub random_seed: Option<JSValue>,
    #[serde(rename = "missingData")]
    pub missing_data: Option<String>,
    #[serde(rename = "minLabeledPerCluster")]
    pub min_labeled_per_cluster: Option<JSValue>,
    #[serde(rename = "ridgePenalty")]
    pub ridge_penalty: Option<f64>,
}

impl AnalysisRules {
    pub fn mode(&self) -> CliResult<InferenceMode> {
        match self.mode.as_deref() {
            None | Some("unsupervised") => Ok(InferenceMode::Unsupervised),
            Some("supervised") => Ok(InferenceMode::Supervised),
            Some(x) => whatever!("unknown mode: {}", x),
        }
    }

    pub fn missing_data(&self) -> CliResult<MissingDataPolicy> {
        match self.missing_data.as_deref() {
            None | Some("exclude") => Ok(MissingDataPolicy::Exclude),
            Some("imputeMean") => Ok(MissingDataPolicy::ImputeMean),
            Some(x) => whatever!("unknown missing data policy: {}", x),
        }
    }

    pub fn random_seed(&self) -> CliResult<Option<u64>> {
        read_js_opt_int(&self.random_seed)
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct LabelSource {
    #[serde(rename = "filePath")]
    pub file_path: String,
    #[serde(rename = "idColumn")]
    pub id_column: Option<String>,
    #[serde(rename = "targetColumn")]
    pub target_column: Option<String>,
}

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJobConfig {
    #[serde(rename = "outputSettings", default)]
    pub output_settings: OutputSettings,
    #[serde(rename = "dataSources")]
    pub data_sources: Vec<FileSource>,
    pub selection: Selection,
    #[serde(default)]
    pub rules: AnalysisRules,
    pub labels: Option<LabelSource>,
}

pub fn read_config(path: &str) -> BCliResult<AnalysisJobConfig> {
    let config_str = fs::read_to_string(path).context(OpeningJsonSnafu {
        path: path.to_string(),
    })?;
    let config: AnalysisJobConfig =
        serde_json::from_str(&config_str).context(ParsingJsonSnafu {})?;
    Ok(config)
}

pub fn read_summary(path: String) -> BCliResult<JSValue> {
    let contents = fs::read_to_string(path.clone()).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}

/// Reads an integer written either as a JSON number or as a string.
pub fn read_js_int(x: &Option<JSValue>) -> CliResult<u64> {
    match x {
        Some(JSValue::Number(n)) => n.as_u64().context(ParsingJsonNumberSnafu {
            content: n.to_string(),
        }),
        Some(JSValue::String(s)) => s.trim().parse::<u64>().ok().context(ParsingJsonNumberSnafu {
            content: s.clone(),
        }),
        x => None::<u64>.context(ParsingJsonNumberSnafu {
            content: format!("{:?}", x),
        }),
    }
}

/// Reads an optional integer option.
pub fn read_js_opt_int(x: &Option<JSValue>) -> CliResult<Option<u64>> {
    match x {
        None | Some(JSValue::Null) => Ok(None),
        _ => read_js_int(x).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_config() {
        let js = json!({
            "dataSources": [{"provider": "csv", "filePath": "votes.csv"}],
            "selection": {"startElection": "Convocatoria 2015/03"}
        });
        let config: AnalysisJobConfig = serde_json::from_value(js).unwrap();
        assert_eq!(config.rules, AnalysisRules::default());
        assert_eq!(config.selection.end_election, None);
        assert_eq!(config.rules.mode().unwrap(), InferenceMode::Unsupervised);
        assert_eq!(config.rules.random_seed().unwrap(), None);
    }

    #[test]
    fn integers() {
        assert_eq!(read_js_int(&Some(json!(3))).unwrap(), 3);
        assert_eq!(read_js_int(&Some(json!("42"))).unwrap(), 42);
        assert!(read_js_int(&Some(json!(-1))).is_err());
        assert!(read_js_int(&None).is_err());
        assert_eq!(read_js_opt_int(&Some(JSValue::Null)).unwrap(), None);
    }

    #[test]
    fn unknown_rules() {
        let rules = AnalysisRules {
            mode: Some("magic".to_string()),
            missing_data: Some("ignore".to_string()),
            ..AnalysisRules::default()
        };
        assert!(rules.mode().is_err());
        assert!(rules.missing_data().is_err());
    }
}
